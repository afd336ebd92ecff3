//! GitHub implementation of the chronicle `Client`, backed by REST v3 and GraphQL v4.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use log::{debug, warn};
use serde_json::{json, Map, Value};

use chronicle::api::{
    Client, CommitRecord, CommitSearch, ContributionSummary, ContributionTotals, DateWindow, Error, MemberRole,
    PullRequestRecord, RateLimitStatus, RepoInfo, Result,
};
use chronicle::context::FetchContext;
use chronicle::model::LineStats;
use chronicle::pagination::{paginate_cursor, paginate_offset, Page};

mod builder;
mod gateway;
mod limiter;
mod payload;
mod queries;

pub use builder::GithubClientBuilder;
pub use gateway::{ApiRequest, Gateway, Payload};
pub use limiter::{RateLimit, RateLimiter};

use payload::{
    CommitSearchBody, CommitStatsBody, ForksData, Login, Named, PullRequestSearchData, RateLimitBody,
    RepositoryNode, ReviewData, Sha, SummaryData, TotalsUser,
};

const PAGE_SIZE: u32 = 100;
/// Repositories per metadata lookup.
const REPO_INFO_BATCH: usize = 25;

pub struct GithubClient {
    gateway: Gateway,
}

impl GithubClient {
    fn new(gateway: Gateway) -> Self {
        GithubClient { gateway }
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    #[cfg(test)]
    fn into_gateway(self) -> Gateway {
        self.gateway
    }

    /// Offset-paginated REST list. `extra` goes out with every page.
    async fn rest_list<T, U>(&self, path: &str, extra: &[(String, String)]) -> Vec<U>
    where
        T: serde::de::DeserializeOwned + Into<U>,
    {
        let gateway = &self.gateway;
        paginate_offset(PAGE_SIZE, |page: Page| {
            let request = ApiRequest::get(path)
                .queries(extra)
                .query("per_page", page.page_size)
                .query("page", page.page_no);
            async move {
                let items: Option<Vec<T>> = gateway.call_json(&request).await?;
                Ok(items.map(|items| items.into_iter().map(Into::into).collect()))
            }
        })
        .await
    }

    async fn repo_info_batch(&self, repos: &[(&String, &str, &str)]) -> Result<HashMap<String, RepoInfo>> {
        let mut variables = Map::new();
        for (index, (_, owner, name)) in repos.iter().enumerate() {
            variables.insert(format!("owner{}", index), json!(owner));
            variables.insert(format!("name{}", index), json!(name));
        }
        let data: Option<HashMap<String, Option<RepositoryNode>>> = self
            .gateway
            .graphql(&queries::repository_info(repos.len()), Value::Object(variables))
            .await?;
        let mut data = data.unwrap_or_default();
        let mut found = HashMap::new();
        for (index, (requested, _, _)) in repos.iter().enumerate() {
            match data.remove(&queries::repository_alias(index)).flatten() {
                Some(node) => {
                    found.insert(requested.to_string(), RepoInfo::from(node));
                }
                None => debug!("No metadata for {}", requested),
            }
        }
        Ok(found)
    }
}

impl From<Named> for String {
    fn from(named: Named) -> Self {
        named.name
    }
}

impl From<Sha> for String {
    fn from(sha: Sha) -> Self {
        sha.sha
    }
}

impl From<Login> for String {
    fn from(login: Login) -> Self {
        login.login
    }
}

#[async_trait]
impl Client for GithubClient {
    fn context(&self) -> &FetchContext {
        self.gateway.context()
    }

    async fn rate_limit_status(&self) -> Result<Option<RateLimitStatus>> {
        let body: Option<RateLimitBody> = self.gateway.call_json(&ApiRequest::get("rate_limit")).await?;
        let core = match body {
            Some(body) => body.resources.core,
            None => return Ok(None),
        };
        self.gateway
            .limiter()
            .store(RateLimit::new(core.limit, core.remaining, core.reset))
            .await;
        let reset = Utc.timestamp_opt(core.reset, 0).single().unwrap_or_else(Utc::now);
        Ok(Some(RateLimitStatus::new(core.limit, core.remaining, reset)))
    }

    async fn wait_for_rate_limit_reset(&self, max_wait: Duration) -> bool {
        if let Err(err) = self.rate_limit_status().await {
            warn!("Failed to refresh rate limit status: {}", err);
        }
        self.gateway.limiter().wait_for_reset(max_wait).await
    }

    async fn contribution_summary(&self, login: &str, window: &DateWindow) -> Result<Option<ContributionSummary>> {
        let window = window.clamped_to_year();
        let variables = json!({
            "login": login,
            "from": window.start_timestamp(),
            "to": window.end_timestamp(),
        });
        let data: Option<SummaryData> = self.gateway.graphql(&queries::contribution_summary(), variables).await?;
        Ok(data.and_then(|data| data.user).map(ContributionSummary::from))
    }

    async fn contribution_totals(&self, logins: &[String], window: &DateWindow) -> Result<Vec<ContributionTotals>> {
        if logins.is_empty() {
            return Ok(Vec::new());
        }
        let window = window.clamped_to_year();
        let mut variables = Map::new();
        variables.insert("from".to_string(), json!(window.start_timestamp()));
        variables.insert("to".to_string(), json!(window.end_timestamp()));
        for (index, login) in logins.iter().enumerate() {
            variables.insert(format!("login{}", index), json!(login));
        }
        let data: Option<HashMap<String, Option<TotalsUser>>> = self
            .gateway
            .graphql(&queries::contribution_totals(logins.len()), Value::Object(variables))
            .await?;
        let mut data = match data {
            Some(data) => data,
            None if self.gateway.context().rate_limit_hit() => return Err(Error::RateLimitExceeded),
            None => {
                return Err(Error::RequestFailed(format!(
                    "no contribution totals for {} accounts",
                    logins.len()
                )))
            }
        };
        Ok((0..logins.len())
            .filter_map(|index| data.remove(&queries::account_alias(index)).flatten())
            .map(ContributionTotals::from)
            .collect())
    }

    async fn search_commits(&self, login: &str, window: &DateWindow) -> Result<CommitSearch> {
        let gateway = &self.gateway;
        let query = format!("author:{} author-date:{}..{}", login, window.since, window.until);
        let total_count = AtomicU64::new(0);
        let total_ref = &total_count;
        let items = paginate_offset(PAGE_SIZE, |page: Page| {
            let request = ApiRequest::get("search/commits")
                .query("q", &query)
                .query("sort", "author-date")
                .query("order", "desc")
                .query("per_page", page.page_size)
                .query("page", page.page_no);
            async move {
                let body: Option<CommitSearchBody> = gateway.call_json(&request).await?;
                Ok(body.map(|body| {
                    total_ref.fetch_max(body.total_count, Ordering::Relaxed);
                    body.items.into_iter().map(CommitRecord::from).collect::<Vec<_>>()
                }))
            }
        })
        .await;
        Ok(CommitSearch {
            total_count: total_count.load(Ordering::Relaxed),
            items,
        })
    }

    async fn user_forks(&self, login: &str) -> Result<Vec<RepoInfo>> {
        let gateway = &self.gateway;
        let query = queries::user_forks();
        let query = &query;
        Ok(paginate_cursor(|cursor: Option<String>| {
            let variables = json!({ "login": login, "cursor": cursor });
            async move {
                let data: Option<ForksData> = gateway.graphql(query, variables).await?;
                Ok(data
                    .and_then(|data| data.user)
                    .map(|user| user.repositories.into_page::<RepoInfo>()))
            }
        })
        .await)
    }

    async fn branches(&self, repo: &str) -> Result<Vec<String>> {
        Ok(self.rest_list::<Named, String>(&format!("repos/{}/branches", repo), &[]).await)
    }

    async fn branch_commits(&self, repo: &str, branch: &str, login: &str, window: &DateWindow) -> Result<Vec<String>> {
        let extra = [
            ("sha".to_string(), branch.to_string()),
            ("author".to_string(), login.to_string()),
            ("since".to_string(), window.start_timestamp()),
            ("until".to_string(), window.end_timestamp()),
        ];
        Ok(self.rest_list::<Sha, String>(&format!("repos/{}/commits", repo), &extra).await)
    }

    async fn repo_info(&self, repos: &[String]) -> Result<HashMap<String, RepoInfo>> {
        let named: Vec<(&String, &str, &str)> = repos
            .iter()
            .filter_map(|repo| match repo.split_once('/') {
                Some((owner, name)) => Some((repo, owner, name)),
                None => {
                    warn!("Not a full repository name: {}", repo);
                    None
                }
            })
            .collect();
        let mut found = HashMap::new();
        for batch in named.chunks(REPO_INFO_BATCH) {
            match self.repo_info_batch(batch).await {
                Ok(infos) => found.extend(infos),
                Err(Error::RateLimitExceeded) => return Err(Error::RateLimitExceeded),
                Err(err) => warn!("Failed to look up {} repositories: {}", batch.len(), err),
            }
        }
        Ok(found)
    }

    async fn commit_line_stats(&self, repo: &str, sha: &str) -> Result<Option<LineStats>> {
        let request = ApiRequest::get(format!("repos/{}/commits/{}", repo, sha));
        let body: Option<CommitStatsBody> = self.gateway.call_json(&request).await?;
        Ok(body.and_then(|body| body.stats).map(LineStats::from))
    }

    async fn pull_requests_created(&self, login: &str, window: &DateWindow) -> Result<Vec<PullRequestRecord>> {
        let gateway = &self.gateway;
        let query = queries::pull_requests_created();
        let query = &query;
        let search = format!("author:{} is:pr created:{}..{}", login, window.since, window.until);
        let search = &search;
        let records = paginate_cursor(|cursor: Option<String>| {
            let variables = json!({ "query": search, "cursor": cursor });
            async move {
                let data: Option<PullRequestSearchData> = gateway.graphql(query, variables).await?;
                Ok(data.map(|data| data.search.into_page::<PullRequestRecord>()))
            }
        })
        .await;
        Ok(records.into_iter().filter(|record| !record.url.is_empty()).collect())
    }

    async fn pull_requests_reviewed(&self, login: &str, window: &DateWindow) -> Result<Vec<PullRequestRecord>> {
        let window = window.clamped_to_year();
        let gateway = &self.gateway;
        let query = queries::pull_requests_reviewed();
        let query = &query;
        let (from, to) = (window.start_timestamp(), window.end_timestamp());
        let (from, to) = (&from, &to);
        let records = paginate_cursor(|cursor: Option<String>| {
            let variables = json!({ "login": login, "from": from, "to": to, "cursor": cursor });
            async move {
                let data: Option<ReviewData> = gateway.graphql(query, variables).await?;
                Ok(data.and_then(|data| data.user).map(|user| {
                    user.contributions_collection
                        .pull_request_review_contributions
                        .into_page::<PullRequestRecord>()
                }))
            }
        })
        .await;
        Ok(records.into_iter().filter(|record| !record.url.is_empty()).collect())
    }

    async fn org_members(&self, org: &str, role: MemberRole) -> Result<Vec<String>> {
        let extra = [("role".to_string(), role.to_string())];
        Ok(self.rest_list::<Login, String>(&format!("orgs/{}/members", org), &extra).await)
    }
}
