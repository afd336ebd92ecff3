use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};

use crate::api::{
    Client, CommitRecord, CommitSearch, ContributionSummary, ContributionTotals, DateWindow, Error, MemberRole,
    ParentRepo, PullRequestRecord, RateLimitStatus, RepoCommitCount, RepoInfo, Result,
};
use crate::context::FetchContext;
use crate::model::LineStats;

/// In-memory client. Anything not registered is reported as missing or failed.
#[derive(Default)]
pub struct StubClient {
    pub context: FetchContext,
    pub rate_limit: Option<RateLimitStatus>,
    pub summaries: HashMap<String, ContributionSummary>,
    pub totals: HashMap<String, ContributionTotals>,
    pub commits: HashMap<String, Vec<CommitRecord>>,
    pub forks: HashMap<String, Vec<RepoInfo>>,
    pub branches: HashMap<String, Vec<String>>,
    pub branch_commits: HashMap<(String, String), Vec<String>>,
    pub repos: HashMap<String, RepoInfo>,
    pub line_stats: HashMap<String, LineStats>,
    pub created: HashMap<String, Vec<PullRequestRecord>>,
    pub reviewed: HashMap<String, Vec<PullRequestRecord>>,
    pub members: Vec<String>,
    pub admins: Vec<String>,
    /// Summary requests for these logins raise the rate limit flag and yield nothing.
    pub exhausted_on: HashSet<String>,
    /// Summary requests for these logins fail.
    pub failing: HashSet<String>,
    /// Totals batches holding any of these logins fail.
    pub unprobed: HashSet<String>,
    /// `"<method> <login>"` pairs whose per-account fetch fails.
    pub failing_fetches: HashSet<String>,
    pub resets_in_time: bool,
    calls: Mutex<Vec<String>>,
}

impl StubClient {
    pub fn add_branch_commits(&mut self, repo: &str, branch: &str, shas: &[&str]) {
        self.branch_commits.insert(
            (repo.to_string(), branch.to_string()),
            shas.iter().map(|sha| sha.to_string()).collect(),
        );
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.split(' ').next() == Some(method))
            .collect()
    }

    pub fn fail_fetch(&mut self, method: &str, login: &str) {
        self.failing_fetches.insert(format!("{} {}", method, login));
    }

    fn fetch_outcome(&self, method: &str, login: &str) -> Result<()> {
        self.record(method, login);
        if self.failing_fetches.contains(&format!("{} {}", method, login)) {
            return Err(Error::RequestFailed(format!("{} of {}", method, login)));
        }
        Ok(())
    }

    fn record(&self, method: &str, argument: impl AsRef<str>) {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{} {}", method, argument.as_ref()));
    }
}

#[async_trait]
impl Client for StubClient {
    fn context(&self) -> &FetchContext {
        &self.context
    }

    async fn rate_limit_status(&self) -> Result<Option<RateLimitStatus>> {
        self.record("rate_limit_status", "");
        Ok(self.rate_limit.clone())
    }

    async fn wait_for_rate_limit_reset(&self, max_wait: Duration) -> bool {
        self.record("wait_for_rate_limit_reset", max_wait.as_secs().to_string());
        self.resets_in_time
    }

    async fn contribution_summary(&self, login: &str, _window: &DateWindow) -> Result<Option<ContributionSummary>> {
        self.record("contribution_summary", login);
        if self.failing.contains(login) {
            return Err(Error::RequestFailed(format!("summary of {}", login)));
        }
        if self.exhausted_on.contains(login) {
            self.context.mark_rate_limit_hit();
            return Ok(None);
        }
        Ok(self.summaries.get(login).cloned())
    }

    async fn contribution_totals(&self, logins: &[String], _window: &DateWindow) -> Result<Vec<ContributionTotals>> {
        self.record("contribution_totals", logins.join(","));
        if logins.iter().any(|login| self.unprobed.contains(login)) {
            return Err(Error::RequestFailed(format!("totals of {}", logins.join(","))));
        }
        Ok(logins.iter().filter_map(|login| self.totals.get(login).cloned()).collect())
    }

    async fn search_commits(&self, login: &str, _window: &DateWindow) -> Result<CommitSearch> {
        self.fetch_outcome("search_commits", login)?;
        let items = self.commits.get(login).cloned().unwrap_or_default();
        Ok(CommitSearch {
            total_count: items.len() as u64,
            items,
        })
    }

    async fn user_forks(&self, login: &str) -> Result<Vec<RepoInfo>> {
        self.record("user_forks", login);
        Ok(self.forks.get(login).cloned().unwrap_or_default())
    }

    async fn branches(&self, repo: &str) -> Result<Vec<String>> {
        self.record("branches", repo);
        self.branches
            .get(repo)
            .cloned()
            .ok_or_else(|| Error::RequestFailed(format!("no branches for {}", repo)))
    }

    async fn branch_commits(&self, repo: &str, branch: &str, _login: &str, _window: &DateWindow) -> Result<Vec<String>> {
        self.record("branch_commits", format!("{}@{}", repo, branch));
        Ok(self
            .branch_commits
            .get(&(repo.to_string(), branch.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn repo_info(&self, repos: &[String]) -> Result<HashMap<String, RepoInfo>> {
        self.record("repo_info", repos.join(","));
        Ok(repos
            .iter()
            .filter_map(|name| self.repos.get(name).map(|info| (name.clone(), info.clone())))
            .collect())
    }

    async fn commit_line_stats(&self, repo: &str, sha: &str) -> Result<Option<LineStats>> {
        self.record("commit_line_stats", format!("{}@{}", repo, sha));
        Ok(self.line_stats.get(sha).copied())
    }

    async fn pull_requests_created(&self, login: &str, _window: &DateWindow) -> Result<Vec<PullRequestRecord>> {
        self.fetch_outcome("pull_requests_created", login)?;
        Ok(self.created.get(login).cloned().unwrap_or_default())
    }

    async fn pull_requests_reviewed(&self, login: &str, _window: &DateWindow) -> Result<Vec<PullRequestRecord>> {
        self.fetch_outcome("pull_requests_reviewed", login)?;
        Ok(self.reviewed.get(login).cloned().unwrap_or_default())
    }

    async fn org_members(&self, org: &str, role: MemberRole) -> Result<Vec<String>> {
        self.record("org_members", format!("{} {}", org, role));
        Ok(match role {
            MemberRole::All => self.members.clone(),
            MemberRole::Admin => self.admins.clone(),
        })
    }
}

pub fn window() -> DateWindow {
    DateWindow::new(
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2026, 1, 31).unwrap(),
    )
    .unwrap()
}

pub fn repo(name: &str) -> RepoInfo {
    RepoInfo {
        default_branch: Some("main".to_string()),
        pushed_at: Some(Utc.with_ymd_and_hms(2026, 1, 15, 12, 0, 0).unwrap()),
        ..RepoInfo::named(name)
    }
}

pub fn fork(name: &str, parent: &str) -> RepoInfo {
    RepoInfo {
        is_fork: true,
        parent: Some(ParentRepo {
            name_with_owner: parent.to_string(),
            description: None,
        }),
        ..repo(name)
    }
}

pub fn summary(login: &str, repositories: Vec<(RepoInfo, u64)>) -> ContributionSummary {
    ContributionSummary {
        login: login.to_string(),
        total_commits: repositories.iter().map(|(_, commits)| commits).sum(),
        repositories: repositories
            .into_iter()
            .map(|(repo, commits)| RepoCommitCount::new(repo, commits))
            .collect(),
        ..ContributionSummary::default()
    }
}

pub fn pull_request(url: &str, repository: &str, additions: u64, deletions: u64) -> PullRequestRecord {
    PullRequestRecord {
        url: url.to_string(),
        title: format!("Change {}", url),
        additions,
        deletions,
        repository: repository.to_string(),
        ..PullRequestRecord::default()
    }
}

pub fn commit(sha: &str, repository: &str, message: &str) -> CommitRecord {
    CommitRecord {
        sha: sha.to_string(),
        repository: repository.to_string(),
        message: message.to_string(),
        authored_at: None,
    }
}
