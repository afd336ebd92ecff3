use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::context::FetchContext;
use crate::model::{LineStats, PullRequestState};

/// Longest window the contributions collection accepts.
pub const MAX_WINDOW_DAYS: i64 = 365;

#[derive(Error, Debug)]
pub enum Error {
    #[error("API rate limit exceeded")]
    RateLimitExceeded,
    /// Retryable upstream condition. Never leaves the gateway retry loop.
    #[error("Transient request failure: {0}")]
    Transient(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Inclusive range of calendar days (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl DateWindow {
    pub fn new(since: NaiveDate, until: NaiveDate) -> Result<Self> {
        if since > until {
            return Err(Error::Configuration(format!(
                "window start {} is after window end {}",
                since, until
            )));
        }
        Ok(DateWindow { since, until })
    }

    /// Window of `days` days that ends on `until`.
    pub fn ending_on(until: NaiveDate, days: u32) -> Result<Self> {
        if days == 0 {
            return Err(Error::Configuration("window must span at least one day".to_string()));
        }
        DateWindow::new(until - ChronoDuration::days(i64::from(days) - 1), until)
    }

    pub fn days(&self) -> u32 {
        ((self.until - self.since).num_days() + 1) as u32
    }

    /// Keeps the most recent year of the window.
    pub fn clamped_to_year(&self) -> DateWindow {
        let earliest = self.until - ChronoDuration::days(MAX_WINDOW_DAYS - 1);
        DateWindow {
            since: std::cmp::max(self.since, earliest),
            until: self.until,
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.since.and_time(NaiveTime::MIN))
    }

    pub fn end(&self) -> DateTime<Utc> {
        let next_day = self.until + ChronoDuration::days(1);
        Utc.from_utc_datetime(&next_day.and_time(NaiveTime::MIN)) - ChronoDuration::seconds(1)
    }

    pub fn start_timestamp(&self) -> String {
        self.start().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn end_timestamp(&self) -> String {
        self.end().to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    pub fn contains(&self, instant: &DateTime<Utc>) -> bool {
        *instant >= self.start() && *instant <= self.end()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParentRepo {
    pub name_with_owner: String,
    pub description: Option<String>,
}

/// Repository descriptor as returned by the metadata lookups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub name_with_owner: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub is_fork: bool,
    pub is_private: bool,
    pub parent: Option<ParentRepo>,
    pub default_branch: Option<String>,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl RepoInfo {
    /// Descriptor with nothing but a name, used when metadata is unavailable.
    pub fn named(name_with_owner: impl Into<String>) -> Self {
        RepoInfo {
            name_with_owner: name_with_owner.into(),
            ..RepoInfo::default()
        }
    }

    /// Repository name without the owner.
    pub fn name(&self) -> &str {
        self.name_with_owner
            .split_once('/')
            .map(|(_, name)| name)
            .unwrap_or(&self.name_with_owner)
    }

    /// Attribution target: the parent for forks, the repository itself otherwise.
    pub fn attributed_name(&self) -> &str {
        match (&self.parent, self.is_fork) {
            (Some(parent), true) => &parent.name_with_owner,
            _ => &self.name_with_owner,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct RepoCommitCount {
    pub repo: RepoInfo,
    pub commits: u64,
}

/// Per-account counters plus default-branch commits by repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContributionSummary {
    pub login: String,
    pub real_name: Option<String>,
    pub company: Option<String>,
    pub total_commits: u64,
    pub restricted_commits: u64,
    pub total_pull_requests: u64,
    pub total_issues: u64,
    pub total_reviews: u64,
    pub repositories: Vec<RepoCommitCount>,
}

/// Cheap activity probe result for one account.
#[derive(Debug, Clone, Default, PartialEq, Constructor)]
pub struct ContributionTotals {
    pub login: String,
    pub commits: u64,
    pub pull_requests: u64,
    pub reviews: u64,
    pub issues: u64,
}

impl ContributionTotals {
    pub fn is_active(&self) -> bool {
        self.commits + self.pull_requests + self.reviews + self.issues > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitRecord {
    pub sha: String,
    pub repository: String,
    pub message: String,
    pub authored_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitSearch {
    /// Matches reported by the index. `items` stops at the pagination cap.
    pub total_count: u64,
    pub items: Vec<CommitRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PullRequestRecord {
    pub url: String,
    pub title: String,
    pub state: PullRequestState,
    pub additions: u64,
    pub deletions: u64,
    pub repository: String,
    pub repository_is_private: bool,
    pub language: Option<String>,
    pub author: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Constructor)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
    pub reset: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum MemberRole {
    All,
    Admin,
}

/// Remote data source the pipeline reads from.
///
/// Methods returning `Option` yield `None` when the gateway gave up on the call (retries exhausted or rate limit hit
/// without raising); list methods degrade to empty lists the same way.
#[async_trait]
pub trait Client: Send + Sync {
    /// Run-wide fetch state shared with the caller.
    fn context(&self) -> &FetchContext;

    async fn rate_limit_status(&self) -> Result<Option<RateLimitStatus>>;

    /// Sleeps until the quota resets if that happens within `max_wait`. Returns `false` when the wait would be longer.
    async fn wait_for_rate_limit_reset(&self, max_wait: Duration) -> bool;

    async fn contribution_summary(&self, login: &str, window: &DateWindow) -> Result<Option<ContributionSummary>>;

    /// Activity probe for a small batch of accounts, one call per batch.
    async fn contribution_totals(&self, logins: &[String], window: &DateWindow) -> Result<Vec<ContributionTotals>>;

    async fn search_commits(&self, login: &str, window: &DateWindow) -> Result<CommitSearch>;

    async fn user_forks(&self, login: &str) -> Result<Vec<RepoInfo>>;

    async fn branches(&self, repo: &str) -> Result<Vec<String>>;

    /// Commit shas authored by `login` reachable from `branch` within the window.
    async fn branch_commits(&self, repo: &str, branch: &str, login: &str, window: &DateWindow) -> Result<Vec<String>>;

    /// Batched metadata lookup keyed by full repository name. Unknown repositories are absent from the map.
    async fn repo_info(&self, repos: &[String]) -> Result<HashMap<String, RepoInfo>>;

    async fn commit_line_stats(&self, repo: &str, sha: &str) -> Result<Option<LineStats>>;

    async fn pull_requests_created(&self, login: &str, window: &DateWindow) -> Result<Vec<PullRequestRecord>>;

    async fn pull_requests_reviewed(&self, login: &str, window: &DateWindow) -> Result<Vec<PullRequestRecord>>;

    async fn org_members(&self, org: &str, role: MemberRole) -> Result<Vec<String>>;
}
