use std::collections::BTreeMap;
use std::ops::AddAssign;

use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::api::PullRequestRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum PullRequestState {
    #[default]
    Open,
    Merged,
    Closed,
}

/// Light skips line stats and fork branch scans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FetchMode {
    #[default]
    Light,
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Constructor)]
pub struct LineStats {
    pub additions: u64,
    pub deletions: u64,
}

impl AddAssign for LineStats {
    fn add_assign(&mut self, other: LineStats) {
        self.additions += other.additions;
        self.deletions += other.deletions;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityCounters {
    pub commits_default_branch: u64,
    pub commits_all_branches: u64,
    pub pull_requests_created: u64,
    pub pull_requests_reviewed: u64,
    pub issues_opened: u64,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub test_related_commits: u64,
}

impl AddAssign<&ActivityCounters> for ActivityCounters {
    fn add_assign(&mut self, other: &ActivityCounters) {
        self.commits_default_branch += other.commits_default_branch;
        self.commits_all_branches += other.commits_all_branches;
        self.pull_requests_created += other.pull_requests_created;
        self.pull_requests_reviewed += other.pull_requests_reviewed;
        self.issues_opened += other.issues_opened;
        self.lines_added += other.lines_added;
        self.lines_deleted += other.lines_deleted;
        self.test_related_commits += other.test_related_commits;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Constructor)]
pub struct RepoContribution {
    /// `owner/name`
    pub name: String,
    pub commits: u64,
    pub pull_requests: u64,
    pub language: Option<String>,
    pub description: Option<String>,
}

/// One pull request. `url` identifies it across accounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestFact {
    pub url: String,
    pub title: String,
    pub state: PullRequestState,
    pub additions: u64,
    pub deletions: u64,
    pub repository: String,
    pub author: Option<String>,
    pub language: Option<String>,
}

impl From<PullRequestRecord> for PullRequestFact {
    fn from(record: PullRequestRecord) -> Self {
        PullRequestFact {
            url: record.url,
            title: record.title,
            state: record.state,
            additions: record.additions,
            deletions: record.deletions,
            repository: record.repository,
            author: record.author,
            language: record.language,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountActivity {
    pub login: String,
    pub real_name: Option<String>,
    pub company: Option<String>,
    pub counters: ActivityCounters,
    pub repositories_by_category: BTreeMap<String, Vec<RepoContribution>>,
    pub repo_line_stats: BTreeMap<String, LineStats>,
    pub repo_language: BTreeMap<String, Option<String>>,
    pub pull_requests_created: Vec<PullRequestFact>,
    pub pull_requests_reviewed: Vec<PullRequestFact>,
    pub mode: FetchMode,
}

impl AccountActivity {
    pub fn empty(login: impl Into<String>, mode: FetchMode) -> Self {
        AccountActivity {
            login: login.into(),
            mode,
            ..AccountActivity::default()
        }
    }

    pub fn repositories(&self) -> impl Iterator<Item = &RepoContribution> {
        self.repositories_by_category.values().flatten()
    }

    /// Language of a repository: the contribution's own, else the account-wide lookup.
    pub fn language_of<'a>(&'a self, repo: &'a RepoContribution) -> Option<&'a str> {
        repo.language
            .as_deref()
            .or_else(|| self.repo_language.get(&repo.name).and_then(|l| l.as_deref()))
    }
}

/// Sparse `key -> login -> commits` matrix.
pub type MemberCommits = BTreeMap<String, BTreeMap<String, u64>>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrgActivity {
    pub members: Vec<String>,
    pub counters: ActivityCounters,
    pub repositories_by_category: BTreeMap<String, Vec<RepoContribution>>,
    pub repo_line_stats: BTreeMap<String, LineStats>,
    pub repo_language: BTreeMap<String, Option<String>>,
    pub pull_requests_created: Vec<PullRequestFact>,
    pub pull_requests_reviewed: Vec<PullRequestFact>,
    pub repo_member_commits: MemberCommits,
    pub lang_member_commits: MemberCommits,
    pub member_real_name: BTreeMap<String, String>,
    pub member_company: BTreeMap<String, String>,
    pub light_mode: bool,
}

#[test]
fn pull_request_state_parses_any_case() {
    use std::str::FromStr;
    assert_eq!(PullRequestState::from_str("MERGED").unwrap(), PullRequestState::Merged);
    assert_eq!(PullRequestState::from_str("closed").unwrap(), PullRequestState::Closed);
    assert_eq!(PullRequestState::Open.to_string(), "OPEN");
}

#[test]
fn counters_add() {
    let mut total = ActivityCounters::default();
    let one = ActivityCounters {
        commits_default_branch: 3,
        lines_added: 10,
        ..ActivityCounters::default()
    };
    total += &one;
    total += &one;
    assert_eq!(total.commits_default_branch, 6);
    assert_eq!(total.lines_added, 20);
    assert_eq!(total.issues_opened, 0);
}
