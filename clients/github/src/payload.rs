use chrono::{DateTime, Utc};
use serde::Deserialize;

use chronicle::api::{
    CommitRecord, ContributionSummary, ContributionTotals, ParentRepo, PullRequestRecord, RepoCommitCount, RepoInfo,
};
use chronicle::model::{LineStats, PullRequestState};
use chronicle::pagination::CursorPage;

#[derive(Deserialize, Debug)]
pub struct GraphqlResponse<T> {
    pub data: Option<T>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct GraphqlError {
    #[serde(default)]
    pub message: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Connection<T> {
    #[serde(rename = "pageInfo")]
    pub page_info: PageInfo,
    #[serde(default)]
    pub nodes: Vec<T>,
}

impl<T> Connection<T> {
    pub fn into_page<U: From<T>>(self) -> CursorPage<U> {
        CursorPage::new(
            self.nodes.into_iter().map(U::from).collect(),
            self.page_info.end_cursor,
            self.page_info.has_next_page,
        )
    }
}

#[derive(Deserialize, Debug)]
pub struct Language {
    pub name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ParentNode {
    pub name_with_owner: String,
    pub description: Option<String>,
}

#[derive(Deserialize, Debug)]
pub struct BranchRef {
    pub name: String,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryNode {
    pub name_with_owner: String,
    pub description: Option<String>,
    pub primary_language: Option<Language>,
    #[serde(default)]
    pub is_fork: bool,
    #[serde(default)]
    pub is_private: bool,
    pub parent: Option<ParentNode>,
    pub default_branch_ref: Option<BranchRef>,
    pub pushed_at: Option<DateTime<Utc>>,
}

impl From<RepositoryNode> for RepoInfo {
    fn from(node: RepositoryNode) -> Self {
        RepoInfo {
            name_with_owner: node.name_with_owner,
            description: node.description,
            language: node.primary_language.map(|language| language.name),
            is_fork: node.is_fork,
            is_private: node.is_private,
            parent: node.parent.map(|parent| ParentRepo {
                name_with_owner: parent.name_with_owner,
                description: parent.description,
            }),
            default_branch: node.default_branch_ref.map(|branch| branch.name),
            pushed_at: node.pushed_at,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TotalCount {
    pub total_count: u64,
}

#[derive(Deserialize, Debug)]
pub struct RepositoryContributions {
    pub repository: RepositoryNode,
    pub contributions: TotalCount,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SummaryCollection {
    #[serde(default)]
    pub total_commit_contributions: u64,
    #[serde(default)]
    pub restricted_contributions_count: u64,
    #[serde(default)]
    pub total_pull_request_contributions: u64,
    #[serde(default)]
    pub total_issue_contributions: u64,
    #[serde(default)]
    pub total_pull_request_review_contributions: u64,
    #[serde(default)]
    pub commit_contributions_by_repository: Vec<RepositoryContributions>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SummaryUser {
    pub login: String,
    pub name: Option<String>,
    pub company: Option<String>,
    pub contributions_collection: SummaryCollection,
}

#[derive(Deserialize, Debug)]
pub struct SummaryData {
    pub user: Option<SummaryUser>,
}

impl From<SummaryUser> for ContributionSummary {
    fn from(user: SummaryUser) -> Self {
        let collection = user.contributions_collection;
        ContributionSummary {
            login: user.login,
            real_name: user.name,
            company: user.company,
            total_commits: collection.total_commit_contributions,
            restricted_commits: collection.restricted_contributions_count,
            total_pull_requests: collection.total_pull_request_contributions,
            total_issues: collection.total_issue_contributions,
            total_reviews: collection.total_pull_request_review_contributions,
            repositories: collection
                .commit_contributions_by_repository
                .into_iter()
                .map(|entry| RepoCommitCount::new(entry.repository.into(), entry.contributions.total_count))
                .collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TotalsCollection {
    #[serde(default)]
    pub total_commit_contributions: u64,
    #[serde(default)]
    pub total_pull_request_contributions: u64,
    #[serde(default)]
    pub total_pull_request_review_contributions: u64,
    #[serde(default)]
    pub total_issue_contributions: u64,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TotalsUser {
    pub login: String,
    pub contributions_collection: TotalsCollection,
}

impl From<TotalsUser> for ContributionTotals {
    fn from(user: TotalsUser) -> Self {
        let collection = user.contributions_collection;
        ContributionTotals::new(
            user.login,
            collection.total_commit_contributions,
            collection.total_pull_request_contributions,
            collection.total_pull_request_review_contributions,
            collection.total_issue_contributions,
        )
    }
}

#[derive(Deserialize, Debug)]
pub struct ForksUser {
    pub repositories: Connection<RepositoryNode>,
}

#[derive(Deserialize, Debug)]
pub struct ForksData {
    pub user: Option<ForksUser>,
}

#[derive(Deserialize, Debug)]
pub struct Actor {
    pub login: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PullRequestRepository {
    pub name_with_owner: String,
    pub is_private: bool,
    pub primary_language: Option<Language>,
}

/// Search results may contain issues, which come back as empty objects.
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
pub struct PullRequestNode {
    pub url: String,
    pub title: String,
    pub state: PullRequestState,
    pub additions: u64,
    pub deletions: u64,
    pub author: Option<Actor>,
    pub repository: PullRequestRepository,
}

impl From<PullRequestNode> for PullRequestRecord {
    fn from(node: PullRequestNode) -> Self {
        PullRequestRecord {
            url: node.url,
            title: node.title,
            state: node.state,
            additions: node.additions,
            deletions: node.deletions,
            repository: node.repository.name_with_owner,
            repository_is_private: node.repository.is_private,
            language: node.repository.primary_language.map(|language| language.name),
            author: node.author.map(|author| author.login),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct PullRequestSearchData {
    pub search: Connection<PullRequestNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReviewNode {
    pub pull_request: PullRequestNode,
}

impl From<ReviewNode> for PullRequestRecord {
    fn from(review: ReviewNode) -> Self {
        review.pull_request.into()
    }
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCollection {
    pub pull_request_review_contributions: Connection<ReviewNode>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReviewUser {
    pub contributions_collection: ReviewCollection,
}

#[derive(Deserialize, Debug)]
pub struct ReviewData {
    pub user: Option<ReviewUser>,
}

#[derive(Deserialize, Debug)]
pub struct CommitSearchBody {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<CommitItem>,
}

#[derive(Deserialize, Debug)]
pub struct CommitItem {
    pub sha: String,
    pub repository: RestRepository,
    pub commit: CommitDetail,
}

#[derive(Deserialize, Debug)]
pub struct RestRepository {
    pub full_name: String,
}

#[derive(Deserialize, Debug)]
pub struct CommitDetail {
    #[serde(default)]
    pub message: String,
    pub author: Option<CommitAuthor>,
}

#[derive(Deserialize, Debug)]
pub struct CommitAuthor {
    pub date: Option<DateTime<Utc>>,
}

impl From<CommitItem> for CommitRecord {
    fn from(item: CommitItem) -> Self {
        CommitRecord {
            sha: item.sha,
            repository: item.repository.full_name,
            message: item.commit.message,
            authored_at: item.commit.author.and_then(|author| author.date),
        }
    }
}

#[derive(Deserialize, Debug)]
pub struct Named {
    pub name: String,
}

#[derive(Deserialize, Debug)]
pub struct Sha {
    pub sha: String,
}

#[derive(Deserialize, Debug)]
pub struct Login {
    pub login: String,
}

#[derive(Deserialize, Debug)]
pub struct CommitStatsBody {
    pub stats: Option<StatsBody>,
}

#[derive(Deserialize, Debug)]
pub struct StatsBody {
    #[serde(default)]
    pub additions: u64,
    #[serde(default)]
    pub deletions: u64,
}

impl From<StatsBody> for LineStats {
    fn from(stats: StatsBody) -> Self {
        LineStats::new(stats.additions, stats.deletions)
    }
}

#[derive(Deserialize, Debug)]
pub struct RateLimitBody {
    pub resources: RateLimitResources,
}

#[derive(Deserialize, Debug)]
pub struct RateLimitResources {
    pub core: RateLimitResource,
    pub graphql: Option<RateLimitResource>,
}

#[derive(Deserialize, Debug, Clone, Copy)]
pub struct RateLimitResource {
    pub limit: u32,
    pub remaining: u32,
    pub reset: i64,
}

#[test]
fn repository_node_into_repo_info() {
    let node: RepositoryNode = serde_json::from_value(serde_json::json!({
        "nameWithOwner": "testuser/lib",
        "isFork": true,
        "parent": {"nameWithOwner": "upstream/lib"},
        "isPrivate": false,
        "primaryLanguage": {"name": "Python"},
        "description": "Fork of lib",
        "defaultBranchRef": null
    }))
    .unwrap();
    let info = RepoInfo::from(node);
    assert_eq!(info.attributed_name(), "upstream/lib");
    assert_eq!(info.language.as_deref(), Some("Python"));
    assert_eq!(info.default_branch, None);
    assert_eq!(info.pushed_at, None);
}

#[test]
fn issue_in_pull_request_search_is_empty_node() {
    let data: PullRequestSearchData = serde_json::from_value(serde_json::json!({
        "search": {
            "pageInfo": {"hasNextPage": false, "endCursor": null},
            "nodes": [
                {},
                {
                    "url": "https://github.com/o/r/pull/1",
                    "title": "Fix bug",
                    "state": "MERGED",
                    "additions": 10,
                    "deletions": 5,
                    "author": {"login": "bob"},
                    "repository": {"nameWithOwner": "o/r", "isPrivate": false, "primaryLanguage": null}
                }
            ]
        }
    }))
    .unwrap();
    let page: CursorPage<PullRequestRecord> = data.search.into_page();
    assert_eq!(page.items.len(), 2);
    assert!(page.items[0].url.is_empty());
    assert_eq!(page.items[1].state, PullRequestState::Merged);
    assert_eq!(page.items[1].author.as_deref(), Some("bob"));
    assert!(!page.has_next_page);
}
