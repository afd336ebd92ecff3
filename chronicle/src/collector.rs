use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::aggregate::sort_by_commits;
use crate::api::{Client, CommitRecord, DateWindow, Error, PullRequestRecord, RepoInfo, Result};
use crate::attribution::{
    BranchRules, CommitResolver, RepoInfoCache, RepoObservation, Resolution, ResolverSettings, FORK_BRANCH_THRESHOLD,
};
use crate::model::{AccountActivity, FetchMode, LineStats, PullRequestFact, RepoContribution};

/// Category every repository lands in when nothing better is known.
pub const DEFAULT_CATEGORY: &str = "Other";

const TEST_KEYWORDS: [&str; 3] = ["test", "coverage", "e2e"];

/// Files repositories under report categories.
pub trait Categorize: Send + Sync {
    /// `None` leaves the repository out of the category listing.
    fn category(&self, repo: &RepoInfo) -> Option<String>;
}

pub struct Uncategorized;

impl Categorize for Uncategorized {
    fn category(&self, _repo: &RepoInfo) -> Option<String> {
        Some(DEFAULT_CATEGORY.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub mode: FetchMode,
    /// Case-insensitive substrings of repository names or descriptions that never count.
    pub deny_list: Vec<String>,
    pub branch_rules: BranchRules,
    pub fork_branch_threshold: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        CollectorSettings {
            mode: FetchMode::Light,
            deny_list: Vec::new(),
            branch_rules: BranchRules::default(),
            fork_branch_threshold: FORK_BRANCH_THRESHOLD,
        }
    }
}

/// Commit message mentions tests.
pub fn is_test_related(message: &str) -> bool {
    let message = message.to_lowercase();
    TEST_KEYWORDS.iter().any(|keyword| message.contains(keyword))
}

pub struct ActivityCollector<CLIENT>
where
    CLIENT: Client,
{
    client: Arc<CLIENT>,
    mode: FetchMode,
    resolver: CommitResolver<CLIENT>,
    categorizer: Box<dyn Categorize>,
}

impl<CLIENT> ActivityCollector<CLIENT>
where
    CLIENT: 'static + Client,
{
    pub fn new(client: CLIENT, settings: CollectorSettings) -> Self {
        Self::from_shared(Arc::new(client), settings)
    }

    pub fn from_shared(client: Arc<CLIENT>, settings: CollectorSettings) -> Self {
        let resolver = CommitResolver::new(
            client.clone(),
            ResolverSettings {
                deny_list: settings.deny_list,
                branch_rules: settings.branch_rules,
                fork_branch_threshold: settings.fork_branch_threshold,
            },
        );
        ActivityCollector {
            client,
            mode: settings.mode,
            resolver,
            categorizer: Box::new(Uncategorized),
        }
    }

    pub fn with_categorizer(mut self, categorizer: impl Categorize + 'static) -> Self {
        self.categorizer = Box::new(categorizer);
        self
    }

    pub fn with_repo_cache(mut self, cache: RepoInfoCache) -> Self {
        self.resolver = self.resolver.with_cache(cache);
        self
    }

    pub fn client(&self) -> &Arc<CLIENT> {
        &self.client
    }

    pub fn mode(&self) -> FetchMode {
        self.mode
    }

    /// Collects the activity of `login`. A missing contribution summary gives an empty record, a failed commit
    /// search or pull request listing counts as empty. Quota exhaustion always propagates.
    pub async fn collect(&mut self, login: &str, window: &DateWindow) -> Result<AccountActivity> {
        info!(
            "Collecting {} activity of {} from {} to {}",
            self.mode, login, window.since, window.until
        );
        let summary = match self.client.contribution_summary(login, window).await? {
            Some(summary) => summary,
            None => {
                warn!("No contribution summary for {}", login);
                return Ok(AccountActivity::empty(login, self.mode));
            }
        };

        let mut activity = AccountActivity::empty(login, self.mode);
        activity.real_name = summary.real_name.filter(|name| !name.trim().is_empty());
        activity.company = summary.company.filter(|company| !company.trim().is_empty());
        activity.counters.issues_opened = summary.total_issues;

        let summary_counts = summary
            .repositories
            .into_iter()
            .map(|count| {
                RepoObservation::new(count.repo.name_with_owner.clone(), Some(count.repo), count.commits, Vec::new())
            })
            .collect::<Vec<_>>();
        let (observations, searched) = match self.mode {
            FetchMode::Light => (summary_counts, Vec::new()),
            FetchMode::Full => {
                let search = or_empty("commit search", login, self.client.search_commits(login, window).await)?;
                debug!("Commit search found {} of {} commits", search.items.len(), search.total_count);
                (index_observations(summary_counts, &search.items), search.items)
            }
        };
        let resolution = self.resolver.resolve(login, window, observations, self.mode).await;

        let created = or_empty(
            "created pull requests",
            login,
            self.client.pull_requests_created(login, window).await,
        )?;
        let created = self.kept_pull_requests(login, created);
        let reviewed = or_empty(
            "reviewed pull requests",
            login,
            self.client.pull_requests_reviewed(login, window).await,
        )?;
        let reviewed = dedup_by_url(self.kept_pull_requests(login, reviewed));

        activity.counters.test_related_commits = searched
            .iter()
            .filter(|commit| !resolution.excluded.contains(&commit.repository))
            .filter(|commit| is_test_related(&commit.message))
            .count() as u64;
        activity.counters.commits_default_branch = resolution.default_branch_commits();
        activity.counters.commits_all_branches = resolution.commits();
        activity.counters.pull_requests_created = created.len() as u64;
        activity.counters.pull_requests_reviewed = reviewed.len() as u64;

        match self.mode {
            FetchMode::Light => {
                for pr in &created {
                    *activity.repo_line_stats.entry(pr.repository.clone()).or_default() +=
                        LineStats::new(pr.additions, pr.deletions);
                }
            }
            FetchMode::Full => activity.repo_line_stats = self.line_stats(&resolution).await,
        }
        let totals = activity
            .repo_line_stats
            .values()
            .fold(LineStats::default(), |mut totals, stats| {
                totals += *stats;
                totals
            });
        activity.counters.lines_added = totals.additions;
        activity.counters.lines_deleted = totals.deletions;

        self.categorize(&mut activity, &resolution, &created);
        activity.pull_requests_created = created;
        activity.pull_requests_reviewed = reviewed;
        info!(
            "{}: {} commits ({} on default branches), {} pull requests, {} reviews",
            login,
            activity.counters.commits_all_branches,
            activity.counters.commits_default_branch,
            activity.counters.pull_requests_created,
            activity.counters.pull_requests_reviewed
        );
        Ok(activity)
    }

    fn kept_pull_requests(&mut self, login: &str, records: Vec<PullRequestRecord>) -> Vec<PullRequestFact> {
        records
            .into_iter()
            .filter(|record| {
                let repo = RepoInfo {
                    is_private: record.repository_is_private,
                    ..RepoInfo::named(&record.repository)
                };
                !self.resolver.is_excluded(&repo, login)
            })
            .map(PullRequestFact::from)
            .collect()
    }

    /// Per-commit line stats summed by attributed repository. Failed lookups count as zero.
    async fn line_stats(&self, resolution: &Resolution) -> BTreeMap<String, LineStats> {
        let mut stats = BTreeMap::new();
        for (target, resolved) in &resolution.repos {
            let mut repo_stats = LineStats::default();
            for (sha, source) in &resolved.shas {
                if self.client.context().rate_limit_hit() {
                    warn!("Rate limit hit, line stats of {} are partial", target);
                    break;
                }
                match self.client.commit_line_stats(source, sha).await {
                    Ok(Some(commit_stats)) => repo_stats += commit_stats,
                    Ok(None) => debug!("No line stats for {}@{}", source, sha),
                    Err(err) => warn!("Failed to fetch line stats for {}@{}: {}", source, sha, err),
                }
            }
            stats.insert(target.clone(), repo_stats);
        }
        stats
    }

    fn categorize(&self, activity: &mut AccountActivity, resolution: &Resolution, created: &[PullRequestFact]) {
        let mut pull_requests: BTreeMap<&str, u64> = BTreeMap::new();
        let mut pr_languages: BTreeMap<&str, Option<String>> = BTreeMap::new();
        for pr in created {
            *pull_requests.entry(pr.repository.as_str()).or_default() += 1;
            pr_languages
                .entry(pr.repository.as_str())
                .or_insert_with(|| pr.language.clone());
        }

        let mut listed = HashSet::new();
        for (name, resolved) in &resolution.repos {
            activity.repo_language.insert(name.clone(), resolved.info.language.clone());
            let contribution = RepoContribution::new(
                name.clone(),
                resolved.commits,
                pull_requests.get(name.as_str()).copied().unwrap_or_default(),
                resolved.info.language.clone(),
                resolved.info.description.clone(),
            );
            self.file(activity, &resolved.info, contribution);
            listed.insert(name.as_str());
        }
        // Repositories with pull requests but no commits in the window.
        for (name, count) in pull_requests.iter().filter(|(name, _)| !listed.contains(*name)) {
            let info = self
                .resolver
                .cache()
                .get(*name)
                .cloned()
                .unwrap_or_else(|| RepoInfo {
                    language: pr_languages.get(name).cloned().flatten(),
                    ..RepoInfo::named(*name)
                });
            activity.repo_language.insert(name.to_string(), info.language.clone());
            let contribution =
                RepoContribution::new(name.to_string(), 0, *count, info.language.clone(), info.description.clone());
            self.file(activity, &info, contribution);
        }
        for repos in activity.repositories_by_category.values_mut() {
            sort_by_commits(repos);
        }
    }

    fn file(&self, activity: &mut AccountActivity, info: &RepoInfo, contribution: RepoContribution) {
        match self.categorizer.category(info) {
            Some(category) => activity
                .repositories_by_category
                .entry(category)
                .or_default()
                .push(contribution),
            None => debug!("{} not listed in any category", info.name_with_owner),
        }
    }
}

/// Default-branch counts per repository: the larger of the summary and the search index.
fn index_observations(summary: Vec<RepoObservation>, commits: &[CommitRecord]) -> Vec<RepoObservation> {
    let mut searched: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for commit in commits {
        searched
            .entry(commit.repository.as_str())
            .or_default()
            .push(commit.sha.clone());
    }
    let mut observations = Vec::new();
    for mut observation in summary {
        if let Some(shas) = searched.remove(observation.name.as_str()) {
            observation.commits = observation.commits.max(shas.len() as u64);
            observation.shas = shas;
        }
        observations.push(observation);
    }
    observations.extend(
        searched
            .into_iter()
            .map(|(repo, shas)| RepoObservation::new(repo.to_string(), None, shas.len() as u64, shas)),
    );
    observations
}

fn or_empty<T: Default>(what: &str, login: &str, fetched: Result<T>) -> Result<T> {
    match fetched {
        Err(Error::RateLimitExceeded) => Err(Error::RateLimitExceeded),
        Err(err) => {
            warn!("Failed to fetch {} of {}: {}", what, login, err);
            Ok(T::default())
        }
        fetched => fetched,
    }
}

fn dedup_by_url(facts: Vec<PullRequestFact>) -> Vec<PullRequestFact> {
    let mut seen = HashSet::new();
    facts.into_iter().filter(|fact| seen.insert(fact.url.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{commit, fork, pull_request, repo, summary, window, StubClient};

    struct ByLanguage;

    impl Categorize for ByLanguage {
        fn category(&self, repo: &RepoInfo) -> Option<String> {
            match repo.language.as_deref() {
                Some("Bikeshed") => Some("Web standards".to_string()),
                Some(_) => Some("Code".to_string()),
                None => None,
            }
        }
    }

    fn full() -> CollectorSettings {
        CollectorSettings {
            mode: FetchMode::Full,
            ..CollectorSettings::default()
        }
    }

    #[test]
    fn test_keywords_case_insensitive() {
        assert!(is_test_related("Add unit TESTS for parser"));
        assert!(is_test_related("Raise coverage"));
        assert!(!is_test_related("Fix typo in README"));
    }

    #[tokio::test]
    async fn missing_summary_gives_empty_record() {
        let mut collector = ActivityCollector::new(StubClient::default(), CollectorSettings::default());
        let activity = collector.collect("ghost", &window()).await.unwrap();
        assert_eq!(activity, AccountActivity::empty("ghost", FetchMode::Light));
    }

    #[tokio::test]
    async fn failing_summary_propagates() {
        let mut client = StubClient::default();
        client.failing.insert("alice".to_string());
        let mut collector = ActivityCollector::new(client, CollectorSettings::default());
        assert!(collector.collect("alice", &window()).await.is_err());
    }

    #[tokio::test]
    async fn failed_pull_request_fetch_keeps_other_counters() {
        let mut client = StubClient::default();
        let mut summary = summary("alice", vec![(repo("org/app"), 12)]);
        summary.total_issues = 3;
        client.summaries.insert("alice".to_string(), summary);
        client.created.insert(
            "alice".to_string(),
            vec![pull_request("https://github.com/org/app/pull/1", "org/app", 30, 5)],
        );
        client.reviewed.insert(
            "alice".to_string(),
            vec![pull_request("https://github.com/org/app/pull/2", "org/app", 1, 1)],
        );
        client.fail_fetch("pull_requests_reviewed", "alice");

        let mut collector = ActivityCollector::new(client, CollectorSettings::default());
        let activity = collector.collect("alice", &window()).await.unwrap();

        assert_eq!(activity.counters.commits_all_branches, 12);
        assert_eq!(activity.counters.issues_opened, 3);
        assert_eq!(activity.counters.pull_requests_created, 1);
        assert_eq!(activity.counters.lines_added, 30);
        assert_eq!(activity.counters.pull_requests_reviewed, 0);
        assert!(activity.pull_requests_reviewed.is_empty());
    }

    #[tokio::test]
    async fn failed_commit_search_falls_back_to_summary_counts() {
        let mut client = StubClient::default();
        client
            .summaries
            .insert("alice".to_string(), summary("alice", vec![(repo("org/app"), 7)]));
        client.fail_fetch("search_commits", "alice");
        client.fail_fetch("pull_requests_created", "alice");

        let mut collector = ActivityCollector::new(client, full());
        let activity = collector.collect("alice", &window()).await.unwrap();

        assert_eq!(activity.counters.commits_all_branches, 7);
        assert_eq!(activity.counters.test_related_commits, 0);
        assert_eq!(activity.counters.pull_requests_created, 0);
    }

    #[tokio::test]
    async fn light_mode_uses_summary_and_pull_requests() {
        let mut client = StubClient::default();
        let mut lib = repo("upstream/lib");
        lib.language = Some("Rust".to_string());
        let mut secret = repo("testuser/secret");
        secret.is_private = true;
        let mut summary = summary(
            "testuser",
            vec![
                (lib, 15),
                (fork("testuser/lib", "upstream/lib"), 10),
                (repo("testuser/testuser"), 4),
                (secret, 9),
            ],
        );
        summary.real_name = Some("Test User".to_string());
        summary.company = Some("  ".to_string());
        summary.total_issues = 2;
        client.summaries.insert("testuser".to_string(), summary);
        client.created.insert(
            "testuser".to_string(),
            vec![
                pull_request("https://github.com/upstream/lib/pull/1", "upstream/lib", 100, 20),
                pull_request("https://github.com/testuser/testuser/pull/2", "testuser/testuser", 50, 0),
            ],
        );
        let review = pull_request("https://github.com/other/app/pull/9", "other/app", 1, 1);
        client
            .reviewed
            .insert("testuser".to_string(), vec![review.clone(), review]);

        let client = Arc::new(client);
        let mut collector = ActivityCollector::from_shared(client.clone(), CollectorSettings::default());
        let activity = collector.collect("testuser", &window()).await.unwrap();

        assert_eq!(activity.real_name.as_deref(), Some("Test User"));
        assert_eq!(activity.company, None);
        assert_eq!(activity.counters.commits_default_branch, 25);
        assert_eq!(activity.counters.commits_all_branches, 25);
        assert_eq!(activity.counters.issues_opened, 2);
        assert_eq!(activity.counters.pull_requests_created, 1);
        assert_eq!(activity.counters.pull_requests_reviewed, 1);
        assert_eq!(activity.counters.lines_added, 100);
        assert_eq!(activity.counters.lines_deleted, 20);
        assert_eq!(activity.repo_line_stats["upstream/lib"], LineStats::new(100, 20));

        let other = &activity.repositories_by_category[DEFAULT_CATEGORY];
        assert_eq!(other.len(), 1);
        assert_eq!(other[0], RepoContribution::new("upstream/lib".to_string(), 25, 1, Some("Rust".to_string()), None));
        assert_eq!(activity.language_of(&other[0]), Some("Rust"));

        assert!(client.calls_to("search_commits").is_empty());
        assert!(client.calls_to("commit_line_stats").is_empty());
        assert!(client.calls_to("user_forks").is_empty());
    }

    #[tokio::test]
    async fn full_mode_scans_forks_and_sums_line_stats() {
        let mut client = StubClient::default();
        let mut lib = repo("upstream/lib");
        lib.language = Some("Rust".to_string());
        let alice_fork = fork("alice/lib", "upstream/lib");
        client
            .summaries
            .insert("alice".to_string(), summary("alice", vec![(repo("alice/app"), 2)]));
        client.commits.insert(
            "alice".to_string(),
            vec![
                commit("s1", "alice/app", "Add tests for app"),
                commit("s2", "alice/app", "Refactor"),
                commit("s3", "alice/app", "Bump deps"),
            ],
        );
        client.forks.insert("alice".to_string(), vec![alice_fork.clone()]);
        client.repos.insert("upstream/lib".to_string(), lib);
        client.branches.insert("alice/lib".to_string(), vec!["main".to_string(), "fix/leak".to_string()]);
        client.add_branch_commits("alice/lib", "main", &["f1"]);
        client.add_branch_commits("alice/lib", "fix/leak", &["f1", "f2"]);
        client.line_stats.insert("s1".to_string(), LineStats::new(10, 1));
        client.line_stats.insert("s2".to_string(), LineStats::new(5, 5));
        client.line_stats.insert("f2".to_string(), LineStats::new(7, 0));
        // s3 and f1 have no stats and count as zero.

        let client = Arc::new(client);
        let mut collector = ActivityCollector::from_shared(client.clone(), full());
        let activity = collector.collect("alice", &window()).await.unwrap();

        assert_eq!(activity.mode, FetchMode::Full);
        assert_eq!(activity.counters.commits_default_branch, 3);
        assert_eq!(activity.counters.commits_all_branches, 5);
        assert_eq!(activity.counters.test_related_commits, 1);
        assert_eq!(activity.repo_line_stats["alice/app"], LineStats::new(15, 6));
        assert_eq!(activity.repo_line_stats["upstream/lib"], LineStats::new(7, 0));
        assert_eq!(activity.counters.lines_added, 22);
        assert_eq!(activity.counters.lines_deleted, 6);
        assert_eq!(activity.repo_language["upstream/lib"].as_deref(), Some("Rust"));
        assert!(client
            .calls_to("commit_line_stats")
            .contains(&"commit_line_stats alice/lib@f2".to_string()));
    }

    #[tokio::test]
    async fn categorizer_decides_listing() {
        let mut client = StubClient::default();
        let mut spec = repo("w3c/csswg-drafts");
        spec.language = Some("Bikeshed".to_string());
        let mut app = repo("org/app");
        app.language = Some("Go".to_string());
        client.summaries.insert(
            "alice".to_string(),
            summary("alice", vec![(spec, 3), (app, 8), (repo("org/unknown"), 1)]),
        );
        client.created.insert(
            "alice".to_string(),
            vec![pull_request("https://github.com/org/docs/pull/3", "org/docs", 1, 1)],
        );
        let mut collector =
            ActivityCollector::new(client, CollectorSettings::default()).with_categorizer(ByLanguage);
        let activity = collector.collect("alice", &window()).await.unwrap();

        assert_eq!(activity.repositories_by_category["Web standards"][0].name, "w3c/csswg-drafts");
        assert_eq!(activity.repositories_by_category["Code"][0].name, "org/app");
        assert_eq!(activity.repositories_by_category.len(), 2);
        // Unlisted repositories still count.
        assert_eq!(activity.counters.commits_all_branches, 12);
    }

    #[tokio::test]
    async fn pull_request_only_repository_listed() {
        let mut client = StubClient::default();
        client
            .summaries
            .insert("alice".to_string(), summary("alice", vec![(repo("org/app"), 1)]));
        let mut pr = pull_request("https://github.com/org/docs/pull/3", "org/docs", 4, 2);
        pr.language = Some("Markdown".to_string());
        client.created.insert("alice".to_string(), vec![pr]);
        let mut collector = ActivityCollector::new(client, CollectorSettings::default());
        let activity = collector.collect("alice", &window()).await.unwrap();

        let other = &activity.repositories_by_category[DEFAULT_CATEGORY];
        assert_eq!(other.len(), 2);
        assert_eq!(other[0].name, "org/app");
        assert_eq!(other[1], RepoContribution::new("org/docs".to_string(), 0, 1, Some("Markdown".to_string()), None));
    }

    #[tokio::test]
    async fn deny_list_applies_to_pull_requests() {
        let mut client = StubClient::default();
        client.summaries.insert("alice".to_string(), summary("alice", vec![]));
        let mut private = pull_request("https://github.com/org/secret/pull/1", "org/secret", 9, 9);
        private.repository_is_private = true;
        client.created.insert(
            "alice".to_string(),
            vec![
                private,
                pull_request("https://github.com/mirror/chromium/pull/2", "mirror/chromium", 9, 9),
                pull_request("https://github.com/org/app/pull/3", "org/app", 1, 0),
            ],
        );
        let settings = CollectorSettings {
            deny_list: vec!["Chromium".to_string()],
            ..CollectorSettings::default()
        };
        let mut collector = ActivityCollector::new(client, settings);
        let activity = collector.collect("alice", &window()).await.unwrap();
        assert_eq!(activity.counters.pull_requests_created, 1);
        assert_eq!(activity.counters.lines_added, 1);
        assert_eq!(activity.pull_requests_created[0].repository, "org/app");
    }

    #[test]
    fn search_index_never_lowers_summary_count() {
        let summary = vec![
            RepoObservation::new("org/a".to_string(), None, 5, Vec::new()),
            RepoObservation::new("org/b".to_string(), None, 1, Vec::new()),
        ];
        let commits = vec![commit("1", "org/b", ""), commit("2", "org/b", ""), commit("3", "org/c", "")];
        let observations = index_observations(summary, &commits);
        let counts: Vec<_> = observations.iter().map(|o| (o.name.as_str(), o.commits)).collect();
        assert_eq!(counts, vec![("org/a", 5), ("org/b", 2), ("org/c", 1)]);
        assert_eq!(observations[1].shas, vec!["1".to_string(), "2".to_string()]);
    }
}
