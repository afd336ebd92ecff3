//! Commit attribution.
//!
//! Reconciles the per-repository commit counts of one account. The search index (or the contribution summary in light
//! mode) only sees default branches and never sees forks, so in full mode every fork of the account is also scanned
//! branch by branch. A fork keeps the larger of both counts and is credited to its parent repository.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use derive_more::Constructor;
use log::{debug, info, warn};

use crate::api::{Client, DateWindow, RepoInfo, Result};
use crate::model::FetchMode;

/// Forks with more branches than this only have "own work" branches scanned.
pub const FORK_BRANCH_THRESHOLD: usize = 20;

/// Name patterns telling the account's own branches apart on busy forks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRules {
    pub prefixes: Vec<String>,
    pub contains: Vec<String>,
    pub suffixes: Vec<String>,
    /// Always scanned, whatever the other rules say.
    pub primary: Vec<String>,
}

impl Default for BranchRules {
    fn default() -> Self {
        let strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect();
        BranchRules {
            prefixes: strings(&["feature/", "feat/", "fix/", "bugfix/", "hotfix/", "eng/", "dev/", "wip/", "patch-"]),
            contains: Vec::new(),
            suffixes: strings(&["-wip"]),
            primary: strings(&["main", "master"]),
        }
    }
}

impl BranchRules {
    /// Whether `branch` looks like work of `login`. A branch containing the login always matches.
    pub fn matches(&self, branch: &str, login: &str) -> bool {
        let branch = branch.to_lowercase();
        let login = login.to_lowercase();
        (!login.is_empty() && branch.contains(&login))
            || self.prefixes.iter().any(|p| branch.starts_with(&p.to_lowercase()))
            || self.contains.iter().any(|c| branch.contains(&c.to_lowercase()))
            || self.suffixes.iter().any(|s| branch.ends_with(&s.to_lowercase()))
    }

    pub fn is_primary(&self, branch: &str, default_branch: Option<&str>) -> bool {
        default_branch == Some(branch) || self.primary.iter().any(|p| p == branch)
    }

    /// Branches worth scanning. Small forks are scanned completely.
    pub fn select<'a>(
        &self,
        branches: &'a [String],
        login: &str,
        default_branch: Option<&str>,
        threshold: usize,
    ) -> Vec<&'a str> {
        branches
            .iter()
            .map(String::as_str)
            .filter(|branch| !branch.is_empty())
            .filter(|branch| {
                branches.len() <= threshold || self.is_primary(branch, default_branch) || self.matches(branch, login)
            })
            .collect()
    }
}

/// Decides which repositories never count. Verdicts are memoized per repository for the whole run.
#[derive(Debug, Default)]
pub struct RepoFilter {
    deny_list: Vec<String>,
    verdicts: HashMap<String, bool>,
}

impl RepoFilter {
    pub fn new(deny_list: &[String]) -> Self {
        RepoFilter {
            deny_list: deny_list
                .iter()
                .map(|pattern| pattern.trim().to_lowercase())
                .filter(|pattern| !pattern.is_empty())
                .collect(),
            verdicts: HashMap::new(),
        }
    }

    pub fn should_skip(&mut self, repo: &RepoInfo, login: &str) -> bool {
        // Profile repository: `login/login`.
        if repo.name().eq_ignore_ascii_case(login) {
            return true;
        }
        if let Some(verdict) = self.verdicts.get(&repo.name_with_owner) {
            return *verdict;
        }
        let verdict = self.evaluate(repo);
        if verdict {
            debug!("Excluding repository {}", repo.name_with_owner);
        }
        self.verdicts.insert(repo.name_with_owner.clone(), verdict);
        verdict
    }

    fn evaluate(&self, repo: &RepoInfo) -> bool {
        repo.is_private
            || self.denied(&repo.name_with_owner, repo.description.as_deref())
            || (repo.is_fork
                && repo
                    .parent
                    .as_ref()
                    .map_or(false, |parent| self.denied(&parent.name_with_owner, parent.description.as_deref())))
    }

    fn denied(&self, name: &str, description: Option<&str>) -> bool {
        let name = name.to_lowercase();
        let description = description.unwrap_or_default().to_lowercase();
        self.deny_list
            .iter()
            .any(|pattern| name.contains(pattern) || description.contains(pattern))
    }
}

/// Repository metadata fetched during one run.
#[derive(Debug, Default)]
pub struct RepoInfoCache {
    entries: HashMap<String, RepoInfo>,
}

impl RepoInfoCache {
    pub fn new() -> Self {
        RepoInfoCache::default()
    }

    pub fn insert(&mut self, info: RepoInfo) {
        self.entries.insert(info.name_with_owner.clone(), info);
    }

    pub fn get(&self, name: &str) -> Option<&RepoInfo> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up every name not cached yet with a single batched call. A failed lookup leaves the names uncached.
    pub async fn fetch_missing<CLIENT>(&mut self, client: &CLIENT, names: impl IntoIterator<Item = String>)
    where
        CLIENT: Client + ?Sized,
    {
        let missing: Vec<String> = names
            .into_iter()
            .filter(|name| !self.contains(name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if missing.is_empty() {
            return;
        }
        debug!("Looking up {} repositories", missing.len());
        match client.repo_info(&missing).await {
            Ok(found) => self.entries.extend(found),
            Err(err) => warn!("Failed to look up repository metadata: {}", err),
        }
    }
}

/// Commits seen for one repository by one source.
#[derive(Debug, Clone, Default, PartialEq, Constructor)]
pub struct RepoObservation {
    pub name: String,
    /// Metadata delivered together with the count, if any.
    pub info: Option<RepoInfo>,
    pub commits: u64,
    pub shas: Vec<String>,
}

/// Reconciled commits credited to one repository.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedRepo {
    pub info: RepoInfo,
    /// Commits the default-branch index attributed to this repository.
    pub default_branch_commits: u64,
    pub commits: u64,
    /// sha -> repository the commit was seen in.
    pub shas: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub repos: BTreeMap<String, ResolvedRepo>,
    pub excluded: BTreeSet<String>,
}

impl Resolution {
    pub fn default_branch_commits(&self) -> u64 {
        self.repos.values().map(|repo| repo.default_branch_commits).sum()
    }

    pub fn commits(&self) -> u64 {
        self.repos.values().map(|repo| repo.commits).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverSettings {
    pub deny_list: Vec<String>,
    pub branch_rules: BranchRules,
    pub fork_branch_threshold: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        ResolverSettings {
            deny_list: Vec::new(),
            branch_rules: BranchRules::default(),
            fork_branch_threshold: FORK_BRANCH_THRESHOLD,
        }
    }
}

pub struct CommitResolver<CLIENT>
where
    CLIENT: Client,
{
    client: Arc<CLIENT>,
    branch_rules: BranchRules,
    fork_branch_threshold: usize,
    cache: RepoInfoCache,
    filter: RepoFilter,
}

impl<CLIENT> CommitResolver<CLIENT>
where
    CLIENT: 'static + Client,
{
    pub fn new(client: Arc<CLIENT>, settings: ResolverSettings) -> Self {
        CommitResolver {
            client,
            filter: RepoFilter::new(&settings.deny_list),
            branch_rules: settings.branch_rules,
            fork_branch_threshold: settings.fork_branch_threshold,
            cache: RepoInfoCache::new(),
        }
    }

    pub fn with_cache(mut self, cache: RepoInfoCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> &RepoInfoCache {
        &self.cache
    }

    /// Exclusion verdict for a repository known only by name, using cached metadata when there is some.
    pub fn is_excluded(&mut self, fallback: &RepoInfo, login: &str) -> bool {
        let info = self.cache.get(&fallback.name_with_owner).cloned();
        self.filter.should_skip(info.as_ref().unwrap_or(fallback), login)
    }

    pub async fn resolve(
        &mut self,
        login: &str,
        window: &DateWindow,
        observations: Vec<RepoObservation>,
        mode: FetchMode,
    ) -> Resolution {
        let mut observations: BTreeMap<String, RepoObservation> = observations
            .into_iter()
            .fold(BTreeMap::new(), |mut merged, observation| {
                let entry = merged
                    .entry(observation.name.clone())
                    .or_insert_with(|| RepoObservation::new(observation.name.clone(), None, 0, Vec::new()));
                entry.commits += observation.commits;
                entry.shas.extend(observation.shas);
                if entry.info.is_none() {
                    entry.info = observation.info;
                }
                merged
            });
        for info in observations.values().filter_map(|o| o.info.clone()) {
            self.cache.insert(info);
        }

        if mode == FetchMode::Full {
            for fork in self.active_forks(login, window).await {
                observations
                    .entry(fork.name_with_owner.clone())
                    .or_insert_with(|| RepoObservation::new(fork.name_with_owner.clone(), None, 0, Vec::new()));
                self.cache.insert(fork);
            }
        }

        let client = self.client.clone();
        self.cache.fetch_missing(client.as_ref(), observations.keys().cloned()).await;

        let mut resolution = Resolution::default();
        let mut credited: Vec<(RepoInfo, RepoObservation, u64, BTreeSet<String>)> = Vec::new();
        for (name, observation) in observations {
            let info = self.cache.get(&name).cloned().unwrap_or_else(|| RepoInfo::named(&name));
            if self.filter.should_skip(&info, login) {
                resolution.excluded.insert(name);
                continue;
            }
            let (commits, scanned) = if info.is_fork && mode == FetchMode::Full {
                let scanned = self.scan_fork(login, &info, window).await;
                // The scan sees branches the index misses but never lowers what the index confirmed.
                (std::cmp::max(observation.commits, scanned.len() as u64), scanned)
            } else {
                (observation.commits, BTreeSet::new())
            };
            credited.push((info, observation, commits, scanned));
        }

        let targets: Vec<String> = credited.iter().map(|(info, ..)| info.attributed_name().to_string()).collect();
        self.cache.fetch_missing(client.as_ref(), targets).await;

        for (info, observation, commits, scanned) in credited {
            let target = info.attributed_name().to_string();
            if target != info.name_with_owner {
                debug!("Crediting {} commits on {} to {}", commits, info.name_with_owner, target);
            }
            let target_info = self.target_info(&info);
            let resolved = resolution.repos.entry(target).or_insert_with(|| ResolvedRepo {
                info: target_info,
                ..ResolvedRepo::default()
            });
            resolved.default_branch_commits += observation.commits;
            resolved.commits += commits;
            for sha in observation.shas.into_iter().chain(scanned) {
                resolved.shas.entry(sha).or_insert_with(|| info.name_with_owner.clone());
            }
        }
        info!(
            "Resolved {} commits of {} across {} repositories ({} excluded)",
            resolution.commits(),
            login,
            resolution.repos.len(),
            resolution.excluded.len()
        );
        resolution
    }

    /// Metadata of the repository credited for `info`: the parent when it is known, otherwise what the fork says.
    fn target_info(&self, info: &RepoInfo) -> RepoInfo {
        let target = info.attributed_name();
        if target == info.name_with_owner {
            return info.clone();
        }
        self.cache.get(target).cloned().unwrap_or_else(|| RepoInfo {
            name_with_owner: target.to_string(),
            description: info.parent.as_ref().and_then(|parent| parent.description.clone()),
            language: info.language.clone(),
            ..RepoInfo::default()
        })
    }

    async fn active_forks(&self, login: &str, window: &DateWindow) -> Vec<RepoInfo> {
        let forks = match self.client.user_forks(login).await {
            Ok(forks) => forks,
            Err(err) => {
                warn!("Failed to list forks of {}: {}", login, err);
                return Vec::new();
            }
        };
        let start = window.start();
        forks
            .into_iter()
            .filter(|fork| fork.pushed_at.map_or(true, |pushed_at| pushed_at >= start))
            .collect()
    }

    /// Unique shas of `login` on the fork's own branches. Failures give an empty scan.
    async fn scan_fork(&self, login: &str, fork: &RepoInfo, window: &DateWindow) -> BTreeSet<String> {
        let repo = &fork.name_with_owner;
        let branches = match self.client.branches(repo).await {
            Ok(branches) => branches,
            Err(err) => {
                warn!("Failed to list branches of {}: {}", repo, err);
                return BTreeSet::new();
            }
        };
        let selected = self.branch_rules.select(
            &branches,
            login,
            fork.default_branch.as_deref(),
            self.fork_branch_threshold,
        );
        debug!("Scanning {} of {} branches of {}", selected.len(), branches.len(), repo);

        let mut shas = BTreeSet::new();
        for branch in selected {
            if self.client.context().rate_limit_hit() {
                warn!("Rate limit hit, branch scan of {} is partial", repo);
                break;
            }
            match self.client.branch_commits(repo, branch, login, window).await {
                Ok(found) => shas.extend(found),
                Err(err) => warn!("Failed to list commits of {} on {}: {}", branch, repo, err),
            }
        }
        shas
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ParentRepo;
    use crate::testing::{fork, repo, window, StubClient};

    fn resolver(client: StubClient) -> CommitResolver<StubClient> {
        CommitResolver::new(Arc::new(client), ResolverSettings::default())
    }

    #[test]
    fn branch_rules_match_own_work() {
        let rules = BranchRules::default();
        assert!(rules.matches("eng/my-feature", "alice"));
        assert!(rules.matches("fix/bug-123", "alice"));
        assert!(rules.matches("Alice-experiment", "alice"));
        assert!(!rules.matches("develop", "alice"));
        assert!(!rules.matches("release-v3", "alice"));
    }

    #[test]
    fn busy_fork_keeps_primary_and_own_branches() {
        let rules = BranchRules::default();
        let mut branches = vec!["main".to_string(), "fix/typo".to_string(), "trunk".to_string()];
        branches.extend((0..25).map(|i| format!("release-v{}", i)));
        let selected = rules.select(&branches, "alice", Some("trunk"), FORK_BRANCH_THRESHOLD);
        assert_eq!(selected, vec!["main", "fix/typo", "trunk"]);
    }

    #[test]
    fn small_fork_scans_every_branch() {
        let rules = BranchRules::default();
        let branches = vec!["main".to_string(), "custom-branch".to_string(), String::new()];
        assert_eq!(rules.select(&branches, "alice", None, FORK_BRANCH_THRESHOLD), vec!["main", "custom-branch"]);
    }

    #[test]
    fn filter_excludes_private_profile_and_denied() {
        let mut filter = RepoFilter::new(&["chromium".to_string()]);
        let mut private = repo("alice/secret");
        private.is_private = true;
        assert!(filter.should_skip(&private, "alice"));
        assert!(filter.should_skip(&repo("octocat/octocat"), "octocat"));
        assert!(filter.should_skip(&repo("someone/chromium-mirror"), "alice"));

        let mut described = repo("alice/browser");
        described.description = Some("Unofficial Chromium clone".to_string());
        assert!(filter.should_skip(&described, "alice"));

        let mut fork_of_denied = fork("alice/src", "mirrors/src");
        fork_of_denied.parent = Some(ParentRepo {
            name_with_owner: "mirrors/src".to_string(),
            description: Some("chromium source".to_string()),
        });
        assert!(filter.should_skip(&fork_of_denied, "alice"));
        assert!(!filter.should_skip(&repo("w3c/csswg-drafts"), "alice"));
    }

    #[test]
    fn filter_verdict_memoized_by_name() {
        let mut filter = RepoFilter::new(&[]);
        let mut private = repo("org/repo");
        private.is_private = true;
        assert!(filter.should_skip(&private, "alice"));
        // Same name seen later without metadata keeps the first verdict.
        assert!(filter.should_skip(&repo("org/repo"), "bob"));
    }

    #[tokio::test]
    async fn cache_fetches_only_missing() {
        let mut client = StubClient::default();
        client.repos.insert("org/repo2".to_string(), repo("org/repo2"));
        let mut cache = RepoInfoCache::new();
        cache.insert(repo("org/repo1"));

        cache
            .fetch_missing(&client, vec!["org/repo1".to_string(), "org/repo2".to_string()])
            .await;
        assert!(cache.contains("org/repo2"));
        assert_eq!(client.calls_to("repo_info"), vec!["repo_info org/repo2".to_string()]);

        cache
            .fetch_missing(&client, vec!["org/repo1".to_string(), "org/repo2".to_string()])
            .await;
        assert_eq!(client.calls_to("repo_info").len(), 1);
    }

    #[tokio::test]
    async fn fork_takes_larger_count_and_credits_parent() {
        let mut client = StubClient::default();
        let alice_fork = fork("alice/lib", "upstream/lib");
        client.forks.insert("alice".to_string(), vec![alice_fork.clone()]);
        client.repos.insert("alice/lib".to_string(), alice_fork);
        client.repos.insert("upstream/lib".to_string(), repo("upstream/lib"));
        client.branches.insert("alice/lib".to_string(), vec!["main".to_string(), "eng/feature".to_string()]);
        client.add_branch_commits("alice/lib", "main", &["a1", "a2"]);
        client.add_branch_commits("alice/lib", "eng/feature", &["a2", "a3"]);

        let observations = vec![RepoObservation::new("alice/lib".to_string(), None, 1, vec!["a1".to_string()])];
        let resolution = resolver(client).resolve("alice", &window(), observations, FetchMode::Full).await;

        assert!(!resolution.repos.contains_key("alice/lib"));
        let upstream = &resolution.repos["upstream/lib"];
        assert_eq!(upstream.commits, 3);
        assert_eq!(upstream.default_branch_commits, 1);
        assert_eq!(upstream.shas.len(), 3);
        assert_eq!(upstream.shas["a3"], "alice/lib");
    }

    #[tokio::test]
    async fn index_count_wins_over_smaller_scan() {
        let mut client = StubClient::default();
        let alice_fork = fork("alice/lib", "upstream/lib");
        client.repos.insert("alice/lib".to_string(), alice_fork);
        client.branches.insert("alice/lib".to_string(), vec!["main".to_string()]);
        client.add_branch_commits("alice/lib", "main", &["a1"]);

        let observations = vec![RepoObservation::new("alice/lib".to_string(), None, 5, Vec::new())];
        let resolution = resolver(client).resolve("alice", &window(), observations, FetchMode::Full).await;
        assert_eq!(resolution.repos["upstream/lib"].commits, 5);
    }

    #[tokio::test]
    async fn failed_branch_listing_keeps_index_count() {
        let mut client = StubClient::default();
        client.repos.insert("alice/lib".to_string(), fork("alice/lib", "upstream/lib"));
        // No branches registered: listing fails.
        let observations = vec![RepoObservation::new("alice/lib".to_string(), None, 2, Vec::new())];
        let resolution = resolver(client).resolve("alice", &window(), observations, FetchMode::Full).await;
        assert_eq!(resolution.repos["upstream/lib"].commits, 2);
    }

    #[tokio::test]
    async fn light_mode_attributes_without_scanning() {
        let client = StubClient::default();
        let observations = vec![
            RepoObservation::new("upstream/lib".to_string(), Some(repo("upstream/lib")), 15, Vec::new()),
            RepoObservation::new("testuser/lib".to_string(), Some(fork("testuser/lib", "upstream/lib")), 10, Vec::new()),
            RepoObservation::new("testuser/myapp".to_string(), Some(repo("testuser/myapp")), 15, Vec::new()),
        ];
        let client = Arc::new(client);
        let mut resolver = CommitResolver::new(client.clone(), ResolverSettings::default());
        let resolution = resolver.resolve("testuser", &window(), observations, FetchMode::Light).await;

        assert_eq!(resolution.repos["upstream/lib"].commits, 25);
        assert_eq!(resolution.repos["testuser/myapp"].commits, 15);
        assert!(!resolution.repos.contains_key("testuser/lib"));
        assert!(client.calls_to("branches").is_empty());
        assert!(client.calls_to("user_forks").is_empty());
    }

    #[tokio::test]
    async fn excluded_repositories_contribute_nothing() {
        let client = StubClient::default();
        let mut private = repo("alice/secret");
        private.is_private = true;
        let observations = vec![
            RepoObservation::new("alice/secret".to_string(), Some(private), 40, Vec::new()),
            RepoObservation::new("alice/alice".to_string(), Some(repo("alice/alice")), 12, Vec::new()),
            RepoObservation::new("org/repo".to_string(), Some(repo("org/repo")), 3, Vec::new()),
        ];
        let resolution = resolver(client).resolve("alice", &window(), observations, FetchMode::Light).await;
        assert_eq!(resolution.commits(), 3);
        assert_eq!(resolution.default_branch_commits(), 3);
        assert_eq!(
            resolution.excluded.into_iter().collect::<Vec<_>>(),
            vec!["alice/alice".to_string(), "alice/secret".to_string()]
        );
    }

    #[tokio::test]
    async fn stale_forks_not_scanned() {
        let mut client = StubClient::default();
        let mut stale = fork("alice/old", "upstream/old");
        stale.pushed_at = Some(window().start() - chrono::Duration::days(30));
        client.forks.insert("alice".to_string(), vec![stale]);
        let resolution = resolver(client).resolve("alice", &window(), Vec::new(), FetchMode::Full).await;
        assert!(resolution.repos.is_empty());
    }
}
