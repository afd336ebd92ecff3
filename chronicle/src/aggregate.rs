use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet};

use log::debug;

use crate::model::{AccountActivity, FetchMode, OrgActivity, PullRequestFact, RepoContribution};

/// Merges per-account records into one organization record.
///
/// Pull request lists are deduplicated by URL, first occurrence wins. Counters are plain per-account sums, so a pull
/// request reviewed by two members counts twice in `pull_requests_reviewed` but is listed once.
pub fn aggregate(records: &[AccountActivity]) -> OrgActivity {
    if records.is_empty() {
        return OrgActivity::default();
    }
    let mut org = OrgActivity {
        light_mode: records.iter().all(|record| record.mode == FetchMode::Light),
        ..OrgActivity::default()
    };
    let mut created_urls = HashSet::new();
    let mut reviewed_urls = HashSet::new();

    for record in records {
        if !org.members.contains(&record.login) {
            org.members.push(record.login.clone());
        }
        org.counters += &record.counters;

        for (category, repos) in &record.repositories_by_category {
            let merged = org.repositories_by_category.entry(category.clone()).or_default();
            for repo in repos {
                merge_repo(merged, repo);
            }
        }

        // One cell per (repository, account), even when a repository sits in several categories.
        let mut own_commits: BTreeMap<&str, (u64, Option<&str>)> = BTreeMap::new();
        for repo in record.repositories() {
            own_commits
                .entry(repo.name.as_str())
                .or_insert((repo.commits, record.language_of(repo)));
        }
        for (repo, (commits, language)) in own_commits {
            if commits == 0 {
                continue;
            }
            add_cell(&mut org.repo_member_commits, repo, &record.login, commits);
            if let Some(language) = language {
                add_cell(&mut org.lang_member_commits, language, &record.login, commits);
            }
        }

        for (repo, stats) in &record.repo_line_stats {
            *org.repo_line_stats.entry(repo.clone()).or_default() += *stats;
        }
        for (repo, language) in &record.repo_language {
            match org.repo_language.entry(repo.clone()) {
                Entry::Vacant(entry) => {
                    entry.insert(language.clone());
                }
                Entry::Occupied(mut entry) => {
                    if entry.get().is_none() {
                        entry.insert(language.clone());
                    }
                }
            }
        }

        push_unique(&mut org.pull_requests_created, &mut created_urls, &record.pull_requests_created);
        push_unique(&mut org.pull_requests_reviewed, &mut reviewed_urls, &record.pull_requests_reviewed);

        first_non_empty(&mut org.member_real_name, &record.login, record.real_name.as_deref());
        first_non_empty(&mut org.member_company, &record.login, record.company.as_deref());
    }

    for repos in org.repositories_by_category.values_mut() {
        sort_by_commits(repos);
    }
    debug!(
        "Aggregated {} records into {} repositories",
        records.len(),
        org.repo_member_commits.len()
    );
    org
}

/// Commit count descending, then name.
pub fn sort_by_commits(repos: &mut [RepoContribution]) {
    repos.sort_by(|a, b| b.commits.cmp(&a.commits).then_with(|| a.name.cmp(&b.name)));
}

fn merge_repo(merged: &mut Vec<RepoContribution>, repo: &RepoContribution) {
    match merged.iter_mut().find(|existing| existing.name == repo.name) {
        Some(existing) => {
            existing.commits += repo.commits;
            existing.pull_requests += repo.pull_requests;
            if is_blank(&existing.description) && !is_blank(&repo.description) {
                existing.description = repo.description.clone();
            }
            if is_blank(&existing.language) && !is_blank(&repo.language) {
                existing.language = repo.language.clone();
            }
        }
        None => merged.push(repo.clone()),
    }
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |value| value.trim().is_empty())
}

fn add_cell(matrix: &mut BTreeMap<String, BTreeMap<String, u64>>, key: &str, login: &str, commits: u64) {
    *matrix
        .entry(key.to_string())
        .or_default()
        .entry(login.to_string())
        .or_default() += commits;
}

fn push_unique(target: &mut Vec<PullRequestFact>, seen: &mut HashSet<String>, facts: &[PullRequestFact]) {
    for fact in facts {
        if seen.insert(fact.url.clone()) {
            target.push(fact.clone());
        }
    }
}

fn first_non_empty(target: &mut BTreeMap<String, String>, login: &str, value: Option<&str>) {
    match value.map(str::trim) {
        Some(value) if !value.is_empty() && !target.contains_key(login) => {
            target.insert(login.to_string(), value.to_string());
        }
        _ => {}
    }
}

#[cfg(test)]
fn account(login: &str, repos: &[(&str, &str, u64)]) -> AccountActivity {
    let mut activity = AccountActivity::empty(login, FetchMode::Light);
    for (category, name, commits) in repos {
        activity
            .repositories_by_category
            .entry(category.to_string())
            .or_default()
            .push(RepoContribution::new(name.to_string(), *commits, 0, None, None));
        activity.counters.commits_default_branch += commits;
        activity.counters.commits_all_branches += commits;
    }
    activity
}

#[cfg(test)]
fn fact(url: &str) -> PullRequestFact {
    PullRequestFact {
        url: url.to_string(),
        repository: "org/repo".to_string(),
        ..PullRequestFact::default()
    }
}

#[test]
fn empty_input_is_all_zero() {
    let org = aggregate(&[]);
    assert_eq!(org, OrgActivity::default());
    assert!(!org.light_mode);
}

#[test]
fn singleton_reproduces_counters() {
    let mut alice = account("alice", &[("Other", "org/repo", 7), ("Web", "w3c/spec", 3)]);
    alice.counters.pull_requests_reviewed = 4;
    alice.counters.lines_added = 120;
    alice.counters.issues_opened = 2;
    let org = aggregate(&[alice.clone()]);
    assert_eq!(org.counters, alice.counters);
    assert_eq!(org.repositories_by_category, alice.repositories_by_category);
    assert_eq!(org.members, vec!["alice".to_string()]);
    assert!(org.light_mode);
}

#[test]
fn shared_repository_builds_member_matrix() {
    let alice = account("alice", &[("Other", "org/repo", 30)]);
    let bob = account("bob", &[("Other", "org/repo", 30)]);
    let org = aggregate(&[alice, bob]);

    let cells = &org.repo_member_commits["org/repo"];
    assert_eq!(cells.len(), 2);
    assert_eq!(cells["alice"], 30);
    assert_eq!(cells["bob"], 30);
    let merged = &org.repositories_by_category["Other"];
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].commits, 60);
    assert_eq!(org.counters.commits_default_branch, 60);
}

#[test]
fn duplicate_pull_request_listed_once_counted_twice() {
    let mut alice = account("alice", &[]);
    let mut bob = account("bob", &[]);
    let mut first = fact("https://github.com/org/repo/pull/1");
    first.title = "first seen".to_string();
    let mut second = fact("https://github.com/org/repo/pull/1");
    second.title = "seen again".to_string();
    alice.pull_requests_reviewed = vec![first];
    alice.counters.pull_requests_reviewed = 1;
    bob.pull_requests_reviewed = vec![second, fact("https://github.com/org/repo/pull/2")];
    bob.counters.pull_requests_reviewed = 2;

    let org = aggregate(&[alice, bob]);
    assert_eq!(org.pull_requests_reviewed.len(), 2);
    assert_eq!(org.pull_requests_reviewed[0].title, "first seen");
    assert_eq!(org.counters.pull_requests_reviewed, 3);
}

#[test]
fn first_non_empty_metadata_wins() {
    let mut first = account("alice", &[("Other", "org/repo", 1)]);
    first.real_name = Some(String::new());
    first.company = Some("Acme".to_string());
    first.repositories_by_category.get_mut("Other").unwrap()[0].description = Some(" ".to_string());
    let mut second = account("alice", &[("Other", "org/repo", 2)]);
    second.real_name = Some("Alice Liddell".to_string());
    second.company = None;
    second.repositories_by_category.get_mut("Other").unwrap()[0].description = Some("Repository".to_string());
    second.repositories_by_category.get_mut("Other").unwrap()[0].language = Some("Rust".to_string());

    let org = aggregate(&[first, second]);
    assert_eq!(org.member_real_name["alice"], "Alice Liddell");
    assert_eq!(org.member_company["alice"], "Acme");
    let merged = &org.repositories_by_category["Other"][0];
    assert_eq!(merged.description.as_deref(), Some("Repository"));
    assert_eq!(merged.language.as_deref(), Some("Rust"));
    assert_eq!(org.members, vec!["alice".to_string()]);
}

#[test]
fn language_matrix_uses_resolved_language() {
    let mut alice = account("alice", &[("Other", "org/repo", 5), ("Other", "org/tools", 2)]);
    alice.repo_language.insert("org/repo".to_string(), Some("Rust".to_string()));
    alice.repo_language.insert("org/tools".to_string(), None);
    let mut bob = account("bob", &[("Other", "org/lib", 4)]);
    bob.repositories_by_category.get_mut("Other").unwrap()[0].language = Some("Rust".to_string());
    bob.mode = FetchMode::Full;

    let org = aggregate(&[alice, bob]);
    assert_eq!(org.lang_member_commits.len(), 1);
    assert_eq!(org.lang_member_commits["Rust"]["alice"], 5);
    assert_eq!(org.lang_member_commits["Rust"]["bob"], 4);
    assert!(!org.light_mode);
}

#[test]
fn line_stats_summed_and_language_first_known() {
    use crate::model::LineStats;

    let mut alice = account("alice", &[]);
    alice.repo_line_stats.insert("org/repo".to_string(), LineStats::new(10, 2));
    alice.repo_language.insert("org/repo".to_string(), None);
    let mut bob = account("bob", &[]);
    bob.repo_line_stats.insert("org/repo".to_string(), LineStats::new(5, 5));
    bob.repo_language.insert("org/repo".to_string(), Some("Go".to_string()));
    let mut carol = account("carol", &[]);
    carol.repo_language.insert("org/repo".to_string(), Some("C".to_string()));

    let org = aggregate(&[alice, bob, carol]);
    assert_eq!(org.repo_line_stats["org/repo"], LineStats::new(15, 7));
    assert_eq!(org.repo_language["org/repo"].as_deref(), Some("Go"));
}

#[test]
fn categories_sorted_by_commits_then_name() {
    let alice = account("alice", &[("Other", "b/b", 1), ("Other", "a/a", 1), ("Other", "c/c", 9)]);
    let org = aggregate(&[alice]);
    let names: Vec<_> = org.repositories_by_category["Other"].iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["c/c", "a/a", "b/b"]);
}

#[test]
fn random_records_keep_matrix_consistent() {
    use rand::Rng;

    let mut rng = rand::thread_rng();
    let logins = ["alice", "bob", "carol", "dave"];
    let repos = ["org/a", "org/b", "org/c", "org/d", "org/e"];
    let categories = ["Other", "Web", "Tools"];

    for _ in 0..50 {
        let records: Vec<AccountActivity> = logins
            .iter()
            .map(|login| {
                let mut picked: Vec<(&str, &str, u64)> = Vec::new();
                for repo in repos {
                    if rng.gen_bool(0.6) {
                        let category = categories[rng.gen_range(0..categories.len())];
                        picked.push((category, repo, rng.gen_range(1..100)));
                    }
                }
                account(login, &picked)
            })
            .collect();

        let org = aggregate(&records);
        let expected_total: u64 = records.iter().map(|r| r.counters.commits_all_branches).sum();
        assert_eq!(org.counters.commits_all_branches, expected_total);

        for record in &records {
            for repo in record.repositories() {
                assert_eq!(org.repo_member_commits[&repo.name][&record.login], repo.commits);
            }
        }
        for (category, merged) in &org.repositories_by_category {
            for repo in merged {
                let expected: u64 = records
                    .iter()
                    .filter_map(|r| r.repositories_by_category.get(category))
                    .flatten()
                    .filter(|r| r.name == repo.name)
                    .map(|r| r.commits)
                    .sum();
                assert_eq!(repo.commits, expected);
            }
        }
        let matrix_total: u64 = org.repo_member_commits.values().flat_map(|cells| cells.values()).sum();
        assert_eq!(matrix_total, expected_total);
    }
}
