//! GraphQL documents. Values always travel as variables, only alias counts shape the query text.

const REPOSITORY_FIELDS: &str = "
    nameWithOwner
    description
    primaryLanguage { name }
    isFork
    isPrivate
    parent { nameWithOwner description }
    defaultBranchRef { name }
    pushedAt";

const PULL_REQUEST_FIELDS: &str = "
    url
    title
    state
    additions
    deletions
    author { login }
    repository { nameWithOwner isPrivate primaryLanguage { name } }";

pub fn contribution_summary() -> String {
    format!(
        "query ContributionSummary($login: String!, $from: DateTime!, $to: DateTime!) {{
  user(login: $login) {{
    login
    name
    company
    contributionsCollection(from: $from, to: $to) {{
      totalCommitContributions
      restrictedContributionsCount
      totalPullRequestContributions
      totalIssueContributions
      totalPullRequestReviewContributions
      commitContributionsByRepository(maxRepositories: 100) {{
        repository {{ {} }}
        contributions {{ totalCount }}
      }}
    }}
  }}
}}",
        REPOSITORY_FIELDS
    )
}

/// Alias of the `index`th account in `contribution_totals`.
pub fn account_alias(index: usize) -> String {
    format!("u{}", index)
}

/// Activity probe for `accounts` logins passed as `$login0`, `$login1`, ...
pub fn contribution_totals(accounts: usize) -> String {
    let variables: String = (0..accounts).map(|i| format!(", $login{}: String!", i)).collect();
    let selections: String = (0..accounts)
        .map(|i| {
            format!(
                "
  {}: user(login: $login{}) {{
    login
    contributionsCollection(from: $from, to: $to) {{
      totalCommitContributions
      totalPullRequestContributions
      totalPullRequestReviewContributions
      totalIssueContributions
    }}
  }}",
                account_alias(i),
                i
            )
        })
        .collect();
    format!(
        "query ContributionTotals($from: DateTime!, $to: DateTime!{}) {{{}\n}}",
        variables, selections
    )
}

/// Alias of the `index`th repository in `repository_info`.
pub fn repository_alias(index: usize) -> String {
    format!("r{}", index)
}

/// Metadata of `repositories` repositories passed as `$owner0`/`$name0`, ...
pub fn repository_info(repositories: usize) -> String {
    let variables: Vec<String> = (0..repositories)
        .map(|i| format!("$owner{}: String!, $name{}: String!", i, i))
        .collect();
    let selections: String = (0..repositories)
        .map(|i| {
            format!(
                "\n  {}: repository(owner: $owner{}, name: $name{}) {{ {} }}",
                repository_alias(i),
                i,
                i,
                REPOSITORY_FIELDS
            )
        })
        .collect();
    format!("query RepositoryInfo({}) {{{}\n}}", variables.join(", "), selections)
}

pub fn user_forks() -> String {
    format!(
        "query UserForks($login: String!, $cursor: String) {{
  user(login: $login) {{
    repositories(first: 100, after: $cursor, isFork: true, ownerAffiliations: OWNER, orderBy: {{field: PUSHED_AT, direction: DESC}}) {{
      pageInfo {{ hasNextPage endCursor }}
      nodes {{ {} }}
    }}
  }}
}}",
        REPOSITORY_FIELDS
    )
}

pub fn pull_requests_created() -> String {
    format!(
        "query PullRequestsCreated($query: String!, $cursor: String) {{
  search(query: $query, type: ISSUE, first: 100, after: $cursor) {{
    pageInfo {{ hasNextPage endCursor }}
    nodes {{
      ... on PullRequest {{ {} }}
    }}
  }}
}}",
        PULL_REQUEST_FIELDS
    )
}

pub fn pull_requests_reviewed() -> String {
    format!(
        "query PullRequestsReviewed($login: String!, $from: DateTime!, $to: DateTime!, $cursor: String) {{
  user(login: $login) {{
    contributionsCollection(from: $from, to: $to) {{
      pullRequestReviewContributions(first: 100, after: $cursor) {{
        pageInfo {{ hasNextPage endCursor }}
        nodes {{
          pullRequest {{ {} }}
        }}
      }}
    }}
  }}
}}",
        PULL_REQUEST_FIELDS
    )
}

#[test]
fn batched_queries_declare_every_variable() {
    let totals = contribution_totals(3);
    assert!(totals.starts_with("query ContributionTotals($from: DateTime!, $to: DateTime!, $login0: String!"));
    assert!(totals.contains("u2: user(login: $login2)"));
    assert!(!totals.contains("$login3"));

    let repos = repository_info(2);
    assert!(repos.starts_with("query RepositoryInfo($owner0: String!, $name0: String!, $owner1: String!"));
    assert!(repos.contains("r1: repository(owner: $owner1, name: $name1)"));
    assert!(repos.contains("nameWithOwner"));
}
