use std::io::{self, BufRead, Write};
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use chronicle::api::{DateWindow, Result};
use chronicle::attribution::BranchRules;
use chronicle::model::{AccountActivity, FetchMode};
use chronicle::{ActivityCollector, CollectorSettings, OrgCollector, OrgReport, OrgSettings};
use github_client::{GithubClient, GithubClientBuilder};
use log::info;
use serde::Serialize;

mod args;

pub use args::Args;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Report {
    Account(AccountActivity),
    Org(OrgReport),
}

/// Collects the account or organization named in `args`. `None` when an expensive run was declined.
pub async fn collect_activity(args: Args) -> Result<Option<Report>> {
    let window = window(args.since, args.until, args.days)?;
    let client = client(&args)?;
    let settings = collector_settings(&args);

    if let Some(org) = &args.org {
        let settings = OrgSettings {
            owners_only: args.owners_only,
            max_wait: Duration::from_secs(args.max_wait_secs),
            collector: settings,
        };
        let skip = args.yes;
        let mut confirm = |message: &str| confirm_run(message, skip, io::stdin().lock());
        let report = OrgCollector::new(client, settings)
            .collect(org, &window, &mut confirm)
            .await?;
        if report.is_none() {
            info!("Run of {} declined", org);
        }
        return Ok(report.map(Report::Org));
    }

    let login = args.user.as_deref().unwrap_or_default();
    let activity = ActivityCollector::new(client, settings).collect(login, &window).await?;
    Ok(Some(Report::Account(activity)))
}

/// Prints `message` and reads a yes/no answer. Anything but `y`/`yes`, end of input included, declines.
pub fn confirm_run(message: &str, skip: bool, mut input: impl BufRead) -> bool {
    if skip {
        return true;
    }
    eprint!("{}\nContinue? [y/N] ", message);
    // A prompt that fails to show still reads the answer.
    io::stderr().flush().ok();
    let mut answer = String::new();
    match input.read_line(&mut answer) {
        Ok(0) | Err(_) => false,
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
    }
}

fn window(since: Option<NaiveDate>, until: Option<NaiveDate>, days: u32) -> Result<DateWindow> {
    let until = until.unwrap_or_else(|| Utc::now().date_naive());
    match since {
        Some(since) => DateWindow::new(since, until),
        None => DateWindow::ending_on(until, days),
    }
}

fn client(args: &Args) -> Result<GithubClient> {
    let mut builder = GithubClientBuilder::default()
        .with_github_url(&args.api_url)
        .with_max_retries(args.max_retries)
        .with_backoff(Duration::from_millis(args.backoff_ms));
    if let Some(token) = &args.api_token {
        builder = builder.try_with_token(token.clone())?;
    }
    builder.build()
}

fn collector_settings(args: &Args) -> CollectorSettings {
    let mut branch_rules = BranchRules::default();
    if !args.branch_prefixes.is_empty() {
        branch_rules.prefixes = args.branch_prefixes.clone();
    }
    CollectorSettings {
        mode: if args.full { FetchMode::Full } else { FetchMode::Light },
        deny_list: args.deny.clone(),
        branch_rules,
        fork_branch_threshold: args.fork_branch_threshold,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn confirm_answers() {
        assert!(confirm_run("Expensive", true, "".as_bytes()));
        assert!(confirm_run("Expensive", false, "y\n".as_bytes()));
        assert!(confirm_run("Expensive", false, "YES\n".as_bytes()));
        assert!(!confirm_run("Expensive", false, "n\n".as_bytes()));
        assert!(!confirm_run("Expensive", false, "\n".as_bytes()));
        assert!(!confirm_run("Expensive", false, "".as_bytes()));
    }

    #[test]
    fn window_from_days_or_dates() {
        let window = window(None, Some(date("2026-01-31")), 7).unwrap();
        assert_eq!(window.since, date("2026-01-25"));

        let window = super::window(Some(date("2026-01-01")), Some(date("2026-01-31")), 7).unwrap();
        assert_eq!(window.days(), 31);

        assert!(super::window(Some(date("2026-02-01")), Some(date("2026-01-31")), 7).is_err());
    }
}
