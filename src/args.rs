use chrono::NaiveDate;
use clap::{ArgGroup, Parser};
use secrecy::SecretString;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::str::FromStr;

const WINDOW_DAYS: RangeInclusive<u32> = 1..=3650;
const FORK_BRANCHES: RangeInclusive<usize> = 1..=1000;
const RETRIES: RangeInclusive<u32> = 0..=10;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(group(ArgGroup::new("target").required(true).args(&["user", "org"])))]
pub struct Args {
    /// Account login to collect
    #[clap(short, long, env = "CHRONICLE_USER")]
    pub user: Option<String>,

    /// Organization whose members are collected
    #[clap(short, long, env = "CHRONICLE_ORG")]
    pub org: Option<String>,

    /// Only organization members with the admin role
    #[clap(long, env = "CHRONICLE_OWNERS_ONLY")]
    pub owners_only: bool,

    /// First day of the window (YYYY-MM-DD), defaults to `days` before `until`
    #[clap(long, env = "CHRONICLE_SINCE")]
    pub since: Option<NaiveDate>,

    /// Last day of the window (YYYY-MM-DD), defaults to today
    #[clap(long, env = "CHRONICLE_UNTIL")]
    pub until: Option<NaiveDate>,

    /// Window length in days when `since` is not given
    #[clap(short, long, env = "CHRONICLE_DAYS", default_value_t = 7, parse(try_from_str=window_days))]
    pub days: u32,

    /// Full mode: commit search with line stats and fork branch scans
    #[clap(short, long, env = "CHRONICLE_FULL")]
    pub full: bool,

    /// Repository name or description substrings that never count
    #[clap(long, env = "CHRONICLE_DENY", use_value_delimiter = true)]
    pub deny: Vec<String>,

    /// Fork branch prefixes considered personal work (replaces the defaults)
    #[clap(long, env = "CHRONICLE_BRANCH_PREFIXES", use_value_delimiter = true)]
    pub branch_prefixes: Vec<String>,

    /// Forks with more branches than this only get matching branches scanned
    #[clap(long, env = "CHRONICLE_FORK_BRANCH_THRESHOLD", default_value_t = 20, parse(try_from_str=fork_branches))]
    pub fork_branch_threshold: usize,

    /// Skip the confirmation prompt of expensive organization runs
    #[clap(short, long, env = "CHRONICLE_YES")]
    pub yes: bool,

    /// Longest wait for a rate limit reset, in seconds
    #[clap(long, env = "CHRONICLE_MAX_WAIT_SECS", default_value_t = 120)]
    pub max_wait_secs: u64,

    /// API OAuth access token
    #[clap(short, long, env = "CHRONICLE_API_TOKEN")]
    pub api_token: Option<SecretString>,

    /// Repository API URL
    #[clap(long, env = "CHRONICLE_API_URL", default_value = "https://api.github.com")]
    pub api_url: String,

    /// Retries of a transiently failing request
    #[clap(long, env = "CHRONICLE_MAX_RETRIES", default_value_t = 3, parse(try_from_str=retries))]
    pub max_retries: u32,

    /// Base retry delay in milliseconds, doubled on every retry
    #[clap(long, env = "CHRONICLE_BACKOFF_MS", default_value_t = 1000)]
    pub backoff_ms: u64,
}

fn window_days(value: &str) -> Result<u32, String> {
    bounded(value, WINDOW_DAYS, "days in the window")
}

fn fork_branches(value: &str) -> Result<usize, String> {
    bounded(value, FORK_BRANCHES, "fork branches")
}

fn retries(value: &str) -> Result<u32, String> {
    bounded(value, RETRIES, "retries")
}

fn bounded<T>(value: &str, allowed: RangeInclusive<T>, what: &str) -> Result<T, String>
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let number = value
        .trim()
        .parse::<T>()
        .map_err(|err| format!("{} must be a whole number: {}", what, err))?;
    if !allowed.contains(&number) {
        return Err(format!(
            "{} must be between {} and {}, got {}",
            what,
            allowed.start(),
            allowed.end(),
            number
        ));
    }
    Ok(number)
}

#[test]
fn range_validation() {
    assert_eq!(window_days("30"), Ok(30));
    assert_eq!(window_days("3650"), Ok(3650));
    assert_eq!(
        window_days("0"),
        Err("days in the window must be between 1 and 3650, got 0".to_string())
    );
    assert_eq!(retries("0"), Ok(0));
    assert!(retries("11").is_err());
    assert!(retries("-1").is_err());
    let err = fork_branches("twenty").unwrap_err();
    assert!(err.starts_with("fork branches must be a whole number"), "{}", err);
}

#[test]
fn out_of_range_flags_rejected_by_parser() {
    assert!(Args::try_parse_from(["activity_chronicle", "--user", "a", "--days", "4000"]).is_err());
    assert!(Args::try_parse_from(["activity_chronicle", "--user", "a", "--max-retries", "11"]).is_err());
    assert!(Args::try_parse_from(["activity_chronicle", "--user", "a", "--fork-branch-threshold", "0"]).is_err());
    let args =
        Args::try_parse_from(["activity_chronicle", "--user", "a", "--days", "30", "--max-retries", "0"]).unwrap();
    assert_eq!(args.days, 30);
    assert_eq!(args.max_retries, 0);
}

#[test]
fn user_or_org_required() {
    assert!(Args::try_parse_from(["activity_chronicle"]).is_err());
    assert!(Args::try_parse_from(["activity_chronicle", "--user", "a", "--org", "b"]).is_err());
    let args = Args::try_parse_from(["activity_chronicle", "--org", "acme", "--deny", "sandbox,demo"]).unwrap();
    assert_eq!(args.org.as_deref(), Some("acme"));
    assert_eq!(args.deny, vec!["sandbox".to_string(), "demo".to_string()]);
    assert_eq!(args.days, 7);
}
