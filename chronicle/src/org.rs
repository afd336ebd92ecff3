use std::collections::HashSet;
use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::Serialize;

use crate::aggregate::aggregate;
use crate::api::{Client, DateWindow, Error, MemberRole, Result};
use crate::attribution::RepoInfoCache;
use crate::budget::{ensure_can_start, estimate, format_count, should_warn, PROBE_BATCH_SIZE};
use crate::collector::{ActivityCollector, Categorize, CollectorSettings};
use crate::model::{AccountActivity, OrgActivity};

/// Longest sleep for a quota reset before a run gives up with what it has.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(120);

/// Automation accounts: the login ends with `bot` or `[bot]`, in any case.
pub fn is_bot(login: &str) -> bool {
    let login = login.to_lowercase();
    login.ends_with("bot") || login.ends_with("[bot]")
}

/// Decides whether an expensive run goes on.
pub trait Confirm {
    fn confirm(&mut self, message: &str) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str) -> bool,
{
    fn confirm(&mut self, message: &str) -> bool {
        self(message)
    }
}

#[derive(Debug, Clone)]
pub struct OrgSettings {
    /// Only members with the admin role.
    pub owners_only: bool,
    pub max_wait: Duration,
    pub collector: CollectorSettings,
}

impl Default for OrgSettings {
    fn default() -> Self {
        OrgSettings {
            owners_only: false,
            max_wait: DEFAULT_MAX_WAIT,
            collector: CollectorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrgReport {
    pub org: String,
    pub since: NaiveDate,
    pub until: NaiveDate,
    /// Members listed, bots excluded.
    pub member_count: usize,
    pub active_members: Vec<String>,
    /// `false` when the quota ran out before every active member was collected.
    pub complete: bool,
    pub activity: OrgActivity,
}

impl OrgReport {
    fn new(org: &str, window: &DateWindow, member_count: usize) -> Self {
        OrgReport {
            org: org.to_string(),
            since: window.since,
            until: window.until,
            member_count,
            active_members: Vec::new(),
            complete: true,
            activity: OrgActivity::default(),
        }
    }
}

pub struct OrgCollector<CLIENT>
where
    CLIENT: Client,
{
    collector: ActivityCollector<CLIENT>,
    owners_only: bool,
    max_wait: Duration,
}

impl<CLIENT> OrgCollector<CLIENT>
where
    CLIENT: 'static + Client,
{
    pub fn new(client: CLIENT, settings: OrgSettings) -> Self {
        OrgCollector {
            collector: ActivityCollector::new(client, settings.collector),
            owners_only: settings.owners_only,
            max_wait: settings.max_wait,
        }
    }

    pub fn with_categorizer(mut self, categorizer: impl Categorize + 'static) -> Self {
        self.collector = self.collector.with_categorizer(categorizer);
        self
    }

    pub fn with_repo_cache(mut self, cache: RepoInfoCache) -> Self {
        self.collector = self.collector.with_repo_cache(cache);
        self
    }

    /// Collects every active member of `org`.
    ///
    /// Fails with `RateLimitExceeded` when the quota is too low to start. Returns `None` when `confirm` declined an
    /// expensive run.
    pub async fn collect<C>(&mut self, org: &str, window: &DateWindow, confirm: &mut C) -> Result<Option<OrgReport>>
    where
        C: Confirm,
    {
        let client = self.collector.client().clone();
        let remaining = self.remaining_quota().await?;
        if let Some(remaining) = remaining {
            ensure_can_start(remaining)?;
        }

        let role = if self.owners_only { MemberRole::Admin } else { MemberRole::All };
        let members: Vec<String> = client
            .org_members(org, role)
            .await?
            .into_iter()
            .filter(|login| {
                let bot = is_bot(login);
                if bot {
                    debug!("Skipping bot account {}", login);
                }
                !bot
            })
            .collect();
        info!("{} has {} members", org, members.len());
        let mut report = OrgReport::new(org, window, members.len());
        if members.is_empty() {
            return Ok(Some(report));
        }

        let estimated = estimate(members.len() as u32, window.days(), false)?;
        if !approved(estimated, remaining, confirm) {
            return Ok(None);
        }

        let (active, probed) = self.probe_active(&members, window).await;
        report.complete = probed;
        info!("{} of {} members of {} were active", active.len(), members.len(), org);
        if active.is_empty() {
            return Ok(Some(report));
        }

        let estimated = estimate(active.len() as u32, window.days(), true)?;
        let remaining = self.remaining_quota().await.unwrap_or(remaining);
        if !approved(estimated, remaining, confirm) {
            return Ok(None);
        }

        let mut records = Vec::with_capacity(active.len());
        for login in &active {
            if client.context().rate_limit_hit() && !self.resume().await {
                warn!("Stopping after {} of {} members", records.len(), active.len());
                report.complete = false;
                break;
            }
            let collected = match self.collector.collect(login, window).await {
                Err(Error::RateLimitExceeded) => {
                    client.context().mark_rate_limit_hit();
                    if !self.resume().await {
                        warn!("Stopping after {} of {} members", records.len(), active.len());
                        report.complete = false;
                        break;
                    }
                    self.collector.collect(login, window).await
                }
                other => other,
            };
            match collected {
                Ok(activity) => records.push(activity),
                Err(err) => {
                    warn!("Failed to collect {}: {}", login, err);
                    records.push(AccountActivity::empty(login.as_str(), self.collector.mode()));
                }
            }
        }

        report.activity = aggregate(&records);
        report.active_members = active;
        Ok(Some(report))
    }

    async fn remaining_quota(&self) -> Result<Option<u32>> {
        let status = self.collector.client().rate_limit_status().await?;
        match &status {
            Some(status) => debug!("{} of {} calls remaining until {}", status.remaining, status.limit, status.reset),
            None => warn!("Rate limit status unavailable"),
        }
        Ok(status.map(|status| status.remaining))
    }

    /// Members with any activity in the window, in member order. The flag is `false` when the probe was cut short.
    async fn probe_active(&self, members: &[String], window: &DateWindow) -> (Vec<String>, bool) {
        let client = self.collector.client();
        let mut active = HashSet::new();
        let mut complete = true;
        for batch in members.chunks(PROBE_BATCH_SIZE) {
            if client.context().rate_limit_hit() {
                warn!("Rate limit hit, activity probe stopped early");
                complete = false;
                break;
            }
            match client.contribution_totals(batch, window).await {
                Ok(totals) => active.extend(
                    totals
                        .into_iter()
                        .filter(|totals| totals.is_active())
                        .map(|totals| totals.login),
                ),
                Err(Error::RateLimitExceeded) => {
                    client.context().mark_rate_limit_hit();
                    complete = false;
                    break;
                }
                Err(err) => {
                    // Unknown activity, let the detailed fetch decide.
                    warn!("Failed to probe {}: {}", batch.join(", "), err);
                    active.extend(batch.iter().cloned());
                }
            }
        }
        let active = members.iter().filter(|login| active.contains(*login)).cloned().collect();
        (active, complete)
    }

    async fn resume(&self) -> bool {
        let client = self.collector.client();
        if client.wait_for_rate_limit_reset(self.max_wait).await {
            client.context().clear_rate_limit_hit();
            info!("Rate limit reset, resuming");
            true
        } else {
            warn!("Rate limit resets later than {}s from now", self.max_wait.as_secs());
            false
        }
    }
}

fn approved<C: Confirm>(estimated: u32, remaining: Option<u32>, confirm: &mut C) -> bool {
    info!("Estimated {} API calls", format_count(u64::from(estimated)));
    match should_warn(estimated, remaining) {
        (true, Some(message)) => {
            warn!("{}", message);
            let approved = confirm.confirm(&message);
            if !approved {
                info!("Run declined");
            }
            approved
        }
        _ => true,
    }
}
