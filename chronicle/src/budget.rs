//! API call budget estimation for organization runs.
//!
//! The cost model has two phases. Phase 1 probes which accounts were active at all, in batches of
//! `PROBE_BATCH_SIZE` accounts per call. Phase 2 collects every active account in detail at roughly
//! `CALLS_PER_ACTIVE_ACCOUNT` calls each. Batched queries amortize per-account and per-day overhead, so phase 2 grows
//! sub-linearly in both the number of accounts and the window length.

use crate::api::{Error, Result};

/// Hourly quota of an authenticated account.
pub const TOTAL_QUOTA: u32 = 5000;
/// Share of `TOTAL_QUOTA` above which a run warns.
pub const WARN_THRESHOLD_ABSOLUTE: f64 = 0.5;
/// Share of the remaining quota above which a run warns.
pub const WARN_THRESHOLD_REMAINING: f64 = 0.8;
/// Below this many remaining calls a run does not start.
pub const MIN_REMAINING_TO_START: u32 = 50;
pub const PROBE_BATCH_SIZE: usize = 10;

const CALLS_PER_ACTIVE_ACCOUNT: f64 = 2.4;
const ACCOUNT_EXPONENT: f64 = 0.8;
const WINDOW_EXPONENT: f64 = 0.4;
// Account count and window length at which the scaled model equals the linear one. Below
// `REFERENCE_ACCOUNTS` an unprobed run never costs less than the same accounts known active.
const REFERENCE_ACCOUNTS: f64 = 300.0;
const REFERENCE_DAYS: f64 = 7.0;

/// Predicts the number of API calls needed to collect `accounts` accounts over `window_days` days.
///
/// With `known_active` the accounts are already confirmed active: no probe phase, no account scaling.
pub fn estimate(accounts: u32, window_days: u32, known_active: bool) -> Result<u32> {
    if window_days == 0 {
        return Err(Error::Configuration(
            "cannot estimate a run over an empty window".to_string(),
        ));
    }
    let time_factor = (f64::from(window_days) / REFERENCE_DAYS).powf(WINDOW_EXPONENT);
    let accounts = f64::from(accounts);
    let (probe_calls, effective_accounts) = if known_active {
        (0.0, accounts)
    } else {
        let probe_calls = (accounts / PROBE_BATCH_SIZE as f64).ceil();
        let scaled = REFERENCE_ACCOUNTS * (accounts / REFERENCE_ACCOUNTS).powf(ACCOUNT_EXPONENT);
        (probe_calls, scaled)
    };
    let calls = probe_calls + CALLS_PER_ACTIVE_ACCOUNT * effective_accounts * time_factor;
    Ok(calls.round() as u32)
}

/// Decides whether `estimated` calls deserve a warning given the `remaining` quota (if known).
pub fn should_warn(estimated: u32, remaining: Option<u32>) -> (bool, Option<String>) {
    let estimated_f = f64::from(estimated);
    let absolute_share = estimated_f / f64::from(TOTAL_QUOTA);
    let over_absolute = absolute_share > WARN_THRESHOLD_ABSOLUTE;
    let over_remaining = remaining.map_or(false, |remaining| {
        estimated_f > WARN_THRESHOLD_REMAINING * f64::from(remaining)
    });
    if !over_absolute && !over_remaining {
        return (false, None);
    }

    let mut message = format!(
        "This run is estimated to use {} API calls ({:.0}% of the {} hourly limit)",
        format_count(u64::from(estimated)),
        absolute_share * 100.0,
        format_count(u64::from(TOTAL_QUOTA))
    );
    match remaining {
        Some(0) => message.push_str(", and no calls remain in the current window"),
        Some(remaining) => message.push_str(&format!(
            ", {:.0}% of the {} calls remaining",
            estimated_f / f64::from(remaining) * 100.0,
            format_count(u64::from(remaining))
        )),
        None => {}
    }
    message.push('.');
    (true, Some(message))
}

/// Fails when the quota is already too low to start a run.
pub fn ensure_can_start(remaining: u32) -> Result<()> {
    if remaining < MIN_REMAINING_TO_START {
        return Err(Error::RateLimitExceeded);
    }
    Ok(())
}

/// `1234567` -> `1,234,567`
pub fn format_count(value: u64) -> String {
    let digits = value.to_string();
    let mut formatted = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            formatted.push(',');
        }
        formatted.push(digit);
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOWS: [u32; 4] = [1, 7, 30, 365];

    #[test]
    fn empty_window_is_a_configuration_error() {
        assert!(matches!(estimate(10, 0, false), Err(Error::Configuration(_))));
    }

    #[test]
    fn small_organisations_stay_cheap() {
        let tiny = estimate(10, 7, false).unwrap();
        assert!((20..=50).contains(&tiny), "{}", tiny);
        let small = estimate(50, 7, false).unwrap();
        assert!((100..=200).contains(&small), "{}", small);
    }

    #[test]
    fn matches_measured_organisation_runs() {
        let weekly = estimate(524, 7, false).unwrap();
        assert!((1000..=1600).contains(&weekly), "{}", weekly);
        let monthly = estimate(524, 30, false).unwrap();
        assert!((2000..=2800).contains(&monthly), "{}", monthly);
        let huge_daily = estimate(3686, 1, false).unwrap();
        assert!((2000..=3500).contains(&huge_daily), "{}", huge_daily);
    }

    #[test]
    fn zero_and_one_account() {
        assert_eq!(estimate(0, 7, false).unwrap(), 0);
        let one = estimate(1, 7, false).unwrap();
        assert!(one > 0 && one < 20, "{}", one);
    }

    #[test]
    fn known_active_uses_raw_count() {
        let known = estimate(1000, 7, true).unwrap();
        assert!((2300..=2500).contains(&known), "{}", known);
        assert!(estimate(200, 7, true).unwrap() < estimate(3000, 7, false).unwrap());
    }

    #[test]
    fn probe_and_scaling_only_add_cost_up_to_reference_size() {
        for days in WINDOWS {
            for accounts in 0..=REFERENCE_ACCOUNTS as u32 {
                let unknown = estimate(accounts, days, false).unwrap();
                let known = estimate(accounts, days, true).unwrap();
                assert!(unknown >= known, "accounts {} days {}: {} < {}", accounts, days, unknown, known);
            }
        }
    }

    #[test]
    fn large_unprobed_runs_undercut_linear_cost() {
        let unknown = estimate(3686, 1, false).unwrap();
        let known = estimate(3686, 1, true).unwrap();
        assert!(unknown <= 3500, "{}", unknown);
        assert!(known > unknown, "{} <= {}", known, unknown);
    }

    #[test]
    fn doubling_accounts_does_not_double_cost() {
        for days in WINDOWS {
            for accounts in 1..=2000 {
                let single = estimate(accounts, days, false).unwrap();
                let double = estimate(accounts * 2, days, false).unwrap();
                assert!(double < 2 * single, "accounts {} days {}: {} vs {}", accounts, days, double, single);
            }
        }
        let ratio = f64::from(estimate(1000, 7, false).unwrap()) / f64::from(estimate(500, 7, false).unwrap());
        assert!(ratio < 2.0);
    }

    #[test]
    fn window_scales_sub_linearly() {
        let weekly = f64::from(estimate(100, 7, false).unwrap());
        let monthly = f64::from(estimate(100, 30, false).unwrap());
        let yearly = f64::from(estimate(100, 365, false).unwrap());
        assert!((1.5..=2.5).contains(&(monthly / weekly)));
        assert!(yearly > monthly);
        assert!(yearly / monthly < 5.0);
    }

    #[test]
    fn warns_above_half_of_total_quota() {
        let (warn, message) = should_warn(2600, Some(5000));
        assert!(warn);
        let message = message.unwrap();
        assert!(message.contains("2,600"), "{}", message);
        assert!(message.contains('%'), "{}", message);

        let (warn, _) = should_warn(2600, None);
        assert!(warn);
    }

    #[test]
    fn warns_when_remaining_quota_nearly_spent() {
        let (warn, message) = should_warn(900, Some(1000));
        assert!(warn);
        assert!(message.unwrap().contains("90%"));
        let (warn, _) = should_warn(1, Some(0));
        assert!(warn);
    }

    #[test]
    fn silent_below_both_thresholds() {
        assert_eq!(should_warn(500, Some(4000)), (false, None));
        assert_eq!(should_warn(2000, Some(4000)), (false, None));
        assert_eq!(should_warn(0, Some(0)), (false, None));
    }

    #[test]
    fn start_needs_minimum_quota() {
        assert!(matches!(ensure_can_start(10), Err(Error::RateLimitExceeded)));
        assert!(ensure_can_start(4500).is_ok());
    }

    #[test]
    fn counts_formatted_with_separators() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(42), "42");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(1234567), "1,234,567");
    }
}
