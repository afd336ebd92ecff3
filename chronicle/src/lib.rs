//! Contribution activity chronicle
//!
//! # Overview
//!
//! Library collects an account's (or a whole organization's) contribution activity from GitHub for a bounded date window.
//! Commits, pull requests and reviews are fetched through a `Client`, reconciled into one `AccountActivity` per account
//! and merged into a single `OrgActivity` when more than one account is involved.
//!
//! The API is paginated, rate limited and occasionally flaky, and the same fact can be counted by several sources.
//! Commits on personal forks do not show up in the commit search index, so forks are scanned branch by branch and their
//! commits are credited to the upstream (parent) repository. Pull requests seen by several accounts are listed once.
//!
//! Before an organization run starts, the number of API calls it will cost is estimated and compared with the remaining
//! rate budget so the caller can decide whether to go on.

#[cfg(feature = "api")]
pub mod api;
#[cfg(feature = "api")]
pub mod context;
#[cfg(feature = "api")]
pub mod model;
#[cfg(feature = "api")]
pub mod pagination;

#[cfg(feature = "pipeline")]
pub mod aggregate;
#[cfg(feature = "pipeline")]
pub mod attribution;
#[cfg(feature = "pipeline")]
pub mod budget;
#[cfg(feature = "pipeline")]
pub mod collector;
#[cfg(feature = "pipeline")]
pub mod org;

#[cfg(all(test, feature = "pipeline"))]
pub(crate) mod testing;

#[cfg(feature = "pipeline")]
pub use aggregate::aggregate;
#[cfg(feature = "pipeline")]
pub use collector::{ActivityCollector, Categorize, CollectorSettings, Uncategorized};
#[cfg(feature = "pipeline")]
pub use org::{Confirm, OrgCollector, OrgReport, OrgSettings};
