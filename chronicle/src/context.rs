use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// State shared by every call of one run.
///
/// The gateway raises the rate limit flag when it swallows a quota error; batch loops poll it and stop issuing calls
/// that would fail the same way. Clones share the flag.
#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    rate_limit_hit: Arc<AtomicBool>,
}

impl FetchContext {
    pub fn new() -> Self {
        FetchContext::default()
    }

    pub fn mark_rate_limit_hit(&self) {
        self.rate_limit_hit.store(true, Ordering::SeqCst);
    }

    pub fn rate_limit_hit(&self) -> bool {
        self.rate_limit_hit.load(Ordering::SeqCst)
    }

    /// Called once the quota has been replenished.
    pub fn clear_rate_limit_hit(&self) {
        self.rate_limit_hit.store(false, Ordering::SeqCst);
    }
}

#[test]
fn flag_shared_between_clones() {
    let context = FetchContext::new();
    let gateway_view = context.clone();
    assert!(!context.rate_limit_hit());
    gateway_view.mark_rate_limit_hit();
    assert!(context.rate_limit_hit());
    context.clear_rate_limit_hit();
    assert!(!gateway_view.rate_limit_hit());
}
