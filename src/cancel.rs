//! Cooperative cancellation (spec §5): a flag checked between nodes in
//! Measurement's and Estimation's traversals. The engine never aborts
//! mid-node; the caller flushes a checkpoint once the in-flight node (or,
//! for Estimation, the in-flight sibling-group) returns control.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shareable, settable-from-anywhere stop signal. Cloning shares the same
/// underlying flag, so a caller can hand one half to a signal handler (or a
/// test) and the other to a running phase.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Requests cancellation; takes effect the next time a phase checks
    /// between nodes.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_by_default() {
        assert!(!CancellationFlag::new().is_set());
    }

    #[test]
    fn clone_shares_the_same_flag() {
        let flag = CancellationFlag::new();
        let handle = flag.clone();
        handle.cancel();
        assert!(flag.is_set());
    }
}
