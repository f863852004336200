use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Cooperative cancellation shared between a caller and a running
/// workflow. The flag is also handed to tree-sitter, which polls it while
/// parsing.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicUsize>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(1, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed) != 0
    }

    pub fn flag(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.flag)
    }
}
