use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Hands out unique, monotonically increasing session ids.
///
/// Services share [`SessionIdGenerator::shared`] unless given their own
/// instance, so ids stay unique across every service in the process.
#[derive(Debug)]
pub struct SessionIdGenerator {
    last: AtomicU64,
}

impl Default for SessionIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionIdGenerator {
    /// Creates a generator whose first id is `1`.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    /// The process-wide generator.
    pub fn shared() -> Arc<SessionIdGenerator> {
        static SHARED: OnceLock<Arc<SessionIdGenerator>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(SessionIdGenerator::new())))
    }

    /// Returns the next id.
    pub fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }
}
