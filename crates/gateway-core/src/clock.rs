use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the monotonic-ish operation timestamps used to stamp model
/// state transitions (§3). Abstracted so registry tests can drive time
/// deterministically instead of sleeping.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_millis() as u64
    }
}
