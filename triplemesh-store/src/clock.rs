//! Monotonic microsecond clock for leases.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds since the first call in this process. Monotonic; shared by
/// cache leases and the deferred-free queue so their expirations compare
/// directly.
pub(crate) fn now_us() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = now_us();
        let b = now_us();
        assert!(b >= a);
    }
}
