//! External task identifiers.

use std::sync::atomic::{AtomicU64, Ordering};

use gambit_common::UnixNanos;

static LAST_ISSUED: AtomicU64 = AtomicU64::new(0);

/// Return a timestamp that is strictly greater than every
/// timestamp previously returned in this process.
pub fn next_timestamp(now: UnixNanos) -> UnixNanos {
    let mut last = LAST_ISSUED.load(Ordering::Relaxed);
    loop {
        let next = now.0.max(last + 1);
        match LAST_ISSUED.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return UnixNanos(next),
            Err(actual) => last = actual,
        }
    }
}

/// Format a timestamp as `YYYYMMDDTHHMMSS.nnnnnnnnn` in UTC.
#[must_use]
pub fn format_task_id(at: UnixNanos) -> String {
    let dt = at.to_datetime();
    format!(
        "{:04}{:02}{:02}T{:02}{:02}{:02}.{:09}",
        dt.year(),
        u8::from(dt.month()),
        dt.day(),
        dt.hour(),
        dt.minute(),
        dt.second(),
        dt.nanosecond()
    )
}

/// Generate a new unique task identifier.
#[must_use]
pub fn next_task_id() -> String {
    format_task_id(next_timestamp(UnixNanos::now()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format() {
        assert_eq!(
            format_task_id(UnixNanos(1_700_000_000_000_000_001)),
            "20231114T221320.000000001"
        );
    }

    #[test]
    fn strictly_increasing() {
        let fixed = UnixNanos(1_000);
        let first = next_timestamp(fixed);
        let second = next_timestamp(fixed);
        assert!(second > first);

        let ids: Vec<String> = (0..1000).map(|_| next_task_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }
}
