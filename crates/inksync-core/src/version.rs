//! Per-element modification stamps.
//!
//! Versions are unix milliseconds, bumped past the previous value when the
//! clock has not advanced (or went backwards), so a local edit always
//! produces a strictly greater stamp than the one it replaces.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Next version for an element whose current version is `current`.
pub fn next_version(current: u64) -> u64 {
    next_version_at(current, now_millis())
}

/// Same as [`next_version`] with an explicit clock reading.
pub fn next_version_at(current: u64, now_ms: u64) -> u64 {
    now_ms.max(current.saturating_add(1))
}

/// Last-writer-wins check: does `incoming` replace `stored`?
///
/// Ties go to the incoming write. The local write that produced the tie has
/// already been applied locally, so accepting the remote one is what makes
/// both sides land on the same state.
pub fn supersedes(incoming: u64, stored: u64) -> bool {
    incoming >= stored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_version_uses_clock() {
        assert_eq!(next_version_at(10, 1_000), 1_000);
    }

    #[test]
    fn test_next_version_never_decreases() {
        // Clock behind the stored stamp
        assert_eq!(next_version_at(5_000, 1_000), 5_001);
        // Clock equal to the stored stamp
        assert_eq!(next_version_at(1_000, 1_000), 1_001);
    }

    #[test]
    fn test_next_version_saturates() {
        assert_eq!(next_version_at(u64::MAX, 0), u64::MAX);
    }

    #[test]
    fn test_supersedes() {
        assert!(supersedes(2, 1));
        assert!(supersedes(2, 2));
        assert!(!supersedes(1, 2));
    }

    #[test]
    fn test_now_millis_is_recent() {
        // 2020-01-01 in unix ms
        assert!(now_millis() > 1_577_836_800_000);
    }
}
