//! Tunables for a sync session.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default relay endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3030/ws";

/// Role claim a cloud credential must carry.
pub const DEFAULT_REQUIRED_ROLE: &str = "authenticated";

/// Reconnection backoff: `min(base * 2^attempt, max)`, up to `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 8,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for a [`crate::SyncSession`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Relay WebSocket URL.
    pub server_url: String,
    /// Minimum interval between outbound cursor updates.
    #[serde(with = "millis")]
    pub presence_throttle: Duration,
    /// Quiet period after the last edit before a snapshot save.
    #[serde(with = "millis")]
    pub save_debounce: Duration,
    pub reconnect: ReconnectPolicy,
    /// Version gap at which a full reload is triggered. 2 means a notice for
    /// `local + 1` is trusted to have arrived as broadcasts.
    pub reconcile_gap: u64,
    /// Role claim required on cloud credentials.
    pub required_role: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            presence_throttle: Duration::from_millis(33),
            save_debounce: Duration::from_secs(2),
            reconnect: ReconnectPolicy::default(),
            reconcile_gap: 2,
            required_role: DEFAULT_REQUIRED_ROLE.to_string(),
        }
    }
}

impl SyncConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_schedule() {
        let policy = ReconnectPolicy::default();
        let expected = [1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000];
        for (attempt, ms) in expected.iter().enumerate() {
            assert_eq!(policy.delay(attempt as u32), Duration::from_millis(*ms));
        }
        assert_eq!(policy.delay(200), Duration::from_millis(30_000));
    }

    #[test]
    fn test_config_defaults_from_partial_json() {
        let config = SyncConfig::from_json(r#"{"save_debounce":500,"reconcile_gap":1}"#).unwrap();
        assert_eq!(config.save_debounce, Duration::from_millis(500));
        assert_eq!(config.reconcile_gap, 1);
        assert_eq!(config.presence_throttle, Duration::from_millis(33));
        assert_eq!(config.reconnect.max_attempts, 8);
    }
}
