//! Connection lifecycle and reconnection backoff.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──open──▶ Connected
//!      ▲                        ▲   │                 │
//!      │                  timer │   └──error──▶ Erroring ◀──error/close──┘
//!      └── give up / offline / disconnect() ◀───────┘
//! ```
//!
//! The manager holds deadlines instead of timers; the owner calls
//! [`ConnectionManager::poll`] from its tick.

use crate::config::ReconnectPolicy;
use std::time::{Duration, Instant};

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Erroring,
}

/// Something the owner must do on behalf of the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Open the transport and join the channel.
    Connect,
}

/// Reconnection state machine.
#[derive(Debug)]
pub struct ConnectionManager {
    policy: ReconnectPolicy,
    status: ConnectionStatus,
    attempt: u32,
    reconnect_at: Option<Instant>,
    /// The owner wants a live connection (cleared by `disconnect`).
    wanted: bool,
    /// The OS reported no connectivity.
    offline: bool,
    gave_up: bool,
}

impl ConnectionManager {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            status: ConnectionStatus::Disconnected,
            attempt: 0,
            reconnect_at: None,
            wanted: false,
            offline: false,
            gave_up: false,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Reconnect attempts made since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// True after the retry ceiling was hit; only `connect()` restarts.
    pub fn gave_up(&self) -> bool {
        self.gave_up
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// When the next reconnect fires, if one is scheduled.
    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Manual connect. Resets backoff. Returns None while offline; the
    /// connection is opened when connectivity returns.
    pub fn connect(&mut self) -> Option<SessionAction> {
        self.wanted = true;
        self.gave_up = false;
        self.attempt = 0;
        self.reconnect_at = None;
        if self.offline {
            log::info!("Connect requested while offline, waiting for network");
            return None;
        }
        self.status = ConnectionStatus::Connecting;
        Some(SessionAction::Connect)
    }

    /// The transport opened and the channel subscription succeeded.
    pub fn on_connected(&mut self) {
        if !self.wanted {
            return;
        }
        self.status = ConnectionStatus::Connected;
        self.attempt = 0;
        self.reconnect_at = None;
        log::info!("Channel connected");
    }

    /// Transport error, timeout or unexpected close. Returns the delay
    /// before the scheduled reconnect, or None if no retry was scheduled.
    pub fn on_error(&mut self, now: Instant, reason: &str) -> Option<Duration> {
        if !self.wanted || self.offline {
            log::debug!("Ignoring transport error while idle: {}", reason);
            return None;
        }
        if self.attempt >= self.policy.max_attempts {
            log::error!(
                "Giving up after {} reconnect attempts: {}",
                self.attempt,
                reason
            );
            self.status = ConnectionStatus::Disconnected;
            self.reconnect_at = None;
            self.gave_up = true;
            return None;
        }
        self.status = ConnectionStatus::Erroring;
        let delay = self.policy.delay(self.attempt);
        self.attempt += 1;
        self.reconnect_at = Some(now + delay);
        log::warn!(
            "Channel error ({}), reconnecting in {}ms (attempt {}/{})",
            reason,
            delay.as_millis(),
            self.attempt,
            self.policy.max_attempts
        );
        Some(delay)
    }

    /// Connectivity lost: stop sending, don't retry until it returns.
    pub fn on_offline(&mut self) {
        log::info!("Network offline");
        self.offline = true;
        self.status = ConnectionStatus::Disconnected;
        self.reconnect_at = None;
    }

    /// Connectivity restored: reconnect now, skipping backoff.
    pub fn on_online(&mut self) -> Option<SessionAction> {
        log::info!("Network online");
        self.offline = false;
        self.attempt = 0;
        self.gave_up = false;
        self.reconnect_at = None;
        if !self.wanted || self.status == ConnectionStatus::Connected {
            return None;
        }
        self.status = ConnectionStatus::Connecting;
        Some(SessionAction::Connect)
    }

    /// Explicit disconnect. Cancels pending timers.
    pub fn disconnect(&mut self) {
        self.wanted = false;
        self.reconnect_at = None;
        self.status = ConnectionStatus::Disconnected;
    }

    /// Fire the reconnect timer if it is due.
    pub fn poll(&mut self, now: Instant) -> Option<SessionAction> {
        match self.reconnect_at {
            Some(at) if now >= at => {
                self.reconnect_at = None;
                self.status = ConnectionStatus::Connecting;
                Some(SessionAction::Connect)
            }
            _ => None,
        }
    }
}
