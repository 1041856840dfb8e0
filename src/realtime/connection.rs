//! Realtime connection state and reconnect backoff.

use std::time::{Duration, Instant};

/// Maximum backoff duration in seconds
pub const MAX_BACKOFF_SECS: u64 = 8;

/// Connection state of a realtime transport
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// First connection attempt in progress
    Connecting,
    /// Stream open and subscriptions registered
    Connected,
    /// Waiting to retry after a lost or failed connection
    Reconnecting {
        attempt: u32,
        next_retry: Option<Instant>,
    },
    /// Stopped for good (attempt limit reached or transport shut down)
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self, ConnectionState::Reconnecting { .. })
    }

    /// Current reconnect attempt number (0 if not reconnecting)
    pub fn reconnect_attempt(&self) -> u32 {
        match self {
            ConnectionState::Reconnecting { attempt, .. } => *attempt,
            _ => 0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting { .. } => "reconnecting",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Calculate exponential backoff duration for a given attempt number
///
/// Attempt 1: 0 seconds (immediate)
/// Attempt 2: 1 second
/// Attempt 3: 2 seconds
/// Attempt 4: 4 seconds
/// Attempt 5+: 8 seconds (max)
pub fn calculate_backoff(attempt: u32) -> Duration {
    if attempt <= 1 {
        return Duration::from_secs(0);
    }
    let exponent = attempt.saturating_sub(2);
    // 2^63 would overflow; anything past 2^3 is capped anyway
    let secs = if exponent >= 63 {
        MAX_BACKOFF_SECS
    } else {
        2u64.pow(exponent).min(MAX_BACKOFF_SECS)
    };
    Duration::from_secs(secs)
}
