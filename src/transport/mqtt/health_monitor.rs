//! Pure reconnection logic for the room connection
//!
//! Decides whether the supervisor retries, how long `connect` waits for the
//! first ConnAck, and which state each connection event leads to.

use super::connection::{ConnectionState, ReconnectConfig};
use std::time::Duration;
use tracing::{error, info, warn};

/// Extra wait on top of the total backoff before `connect` gives up
const CONNECT_GRACE_MS: u64 = 30_000;

/// Wait used when reconnection is unlimited
const UNLIMITED_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

pub struct HealthMonitor;

impl HealthMonitor {
    /// Decide the next reconnection step; `None` attempts means retry forever
    pub fn should_attempt_reconnection(
        current_attempts: u32,
        config: &ReconnectConfig,
        shutdown_requested: bool,
    ) -> ReconnectionDecision {
        if shutdown_requested {
            return ReconnectionDecision::AbortShutdownRequested;
        }

        if matches!(config.max_attempts, Some(max) if current_attempts >= max) {
            return ReconnectionDecision::AbortMaxAttemptsExceeded;
        }

        let attempt = current_attempts + 1;
        ReconnectionDecision::Proceed {
            attempt,
            delay_ms: config.calculate_backoff_delay(attempt),
        }
    }

    /// How long `connect` waits for the room to be joined
    pub fn calculate_connection_timeout(config: &ReconnectConfig) -> Duration {
        config
            .calculate_max_total_time()
            .map(|total| Duration::from_millis(total + CONNECT_GRACE_MS))
            .unwrap_or(UNLIMITED_CONNECT_TIMEOUT)
    }

    /// State reached after a connection event
    pub fn next_state(event: ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::ConnAckReceived => ConnectionState::Connected,
            ConnectionEvent::DisconnectedByBroker => {
                ConnectionState::Disconnected("Broker disconnected".to_string())
            }
            ConnectionEvent::ClientDisconnected => {
                ConnectionState::Disconnected("Client disconnected".to_string())
            }
            ConnectionEvent::NetworkError(reason) => ConnectionState::Disconnected(reason),
            ConnectionEvent::ReconnectionStarted(attempt) => ConnectionState::Reconnecting(attempt),
            ConnectionEvent::PermanentFailure(reason) => {
                ConnectionState::PermanentlyDisconnected(reason)
            }
        }
    }

    /// Compute and log the transition from `current` for `event`
    pub fn transition(current: &ConnectionState, event: ConnectionEvent) -> ConnectionState {
        let next = Self::next_state(event);
        Self::log_state_transition(current, &next);
        next
    }

    /// Only a joined room accepts publishes
    pub fn can_publish(state: &ConnectionState) -> bool {
        matches!(state, ConnectionState::Connected)
    }

    pub fn log_state_transition(from: &ConnectionState, to: &ConnectionState) {
        match (from, to) {
            (ConnectionState::Connecting, ConnectionState::Connected) => {
                info!("Joined room");
            }
            (ConnectionState::Reconnecting(attempt), ConnectionState::Connected) => {
                info!(attempt, "Rejoined room after reconnection");
            }
            (ConnectionState::Connected, ConnectionState::Disconnected(reason)) => {
                warn!(%reason, "Room connection lost");
            }
            (_, ConnectionState::Reconnecting(attempt)) => {
                info!(attempt, "Reconnecting to broker");
            }
            (_, ConnectionState::PermanentlyDisconnected(reason)) => {
                error!(%reason, "Room connection permanently failed");
            }
            _ => {
                info!("Room connection state: {:?} -> {:?}", from, to);
            }
        }
    }

    pub fn validate_connection_config(config: &ReconnectConfig) -> Result<(), String> {
        if config.max_attempts == Some(0) {
            return Err("max_attempts must be greater than 0 or None for unlimited".to_string());
        }

        if config.sustained_delay == 0 {
            return Err("sustained_delay must be greater than 0".to_string());
        }

        if config.backoff_pattern.contains(&0) {
            return Err("backoff_pattern delays must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Decision result for reconnection attempts
#[derive(Debug, PartialEq)]
pub enum ReconnectionDecision {
    Proceed { attempt: u32, delay_ms: u64 },
    AbortShutdownRequested,
    AbortMaxAttemptsExceeded,
}

/// Connection events that trigger state transitions
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// ConnAck received from broker
    ConnAckReceived,
    /// Broker sent a Disconnect packet
    DisconnectedByBroker,
    /// Local `disconnect()`
    ClientDisconnected,
    /// Network or protocol error from the event loop
    NetworkError(String),
    ReconnectionStarted(u32),
    /// Attempts exhausted
    PermanentFailure(String),
}
