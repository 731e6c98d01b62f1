//! Impure I/O operations for the room connection
//!
//! This module owns the rumqttc client and its event loop. A supervisor task
//! polls the loop, decodes every delivery on the room topic, forwards the
//! resulting events to the session and reconnects with backoff.

use super::connection::{
    configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig, TopicBuilder,
};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageForwarder, MessageHandler, OutboundPublish};
use crate::config::BrokerSection;
use crate::observability::metrics::metrics;
use crate::processing::MessageDecoder;
use crate::protocol::{validate_exchange_name, InboundDelivery, IncomingMessage, TypingSignal};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

type SharedClient = Arc<Mutex<Option<AsyncClient>>>;
type SharedForwarder = Arc<std::sync::Mutex<MessageForwarder>>;

/// Capacity of the rumqttc request channel
const REQUEST_CHANNEL_CAPACITY: usize = 10;

/// How long `disconnect` waits for the supervisor before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long the supervisor keeps polling to flush a queued Disconnect packet
const DISCONNECT_FLUSH: Duration = Duration::from_millis(250);

/// Per-connection state, present between `connect` and `disconnect`
struct ActiveConnection {
    identity: String,
    event_loop_handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// MQTT implementation of the room gateway
///
/// One client per session. `connect` joins the room under an identity,
/// `disconnect` leaves it; the client can then connect again.
pub struct MqttClient {
    config: BrokerSection,
    room_topic: String,
    reconnect_config: ReconnectConfig,
    client: SharedClient,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
    started: AtomicBool,
    active: Mutex<Option<ActiveConnection>>,
    message_forwarder: SharedForwarder,
}

impl MqttClient {
    /// Validate the broker section and build an unconnected client
    pub fn new(config: BrokerSection) -> Result<Self, MqttError> {
        // Fails early on a bad URL instead of at connect time
        configure_mqtt_options("relaychat", &config)?;

        validate_exchange_name(&config.exchange).map_err(|e| {
            MqttError::InvalidConfig(format!("exchange '{}': {e}", config.exchange))
        })?;

        let reconnect_config = ReconnectConfig::from_broker(&config);
        HealthMonitor::validate_connection_config(&reconnect_config)
            .map_err(MqttError::InvalidConfig)?;

        let (state_tx, state_rx) =
            watch::channel(ConnectionState::Disconnected("Not connected".to_string()));

        Ok(Self {
            room_topic: TopicBuilder::room_topic(&config.exchange),
            config,
            reconnect_config,
            client: Arc::new(Mutex::new(None)),
            state_tx: Arc::new(state_tx),
            state_rx,
            started: AtomicBool::new(false),
            active: Mutex::new(None),
            message_forwarder: Arc::new(std::sync::Mutex::new(MessageForwarder::new())),
        })
    }

    /// Topic this client publishes to and subscribes on
    pub fn room_topic(&self) -> &str {
        &self.room_topic
    }

    /// Set the channels decoded room events are forwarded to
    pub fn set_event_senders(
        &self,
        messages: mpsc::Sender<IncomingMessage>,
        typing: mpsc::Sender<TypingSignal>,
    ) {
        self.message_forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .set_senders(messages, typing);
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), MqttError> {
        let timeout_result = tokio::time::timeout(timeout, async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match &state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(reason.clone()));
                    }
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(MqttError::ConnectionFailedStr(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }

                if state_rx.changed().await.is_err() {
                    return Err(MqttError::ConnectionFailedStr(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match timeout_result {
            Ok(result) => result,
            Err(_) => Err(MqttError::ConnectionFailedStr(
                "ConnAck timeout - no connection confirmation received".to_string(),
            )),
        }
    }

    /// Join the room as `identity`
    ///
    /// Returns once the broker has acknowledged the connection. The room
    /// subscription is (re)issued by the supervisor on every ConnAck.
    pub async fn connect(&self, identity: &str) -> Result<(), MqttError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(MqttError::InvalidConfig(
                "identity must not be blank".to_string(),
            ));
        }

        let mut active = self.active.lock().await;
        if let Some(existing) = active.as_ref() {
            if !existing.event_loop_handle.is_finished() {
                return Err(MqttError::ConnectionFailedStr(format!(
                    "Already connected as {}",
                    existing.identity
                )));
            }
        }

        metrics().mqtt_connection_attempt();
        let mqtt_options = configure_mqtt_options(identity, &self.config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
        *self.client.lock().await = Some(client);

        self.started.store(true, Ordering::Release);
        self.state_tx.send_replace(ConnectionState::Connecting);
        let state_rx = self.state_tx.subscribe();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let supervisor = Supervisor {
            identity: identity.to_string(),
            config: self.config.clone(),
            room_topic: self.room_topic.clone(),
            reconnect_config: self.reconnect_config.clone(),
            client: self.client.clone(),
            state_tx: self.state_tx.clone(),
            shutdown_rx,
            forwarder: self.message_forwarder.clone(),
            decoder: MessageDecoder::new(identity),
            reconnect_attempts: 0,
            ever_connected: false,
        };
        let span = crate::mqtt_span!(identity = %identity, topic = %self.room_topic);
        let handle = tokio::spawn(supervisor.run(event_loop).instrument(span));

        *active = Some(ActiveConnection {
            identity: identity.to_string(),
            event_loop_handle: handle,
            shutdown_tx,
        });
        // Released before waiting so `disconnect` can interrupt a slow connect
        drop(active);

        let connection_timeout =
            HealthMonitor::calculate_connection_timeout(&self.reconnect_config);
        match Self::wait_for_connection_confirmation(state_rx, connection_timeout).await {
            Ok(()) => {
                info!(identity, topic = %self.room_topic, "Connected to room");
                Ok(())
            }
            Err(e) => {
                metrics().mqtt_connection_failed();
                self.stop_supervisor().await;
                self.state_tx
                    .send_replace(ConnectionState::Disconnected(e.to_string()));
                Err(e)
            }
        }
    }

    /// Stop the supervisor and drop the client; returns the identity that was connected
    async fn stop_supervisor(&self) -> Option<String> {
        let active = self.active.lock().await.take()?;

        if let Some(client) = self.client.lock().await.take() {
            // Queued without waiting; the supervisor flushes it on shutdown
            if let Err(e) = client.try_disconnect() {
                debug!("Disconnect request not queued: {}", e);
            }
        }

        let _ = active.shutdown_tx.send(true);

        let abort_handle = active.event_loop_handle.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, active.event_loop_handle).await {
            Ok(Ok(())) => debug!("Room supervisor shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("Room supervisor ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("Room supervisor didn't shut down gracefully, forcing abort");
                abort_handle.abort();
            }
        }

        Some(active.identity)
    }

    /// Leave the room; a no-op when not connected
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        let Some(identity) = self.stop_supervisor().await else {
            debug!("Disconnect requested without an active connection");
            return Ok(());
        };

        let current = self.state_rx.borrow().clone();
        self.state_tx.send_replace(HealthMonitor::transition(
            &current,
            ConnectionEvent::ClientDisconnected,
        ));
        metrics().mqtt_connection_lost();

        info!(identity = %identity, "Left room");
        Ok(())
    }

    /// Get current connection state
    /// Returns None if `connect` has never been called
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.started
            .load(Ordering::Acquire)
            .then(|| self.state_rx.borrow().clone())
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        matches!(
            self.connection_state(),
            Some(ConnectionState::PermanentlyDisconnected(_))
        )
    }

    /// Check connection state before operations
    fn check_connection_state(&self) -> Result<(), MqttError> {
        let current_state = self
            .connection_state()
            .unwrap_or_else(|| ConnectionState::Disconnected("Never connected".to_string()));

        if !HealthMonitor::can_publish(&current_state) {
            return Err(MqttError::NotConnected {
                state: current_state,
            });
        }

        Ok(())
    }

    async fn send(&self, publish: OutboundPublish) -> Result<(), MqttError> {
        // Cloned so the lock is not held while the request channel is awaited
        let client = self
            .client
            .lock()
            .await
            .clone()
            .ok_or_else(|| MqttError::NotConnected {
                state: self.state_rx.borrow().clone(),
            })?;

        client
            .publish_with_properties(
                &self.room_topic,
                publish.qos,
                false,
                publish.payload,
                publish.properties,
            )
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))
    }

    /// Publish a chat message document to the room
    pub async fn publish_message(&self, sender: &str, text: &str) -> Result<(), MqttError> {
        self.check_connection_state()?;

        let publish = MessageHandler::build_message_publish(sender, text)?;
        match self.send(publish).await {
            Ok(()) => {
                metrics().mqtt_message_published();
                debug!(sender, chars = text.chars().count(), "Published chat message");
                Ok(())
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                error!("Failed to publish chat message: {}", e);
                Err(e)
            }
        }
    }

    /// Publish a typing signal; silently skipped while not connected
    pub async fn publish_typing(&self, sender: &str, is_typing: bool) -> Result<(), MqttError> {
        if let Err(e) = self.check_connection_state() {
            debug!("Skipping typing signal: {}", e);
            return Ok(());
        }

        let publish =
            MessageHandler::build_typing_publish(sender, is_typing, self.config.typing_signal)?;
        match self.send(publish).await {
            Ok(()) => {
                metrics().mqtt_typing_published();
                debug!(sender, is_typing, "Published typing signal");
                Ok(())
            }
            Err(e) => {
                metrics().mqtt_publish_failed();
                Err(e)
            }
        }
    }
}

/// Background task that owns the event loop for one connection
struct Supervisor {
    identity: String,
    config: BrokerSection,
    room_topic: String,
    reconnect_config: ReconnectConfig,
    client: SharedClient,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_rx: watch::Receiver<bool>,
    forwarder: SharedForwarder,
    decoder: MessageDecoder,
    reconnect_attempts: u32,
    /// Set on the first ConnAck; before that a failure ends the supervisor
    ever_connected: bool,
}

impl Supervisor {
    async fn run(mut self, mut event_loop: EventLoop) {
        info!("Starting room event loop");
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        Self::flush_disconnect(&mut event_loop).await;
                        break;
                    }
                }

                event_result = event_loop.poll() => {
                    let keep_running = match event_result {
                        Ok(event) => {
                            let route = MessageHandler::route_mqtt_event(&event);
                            self.process_event_route(route, &mut event_loop).await
                        }
                        Err(e) => self.handle_event_loop_error(e, &mut event_loop).await,
                    };
                    if !keep_running {
                        break;
                    }
                }
            }
        }

        info!("Room event loop stopped");
    }

    /// Give a queued Disconnect packet a chance to reach the broker
    async fn flush_disconnect(event_loop: &mut EventLoop) {
        let _ = tokio::time::timeout(DISCONNECT_FLUSH, async {
            while event_loop.poll().await.is_ok() {}
        })
        .await;
    }

    fn set_state(&self, event: ConnectionEvent) {
        let current = self.state_tx.borrow().clone();
        self.state_tx
            .send_replace(HealthMonitor::transition(&current, event));
    }

    /// Returns true to keep polling, false to stop the supervisor
    async fn process_event_route(&mut self, route: EventRoute, event_loop: &mut EventLoop) -> bool {
        match route {
            EventRoute::ConnectionAcknowledged => {
                self.set_state(ConnectionEvent::ConnAckReceived);
                self.reconnect_attempts = 0;
                self.ever_connected = true;
                metrics().mqtt_connection_established();
                self.subscribe_to_room().await;
                true
            }
            EventRoute::MessageReceived {
                topic,
                delivery,
                retain,
            } => {
                self.handle_delivery(&topic, delivery, retain).await;
                true
            }
            EventRoute::Disconnected => {
                metrics().mqtt_connection_lost();
                self.set_state(ConnectionEvent::DisconnectedByBroker);
                self.reconnect(event_loop).await
            }
            EventRoute::SubscriptionConfirmed {
                packet_id,
                return_codes,
            } => match MessageHandler::validate_subscription_success(&return_codes) {
                Ok(()) => {
                    debug!(packet_id, topic = %self.room_topic, "Room subscription confirmed");
                    true
                }
                Err(reason) => {
                    metrics().mqtt_connection_failed();
                    self.set_state(ConnectionEvent::PermanentFailure(reason));
                    false
                }
            },
            EventRoute::InfrastructureEvent(event) => {
                tracing::trace!(target: "mqtt_transport", "MQTT event: {}", event);
                true
            }
            EventRoute::OutgoingEvent => true,
        }
    }

    async fn handle_event_loop_error(
        &mut self,
        error: rumqttc::v5::ConnectionError,
        event_loop: &mut EventLoop,
    ) -> bool {
        metrics().mqtt_connection_lost();
        self.set_state(ConnectionEvent::NetworkError(error.to_string()));

        // The initial connect reports its own failure instead of retrying
        if !self.ever_connected {
            return false;
        }
        self.reconnect(event_loop).await
    }

    /// Subscribe on the current client
    ///
    /// Uses `try_subscribe`: the event loop is not polled while this runs, so
    /// awaiting a full request channel would never complete.
    async fn subscribe_to_room(&self) {
        let client_guard = self.client.lock().await;
        let Some(client) = client_guard.as_ref() else {
            return;
        };

        match client.try_subscribe(&self.room_topic, QoS::AtLeastOnce) {
            Ok(()) => debug!(topic = %self.room_topic, "Subscribing to room"),
            Err(e) => error!("Failed to subscribe to {}: {}", self.room_topic, e),
        }
    }

    /// Decode one delivery and hand any event to the session
    async fn handle_delivery(&self, topic: &str, delivery: InboundDelivery, retain: bool) {
        if !MessageHandler::should_process_message(topic, retain, &self.room_topic) {
            return;
        }

        metrics().delivery_received();
        let outcome = {
            let _span = crate::decode_span!(
                bytes = delivery.payload.len(),
                headers = delivery.headers.len()
            )
            .entered();
            self.decoder.classify(&delivery)
        };
        metrics().record_decode(&outcome);

        let Some(event) = outcome.into_event() else {
            return;
        };

        // Cloned out so no lock is held across the send
        let forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Err(e) = forwarder.forward(event).await {
            warn!("Failed to forward decoded event: {}", e);
        }
    }

    /// Perform interruptible sleep with shutdown monitoring
    /// Returns true if sleep completed, false if shutdown requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => {
                let shutdown = changed.is_err() || *shutdown_rx.borrow();
                if shutdown {
                    info!("Shutdown signal received during reconnection delay, stopping");
                }
                !shutdown
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Replace the client and event loop with a fresh connection
    ///
    /// A new client id and clean session each time, so the room subscription
    /// is re-established on the next ConnAck.
    async fn apply_new_connection(&self, event_loop: &mut EventLoop) -> bool {
        match configure_mqtt_options(&self.identity, &self.config) {
            Ok(mqtt_options) => {
                let (new_client, new_event_loop) =
                    AsyncClient::new(mqtt_options, REQUEST_CHANNEL_CAPACITY);
                *event_loop = new_event_loop;
                *self.client.lock().await = Some(new_client);
                debug!("Created new connection for reconnection attempt");
                true
            }
            Err(e) => {
                error!("Failed to create new connection: {}", e);
                true
            }
        }
    }

    async fn reconnect(&mut self, event_loop: &mut EventLoop) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.reconnect_config,
            *self.shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                self.reconnect_attempts = attempt;
                self.set_state(ConnectionEvent::ReconnectionStarted(attempt));

                let max_display = self
                    .reconnect_config
                    .max_attempts
                    .map_or("∞".to_string(), |max| max.to_string());
                debug!(
                    "Attempting reconnection {}/{} after {}ms delay",
                    attempt, max_display, delay_ms
                );

                if !Self::interruptible_sleep(self.shutdown_rx.clone(), delay_ms).await {
                    return false;
                }

                if *self.shutdown_rx.borrow() {
                    return false;
                }

                metrics().mqtt_connection_attempt();
                self.apply_new_connection(event_loop).await
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!(
                    "Max reconnection attempts ({}) exceeded",
                    self.reconnect_attempts
                );
                metrics().mqtt_connection_failed();
                self.set_state(ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&self, identity: &str) -> Result<(), Self::Error> {
        MqttClient::connect(self, identity).await
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish_message(&self, sender: &str, text: &str) -> Result<(), Self::Error> {
        MqttClient::publish_message(self, sender, text).await
    }

    async fn publish_typing(&self, sender: &str, is_typing: bool) -> Result<(), Self::Error> {
        MqttClient::publish_typing(self, sender, is_typing).await
    }

    fn is_connected(&self) -> bool {
        MqttClient::is_connected(self)
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    fn is_permanently_disconnected(&self) -> bool {
        MqttClient::is_permanently_disconnected(self)
    }

    fn set_event_senders(
        &self,
        messages: mpsc::Sender<IncomingMessage>,
        typing: mpsc::Sender<TypingSignal>,
    ) {
        MqttClient::set_event_senders(self, messages, typing)
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // No async here; callers wanting a clean leave call disconnect() first
        if let Some(active) = self.active.get_mut().take() {
            let _ = active.shutdown_tx.send(true);
            active.event_loop_handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TypingSignalMode;
    use crate::protocol::{
        typing_headers, ChatEnvelope, HEADER_IS_TYPING, HEADER_MSG_TYPE, HEADER_SENDER,
    };
    use tokio::time::Duration;

    fn test_broker_config(broker_url: &str) -> BrokerSection {
        BrokerSection {
            broker_url: broker_url.to_string(),
            exchange: "test_room".to_string(),
            username_env: None,
            password_env: None,
            typing_signal: TypingSignalMode::Headers,
            max_reconnect_attempts: Some(2),
        }
    }

    fn test_supervisor(identity: &str) -> (Supervisor, SharedForwarder) {
        let forwarder: SharedForwarder = Arc::new(std::sync::Mutex::new(MessageForwarder::new()));
        let (state_tx, _) = watch::channel(ConnectionState::Connected);
        let (_, shutdown_rx) = watch::channel(false);
        let config = test_broker_config("mqtt://localhost:1883");

        let supervisor = Supervisor {
            identity: identity.to_string(),
            room_topic: TopicBuilder::room_topic(&config.exchange),
            reconnect_config: ReconnectConfig::from_broker(&config),
            config,
            client: Arc::new(Mutex::new(None)),
            state_tx: Arc::new(state_tx),
            shutdown_rx,
            forwarder: forwarder.clone(),
            decoder: MessageDecoder::new(identity),
            reconnect_attempts: 0,
            ever_connected: true,
        };
        (supervisor, forwarder)
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Reconnecting(1));
            let _ = state_tx.send(ConnectionState::Connected);
            tokio::time::sleep(Duration::from_millis(100)).await;
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.is_ok(), "Should successfully wait for connection");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_already_connected() {
        let (_state_tx, state_rx) = watch::channel(ConnectionState::Connected);

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(50)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(10)).await;
        drop(state_tx);

        let err_msg = result.unwrap_err().to_string();
        assert!(
            err_msg.contains("ConnAck"),
            "Error should mention ConnAck, got: {err_msg}"
        );
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("Test disconnect".to_string()));
        });

        let result =
            MqttClient::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.unwrap_err().to_string().contains("Test disconnect"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        assert!(Supervisor::interruptible_sleep(shutdown_rx, 10).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        assert!(!Supervisor::interruptible_sleep(shutdown_rx, 1_000).await);
    }

    #[test]
    fn test_new_rejects_invalid_configuration() {
        assert!(matches!(
            MqttClient::new(test_broker_config("not a url")),
            Err(MqttError::InvalidBrokerUrl(_))
        ));

        let mut config = test_broker_config("mqtt://localhost:1883");
        config.exchange = "room/with/levels".to_string();
        assert!(matches!(
            MqttClient::new(config),
            Err(MqttError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_room_topic_from_exchange() {
        let client = MqttClient::new(test_broker_config("mqtt://localhost:1883")).unwrap();
        assert_eq!(client.room_topic(), "/relay/test_room");
    }

    #[tokio::test]
    async fn test_state_before_connect() {
        let client = MqttClient::new(test_broker_config("mqtt://localhost:1883")).unwrap();

        assert!(client.connection_state().is_none());
        assert!(!client.is_connected());
        assert!(!client.is_permanently_disconnected());
    }

    #[tokio::test]
    async fn test_publish_message_fails_without_connection() {
        let client = MqttClient::new(test_broker_config("mqtt://localhost:1883")).unwrap();

        let result = client.publish_message("Alice", "hello").await;
        assert!(matches!(result, Err(MqttError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_publish_typing_is_a_no_op_without_connection() {
        let client = MqttClient::new(test_broker_config("mqtt://localhost:1883")).unwrap();
        assert!(client.publish_typing("Alice", true).await.is_ok());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let client = MqttClient::new(test_broker_config("mqtt://localhost:1883")).unwrap();
        assert!(client.disconnect().await.is_ok());
        assert!(client.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_rejects_blank_identity() {
        let client = MqttClient::new(test_broker_config("mqtt://localhost:1883")).unwrap();
        assert!(matches!(
            client.connect("   ").await,
            Err(MqttError::InvalidConfig(_))
        ));
        assert!(client.connection_state().is_none());
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_broker_reports_error() {
        // Port 1 on loopback refuses connections immediately
        let mut config = test_broker_config("mqtt://127.0.0.1:1");
        config.max_reconnect_attempts = None;
        let client = MqttClient::new(config).unwrap();

        let result = client.connect("Alice").await;
        assert!(result.is_err());
        assert!(!client.is_connected());
        assert!(matches!(
            client.connection_state(),
            Some(ConnectionState::Disconnected(_))
        ));

        let publish = client.publish_message("Alice", "hello").await;
        assert!(matches!(publish, Err(MqttError::NotConnected { .. })));
    }

    #[tokio::test]
    async fn test_supervisor_forwards_decoded_messages() {
        let (supervisor, forwarder) = test_supervisor("Alice");
        let (message_tx, mut message_rx) = mpsc::channel(4);
        let (typing_tx, mut typing_rx) = mpsc::channel(4);
        forwarder.lock().unwrap().set_senders(message_tx, typing_tx);

        let body = serde_json::to_vec(&ChatEnvelope::new("Bob", "hola")).unwrap();
        supervisor
            .handle_delivery("/relay/test_room", InboundDelivery::new(body), false)
            .await;

        let typing = typing_headers("Bob", true).into_iter().fold(
            InboundDelivery::new(Vec::<u8>::new()),
            |delivery, (name, value)| delivery.with_header(name, value),
        );
        supervisor
            .handle_delivery("/relay/test_room", typing, false)
            .await;

        let message = message_rx.recv().await.unwrap();
        assert_eq!(message.sender, "Bob");
        assert_eq!(message.content, "hola");

        let signal = typing_rx.recv().await.unwrap();
        assert_eq!(signal.sender, "Bob");
        assert!(signal.is_typing);
    }

    #[tokio::test]
    async fn test_supervisor_drops_echo_retained_and_foreign_topics() {
        let (supervisor, forwarder) = test_supervisor("Alice");
        let (message_tx, mut message_rx) = mpsc::channel(4);
        let (typing_tx, mut typing_rx) = mpsc::channel(4);
        forwarder.lock().unwrap().set_senders(message_tx, typing_tx);

        let own = serde_json::to_vec(&ChatEnvelope::new("alice", "echo")).unwrap();
        supervisor
            .handle_delivery("/relay/test_room", InboundDelivery::new(own), false)
            .await;

        let own_typing = InboundDelivery::new(Vec::<u8>::new())
            .with_header(HEADER_MSG_TYPE, "typing")
            .with_header(HEADER_SENDER, "Alice")
            .with_header(HEADER_IS_TYPING, "true");
        supervisor
            .handle_delivery("/relay/test_room", own_typing, false)
            .await;

        supervisor
            .handle_delivery(
                "/relay/test_room",
                InboundDelivery::new("Bob: retained"),
                true,
            )
            .await;
        supervisor
            .handle_delivery(
                "/relay/other_room",
                InboundDelivery::new("Bob: elsewhere"),
                false,
            )
            .await;

        drop(supervisor);
        forwarder.lock().unwrap().set_senders(mpsc::channel(1).0, mpsc::channel(1).0);
        assert!(message_rx.recv().await.is_none());
        assert!(typing_rx.recv().await.is_none());
    }
}
