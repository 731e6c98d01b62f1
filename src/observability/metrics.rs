//! Thread-safe metrics collection system
//!
//! Atomic counters for the ingest pipeline, the broker connection and the
//! auto-responder, plus a bounded window of reply latencies.

use crate::processing::{DecodeOutcome, DropReason};
use crate::protocol::DecodedEvent;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_REPLY_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Ingest pipeline
    deliveries_received: AtomicU64,
    messages_decoded: AtomicU64,
    typing_decoded: AtomicU64,
    deliveries_dropped: AtomicU64,
    self_echo_suppressed: AtomicU64,
    decode_fallbacks: AtomicU64,

    // Broker connection
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    messages_published: AtomicU64,
    typing_published: AtomicU64,
    publish_failures: AtomicU64,
    connection_start_time: AtomicU64,

    // Auto-responder
    replies_generated: AtomicU64,
    replies_skipped_busy: AtomicU64,
    llm_failures: AtomicU64,
    reply_times: Mutex<Vec<u64>>, // in milliseconds

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            deliveries_received: AtomicU64::new(0),
            messages_decoded: AtomicU64::new(0),
            typing_decoded: AtomicU64::new(0),
            deliveries_dropped: AtomicU64::new(0),
            self_echo_suppressed: AtomicU64::new(0),
            decode_fallbacks: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            messages_published: AtomicU64::new(0),
            typing_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            replies_generated: AtomicU64::new(0),
            replies_skipped_busy: AtomicU64::new(0),
            llm_failures: AtomicU64::new(0),
            reply_times: Mutex::new(Vec::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Ingest metrics
    pub fn delivery_received(&self) {
        self.deliveries_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one decoder outcome under the matching counters
    pub fn record_decode(&self, outcome: &DecodeOutcome) {
        match outcome {
            DecodeOutcome::Event(event) => self.record_event(event),
            DecodeOutcome::Recovered(event) => {
                self.decode_fallbacks.fetch_add(1, Ordering::Relaxed);
                self.record_event(event);
            }
            DecodeOutcome::Dropped(reason) => {
                self.deliveries_dropped.fetch_add(1, Ordering::Relaxed);
                if *reason == DropReason::SelfEcho {
                    self.self_echo_suppressed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn record_event(&self, event: &DecodedEvent) {
        match event {
            DecodedEvent::Message(_) => self.messages_decoded.fetch_add(1, Ordering::Relaxed),
            DecodedEvent::Typing(_) => self.typing_decoded.fetch_add(1, Ordering::Relaxed),
        };
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connection_lost();
    }

    pub fn mqtt_connection_lost(&self) {
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_message_published(&self) {
        self.messages_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_typing_published(&self) {
        self.typing_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.mqtt_connected.load(Ordering::Relaxed)
    }

    // Reply metrics
    pub fn reply_generated(&self, duration: Duration) {
        self.replies_generated.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut times) = self.reply_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_REPLY_SAMPLES {
                times.remove(0);
            }
        }
    }

    pub fn reply_skipped_busy(&self) {
        self.replies_skipped_busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn llm_failed(&self) {
        self.llm_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.deliveries_received,
            &self.messages_decoded,
            &self.typing_decoded,
            &self.deliveries_dropped,
            &self.self_echo_suppressed,
            &self.decode_fallbacks,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.messages_published,
            &self.typing_published,
            &self.publish_failures,
            &self.connection_start_time,
            &self.replies_generated,
            &self.replies_skipped_busy,
            &self.llm_failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut times) = self.reply_times.lock() {
            times.clear();
        }
    }

    /// Average, p50 and p95 of the recorded reply latencies (pure function)
    fn calculate_reply_time_statistics(&self) -> (f64, f64, f64) {
        let Ok(times) = self.reply_times.lock() else {
            return (0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
        )
    }

    /// Calculate connection duration (pure function)
    fn calculate_connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start_time = self.connection_start_time.load(Ordering::Relaxed);
        if start_time > 0 {
            now.saturating_sub(start_time)
        } else {
            0
        }
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_reply_time_ms, reply_time_p50_ms, reply_time_p95_ms) =
            self.calculate_reply_time_statistics();

        MetricsSnapshot {
            ingest: IngestMetrics {
                deliveries_received: self.deliveries_received.load(Ordering::Relaxed),
                messages_decoded: self.messages_decoded.load(Ordering::Relaxed),
                typing_decoded: self.typing_decoded.load(Ordering::Relaxed),
                deliveries_dropped: self.deliveries_dropped.load(Ordering::Relaxed),
                self_echo_suppressed: self.self_echo_suppressed.load(Ordering::Relaxed),
                decode_fallbacks: self.decode_fallbacks.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                messages_published: self.messages_published.load(Ordering::Relaxed),
                typing_published: self.typing_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                connection_duration_seconds: self.calculate_connection_duration(now),
            },
            replies: ReplyMetrics {
                replies_generated: self.replies_generated.load(Ordering::Relaxed),
                replies_skipped_busy: self.replies_skipped_busy.load(Ordering::Relaxed),
                llm_failures: self.llm_failures.load(Ordering::Relaxed),
                avg_reply_time_ms,
                reply_time_p50_ms,
                reply_time_p95_ms,
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub ingest: IngestMetrics,
    pub mqtt: MqttMetrics,
    pub replies: ReplyMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct IngestMetrics {
    pub deliveries_received: u64,
    pub messages_decoded: u64,
    pub typing_decoded: u64,
    pub deliveries_dropped: u64,
    pub self_echo_suppressed: u64,
    pub decode_fallbacks: u64,
}

#[derive(Debug, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub messages_published: u64,
    pub typing_published: u64,
    pub publish_failures: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct ReplyMetrics {
    pub replies_generated: u64,
    pub replies_skipped_busy: u64,
    pub llm_failures: u64,
    pub avg_reply_time_ms: f64,
    pub reply_time_p50_ms: f64,
    pub reply_time_p95_ms: f64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;

        lower_value + (upper_value - lower_value) * index.fract()
    }
}
