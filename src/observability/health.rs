//! Health check HTTP server
//!
//! Optional endpoint for watching a running client from outside:
//! `/health` reflects the room connection, `/metrics` dumps counters.

use crate::observability::metrics::metrics;
use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use warp::http::StatusCode;
use warp::Filter;

/// HTTP health check server
pub struct HealthServer {
    identity: String,
    port: u16,
    connected: Arc<AtomicBool>,
}

impl HealthServer {
    pub fn new(identity: impl Into<String>, port: u16) -> Self {
        Self {
            identity: identity.into(),
            port,
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Update room connection status
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// All routes, separated from `start` so they can be exercised in-process
    pub fn routes(
        self: &Arc<Self>,
    ) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let health_server = self.clone();

        // GET /health - 200 while joined to the room, 503 otherwise
        let health_route = warp::path("health")
            .and(warp::path::end())
            .and(warp::get())
            .and_then(move || {
                let server = health_server.clone();
                async move {
                    let status = server.health_status();
                    let code = if status.status == "healthy" {
                        StatusCode::OK
                    } else {
                        StatusCode::SERVICE_UNAVAILABLE
                    };
                    Ok::<_, Infallible>(warp::reply::with_status(
                        warp::reply::json(&status),
                        code,
                    ))
                }
            });

        // GET /metrics - complete metrics export
        let metrics_route = warp::path("metrics")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| warp::reply::json(&metrics().get_metrics()));

        // GET /live - process is up
        let live_route = warp::path("live")
            .and(warp::path::end())
            .and(warp::get())
            .map(|| {
                warp::reply::json(&LivenessResponse {
                    alive: true,
                    timestamp: current_timestamp(),
                })
            });

        health_route.or(metrics_route).or(live_route)
    }

    /// Serve until the task is dropped
    pub async fn start(self: Arc<Self>) {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        tracing::info!("Starting health server on port {}", self.port);
        warp::serve(self.routes()).run(addr).await;
    }

    fn health_status(&self) -> HealthStatus {
        let now = current_timestamp();
        let connected = self.is_connected();

        let room_check = if connected {
            HealthCheck {
                status: "healthy".to_string(),
                message: Some("Joined to room".to_string()),
                last_check: now,
            }
        } else {
            HealthCheck {
                status: "unhealthy".to_string(),
                message: Some("Not connected to the broker".to_string()),
                last_check: now,
            }
        };

        let mut checks = HashMap::new();
        checks.insert("room".to_string(), room_check);

        HealthStatus {
            status: if connected { "healthy" } else { "degraded" }.to_string(),
            timestamp: now,
            identity: self.identity.clone(),
            uptime_seconds: metrics().get_metrics().uptime_seconds,
            checks,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: Option<String>,
    pub last_check: u64,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: String,
    timestamp: u64,
    identity: String,
    uptime_seconds: u64,
    checks: HashMap<String, HealthCheck>,
}

#[derive(Debug, Serialize)]
struct LivenessResponse {
    alive: bool,
    timestamp: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
