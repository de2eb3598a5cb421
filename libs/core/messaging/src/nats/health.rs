//! Liveness, readiness and Prometheus endpoints for a JetStream worker.
//!
//! A broker outage makes the worker unready but keeps it alive, so the
//! orchestrator waits for the reconnect instead of restarting the pod. Only a
//! failing processor fails liveness. Once shutdown starts the worker reports
//! `draining` until the batch in hand is settled.

use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Overall worker condition, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Failed,
    Draining,
    Degraded,
    Ready,
}

/// Body returned by the probe endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: WorkerStatus,
    pub broker_connected: bool,
    pub processor_healthy: bool,
    pub in_flight: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Inner {
    broker_connected: AtomicBool,
    processor_healthy: AtomicBool,
    draining: AtomicBool,
    in_flight: AtomicUsize,
    last_error: RwLock<Option<String>>,
}

/// Worker health shared between the processing loop and the probe server.
#[derive(Debug, Clone)]
pub struct HealthState {
    inner: Arc<Inner>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            inner: Arc::new(Inner {
                broker_connected: AtomicBool::new(true),
                processor_healthy: AtomicBool::new(true),
                draining: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                last_error: RwLock::new(None),
            }),
        }
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of the last broker round trip.
    pub fn set_broker_connected(&self, connected: bool, error: Option<String>) {
        self.inner.broker_connected.store(connected, Ordering::Relaxed);
        *self
            .inner
            .last_error
            .write()
            .unwrap_or_else(PoisonError::into_inner) = error;
    }

    pub fn set_processor_healthy(&self, healthy: bool) {
        self.inner.processor_healthy.store(healthy, Ordering::Relaxed);
    }

    /// Stop reporting ready; in-flight work keeps running.
    pub fn begin_draining(&self) {
        self.inner.draining.store(true, Ordering::Relaxed);
    }

    /// Count a message as in flight until the returned guard is dropped.
    pub fn track_in_flight(&self) -> InFlight {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight {
            inner: self.inner.clone(),
        }
    }

    pub fn status(&self) -> WorkerStatus {
        let inner = &self.inner;
        if !inner.processor_healthy.load(Ordering::Relaxed) {
            WorkerStatus::Failed
        } else if inner.draining.load(Ordering::Relaxed) {
            WorkerStatus::Draining
        } else if !inner.broker_connected.load(Ordering::Relaxed) {
            WorkerStatus::Degraded
        } else {
            WorkerStatus::Ready
        }
    }

    pub fn report(&self) -> HealthReport {
        let inner = &self.inner;
        HealthReport {
            status: self.status(),
            broker_connected: inner.broker_connected.load(Ordering::Relaxed),
            processor_healthy: inner.processor_healthy.load(Ordering::Relaxed),
            in_flight: inner.in_flight.load(Ordering::Relaxed),
            last_error: inner
                .last_error
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }
}

/// Guard returned by [`HealthState::track_in_flight`].
#[derive(Debug)]
pub struct InFlight {
    inner: Arc<Inner>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

/// HTTP server exposing `/health`, `/healthz`, `/ready`, `/readyz` and,
/// when a Prometheus handle is attached, `/metrics`.
pub struct HealthServer {
    address: String,
    state: HealthState,
    metrics_handle: Option<PrometheusHandle>,
}

impl HealthServer {
    /// Create a server bound to `address` (`host:port`).
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            state: HealthState::new(),
            metrics_handle: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Handle the worker reports into.
    pub fn state(&self) -> HealthState {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        let probes = Router::new()
            .route("/health", get(liveness))
            .route("/healthz", get(liveness))
            .route("/ready", get(readiness))
            .route("/readyz", get(readiness))
            .with_state(self.state.clone());

        match self.metrics_handle.clone() {
            Some(handle) => probes.route("/metrics", get(move || async move { handle.render() })),
            None => probes,
        }
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(&self.address).await?;
        info!(addr = %self.address, "Health server listening");
        axum::serve(listener, router).await
    }
}

fn probe(report: HealthReport, ok: bool) -> (StatusCode, Json<HealthReport>) {
    let code = if ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

async fn liveness(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.report();
    let alive = report.status != WorkerStatus::Failed;
    probe(report, alive)
}

async fn readiness(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = state.report();
    let ready = report.status == WorkerStatus::Ready;
    probe(report, ready)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn serve(server: &HealthServer) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let router = server.router();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    #[test]
    fn test_broker_outage_degrades_but_stays_alive() {
        let state = HealthState::new();
        assert_eq!(state.status(), WorkerStatus::Ready);

        state.set_broker_connected(false, Some("fetch failed".to_string()));

        let report = state.report();
        assert_eq!(report.status, WorkerStatus::Degraded);
        assert_eq!(report.last_error.as_deref(), Some("fetch failed"));

        state.set_broker_connected(true, None);
        assert_eq!(state.status(), WorkerStatus::Ready);
        assert!(state.report().last_error.is_none());
    }

    #[test]
    fn test_failed_processor_outranks_draining() {
        let state = HealthState::new();
        state.begin_draining();
        assert_eq!(state.status(), WorkerStatus::Draining);

        state.set_processor_healthy(false);
        assert_eq!(state.status(), WorkerStatus::Failed);
    }

    #[test]
    fn test_in_flight_guard_counts_messages() {
        let state = HealthState::new();
        let first = state.track_in_flight();
        let second = state.track_in_flight();
        assert_eq!(state.report().in_flight, 2);

        drop(first);
        assert_eq!(state.report().in_flight, 1);
        drop(second);
        assert_eq!(state.report().in_flight, 0);
    }

    #[tokio::test]
    async fn test_draining_worker_is_alive_but_not_ready() {
        let server = HealthServer::new("127.0.0.1:0");
        let state = server.state();
        let base = serve(&server).await;
        let client = reqwest::Client::new();

        let ready = client.get(format!("{base}/readyz")).send().await.unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::OK);

        state.begin_draining();
        let _busy = state.track_in_flight();

        let live = client.get(format!("{base}/healthz")).send().await.unwrap();
        assert_eq!(live.status(), reqwest::StatusCode::OK);

        let ready = client.get(format!("{base}/ready")).send().await.unwrap();
        assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
        let body: serde_json::Value = ready.json().await.unwrap();
        assert_eq!(body["status"], "draining");
        assert_eq!(body["in_flight"], 1);
    }

    #[tokio::test]
    async fn test_metrics_route_only_with_handle() {
        let server = HealthServer::new("127.0.0.1:0");
        let base = serve(&server).await;

        let response = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }
}
