//! HTTP handlers for the identify service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use identity_core::{ConsolidatedIdentity, ContactStore, Resolver};
use identity_telemetry::{MetricsRecorder, MetricsSnapshot};
use serde::Serialize;
use tracing::warn;

use crate::error::ApiError;
use crate::validate::{IdentifyRequest, INVALID_INPUT};

pub const REQUESTS_TOTAL: &str = "identify_requests_total";
pub const ERRORS_TOTAL: &str = "identify_errors_total";
pub const DURATION_MS: &str = "identify_duration_ms";
pub const IN_FLIGHT: &str = "identify_in_flight";

/// Shared state passed to every handler.
pub struct AppState<S> {
    pub resolver: Arc<Resolver<S>>,
    pub metrics: Arc<MetricsRecorder>,
    pub request_timeout: Duration,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            resolver: Arc::clone(&self.resolver),
            metrics: Arc::clone(&self.metrics),
            request_timeout: self.request_timeout,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IdentifyResponse {
    pub contact: ConsolidatedIdentity,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub timestamp: String,
}

/// Holds the in-flight gauge up for one request. Dropping it, including
/// when the client disconnects and the handler future is dropped, releases
/// the gauge and records the duration.
struct InFlight {
    metrics: Arc<MetricsRecorder>,
    started: Instant,
}

impl InFlight {
    fn start(metrics: &Arc<MetricsRecorder>) -> Self {
        metrics.gauge_add(IN_FLIGHT, &[], 1);
        Self {
            metrics: Arc::clone(metrics),
            started: Instant::now(),
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.metrics.gauge_add(IN_FLIGHT, &[], -1);
        self.metrics.histogram_observe(
            DURATION_MS,
            &[],
            self.started.elapsed().as_secs_f64() * 1000.0,
        );
    }
}

/// `POST /identify`
pub async fn identify<S: ContactStore + 'static>(
    State(state): State<AppState<S>>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let in_flight = InFlight::start(&state.metrics);
    let result = run_identify(&state, payload).await;
    drop(in_flight);

    match &result {
        Ok((_, outcome)) => {
            state.metrics.counter_inc(REQUESTS_TOTAL, &[("outcome", *outcome)], 1)
        }
        Err(e) => state.metrics.counter_inc(ERRORS_TOTAL, &[("kind", e.kind())], 1),
    }

    result.map(|(contact, _)| Json(IdentifyResponse { contact }))
}

async fn run_identify<S: ContactStore + 'static>(
    state: &AppState<S>,
    payload: Result<Json<IdentifyRequest>, JsonRejection>,
) -> Result<(ConsolidatedIdentity, &'static str), ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(error = %rejection, "rejected identify body");
        ApiError::BadRequest(INVALID_INPUT)
    })?;
    let observation = request.into_observation().map_err(ApiError::BadRequest)?;

    // Resolution takes blocking locks and runs SQLite I/O.
    let resolver = Arc::clone(&state.resolver);
    let mut task = tokio::task::spawn_blocking(move || resolver.resolve(&observation));

    // A started resolution cannot be cancelled, so the response always
    // reports what it did. Past the timeout it is only flagged as slow.
    let joined = match tokio::time::timeout(state.request_timeout, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            warn!(
                timeout_ms = state.request_timeout.as_millis() as u64,
                "identify exceeded request timeout; waiting for result"
            );
            task.await
        }
    };

    match joined {
        Ok(resolution) => {
            let resolution = resolution?;
            Ok((resolution.identity, resolution.outcome.label()))
        }
        Err(join_error) => Err(ApiError::Internal(join_error.to_string())),
    }
}

/// `GET /health` and `GET /identify/health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        message: "Identify service is running",
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// `GET /metrics`
pub async fn metrics<S: ContactStore + 'static>(
    State(state): State<AppState<S>>,
) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}
