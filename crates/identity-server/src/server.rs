use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use identity_core::{ContactStore, Resolver};
use identity_telemetry::MetricsRecorder;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers::{self, AppState};

/// Build the Axum router with all routes.
pub fn build_router<S: ContactStore + 'static>(state: AppState<S>) -> Router {
    Router::new()
        .route("/identify", post(handlers::identify::<S>))
        .route("/identify/health", get(handlers::health))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics::<S>))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind `config.host:config.port` and serve in a background task.
pub async fn start<S: ContactStore + 'static>(
    config: ServerConfig,
    resolver: Arc<Resolver<S>>,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, std::io::Error> {
    let state = AppState {
        resolver,
        metrics,
        request_timeout: Duration::from_secs(config.request_timeout_secs),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        host = %config.host,
        port = local_addr.port(),
        "identify server started"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let shutdown = async {
            shutdown_rx.await.ok();
        };
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(error = %e, "identify server stopped with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        shutdown_tx: Some(shutdown_tx),
        server,
    })
}

/// Handle returned by `start()`; dropping it leaves the server running.
pub struct ServerHandle {
    pub port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop accepting connections and wait for in-flight requests.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.server).await {
            tracing::warn!(error = %e, "identify server task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use identity_core::memory::{MemoryOp, MemoryStore};
    use identity_core::{ContactTx, ResolveError};
    use tower::ServiceExt;

    /// Memory store whose atomic units stall before running.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    impl ContactStore for SlowStore {
        fn atomically<T>(
            &self,
            f: &mut dyn FnMut(&dyn ContactTx) -> Result<T, ResolveError>,
        ) -> Result<T, ResolveError> {
            std::thread::sleep(self.delay);
            self.inner.atomically(f)
        }
    }

    fn slow_state(delay: Duration, request_timeout: Duration) -> AppState<SlowStore> {
        AppState {
            resolver: Arc::new(Resolver::new(SlowStore {
                inner: MemoryStore::new(),
                delay,
            })),
            metrics: Arc::new(MetricsRecorder::new()),
            request_timeout,
        }
    }

    fn state() -> AppState<MemoryStore> {
        AppState {
            resolver: Arc::new(Resolver::new(MemoryStore::new())),
            metrics: Arc::new(MetricsRecorder::new()),
            request_timeout: Duration::from_secs(5),
        }
    }

    fn identify_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/identify")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn identify_creates_then_extends() {
        let state = state();
        let app = build_router(state.clone());

        let (status, body) = send(
            app.clone(),
            identify_request(r#"{"email":"lorraine@hillvalley.edu","phoneNumber":"123456"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let primary = body["contact"]["primaryId"].as_i64().unwrap();
        assert_eq!(body["contact"]["emails"], serde_json::json!(["lorraine@hillvalley.edu"]));
        assert_eq!(body["contact"]["secondaryIds"], serde_json::json!([]));

        let (status, body) = send(
            app,
            identify_request(r#"{"email":"mcfly@hillvalley.edu","phoneNumber":"123456"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["contact"]["primaryId"].as_i64(), Some(primary));
        assert_eq!(
            body["contact"]["emails"],
            serde_json::json!(["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"])
        );
        assert_eq!(body["contact"]["phones"], serde_json::json!(["123456"]));
        assert_eq!(body["contact"]["secondaryIds"].as_array().unwrap().len(), 1);

        let m = &state.metrics;
        assert_eq!(m.counter_get(handlers::REQUESTS_TOTAL, &[("outcome", "created_primary")]), 1);
        assert_eq!(m.counter_get(handlers::REQUESTS_TOTAL, &[("outcome", "created_secondary")]), 1);
        assert_eq!(m.histogram_summary(handlers::DURATION_MS, &[]).count, 2);
        assert_eq!(m.gauge_get(handlers::IN_FLIGHT, &[]), 0);
    }

    #[tokio::test]
    async fn identify_validation_errors() {
        let state = state();
        let app = build_router(state.clone());
        let cases = [
            (r#"{}"#, "Either email or phoneNumber must be provided"),
            (r#"{"email":null,"phoneNumber":""}"#, "Either email or phoneNumber must be provided"),
            (r#"{"email":"not-an-email"}"#, "Invalid email"),
            (r#"{"phoneNumber":"555-1234"}"#, "Invalid phoneNumber"),
            (r#"{"email": 42}"#, "Invalid input"),
            (r#"{"email":"#, "Invalid input"),
        ];
        for (body, message) in cases {
            let (status, json) = send(app.clone(), identify_request(body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
            assert_eq!(json["error"], message, "{body}");
            assert_eq!(json["kind"], "invalid_observation");
        }
        assert_eq!(
            state
                .metrics
                .counter_get(handlers::ERRORS_TOTAL, &[("kind", "invalid_observation")]),
            cases.len() as u64
        );
        assert!(state.resolver.store().is_empty());
    }

    #[tokio::test]
    async fn missing_content_type_is_invalid_input() {
        let app = build_router(state());
        let req = Request::builder()
            .method("POST")
            .uri("/identify")
            .body(Body::from(r#"{"email":"a@b.co"}"#))
            .unwrap();
        let (status, json) = send(app, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid input");
    }

    #[tokio::test]
    async fn store_failure_maps_to_503() {
        let state = state();
        state.resolver.store().fail_once(MemoryOp::FindByEmailOrPhone);
        let app = build_router(state.clone());

        let (status, json) = send(app, identify_request(r#"{"email":"a@b.co"}"#)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["kind"], "store_unavailable");
        assert_eq!(
            state.metrics.counter_get(handlers::ERRORS_TOTAL, &[("kind", "store_unavailable")]),
            1
        );
    }

    #[tokio::test]
    async fn slow_resolution_reports_what_committed() {
        let state = slow_state(Duration::from_millis(300), Duration::from_millis(100));
        let app = build_router(state.clone());

        let (status, json) = send(app, identify_request(r#"{"email":"slow@x.io"}"#)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["contact"]["emails"], serde_json::json!(["slow@x.io"]));
        assert_eq!(state.resolver.store().inner.len(), 1);

        let m = &state.metrics;
        assert_eq!(m.counter_get(handlers::REQUESTS_TOTAL, &[("outcome", "created_primary")]), 1);
        assert_eq!(m.counter_get(handlers::ERRORS_TOTAL, &[("kind", "store_unavailable")]), 0);
    }

    #[tokio::test]
    async fn dropped_request_releases_in_flight_gauge() {
        let state = slow_state(Duration::from_millis(300), Duration::from_secs(5));
        let app = build_router(state.clone());

        let req = identify_request(r#"{"email":"gone@x.io"}"#);
        let abandoned = tokio::time::timeout(Duration::from_millis(50), app.oneshot(req)).await;
        assert!(abandoned.is_err());

        let m = &state.metrics;
        assert_eq!(m.gauge_get(handlers::IN_FLIGHT, &[]), 0);
        assert_eq!(m.histogram_summary(handlers::DURATION_MS, &[]).count, 1);
    }

    #[tokio::test]
    async fn corrupt_graph_maps_to_500() {
        let state = state();
        let store = state.resolver.store();
        let p = store.seed_primary(Some("p@x.io"), None);
        let mut orphan = store.seed_secondary(Some("o@x.io"), None, p.id);
        orphan.linked_id = Some(identity_core::ContactId::new(999));
        store.put_raw(orphan);

        let (status, json) =
            send(build_router(state.clone()), identify_request(r#"{"email":"o@x.io"}"#)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["kind"], "invariant_violation");
    }

    #[tokio::test]
    async fn health_endpoints() {
        let app = build_router(state());
        for uri in ["/health", "/identify/health"] {
            let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
            let (status, json) = send(app.clone(), req).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["status"], "ok");
            assert!(json["message"].is_string());
            assert!(json["timestamp"].is_string());
        }
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_counters() {
        let state = state();
        let app = build_router(state.clone());
        send(app.clone(), identify_request(r#"{"phoneNumber":"1"}"#)).await;
        send(app.clone(), identify_request(r#"{"phoneNumber":"1"}"#)).await;

        let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
        let (status, json) = send(app, req).await;
        assert_eq!(status, StatusCode::OK);
        let counters = json["counters"].as_array().unwrap();
        let unchanged = counters
            .iter()
            .find(|c| c["labels"]["outcome"] == "unchanged")
            .unwrap();
        assert_eq!(unchanged["value"], 1);
        assert_eq!(json["histograms"][0]["value"]["count"], 2);
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let app = build_router(state());
        let req = Request::builder().uri("/nonexistent").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn server_starts_and_serves_identify() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        };
        let resolver = Arc::new(Resolver::new(identity_store::ContactRepo::new(
            identity_store::Database::in_memory().unwrap(),
        )));
        let handle = start(config, Arc::clone(&resolver), Arc::new(MetricsRecorder::new()))
            .await
            .unwrap();
        assert!(handle.port > 0);

        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{}/identify", handle.port);
        let resp = client
            .post(&url)
            .json(&serde_json::json!({ "email": "doc@hillvalley.edu", "phone": "1955" }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["contact"]["phones"], serde_json::json!(["1955"]));
        assert_eq!(resolver.store().count().unwrap(), 1);

        let health = reqwest::get(format!("http://127.0.0.1:{}/identify/health", handle.port))
            .await
            .unwrap();
        assert_eq!(health.status(), 200);

        drop(client);
        handle.shutdown().await;
    }
}
