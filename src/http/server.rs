//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router: every method and path goes to the broker,
//!   except `/favicon.ico`
//! - Wire up middleware (request id, body limit, tracing)
//! - Map broker outcomes to HTTP responses
//! - Drain on the shutdown broadcast

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::broker::MessageBroker;
use crate::config::ListenerConfig;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<MessageBroker>,
}

/// HTTP server in front of the broker.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &ListenerConfig, broker: Arc<MessageBroker>) -> Self {
        let router = Self::build_router(config, AppState { broker });
        Self { router }
    }

    fn build_router(config: &ListenerConfig, state: AppState) -> Router {
        Router::new()
            .route("/favicon.ico", any(|| async { StatusCode::NOT_FOUND }))
            .route("/{*path}", any(broker_handler))
            .route("/", any(broker_handler))
            .with_state(state)
            .layer(DefaultBodyLimit::max(config.max_body_bytes))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// The fully layered router, for tests and embedding.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until the shutdown broadcast fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> std::io::Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn broker_handler(State(state): State<AppState>, method: Method, uri: Uri, body: Bytes) -> Response {
    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let body = String::from_utf8_lossy(&body);

    match state.broker.send_and_wait(method.as_str(), path, &body).await {
        Ok(response) => {
            let status = u16::try_from(response.status_code)
                .ok()
                .and_then(|code| StatusCode::from_u16(code).ok())
                .unwrap_or_else(|| {
                    tracing::warn!(status = response.status_code, "Invalid status code from backend");
                    StatusCode::INTERNAL_SERVER_ERROR
                });
            (status, response.body).into_response()
        }
        Err(e) if e.is_timeout() => {
            tracing::warn!(method = %method, path = %path, "Gave up waiting for response");
            (StatusCode::GATEWAY_TIMEOUT, "Timed out waiting for response").into_response()
        }
        Err(e) => {
            tracing::error!(method = %method, path = %path, error = %e, "Broker error");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal broker error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::storage::MessageStorage;
    use crate::types::{BrokerError, BrokerResponse, BrokerResult, RequestRecord};
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Answers every request with a fixed outcome and remembers what it saw.
    struct FixedStorage {
        outcome: fn() -> BrokerResult<BrokerResponse>,
        seen: Mutex<Vec<RequestRecord>>,
    }

    #[async_trait]
    impl MessageStorage for FixedStorage {
        async fn write_request(&self, record: &RequestRecord) -> BrokerResult<()> {
            self.seen.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn wait_for_response(&self, _key: &str) -> BrokerResult<BrokerResponse> {
            (self.outcome)()
        }

        async fn clean_up(&self, _key: &str) {}
    }

    fn app(outcome: fn() -> BrokerResult<BrokerResponse>) -> (Router, Arc<FixedStorage>) {
        let storage = Arc::new(FixedStorage {
            outcome,
            seen: Mutex::new(Vec::new()),
        });
        let broker = Arc::new(MessageBroker::new(&CoordinatorConfig::default(), storage.clone()));
        let config = ListenerConfig {
            max_body_bytes: 16,
            ..ListenerConfig::default()
        };
        (HttpServer::new(&config, broker).router(), storage)
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_response_passed_through_verbatim() {
        let (app, storage) = app(|| Ok(BrokerResponse::new(201, r#"{"ok":true}"#)));

        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/orders/7?expand=1")
                    .body(Body::from("payload"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(body_text(response).await, r#"{"ok":true}"#);

        let seen = storage.seen.lock().unwrap();
        assert_eq!(seen[0].method, "PUT");
        assert_eq!(seen[0].path, "/orders/7?expand=1");
        assert_eq!(seen[0].body, "payload");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_gateway_timeout() {
        let (app, _) = app(|| Err(BrokerError::Timeout(Duration::from_secs(90))));
        let response = app
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_other_errors_map_to_internal_error() {
        let (app, _) = app(|| Err(BrokerError::Queue("gone".into())));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_invalid_status_maps_to_internal_error() {
        let (app, _) = app(|| Ok(BrokerResponse::new(42, "odd")));
        let response = app
            .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "odd");
    }

    #[tokio::test]
    async fn test_favicon_is_not_brokered() {
        let (app, storage) = app(|| Ok(BrokerResponse::new(200, "")));
        let response = app
            .oneshot(Request::builder().uri("/favicon.ico").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(storage.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let (app, storage) = app(|| Ok(BrokerResponse::new(200, "")));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/big")
                    .body(Body::from(vec![b'x'; 64]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(storage.seen.lock().unwrap().is_empty());
    }
}
