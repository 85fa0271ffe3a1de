use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::ServerError;
use crate::ingest::{Gateway, IngestSnapshot, IngestStats};

/// Provider envelopes are small; anything larger is not ours.
const MAX_ENVELOPE_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub stats: Arc<IngestStats>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        let stats = gateway.stats();
        Self { gateway, stats }
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/ses", post(ses_notification))
        .layer(DefaultBodyLimit::max(MAX_ENVELOPE_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    ingest: IngestSnapshot,
}

#[derive(Serialize)]
struct AckResponse {
    status: &'static str,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        ingest: state.stats.snapshot(),
    })
}

/// Provider push endpoint.  Valid envelopes always get 200; processing
/// problems are logged by the gateway.
async fn ses_notification(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<AckResponse>, ServerError> {
    state.gateway.ingest(&body).await?;
    Ok(Json(AckResponse { status: "ok" }))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::provider::tests::FakeProvider;
    use crate::queue::SqliteQueue;
    use crate::store::tests::memory_store;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn router() -> Router {
        let store = memory_store();
        let queue = Arc::new(SqliteQueue::new(store.clone()));
        let gateway = Gateway::new(
            store,
            queue,
            Arc::new(FakeProvider::default()),
            [7u8; 32],
            5,
        );
        build_router(AppState::new(Arc::new(gateway)))
    }

    fn post(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhooks/ses")
            .header("content-type", "text/plain; charset=UTF-8")
            .body(body.into())
            .unwrap()
    }

    fn envelope(kind: &str, cert_url: &str) -> String {
        json!({
            "Type": kind,
            "MessageId": "env-1",
            "TopicArn": "arn:aws:sns:us-east-1:123:ses",
            "Message": json!({
                "notificationType": "Delivery",
                "mail": {"messageId": "never-sent"},
                "delivery": {"recipients": ["a@example.org"]}
            }).to_string(),
            "Timestamp": "2024-03-01T00:00:00.000Z",
            "SignatureVersion": "1",
            "Signature": "c2ln",
            "SigningCertURL": cert_url,
        })
        .to_string()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_valid_envelope_is_acknowledged() {
        let app = router();
        let response = app
            .clone()
            .oneshot(post(envelope(
                "Notification",
                "https://sns.us-east-1.amazonaws.com/cert.pem",
            )))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let health = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(health.status(), StatusCode::OK);
        let body = json_body(health).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ingest"]["received"], 1);
        assert_eq!(body["ingest"]["unknownMessage"], 1);
    }

    #[tokio::test]
    async fn test_invalid_envelopes_are_bad_requests() {
        let cases = [
            "{broken".to_string(),
            envelope("Notification", "https://example.com/cert.pem"),
            envelope("Notification", "http://sns.us-east-1.amazonaws.com/cert.pem"),
            envelope("Telegram", "https://sns.us-east-1.amazonaws.com/cert.pem"),
        ];
        for body in cases {
            let response = router().oneshot(post(body)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(json_body(response).await["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_non_post_is_method_not_allowed() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/webhooks/ses")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
