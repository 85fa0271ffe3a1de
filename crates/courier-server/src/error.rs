use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use uuid::Uuid;

use courier_net::NetError;
use courier_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Envelope problems the provider sees as a 400.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Invalid JSON: {0}")]
    MalformedJson(String),

    #[error("Invalid signing cert URL: {0}")]
    InvalidSigningCert(String),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Signature verification failed: {0}")]
    SignatureRejected(String),
}

impl From<IngestError> for ServerError {
    fn from(e: IngestError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The attempt failed below the retry ceiling; the queue should retry.
    #[error("Webhook {webhook_id} delivery failed (attempt {attempt}): {reason}")]
    Retryable {
        webhook_id: Uuid,
        attempt: u32,
        reason: String,
    },

    #[error("Request could not be built: {0}")]
    Request(String),
}

/// Failure of one scheduled task or job execution.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Invalid job payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("No handler for job kind {0}")]
    UnhandledKind(String),
}
