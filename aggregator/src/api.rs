use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use aggregator_common::event::EventError;
use aggregator_common::queue::QueueError;
use aggregator_common::store::StoreError;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PublishResponse {
    pub accepted: usize,
    pub queued: usize,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LivenessResponse {
    pub ok: bool,
}

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error(transparent)]
    Event(#[from] EventError),

    #[error("service is shutting down, not accepting events")]
    QueueClosed,

    #[error("failed to read from the event store: {0}")]
    Store(#[from] StoreError),
}

impl From<QueueError> for AggregatorError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Closed => AggregatorError::QueueClosed,
        }
    }
}

impl AggregatorError {
    pub fn status(&self) -> StatusCode {
        match self {
            AggregatorError::Event(EventError::MalformedBody(_))
            | AggregatorError::Event(EventError::UnexpectedBodyType) => StatusCode::BAD_REQUEST,
            AggregatorError::Event(EventError::InvalidEvent { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AggregatorError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
            AggregatorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AggregatorError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
