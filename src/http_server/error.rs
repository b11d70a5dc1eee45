use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::ErrorBody;
use thiserror::Error;
use tracing::error;

use super::params::ParamError;
use crate::{remote::FetchError, store::StoreError};

/// Failure of a JSON endpoint. The body only ever carries the display string.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("sensor service unreachable")]
    Transport(#[source] reqwest::Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::NotFound(id) => ApiError::NotFound(format!("no data for sensor {id}")),
            FetchError::Malformed(detail) => {
                tracing::warn!(%detail, "discarding remote sensor payload");
                ApiError::NotFound("no usable data for this sensor".to_owned())
            }
            FetchError::Transport(e) => ApiError::Transport(e),
            FetchError::Store(e) => ApiError::Store(e),
        }
    }
}

impl From<ParamError> for ApiError {
    fn from(e: ParamError) -> Self {
        ApiError::Validation(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Store(e) => error!(error = ?e, "store failure"),
            ApiError::Transport(e) => error!(error = ?e, "remote sensor api failure"),
            _ => {}
        }

        (self.status(), Json(ErrorBody::new(self.to_string()))).into_response()
    }
}
