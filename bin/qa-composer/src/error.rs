// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use llm_contracts::LLMError;
use pipeline::PipelineError;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::error;

use crate::store::StoreError;

/// JSON error body `{ok: false, error}` with the status kept out of the
/// payload.
#[derive(Debug, Serialize)]
pub struct ApiError {
    ok: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip)]
    status: StatusCode,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: error.into(),
            details: None,
            status,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn unauthorized(error: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error)
    }

    pub fn forbidden(error: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn unprocessable(error: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, error)
    }

    pub fn unavailable(error: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, error)
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<LLMError> for ApiError {
    fn from(e: LLMError) -> Self {
        let status = match &e {
            LLMError::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            LLMError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LLMError::Provider(_)
            | LLMError::Authentication(_)
            | LLMError::RateLimit
            | LLMError::Network(_)
            | LLMError::Serialisation(_)
            | LLMError::Timeout => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let message = e.to_string();
        match e {
            PipelineError::InvalidInput(_) => Self::bad_request(message),
            PipelineError::Completion(inner) => inner.into(),
            PipelineError::Parse(_) => Self::new(StatusCode::BAD_GATEWAY, message),
            PipelineError::Exhausted(exhausted) => Self::unprocessable(message).with_details(json!({
                "attempts": exhausted.attempts,
                "history": exhausted.history,
                "runs": exhausted.runs,
                "parameterization": exhausted.parameterization,
            })),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => Self::not_found(e.to_string()),
            StoreError::Invalid(_) => Self::bad_request(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = %self.status, error = %self.error, "request failed");
        }
        let status = self.status;
        let body = Json(self);
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let config: ApiError = LLMError::Configuration("no key".to_string()).into();
        assert_eq!(config.status(), StatusCode::SERVICE_UNAVAILABLE);

        let limited: ApiError = PipelineError::Completion(LLMError::RateLimit).into();
        assert_eq!(limited.status(), StatusCode::BAD_GATEWAY);

        let invalid: ApiError = PipelineError::InvalidInput("missing".to_string()).into();
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_body_shape() {
        let body = serde_json::to_value(ApiError::forbidden("Forbidden: domain not allowed")).unwrap();
        assert_eq!(body, json!({"ok": false, "error": "Forbidden: domain not allowed"}));
    }
}
