/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Error type returned by the HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::controller::ActivationError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing, malformed or out-of-range request parameters.
    #[error("{0}")]
    BadRequest(String),

    /// The channel already has an activation in flight.
    #[error("{0}")]
    Conflict(String),

    #[error("error: {0}")]
    Internal(String),
}

impl ApiError {
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ActivationError> for ApiError {
    fn from(err: ActivationError) -> Self {
        match err {
            ActivationError::ChannelBusy(_) => Self::Conflict(err.to_string()),
            ActivationError::InvalidDuration { .. } | ActivationError::UnknownChannel { .. } => {
                Self::BadRequest(err.to_string())
            }
            ActivationError::ShuttingDown => Self::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ChannelBusy;
    use crate::task::ChannelId;

    #[test]
    fn status_codes() {
        assert_eq!(
            ApiError::BadRequest("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn activation_errors_map_to_client_or_conflict() {
        let bad: ApiError = ActivationError::InvalidDuration { minutes: 0 }.into();
        assert_eq!(bad.status_code(), StatusCode::BAD_REQUEST);

        let unknown: ApiError = ActivationError::UnknownChannel {
            channel: ChannelId(3),
        }
        .into();
        assert_eq!(unknown.status_code(), StatusCode::BAD_REQUEST);

        let busy: ApiError = ActivationError::ChannelBusy(ChannelBusy {
            channel: ChannelId(7),
            existing_id: 1,
        })
        .into();
        assert_eq!(busy.status_code(), StatusCode::CONFLICT);

        let closing: ApiError = ActivationError::ShuttingDown.into();
        assert_eq!(closing.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
