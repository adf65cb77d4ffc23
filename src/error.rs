use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::billing::LedgerError;
use crate::quiz::QuizError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Quiz(#[from] QuizError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status and stable machine-readable code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Quiz(err) => match err {
                QuizError::QuotaExhausted(_) => (StatusCode::PAYMENT_REQUIRED, "LIMIT_REACHED"),
                QuizError::EmptyQuestionSet => (StatusCode::CONFLICT, "NO_QUESTIONS"),
                QuizError::InvalidState(_) => (StatusCode::CONFLICT, "SESSION_FINISHED"),
                QuizError::QuestionMismatch { .. } => (StatusCode::CONFLICT, "QUESTION_MISMATCH"),
                QuizError::InvalidOption(_) => (StatusCode::BAD_REQUEST, "INVALID_OPTION"),
                QuizError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
                QuizError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
                QuizError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
            AppError::Ledger(err) => match err {
                LedgerError::VerificationRequired | LedgerError::VerificationFailed { .. } => {
                    (StatusCode::PAYMENT_REQUIRED, "PAYMENT_NOT_CONFIRMED")
                }
                LedgerError::VerificationTimeout(_) => {
                    (StatusCode::GATEWAY_TIMEOUT, "PAYMENT_PROVIDER_TIMEOUT")
                }
                LedgerError::CheckoutUnavailable { .. } => {
                    (StatusCode::BAD_GATEWAY, "CHECKOUT_UNAVAILABLE")
                }
                LedgerError::AccountMismatch => (StatusCode::FORBIDDEN, "PAYMENT_ACCOUNT_MISMATCH"),
                LedgerError::ReferenceConflict => (StatusCode::CONFLICT, "PAYMENT_REFERENCE_CONFLICT"),
                LedgerError::UnsupportedProvider(_) => {
                    (StatusCode::BAD_REQUEST, "UNSUPPORTED_PROVIDER")
                }
                LedgerError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
                LedgerError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
            AppError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            AppError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if matches!(self, AppError::Quiz(QuizError::QuotaExhausted(_))) {
            tracing::info!(code, error = %self, "request refused");
        } else if status.is_server_error() {
            tracing::error!(code, ?self);
        } else {
            tracing::warn!(code, error = %self, "request rejected");
        }
        // Store details stay in the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(json!({ "code": code, "message": message }))).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
