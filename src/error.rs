//! Application-level error type.
//!
//! Every handler returns `Result<_, AppError>`. Each variant knows its HTTP
//! status and the banner message shown to the user; details of internal
//! failures are logged and never sent to the client.

use crate::auth::AuthError;
use crate::checkout::CheckoutError;
use crate::payment::PaymentError;
use crate::store::StoreError;
use thiserror::Error;

const INTERNAL_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthenticated,

    /// Signed-out write from a page that names what needs a login.
    #[error("{0}")]
    LoginRequired(&'static str),

    #[error("Invalid webhook signature")]
    BadSignature,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// A third-party service failed; the message is safe to show.
    #[error("{0}")]
    Upstream(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<PaymentError> for AppError {
    fn from(e: PaymentError) -> Self {
        AppError::Checkout(CheckoutError::Payment(e))
    }
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation(message.into())
    }

    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Unauthenticated | AppError::LoginRequired(_) | AppError::BadSignature => 401,
            AppError::Forbidden(_) => 403,
            AppError::NotFound(_) => 404,
            AppError::Conflict(_) => 409,
            AppError::Upstream(_) => 502,
            AppError::Unavailable(_) => 503,
            AppError::Internal(_) => 500,
            AppError::Auth(e) => match e {
                AuthError::Validation(_) | AuthError::InvalidConfirmationCode => 400,
                AuthError::InvalidCredentials | AuthError::EmailNotConfirmed => 401,
                AuthError::EmailTaken | AuthError::EmployeeIdTaken => 409,
                AuthError::ConfirmationNotSent => 502,
                AuthError::Hashing => 500,
                AuthError::Store(e) => store_status(e),
            },
            AppError::Checkout(e) => match e {
                CheckoutError::Validation(_)
                | CheckoutError::InvalidOtp { .. }
                | CheckoutError::AttemptsExceeded => 400,
                CheckoutError::WrongStage { .. } => 409,
                CheckoutError::LineNotFound(_) | CheckoutError::UnknownProduct(_) => 404,
                CheckoutError::Payment(PaymentError::Declined(_)) => 402,
                CheckoutError::Payment(PaymentError::ChallengeExpired(_))
                | CheckoutError::Payment(PaymentError::UnknownReference(_)) => 400,
                CheckoutError::Payment(PaymentError::Delivery(_)) => 502,
                CheckoutError::OrderNotSaved(_) => 500,
            },
            AppError::Store(e) => store_status(e),
        }
    }

    /// Text for the error banner.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            AppError::Auth(AuthError::Hashing) => INTERNAL_MESSAGE.to_string(),
            AppError::Auth(AuthError::Store(e)) | AppError::Store(e) => store_message(e),
            AppError::Checkout(e) => match e {
                CheckoutError::WrongStage { .. } => {
                    "This step is not available right now.".to_string()
                }
                CheckoutError::LineNotFound(_) => "Cart item not found".to_string(),
                CheckoutError::UnknownProduct(_) => "Product not found".to_string(),
                CheckoutError::Payment(p) => p.user_message().to_string(),
                CheckoutError::OrderNotSaved(_) => {
                    "OTP verification failed. Please try again.".to_string()
                }
                other => other.to_string(),
            },
            other => other.to_string(),
        }
    }
}

fn store_status(e: &StoreError) -> u16 {
    match e {
        StoreError::DuplicateKey { .. } => 409,
        StoreError::NotFound { .. } => 404,
        _ => 500,
    }
}

fn store_message(e: &StoreError) -> String {
    match e {
        StoreError::DuplicateKey { .. } => "This record already exists.".to_string(),
        StoreError::NotFound { .. } => "Record not found".to_string(),
        _ => INTERNAL_MESSAGE.to_string(),
    }
}

#[cfg(feature = "web")]
impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            log::error!("{}", self);
        }
        let body = serde_json::json!({ "error": self.user_message() });
        (status, axum::Json(body)).into_response()
    }
}
