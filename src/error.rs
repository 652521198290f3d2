use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::{
    auth::AuthError,
    policy::AuthzError,
    repository::RepoError,
    storage::StorageError,
    upload::UploadError,
};

/// ApiError
///
/// The single boundary translator between component failures and HTTP responses.
/// Every handler and extractor returns this type; `IntoResponse` maps it to a status
/// code and a `{success: false, message, errors?}` body.
///
/// *Security*: variants carrying internal detail (`Upload`, `Internal`) log that
/// detail server-side and answer with a fixed, safe message.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {message}")]
    Validation { message: String, errors: Vec<String> },

    #[error("duplicate key: {field}")]
    DuplicateKey { field: String },

    #[error("unauthenticated: {message}")]
    Unauthenticated { message: String },

    #[error("forbidden: {message}")]
    Forbidden { message: String },

    #[error("not owner: {message}")]
    NotOwner { message: String },

    #[error("not found: {message}")]
    NotFound { message: String },

    #[error("rate limited")]
    RateLimited {
        message: String,
        retry_after: String,
        retry_after_secs: u64,
    },

    #[error("upload failed: {detail}")]
    Upload { detail: String },

    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors: Vec::new(),
        }
    }

    pub fn validation_with_errors(message: impl Into<String>, errors: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            errors,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } | ApiError::DuplicateKey { .. } => StatusCode::BAD_REQUEST,
            ApiError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden { .. } | ApiError::NotOwner { .. } => StatusCode::FORBIDDEN,
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upload { .. } | ApiError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The message shown to the client. Never includes upstream or internal detail.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Validation { message, .. }
            | ApiError::Unauthenticated { message }
            | ApiError::Forbidden { message }
            | ApiError::NotOwner { message }
            | ApiError::NotFound { message }
            | ApiError::RateLimited { message, .. } => message.clone(),
            ApiError::DuplicateKey { field } => format!("{} already exists", field),
            ApiError::Upload { .. } => "Image upload failed".to_string(),
            ApiError::Internal { .. } => "Internal Server Error".to_string(),
        }
    }
}

/// ErrorBody
///
/// Wire shape of every failed response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::debug!(error = %self, status = %status, "Request rejected");
        }

        let body = ErrorBody {
            success: false,
            message: self.public_message(),
            errors: match &self {
                ApiError::Validation { errors, .. } => errors.clone(),
                _ => Vec::new(),
            },
            retry_after: match &self {
                ApiError::RateLimited { retry_after, .. } => Some(retry_after.clone()),
                _ => None,
            },
        };

        let mut response = (status, Json(body)).into_response();

        if let ApiError::RateLimited {
            retry_after_secs, ..
        } = &self
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_secs));
        }

        response
    }
}

// --- Component error conversions ---

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken => ApiError::Unauthenticated {
                message: "Not authorized, no token provided".to_string(),
            },
            AuthError::TokenInvalid => ApiError::Unauthenticated {
                message: "Not authorized, invalid token".to_string(),
            },
            AuthError::TokenExpired => ApiError::Unauthenticated {
                message: "Not authorized, token expired".to_string(),
            },
            AuthError::UserNotFound => ApiError::Unauthenticated {
                message: "Not authorized, user not found".to_string(),
            },
            AuthError::InvalidCredentials => ApiError::Unauthenticated {
                message: "Invalid credentials".to_string(),
            },
            AuthError::DuplicateCredential => ApiError::DuplicateKey {
                field: "email".to_string(),
            },
            AuthError::Validation(errors) => {
                ApiError::validation_with_errors("Validation Error", errors)
            }
            AuthError::Hashing(detail) | AuthError::Signing(detail) => ApiError::Internal { detail },
            AuthError::Store(err) => ApiError::from(err),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::Unauthenticated => ApiError::Unauthenticated {
                message: "Not authorized to access this route".to_string(),
            },
            AuthzError::Forbidden { required } => ApiError::Forbidden {
                message: format!("Access denied. {} privileges required.", required.display_name()),
            },
            AuthzError::NotOwner => ApiError::NotOwner {
                message: "Not authorized to modify this post".to_string(),
            },
        }
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate { field } => ApiError::DuplicateKey { field },
            RepoError::Invalid(message) => {
                ApiError::validation_with_errors("Validation Error", vec![message])
            }
            RepoError::Database(detail) => ApiError::Internal { detail },
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        ApiError::Upload {
            detail: err.to_string(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::validation(format!("File upload error: {}", err))
    }
}
