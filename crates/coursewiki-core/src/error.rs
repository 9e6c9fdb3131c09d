use thiserror::Error;

/// Failure taxonomy shared by every account and session operation.
///
/// Credential and token failures are terminal for the request; callers must
/// re-authenticate rather than retry.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        AuthError::Unauthorized(message.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        AuthError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AuthError::NotFound(message.into())
    }

    /// Short machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthorized(_) => "unauthorized",
            AuthError::BadRequest(_) => "bad_request",
            AuthError::Conflict(_) => "conflict",
            AuthError::NotFound(_) => "not_found",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

/// Errors surfaced by an [`AccountRepository`](crate::repository::AccountRepository).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Email is already registered")]
    EmailTaken,

    /// The account was modified by someone else since it was read.
    #[error("Account was modified concurrently")]
    StaleAccount,

    #[error("Account not found")]
    NotFound,

    #[error("Storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

impl From<RepositoryError> for AuthError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::EmailTaken => AuthError::Conflict(e.to_string()),
            RepositoryError::NotFound => AuthError::NotFound(e.to_string()),
            RepositoryError::StaleAccount => AuthError::Internal(anyhow::anyhow!(e)),
            RepositoryError::Backend(inner) => AuthError::Internal(inner),
        }
    }
}

/// Failures decoding a signed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Invalid token")]
    Invalid,

    #[error("Token has expired")]
    Expired,
}
