//! Store error types with HTTP status code mapping.
//!
//! [`StoreError`] is the central error type of the crate. Every storage,
//! aggregate and scheduler operation returns it; absence of a row is never
//! an error and is reported as `Ok(None)` / `Ok(false)` instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::error::ErrorKind;

use crate::domain::Snowflake;

/// Structured JSON error response body.
///
/// All admin error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "guild not registered: 1234"
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`StoreError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Which storage constraint rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    /// A `UNIQUE` or primary-key constraint.
    Unique,
    /// A foreign-key constraint.
    ForeignKey,
    /// A `NOT NULL` constraint.
    NotNull,
    /// A `CHECK` constraint.
    Check,
}

/// Error returned by persistence, aggregate and scheduler operations.
///
/// # Error Code Ranges
///
/// | Range     | Category              | HTTP Status               |
/// |-----------|-----------------------|---------------------------|
/// | 1000–1999 | Write rejected        | 409 Conflict / 400        |
/// | 2000–2999 | Not found             | 404 Not Found             |
/// | 3000–3999 | Store unavailable     | 500 / 503                 |
/// | 4000–4999 | Schema / programming  | 500 Internal Server Error |
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A write was rejected by a storage constraint. Never retried.
    #[error("{kind:?} constraint violated ({}): {message}", .constraint.as_deref().unwrap_or("unnamed"))]
    Constraint {
        /// Kind of constraint that fired.
        kind: ConstraintKind,
        /// Constraint name reported by the server, if any.
        constraint: Option<String>,
        /// Server message.
        message: String,
    },

    /// No pooled connection could be obtained, even after retrying.
    #[error("connection acquisition failed: {0}")]
    Acquisition(#[source] sqlx::Error),

    /// Creating a table failed for a reason other than "already exists".
    #[error("failed to create table {table}: {source}")]
    SchemaSetup {
        /// Table whose DDL failed.
        table: &'static str,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// An entity schema descriptor is incomplete or inconsistent.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// The entity type was never registered with the client.
    #[error("entity type for table {0} is not registered")]
    Unregistered(&'static str),

    /// A write carried a NULL in one of its primary-key columns.
    #[error("primary key of {table} is incomplete")]
    IncompleteKey {
        /// Table being written.
        table: &'static str,
    },

    /// No armed or persisted reminder has the given identifier.
    #[error("reminder not found: {0}")]
    ReminderNotFound(Snowflake),

    /// No aggregate is registered for the given guild.
    #[error("guild not registered: {0}")]
    GuildNotFound(Snowflake),

    /// An aggregate for the guild is already registered.
    #[error("guild already registered: {0}")]
    GuildExists(Snowflake),

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

impl StoreError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Constraint { .. } => 1001,
            Self::IncompleteKey { .. } => 1002,
            Self::GuildExists(_) => 1003,
            Self::ReminderNotFound(_) => 2001,
            Self::GuildNotFound(_) => 2002,
            Self::Database(_) => 3000,
            Self::Acquisition(_) => 3001,
            Self::SchemaSetup { .. } => 4001,
            Self::Schema(_) => 4002,
            Self::Unregistered(_) => 4003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Constraint { .. } | Self::GuildExists(_) => StatusCode::CONFLICT,
            Self::IncompleteKey { .. } => StatusCode::BAD_REQUEST,
            Self::ReminderNotFound(_) | Self::GuildNotFound(_) => StatusCode::NOT_FOUND,
            Self::Acquisition(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Database(_)
            | Self::SchemaSetup { .. }
            | Self::Schema(_)
            | Self::Unregistered(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns `true` for constraint violations of the given kind.
    #[must_use]
    pub fn is_constraint(&self, expected: ConstraintKind) -> bool {
        matches!(self, Self::Constraint { kind, .. } if *kind == expected)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let kind = match db.kind() {
                    ErrorKind::UniqueViolation => Some(ConstraintKind::Unique),
                    ErrorKind::ForeignKeyViolation => Some(ConstraintKind::ForeignKey),
                    ErrorKind::NotNullViolation => Some(ConstraintKind::NotNull),
                    ErrorKind::CheckViolation => Some(ConstraintKind::Check),
                    _ => None,
                };
                match kind {
                    Some(kind) => Self::Constraint {
                        kind,
                        constraint: db.constraint().map(str::to_owned),
                        message: db.message().to_owned(),
                    },
                    None => Self::Database(sqlx::Error::Database(db)),
                }
            }
            err @ (sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) => Self::Acquisition(err),
            other => Self::Database(other),
        }
    }
}

impl IntoResponse for StoreError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
