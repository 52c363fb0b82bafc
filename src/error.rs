use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttendanceError {
    #[error("Already clocked in today")]
    AlreadyClockedIn,

    #[error("No open attendance record for today")]
    NoOpenRecord,

    #[error("No location sample available for a GPS punch")]
    LocationUnavailable,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ResponseError for AttendanceError {
    fn status_code(&self) -> StatusCode {
        match self {
            AttendanceError::AlreadyClockedIn
            | AttendanceError::NoOpenRecord
            | AttendanceError::LocationUnavailable => StatusCode::BAD_REQUEST,
            AttendanceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            AttendanceError::Database(e) => {
                tracing::error!(error = %e, "Attendance storage failure");
                HttpResponse::InternalServerError().json(json!({
                    "message": "Internal Server Error"
                }))
            }
            other => HttpResponse::build(other.status_code()).json(json!({
                "message": other.to_string()
            })),
        }
    }
}

#[derive(Debug, Error)]
pub enum AggregationError {
    /// A single source table could not be counted. Logged and folded as zero.
    #[error("table {table} unavailable: {source}")]
    TableUnavailable {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to write daily aggregate: {0}")]
    AggregateWrite(#[source] sqlx::Error),

    #[error("failed to encode per-form counts: {0}")]
    Serialize(#[from] serde_json::Error),
}
