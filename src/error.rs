use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

/// Engine error taxonomy. The first three variants are expected, user-facing
/// outcomes and map to 4xx JSON responses, never to a generic error page.
/// Filter blocks and address denials are not errors at all; the submission
/// endpoints answer those with an `accepted: false` outcome body.
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("{0}")]
    Validation(String),
    #[error("a report for this content from this reporter already exists")]
    DuplicateReport,
    #[error("{0}")]
    RateLimited(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("this action requires moderator permissions")]
    Permission,
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl ModerationError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DuplicateReport => "duplicate",
            Self::RateLimited(_) => "rate_limited",
            Self::NotFound(_) => "not_found",
            Self::Permission => "permission",
            Self::Database(_) => "internal",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl ResponseError for ModerationError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::DuplicateReport => StatusCode::CONFLICT,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Permission => StatusCode::FORBIDDEN,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            // Do not leak driver detail to clients.
            Self::Database(err) => {
                log::error!("database error: {:?}", err);
                "internal error".to_owned()
            }
            other => other.to_string(),
        };
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.code(),
            message,
        })
    }
}

/// SeaORM 0.8 surfaces constraint failures as stringly errors, so the
/// unique-index race on report insertion is detected by message.
pub fn is_unique_violation(err: &DbErr) -> bool {
    let msg = err.to_string();
    msg.contains("duplicate key value violates unique constraint")
        || msg.contains("UNIQUE constraint failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_outcomes_map_to_4xx() {
        assert_eq!(
            ModerationError::validation("bad target").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ModerationError::DuplicateReport.status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ModerationError::RateLimited("quota exhausted".into()).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ModerationError::Permission.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ModerationError::NotFound("report").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn unique_violation_is_recognized() {
        let err = DbErr::Query(
            "error returned from database: duplicate key value violates unique constraint \
             \"idx_reports_reporter_target\""
                .to_owned(),
        );
        assert!(is_unique_violation(&err));

        let err = DbErr::Query("connection reset by peer".to_owned());
        assert!(!is_unique_violation(&err));
    }
}
