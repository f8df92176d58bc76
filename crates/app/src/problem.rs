use std::fmt::Display;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::Serialize;
use tracing::error;

use boss_core::ValidationError;
use boss_storage::{DirectoryError, LedgerError, TrackerError, WorkItemError};

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    /// 422 for a write rejected by a business rule.
    pub fn unprocessable<S: Into<String>>(problem_type: &'static str, detail: S) -> Self {
        counter!("http_validation_rejections_total", "type" => problem_type).increment(1);
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, problem_type, detail)
    }

    pub fn not_found<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", detail)
    }

    /// 409 for a delete that would orphan dependent records.
    pub fn delete_blocked<S: Into<String>>(detail: S) -> Self {
        Self::new(StatusCode::CONFLICT, "delete_blocked", detail)
    }

    pub fn internal(err: &dyn Display) -> Self {
        error!(stage = "app", error = %err, "request failed on storage");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal server error",
        )
    }

    #[cfg(test)]
    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<ValidationError> for ProblemResponse {
    fn from(err: ValidationError) -> Self {
        let problem_type = match err {
            ValidationError::InsufficientVacation { .. } => "insufficient_vacation",
            ValidationError::NoActiveQuarter => "no_active_quarter",
            _ => "validation_failed",
        };
        Self::unprocessable(problem_type, err.to_string())
    }
}

impl From<sqlx::Error> for ProblemResponse {
    fn from(err: sqlx::Error) -> Self {
        Self::internal(&err)
    }
}

impl From<DirectoryError> for ProblemResponse {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NotFound => Self::not_found(err.to_string()),
            DirectoryError::DuplicateCode(_) | DirectoryError::DuplicateUsername(_) => {
                Self::unprocessable("duplicate", err.to_string())
            }
            DirectoryError::StillReferenced => Self::delete_blocked(err.to_string()),
            DirectoryError::Database(err) => Self::internal(&err),
        }
    }
}

impl From<LedgerError> for ProblemResponse {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AbsenceNotFound
            | LedgerError::AbsenceTypeNotFound
            | LedgerError::VacationNotFound => Self::not_found(err.to_string()),
            LedgerError::DuplicateTypeCode(_) | LedgerError::DuplicateVacation { .. } => {
                Self::unprocessable("duplicate", err.to_string())
            }
            LedgerError::MissingReference => Self::unprocessable("unknown_reference", err.to_string()),
            LedgerError::TypeInUse => Self::delete_blocked(err.to_string()),
            LedgerError::Database(err) => Self::internal(&err),
        }
    }
}

impl From<TrackerError> for ProblemResponse {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::NotFound(_) => Self::not_found(err.to_string()),
            TrackerError::DuplicateQuarter { .. } | TrackerError::DuplicateSprint { .. } => {
                Self::unprocessable("duplicate", err.to_string())
            }
            TrackerError::MissingReference => Self::unprocessable("unknown_reference", err.to_string()),
            TrackerError::InUse(_) => Self::delete_blocked(err.to_string()),
            TrackerError::InvalidColumn(_) => Self::internal(&err),
            TrackerError::Database(err) => Self::internal(&err),
        }
    }
}

impl From<WorkItemError> for ProblemResponse {
    fn from(err: WorkItemError) -> Self {
        match err {
            WorkItemError::NotFound(_) => Self::not_found(err.to_string()),
            WorkItemError::MissingReference => {
                Self::unprocessable("unknown_reference", err.to_string())
            }
            WorkItemError::InvalidColumn(_) => Self::internal(&err),
            WorkItemError::Database(err) => Self::internal(&err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn renders_problem_json() {
        let response = ProblemResponse::from(ValidationError::EndBeforeStart).into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/problem+json"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["type"], "validation_failed");
        assert_eq!(json["title"], "Unprocessable Entity");
        assert_eq!(json["detail"], "end date must not be before the start date");
    }

    #[test]
    fn storage_errors_map_to_status_codes() {
        assert_eq!(
            ProblemResponse::from(DirectoryError::NotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ProblemResponse::from(TrackerError::DuplicateSprint { sprint_number: 2 }).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ProblemResponse::from(LedgerError::MissingReference).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ProblemResponse::from(sqlx::Error::RowNotFound).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn referenced_deletes_are_conflicts() {
        assert_eq!(
            ProblemResponse::from(TrackerError::InUse("quarter")).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ProblemResponse::from(LedgerError::TypeInUse).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ProblemResponse::from(DirectoryError::StillReferenced).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ProblemResponse::from(TrackerError::MissingReference).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
