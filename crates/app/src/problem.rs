use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use policy_svc_core::ValidationError;
use serde::Serialize;
use tracing::error;

use crate::policy_service::PolicyServiceError;
use crate::product_service::ProductServiceError;

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

    fn internal<E: std::fmt::Display>(err: E) -> Self {
        error!(stage = "http", error = %err, "request failed with storage error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "an unexpected error occurred",
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

impl From<PolicyServiceError> for ProblemResponse {
    fn from(err: PolicyServiceError) -> Self {
        let detail = err.to_string();
        match err {
            PolicyServiceError::PolicyNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "policy_not_found", detail)
            }
            PolicyServiceError::CoverageNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "coverage_not_found", detail)
            }
            PolicyServiceError::BeneficiaryNotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, "beneficiary_not_found", detail)
            }
            PolicyServiceError::ProductNotFound(_) => {
                Self::new(StatusCode::BAD_REQUEST, "product_not_found", detail)
            }
            PolicyServiceError::CustomerNotFound(_) => {
                Self::new(StatusCode::BAD_REQUEST, "customer_not_found", detail)
            }
            PolicyServiceError::CustomerUnavailable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "customer_service_unavailable",
                detail,
            ),
            PolicyServiceError::DuplicatePolicyNumber(_) => {
                Self::new(StatusCode::CONFLICT, "duplicate_policy_number", detail)
            }
            PolicyServiceError::Validation(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_failed", detail)
            }
            PolicyServiceError::Storage(err) => Self::internal(err),
        }
    }
}

impl From<ProductServiceError> for ProblemResponse {
    fn from(err: ProductServiceError) -> Self {
        let detail = err.to_string();
        match err {
            ProductServiceError::NotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "product_not_found", detail)
            }
            ProductServiceError::DuplicateCode(_) => {
                Self::new(StatusCode::CONFLICT, "duplicate_product_code", detail)
            }
            ProductServiceError::Validation(_) => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "validation_failed", detail)
            }
            ProductServiceError::Storage(err) => Self::internal(err),
        }
    }
}

impl From<ValidationError> for ProblemResponse {
    fn from(err: ValidationError) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_failed",
            err.to_string(),
        )
    }
}

impl From<JsonRejection> for ProblemResponse {
    fn from(rejection: JsonRejection) -> Self {
        let status = match rejection.status() {
            StatusCode::UNSUPPORTED_MEDIA_TYPE => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            _ => StatusCode::UNPROCESSABLE_ENTITY,
        };
        Self::new(status, "invalid_body", rejection.body_text())
    }
}

impl From<QueryRejection> for ProblemResponse {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_query",
            rejection.body_text(),
        )
    }
}

impl From<PathRejection> for ProblemResponse {
    fn from(rejection: PathRejection) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invalid_path",
            rejection.body_text(),
        )
    }
}
