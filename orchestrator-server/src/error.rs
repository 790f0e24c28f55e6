//! Maps domain failures onto the HTTP error taxonomy: stable `code`
//! strings plus the status each one carries. Unexpected errors never
//! leak their detail to the client — they log at `error` and return a
//! generic 500 body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orchestrator_core::OrchestratorError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    InvalidBpmnXml,
    InvalidBpmn(Vec<orchestrator_core::bpmn::ValidationError>),
    MissingCatalogBinding,
    WorkflowRuntimeError(String),
    Conflict(String),
    NotFound,
    Unauthorized(String),
    BadRequest(String),
    Internal(String),
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::InvalidBpmnXml => ApiError::InvalidBpmnXml,
            OrchestratorError::InvalidBpmn(errors) => {
                if let [single] = errors.as_slice() {
                    if single.code == "invalid_bpmn_xml" {
                        return ApiError::InvalidBpmnXml;
                    }
                }
                ApiError::InvalidBpmn(errors)
            }
            OrchestratorError::WorkflowRuntime(msg) => ApiError::WorkflowRuntimeError(msg),
            OrchestratorError::ScriptTaskExecution { .. } => {
                ApiError::WorkflowRuntimeError(e.to_string())
            }
            OrchestratorError::Store(msg) => ApiError::Internal(msg),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::InvalidBpmnXml => (
                StatusCode::BAD_REQUEST,
                Json(json!({"code": "invalid_bpmn_xml", "message": "malformed BPMN XML"})),
            )
                .into_response(),
            ApiError::InvalidBpmn(errors) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"code": "invalid_bpmn", "errors": errors})),
            )
                .into_response(),
            ApiError::MissingCatalogBinding => (
                StatusCode::BAD_REQUEST,
                Json(json!({"code": "missing_catalog_binding"})),
            )
                .into_response(),
            ApiError::WorkflowRuntimeError(detail) => {
                tracing::error!(error = %detail, "workflow runtime error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"code": "workflow_runtime_error", "message": detail})),
                )
                    .into_response()
            }
            ApiError::Conflict(detail) => (
                StatusCode::CONFLICT,
                Json(json!({"detail": detail})),
            )
                .into_response(),
            ApiError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(json!({"detail": "Not found."})),
            )
                .into_response(),
            ApiError::Unauthorized(detail) => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"detail": detail})),
            )
                .into_response(),
            ApiError::BadRequest(detail) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"detail": detail})),
            )
                .into_response(),
            ApiError::Internal(detail) => {
                tracing::error!(error = %detail, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"detail": "Internal server error."})),
                )
                    .into_response()
            }
        }
    }
}
