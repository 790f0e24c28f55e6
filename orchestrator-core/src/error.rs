use thiserror::Error;

/// Library-level failures from the BPMN engine. Route handlers in
/// `orchestrator-server` map these onto the HTTP error taxonomy of the
/// spec (see `orchestrator_server::error::ApiError`).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid BPMN XML")]
    InvalidBpmnXml,

    #[error("BPMN validation failed")]
    InvalidBpmn(Vec<crate::bpmn::ValidationError>),

    #[error("workflow runtime error: {0}")]
    WorkflowRuntime(String),

    #[error("ScriptTask execution failed: name={name}, id={id}, {detail}")]
    ScriptTaskExecution {
        name: String,
        id: String,
        detail: String,
    },

    #[error("store error: {0}")]
    Store(String),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
