use serde::{Deserialize, Serialize};

use super::condition::ConditionExpr;

/// One BPMN flow node, tagged with the classification the advance
/// loop needs to decide whether it runs itself or parks waiting for
/// external input. Replaces the duck-typed `task_spec.__class__.__name__`
/// sniffing of the process this engine grew out of with a concrete,
/// exhaustively-matched enum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskSpec {
    StartEvent {
        id: String,
    },
    EndEvent {
        id: String,
    },
    ExclusiveGateway {
        id: String,
        name: String,
    },
    ParallelGateway {
        id: String,
        name: String,
    },
    UserTask {
        id: String,
        name: String,
    },
    ServiceTask {
        id: String,
        name: String,
    },
    ScriptTask {
        id: String,
        name: String,
        script: String,
    },
    SendTask {
        id: String,
        name: String,
    },
}

impl TaskSpec {
    pub fn id(&self) -> &str {
        match self {
            TaskSpec::StartEvent { id }
            | TaskSpec::EndEvent { id }
            | TaskSpec::ExclusiveGateway { id, .. }
            | TaskSpec::ParallelGateway { id, .. }
            | TaskSpec::UserTask { id, .. }
            | TaskSpec::ServiceTask { id, .. }
            | TaskSpec::ScriptTask { id, .. }
            | TaskSpec::SendTask { id, .. } => id,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            TaskSpec::StartEvent { .. } | TaskSpec::EndEvent { .. } => "",
            TaskSpec::ExclusiveGateway { name, .. }
            | TaskSpec::ParallelGateway { name, .. }
            | TaskSpec::UserTask { name, .. }
            | TaskSpec::ServiceTask { name, .. }
            | TaskSpec::ScriptTask { name, .. }
            | TaskSpec::SendTask { name, .. } => name,
        }
    }

    /// The spec name as it would have been reported by a reflective
    /// `task_spec.__class__.__name__` lookup. Kept because the task
    /// snapshots surfaced to callers key off these exact strings.
    pub fn spec_type(&self) -> &'static str {
        match self {
            TaskSpec::StartEvent { .. } => "StartEvent",
            TaskSpec::EndEvent { .. } => "EndEvent",
            TaskSpec::ExclusiveGateway { .. } => "ExclusiveGateway",
            TaskSpec::ParallelGateway { .. } => "ParallelGateway",
            TaskSpec::UserTask { .. } => "UserTask",
            TaskSpec::ServiceTask { .. } => "ServiceTask",
            TaskSpec::ScriptTask { .. } => "ScriptTask",
            TaskSpec::SendTask { .. } => "SendTask",
        }
    }

    /// A ready task of this kind parks instead of auto-running.
    /// UserTask and ServiceTask are genuinely waiting on external
    /// input; SendTask parks too but is never surfaced to a caller
    /// (see `waiting_tasks::collect_service_tasks`) — a quirk carried
    /// forward unchanged rather than "fixed", since nothing in this
    /// engine ever resolves a parked SendTask from the outside either.
    pub fn is_waiting(&self) -> bool {
        matches!(
            self,
            TaskSpec::UserTask { .. } | TaskSpec::ServiceTask { .. } | TaskSpec::SendTask { .. }
        )
    }

    pub fn is_user_facing(&self) -> bool {
        matches!(self, TaskSpec::UserTask { .. })
    }

    pub fn is_service_task(&self) -> bool {
        matches!(self, TaskSpec::ServiceTask { .. })
    }

    pub fn is_script_task(&self) -> bool {
        matches!(self, TaskSpec::ScriptTask { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceFlowEdge {
    pub id: String,
    pub condition: Option<ConditionExpr>,
}
