//! The BPMN execution engine: builds a process graph from validated
//! XML, walks it to the next point external input is required, and
//! round-trips its state as plain JSON between calls.

pub mod condition;
pub mod engine;
pub mod graph;
pub mod state;
pub mod task_spec;

pub use engine::{
    resume_workflow, start_workflow, RunStatus, ServiceTaskSnapshot, UserTaskSnapshot,
    WorkflowRunResult,
};
pub use graph::{build_process_graph, ProcessGraph};
pub use state::{EngineState, TaskInstance, TaskState};
pub use task_spec::{SequenceFlowEdge, TaskSpec};
