use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A task instance's lifecycle has exactly two states: `Ready` covers
/// both "about to auto-run" and "parked waiting on external input" —
/// which one applies is a property of the node's `TaskSpec`, not of
/// the instance, matching how the process this engine grew out of
/// never gave a waiting task a state distinct from ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Ready,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInstance {
    pub node_id: String,
    pub state: TaskState,
    pub data: Map<String, Value>,
}

/// The full serializable state of one workflow instance: the shared
/// `data` map, one instance per activated flow node keyed by BPMN
/// element id, and in-flight parallel-gateway join progress. This is
/// what gets persisted as `engine_state` between `start`/`resume`
/// calls — the JSON equivalent of a serialized task tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineState {
    pub data: Map<String, Value>,
    pub tasks: BTreeMap<String, TaskInstance>,
    /// gateway node id -> set of source node ids that have delivered
    /// a token since the gateway last fired.
    pub join_progress: BTreeMap<String, BTreeSet<String>>,
}

impl EngineState {
    pub fn ready_task_ids(&self) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, t)| t.state == TaskState::Ready)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn activate(&mut self, node_id: &str) {
        self.tasks.insert(
            node_id.to_string(),
            TaskInstance {
                node_id: node_id.to_string(),
                state: TaskState::Ready,
                data: Map::new(),
            },
        );
    }
}
