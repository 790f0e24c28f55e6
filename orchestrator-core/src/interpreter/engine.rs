//! The graph-walking advance loop: given a built `ProcessGraph` and a
//! mutable `EngineState`, run every ready, non-waiting task until
//! nothing more can progress without external input.
//!
//! This replaces a reflective dispatch over a general workflow engine
//! (probing each task's spec class for `run`/`complete`/`is_completed`
//! methods) with direct matches over the closed `TaskSpec` enum. The
//! waiting/user-facing/service-task classification this loop relies
//! on is carried on `TaskSpec` itself rather than recovered by name.

use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction::{Incoming, Outgoing};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{OrchestratorError, Result};
use crate::sandbox;

use super::graph::{build_process_graph, ProcessGraph};
use super::state::{EngineState, TaskState};
use super::task_spec::TaskSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Waiting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTaskSnapshot {
    pub task_id: String,
    pub name: String,
    pub task_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTaskSnapshot {
    pub task_id: String,
    pub name: String,
    pub task_type: String,
    pub element_id: String,
    pub element_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunResult {
    pub status: RunStatus,
    pub serialized_state: EngineState,
    pub waiting_user_tasks: Vec<UserTaskSnapshot>,
    pub waiting_service_tasks: Vec<ServiceTaskSnapshot>,
    pub error_message: Option<String>,
}

/// Starts a brand new workflow instance from BPMN XML and runs it to
/// its first waiting point (or completion, or failure).
pub fn start_workflow(bpmn_xml: &str, correlation_id: &str, business_key: &str) -> Result<WorkflowRunResult> {
    let graph = build_process_graph(bpmn_xml)?;
    let mut state = EngineState::default();
    attach_identifiers(&mut state, correlation_id, business_key);
    state.activate(graph.graph[graph.start_node].id());
    Ok(run_to_result(&graph, state))
}

/// Resumes a previously persisted instance, optionally completing a
/// ready task first, then runs it to its next waiting point.
pub fn resume_workflow(
    bpmn_xml: &str,
    serialized_state: EngineState,
    completed_task_id: Option<&str>,
    task_result: Option<Value>,
    correlation_id: &str,
    business_key: &str,
) -> Result<WorkflowRunResult> {
    let graph = build_process_graph(bpmn_xml)?;
    let mut state = serialized_state;
    attach_identifiers(&mut state, correlation_id, business_key);

    if let Some(task_id) = completed_task_id {
        if !state.tasks.get(task_id).is_some_and(|t| t.state == TaskState::Ready) {
            return Err(OrchestratorError::WorkflowRuntime(
                "Task not found in workflow state.".to_string(),
            ));
        }
        apply_task_result(&mut state, task_id, task_result);
        complete_and_advance(&graph, &mut state, task_id)
            .map_err(OrchestratorError::WorkflowRuntime)?;
    }

    Ok(run_to_result(&graph, state))
}

fn run_to_result(graph: &ProcessGraph, mut state: EngineState) -> WorkflowRunResult {
    let (status, error_message) = run_until_waiting(graph, &mut state);
    let (waiting_user_tasks, waiting_service_tasks) = if status == RunStatus::Failed {
        (Vec::new(), Vec::new())
    } else {
        (
            collect_waiting_user_tasks(graph, &state),
            collect_waiting_service_tasks(graph, &state),
        )
    };
    WorkflowRunResult {
        status,
        serialized_state: state,
        waiting_user_tasks,
        waiting_service_tasks,
        error_message,
    }
}

fn attach_identifiers(state: &mut EngineState, correlation_id: &str, business_key: &str) {
    if !correlation_id.is_empty() {
        state
            .data
            .insert("correlation_id".to_string(), Value::String(correlation_id.to_string()));
    }
    if !business_key.is_empty() {
        state
            .data
            .insert("business_key".to_string(), Value::String(business_key.to_string()));
    }
}

fn run_until_waiting(graph: &ProcessGraph, state: &mut EngineState) -> (RunStatus, Option<String>) {
    loop {
        let ready_ids = state.ready_task_ids();
        if ready_ids.is_empty() {
            break;
        }
        let mut progressed = false;
        for node_id in ready_ids {
            let Some(spec) = graph.node(&node_id) else { continue };
            if spec.is_waiting() {
                continue;
            }
            if let Err(detail) = run_task(graph, state, &node_id) {
                return (RunStatus::Failed, Some(detail));
            }
            progressed = true;
        }
        if !progressed {
            break;
        }
    }
    (determine_status(graph, state), None)
}

fn run_task(graph: &ProcessGraph, state: &mut EngineState, node_id: &str) -> std::result::Result<(), String> {
    let node_idx = *graph
        .node_by_id
        .get(node_id)
        .expect("ready task id always names a graph node");
    let spec = graph.graph[node_idx].clone();

    if let TaskSpec::ScriptTask { script, name, id } = &spec {
        let task_data = state
            .tasks
            .get(node_id)
            .map(|t| t.data.clone())
            .unwrap_or_default();
        let outcome = sandbox::run_script(script, &state.data, &task_data)
            .map_err(|detail| format_script_error(id, name, &detail))?;
        state.data = outcome.data;
        apply_task_result(state, node_id, outcome.result);
    }

    complete_and_advance(graph, state, node_id)
}

fn complete_and_advance(
    graph: &ProcessGraph,
    state: &mut EngineState,
    node_id: &str,
) -> std::result::Result<(), String> {
    if let Some(instance) = state.tasks.get_mut(node_id) {
        instance.state = TaskState::Completed;
    }
    let node_idx = *graph
        .node_by_id
        .get(node_id)
        .expect("node_id always names a graph node");
    fire_outgoing(graph, state, node_idx)
}

fn fire_outgoing(
    graph: &ProcessGraph,
    state: &mut EngineState,
    node_idx: NodeIndex,
) -> std::result::Result<(), String> {
    let spec = &graph.graph[node_idx];
    let node_id = spec.id().to_string();

    let mut out_edges: Vec<_> = graph
        .graph
        .edges_directed(node_idx, Outgoing)
        .map(|e| (e.target(), e.weight().clone()))
        .collect();
    out_edges.sort_by(|a, b| a.1.id.cmp(&b.1.id));

    let targets: Vec<NodeIndex> = match spec {
        TaskSpec::ExclusiveGateway { .. } => {
            let matched = out_edges
                .iter()
                .find(|(_, edge)| {
                    edge.condition
                        .as_ref()
                        .map(|cond| cond.evaluate(&state.data))
                        .unwrap_or(false)
                })
                .or_else(|| out_edges.iter().find(|(_, edge)| edge.condition.is_none()));
            match matched {
                Some((target, _)) => vec![*target],
                None => {
                    return Err(format!(
                        "no outgoing sequence flow condition satisfied for exclusiveGateway {node_id}"
                    ))
                }
            }
        }
        _ => out_edges.iter().map(|(target, _)| *target).collect(),
    };

    for target in targets {
        deliver_token(graph, state, target, &node_id);
    }
    Ok(())
}

fn deliver_token(graph: &ProcessGraph, state: &mut EngineState, target_idx: NodeIndex, source_node_id: &str) {
    let target_spec = &graph.graph[target_idx];
    let target_id = target_spec.id().to_string();
    let indegree = graph.graph.edges_directed(target_idx, Incoming).count();
    let is_parallel_join = matches!(target_spec, TaskSpec::ParallelGateway { .. }) && indegree > 1;

    if is_parallel_join {
        let arrived = state.join_progress.entry(target_id.clone()).or_default();
        arrived.insert(source_node_id.to_string());
        if arrived.len() >= indegree {
            state.join_progress.remove(&target_id);
            state.activate(&target_id);
        }
    } else {
        state.activate(&target_id);
    }
}

fn apply_task_result(state: &mut EngineState, node_id: &str, task_result: Option<Value>) {
    let Some(task_result) = task_result else { return };
    let result_payload = match task_result {
        Value::Object(map) => map,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };

    if let Some(instance) = state.tasks.get_mut(node_id) {
        for (key, value) in result_payload.clone() {
            instance.data.insert(key, value);
        }
    }

    let service_results = state
        .data
        .entry("service_task_results".to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if let Value::Object(map) = service_results {
        map.insert(node_id.to_string(), Value::Object(result_payload));
    }
}

fn format_script_error(id: &str, name: &str, detail: &str) -> String {
    let mut rest = Vec::new();
    if !name.is_empty() {
        rest.push(format!("name={name}"));
    }
    if !id.is_empty() {
        rest.push(format!("id={id}"));
    }
    if !detail.is_empty() {
        rest.push(detail.to_string());
    }
    format!("ScriptTask execution failed: {}", rest.join(", "))
}

fn determine_status(graph: &ProcessGraph, state: &EngineState) -> RunStatus {
    let ready = state.ready_task_ids();
    let has_waiting = ready
        .iter()
        .any(|id| graph.node(id).map(|spec| spec.is_waiting()).unwrap_or(false));
    if has_waiting {
        RunStatus::Waiting
    } else if ready.is_empty() {
        RunStatus::Completed
    } else {
        RunStatus::Running
    }
}

fn collect_waiting_user_tasks(graph: &ProcessGraph, state: &EngineState) -> Vec<UserTaskSnapshot> {
    state
        .ready_task_ids()
        .into_iter()
        .filter_map(|id| {
            let spec = graph.node(&id)?;
            if !spec.is_waiting() || !spec.is_user_facing() {
                return None;
            }
            Some(UserTaskSnapshot {
                task_id: id,
                name: spec.name().to_string(),
                task_type: spec.spec_type().to_string(),
            })
        })
        .collect()
}

fn collect_waiting_service_tasks(graph: &ProcessGraph, state: &EngineState) -> Vec<ServiceTaskSnapshot> {
    state
        .ready_task_ids()
        .into_iter()
        .filter_map(|id| {
            let spec = graph.node(&id)?;
            if !spec.is_waiting() || !spec.is_service_task() {
                return None;
            }
            Some(ServiceTaskSnapshot {
                task_id: id,
                name: spec.name().to_string(),
                task_type: spec.spec_type().to_string(),
                element_id: spec.id().to_string(),
                element_name: spec.name().to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NS: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";

    fn wrap(body: &str) -> String {
        format!(r#"<?xml version="1.0"?><definitions xmlns="{NS}"><process id="p1">{body}</process></definitions>"#)
    }

    #[test]
    fn straight_through_process_completes() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="t"/>
            <scriptTask id="t" name="Compute"><script>data.x = 1;</script></scriptTask>
            <sequenceFlow id="f2" sourceRef="t" targetRef="e"/>
            <endEvent id="e"/>"#,
        );
        let result = start_workflow(&xml, "", "").unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.serialized_state.data.get("x").unwrap(), &serde_json::json!(1));
    }

    #[test]
    fn user_task_parks_and_resumes() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="t"/>
            <userTask id="t" name="Review"/>
            <sequenceFlow id="f2" sourceRef="t" targetRef="e"/>
            <endEvent id="e"/>"#,
        );
        let result = start_workflow(&xml, "corr-1", "").unwrap();
        assert_eq!(result.status, RunStatus::Waiting);
        assert_eq!(result.waiting_user_tasks.len(), 1);
        assert_eq!(result.waiting_user_tasks[0].task_id, "t");

        let resumed = resume_workflow(
            &xml,
            result.serialized_state,
            Some("t"),
            Some(serde_json::json!({"approved": true})),
            "",
            "",
        )
        .unwrap();
        assert_eq!(resumed.status, RunStatus::Completed);
    }

    #[test]
    fn exclusive_gateway_picks_matching_branch() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="g"/>
            <exclusiveGateway id="g"/>
            <sequenceFlow id="f2" sourceRef="g" targetRef="approve"><conditionExpression>= approved == true</conditionExpression></sequenceFlow>
            <sequenceFlow id="f3" sourceRef="g" targetRef="reject"><conditionExpression>= approved == false</conditionExpression></sequenceFlow>
            <userTask id="approve" name="Approve"/>
            <userTask id="reject" name="Reject"/>"#,
        );
        let mut state = EngineState::default();
        state.data.insert("approved".to_string(), serde_json::json!(true));
        let graph = build_process_graph(&xml).unwrap();
        state.activate(graph.graph[graph.start_node].id());
        let result = run_to_result(&graph, state);
        assert_eq!(result.waiting_user_tasks.len(), 1);
        assert_eq!(result.waiting_user_tasks[0].task_id, "approve");
    }

    #[test]
    fn parallel_gateway_waits_for_all_branches() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="fork"/>
            <parallelGateway id="fork"/>
            <sequenceFlow id="f2" sourceRef="fork" targetRef="a"/>
            <sequenceFlow id="f3" sourceRef="fork" targetRef="b"/>
            <userTask id="a" name="A"/>
            <userTask id="b" name="B"/>
            <sequenceFlow id="f4" sourceRef="a" targetRef="join"/>
            <sequenceFlow id="f5" sourceRef="b" targetRef="join"/>
            <parallelGateway id="join"/>
            <sequenceFlow id="f6" sourceRef="join" targetRef="e"/>
            <endEvent id="e"/>"#,
        );
        let result = start_workflow(&xml, "", "").unwrap();
        assert_eq!(result.status, RunStatus::Waiting);
        assert_eq!(result.waiting_user_tasks.len(), 2);

        let resumed = resume_workflow(&xml, result.serialized_state, Some("a"), None, "", "").unwrap();
        assert_eq!(resumed.status, RunStatus::Waiting);
        assert_eq!(resumed.waiting_user_tasks.len(), 1);
        assert_eq!(resumed.waiting_user_tasks[0].task_id, "b");

        let done = resume_workflow(&xml, resumed.serialized_state, Some("b"), None, "", "").unwrap();
        assert_eq!(done.status, RunStatus::Completed);
    }

    #[test]
    fn script_failure_yields_failed_status_with_message() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="t"/>
            <scriptTask id="t" name="Boom"><script>data.x.y;</script></scriptTask>
            <sequenceFlow id="f2" sourceRef="t" targetRef="e"/>
            <endEvent id="e"/>"#,
        );
        let result = start_workflow(&xml, "", "").unwrap();
        assert_eq!(result.status, RunStatus::Failed);
        let message = result.error_message.unwrap();
        assert!(message.starts_with("ScriptTask execution failed: name=Boom, id=t"));
    }

    #[test]
    fn send_task_parks_but_is_never_surfaced() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="t"/>
            <sendTask id="t" name="Notify"/>
            <sequenceFlow id="f2" sourceRef="t" targetRef="e"/>
            <endEvent id="e"/>"#,
        );
        let result = start_workflow(&xml, "", "").unwrap();
        assert_eq!(result.status, RunStatus::Waiting);
        assert!(result.waiting_user_tasks.is_empty());
        assert!(result.waiting_service_tasks.is_empty());
    }
}
