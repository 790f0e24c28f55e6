//! Builds an executable flow-node graph from validated BPMN XML.
//!
//! `subProcess` elements are flattened into the parent graph rather
//! than modeled as nested child workflows: sequence flows that target
//! the subprocess are rewired to its inner `startEvent`, and flows
//! that source from the subprocess are rewired to its inner
//! `endEvent`. The subprocess element itself never becomes a node.
//! This loses subprocess-local data scoping but keeps a single flat
//! token model, which is all `userTask`/`serviceTask`/`scriptTask`
//! nesting inside a subProcess actually needs here.

use std::collections::HashMap;

use petgraph::graph::{DiGraph, NodeIndex};

use crate::bpmn::tree::{parse_tree, Element};
use crate::error::{OrchestratorError, Result};

use super::condition::parse_condition;
use super::task_spec::{SequenceFlowEdge, TaskSpec};

const BPMN_MODEL_NS: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";

pub struct ProcessGraph {
    pub graph: DiGraph<TaskSpec, SequenceFlowEdge>,
    pub node_by_id: HashMap<String, NodeIndex>,
    pub start_node: NodeIndex,
}

impl ProcessGraph {
    pub fn node(&self, node_id: &str) -> Option<&TaskSpec> {
        self.node_by_id.get(node_id).map(|idx| &self.graph[*idx])
    }
}

struct RawFlow {
    id: String,
    source: String,
    target: String,
    condition_text: Option<String>,
}

pub fn build_process_graph(xml: &str) -> Result<ProcessGraph> {
    let root = parse_tree(xml).map_err(|()| OrchestratorError::InvalidBpmnXml)?;
    let process = find_process(&root).ok_or_else(|| {
        OrchestratorError::WorkflowRuntime("process element not found".to_string())
    })?;

    let mut graph = DiGraph::new();
    let mut node_by_id = HashMap::new();
    let mut alias_as_target = HashMap::new();
    let mut alias_as_source = HashMap::new();
    let mut raw_flows = Vec::new();

    collect_nodes(
        process,
        &mut graph,
        &mut node_by_id,
        &mut alias_as_target,
        &mut alias_as_source,
        &mut raw_flows,
    );

    for flow in raw_flows {
        let source_id = alias_as_source.get(&flow.source).cloned().unwrap_or(flow.source);
        let target_id = alias_as_target.get(&flow.target).cloned().unwrap_or(flow.target);
        let source_idx = *node_by_id.get(&source_id).ok_or_else(|| {
            OrchestratorError::WorkflowRuntime(format!(
                "sequenceFlow {} references unknown sourceRef {}",
                flow.id, source_id
            ))
        })?;
        let target_idx = *node_by_id.get(&target_id).ok_or_else(|| {
            OrchestratorError::WorkflowRuntime(format!(
                "sequenceFlow {} references unknown targetRef {}",
                flow.id, target_id
            ))
        })?;
        let condition = flow.condition_text.as_deref().and_then(parse_condition);
        graph.add_edge(
            source_idx,
            target_idx,
            SequenceFlowEdge {
                id: flow.id,
                condition,
            },
        );
    }

    let start_node = graph
        .node_indices()
        .find(|&idx| matches!(graph[idx], TaskSpec::StartEvent { .. }))
        .ok_or_else(|| OrchestratorError::WorkflowRuntime("process has no startEvent".to_string()))?;

    Ok(ProcessGraph {
        graph,
        node_by_id,
        start_node,
    })
}

fn find_process(root: &Element) -> Option<&Element> {
    let mut found: Option<&Element> = None;
    root.for_each(&mut |el| {
        if found.is_none() && el.namespace.as_deref() == Some(BPMN_MODEL_NS) && el.local == "process" {
            found = Some(el);
        }
    });
    found
}

fn collect_nodes(
    scope: &Element,
    graph: &mut DiGraph<TaskSpec, SequenceFlowEdge>,
    node_by_id: &mut HashMap<String, NodeIndex>,
    alias_as_target: &mut HashMap<String, String>,
    alias_as_source: &mut HashMap<String, String>,
    raw_flows: &mut Vec<RawFlow>,
) {
    for child in &scope.children {
        if child.namespace.as_deref() != Some(BPMN_MODEL_NS) {
            continue;
        }
        let id = child.attr("id").unwrap_or("").to_string();
        let name = child.attr("name").unwrap_or("").to_string();
        match child.local.as_str() {
            "startEvent" => add_node(graph, node_by_id, TaskSpec::StartEvent { id }),
            "endEvent" => add_node(graph, node_by_id, TaskSpec::EndEvent { id }),
            "exclusiveGateway" => add_node(graph, node_by_id, TaskSpec::ExclusiveGateway { id, name }),
            "parallelGateway" => add_node(graph, node_by_id, TaskSpec::ParallelGateway { id, name }),
            "userTask" => add_node(graph, node_by_id, TaskSpec::UserTask { id, name }),
            "serviceTask" => add_node(graph, node_by_id, TaskSpec::ServiceTask { id, name }),
            "sendTask" => add_node(graph, node_by_id, TaskSpec::SendTask { id, name }),
            "scriptTask" => {
                let script = child_text(child, "script").unwrap_or_default();
                add_node(graph, node_by_id, TaskSpec::ScriptTask { id, name, script });
            }
            "sequenceFlow" => {
                raw_flows.push(RawFlow {
                    id,
                    source: child.attr("sourceRef").unwrap_or("").to_string(),
                    target: child.attr("targetRef").unwrap_or("").to_string(),
                    condition_text: child_text(child, "conditionExpression"),
                });
            }
            "subProcess" => {
                let inner_start = child
                    .children
                    .iter()
                    .find(|c| c.namespace.as_deref() == Some(BPMN_MODEL_NS) && c.local == "startEvent")
                    .and_then(|c| c.attr("id"))
                    .map(str::to_string);
                let inner_end = child
                    .children
                    .iter()
                    .find(|c| c.namespace.as_deref() == Some(BPMN_MODEL_NS) && c.local == "endEvent")
                    .and_then(|c| c.attr("id"))
                    .map(str::to_string);
                if let Some(inner_start) = inner_start {
                    alias_as_target.insert(id.clone(), inner_start);
                }
                if let Some(inner_end) = inner_end {
                    alias_as_source.insert(id.clone(), inner_end);
                }
                collect_nodes(child, graph, node_by_id, alias_as_target, alias_as_source, raw_flows);
            }
            _ => {}
        }
    }
}

fn add_node(graph: &mut DiGraph<TaskSpec, SequenceFlowEdge>, node_by_id: &mut HashMap<String, NodeIndex>, spec: TaskSpec) {
    let id = spec.id().to_string();
    let idx = graph.add_node(spec);
    node_by_id.insert(id, idx);
}

fn child_text(el: &Element, local_name: &str) -> Option<String> {
    el.children
        .iter()
        .find(|c| c.namespace.as_deref() == Some(BPMN_MODEL_NS) && c.local == local_name)
        .map(|c| c.text.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(body: &str) -> String {
        format!(
            r#"<?xml version="1.0"?>
<definitions xmlns="{BPMN_MODEL_NS}"><process id="p1">{body}</process></definitions>"#
        )
    }

    #[test]
    fn builds_linear_graph() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="t"/>
            <userTask id="t" name="Review"/>
            <sequenceFlow id="f2" sourceRef="t" targetRef="e"/>
            <endEvent id="e"/>"#,
        );
        let pg = build_process_graph(&xml).unwrap();
        assert!(matches!(pg.graph[pg.start_node], TaskSpec::StartEvent { .. }));
        assert_eq!(pg.node_by_id.len(), 3);
    }

    #[test]
    fn flattens_subprocess() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="sub"/>
            <subProcess id="sub">
                <startEvent id="sub-s"/>
                <sequenceFlow id="sf1" sourceRef="sub-s" targetRef="sub-t"/>
                <scriptTask id="sub-t" name="Do thing"><script>data['x'] = 1</script></scriptTask>
                <sequenceFlow id="sf2" sourceRef="sub-t" targetRef="sub-e"/>
                <endEvent id="sub-e"/>
            </subProcess>
            <sequenceFlow id="f2" sourceRef="sub" targetRef="e"/>
            <endEvent id="e"/>"#,
        );
        let pg = build_process_graph(&xml).unwrap();
        assert!(pg.node_by_id.get("sub").is_none());
        assert!(pg.node_by_id.contains_key("sub-s"));
        assert!(pg.node_by_id.contains_key("sub-e"));
        let sub_e_idx = pg.node_by_id["sub-e"];
        assert_eq!(pg.graph.edges(sub_e_idx).count(), 1);
    }

    #[test]
    fn parses_script_text() {
        let xml = wrap(
            r#"<startEvent id="s"/>
            <sequenceFlow id="f1" sourceRef="s" targetRef="t"/>
            <scriptTask id="t" name="Compute"><script>result = data['a'] + 1</script></scriptTask>
            <sequenceFlow id="f2" sourceRef="t" targetRef="e"/>
            <endEvent id="e"/>"#,
        );
        let pg = build_process_graph(&xml).unwrap();
        match pg.node("t").unwrap() {
            TaskSpec::ScriptTask { script, .. } => assert!(script.contains("result =")),
            other => panic!("unexpected spec: {other:?}"),
        }
    }
}
