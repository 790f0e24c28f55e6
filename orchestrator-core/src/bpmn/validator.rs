use super::tree::{parse_tree, Element};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

const BPMN_MODEL_NS: &str = "http://www.omg.org/spec/BPMN/20100524/MODEL";
const BPMN_DI_NS: &str = "http://www.omg.org/spec/BPMN/20100524/DI";
const DI_NS: &str = "http://www.omg.org/spec/DD/20100524/DI";
const DC_NS: &str = "http://www.omg.org/spec/DD/20100524/DC";

const ALLOWED_NON_BPMN_NAMESPACES: &[&str] = &[BPMN_DI_NS, DI_NS, DC_NS];

const SUPPORTED_BPMN_ELEMENTS_V1: &[&str] = &[
    "definitions",
    "process",
    "startEvent",
    "endEvent",
    "sequenceFlow",
    "exclusiveGateway",
    "parallelGateway",
    "userTask",
    "serviceTask",
    "scriptTask",
    "sendTask",
    "subProcess",
    "incoming",
    "outgoing",
    "extensionElements",
    "documentation",
    "text",
    "conditionExpression",
    "script",
];

const UNSUPPORTED_BPMN_ELEMENT_MESSAGES: &[(&str, &str)] = &[
    ("boundaryEvent", "Boundary events are not supported."),
    ("timerEventDefinition", "Timer events are not supported."),
    ("messageEventDefinition", "Message events are not supported."),
    ("signalEventDefinition", "Signal events are not supported."),
    (
        "multiInstanceLoopCharacteristics",
        "Multi-instance is not supported.",
    ),
    (
        "compensateEventDefinition",
        "Compensation is not supported.",
    ),
];

const FORM_SCHEMA_ATTRIBUTE_NAMES: &[&str] =
    &["formKey", "formRef", "formId", "schemaRef", "schemaId"];
const CATALOG_BINDING_ATTRIBUTE_MARKERS: &[&str] = &["catalog", "capability", "binding"];

/// A single validation failure, addressed by a dotted path from the
/// document root. Paths for repeated sibling element types carry a
/// `[n]` index, e.g. `process.serviceTask[1]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValidationError {
    pub path: String,
    pub code: String,
    pub message: String,
}

impl ValidationError {
    fn new(path: impl Into<String>, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormSchemaRef {
    pub element_id: String,
    pub element_type: String,
    pub form_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogBindingPlaceholder {
    pub element_id: String,
    pub element_name: String,
    pub element_type: String,
    pub placeholders: HashMap<String, String>,
}

/// Everything the orchestrator needs from a validated definition
/// upload, beyond the raw XML: the process id/name to key the
/// definition on, plus hints for later catalog/form wiring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpmnDefinitionSnapshot {
    pub process_key: String,
    pub process_name: String,
    pub form_schema_refs: Vec<FormSchemaRef>,
    pub catalog_binding_placeholders: Vec<CatalogBindingPlaceholder>,
}

/// Parse and validate a BPMN 2.0 XML document against the supported
/// element subset, returning a snapshot of the single process it
/// defines on success or every validation error (sorted by
/// `(path, code, message)`) on failure.
pub fn validate_bpmn_xml(xml_text: &str) -> Result<BpmnDefinitionSnapshot, Vec<ValidationError>> {
    let root = match parse_tree(xml_text) {
        Ok(root) => root,
        Err(()) => {
            return Err(vec![ValidationError::new(
                "",
                "invalid_bpmn_xml",
                "Invalid BPMN XML.",
            )])
        }
    };

    let mut errors = Vec::new();

    let mut process_elements: Vec<&Element> = Vec::new();
    root.for_each(&mut |el| {
        if el.namespace.as_deref() == Some(BPMN_MODEL_NS) && el.local == "process" {
            process_elements.push(el);
        }
    });

    let mut process_key = String::new();
    let mut process_name = String::new();
    match process_elements.as_slice() {
        [] => errors.push(ValidationError::new(
            "process",
            "missing_process_key",
            "Process id is required.",
        )),
        [process] => {
            process_key = process.attr("id").unwrap_or("").trim().to_string();
            process_name = process.attr("name").unwrap_or("").to_string();
            if process_key.is_empty() {
                errors.push(ValidationError::new(
                    "process",
                    "missing_process_key",
                    "Process id is required.",
                ));
            }
        }
        _ => errors.push(ValidationError::new(
            "process",
            "multiple_processes",
            "Only one process is supported.",
        )),
    }

    let mut walked: Vec<(&Element, String)> = Vec::new();
    walk(&root, root.local.clone(), &mut walked);

    for (el, path) in &walked {
        if el.namespace.as_deref() == Some(BPMN_MODEL_NS) {
            if let Some((_, message)) = UNSUPPORTED_BPMN_ELEMENT_MESSAGES
                .iter()
                .find(|(name, _)| *name == el.local)
            {
                errors.push(ValidationError::new(path.clone(), "unsupported_bpmn_element", *message));
            } else if !SUPPORTED_BPMN_ELEMENTS_V1.contains(&el.local.as_str()) {
                errors.push(ValidationError::new(
                    path.clone(),
                    "unsupported_bpmn_element",
                    format!("Unsupported BPMN element: {}.", el.local),
                ));
            }

            for (attr_name, attr_value) in &el.attrs {
                if attr_name == "isForCompensation" && attr_value.to_lowercase() == "true" {
                    errors.push(ValidationError::new(
                        path.clone(),
                        "unsupported_bpmn_element",
                        "Compensation is not supported.",
                    ));
                }
            }
        } else if let Some(ns) = el.namespace.as_deref() {
            if !ALLOWED_NON_BPMN_NAMESPACES.contains(&ns) {
                continue;
            }
        }
    }

    if !errors.is_empty() {
        errors.sort();
        return Err(errors);
    }

    Ok(BpmnDefinitionSnapshot {
        process_key,
        process_name,
        form_schema_refs: collect_form_schema_refs(&root),
        catalog_binding_placeholders: collect_catalog_binding_placeholders(&root),
    })
}

fn walk<'a>(el: &'a Element, path: String, out: &mut Vec<(&'a Element, String)>) {
    out.push((el, path.clone()));
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for child in &el.children {
        let index = counts.entry(child.local.as_str()).or_insert(0);
        let child_path = format!("{path}.{}[{index}]", child.local);
        *index += 1;
        walk(child, child_path, out);
    }
}

fn collect_form_schema_refs(root: &Element) -> Vec<FormSchemaRef> {
    let names: HashSet<&str> = FORM_SCHEMA_ATTRIBUTE_NAMES.iter().copied().collect();
    let mut refs = Vec::new();
    root.for_each(&mut |el| {
        for (attr_name, attr_value) in &el.attrs {
            if names.contains(attr_name.as_str()) && !attr_value.is_empty() {
                refs.push(FormSchemaRef {
                    element_id: el.attr("id").unwrap_or("").to_string(),
                    element_type: el.local.clone(),
                    form_key: attr_value.clone(),
                });
            }
        }
    });
    refs
}

fn collect_catalog_binding_placeholders(root: &Element) -> Vec<CatalogBindingPlaceholder> {
    let mut placeholders = Vec::new();
    root.for_each(&mut |el| {
        if el.namespace.as_deref() != Some(BPMN_MODEL_NS) || el.local != "serviceTask" {
            return;
        }
        let mut attrs = HashMap::new();
        for (attr_name, attr_value) in &el.attrs {
            let lowered = attr_name.to_lowercase();
            if CATALOG_BINDING_ATTRIBUTE_MARKERS
                .iter()
                .any(|marker| lowered.contains(marker))
            {
                attrs.insert(attr_name.clone(), attr_value.clone());
            }
        }
        if !attrs.is_empty() {
            placeholders.push(CatalogBindingPlaceholder {
                element_id: el.attr("id").unwrap_or("").to_string(),
                element_name: el.attr("name").unwrap_or("").to_string(),
                element_type: el.local.clone(),
                placeholders: attrs,
            });
        }
    });
    placeholders
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrap(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<definitions xmlns="{BPMN_MODEL_NS}" xmlns:bpmndi="{BPMN_DI_NS}">
  {body}
</definitions>"#
        )
    }

    #[test]
    fn rejects_malformed_xml() {
        let errors = validate_bpmn_xml("<definitions><process").unwrap_err();
        assert_eq!(errors[0].code, "invalid_bpmn_xml");
    }

    #[test]
    fn requires_process_id() {
        let xml = wrap(r#"<process><startEvent id="s1"/><endEvent id="e1"/></process>"#);
        let errors = validate_bpmn_xml(&xml).unwrap_err();
        assert!(errors.iter().any(|e| e.code == "missing_process_key"));
    }

    #[test]
    fn rejects_multiple_processes() {
        let xml = wrap(r#"<process id="p1"/><process id="p2"/>"#);
        let errors = validate_bpmn_xml(&xml).unwrap_err();
        assert!(errors.iter().any(|e| e.code == "multiple_processes"));
    }

    #[test]
    fn rejects_unsupported_element() {
        let xml = wrap(r#"<process id="p1"><boundaryEvent id="b1"/></process>"#);
        let errors = validate_bpmn_xml(&xml).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.code == "unsupported_bpmn_element" && e.message.contains("Boundary")));
    }

    #[test]
    fn rejects_compensation_flag() {
        let xml = wrap(
            r#"<process id="p1"><scriptTask id="t1" isForCompensation="true"/></process>"#,
        );
        let errors = validate_bpmn_xml(&xml).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| e.message == "Compensation is not supported."));
    }

    #[test]
    fn accepts_minimal_valid_process() {
        let xml = wrap(
            r#"<process id="order-fulfillment" name="Order Fulfillment">
                <startEvent id="start"/>
                <sequenceFlow id="f1" sourceRef="start" targetRef="t1"/>
                <userTask id="t1" name="Review" formKey="review-form-v1"/>
                <sequenceFlow id="f2" sourceRef="t1" targetRef="end"/>
                <endEvent id="end"/>
            </process>"#,
        );
        let snapshot = validate_bpmn_xml(&xml).unwrap();
        assert_eq!(snapshot.process_key, "order-fulfillment");
        assert_eq!(snapshot.process_name, "Order Fulfillment");
        assert_eq!(snapshot.form_schema_refs.len(), 1);
        assert_eq!(snapshot.form_schema_refs[0].form_key, "review-form-v1");
    }

    #[test]
    fn collects_catalog_binding_placeholders() {
        let xml = wrap(
            r#"<process id="p1">
                <serviceTask id="st1" name="Charge Card" catalogKey="billing.charge" capabilityVersion="2"/>
            </process>"#,
        );
        let snapshot = validate_bpmn_xml(&xml).unwrap();
        assert_eq!(snapshot.catalog_binding_placeholders.len(), 1);
        let placeholder = &snapshot.catalog_binding_placeholders[0];
        assert_eq!(placeholder.element_id, "st1");
        assert_eq!(placeholder.placeholders.get("catalogKey").unwrap(), "billing.charge");
        assert_eq!(
            placeholder.placeholders.get("capabilityVersion").unwrap(),
            "2"
        );
    }

    #[test]
    fn errors_are_sorted_by_path_then_code() {
        let xml = wrap(
            r#"<process id="p1">
                <boundaryEvent id="b1"/>
                <boundaryEvent id="b2"/>
            </process>"#,
        );
        let errors = validate_bpmn_xml(&xml).unwrap_err();
        let paths: Vec<&str> = errors.iter().map(|e| e.path.as_str()).collect();
        let mut sorted = paths.clone();
        sorted.sort();
        assert_eq!(paths, sorted);
    }
}
