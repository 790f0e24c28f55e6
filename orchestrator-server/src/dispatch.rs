//! Outbound half of the service-task dispatcher: builds the request
//! envelope, POSTs it to the catalog task's URL with a canonical-JSON
//! body, and classifies the response. HMAC signing for the *inbound*
//! callback contract lives in `auth.rs`'s counterpart logic inline in
//! `routes::service_tasks`, since it verifies rather than produces a
//! signature.

use std::collections::HashMap;

use orchestrator_core::bpmn::CatalogBindingPlaceholder;
use orchestrator_core::canonical_json::to_canonical_bytes;
use serde_json::{Map, Value};
use uuid::Uuid;

const CATALOG_ENTRY_KEYS: &[&str] = &[
    "catalog_entry_id",
    "catalogentryid",
    "catalog_id",
    "catalogid",
    "capability_id",
    "capabilityid",
];
const SERVICE_TASK_KEYS: &[&str] = &[
    "service_task_id",
    "servicetaskid",
    "task_id",
    "taskid",
    "service_task",
    "servicetask",
];

/// What `find_catalog_binding_from_definition` recovers from a
/// placeholder's lowercased-key attribute bag.
pub struct AutoBinding {
    pub catalog_entry_external_id: String,
    pub service_task_external_id: String,
}

/// Looks a serviceTask element up by id or name among the definition
/// version's catalog-binding placeholders and extracts a pair of
/// external ids from whichever of the known key spellings is present.
pub fn find_catalog_binding_from_definition(
    placeholders: &[CatalogBindingPlaceholder],
    element_id: &str,
    element_name: &str,
) -> Option<AutoBinding> {
    let placeholder = placeholders
        .iter()
        .find(|p| p.element_id == element_id || p.element_name == element_name)?;

    let lowered: HashMap<String, &String> = placeholder
        .placeholders
        .iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect();

    let catalog_entry_external_id = CATALOG_ENTRY_KEYS
        .iter()
        .find_map(|key| lowered.get(*key))?
        .to_string();
    let service_task_external_id = SERVICE_TASK_KEYS
        .iter()
        .find_map(|key| lowered.get(*key))?
        .to_string();

    Some(AutoBinding {
        catalog_entry_external_id,
        service_task_external_id,
    })
}

/// Builds the `{payload, context: {...}}` envelope sent to the tenant
/// service.
pub fn build_service_task_payload(
    payload: Value,
    workflow_instance_id: Uuid,
    service_task_id: Uuid,
    task_id: &str,
    correlation_id: &str,
    execution_mode: &str,
    callback_url: Option<&str>,
) -> Value {
    let mut context = Map::new();
    context.insert(
        "workflow_instance_id".to_string(),
        Value::String(workflow_instance_id.to_string()),
    );
    context.insert(
        "service_task_id".to_string(),
        Value::String(service_task_id.to_string()),
    );
    context.insert("task_id".to_string(), Value::String(task_id.to_string()));
    context.insert(
        "correlation_id".to_string(),
        Value::String(correlation_id.to_string()),
    );
    context.insert(
        "execution_mode".to_string(),
        Value::String(execution_mode.to_string()),
    );
    if let Some(url) = callback_url {
        context.insert("callback_url".to_string(), Value::String(url.to_string()));
    }

    let mut envelope = Map::new();
    envelope.insert("payload".to_string(), payload);
    envelope.insert("context".to_string(), Value::Object(context));
    Value::Object(envelope)
}

pub enum DispatchOutcome {
    Success { status: u16, body: Value },
    HttpError { detail: String, body: Value },
}

/// Performs the outbound POST with a 10-second timeout (set on the
/// shared `reqwest::Client`), a canonical-JSON body, and the fixed
/// header set the contract specifies. Never holds a database lock
/// while this call is in flight.
pub async fn perform_service_task_request(
    client: &reqwest::Client,
    url: &str,
    envelope: &Value,
    correlation_id: &str,
) -> DispatchOutcome {
    let body = to_canonical_bytes(envelope);

    let mut request = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("Accept", "application/json")
        .body(body);
    if !correlation_id.is_empty() {
        request = request.header("X-Correlation-Id", correlation_id);
    }

    let response = match request.send().await {
        Ok(r) => r,
        Err(e) => {
            return DispatchOutcome::HttpError {
                detail: e.to_string(),
                body: Value::Null,
            }
        }
    };

    let status = response.status();
    let body_bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            return DispatchOutcome::HttpError {
                detail: e.to_string(),
                body: Value::Null,
            }
        }
    };

    let parsed = normalize_result(serde_json::from_slice(&body_bytes).unwrap_or(Value::Null));

    if !status.is_success() {
        return DispatchOutcome::HttpError {
            detail: format!("upstream responded with status {}", status.as_u16()),
            body: parsed,
        };
    }

    DispatchOutcome::Success {
        status: status.as_u16(),
        body: parsed,
    }
}

/// Wraps a non-object response body as `{"result": x}`, matching the
/// task-result merging rule the interpreter also applies.
pub fn normalize_result(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        other => {
            let mut map = Map::new();
            map.insert("result".to_string(), other);
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_binding_by_element_id() {
        let mut placeholders = HashMap::new();
        placeholders.insert("catalog_entry_id".to_string(), "cap_leave".to_string());
        placeholders.insert("service_task_id".to_string(), "send_email".to_string());
        let defs = vec![CatalogBindingPlaceholder {
            element_id: "ServiceTask_Notify".to_string(),
            element_name: "Notify".to_string(),
            element_type: "serviceTask".to_string(),
            placeholders,
        }];
        let binding = find_catalog_binding_from_definition(&defs, "ServiceTask_Notify", "Notify").unwrap();
        assert_eq!(binding.catalog_entry_external_id, "cap_leave");
        assert_eq!(binding.service_task_external_id, "send_email");
    }

    #[test]
    fn finds_binding_with_original_cased_keys() {
        let mut placeholders = HashMap::new();
        placeholders.insert("catalogEntryId".to_string(), "cap_leave".to_string());
        placeholders.insert("serviceTaskId".to_string(), "send_email".to_string());
        let defs = vec![CatalogBindingPlaceholder {
            element_id: "ServiceTask_Notify".to_string(),
            element_name: "Notify".to_string(),
            element_type: "serviceTask".to_string(),
            placeholders,
        }];
        let binding = find_catalog_binding_from_definition(&defs, "ServiceTask_Notify", "Notify").unwrap();
        assert_eq!(binding.catalog_entry_external_id, "cap_leave");
        assert_eq!(binding.service_task_external_id, "send_email");
    }

    #[test]
    fn normalizes_scalar_result() {
        let wrapped = normalize_result(Value::Bool(true));
        assert_eq!(wrapped, serde_json::json!({"result": true}));
    }
}
