//! `GET /service-tasks`, `POST /service-tasks/{id}/start`, and
//! `POST /service-tasks/{id}/callback`. The start/callback handlers
//! are the two halves of the dispatcher state machine in `dispatch.rs`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use orchestrator_core::hashing::{sha256_hex, verify_callback_signature};
use orchestrator_core::interpreter;
use orchestrator_core::store::{
    AuditEvent, AuditEventType, IdempotencyRecord, InstanceStatus, ServiceTask,
    ServiceTaskExecutionMode, ServiceTaskStatus, WorkflowInstance,
};
use orchestrator_core::OrchestratorError;

use crate::auth::TenantCtx;
use crate::dispatch::{
    build_service_task_payload, find_catalog_binding_from_definition, normalize_result,
    perform_service_task_request, DispatchOutcome,
};
use crate::error::ApiError;
use crate::orchestrator::{apply_run_result, resolve_catalog_service_task};
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceTaskView {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub task_id: String,
    pub name: String,
    pub status: String,
    pub execution_mode: String,
    pub catalog_service_task_id: Option<Uuid>,
    pub request_payload: Option<Value>,
    pub response_payload: Option<Value>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<ServiceTask> for ServiceTaskView {
    fn from(t: ServiceTask) -> Self {
        Self {
            id: t.id,
            workflow_instance_id: t.workflow_instance_id,
            task_id: t.task_id,
            name: t.name,
            status: format!("{:?}", t.status).to_lowercase(),
            execution_mode: format!("{:?}", t.execution_mode).to_lowercase(),
            catalog_service_task_id: t.catalog_service_task_id,
            request_payload: t.request_payload,
            response_payload: t.response_payload,
            last_error: t.last_error,
            started_at: t.started_at,
            completed_at: t.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ServiceTasksQuery {
    pub workflow_instance_id: Option<Uuid>,
    pub status: Option<String>,
}

/// `GET /service-tasks`
pub async fn list_service_tasks(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Query(query): Query<ServiceTasksQuery>,
) -> Result<Json<Vec<ServiceTaskView>>, ApiError> {
    let mut tasks = match query.workflow_instance_id {
        Some(instance_id) => {
            state
                .store
                .list_active_service_tasks(ctx.tenant_id, instance_id)
                .await
        }
        None => state.store.list_all_service_tasks(ctx.tenant_id).await,
    }
    .map_err(ApiError::from)?;

    if let Some(status) = &query.status {
        tasks.retain(|t| format!("{:?}", t.status).to_lowercase() == status.to_lowercase());
    }

    Ok(Json(tasks.into_iter().map(ServiceTaskView::from).collect()))
}

#[derive(Debug, Deserialize, Default)]
pub struct StartServiceTaskRequest {
    pub catalog_entry_id: Option<Uuid>,
    pub service_task_id: Option<String>,
    pub execution_mode: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// `POST /service-tasks/{id}/start`
pub async fn start_service_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Path(id): Path<Uuid>,
    Json(body): Json<StartServiceTaskRequest>,
) -> Result<(StatusCode, Json<ServiceTaskView>), ApiError> {
    let mut task = state
        .store
        .lock_service_task_by_id(ctx.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;

    if !matches!(task.status, ServiceTaskStatus::Pending | ServiceTaskStatus::Failed) {
        return Ok((StatusCode::OK, Json(ServiceTaskView::from(task))));
    }

    let instance = state
        .store
        .get_instance(ctx.tenant_id, task.workflow_instance_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;
    let version = state
        .store
        .get_definition_version(ctx.tenant_id, instance.definition_version_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;

    let catalog_service_task_id = resolve_binding(&state, &ctx, &task, &body, &version).await?;
    let Some(catalog_service_task_id) = catalog_service_task_id else {
        return Err(ApiError::MissingCatalogBinding);
    };
    let catalog_task = state
        .store
        .get_catalog_service_task(ctx.tenant_id, catalog_service_task_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::MissingCatalogBinding)?;

    let execution_mode = match body.execution_mode.as_deref() {
        Some("async") => ServiceTaskExecutionMode::Async,
        _ => ServiceTaskExecutionMode::Sync,
    };
    let payload = body.payload.clone().unwrap_or_else(|| serde_json::json!({}));

    task.catalog_service_task_id = Some(catalog_service_task_id);
    task.request_payload = Some(payload.clone());
    task.execution_mode = execution_mode;
    task.status = ServiceTaskStatus::InProgress;
    task.started_at = Some(Utc::now());
    task.last_error = None;
    state.store.save_service_task(&task).await.map_err(ApiError::from)?;

    state
        .store
        .append_audit_event(&AuditEvent {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            event_type: AuditEventType::ServiceTaskStart,
            actor_identity: None,
            correlation_id: Some(instance.correlation_id.clone()),
            business_key: Some(instance.business_key.clone()),
            workflow_instance_id: Some(task.workflow_instance_id),
            definition_version_id: Some(version.id),
            payload: serde_json::json!({"task_id": task.task_id}),
            created_at: Utc::now(),
        })
        .await
        .map_err(ApiError::from)?;

    let callback_url = matches!(execution_mode, ServiceTaskExecutionMode::Async)
        .then(|| format!("/service-tasks/{}/callback", task.id));
    let envelope = build_service_task_payload(
        payload,
        task.workflow_instance_id,
        task.id,
        &task.task_id,
        &instance.correlation_id,
        &format!("{:?}", execution_mode).to_lowercase(),
        callback_url.as_deref(),
    );

    let outcome = perform_service_task_request(
        &state.http,
        &catalog_task.url,
        &envelope,
        &instance.correlation_id,
    )
    .await;

    settle_dispatch_outcome(&state, ctx.tenant_id, task, instance, version, outcome).await
}

async fn resolve_binding(
    state: &AppState,
    ctx: &TenantCtx,
    task: &ServiceTask,
    body: &StartServiceTaskRequest,
    version: &orchestrator_core::store::WorkflowDefinitionVersion,
) -> Result<Option<Uuid>, ApiError> {
    if let Some(existing) = task.catalog_service_task_id {
        if body.catalog_entry_id.is_some() || body.service_task_id.is_some() {
            let bound = state
                .store
                .get_catalog_service_task(ctx.tenant_id, existing)
                .await
                .map_err(ApiError::from)?
                .ok_or(ApiError::MissingCatalogBinding)?;
            let entry_matches = match body.catalog_entry_id {
                Some(id) => id == bound.catalog_entry_id,
                None => true,
            };
            let task_matches = match body.service_task_id.as_deref() {
                Some(id) => id == bound.external_id,
                None => true,
            };
            if !entry_matches || !task_matches {
                return Err(ApiError::Conflict(
                    "Service task is already bound to a different catalog task.".to_string(),
                ));
            }
        }
        return Ok(Some(existing));
    }

    if let (Some(catalog_entry_id), Some(service_task_id)) =
        (body.catalog_entry_id, body.service_task_id.as_deref())
    {
        let found = state
            .store
            .find_catalog_service_task(ctx.tenant_id, catalog_entry_id, service_task_id)
            .await
            .map_err(ApiError::from)?;
        if let Some(found) = found {
            return Ok(Some(found.id));
        }
    }

    if let Some(binding) = find_catalog_binding_from_definition(
        &version.catalog_binding_placeholders,
        &task.element_id,
        &task.element_name,
    ) {
        return resolve_catalog_service_task(state, ctx.tenant_id, &binding).await;
    }

    Ok(None)
}

async fn settle_dispatch_outcome(
    state: &AppState,
    tenant_id: orchestrator_core::store::TenantId,
    mut task: ServiceTask,
    mut instance: WorkflowInstance,
    version: orchestrator_core::store::WorkflowDefinitionVersion,
    outcome: DispatchOutcome,
) -> Result<(StatusCode, Json<ServiceTaskView>), ApiError> {
    match outcome {
        DispatchOutcome::HttpError { detail, body } => {
            task.status = ServiceTaskStatus::Failed;
            task.last_error = Some(detail);
            task.response_payload = Some(body);
            task.completed_at = Some(Utc::now());
            state.store.save_service_task(&task).await.map_err(ApiError::from)?;

            instance.status = InstanceStatus::Failed;
            instance.updated_at = Utc::now();
            state.store.save_instance(&instance).await.map_err(ApiError::from)?;

            Ok((StatusCode::BAD_GATEWAY, Json(ServiceTaskView::from(task))))
        }
        DispatchOutcome::Success { body, .. } => match task.execution_mode {
            ServiceTaskExecutionMode::Async => {
                task.status = ServiceTaskStatus::Waiting;
                task.response_payload = Some(body);
                state.store.save_service_task(&task).await.map_err(ApiError::from)?;
                Ok((StatusCode::OK, Json(ServiceTaskView::from(task))))
            }
            ServiceTaskExecutionMode::Sync => {
                let run_result = interpreter::resume_workflow(
                    &version.bpmn_xml,
                    instance.serialized_state.clone(),
                    Some(&task.task_id),
                    Some(body.clone()),
                    &instance.correlation_id,
                    &instance.business_key,
                )
                .map_err(ApiError::from)?;

                apply_run_result(state, tenant_id, &mut instance, &version, run_result).await?;

                task.status = ServiceTaskStatus::Completed;
                task.response_payload = Some(body);
                task.completed_at = Some(Utc::now());
                state.store.save_service_task(&task).await.map_err(ApiError::from)?;

                Ok((StatusCode::OK, Json(ServiceTaskView::from(task))))
            }
        },
    }
}

#[derive(Debug, Deserialize)]
pub struct ServiceTaskCallbackRequest {
    pub status: String,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `POST /service-tasks/{id}/callback`
///
/// Authenticated by the HMAC contract, not by the ordinary tenant
/// boundary check; `ctx.raw_api_key` supplies the HMAC key material
/// since the boundary filter already resolved the tenant from the
/// same `X-Tenant-Api-Key` header.
pub async fn service_task_callback(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<ServiceTaskView>, ApiError> {
    let timestamp = headers
        .get("x-callback-timestamp")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing X-Callback-Timestamp header.".to_string()))?;
    let signature = headers
        .get("x-callback-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("Missing X-Callback-Signature header.".to_string()))?;

    if !verify_callback_signature(ctx.raw_api_key.as_bytes(), &body, timestamp, signature) {
        return Err(ApiError::Unauthorized("Invalid callback signature.".to_string()));
    }

    let request_hash = sha256_hex(&[body.as_ref(), timestamp.as_bytes()].concat());

    let mut task = state
        .store
        .lock_service_task_by_id(ctx.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    if let Some(key) = &idempotency_key {
        if let Some(existing) = state
            .store
            .find_service_task_idempotency(ctx.tenant_id, key)
            .await
            .map_err(ApiError::from)?
        {
            if existing.subject_id != task.id || existing.request_hash != request_hash {
                return Err(ApiError::Conflict(
                    "Idempotency key reused with a different request.".to_string(),
                ));
            }
            return Ok(Json(
                serde_json::from_value(existing.response_payload)
                    .map_err(|e| ApiError::from(OrchestratorError::Store(e.to_string())))?,
            ));
        }
    }

    if task.status == ServiceTaskStatus::Completed {
        let view = ServiceTaskView::from(task);
        if let Some(key) = idempotency_key {
            store_callback_idempotency(&state, ctx.tenant_id, &key, view.id, &request_hash, &view).await?;
        }
        return Ok(Json(view));
    }

    let raw_body: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid callback body: {e}")))?;
    let payload: ServiceTaskCallbackRequest = serde_json::from_value(raw_body.clone())
        .map_err(|e| ApiError::BadRequest(format!("invalid callback body: {e}")))?;
    let status = payload.status.to_lowercase();
    let result_data = normalize_result(
        payload
            .data
            .clone()
            .or(payload.result.clone())
            .unwrap_or(raw_body),
    );

    let instance = state
        .store
        .get_instance(ctx.tenant_id, task.workflow_instance_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;

    let view = if status == "failed" {
        task.status = ServiceTaskStatus::Failed;
        task.last_error = payload.error.clone();
        task.response_payload = Some(result_data);
        task.completed_at = Some(Utc::now());
        state.store.save_service_task(&task).await.map_err(ApiError::from)?;

        let mut instance = instance;
        instance.status = InstanceStatus::Failed;
        instance.updated_at = Utc::now();
        state.store.save_instance(&instance).await.map_err(ApiError::from)?;

        ServiceTaskView::from(task)
    } else {
        let version = state
            .store
            .get_definition_version(ctx.tenant_id, instance.definition_version_id)
            .await
            .map_err(ApiError::from)?
            .ok_or(ApiError::NotFound)?;

        let run_result = interpreter::resume_workflow(
            &version.bpmn_xml,
            instance.serialized_state.clone(),
            Some(&task.task_id),
            Some(result_data.clone()),
            &instance.correlation_id,
            &instance.business_key,
        )
        .map_err(ApiError::from)?;

        let mut instance = instance;
        apply_run_result(&state, ctx.tenant_id, &mut instance, &version, run_result).await?;

        task.status = ServiceTaskStatus::Completed;
        task.response_payload = Some(result_data);
        task.completed_at = Some(Utc::now());
        state.store.save_service_task(&task).await.map_err(ApiError::from)?;

        ServiceTaskView::from(task)
    };

    state
        .store
        .append_audit_event(&AuditEvent {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            event_type: AuditEventType::ServiceTaskCallback,
            actor_identity: None,
            correlation_id: None,
            business_key: None,
            workflow_instance_id: Some(view.workflow_instance_id),
            definition_version_id: None,
            payload: serde_json::json!({
                "task_id": view.task_id,
                "status": status,
                "callback_status": view.status,
                "error": payload.error,
            }),
            created_at: Utc::now(),
        })
        .await
        .map_err(ApiError::from)?;

    if let Some(key) = idempotency_key {
        store_callback_idempotency(&state, ctx.tenant_id, &key, view.id, &request_hash, &view).await?;
    }

    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::bpmn::CatalogBindingPlaceholder;
    use orchestrator_core::store::memory::MemoryStore;
    use orchestrator_core::store::{CapabilityCatalogEntry, CatalogServiceTask, WorkflowDefinitionVersion};
    use std::collections::HashMap;

    fn ctx(tenant_id: orchestrator_core::store::TenantId) -> TenantCtx {
        TenantCtx {
            tenant_id,
            raw_api_key: "k".to_string(),
        }
    }

    fn task(tenant_id: orchestrator_core::store::TenantId, bound: Option<Uuid>) -> ServiceTask {
        ServiceTask {
            id: Uuid::new_v4(),
            tenant_id,
            workflow_instance_id: Uuid::new_v4(),
            task_id: "ServiceTask_1".to_string(),
            name: "Notify".to_string(),
            task_type: "ServiceTask".to_string(),
            element_id: "ServiceTask_Notify".to_string(),
            element_name: "Notify".to_string(),
            status: ServiceTaskStatus::Pending,
            execution_mode: ServiceTaskExecutionMode::Sync,
            catalog_service_task_id: bound,
            request_payload: None,
            response_payload: None,
            last_error: None,
            started_at: None,
            completed_at: None,
        }
    }

    fn empty_version(tenant_id: orchestrator_core::store::TenantId) -> WorkflowDefinitionVersion {
        WorkflowDefinitionVersion {
            id: Uuid::new_v4(),
            tenant_id,
            definition_id: Uuid::new_v4(),
            version: 1,
            bpmn_xml: String::new(),
            form_schema_refs: Vec::new(),
            catalog_binding_placeholders: Vec::new(),
        }
    }

    fn seed_catalog(store: &MemoryStore, tenant_id: orchestrator_core::store::TenantId) -> (Uuid, Uuid) {
        let entry_id = Uuid::new_v4();
        store.seed_catalog_entry(CapabilityCatalogEntry {
            id: entry_id,
            tenant_id,
            external_id: "cap_leave".to_string(),
            name: "Leave".to_string(),
            description: String::new(),
            category: String::new(),
            service_url: "https://tenant.example/leave".to_string(),
            metadata: serde_json::json!({}),
        });
        let task_id = Uuid::new_v4();
        store.seed_catalog_service_task(CatalogServiceTask {
            id: task_id,
            tenant_id,
            catalog_entry_id: entry_id,
            external_id: "send_email".to_string(),
            name: "Send email".to_string(),
            url: "https://tenant.example/leave/send_email".to_string(),
        });
        (entry_id, task_id)
    }

    #[tokio::test]
    async fn already_bound_task_keeps_existing_binding_when_no_ids_supplied() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let (_, bound_task_id) = seed_catalog(&store, tenant_id);
        let state = AppState::new(store);
        let t = task(tenant_id, Some(bound_task_id));
        let version = empty_version(tenant_id);
        let body = StartServiceTaskRequest::default();

        let resolved = resolve_binding(&state, &ctx(tenant_id), &t, &body, &version).await.unwrap();
        assert_eq!(resolved, Some(bound_task_id));
    }

    #[tokio::test]
    async fn already_bound_task_conflicts_with_a_different_supplied_entry() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let (_, bound_task_id) = seed_catalog(&store, tenant_id);
        let state = AppState::new(store);
        let t = task(tenant_id, Some(bound_task_id));
        let version = empty_version(tenant_id);
        let body = StartServiceTaskRequest {
            catalog_entry_id: Some(Uuid::new_v4()),
            ..Default::default()
        };

        let result = resolve_binding(&state, &ctx(tenant_id), &t, &body, &version).await;
        assert!(matches!(result, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn resolves_via_explicit_ids() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let (entry_id, expected_task_id) = seed_catalog(&store, tenant_id);
        let state = AppState::new(store);
        let t = task(tenant_id, None);
        let version = empty_version(tenant_id);
        let body = StartServiceTaskRequest {
            catalog_entry_id: Some(entry_id),
            service_task_id: Some("send_email".to_string()),
            ..Default::default()
        };

        let resolved = resolve_binding(&state, &ctx(tenant_id), &t, &body, &version).await.unwrap();
        assert_eq!(resolved, Some(expected_task_id));
    }

    #[tokio::test]
    async fn auto_binds_from_definition_placeholders() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let (_, expected_task_id) = seed_catalog(&store, tenant_id);
        let state = AppState::new(store);
        let t = task(tenant_id, None);

        let mut placeholders = HashMap::new();
        placeholders.insert("catalog_entry_id".to_string(), "cap_leave".to_string());
        placeholders.insert("service_task_id".to_string(), "send_email".to_string());
        let mut version = empty_version(tenant_id);
        version.catalog_binding_placeholders = vec![CatalogBindingPlaceholder {
            element_id: t.element_id.clone(),
            element_name: t.element_name.clone(),
            element_type: "serviceTask".to_string(),
            placeholders,
        }];
        let body = StartServiceTaskRequest::default();

        let resolved = resolve_binding(&state, &ctx(tenant_id), &t, &body, &version).await.unwrap();
        assert_eq!(resolved, Some(expected_task_id));
    }

    #[tokio::test]
    async fn unresolvable_binding_returns_none() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let state = AppState::new(store);
        let t = task(tenant_id, None);
        let version = empty_version(tenant_id);
        let body = StartServiceTaskRequest::default();

        let resolved = resolve_binding(&state, &ctx(tenant_id), &t, &body, &version).await.unwrap();
        assert_eq!(resolved, None);
    }
}

async fn store_callback_idempotency(
    state: &AppState,
    tenant_id: orchestrator_core::store::TenantId,
    key: &str,
    subject_id: Uuid,
    request_hash: &str,
    view: &ServiceTaskView,
) -> Result<(), ApiError> {
    let response_payload =
        serde_json::to_value(view).map_err(|e| ApiError::from(OrchestratorError::Store(e.to_string())))?;
    state
        .store
        .save_service_task_idempotency(&IdempotencyRecord {
            id: Uuid::new_v4(),
            tenant_id,
            idempotency_key: key.to_string(),
            subject_id,
            request_hash: request_hash.to_string(),
            response_payload,
        })
        .await
        .map_err(ApiError::from)
}
