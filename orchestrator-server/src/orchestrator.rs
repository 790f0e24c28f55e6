//! Glue invoked by the HTTP routes: runs the interpreter, persists the
//! instance, and materializes newly-waiting user/service tasks
//! idempotently. None of this belongs in `orchestrator-core` — it is
//! the orchestration of engine + store + notification side effect that
//! only makes sense once a storage backend exists.

use chrono::Utc;
use uuid::Uuid;

use orchestrator_core::interpreter::{
    self, RunStatus, ServiceTaskSnapshot, UserTaskSnapshot, WorkflowRunResult,
};
use orchestrator_core::store::{
    AuditEvent, AuditEventType, InstanceStatus, ServiceTask, ServiceTaskExecutionMode,
    ServiceTaskStatus, TenantId, UserTask, UserTaskStatus, WorkflowDefinitionVersion,
    WorkflowInstance,
};

use crate::dispatch::find_catalog_binding_from_definition;
use crate::error::ApiError;
use crate::state::AppState;

pub async fn start_instance(
    state: &AppState,
    tenant_id: TenantId,
    version: &WorkflowDefinitionVersion,
    correlation_id: String,
    business_key: String,
) -> Result<WorkflowInstance, ApiError> {
    let run_result = interpreter::start_workflow(&version.bpmn_xml, &correlation_id, &business_key)
        .map_err(ApiError::from)?;

    let now = Utc::now();
    let instance = WorkflowInstance {
        id: Uuid::new_v4(),
        tenant_id,
        definition_version_id: version.id,
        status: InstanceStatus::from(run_result.status),
        correlation_id,
        business_key,
        serialized_state: run_result.serialized_state.clone(),
        created_at: now,
        updated_at: now,
    };
    state.store.save_instance(&instance).await.map_err(ApiError::from)?;

    state
        .store
        .append_audit_event(&AuditEvent {
            id: Uuid::new_v4(),
            tenant_id,
            event_type: AuditEventType::InstanceStart,
            actor_identity: None,
            correlation_id: Some(instance.correlation_id.clone()),
            business_key: Some(instance.business_key.clone()),
            workflow_instance_id: Some(instance.id),
            definition_version_id: Some(version.id),
            payload: serde_json::json!({"status": run_result.status}),
            created_at: now,
        })
        .await
        .map_err(ApiError::from)?;

    materialize_waiting_tasks(state, tenant_id, &instance, version, &run_result).await?;

    Ok(instance)
}

/// Applies a `WorkflowRunResult` produced by `resume_workflow` back
/// onto the persisted instance and materializes any newly-waiting
/// tasks. Shared by user-task completion, service-task sync return,
/// and service-task callback.
pub async fn apply_run_result(
    state: &AppState,
    tenant_id: TenantId,
    instance: &mut WorkflowInstance,
    version: &WorkflowDefinitionVersion,
    run_result: WorkflowRunResult,
) -> Result<(), ApiError> {
    instance.status = InstanceStatus::from(run_result.status);
    instance.serialized_state = run_result.serialized_state.clone();
    instance.updated_at = Utc::now();
    state.store.save_instance(instance).await.map_err(ApiError::from)?;

    materialize_waiting_tasks(state, tenant_id, instance, version, &run_result).await
}

async fn materialize_waiting_tasks(
    state: &AppState,
    tenant_id: TenantId,
    instance: &WorkflowInstance,
    version: &WorkflowDefinitionVersion,
    run_result: &WorkflowRunResult,
) -> Result<(), ApiError> {
    if run_result.status == RunStatus::Failed {
        return Ok(());
    }

    for snapshot in &run_result.waiting_user_tasks {
        materialize_user_task(state, tenant_id, instance.id, snapshot).await?;
    }
    for snapshot in &run_result.waiting_service_tasks {
        materialize_service_task(state, tenant_id, instance.id, version, snapshot).await?;
    }
    Ok(())
}

async fn materialize_user_task(
    state: &AppState,
    tenant_id: TenantId,
    instance_id: Uuid,
    snapshot: &UserTaskSnapshot,
) -> Result<(), ApiError> {
    let existing = state
        .store
        .lock_user_task(tenant_id, instance_id, &snapshot.task_id)
        .await
        .map_err(ApiError::from)?;
    if existing.is_some() {
        return Ok(());
    }

    state
        .store
        .create_user_task(&UserTask {
            id: Uuid::new_v4(),
            tenant_id,
            workflow_instance_id: instance_id,
            task_id: snapshot.task_id.clone(),
            name: snapshot.name.clone(),
            task_type: snapshot.task_type.clone(),
            status: UserTaskStatus::Pending,
            actor_identity: None,
            action: None,
            action_data: None,
            completed_at: None,
        })
        .await
        .map_err(ApiError::from)?;

    tracing::info!(
        tenant_id = %tenant_id,
        instance_id = %instance_id,
        task_id = %snapshot.task_id,
        "user task ready for action"
    );
    Ok(())
}

async fn materialize_service_task(
    state: &AppState,
    tenant_id: TenantId,
    instance_id: Uuid,
    version: &WorkflowDefinitionVersion,
    snapshot: &ServiceTaskSnapshot,
) -> Result<(), ApiError> {
    let existing = state
        .store
        .lock_service_task(tenant_id, instance_id, &snapshot.task_id)
        .await
        .map_err(ApiError::from)?;
    if existing.is_some() {
        return Ok(());
    }

    let catalog_service_task_id = if let Some(binding) = find_catalog_binding_from_definition(
        &version.catalog_binding_placeholders,
        &snapshot.element_id,
        &snapshot.element_name,
    ) {
        resolve_catalog_service_task(state, tenant_id, &binding).await?
    } else {
        None
    };

    state
        .store
        .create_service_task(&ServiceTask {
            id: Uuid::new_v4(),
            tenant_id,
            workflow_instance_id: instance_id,
            task_id: snapshot.task_id.clone(),
            name: snapshot.name.clone(),
            task_type: snapshot.task_type.clone(),
            element_id: snapshot.element_id.clone(),
            element_name: snapshot.element_name.clone(),
            status: ServiceTaskStatus::Pending,
            execution_mode: ServiceTaskExecutionMode::Sync,
            catalog_service_task_id,
            request_payload: None,
            response_payload: None,
            last_error: None,
            started_at: None,
            completed_at: None,
        })
        .await
        .map_err(ApiError::from)?;

    tracing::info!(
        tenant_id = %tenant_id,
        instance_id = %instance_id,
        task_id = %snapshot.task_id,
        "service task ready for dispatch"
    );
    Ok(())
}

pub async fn resolve_catalog_service_task(
    state: &AppState,
    tenant_id: TenantId,
    binding: &crate::dispatch::AutoBinding,
) -> Result<Option<Uuid>, ApiError> {
    let entries = state.store.list_catalog_entries(tenant_id).await.map_err(ApiError::from)?;
    let Some(entry) = entries
        .into_iter()
        .find(|e| e.external_id == binding.catalog_entry_external_id)
    else {
        return Ok(None);
    };
    let task = state
        .store
        .find_catalog_service_task(tenant_id, entry.id, &binding.service_task_external_id)
        .await
        .map_err(ApiError::from)?;
    Ok(task.map(|t| t.id))
}
