use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use orchestrator_core::hashing::sha256_hex;
use orchestrator_core::store::{AuditEvent, AuditEventType, IdempotencyRecord, UserTask, UserTaskStatus};
use orchestrator_core::{canonical_json, OrchestratorError};

use crate::auth::TenantCtx;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct UserTaskView {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub task_id: String,
    pub name: String,
    pub status: String,
    pub actor_identity: Option<String>,
    pub action: Option<String>,
    pub action_data: Option<Value>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<UserTask> for UserTaskView {
    fn from(t: UserTask) -> Self {
        Self {
            id: t.id,
            workflow_instance_id: t.workflow_instance_id,
            task_id: t.task_id,
            name: t.name,
            status: format!("{:?}", t.status).to_lowercase(),
            actor_identity: t.actor_identity,
            action: t.action,
            action_data: t.action_data,
            completed_at: t.completed_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TasksQuery {
    pub workflow_instance_id: Option<Uuid>,
}

/// `GET /tasks`
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Query(query): Query<TasksQuery>,
) -> Result<Json<Vec<UserTaskView>>, ApiError> {
    let tasks = match query.workflow_instance_id {
        Some(instance_id) => state.store.list_open_user_tasks(ctx.tenant_id, instance_id).await,
        None => state.store.list_all_open_user_tasks(ctx.tenant_id).await,
    }
    .map_err(ApiError::from)?;

    Ok(Json(tasks.into_iter().map(UserTaskView::from).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CompleteUserTaskRequest {
    pub actor: String,
    pub action: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

/// `POST /tasks/{id}/complete`
pub async fn complete_task(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(body): Json<CompleteUserTaskRequest>,
) -> Result<Json<UserTaskView>, ApiError> {
    let mut task = state
        .store
        .lock_user_task_by_id(ctx.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;

    let data = body.payload.clone().unwrap_or_else(|| serde_json::json!({}));
    let request_hash = sha256_hex(&canonical_json::to_canonical_bytes(&serde_json::json!({
        "actor": body.actor,
        "action": body.action,
        "data": data,
    })));

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    if let Some(key) = &idempotency_key {
        if let Some(existing) = state
            .store
            .find_user_task_idempotency(ctx.tenant_id, key)
            .await
            .map_err(ApiError::from)?
        {
            if existing.subject_id != task.id || existing.request_hash != request_hash {
                return Err(ApiError::Conflict("Idempotency key reused with a different request.".to_string()));
            }
            return Ok(Json(serde_json::from_value(existing.response_payload).map_err(|e| {
                ApiError::from(OrchestratorError::Store(e.to_string()))
            })?));
        }
    }

    if task.status == UserTaskStatus::Completed {
        let view = UserTaskView::from(task);
        if let Some(key) = idempotency_key {
            store_idempotency(&state, ctx.tenant_id, &key, view.id, &request_hash, &view).await?;
        }
        return Ok(Json(view));
    }

    task.status = UserTaskStatus::Completed;
    task.actor_identity = Some(body.actor.clone());
    task.action = Some(body.action.clone());
    task.action_data = Some(data);
    task.completed_at = Some(Utc::now());

    state.store.save_user_task(&task).await.map_err(ApiError::from)?;

    state
        .store
        .append_audit_event(&AuditEvent {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            event_type: AuditEventType::UserTaskComplete,
            actor_identity: task.actor_identity.clone(),
            correlation_id: None,
            business_key: None,
            workflow_instance_id: Some(task.workflow_instance_id),
            definition_version_id: None,
            payload: serde_json::json!({"task_id": task.task_id, "action": task.action}),
            created_at: Utc::now(),
        })
        .await
        .map_err(ApiError::from)?;

    let view = UserTaskView::from(task);
    if let Some(key) = idempotency_key {
        store_idempotency(&state, ctx.tenant_id, &key, view.id, &request_hash, &view).await?;
    }
    Ok(Json(view))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use orchestrator_core::store::memory::MemoryStore;
    use orchestrator_core::store::OrchestratorStore;
    use std::sync::Arc;

    async fn seed_task(store: &MemoryStore, tenant_id: Uuid) -> Uuid {
        let task = UserTask {
            id: Uuid::new_v4(),
            tenant_id,
            workflow_instance_id: Uuid::new_v4(),
            task_id: "UserTask_1".to_string(),
            name: "Review".to_string(),
            task_type: "UserTask".to_string(),
            status: UserTaskStatus::Pending,
            actor_identity: None,
            action: None,
            action_data: None,
            completed_at: None,
        };
        let id = task.id;
        store.create_user_task(&task).await.unwrap();
        id
    }

    fn ctx(tenant_id: Uuid) -> Extension<Arc<TenantCtx>> {
        Extension(Arc::new(TenantCtx {
            tenant_id,
            raw_api_key: "k".to_string(),
        }))
    }

    #[tokio::test]
    async fn completes_task_and_records_audit() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let task_id = seed_task(&store, tenant_id).await;
        let state = AppState::new(store.clone());

        let view = complete_task(
            State(state),
            ctx(tenant_id),
            Path(task_id),
            HeaderMap::new(),
            Json(CompleteUserTaskRequest {
                actor: "alice".to_string(),
                action: "approve".to_string(),
                payload: None,
            }),
        )
        .await
        .unwrap()
        .0;

        assert_eq!(view.status, "completed");
        assert_eq!(view.actor_identity.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn replays_identical_request_under_same_idempotency_key() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let task_id = seed_task(&store, tenant_id).await;
        let state = AppState::new(store.clone());

        let mut headers = HeaderMap::new();
        headers.insert("idempotency-key", "key-1".parse().unwrap());

        let body = || CompleteUserTaskRequest {
            actor: "alice".to_string(),
            action: "approve".to_string(),
            payload: None,
        };

        let first = complete_task(
            State(state.clone()),
            ctx(tenant_id),
            Path(task_id),
            headers.clone(),
            Json(body()),
        )
        .await
        .unwrap()
        .0;

        let second = complete_task(
            State(state),
            ctx(tenant_id),
            Path(task_id),
            headers,
            Json(body()),
        )
        .await
        .unwrap()
        .0;

        assert_eq!(first.id, second.id);
        assert_eq!(first.completed_at, second.completed_at);
    }

    #[tokio::test]
    async fn rejects_reused_idempotency_key_with_different_body() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let task_id = seed_task(&store, tenant_id).await;
        let state = AppState::new(store.clone());

        let mut headers = HeaderMap::new();
        headers.insert("idempotency-key", "key-1".parse().unwrap());

        complete_task(
            State(state.clone()),
            ctx(tenant_id),
            Path(task_id),
            headers.clone(),
            Json(CompleteUserTaskRequest {
                actor: "alice".to_string(),
                action: "approve".to_string(),
                payload: None,
            }),
        )
        .await
        .unwrap();

        let second = complete_task(
            State(state),
            ctx(tenant_id),
            Path(task_id),
            headers,
            Json(CompleteUserTaskRequest {
                actor: "alice".to_string(),
                action: "reject".to_string(),
                payload: None,
            }),
        )
        .await;

        assert!(matches!(second, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn completing_an_already_completed_task_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let task_id = seed_task(&store, tenant_id).await;
        let state = AppState::new(store.clone());

        let body = || CompleteUserTaskRequest {
            actor: "alice".to_string(),
            action: "approve".to_string(),
            payload: None,
        };

        let first = complete_task(
            State(state.clone()),
            ctx(tenant_id),
            Path(task_id),
            HeaderMap::new(),
            Json(body()),
        )
        .await
        .unwrap()
        .0;

        let second = complete_task(
            State(state),
            ctx(tenant_id),
            Path(task_id),
            HeaderMap::new(),
            Json(CompleteUserTaskRequest {
                actor: "bob".to_string(),
                action: "reject".to_string(),
                payload: None,
            }),
        )
        .await
        .unwrap()
        .0;

        assert_eq!(second.actor_identity, first.actor_identity);
        assert_eq!(second.action, first.action);
    }
}

async fn store_idempotency(
    state: &AppState,
    tenant_id: orchestrator_core::store::TenantId,
    key: &str,
    subject_id: Uuid,
    request_hash: &str,
    view: &UserTaskView,
) -> Result<(), ApiError> {
    let response_payload = serde_json::to_value(view).map_err(|e| ApiError::from(OrchestratorError::Store(e.to_string())))?;
    state
        .store
        .save_user_task_idempotency(&IdempotencyRecord {
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
