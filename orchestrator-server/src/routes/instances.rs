use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::TenantCtx;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ActiveUserTask {
    pub task_id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct ActiveServiceTask {
    pub task_id: String,
    pub name: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct InstanceDetail {
    pub id: Uuid,
    pub status: String,
    pub correlation_id: String,
    pub business_key: String,
    pub active_user_tasks: Vec<ActiveUserTask>,
    pub active_service_tasks: Vec<ActiveServiceTask>,
}

/// `GET /instances/{id}`
pub async fn get_instance(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Path(id): Path<Uuid>,
) -> Result<Json<InstanceDetail>, ApiError> {
    let instance = state
        .store
        .get_instance(ctx.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;

    let user_tasks = state
        .store
        .list_open_user_tasks(ctx.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .into_iter()
        .map(|t| ActiveUserTask {
            task_id: t.task_id,
            name: t.name,
        })
        .collect();

    let service_tasks = state
        .store
        .list_active_service_tasks(ctx.tenant_id, id)
        .await
        .map_err(ApiError::from)?
        .into_iter()
        .map(|t| ActiveServiceTask {
            task_id: t.task_id,
            name: t.name,
            status: format!("{:?}", t.status).to_lowercase(),
        })
        .collect();

    Ok(Json(InstanceDetail {
        id: instance.id,
        status: format!("{:?}", instance.status).to_lowercase(),
        correlation_id: instance.correlation_id,
        business_key: instance.business_key,
        active_user_tasks: user_tasks,
        active_service_tasks: service_tasks,
    }))
}
