use std::sync::Arc;

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use orchestrator_core::store::AuditEvent;

use crate::auth::TenantCtx;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct AuditEventView {
    pub id: Uuid,
    pub event_type: String,
    pub actor_identity: Option<String>,
    pub correlation_id: Option<String>,
    pub business_key: Option<String>,
    pub workflow_instance_id: Option<Uuid>,
    pub definition_version_id: Option<Uuid>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl From<AuditEvent> for AuditEventView {
    fn from(e: AuditEvent) -> Self {
        Self {
            id: e.id,
            event_type: format!("{:?}", e.event_type).to_lowercase(),
            actor_identity: e.actor_identity,
            correlation_id: e.correlation_id,
            business_key: e.business_key,
            workflow_instance_id: e.workflow_instance_id,
            definition_version_id: e.definition_version_id,
            payload: e.payload,
            created_at: e.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub workflow_instance_id: Option<Uuid>,
    pub business_key: Option<String>,
}

/// `GET /audit`
pub async fn list_audit_events(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEventView>>, ApiError> {
    let events = if let Some(instance_id) = query.workflow_instance_id {
        state.store.list_audit_events(ctx.tenant_id, instance_id).await
    } else if let Some(business_key) = &query.business_key {
        state
            .store
            .list_audit_events_by_business_key(ctx.tenant_id, business_key)
            .await
    } else {
        state.store.list_all_audit_events(ctx.tenant_id).await
    }
    .map_err(ApiError::from)?;

    Ok(Json(events.into_iter().map(AuditEventView::from).collect()))
}
