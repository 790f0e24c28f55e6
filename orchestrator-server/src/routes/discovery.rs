use std::sync::Arc;

use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use orchestrator_core::store::{CapabilityCatalogEntry, CatalogServiceTask};

use crate::auth::TenantCtx;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetDiscoveryEndpointRequest {
    pub endpoint_url: String,
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryEndpointView {
    pub endpoint_url: String,
    pub last_synced_at: Option<chrono::DateTime<chrono::Utc>>,
    pub last_sync_status: Option<String>,
    pub last_sync_error: Option<String>,
}

/// `GET /discovery/endpoint`
pub async fn get_endpoint(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
) -> Result<Json<DiscoveryEndpointView>, ApiError> {
    let endpoint = state
        .store
        .get_discovery_endpoint(ctx.tenant_id)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(DiscoveryEndpointView {
        endpoint_url: endpoint.endpoint_url,
        last_synced_at: endpoint.last_synced_at,
        last_sync_status: endpoint.last_sync_status,
        last_sync_error: endpoint.last_sync_error,
    }))
}

/// `POST /discovery/endpoint` — stores the tenant's discovery config.
/// The sync itself (schema validation, catalog/RBAC replacement) is a
/// separate out-of-band process this crate does not run.
pub async fn set_endpoint(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Json(body): Json<SetDiscoveryEndpointRequest>,
) -> Result<Json<DiscoveryEndpointView>, ApiError> {
    let endpoint = state
        .store
        .upsert_discovery_endpoint(ctx.tenant_id, &body.endpoint_url, &body.api_key)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(DiscoveryEndpointView {
        endpoint_url: endpoint.endpoint_url,
        last_synced_at: endpoint.last_synced_at,
        last_sync_status: endpoint.last_sync_status,
        last_sync_error: endpoint.last_sync_error,
    }))
}

#[derive(Debug, Serialize)]
pub struct CatalogEntryView {
    pub id: uuid::Uuid,
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub service_url: String,
    pub service_tasks: Vec<CatalogServiceTaskView>,
}

#[derive(Debug, Serialize)]
pub struct CatalogServiceTaskView {
    pub id: uuid::Uuid,
    pub external_id: String,
    pub name: String,
    pub url: String,
}

impl From<CatalogServiceTask> for CatalogServiceTaskView {
    fn from(t: CatalogServiceTask) -> Self {
        Self {
            id: t.id,
            external_id: t.external_id,
            name: t.name,
            url: t.url,
        }
    }
}

/// `GET /discovery/catalog` — capability catalog with nested service tasks.
pub async fn list_catalog(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
) -> Result<Json<Vec<CatalogEntryView>>, ApiError> {
    let entries: Vec<CapabilityCatalogEntry> = state
        .store
        .list_catalog_entries(ctx.tenant_id)
        .await
        .map_err(ApiError::from)?;

    let mut views = Vec::with_capacity(entries.len());
    for entry in entries {
        let service_tasks = state
            .store
            .list_catalog_service_tasks_for_entry(ctx.tenant_id, entry.id)
            .await
            .map_err(ApiError::from)?
            .into_iter()
            .map(CatalogServiceTaskView::from)
            .collect();

        views.push(CatalogEntryView {
            id: entry.id,
            external_id: entry.external_id,
            name: entry.name,
            description: entry.description,
            category: entry.category,
            service_url: entry.service_url,
            service_tasks,
        });
    }

    Ok(Json(views))
}
