use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use orchestrator_core::bpmn::validate_bpmn_xml;
use orchestrator_core::store::WorkflowDefinitionVersion;
use orchestrator_core::OrchestratorError;

use crate::auth::TenantCtx;
use crate::error::ApiError;
use crate::orchestrator;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct VersionSummary {
    pub process_key: String,
    pub version: i32,
}

#[derive(Debug, Serialize)]
pub struct VersionDetail {
    pub process_key: String,
    pub version: i32,
    pub bpmn_xml: String,
    pub form_schema_refs: Value,
    pub catalog_binding_placeholders: Value,
}

impl From<WorkflowDefinitionVersion> for VersionDetail {
    fn from(v: WorkflowDefinitionVersion) -> Self {
        Self {
            process_key: String::new(),
            version: v.version,
            bpmn_xml: v.bpmn_xml,
            form_schema_refs: serde_json::to_value(&v.form_schema_refs).unwrap_or(Value::Null),
            catalog_binding_placeholders: serde_json::to_value(&v.catalog_binding_placeholders)
                .unwrap_or(Value::Null),
        }
    }
}

/// `POST /workflows` — multipart upload with a `bpmn` file field.
pub async fn upload(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    mut multipart: Multipart,
) -> Result<Json<VersionSummary>, ApiError> {
    let mut bpmn_xml: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("bpmn") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?;
            bpmn_xml = Some(String::from_utf8_lossy(&bytes).into_owned());
        }
    }
    let bpmn_xml = bpmn_xml.ok_or_else(|| ApiError::BadRequest("missing `bpmn` field".to_string()))?;

    let snapshot = validate_bpmn_xml(&bpmn_xml).map_err(|errors| ApiError::from(OrchestratorError::InvalidBpmn(errors)))?;

    let definition = state
        .store
        .upsert_definition(ctx.tenant_id, &snapshot.process_key, &snapshot.process_name)
        .await
        .map_err(ApiError::from)?;
    let version = state
        .store
        .next_definition_version(ctx.tenant_id, definition.id)
        .await
        .map_err(ApiError::from)?;

    state
        .store
        .save_definition_version(&WorkflowDefinitionVersion {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            definition_id: definition.id,
            version,
            bpmn_xml,
            form_schema_refs: snapshot.form_schema_refs,
            catalog_binding_placeholders: snapshot.catalog_binding_placeholders,
        })
        .await
        .map_err(ApiError::from)?;

    Ok(Json(VersionSummary {
        process_key: snapshot.process_key,
        version,
    }))
}

/// `GET /workflows/{key}/versions/{v}`
pub async fn get_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Path((process_key, version)): Path<(String, i32)>,
) -> Result<Json<VersionDetail>, ApiError> {
    let version_row = find_version(&state, ctx.tenant_id, &process_key, version).await?;
    let mut detail = VersionDetail::from(version_row);
    detail.process_key = process_key;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize, Default)]
pub struct StartInstanceRequest {
    pub correlation_id: Option<String>,
    pub business_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct InstanceSummary {
    pub id: Uuid,
    pub status: String,
}

/// `POST /workflows/{key}/versions/{v}/instances`
pub async fn start_instance(
    State(state): State<AppState>,
    Extension(ctx): Extension<Arc<TenantCtx>>,
    Path((process_key, version)): Path<(String, i32)>,
    Json(body): Json<StartInstanceRequest>,
) -> Result<Json<InstanceSummary>, ApiError> {
    let version_row = find_version(&state, ctx.tenant_id, &process_key, version).await?;

    let instance = orchestrator::start_instance(
        &state,
        ctx.tenant_id,
        &version_row,
        body.correlation_id.unwrap_or_default(),
        body.business_key.unwrap_or_default(),
    )
    .await?;

    Ok(Json(InstanceSummary {
        id: instance.id,
        status: format!("{:?}", instance.status).to_lowercase(),
    }))
}

async fn find_version(
    state: &AppState,
    tenant_id: orchestrator_core::store::TenantId,
    process_key: &str,
    version: i32,
) -> Result<WorkflowDefinitionVersion, ApiError> {
    state
        .store
        .get_definition_version_by_number(tenant_id, process_key, version)
        .await
        .map_err(ApiError::from)?
        .ok_or(ApiError::NotFound)
}
