//! Tenant API-key boundary filter. Every route but `/health` runs
//! behind this: it hashes the `X-Tenant-Api-Key` header, looks up the
//! owning tenant, and stamps the request with a `TenantCtx` extension.
//! There is no ambient/thread-local tenant context — every handler
//! takes the context as an explicit extractor argument.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

use orchestrator_core::hashing::sha256_hex;
use orchestrator_core::store::{Tenant, TenantId};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Clone)]
pub struct TenantCtx {
    pub tenant_id: TenantId,
    pub raw_api_key: String,
}

const API_KEY_HEADER: &str = "x-tenant-api-key";

fn extract_raw_key(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing X-Tenant-Api-Key header".to_string()))
}

pub async fn tenant_boundary(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let raw_key = extract_raw_key(req.headers())?.to_string();
    let key_hash = sha256_hex(raw_key.as_bytes());

    let tenant: Tenant = state
        .store
        .find_tenant_by_api_key_hash(&key_hash)
        .await
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::Unauthorized("invalid API key".to_string()))?;

    req.extensions_mut().insert(Arc::new(TenantCtx {
        tenant_id: tenant.id,
        raw_api_key: raw_key,
    }));

    Ok(next.run(req).await)
}
