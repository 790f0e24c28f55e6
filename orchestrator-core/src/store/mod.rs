//! Persistence trait for every tenant-scoped entity this engine
//! manages, plus its in-memory and Postgres implementations.
//!
//! Every method takes a `tenant_id` first and filters by it — there
//! is no ambient tenant context variable (see [`crate::error`] for
//! why that reflective style was dropped). The engine and HTTP layer
//! talk to storage exclusively through this trait so a Postgres-backed
//! deployment and an in-memory test harness share one call surface.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::bpmn::{CatalogBindingPlaceholder, FormSchemaRef};
use crate::error::Result;
use crate::interpreter::EngineState;

pub type TenantId = Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantApiKey {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub key_hash: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub process_key: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinitionVersion {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub definition_id: Uuid,
    pub version: i32,
    pub bpmn_xml: String,
    pub form_schema_refs: Vec<FormSchemaRef>,
    pub catalog_binding_placeholders: Vec<CatalogBindingPlaceholder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Waiting,
    Completed,
    Failed,
}

impl From<crate::interpreter::RunStatus> for InstanceStatus {
    fn from(status: crate::interpreter::RunStatus) -> Self {
        match status {
            crate::interpreter::RunStatus::Running => InstanceStatus::Running,
            crate::interpreter::RunStatus::Waiting => InstanceStatus::Waiting,
            crate::interpreter::RunStatus::Completed => InstanceStatus::Completed,
            crate::interpreter::RunStatus::Failed => InstanceStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub definition_version_id: Uuid,
    pub status: InstanceStatus,
    pub correlation_id: String,
    pub business_key: String,
    pub serialized_state: EngineState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserTaskStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserTask {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub workflow_instance_id: Uuid,
    pub task_id: String,
    pub name: String,
    pub task_type: String,
    pub status: UserTaskStatus,
    pub actor_identity: Option<String>,
    pub action: Option<String>,
    pub action_data: Option<Value>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTaskStatus {
    Pending,
    InProgress,
    Waiting,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTaskExecutionMode {
    Sync,
    Async,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTask {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub workflow_instance_id: Uuid,
    pub task_id: String,
    pub name: String,
    pub task_type: String,
    pub element_id: String,
    pub element_name: String,
    pub status: ServiceTaskStatus,
    pub execution_mode: ServiceTaskExecutionMode,
    pub catalog_service_task_id: Option<Uuid>,
    pub request_payload: Option<Value>,
    pub response_payload: Option<Value>,
    pub last_error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub idempotency_key: String,
    pub subject_id: Uuid,
    pub request_hash: String,
    pub response_payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    DefinitionUpload,
    InstanceStart,
    UserTaskComplete,
    ServiceTaskStart,
    ServiceTaskCallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub event_type: AuditEventType,
    pub actor_identity: Option<String>,
    pub correlation_id: Option<String>,
    pub business_key: Option<String>,
    pub workflow_instance_id: Option<Uuid>,
    pub definition_version_id: Option<Uuid>,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityCatalogEntry {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub external_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub service_url: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogServiceTask {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub catalog_entry_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantDiscoveryEndpoint {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub endpoint_url: String,
    pub api_key: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<String>,
    pub last_sync_error: Option<String>,
}

/// Result of a locking read: the row plus a guard type parameter left
/// to the implementation (the Postgres store returns it inside an
/// open transaction the caller must commit; the in-memory store has
/// no real lock to hold and returns the row directly).
#[async_trait]
pub trait OrchestratorStore: Send + Sync {
    // ── Tenants & API keys ──

    async fn find_tenant_by_api_key_hash(&self, key_hash: &str) -> Result<Option<Tenant>>;
    async fn load_api_key_raw_material(&self, tenant_id: TenantId) -> Result<Option<String>>;

    // ── Catalog ──

    async fn list_catalog_entries(&self, tenant_id: TenantId) -> Result<Vec<CapabilityCatalogEntry>>;
    async fn list_catalog_service_tasks_for_entry(
        &self,
        tenant_id: TenantId,
        catalog_entry_id: Uuid,
    ) -> Result<Vec<CatalogServiceTask>>;
    async fn find_catalog_service_task(
        &self,
        tenant_id: TenantId,
        catalog_entry_id: Uuid,
        external_id: &str,
    ) -> Result<Option<CatalogServiceTask>>;
    async fn get_catalog_service_task(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<CatalogServiceTask>>;

    // ── Workflow definitions ──

    async fn upsert_definition(
        &self,
        tenant_id: TenantId,
        process_key: &str,
        name: &str,
    ) -> Result<WorkflowDefinition>;
    async fn next_definition_version(&self, tenant_id: TenantId, definition_id: Uuid) -> Result<i32>;
    async fn save_definition_version(&self, version: &WorkflowDefinitionVersion) -> Result<()>;
    async fn get_definition_version(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<WorkflowDefinitionVersion>>;
    async fn get_definition_version_by_number(
        &self,
        tenant_id: TenantId,
        process_key: &str,
        version: i32,
    ) -> Result<Option<WorkflowDefinitionVersion>>;
    async fn latest_definition_version(
        &self,
        tenant_id: TenantId,
        process_key: &str,
    ) -> Result<Option<WorkflowDefinitionVersion>>;

    // ── Workflow instances ──

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()>;
    async fn get_instance(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<WorkflowInstance>>;
    /// Load the instance row locked for update; callers must follow up
    /// with `save_instance` in the same logical transaction.
    async fn lock_instance(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<WorkflowInstance>>;

    // ── User tasks ──

    async fn create_user_task(&self, task: &UserTask) -> Result<()>;
    async fn list_open_user_tasks(&self, tenant_id: TenantId, instance_id: Uuid) -> Result<Vec<UserTask>>;
    /// All open user tasks for the tenant, across every instance.
    async fn list_all_open_user_tasks(&self, tenant_id: TenantId) -> Result<Vec<UserTask>>;
    async fn lock_user_task(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
        task_id: &str,
    ) -> Result<Option<UserTask>>;
    /// Load the task row locked for update by its own id (the row
    /// identity exposed to HTTP clients), rather than by BPMN task_id.
    async fn lock_user_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<UserTask>>;
    async fn save_user_task(&self, task: &UserTask) -> Result<()>;

    // ── Service tasks ──

    async fn create_service_task(&self, task: &ServiceTask) -> Result<()>;
    async fn list_active_service_tasks(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
    ) -> Result<Vec<ServiceTask>>;
    /// All service tasks for the tenant, across every instance.
    async fn list_all_service_tasks(&self, tenant_id: TenantId) -> Result<Vec<ServiceTask>>;
    async fn lock_service_task(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
        task_id: &str,
    ) -> Result<Option<ServiceTask>>;
    async fn get_service_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<ServiceTask>>;
    /// Load the task row locked for update by its own id.
    async fn lock_service_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<ServiceTask>>;
    async fn save_service_task(&self, task: &ServiceTask) -> Result<()>;

    // ── Idempotency ──

    async fn find_user_task_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;
    async fn save_user_task_idempotency(&self, record: &IdempotencyRecord) -> Result<()>;
    async fn find_service_task_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>>;
    async fn save_service_task_idempotency(&self, record: &IdempotencyRecord) -> Result<()>;

    // ── Audit log ──

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()>;
    async fn list_audit_events(&self, tenant_id: TenantId, instance_id: Uuid) -> Result<Vec<AuditEvent>>;
    async fn list_audit_events_by_business_key(
        &self,
        tenant_id: TenantId,
        business_key: &str,
    ) -> Result<Vec<AuditEvent>>;
    async fn list_all_audit_events(&self, tenant_id: TenantId) -> Result<Vec<AuditEvent>>;

    // ── Discovery endpoint ──

    async fn get_discovery_endpoint(&self, tenant_id: TenantId) -> Result<Option<TenantDiscoveryEndpoint>>;
    async fn upsert_discovery_endpoint(
        &self,
        tenant_id: TenantId,
        endpoint_url: &str,
        api_key: &str,
    ) -> Result<TenantDiscoveryEndpoint>;
}
