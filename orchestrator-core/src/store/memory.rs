//! In-memory `OrchestratorStore` used by tests and local demos. Keeps
//! everything behind a single `Mutex` — correctness over throughput,
//! since nothing here needs to survive a process restart.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{
    AuditEvent, CapabilityCatalogEntry, CatalogServiceTask, IdempotencyRecord, ServiceTask, Tenant,
    TenantApiKey, TenantDiscoveryEndpoint, TenantId, UserTask, WorkflowDefinition,
    WorkflowDefinitionVersion, WorkflowInstance,
};
use crate::error::Result;

#[derive(Default)]
struct Tables {
    tenants: Vec<Tenant>,
    api_keys: Vec<TenantApiKey>,
    catalog_entries: Vec<CapabilityCatalogEntry>,
    catalog_service_tasks: Vec<CatalogServiceTask>,
    definitions: Vec<WorkflowDefinition>,
    definition_versions: Vec<WorkflowDefinitionVersion>,
    instances: HashMap<Uuid, WorkflowInstance>,
    user_tasks: Vec<UserTask>,
    service_tasks: Vec<ServiceTask>,
    user_task_idempotency: Vec<IdempotencyRecord>,
    service_task_idempotency: Vec<IdempotencyRecord>,
    audit_events: Vec<AuditEvent>,
    discovery_endpoints: Vec<TenantDiscoveryEndpoint>,
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
        }
    }

    /// Test/demo seam: register a tenant with a pre-hashed API key.
    pub fn seed_tenant(&self, tenant: Tenant, api_key: TenantApiKey) {
        let mut tables = self.tables.lock().unwrap();
        tables.tenants.push(tenant);
        tables.api_keys.push(api_key);
    }

    pub fn seed_catalog_entry(&self, entry: CapabilityCatalogEntry) {
        self.tables.lock().unwrap().catalog_entries.push(entry);
    }

    pub fn seed_catalog_service_task(&self, task: CatalogServiceTask) {
        self.tables.lock().unwrap().catalog_service_tasks.push(task);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl super::OrchestratorStore for MemoryStore {
    async fn find_tenant_by_api_key_hash(&self, key_hash: &str) -> Result<Option<Tenant>> {
        let tables = self.tables.lock().unwrap();
        let Some(key) = tables.api_keys.iter().find(|k| k.key_hash == key_hash) else {
            return Ok(None);
        };
        Ok(tables.tenants.iter().find(|t| t.id == key.tenant_id).cloned())
    }

    async fn load_api_key_raw_material(&self, _tenant_id: TenantId) -> Result<Option<String>> {
        Ok(None)
    }

    async fn list_catalog_entries(&self, tenant_id: TenantId) -> Result<Vec<CapabilityCatalogEntry>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .catalog_entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_catalog_service_tasks_for_entry(
        &self,
        tenant_id: TenantId,
        catalog_entry_id: Uuid,
    ) -> Result<Vec<CatalogServiceTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .catalog_service_tasks
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.catalog_entry_id == catalog_entry_id)
            .cloned()
            .collect())
    }

    async fn find_catalog_service_task(
        &self,
        tenant_id: TenantId,
        catalog_entry_id: Uuid,
        external_id: &str,
    ) -> Result<Option<CatalogServiceTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .catalog_service_tasks
            .iter()
            .find(|t| {
                t.tenant_id == tenant_id
                    && t.catalog_entry_id == catalog_entry_id
                    && t.external_id == external_id
            })
            .cloned())
    }

    async fn get_catalog_service_task(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<CatalogServiceTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .catalog_service_tasks
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == id)
            .cloned())
    }

    async fn upsert_definition(
        &self,
        tenant_id: TenantId,
        process_key: &str,
        name: &str,
    ) -> Result<WorkflowDefinition> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .definitions
            .iter_mut()
            .find(|d| d.tenant_id == tenant_id && d.process_key == process_key)
        {
            existing.name = name.to_string();
            return Ok(existing.clone());
        }
        let definition = WorkflowDefinition {
            id: Uuid::new_v4(),
            tenant_id,
            process_key: process_key.to_string(),
            name: name.to_string(),
        };
        tables.definitions.push(definition.clone());
        Ok(definition)
    }

    async fn next_definition_version(&self, tenant_id: TenantId, definition_id: Uuid) -> Result<i32> {
        let tables = self.tables.lock().unwrap();
        let max = tables
            .definition_versions
            .iter()
            .filter(|v| v.tenant_id == tenant_id && v.definition_id == definition_id)
            .map(|v| v.version)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn save_definition_version(&self, version: &WorkflowDefinitionVersion) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .definition_versions
            .push(version.clone());
        Ok(())
    }

    async fn get_definition_version(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<WorkflowDefinitionVersion>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .definition_versions
            .iter()
            .find(|v| v.tenant_id == tenant_id && v.id == id)
            .cloned())
    }

    async fn get_definition_version_by_number(
        &self,
        tenant_id: TenantId,
        process_key: &str,
        version: i32,
    ) -> Result<Option<WorkflowDefinitionVersion>> {
        let tables = self.tables.lock().unwrap();
        let Some(definition) = tables
            .definitions
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.process_key == process_key)
        else {
            return Ok(None);
        };
        Ok(tables
            .definition_versions
            .iter()
            .find(|v| v.tenant_id == tenant_id && v.definition_id == definition.id && v.version == version)
            .cloned())
    }

    async fn latest_definition_version(
        &self,
        tenant_id: TenantId,
        process_key: &str,
    ) -> Result<Option<WorkflowDefinitionVersion>> {
        let tables = self.tables.lock().unwrap();
        let Some(definition) = tables
            .definitions
            .iter()
            .find(|d| d.tenant_id == tenant_id && d.process_key == process_key)
        else {
            return Ok(None);
        };
        Ok(tables
            .definition_versions
            .iter()
            .filter(|v| v.tenant_id == tenant_id && v.definition_id == definition.id)
            .max_by_key(|v| v.version)
            .cloned())
    }

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .instances
            .insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get_instance(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<WorkflowInstance>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .instances
            .get(&id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn lock_instance(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<WorkflowInstance>> {
        self.get_instance(tenant_id, id).await
    }

    async fn create_user_task(&self, task: &UserTask) -> Result<()> {
        self.tables.lock().unwrap().user_tasks.push(task.clone());
        Ok(())
    }

    async fn list_open_user_tasks(&self, tenant_id: TenantId, instance_id: Uuid) -> Result<Vec<UserTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .user_tasks
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.workflow_instance_id == instance_id
                    && t.status == super::UserTaskStatus::Pending
            })
            .cloned()
            .collect())
    }

    async fn list_all_open_user_tasks(&self, tenant_id: TenantId) -> Result<Vec<UserTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .user_tasks
            .iter()
            .filter(|t| t.tenant_id == tenant_id && t.status == super::UserTaskStatus::Pending)
            .cloned()
            .collect())
    }

    async fn lock_user_task(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
        task_id: &str,
    ) -> Result<Option<UserTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .user_tasks
            .iter()
            .find(|t| {
                t.tenant_id == tenant_id
                    && t.workflow_instance_id == instance_id
                    && t.task_id == task_id
            })
            .cloned())
    }

    async fn lock_user_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<UserTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .user_tasks
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == id)
            .cloned())
    }

    async fn save_user_task(&self, task: &UserTask) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.user_tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task.clone();
        } else {
            tables.user_tasks.push(task.clone());
        }
        Ok(())
    }

    async fn create_service_task(&self, task: &ServiceTask) -> Result<()> {
        self.tables.lock().unwrap().service_tasks.push(task.clone());
        Ok(())
    }

    async fn list_active_service_tasks(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
    ) -> Result<Vec<ServiceTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .service_tasks
            .iter()
            .filter(|t| {
                t.tenant_id == tenant_id
                    && t.workflow_instance_id == instance_id
                    && !matches!(t.status, super::ServiceTaskStatus::Completed)
            })
            .cloned()
            .collect())
    }

    async fn list_all_service_tasks(&self, tenant_id: TenantId) -> Result<Vec<ServiceTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .service_tasks
            .iter()
            .filter(|t| t.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn lock_service_task(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
        task_id: &str,
    ) -> Result<Option<ServiceTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .service_tasks
            .iter()
            .find(|t| {
                t.tenant_id == tenant_id
                    && t.workflow_instance_id == instance_id
                    && t.task_id == task_id
            })
            .cloned())
    }

    async fn get_service_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<ServiceTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .service_tasks
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == id)
            .cloned())
    }

    async fn lock_service_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<ServiceTask>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .service_tasks
            .iter()
            .find(|t| t.tenant_id == tenant_id && t.id == id)
            .cloned())
    }

    async fn save_service_task(&self, task: &ServiceTask) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.service_tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task.clone();
        } else {
            tables.service_tasks.push(task.clone());
        }
        Ok(())
    }

    async fn find_user_task_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .user_task_idempotency
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.idempotency_key == key)
            .cloned())
    }

    async fn save_user_task_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .user_task_idempotency
            .push(record.clone());
        Ok(())
    }

    async fn find_service_task_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .service_task_idempotency
            .iter()
            .find(|r| r.tenant_id == tenant_id && r.idempotency_key == key)
            .cloned())
    }

    async fn save_service_task_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        self.tables
            .lock()
            .unwrap()
            .service_task_idempotency
            .push(record.clone());
        Ok(())
    }

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        self.tables.lock().unwrap().audit_events.push(event.clone());
        Ok(())
    }

    async fn list_audit_events(&self, tenant_id: TenantId, instance_id: Uuid) -> Result<Vec<AuditEvent>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .audit_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.workflow_instance_id == Some(instance_id))
            .cloned()
            .collect())
    }

    async fn list_audit_events_by_business_key(
        &self,
        tenant_id: TenantId,
        business_key: &str,
    ) -> Result<Vec<AuditEvent>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .audit_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.business_key.as_deref() == Some(business_key))
            .cloned()
            .collect())
    }

    async fn list_all_audit_events(&self, tenant_id: TenantId) -> Result<Vec<AuditEvent>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .audit_events
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn get_discovery_endpoint(&self, tenant_id: TenantId) -> Result<Option<TenantDiscoveryEndpoint>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .discovery_endpoints
            .iter()
            .find(|e| e.tenant_id == tenant_id)
            .cloned())
    }

    async fn upsert_discovery_endpoint(
        &self,
        tenant_id: TenantId,
        endpoint_url: &str,
        api_key: &str,
    ) -> Result<TenantDiscoveryEndpoint> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .discovery_endpoints
            .iter_mut()
            .find(|e| e.tenant_id == tenant_id)
        {
            existing.endpoint_url = endpoint_url.to_string();
            existing.api_key = api_key.to_string();
            return Ok(existing.clone());
        }
        let endpoint = TenantDiscoveryEndpoint {
            id: Uuid::new_v4(),
            tenant_id,
            endpoint_url: endpoint_url.to_string(),
            api_key: api_key.to_string(),
            last_synced_at: None,
            last_sync_status: None,
            last_sync_error: None,
        };
        tables.discovery_endpoints.push(endpoint.clone());
        Ok(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OrchestratorStore;

    #[tokio::test]
    async fn upsert_definition_reuses_row_across_versions() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let first = store
            .upsert_definition(tenant_id, "onboarding", "Onboarding")
            .await
            .unwrap();
        let second = store
            .upsert_definition(tenant_id, "onboarding", "Onboarding v2")
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "Onboarding v2");
    }

    #[tokio::test]
    async fn next_definition_version_increments() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let definition = store
            .upsert_definition(tenant_id, "onboarding", "Onboarding")
            .await
            .unwrap();
        assert_eq!(
            store
                .next_definition_version(tenant_id, definition.id)
                .await
                .unwrap(),
            1
        );
        store
            .save_definition_version(&WorkflowDefinitionVersion {
                id: Uuid::new_v4(),
                tenant_id,
                definition_id: definition.id,
                version: 1,
                bpmn_xml: String::new(),
                form_schema_refs: Vec::new(),
                catalog_binding_placeholders: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(
            store
                .next_definition_version(tenant_id, definition.id)
                .await
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn tenant_isolation_hides_other_tenants_instances() {
        let store = MemoryStore::new();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();
        let instance_id = Uuid::new_v4();
        store
            .save_instance(&WorkflowInstance {
                id: instance_id,
                tenant_id: tenant_a,
                definition_version_id: Uuid::new_v4(),
                status: super::super::InstanceStatus::Running,
                correlation_id: String::new(),
                business_key: String::new(),
                serialized_state: Default::default(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(store.get_instance(tenant_b, instance_id).await.unwrap().is_none());
        assert!(store.get_instance(tenant_a, instance_id).await.unwrap().is_some());
    }
}
