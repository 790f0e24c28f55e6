//! PostgreSQL-backed `OrchestratorStore`. Raw `sqlx::query` rather than
//! the `query!` macros, since those need a live `DATABASE_URL` at
//! compile time; every row is pulled out by column name via `Row::get`.

use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use super::{
    AuditEvent, AuditEventType, CapabilityCatalogEntry, CatalogServiceTask, IdempotencyRecord,
    InstanceStatus, ServiceTask, ServiceTaskExecutionMode, ServiceTaskStatus, Tenant, TenantApiKey,
    TenantDiscoveryEndpoint, TenantId, UserTask, UserTaskStatus, WorkflowDefinition,
    WorkflowDefinitionVersion, WorkflowInstance,
};
use crate::error::{OrchestratorError, Result};

fn store_err(e: sqlx::Error) -> OrchestratorError {
    OrchestratorError::Store(e.to_string())
}

fn json_err(e: serde_json::Error) -> OrchestratorError {
    OrchestratorError::Store(e.to_string())
}

fn instance_status_str(status: InstanceStatus) -> &'static str {
    match status {
        InstanceStatus::Running => "running",
        InstanceStatus::Waiting => "waiting",
        InstanceStatus::Completed => "completed",
        InstanceStatus::Failed => "failed",
    }
}

fn instance_status_from_str(s: &str) -> InstanceStatus {
    match s {
        "waiting" => InstanceStatus::Waiting,
        "completed" => InstanceStatus::Completed,
        "failed" => InstanceStatus::Failed,
        _ => InstanceStatus::Running,
    }
}

fn user_task_status_str(status: UserTaskStatus) -> &'static str {
    match status {
        UserTaskStatus::Pending => "pending",
        UserTaskStatus::Completed => "completed",
    }
}

fn user_task_status_from_str(s: &str) -> UserTaskStatus {
    match s {
        "completed" => UserTaskStatus::Completed,
        _ => UserTaskStatus::Pending,
    }
}

fn service_task_status_str(status: ServiceTaskStatus) -> &'static str {
    match status {
        ServiceTaskStatus::Pending => "pending",
        ServiceTaskStatus::InProgress => "in_progress",
        ServiceTaskStatus::Waiting => "waiting",
        ServiceTaskStatus::Completed => "completed",
        ServiceTaskStatus::Failed => "failed",
    }
}

fn service_task_status_from_str(s: &str) -> ServiceTaskStatus {
    match s {
        "in_progress" => ServiceTaskStatus::InProgress,
        "waiting" => ServiceTaskStatus::Waiting,
        "completed" => ServiceTaskStatus::Completed,
        "failed" => ServiceTaskStatus::Failed,
        _ => ServiceTaskStatus::Pending,
    }
}

fn execution_mode_str(mode: ServiceTaskExecutionMode) -> &'static str {
    match mode {
        ServiceTaskExecutionMode::Sync => "sync",
        ServiceTaskExecutionMode::Async => "async",
    }
}

fn execution_mode_from_str(s: &str) -> ServiceTaskExecutionMode {
    match s {
        "async" => ServiceTaskExecutionMode::Async,
        _ => ServiceTaskExecutionMode::Sync,
    }
}

fn audit_event_type_str(kind: AuditEventType) -> &'static str {
    match kind {
        AuditEventType::DefinitionUpload => "DEFINITION_UPLOAD",
        AuditEventType::InstanceStart => "INSTANCE_START",
        AuditEventType::UserTaskComplete => "USER_TASK_COMPLETE",
        AuditEventType::ServiceTaskStart => "SERVICE_TASK_START",
        AuditEventType::ServiceTaskCallback => "SERVICE_TASK_CALLBACK",
    }
}

fn audit_event_type_from_str(s: &str) -> AuditEventType {
    match s {
        "INSTANCE_START" => AuditEventType::InstanceStart,
        "USER_TASK_COMPLETE" => AuditEventType::UserTaskComplete,
        "SERVICE_TASK_START" => AuditEventType::ServiceTaskStart,
        "SERVICE_TASK_CALLBACK" => AuditEventType::ServiceTaskCallback,
        _ => AuditEventType::DefinitionUpload,
    }
}

/// PostgreSQL-backed implementation of `OrchestratorStore`.
pub struct PostgresStore {
    pool: sqlx::PgPool,
}

impl PostgresStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Run embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| OrchestratorError::Store(e.to_string()))?;
        Ok(())
    }

    fn user_task_from_row(row: &sqlx::postgres::PgRow) -> Result<UserTask> {
        let action_data: Option<serde_json::Value> = row.get("action_data");
        Ok(UserTask {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            workflow_instance_id: row.get("workflow_instance_id"),
            task_id: row.get("task_id"),
            name: row.get("name"),
            task_type: row.get("task_type"),
            status: user_task_status_from_str(row.get::<String, _>("status").as_str()),
            actor_identity: row.get("actor_identity"),
            action: row.get("action"),
            action_data,
            completed_at: row.get("completed_at"),
        })
    }

    fn service_task_from_row(row: &sqlx::postgres::PgRow) -> Result<ServiceTask> {
        Ok(ServiceTask {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            workflow_instance_id: row.get("workflow_instance_id"),
            task_id: row.get("task_id"),
            name: row.get("name"),
            task_type: row.get("task_type"),
            element_id: row.get("element_id"),
            element_name: row.get("element_name"),
            status: service_task_status_from_str(row.get::<String, _>("status").as_str()),
            execution_mode: execution_mode_from_str(row.get::<String, _>("execution_mode").as_str()),
            catalog_service_task_id: row.get("catalog_service_task_id"),
            request_payload: row.get("request_payload"),
            response_payload: row.get("response_payload"),
            last_error: row.get("last_error"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

#[async_trait]
impl super::OrchestratorStore for PostgresStore {
    // ── Tenants & API keys ──

    async fn find_tenant_by_api_key_hash(&self, key_hash: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query(
            r#"
            SELECT t.id, t.slug
            FROM tenants t
            JOIN tenant_api_keys k ON k.tenant_id = t.id
            WHERE k.key_hash = $1
            "#,
        )
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|row| Tenant {
            id: row.get("id"),
            slug: row.get("slug"),
        }))
    }

    async fn load_api_key_raw_material(&self, _tenant_id: TenantId) -> Result<Option<String>> {
        Ok(None)
    }

    // ── Catalog ──

    async fn list_catalog_entries(&self, tenant_id: TenantId) -> Result<Vec<CapabilityCatalogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, external_id, name, description, category, service_url, metadata
            FROM capability_catalog_entries
            WHERE tenant_id = $1
            ORDER BY name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter()
            .map(|row| {
                Ok(CapabilityCatalogEntry {
                    id: row.get("id"),
                    tenant_id: row.get("tenant_id"),
                    external_id: row.get("external_id"),
                    name: row.get("name"),
                    description: row.get("description"),
                    category: row.get("category"),
                    service_url: row.get("service_url"),
                    metadata: row.get("metadata"),
                })
            })
            .collect()
    }

    async fn list_catalog_service_tasks_for_entry(
        &self,
        tenant_id: TenantId,
        catalog_entry_id: Uuid,
    ) -> Result<Vec<CatalogServiceTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, catalog_entry_id, external_id, name, url
            FROM catalog_service_tasks
            WHERE tenant_id = $1 AND catalog_entry_id = $2
            ORDER BY name
            "#,
        )
        .bind(tenant_id)
        .bind(catalog_entry_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| CatalogServiceTask {
                id: row.get("id"),
                tenant_id: row.get("tenant_id"),
                catalog_entry_id: row.get("catalog_entry_id"),
                external_id: row.get("external_id"),
                name: row.get("name"),
                url: row.get("url"),
            })
            .collect())
    }

    async fn find_catalog_service_task(
        &self,
        tenant_id: TenantId,
        catalog_entry_id: Uuid,
        external_id: &str,
    ) -> Result<Option<CatalogServiceTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, catalog_entry_id, external_id, name, url
            FROM catalog_service_tasks
            WHERE tenant_id = $1 AND catalog_entry_id = $2 AND external_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(catalog_entry_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|row| CatalogServiceTask {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            catalog_entry_id: row.get("catalog_entry_id"),
            external_id: row.get("external_id"),
            name: row.get("name"),
            url: row.get("url"),
        }))
    }

    async fn get_catalog_service_task(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<CatalogServiceTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, catalog_entry_id, external_id, name, url
            FROM catalog_service_tasks
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|row| CatalogServiceTask {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            catalog_entry_id: row.get("catalog_entry_id"),
            external_id: row.get("external_id"),
            name: row.get("name"),
            url: row.get("url"),
        }))
    }

    // ── Workflow definitions ──

    async fn upsert_definition(
        &self,
        tenant_id: TenantId,
        process_key: &str,
        name: &str,
    ) -> Result<WorkflowDefinition> {
        let row = sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, tenant_id, process_key, name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, process_key) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, tenant_id, process_key, name
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(process_key)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(WorkflowDefinition {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            process_key: row.get("process_key"),
            name: row.get("name"),
        })
    }

    async fn next_definition_version(&self, tenant_id: TenantId, definition_id: Uuid) -> Result<i32> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(MAX(version), 0) AS max_version
            FROM workflow_definition_versions
            WHERE tenant_id = $1 AND definition_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(definition_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        let max_version: i32 = row.get("max_version");
        Ok(max_version + 1)
    }

    async fn save_definition_version(&self, version: &WorkflowDefinitionVersion) -> Result<()> {
        let form_schema_refs =
            serde_json::to_value(&version.form_schema_refs).map_err(json_err)?;
        let catalog_binding_placeholders =
            serde_json::to_value(&version.catalog_binding_placeholders).map_err(json_err)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definition_versions (
                id, tenant_id, definition_id, version, bpmn_xml,
                form_schema_refs, catalog_binding_placeholders
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(version.id)
        .bind(version.tenant_id)
        .bind(version.definition_id)
        .bind(version.version)
        .bind(&version.bpmn_xml)
        .bind(&form_schema_refs)
        .bind(&catalog_binding_placeholders)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get_definition_version(
        &self,
        tenant_id: TenantId,
        id: Uuid,
    ) -> Result<Option<WorkflowDefinitionVersion>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, definition_id, version, bpmn_xml,
                   form_schema_refs, catalog_binding_placeholders
            FROM workflow_definition_versions
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::definition_version_from_row).transpose()
    }

    async fn get_definition_version_by_number(
        &self,
        tenant_id: TenantId,
        process_key: &str,
        version: i32,
    ) -> Result<Option<WorkflowDefinitionVersion>> {
        let row = sqlx::query(
            r#"
            SELECT v.id, v.tenant_id, v.definition_id, v.version, v.bpmn_xml,
                   v.form_schema_refs, v.catalog_binding_placeholders
            FROM workflow_definition_versions v
            JOIN workflow_definitions d ON d.id = v.definition_id
            WHERE v.tenant_id = $1 AND d.process_key = $2 AND v.version = $3
            "#,
        )
        .bind(tenant_id)
        .bind(process_key)
        .bind(version)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::definition_version_from_row).transpose()
    }

    async fn latest_definition_version(
        &self,
        tenant_id: TenantId,
        process_key: &str,
    ) -> Result<Option<WorkflowDefinitionVersion>> {
        let row = sqlx::query(
            r#"
            SELECT v.id, v.tenant_id, v.definition_id, v.version, v.bpmn_xml,
                   v.form_schema_refs, v.catalog_binding_placeholders
            FROM workflow_definition_versions v
            JOIN workflow_definitions d ON d.id = v.definition_id
            WHERE v.tenant_id = $1 AND d.process_key = $2
            ORDER BY v.version DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(process_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::definition_version_from_row).transpose()
    }

    // ── Workflow instances ──

    async fn save_instance(&self, instance: &WorkflowInstance) -> Result<()> {
        let serialized_state =
            serde_json::to_value(&instance.serialized_state).map_err(json_err)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_instances (
                id, tenant_id, definition_version_id, status, correlation_id,
                business_key, serialized_state, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                serialized_state = EXCLUDED.serialized_state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(instance.id)
        .bind(instance.tenant_id)
        .bind(instance.definition_version_id)
        .bind(instance_status_str(instance.status))
        .bind(&instance.correlation_id)
        .bind(&instance.business_key)
        .bind(&serialized_state)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn get_instance(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, definition_version_id, status, correlation_id,
                   business_key, serialized_state, created_at, updated_at
            FROM workflow_instances
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::instance_from_row).transpose()
    }

    async fn lock_instance(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<WorkflowInstance>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, definition_version_id, status, correlation_id,
                   business_key, serialized_state, created_at, updated_at
            FROM workflow_instances
            WHERE tenant_id = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(Self::instance_from_row).transpose()
    }

    // ── User tasks ──

    async fn create_user_task(&self, task: &UserTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_tasks (
                id, tenant_id, workflow_instance_id, task_id, name, task_type, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, workflow_instance_id, task_id) DO NOTHING
            "#,
        )
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(task.workflow_instance_id)
        .bind(&task.task_id)
        .bind(&task.name)
        .bind(&task.task_type)
        .bind(user_task_status_str(task.status))
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn list_open_user_tasks(&self, tenant_id: TenantId, instance_id: Uuid) -> Result<Vec<UserTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   status, actor_identity, action, action_data, completed_at
            FROM user_tasks
            WHERE tenant_id = $1 AND workflow_instance_id = $2 AND status = 'open'
            ORDER BY task_id
            "#,
        )
        .bind(tenant_id)
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::user_task_from_row).collect()
    }

    async fn list_all_open_user_tasks(&self, tenant_id: TenantId) -> Result<Vec<UserTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   status, actor_identity, action, action_data, completed_at
            FROM user_tasks
            WHERE tenant_id = $1 AND status = 'open'
            ORDER BY task_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::user_task_from_row).collect()
    }

    async fn lock_user_task(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
        task_id: &str,
    ) -> Result<Option<UserTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   status, actor_identity, action, action_data, completed_at
            FROM user_tasks
            WHERE tenant_id = $1 AND workflow_instance_id = $2 AND task_id = $3
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(instance_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::user_task_from_row).transpose()
    }

    async fn lock_user_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<UserTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   status, actor_identity, action, action_data, completed_at
            FROM user_tasks
            WHERE tenant_id = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::user_task_from_row).transpose()
    }

    async fn save_user_task(&self, task: &UserTask) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE user_tasks SET
                status = $1, actor_identity = $2, action = $3,
                action_data = $4, completed_at = $5
            WHERE id = $6
            "#,
        )
        .bind(user_task_status_str(task.status))
        .bind(&task.actor_identity)
        .bind(&task.action)
        .bind(&task.action_data)
        .bind(task.completed_at)
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    // ── Service tasks ──

    async fn create_service_task(&self, task: &ServiceTask) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_tasks (
                id, tenant_id, workflow_instance_id, task_id, name, task_type,
                element_id, element_name, status, execution_mode, catalog_service_task_id
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (tenant_id, workflow_instance_id, task_id) DO NOTHING
            "#,
        )
        .bind(task.id)
        .bind(task.tenant_id)
        .bind(task.workflow_instance_id)
        .bind(&task.task_id)
        .bind(&task.name)
        .bind(&task.task_type)
        .bind(&task.element_id)
        .bind(&task.element_name)
        .bind(service_task_status_str(task.status))
        .bind(execution_mode_str(task.execution_mode))
        .bind(task.catalog_service_task_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn list_active_service_tasks(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
    ) -> Result<Vec<ServiceTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   element_id, element_name, status, execution_mode, catalog_service_task_id,
                   request_payload, response_payload, last_error, started_at, completed_at
            FROM service_tasks
            WHERE tenant_id = $1 AND workflow_instance_id = $2 AND status != 'completed'
            ORDER BY task_id
            "#,
        )
        .bind(tenant_id)
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::service_task_from_row).collect()
    }

    async fn list_all_service_tasks(&self, tenant_id: TenantId) -> Result<Vec<ServiceTask>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   element_id, element_name, status, execution_mode, catalog_service_task_id,
                   request_payload, response_payload, last_error, started_at, completed_at
            FROM service_tasks
            WHERE tenant_id = $1
            ORDER BY task_id
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(Self::service_task_from_row).collect()
    }

    async fn lock_service_task(
        &self,
        tenant_id: TenantId,
        instance_id: Uuid,
        task_id: &str,
    ) -> Result<Option<ServiceTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   element_id, element_name, status, execution_mode, catalog_service_task_id,
                   request_payload, response_payload, last_error, started_at, completed_at
            FROM service_tasks
            WHERE tenant_id = $1 AND workflow_instance_id = $2 AND task_id = $3
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(instance_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::service_task_from_row).transpose()
    }

    async fn get_service_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<ServiceTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   element_id, element_name, status, execution_mode, catalog_service_task_id,
                   request_payload, response_payload, last_error, started_at, completed_at
            FROM service_tasks
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::service_task_from_row).transpose()
    }

    async fn lock_service_task_by_id(&self, tenant_id: TenantId, id: Uuid) -> Result<Option<ServiceTask>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, workflow_instance_id, task_id, name, task_type,
                   element_id, element_name, status, execution_mode, catalog_service_task_id,
                   request_payload, response_payload, last_error, started_at, completed_at
            FROM service_tasks
            WHERE tenant_id = $1 AND id = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.as_ref().map(Self::service_task_from_row).transpose()
    }

    async fn save_service_task(&self, task: &ServiceTask) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE service_tasks SET
                status = $1, request_payload = $2, response_payload = $3,
                last_error = $4, started_at = $5, completed_at = $6
            WHERE id = $7
            "#,
        )
        .bind(service_task_status_str(task.status))
        .bind(&task.request_payload)
        .bind(&task.response_payload)
        .bind(&task.last_error)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    // ── Idempotency ──

    async fn find_user_task_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, idempotency_key, user_task_id AS subject_id, request_hash, response_payload
            FROM user_task_completion_idempotency
            WHERE tenant_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(Self::idempotency_from_row))
    }

    async fn save_user_task_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_task_completion_idempotency (
                id, tenant_id, idempotency_key, user_task_id, request_hash, response_payload
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(&record.idempotency_key)
        .bind(record.subject_id)
        .bind(&record.request_hash)
        .bind(&record.response_payload)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn find_service_task_idempotency(
        &self,
        tenant_id: TenantId,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, idempotency_key, service_task_id AS subject_id, request_hash, response_payload
            FROM service_task_callback_idempotency
            WHERE tenant_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(Self::idempotency_from_row))
    }

    async fn save_service_task_idempotency(&self, record: &IdempotencyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO service_task_callback_idempotency (
                id, tenant_id, idempotency_key, service_task_id, request_hash, response_payload
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, idempotency_key) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(record.tenant_id)
        .bind(&record.idempotency_key)
        .bind(record.subject_id)
        .bind(&record.request_hash)
        .bind(&record.response_payload)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    // ── Audit log ──

    async fn append_audit_event(&self, event: &AuditEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_events (
                id, tenant_id, event_type, actor_identity, correlation_id, business_key,
                workflow_instance_id, definition_version_id, payload, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(audit_event_type_str(event.event_type))
        .bind(&event.actor_identity)
        .bind(&event.correlation_id)
        .bind(&event.business_key)
        .bind(event.workflow_instance_id)
        .bind(event.definition_version_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }

    async fn list_audit_events(&self, tenant_id: TenantId, instance_id: Uuid) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, event_type, actor_identity, correlation_id, business_key,
                   workflow_instance_id, definition_version_id, payload, created_at
            FROM audit_events
            WHERE tenant_id = $1 AND workflow_instance_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(Self::audit_event_from_row).collect())
    }

    async fn list_audit_events_by_business_key(
        &self,
        tenant_id: TenantId,
        business_key: &str,
    ) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, event_type, actor_identity, correlation_id, business_key,
                   workflow_instance_id, definition_version_id, payload, created_at
            FROM audit_events
            WHERE tenant_id = $1 AND business_key = $2
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .bind(business_key)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(Self::audit_event_from_row).collect())
    }

    async fn list_all_audit_events(&self, tenant_id: TenantId) -> Result<Vec<AuditEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tenant_id, event_type, actor_identity, correlation_id, business_key,
                   workflow_instance_id, definition_version_id, payload, created_at
            FROM audit_events
            WHERE tenant_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows.into_iter().map(Self::audit_event_from_row).collect())
    }

    // ── Discovery endpoint ──

    async fn get_discovery_endpoint(&self, tenant_id: TenantId) -> Result<Option<TenantDiscoveryEndpoint>> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, endpoint_url, api_key, last_synced_at,
                   last_sync_status, last_sync_error
            FROM tenant_discovery_endpoints
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map(|row| TenantDiscoveryEndpoint {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            endpoint_url: row.get("endpoint_url"),
            api_key: row.get("api_key"),
            last_synced_at: row.get("last_synced_at"),
            last_sync_status: row.get("last_sync_status"),
            last_sync_error: row.get("last_sync_error"),
        }))
    }

    async fn upsert_discovery_endpoint(
        &self,
        tenant_id: TenantId,
        endpoint_url: &str,
        api_key: &str,
    ) -> Result<TenantDiscoveryEndpoint> {
        let row = sqlx::query(
            r#"
            INSERT INTO tenant_discovery_endpoints (id, tenant_id, endpoint_url, api_key)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id) DO UPDATE SET
                endpoint_url = EXCLUDED.endpoint_url,
                api_key = EXCLUDED.api_key
            RETURNING id, tenant_id, endpoint_url, api_key, last_synced_at,
                      last_sync_status, last_sync_error
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(endpoint_url)
        .bind(api_key)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(TenantDiscoveryEndpoint {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            endpoint_url: row.get("endpoint_url"),
            api_key: row.get("api_key"),
            last_synced_at: row.get("last_synced_at"),
            last_sync_status: row.get("last_sync_status"),
            last_sync_error: row.get("last_sync_error"),
        })
    }
}

impl PostgresStore {
    fn definition_version_from_row(row: sqlx::postgres::PgRow) -> Result<WorkflowDefinitionVersion> {
        let form_schema_refs_json: serde_json::Value = row.get("form_schema_refs");
        let catalog_binding_placeholders_json: serde_json::Value =
            row.get("catalog_binding_placeholders");
        Ok(WorkflowDefinitionVersion {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            definition_id: row.get("definition_id"),
            version: row.get("version"),
            bpmn_xml: row.get("bpmn_xml"),
            form_schema_refs: serde_json::from_value(form_schema_refs_json).map_err(json_err)?,
            catalog_binding_placeholders: serde_json::from_value(catalog_binding_placeholders_json)
                .map_err(json_err)?,
        })
    }

    fn instance_from_row(row: sqlx::postgres::PgRow) -> Result<WorkflowInstance> {
        let serialized_state_json: serde_json::Value = row.get("serialized_state");
        Ok(WorkflowInstance {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            definition_version_id: row.get("definition_version_id"),
            status: instance_status_from_str(row.get::<String, _>("status").as_str()),
            correlation_id: row.get("correlation_id"),
            business_key: row.get("business_key"),
            serialized_state: serde_json::from_value(serialized_state_json).map_err(json_err)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn idempotency_from_row(row: sqlx::postgres::PgRow) -> IdempotencyRecord {
        IdempotencyRecord {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            idempotency_key: row.get("idempotency_key"),
            subject_id: row.get("subject_id"),
            request_hash: row.get("request_hash"),
            response_payload: row.get("response_payload"),
        }
    }

    fn audit_event_from_row(row: sqlx::postgres::PgRow) -> AuditEvent {
        AuditEvent {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            event_type: audit_event_type_from_str(row.get::<String, _>("event_type").as_str()),
            actor_identity: row.get("actor_identity"),
            correlation_id: row.get("correlation_id"),
            business_key: row.get("business_key"),
            workflow_instance_id: row.get("workflow_instance_id"),
            definition_version_id: row.get("definition_version_id"),
            payload: row.get("payload"),
            created_at: row.get("created_at"),
        }
    }
}
