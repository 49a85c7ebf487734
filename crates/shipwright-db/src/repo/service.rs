//! Service repository.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use shipwright_core::ResourceId;
use shipwright_core::managed::ManagedClass;
use shipwright_core::service::{
    GitSource, ManagedInstance, ResourceLimits, Scaling, Service, ServiceKind, ServiceStatus,
};

use crate::{DbError, DbResult};

/// Flat row shape of the `services` table.
#[derive(Debug, Clone, sqlx::FromRow)]
struct ServiceRow {
    id: uuid::Uuid,
    project_id: uuid::Uuid,
    environment_id: uuid::Uuid,
    name: String,
    kind: String,
    repo_url: Option<String>,
    branch: Option<String>,
    port: Option<i32>,
    build_command: Option<String>,
    start_command: Option<String>,
    class: Option<String>,
    version: Option<String>,
    storage_gb: Option<i64>,
    cpu_limit: String,
    memory_limit: String,
    static_replicas: Option<i32>,
    min_replicas: Option<i32>,
    max_replicas: Option<i32>,
    custom_domain: Option<String>,
    generated_domain: Option<String>,
    declared_env: serde_json::Value,
    generated_env: serde_json::Value,
    status: String,
    deploy_secret: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn env_map(value: serde_json::Value, column: &str) -> DbResult<BTreeMap<String, String>> {
    serde_json::from_value(value)
        .map_err(|e| DbError::Corrupt(format!("{column} is not a string map: {e}")))
}

impl TryFrom<ServiceRow> for Service {
    type Error = DbError;

    fn try_from(row: ServiceRow) -> DbResult<Self> {
        let kind = match row.kind.as_str() {
            "git" => ServiceKind::Git(GitSource {
                repo_url: row
                    .repo_url
                    .as_deref()
                    .ok_or_else(|| DbError::Corrupt(format!("git service {} has no repo_url", row.id)))?
                    .parse()
                    .map_err(|e| DbError::Corrupt(format!("service {}: {e}", row.id)))?,
                branch: row.branch.unwrap_or_else(|| "main".to_string()),
                port: row
                    .port
                    .ok_or_else(|| DbError::Corrupt(format!("git service {} has no port", row.id)))?
                    as u16,
                build_command: row.build_command,
                start_command: row.start_command,
            }),
            "managed" => {
                let class: ManagedClass = row
                    .class
                    .as_deref()
                    .ok_or_else(|| DbError::Corrupt(format!("managed service {} has no class", row.id)))?
                    .parse()
                    .map_err(|e: shipwright_core::Error| DbError::Corrupt(e.to_string()))?;
                ServiceKind::Managed(ManagedInstance {
                    class,
                    version: row.version,
                    storage_gb: row.storage_gb.unwrap_or(1),
                })
            }
            other => {
                return Err(DbError::Corrupt(format!(
                    "service {} has unknown kind {other}",
                    row.id
                )));
            }
        };

        let scaling = match (row.static_replicas, row.min_replicas, row.max_replicas) {
            (Some(replicas), _, _) => Scaling::Static { replicas },
            (None, Some(min), Some(max)) => Scaling::Elastic { min, max },
            _ => Scaling::Static { replicas: 1 },
        };

        let status: ServiceStatus = row
            .status
            .parse()
            .map_err(|e: shipwright_core::Error| DbError::Corrupt(e.to_string()))?;

        Ok(Service {
            id: ResourceId::from_uuid(row.id),
            project_id: ResourceId::from_uuid(row.project_id),
            environment_id: ResourceId::from_uuid(row.environment_id),
            name: row.name,
            kind,
            limits: ResourceLimits {
                cpu: row.cpu_limit,
                memory: row.memory_limit,
            },
            scaling,
            custom_domain: row.custom_domain,
            generated_domain: row.generated_domain,
            declared_env: env_map(row.declared_env, "declared_env")?,
            generated_env: env_map(row.generated_env, "generated_env")?,
            status,
            deploy_secret: row.deploy_secret,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
pub trait ServiceRepo: Send + Sync {
    async fn get(&self, id: ResourceId) -> DbResult<Service>;

    async fn set_status(&self, id: ResourceId, status: ServiceStatus) -> DbResult<()>;

    /// Persist the mutations a deployment pipeline produced: status,
    /// generated domain and platform-generated env.
    async fn record_deploy_outcome(&self, service: &Service) -> DbResult<()>;
}

/// PostgreSQL implementation of ServiceRepo.
pub struct PgServiceRepo {
    pool: PgPool,
}

impl PgServiceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceRepo for PgServiceRepo {
    async fn get(&self, id: ResourceId) -> DbResult<Service> {
        let row = sqlx::query_as::<_, ServiceRow>("SELECT * FROM services WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("service {id}")))?;
        row.try_into()
    }

    async fn set_status(&self, id: ResourceId, status: ServiceStatus) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE services SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id.as_uuid())
                .bind(status.to_string())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("service {id}")));
        }
        Ok(())
    }

    async fn record_deploy_outcome(&self, service: &Service) -> DbResult<()> {
        let generated_env = serde_json::to_value(&service.generated_env)
            .map_err(|e| DbError::Corrupt(e.to_string()))?;
        let result = sqlx::query(
            r#"
            UPDATE services
            SET status = $2, generated_domain = $3, generated_env = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(service.id.as_uuid())
        .bind(service.status.to_string())
        .bind(&service.generated_domain)
        .bind(generated_env)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("service {}", service.id)));
        }
        Ok(())
    }
}
