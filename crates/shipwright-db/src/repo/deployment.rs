//! Deployment repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use shipwright_core::ResourceId;
use shipwright_core::deployment::{Deployment, DeploymentStatus};

use crate::{DbError, DbResult};

#[derive(Debug, Clone, sqlx::FromRow)]
struct DeploymentRow {
    id: uuid::Uuid,
    service_id: uuid::Uuid,
    commit_sha: Option<String>,
    commit_message: Option<String>,
    image: Option<String>,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<DeploymentRow> for Deployment {
    type Error = DbError;

    fn try_from(row: DeploymentRow) -> DbResult<Self> {
        let status: DeploymentStatus = row
            .status
            .parse()
            .map_err(|e: shipwright_core::Error| DbError::Corrupt(e.to_string()))?;
        Ok(Deployment {
            id: ResourceId::from_uuid(row.id),
            service_id: ResourceId::from_uuid(row.service_id),
            commit_sha: row.commit_sha,
            commit_message: row.commit_message,
            image: row.image,
            status,
            error: row.error,
            created_at: row.created_at,
            finished_at: row.finished_at,
        })
    }
}

#[async_trait]
pub trait DeploymentRepo: Send + Sync {
    async fn create(&self, deployment: &Deployment) -> DbResult<()>;

    async fn get(&self, id: ResourceId) -> DbResult<Deployment>;

    /// Record the built image. The reference is set once; a second write is
    /// a conflict.
    async fn set_image(&self, id: ResourceId, image: &str) -> DbResult<()>;

    /// Move a deployment to a terminal state. The transition happens
    /// exactly once; finishing an already finished deployment is a
    /// conflict.
    async fn finish(
        &self,
        id: ResourceId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> DbResult<()>;

    async fn latest_for_service(&self, service_id: ResourceId) -> DbResult<Option<Deployment>>;

    async fn latest_successful(&self, service_id: ResourceId) -> DbResult<Option<Deployment>>;
}

/// PostgreSQL implementation of DeploymentRepo.
pub struct PgDeploymentRepo {
    pool: PgPool,
}

impl PgDeploymentRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeploymentRepo for PgDeploymentRepo {
    async fn create(&self, deployment: &Deployment) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deployments (id, service_id, commit_sha, commit_message, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(deployment.id.as_uuid())
        .bind(deployment.service_id.as_uuid())
        .bind(&deployment.commit_sha)
        .bind(&deployment.commit_message)
        .bind(deployment.status.to_string())
        .bind(deployment.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: ResourceId) -> DbResult<Deployment> {
        let row = sqlx::query_as::<_, DeploymentRow>("SELECT * FROM deployments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("deployment {id}")))?;
        row.try_into()
    }

    async fn set_image(&self, id: ResourceId, image: &str) -> DbResult<()> {
        let result =
            sqlx::query("UPDATE deployments SET image = $2 WHERE id = $1 AND image IS NULL")
                .bind(id.as_uuid())
                .bind(image)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::Conflict(format!(
                "deployment {id} already has an image"
            )));
        }
        Ok(())
    }

    async fn finish(
        &self,
        id: ResourceId,
        status: DeploymentStatus,
        error: Option<&str>,
    ) -> DbResult<()> {
        if !status.is_terminal() {
            return Err(DbError::Conflict(format!(
                "cannot finish deployment {id} with non-terminal status {status}"
            )));
        }
        // The WHERE clause is the exactly-once guard: only a building row
        // can reach a terminal state.
        let result = sqlx::query(
            r#"
            UPDATE deployments
            SET status = $2, error = $3, finished_at = NOW()
            WHERE id = $1 AND status = 'building'
            "#,
        )
        .bind(id.as_uuid())
        .bind(status.to_string())
        .bind(error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::Conflict(format!(
                "deployment {id} already reached a terminal state"
            )));
        }
        Ok(())
    }

    async fn latest_for_service(&self, service_id: ResourceId) -> DbResult<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT * FROM deployments
            WHERE service_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(service_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn latest_successful(&self, service_id: ResourceId) -> DbResult<Option<Deployment>> {
        let row = sqlx::query_as::<_, DeploymentRow>(
            r#"
            SELECT * FROM deployments
            WHERE service_id = $1 AND status = 'success'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(service_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }
}
