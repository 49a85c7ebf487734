//! Deployment trigger and read endpoints.

use axum::http::StatusCode;
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use shipwright_core::ResourceId;
use shipwright_core::deployment::{Deployment, DeploymentStatus};
use shipwright_core::synth::ResourceStatus;
use shipwright_db::{DeploymentRepo, ServiceRepo};
use shipwright_orchestrator::CreateDeployment;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deployments", post(create_deployment))
        .route("/deployments/{id}", get(get_deployment))
        .route("/services/{id}/deployments", get(service_deployments))
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentRequest {
    pub service_id: Uuid,
    pub credential: String,
    pub commit_id: Option<String>,
    pub commit_message: Option<String>,
    pub callback_url: Option<Url>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeploymentResponse {
    pub deployment_id: ResourceId,
    pub service_id: ResourceId,
    pub status: DeploymentStatus,
    pub job_reference: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentResponse {
    pub deployment: Deployment,
    /// Present only while cluster resources still exist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDeploymentsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<Deployment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_successful: Option<Deployment>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_deployment(
    State(state): State<AppState>,
    Json(req): Json<CreateDeploymentRequest>,
) -> Result<(StatusCode, Json<CreateDeploymentResponse>), ApiError> {
    let receipt = state
        .orchestrator
        .create_deployment(CreateDeployment {
            service_id: ResourceId::from_uuid(req.service_id),
            credential: req.credential,
            commit_sha: req.commit_id,
            commit_message: req.commit_message,
            callback_url: req.callback_url,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateDeploymentResponse {
            deployment_id: receipt.deployment_id,
            service_id: receipt.service_id,
            status: receipt.status,
            job_reference: receipt.job_reference,
            message: "deployment accepted".to_string(),
            created_at: receipt.created_at,
        }),
    ))
}

async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeploymentResponse>, ApiError> {
    let deployment = state
        .deployments
        .get(ResourceId::from_uuid(id))
        .await?;
    let service = state.services.get(deployment.service_id).await?;

    let resources = state
        .orchestrator
        .resource_status(&service)
        .await
        .ok()
        .filter(ResourceStatus::any_present);

    Ok(Json(DeploymentResponse {
        deployment,
        resources,
    }))
}

async fn service_deployments(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ServiceDeploymentsResponse>, ApiError> {
    let service_id = ResourceId::from_uuid(id);
    // A service without deployments is still a valid answer, but an
    // unknown service is not.
    state.services.get(service_id).await?;

    let latest = state.deployments.latest_for_service(service_id).await?;
    let latest_successful = state.deployments.latest_successful(service_id).await?;

    Ok(Json(ServiceDeploymentsResponse {
        latest,
        latest_successful,
    }))
}
