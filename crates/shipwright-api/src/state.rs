//! Application state.

use std::net::IpAddr;
use std::sync::Arc;

use kube::Client;
use sqlx::PgPool;
use url::Url;

use shipwright_db::{PgDeploymentRepo, PgServiceRepo};
use shipwright_deployer::{KubeSynthesizer, SynthesizerConfig};
use shipwright_logs::LogStreamEngine;
use shipwright_orchestrator::{DeploymentOrchestrator, OrchestratorConfig};

use crate::services::builder::HttpImageBuilder;

/// Platform configuration, read from the environment.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Suffix every generated domain lives under.
    pub domain_suffix: String,
    /// Node address managed-service ports are bound on.
    pub host_ip: IpAddr,
    /// Registry prefix for built images.
    pub registry: String,
    /// Base URL of the build collaborator.
    pub builder_url: Url,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            domain_suffix: std::env::var("SHIPWRIGHT_DOMAIN_SUFFIX")
                .unwrap_or_else(|_| "apps.shipwright.local".to_string()),
            host_ip: std::env::var("SHIPWRIGHT_HOST_IP")
                .ok()
                .and_then(|ip| ip.parse().ok())
                .unwrap_or_else(|| "127.0.0.1".parse().expect("static ip")),
            registry: std::env::var("SHIPWRIGHT_REGISTRY")
                .unwrap_or_else(|_| "registry.local:5000".to_string()),
            builder_url: std::env::var("SHIPWRIGHT_BUILDER_URL")
                .ok()
                .and_then(|url| url.parse().ok())
                .unwrap_or_else(|| {
                    "http://127.0.0.1:7070/".parse().expect("static url")
                }),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub services: Arc<PgServiceRepo>,
    pub deployments: Arc<PgDeploymentRepo>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub logs: LogStreamEngine,
}

impl AppState {
    pub fn new(pool: PgPool, kube: Client, config: PlatformConfig) -> Self {
        let services = Arc::new(PgServiceRepo::new(pool.clone()));
        let deployments = Arc::new(PgDeploymentRepo::new(pool.clone()));

        let synthesizer = Arc::new(KubeSynthesizer::new(
            kube.clone(),
            SynthesizerConfig {
                domain_suffix: config.domain_suffix.clone(),
            },
        ));
        let builder = Arc::new(HttpImageBuilder::new(config.builder_url.clone()));
        let orchestrator = Arc::new(DeploymentOrchestrator::new(
            services.clone(),
            deployments.clone(),
            builder,
            synthesizer,
            OrchestratorConfig {
                host_ip: config.host_ip,
                registry: config.registry.clone(),
            },
        ));

        Self {
            pool,
            services,
            deployments,
            orchestrator,
            logs: LogStreamEngine::new(kube),
        }
    }
}
