//! Thin client for the external build collaborator.
//!
//! The builder clones the repo, builds and pushes the image; this client
//! only hands over the request and consumes the resulting reference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use shipwright_core::build::{BuildRequest, BuiltImage, ImageBuilder};
use shipwright_core::{Error, Result};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildJobRequest<'a> {
    deployment_id: String,
    repo_url: &'a str,
    branch: &'a str,
    commit_id: Option<&'a str>,
    build_command: Option<&'a str>,
    image_tag: &'a str,
}

#[derive(Debug, Deserialize)]
struct BuildJobResponse {
    image: String,
}

/// HTTP client of the build service. One POST per build, returning when
/// the build finishes.
pub struct HttpImageBuilder {
    http: reqwest::Client,
    base: Url,
}

impl HttpImageBuilder {
    pub fn new(base: Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }
}

#[async_trait]
impl ImageBuilder for HttpImageBuilder {
    async fn build(&self, request: BuildRequest) -> Result<BuiltImage> {
        let url = self
            .base
            .join("builds")
            .map_err(|e| Error::Internal(format!("builder url: {e}")))?;
        let body = BuildJobRequest {
            deployment_id: request.deployment_id.to_string(),
            repo_url: request.repo_url.as_str(),
            branch: &request.branch,
            commit_id: request.commit_sha.as_deref(),
            build_command: request.build_command.as_deref(),
            image_tag: &request.image_tag,
        };

        info!(deployment = %request.deployment_id, "Dispatching build");
        let response = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::BuildFailed(format!("builder unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(Error::BuildFailed(format!(
                "builder returned {status}: {detail}"
            )));
        }

        let body: BuildJobResponse = response
            .json()
            .await
            .map_err(|e| Error::BuildFailed(format!("bad builder response: {e}")))?;
        Ok(BuiltImage {
            reference: body.image,
        })
    }
}
