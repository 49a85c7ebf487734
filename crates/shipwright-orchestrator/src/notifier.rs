//! Fire-and-forget webhook callbacks.

use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use shipwright_core::ResourceId;

/// Body of the terminal-outcome callback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub deployment_id: ResourceId,
    /// `"running"` or `"failed"`.
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Sends one unauthenticated POST per terminal outcome. Never retried,
/// never ordered relative to API-visible status.
#[derive(Clone, Default)]
pub struct WebhookNotifier {
    http: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the callback detached; delivery failures are logged and
    /// dropped.
    pub fn notify(&self, url: Url, payload: WebhookPayload) {
        let http = self.http.clone();
        tokio::spawn(async move {
            let deployment = payload.deployment_id;
            match http.post(url.clone()).json(&payload).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(deployment = %deployment, "Webhook delivered");
                }
                Ok(response) => {
                    warn!(
                        deployment = %deployment,
                        status = %response.status(),
                        "Webhook rejected"
                    );
                }
                Err(e) => {
                    warn!(deployment = %deployment, error = %e, "Webhook delivery failed");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_is_omitted_on_success_payloads() {
        let payload = WebhookPayload {
            deployment_id: ResourceId::new(),
            status: "running",
            error: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json.get("error").is_none());
        assert!(json.get("deploymentId").is_some());
    }

    #[test]
    fn failure_payload_carries_the_error() {
        let payload = WebhookPayload {
            deployment_id: ResourceId::new(),
            status: "failed",
            error: Some("build failed: exit 1".to_string()),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "build failed: exit 1");
    }
}
