//! Live log streaming from cluster pods.
//!
//! Two stream shapes: build logs (job pod, containers followed in start
//! order) and runtime logs (replacement-aware follow of a service's
//! current pod). Sessions push [`LogEvent`]s into an mpsc channel; the
//! receiver going away is the cancellation signal and stops every
//! in-flight watch and follow.

pub mod build;
pub mod event;
mod follow;
pub mod runtime;

pub use event::LogEvent;

use kube::Client;
use tokio::sync::mpsc;
use tracing::warn;

use shipwright_core::ResourceId;

/// Log streaming engine bound to the one shared cluster client.
#[derive(Clone)]
pub struct LogStreamEngine {
    client: Client,
}

impl LogStreamEngine {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Stream a deployment's build logs until the build pod's containers
    /// are done, the client disconnects, or the watch fails.
    pub async fn stream_build_logs(
        &self,
        namespace: &str,
        deployment_id: ResourceId,
        tx: mpsc::Sender<LogEvent>,
    ) {
        match build::run(self.client.clone(), namespace, deployment_id, &tx).await {
            Ok(()) => {
                let _ = tx.send(LogEvent::End).await;
            }
            Err(e) => {
                warn!(deployment = %deployment_id, error = %e, "Build log stream failed");
                let _ = tx
                    .send(LogEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }

    /// Stream a service's runtime logs, following pod replacements, until
    /// the client disconnects or the watch fails.
    pub async fn stream_runtime_logs(
        &self,
        namespace: &str,
        service_id: ResourceId,
        tx: mpsc::Sender<LogEvent>,
    ) {
        match runtime::run(self.client.clone(), namespace, service_id, &tx).await {
            Ok(()) => {
                let _ = tx.send(LogEvent::End).await;
            }
            Err(e) => {
                warn!(service = %service_id, error = %e, "Runtime log stream failed");
                let _ = tx
                    .send(LogEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
    }
}
