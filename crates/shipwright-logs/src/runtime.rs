//! Runtime log streaming.
//!
//! A running service's pod can be replaced at any moment. One supervisor
//! loop owns at most one follower task; replacing it is a single atomic
//! swap: stop and await the old follower, only then start the new one,
//! so two concurrent followers are impossible even under rapid repeated
//! replacement.

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::Api;
use kube::runtime::{WatchStreamExt, watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use shipwright_core::{Error, ResourceId, Result, labels};

use crate::LogEvent;
use crate::follow::follow_container;

pub(crate) async fn run(
    client: Client,
    namespace: &str,
    service_id: ResourceId,
    tx: &mpsc::Sender<LogEvent>,
) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let selector = labels::service_selector(service_id);

    let stream = watcher(
        pods.clone(),
        watcher::Config::default().labels(&selector),
    )
    .applied_objects();
    futures::pin_mut!(stream);

    let mut current: Option<Follower> = None;

    loop {
        tokio::select! {
            _ = tx.closed() => {
                shutdown(current.take()).await;
                return Ok(());
            }
            next = stream.try_next() => match next {
                Ok(Some(pod)) => {
                    let Some(name) = running_pod_name(&pod) else {
                        continue;
                    };
                    let replaced = current.as_ref().is_none_or(|f| f.pod != name);
                    if !replaced {
                        continue;
                    }
                    debug!(service = %service_id, pod = %name, "Switching to pod");
                    // The old follow must have fully stopped before the
                    // new one opens, or two followers could interleave.
                    shutdown(current.take()).await;
                    current = Some(Follower::spawn(
                        pods.clone(),
                        name,
                        main_container(&pod),
                        tx.clone(),
                    ));
                }
                Ok(None) => {
                    shutdown(current.take()).await;
                    return Err(Error::StreamFailed("pod watch ended".to_string()));
                }
                Err(e) => {
                    shutdown(current.take()).await;
                    return Err(Error::StreamFailed(format!("pod watch: {e}")));
                }
            }
        }
    }
}

/// The one in-flight log follow. Its task is the cancellation scope.
struct Follower {
    pod: String,
    handle: JoinHandle<()>,
}

impl Follower {
    fn spawn(pods: Api<Pod>, pod: String, container: String, tx: mpsc::Sender<LogEvent>) -> Self {
        let pod_name = pod.clone();
        let handle = tokio::spawn(async move {
            // A follow ending because its pod went away is routine; the
            // supervisor keeps watching for the replacement.
            if let Err(e) = follow_container(&pods, &pod_name, &container, &tx).await {
                warn!(pod = %pod_name, error = %e, "Runtime log follow ended");
            }
        });
        Self { pod, handle }
    }

    async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

async fn shutdown(follower: Option<Follower>) {
    if let Some(follower) = follower {
        follower.stop().await;
    }
}

/// Name of a pod that is running and not already being torn down.
pub(crate) fn running_pod_name(pod: &Pod) -> Option<String> {
    if pod.metadata.deletion_timestamp.is_some() {
        return None;
    }
    let phase = pod.status.as_ref()?.phase.as_deref()?;
    if phase != "Running" {
        return None;
    }
    pod.metadata.name.clone()
}

/// The container whose log represents the service.
pub(crate) fn main_container(pod: &Pod) -> String {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "app".to_string())
}
