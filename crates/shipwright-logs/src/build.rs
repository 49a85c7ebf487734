//! Build log streaming.
//!
//! awaiting-pod -> discovering-containers -> per-container
//! {waiting-ready -> streaming} -> done. The build pod is discovered by
//! watching the stable `job-name` label, never by polling.

use futures::TryStreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::Api;
use kube::runtime::{WatchStreamExt, watcher};
use tokio::sync::mpsc;
use tracing::debug;

use shipwright_core::{Error, ResourceId, Result, labels};

use crate::LogEvent;
use crate::follow::follow_container;

pub(crate) async fn run(
    client: Client,
    namespace: &str,
    deployment_id: ResourceId,
    tx: &mpsc::Sender<LogEvent>,
) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client, namespace);
    let selector = labels::build_job_selector(deployment_id);

    let Some(pod_name) = await_pod(&pods, &selector, tx).await? else {
        return Ok(());
    };
    debug!(deployment = %deployment_id, pod = %pod_name, "Build pod discovered");

    let pod = pods
        .get(&pod_name)
        .await
        .map_err(|e| Error::StreamFailed(format!("fetch build pod: {e}")))?;

    // Preparatory containers first, in declaration order, then the main
    // ones. A container's log cannot be opened before it has started.
    for (container, init) in ordered_containers(&pod) {
        if !await_container_started(&pods, &pod_name, &container, init, tx).await? {
            return Ok(());
        }
        if !follow_container(&pods, &pod_name, &container, tx).await? {
            return Ok(());
        }
    }
    Ok(())
}

/// Watch until a pod matching `selector` exists. `None` means the consumer
/// disconnected while waiting.
async fn await_pod(
    pods: &Api<Pod>,
    selector: &str,
    tx: &mpsc::Sender<LogEvent>,
) -> Result<Option<String>> {
    let stream = watcher(
        pods.clone(),
        watcher::Config::default().labels(selector),
    )
    .applied_objects();
    futures::pin_mut!(stream);

    loop {
        tokio::select! {
            _ = tx.closed() => return Ok(None),
            next = stream.try_next() => match next {
                Ok(Some(pod)) => {
                    if let Some(name) = pod.metadata.name {
                        return Ok(Some(name));
                    }
                }
                Ok(None) => return Err(Error::StreamFailed("pod watch ended".to_string())),
                Err(e) => return Err(Error::StreamFailed(format!("pod watch: {e}"))),
            }
        }
    }
}

/// Watch one pod until `container` reports running or terminated. `false`
/// means the consumer disconnected while waiting.
async fn await_container_started(
    pods: &Api<Pod>,
    pod_name: &str,
    container: &str,
    init: bool,
    tx: &mpsc::Sender<LogEvent>,
) -> Result<bool> {
    let stream = watcher(
        pods.clone(),
        watcher::Config::default().fields(&format!("metadata.name={pod_name}")),
    )
    .applied_objects();
    futures::pin_mut!(stream);

    loop {
        tokio::select! {
            _ = tx.closed() => return Ok(false),
            next = stream.try_next() => match next {
                Ok(Some(pod)) => {
                    if container_started(&pod, container, init) {
                        debug!(pod = %pod_name, container, "Container started");
                        return Ok(true);
                    }
                }
                Ok(None) => return Err(Error::StreamFailed("pod watch ended".to_string())),
                Err(e) => return Err(Error::StreamFailed(format!("pod watch: {e}"))),
            }
        }
    }
}

/// Container names of a pod in follow order: init containers in
/// declaration order, then the main containers.
pub(crate) fn ordered_containers(pod: &Pod) -> Vec<(String, bool)> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };
    let mut ordered: Vec<(String, bool)> = spec
        .init_containers
        .iter()
        .flatten()
        .map(|c| (c.name.clone(), true))
        .collect();
    ordered.extend(spec.containers.iter().map(|c| (c.name.clone(), false)));
    ordered
}

/// Whether a container has reached running-or-terminated.
pub(crate) fn container_started(pod: &Pod, container: &str, init: bool) -> bool {
    let Some(status) = &pod.status else {
        return false;
    };
    let statuses = if init {
        &status.init_container_statuses
    } else {
        &status.container_statuses
    };
    statuses
        .iter()
        .flatten()
        .filter(|s| s.name == container)
        .any(|s| {
            s.state
                .as_ref()
                .is_some_and(|state| state.running.is_some() || state.terminated.is_some())
        })
}
