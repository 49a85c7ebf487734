//! Shared log-follow plumbing.

use futures::{AsyncBufReadExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams};
use tokio::sync::mpsc;

use shipwright_core::{Error, Result};

use crate::LogEvent;

/// Follow one container's log until it ends. Returns `false` when the
/// consumer went away mid-stream.
pub(crate) async fn follow_container(
    pods: &Api<Pod>,
    pod_name: &str,
    container: &str,
    tx: &mpsc::Sender<LogEvent>,
) -> Result<bool> {
    let params = LogParams {
        follow: true,
        container: Some(container.to_string()),
        ..LogParams::default()
    };
    let reader = pods
        .log_stream(pod_name, &params)
        .await
        .map_err(|e| Error::StreamFailed(format!("open log follow for {container}: {e}")))?;
    let lines = reader.lines();
    futures::pin_mut!(lines);

    loop {
        tokio::select! {
            _ = tx.closed() => return Ok(false),
            next = lines.try_next() => match next {
                Ok(Some(line)) => {
                    let event = LogEvent::Line {
                        source: container.to_string(),
                        line,
                    };
                    if tx.send(event).await.is_err() {
                        return Ok(false);
                    }
                }
                Ok(None) => return Ok(true),
                Err(e) => {
                    return Err(Error::StreamFailed(format!(
                        "read log of {container}: {e}"
                    )));
                }
            }
        }
    }
}
