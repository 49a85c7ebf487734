//! Supervision of detached deployment pipelines.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;
use tracing::warn;

use shipwright_core::ResourceId;

/// Registry of in-flight deployment pipelines.
///
/// A pipeline has no external cancellation once started; this set is the
/// supervisory record of what is outstanding. A crash-recovery pass can
/// compare rows stuck in `building` against it to find orphans, and
/// [`PipelineSet::drain`] is the single shutdown path.
#[derive(Default)]
pub struct PipelineSet {
    inner: Mutex<HashMap<ResourceId, Option<JoinHandle<()>>>>,
}

impl PipelineSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployment before its pipeline task exists, so the set
    /// never misses a pipeline that finishes instantly.
    pub fn register(&self, id: ResourceId) {
        self.inner.lock().expect("pipeline set lock").insert(id, None);
    }

    /// Attach the spawned task to a registered deployment. If the pipeline
    /// already completed and deregistered itself, the handle is dropped.
    pub fn attach(&self, id: ResourceId, handle: JoinHandle<()>) {
        let mut inner = self.inner.lock().expect("pipeline set lock");
        if let Some(slot) = inner.get_mut(&id) {
            *slot = Some(handle);
        }
    }

    /// Called by the pipeline itself as its final action.
    pub fn complete(&self, id: ResourceId) {
        self.inner.lock().expect("pipeline set lock").remove(&id);
    }

    /// Deployment ids with an outstanding pipeline.
    pub fn active(&self) -> Vec<ResourceId> {
        self.inner
            .lock()
            .expect("pipeline set lock")
            .keys()
            .copied()
            .collect()
    }

    /// Await every outstanding pipeline.
    pub async fn drain(&self) {
        let handles: Vec<(ResourceId, JoinHandle<()>)> = {
            let mut inner = self.inner.lock().expect("pipeline set lock");
            inner
                .drain()
                .filter_map(|(id, handle)| handle.map(|h| (id, h)))
                .collect()
        };
        for (id, handle) in handles {
            if let Err(e) = handle.await {
                warn!(deployment = %id, error = %e, "Pipeline task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_attach_complete_cycle() {
        let set = PipelineSet::new();
        let id = ResourceId::new();

        set.register(id);
        assert_eq!(set.active(), vec![id]);

        set.attach(id, tokio::spawn(async {}));
        assert_eq!(set.active(), vec![id]);

        set.complete(id);
        assert!(set.active().is_empty());
    }

    #[tokio::test]
    async fn attach_after_completion_drops_the_handle() {
        let set = PipelineSet::new();
        let id = ResourceId::new();

        set.register(id);
        set.complete(id);
        set.attach(id, tokio::spawn(async {}));

        assert!(set.active().is_empty());
    }

    #[tokio::test]
    async fn drain_awaits_outstanding_pipelines() {
        let set = PipelineSet::new();
        let id = ResourceId::new();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        set.register(id);
        set.attach(
            id,
            tokio::spawn(async move {
                let _ = rx.await;
            }),
        );

        let _ = tx.send(());
        set.drain().await;
        assert!(set.active().is_empty());
    }
}
