//! The scan model: single owner of all pod, image and layer bookkeeping.
//!
//! State lives on one dedicated task draining a command channel, so every
//! operation is totally ordered and no two callers can ever race a
//! read-modify-write. Callers hold a cheap [`Model`] handle and block only
//! on their own reply, never on a lock.

mod state;

use scandium_model::{
    FinishedScanClientJob, ImageSha, LayerSha, ModelSnapshot, Pod, PodRef, ScanDecision,
    ScanResults, ScanSpec, ScanStatus,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::queue::QueueError;

pub use state::{ModelConfig, ModelState, DEFAULT_SCAN_PRIORITY};

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("pod {0} not found")]
    PodNotFound(PodRef),
    #[error("image {0} not found")]
    ImageNotFound(ImageSha),
    #[error("layer {0} not found")]
    LayerNotFound(LayerSha),
    #[error("layer {0} is not in the hub check queue")]
    NotInHubCheckQueue(LayerSha),
    #[error("illegal scan status transition for layer {sha}: {from} -> {to}")]
    IllegalTransition {
        sha: LayerSha,
        from: ScanStatus,
        to: ScanStatus,
    },
    #[error("layer {0} is already queued for refresh")]
    AlreadyQueued(LayerSha),
    #[error("layer {sha} is not complete (status {status})")]
    NotComplete { sha: LayerSha, status: ScanStatus },
    #[error("queue inconsistency: {0}")]
    Queue(#[from] QueueError),
    #[error("scan model is shut down")]
    Gone,
}

type Command = Box<dyn FnOnce(&mut ModelState) + Send>;

/// Handle to the scan model actor. Cloning is cheap; all clones talk to
/// the same state.
#[derive(Clone)]
pub struct Model {
    tx: mpsc::Sender<Command>,
}

impl Model {
    /// Spawn the owning task and return a handle to it.
    pub fn spawn(config: ModelConfig, shutdown: watch::Receiver<bool>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(64);
        let handle = tokio::spawn(run(ModelState::new(config), rx, shutdown));
        (Self { tx }, handle)
    }

    async fn execute<R, F>(&self, f: F) -> Result<R, ModelError>
    where
        F: FnOnce(&mut ModelState) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(Box::new(move |state| {
                let _ = tx.send(f(state));
            }))
            .await
            .map_err(|_| ModelError::Gone)?;
        rx.await.map_err(|_| ModelError::Gone)
    }

    pub async fn add_pod(&self, pod: Pod) -> Result<(), ModelError> {
        self.execute(move |m| m.add_pod(pod)).await
    }

    pub async fn update_all_pods(&self, pods: Vec<Pod>) -> Result<(), ModelError> {
        self.execute(move |m| m.update_all_pods(pods)).await
    }

    pub async fn delete_pod(&self, pod_ref: PodRef) -> Result<(), ModelError> {
        self.execute(move |m| m.delete_pod(&pod_ref)).await?
    }

    /// Returns `true` if the image was new, `false` if it was already known.
    pub async fn add_image(
        &self,
        image: scandium_model::Image,
        priority: i32,
    ) -> Result<bool, ModelError> {
        self.execute(move |m| m.add_image(image, priority)).await
    }

    pub async fn set_layers_for_image(
        &self,
        image_sha: ImageSha,
        layers: Vec<LayerSha>,
    ) -> Result<(), ModelError> {
        self.execute(move |m| m.set_layers_for_image(&image_sha, layers))
            .await?
    }

    pub async fn next_layer_from_hub_check_queue(&self) -> Result<Option<LayerSha>, ModelError> {
        self.execute(|m| m.next_layer_from_hub_check_queue()).await
    }

    pub async fn remove_layer_from_hub_check_queue(&self, sha: LayerSha) -> Result<(), ModelError> {
        self.execute(move |m| m.remove_layer_from_hub_check_queue(&sha))
            .await?
    }

    pub async fn should_scan_layer(&self, sha: LayerSha) -> Result<ScanDecision, ModelError> {
        self.execute(move |m| m.should_scan_layer(&sha)).await?
    }

    /// Pop the highest-priority layer from the scan queue and mark it as
    /// running, as one atomic step. `None` when the hub is down, the
    /// concurrency cap is reached or the queue is empty.
    pub async fn dispatch_next_scan(&self) -> Result<Option<ScanSpec>, ModelError> {
        self.execute(|m| m.dispatch_next_scan()).await
    }

    pub async fn set_layer_scan_status(
        &self,
        sha: LayerSha,
        status: ScanStatus,
    ) -> Result<(), ModelError> {
        self.execute(move |m| m.set_layer_scan_status(&sha, status))
            .await?
    }

    pub async fn add_layer_to_scan_queue(&self, sha: LayerSha) -> Result<(), ModelError> {
        self.execute(move |m| m.add_layer_to_scan_queue(&sha)).await?
    }

    pub async fn finish_running_scan_client(
        &self,
        job: FinishedScanClientJob,
    ) -> Result<(), ModelError> {
        self.execute(move |m| m.finish_running_scan_client(&job.sha, job.err.as_deref()))
            .await?
    }

    /// Record a successful hub scan. Returns `false` if the layer was
    /// already complete (replayed completion events are a no-op).
    pub async fn record_scan_success(
        &self,
        sha: LayerSha,
        results: ScanResults,
    ) -> Result<bool, ModelError> {
        self.execute(move |m| m.record_scan_success(&sha, results))
            .await?
    }

    /// Record a failed hub scan: the layer becomes eligible again and is
    /// re-enqueued.
    pub async fn record_scan_failure(&self, sha: LayerSha) -> Result<(), ModelError> {
        self.execute(move |m| m.record_scan_failure(&sha)).await?
    }

    pub async fn set_layer_scan_results(
        &self,
        sha: LayerSha,
        results: ScanResults,
    ) -> Result<(), ModelError> {
        self.execute(move |m| m.set_layer_scan_results(&sha, results))
            .await?
    }

    pub async fn add_layer_to_refresh_queue(&self, sha: LayerSha) -> Result<(), ModelError> {
        self.execute(move |m| m.add_layer_to_refresh_queue(&sha))
            .await?
    }

    /// Rotate the refresh queue: returns the front entry and moves it to
    /// the back.
    pub async fn next_layer_to_refresh(&self) -> Result<Option<LayerSha>, ModelError> {
        self.execute(|m| m.next_layer_to_refresh()).await
    }

    pub async fn set_hub_enabled(&self, enabled: bool) -> Result<(), ModelError> {
        self.execute(move |m| m.set_hub_enabled(enabled)).await
    }

    pub async fn in_progress_scans(&self) -> Result<Vec<LayerSha>, ModelError> {
        self.execute(|m| m.in_progress_scans()).await
    }

    pub async fn in_progress_scan_count(&self) -> Result<usize, ModelError> {
        self.execute(|m| m.in_progress_scan_count()).await
    }

    pub async fn snapshot(&self) -> Result<ModelSnapshot, ModelError> {
        self.execute(|m| m.snapshot()).await
    }
}

async fn run(
    mut state: ModelState,
    mut rx: mpsc::Receiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd(&mut state),
                None => break,
            },
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    log::info!("scan model loop stopped");
}

#[cfg(test)]
mod test {
    use super::*;
    use scandium_model::Image;

    fn image(sha: &str) -> Image {
        Image {
            sha: ImageSha(sha.into()),
            repository: format!("registry.example.com/{sha}"),
            tag: None,
            priority: None,
        }
    }

    #[tokio::test]
    async fn operations_are_serialized_through_the_handle() -> Result<(), anyhow::Error> {
        let (_tx, rx) = watch::channel(false);
        let (model, _handle) = Model::spawn(ModelConfig::new(2), rx);

        assert!(model.add_image(image("sha256:aaa"), 3).await?);
        assert!(!model.add_image(image("sha256:aaa"), 3).await?);

        model
            .set_layers_for_image(ImageSha("sha256:aaa".into()), vec![LayerSha("l1".into())])
            .await?;

        assert_eq!(
            Some(LayerSha("l1".into())),
            model.next_layer_from_hub_check_queue().await?
        );

        Ok(())
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() -> Result<(), anyhow::Error> {
        let (tx, rx) = watch::channel(false);
        let (model, handle) = Model::spawn(ModelConfig::new(2), rx);

        tx.send(true)?;
        handle.await?;

        assert!(matches!(
            model.add_image(image("sha256:aaa"), 1).await,
            Err(ModelError::Gone)
        ));

        Ok(())
    }
}
