//! Applies completion events from the hub poller to the scan model.
//!
//! One bad event must never stop the loop: every case degrades to a log
//! line and the next poll gets another chance.

use scandium_model::{LayerSha, ScanCompletion, ScanOutcome};
use tokio::sync::mpsc;

use crate::model::{Model, ModelError};

pub async fn run(model: Model, mut completions: mpsc::Receiver<ScanCompletion>) {
    while let Some(event) = completions.recv().await {
        apply(&model, event).await;
    }
    log::info!("completion reconciler stopped");
}

/// Drive the state transition for a single completion event.
pub async fn apply(model: &Model, event: ScanCompletion) {
    let sha = LayerSha(event.scan_name.clone());

    match event.outcome {
        ScanOutcome::Error(e) => {
            // checked again on the next poll
            log::warn!("unable to check scan {sha}: {e}");
        }
        ScanOutcome::NotFound => {
            log::info!("hub has no record for scan {sha} yet");
        }
        ScanOutcome::InProgress => {
            // only terminal outcomes should reach us, but a stale poll may
            // still deliver this
            log::debug!("scan {sha} still in progress");
        }
        ScanOutcome::Failed => match model.record_scan_failure(sha.clone()).await {
            Ok(()) => log::info!("hub scan of layer {sha} failed, layer re-enqueued"),
            Err(ModelError::LayerNotFound(_)) => {
                log::error!("hub reported failure for layer {sha} the model does not know")
            }
            Err(e) => log::error!("unable to record scan failure for layer {sha}: {e}"),
        },
        ScanOutcome::Success(results) => {
            match model.record_scan_success(sha.clone(), results).await {
                Ok(true) => {
                    log::info!("hub scan of layer {sha} complete");
                    // schedule periodic re-fetch to catch late policy updates
                    if let Err(e) = model.add_layer_to_refresh_queue(sha.clone()).await {
                        match e {
                            ModelError::AlreadyQueued(_) => {}
                            e => log::warn!("unable to queue layer {sha} for refresh: {e}"),
                        }
                    }
                }
                Ok(false) => log::debug!("layer {sha} was already complete"),
                Err(ModelError::LayerNotFound(_)) => {
                    log::error!("hub reported success for layer {sha} the model does not know")
                }
                Err(e) => log::error!("unable to record scan success for layer {sha}: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{ModelConfig, DEFAULT_SCAN_PRIORITY};
    use scandium_model::{Image, ImageSha, ScanResults, ScanStatus};
    use tokio::sync::watch;

    fn results() -> ScanResults {
        ScanResults {
            policy_status: "NOT_IN_VIOLATION".into(),
            risk_profile: Default::default(),
            scan_summary_status: "COMPLETE".into(),
            components_href: None,
            updated_at: None,
        }
    }

    fn success(name: &str) -> ScanCompletion {
        ScanCompletion {
            scan_name: name.into(),
            outcome: ScanOutcome::Success(results()),
        }
    }

    /// Spawn a model with one layer in `RunningHubScan`. The caller must
    /// hold the returned shutdown sender for the model's lifetime.
    async fn running_model() -> Result<(Model, watch::Sender<bool>), anyhow::Error> {
        let (tx, rx) = watch::channel(false);
        let (model, _handle) = Model::spawn(ModelConfig::new(5), rx);
        model.set_hub_enabled(true).await?;

        let image_sha = ImageSha("sha256:aaa".into());
        model
            .add_image(
                Image {
                    sha: image_sha.clone(),
                    repository: "registry.example.com/app".into(),
                    tag: None,
                    priority: None,
                },
                DEFAULT_SCAN_PRIORITY,
            )
            .await?;
        model
            .set_layers_for_image(image_sha, vec![LayerSha("l1".into())])
            .await?;

        let sha = LayerSha("l1".into());
        model
            .set_layer_scan_status(sha.clone(), ScanStatus::NotScanned)
            .await?;
        model.add_layer_to_scan_queue(sha.clone()).await?;
        model.dispatch_next_scan().await?;
        model
            .finish_running_scan_client(scandium_model::FinishedScanClientJob {
                sha,
                err: None,
            })
            .await?;

        Ok((model, tx))
    }

    #[tokio::test]
    async fn success_completes_layer_and_queues_refresh() -> Result<(), anyhow::Error> {
        let (model, _shutdown) = running_model().await?;

        apply(&model, success("l1")).await;

        let snapshot = model.snapshot().await?;
        assert_eq!(ScanStatus::Complete, snapshot.layers["l1"].status);
        assert!(snapshot.layers["l1"].results.is_some());
        assert_eq!(vec![LayerSha("l1".into())], snapshot.refresh_queue);

        Ok(())
    }

    #[tokio::test]
    async fn replayed_success_is_idempotent() -> Result<(), anyhow::Error> {
        let (model, _shutdown) = running_model().await?;

        apply(&model, success("l1")).await;
        apply(&model, success("l1")).await;

        let snapshot = model.snapshot().await?;
        assert_eq!(ScanStatus::Complete, snapshot.layers["l1"].status);
        // still exactly one refresh entry
        assert_eq!(1, snapshot.refresh_queue.len());

        Ok(())
    }

    #[tokio::test]
    async fn failure_requeues_layer() -> Result<(), anyhow::Error> {
        let (model, _shutdown) = running_model().await?;

        apply(
            &model,
            ScanCompletion {
                scan_name: "l1".into(),
                outcome: ScanOutcome::Failed,
            },
        )
        .await;

        let snapshot = model.snapshot().await?;
        assert_eq!(ScanStatus::InQueue, snapshot.layers["l1"].status);
        assert_eq!(1, snapshot.scan_queue.len());

        Ok(())
    }

    #[tokio::test]
    async fn unknown_layer_does_not_stop_the_reconciler() -> Result<(), anyhow::Error> {
        let (model, _shutdown) = running_model().await?;

        apply(&model, success("no-such-layer")).await;
        // the model is still alive and serving
        assert!(model.snapshot().await.is_ok());

        Ok(())
    }

    #[tokio::test]
    async fn transient_outcomes_take_no_action() -> Result<(), anyhow::Error> {
        let (model, _shutdown) = running_model().await?;

        for outcome in [
            ScanOutcome::Error("connection refused".into()),
            ScanOutcome::NotFound,
            ScanOutcome::InProgress,
        ] {
            apply(
                &model,
                ScanCompletion {
                    scan_name: "l1".into(),
                    outcome,
                },
            )
            .await;
        }

        let snapshot = model.snapshot().await?;
        assert_eq!(ScanStatus::RunningHubScan, snapshot.layers["l1"].status);

        Ok(())
    }
}
