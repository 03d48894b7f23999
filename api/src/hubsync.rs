//! Background loops bridging the scan model and the hub.
//!
//! The hub check loop resolves newly discovered layers against the hub's
//! existing records before any work is handed to a scan client. The
//! refresh loop re-fetches one complete layer's results per tick, so
//! policy changes on the hub eventually show up here. Both pause while
//! the hub is down.

use std::time::Duration;

use scandium_core::model::{Model, ModelError};
use scandium_hub::client::FetchedScan;
use scandium_hub::{Hub, HubError};
use scandium_model::{LayerSha, ScanStatus};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Mirror hub availability into the model, so dispatch and should-scan
/// answers stop as soon as the hub goes down. Ends when either side goes
/// away.
pub async fn forward_availability(mut up: watch::Receiver<bool>, model: Model) {
    loop {
        let enabled = *up.borrow_and_update();
        if model.set_hub_enabled(enabled).await.is_err() {
            break;
        }
        if up.changed().await.is_err() {
            break;
        }
    }
    log::info!("hub availability forwarder stopped");
}

pub async fn hub_check_loop(
    model: Model,
    hub: Hub,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {}
        }
        if !hub.is_up() {
            continue;
        }

        if let Err(ModelError::Gone) = drain_hub_check_queue(&model, &hub).await {
            break;
        }
    }
    log::info!("hub check job stopped");
}

/// Resolve queued layers head-first until the queue is empty or the hub
/// stops answering. A fetch error leaves the head in place for the next
/// tick.
async fn drain_hub_check_queue(model: &Model, hub: &Hub) -> Result<(), ModelError> {
    while let Some(sha) = model.next_layer_from_hub_check_queue().await? {
        let fetched = match hub.fetch_scan(&sha).await {
            Ok(fetched) => fetched,
            Err(HubError::Unavailable { retry_in }) => {
                log::debug!("hub unavailable, deferring hub checks for {retry_in:?}");
                return Ok(());
            }
            Err(e) => {
                log::warn!("hub check failed for layer {sha}: {e}");
                return Ok(());
            }
        };
        if let Err(e) = resolve_hub_check(model, hub, sha.clone(), fetched).await {
            if matches!(e, ModelError::Gone) {
                return Err(e);
            }
            log::error!("unable to resolve hub check for layer {sha}: {e}");
        }
    }
    Ok(())
}

async fn resolve_hub_check(
    model: &Model,
    hub: &Hub,
    sha: LayerSha,
    fetched: Option<FetchedScan>,
) -> Result<(), ModelError> {
    model.remove_layer_from_hub_check_queue(sha.clone()).await?;

    match fetched {
        None => {
            log::debug!("no hub record for layer {sha}, queueing for scan");
            model
                .set_layer_scan_status(sha.clone(), ScanStatus::NotScanned)
                .await?;
            model.add_layer_to_scan_queue(sha).await
        }
        Some(FetchedScan::Failed) => {
            log::info!("previous hub scan of layer {sha} failed, queueing for rescan");
            model
                .set_layer_scan_status(sha.clone(), ScanStatus::NotScanned)
                .await?;
            model.add_layer_to_scan_queue(sha).await
        }
        Some(FetchedScan::InProgress) => {
            log::info!("layer {sha} is already scanning on the hub, tracking");
            model
                .set_layer_scan_status(sha.clone(), ScanStatus::RunningHubScan)
                .await?;
            hub.track_scan(sha.0);
            Ok(())
        }
        Some(FetchedScan::Complete(results)) => {
            log::info!("layer {sha} is already complete on the hub");
            model.record_scan_success(sha.clone(), results).await?;
            match model.add_layer_to_refresh_queue(sha).await {
                Ok(()) | Err(ModelError::AlreadyQueued(_)) => Ok(()),
                Err(e) => Err(e),
            }
        }
    }
}

pub async fn results_refresh_loop(
    model: Model,
    hub: Hub,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {}
        }
        if !hub.is_up() {
            continue;
        }

        let sha = match model.next_layer_to_refresh().await {
            Ok(Some(sha)) => sha,
            Ok(None) => continue,
            Err(_) => break,
        };

        match hub.fetch_scan(&sha).await {
            Ok(Some(FetchedScan::Complete(results))) => {
                if let Err(e) = model.set_layer_scan_results(sha.clone(), results).await {
                    if matches!(e, ModelError::Gone) {
                        break;
                    }
                    log::error!("unable to store refreshed results for layer {sha}: {e}");
                }
            }
            Ok(Some(_)) => {
                log::warn!("complete layer {sha} no longer reads as complete on the hub");
            }
            Ok(None) => {
                log::warn!("hub record for complete layer {sha} has disappeared");
            }
            Err(e) => {
                log::debug!("results refresh for layer {sha} deferred: {e}");
            }
        }
    }
    log::info!("results refresh job stopped");
}
