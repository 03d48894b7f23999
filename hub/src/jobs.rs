//! Scheduled jobs: periodic login, code location refresh and completion
//! polling.
//!
//! The login job owns the hub's availability flag. The other jobs pause
//! while the hub is down and resume as soon as it comes back, without
//! waiting for their next tick. All network work happens here, outside
//! any serialized state, and results are handed back as cache updates or
//! completion events.

use scandium_model::{ScanCompletion, ScanOutcome};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::FetchedScan;
use crate::{Hub, HubError};

pub fn spawn(hub: Hub, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(login_loop(hub.clone(), shutdown.clone())),
        tokio::spawn(code_locations_loop(hub.clone(), shutdown.clone())),
        tokio::spawn(completions_loop(hub, shutdown)),
    ]
}

async fn login_loop(hub: Hub, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(hub.config().login_interval);
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

        match hub.login().await {
            Ok(()) => {
                if !hub.is_up() {
                    log::info!("hub login succeeded, marking hub up");
                }
                hub.set_up(true);
            }
            Err(e) => {
                if hub.is_up() {
                    log::warn!("hub login failed, marking hub down: {e}");
                }
                hub.set_up(false);
            }
        }
    }
    log::info!("hub login job stopped");
}

async fn code_locations_loop(hub: Hub, mut shutdown: watch::Receiver<bool>) {
    let mut up = hub.availability();
    let mut interval = tokio::time::interval(hub.config().refresh_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {}
            // run immediately when the hub comes back up
            _ = up.changed() => {}
        }
        if !*up.borrow() {
            continue;
        }

        if let Err(e) = hub.refresh_code_locations().await {
            log::warn!("unable to refresh code locations: {e}");
        }
    }
    log::info!("code location refresh job stopped");
}

async fn completions_loop(hub: Hub, mut shutdown: watch::Receiver<bool>) {
    let mut up = hub.availability();
    let mut interval = tokio::time::interval(hub.config().completion_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            res = shutdown.changed() => {
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {}
            _ = up.changed() => {}
        }
        if !*up.borrow() {
            continue;
        }

        check_in_progress_scans(&hub).await;
    }
    log::info!("scan completion job stopped");
}

/// Poll every tracked scan once. Terminal outcomes stop the tracking;
/// everything else is retried on the next tick.
async fn check_in_progress_scans(hub: &Hub) {
    for name in hub.in_progress_scan_names() {
        let outcome = match hub.fetch_scan(&name).await {
            Err(HubError::Unavailable { retry_in }) => {
                log::debug!("hub unavailable, deferring completion checks for {retry_in:?}");
                return;
            }
            Err(e) => ScanOutcome::Error(e.to_string()),
            Ok(None) => ScanOutcome::NotFound,
            Ok(Some(FetchedScan::InProgress)) => continue,
            Ok(Some(FetchedScan::Failed)) => {
                hub.untrack_scan(&name);
                ScanOutcome::Failed
            }
            Ok(Some(FetchedScan::Complete(results))) => {
                hub.untrack_scan(&name);
                ScanOutcome::Success(results)
            }
        };

        hub.emit(ScanCompletion {
            scan_name: name,
            outcome,
        })
        .await;
    }
}
