use scandium_model::ScanStatus;

/// The single source of truth for scan lifecycle policy.
///
/// Every status mutation in the model routes through this table; an
/// illegal pair is reported as an error by the caller and must not mutate
/// any queue.
pub fn is_legal_transition(from: ScanStatus, to: ScanStatus) -> bool {
    use ScanStatus::*;

    matches!(
        (from, to),
        (Unknown, InHubCheckQueue)
            | (InHubCheckQueue, NotScanned)
            | (InHubCheckQueue, RunningHubScan)
            | (InHubCheckQueue, Complete)
            | (NotScanned, InQueue)
            | (InQueue, RunningScanClient)
            | (InQueue, Error)
            | (RunningScanClient, RunningHubScan)
            | (RunningScanClient, NotScanned)
            | (RunningScanClient, Error)
            | (RunningHubScan, Complete)
            | (RunningHubScan, NotScanned)
            | (RunningHubScan, Error)
            | (Error, InQueue)
            | (Error, NotScanned)
    )
}
