use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::ops::Deref;

/// A reference to a pod
#[derive(
    Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl Display for PodRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Content digest of a container image.
#[derive(
    Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize,
)]
pub struct ImageSha(pub String);

impl Display for ImageSha {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Deref for ImageSha {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Content digest of an image layer. Layers are global: the same digest may
/// show up in any number of images but is scanned at most once.
#[derive(
    Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize, serde::Deserialize,
)]
pub struct LayerSha(pub String);

impl Display for LayerSha {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Deref for LayerSha {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pod {
    pub namespace: String,
    pub name: String,
    pub containers: Vec<Container>,
}

impl Pod {
    pub fn pod_ref(&self) -> PodRef {
        PodRef {
            namespace: self.namespace.clone(),
            name: self.name.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    pub name: String,
    pub image: Image,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub sha: ImageSha,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Scan priority, higher is served first. Defaults to the lowest priority.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// The lifecycle of a layer, owned by the scan model. All mutations go
/// through the model's transition check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanStatus {
    Unknown,
    InHubCheckQueue,
    NotScanned,
    InQueue,
    RunningScanClient,
    RunningHubScan,
    Complete,
    Error,
}

impl Display for ScanStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanStatus::Unknown => "unknown",
            ScanStatus::InHubCheckQueue => "inHubCheckQueue",
            ScanStatus::NotScanned => "notScanned",
            ScanStatus::InQueue => "inQueue",
            ScanStatus::RunningScanClient => "runningScanClient",
            ScanStatus::RunningHubScan => "runningHubScan",
            ScanStatus::Complete => "complete",
            ScanStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Risk counts per category, as reported by the verification service:
/// category (e.g. `VULNERABILITY`) to severity (e.g. `HIGH`) to count.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    pub categories: BTreeMap<String, BTreeMap<String, u64>>,
}

/// The distilled outcome of a finished scan, as recorded on a layer.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResults {
    pub policy_status: String,
    pub risk_profile: RiskProfile,
    pub scan_summary_status: String,
    /// Where the hub lists the components found in this scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components_href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Answer to a worker's pre-flight question "should I scan this layer?".
///
/// Advisory only: callers must re-evaluate on every poll, the answer is
/// never a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScanDecision {
    Yes,
    No,
    Wait,
}

/// A unit of work handed to a scan worker.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanSpec {
    pub sha: LayerSha,
    pub hub_project_name: String,
    pub hub_project_version_name: String,
    pub hub_scan_name: String,
}

impl ScanSpec {
    /// Layers are submitted to the verification service under their own
    /// digest, for project, version and scan name alike.
    pub fn for_layer(sha: LayerSha) -> Self {
        let name = sha.0.clone();
        Self {
            sha,
            hub_project_name: name.clone(),
            hub_project_version_name: name.clone(),
            hub_scan_name: name,
        }
    }
}

/// Response to a worker's dispatch poll.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextLayer {
    pub layer: Option<ScanSpec>,
}

/// A worker's report that its scan client invocation finished.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedScanClientJob {
    pub sha: LayerSha,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Layer decomposition reported for an image.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetLayersRequest {
    pub layers: Vec<LayerSha>,
}

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddImageRequest {
    pub image: Image,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
}

/// Completion event emitted by the hub poller and consumed by the
/// reconciler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanCompletion {
    pub scan_name: String,
    pub outcome: ScanOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The check itself failed (network, auth, breaker open).
    Error(String),
    /// The verification service has no record for this scan yet.
    NotFound,
    /// The scan exists but has not finished.
    InProgress,
    /// The scan finished unsuccessfully.
    Failed,
    /// The scan finished and produced results.
    Success(ScanResults),
}

/// Serializable view of the model state, for the debug endpoint.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSnapshot {
    pub pods: Vec<Pod>,
    pub images: BTreeMap<String, ImageSnapshot>,
    pub layers: BTreeMap<String, LayerSnapshot>,
    pub hub_check_queue: Vec<LayerSha>,
    pub scan_queue: Vec<ScanQueueEntry>,
    pub refresh_queue: Vec<LayerSha>,
    pub in_progress_count: usize,
    pub concurrent_scan_limit: usize,
    pub hub_enabled: bool,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSnapshot {
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub priority: i32,
    pub layers: Vec<LayerSha>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerSnapshot {
    pub status: ScanStatus,
    pub from_image: ImageSha,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<ScanResults>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanQueueEntry {
    pub sha: LayerSha,
    pub priority: i32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pod_deserialization() -> Result<(), anyhow::Error> {
        let json = r#"
            {
                "namespace": "default",
                "name": "billing-7f9c",
                "containers": [
                    {
                        "name": "billing",
                        "image": {
                            "sha": "sha256:aaa",
                            "repository": "registry.example.com/billing",
                            "tag": "1.2.3"
                        }
                    }
                ]
            }
        "#;

        let pod: Pod = serde_json::from_str(json)?;

        assert_eq!("default", pod.namespace);
        assert_eq!(1, pod.containers.len());
        assert_eq!(ImageSha("sha256:aaa".into()), pod.containers[0].image.sha);
        assert_eq!(None, pod.containers[0].image.priority);

        Ok(())
    }

    #[test]
    fn scan_status_wire_format() {
        let s = serde_json::to_string(&ScanStatus::RunningScanClient).unwrap();
        assert_eq!(r#""runningScanClient""#, s);
        let back: ScanStatus = serde_json::from_str(&s).unwrap();
        assert_eq!(ScanStatus::RunningScanClient, back);
    }
}
