use std::collections::{HashMap, HashSet, VecDeque};

use scandium_model::{
    Image, ImageSha, ImageSnapshot, LayerSha, LayerSnapshot, ModelSnapshot, Pod, PodRef,
    ScanDecision, ScanQueueEntry, ScanResults, ScanSpec, ScanStatus,
};

use crate::queue::PriorityQueue;
use crate::status::is_legal_transition;

use super::ModelError;

/// Priority assigned when the caller does not specify one.
pub const DEFAULT_SCAN_PRIORITY: i32 = 1;

#[derive(Clone, Debug)]
pub struct ModelConfig {
    pub concurrent_scan_limit: usize,
}

impl ModelConfig {
    pub fn new(concurrent_scan_limit: usize) -> Self {
        Self {
            concurrent_scan_limit,
        }
    }
}

#[derive(Debug)]
struct ImageRecord {
    image: Image,
    priority: i32,
    layers: Vec<LayerSha>,
}

#[derive(Debug)]
struct LayerRecord {
    status: ScanStatus,
    /// The image that first revealed this layer. Informational only, never
    /// an ownership relation.
    from_image: ImageSha,
    /// All images known to reference this layer; scan priority is
    /// inherited from the highest-priority one.
    ref_images: HashSet<ImageSha>,
    results: Option<ScanResults>,
}

/// All pod, image and layer bookkeeping plus the three work queues.
///
/// Purely in-memory; a process restart relies on re-observation from the
/// cluster watcher and the hub's own records.
pub struct ModelState {
    pods: HashMap<PodRef, Pod>,
    images: HashMap<ImageSha, ImageRecord>,
    layers: HashMap<LayerSha, LayerRecord>,
    hub_check_queue: VecDeque<LayerSha>,
    scan_queue: PriorityQueue<LayerSha, ()>,
    refresh_queue: VecDeque<LayerSha>,
    refresh_members: HashSet<LayerSha>,
    /// Layers currently in `RunningScanClient` or `RunningHubScan`.
    /// Maintained incrementally by `set_layer_scan_status`.
    in_progress: usize,
    hub_enabled: bool,
    concurrent_scan_limit: usize,
}

impl ModelState {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            pods: HashMap::new(),
            images: HashMap::new(),
            layers: HashMap::new(),
            hub_check_queue: VecDeque::new(),
            scan_queue: PriorityQueue::new(),
            refresh_queue: VecDeque::new(),
            refresh_members: HashSet::new(),
            in_progress: 0,
            hub_enabled: false,
            concurrent_scan_limit: config.concurrent_scan_limit,
        }
    }

    /// Add or replace a pod. Images referenced by its containers are added
    /// at their carried priority.
    pub fn add_pod(&mut self, pod: Pod) {
        if pod.containers.is_empty() {
            log::warn!("adding pod {} with zero containers", pod.pod_ref());
        }
        for container in &pod.containers {
            let priority = container.image.priority.unwrap_or(DEFAULT_SCAN_PRIORITY);
            self.add_image(container.image.clone(), priority);
        }
        self.pods.insert(pod.pod_ref(), pod);
    }

    /// Replace the whole pod population. Images and layers are never
    /// removed here; they may still be worth scanning.
    pub fn update_all_pods(&mut self, pods: Vec<Pod>) {
        self.pods.clear();
        for pod in pods {
            self.add_pod(pod);
        }
    }

    /// Remove a pod record. Never cascades to images or layers.
    pub fn delete_pod(&mut self, pod_ref: &PodRef) -> Result<(), ModelError> {
        self.pods
            .remove(pod_ref)
            .map(|_| ())
            .ok_or_else(|| ModelError::PodNotFound(pod_ref.clone()))
    }

    /// Returns `true` if the image was new. Re-adding a known digest is a
    /// no-op.
    pub fn add_image(&mut self, image: Image, priority: i32) -> bool {
        if self.images.contains_key(&image.sha) {
            log::debug!("image {} already known, not adding", image.sha);
            return false;
        }
        log::info!(
            "adding image {} ({}) at priority {priority}",
            image.sha,
            image.repository
        );
        self.images.insert(
            image.sha.clone(),
            ImageRecord {
                image,
                priority,
                layers: Vec::new(),
            },
        );
        true
    }

    /// Record the layer decomposition of a known image. Layers never seen
    /// before are created and sent through the hub check queue; layers
    /// already known are only cross-referenced, never re-queued.
    pub fn set_layers_for_image(
        &mut self,
        image_sha: &ImageSha,
        layers: Vec<LayerSha>,
    ) -> Result<(), ModelError> {
        if !self.images.contains_key(image_sha) {
            return Err(ModelError::ImageNotFound(image_sha.clone()));
        }

        for sha in &layers {
            match self.layers.get_mut(sha) {
                Some(record) => {
                    record.ref_images.insert(image_sha.clone());
                }
                None => {
                    self.layers.insert(
                        sha.clone(),
                        LayerRecord {
                            status: ScanStatus::Unknown,
                            from_image: image_sha.clone(),
                            ref_images: HashSet::from([image_sha.clone()]),
                            results: None,
                        },
                    );
                    self.set_layer_scan_status(sha, ScanStatus::InHubCheckQueue)?;
                }
            }
        }

        if let Some(image) = self.images.get_mut(image_sha) {
            image.layers = layers;
        }

        Ok(())
    }

    /// Peek at the front of the hub check queue; non-destructive.
    pub fn next_layer_from_hub_check_queue(&self) -> Option<LayerSha> {
        self.hub_check_queue.front().cloned()
    }

    pub fn remove_layer_from_hub_check_queue(&mut self, sha: &LayerSha) -> Result<(), ModelError> {
        match self.hub_check_queue.iter().position(|s| s == sha) {
            Some(pos) => {
                self.hub_check_queue.remove(pos);
                Ok(())
            }
            None => Err(ModelError::NotInHubCheckQueue(sha.clone())),
        }
    }

    /// Advisory pre-flight check; must be re-evaluated on every poll.
    pub fn should_scan_layer(&self, sha: &LayerSha) -> Result<ScanDecision, ModelError> {
        let record = self
            .layers
            .get(sha)
            .ok_or_else(|| ModelError::LayerNotFound(sha.clone()))?;

        if !self.hub_enabled || self.in_progress >= self.concurrent_scan_limit {
            return Ok(ScanDecision::Wait);
        }

        Ok(match record.status {
            ScanStatus::Unknown => ScanDecision::Wait,
            ScanStatus::NotScanned => ScanDecision::Yes,
            _ => ScanDecision::No,
        })
    }

    /// Pop the highest-priority layer and transition it to
    /// `RunningScanClient` as one step, so the concurrency cap can never
    /// be oversubscribed.
    pub fn dispatch_next_scan(&mut self) -> Option<ScanSpec> {
        if !self.hub_enabled {
            log::debug!("not dispatching: hub is disabled");
            return None;
        }
        if self.in_progress >= self.concurrent_scan_limit {
            log::debug!(
                "not dispatching: {} scans in progress, limit {}",
                self.in_progress,
                self.concurrent_scan_limit
            );
            return None;
        }
        let (sha, ()) = self.scan_queue.pop().ok()?;
        match self.set_layer_scan_status(&sha, ScanStatus::RunningScanClient) {
            Ok(()) => Some(ScanSpec::for_layer(sha)),
            Err(e) => {
                // bookkeeping bug; surface it, don't hand out the work,
                // and put the entry back rather than silently losing it
                log::error!("unable to dispatch layer {sha}: {e}");
                let priority = self.layer_priority(&sha);
                if let Err(e) = self.scan_queue.add(sha.clone(), priority, ()) {
                    log::error!("unable to re-enqueue layer {sha}: {e}");
                }
                None
            }
        }
    }

    /// The sole legal entry point for status mutation. Validates against
    /// the transition table and keeps queue membership and the in-progress
    /// counter in sync; on failure nothing is mutated.
    pub fn set_layer_scan_status(
        &mut self,
        sha: &LayerSha,
        to: ScanStatus,
    ) -> Result<(), ModelError> {
        let from = self
            .layers
            .get(sha)
            .ok_or_else(|| ModelError::LayerNotFound(sha.clone()))?
            .status;

        if !is_legal_transition(from, to) {
            return Err(ModelError::IllegalTransition {
                sha: sha.clone(),
                from,
                to,
            });
        }

        // queue entry for the state being entered; computed and applied
        // before the status flips so a queue failure leaves nothing changed
        match to {
            ScanStatus::InHubCheckQueue => self.hub_check_queue.push_back(sha.clone()),
            ScanStatus::InQueue => {
                let priority = self.layer_priority(sha);
                self.scan_queue.add(sha.clone(), priority, ())?;
            }
            _ => {}
        }

        // leave the state being exited
        match from {
            ScanStatus::InHubCheckQueue => {
                if let Some(pos) = self.hub_check_queue.iter().position(|s| s == sha) {
                    self.hub_check_queue.remove(pos);
                }
            }
            ScanStatus::InQueue => {
                // already gone if the caller popped the queue
                let _ = self.scan_queue.remove(sha);
            }
            _ => {}
        }

        match (in_progress(from), in_progress(to)) {
            (false, true) => self.in_progress += 1,
            (true, false) => self.in_progress = self.in_progress.saturating_sub(1),
            _ => {}
        }

        if let Some(record) = self.layers.get_mut(sha) {
            log::debug!("layer {sha}: {from} -> {to}");
            record.status = to;
        }

        Ok(())
    }

    /// Move an eligible layer into the scan queue at its inherited
    /// priority.
    pub fn add_layer_to_scan_queue(&mut self, sha: &LayerSha) -> Result<(), ModelError> {
        self.set_layer_scan_status(sha, ScanStatus::InQueue)
    }

    /// A worker's report that its scan client invocation finished. Success
    /// hands the layer over to the hub-side scan; failure passes through
    /// `Error` and re-enqueues the layer.
    pub fn finish_running_scan_client(
        &mut self,
        sha: &LayerSha,
        err: Option<&str>,
    ) -> Result<(), ModelError> {
        match err {
            None => self.set_layer_scan_status(sha, ScanStatus::RunningHubScan),
            Some(msg) => {
                log::error!("scan client failed for layer {sha}: {msg}");
                self.set_layer_scan_status(sha, ScanStatus::Error)?;
                self.set_layer_scan_status(sha, ScanStatus::InQueue)
            }
        }
    }

    /// Record a successful hub scan. Replayed events for an already
    /// complete layer are a clean no-op (`Ok(false)`).
    pub fn record_scan_success(
        &mut self,
        sha: &LayerSha,
        results: ScanResults,
    ) -> Result<bool, ModelError> {
        let record = self
            .layers
            .get(sha)
            .ok_or_else(|| ModelError::LayerNotFound(sha.clone()))?;
        if record.status == ScanStatus::Complete {
            log::debug!("layer {sha} is already complete, ignoring repeated success");
            return Ok(false);
        }

        self.set_layer_scan_status(sha, ScanStatus::Complete)?;
        if let Some(record) = self.layers.get_mut(sha) {
            record.results = Some(results);
        }
        Ok(true)
    }

    /// Record a failed hub scan: through `Error` and re-enqueued.
    pub fn record_scan_failure(&mut self, sha: &LayerSha) -> Result<(), ModelError> {
        self.set_layer_scan_status(sha, ScanStatus::Error)?;
        self.set_layer_scan_status(sha, ScanStatus::InQueue)
    }

    /// Update stored results without a status change; used when a complete
    /// layer's record is re-fetched.
    pub fn set_layer_scan_results(
        &mut self,
        sha: &LayerSha,
        results: ScanResults,
    ) -> Result<(), ModelError> {
        let record = self
            .layers
            .get_mut(sha)
            .ok_or_else(|| ModelError::LayerNotFound(sha.clone()))?;
        record.results = Some(results);
        Ok(())
    }

    /// Queue a complete layer for periodic re-fetch of its hub record.
    /// Duplicate enqueues are rejected.
    pub fn add_layer_to_refresh_queue(&mut self, sha: &LayerSha) -> Result<(), ModelError> {
        let record = self
            .layers
            .get(sha)
            .ok_or_else(|| ModelError::LayerNotFound(sha.clone()))?;
        if record.status != ScanStatus::Complete {
            return Err(ModelError::NotComplete {
                sha: sha.clone(),
                status: record.status,
            });
        }
        if !self.refresh_members.insert(sha.clone()) {
            return Err(ModelError::AlreadyQueued(sha.clone()));
        }
        self.refresh_queue.push_back(sha.clone());
        Ok(())
    }

    /// Rotate the refresh queue: front entry comes back, moved to the
    /// back.
    pub fn next_layer_to_refresh(&mut self) -> Option<LayerSha> {
        let sha = self.refresh_queue.pop_front()?;
        self.refresh_queue.push_back(sha.clone());
        Some(sha)
    }

    pub fn set_hub_enabled(&mut self, enabled: bool) {
        if self.hub_enabled != enabled {
            log::info!(
                "hub is now {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        self.hub_enabled = enabled;
    }

    /// Derived view over all layers; the incremental counter must agree
    /// with it.
    pub fn in_progress_scans(&self) -> Vec<LayerSha> {
        let mut shas: Vec<_> = self
            .layers
            .iter()
            .filter(|(_, record)| in_progress(record.status))
            .map(|(sha, _)| sha.clone())
            .collect();
        shas.sort();
        shas
    }

    pub fn in_progress_scan_count(&self) -> usize {
        self.in_progress
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let mut pods: Vec<_> = self.pods.values().cloned().collect();
        pods.sort_by(|a, b| (a.pod_ref()).cmp(&b.pod_ref()));

        ModelSnapshot {
            pods,
            images: self
                .images
                .iter()
                .map(|(sha, record)| {
                    (
                        sha.0.clone(),
                        ImageSnapshot {
                            repository: record.image.repository.clone(),
                            tag: record.image.tag.clone(),
                            priority: record.priority,
                            layers: record.layers.clone(),
                        },
                    )
                })
                .collect(),
            layers: self
                .layers
                .iter()
                .map(|(sha, record)| {
                    (
                        sha.0.clone(),
                        LayerSnapshot {
                            status: record.status,
                            from_image: record.from_image.clone(),
                            results: record.results.clone(),
                        },
                    )
                })
                .collect(),
            hub_check_queue: self.hub_check_queue.iter().cloned().collect(),
            scan_queue: self
                .scan_queue
                .iter()
                .map(|(sha, priority)| ScanQueueEntry {
                    sha: sha.clone(),
                    priority,
                })
                .collect(),
            refresh_queue: self.refresh_queue.iter().cloned().collect(),
            in_progress_count: self.in_progress,
            concurrent_scan_limit: self.concurrent_scan_limit,
            hub_enabled: self.hub_enabled,
        }
    }

    fn layer_priority(&self, sha: &LayerSha) -> i32 {
        self.layers
            .get(sha)
            .map(|record| {
                record
                    .ref_images
                    .iter()
                    .filter_map(|image| self.images.get(image))
                    .map(|image| image.priority)
                    .max()
                    .unwrap_or(DEFAULT_SCAN_PRIORITY)
            })
            .unwrap_or(DEFAULT_SCAN_PRIORITY)
    }
}

fn in_progress(status: ScanStatus) -> bool {
    matches!(
        status,
        ScanStatus::RunningScanClient | ScanStatus::RunningHubScan
    )
}

#[cfg(test)]
mod test {
    use super::*;
    use scandium_model::Container;

    fn image(sha: &str) -> Image {
        Image {
            sha: ImageSha(sha.into()),
            repository: format!("registry.example.com/{sha}"),
            tag: None,
            priority: None,
        }
    }

    fn pod(namespace: &str, name: &str, images: &[(&str, i32)]) -> Pod {
        Pod {
            namespace: namespace.into(),
            name: name.into(),
            containers: images
                .iter()
                .map(|(sha, priority)| Container {
                    name: format!("c-{sha}"),
                    image: Image {
                        priority: Some(*priority),
                        ..image(sha)
                    },
                })
                .collect(),
        }
    }

    fn results() -> ScanResults {
        ScanResults {
            policy_status: "NOT_IN_VIOLATION".into(),
            risk_profile: Default::default(),
            scan_summary_status: "COMPLETE".into(),
            components_href: None,
            updated_at: None,
        }
    }

    fn enabled_model(limit: usize) -> ModelState {
        let mut model = ModelState::new(ModelConfig::new(limit));
        model.set_hub_enabled(true);
        model
    }

    /// Walk a layer from creation up to `InQueue`.
    fn queue_layer(model: &mut ModelState, image_sha: &str, layer_sha: &str) {
        model.add_image(image(image_sha), DEFAULT_SCAN_PRIORITY);
        model
            .set_layers_for_image(
                &ImageSha(image_sha.into()),
                vec![LayerSha(layer_sha.into())],
            )
            .unwrap();
        let sha = LayerSha(layer_sha.into());
        model.remove_layer_from_hub_check_queue(&sha).unwrap();
        model
            .set_layer_scan_status(&sha, ScanStatus::NotScanned)
            .unwrap();
        model.add_layer_to_scan_queue(&sha).unwrap();
    }

    #[test]
    fn image_dedup() {
        let mut model = enabled_model(2);
        assert!(model.add_image(image("sha256:aaa"), 1));
        assert!(!model.add_image(image("sha256:aaa"), 5));
        assert_eq!(1, model.snapshot().images.len());
        // priority of the first add wins
        assert_eq!(1, model.snapshot().images["sha256:aaa"].priority);
    }

    #[test]
    fn shared_layers_are_created_and_queued_once() {
        let mut model = enabled_model(2);
        model.add_image(image("sha256:aaa"), 1);
        model.add_image(image("sha256:bbb"), 1);

        let shared = LayerSha("l-shared".into());
        model
            .set_layers_for_image(&ImageSha("sha256:aaa".into()), vec![shared.clone()])
            .unwrap();
        model
            .set_layers_for_image(&ImageSha("sha256:bbb".into()), vec![shared.clone()])
            .unwrap();

        let snapshot = model.snapshot();
        assert_eq!(1, snapshot.layers.len());
        assert_eq!(vec![shared], snapshot.hub_check_queue);
    }

    #[test]
    fn unknown_image_is_rejected() {
        let mut model = enabled_model(2);
        let err = model
            .set_layers_for_image(&ImageSha("sha256:nope".into()), vec![LayerSha("l1".into())])
            .unwrap_err();
        assert!(matches!(err, ModelError::ImageNotFound(_)));
    }

    #[test]
    fn illegal_transition_leaves_status_unchanged() {
        let mut model = enabled_model(2);
        model.add_image(image("sha256:aaa"), 1);
        model
            .set_layers_for_image(&ImageSha("sha256:aaa".into()), vec![LayerSha("l1".into())])
            .unwrap();

        let sha = LayerSha("l1".into());
        let err = model
            .set_layer_scan_status(&sha, ScanStatus::Complete)
            .err();
        assert!(err.is_none(), "hub check may resolve directly to complete");

        // now it is complete; nothing further is legal
        for to in [
            ScanStatus::Unknown,
            ScanStatus::InQueue,
            ScanStatus::RunningScanClient,
            ScanStatus::Error,
        ] {
            let err = model.set_layer_scan_status(&sha, to).unwrap_err();
            assert!(matches!(err, ModelError::IllegalTransition { .. }));
            assert_eq!(
                ScanStatus::Complete,
                model.snapshot().layers["l1"].status,
                "failed transition must not mutate"
            );
        }
    }

    #[test]
    fn concurrency_cap_stops_dispatch() {
        let mut model = enabled_model(2);
        for i in 0..3 {
            queue_layer(&mut model, &format!("sha256:{i}"), &format!("l{i}"));
        }

        assert!(model.dispatch_next_scan().is_some());
        assert!(model.dispatch_next_scan().is_some());
        // cap reached: queue is non-empty but no work is handed out
        assert_eq!(2, model.in_progress_scan_count());
        assert!(model.dispatch_next_scan().is_none());
        assert_eq!(
            ScanDecision::Wait,
            model.should_scan_layer(&LayerSha("l2".into())).unwrap()
        );

        // one scan finishing frees a slot
        let running = model.in_progress_scans()[0].clone();
        model.finish_running_scan_client(&running, None).unwrap();
        model.record_scan_success(&running, results()).unwrap();
        assert!(model.dispatch_next_scan().is_some());
    }

    #[test]
    fn failed_dispatch_re_enqueues_the_layer() {
        let mut model = enabled_model(2);
        queue_layer(&mut model, "sha256:aaa", "l1");

        // force a queue entry whose status no longer permits dispatch
        let sha = LayerSha("l1".into());
        model.layers.get_mut(&sha).unwrap().status = ScanStatus::Complete;

        assert!(model.dispatch_next_scan().is_none());
        // still queued rather than silently lost
        assert!(model.scan_queue.contains(&sha));
        assert_eq!(0, model.in_progress_scan_count());
    }

    #[test]
    fn disabled_hub_stops_dispatch() {
        let mut model = enabled_model(2);
        queue_layer(&mut model, "sha256:aaa", "l1");

        model.set_hub_enabled(false);
        assert!(model.dispatch_next_scan().is_none());
        assert_eq!(
            ScanDecision::Wait,
            model.should_scan_layer(&LayerSha("l1".into())).unwrap()
        );

        model.set_hub_enabled(true);
        assert!(model.dispatch_next_scan().is_some());
    }

    #[test]
    fn scan_queue_priority_is_inherited_from_images() {
        let mut model = enabled_model(10);
        for (image_sha, layer_sha, priority) in
            [("sha256:a", "l-a", 1), ("sha256:b", "l-b", 5), ("sha256:c", "l-c", 3)]
        {
            model.add_image(image(image_sha), priority);
            model
                .set_layers_for_image(&ImageSha(image_sha.into()), vec![LayerSha(layer_sha.into())])
                .unwrap();
            let sha = LayerSha(layer_sha.into());
            model
                .set_layer_scan_status(&sha, ScanStatus::NotScanned)
                .unwrap();
            model.add_layer_to_scan_queue(&sha).unwrap();
        }

        let popped: Vec<_> = std::iter::from_fn(|| model.dispatch_next_scan())
            .map(|spec| spec.sha.0)
            .collect();
        assert_eq!(vec!["l-b", "l-c", "l-a"], popped);
    }

    #[test]
    fn failed_scan_client_requeues_the_layer() {
        let mut model = enabled_model(2);
        queue_layer(&mut model, "sha256:aaa", "l1");

        let spec = model.dispatch_next_scan().unwrap();
        assert_eq!("l1", spec.sha.0.as_str());
        assert_eq!(1, model.in_progress_scan_count());

        model
            .finish_running_scan_client(&spec.sha, Some("scan client exploded"))
            .unwrap();
        assert_eq!(0, model.in_progress_scan_count());
        assert_eq!(ScanStatus::InQueue, model.snapshot().layers["l1"].status);

        // poppable again
        assert_eq!("l1", model.dispatch_next_scan().unwrap().sha.0.as_str());
    }

    #[test]
    fn finish_unknown_layer_is_a_reported_error() {
        let mut model = enabled_model(2);
        let err = model
            .finish_running_scan_client(&LayerSha("missing".into()), None)
            .unwrap_err();
        assert!(matches!(err, ModelError::LayerNotFound(_)));
    }

    #[test]
    fn counter_agrees_with_derived_view() {
        let mut model = enabled_model(10);
        for i in 0..4 {
            queue_layer(&mut model, &format!("sha256:{i}"), &format!("l{i}"));
        }
        for _ in 0..3 {
            model.dispatch_next_scan().unwrap();
        }
        assert_eq!(
            model.in_progress_scans().len(),
            model.in_progress_scan_count()
        );

        let running = model.in_progress_scans()[0].clone();
        model.finish_running_scan_client(&running, None).unwrap();
        assert_eq!(
            model.in_progress_scans().len(),
            model.in_progress_scan_count()
        );
    }

    #[test]
    fn refresh_queue_rejects_duplicates_and_incomplete_layers() {
        let mut model = enabled_model(2);
        queue_layer(&mut model, "sha256:aaa", "l1");
        let sha = LayerSha("l1".into());

        let err = model.add_layer_to_refresh_queue(&sha).unwrap_err();
        assert!(matches!(err, ModelError::NotComplete { .. }));

        model.dispatch_next_scan().unwrap();
        model.finish_running_scan_client(&sha, None).unwrap();
        model.record_scan_success(&sha, results()).unwrap();

        model.add_layer_to_refresh_queue(&sha).unwrap();
        let err = model.add_layer_to_refresh_queue(&sha).unwrap_err();
        assert!(matches!(err, ModelError::AlreadyQueued(_)));

        // rotation
        assert_eq!(Some(sha.clone()), model.next_layer_to_refresh());
        assert_eq!(Some(sha), model.next_layer_to_refresh());
    }

    #[test]
    fn repeated_success_is_a_clean_no_op() {
        let mut model = enabled_model(2);
        queue_layer(&mut model, "sha256:aaa", "l1");
        let sha = LayerSha("l1".into());
        model.dispatch_next_scan().unwrap();
        model.finish_running_scan_client(&sha, None).unwrap();

        assert!(model.record_scan_success(&sha, results()).unwrap());
        assert!(!model.record_scan_success(&sha, results()).unwrap());
        assert_eq!(ScanStatus::Complete, model.snapshot().layers["l1"].status);
    }

    #[test]
    fn delete_pod_keeps_images_and_layers() {
        let mut model = enabled_model(2);
        model.add_pod(pod("default", "p1", &[("sha256:aaa", 2)]));
        model
            .set_layers_for_image(&ImageSha("sha256:aaa".into()), vec![LayerSha("l1".into())])
            .unwrap();

        model
            .delete_pod(&PodRef {
                namespace: "default".into(),
                name: "p1".into(),
            })
            .unwrap();

        let snapshot = model.snapshot();
        assert!(snapshot.pods.is_empty());
        assert_eq!(1, snapshot.images.len());
        assert_eq!(1, snapshot.layers.len());
    }

    #[test]
    fn re_added_pod_is_replaced_wholesale() {
        let mut model = enabled_model(2);
        model.add_pod(pod("default", "p1", &[("sha256:aaa", 2)]));
        model.add_pod(pod("default", "p1", &[("sha256:bbb", 2)]));

        let snapshot = model.snapshot();
        assert_eq!(1, snapshot.pods.len());
        assert_eq!(1, snapshot.pods[0].containers.len());
        assert_eq!("sha256:bbb", snapshot.pods[0].containers[0].image.sha.0);
        // both images remain known
        assert_eq!(2, snapshot.images.len());
    }

    #[test]
    fn end_to_end_scenario() {
        let mut model = enabled_model(5);

        // pod with one container referencing sha256:aaa at priority 3
        model.add_pod(pod("default", "p1", &[("sha256:aaa", 3)]));

        let l1 = LayerSha("l1".into());
        let l2 = LayerSha("l2".into());
        model
            .set_layers_for_image(&ImageSha("sha256:aaa".into()), vec![l1.clone(), l2.clone()])
            .unwrap();

        assert_eq!(
            vec![l1.clone(), l2.clone()],
            model.snapshot().hub_check_queue
        );

        // drain the hub check queue, marking both not scanned
        while let Some(sha) = model.next_layer_from_hub_check_queue() {
            model.remove_layer_from_hub_check_queue(&sha).unwrap();
            model
                .set_layer_scan_status(&sha, ScanStatus::NotScanned)
                .unwrap();
            assert_eq!(ScanDecision::Yes, model.should_scan_layer(&sha).unwrap());
            model.add_layer_to_scan_queue(&sha).unwrap();
        }

        let entries = model.snapshot().scan_queue;
        assert_eq!(2, entries.len());
        assert!(entries.iter().all(|e| e.priority == 3));

        // equal priorities: first inserted pops first
        assert_eq!(l1, model.dispatch_next_scan().unwrap().sha);
        assert_eq!(l2, model.dispatch_next_scan().unwrap().sha);
    }
}
