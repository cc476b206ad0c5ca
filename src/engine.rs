use futures::stream::{FuturesUnordered, StreamExt};
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::models::{ProbeOutcome, ResourceDescriptor, Transition, TransitionKind};
use crate::probe::Probe;
use crate::store::StateStore;

/// What one pass over the registry produced.
#[derive(Debug, Default)]
pub struct RunReport {
    pub went_offline: Vec<Transition>,
    pub came_online: Vec<Transition>,
    pub checked: usize,
    pub unchanged: usize,
    pub store_errors: usize,
}

/// Probes every resource once and reconciles each observation with the store.
///
/// Probes may overlap (up to `max_concurrency`), but store reads and writes
/// happen one resource at a time in registry order.
pub struct Engine<'a> {
    probe: &'a dyn Probe,
    store: &'a dyn StateStore,
    max_concurrency: usize,
}

impl<'a> Engine<'a> {
    pub fn new(probe: &'a dyn Probe, store: &'a dyn StateStore, max_concurrency: usize) -> Self {
        Self { probe, store, max_concurrency: max_concurrency.max(1) }
    }

    pub async fn run(&self, resources: &[ResourceDescriptor]) -> RunReport {
        info!(
            "Checking {} resources ({} store, {} at a time)...",
            resources.len(),
            self.store.backend(),
            self.max_concurrency
        );
        let start_time = Instant::now();

        let outcomes = self.probe_all(resources).await;

        let mut report = RunReport::default();
        for (resource, outcome) in resources.iter().zip(outcomes) {
            self.reconcile(resource, outcome, &mut report).await;
        }

        info!(
            "Run completed {} checks in {:.2}s: {} offline, {} online, {} unchanged, {} store errors",
            report.checked,
            start_time.elapsed().as_secs_f64(),
            report.went_offline.len(),
            report.came_online.len(),
            report.unchanged,
            report.store_errors
        );
        report
    }

    /// Outcomes come back in the same order as `resources`.
    async fn probe_all(&self, resources: &[ResourceDescriptor]) -> Vec<ProbeOutcome> {
        let limiter = Semaphore::new(self.max_concurrency);
        let mut tasks = FuturesUnordered::new();

        for (index, resource) in resources.iter().enumerate() {
            let limiter = &limiter;
            tasks.push(async move {
                let _permit = limiter.acquire().await.ok();
                (index, self.probe.check(resource).await)
            });
        }

        let mut results = Vec::with_capacity(resources.len());
        while let Some(result) = tasks.next().await {
            results.push(result);
        }
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, outcome)| outcome).collect()
    }

    async fn reconcile(&self, resource: &ResourceDescriptor, outcome: ProbeOutcome, report: &mut RunReport) {
        let key = resource.key();
        report.checked += 1;

        let previous = match self.store.get_previous(&key).await {
            Ok(previous) => previous,
            Err(e) => {
                warn!("No previous status for {} ({}), treating as first seen", key, e);
                report.store_errors += 1;
                None
            }
        };

        // Written before classifying so the observation is kept regardless of outcome.
        if let Err(e) = self.store.upsert(&key, outcome.status, &resource.target).await {
            error!("Failed to record {} for {}: {}", outcome.status, key, e);
            report.store_errors += 1;
        }

        let kind = TransitionKind::classify(previous.map(|r| r.status), outcome.status);
        if kind == TransitionKind::Unchanged {
            report.unchanged += 1;
            return;
        }

        let transition = Transition {
            kind,
            device_name: resource.device_name.clone(),
            resource_name: resource.resource_name.clone(),
            value: resource.target.clone(),
            latency_ms: outcome.latency_ms,
        };
        let msg = format!(
            "[CHANGE] {}/{} ({}) -> {}{}",
            resource.device_name,
            resource.resource_name,
            resource.target,
            outcome.status,
            if kind.is_first_seen() { " (first seen)" } else { "" }
        );

        match kind {
            TransitionKind::WentOffline | TransitionKind::FirstSeenOffline => {
                warn!("{}", msg);
                report.went_offline.push(transition);
            }
            _ => {
                info!("{}", msg);
                report.came_online.push(transition);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ResourceKind, Status, StatusKey, StatusRecord};
    use crate::probe::Prober;
    use crate::report::{summarize, Summary};
    use crate::store::{DegradedStore, MemoryStore, StoreError};
    use crate::test_support::{probe_config, serve_status};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Reports whatever status was last scripted for a resource name.
    #[derive(Default)]
    struct ScriptedProbe {
        states: Mutex<HashMap<String, Status>>,
    }

    impl ScriptedProbe {
        fn set(&self, name: &str, status: Status) {
            self.states.lock().unwrap().insert(name.to_string(), status);
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn check(&self, resource: &ResourceDescriptor) -> ProbeOutcome {
            match self.states.lock().unwrap().get(&resource.resource_name) {
                Some(Status::Online) => ProbeOutcome::online(Some(1.5)),
                _ => ProbeOutcome::offline(),
            }
        }
    }

    /// Memory store that refuses writes for one resource.
    struct FlakyStore {
        inner: MemoryStore,
        broken: String,
    }

    #[async_trait]
    impl StateStore for FlakyStore {
        fn backend(&self) -> &str {
            "flaky"
        }

        async fn get_previous(&self, key: &StatusKey) -> Result<Option<StatusRecord>, StoreError> {
            self.inner.get_previous(key).await
        }

        async fn upsert(&self, key: &StatusKey, status: Status, value: &str) -> Result<StatusRecord, StoreError> {
            if key.resource_name == self.broken {
                return Err(StoreError::Unavailable("quota exceeded".into()));
            }
            self.inner.upsert(key, status, value).await
        }
    }

    fn host(device: &str, name: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            device_name: device.into(),
            resource_name: name.into(),
            kind: ResourceKind::Host,
            target: format!("{}.lan", name),
            ports: vec![],
            port_scan_only: false,
        }
    }

    fn names(transitions: &[Transition]) -> Vec<(&str, TransitionKind)> {
        transitions.iter().map(|t| (t.resource_name.as_str(), t.kind)).collect()
    }

    #[tokio::test]
    async fn first_run_reports_everything_as_first_seen() {
        let probe = ScriptedProbe::default();
        probe.set("nvr", Status::Online);
        probe.set("beam", Status::Offline);
        let store = MemoryStore::new();
        let resources = vec![host("Cams", "nvr"), host("Links", "beam")];

        let report = Engine::new(&probe, &store, 1).run(&resources).await;

        assert_eq!(names(&report.came_online), vec![("nvr", TransitionKind::FirstSeenOnline)]);
        assert_eq!(names(&report.went_offline), vec![("beam", TransitionKind::FirstSeenOffline)]);
        assert_eq!(report.came_online[0].latency_ms, Some(1.5));
        assert_eq!(report.went_offline[0].latency_ms, None);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn repeated_status_is_suppressed() {
        let probe = ScriptedProbe::default();
        probe.set("nvr", Status::Online);
        let store = MemoryStore::new();
        let resources = vec![host("Cams", "nvr"), host("Links", "beam")];
        let engine = Engine::new(&probe, &store, 1);

        engine.run(&resources).await;
        let second = engine.run(&resources).await;

        assert!(second.went_offline.is_empty());
        assert!(second.came_online.is_empty());
        assert_eq!(second.unchanged, 2);
        assert_eq!(summarize(&second.went_offline, &second.came_online), Summary::NoChange);
    }

    #[tokio::test]
    async fn flips_are_classified_both_ways() {
        let probe = ScriptedProbe::default();
        probe.set("nvr", Status::Online);
        let store = MemoryStore::new();
        let resources = vec![host("Cams", "nvr"), host("Links", "beam")];
        let engine = Engine::new(&probe, &store, 1);
        engine.run(&resources).await;

        probe.set("nvr", Status::Offline);
        probe.set("beam", Status::Online);
        let report = engine.run(&resources).await;

        assert_eq!(names(&report.went_offline), vec![("nvr", TransitionKind::WentOffline)]);
        assert_eq!(names(&report.came_online), vec![("beam", TransitionKind::CameOnline)]);

        let key = resources[0].key();
        let record = store.get_previous(&key).await.unwrap().unwrap();
        assert_eq!(record.status, Status::Offline);
        assert_eq!(record.previous_status, Some(Status::Online));
        assert!(record.online_since.is_none());
        assert!(record.offline_since.is_some());
    }

    #[tokio::test]
    async fn seeded_history_drives_classification() {
        let probe = ScriptedProbe::default();
        probe.set("nvr", Status::Online);
        let resource = host("Cams", "nvr");
        let seeded = StatusRecord::apply(
            None,
            &resource.key(),
            Status::Offline,
            &resource.target,
            crate::utils::now_local(),
        );
        let store = MemoryStore::with_records([seeded]);

        let report = Engine::new(&probe, &store, 1).run(&[resource]).await;
        assert_eq!(names(&report.came_online), vec![("nvr", TransitionKind::CameOnline)]);
    }

    #[tokio::test]
    async fn output_keeps_registry_order_with_parallel_probes() {
        let probe = ScriptedProbe::default();
        let resources: Vec<_> = (0..12).map(|i| host("Rack", &format!("node{:02}", i))).collect();
        let store = MemoryStore::new();

        let report = Engine::new(&probe, &store, 4).run(&resources).await;

        let got: Vec<_> = report.went_offline.iter().map(|t| t.resource_name.clone()).collect();
        let want: Vec<_> = resources.iter().map(|r| r.resource_name.clone()).collect();
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn write_failure_does_not_stop_the_run() {
        let probe = ScriptedProbe::default();
        probe.set("nvr", Status::Online);
        probe.set("beam", Status::Online);
        let store = FlakyStore { inner: MemoryStore::new(), broken: "nvr".into() };
        let resources = vec![host("Cams", "nvr"), host("Links", "beam")];
        let engine = Engine::new(&probe, &store, 1);

        let first = engine.run(&resources).await;
        assert_eq!(first.store_errors, 1);
        assert_eq!(first.came_online.len(), 2);

        // The unwritten key stays first-seen; the other one settles.
        let second = engine.run(&resources).await;
        assert_eq!(names(&second.came_online), vec![("nvr", TransitionKind::FirstSeenOnline)]);
        assert_eq!(second.unchanged, 1);
    }

    #[tokio::test]
    async fn degraded_store_treats_every_run_as_first() {
        let probe = ScriptedProbe::default();
        probe.set("nvr", Status::Online);
        let store = DegradedStore::new("no credentials");
        let resources = vec![host("Cams", "nvr"), host("Links", "beam")];
        let engine = Engine::new(&probe, &store, 1);

        engine.run(&resources).await;
        let report = engine.run(&resources).await;

        assert_eq!(report.checked, 2);
        assert_eq!(report.store_errors, 0);
        assert!(report.came_online.iter().chain(&report.went_offline).all(|t| t.kind.is_first_seen()));
        assert_eq!(report.came_online.len() + report.went_offline.len(), 2);
    }

    #[tokio::test]
    async fn http_resource_end_to_end() {
        let (url, _server) = serve_status(200).await;
        let prober = Prober::new(&probe_config()).unwrap();
        let store = MemoryStore::new();
        let resources = vec![ResourceDescriptor {
            device_name: "Web Sites".into(),
            resource_name: "Portal".into(),
            kind: ResourceKind::Http,
            target: url.clone(),
            ports: vec![],
            port_scan_only: false,
        }];
        let engine = Engine::new(&prober, &store, 1);

        let first = engine.run(&resources).await;
        assert_eq!(names(&first.came_online), vec![("Portal", TransitionKind::FirstSeenOnline)]);
        match summarize(&first.went_offline, &first.came_online) {
            Summary::Changes(changes) => {
                assert_eq!(changes.offline.len(), 0);
                assert_eq!(changes.online.len(), 1);
                assert_eq!(changes.online[0].value, url);
                assert!(changes.online[0].latency_ms.is_some());
            }
            Summary::NoChange => panic!("first run should report the new resource"),
        }

        let second = engine.run(&resources).await;
        assert_eq!(summarize(&second.went_offline, &second.came_online), Summary::NoChange);
    }
}
