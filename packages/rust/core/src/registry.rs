//! The job registry: the API surface for creating and controlling jobs.
//!
//! Every lifecycle request is validated and persisted synchronously through
//! the storage layer's conditional transitions before any worker is touched.
//! The registry owns at most `max_workers` live worker tasks, one
//! [`CancellationToken`] per job, and a per-job counter of in-flight research
//! calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use prospector_research::ResearchClient;
use prospector_shared::{
    Job, JobEvent, JobId, JobSettings, OrchestratorConfig, ProspectorError, RegionId, Result,
    ResultRow, ResumePolicy,
};
use prospector_storage::Storage;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::orchestrator::{self, WorkPlan, Worker};
use crate::progress::{self, JobProgress};

/// Registry tuning, usually taken from the `[orchestrator]` config section.
#[derive(Debug, Clone, Copy)]
pub struct RegistryOptions {
    pub max_workers: usize,
    pub cancel_in_flight: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self::from(&OrchestratorConfig::default())
    }
}

impl From<&OrchestratorConfig> for RegistryOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            max_workers: config.max_workers,
            cancel_in_flight: config.cancel_in_flight,
        }
    }
}

struct WorkerSlot {
    generation: u64,
    token: CancellationToken,
    /// Taken by `wait`; `None` while someone is awaiting the task.
    handle: Option<JoinHandle<()>>,
}

impl WorkerSlot {
    fn is_finished(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_finished())
    }
}

#[derive(Default)]
struct Workers {
    slots: HashMap<JobId, WorkerSlot>,
    in_flight: HashMap<JobId, Arc<AtomicUsize>>,
    next_generation: u64,
}

impl Workers {
    /// Drop finished workers, then counters no worker holds anymore.
    fn cleanup_finished(&mut self) {
        self.slots.retain(|_, slot| !slot.is_finished());
        let slots = &self.slots;
        self.in_flight
            .retain(|id, count| slots.contains_key(id) || count.load(Ordering::SeqCst) > 0);
    }

    /// Fail with `Capacity` unless a new worker for `job_id` fits.
    fn ensure_capacity(&mut self, job_id: Option<&JobId>, max: usize) -> Result<()> {
        self.cleanup_finished();
        let live = self
            .slots
            .keys()
            .filter(|id| Some(*id) != job_id)
            .count();
        if live >= max {
            return Err(ProspectorError::Capacity { max });
        }
        Ok(())
    }

    fn counter(&mut self, job_id: &JobId) -> Arc<AtomicUsize> {
        self.in_flight
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
            .clone()
    }
}

/// Creates, launches and controls jobs.
pub struct JobRegistry {
    storage: Arc<Storage>,
    client: Arc<dyn ResearchClient>,
    options: RegistryOptions,
    workers: Mutex<Workers>,
}

impl JobRegistry {
    pub fn new(
        storage: Arc<Storage>,
        client: Arc<dyn ResearchClient>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            storage,
            client,
            options,
            workers: Mutex::new(Workers::default()),
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Create a pending job without starting it.
    #[instrument(skip(self, settings))]
    pub async fn create(
        &self,
        region_id: RegionId,
        query: &str,
        settings: &JobSettings,
    ) -> Result<JobId> {
        let job = self.storage.insert_job(region_id, query, settings).await?;
        info!(job_id = %job.id, "job created");
        Ok(job.id)
    }

    /// Create a job and launch it. The worker slot is reserved before the
    /// job row is written, so a full registry creates nothing.
    pub async fn start(
        &self,
        region_id: RegionId,
        query: &str,
        settings: &JobSettings,
    ) -> Result<JobId> {
        let mut workers = self.workers.lock().await;
        workers.ensure_capacity(None, self.options.max_workers)?;
        let job_id = self.create(region_id, query, settings).await?;
        self.launch_locked(&mut workers, &job_id).await?;
        Ok(job_id)
    }

    /// Move a pending job to `running` and spawn its worker.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn launch(&self, job_id: &JobId) -> Result<Job> {
        let mut workers = self.workers.lock().await;
        workers.ensure_capacity(Some(job_id), self.options.max_workers)?;
        self.launch_locked(&mut workers, job_id).await
    }

    async fn launch_locked(&self, workers: &mut Workers, job_id: &JobId) -> Result<Job> {
        let job = self.storage.require_job(job_id).await?;
        let plan = orchestrator::plan(&self.storage, &job, ResumePolicy::RevisitAll).await?;
        let job = self
            .storage
            .apply_transition(job_id, &JobEvent::Start { first_unit: plan.first_unit() })
            .await?;

        info!(units = plan.units.len(), run = job.run, "job started");
        self.spawn_worker(workers, WorkPlan { job: job.clone(), ..plan });
        Ok(job)
    }

    /// Ask a running job to stop at the next unit boundary.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn pause(&self, job_id: &JobId) -> Result<Job> {
        let job = self.storage.apply_transition(job_id, &JobEvent::Pause).await?;
        self.cancel_worker(job_id).await;
        info!(resume_hint = ?job.resume_hint, "job paused");
        Ok(job)
    }

    /// Restart a paused job on a fresh worker.
    ///
    /// The configured resume policy decides whether the run revisits every
    /// sub-region or only those without a result.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn resume(&self, job_id: &JobId) -> Result<Job> {
        let mut workers = self.workers.lock().await;
        workers.ensure_capacity(Some(job_id), self.options.max_workers)?;

        let job = self.storage.require_job(job_id).await?;
        let plan = orchestrator::plan(&self.storage, &job, job.settings.resume_policy).await?;
        let job = self
            .storage
            .apply_transition(job_id, &JobEvent::Resume { first_unit: plan.first_unit() })
            .await?;

        if let Some(old) = workers.slots.remove(job_id) {
            old.token.cancel();
        }
        info!(
            units = plan.units.len(),
            policy = job.settings.resume_policy.as_str(),
            "job resumed"
        );
        self.spawn_worker(&mut workers, WorkPlan { job: job.clone(), ..plan });
        Ok(job)
    }

    /// Abandon a running or paused job.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn force_stop(&self, job_id: &JobId) -> Result<Job> {
        let job = self
            .storage
            .apply_transition(job_id, &JobEvent::ForceStop)
            .await?;
        self.cancel_worker(job_id).await;
        warn!("job force stopped");
        Ok(job)
    }

    /// Progress snapshot for a job.
    pub async fn status(&self, job_id: &JobId) -> Result<JobProgress> {
        let in_flight_calls = self
            .workers
            .lock()
            .await
            .in_flight
            .get(job_id)
            .map_or(0, |c| c.load(Ordering::SeqCst));
        progress::snapshot(&self.storage, job_id, in_flight_calls).await
    }

    /// One row per sub-region holding a result, ordered by sub-region name.
    pub async fn export(&self, job_id: &JobId) -> Result<Vec<ResultRow>> {
        self.storage.require_job(job_id).await?;
        self.storage.list_results(job_id).await
    }

    /// Most recent jobs first.
    pub async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        self.storage.list_jobs(limit).await
    }

    /// Await the current worker of `job_id`, if any.
    pub async fn wait(&self, job_id: &JobId) -> Result<()> {
        let (generation, handle) = {
            let mut workers = self.workers.lock().await;
            match workers.slots.get_mut(job_id) {
                Some(slot) => (slot.generation, slot.handle.take()),
                None => return Ok(()),
            }
        };
        let Some(handle) = handle else {
            return Ok(());
        };

        let joined = handle.await;

        let mut workers = self.workers.lock().await;
        if workers
            .slots
            .get(job_id)
            .is_some_and(|slot| slot.generation == generation)
        {
            workers.slots.remove(job_id);
        }
        joined.map_err(|e| ProspectorError::Worker(format!("job {job_id}: {e}")))
    }

    /// Number of jobs with a live worker in this process.
    pub async fn active_workers(&self) -> usize {
        let mut workers = self.workers.lock().await;
        workers.cleanup_finished();
        workers.slots.len()
    }

    async fn cancel_worker(&self, job_id: &JobId) {
        if let Some(slot) = self.workers.lock().await.slots.get(job_id) {
            debug!("cancelling worker");
            slot.token.cancel();
        }
    }

    fn spawn_worker(&self, workers: &mut Workers, plan: WorkPlan) {
        let job_id = plan.job.id.clone();
        let token = CancellationToken::new();
        let worker = Worker {
            storage: self.storage.clone(),
            client: self.client.clone(),
            token: token.clone(),
            in_flight: workers.counter(&job_id),
            cancel_in_flight: self.options.cancel_in_flight,
        };

        let handle = tokio::spawn(async move {
            // Failures are already logged and recorded on the job row.
            let _ = worker.run(plan).await;
        });

        workers.next_generation += 1;
        workers.slots.insert(
            job_id,
            WorkerSlot {
                generation: workers.next_generation,
                token,
                handle: Some(handle),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{candidate, delaware, gated, scripted, structured};
    use prospector_shared::{FORCE_STOPPED_MESSAGE, JobStatus, ResultKind};

    fn fast() -> JobSettings {
        JobSettings {
            delay_between_searches: Duration::ZERO,
            ..JobSettings::default()
        }
    }

    async fn registry_with(
        client: Arc<dyn ResearchClient>,
        options: RegistryOptions,
    ) -> (JobRegistry, RegionId) {
        let (storage, de) = delaware().await;
        (JobRegistry::new(Arc::new(storage), client, options), de)
    }

    /// Poll `status` until `check` holds.
    async fn wait_for(
        registry: &JobRegistry,
        job_id: &JobId,
        check: impl Fn(&JobProgress) -> bool,
    ) -> JobProgress {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let progress = registry.status(job_id).await.unwrap();
                if check(&progress) {
                    return progress;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time")
    }

    async fn kent_confidence(registry: &JobRegistry, job_id: &JobId) -> Option<f64> {
        registry
            .export(job_id)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.sub_region == "Kent")
            .map(|r| r.confidence)
    }

    #[tokio::test]
    async fn scenario_no_candidates_anywhere() {
        let client = Arc::new(scripted(|_| Ok(structured(vec![]))));
        let (registry, de) = registry_with(client, RegistryOptions::default()).await;

        let job_id = registry.start(de, "overdose response", &fast()).await.unwrap();
        registry.wait(&job_id).await.unwrap();

        let status = registry.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.total_units, 3);
        assert_eq!(status.processed_units, 3);
        assert_eq!(status.percentage, 100.0);
        assert_eq!(status.organizations_found, 0);
        assert_eq!(status.current_sub_region, None);
        assert_eq!(status.in_flight_calls, 0);
        assert!(status.completed_at.is_some());

        let rows = registry.export(&job_id).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.sub_region.as_str()).collect();
        assert_eq!(names, ["Kent", "New Castle", "Sussex"]);
        assert!(rows.iter().all(|r| r.kind == ResultKind::NoCandidates && r.confidence == 0.0));
    }

    #[tokio::test]
    async fn scenario_best_candidate_wins() {
        let client = Arc::new(scripted(|req| {
            if req.sub_region == "Kent" {
                Ok(structured(vec![
                    candidate("Kent Outreach", 0.6),
                    candidate("Kent County ORT", 0.9),
                ]))
            } else {
                Ok(structured(vec![]))
            }
        }));
        let (registry, de) = registry_with(client, RegistryOptions::default()).await;

        let job_id = registry.start(de, "overdose response", &fast()).await.unwrap();
        registry.wait(&job_id).await.unwrap();

        let rows = registry.export(&job_id).await.unwrap();
        let kent = rows.iter().find(|r| r.sub_region == "Kent").unwrap();
        assert_eq!(kent.kind, ResultKind::Found);
        assert_eq!(kent.confidence, 0.9);
        assert_eq!(kent.organization_name.as_deref(), Some("Kent County ORT"));
        assert_eq!(kent.description.as_deref(), Some("Kent County ORT services"));

        let status = registry.status(&job_id).await.unwrap();
        assert_eq!(status.organizations_found, 1);
    }

    #[tokio::test]
    async fn scenario_later_runs_only_upgrade() {
        let kent_calls = Arc::new(AtomicUsize::new(0));
        let counter = kent_calls.clone();
        let (client, gate) = gated(move |req| {
            if req.sub_region != "Kent" {
                return Ok(structured(vec![]));
            }
            let confidence = [0.9, 0.95, 0.5][counter.fetch_add(1, Ordering::SeqCst).min(2)];
            Ok(structured(vec![candidate("Kent County ORT", confidence)]))
        });
        let (registry, de) = registry_with(Arc::new(client), RegistryOptions::default()).await;

        // Run 1: Kent at 0.9, then pause while New Castle is in flight.
        let job_id = registry.start(de, "q", &fast()).await.unwrap();
        gate.add_permits(1);
        wait_for(&registry, &job_id, |p| p.processed_units == 1 && p.in_flight_calls == 1).await;
        registry.pause(&job_id).await.unwrap();
        registry.wait(&job_id).await.unwrap();
        assert_eq!(kent_confidence(&registry, &job_id).await, Some(0.9));

        // Run 2 revisits Kent and upgrades it.
        registry.resume(&job_id).await.unwrap();
        gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), async {
            while kent_confidence(&registry, &job_id).await != Some(0.95) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Kent upgraded");
        wait_for(&registry, &job_id, |p| p.in_flight_calls == 1).await;
        registry.pause(&job_id).await.unwrap();
        registry.wait(&job_id).await.unwrap();

        // Run 3 offers 0.5 and must not downgrade.
        registry.resume(&job_id).await.unwrap();
        gate.add_permits(10);
        registry.wait(&job_id).await.unwrap();

        assert_eq!(kent_calls.load(Ordering::SeqCst), 3);
        assert_eq!(kent_confidence(&registry, &job_id).await, Some(0.95));
        let status = registry.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.processed_units, 3);
    }

    #[tokio::test]
    async fn scenario_force_stop_with_late_write() {
        let (client, gate) = gated(|_| Ok(structured(vec![candidate("Late Org", 0.7)])));
        let options = RegistryOptions {
            cancel_in_flight: false,
            ..RegistryOptions::default()
        };
        let (registry, de) = registry_with(Arc::new(client), options).await;

        let job_id = registry.start(de, "q", &fast()).await.unwrap();
        wait_for(&registry, &job_id, |p| p.in_flight_calls == 1).await;

        let stopped = registry.force_stop(&job_id).await.unwrap();
        assert_eq!(stopped.status, JobStatus::Failed);
        assert_eq!(stopped.error_message.as_deref(), Some(FORCE_STOPPED_MESSAGE));
        assert_eq!(stopped.current_sub_region, None);

        // The call in flight finishes after the stop; its write is accepted.
        gate.add_permits(1);
        registry.wait(&job_id).await.unwrap();

        let status = registry.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.current_sub_region, None);
        assert_eq!(status.error_message.as_deref(), Some(FORCE_STOPPED_MESSAGE));
        assert_eq!(status.processed_units, 1);
        assert_eq!(status.in_flight_calls, 0);
    }

    #[tokio::test]
    async fn force_stop_drops_in_flight_call() {
        let (client, _gate) = gated(|_| Ok(structured(vec![candidate("Never", 0.7)])));
        let client = Arc::new(client);
        let (registry, de) = registry_with(client.clone(), RegistryOptions::default()).await;

        let job_id = registry.start(de, "q", &fast()).await.unwrap();
        wait_for(&registry, &job_id, |p| p.in_flight_calls == 1).await;
        registry.force_stop(&job_id).await.unwrap();
        registry.wait(&job_id).await.unwrap();

        let status = registry.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.processed_units, 0);
        assert_eq!(status.in_flight_calls, 0);
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn pause_records_resume_hint() {
        let (client, gate) = gated(|_| Ok(structured(vec![])));
        let (registry, de) = registry_with(Arc::new(client), RegistryOptions::default()).await;

        let job_id = registry.start(de, "q", &fast()).await.unwrap();
        let running = registry.status(&job_id).await.unwrap();
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.current_sub_region.as_deref(), Some("Kent"));

        gate.add_permits(1);
        wait_for(&registry, &job_id, |p| {
            p.current_sub_region.as_deref() == Some("New Castle") && p.in_flight_calls == 1
        })
        .await;

        let paused = registry.pause(&job_id).await.unwrap();
        assert_eq!(paused.status, JobStatus::Paused);
        assert_eq!(paused.current_sub_region, None);
        assert_eq!(paused.resume_hint.as_deref(), Some("New Castle"));
        registry.wait(&job_id).await.unwrap();

        let resumed = registry.resume(&job_id).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Running);
        assert_eq!(resumed.current_sub_region.as_deref(), Some("Kent"));
        assert_eq!(resumed.resume_hint, None);

        gate.add_permits(10);
        registry.wait(&job_id).await.unwrap();
        let done = registry.status(&job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.percentage, 100.0);
    }

    #[tokio::test]
    async fn remaining_only_skips_finished_units() {
        let (client, gate) = gated(|_| Ok(structured(vec![])));
        let client = Arc::new(client);
        let (registry, de) = registry_with(client.clone(), RegistryOptions::default()).await;

        let settings = JobSettings {
            resume_policy: ResumePolicy::RemainingOnly,
            ..fast()
        };
        let job_id = registry.start(de, "q", &settings).await.unwrap();
        gate.add_permits(1);
        wait_for(&registry, &job_id, |p| p.processed_units == 1 && p.in_flight_calls == 1).await;
        registry.pause(&job_id).await.unwrap();
        registry.wait(&job_id).await.unwrap();

        let resumed = registry.resume(&job_id).await.unwrap();
        assert_eq!(resumed.current_sub_region.as_deref(), Some("New Castle"));
        gate.add_permits(10);
        registry.wait(&job_id).await.unwrap();

        assert_eq!(client.calls(), ["Kent", "New Castle", "Sussex"]);
        assert_eq!(
            registry.status(&job_id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn client_failures_do_not_stop_the_job() {
        let client = Arc::new(scripted(|req| {
            if req.sub_region == "New Castle" {
                Err(ProspectorError::Network("connection reset".into()))
            } else {
                Ok(structured(vec![candidate(&format!("{} Team", req.sub_region), 0.8)]))
            }
        }));
        let (registry, de) = registry_with(client, RegistryOptions::default()).await;

        let job_id = registry.start(de, "q", &fast()).await.unwrap();
        registry.wait(&job_id).await.unwrap();

        let status = registry.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.processed_units, 3);
        assert_eq!(status.organizations_found, 2);

        let rows = registry.export(&job_id).await.unwrap();
        let failed = rows.iter().find(|r| r.sub_region == "New Castle").unwrap();
        assert_eq!(failed.kind, ResultKind::ClientFailed);
        assert_eq!(failed.confidence, 0.0);
        assert_eq!(
            failed.failure_reason.as_deref(),
            Some("network error: connection reset")
        );
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected_without_mutation() {
        let client = Arc::new(scripted(|_| Ok(structured(vec![]))));
        let (registry, de) = registry_with(client, RegistryOptions::default()).await;

        let job_id = registry.create(de, "q", &fast()).await.unwrap();
        let before = registry.storage().require_job(&job_id).await.unwrap();

        for err in [
            registry.pause(&job_id).await.unwrap_err(),
            registry.resume(&job_id).await.unwrap_err(),
            registry.force_stop(&job_id).await.unwrap_err(),
        ] {
            match err {
                ProspectorError::InvalidTransition { current, .. } => {
                    assert_eq!(current, JobStatus::Pending)
                }
                other => panic!("expected InvalidTransition, got {other}"),
            }
        }
        let after = registry.storage().require_job(&job_id).await.unwrap();
        assert_eq!(before.status, after.status);
        assert_eq!(before.started_at, after.started_at);
        assert_eq!(before.current_sub_region, after.current_sub_region);

        registry.launch(&job_id).await.unwrap();
        registry.wait(&job_id).await.unwrap();
        let completed = registry.storage().require_job(&job_id).await.unwrap();
        assert_eq!(completed.status, JobStatus::Completed);

        let err = registry.launch(&job_id).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("cannot start job {job_id}: job is completed")
        );
        assert!(registry.pause(&job_id).await.unwrap_err().is_invalid_transition());
        assert!(registry.force_stop(&job_id).await.unwrap_err().is_invalid_transition());

        let unchanged = registry.storage().require_job(&job_id).await.unwrap();
        assert_eq!(unchanged.completed_at, completed.completed_at);
        assert_eq!(unchanged.error_message, None);
    }

    #[tokio::test]
    async fn starting_twice_is_rejected() {
        let (client, gate) = gated(|_| Ok(structured(vec![])));
        let (registry, de) = registry_with(Arc::new(client), RegistryOptions::default()).await;

        let job_id = registry.start(de, "q", &fast()).await.unwrap();
        let err = registry.launch(&job_id).await.unwrap_err();
        assert!(err.is_invalid_transition());
        assert!(err.to_string().contains("job is running"));

        gate.add_permits(10);
        registry.wait(&job_id).await.unwrap();
    }

    #[tokio::test]
    async fn capacity_is_checked_before_mutation() {
        let (client, gate) = gated(|_| Ok(structured(vec![])));
        let options = RegistryOptions {
            max_workers: 1,
            ..RegistryOptions::default()
        };
        let (registry, de) = registry_with(Arc::new(client), options).await;

        let first = registry.start(de, "first", &fast()).await.unwrap();
        let second = registry.create(de, "second", &fast()).await.unwrap();

        let err = registry.launch(&second).await.unwrap_err();
        assert!(matches!(err, ProspectorError::Capacity { max: 1 }));
        assert_eq!(
            registry.storage().require_job(&second).await.unwrap().status,
            JobStatus::Pending
        );

        let jobs_before = registry.list_jobs(10).await.unwrap().len();
        assert!(matches!(
            registry.start(de, "third", &fast()).await,
            Err(ProspectorError::Capacity { .. })
        ));
        assert_eq!(registry.list_jobs(10).await.unwrap().len(), jobs_before);

        gate.add_permits(10);
        registry.wait(&first).await.unwrap();
        assert_eq!(registry.active_workers().await, 0);
        registry.launch(&second).await.unwrap();
        registry.wait(&second).await.unwrap();
    }

    #[tokio::test]
    async fn replaced_worker_cannot_complete_resumed_run() {
        let (client, gate) = gated(|_| Ok(structured(vec![])));
        let client = Arc::new(client);
        let options = RegistryOptions {
            cancel_in_flight: false,
            ..RegistryOptions::default()
        };
        let (registry, de) = registry_with(client.clone(), options).await;

        // First run reaches its last unit and blocks there.
        let job_id = registry.start(de, "q", &fast()).await.unwrap();
        gate.add_permits(2);
        wait_for(&registry, &job_id, |p| {
            p.current_sub_region.as_deref() == Some("Sussex")
                && p.processed_units == 2
                && p.in_flight_calls == 1
        })
        .await;

        registry.pause(&job_id).await.unwrap();
        let resumed = registry.resume(&job_id).await.unwrap();
        assert_eq!(resumed.run, 2);
        wait_for(&registry, &job_id, |p| p.in_flight_calls == 2).await;

        // Let only the first run's Sussex call through.
        gate.add_permits(1);
        wait_for(&registry, &job_id, |p| p.processed_units == 3 && p.in_flight_calls == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mid = registry.status(&job_id).await.unwrap();
        assert_eq!(mid.status, JobStatus::Running);
        assert_eq!(mid.current_sub_region.as_deref(), Some("Kent"));
        assert_eq!(mid.completed_at, None);

        gate.add_permits(10);
        registry.wait(&job_id).await.unwrap();
        assert_eq!(
            client.calls(),
            ["Kent", "New Castle", "Sussex", "Kent", "New Castle", "Sussex"]
        );
        let done = registry.status(&job_id).await.unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.in_flight_calls, 0);
    }

    #[tokio::test]
    async fn concurrent_starts_leave_no_orphan_job() {
        let (client, gate) = gated(|_| Ok(structured(vec![])));
        let options = RegistryOptions {
            max_workers: 1,
            ..RegistryOptions::default()
        };
        let (registry, de) = registry_with(Arc::new(client), options).await;

        let settings = fast();
        let (a, b) = tokio::join!(
            registry.start(de, "first", &settings),
            registry.start(de, "second", &settings)
        );
        let (started, refused) = match (a, b) {
            (Ok(id), Err(e)) | (Err(e), Ok(id)) => (id, e),
            other => panic!("expected one start to win, got {other:?}"),
        };
        assert!(matches!(refused, ProspectorError::Capacity { max: 1 }));

        let jobs = registry.list_jobs(10).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, started);

        gate.add_permits(10);
        registry.wait(&started).await.unwrap();
    }

    #[tokio::test]
    async fn finished_jobs_release_their_counters() {
        let client = Arc::new(scripted(|_| Ok(structured(vec![]))));
        let (registry, de) = registry_with(client, RegistryOptions::default()).await;

        for query in ["first", "second", "third"] {
            let job_id = registry.start(de, query, &fast()).await.unwrap();
            registry.wait(&job_id).await.unwrap();
        }

        assert_eq!(registry.active_workers().await, 0);
        assert!(registry.workers.lock().await.in_flight.is_empty());
    }

    #[tokio::test]
    async fn empty_region_completes_at_zero_percent() {
        let client = Arc::new(scripted(|_| Ok(structured(vec![]))));
        let (registry, _) = registry_with(client, RegistryOptions::default()).await;
        let empty = registry
            .storage()
            .insert_region("Nowhere", "NW")
            .await
            .unwrap();

        let job_id = registry.start(empty, "q", &fast()).await.unwrap();
        registry.wait(&job_id).await.unwrap();

        let status = registry.status(&job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.total_units, 0);
        assert_eq!(status.percentage, 0.0);
        assert!(registry.export(&job_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_validates_input() {
        let client = Arc::new(scripted(|_| Ok(structured(vec![]))));
        let (registry, de) = registry_with(client, RegistryOptions::default()).await;

        assert!(matches!(
            registry.create(de, "   ", &fast()).await,
            Err(ProspectorError::Validation { .. })
        ));
        assert!(matches!(
            registry.create(de + 99, "q", &fast()).await,
            Err(ProspectorError::NotFound { .. })
        ));
        let zero = JobSettings {
            max_results_per_sub_region: 0,
            ..fast()
        };
        assert!(registry.create(de, "q", &zero).await.is_err());
        assert!(matches!(
            registry.status(&JobId::new()).await,
            Err(ProspectorError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn delay_is_observed_between_units() {
        let client = Arc::new(scripted(|_| Ok(structured(vec![]))));
        let (registry, de) = registry_with(client, RegistryOptions::default()).await;
        let settings = JobSettings {
            delay_between_searches: Duration::from_millis(40),
            ..JobSettings::default()
        };

        let started = tokio::time::Instant::now();
        let job_id = registry.start(de, "q", &settings).await.unwrap();
        registry.wait(&job_id).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(80));
    }
}
