//! The per-job worker loop.
//!
//! A worker is handed a [`WorkPlan`] after the registry has already moved the
//! job to `running`. It walks the planned sub-regions in name order, calls the
//! research client once per unit and writes one record per unit through the
//! confidence-gated upsert. It stops early, without touching the job row, when
//! its cancellation token fires or the persisted status is no longer
//! `running`.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use prospector_research::{ResearchClient, ResearchRequest, ResearchResponse};
use prospector_shared::{Job, JobEvent, ProspectorError, Region, Result, ResumePolicy, SubRegion};
use prospector_storage::Storage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::merge;

/// Everything a worker needs to drive one run.
#[derive(Debug, Clone)]
pub struct WorkPlan {
    pub job: Job,
    pub region: Region,
    /// Units to visit, ordered by name.
    pub units: Vec<SubRegion>,
}

impl WorkPlan {
    /// Name of the first unit the run will visit.
    pub fn first_unit(&self) -> Option<String> {
        self.units.first().map(|u| u.name.clone())
    }
}

/// Load the region and the units a run of `job` should visit.
///
/// `RevisitAll` yields every sub-region; `RemainingOnly` skips sub-regions
/// that already hold a result for the job.
pub async fn plan(storage: &Storage, job: &Job, policy: ResumePolicy) -> Result<WorkPlan> {
    let region = storage
        .get_region(job.region_id)
        .await?
        .ok_or_else(|| ProspectorError::not_found(format!("region {}", job.region_id)))?;
    let mut units = storage.list_sub_regions(region.id).await?;

    if policy == ResumePolicy::RemainingOnly {
        let done = storage.result_sub_region_ids(&job.id).await?;
        units.retain(|u| !done.contains(&u.id));
    }

    Ok(WorkPlan {
        job: job.clone(),
        region,
        units,
    })
}

/// How a run ended, when it did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    /// Paused, stopped, or cancelled; the job row belongs to someone else now.
    Interrupted,
}

/// Decrements the in-flight counter when the call finishes or is dropped.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl<'a> InFlightGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// One job's worker.
pub struct Worker {
    pub storage: Arc<Storage>,
    pub client: Arc<dyn ResearchClient>,
    pub token: CancellationToken,
    pub in_flight: Arc<AtomicUsize>,
    pub cancel_in_flight: bool,
}

impl Worker {
    /// Drive `plan` to completion or interruption. Errors that escape the
    /// loop fail the job.
    #[instrument(skip_all, fields(job_id = %plan.job.id, region = %plan.region.code))]
    pub async fn run(self, plan: WorkPlan) -> Result<RunOutcome> {
        match self.drive(&plan).await {
            Ok(outcome) => {
                info!(?outcome, "worker finished");
                Ok(outcome)
            }
            Err(e) => {
                error!(error = %e, "run aborted");
                fail_job(&self.storage, &plan.job, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn drive(&self, plan: &WorkPlan) -> Result<RunOutcome> {
        let job = &plan.job;
        let total = plan.units.len();
        let delay = job.settings.delay_between_searches;

        info!(units = total, query = %job.query, "starting run");

        for (index, unit) in plan.units.iter().enumerate() {
            if self.token.is_cancelled() {
                debug!("cancelled before {}", unit.name);
                return Ok(RunOutcome::Interrupted);
            }
            if !self
                .storage
                .set_current_sub_region(&job.id, job.run, &unit.name)
                .await?
            {
                debug!(sub_region = %unit.name, run = job.run, "run no longer current");
                return Ok(RunOutcome::Interrupted);
            }

            let request = ResearchRequest {
                sub_region: unit.name.clone(),
                region: plan.region.name.clone(),
                query: job.query.clone(),
                max_results: job.settings.max_results_per_sub_region,
            };

            let outcome = match self.call(&request).await {
                Some(outcome) => outcome,
                None => {
                    debug!(sub_region = %unit.name, "in-flight call dropped");
                    return Ok(RunOutcome::Interrupted);
                }
            };
            if let Err(e) = &outcome {
                warn!(sub_region = %unit.name, error = %e, "research call failed");
            }

            let record = merge::record_for_outcome(&job.id, unit.id, &outcome);
            let applied = self.storage.upsert_result(&record).await?;
            debug!(
                sub_region = %unit.name,
                kind = record.kind.as_str(),
                confidence = record.confidence,
                applied,
                "unit done"
            );

            if index + 1 < total && !delay.is_zero() {
                tokio::select! {
                    _ = self.token.cancelled() => return Ok(RunOutcome::Interrupted),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        let complete = JobEvent::Complete { run: job.run };
        match self.storage.apply_transition(&job.id, &complete).await {
            Ok(_) => Ok(RunOutcome::Completed),
            Err(e) if e.is_invalid_transition() || e.is_superseded() => {
                debug!(error = %e, "not completing");
                Ok(RunOutcome::Interrupted)
            }
            Err(e) => Err(e),
        }
    }

    /// Call the client. `None` means the call was dropped by cancellation.
    async fn call(&self, request: &ResearchRequest) -> Option<Result<ResearchResponse>> {
        let _guard = InFlightGuard::new(&self.in_flight);
        if self.cancel_in_flight {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                outcome = self.client.research(request) => Some(outcome),
            }
        } else {
            Some(self.client.research(request).await)
        }
    }
}

/// Move a running job to `failed` on behalf of the run in `job`. A job that
/// already left `running`, or moved on to a later run, is left as it is.
pub async fn fail_job(storage: &Storage, job: &Job, message: &str) -> Result<()> {
    let event = JobEvent::Fail {
        run: job.run,
        message: message.to_string(),
    };
    match storage.apply_transition(&job.id, &event).await {
        Ok(_) => Ok(()),
        Err(e) if e.is_invalid_transition() || e.is_superseded() => {
            debug!(error = %e, "run no longer owns the job; failure not recorded");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
