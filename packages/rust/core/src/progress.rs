//! Job progress snapshots.

use chrono::{DateTime, Utc};
use prospector_shared::{JobId, JobStatus, Result};
use prospector_storage::Storage;
use serde::Serialize;

/// Point-in-time view of a job, as returned by `JobRegistry::status`.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub job_id: JobId,
    pub query: String,
    pub region: String,
    pub status: JobStatus,
    pub current_sub_region: Option<String>,
    pub resume_hint: Option<String>,
    pub total_units: u64,
    /// Distinct sub-regions holding a result for this job.
    pub processed_units: u64,
    pub percentage: f64,
    pub organizations_found: u64,
    /// Research calls dispatched by this process and not yet returned.
    pub in_flight_calls: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_secs: Option<i64>,
    pub error_message: Option<String>,
}

/// Build a snapshot of `job_id` from storage.
///
/// `in_flight_calls` is supplied by the caller: only the registry that owns the
/// worker knows it.
pub async fn snapshot(
    storage: &Storage,
    job_id: &JobId,
    in_flight_calls: usize,
) -> Result<JobProgress> {
    let job = storage.require_job(job_id).await?;
    let region = storage
        .get_region(job.region_id)
        .await?
        .map(|r| r.name)
        .unwrap_or_default();

    let total_units = storage.count_sub_regions(job.region_id).await?;
    let processed_units = storage.count_results(job_id).await?;
    let organizations_found = storage.count_organizations(job_id).await?;

    Ok(JobProgress {
        job_id: job.id,
        query: job.query,
        region,
        status: job.status,
        current_sub_region: job.current_sub_region,
        resume_hint: job.resume_hint,
        total_units,
        processed_units,
        percentage: percentage(processed_units, total_units),
        organizations_found,
        in_flight_calls,
        created_at: job.created_at,
        started_at: job.started_at,
        completed_at: job.completed_at,
        elapsed_secs: elapsed_secs(job.started_at, job.completed_at, Utc::now()),
        error_message: job.error_message,
    })
}

/// `processed / total` as a percentage rounded to one decimal; 0 for an
/// empty region.
pub fn percentage(processed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (1000.0 * processed as f64 / total as f64).round() / 10.0
}

/// Seconds from start to completion, or to `now` while unfinished.
pub fn elapsed_secs(
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Option<i64> {
    let start = started_at?;
    let end = completed_at.unwrap_or(now);
    Some((end - start).num_seconds().max(0))
}
