//! Job records and state transitions.

use std::time::Duration;

use chrono::Utc;
use libsql::{Value, params};
use prospector_shared::{
    FORCE_STOPPED_MESSAGE, Job, JobEvent, JobId, JobSettings, JobStatus, ProspectorError,
    RegionId, Result, check_transition, validate_query,
};
use tracing::debug;

use crate::{Storage, now, opt_ts, parse_ts, storage_err};

const JOB_COLUMNS: &str = "id, query, region_id, status, current_sub_region, resume_hint,
    created_at, started_at, completed_at, error_message,
    delay_ms, max_results_per_sub_region, resume_policy, run";

impl Storage {
    /// Create a pending job. The region must exist, the query must not be
    /// blank and the settings must be usable.
    pub async fn insert_job(
        &self,
        region_id: RegionId,
        query: &str,
        settings: &JobSettings,
    ) -> Result<Job> {
        self.check_writable()?;
        let query = validate_query(query)?;
        settings.validate()?;
        if self.get_region(region_id).await?.is_none() {
            return Err(ProspectorError::not_found(format!("region {region_id}")));
        }

        let job = Job {
            id: JobId::new(),
            query: query.to_string(),
            region_id,
            status: JobStatus::Pending,
            run: 0,
            current_sub_region: None,
            resume_hint: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            settings: settings.clone(),
        };

        self.conn
            .execute(
                "INSERT INTO jobs (id, query, region_id, status, created_at,
                                   delay_ms, max_results_per_sub_region, resume_policy)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    job.id.to_string(),
                    job.query.as_str(),
                    region_id,
                    JobStatus::Pending.as_str(),
                    job.created_at.to_rfc3339(),
                    settings.delay_between_searches.as_millis() as i64,
                    i64::from(settings.max_results_per_sub_region),
                    settings.resume_policy.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        Ok(job)
    }

    /// Get a job by id.
    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a job by id, failing with `NotFound` if it does not exist.
    pub async fn require_job(&self, id: &JobId) -> Result<Job> {
        self.get_job(id)
            .await?
            .ok_or_else(|| ProspectorError::not_found(format!("job {id}")))
    }

    /// Most recent jobs first.
    pub async fn list_jobs(&self, limit: u32) -> Result<Vec<Job>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1"),
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_job(&row)?);
        }
        Ok(results)
    }

    /// Apply a lifecycle event as one conditional UPDATE.
    ///
    /// Returns the updated job. If the job's current status is not a valid
    /// source for `event`, nothing is written and `InvalidTransition` is
    /// returned naming the status observed. Start and resume open a new run;
    /// complete and fail only apply to the run they name, otherwise
    /// `Superseded` is returned.
    pub async fn apply_transition(&self, id: &JobId, event: &JobEvent) -> Result<Job> {
        self.check_writable()?;
        let ts = now();
        let target = event.target().as_str();

        let (mut set_clause, mut values): (String, Vec<Value>) = match event {
            JobEvent::Start { first_unit } => (
                format!(
                    "status = '{target}', started_at = ?2, current_sub_region = ?3,
                     resume_hint = NULL, error_message = NULL"
                ),
                vec![ts.into(), first_unit.clone().into()],
            ),
            JobEvent::Resume { first_unit } => (
                format!("status = '{target}', current_sub_region = ?2, resume_hint = NULL"),
                vec![first_unit.clone().into()],
            ),
            JobEvent::Complete { .. } => (
                format!(
                    "status = '{target}', completed_at = ?2,
                     current_sub_region = NULL, resume_hint = NULL"
                ),
                vec![ts.into()],
            ),
            JobEvent::Fail { message, .. } => (
                format!(
                    "status = '{target}', error_message = ?2, completed_at = ?3,
                     current_sub_region = NULL"
                ),
                vec![message.clone().into(), ts.into()],
            ),
            JobEvent::Pause => (
                format!(
                    "status = '{target}', resume_hint = current_sub_region,
                     current_sub_region = NULL"
                ),
                vec![],
            ),
            JobEvent::ForceStop => (
                format!(
                    "status = '{target}', error_message = ?2, completed_at = ?3,
                     current_sub_region = NULL"
                ),
                vec![FORCE_STOPPED_MESSAGE.into(), ts.into()],
            ),
        };
        if event.begins_run() {
            set_clause.push_str(", run = run + 1");
        }

        let sources = event
            .valid_sources()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql =
            format!("UPDATE jobs SET {set_clause} WHERE id = ?1 AND status IN ({sources})");
        if let Some(run) = event.run() {
            sql.push_str(&format!(" AND run = ?{}", values.len() + 2));
            values.push((run as i64).into());
        }

        values.insert(0, id.to_string().into());
        let affected = self.conn.execute(&sql, values).await.map_err(storage_err)?;

        let job = self.require_job(id).await?;
        if affected == 0 {
            debug!(
                job_id = %id,
                status = %job.status,
                run = job.run,
                operation = event.operation(),
                "transition rejected"
            );
            check_transition(&id.to_string(), job.status, event)?;
            return Err(match event.run() {
                Some(run) => ProspectorError::Superseded {
                    job_id: id.to_string(),
                    run,
                },
                None => ProspectorError::InvalidTransition {
                    job_id: id.to_string(),
                    current: job.status,
                    operation: event.operation(),
                },
            });
        }
        Ok(job)
    }

    /// Record the unit being researched by `run`. Only applies while that run
    /// is the job's current one and the job is running; returns `false`
    /// otherwise.
    pub async fn set_current_sub_region(&self, id: &JobId, run: u64, name: &str) -> Result<bool> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE jobs SET current_sub_region = ?1
                 WHERE id = ?2 AND run = ?3 AND status = 'running'",
                params![name, id.to_string(), run as i64],
            )
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }
}

fn row_to_job(row: &libsql::Row) -> Result<Job> {
    let id: String = row.get(0).map_err(storage_err)?;
    let status: String = row.get(3).map_err(storage_err)?;
    let created_at: String = row.get(6).map_err(storage_err)?;
    let delay_ms: i64 = row.get(10).map_err(storage_err)?;
    let max_results: i64 = row.get(11).map_err(storage_err)?;
    let policy: String = row.get(12).map_err(storage_err)?;
    let run: i64 = row.get(13).map_err(storage_err)?;

    Ok(Job {
        id: id
            .parse()
            .map_err(|e| ProspectorError::Storage(format!("invalid job id '{id}': {e}")))?,
        query: row.get::<String>(1).map_err(storage_err)?,
        region_id: row.get::<i64>(2).map_err(storage_err)?,
        status: status.parse()?,
        run: run.max(0) as u64,
        current_sub_region: row.get::<String>(4).ok(),
        resume_hint: row.get::<String>(5).ok(),
        created_at: parse_ts(&created_at)?,
        started_at: opt_ts(row.get::<String>(7).ok())?,
        completed_at: opt_ts(row.get::<String>(8).ok())?,
        error_message: row.get::<String>(9).ok(),
        settings: JobSettings {
            delay_between_searches: Duration::from_millis(delay_ms.max(0) as u64),
            max_results_per_sub_region: max_results.clamp(1, i64::from(u32::MAX)) as u32,
            resume_policy: policy.parse()?,
        },
    })
}
