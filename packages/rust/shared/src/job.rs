//! Job lifecycle: statuses, external/internal events, and the transition table.
//!
//! The table here is the single source of truth. Storage turns an event into a
//! conditional `UPDATE ... WHERE status IN (<sources>)`, so a rejected
//! transition never touches the row, and explains a rejection with
//! [`check_transition`]. Worker events also name their run, so a worker that
//! was replaced by a resume cannot finish the job.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProspectorError, Result};

/// Persisted job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    /// Column value stored in the `jobs.status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ProspectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(ProspectorError::parse(format!("unknown job status '{other}'"))),
        }
    }
}

/// Error message recorded when a job is force-stopped.
pub const FORCE_STOPPED_MESSAGE: &str = "force stopped";

/// An event that moves a job between statuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Begin work on a pending job. Carries the first unit to be visited.
    Start { first_unit: Option<String> },
    /// Every planned unit of `run` has been visited.
    Complete { run: u64 },
    /// An unhandled orchestration error aborted `run`.
    Fail { run: u64, message: String },
    /// External request to stop at the next unit boundary.
    Pause,
    /// External request to restart a paused job on a fresh worker.
    Resume { first_unit: Option<String> },
    /// External request to abandon the job.
    ForceStop,
}

impl JobEvent {
    /// Operation name used in rejection errors and logs.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Pause => "pause",
            Self::Resume { .. } => "resume",
            Self::ForceStop => "force_stop",
        }
    }

    /// Statuses this event may be applied from.
    pub fn valid_sources(&self) -> &'static [JobStatus] {
        match self {
            Self::Start { .. } => &[JobStatus::Pending],
            Self::Complete { .. } | Self::Fail { .. } | Self::Pause => &[JobStatus::Running],
            Self::Resume { .. } => &[JobStatus::Paused],
            Self::ForceStop => &[JobStatus::Running, JobStatus::Paused],
        }
    }

    /// Status the job holds after the event is applied.
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Start { .. } | Self::Resume { .. } => JobStatus::Running,
            Self::Complete { .. } => JobStatus::Completed,
            Self::Fail { .. } | Self::ForceStop => JobStatus::Failed,
            Self::Pause => JobStatus::Paused,
        }
    }

    /// The run a worker-issued event is scoped to. External requests apply to
    /// whatever run is current.
    pub fn run(&self) -> Option<u64> {
        match self {
            Self::Complete { run } | Self::Fail { run, .. } => Some(*run),
            _ => None,
        }
    }

    /// Whether applying the event starts a new run.
    pub fn begins_run(&self) -> bool {
        matches!(self, Self::Start { .. } | Self::Resume { .. })
    }
}

/// Validate `event` against `current`, returning the target status.
pub fn check_transition(job_id: &str, current: JobStatus, event: &JobEvent) -> Result<JobStatus> {
    if event.valid_sources().contains(&current) {
        Ok(event.target())
    } else {
        Err(ProspectorError::InvalidTransition {
            job_id: job_id.to_string(),
            current,
            operation: event.operation(),
        })
    }
}
