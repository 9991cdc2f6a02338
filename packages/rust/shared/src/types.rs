//! Core domain types: the region catalog, jobs, candidates and stored results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProspectorError, Result};
use crate::job::JobStatus;

/// Row id of a region in the catalog.
pub type RegionId = i64;

/// Row id of a sub-region in the catalog.
pub type SubRegionId = i64;

// ---------------------------------------------------------------------------
// JobId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for job identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Generate a new time-sortable job identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// A top-level geographic unit (a US state in the bundled catalog).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    /// Short unique code, e.g. `DE`.
    pub code: String,
}

/// A unit of work inside a region (a county in the bundled catalog).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubRegion {
    pub id: SubRegionId,
    pub region_id: RegionId,
    pub name: String,
    /// Stable external identifier such as a FIPS code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<i64>,
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// What a resumed (or re-launched) job does with units that already hold a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// Visit every unit again; the confidence gate prevents regressions.
    #[default]
    RevisitAll,
    /// Skip units that already have a result for this job.
    RemainingOnly,
}

impl ResumePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RevisitAll => "revisit_all",
            Self::RemainingOnly => "remaining_only",
        }
    }
}

impl std::str::FromStr for ResumePolicy {
    type Err = ProspectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.replace('-', "_").as_str() {
            "revisit_all" => Ok(Self::RevisitAll),
            "remaining_only" => Ok(Self::RemainingOnly),
            other => Err(ProspectorError::validation(format!(
                "unknown resume policy '{other}': expected revisit_all or remaining_only"
            ))),
        }
    }
}

/// Per-job tunables, fixed when the job is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSettings {
    /// Courtesy pause between research calls.
    #[serde(with = "duration_ms")]
    pub delay_between_searches: Duration,
    /// Upper bound on organizations requested from (and kept per) research call.
    pub max_results_per_sub_region: u32,
    pub resume_policy: ResumePolicy,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            delay_between_searches: Duration::from_secs(5),
            max_results_per_sub_region: 10,
            resume_policy: ResumePolicy::RevisitAll,
        }
    }
}

impl JobSettings {
    /// Reject settings no job can run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_results_per_sub_region == 0 {
            return Err(ProspectorError::validation(
                "max_results_per_sub_region must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Trim a job query, rejecting one that is blank.
pub fn validate_query(query: &str) -> Result<&str> {
    let query = query.trim();
    if query.is_empty() {
        return Err(ProspectorError::validation("query must not be empty"));
    }
    Ok(query)
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Persisted record of one orchestrated run over a region.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub query: String,
    pub region_id: RegionId,
    pub status: JobStatus,
    /// Bumped by every start and resume. Only the worker holding the current
    /// run may move the cursor or finish the job.
    pub run: u64,
    /// Unit currently being researched; set only while running.
    pub current_sub_region: Option<String>,
    /// Unit that was in progress when the job was paused.
    pub resume_hint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub settings: JobSettings,
}

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// Contact details for the organization's key person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonnelContact {
    pub name: Option<String>,
    pub title: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Organization-level contact details.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneralContact {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
}

impl GeneralContact {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none() && self.email.is_none() && self.website.is_none()
    }
}

/// One unverified organization returned by a single research call.
///
/// Never persisted as-is; the orchestrator picks at most one per unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub name: String,
    pub description: Option<String>,
    pub personnel: PersonnelContact,
    pub contact: GeneralContact,
    pub address: Option<String>,
    pub notes: Option<String>,
    /// Self-reported confidence in `[0, 1]`.
    pub confidence: f64,
    pub source_urls: Vec<String>,
    /// Free-form supporting text from the engine.
    pub raw_evidence: Option<String>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// What a stored result represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    /// A chosen candidate.
    Found,
    /// The engine answered but named no organization.
    NoCandidates,
    /// The research call failed.
    ClientFailed,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Found => "found",
            Self::NoCandidates => "no_candidates",
            Self::ClientFailed => "client_failed",
        }
    }
}

impl std::str::FromStr for ResultKind {
    type Err = ProspectorError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "found" => Ok(Self::Found),
            "no_candidates" => Ok(Self::NoCandidates),
            "client_failed" => Ok(Self::ClientFailed),
            other => Err(ProspectorError::parse(format!("unknown result kind '{other}'"))),
        }
    }
}

/// A write to the result store, keyed by `(job_id, sub_region_id)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub job_id: JobId,
    pub sub_region_id: SubRegionId,
    pub kind: ResultKind,
    pub organization_name: Option<String>,
    pub description: Option<String>,
    pub personnel: PersonnelContact,
    pub contact: GeneralContact,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub confidence: f64,
    pub source_urls: Vec<String>,
    pub raw_response: Option<String>,
    pub failure_reason: Option<String>,
}

/// A stored result joined with its sub-region and region names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRow {
    pub job_id: String,
    pub sub_region_id: SubRegionId,
    pub sub_region: String,
    pub region: String,
    pub kind: ResultKind,
    pub organization_name: Option<String>,
    pub description: Option<String>,
    pub personnel: PersonnelContact,
    pub contact: GeneralContact,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub confidence: f64,
    pub source_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_request_validation() {
        assert!(JobSettings::default().validate().is_ok());
        let none = JobSettings {
            max_results_per_sub_region: 0,
            ..JobSettings::default()
        };
        assert!(matches!(none.validate(), Err(ProspectorError::Validation { .. })));

        assert_eq!(validate_query("  harm reduction \n").unwrap(), "harm reduction");
        assert!(validate_query("   ").is_err());
    }

    #[test]
    fn job_id_roundtrip() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().expect("parse JobId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn resume_policy_accepts_dashes() {
        assert_eq!(
            "remaining-only".parse::<ResumePolicy>().unwrap(),
            ResumePolicy::RemainingOnly
        );
        assert_eq!(
            "revisit_all".parse::<ResumePolicy>().unwrap(),
            ResumePolicy::RevisitAll
        );
        assert!("sometimes".parse::<ResumePolicy>().is_err());
    }

    #[test]
    fn settings_serialize_delay_as_millis() {
        let settings = JobSettings {
            delay_between_searches: Duration::from_millis(1500),
            ..Default::default()
        };
        let json = serde_json::to_value(&settings).expect("serialize");
        assert_eq!(json["delay_between_searches"], 1500);
        assert_eq!(json["resume_policy"], "revisit_all");

        let parsed: JobSettings = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, settings);
    }

    #[test]
    fn result_kind_roundtrip() {
        for kind in [ResultKind::Found, ResultKind::NoCandidates, ResultKind::ClientFailed] {
            assert_eq!(kind.as_str().parse::<ResultKind>().unwrap(), kind);
        }
    }
}
