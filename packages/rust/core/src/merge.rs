//! Reduce one research outcome to the record written for a sub-region.

use prospector_research::ResearchResponse;
use prospector_shared::{
    Candidate, GeneralContact, JobId, PersonnelContact, Result, ResultKind, ResultRecord,
    SubRegionId,
};

/// Description stored when the engine named no organization.
pub const NO_CANDIDATES_DESCRIPTION: &str = "No organizations found matching the search criteria";

/// The candidate with the highest confidence; ties go to the first seen.
pub fn select_best(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().fold(None, |best: Option<&Candidate>, c| match best {
        Some(b) if b.confidence >= c.confidence => Some(b),
        _ => Some(c),
    })
}

/// Build the record for one sub-region from the client's outcome.
pub fn record_for_outcome(
    job_id: &JobId,
    sub_region_id: SubRegionId,
    outcome: &Result<ResearchResponse>,
) -> ResultRecord {
    match outcome {
        Err(e) => client_failed(job_id, sub_region_id, &e.to_string()),
        Ok(response) => match select_best(response.candidates()) {
            Some(candidate) => found(job_id, sub_region_id, candidate, response.raw()),
            None => {
                let notes = match response {
                    ResearchResponse::Fallback { reason, summary, .. } => {
                        summary.clone().or_else(|| Some(reason.clone()))
                    }
                    ResearchResponse::Structured { summary, .. } => summary.clone(),
                };
                no_candidates(job_id, sub_region_id, notes, response.raw())
            }
        },
    }
}

pub fn found(
    job_id: &JobId,
    sub_region_id: SubRegionId,
    candidate: &Candidate,
    raw: &str,
) -> ResultRecord {
    ResultRecord {
        job_id: job_id.clone(),
        sub_region_id,
        kind: ResultKind::Found,
        organization_name: Some(candidate.name.clone()),
        description: candidate.description.clone(),
        personnel: candidate.personnel.clone(),
        contact: candidate.contact.clone(),
        address: candidate.address.clone(),
        notes: candidate.notes.clone().or_else(|| candidate.raw_evidence.clone()),
        confidence: candidate.confidence,
        source_urls: candidate.source_urls.clone(),
        raw_response: Some(raw.to_string()),
        failure_reason: None,
    }
}

pub fn no_candidates(
    job_id: &JobId,
    sub_region_id: SubRegionId,
    notes: Option<String>,
    raw: &str,
) -> ResultRecord {
    ResultRecord {
        description: Some(NO_CANDIDATES_DESCRIPTION.into()),
        notes,
        raw_response: Some(raw.to_string()),
        ..sentinel(job_id, sub_region_id, ResultKind::NoCandidates)
    }
}

pub fn client_failed(job_id: &JobId, sub_region_id: SubRegionId, reason: &str) -> ResultRecord {
    ResultRecord {
        description: Some(format!("Search failed: {reason}")),
        failure_reason: Some(reason.to_string()),
        ..sentinel(job_id, sub_region_id, ResultKind::ClientFailed)
    }
}

fn sentinel(job_id: &JobId, sub_region_id: SubRegionId, kind: ResultKind) -> ResultRecord {
    ResultRecord {
        job_id: job_id.clone(),
        sub_region_id,
        kind,
        organization_name: None,
        description: None,
        personnel: PersonnelContact::default(),
        contact: GeneralContact::default(),
        address: None,
        notes: None,
        confidence: 0.0,
        source_urls: Vec::new(),
        raw_response: None,
        failure_reason: None,
    }
}
