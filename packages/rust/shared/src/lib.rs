//! Shared types, error model, and configuration for Prospector.
//!
//! This crate is the foundation depended on by all other Prospector crates.
//! It provides:
//! - [`ProspectorError`] — the unified error type
//! - The job lifecycle table ([`JobStatus`], [`JobEvent`])
//! - Domain types ([`Region`], [`SubRegion`], [`Job`], [`Candidate`], [`ResultRecord`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod job;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, OrchestratorConfig, ResearchConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, research_api_key, validate_config,
};
pub use error::{ProspectorError, Result};
pub use job::{FORCE_STOPPED_MESSAGE, JobEvent, JobStatus, check_transition};
pub use types::{
    Candidate, GeneralContact, Job, JobId, JobSettings, PersonnelContact, Region, RegionId,
    ResultKind, ResultRecord, ResultRow, ResumePolicy, SubRegion, SubRegionId, validate_query,
};
