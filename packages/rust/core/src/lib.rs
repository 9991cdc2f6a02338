//! Job orchestration for Prospector.
//!
//! [`JobRegistry`] is the entry point: it creates jobs, applies lifecycle
//! transitions and owns the worker tasks that walk a region's sub-regions,
//! calling the research client and merging results into storage.

pub mod merge;
pub mod orchestrator;
pub mod progress;
pub mod registry;

#[cfg(test)]
mod testing;

pub use orchestrator::{RunOutcome, WorkPlan};
pub use progress::JobProgress;
pub use registry::{JobRegistry, RegistryOptions};
