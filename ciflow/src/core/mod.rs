//! Core domain model types for ciflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage names, stage outcomes and the overall pipeline status
//! - The per-stage result record

mod record;
mod status;

pub use record::StageRecord;
pub use status::{PipelineStatus, StageName, StageOutcome};
