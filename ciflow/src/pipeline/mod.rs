//! Pipeline orchestration.
//!
//! This module provides:
//! - The controller state machine
//! - The terminal run result and status derivation

mod controller;
mod integration_tests;
mod result;
mod state;

pub use controller::PipelineController;
pub use result::{overall_status, FailureSummary, PipelineResult};
pub use state::{PipelineState, StateTransition};
