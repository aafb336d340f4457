//! # ciflow
//!
//! A credential-gated CI pipeline for test suites that depend on remote
//! fixture data.
//!
//! A run moves through a fixed sequence of stages:
//!
//! - **Credential gates**: remote-data access and coverage publishing are
//!   gated independently on the presence of their secrets
//! - **Fixture fetch**: remote fixtures are copied over `scp` into a
//!   run-scoped staging area
//! - **Integrity verification**: an order-independent aggregate digest of
//!   the staged files must equal the pinned literal
//! - **Tests with coverage**: the suite runs against the verified fixtures
//! - **Coverage publish**: the report is uploaded when the publish gate allows
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ciflow::prelude::*;
//!
//! let config = PipelineConfig::from_file("ciflow.toml".as_ref())?;
//! let credentials = RunCredentials::from_env(&config.credentials);
//!
//! let controller = PipelineController::from_config(config, std::env::var("GITHUB_SHA").ok().as_deref())?;
//! let result = controller.run(&credentials, Trigger::push()).await;
//! std::process::exit(i32::from(result.exit_code()));
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod credentials;
pub mod errors;
pub mod events;
pub mod fixtures;
pub mod integrity;
pub mod pipeline;
pub mod publish;
pub mod runner;
pub mod runtime;
pub mod testing;
pub mod trigger;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{FetchConfig, PipelineConfig, PublishConfig, TestConfig};
    pub use crate::core::{PipelineStatus, StageName, StageOutcome, StageRecord};
    pub use crate::credentials::{
        CredentialGate, CredentialKeys, CredentialSet, GateDecision, RunCredentials,
    };
    pub use crate::errors::{
        CiflowError, ConfigError, FetchError, IntegrityError, PublishError, TestFailure,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::fixtures::{FixtureEntry, FixtureManifest, StagingArea};
    pub use crate::integrity::{DigestAlgorithm, IntegrityVerifier};
    pub use crate::pipeline::{PipelineController, PipelineResult, PipelineState};
    pub use crate::publish::{PublishClient, PublishOutcome, ReportPublisher};
    pub use crate::runner::{CoverageFormat, CoverageReport, TestFrameworkAdapter, TestRunner};
    pub use crate::trigger::{Trigger, TriggerKind};
}
