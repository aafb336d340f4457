//! Test doubles for ciflow pipelines.
//!
//! This module provides in-process stand-ins for:
//! - The secure-copy transport
//! - The test framework adapter
//! - The coverage publish client

mod mocks;

pub use mocks::{
    FailingTransport, RecordingPublishClient, ScriptedTestAdapter, SlowTransport, StaticTransport,
};
