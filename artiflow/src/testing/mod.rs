//! Testing utilities for artiflow pipelines.
//!
//! This module provides:
//! - Scripted stages and recording sinks
//! - Assertions on status trees
//! - Deterministic container fixtures

mod assertions;
pub mod fixtures;
pub mod mocks;

pub use assertions::{
    assert_child_count, assert_severity, assert_status_error, assert_status_mentions,
    assert_status_ok,
};
pub use mocks::{FailingSink, RecordingSink, ScriptedStage, StageCalls};
