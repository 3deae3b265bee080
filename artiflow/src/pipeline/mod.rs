//! Pipeline building and execution.
//!
//! This module provides:
//! - A registry mapping processor ids to stage factories
//! - A factory that creates, validates and links stage chains
//! - The linked chain itself, with status aggregation

mod chain;
mod integration_tests;
mod linker;
mod registry;

pub use chain::{Pipeline, StageHandle};
pub use linker::PipelineFactory;
pub use registry::{StageFactory, StageRegistry};
