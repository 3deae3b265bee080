//! # Artiflow
//!
//! Streaming content transformation for repository artifacts.
//!
//! Artiflow provides:
//!
//! - **Stage chains**: ordered, composable byte transforms (arithmetic,
//!   digest and size verification, gzip decoding, binary patches) linked in
//!   front of a sink, with severity-based status aggregation
//! - **Archive normalization**: a codec turning zip containers, nested ones
//!   included, into a flat record stream that diffs well
//! - **Delta optimization**: planning which artifact versions are stored as
//!   patches against their predecessors, with a raw-byte fallback when the
//!   archive-aware diff runs out of memory
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use artiflow::prelude::*;
//! use std::sync::Arc;
//!
//! let factory = PipelineFactory::new(Arc::new(StageRegistry::with_transform_stages()));
//! let steps = [
//!     StageDescriptor::new("transform.multiply").with_data("2"),
//!     StageDescriptor::new("transform.add").with_data("1"),
//! ];
//! let mut pipeline = factory.create_and_link(&steps, &context, Vec::new());
//! pipeline.process(&[1, 2, 3])?;
//! pipeline.close()?;
//! pipeline.check_status()?;
//! assert_eq!(pipeline.into_sink(), vec![3, 5, 7]);
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

pub mod archive;
pub mod cancellation;
pub mod core;
pub mod delta;
pub mod errors;
pub mod observability;
pub mod optimizer;
pub mod pipeline;
pub mod repository;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::archive::{from_record_stream, to_record_stream};
    pub use crate::cancellation::CancellationToken;
    pub use crate::core::{
        ArtifactDescriptor, ArtifactKey, Outcome, Severity, StageDescriptor, StageKind, Version,
    };
    pub use crate::errors::{ArtiflowError, FormatError, Result};
    pub use crate::observability::{init_tracing, LogConfig};
    pub use crate::optimizer::{OptimizationSummary, Optimizer, OptimizerConfig};
    pub use crate::pipeline::{Pipeline, PipelineFactory, StageRegistry};
    pub use crate::repository::{ArtifactQuery, ArtifactRepository, ArtifactSink, InMemoryRepository};
    pub use crate::stages::{PatchLimits, PatchStrategy, Stage};
}
