//! Core domain model types for artiflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Severity levels and stage kinds
//! - Outcomes and their aggregation into status trees
//! - Artifact identities, versions and descriptors

mod artifact;
mod outcome;
mod status;
mod version;

pub use artifact::{properties, ArtifactDescriptor, ArtifactKey, FamilyKey, StageDescriptor};
pub use outcome::{max_severity, Outcome};
pub use status::{Severity, StageKind};
pub use version::Version;
