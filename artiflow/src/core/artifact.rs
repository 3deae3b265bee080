//! Artifact identities, descriptors and stage declarations.

use super::Version;
use crate::errors::FormatError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Well-known artifact descriptor property names.
pub mod properties {
    /// Size of the bytes as transferred.
    pub const DOWNLOAD_SIZE: &str = "download.size";
    /// Size of the canonical artifact.
    pub const ARTIFACT_SIZE: &str = "artifact.size";
    /// MD5 of the bytes as transferred.
    pub const DOWNLOAD_MD5: &str = "download.md5";
    /// MD5 of the canonical artifact.
    pub const ARTIFACT_MD5: &str = "artifact.md5";
    /// SHA-256 of the bytes as transferred.
    pub const DOWNLOAD_SHA256: &str = "download.checksum.sha-256";
    /// SHA-256 of the canonical artifact.
    pub const ARTIFACT_SHA256: &str = "artifact.checksum.sha-256";
    /// Format tag of a non-canonical representation.
    pub const FORMAT: &str = "format";
}

const SEPARATOR: char = ',';
const ESCAPE: char = '\\';

/// Identity of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Repository namespace.
    pub namespace: String,
    /// Classifier tag, e.g. `osgi.bundle`.
    pub classifier: String,
    /// Artifact id.
    pub id: String,
    /// Artifact version.
    pub version: Version,
}

/// An artifact identity with the version stripped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FamilyKey {
    /// Repository namespace.
    pub namespace: String,
    /// Classifier tag.
    pub classifier: String,
    /// Artifact id.
    pub id: String,
}

impl fmt::Display for FamilyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.classifier, self.id)
    }
}

impl ArtifactKey {
    /// Creates a new artifact key.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        classifier: impl Into<String>,
        id: impl Into<String>,
        version: Version,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            classifier: classifier.into(),
            id: id.into(),
            version,
        }
    }

    /// Returns the version family this key belongs to.
    #[must_use]
    pub fn family(&self) -> FamilyKey {
        FamilyKey {
            namespace: self.namespace.clone(),
            classifier: self.classifier.clone(),
            id: self.id.clone(),
        }
    }

    /// Serializes the key as `namespace,classifier,id,version` with commas
    /// and backslashes inside fields escaped by a backslash.
    #[must_use]
    pub fn to_external_form(&self) -> String {
        let version = self.version.to_string();
        [
            self.namespace.as_str(),
            self.classifier.as_str(),
            self.id.as_str(),
            version.as_str(),
        ]
        .iter()
        .map(|field| escape(field))
        .collect::<Vec<_>>()
        .join(",")
    }

    /// Decodes the external form.
    ///
    /// Exactly three unescaped separators must be present. The final
    /// (version) field may be empty, which decodes to the empty version.
    ///
    /// # Errors
    ///
    /// Returns `FormatError::MalformedKey` for a wrong separator count or a
    /// dangling escape, and `FormatError::MalformedVersion` if the version
    /// field does not follow the version grammar.
    pub fn parse(input: &str) -> Result<Self, FormatError> {
        let malformed = |reason: &str| FormatError::MalformedKey {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut fields = vec![String::new()];
        let mut chars = input.chars();
        while let Some(c) = chars.next() {
            match c {
                ESCAPE => {
                    let escaped = chars.next().ok_or_else(|| malformed("dangling escape"))?;
                    if let Some(field) = fields.last_mut() {
                        field.push(escaped);
                    }
                }
                SEPARATOR => fields.push(String::new()),
                other => {
                    if let Some(field) = fields.last_mut() {
                        field.push(other);
                    }
                }
            }
        }

        if fields.len() != 4 {
            return Err(malformed(&format!(
                "expected 3 separators, found {}",
                fields.len() - 1
            )));
        }

        let version = Version::parse(&fields[3])?;
        let mut fields = fields.into_iter();
        let mut next = || fields.next().unwrap_or_default();
        Ok(Self {
            namespace: next(),
            classifier: next(),
            id: next(),
            version,
        })
    }
}

fn escape(field: &str) -> String {
    let mut out = String::with_capacity(field.len());
    for c in field.chars() {
        if c == SEPARATOR || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_external_form())
    }
}

/// Declares one processing stage of an artifact representation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageDescriptor {
    /// Registry id of the stage implementation.
    pub processor_id: String,
    /// Stage-specific configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    /// Whether the pipeline must refuse to run without this stage.
    #[serde(default)]
    pub required: bool,
}

impl StageDescriptor {
    /// Creates an optional stage declaration without data.
    #[must_use]
    pub fn new(processor_id: impl Into<String>) -> Self {
        Self {
            processor_id: processor_id.into(),
            data: None,
            required: false,
        }
    }

    /// Sets the configuration data.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Marks the stage as required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Returns the data as a trimmed string, if present and non-empty.
    #[must_use]
    pub fn data(&self) -> Option<&str> {
        self.data
            .as_deref()
            .map(str::trim)
            .filter(|data| !data.is_empty())
    }
}

/// One representation of an artifact in a repository.
///
/// A descriptor with no processing steps is canonical: its bytes are the
/// artifact itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    /// The artifact this describes.
    pub key: ArtifactKey,
    /// Read-only properties (sizes, digests, format).
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Stages to apply, in order, when reading these bytes.
    #[serde(default)]
    pub processing_steps: Vec<StageDescriptor>,
}

impl ArtifactDescriptor {
    /// Creates a canonical descriptor without properties.
    #[must_use]
    pub fn new(key: ArtifactKey) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
            processing_steps: Vec::new(),
        }
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Sets the processing steps.
    #[must_use]
    pub fn with_processing_steps(mut self, steps: Vec<StageDescriptor>) -> Self {
        self.processing_steps = steps;
        self
    }

    /// Looks up a property.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Returns the format tag, if any.
    #[must_use]
    pub fn format(&self) -> Option<&str> {
        self.property(properties::FORMAT)
    }

    /// Returns true if no processing steps apply to these bytes.
    #[must_use]
    pub fn is_canonical(&self) -> bool {
        self.processing_steps.is_empty()
    }
}
