//! Artifact domain types

use serde::{Deserialize, Serialize};

/// How an artifact behaves when written twice under the same key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Content addressed: identical content under the same key is a no-op
    Fingerprint,
    /// Overwritten on every write
    #[default]
    Mutable,
}

/// Reference to a stored artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub key: String,
    pub kind: ArtifactKind,
    /// Hex encoded SHA-256 of the content
    pub digest: String,
    pub size: u64,
}
