//! Transcript and review payloads exchanged with the external pipeline.

use serde::{Deserialize, Serialize};

/// A session's transcript, produced either by the declaration recorder or
/// fetched post-hoc from the remote session's transcript endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub session_id: String,
    pub text: String,
}

/// The generated performance review. Opaque to the core beyond
/// "exists or failed"; the results view renders it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewArtifact(pub serde_json::Value);
