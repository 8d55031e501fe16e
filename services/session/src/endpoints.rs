//! HTTP collaborators: endpoint-reference issuance, transcript fetch, and
//! review generation.
//!
//! The orchestrator only sequences these calls; their internals are external
//! services. Wire payloads use camelCase field names.

use async_trait::async_trait;
use eloquence_core::{
    agent::{AgentKind, Phase},
    error::{EndpointIssuanceError, ReviewGenerationError, TranscriptFetchError},
    transcript::{ReviewArtifact, TranscriptRecord},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Outcome of the issuance call. On `Direct` the caller must resolve the
/// statically configured agent identifier for the classification, never a
/// returned reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issued {
    Ref(String),
    Direct,
}

#[async_trait]
pub trait SessionEndpoints: Send + Sync {
    async fn issue_endpoint(
        &self,
        kind: AgentKind,
        phase: Phase,
    ) -> Result<Issued, EndpointIssuanceError>;

    async fn fetch_transcript(
        &self,
        session_id: &str,
        kind: AgentKind,
    ) -> Result<TranscriptRecord, TranscriptFetchError>;

    async fn generate_review(
        &self,
        transcript: &str,
        kind: AgentKind,
    ) -> Result<ReviewArtifact, ReviewGenerationError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IssuePayload<'a> {
    agent_type: &'a str,
    phase: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssueResponse {
    #[serde(default)]
    direct_use: bool,
    #[serde(default)]
    signed_url: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptPayload<'a> {
    conversation_id: &'a str,
    agent_type: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptResponse {
    conversation_data: ConversationData,
}

#[derive(Debug, Deserialize)]
struct ConversationData {
    transcript: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewPayload<'a> {
    transcript: &'a str,
    agent_type: &'a str,
}

fn classify_issue_response(response: IssueResponse) -> Result<Issued, EndpointIssuanceError> {
    if response.direct_use {
        return Ok(Issued::Direct);
    }
    match response.signed_url {
        Some(url) => Ok(Issued::Ref(url)),
        None => Err(EndpointIssuanceError(
            "issuance returned neither a signed url nor directUse".to_string(),
        )),
    }
}

/// The production implementation over the application's API base.
pub struct HttpEndpoints {
    client: reqwest::Client,
    api_base: String,
}

impl HttpEndpoints {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl SessionEndpoints for HttpEndpoints {
    async fn issue_endpoint(
        &self,
        kind: AgentKind,
        phase: Phase,
    ) -> Result<Issued, EndpointIssuanceError> {
        debug!(%kind, %phase, "Requesting session endpoint reference");
        let response = self
            .client
            .post(self.url("get-signed-url"))
            .json(&IssuePayload {
                agent_type: kind.as_str(),
                phase: phase.as_str(),
            })
            .send()
            .await
            .map_err(|e| EndpointIssuanceError(e.to_string()))?
            .error_for_status()
            .map_err(|e| EndpointIssuanceError(e.to_string()))?
            .json::<IssueResponse>()
            .await
            .map_err(|e| EndpointIssuanceError(e.to_string()))?;
        classify_issue_response(response)
    }

    async fn fetch_transcript(
        &self,
        session_id: &str,
        kind: AgentKind,
    ) -> Result<TranscriptRecord, TranscriptFetchError> {
        debug!(%session_id, %kind, "Fetching session transcript");
        let response = self
            .client
            .post(self.url("get-transcript"))
            .json(&TranscriptPayload {
                conversation_id: session_id,
                agent_type: kind.as_str(),
            })
            .send()
            .await
            .map_err(|e| TranscriptFetchError(e.to_string()))?
            .error_for_status()
            .map_err(|e| TranscriptFetchError(e.to_string()))?
            .json::<TranscriptResponse>()
            .await
            .map_err(|e| TranscriptFetchError(e.to_string()))?;
        Ok(TranscriptRecord {
            session_id: session_id.to_string(),
            text: response.conversation_data.transcript,
        })
    }

    async fn generate_review(
        &self,
        transcript: &str,
        kind: AgentKind,
    ) -> Result<ReviewArtifact, ReviewGenerationError> {
        debug!(%kind, "Requesting review generation");
        let payload = self
            .client
            .post(self.url("generate-review"))
            .json(&ReviewPayload {
                transcript,
                agent_type: kind.as_str(),
            })
            .send()
            .await
            .map_err(|e| ReviewGenerationError(e.to_string()))?
            .error_for_status()
            .map_err(|e| ReviewGenerationError(e.to_string()))?
            .json::<serde_json::Value>()
            .await
            .map_err(|e| ReviewGenerationError(e.to_string()))?;
        Ok(ReviewArtifact(payload))
    }
}
