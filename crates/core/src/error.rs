//! Error taxonomy for one exercise instance.
//!
//! Every error here is scoped to the current exercise; none is fatal to the
//! embedding application. The orchestrator decides per variant whether to
//! degrade, fall back, or surface a manual-retry affordance.

/// Camera/microphone acquisition failed. The exercise continues in a
/// camera-disabled state rather than aborting.
#[derive(Debug, thiserror::Error)]
pub enum MediaAcquisitionError {
    #[error("media capture denied: {0}")]
    Denied(String),
    #[error("no capture device available: {0}")]
    Unavailable(String),
}

/// The endpoint-reference issuance call failed. The caller falls back to the
/// statically configured direct agent identifier; no user-visible error yet.
#[derive(Debug, thiserror::Error)]
#[error("endpoint issuance failed: {0}")]
pub struct EndpointIssuanceError(pub String);

/// The realtime remote session failed. The current attempt is aborted and a
/// manual-retry affordance surfaced; never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum RemoteSessionError {
    #[error("remote connect failed: {0}")]
    Connect(String),
    #[error("remote session error: {0}")]
    Session(String),
}

/// The post-session transcript fetch failed. User-visible and transient; the
/// review prompt stays open, nothing is retried automatically.
#[derive(Debug, thiserror::Error)]
#[error("transcript fetch failed: {0}")]
pub struct TranscriptFetchError(pub String);

/// Review generation from a fetched transcript failed. Same handling as a
/// transcript fetch failure.
#[derive(Debug, thiserror::Error)]
#[error("review generation failed: {0}")]
pub struct ReviewGenerationError(pub String);
