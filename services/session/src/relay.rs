//! Post-session transcript and review pipeline.
//!
//! Entered only when the controller reached a terminal state with a
//! captured session id. Fetches the transcript, requests the review, and
//! navigates to the results view; any step's failure keeps the user on the
//! review prompt with a visible error and no partial navigation.

use crate::endpoints::SessionEndpoints;
use async_trait::async_trait;
use eloquence_core::{
    agent::AgentKind,
    error::{ReviewGenerationError, TranscriptFetchError},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{info, instrument, warn};

/// Navigation to the results view, parameterized by session id and
/// classification. No other contract is required of the embedding shell.
#[async_trait]
pub trait Navigator: Send + Sync {
    async fn to_results(&self, session_id: &str, kind: AgentKind);
}

/// The non-blocking, non-cancellable progress indicator shown while the
/// pipeline runs.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn review_started(&self);
    async fn review_finished(&self);
    async fn review_failed(&self, message: &str);
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("a review request is already in flight")]
    Busy,
    #[error(transparent)]
    Transcript(#[from] TranscriptFetchError),
    #[error(transparent)]
    Review(#[from] ReviewGenerationError),
}

pub struct TranscriptRelay {
    endpoints: Arc<dyn SessionEndpoints>,
    navigator: Arc<dyn Navigator>,
    progress: Arc<dyn ProgressSink>,
    in_flight: AtomicBool,
}

impl TranscriptRelay {
    pub fn new(
        endpoints: Arc<dyn SessionEndpoints>,
        navigator: Arc<dyn Navigator>,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            endpoints,
            navigator,
            progress,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Dialog contract: declining is always available except while a review
    /// request is in flight.
    pub fn can_decline(&self) -> bool {
        !self.in_flight.load(Ordering::Acquire)
    }

    /// Runs the full pipeline. Errors leave the prompt dialog in place; no
    /// automatic retry is attempted.
    #[instrument(skip(self), fields(%session_id, %kind))]
    pub async fn fetch_and_review(
        &self,
        session_id: &str,
        kind: AgentKind,
    ) -> Result<(), RelayError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RelayError::Busy);
        }
        self.progress.review_started().await;
        let result = self.run(session_id, kind).await;
        match &result {
            Ok(()) => self.progress.review_finished().await,
            Err(e) => {
                warn!(error = %e, "Review pipeline failed, staying on the prompt");
                self.progress.review_failed(&e.to_string()).await;
            }
        }
        self.in_flight.store(false, Ordering::Release);
        result
    }

    async fn run(&self, session_id: &str, kind: AgentKind) -> Result<(), RelayError> {
        let record = self.endpoints.fetch_transcript(session_id, kind).await?;
        let _review = self.endpoints.generate_review(&record.text, kind).await?;
        info!("Review generated, navigating to the results view");
        self.navigator.to_results(session_id, kind).await;
        Ok(())
    }
}
