//! Main Entrypoint for the Eloquence Session Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing logging.
//! 3. Wiring the controller's collaborators (capture backend, ConvAI
//!    connector, HTTP endpoints, avatar surface).
//! 4. Spawning the session controller for the requested classification and
//!    driving it from the terminal until Ctrl+C.
//!
//! The capture backend and video surface here are headless stand-ins; a real
//! embedding shell supplies platform implementations of the same traits.

use anyhow::Context;
use async_trait::async_trait;
use eloquence_core::agent::{AgentKind, format_elapsed, profile_for};
use eloquence_core::error::MediaAcquisitionError;
use eloquence_session::{
    avatar::{AvatarPresenter, VideoSurface},
    config::Config,
    controller::{ControllerDeps, SessionCommand, SessionEvent, spawn},
    endpoints::HttpEndpoints,
    media::{CaptureBackend, MediaDeviceManager, MediaStream, MediaTrack, StreamConstraints, TrackKind},
    relay::{Navigator, ProgressSink, TranscriptRelay},
    remote::convai::ConvaiConnector,
};
use std::sync::Arc;
use tracing::info;

/// Capture backend that pretends the devices are always available.
struct HeadlessCapture;

#[async_trait]
impl CaptureBackend for HeadlessCapture {
    async fn open(
        &self,
        constraints: &StreamConstraints,
    ) -> Result<MediaStream, MediaAcquisitionError> {
        info!(
            width = constraints.width,
            height = constraints.height,
            frame_rate = constraints.frame_rate,
            "Opening headless capture"
        );
        Ok(MediaStream::new(vec![
            MediaTrack::new(TrackKind::Audio),
            MediaTrack::new(TrackKind::Video),
        ]))
    }
}

/// Video surface that logs the clip swaps instead of rendering them.
struct LoggingSurface;

#[async_trait]
impl VideoSurface for LoggingSurface {
    async fn set_opacity(&self, opacity: f32) {
        info!(opacity, "Avatar opacity");
    }

    async fn set_source(&self, source: &str) {
        info!(source, "Avatar clip");
    }

    async fn reload_and_play(&self) {}
}

struct LoggingNavigator;

#[async_trait]
impl Navigator for LoggingNavigator {
    async fn to_results(&self, session_id: &str, kind: AgentKind) {
        info!(%session_id, %kind, "Navigating to the results view");
    }
}

struct LoggingProgress;

#[async_trait]
impl ProgressSink for LoggingProgress {
    async fn review_started(&self) {
        info!("Generating the review...");
    }

    async fn review_finished(&self) {
        info!("Review ready");
    }

    async fn review_failed(&self, message: &str) {
        info!(message, "Review failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();

    // --- 3. Pick the Classification ---
    let kind_arg = std::env::args().nth(1).unwrap_or_else(|| "press".to_string());
    let kind = AgentKind::parse(&kind_arg)
        .with_context(|| format!("Unknown agent classification '{kind_arg}'"))?;
    info!(%kind, "Starting a speaking-practice exercise");

    // --- 4. Wire the Collaborators ---
    let endpoints = Arc::new(HttpEndpoints::new(config.api_base.clone()));
    let connector = Arc::new(ConvaiConnector::new(config.convai_ws_base.clone()));
    let media = MediaDeviceManager::new(Arc::new(HeadlessCapture), config.constraints.clone());
    let avatar = AvatarPresenter::new(
        Arc::new(LoggingSurface),
        profile_for(kind, kind.initial_phase()),
    );
    let relay = TranscriptRelay::new(
        endpoints.clone(),
        Arc::new(LoggingNavigator),
        Arc::new(LoggingProgress),
    );

    // --- 5. Spawn the Controller ---
    let (handle, mut events) = spawn(
        kind,
        ControllerDeps {
            media,
            connector,
            endpoints,
            avatar,
            direct_agents: config.direct_agents.clone(),
        },
    );
    handle.send(SessionCommand::Start).await;

    // --- 6. Drive Until Ctrl+C ---
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::StatusChanged(snapshot)) => {
                    info!(status = ?snapshot.status, phase = %snapshot.phase, "Status changed");
                }
                Some(SessionEvent::ElapsedTick(elapsed)) => {
                    if elapsed % 60 == 0 {
                        info!(clock = %format_elapsed(elapsed), "Session clock");
                    }
                }
                Some(SessionEvent::SpeakingChanged(speaking)) => {
                    info!(speaking, "Agent speaking state");
                }
                Some(SessionEvent::TransitionPrompt) => {
                    info!("Declaration finished; continuing into the questions phase");
                    handle.send(SessionCommand::AdvanceToQuestions).await;
                }
                Some(SessionEvent::ReviewPrompt { session_id, kind }) => {
                    if let Err(e) = relay.fetch_and_review(&session_id, kind).await {
                        info!(error = %e, "Review pipeline did not complete");
                    }
                    break;
                }
                Some(SessionEvent::Fault(message)) => {
                    info!(message, "Session fault");
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal. Stopping the session...");
                handle.send(SessionCommand::Stop).await;
            }
        }
    }

    handle.send(SessionCommand::Shutdown).await;
    info!("Session service has shut down.");
    Ok(())
}
