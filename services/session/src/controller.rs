//! The session controller: one task per exercise instance, composing the
//! media manager, endpoint issuance, remote connector, clock, and avatar
//! presenter into the phase state machine.
//!
//! All mutation happens on the controller task. Collaborators reach it
//! through channels only: commands from the embedding UI, remote events
//! forwarded by a per-connection pump, and clock ticks. Remote events and
//! ticks carry the generation that produced them; anything from a
//! superseded phase is discarded on receipt, which makes the stop/restart
//! races harmless without any locking.

use crate::avatar::AvatarPresenter;
use crate::clock::{ClockTick, FORCED_STOP_AT_SECS, SessionClock};
use crate::config::DirectAgentTable;
use crate::endpoints::{Issued, SessionEndpoints};
use crate::media::MediaDeviceManager;
use crate::remote::{
    ConnectAuth, ConnectTarget, DECLARATION_TRANSCRIPT_VAR, RemoteConnector, RemoteEvent,
    RemoteSession,
};
use eloquence_core::agent::{AgentKind, profile_for};
use eloquence_core::session::{
    AfterTermination, Session, SessionSnapshot, SessionStatus, TerminateReason, Termination,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

/// Pause between leaving the declaration phase and starting the questions
/// phase, so the surface can settle on the new persona first.
pub const PHASE_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Commands the embedding UI sends to a running controller.
#[derive(Debug)]
pub enum SessionCommand {
    /// Begins the start sequence for the current phase. Rejected unless the
    /// session is idle or parked retryable.
    Start,
    /// User-initiated stop of the current phase.
    Stop,
    ToggleMic,
    ToggleCamera,
    /// The declaration recorder finished; ends the declaration phase and
    /// advances straight to questions, carrying the transcript.
    DeclarationComplete { transcript: String },
    /// Continue from the transition prompt into the questions phase.
    AdvanceToQuestions,
    /// Decline the questions phase at the transition prompt. Ends the
    /// exercise with no review.
    FinishHere,
    Shutdown,
}

/// Events the controller emits toward the embedding UI.
#[derive(Debug, PartialEq)]
pub enum SessionEvent {
    StatusChanged(SessionSnapshot),
    ElapsedTick(u32),
    SpeakingChanged(bool),
    /// The declaration phase ended by an explicit stop; the UI asks whether
    /// to continue into questions or finish here.
    TransitionPrompt,
    /// The exercise ended with a known session id; the UI may hand it to the
    /// transcript relay.
    ReviewPrompt { session_id: String, kind: AgentKind },
    Fault(String),
}

/// Messages produced by the controller's own spawned tasks.
#[derive(Debug)]
enum Internal {
    Remote { generation: u64, event: RemoteEvent },
    PhaseRestart { generation: u64 },
}

/// Everything a controller needs besides the classification itself.
pub struct ControllerDeps {
    pub media: MediaDeviceManager,
    pub connector: Arc<dyn RemoteConnector>,
    pub endpoints: Arc<dyn SessionEndpoints>,
    pub avatar: AvatarPresenter,
    pub direct_agents: DirectAgentTable,
}

/// Cheap handle to a spawned controller.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Returns false once the controller has shut down.
    pub async fn send(&self, command: SessionCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }
}

/// Spawns the controller task for one exercise. The returned receiver
/// carries the event stream; dropping it does not stop the controller, only
/// `Shutdown` (or dropping the handle) does.
pub fn spawn(
    kind: AgentKind,
    deps: ControllerDeps,
) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
    let (command_tx, command_rx) = mpsc::channel(32);
    let (event_tx, event_rx) = mpsc::channel(64);
    let (internal_tx, internal_rx) = mpsc::channel(64);
    let (clock_tx, clock_rx) = mpsc::channel(8);

    let session = Session::new(kind);
    let snapshot = session.snapshot();
    let (snapshot_tx, snapshot_rx) = watch::channel(snapshot.clone());

    let controller = SessionController {
        session,
        media: deps.media,
        connector: deps.connector,
        endpoints: deps.endpoints,
        avatar: deps.avatar,
        direct_agents: deps.direct_agents,
        clock: SessionClock::new(),
        clock_tx,
        generation: 0,
        remote: None,
        forwarder: None,
        internal_tx,
        events: event_tx,
        snapshot_tx,
        last_status: snapshot.status,
    };

    tokio::spawn(
        controller
            .run(command_rx, internal_rx, clock_rx)
            .instrument(info_span!("exercise", %kind)),
    );

    (
        SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
        },
        event_rx,
    )
}

struct SessionController {
    session: Session,
    media: MediaDeviceManager,
    connector: Arc<dyn RemoteConnector>,
    endpoints: Arc<dyn SessionEndpoints>,
    avatar: AvatarPresenter,
    direct_agents: DirectAgentTable,
    clock: SessionClock,
    clock_tx: mpsc::Sender<ClockTick>,
    /// Bumped on every start and every teardown. Remote events and ticks
    /// stamped with an older generation are discarded.
    generation: u64,
    remote: Option<RemoteSession>,
    forwarder: Option<JoinHandle<()>>,
    internal_tx: mpsc::Sender<Internal>,
    events: mpsc::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    last_status: SessionStatus,
}

impl SessionController {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut internal: mpsc::Receiver<Internal>,
        mut ticks: mpsc::Receiver<ClockTick>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => {
                        self.shutdown();
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                },
                Some(message) = internal.recv() => self.handle_internal(message).await,
                Some(tick) = ticks.recv() => self.handle_tick(tick).await,
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start => self.start().await,
            SessionCommand::Stop => self.stop(TerminateReason::UserStop).await,
            SessionCommand::ToggleMic => {
                let on = self.media.toggle_mic();
                debug!(on, "Microphone toggled");
            }
            SessionCommand::ToggleCamera => match self.media.toggle_camera().await {
                Ok(on) => debug!(on, "Camera toggled"),
                Err(e) => {
                    self.emit(SessionEvent::Fault(format!("camera: {e}"))).await;
                }
            },
            SessionCommand::DeclarationComplete { transcript } => {
                self.declaration_complete(transcript).await;
            }
            SessionCommand::AdvanceToQuestions => self.advance(None).await,
            SessionCommand::FinishHere => self.finish_here().await,
            SessionCommand::Shutdown => unreachable!("handled by the run loop"),
        }
    }

    async fn handle_internal(&mut self, message: Internal) {
        match message {
            Internal::Remote { generation, event } => {
                if generation != self.generation {
                    debug!(generation, current = self.generation, "Stale remote event dropped");
                    return;
                }
                self.handle_remote_event(event).await;
            }
            Internal::PhaseRestart { generation } => {
                if generation != self.generation {
                    debug!("Stale phase restart dropped");
                    return;
                }
                info!("Starting the questions phase");
                self.start().await;
            }
        }
    }

    async fn handle_remote_event(&mut self, event: RemoteEvent) {
        match event {
            RemoteEvent::Connected { conversation_id } => {
                if let Err(e) = self.session.connected(conversation_id) {
                    warn!(error = %e, "Connect event in an unexpected state");
                    return;
                }
                self.clock.start(self.generation, self.clock_tx.clone());
                self.publish().await;
            }
            RemoteEvent::Message { agent_speaking, .. } => {
                if let Some(edge) = self.session.observe_speaking(agent_speaking) {
                    self.avatar.on_edge(edge);
                    let _ = self.snapshot_tx.send(self.session.snapshot());
                    self.emit(SessionEvent::SpeakingChanged(self.session.is_speaking()))
                        .await;
                }
            }
            RemoteEvent::Disconnected => {
                info!("Remote session disconnected");
                self.stop(TerminateReason::RemoteDisconnect).await;
            }
            RemoteEvent::Failed(reason) => {
                if self.session.status() == SessionStatus::Connecting {
                    self.fail_start(&reason).await;
                } else {
                    self.emit(SessionEvent::Fault(reason)).await;
                    self.stop(TerminateReason::RemoteDisconnect).await;
                }
            }
        }
    }

    async fn handle_tick(&mut self, tick: ClockTick) {
        if tick.generation != self.generation {
            return;
        }
        let Some(elapsed) = self.session.tick() else {
            return;
        };
        let _ = self.snapshot_tx.send(self.session.snapshot());
        self.emit(SessionEvent::ElapsedTick(elapsed)).await;
        if elapsed >= FORCED_STOP_AT_SECS {
            info!(elapsed, "Session time limit reached");
            self.stop(TerminateReason::TimeLimit).await;
        }
    }

    /// The start sequence for the current phase: media, endpoint issuance,
    /// remote connect. Media denial degrades; issuance failure falls back to
    /// the direct agent identifier; connect failure parks the session with
    /// the manual-retry affordance.
    async fn start(&mut self) {
        if let Err(e) = self.session.begin_start() {
            warn!(error = %e, "Start rejected");
            return;
        }
        self.generation += 1;
        self.publish().await;

        if self.media.acquire().await.is_err() {
            // Camera-disabled exercise; the session itself proceeds.
        }

        let kind = self.session.kind();
        let phase = self.session.phase();
        let auth = match self.endpoints.issue_endpoint(kind, phase).await {
            Ok(Issued::Ref(endpoint)) => ConnectAuth::EndpointRef(endpoint),
            Ok(Issued::Direct) => match self.direct_agents.resolve(kind, phase) {
                Some(agent_id) => ConnectAuth::AgentId(agent_id.to_string()),
                None => {
                    self.fail_start("issuance answered direct use, but no agent identifier is configured")
                        .await;
                    return;
                }
            },
            Err(e) => {
                warn!(error = %e, "Endpoint issuance failed, using the direct agent identifier");
                match self.direct_agents.resolve(kind, phase) {
                    Some(agent_id) => ConnectAuth::AgentId(agent_id.to_string()),
                    None => {
                        self.fail_start("issuance failed and no agent identifier is configured")
                            .await;
                        return;
                    }
                }
            }
        };

        if let Err(e) = self.session.begin_connect() {
            self.fail_start(&format!("connect gate: {e}")).await;
            return;
        }
        self.publish().await;

        let mut dynamic_variables = HashMap::new();
        if let Some(transcript) = self.session.carried_transcript() {
            // Injected verbatim so the questions persona can quote it back.
            dynamic_variables.insert(
                DECLARATION_TRANSCRIPT_VAR.to_string(),
                transcript.to_string(),
            );
        }

        match self
            .connector
            .connect(ConnectTarget {
                auth,
                dynamic_variables,
            })
            .await
        {
            Ok(remote) => self.attach_remote(remote),
            Err(e) => self.fail_start(&e.to_string()).await,
        }
    }

    /// Stores the live remote session and spawns the pump that stamps its
    /// events with the current generation.
    fn attach_remote(&mut self, mut remote: RemoteSession) {
        if let Some(mut events) = remote.take_events() {
            let tx = self.internal_tx.clone();
            let generation = self.generation;
            self.forwarder = Some(tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    if tx.send(Internal::Remote { generation, event }).await.is_err() {
                        break;
                    }
                }
            }));
        }
        self.remote = Some(remote);
    }

    /// Aborts the current start attempt and parks the session in the
    /// terminal state with the manual-retry affordance. Never retried
    /// automatically.
    async fn fail_start(&mut self, reason: &str) {
        warn!(reason, "Start sequence failed");
        self.teardown_phase();
        self.media.release();
        self.session.mark_retryable();
        self.emit(SessionEvent::Fault(reason.to_string())).await;
        self.publish().await;
    }

    /// Routes the first effective terminate signal; later ones are no-ops
    /// inside `Session::terminate`.
    async fn stop(&mut self, reason: TerminateReason) {
        let Some(termination) = self.end_phase(reason) else {
            return;
        };
        match termination.next {
            AfterTermination::PhaseTransition => {
                // Media stays held across the prompt for the follow-on phase.
                self.publish().await;
                self.emit(SessionEvent::TransitionPrompt).await;
            }
            AfterTermination::Ended => {
                self.media.release();
                self.publish().await;
                if let Some(session_id) = termination.session_id {
                    self.emit(SessionEvent::ReviewPrompt {
                        session_id,
                        kind: self.session.kind(),
                    })
                    .await;
                }
            }
        }
    }

    /// Terminates the session entity and tears the phase runtime down.
    fn end_phase(&mut self, reason: TerminateReason) -> Option<Termination> {
        let termination = self.session.terminate(reason)?;
        self.teardown_phase();
        Some(termination)
    }

    /// Invalidates in-flight signals and drops the phase's clock, remote
    /// session, and pump. Idempotent.
    fn teardown_phase(&mut self) {
        self.generation += 1;
        self.clock.stop();
        if let Some(remote) = self.remote.take() {
            remote.end();
        }
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }

    /// Declaration recorder completion: ends the declaration phase and
    /// advances straight into questions, skipping the transition prompt.
    async fn declaration_complete(&mut self, transcript: String) {
        match self.end_phase(TerminateReason::UserStop) {
            Some(t) if t.next == AfterTermination::PhaseTransition => {
                self.advance(Some(transcript)).await;
            }
            Some(_) => {
                warn!("Declaration completion on a single-phase exercise");
                self.media.release();
                self.publish().await;
            }
            None => warn!("Declaration completion with no phase in flight"),
        }
    }

    /// One-way advance into the questions phase. The restart is delayed and
    /// generation-stamped so a shutdown in between cancels it.
    async fn advance(&mut self, transcript: Option<String>) {
        if let Err(e) = self.session.advance_to_questions(transcript) {
            warn!(error = %e, "Phase advance rejected");
            return;
        }
        self.avatar
            .set_profile(profile_for(self.session.kind(), self.session.phase()));
        self.avatar.show_idle();
        self.publish().await;

        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::time::sleep(PHASE_RESTART_DELAY).await;
            let _ = tx.send(Internal::PhaseRestart { generation }).await;
        });
    }

    async fn finish_here(&mut self) {
        if let Err(e) = self.session.finish_here() {
            warn!(error = %e, "Finish-here rejected");
            return;
        }
        self.media.release();
        self.publish().await;
    }

    fn shutdown(&mut self) {
        let _ = self.session.terminate(TerminateReason::UserStop);
        self.teardown_phase();
        self.media.release();
        let _ = self.snapshot_tx.send(self.session.snapshot());
        info!("Controller shut down");
    }

    /// Pushes the fresh snapshot to the watch channel, and surfaces a
    /// `StatusChanged` event when the lifecycle status itself moved.
    async fn publish(&mut self) {
        let snapshot = self.session.snapshot();
        let status_changed = snapshot.status != self.last_status;
        self.last_status = snapshot.status;
        let _ = self.snapshot_tx.send(snapshot.clone());
        if status_changed {
            self.emit(SessionEvent::StatusChanged(snapshot)).await;
        }
    }

    async fn emit(&self, event: SessionEvent) {
        // A dropped event receiver never stops the controller.
        let _ = self.events.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::RecordingSurface;
    use crate::media::{FakeCaptureBackend, MediaDeviceManager, StreamConstraints, TrackKind};
    use async_trait::async_trait;
    use eloquence_core::agent::Phase;
    use eloquence_core::error::{
        EndpointIssuanceError, RemoteSessionError, ReviewGenerationError, TranscriptFetchError,
    };
    use eloquence_core::transcript::{ReviewArtifact, TranscriptRecord};
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeLink {
        target: ConnectTarget,
        events: mpsc::Sender<RemoteEvent>,
        end_rx: mpsc::Receiver<()>,
    }

    #[derive(Default)]
    struct FakeConnector {
        fail: AtomicBool,
        links: Mutex<Vec<FakeLink>>,
    }

    #[async_trait]
    impl RemoteConnector for FakeConnector {
        async fn connect(&self, target: ConnectTarget) -> Result<RemoteSession, RemoteSessionError> {
            if self.fail.load(Ordering::Acquire) {
                return Err(RemoteSessionError::Connect("refused".into()));
            }
            let (event_tx, event_rx) = mpsc::channel(16);
            let (end_tx, end_rx) = mpsc::channel(1);
            self.links.lock().unwrap().push(FakeLink {
                target,
                events: event_tx,
                end_rx,
            });
            Ok(RemoteSession::from_parts(event_rx, end_tx))
        }
    }

    #[derive(Default)]
    struct FakeEndpoints {
        direct: AtomicBool,
        fail_issue: AtomicBool,
    }

    #[async_trait]
    impl SessionEndpoints for FakeEndpoints {
        async fn issue_endpoint(
            &self,
            kind: AgentKind,
            phase: Phase,
        ) -> Result<Issued, EndpointIssuanceError> {
            if self.fail_issue.load(Ordering::Acquire) {
                return Err(EndpointIssuanceError("503".into()));
            }
            if self.direct.load(Ordering::Acquire) {
                return Ok(Issued::Direct);
            }
            Ok(Issued::Ref(format!("wss://signed.example/{kind}/{phase}")))
        }

        async fn fetch_transcript(
            &self,
            session_id: &str,
            _kind: AgentKind,
        ) -> Result<TranscriptRecord, TranscriptFetchError> {
            Ok(TranscriptRecord {
                session_id: session_id.to_string(),
                text: "transcript".into(),
            })
        }

        async fn generate_review(
            &self,
            _transcript: &str,
            _kind: AgentKind,
        ) -> Result<ReviewArtifact, ReviewGenerationError> {
            Ok(ReviewArtifact(json!({"overall": 4})))
        }
    }

    struct Harness {
        handle: SessionHandle,
        events: mpsc::Receiver<SessionEvent>,
        connector: Arc<FakeConnector>,
        backend: Arc<FakeCaptureBackend>,
        endpoints: Arc<FakeEndpoints>,
    }

    fn full_table() -> DirectAgentTable {
        let mut table = DirectAgentTable::default();
        table.insert(AgentKind::Press, Phase::Conversation, "agent_press");
        table.insert(AgentKind::Assembly, Phase::Conversation, "agent_assembly");
        table.insert(AgentKind::Investors, Phase::Conversation, "agent_investors");
        table.insert(AgentKind::Statement, Phase::Declaration, "agent_decl");
        table.insert(AgentKind::Statement, Phase::Questions, "agent_questions");
        table
    }

    fn harness_with_table(kind: AgentKind, direct_agents: DirectAgentTable) -> Harness {
        let backend = Arc::new(FakeCaptureBackend::new());
        let connector = Arc::new(FakeConnector::default());
        let endpoints = Arc::new(FakeEndpoints::default());
        let surface = Arc::new(RecordingSurface::new());
        let deps = ControllerDeps {
            media: MediaDeviceManager::new(backend.clone(), StreamConstraints::default()),
            connector: connector.clone(),
            endpoints: endpoints.clone(),
            avatar: AvatarPresenter::new(surface, profile_for(kind, kind.initial_phase())),
            direct_agents,
        };
        let (handle, events) = spawn(kind, deps);
        Harness {
            handle,
            events,
            connector,
            backend,
            endpoints,
        }
    }

    fn harness(kind: AgentKind) -> Harness {
        harness_with_table(kind, full_table())
    }

    /// Waits for the n-th remote connect attempt and returns its event
    /// injector.
    async fn wait_link(connector: &FakeConnector, n: usize) -> mpsc::Sender<RemoteEvent> {
        for _ in 0..200 {
            if let Some(link) = connector.links.lock().unwrap().get(n - 1) {
                return link.events.clone();
            }
            tokio::task::yield_now().await;
        }
        panic!("remote connect attempt {n} never happened");
    }

    async fn next_status(events: &mut mpsc::Receiver<SessionEvent>) -> SessionSnapshot {
        loop {
            match events.recv().await.expect("controller alive") {
                SessionEvent::StatusChanged(snapshot) => return snapshot,
                _ => {}
            }
        }
    }

    /// Drives a harness to the `Active` state with the given session id.
    async fn activate(h: &mut Harness, conversation_id: &str) -> mpsc::Sender<RemoteEvent> {
        assert!(h.handle.send(SessionCommand::Start).await);
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::AcquiringMedia
        );
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::Connecting
        );
        let attempts = h.connector.links.lock().unwrap().len();
        let link = wait_link(&h.connector, attempts.max(1)).await;
        link.send(RemoteEvent::Connected {
            conversation_id: conversation_id.to_string(),
        })
        .await
        .unwrap();
        let snapshot = next_status(&mut h.events).await;
        assert_eq!(snapshot.status, SessionStatus::Active);
        link
    }

    async fn settle(h: &mut Harness) {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        assert!(h.events.try_recv().is_err(), "unexpected event pending");
    }

    #[tokio::test(start_paused = true)]
    async fn connect_event_assigns_the_id_and_activates() {
        let mut h = harness(AgentKind::Press);
        activate(&mut h, "conv_1").await;
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.session_id.as_deref(), Some("conv_1"));
        assert_eq!(snapshot.elapsed_secs, 0);
        assert_eq!(snapshot.phase, Phase::Conversation);
    }

    #[tokio::test(start_paused = true)]
    async fn media_denial_degrades_but_the_session_still_activates() {
        let mut h = harness(AgentKind::Press);
        h.backend.fail.store(true, Ordering::Release);
        let link = activate(&mut h, "conv_1").await;
        // No stream was ever issued; the exercise runs camera-disabled.
        assert_eq!(h.backend.live_issued_tracks(), 0);
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.session_id.as_deref(), Some("conv_1"));
        // The degraded session still ticks and terminates normally.
        link.send(RemoteEvent::Disconnected).await.unwrap();
        assert_eq!(next_status(&mut h.events).await.status, SessionStatus::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn signed_endpoint_reference_is_used_when_issued() {
        let mut h = harness(AgentKind::Press);
        activate(&mut h, "conv_1").await;
        let links = h.connector.links.lock().unwrap();
        assert_eq!(
            links[0].target.auth,
            ConnectAuth::EndpointRef("wss://signed.example/press/conversation".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn direct_use_resolves_the_configured_agent_identifier() {
        let mut h = harness(AgentKind::Press);
        h.endpoints.direct.store(true, Ordering::Release);
        activate(&mut h, "conv_1").await;
        let links = h.connector.links.lock().unwrap();
        assert_eq!(
            links[0].target.auth,
            ConnectAuth::AgentId("agent_press".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn issuance_failure_falls_back_to_the_direct_identifier() {
        let mut h = harness(AgentKind::Press);
        h.endpoints.fail_issue.store(true, Ordering::Release);
        activate(&mut h, "conv_1").await;
        let links = h.connector.links.lock().unwrap();
        assert_eq!(
            links[0].target.auth,
            ConnectAuth::AgentId("agent_press".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_direct_identifier_parks_the_session_retryable() {
        let mut h = harness_with_table(AgentKind::Press, DirectAgentTable::default());
        h.endpoints.direct.store(true, Ordering::Release);
        assert!(h.handle.send(SessionCommand::Start).await);
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::AcquiringMedia
        );
        loop {
            match h.events.recv().await.expect("controller alive") {
                SessionEvent::Fault(_) => break,
                _ => {}
            }
        }
        let snapshot = next_status(&mut h.events).await;
        assert_eq!(snapshot.status, SessionStatus::Ended);
        assert!(snapshot.retryable);
        assert_eq!(h.backend.live_issued_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_parks_retryable_and_a_second_start_succeeds() {
        let mut h = harness(AgentKind::Press);
        h.connector.fail.store(true, Ordering::Release);
        assert!(h.handle.send(SessionCommand::Start).await);
        loop {
            match h.events.recv().await.expect("controller alive") {
                SessionEvent::Fault(reason) => {
                    assert!(reason.contains("refused"));
                    break;
                }
                _ => {}
            }
        }
        let snapshot = next_status(&mut h.events).await;
        assert_eq!(snapshot.status, SessionStatus::Ended);
        assert!(snapshot.retryable);

        h.connector.fail.store(false, Ordering::Release);
        activate(&mut h, "conv_2").await;
        assert_eq!(h.handle.snapshot().session_id.as_deref(), Some("conv_2"));
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_advance_elapsed_and_the_boundary_forces_the_stop() {
        let mut h = harness(AgentKind::Press);
        activate(&mut h, "conv_1").await;
        let mut last_elapsed = 0;
        loop {
            match h.events.recv().await.expect("controller alive") {
                SessionEvent::ElapsedTick(elapsed) => {
                    assert_eq!(elapsed, last_elapsed + 1);
                    last_elapsed = elapsed;
                }
                SessionEvent::StatusChanged(snapshot) => {
                    assert_eq!(snapshot.status, SessionStatus::Ended);
                    break;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(last_elapsed, FORCED_STOP_AT_SECS);
        // The forced stop still enters the review flow.
        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::ReviewPrompt {
                session_id: "conv_1".into(),
                kind: AgentKind::Press,
            })
        );
        assert_eq!(h.backend.live_issued_tracks(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn user_stop_releases_media_and_prompts_for_the_review() {
        let mut h = harness(AgentKind::Assembly);
        let link = activate(&mut h, "conv_1").await;
        assert!(h.handle.send(SessionCommand::Stop).await);
        assert_eq!(next_status(&mut h.events).await.status, SessionStatus::Ended);
        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::ReviewPrompt {
                session_id: "conv_1".into(),
                kind: AgentKind::Assembly,
            })
        );
        assert_eq!(h.backend.live_issued_tracks(), 0);
        // The remote end was requested without waiting on teardown.
        assert!(h.connector.links.lock().unwrap()[0].end_rx.try_recv().is_ok());

        // A disconnect arriving after the stop is a stale no-op.
        let _ = link.send(RemoteEvent::Disconnected).await;
        assert!(h.handle.send(SessionCommand::Stop).await);
        settle(&mut h).await;
        assert_eq!(h.handle.snapshot().status, SessionStatus::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_disconnect_terminates_without_user_action() {
        let mut h = harness(AgentKind::Press);
        let link = activate(&mut h, "conv_1").await;
        link.send(RemoteEvent::Disconnected).await.unwrap();
        assert_eq!(next_status(&mut h.events).await.status, SessionStatus::Ended);
        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::ReviewPrompt {
                session_id: "conv_1".into(),
                kind: AgentKind::Press,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stop_before_connect_never_prompts_for_a_review() {
        let mut h = harness(AgentKind::Press);
        assert!(h.handle.send(SessionCommand::Start).await);
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::AcquiringMedia
        );
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::Connecting
        );
        assert!(h.handle.send(SessionCommand::Stop).await);
        assert_eq!(next_status(&mut h.events).await.status, SessionStatus::Ended);
        // No session id was ever assigned, so no review prompt follows.
        settle(&mut h).await;
        assert!(h.handle.snapshot().session_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn speaking_edges_surface_while_active_only() {
        let mut h = harness(AgentKind::Press);
        let link = activate(&mut h, "conv_1").await;
        link.send(RemoteEvent::Message {
            source: crate::remote::MessageSource::Agent,
            agent_speaking: true,
        })
        .await
        .unwrap();
        assert_eq!(h.events.recv().await, Some(SessionEvent::SpeakingChanged(true)));
        // Same level again is not an edge.
        link.send(RemoteEvent::Message {
            source: crate::remote::MessageSource::Agent,
            agent_speaking: true,
        })
        .await
        .unwrap();
        link.send(RemoteEvent::Message {
            source: crate::remote::MessageSource::User,
            agent_speaking: false,
        })
        .await
        .unwrap();
        assert_eq!(h.events.recv().await, Some(SessionEvent::SpeakingChanged(false)));
    }

    #[tokio::test(start_paused = true)]
    async fn declaration_completion_carries_the_transcript_verbatim() {
        let mut h = harness(AgentKind::Statement);
        activate(&mut h, "conv_decl").await;
        assert_eq!(h.handle.snapshot().phase, Phase::Declaration);

        let transcript = "Ma déclaration officielle, mot pour mot.";
        assert!(
            h.handle
                .send(SessionCommand::DeclarationComplete {
                    transcript: transcript.to_string(),
                })
                .await
        );
        let snapshot = next_status(&mut h.events).await;
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(snapshot.phase, Phase::Questions);
        assert_eq!(snapshot.elapsed_secs, 0);
        assert!(snapshot.session_id.is_none());

        // The delayed restart fires on its own and reconnects.
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::AcquiringMedia
        );
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::Connecting
        );
        let link = wait_link(&h.connector, 2).await;
        {
            let links = h.connector.links.lock().unwrap();
            assert_eq!(
                links[1].target.dynamic_variables.get(DECLARATION_TRANSCRIPT_VAR),
                Some(&transcript.to_string())
            );
        }
        link.send(RemoteEvent::Connected {
            conversation_id: "conv_q".into(),
        })
        .await
        .unwrap();
        let snapshot = next_status(&mut h.events).await;
        assert_eq!(snapshot.status, SessionStatus::Active);
        assert_eq!(snapshot.phase, Phase::Questions);
        assert_eq!(snapshot.session_id.as_deref(), Some("conv_q"));

        assert!(h.handle.send(SessionCommand::Stop).await);
        assert_eq!(next_status(&mut h.events).await.status, SessionStatus::Ended);
        assert_eq!(
            h.events.recv().await,
            Some(SessionEvent::ReviewPrompt {
                session_id: "conv_q".into(),
                kind: AgentKind::Statement,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_in_declaration_prompts_and_keeps_the_media() {
        let mut h = harness(AgentKind::Statement);
        activate(&mut h, "conv_decl").await;
        assert!(h.handle.send(SessionCommand::Stop).await);
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::Transitioning
        );
        assert_eq!(h.events.recv().await, Some(SessionEvent::TransitionPrompt));
        // The stream survives the prompt for the follow-on phase.
        assert_eq!(h.backend.live_issued_tracks(), 2);

        assert!(h.handle.send(SessionCommand::AdvanceToQuestions).await);
        let snapshot = next_status(&mut h.events).await;
        assert_eq!(snapshot.phase, Phase::Questions);
        assert_eq!(snapshot.status, SessionStatus::Idle);
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::AcquiringMedia
        );
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::Connecting
        );
        let _link = wait_link(&h.connector, 2).await;
        // No recorded declaration: the carried transcript is present but
        // empty.
        let links = h.connector.links.lock().unwrap();
        assert_eq!(
            links[1].target.dynamic_variables.get(DECLARATION_TRANSCRIPT_VAR),
            Some(&String::new())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn finish_here_ends_with_no_review() {
        let mut h = harness(AgentKind::Statement);
        activate(&mut h, "conv_decl").await;
        assert!(h.handle.send(SessionCommand::Stop).await);
        assert_eq!(
            next_status(&mut h.events).await.status,
            SessionStatus::Transitioning
        );
        assert_eq!(h.events.recv().await, Some(SessionEvent::TransitionPrompt));

        assert!(h.handle.send(SessionCommand::FinishHere).await);
        assert_eq!(next_status(&mut h.events).await.status, SessionStatus::Ended);
        settle(&mut h).await;
        assert_eq!(h.backend.live_issued_tracks(), 0);
        assert_eq!(h.connector.links.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mic_toggle_flips_the_audio_track_in_place() {
        let mut h = harness(AgentKind::Press);
        activate(&mut h, "conv_1").await;
        assert!(h.handle.send(SessionCommand::ToggleMic).await);
        settle(&mut h).await;
        let issued = h.backend.issued.lock().unwrap();
        let audio = issued.iter().find(|t| t.kind() == TrackKind::Audio).unwrap();
        assert!(audio.is_live());
        assert!(!audio.is_enabled());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_every_resource() {
        let mut h = harness(AgentKind::Press);
        activate(&mut h, "conv_1").await;
        assert!(h.handle.send(SessionCommand::Shutdown).await);
        // The event stream closing proves the controller task exited.
        while h.events.recv().await.is_some() {}
        assert_eq!(h.backend.live_issued_tracks(), 0);
        assert!(h.connector.links.lock().unwrap()[0].end_rx.try_recv().is_ok());
        assert!(!h.handle.send(SessionCommand::Start).await);
    }
}
