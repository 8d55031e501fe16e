//! The per-exercise session entity and its phase/status state machine.
//!
//! All transitions are pure so the orchestrator's concurrency can be tested
//! separately from the rules. The single `terminate` entry point makes the
//! race between user stop, remote disconnect, and the time-limit tick
//! harmless: whichever signal arrives first wins, the rest are no-ops.

use crate::agent::{AgentKind, Phase};
use crate::speaking::{SpeakingEdge, SpeakingState};
use serde::Serialize;
use tracing::info;

/// Lifecycle status of the session driving the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    AcquiringMedia,
    Connecting,
    Active,
    Transitioning,
    Ended,
}

/// Which signal drove the terminate transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateReason {
    UserStop,
    RemoteDisconnect,
    /// The 15-minute ceiling was reached; the ended path still proceeds to
    /// the review prompt even though the user did not click stop.
    TimeLimit,
}

/// What the orchestrator does once a phase has terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterTermination {
    /// The exercise is over.
    Ended,
    /// Two-phase exercise: the declaration phase ended, the questions phase
    /// may follow.
    PhaseTransition,
}

/// Outcome of the first (and only effective) terminate signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Termination {
    pub reason: TerminateReason,
    /// The session id known at termination time. `None` means no remote
    /// connect was ever observed, and no review flow may be entered.
    pub session_id: Option<String>,
    pub next: AfterTermination,
}

/// A transition was requested from a state that does not permit it.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("start is not available while {0:?}")]
    StartUnavailable(SessionStatus),
    #[error("expected status {expected:?}, found {found:?}")]
    UnexpectedStatus {
        expected: SessionStatus,
        found: SessionStatus,
    },
    #[error("phase advance requires a two-phase exercise in the transitioning state")]
    AdvanceUnavailable,
}

/// Read-only view of the session published to the embedding UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub kind: AgentKind,
    pub phase: Phase,
    pub status: SessionStatus,
    pub session_id: Option<String>,
    pub elapsed_secs: u32,
    pub agent_speaking: bool,
    pub retryable: bool,
}

/// Exactly one `Session` is live per exercise instance.
#[derive(Debug)]
pub struct Session {
    kind: AgentKind,
    phase: Phase,
    status: SessionStatus,
    /// Assigned only after the remote connect event, never optimistically.
    id: Option<String>,
    elapsed_secs: u32,
    /// Set iff the exercise is two-phase and the phase is `Questions`.
    carried_transcript: Option<String>,
    retryable: bool,
    speaking: SpeakingState,
}

impl Session {
    pub fn new(kind: AgentKind) -> Self {
        Self {
            kind,
            phase: kind.initial_phase(),
            status: SessionStatus::Idle,
            id: None,
            elapsed_secs: 0,
            carried_transcript: None,
            retryable: false,
            speaking: SpeakingState::new(),
        }
    }

    pub fn kind(&self) -> AgentKind {
        self.kind
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn elapsed_secs(&self) -> u32 {
        self.elapsed_secs
    }

    pub fn carried_transcript(&self) -> Option<&str> {
        self.carried_transcript.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.is_speaking
    }

    /// Gates `start()`: permitted only from `Idle` or a retry-enabled
    /// `Ended`. Later `start()` calls while a sequence is in flight
    /// (acquiring, connecting, active) are rejected, keeping at most one
    /// start sequence alive.
    pub fn begin_start(&mut self) -> Result<(), TransitionError> {
        match self.status {
            SessionStatus::Idle => {}
            SessionStatus::Ended if self.retryable => {}
            other => return Err(TransitionError::StartUnavailable(other)),
        }
        self.retryable = false;
        self.id = None;
        self.status = SessionStatus::AcquiringMedia;
        Ok(())
    }

    /// Media is held; the endpoint reference has been resolved and the
    /// remote connect is about to be attempted.
    pub fn begin_connect(&mut self) -> Result<(), TransitionError> {
        if self.status != SessionStatus::AcquiringMedia {
            return Err(TransitionError::UnexpectedStatus {
                expected: SessionStatus::AcquiringMedia,
                found: self.status,
            });
        }
        self.status = SessionStatus::Connecting;
        Ok(())
    }

    /// The remote connect event was observed: the session becomes `Active`,
    /// the id is captured, and the phase clock restarts from zero.
    pub fn connected(&mut self, id: String) -> Result<(), TransitionError> {
        if self.status != SessionStatus::Connecting {
            return Err(TransitionError::UnexpectedStatus {
                expected: SessionStatus::Connecting,
                found: self.status,
            });
        }
        info!(session_id = %id, phase = %self.phase, "Session active");
        self.id = Some(id);
        self.status = SessionStatus::Active;
        self.elapsed_secs = 0;
        Ok(())
    }

    /// Advances the elapsed clock by one second while `Active`. Elapsed time
    /// is monotone; it only resets via a full phase reset.
    pub fn tick(&mut self) -> Option<u32> {
        if self.status != SessionStatus::Active {
            return None;
        }
        self.elapsed_secs += 1;
        Some(self.elapsed_secs)
    }

    /// Feeds the remote agent's speaking signal; edges are reported only
    /// while the session is `Active`.
    pub fn observe_speaking(&mut self, speaking: bool) -> Option<SpeakingEdge> {
        if self.status != SessionStatus::Active {
            return None;
        }
        self.speaking.observe(speaking)
    }

    /// The single idempotent terminate entry point. Only the first of
    /// {user stop, remote disconnect, time limit} effects a state change;
    /// later signals return `None`.
    pub fn terminate(&mut self, reason: TerminateReason) -> Option<Termination> {
        match self.status {
            SessionStatus::AcquiringMedia | SessionStatus::Connecting | SessionStatus::Active => {}
            _ => return None,
        }
        let next = if self.kind.is_two_phase() && self.phase == Phase::Declaration {
            self.status = SessionStatus::Transitioning;
            AfterTermination::PhaseTransition
        } else {
            self.status = SessionStatus::Ended;
            AfterTermination::Ended
        };
        let _ = self.speaking.observe(false);
        info!(?reason, ?next, elapsed = self.elapsed_secs, "Session terminated");
        Some(Termination {
            reason,
            session_id: self.id.clone(),
            next,
        })
    }

    /// One-directional phase advance for the two-phase exercise. Stores the
    /// declaration transcript on the entity itself and resets the session so
    /// `start()` may run again for the questions phase.
    pub fn advance_to_questions(
        &mut self,
        transcript: Option<String>,
    ) -> Result<(), TransitionError> {
        if !self.kind.is_two_phase()
            || self.phase != Phase::Declaration
            || self.status != SessionStatus::Transitioning
        {
            return Err(TransitionError::AdvanceUnavailable);
        }
        self.carried_transcript = Some(transcript.unwrap_or_default());
        self.phase = Phase::Questions;
        self.status = SessionStatus::Idle;
        self.elapsed_secs = 0;
        self.id = None;
        info!("Advanced to the questions phase");
        Ok(())
    }

    /// Declines the questions phase at the transition prompt. The exercise
    /// ends and no review is produced for the partial transcript.
    pub fn finish_here(&mut self) -> Result<(), TransitionError> {
        if self.status != SessionStatus::Transitioning {
            return Err(TransitionError::UnexpectedStatus {
                expected: SessionStatus::Transitioning,
                found: self.status,
            });
        }
        self.status = SessionStatus::Ended;
        Ok(())
    }

    /// Parks the session in a terminal non-active state with the manual
    /// retry affordance enabled. No automatic retry is ever attempted.
    pub fn mark_retryable(&mut self) {
        self.status = SessionStatus::Ended;
        self.retryable = true;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            kind: self.kind,
            phase: self.phase,
            status: self.status,
            session_id: self.id.clone(),
            elapsed_secs: self.elapsed_secs,
            agent_speaking: self.speaking.is_speaking,
            retryable: self.retryable,
        }
    }
}
