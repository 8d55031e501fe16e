//! Speaking-state edge detection.
//!
//! The remote session is the source of truth for whether the agent is
//! speaking; this type only turns the raw signal into edges so downstream
//! consumers (the avatar presenter) react to transitions, not levels.

use std::time::Instant;

/// An observed transition of the agent's speaking state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakingEdge {
    Started,
    Stopped,
}

/// Current speaking state of the remote agent.
#[derive(Debug, Clone)]
pub struct SpeakingState {
    pub is_speaking: bool,
    pub last_changed_at: Instant,
}

impl SpeakingState {
    pub fn new() -> Self {
        Self {
            is_speaking: false,
            last_changed_at: Instant::now(),
        }
    }

    /// Feeds a raw speaking signal; returns an edge only when the state
    /// actually changed.
    pub fn observe(&mut self, speaking: bool) -> Option<SpeakingEdge> {
        if speaking == self.is_speaking {
            return None;
        }
        self.is_speaking = speaking;
        self.last_changed_at = Instant::now();
        Some(if speaking {
            SpeakingEdge::Started
        } else {
            SpeakingEdge::Stopped
        })
    }
}

impl Default for SpeakingState {
    fn default() -> Self {
        Self::new()
    }
}
