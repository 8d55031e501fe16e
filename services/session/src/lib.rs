//! Eloquence Session Orchestrator
//!
//! This library drives one speaking-practice exercise end-to-end. It is
//! structured into submodules for clarity:
//!
//! - `config`: environment-driven configuration, including the static
//!   classification-to-agent-identifier table.
//! - `media`: camera/microphone stream ownership and in-place toggling.
//! - `clock`: the per-session elapsed clock with the 15-minute ceiling.
//! - `avatar`: speaking-edge driven looping video selection with debounced
//!   crossfade.
//! - `remote`: the realtime remote session abstraction and its ConvAI
//!   WebSocket implementation.
//! - `endpoints`: the issuance, transcript, and review HTTP collaborators.
//! - `relay`: the post-session transcript-and-review pipeline.
//! - `controller`: the session controller composing all of the above into
//!   one phase state machine per exercise.

pub mod avatar;
pub mod clock;
pub mod config;
pub mod controller;
pub mod endpoints;
pub mod media;
pub mod relay;
pub mod remote;
