//! Eloquence Core
//!
//! Domain model for timed, simulated speaking-practice exercises. This crate
//! holds the pure, I/O-free pieces of the system: agent classifications and
//! their presentation profiles, the per-exercise session entity with its
//! phase/status state machine, speaking-state edge detection, transcript and
//! review artifact types, and the error taxonomy shared by the orchestrator.
//!
//! The orchestration itself (media devices, realtime connections, timers,
//! review pipeline) lives in the `eloquence-session` service crate.

pub mod agent;
pub mod error;
pub mod session;
pub mod speaking;
pub mod transcript;
