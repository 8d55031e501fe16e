//! The realtime remote session abstraction.
//!
//! The controller only ever sees `RemoteConnector` and the event stream of a
//! `RemoteSession`; the ConvAI WebSocket implementation lives in `convai`.

pub mod convai;

use async_trait::async_trait;
use eloquence_core::error::RemoteSessionError;
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Dynamic context variable carrying the declaration transcript, injected
/// verbatim into the questions-phase session at connect time.
pub const DECLARATION_TRANSCRIPT_VAR: &str = "declaration_transcript";

/// How a connection is authorized: a short-lived signed endpoint reference,
/// or the statically configured direct agent identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectAuth {
    EndpointRef(String),
    AgentId(String),
}

#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub auth: ConnectAuth,
    /// Key-value pairs injected into the remote session's prompt context.
    pub dynamic_variables: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    Agent,
    User,
}

/// Events a live remote session emits toward the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    /// The remote confirmed the session; the id is assigned here and only
    /// here.
    Connected { conversation_id: String },
    /// A message arrived; carries the remote's own speaking-state signal.
    Message {
        source: MessageSource,
        agent_speaking: bool,
    },
    Disconnected,
    Failed(String),
}

/// A live remote session: its event stream plus a fire-and-forget end
/// switch. Dropping the session also signals the connection task to close.
pub struct RemoteSession {
    events: Option<mpsc::Receiver<RemoteEvent>>,
    end_tx: mpsc::Sender<()>,
}

impl RemoteSession {
    pub fn from_parts(events: mpsc::Receiver<RemoteEvent>, end_tx: mpsc::Sender<()>) -> Self {
        Self {
            events: Some(events),
            end_tx,
        }
    }

    /// Hands the event stream to whoever pumps it. Yields once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<RemoteEvent>> {
        self.events.take()
    }

    /// Requests the remote session to end without waiting on its teardown
    /// latency. The terminate transition never blocks on this.
    pub fn end(&self) {
        let _ = self.end_tx.try_send(());
    }
}

#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, target: ConnectTarget) -> Result<RemoteSession, RemoteSessionError>;
}
