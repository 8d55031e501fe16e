//! ConvAI realtime WebSocket client.
//!
//! Connects either through a signed endpoint reference (a complete wss URL)
//! or directly with an agent identifier, sends the conversation initiation
//! payload with the dynamic context variables, and pumps inbound protocol
//! events into `RemoteEvent`s from a spawned task.

use super::{ConnectAuth, ConnectTarget, MessageSource, RemoteEvent, RemoteSession};
use eloquence_core::error::RemoteSessionError;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, info, warn};

pub struct ConvaiConnector {
    ws_base: String,
}

impl ConvaiConnector {
    /// `ws_base` is the public conversation endpoint used for direct-agent
    /// connections; signed endpoint references are used as-is.
    pub fn new(ws_base: impl Into<String>) -> Self {
        Self {
            ws_base: ws_base.into(),
        }
    }

    fn url_for(&self, auth: &ConnectAuth) -> String {
        match auth {
            ConnectAuth::EndpointRef(signed_url) => signed_url.clone(),
            ConnectAuth::AgentId(agent_id) => format!("{}?agent_id={}", self.ws_base, agent_id),
        }
    }
}

#[derive(Serialize)]
struct InitiationPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    dynamic_variables: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct InitiationMetadata {
    conversation_id: String,
}

#[derive(Debug, Deserialize)]
struct PingEvent {
    event_id: u64,
}

#[derive(Serialize)]
struct PongPayload {
    #[serde(rename = "type")]
    kind: &'static str,
    event_id: u64,
}

/// Inbound protocol events we care about; everything else is ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundEvent {
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },
    AgentResponse,
    Audio,
    UserTranscript,
    Interruption,
    Ping {
        ping_event: PingEvent,
    },
    #[serde(other)]
    Unknown,
}

fn translate(event: InboundEvent) -> Option<RemoteEvent> {
    match event {
        InboundEvent::ConversationInitiationMetadata {
            conversation_initiation_metadata_event: meta,
        } => Some(RemoteEvent::Connected {
            conversation_id: meta.conversation_id,
        }),
        InboundEvent::AgentResponse | InboundEvent::Audio => Some(RemoteEvent::Message {
            source: MessageSource::Agent,
            agent_speaking: true,
        }),
        InboundEvent::Interruption => Some(RemoteEvent::Message {
            source: MessageSource::Agent,
            agent_speaking: false,
        }),
        InboundEvent::UserTranscript => Some(RemoteEvent::Message {
            source: MessageSource::User,
            agent_speaking: false,
        }),
        InboundEvent::Ping { .. } | InboundEvent::Unknown => None,
    }
}

#[async_trait::async_trait]
impl super::RemoteConnector for ConvaiConnector {
    async fn connect(&self, target: ConnectTarget) -> Result<RemoteSession, RemoteSessionError> {
        let url = self.url_for(&target.auth);
        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RemoteSessionError::Connect(e.to_string()))?;
        info!("Connected to ConvAI realtime endpoint");
        let (mut ws_tx, mut ws_rx) = ws.split();

        let initiation = serde_json::to_string(&InitiationPayload {
            kind: "conversation_initiation_client_data",
            dynamic_variables: &target.dynamic_variables,
        })
        .map_err(|e| RemoteSessionError::Connect(e.to_string()))?;
        ws_tx
            .send(WsMessage::Text(initiation.into()))
            .await
            .map_err(|e| RemoteSessionError::Connect(e.to_string()))?;

        let (event_tx, event_rx) = mpsc::channel(64);
        let (end_tx, mut end_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    // An explicit end request, or the session handle being
                    // dropped, both close the connection.
                    _ = end_rx.recv() => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                    msg = ws_rx.next() => match msg {
                        Some(Ok(WsMessage::Text(text))) => {
                            match serde_json::from_str::<InboundEvent>(&text) {
                                Ok(InboundEvent::Ping { ping_event }) => {
                                    let pong = PongPayload { kind: "pong", event_id: ping_event.event_id };
                                    if let Ok(json) = serde_json::to_string(&pong) {
                                        let _ = ws_tx.send(WsMessage::Text(json.into())).await;
                                    }
                                }
                                Ok(event) => {
                                    if let Some(remote_event) = translate(event) {
                                        if event_tx.send(remote_event).await.is_err() {
                                            break;
                                        }
                                    }
                                }
                                Err(e) => debug!(error = %e, "Ignoring unparseable inbound event"),
                            }
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            let _ = event_tx.send(RemoteEvent::Disconnected).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "ConvAI connection failed");
                            let _ = event_tx.send(RemoteEvent::Failed(e.to_string())).await;
                            break;
                        }
                    },
                }
            }
            debug!("ConvAI pump task finished");
        });

        Ok(RemoteSession::from_parts(event_rx, end_tx))
    }
}
