//! Ingest WebSocket lifecycle: admission, parameter handshake and the frame
//! loop that feeds a session's slot.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use lcm_live_core::params::ParamsError;
use lcm_live_core::protocol::StatusMessage;
use lcm_live_core::{Frame, GenerationParams, PutOutcome, Session, SessionId, SessionRegistry};

use crate::state::GatewayState;

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Terminal state of an ingest connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// The client went away, or the session was torn down elsewhere.
    Closed,
    /// Refused at admission or during the parameter handshake.
    Rejected,
    /// The session outlived the configured timeout.
    TimedOut,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Removes the session from the registry when the handler returns, errors
/// out, or its task is cancelled.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    id: SessionId,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.id);
    }
}

enum HandshakeError {
    Disconnected,
    Invalid(ParamsError),
}

/// Handle a new ingest WebSocket connection.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket) {
    let outcome = run_connection(&state, ws).await;
    debug!(outcome = outcome.as_str(), live = state.registry.count(), "Ingest connection finished");
}

async fn run_connection(state: &GatewayState, ws: WebSocket) -> IngestOutcome {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let id = match state.registry.reserve() {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %e, capacity = state.registry.capacity(), "Rejecting connection");
            #[cfg(feature = "metrics")]
            crate::metrics::record_session_rejected("server_full");
            send_status(&mut ws_tx, &StatusMessage::server_full()).await;
            close(&mut ws_tx).await;
            return IngestOutcome::Rejected;
        }
    };
    let _guard = SessionGuard {
        registry: state.registry.clone(),
        id,
    };

    if !send_status(&mut ws_tx, &StatusMessage::connected(id)).await {
        return IngestOutcome::Closed;
    }
    info!(session_id = %id, "Client connected");

    let handshake = tokio::time::timeout(state.config.handshake_timeout(), receive_params(&mut ws_rx)).await;
    let params = match handshake {
        Ok(Ok(params)) => params,
        Ok(Err(HandshakeError::Disconnected)) => {
            debug!(session_id = %id, "Client left before sending parameters");
            return IngestOutcome::Closed;
        }
        Ok(Err(HandshakeError::Invalid(e))) => {
            warn!(session_id = %id, error = %e, "Invalid session parameters");
            #[cfg(feature = "metrics")]
            crate::metrics::record_session_rejected("invalid_params");
            let notice = StatusMessage::error(format!("Invalid parameters: {e}"));
            send_status(&mut ws_tx, &notice).await;
            close(&mut ws_tx).await;
            return IngestOutcome::Rejected;
        }
        Err(_) => {
            warn!(session_id = %id, "Timed out waiting for session parameters");
            #[cfg(feature = "metrics")]
            crate::metrics::record_session_rejected("handshake_timeout");
            let notice = StatusMessage::error("Timed out waiting for parameters");
            send_status(&mut ws_tx, &notice).await;
            close(&mut ws_tx).await;
            return IngestOutcome::Rejected;
        }
    };

    let session = match state.registry.activate(id, params) {
        Ok(session) => session,
        Err(e) => {
            warn!(session_id = %id, error = %e, "Session could not be activated");
            close(&mut ws_tx).await;
            return IngestOutcome::Rejected;
        }
    };

    #[cfg(feature = "metrics")]
    crate::metrics::record_session_admitted();

    let outcome = ingest_frames(&session, state.config.session_timeout(), &mut ws_tx, &mut ws_rx).await;

    #[cfg(feature = "metrics")]
    crate::metrics::record_session_closed(outcome.as_str());
    info!(
        session_id = %id,
        outcome = outcome.as_str(),
        frames = session.frames_received(),
        started_at = %session.started_at(),
        elapsed_ms = session.elapsed().as_millis() as u64,
        "Session ended"
    );
    outcome
}

/// Wait for the client's parameter message. Ping/pong is handled by axum.
async fn receive_params(ws_rx: &mut WsReceiver) -> Result<GenerationParams, HandshakeError> {
    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(data)) => String::from_utf8_lossy(&data).into_owned(),
            Ok(Message::Close(_)) => return Err(HandshakeError::Disconnected),
            Ok(_) => continue,
            Err(e) => {
                debug!(error = %e, "WebSocket error during handshake");
                return Err(HandshakeError::Disconnected);
            }
        };
        return GenerationParams::from_json(&text).map_err(HandshakeError::Invalid);
    }
    Err(HandshakeError::Disconnected)
}

/// Feed binary frames into the session's slot until the client leaves, the
/// slot is closed, or the session times out.
async fn ingest_frames(
    session: &Session,
    timeout: Option<Duration>,
    ws_tx: &mut WsSender,
    ws_rx: &mut WsReceiver,
) -> IngestOutcome {
    let id = session.id();
    let deadline = session.deadline(timeout).map(tokio::time::Instant::from_std);
    let mut expiry = std::pin::pin!(async move {
        match deadline {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    });

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            () = &mut expiry => return time_out(id, ws_tx).await,
        };

        match msg {
            Some(Ok(Message::Binary(data))) => {
                let seq = session.next_frame_seq();
                let frame = match tokio::task::spawn_blocking(move || Frame::decode(&data, seq)).await {
                    Ok(Ok(frame)) => frame,
                    Ok(Err(e)) => {
                        warn!(session_id = %id, seq, error = %e, "Dropping undecodable frame");
                        #[cfg(feature = "metrics")]
                        crate::metrics::record_decode_error();
                        continue;
                    }
                    Err(e) => {
                        error!(session_id = %id, seq, error = %e, "Decode task failed");
                        continue;
                    }
                };

                match session.slot().put(frame) {
                    PutOutcome::Closed => {
                        debug!(session_id = %id, "Session slot closed, ending ingest");
                        return IngestOutcome::Closed;
                    }
                    outcome => {
                        #[cfg(feature = "metrics")]
                        crate::metrics::record_frame_ingested(outcome == PutOutcome::Replaced);
                        if outcome == PutOutcome::Replaced {
                            debug!(session_id = %id, seq, "Unconsumed frame replaced");
                        }
                    }
                }

                if session.is_expired(timeout) {
                    return time_out(id, ws_tx).await;
                }
            }
            Some(Ok(Message::Text(text))) => {
                debug!(session_id = %id, len = text.len(), "Ignoring text message while streaming");
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(session_id = %id, "Client closed connection");
                return IngestOutcome::Closed;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(session_id = %id, error = %e, "WebSocket error");
                return IngestOutcome::Closed;
            }
        }
    }
}

async fn time_out(id: SessionId, ws_tx: &mut WsSender) -> IngestOutcome {
    info!(session_id = %id, "Session timed out");
    send_status(ws_tx, &StatusMessage::timeout(id)).await;
    close(ws_tx).await;
    IngestOutcome::TimedOut
}

/// Send a status notice. Returns false if the client is gone.
async fn send_status(ws_tx: &mut WsSender, notice: &StatusMessage) -> bool {
    let text = match serde_json::to_string(notice) {
        Ok(text) => text,
        Err(e) => {
            error!(error = %e, "Failed to serialize status message");
            return false;
        }
    };
    ws_tx.send(Message::Text(text.into())).await.is_ok()
}

async fn close(ws_tx: &mut WsSender) {
    let _ = ws_tx.send(Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_labels() {
        assert_eq!(IngestOutcome::Closed.as_str(), "closed");
        assert_eq!(IngestOutcome::Rejected.as_str(), "rejected");
        assert_eq!(IngestOutcome::TimedOut.as_str(), "timed_out");
    }

    #[test]
    fn test_guard_removes_session() {
        let registry = Arc::new(SessionRegistry::new(1));
        let id = registry.reserve().unwrap();
        {
            let _guard = SessionGuard {
                registry: registry.clone(),
                id,
            };
            assert_eq!(registry.count(), 1);
        }
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_guard_runs_on_task_abort() {
        let registry = Arc::new(SessionRegistry::new(1));
        let id = registry.reserve().unwrap();
        let session = registry
            .activate(
                id,
                GenerationParams {
                    seed: 1,
                    prompt: "x".into(),
                    strength: 0.5,
                    guidance_scale: 1.0,
                },
            )
            .unwrap();

        let task = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let _guard = SessionGuard { registry, id };
                std::future::pending::<()>().await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.abort();
        let _ = task.await;

        assert_eq!(registry.count(), 0);
        assert!(session.slot().is_closed());
    }
}
