//! JSON messages exchanged with browser clients.
//!
//! The ingest WebSocket carries [`StatusMessage`]s from server to client; the
//! client answers with a single [`GenerationParams`](crate::GenerationParams)
//! message followed by binary frames.

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

pub const MSG_CONNECTED: &str = "Connected";
pub const MSG_SERVER_FULL: &str = "Server is full";
pub const MSG_SESSION_ENDED: &str = "Your session has ended";
pub const MSG_SESSION_NOT_FOUND: &str = "Session not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
    Timeout,
}

/// Server → client status notice on the ingest connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: Status,
    pub message: String,
    #[serde(rename = "userId", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<SessionId>,
}

impl StatusMessage {
    pub fn connected(id: SessionId) -> Self {
        Self {
            status: Status::Success,
            message: MSG_CONNECTED.into(),
            user_id: Some(id),
        }
    }

    pub fn server_full() -> Self {
        Self::error(MSG_SERVER_FULL)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: message.into(),
            user_id: None,
        }
    }

    pub fn timeout(id: SessionId) -> Self {
        Self {
            status: Status::Timeout,
            message: MSG_SESSION_ENDED.into(),
            user_id: Some(id),
        }
    }
}

/// Response body of `GET /queue_size`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSize {
    pub queue_size: usize,
}
