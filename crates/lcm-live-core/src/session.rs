//! Session model: id, bound generation parameters and the frame slot.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::Frame;
use crate::params::GenerationParams;
use crate::slot::FrameSlot;

/// Server-issued session identifier. Never chosen by the client.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.hyphenated().fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// One client's generation context.
///
/// Owned by the [`SessionRegistry`](crate::registry::SessionRegistry); the
/// ingest handler and render loop only ever hold a shared reference.
pub struct Session {
    id: SessionId,
    params: GenerationParams,
    slot: FrameSlot<Frame>,
    created_at: Instant,
    started_at: DateTime<Utc>,
    frames_received: AtomicU64,
}

impl Session {
    pub fn new(id: SessionId, params: GenerationParams) -> Self {
        Self::with_created_at(id, params, Instant::now())
    }

    /// Build a session whose timeout clock started at `created_at`.
    pub fn with_created_at(id: SessionId, params: GenerationParams, created_at: Instant) -> Self {
        Self {
            id,
            params,
            slot: FrameSlot::new(),
            created_at,
            started_at: Utc::now(),
            frames_received: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn params(&self) -> &GenerationParams {
        &self.params
    }

    pub fn slot(&self) -> &FrameSlot<Frame> {
        &self.slot
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Instant at which the session outlives `timeout`. `None` if there is
    /// no timeout or the deadline is beyond what `Instant` can represent.
    pub fn deadline(&self, timeout: Option<Duration>) -> Option<Instant> {
        timeout.and_then(|limit| self.created_at.checked_add(limit))
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the session has outlived `timeout`. `None` disables the check.
    pub fn is_expired(&self, timeout: Option<Duration>) -> bool {
        timeout.is_some_and(|limit| self.elapsed() > limit)
    }

    /// Allocate the sequence number for the next inbound frame.
    pub fn next_frame_seq(&self) -> u64 {
        self.frames_received.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("started_at", &self.started_at)
            .field("frames_received", &self.frames_received())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GenerationParams {
        GenerationParams {
            seed: 42,
            prompt: "portrait".into(),
            strength: 0.5,
            guidance_scale: 8.0,
        }
    }

    #[test]
    fn test_session_id_roundtrip() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn test_session_ids_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }

    #[test]
    fn test_expiry() {
        let old = Instant::now() - Duration::from_secs(5);
        let session = Session::with_created_at(SessionId::new(), params(), old);
        assert!(session.is_expired(Some(Duration::from_secs(1))));
        assert!(!session.is_expired(Some(Duration::from_secs(60))));
        assert!(!session.is_expired(None));
        assert_eq!(session.deadline(Some(Duration::from_secs(1))), Some(old + Duration::from_secs(1)));
        assert_eq!(session.deadline(None), None);
    }

    #[test]
    fn test_unrepresentable_deadline() {
        let session = Session::new(SessionId::new(), params());
        let huge = Some(Duration::from_secs_f64(1e19));
        assert_eq!(session.deadline(huge), None);
        assert_eq!(session.deadline(Some(Duration::MAX)), None);
        assert!(!session.is_expired(huge));
    }

    #[test]
    fn test_frame_seq_increments() {
        let session = Session::new(SessionId::new(), params());
        assert_eq!(session.next_frame_seq(), 1);
        assert_eq!(session.next_frame_seq(), 2);
        assert_eq!(session.frames_received(), 2);
    }
}
