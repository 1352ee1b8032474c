//! Multipart upload sessions.
//!
//! ```text
//! initiate ──> Initiated ──part url──> PartUrlIssued ──part url──┐
//!                  │                      │   ^                  │
//!                  │                      │   └──────────────────┘
//!                  │                      ├──complete──> Completed
//!                  └───────abort──────────┴──abort─────> Aborted
//! ```
//!
//! Sessions are keyed by `(storage key, upload id)`. Terminal sessions are
//! dropped from the table, so a second complete or abort reports `NotFound`.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::debug;

use crate::storage::CompletedPart;
use crate::{CabinetError, Result};

/// Lifecycle state of a multipart session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Session created; no part URL issued yet.
    Initiated,
    /// At least one part URL has been handed out.
    PartUrlIssued,
    /// Parts assembled into the final object.
    Completed,
    /// Session discarded.
    Aborted,
}

/// Control-plane call made against a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A part URL is requested.
    IssuePart,
    /// The parts are submitted for assembly.
    Complete,
    /// The upload is discarded.
    Abort,
}

impl SessionState {
    /// State reached by applying `event`, or `InvalidOperation`.
    pub fn apply(self, event: SessionEvent) -> Result<SessionState> {
        use SessionEvent::*;
        use SessionState::*;

        match (self, event) {
            (Initiated | PartUrlIssued, IssuePart) => Ok(PartUrlIssued),
            (PartUrlIssued, Complete) => Ok(Completed),
            (Initiated | PartUrlIssued, Abort) => Ok(Aborted),
            (Initiated, Complete) => Err(CabinetError::InvalidOperation(
                "no part URL has been issued for this upload".to_string(),
            )),
            (state, event) => Err(CabinetError::InvalidOperation(format!(
                "cannot {event} an upload that is {state}"
            ))),
        }
    }

    /// Whether no further calls are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Initiated => "initiated",
            SessionState::PartUrlIssued => "part_url_issued",
            SessionState::Completed => "completed",
            SessionState::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionEvent::IssuePart => "issue a part URL for",
            SessionEvent::Complete => "complete",
            SessionEvent::Abort => "abort",
        };
        write!(f, "{s}")
    }
}

/// One tracked multipart session.
#[derive(Debug, Clone)]
pub struct Session {
    /// Owner that initiated the upload.
    pub owner_id: String,
    /// Key the assembled object is stored under.
    pub storage_key: String,
    /// Gateway identifier of the upload.
    pub upload_id: String,
    /// MIME type declared at initiation.
    pub content_type: String,
    /// Current protocol state.
    pub state: SessionState,
    /// Part numbers a URL has been issued for.
    pub issued_parts: BTreeSet<u32>,
    /// When the upload was initiated.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// A freshly initiated session.
    pub fn new(
        owner_id: impl Into<String>,
        storage_key: impl Into<String>,
        upload_id: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self {
            owner_id: owner_id.into(),
            storage_key: storage_key.into(),
            upload_id: upload_id.into(),
            content_type: content_type.into(),
            state: SessionState::Initiated,
            issued_parts: BTreeSet::new(),
            created_at: Utc::now(),
        }
    }
}

type SessionKey = (String, String);

/// In-memory table of open multipart sessions.
#[derive(Debug, Default)]
pub struct MultipartSessions {
    sessions: Mutex<HashMap<SessionKey, Session>>,
}

impl MultipartSessions {
    /// An empty session table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly initiated session.
    pub async fn open(&self, session: Session) {
        let key = (session.storage_key.clone(), session.upload_id.clone());
        self.sessions.lock().await.insert(key, session);
    }

    /// Current state of a session, if it is still open.
    pub async fn state(&self, storage_key: &str, upload_id: &str) -> Option<SessionState> {
        self.sessions
            .lock()
            .await
            .get(&(storage_key.to_string(), upload_id.to_string()))
            .map(|s| s.state)
    }

    /// Number of open sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Check that the owner may apply `event` to the session.
    pub async fn check(
        &self,
        owner_id: &str,
        storage_key: &str,
        upload_id: &str,
        event: SessionEvent,
    ) -> Result<SessionState> {
        let sessions = self.sessions.lock().await;
        let session = lookup(&sessions, owner_id, storage_key, upload_id)?;
        session.state.apply(event)
    }

    /// Record that a part URL was handed out.
    pub async fn record_part(
        &self,
        owner_id: &str,
        storage_key: &str,
        upload_id: &str,
        part_number: u32,
    ) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        lookup(&sessions, owner_id, storage_key, upload_id)?;

        let key = (storage_key.to_string(), upload_id.to_string());
        if let Some(session) = sessions.get_mut(&key) {
            session.state = session.state.apply(SessionEvent::IssuePart)?;
            session.issued_parts.insert(part_number);
        }
        Ok(())
    }

    /// Remove a session that is about to be completed.
    ///
    /// Every listed part must have had a URL issued. On gateway failure the
    /// caller hands the session back through [`restore`](Self::restore).
    pub async fn take_for_completion(
        &self,
        owner_id: &str,
        storage_key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = lookup(&sessions, owner_id, storage_key, upload_id)?;
        let next = session.state.apply(SessionEvent::Complete)?;

        if let Some(part) = parts
            .iter()
            .find(|p| !session.issued_parts.contains(&p.part_number))
        {
            return Err(CabinetError::InvalidOperation(format!(
                "part {} was never issued for this upload",
                part.part_number
            )));
        }

        debug!("Upload {} {} -> {}", upload_id, session.state, next);
        take(&mut sessions, storage_key, upload_id)
    }

    /// Remove a session that is about to be aborted.
    pub async fn take_for_abort(
        &self,
        owner_id: &str,
        storage_key: &str,
        upload_id: &str,
    ) -> Result<Session> {
        let mut sessions = self.sessions.lock().await;
        let session = lookup(&sessions, owner_id, storage_key, upload_id)?;
        let next = session.state.apply(SessionEvent::Abort)?;

        debug!("Upload {} {} -> {}", upload_id, session.state, next);
        take(&mut sessions, storage_key, upload_id)
    }

    /// Put back a session whose terminal call failed at the gateway.
    pub async fn restore(&self, session: Session) {
        self.open(session).await;
    }

    /// Remove and return sessions started before `cutoff`.
    pub async fn expire(&self, cutoff: DateTime<Utc>) -> Vec<Session> {
        let mut sessions = self.sessions.lock().await;
        let stale: Vec<SessionKey> = sessions
            .iter()
            .filter(|(_, s)| s.created_at < cutoff)
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|k| sessions.remove(&k))
            .collect()
    }
}

/// Find a session visible to the owner; foreign sessions look missing.
fn lookup<'a>(
    sessions: &'a HashMap<SessionKey, Session>,
    owner_id: &str,
    storage_key: &str,
    upload_id: &str,
) -> Result<&'a Session> {
    match sessions.get(&(storage_key.to_string(), upload_id.to_string())) {
        Some(session) if session.owner_id == owner_id => Ok(session),
        _ => Err(CabinetError::NotFound("multipart upload".to_string())),
    }
}

fn take(
    sessions: &mut HashMap<SessionKey, Session>,
    storage_key: &str,
    upload_id: &str,
) -> Result<Session> {
    sessions
        .remove(&(storage_key.to_string(), upload_id.to_string()))
        .ok_or_else(|| CabinetError::NotFound("multipart upload".to_string()))
}
