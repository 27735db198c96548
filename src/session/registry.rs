//! Mapping of caller conversation ids onto Claude CLI session ids.
//!
//! The CLI persists conversation state under `~/.claude/` on its own; this
//! registry only remembers which CLI session belongs to which external
//! conversation. Mappings live in memory and are lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::SessionHint;

/// Header carrying the caller's conversation id.
pub const SESSION_HEADER: &str = "x-session-id";

/// One known external conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    /// Session id handed to the CLI via `--session-id` / `--resume`.
    pub resume_token: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    /// Number of requests that referenced this conversation.
    pub request_count: u64,
}

/// A registry entry together with its external id, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    pub external_id: String,
    #[serde(flatten)]
    pub entry: SessionEntry,
}

/// Outcome of [`SessionRegistry::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSession {
    pub token: String,
    /// True when the conversation was unknown and `token` was just minted.
    pub is_new: bool,
}

impl From<ResolvedSession> for SessionHint {
    fn from(resolved: ResolvedSession) -> Self {
        if resolved.is_new {
            Self::NewSession(resolved.token)
        } else {
            Self::Resume(resolved.token)
        }
    }
}

/// Process-wide map from external conversation id to [`SessionEntry`].
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `external_id`, minting a fresh token on first sight.
    ///
    /// Known ids get their `last_used_at` and `request_count` bumped.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    pub fn resolve(&self, external_id: &str) -> ResolvedSession {
        let mut sessions = self.sessions.write().expect("RwLock poisoned");
        let now = Utc::now();

        if let Some(entry) = sessions.get_mut(external_id) {
            entry.last_used_at = now;
            entry.request_count = entry.request_count.saturating_add(1);
            return ResolvedSession {
                token: entry.resume_token.clone(),
                is_new: false,
            };
        }

        let token = uuid::Uuid::new_v4().to_string();
        sessions.insert(
            external_id.to_string(),
            SessionEntry {
                resume_token: token.clone(),
                created_at: now,
                last_used_at: now,
                request_count: 1,
            },
        );
        tracing::debug!(external_id, token = %token, "Created session mapping");

        ResolvedSession {
            token,
            is_new: true,
        }
    }

    /// Point a known conversation at the session id the CLI actually reported.
    ///
    /// Returns `true` if the stored token changed. Unknown ids are ignored.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    pub fn rebind(&self, external_id: &str, token: &str) -> bool {
        let mut sessions = self.sessions.write().expect("RwLock poisoned");
        match sessions.get_mut(external_id) {
            Some(entry) if entry.resume_token != token => {
                tracing::debug!(
                    external_id,
                    old = %entry.resume_token,
                    new = token,
                    "Rebinding session to CLI-reported id"
                );
                entry.resume_token = token.to_string();
                true
            }
            _ => false,
        }
    }

    /// Get a copy of the entry for `external_id`.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn get(&self, external_id: &str) -> Option<SessionEntry> {
        self.sessions
            .read()
            .expect("RwLock poisoned")
            .get(external_id)
            .cloned()
    }

    /// Snapshot of all mappings, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().expect("RwLock poisoned");
        let mut list: Vec<SessionInfo> = sessions
            .iter()
            .map(|(external_id, entry)| SessionInfo {
                external_id: external_id.clone(),
                entry: entry.clone(),
            })
            .collect();
        list.sort_by(|a, b| {
            a.entry
                .created_at
                .cmp(&b.entry.created_at)
                .then_with(|| a.external_id.cmp(&b.external_id))
        });
        list
    }

    /// Forget one mapping. The CLI's on-disk session is left untouched.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    pub fn remove(&self, external_id: &str) -> bool {
        self.sessions
            .write()
            .expect("RwLock poisoned")
            .remove(external_id)
            .is_some()
    }

    /// Number of known conversations.
    ///
    /// # Panics
    ///
    /// Panics if the internal `RwLock` is poisoned.
    #[must_use]
    pub fn count(&self) -> usize {
        self.sessions.read().expect("RwLock poisoned").len()
    }
}

/// Pick the caller's conversation id: `X-Session-Id` header first, then the
/// body's `session_id` field. Blank values count as absent.
#[must_use]
pub fn extract_external_id(headers: &HeaderMap, body_session_id: Option<&str>) -> Option<String> {
    let from_header = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    from_header
        .or_else(|| body_session_id.map(str::trim).filter(|value| !value.is_empty()))
        .map(String::from)
}
