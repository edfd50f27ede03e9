//! Pending sessions minted at admission time, waiting to be consumed by a
//! register frame.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// A one-time capability authorizing a single register on the cell channel.
#[derive(Clone, Debug)]
pub struct PendingSession {
    pub player_id: String,
    pub session_token: String,
    pub created_at: Instant,
}

/// Pending sessions for one cell, indexed by token and by player.
///
/// At most one pending session exists per player; storing a new one evicts
/// the prior. Entries are pruned lazily once they outlive their TTL.
#[derive(Debug, Default)]
pub struct PendingSessions {
    by_token: HashMap<String, PendingSession>,
    token_by_player: HashMap<String, String>,
}

impl PendingSessions {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending sessions.
    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    /// Whether no sessions are pending.
    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }

    /// Drop sessions older than the TTL.
    pub fn prune(&mut self, ttl: Duration, now: Instant) {
        let token_by_player = &mut self.token_by_player;

        self.by_token.retain(|token, session| {
            let live = now.saturating_duration_since(session.created_at) <= ttl;

            if !live && token_by_player.get(&session.player_id) == Some(token) {
                token_by_player.remove(&session.player_id);
            }

            live
        });
    }

    /// Store a session, evicting any prior session for the same player.
    pub fn insert(&mut self, player_id: String, session_token: String, now: Instant) {
        if let Some(prior) = self.token_by_player.remove(&player_id) {
            self.by_token.remove(&prior);
        }

        self.token_by_player
            .insert(player_id.clone(), session_token.clone());
        self.by_token.insert(
            session_token.clone(),
            PendingSession {
                player_id,
                session_token,
                created_at: now,
            },
        );
    }

    /// Look at the session a token refers to without consuming it.
    pub fn get(&self, session_token: &str) -> Option<&PendingSession> {
        self.by_token.get(session_token)
    }

    /// Consume a session, removing it from both indexes.
    pub fn consume(&mut self, session_token: &str) -> Option<PendingSession> {
        let session = self.by_token.remove(session_token)?;

        if self.token_by_player.get(&session.player_id) == Some(&session.session_token) {
            self.token_by_player.remove(&session.player_id);
        }

        Some(session)
    }
}
