use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::models::message::Message;

/// Key every chat request is currently filed under. All callers share this
/// transcript until requests carry their own session id.
pub const DEFAULT_SESSION_ID: &str = "test-session";

/// One entry of a conversation transcript
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Turn {
    User(String),
    Agent(String),
}

impl Turn {
    /// The message form handed to the agent as context
    pub fn to_message(&self) -> Message {
        match self {
            Turn::User(text) => Message::user().with_text(text),
            Turn::Agent(text) => Message::assistant().with_text(text),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Turn::User(text) | Turn::Agent(text) => text,
        }
    }
}

/// An append-only transcript
#[derive(Debug, Default)]
pub struct Session {
    turns: AsyncMutex<Vec<Turn>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the transcript. Holding the guard serializes
    /// everyone else working on this session.
    pub async fn lock(&self) -> TranscriptGuard<'_> {
        TranscriptGuard {
            turns: self.turns.lock().await,
        }
    }

    /// Copy of the current turns
    pub async fn turns(&self) -> Vec<Turn> {
        self.turns.lock().await.clone()
    }
}

/// Locked view of a session transcript that can only grow
pub struct TranscriptGuard<'a> {
    turns: MutexGuard<'a, Vec<Turn>>,
}

impl TranscriptGuard<'_> {
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn to_messages(&self) -> Vec<Message> {
        self.turns.iter().map(Turn::to_message).collect()
    }
}

/// Sessions by id, created on first reference and kept for the life of the process
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, session_id: &str) -> Arc<Session> {
        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!("Creating session {}", session_id);
                Arc::new(Session::new())
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
