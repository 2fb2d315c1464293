//! Per-chat conversation state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::{ChatId, ChatState};

/// Holds one state cell per chat. Each cell sits behind its own async lock,
/// so one chat's events are handled one at a time while other chats
/// proceed in parallel.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<ChatId, Arc<Mutex<ChatState>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a chat's state for the duration of one event, creating it as
    /// `Idle` on first contact.
    pub async fn acquire(&self, chat_id: ChatId) -> OwnedMutexGuard<ChatState> {
        let cell = {
            let mut sessions = self.sessions.lock().await;
            Arc::clone(sessions.entry(chat_id).or_default())
        };
        cell.lock_owned().await
    }

    /// Current state of a chat (`Idle` for unknown chats). Waits for any
    /// in-flight event on that chat to finish.
    pub async fn state(&self, chat_id: ChatId) -> ChatState {
        let cell = self.sessions.lock().await.get(&chat_id).cloned();
        match cell {
            Some(cell) => *cell.lock().await,
            None => ChatState::Idle,
        }
    }

    /// Number of chats seen so far.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
