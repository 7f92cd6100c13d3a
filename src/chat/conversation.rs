//! In-memory conversation store.
//!
//! Maps session ids to ordered message logs. Sessions are created lazily on
//! first use, seeded with a system prompt, and live for the process
//! lifetime; there is no eviction. The trim function keeps histories inside
//! the context window while always preserving the leading system message.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::types::{Message, MessageRole};

/// Default cap on the number of non-system messages kept after trimming.
pub const MAX_MESSAGES: usize = 20;
/// Default cap on the total characters (all messages) kept after trimming.
pub const MAX_CHARS: usize = 12_000;

/// In-memory store of per-session message logs.
pub struct ConversationStore {
    sessions: Mutex<HashMap<String, Vec<Message>>>,
    default_system_prompt: String,
}

impl ConversationStore {
    /// Store seeding new sessions with the given system prompt.
    pub fn new(default_system_prompt: impl Into<String>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_system_prompt: default_system_prompt.into(),
        }
    }

    /// Create the session if absent, seeded with `system_prompt` (or the
    /// store default when None).
    pub fn ensure_session(&self, session_id: &str, system_prompt: Option<&str>) {
        let mut sessions = self.sessions.lock();
        sessions.entry(session_id.to_string()).or_insert_with(|| {
            vec![Message::system(
                system_prompt.unwrap_or(&self.default_system_prompt),
            )]
        });
    }

    /// Message history of a session, in chronological order. Creates the
    /// session lazily with the default system prompt.
    pub fn messages(&self, session_id: &str) -> Vec<Message> {
        self.ensure_session(session_id, None);
        self.sessions.lock()[session_id].clone()
    }

    /// Append a message, creating the session lazily.
    pub fn append(&self, session_id: &str, role: MessageRole, content: impl Into<String>) {
        self.ensure_session(session_id, None);
        self.sessions
            .lock()
            .get_mut(session_id)
            .expect("session ensured above")
            .push(Message::new(role, content));
    }

    /// Whether a session exists.
    pub fn session_exists(&self, session_id: &str) -> bool {
        self.sessions.lock().contains_key(session_id)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Drop a session and its history.
    pub fn clear_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Trim a history to fit the context window.
    ///
    /// The leading system message is always preserved; the most recent
    /// messages are kept until either cap would be exceeded. Already-trimmed
    /// input comes back unchanged, so the operation is idempotent.
    pub fn trim_messages(
        messages: &[Message],
        max_messages: usize,
        max_chars: usize,
    ) -> Vec<Message> {
        if messages.is_empty() {
            return Vec::new();
        }

        let (system, conversation) = match messages.first() {
            Some(first) if first.role == MessageRole::System => {
                (Some(&messages[0]), &messages[1..])
            }
            _ => (None, messages),
        };

        let total_chars: usize = messages.iter().map(|m| m.content.len()).sum();
        if conversation.len() <= max_messages && total_chars <= max_chars {
            return messages.to_vec();
        }

        let mut kept: Vec<&Message> = Vec::new();
        let mut char_count = system.map(|m| m.content.len()).unwrap_or(0);
        for message in conversation.iter().rev() {
            if kept.len() >= max_messages || char_count + message.content.len() > max_chars {
                break;
            }
            char_count += message.content.len();
            kept.push(message);
        }
        kept.reverse();

        system
            .into_iter()
            .chain(kept)
            .cloned()
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================
