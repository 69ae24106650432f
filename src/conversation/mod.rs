//! Conversation types and per-turn state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One message in a conversation. Assistant turns are created empty and
/// mutated in place while their response is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: u64,
    pub speaker: Speaker,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking_steps: Option<Vec<String>>,
    pub pending: bool,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn new(id: u64, speaker: Speaker, text: impl Into<String>, pending: bool) -> Self {
        Self {
            id,
            speaker,
            text: text.into(),
            thinking_steps: None,
            pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    User,
    Assistant,
}

/// An ordered, append-only sequence of turns. Only the single in-flight
/// assistant turn is ever mutated after being appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub turns: Vec<Turn>,
}

impl Conversation {
    /// Start a conversation with a single assistant greeting turn.
    pub fn with_greeting(id: u64, greeting: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            turns: vec![Turn::new(id, Speaker::Assistant, greeting, false)],
        }
    }

    /// Discard every turn and start over with a fresh greeting.
    pub fn reset(&mut self, id: u64, greeting: &str) {
        self.id = Uuid::new_v4();
        self.turns = vec![Turn::new(id, Speaker::Assistant, greeting, false)];
    }

    pub fn push_user(&mut self, id: u64, text: &str) {
        self.turns.push(Turn::new(id, Speaker::User, text, false));
    }

    /// Append an empty assistant turn awaiting its response.
    pub fn push_pending_assistant(&mut self, id: u64) {
        self.turns.push(Turn::new(id, Speaker::Assistant, "", true));
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn turn(&self, id: u64) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    fn turn_mut(&mut self, id: u64) -> Option<&mut Turn> {
        self.turns.iter_mut().find(|t| t.id == id)
    }

    /// Attach thinking steps to an in-flight assistant turn. Set once; the
    /// step list is never resized or reordered afterwards.
    ///
    /// All id-keyed mutators silently no-op when the turn is gone: a reset
    /// may have raced the in-flight pipeline, and late updates must land
    /// nowhere rather than on the wrong turn.
    pub fn set_thinking_steps(&mut self, id: u64, steps: Vec<String>) {
        if let Some(turn) = self.turn_mut(id) {
            turn.thinking_steps = Some(steps);
            turn.pending = false;
        }
    }

    /// Replace the turn's text with the running streamed total.
    pub fn set_text(&mut self, id: u64, text: &str) {
        if let Some(turn) = self.turn_mut(id) {
            turn.text = text.to_string();
            turn.pending = false;
        }
    }

    /// Replace the turn's content with a failure notice and clear its flags.
    pub fn fail(&mut self, id: u64, notice: &str) {
        if let Some(turn) = self.turn_mut(id) {
            turn.text = notice.to_string();
            turn.thinking_steps = None;
            turn.pending = false;
        }
    }
}
