//! Append-only conversation history for one goal's session.

use serde::{Deserialize, Serialize};

/// One issued-prompt / observed-response pair. Recorded once a round has both
/// halves; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub issued_prompt: String,
    pub observed_response: String,
}

impl Turn {
    pub fn new(issued_prompt: impl Into<String>, observed_response: impl Into<String>) -> Self {
        Self {
            issued_prompt: issued_prompt.into(),
            observed_response: observed_response.into(),
        }
    }
}

/// The ordered log of turns taken against one goal. Insertion order encodes
/// chronology; there is no removal operation.
#[derive(Debug, Clone, Default)]
pub struct ConversationHistory {
    turns: Vec<Turn>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Renders the full history as a deterministic numbered block for
    /// inclusion in a follow-up generation prompt.
    pub fn as_prompt_context(&self) -> String {
        let mut out = String::new();
        for (i, turn) in self.turns.iter().enumerate() {
            out.push_str(&format!(
                "TURN {}:\n- Attacker: \"{}\"\n- Target: \"{}\"\n\n",
                i + 1,
                turn.issued_prompt,
                turn.observed_response
            ));
        }
        out
    }
}
