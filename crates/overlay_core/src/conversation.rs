//! Ordered conversation history owned by the presentation thread.
//!
//! Invariants enforced here:
//! - a model turn is only appended directly after a user-role turn (typed by
//!   the user or injected by the autopilot);
//! - at most one model turn is open (still streaming) at a time;
//! - once a model turn is finalized, an observation turn directly before it
//!   is removed.

use serde::{Deserialize, Serialize};
use shared::agent_api::{Role, Turn, TurnId};
use shared::{OverlayError, OverlayResult};
use std::fs;
use std::path::Path;

#[derive(Debug, Default, Clone)]
pub struct ConversationLog {
    turns: Vec<Turn>,
    open: Option<TurnId>,
}

/// On-disk form of a saved chat.
#[derive(Serialize, Deserialize)]
struct SavedChat {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn get(&self, id: TurnId) -> Option<&Turn> {
        self.turns.iter().find(|t| t.id == id)
    }

    fn index_of(&self, id: TurnId) -> Option<usize> {
        self.turns.iter().position(|t| t.id == id)
    }

    pub fn open_turn(&self) -> Option<TurnId> {
        self.open
    }

    pub fn is_streaming(&self) -> bool {
        self.open.is_some()
    }

    /// Append a user, observation or system turn.
    pub fn push(&mut self, turn: Turn) -> OverlayResult<TurnId> {
        match turn.role {
            Role::Model => {
                return Err(OverlayError::InvalidTurn(
                    "model turns are opened with open_model_turn".into(),
                ))
            }
            Role::User if self.open.is_some() => return Err(OverlayError::Busy),
            _ => {}
        }
        let id = turn.id;
        self.turns.push(turn);
        Ok(id)
    }

    /// Append an empty model turn that will receive streamed text.
    pub fn open_model_turn(&mut self) -> OverlayResult<TurnId> {
        if self.open.is_some() {
            return Err(OverlayError::Busy);
        }
        match self.turns.last() {
            Some(prev) if prev.is_prompt() => {}
            _ => {
                return Err(OverlayError::InvalidTurn(
                    "a model turn must follow a user or observation turn".into(),
                ))
            }
        }
        let turn = Turn::model(String::new());
        let id = turn.id;
        self.turns.push(turn);
        self.open = Some(id);
        Ok(id)
    }

    fn open_turn_mut(&mut self, id: TurnId) -> OverlayResult<&mut Turn> {
        if self.open != Some(id) {
            return Err(OverlayError::InvalidTurn(format!("turn {} is not streaming", id)));
        }
        self.turns
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| OverlayError::InvalidTurn(format!("turn {} not found", id)))
    }

    pub fn append_delta(&mut self, id: TurnId, delta: &str) -> OverlayResult<()> {
        self.open_turn_mut(id)?.text.push_str(delta);
        Ok(())
    }

    /// Close the open model turn with its final text. An observation turn
    /// directly before it is dropped so only its answer stays visible.
    pub fn finalize(&mut self, id: TurnId, final_text: String) -> OverlayResult<()> {
        self.open_turn_mut(id)?.text = final_text;
        self.open = None;

        if let Some(idx) = self.index_of(id) {
            if idx > 0 && self.turns[idx - 1].observation {
                let removed = self.turns.remove(idx - 1);
                tracing::debug!(turn = %removed.id, "removed observation prompt");
            }
        }
        Ok(())
    }

    /// Owned copy of every settled turn, for an outgoing request.
    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns
            .iter()
            .filter(|t| Some(t.id) != self.open)
            .cloned()
            .collect()
    }

    pub fn set_pinned(&mut self, id: TurnId, pinned: bool) -> OverlayResult<()> {
        let turn = self
            .turns
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| OverlayError::InvalidTurn(format!("turn {} not found", id)))?;
        turn.pinned = pinned;
        Ok(())
    }

    pub fn last_of_role(&self, role: Role) -> Option<&Turn> {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == role && Some(t.id) != self.open)
    }

    /// Pinned turns, each preceded by the user turn it answers.
    pub fn pinned_view(&self) -> Vec<&Turn> {
        let mut view: Vec<&Turn> = Vec::new();
        for (i, turn) in self.turns.iter().enumerate() {
            if !turn.pinned {
                continue;
            }
            if i > 0 {
                let prev = &self.turns[i - 1];
                let already = view.last().map(|t| t.id == prev.id).unwrap_or(false);
                if prev.role == Role::User && !already {
                    view.push(prev);
                }
            }
            view.push(turn);
        }
        view
    }

    /// Remove a settled turn (e.g. a transient system notice).
    pub fn remove(&mut self, id: TurnId) -> OverlayResult<Turn> {
        if self.open == Some(id) {
            return Err(OverlayError::Busy);
        }
        let idx = self
            .index_of(id)
            .ok_or_else(|| OverlayError::InvalidTurn(format!("turn {} not found", id)))?;
        Ok(self.turns.remove(idx))
    }

    pub fn clear(&mut self) -> OverlayResult<()> {
        if self.open.is_some() {
            return Err(OverlayError::Busy);
        }
        self.turns.clear();
        Ok(())
    }

    pub fn save_json(&self, path: &Path) -> OverlayResult<()> {
        let saved = SavedChat {
            turns: self.snapshot(),
        };
        fs::write(path, serde_json::to_vec_pretty(&saved)?)?;
        Ok(())
    }

    /// Load a saved chat. A model turn can never open a conversation.
    pub fn load_json(path: &Path) -> OverlayResult<Self> {
        let saved: SavedChat = serde_json::from_slice(&fs::read(path)?)?;
        if saved.turns.first().map(|t| t.role) == Some(Role::Model) {
            return Err(OverlayError::InvalidTurn(
                "saved chat starts with a model turn".into(),
            ));
        }
        Ok(Self {
            turns: saved.turns,
            open: None,
        })
    }
}
