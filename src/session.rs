// Duel session state tracked in memory while a duel is in flight.

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::platform::{ChannelId, PromptHandle, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingResponse,
    Active,
    Resolved,
    Declined,
    Expired,
}

/// One duel between a challenger and an opponent.
#[derive(Debug)]
pub struct DuelSession {
    pub id: Uuid,
    pub challenger: UserId,
    /// `None` for an open challenge until someone accepts.
    pub opponent: Option<UserId>,
    /// Whether the opponent was named when the challenge was issued.
    pub targeted: bool,
    pub phase: Phase,
    pub channel_id: ChannelId,
    /// Every message that has shown this duel's controls, oldest first. The
    /// last one is the prompt currently in use.
    pub prompts: Vec<PromptHandle>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Response timer while awaiting an answer, re-prompt loop once active.
    pub(crate) task: Option<JoinHandle<()>>,
}

impl DuelSession {
    pub fn new(
        challenger: UserId,
        opponent: Option<UserId>,
        channel_id: ChannelId,
        prompt: PromptHandle,
        response_window: chrono::Duration,
    ) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            challenger,
            opponent,
            targeted: opponent.is_some(),
            phase: Phase::AwaitingResponse,
            channel_id,
            prompts: vec![prompt],
            created_at,
            expires_at: created_at
                .checked_add_signed(response_window)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            task: None,
        }
    }

    /// The participant who is not `user`.
    pub fn other_participant(&self, user: UserId) -> Option<UserId> {
        if user == self.challenger {
            self.opponent
        } else if self.opponent == Some(user) {
            Some(self.challenger)
        } else {
            None
        }
    }

    /// The prompt currently carrying this duel's controls.
    pub fn current_prompt(&self) -> Option<&PromptHandle> {
        self.prompts.last()
    }

    /// Stop whichever timer or re-prompt task is attached.
    pub(crate) fn cancel_task(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            challenger: self.challenger,
            opponent: self.opponent,
            targeted: self.targeted,
            phase: self.phase,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub challenger: UserId,
    pub opponent: Option<UserId>,
    pub targeted: bool,
    pub phase: Phase,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
