// Error types shared across the bot.

use std::path::PathBuf;

use thiserror::Error;

/// Validation rejections raised by the duel protocol.
///
/// None of these mutate state. Each one maps to a short private message for
/// the user who triggered it (see [`DuelError::user_message`]).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DuelError {
    #[error("challenger and opponent are the same user")]
    SelfChallenge,
    #[error("challenger tried to answer their own challenge")]
    OwnChallenge,
    #[error("challenge is addressed to another user")]
    NotAddressee,
    #[error("challenge is no longer available")]
    ChallengeUnavailable,
    #[error("pair already has an active duel")]
    AlreadyDueling,
    #[error("reporter is not a participant")]
    NotParticipant,
    #[error("duel already resolved or no longer active")]
    AlreadyResolved,
    #[error("caller is not an operator")]
    NotOperator,
    #[error("statistics backup failed")]
    BackupFailed,
}

impl DuelError {
    /// Terse text shown privately to the invoking user.
    pub fn user_message(&self) -> &'static str {
        match self {
            DuelError::SelfChallenge => "You can't challenge yourself.",
            DuelError::OwnChallenge => "You can't answer your own challenge.",
            DuelError::NotAddressee => "This challenge isn't meant for you.",
            DuelError::ChallengeUnavailable => "This challenge is no longer available.",
            DuelError::AlreadyDueling => "You two already have a duel in progress.",
            DuelError::NotParticipant => "You're not a participant in this duel!",
            DuelError::AlreadyResolved => "This duel has already been resolved.",
            DuelError::NotOperator => "You don't have permission to do that.",
            DuelError::BackupFailed => "Backup failed, check the logs.",
        }
    }
}

/// Failures reading or writing the statistics file.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to serialize statistics: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("every write target failed")]
    AllTargetsFailed,
}

/// Fatal startup configuration problems.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Outbound delivery failures towards the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("no bridge client is connected")]
    NoSubscribers,
    #[error("platform rejected the request: {0}")]
    Rejected(String),
}
