// Inbound interactions: slash commands and button callbacks, plus the custom
// id format that ties buttons back to duels.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::platform::{ApplicationId, ChannelId, GuildId, UserId};

/// Platform limit on custom id length.
const MAX_CUSTOM_ID_LEN: usize = 100;

pub const DUEL_COMMAND: &str = "duel";
pub const STATISTICS_COMMAND: &str = "statistics";
pub const BACKUP_COMMAND: &str = "backup";

/// One inbound event relayed by the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    /// Platform interaction id, unique per delivery.
    pub id: String,
    /// Token used to address the interaction's original response and follow-ups.
    pub token: String,
    pub application_id: ApplicationId,
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub user: UserId,
    #[serde(flatten)]
    pub kind: InteractionKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionKind {
    Command {
        name: String,
        #[serde(default)]
        options: CommandOptions,
    },
    Button {
        custom_id: String,
        message_id: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOptions {
    #[serde(default)]
    pub opponent: Option<UserId>,
}

/// A recognised slash command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Duel { opponent: Option<UserId> },
    Statistics,
    Backup,
}

impl Command {
    pub fn parse(name: &str, options: &CommandOptions) -> Option<Self> {
        match name {
            DUEL_COMMAND => Some(Command::Duel {
                opponent: options.opponent,
            }),
            STATISTICS_COMMAND => Some(Command::Statistics),
            BACKUP_COMMAND => Some(Command::Backup),
            _ => None,
        }
    }
}

/// A participant's self-reported outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Claim {
    Won,
    Lost,
}

/// Decoded button custom id.
///
/// Wire forms: `accept_<uuid>`, `decline_<uuid>`,
/// `win_<challenger>_<opponent>`, `lose_<challenger>_<opponent>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonAction {
    Accept(Uuid),
    Decline(Uuid),
    Report {
        claim: Claim,
        challenger: UserId,
        opponent: UserId,
    },
}

impl ButtonAction {
    /// Parse a custom id. Anything malformed or unknown yields `None`.
    pub fn parse(custom_id: &str) -> Option<Self> {
        if custom_id.len() > MAX_CUSTOM_ID_LEN {
            return None;
        }
        let (verb, rest) = custom_id.split_once('_')?;
        match verb {
            "accept" => Uuid::parse_str(rest).ok().map(ButtonAction::Accept),
            "decline" => Uuid::parse_str(rest).ok().map(ButtonAction::Decline),
            "win" | "lose" => {
                let (challenger, opponent) = rest.split_once('_')?;
                let claim = if verb == "win" { Claim::Won } else { Claim::Lost };
                Some(ButtonAction::Report {
                    claim,
                    challenger: challenger.parse().ok()?,
                    opponent: opponent.parse().ok()?,
                })
            }
            _ => None,
        }
    }
}

impl fmt::Display for ButtonAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonAction::Accept(id) => write!(f, "accept_{id}"),
            ButtonAction::Decline(id) => write!(f, "decline_{id}"),
            ButtonAction::Report {
                claim,
                challenger,
                opponent,
            } => {
                let verb = match claim {
                    Claim::Won => "win",
                    Claim::Lost => "lose",
                };
                write!(f, "{verb}_{challenger}_{opponent}")
            }
        }
    }
}

/// Slash command definitions in the platform's registration format.
pub fn command_definitions() -> Value {
    json!([
        {
            "name": DUEL_COMMAND,
            "description": "Challenge a player, or anyone, to a duel",
            "options": [{
                "type": 6,
                "name": "opponent",
                "description": "Who you are challenging",
                "required": false
            }]
        },
        {
            "name": STATISTICS_COMMAND,
            "description": "Show your duel statistics"
        },
        {
            "name": BACKUP_COMMAND,
            "description": "Back up duel statistics (operators only)",
            "default_member_permissions": "0"
        }
    ])
}

/// REST route the bridge uses to register guild commands.
pub fn registration_route(client_id: ApplicationId, guild_id: GuildId) -> String {
    format!("/applications/{client_id}/guilds/{guild_id}/commands")
}
