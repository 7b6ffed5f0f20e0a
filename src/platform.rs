// Outbound side of the chat platform: ids, prompts, responses and the sink
// through which the bot posts and edits messages after the initial response.

use std::fmt;
use std::str::FromStr;

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::metrics;

// ── Snowflake ids ─────────────────────────────────────────────────────

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map($name)
            }
        }

        // Platforms send snowflakes as JSON strings; accept bare numbers too.
        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Raw {
                    Num(u64),
                    Str(String),
                }
                match Raw::deserialize(deserializer)? {
                    Raw::Num(n) => Ok($name(n)),
                    Raw::Str(s) => s.parse().map_err(serde::de::Error::custom),
                }
            }
        }
    };
}

snowflake!(
    /// Platform-provided user identity.
    UserId
);
snowflake!(ChannelId);
snowflake!(GuildId);
snowflake!(ApplicationId);

impl UserId {
    /// Inline mention markup, e.g. `<@1234>`.
    pub fn mention(&self) -> String {
        format!("<@{}>", self.0)
    }
}

// ── Prompts and responses ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Success,
    Danger,
}

/// A clickable control attached to a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub custom_id: String,
    pub label: String,
    pub style: ButtonStyle,
}

/// Message content plus its controls. An empty control list removes buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub content: String,
    #[serde(default)]
    pub controls: Vec<Control>,
}

impl Prompt {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            controls: Vec::new(),
        }
    }

    pub fn with_controls(content: impl Into<String>, controls: Vec<Control>) -> Self {
        Self {
            content: content.into(),
            controls,
        }
    }
}

/// Who gets to see a new message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Posted to the invoking channel.
    Channel,
    /// Shown only to the invoking user.
    Private,
}

/// Immediate response to an inbound interaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Send a new message.
    Message {
        prompt: Prompt,
        visibility: Visibility,
    },
    /// Replace the message the clicked control belongs to.
    Update { prompt: Prompt },
    /// Acknowledge without visible output.
    Ignore,
}

impl Response {
    pub fn public(prompt: Prompt) -> Self {
        Response::Message {
            prompt,
            visibility: Visibility::Channel,
        }
    }

    pub fn private(content: impl Into<String>) -> Self {
        Response::Message {
            prompt: Prompt::text(content),
            visibility: Visibility::Private,
        }
    }

    pub fn update(prompt: Prompt) -> Self {
        Response::Update { prompt }
    }

    /// Text shown to users, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Response::Message { prompt, .. } | Response::Update { prompt } => {
                Some(&prompt.content)
            }
            Response::Ignore => None,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(
            self,
            Response::Message {
                visibility: Visibility::Private,
                ..
            }
        )
    }
}

/// Where a prompt lives on the platform.
///
/// `message` is opaque to the bot: a platform message id, `@original:<token>`
/// for the first reply to a command, or `pending:<uuid>` for a message the bot
/// asked the bridge to post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PromptHandle {
    pub channel_id: ChannelId,
    pub message: String,
}

impl PromptHandle {
    pub fn original(channel_id: ChannelId, interaction_token: &str) -> Self {
        Self {
            channel_id,
            message: format!("@original:{interaction_token}"),
        }
    }

    pub fn message(channel_id: ChannelId, message_id: impl Into<String>) -> Self {
        Self {
            channel_id,
            message: message_id.into(),
        }
    }
}

// ── Sink ──────────────────────────────────────────────────────────────

/// Asynchronous outbound operations that happen outside an interaction's
/// immediate response: timer-driven edits, re-prompts, follow-ups.
pub trait PromptSink: Send + Sync {
    /// Post a new message to a channel and return its handle.
    fn post(
        &self,
        channel_id: ChannelId,
        prompt: Prompt,
    ) -> BoxFuture<'_, Result<PromptHandle, DeliveryError>>;

    /// Replace an existing message's content and controls.
    fn edit<'a>(
        &'a self,
        handle: &'a PromptHandle,
        prompt: Prompt,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;

    /// Send a follow-up message tied to an interaction.
    fn follow_up<'a>(
        &'a self,
        interaction_token: &'a str,
        content: String,
        visibility: Visibility,
    ) -> BoxFuture<'a, Result<(), DeliveryError>>;
}

/// Events streamed to the bridge over `/ws/events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    PromptPosted {
        handle: PromptHandle,
        prompt: Prompt,
    },
    PromptEdited {
        handle: PromptHandle,
        prompt: Prompt,
    },
    FollowUp {
        interaction_token: String,
        content: String,
        visibility: Visibility,
    },
}

/// Messages a bridge client sends back over `/ws/events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeReport {
    /// The platform refused the immediate response to an interaction.
    DeliveryFailed {
        interaction_token: String,
        #[serde(default)]
        content: Option<String>,
        reason: String,
    },
}

/// Sink that fans outbound events out to every connected bridge client.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<String>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    fn publish(&self, event: &OutboundEvent) -> Result<(), DeliveryError> {
        let json = serde_json::to_string(event)
            .map_err(|e| DeliveryError::Rejected(format!("unserializable event: {e}")))?;
        self.tx
            .send(json)
            .map_err(|_| DeliveryError::NoSubscribers)?;
        metrics::OUTBOUND_EVENTS_TOTAL.inc();
        Ok(())
    }
}

impl PromptSink for BroadcastSink {
    fn post(
        &self,
        channel_id: ChannelId,
        prompt: Prompt,
    ) -> BoxFuture<'_, Result<PromptHandle, DeliveryError>> {
        let handle = PromptHandle::message(channel_id, format!("pending:{}", Uuid::new_v4()));
        let result = self
            .publish(&OutboundEvent::PromptPosted {
                handle: handle.clone(),
                prompt,
            })
            .map(|_| handle);
        futures::future::ready(result).boxed()
    }

    fn edit<'a>(
        &'a self,
        handle: &'a PromptHandle,
        prompt: Prompt,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        let result = self.publish(&OutboundEvent::PromptEdited {
            handle: handle.clone(),
            prompt,
        });
        futures::future::ready(result).boxed()
    }

    fn follow_up<'a>(
        &'a self,
        interaction_token: &'a str,
        content: String,
        visibility: Visibility,
    ) -> BoxFuture<'a, Result<(), DeliveryError>> {
        let result = self.publish(&OutboundEvent::FollowUp {
            interaction_token: interaction_token.to_string(),
            content,
            visibility,
        });
        futures::future::ready(result).boxed()
    }
}
