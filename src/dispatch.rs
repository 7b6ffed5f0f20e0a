// Routes inbound interactions to the duel engine and the statistics query,
// dropping redelivered events and containing every failure at this boundary.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;

use crate::duel::{Decision, DuelEngine};
use crate::error::DuelError;
use crate::interaction::{ButtonAction, Command, Interaction, InteractionKind};
use crate::metrics;
use crate::platform::{BridgeReport, PromptHandle, Response, UserId, Visibility};
use crate::registry::InteractionDedup;
use crate::stats::UserStat;

/// Private notice for anything that failed unexpectedly.
pub const GENERIC_FAILURE: &str = "🚨 Something went wrong while handling that request.";

pub struct Dispatcher {
    engine: DuelEngine,
    dedup: InteractionDedup,
    admin_ids: HashSet<UserId>,
}

impl Dispatcher {
    pub fn new(engine: DuelEngine, dedup: InteractionDedup, admin_ids: HashSet<UserId>) -> Self {
        Self {
            engine,
            dedup,
            admin_ids,
        }
    }

    pub fn engine(&self) -> &DuelEngine {
        &self.engine
    }

    pub fn dedup(&self) -> &InteractionDedup {
        &self.dedup
    }

    /// Handle one inbound interaction and produce its immediate response.
    ///
    /// Never fails: validation errors become private replies, and a panic in
    /// a handler becomes the generic failure notice.
    pub async fn handle(&self, interaction: &Interaction) -> Response {
        let kind = match &interaction.kind {
            InteractionKind::Command { .. } => "command",
            InteractionKind::Button { .. } => "button",
        };
        metrics::INTERACTIONS_TOTAL.with_label_values(&[kind]).inc();
        let timer = metrics::INTERACTION_DURATION_SECONDS.start_timer();

        let outcome = AssertUnwindSafe(self.process(interaction))
            .catch_unwind()
            .await;
        timer.observe_duration();

        match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                tracing::debug!("Interaction {} rejected: {e}", interaction.id);
                Response::private(e.user_message())
            }
            Err(panic) => {
                metrics::INTERACTION_FAILURES_TOTAL.inc();
                tracing::error!(
                    "Interaction {} from {} panicked: {}",
                    interaction.id,
                    interaction.user,
                    panic_message(panic.as_ref())
                );
                Response::private(GENERIC_FAILURE)
            }
        }
    }

    async fn process(&self, interaction: &Interaction) -> Result<Response, DuelError> {
        let event_key = match &interaction.kind {
            InteractionKind::Command { name, .. } => format!("{}_{name}", interaction.id),
            InteractionKind::Button { custom_id, .. } => format!("{}_{custom_id}", interaction.id),
        };
        if !self.dedup.first_delivery(&event_key) {
            metrics::DUPLICATE_INTERACTIONS_TOTAL.inc();
            tracing::info!("Dropping redelivered interaction {event_key}");
            return Ok(Response::Ignore);
        }

        match &interaction.kind {
            InteractionKind::Command { name, options } => match Command::parse(name, options) {
                Some(command) => self.run_command(interaction, command).await,
                None => {
                    tracing::warn!("Unknown command {name:?} from {}", interaction.user);
                    Ok(Response::Ignore)
                }
            },
            InteractionKind::Button {
                custom_id,
                message_id,
            } => {
                let Some(action) = ButtonAction::parse(custom_id) else {
                    tracing::debug!("Ignoring unrecognised control {custom_id:?}");
                    return Ok(Response::Ignore);
                };
                self.run_button(interaction, action, message_id).await
            }
        }
    }

    async fn run_command(
        &self,
        interaction: &Interaction,
        command: Command,
    ) -> Result<Response, DuelError> {
        match command {
            Command::Duel { opponent } => self.engine.issue_challenge(
                interaction.user,
                opponent,
                interaction.channel_id,
                PromptHandle::original(interaction.channel_id, &interaction.token),
            ),
            Command::Statistics => Ok(Response::private(statistics_text(
                interaction.user,
                self.engine.stats().get_user_stat(interaction.user).as_ref(),
            ))),
            Command::Backup => self.backup(interaction.user).await,
        }
    }

    async fn run_button(
        &self,
        interaction: &Interaction,
        action: ButtonAction,
        message_id: &str,
    ) -> Result<Response, DuelError> {
        let clicked = PromptHandle::message(interaction.channel_id, message_id);
        match action {
            ButtonAction::Accept(id) => {
                self.engine
                    .respond(id, interaction.user, Decision::Accept, clicked)
            }
            ButtonAction::Decline(id) => {
                self.engine
                    .respond(id, interaction.user, Decision::Decline, clicked)
            }
            ButtonAction::Report {
                claim,
                challenger,
                opponent,
            } => {
                self.engine
                    .report(challenger, opponent, interaction.user, claim, clicked)
                    .await
            }
        }
    }

    async fn backup(&self, caller: UserId) -> Result<Response, DuelError> {
        if !self.admin_ids.contains(&caller) {
            tracing::warn!("Backup requested by non-operator {caller}");
            return Err(DuelError::NotOperator);
        }

        let stats = self.engine.stats().clone();
        let result = tokio::task::spawn_blocking(move || {
            stats.snapshot().map(|path| (path, stats.summary()))
        })
        .await;

        match result {
            Ok(Ok((path, summary))) => {
                tracing::info!("Backup by {caller} written to {}", path.display());
                Ok(Response::private(format!(
                    "💾 Backup saved: {} users, {} duels recorded.",
                    summary.users, summary.duels
                )))
            }
            Ok(Err(e)) => {
                tracing::error!("Backup by {caller} failed: {e}");
                Err(DuelError::BackupFailed)
            }
            Err(e) => {
                tracing::error!("Backup task by {caller} did not finish: {e}");
                Err(DuelError::BackupFailed)
            }
        }
    }

    /// React to a bridge report. A refused response gets one private
    /// follow-up; if that fails too, both failures are logged.
    pub async fn handle_report(&self, report: BridgeReport) {
        match report {
            BridgeReport::DeliveryFailed {
                interaction_token,
                content,
                reason,
            } => {
                tracing::warn!("Response delivery failed: {reason}");
                let content = content.unwrap_or_else(|| GENERIC_FAILURE.to_string());
                if let Err(e) = self
                    .engine
                    .sink()
                    .follow_up(&interaction_token, content, Visibility::Private)
                    .await
                {
                    tracing::error!("Follow-up after failed delivery ({reason}) also failed: {e}");
                }
            }
        }
    }
}

fn statistics_text(user: UserId, stat: Option<&UserStat>) -> String {
    let Some(stat) = stat else {
        return "You haven't fought any duels yet.".to_string();
    };

    let mut text = format!(
        "📊 Statistics for {}:\n✅ Wins: {}\n❌ Losses: {}\n⚔️ Total duels: {}\n📈 Win rate: {:.1}%\n\n👑 Victories over:\n",
        user.mention(),
        stat.wins,
        stat.losses,
        stat.total_duels(),
        stat.win_rate()
    );
    if stat.victories_over.is_empty() {
        text.push_str("Nobody yet");
    } else {
        let lines: Vec<String> = stat
            .victories_over
            .iter()
            .map(|(opponent, count)| format!("{} × {count}", opponent.mention()))
            .collect();
        text.push_str(&lines.join("\n"));
    }
    text
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
