// Duel protocol engine: drives each duel from challenge through acceptance and
// self-reported result to a committed statistics update.
//
// All phase transitions happen under the session lock, and no lock is held
// across an await. Each phase-changing handler also holds a processing mark
// in the registry, so concurrent deliveries for the same challenge or duel
// are turned away before they reach the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::DuelError;
use crate::interaction::{ButtonAction, Claim};
use crate::lock;
use crate::metrics;
use crate::platform::{ButtonStyle, ChannelId, Control, Prompt, PromptHandle, PromptSink, Response, UserId};
use crate::registry::{ProcessingRegistry, SessionKey};
use crate::session::{DuelSession, Phase, SessionInfo};
use crate::stats::StatsStore;

/// Timing policy for duels.
#[derive(Debug, Clone)]
pub struct DuelConfig {
    /// How long a challenge waits for an answer before it expires.
    pub response_window: Duration,
    /// Re-post the result prompt after this long without a report.
    /// `None` disables re-prompting; active duels then wait indefinitely.
    pub reprompt_interval: Option<Duration>,
    /// Cap on re-posts before the duel is dropped unreported.
    /// `None` re-prompts until the duel resolves or the process stops.
    pub max_reprompts: Option<u32>,
}

impl Default for DuelConfig {
    fn default() -> Self {
        Self {
            response_window: Duration::from_secs(15),
            reprompt_interval: None,
            max_reprompts: Some(3),
        }
    }
}

/// Answer to a pending challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Decline,
}

#[derive(Default)]
struct Sessions {
    by_id: HashMap<Uuid, DuelSession>,
    /// (challenger, opponent) -> id of the Active session for that pair.
    active: HashMap<(UserId, UserId), Uuid>,
}

impl Sessions {
    /// Remove a session that reached a terminal phase.
    fn retire(&mut self, id: Uuid) -> Option<DuelSession> {
        let session = self.by_id.remove(&id)?;
        if let Some(opponent) = session.opponent {
            if self.active.get(&(session.challenger, opponent)) == Some(&id) {
                self.active.remove(&(session.challenger, opponent));
            }
        }
        metrics::ACTIVE_SESSIONS.dec();
        Some(session)
    }
}

struct EngineInner {
    config: DuelConfig,
    sessions: Mutex<Sessions>,
    processing: ProcessingRegistry,
    stats: Arc<StatsStore>,
    sink: Arc<dyn PromptSink>,
    shutdown: watch::Sender<bool>,
}

/// Cheaply cloneable handle to the duel engine.
#[derive(Clone)]
pub struct DuelEngine {
    inner: Arc<EngineInner>,
}

impl DuelEngine {
    pub fn new(config: DuelConfig, stats: Arc<StatsStore>, sink: Arc<dyn PromptSink>) -> Self {
        let (shutdown, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(EngineInner {
                config,
                sessions: Mutex::new(Sessions::default()),
                processing: ProcessingRegistry::new(),
                stats,
                sink,
                shutdown,
            }),
        }
    }

    pub fn stats(&self) -> &Arc<StatsStore> {
        &self.inner.stats
    }

    pub fn sink(&self) -> &Arc<dyn PromptSink> {
        &self.inner.sink
    }

    pub fn processing(&self) -> &ProcessingRegistry {
        &self.inner.processing
    }

    /// Receiver that flips to true when [`DuelEngine::shutdown`] runs.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    // ── Challenge ─────────────────────────────────────────────────────

    /// Create a challenge and return the channel-visible prompt for it.
    ///
    /// `prompt` is where the returned response will be shown; the response
    /// timer edits it if nobody answers in time.
    pub fn issue_challenge(
        &self,
        challenger: UserId,
        opponent: Option<UserId>,
        channel_id: ChannelId,
        prompt: PromptHandle,
    ) -> Result<Response, DuelError> {
        if opponent == Some(challenger) {
            return Err(DuelError::SelfChallenge);
        }

        let window = self.inner.config.response_window;
        let mut session = DuelSession::new(
            challenger,
            opponent,
            channel_id,
            prompt,
            chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::days(1)),
        );
        let id = session.id;

        let mut guard = lock(&self.inner.sessions);
        if let Some(opponent) = opponent {
            if guard.active.contains_key(&(challenger, opponent)) {
                return Err(DuelError::AlreadyDueling);
            }
        }

        let engine = self.clone();
        session.task = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            engine.expire_challenge(id).await;
        }));
        guard.by_id.insert(id, session);
        drop(guard);

        let kind = if opponent.is_some() { "targeted" } else { "open" };
        metrics::DUELS_ISSUED_TOTAL.with_label_values(&[kind]).inc();
        metrics::ACTIVE_SESSIONS.inc();
        tracing::info!("Challenge {id} issued by {challenger} ({kind})");

        Ok(Response::public(challenge_prompt(id, challenger, opponent)))
    }

    /// Accept or decline a pending challenge.
    ///
    /// `clicked` is the message carrying the buttons; it becomes the prompt
    /// the engine edits later on.
    pub fn respond(
        &self,
        session_id: Uuid,
        responder: UserId,
        decision: Decision,
        clicked: PromptHandle,
    ) -> Result<Response, DuelError> {
        // Ineligible clicks are turned away before taking the mark, so they
        // never block an eligible responder.
        match lock(&self.inner.sessions).by_id.get(&session_id) {
            Some(session) => check_responder(session, responder)?,
            None => return Err(DuelError::ChallengeUnavailable),
        }

        let _processing = self
            .inner
            .processing
            .try_acquire(SessionKey::Challenge(session_id))
            .ok_or(DuelError::ChallengeUnavailable)?;

        let mut guard = lock(&self.inner.sessions);
        let sessions = &mut *guard;

        let session = sessions
            .by_id
            .get_mut(&session_id)
            .ok_or(DuelError::ChallengeUnavailable)?;
        check_responder(session, responder)?;
        let challenger = session.challenger;

        match decision {
            Decision::Decline => {
                let targeted = session.targeted;
                session.phase = Phase::Declined;
                session.cancel_task();
                sessions.retire(session_id);
                drop(guard);

                metrics::DUELS_DECLINED_TOTAL.inc();
                tracing::info!("Challenge {session_id} declined by {responder}");
                Ok(Response::update(declined_prompt(targeted, responder)))
            }
            Decision::Accept => {
                let pair = (challenger, responder);
                if sessions.active.contains_key(&pair) {
                    return Err(DuelError::AlreadyDueling);
                }
                session.opponent = Some(responder);
                session.phase = Phase::Active;
                session.prompts = vec![clicked];
                session.cancel_task();
                session.task = self.spawn_reprompt(session_id);
                sessions.active.insert(pair, session_id);
                drop(guard);

                metrics::DUELS_ACCEPTED_TOTAL.inc();
                tracing::info!("Duel {session_id} started: {challenger} vs {responder}");
                Ok(Response::update(duel_prompt(challenger, responder)))
            }
        }
    }

    async fn expire_challenge(&self, session_id: Uuid) {
        let (prompt, challenger) = {
            let mut guard = lock(&self.inner.sessions);
            match guard.by_id.get(&session_id) {
                Some(s) if s.phase == Phase::AwaitingResponse => {}
                _ => return,
            }
            let Some(mut session) = guard.retire(session_id) else {
                return;
            };
            session.phase = Phase::Expired;
            // This task is the timer itself; detach instead of aborting.
            session.task.take();
            (session.prompts.pop(), session.challenger)
        };
        let Some(prompt) = prompt else {
            return;
        };

        metrics::DUELS_EXPIRED_TOTAL
            .with_label_values(&["response"])
            .inc();
        tracing::info!("Challenge {session_id} expired without an answer");
        if let Err(e) = self
            .inner
            .sink
            .edit(&prompt, Prompt::text(expired_prompt(challenger)))
            .await
        {
            tracing::warn!("Could not update expired challenge {session_id}: {e}");
        }
    }

    // ── Result ────────────────────────────────────────────────────────

    /// Resolve the duel between `challenger` and `opponent` from one
    /// participant's self-report. At most one report per duel is committed.
    ///
    /// `clicked` receives the outcome through the returned response; every
    /// other prompt the duel posted is edited so no result control survives.
    pub async fn report(
        &self,
        challenger: UserId,
        opponent: UserId,
        reporter: UserId,
        claim: Claim,
        clicked: PromptHandle,
    ) -> Result<Response, DuelError> {
        if reporter != challenger && reporter != opponent {
            return Err(DuelError::NotParticipant);
        }

        let _processing = self
            .inner
            .processing
            .try_acquire(SessionKey::Duel(challenger, opponent))
            .ok_or(DuelError::AlreadyResolved)?;

        let (session_id, winner, loser, stale) = {
            let mut guard = lock(&self.inner.sessions);
            let session_id = guard
                .active
                .get(&(challenger, opponent))
                .copied()
                .ok_or(DuelError::AlreadyResolved)?;
            let other = guard
                .by_id
                .get(&session_id)
                .and_then(|s| s.other_participant(reporter))
                .ok_or(DuelError::NotParticipant)?;
            let mut session = guard
                .retire(session_id)
                .ok_or(DuelError::AlreadyResolved)?;
            session.phase = Phase::Resolved;
            session.cancel_task();
            let stale: Vec<PromptHandle> = session
                .prompts
                .drain(..)
                .filter(|handle| *handle != clicked)
                .collect();

            match claim {
                Claim::Won => (session_id, reporter, other, stale),
                Claim::Lost => (session_id, other, reporter, stale),
            }
        };

        let stats = self.inner.stats.clone();
        match tokio::task::spawn_blocking(move || stats.record_result(winner, loser)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("Duel {session_id} result kept in memory only: {e}"),
            Err(e) => tracing::error!("Statistics commit for duel {session_id} did not finish: {e}"),
        }

        metrics::DUELS_RESOLVED_TOTAL.inc();
        tracing::info!("Duel {session_id} resolved: {winner} beat {loser} (reported by {reporter})");
        let outcome = Prompt::text(outcome_prompt(winner, loser));
        self.retire_prompts(session_id, &stale, &outcome).await;
        Ok(Response::update(outcome))
    }

    // ── Re-prompting ──────────────────────────────────────────────────

    fn spawn_reprompt(&self, session_id: Uuid) -> Option<JoinHandle<()>> {
        let interval = self.inner.config.reprompt_interval?;
        let max = self.inner.config.max_reprompts;
        let engine = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();

        Some(tokio::spawn(async move {
            let mut sent: u32 = 0;
            loop {
                if *shutdown.borrow() {
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => {
                        tracing::debug!("Re-prompt for duel {session_id} stopped by shutdown");
                        return;
                    }
                }
                if max.is_some_and(|max| sent >= max) {
                    engine.abandon_unreported(session_id).await;
                    return;
                }
                if !engine.reprompt(session_id).await {
                    return;
                }
                sent += 1;
            }
        }))
    }

    /// Post a fresh result prompt. Returns false once the duel is no longer
    /// active.
    async fn reprompt(&self, session_id: Uuid) -> bool {
        let (channel_id, challenger, opponent) = {
            let guard = lock(&self.inner.sessions);
            match guard.by_id.get(&session_id) {
                Some(s) if s.phase == Phase::Active => match s.opponent {
                    Some(opponent) => (s.channel_id, s.challenger, opponent),
                    None => return false,
                },
                _ => return false,
            }
        };

        match self
            .inner
            .sink
            .post(channel_id, reprompt_prompt(challenger, opponent))
            .await
        {
            Ok(handle) => {
                let previous = {
                    let mut guard = lock(&self.inner.sessions);
                    match guard.by_id.get_mut(&session_id) {
                        Some(s) if s.phase == Phase::Active => {
                            let previous = s.current_prompt().cloned();
                            s.prompts.push(handle.clone());
                            Some(previous)
                        }
                        _ => None,
                    }
                };
                let Some(previous) = previous else {
                    // Resolved while the post was in flight.
                    self.retire_prompts(session_id, &[handle], &Prompt::text(FINISHED_TEXT))
                        .await;
                    return false;
                };

                metrics::REPROMPTS_TOTAL.inc();
                tracing::info!("Re-prompted duel {session_id} for a result");
                if let Some(previous) = previous {
                    self.retire_prompts(session_id, &[previous], &Prompt::text(MOVED_TEXT))
                        .await;
                }
            }
            Err(e) => tracing::warn!("Could not re-prompt duel {session_id}: {e}"),
        }
        true
    }

    /// Replace prompts with control-free text. Failures are logged only.
    async fn retire_prompts(&self, session_id: Uuid, handles: &[PromptHandle], text: &Prompt) {
        for handle in handles {
            if let Err(e) = self.inner.sink.edit(handle, text.clone()).await {
                tracing::warn!(
                    "Could not clear controls of {} for duel {session_id}: {e}",
                    handle.message
                );
            }
        }
    }

    async fn abandon_unreported(&self, session_id: Uuid) {
        let (prompts, challenger, opponent) = {
            let mut guard = lock(&self.inner.sessions);
            match guard.by_id.get(&session_id) {
                Some(s) if s.phase == Phase::Active => {}
                _ => return,
            }
            let Some(mut session) = guard.retire(session_id) else {
                return;
            };
            session.phase = Phase::Expired;
            session.task.take();
            let Some(opponent) = session.opponent else {
                return;
            };
            (std::mem::take(&mut session.prompts), session.challenger, opponent)
        };

        metrics::DUELS_EXPIRED_TOTAL
            .with_label_values(&["report"])
            .inc();
        tracing::warn!("Duel {session_id} dropped: no result reported");
        self.retire_prompts(
            session_id,
            &prompts,
            &Prompt::text(unreported_prompt(challenger, opponent)),
        )
        .await;
    }

    // ── Introspection / lifecycle ─────────────────────────────────────

    pub fn session_info(&self, session_id: Uuid) -> Option<SessionInfo> {
        lock(&self.inner.sessions)
            .by_id
            .get(&session_id)
            .map(DuelSession::info)
    }

    /// The Active duel for an ordered (challenger, opponent) pair.
    pub fn active_duel(&self, challenger: UserId, opponent: UserId) -> Option<SessionInfo> {
        let guard = lock(&self.inner.sessions);
        let id = guard.active.get(&(challenger, opponent))?;
        guard.by_id.get(id).map(DuelSession::info)
    }

    /// Number of sessions still awaiting an answer or a result.
    pub fn session_count(&self) -> usize {
        lock(&self.inner.sessions).by_id.len()
    }

    /// Stop every timer and re-prompt task. In-flight duels are lost.
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        let mut guard = lock(&self.inner.sessions);
        for session in guard.by_id.values_mut() {
            session.cancel_task();
        }
        if !guard.by_id.is_empty() {
            tracing::warn!("Shutting down with {} duels in flight", guard.by_id.len());
        }
    }
}

/// A challenge can be answered while it awaits a response, by anyone but
/// the challenger, and only by the addressee when targeted.
fn check_responder(session: &DuelSession, responder: UserId) -> Result<(), DuelError> {
    if session.phase != Phase::AwaitingResponse {
        return Err(DuelError::ChallengeUnavailable);
    }
    if responder == session.challenger {
        return Err(DuelError::OwnChallenge);
    }
    if session.targeted && session.opponent != Some(responder) {
        return Err(DuelError::NotAddressee);
    }
    Ok(())
}

// ── Prompt text ───────────────────────────────────────────────────────

const MOVED_TEXT: &str = "⏰ This prompt was re-posted below.";
const FINISHED_TEXT: &str = "⌛ This duel is already over.";

fn challenge_prompt(id: Uuid, challenger: UserId, opponent: Option<UserId>) -> Prompt {
    let content = match opponent {
        Some(opponent) => format!(
            "🛡️ {}, {} challenges you to a duel!",
            opponent.mention(),
            challenger.mention()
        ),
        None => format!(
            "⚔️ {} challenges anyone to a duel! Who accepts?",
            challenger.mention()
        ),
    };
    Prompt::with_controls(
        content,
        vec![
            Control {
                custom_id: ButtonAction::Accept(id).to_string(),
                label: "✅ Accept".into(),
                style: ButtonStyle::Success,
            },
            Control {
                custom_id: ButtonAction::Decline(id).to_string(),
                label: "❌ Decline".into(),
                style: ButtonStyle::Danger,
            },
        ],
    )
}

fn result_controls(challenger: UserId, opponent: UserId) -> Vec<Control> {
    vec![
        Control {
            custom_id: ButtonAction::Report {
                claim: Claim::Won,
                challenger,
                opponent,
            }
            .to_string(),
            label: "🥇 I won".into(),
            style: ButtonStyle::Primary,
        },
        Control {
            custom_id: ButtonAction::Report {
                claim: Claim::Lost,
                challenger,
                opponent,
            }
            .to_string(),
            label: "🥈 I lost".into(),
            style: ButtonStyle::Secondary,
        },
    ]
}

fn duel_prompt(challenger: UserId, opponent: UserId) -> Prompt {
    Prompt::with_controls(
        format!(
            "⚔️ The duel between {} and {} has begun! Who won?",
            challenger.mention(),
            opponent.mention()
        ),
        result_controls(challenger, opponent),
    )
}

fn reprompt_prompt(challenger: UserId, opponent: UserId) -> Prompt {
    Prompt::with_controls(
        format!(
            "⏰ {} vs {}: who won? Report the result below.",
            challenger.mention(),
            opponent.mention()
        ),
        result_controls(challenger, opponent),
    )
}

fn declined_prompt(targeted: bool, responder: UserId) -> Prompt {
    if targeted {
        Prompt::text(format!("❌ {} declined the duel.", responder.mention()))
    } else {
        Prompt::text("❌ The open challenge was declined.")
    }
}

fn expired_prompt(challenger: UserId) -> String {
    format!("⌛ Nobody answered {}'s challenge.", challenger.mention())
}

fn unreported_prompt(challenger: UserId, opponent: UserId) -> String {
    format!(
        "⌛ The duel between {} and {} ended without a reported result.",
        challenger.mention(),
        opponent.mention()
    )
}

fn outcome_prompt(winner: UserId, loser: UserId) -> String {
    format!(
        "🏁 Winner: {}! Defeated: {}.",
        winner.mention(),
        loser.mention()
    )
}
