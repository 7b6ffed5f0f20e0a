// Integration tests for the duel protocol driven through the dispatcher:
// concurrent reports, redelivered events, the open-challenge race and the
// statistics file round-trip.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use duel_bot::dispatch::Dispatcher;
use duel_bot::duel::{DuelConfig, DuelEngine};
use duel_bot::interaction::{CommandOptions, Interaction, InteractionKind};
use duel_bot::platform::{ApplicationId, BroadcastSink, ChannelId, GuildId, Response, UserId};
use duel_bot::registry::InteractionDedup;
use duel_bot::stats::{StatsPaths, StatsStore, UserStat};
use uuid::Uuid;

const ALICE: UserId = UserId(100);
const BOB: UserId = UserId(200);
const CHANNEL: ChannelId = ChannelId(7);

fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("duel-bot-it-{}", Uuid::new_v4()))
}

fn dispatcher_for(store: StatsStore, config: DuelConfig) -> Arc<Dispatcher> {
    let sink = BroadcastSink::new(64);
    let engine = DuelEngine::new(config, Arc::new(store), Arc::new(sink));
    Arc::new(Dispatcher::new(
        engine,
        InteractionDedup::new(Duration::from_secs(300)),
        HashSet::new(),
    ))
}

fn interaction(id: impl Into<String>, user: UserId, kind: InteractionKind) -> Interaction {
    let id = id.into();
    Interaction {
        token: format!("tok-{id}"),
        id,
        application_id: ApplicationId(1),
        guild_id: Some(GuildId(2)),
        channel_id: CHANNEL,
        user,
        kind,
    }
}

fn duel_command(id: &str, user: UserId, opponent: Option<UserId>) -> Interaction {
    interaction(
        id,
        user,
        InteractionKind::Command {
            name: "duel".into(),
            options: CommandOptions { opponent },
        },
    )
}

fn click(id: impl Into<String>, user: UserId, custom_id: &str) -> Interaction {
    interaction(
        id,
        user,
        InteractionKind::Button {
            custom_id: custom_id.into(),
            message_id: "prompt-1".into(),
        },
    )
}

fn accept_control(response: &Response) -> String {
    match response {
        Response::Message { prompt, .. } => prompt.controls[0].custom_id.clone(),
        other => panic!("expected a challenge prompt, got {other:?}"),
    }
}

async fn start_duel(dispatcher: &Dispatcher, challenger: UserId, opponent: UserId) {
    let challenge = dispatcher
        .handle(&duel_command(&Uuid::new_v4().to_string(), challenger, Some(opponent)))
        .await;
    let accepted = dispatcher
        .handle(&click(Uuid::new_v4().to_string(), opponent, &accept_control(&challenge)))
        .await;
    assert!(matches!(accepted, Response::Update { .. }), "{accepted:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reports_commit_exactly_once() {
    let dir = temp_dir();
    let dispatcher = dispatcher_for(StatsStore::load(StatsPaths::in_dir(&dir)), DuelConfig::default());
    start_duel(&dispatcher, ALICE, BOB).await;

    let custom_id = format!("win_{ALICE}_{BOB}");
    let mut tasks = Vec::new();
    for i in 0..16 {
        let dispatcher = dispatcher.clone();
        let reporter = if i % 2 == 0 { ALICE } else { BOB };
        let event = click(format!("report-{i}"), reporter, &custom_id);
        tasks.push(tokio::spawn(async move { dispatcher.handle(&event).await }));
    }

    let mut updates = 0;
    for task in tasks {
        match task.await.unwrap() {
            Response::Update { .. } => updates += 1,
            other => {
                assert!(other.is_private(), "{other:?}");
                assert_eq!(other.content(), Some("This duel has already been resolved."));
            }
        }
    }
    assert_eq!(updates, 1);

    let stats = dispatcher.engine().stats();
    let total_wins: u32 = stats.snapshot_map().values().map(|s| s.wins).sum();
    let total_losses: u32 = stats.snapshot_map().values().map(|s| s.losses).sum();
    assert_eq!((total_wins, total_losses), (1, 1));
}

#[tokio::test]
async fn test_redelivered_report_is_handled_once() {
    let dispatcher = dispatcher_for(
        StatsStore::load(StatsPaths::in_dir(&temp_dir())),
        DuelConfig::default(),
    );
    start_duel(&dispatcher, ALICE, BOB).await;

    let event = click("777", BOB, &format!("win_{ALICE}_{BOB}"));
    let first = dispatcher.handle(&event).await;
    assert!(matches!(first, Response::Update { .. }));
    assert_eq!(dispatcher.handle(&event).await, Response::Ignore);

    let bob = dispatcher.engine().stats().get_user_stat(BOB).unwrap();
    assert_eq!((bob.wins, bob.losses), (1, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_open_challenge_has_one_acceptor() {
    let dispatcher = dispatcher_for(
        StatsStore::load(StatsPaths::in_dir(&temp_dir())),
        DuelConfig::default(),
    );
    let challenge = dispatcher.handle(&duel_command("c1", ALICE, None)).await;
    let accept = accept_control(&challenge);

    let mut tasks = Vec::new();
    for i in 0..8u64 {
        let dispatcher = dispatcher.clone();
        let event = click(format!("accept-{i}"), UserId(1_000 + i), &accept);
        tasks.push(tokio::spawn(async move { dispatcher.handle(&event).await }));
    }

    let mut accepted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Response::Update { .. } => accepted += 1,
            other => assert_eq!(
                other,
                Response::private("This challenge is no longer available.")
            ),
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(dispatcher.engine().session_count(), 1);
}

#[tokio::test]
async fn test_statistics_round_trip_through_file() {
    let dir = temp_dir();
    let paths = StatsPaths::in_dir(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        &paths.primary,
        format!(r#"{{"{ALICE}":{{"wins":2,"losses":1,"victoriesOver":{{"{BOB}":2}}}}}}"#),
    )
    .unwrap();

    let dispatcher = dispatcher_for(StatsStore::load(paths.clone()), DuelConfig::default());
    start_duel(&dispatcher, ALICE, BOB).await;
    dispatcher
        .handle(&click("r1", ALICE, &format!("win_{ALICE}_{BOB}")))
        .await;

    let reloaded = StatsStore::load(paths);
    assert_eq!(
        reloaded.get_user_stat(ALICE),
        Some(UserStat {
            wins: 3,
            losses: 1,
            victories_over: BTreeMap::from([(BOB, 3)]),
        })
    );
    assert_eq!(reloaded.get_user_stat(BOB).map(|s| s.losses), Some(1));

    let stats = dispatcher
        .handle(&interaction(
            "s1",
            ALICE,
            InteractionKind::Command {
                name: "statistics".into(),
                options: CommandOptions::default(),
            },
        ))
        .await;
    assert!(stats.content().unwrap().contains("Win rate: 75.0%"));
}

#[tokio::test]
async fn test_unwritable_primary_still_resolves() {
    let dir = temp_dir();
    let paths = StatsPaths::in_dir(&dir);
    // A directory where the primary file should be makes every write to it fail.
    std::fs::create_dir_all(&paths.primary).unwrap();

    let dispatcher = dispatcher_for(StatsStore::load(paths.clone()), DuelConfig::default());
    start_duel(&dispatcher, ALICE, BOB).await;
    let outcome = dispatcher
        .handle(&click("r1", BOB, &format!("lose_{ALICE}_{BOB}")))
        .await;
    assert!(matches!(outcome, Response::Update { .. }));

    assert_eq!(dispatcher.engine().stats().get_user_stat(ALICE).map(|s| s.wins), Some(1));
    let reloaded = StatsStore::load(paths);
    assert_eq!(reloaded.get_user_stat(ALICE).map(|s| s.wins), Some(1));
}

#[tokio::test]
async fn test_expired_challenge_has_no_effect() {
    let dispatcher = dispatcher_for(
        StatsStore::load(StatsPaths::in_dir(&temp_dir())),
        DuelConfig {
            response_window: Duration::from_millis(30),
            ..DuelConfig::default()
        },
    );
    let challenge = dispatcher.handle(&duel_command("c1", ALICE, Some(BOB))).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let late = dispatcher
        .handle(&click("a1", BOB, &accept_control(&challenge)))
        .await;
    assert_eq!(late, Response::private("This challenge is no longer available."));
    assert!(dispatcher.engine().stats().snapshot_map().is_empty());
    assert_eq!(dispatcher.engine().session_count(), 0);
}
