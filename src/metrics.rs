// Prometheus metrics definitions for the duel bot.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // ── Gauges ───────────────────────────────────────────────────────

    /// Duel sessions awaiting an answer or a result.
    pub static ref ACTIVE_SESSIONS: IntGauge =
        IntGauge::new("duel_active_sessions", "Duels awaiting an answer or a result").unwrap();

    /// Bridge clients subscribed to outbound events.
    pub static ref CONNECTED_BRIDGES: IntGauge =
        IntGauge::new("duel_connected_bridges", "Bridge clients on the event stream").unwrap();

    // ── Counters ─────────────────────────────────────────────────────

    /// Challenges issued, by kind (open, targeted).
    pub static ref DUELS_ISSUED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("duel_challenges_issued_total", "Challenges issued"),
        &["kind"],
    )
    .unwrap();

    pub static ref DUELS_ACCEPTED_TOTAL: IntCounter =
        IntCounter::new("duel_challenges_accepted_total", "Challenges accepted").unwrap();

    pub static ref DUELS_DECLINED_TOTAL: IntCounter =
        IntCounter::new("duel_challenges_declined_total", "Challenges declined").unwrap();

    /// Duels that timed out, by stage (response, report).
    pub static ref DUELS_EXPIRED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("duel_expired_total", "Duels that timed out"),
        &["stage"],
    )
    .unwrap();

    pub static ref DUELS_RESOLVED_TOTAL: IntCounter =
        IntCounter::new("duel_resolved_total", "Duels resolved by a self-report").unwrap();

    pub static ref REPROMPTS_TOTAL: IntCounter =
        IntCounter::new("duel_reprompts_total", "Result prompts re-posted").unwrap();

    /// Inbound interactions, by kind (command, button).
    pub static ref INTERACTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("duel_interactions_total", "Inbound interactions handled"),
        &["kind"],
    )
    .unwrap();

    pub static ref DUPLICATE_INTERACTIONS_TOTAL: IntCounter = IntCounter::new(
        "duel_duplicate_interactions_total",
        "Redelivered interactions dropped",
    )
    .unwrap();

    pub static ref INTERACTION_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "duel_interaction_failures_total",
        "Interactions that failed unexpectedly",
    )
    .unwrap();

    /// Statistics write failures, by target (primary, compat, backup).
    pub static ref STATS_WRITE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("duel_stats_write_failures_total", "Statistics write failures"),
        &["target"],
    )
    .unwrap();

    pub static ref OUTBOUND_EVENTS_TOTAL: IntCounter =
        IntCounter::new("duel_outbound_events_total", "Events sent to the bridge").unwrap();

    // ── Histograms ───────────────────────────────────────────────────

    /// Time spent handling one interaction, in seconds.
    pub static ref INTERACTION_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "duel_interaction_duration_seconds",
            "Interaction handling time in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]),
    )
    .unwrap();
}

/// Register all metrics with the custom registry. Call once at startup.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(ACTIVE_SESSIONS.clone()),
        Box::new(CONNECTED_BRIDGES.clone()),
        Box::new(DUELS_ISSUED_TOTAL.clone()),
        Box::new(DUELS_ACCEPTED_TOTAL.clone()),
        Box::new(DUELS_DECLINED_TOTAL.clone()),
        Box::new(DUELS_EXPIRED_TOTAL.clone()),
        Box::new(DUELS_RESOLVED_TOTAL.clone()),
        Box::new(REPROMPTS_TOTAL.clone()),
        Box::new(INTERACTIONS_TOTAL.clone()),
        Box::new(DUPLICATE_INTERACTIONS_TOTAL.clone()),
        Box::new(INTERACTION_FAILURES_TOTAL.clone()),
        Box::new(STATS_WRITE_FAILURES_TOTAL.clone()),
        Box::new(OUTBOUND_EVENTS_TOTAL.clone()),
        Box::new(INTERACTION_DURATION_SECONDS.clone()),
    ];

    for c in collectors {
        if let Err(e) = REGISTRY.register(c) {
            tracing::warn!("Metric registration skipped: {e}");
        }
    }
}

/// Serialize all registered metrics to the Prometheus text exposition format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {e}");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
