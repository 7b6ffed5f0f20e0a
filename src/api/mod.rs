// HTTP surface: liveness, metrics, inbound interactions from the bridge and
// the outbound event stream.

pub mod ws;

use axum::{
    extract::{FromRequestParts, Json, State},
    http::{request::Parts, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use crate::dispatch::Dispatcher;
use crate::interaction::{command_definitions, registration_route, Interaction};
use crate::metrics;
use crate::platform::{ApplicationId, BroadcastSink, GuildId};

// ── Shared application state ─────────────────────────────────────────

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub sink: BroadcastSink,
    /// SHA-256 of the bot token, hex encoded.
    token_hash: Arc<str>,
    pub client_id: ApplicationId,
    pub guild_id: GuildId,
}

impl AppState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        sink: BroadcastSink,
        token: &str,
        client_id: ApplicationId,
        guild_id: GuildId,
    ) -> Self {
        Self {
            dispatcher,
            sink,
            token_hash: hash_token(token).into(),
            client_id,
            guild_id,
        }
    }
}

fn json_error(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(json!({ "error": msg })))
}

/// Hash a raw token with SHA-256 so header checks never compare the secret
/// itself.
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

// ── Bridge authentication ────────────────────────────────────────────

/// Marker extractor: the request carries `Authorization: Bot <token>` with
/// the bot's own token.
#[derive(Debug, Clone, Copy)]
pub struct BridgeAuth;

impl FromRequestParts<AppState> for BridgeAuth {
    type Rejection = (StatusCode, Json<Value>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                (
                    StatusCode::UNAUTHORIZED,
                    Json(json!({"error": "Missing Authorization header"})),
                )
            })?;

        let token = auth_header.strip_prefix("Bot ").ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid Authorization header format"})),
            )
        })?;

        if hash_token(token) != *state.token_hash {
            tracing::warn!("Rejected bridge request with an invalid token");
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid token"})),
            ));
        }
        Ok(BridgeAuth)
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/metrics", get(get_metrics))
        .route("/commands", get(get_commands))
        .route("/interactions", post(post_interaction))
        .route("/ws/events", get(ws::ws_events))
        .with_state(state)
}

async fn index() -> &'static str {
    "Duel bot is running!"
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "duel-bot" }))
}

async fn get_metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics::gather_metrics(),
    )
        .into_response()
}

async fn get_commands(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "route": registration_route(state.client_id, state.guild_id),
        "commands": command_definitions(),
    }))
}

async fn post_interaction(
    State(state): State<AppState>,
    _auth: BridgeAuth,
    Json(interaction): Json<Interaction>,
) -> axum::response::Response {
    if interaction.application_id != state.client_id {
        tracing::warn!(
            "Interaction {} addressed to application {}",
            interaction.id,
            interaction.application_id
        );
        return json_error(StatusCode::FORBIDDEN, "Interaction is for another application")
            .into_response();
    }
    if let Some(guild_id) = interaction.guild_id {
        if guild_id != state.guild_id {
            tracing::warn!("Interaction {} from foreign guild {guild_id}", interaction.id);
            return json_error(StatusCode::FORBIDDEN, "Interaction is from another guild")
                .into_response();
        }
    }

    let response = state.dispatcher.handle(&interaction).await;
    Json(response).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duel::{DuelConfig, DuelEngine};
    use crate::registry::InteractionDedup;
    use crate::stats::{StatsMap, StatsPaths, StatsStore};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn app() -> Router {
        let dir = std::env::temp_dir().join(format!("duel-bot-api-{}", Uuid::new_v4()));
        let stats = Arc::new(StatsStore::with_map(StatsPaths::in_dir(&dir), StatsMap::new()));
        let sink = BroadcastSink::new(16);
        let engine = DuelEngine::new(DuelConfig::default(), stats, Arc::new(sink.clone()));
        let dispatcher = Dispatcher::new(
            engine,
            InteractionDedup::new(Duration::from_secs(300)),
            Default::default(),
        );
        router(AppState::new(
            Arc::new(dispatcher),
            sink,
            "secret",
            ApplicationId(10),
            GuildId(20),
        ))
    }

    fn interaction_request(auth: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/interactions")
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn duel_command(application_id: &str, guild_id: &str) -> Value {
        json!({
            "id": "1",
            "token": "tok",
            "application_id": application_id,
            "guild_id": guild_id,
            "channel_id": "30",
            "user": "40",
            "type": "command",
            "name": "duel",
            "options": { "opponent": "50" }
        })
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_liveness_routes() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"Duel bot is running!");

        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "ok", "service": "duel-bot"})
        );
    }

    #[tokio::test]
    async fn test_metrics_route() {
        metrics::register_metrics();
        let response = app()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_commands_route() {
        let response = app()
            .oneshot(Request::builder().uri("/commands").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["route"], "/applications/10/guilds/20/commands");
        assert_eq!(body["commands"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_interaction_requires_bot_token() {
        for auth in [None, Some("Bearer secret"), Some("Bot wrong")] {
            let response = app()
                .oneshot(interaction_request(auth, duel_command("10", "20")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "auth {auth:?}");
        }
    }

    #[tokio::test]
    async fn test_interaction_for_other_app_or_guild() {
        let response = app()
            .oneshot(interaction_request(Some("Bot secret"), duel_command("11", "20")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = app()
            .oneshot(interaction_request(Some("Bot secret"), duel_command("10", "21")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_interaction_returns_response() {
        let response = app()
            .oneshot(interaction_request(Some("Bot secret"), duel_command("10", "20")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["type"], "message");
        assert_eq!(body["visibility"], "channel");
        assert_eq!(body["prompt"]["controls"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_hash_token_is_hex_sha256() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_token("Secret"));
    }
}
