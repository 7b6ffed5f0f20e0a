// Bot configuration, loaded from environment variables and CLI flags.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::duel::DuelConfig;
use crate::error::ConfigError;
use crate::platform::{ApplicationId, GuildId, UserId};
use crate::stats::StatsPaths;

/// Bot configuration.
#[derive(Clone)]
pub struct Config {
    /// Bot token. Bridge clients present it as `Authorization: Bot <token>`.
    pub token: String,
    /// Application (client) id the bridge registers commands under.
    pub client_id: ApplicationId,
    /// Guild the bot serves; interactions from other guilds are refused.
    pub guild_id: GuildId,
    /// Port to bind the HTTP server to.
    pub port: u16,
    pub stats: StatsPaths,
    /// How often the maintenance worker takes a rotating snapshot.
    pub backup_interval: Duration,
    pub duel: DuelConfig,
    /// How long an interaction id is remembered for dedup.
    pub dedup_retention: Duration,
    /// Users allowed to run operator commands.
    pub admin_ids: HashSet<UserId>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token", &"<redacted>")
            .field("client_id", &self.client_id)
            .field("guild_id", &self.guild_id)
            .field("port", &self.port)
            .field("stats", &self.stats)
            .field("backup_interval", &self.backup_interval)
            .field("duel", &self.duel)
            .field("dedup_retention", &self.dedup_retention)
            .field("admin_ids", &self.admin_ids)
            .finish()
    }
}

impl Config {
    /// Load configuration from the process environment and CLI arguments.
    ///
    /// Required environment variables:
    /// - `TOKEN` - bot token
    /// - `CLIENT_ID` - application id
    /// - `GUILD_ID` - guild id
    ///
    /// Optional environment variables:
    /// - `PORT` - HTTP port (default: 3000)
    /// - `STATS_FILE` - primary statistics file (default: `./stats.json`)
    /// - `STATS_COMPAT_FILE` - extra copy written on every commit
    /// - `STATS_BACKUP_FILE` - fixed backup copy (default: `./stats.backup.json`)
    /// - `BACKUP_DIR` - rotating snapshot directory (default: `./backups`)
    /// - `BACKUP_INTERVAL_SECS` - snapshot interval (default: 3600)
    /// - `BACKUP_KEEP` - snapshots to keep (default: 24)
    /// - `RESPONSE_WINDOW_SECS` - challenge answer window (default: 15)
    /// - `REPORT_REPROMPT_SECS` - re-post the result prompt after this long
    ///   without a report (default: unset, no re-prompting)
    /// - `MAX_REPROMPTS` - re-post cap, or `unbounded` (default: 3)
    /// - `DEDUP_RETENTION_SECS` - interaction dedup window (default: 300)
    /// - `ADMIN_IDS` - comma-separated operator user ids
    ///
    /// CLI flags:
    /// - `--port <PORT>` - override the port
    /// - `--stats-file <PATH>` - override the primary statistics file
    pub fn load() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_sources(&args, |name| std::env::var(name).ok())
    }

    /// Build a configuration from explicit CLI args and an environment lookup.
    pub fn from_sources(
        args: &[String],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let token = required(&env, "TOKEN")?;
        let client_id = parse_var("CLIENT_ID", &required(&env, "CLIENT_ID")?)?;
        let guild_id = parse_var("GUILD_ID", &required(&env, "GUILD_ID")?)?;

        // Port: CLI flag --port takes precedence, then env var, then default
        let port = match Self::parse_cli_value(args, "--port").or_else(|| env("PORT")) {
            Some(raw) => parse_var("PORT", &raw)?,
            None => 3000,
        };

        let primary = Self::parse_cli_value(args, "--stats-file")
            .or_else(|| env("STATS_FILE"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./stats.json"));
        let stats = StatsPaths {
            primary,
            compat: env("STATS_COMPAT_FILE").map(PathBuf::from),
            backup: env("STATS_BACKUP_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./stats.backup.json")),
            snapshot_dir: env("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./backups")),
            snapshot_keep: optional(&env, "BACKUP_KEEP", 24)?,
        };
        if stats.snapshot_keep == 0 {
            return Err(ConfigError::Invalid {
                name: "BACKUP_KEEP",
                value: "0".into(),
            });
        }

        let backup_interval = Duration::from_secs(optional(&env, "BACKUP_INTERVAL_SECS", 3600)?);
        if backup_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "BACKUP_INTERVAL_SECS",
                value: "0".into(),
            });
        }

        let reprompt_interval = match env("REPORT_REPROMPT_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_var("REPORT_REPROMPT_SECS", &raw)?))
                .filter(|d| !d.is_zero()),
            None => None,
        };
        let max_reprompts = match env("MAX_REPROMPTS") {
            Some(raw) if raw.eq_ignore_ascii_case("unbounded") => None,
            Some(raw) => Some(parse_var("MAX_REPROMPTS", &raw)?),
            None => Some(3),
        };
        let window_secs: u64 = optional(&env, "RESPONSE_WINDOW_SECS", 15)?;
        // Challenge deadlines are computed from wall-clock time.
        let representable = i64::try_from(window_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|window| chrono::Utc::now().checked_add_signed(window))
            .is_some();
        if !representable {
            return Err(ConfigError::Invalid {
                name: "RESPONSE_WINDOW_SECS",
                value: window_secs.to_string(),
            });
        }
        let duel = DuelConfig {
            response_window: Duration::from_secs(window_secs),
            reprompt_interval,
            max_reprompts,
        };

        let dedup_retention = Duration::from_secs(optional(&env, "DEDUP_RETENTION_SECS", 300)?);

        let admin_ids = match env("ADMIN_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_var("ADMIN_IDS", s))
                .collect::<Result<HashSet<UserId>, _>>()?,
            None => HashSet::new(),
        };

        Ok(Config {
            token,
            client_id,
            guild_id,
            port,
            stats,
            backup_interval,
            duel,
            dedup_retention,
            admin_ids,
        })
    }

    /// Parse a CLI flag value like `--port 8080`.
    fn parse_cli_value(args: &[String], flag: &str) -> Option<String> {
        args.windows(2).find_map(|pair| {
            if pair[0] == flag {
                Some(pair[1].clone())
            } else {
                None
            }
        })
    }
}

fn required(env: &impl Fn(&str) -> Option<String>, name: &'static str) -> Result<String, ConfigError> {
    env(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(name))
}

fn optional<T: FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match env(name) {
        Some(raw) => parse_var(name, &raw),
        None => Ok(default),
    }
}

fn parse_var<T: FromStr>(name: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        name,
        value: raw.to_string(),
    })
}
