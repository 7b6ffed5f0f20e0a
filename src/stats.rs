// Statistics store: per-user win/loss records persisted as a flat JSON file.
//
// Every commit rewrites the whole snapshot to the primary file, an optional
// compatibility copy and a fixed backup copy. Each target is written through
// a temp file + rename so readers never observe a torn snapshot.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::lock;
use crate::metrics;
use crate::platform::UserId;

/// Win/loss record for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStat {
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    /// Opponent id -> number of duels won against them.
    #[serde(default)]
    pub victories_over: BTreeMap<UserId, u32>,
}

impl UserStat {
    pub fn total_duels(&self) -> u32 {
        self.wins + self.losses
    }

    /// Percentage of duels won, rounded to one decimal place.
    pub fn win_rate(&self) -> f64 {
        let total = self.total_duels();
        if total == 0 {
            return 0.0;
        }
        let rate = self.wins as f64 / total as f64 * 100.0;
        (rate * 10.0).round() / 10.0
    }
}

pub type StatsMap = BTreeMap<UserId, UserStat>;

/// On-disk locations used by the store.
#[derive(Debug, Clone)]
pub struct StatsPaths {
    pub primary: PathBuf,
    /// Duplicate written at a legacy location, if configured.
    pub compat: Option<PathBuf>,
    /// Fixed secondary copy used when the primary cannot be loaded.
    pub backup: PathBuf,
    /// Directory for timestamped rotating snapshots.
    pub snapshot_dir: PathBuf,
    /// How many rotating snapshots to keep.
    pub snapshot_keep: usize,
}

impl StatsPaths {
    /// Paths rooted in a single directory, handy for tests and local runs.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            primary: dir.join("stats.json"),
            compat: None,
            backup: dir.join("stats.backup.json"),
            snapshot_dir: dir.join("backups"),
            snapshot_keep: 24,
        }
    }
}

/// Aggregate counts reported by the admin backup command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSummary {
    pub users: usize,
    pub duels: u64,
}

/// Thread-safe statistics store. The in-memory map is authoritative; disk is
/// a mirror refreshed on every commit.
#[derive(Debug)]
pub struct StatsStore {
    paths: StatsPaths,
    inner: Mutex<StatsMap>,
}

impl StatsStore {
    /// Load the store from disk. Never fails: a missing or unreadable primary
    /// falls back to the backup, and a bad backup falls back to empty.
    pub fn load(paths: StatsPaths) -> Self {
        let map = load_map(&paths);
        tracing::info!(
            "Statistics loaded: {} users from {}",
            map.len(),
            paths.primary.display()
        );
        Self {
            paths,
            inner: Mutex::new(map),
        }
    }

    /// Store with the given contents, not yet written anywhere.
    pub fn with_map(paths: StatsPaths, map: StatsMap) -> Self {
        Self {
            paths,
            inner: Mutex::new(map),
        }
    }

    pub fn paths(&self) -> &StatsPaths {
        &self.paths
    }

    pub fn get_user_stat(&self, user: UserId) -> Option<UserStat> {
        lock(&self.inner).get(&user).cloned()
    }

    /// Copy of the full in-memory map.
    pub fn snapshot_map(&self) -> StatsMap {
        lock(&self.inner).clone()
    }

    pub fn summary(&self) -> StatsSummary {
        let map = lock(&self.inner);
        StatsSummary {
            users: map.len(),
            duels: map.values().map(|s| s.wins as u64).sum(),
        }
    }

    /// Apply one resolved duel and commit.
    ///
    /// The in-memory update always happens. An `Err` means no write target
    /// accepted the new snapshot; it stays in memory until the next commit.
    pub fn record_result(&self, winner: UserId, loser: UserId) -> Result<(), StoreError> {
        let mut map = lock(&self.inner);

        let w = map.entry(winner).or_default();
        w.wins += 1;
        *w.victories_over.entry(loser).or_insert(0) += 1;
        map.entry(loser).or_default().losses += 1;

        // Written under the lock so snapshots on disk never go backwards.
        self.write_targets(&map)
    }

    /// Write the current map to every configured target.
    pub fn commit(&self) -> Result<(), StoreError> {
        let map = lock(&self.inner);
        self.write_targets(&map)
    }

    /// Write a timestamped snapshot into the snapshot directory and prune old
    /// ones. Returns the path written.
    pub fn snapshot(&self) -> Result<PathBuf, StoreError> {
        let json = {
            let map = lock(&self.inner);
            serde_json::to_vec_pretty(&*map)?
        };

        let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let path = self.paths.snapshot_dir.join(format!("stats-{stamp}.json"));
        write_atomic(&path, &json).map_err(|source| StoreError::Write {
            path: path.clone(),
            source,
        })?;

        if let Err(e) = prune_snapshots(&self.paths.snapshot_dir, self.paths.snapshot_keep) {
            tracing::warn!("Failed to prune old snapshots: {e}");
        }
        tracing::info!("Statistics snapshot written to {}", path.display());
        Ok(path)
    }

    fn write_targets(&self, map: &StatsMap) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(map)?;

        let mut targets: Vec<(&'static str, &Path)> = vec![("primary", &self.paths.primary)];
        if let Some(compat) = &self.paths.compat {
            targets.push(("compat", compat));
        }
        targets.push(("backup", &self.paths.backup));

        let mut written = 0;
        for (label, path) in targets {
            match write_atomic(path, &json) {
                Ok(()) => written += 1,
                Err(e) => {
                    metrics::STATS_WRITE_FAILURES_TOTAL
                        .with_label_values(&[label])
                        .inc();
                    tracing::error!("Failed to write {label} statistics {}: {e}", path.display());
                }
            }
        }

        if written == 0 {
            tracing::error!("Statistics not persisted; in-memory state is the only copy");
            return Err(StoreError::AllTargetsFailed);
        }
        tracing::debug!("Statistics saved ({written} targets)");
        Ok(())
    }
}

fn load_map(paths: &StatsPaths) -> StatsMap {
    match read_map(&paths.primary) {
        Ok(Some(map)) => return map,
        Ok(None) => {
            tracing::info!("No statistics file at {}", paths.primary.display());
        }
        Err(e) => tracing::error!("{e}; trying backup"),
    }

    match read_map(&paths.backup) {
        Ok(Some(map)) => {
            tracing::warn!(
                "Recovered {} users from backup {}",
                map.len(),
                paths.backup.display()
            );
            map
        }
        Ok(None) => StatsMap::new(),
        Err(e) => {
            tracing::error!("{e}; starting with empty statistics");
            StatsMap::new()
        }
    }
}

/// `Ok(None)` when the file does not exist.
fn read_map(path: &Path) -> Result<Option<StatsMap>, StoreError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    fs::write(&tmp, bytes)?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

fn prune_snapshots(dir: &Path, keep: usize) -> io::Result<()> {
    // The snapshot just written always survives.
    let keep = keep.max(1);
    let mut snapshots: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("stats-") && n.ends_with(".json"))
        })
        .collect();

    if snapshots.len() <= keep {
        return Ok(());
    }
    // Timestamped names sort chronologically.
    snapshots.sort();
    let excess = snapshots.len() - keep;
    for old in snapshots.into_iter().take(excess) {
        fs::remove_file(&old)?;
        tracing::debug!("Pruned snapshot {}", old.display());
    }
    Ok(())
}
