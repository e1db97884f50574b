// Ledger backups - full-file copies taken before destructive actions
//
// Layout next to the ledger file:
//   sync.db
//   sync.db.20240101100000.bak
//   sync.db.20240101113000.bak
//
// The timestamp in the name (UTC) is the creation time and the sort key.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tracing::{debug, error, info, warn};

use super::models::BackupSnapshot;
use crate::error::AppResult;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const SUFFIX: &str = ".bak";

pub struct BackupManager {
    db_path: PathBuf,
    retention: usize,
}

impl BackupManager {
    pub fn new(db_path: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            db_path: db_path.into(),
            retention,
        }
    }

    pub fn retention(&self) -> usize {
        self.retention
    }

    /// `<storage-path>.<YYYYMMDDHHMMSS>.bak`
    pub fn snapshot_path(&self, at: DateTime<Utc>) -> PathBuf {
        let mut name: OsString = self.db_path.as_os_str().to_os_string();
        name.push(format!(".{}{}", at.format(TIMESTAMP_FORMAT), SUFFIX));
        PathBuf::from(name)
    }

    /// Copy the ledger file. Returns `None` when there is no ledger file yet.
    ///
    /// An existing snapshot is never overwritten: if one already exists for
    /// this second it is the earlier state and is kept as is.
    pub async fn snapshot_at(&self, at: DateTime<Utc>) -> AppResult<Option<PathBuf>> {
        if !tokio::fs::try_exists(&self.db_path).await? {
            warn!("Ledger file {} does not exist, skipping backup", self.db_path.display());
            return Ok(None);
        }

        let target = self.snapshot_path(at);
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&target)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("Backup {} already exists, keeping it", target.display());
                return Ok(Some(target));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = Self::copy_into(&self.db_path, &mut file).await {
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(&target).await {
                warn!("Could not remove partial backup {}: {}", target.display(), cleanup);
            }
            return Err(e.into());
        }
        info!("💾 Ledger backed up to {}", target.display());

        Ok(Some(target))
    }

    async fn copy_into(source: &Path, file: &mut File) -> std::io::Result<()> {
        let mut ledger = File::open(source).await?;
        tokio::io::copy(&mut ledger, file).await?;
        file.sync_all().await
    }

    /// Existing snapshots, oldest first
    pub async fn list_snapshots(&self) -> AppResult<Vec<BackupSnapshot>> {
        let dir = self
            .db_path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let prefix = match self.db_path.file_name().and_then(|name| name.to_str()) {
            Some(name) => format!("{}.", name),
            None => return Ok(Vec::new()),
        };

        let mut snapshots = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(created_at) = Self::parse_snapshot_name(name, &prefix) {
                snapshots.push(BackupSnapshot {
                    path: entry.path(),
                    created_at,
                });
            }
        }

        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.path.cmp(&b.path)));
        Ok(snapshots)
    }

    /// Delete the oldest snapshots until at most `keep` remain.
    /// Returns the deleted paths.
    pub async fn enforce_retention(&self, keep: usize) -> AppResult<Vec<PathBuf>> {
        let snapshots = self.list_snapshots().await?;
        if snapshots.len() <= keep {
            return Ok(Vec::new());
        }

        let excess = snapshots.len() - keep;
        let mut deleted = Vec::with_capacity(excess);
        for snapshot in snapshots.into_iter().take(excess) {
            tokio::fs::remove_file(&snapshot.path).await?;
            info!("🗑️  Deleted old backup: {}", snapshot.path.display());
            deleted.push(snapshot.path);
        }

        Ok(deleted)
    }

    pub async fn run_cycle(&self) -> bool {
        self.run_cycle_at(Utc::now()).await
    }

    /// Snapshot then retention. Never fails: errors are logged and the
    /// caller goes ahead with the removal. Returns whether a snapshot exists.
    pub async fn run_cycle_at(&self, at: DateTime<Utc>) -> bool {
        let snapshotted = match self.snapshot_at(at).await {
            Ok(path) => path.is_some(),
            Err(e) => {
                error!("❌ Backup of {} failed: {}", self.db_path.display(), e);
                false
            }
        };

        if let Err(e) = self.enforce_retention(self.retention).await {
            error!("❌ Backup retention failed: {}", e);
        }

        snapshotted
    }

    fn parse_snapshot_name(name: &str, prefix: &str) -> Option<DateTime<Utc>> {
        let stamp = name.strip_prefix(prefix)?.strip_suffix(SUFFIX)?;
        if stamp.len() != 14 || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}
