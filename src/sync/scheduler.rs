// Sync Scheduler - runs a reconciliation pass every SYNC_INTERVAL_SECONDS
//
// - First pass runs immediately on start
// - A pass always runs to completion; shutdown is only observed between passes
// - A pass longer than the interval delays the next tick instead of bursting

use chrono::Utc;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;

use crate::sync::reconciler::Reconciler;

pub struct SyncScheduler {
    interval: Duration,
    reconciler: Arc<Reconciler>,
}

impl SyncScheduler {
    pub fn new(interval: Duration, reconciler: Arc<Reconciler>) -> Self {
        Self {
            interval,
            reconciler,
        }
    }

    /// Loop until `shutdown` resolves. Returns the number of completed passes.
    pub async fn run_until<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            "⏰ Sync loop started, {} mappings every {}s",
            self.reconciler.targets().len(),
            self.interval.as_secs()
        );

        let mut passes = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("🛑 Shutdown requested, stopping sync loop");
                    break;
                }
                _ = ticker.tick() => {}
            }

            self.reconciler.run_pass(Utc::now()).await;
            passes += 1;
        }

        info!("✓ Sync loop stopped after {} passes", passes);
        passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::traits::{GroupMember, IdentityProvider, RoomDirectory};
    use crate::error::AppResult;
    use crate::ledger::models::MemberId;
    use crate::ledger::{BackupManager, LedgerRepository};
    use crate::sync::models::{JoinMethod, Mapping, RemovalAction, SyncDefaults};
    use crate::sync::reconciler::SyncSettings;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingIdentity {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IdentityProvider for CountingIdentity {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn list_group_members(&self, _group_ref: &str) -> AppResult<Vec<GroupMember>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
    }

    struct EmptyRooms;

    #[async_trait]
    impl RoomDirectory for EmptyRooms {
        fn name(&self) -> &'static str {
            "empty"
        }
        async fn list_members(&self, _room: &str) -> AppResult<HashSet<MemberId>> {
            Ok(HashSet::new())
        }
        async fn invite(&self, _room: &str, _member: &MemberId) -> AppResult<()> {
            Ok(())
        }
        async fn force_join(&self, _room: &str, _member: &MemberId) -> AppResult<()> {
            Ok(())
        }
        async fn kick(&self, _room: &str, _member: &MemberId, _reason: &str) -> AppResult<()> {
            Ok(())
        }
        async fn ban(&self, _room: &str, _member: &MemberId, _reason: &str) -> AppResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_pass_runs_immediately_then_waits() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("sync.db");
        let pool = crate::bootstrap::initialize_database(&db_path).await.unwrap();
        let identity = Arc::new(CountingIdentity::default());

        let target = Mapping {
            group: "staff".into(),
            space: "!a:example.org".into(),
            method: None,
            grace_period_minutes: None,
            remove_action: None,
        }
        .resolve(&SyncDefaults {
            join_method: JoinMethod::Invite,
            grace_period: chrono::Duration::minutes(120),
            remove_action: RemovalAction::Kick,
        });

        let reconciler = Arc::new(Reconciler::new(
            identity.clone(),
            Arc::new(EmptyRooms),
            Arc::new(LedgerRepository::new(pool)),
            Arc::new(BackupManager::new(&db_path, 3)),
            SyncSettings {
                targets: vec![target],
                own_id: MemberId::from("@bot:example.org"),
                removal_reason: "cleanup".into(),
            },
        ));

        let scheduler = SyncScheduler::new(Duration::from_secs(3600), reconciler);
        let passes = scheduler
            .run_until(tokio::time::sleep(Duration::from_millis(200)))
            .await;

        assert_eq!(passes, 1);
        assert_eq!(identity.calls.load(Ordering::SeqCst), 1);
    }
}
