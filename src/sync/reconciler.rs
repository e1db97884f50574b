// Reconciler - one pass over every configured mapping
//
// Per mapping:
// 1. Fetch the group (authoritative) and the room roster (observed)
// 2. Diff the two sets
// 3. Add missing members, cancelling any pending removal for them
// 4. Drop pending removals for members back in the group or gone from the room
// 5. Track, wait on, or remove members that are not in the group
//
// A failed fetch skips the mapping for this pass. Nothing else is fatal.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::differ::diff;
use super::grace::{self, CandidateState};
use super::models::{JoinMethod, RemovalAction, SyncTarget};
use crate::adapters::authentik::MATRIX_ID_ATTRIBUTE;
use crate::adapters::traits::{IdentityProvider, RoomDirectory};
use crate::error::{AppError, AppResult};
use crate::ledger::models::MemberId;
use crate::ledger::{BackupManager, LedgerRepository};

/// Everything a pass needs besides its collaborators
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub targets: Vec<SyncTarget>,
    /// The bot's own address, never invited or removed
    pub own_id: MemberId,
    pub removal_reason: String,
}

/// What one mapping pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    pub added: usize,
    pub add_failures: usize,
    pub newly_tracked: usize,
    pub pending: usize,
    pub cancelled: usize,
    pub removed: usize,
    pub remove_failures: usize,
    /// Overdue but removal is disabled for this mapping
    pub overdue: usize,
    /// Entries dropped because the member left the room on their own
    pub departed: usize,
}

pub struct Reconciler {
    identity: Arc<dyn IdentityProvider>,
    rooms: Arc<dyn RoomDirectory>,
    ledger: Arc<LedgerRepository>,
    backups: Arc<BackupManager>,
    settings: SyncSettings,
}

impl Reconciler {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        rooms: Arc<dyn RoomDirectory>,
        ledger: Arc<LedgerRepository>,
        backups: Arc<BackupManager>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            identity,
            rooms,
            ledger,
            backups,
            settings,
        }
    }

    pub fn targets(&self) -> &[SyncTarget] {
        &self.settings.targets
    }

    /// Reconcile every mapping in order. Outcomes go to the logs and the ledger.
    pub async fn run_pass(&self, now: DateTime<Utc>) {
        info!("🔄 Starting sync pass over {} mappings", self.settings.targets.len());

        for target in &self.settings.targets {
            info!("Syncing group '{}' to room '{}'", target.group, target.room);

            match self.reconcile_target(target, now).await {
                Ok(report) => info!(
                    group = %target.group,
                    room = %target.room,
                    added = report.added,
                    removed = report.removed,
                    tracked = report.newly_tracked,
                    pending = report.pending,
                    cancelled = report.cancelled,
                    departed = report.departed,
                    overdue = report.overdue,
                    failures = report.add_failures + report.remove_failures,
                    "✓ Mapping synced"
                ),
                Err(e) => {
                    error!(
                        "❌ Skipping '{}' → '{}' this pass: {}",
                        target.group, target.room, e
                    );
                    if let Some(hint) = e.guidance() {
                        warn!("Hint: {}", hint);
                    }
                }
            }
        }

        info!("✓ Sync pass finished");
    }

    pub async fn reconcile_target(
        &self,
        target: &SyncTarget,
        now: DateTime<Utc>,
    ) -> AppResult<MappingReport> {
        let authoritative = self.fetch_authoritative(target).await?;
        let observed = self.rooms.list_members(&target.room).await?;

        let membership = diff(&authoritative, &observed, &self.settings.own_id);
        let mut report = MappingReport::default();

        if membership.is_empty() {
            debug!("Room '{}' already matches group '{}'", target.room, target.group);
        }

        self.apply_additions(target, &membership.to_add, &mut report).await;
        self.clear_stale(target, &authoritative, &observed, &mut report)
            .await;
        self.apply_removals(target, &membership.to_remove, now, &mut report).await;

        Ok(report)
    }

    async fn fetch_authoritative(&self, target: &SyncTarget) -> AppResult<HashSet<MemberId>> {
        let members = self.identity.list_group_members(&target.group).await?;

        let derived: Vec<_> = members.iter().filter(|m| m.is_derived()).collect();
        if !derived.is_empty() {
            info!(
                "{} of {} members of '{}' have no {} attribute, using derived addresses",
                derived.len(),
                members.len(),
                target.group,
                MATRIX_ID_ATTRIBUTE
            );
            for member in derived {
                debug!(
                    "Derived address {} for account '{}' (low confidence)",
                    member.member_id, member.username
                );
            }
        }

        Ok(members.into_iter().map(|m| m.member_id).collect())
    }

    async fn apply_additions(
        &self,
        target: &SyncTarget,
        to_add: &[MemberId],
        report: &mut MappingReport,
    ) {
        for member in to_add {
            info!(
                "User {} missing in {}. Action: {}",
                member, target.room, target.join_method
            );

            match self.ledger.delete(member, &target.room).await {
                Ok(true) => {
                    report.cancelled += 1;
                    info!("Cancelled pending removal of {} from {}", member, target.room);
                }
                Ok(false) => {}
                Err(e) => error!(
                    "Failed to clear pending removal of {} from {}: {}",
                    member, target.room, e
                ),
            }

            let outcome = match target.join_method {
                JoinMethod::Force => self.rooms.force_join(&target.room, member).await,
                JoinMethod::Invite => self.rooms.invite(&target.room, member).await,
            };

            match outcome {
                Ok(()) => report.added += 1,
                Err(e) => {
                    report.add_failures += 1;
                    error!(
                        "Failed to {} {} to {}: {}",
                        target.join_method, member, target.room, e
                    );
                }
            }
        }
    }

    /// Drop entries nobody will act on: members back in the group, and
    /// members who already left the room
    async fn clear_stale(
        &self,
        target: &SyncTarget,
        authoritative: &HashSet<MemberId>,
        observed: &HashSet<MemberId>,
        report: &mut MappingReport,
    ) {
        let candidates = match self.ledger.list_for_target(&target.room).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Could not list pending removals for {}: {}", target.room, e);
                return;
            }
        };

        for candidate in candidates {
            let reinstated = authoritative.contains(&candidate.member_id);
            if !reinstated && observed.contains(&candidate.member_id) {
                continue;
            }

            match self.ledger.delete(&candidate.member_id, &target.room).await {
                Ok(true) if reinstated => {
                    report.cancelled += 1;
                    info!(
                        "{} is back in group '{}', cancelled pending removal from {}",
                        candidate.member_id, target.group, target.room
                    );
                }
                Ok(true) => {
                    report.departed += 1;
                    info!(
                        "{} already left {}, dropped pending removal",
                        candidate.member_id, target.room
                    );
                }
                Ok(false) => {}
                Err(e) => error!(
                    "Failed to clear pending removal of {} from {}: {}",
                    candidate.member_id, target.room, e
                ),
            }
        }
    }

    async fn apply_removals(
        &self,
        target: &SyncTarget,
        to_remove: &[MemberId],
        now: DateTime<Utc>,
        report: &mut MappingReport,
    ) {
        for member in to_remove {
            let detected_at = match self.ledger.lookup(member, &target.room).await {
                Ok(detected_at) => detected_at,
                Err(e) => {
                    error!("Ledger lookup failed for {} in {}: {}", member, target.room, e);
                    continue;
                }
            };

            match grace::evaluate(detected_at, now, target.grace_period) {
                CandidateState::Absent => {
                    match self.ledger.upsert(member, &target.room, now).await {
                        Ok(_) => {
                            report.newly_tracked += 1;
                            info!(
                                "User {} not in group '{}' but in room '{}'. Starting grace period ({} min).",
                                member,
                                target.group,
                                target.room,
                                target.grace_period.num_minutes()
                            );
                        }
                        Err(e) => error!(
                            "Failed to record pending removal of {} from {}: {}",
                            member, target.room, e
                        ),
                    }
                }
                CandidateState::Pending {
                    detected_at,
                    remaining,
                } => {
                    report.pending += 1;
                    debug!(
                        "User {} pending removal from {}. {} min of grace remaining (removable at {}).",
                        member,
                        target.room,
                        remaining.num_minutes(),
                        grace::removable_at(detected_at, target.grace_period)
                    );
                }
                CandidateState::Removable { detected_at, .. } => {
                    self.execute_removal(target, member, detected_at, report)
                        .await;
                }
            }
        }
    }

    async fn execute_removal(
        &self,
        target: &SyncTarget,
        member: &MemberId,
        detected_at: DateTime<Utc>,
        report: &mut MappingReport,
    ) {
        let action = target.remove_action;
        if !action.is_destructive() {
            report.overdue += 1;
            debug!(
                "Grace period expired for {} in {} but REMOVE_ACTION is {}",
                member, target.room, action
            );
            return;
        }

        info!(
            "Grace period expired for {} in {} (detected {}). Removing with {}...",
            member, target.room, detected_at, action
        );

        // Best effort: a failed backup is logged inside and never blocks the removal
        self.backups.run_cycle().await;

        let reason = &self.settings.removal_reason;
        let outcome = if action == RemovalAction::Ban {
            self.rooms.ban(&target.room, member, reason).await
        } else {
            self.rooms.kick(&target.room, member, reason).await
        };

        match outcome {
            Ok(()) => report.removed += 1,
            Err(e) => {
                report.remove_failures += 1;
                error!("Failed to {} {} from {}: {}", action, member, target.room, e);
                if matches!(e, AppError::Permission(_)) {
                    warn!("Hint: the bot needs a power level that allows {} in {}", action, target.room);
                }
            }
        }

        // Deleted even after a failed call; the next pass re-detects the member
        if let Err(e) = self.ledger.delete(member, &target.room).await {
            error!(
                "Failed to clear pending removal of {} from {}: {}",
                member, target.room, e
            );
        }
    }
}
