use super::models::*;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::debug;

/// Ledger repository - durable record of pending removals.
///
/// Every call is a single autocommitted statement, so a mutation is on disk
/// when the call returns and the next pass sees it even across a restart.
pub struct LedgerRepository {
    pub pool: SqlitePool,
}

impl LedgerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record first detection. A second insert for the same pair is a no-op;
    /// returns whether a row was created.
    pub async fn upsert(
        &self,
        member: &MemberId,
        target: &str,
        detected_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO pending_removals (member_id, target_id, detected_at)
            VALUES (?, ?, ?)
            ON CONFLICT (member_id, target_id) DO NOTHING
            "#,
        )
        .bind(member.as_str())
        .bind(target)
        .bind(detected_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            debug!("Ledger: tracking {} in {} since {}", member, target, detected_at);
        }
        Ok(inserted)
    }

    pub async fn lookup(&self, member: &MemberId, target: &str) -> AppResult<Option<DateTime<Utc>>> {
        let detected_at = sqlx::query_scalar::<_, DateTime<Utc>>(
            r#"
            SELECT detected_at
            FROM pending_removals
            WHERE member_id = ? AND target_id = ?
            "#,
        )
        .bind(member.as_str())
        .bind(target)
        .fetch_optional(&self.pool)
        .await?;

        Ok(detected_at)
    }

    /// Returns whether an entry existed
    pub async fn delete(&self, member: &MemberId, target: &str) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM pending_removals
            WHERE member_id = ? AND target_id = ?
            "#,
        )
        .bind(member.as_str())
        .bind(target)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_target(&self, target: &str) -> AppResult<Vec<RemovalCandidate>> {
        let candidates = sqlx::query_as::<_, RemovalCandidate>(
            r#"
            SELECT member_id, target_id, detected_at
            FROM pending_removals
            WHERE target_id = ?
            ORDER BY detected_at ASC, member_id ASC
            "#,
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        Ok(candidates)
    }

    pub async fn count(&self) -> AppResult<i64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pending_removals")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
