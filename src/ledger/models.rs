use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, Type};
use std::fmt;

/// Member address in the room's addressing scheme (`@localpart:domain`).
/// Compared as an exact, case-sensitive string - no normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Server part of the address, if it has one
    pub fn domain(&self) -> Option<&str> {
        self.0
            .split_once(':')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }

    /// True for `@localpart:domain` shaped addresses
    pub fn is_well_formed(&self) -> bool {
        match self.0.strip_prefix('@').and_then(|rest| rest.split_once(':')) {
            Some((local, domain)) => !local.is_empty() && !domain.is_empty(),
            None => false,
        }
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Pending removal: a member seen in the room but missing from its group.
/// `detected_at` is fixed at creation; the row is deleted, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RemovalCandidate {
    pub member_id: MemberId,
    pub target_id: String,
    pub detected_at: DateTime<Utc>,
}

/// Point-in-time copy of the ledger file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    pub path: std::path::PathBuf,
    pub created_at: DateTime<Utc>,
}
