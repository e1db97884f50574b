use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::AppResult;
use crate::ledger::models::MemberId;

/// Where a group member's room address came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressSource {
    /// Explicit attribute on the provider account
    Attribute,
    /// Guessed from the username and the bot's own domain
    Derived,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupMember {
    pub member_id: MemberId,
    pub username: String,
    pub source: AddressSource,
}

impl GroupMember {
    pub fn is_derived(&self) -> bool {
        self.source == AddressSource::Derived
    }
}

/// Source of truth for who belongs in a room
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Members of a group given by name or primary key.
    /// `NotFound` if the group does not exist, `Permission` if forbidden.
    async fn list_group_members(&self, group_ref: &str) -> AppResult<Vec<GroupMember>>;

    async fn check_health(&self) -> AppResult<()> {
        Ok(())
    }
}

/// Room roster and the calls that change it
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    fn name(&self) -> &'static str;

    async fn list_members(&self, room: &str) -> AppResult<HashSet<MemberId>>;

    async fn invite(&self, room: &str, member: &MemberId) -> AppResult<()>;

    async fn force_join(&self, room: &str, member: &MemberId) -> AppResult<()>;

    async fn kick(&self, room: &str, member: &MemberId, reason: &str) -> AppResult<()>;

    async fn ban(&self, room: &str, member: &MemberId, reason: &str) -> AppResult<()>;

    async fn check_health(&self) -> AppResult<()> {
        Ok(())
    }
}
