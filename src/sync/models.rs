use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// How a missing member is brought into the room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMethod {
    /// Send an invite the member has to accept
    Invite,
    /// Join the member directly (homeserver admin API)
    Force,
}

impl JoinMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinMethod::Invite => "invite",
            JoinMethod::Force => "force",
        }
    }
}

impl fmt::Display for JoinMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "invite" => Ok(JoinMethod::Invite),
            "force" => Ok(JoinMethod::Force),
            other => Err(format!("Invalid join method: {other}. Must be 'invite' or 'force'")),
        }
    }
}

/// What happens to a member once the grace period has run out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemovalAction {
    /// Remove; the member may rejoin if invited again
    Kick,
    /// Remove and bar from rejoining until unbanned
    Ban,
    /// Removal disabled: overdue members are only logged
    None,
}

impl RemovalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalAction::Kick => "kick",
            RemovalAction::Ban => "ban",
            RemovalAction::None => "none",
        }
    }

    pub fn is_destructive(&self) -> bool {
        !matches!(self, RemovalAction::None)
    }
}

impl fmt::Display for RemovalAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemovalAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kick" => Ok(RemovalAction::Kick),
            "ban" => Ok(RemovalAction::Ban),
            "none" => Ok(RemovalAction::None),
            other => Err(format!(
                "Invalid removal action: {other}. Must be 'kick', 'ban' or 'none'"
            )),
        }
    }
}

// Mapping overrides accept exactly what the environment variables accept
impl<'de> Deserialize<'de> for JoinMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for RemovalAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// One group → room pairing as written in `SYNC_MAPPINGS`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// Group name or primary key in the identity provider
    pub group: String,
    /// Target room or space id
    #[serde(alias = "room")]
    pub space: String,
    #[serde(default)]
    pub method: Option<JoinMethod>,
    #[serde(default)]
    pub grace_period_minutes: Option<u64>,
    #[serde(default)]
    pub remove_action: Option<RemovalAction>,
}

/// Global defaults a mapping falls back to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncDefaults {
    pub join_method: JoinMethod,
    pub grace_period: Duration,
    pub remove_action: RemovalAction,
}

/// Mapping with every override resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    pub group: String,
    pub room: String,
    pub join_method: JoinMethod,
    pub grace_period: Duration,
    pub remove_action: RemovalAction,
}

impl Mapping {
    pub fn resolve(&self, defaults: &SyncDefaults) -> SyncTarget {
        SyncTarget {
            group: self.group.clone(),
            room: self.space.clone(),
            join_method: self.method.unwrap_or(defaults.join_method),
            grace_period: self
                .grace_period_minutes
                .map(minutes)
                .unwrap_or(defaults.grace_period),
            remove_action: self.remove_action.unwrap_or(defaults.remove_action),
        }
    }
}

// a thousand years
const MAX_MINUTES: i64 = 60 * 24 * 365 * 1000;

/// Minutes from configuration as a chrono duration (saturating)
pub fn minutes(value: u64) -> Duration {
    Duration::minutes(i64::try_from(value).unwrap_or(MAX_MINUTES).min(MAX_MINUTES))
}
