use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, warn};

use crate::error::{AppError, AppResult};
use crate::ledger::models::MemberId;
use crate::sync::models::{minutes, JoinMethod, Mapping, RemovalAction, SyncDefaults};

/// Environment as read by the `config` crate: every variable, lowercased
#[derive(Debug, Deserialize)]
struct RawSettings {
    authentik_url: Option<String>,
    authentik_token: Option<String>,
    matrix_homeserver_url: Option<String>,
    matrix_user_id: Option<String>,
    matrix_access_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    sync_interval_seconds: u64,
    #[serde(default = "default_join_method")]
    join_method: String,
    #[serde(default = "default_mappings")]
    sync_mappings: String,
    #[serde(default = "default_grace_period")]
    cleanup_grace_period_minutes: u64,
    #[serde(default = "default_remove_action")]
    remove_action: String,
    #[serde(default = "default_removal_reason")]
    removal_reason: String,
    #[serde(default = "default_retention")]
    db_backup_retention_count: usize,
    #[serde(default = "default_database_path")]
    database_path: String,
    #[serde(default = "default_check_attempts")]
    startup_check_attempts: u32,
    #[serde(default = "default_check_delay")]
    startup_check_delay_seconds: u64,
    #[serde(default = "default_http_timeout")]
    http_timeout_seconds: u64,
}

fn default_sync_interval() -> u64 {
    60
}
fn default_join_method() -> String {
    "invite".to_string()
}
fn default_mappings() -> String {
    "[]".to_string()
}
fn default_grace_period() -> u64 {
    120
}
fn default_remove_action() -> String {
    "kick".to_string()
}
fn default_removal_reason() -> String {
    "Account sync cleanup".to_string()
}
fn default_retention() -> usize {
    3
}
fn default_database_path() -> String {
    "/app/data/sync.db".to_string()
}
fn default_check_attempts() -> u32 {
    5
}
fn default_check_delay() -> u64 {
    5
}
fn default_http_timeout() -> u64 {
    30
}

/// Validated settings, built once in `main` and passed down by reference
#[derive(Debug, Clone)]
pub struct Config {
    pub authentik_url: String,
    pub authentik_token: String,
    pub matrix_homeserver_url: String,
    pub matrix_user_id: MemberId,
    pub matrix_access_token: String,
    pub sync_interval: Duration,
    pub defaults: SyncDefaults,
    pub mappings: Vec<Mapping>,
    pub removal_reason: String,
    pub backup_retention: usize,
    pub database_path: PathBuf,
    pub startup_check_attempts: u32,
    pub startup_check_delay: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_source(config::Environment::default())
    }

    /// Same as `from_env`, reading the given variables instead of the process environment
    pub fn from_vars(vars: HashMap<String, String>) -> AppResult<Self> {
        Self::from_source(config::Environment::default().source(Some(vars)))
    }

    fn from_source(environment: config::Environment) -> AppResult<Self> {
        let raw: RawSettings = config::Config::builder()
            .add_source(environment)
            .build()?
            .try_deserialize()?;

        let config = raw.validate().map_err(|errors| {
            for err in &errors {
                error!("{}", err);
            }
            AppError::Config(errors.join("; "))
        })?;

        if config.mappings.is_empty() {
            warn!("SYNC_MAPPINGS is empty, nothing will be synced");
        }

        Ok(config)
    }

    /// Domain used to derive addresses for accounts without an explicit one
    pub fn fallback_domain(&self) -> &str {
        self.matrix_user_id.domain().unwrap_or_default()
    }
}

fn required(value: Option<String>, name: &str, errors: &mut Vec<String>) -> String {
    match value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        Some(value) => value,
        None => {
            errors.push(format!("{} is missing", name));
            String::new()
        }
    }
}

fn check_url(value: &str, name: &str, errors: &mut Vec<String>) {
    if value.is_empty() {
        return;
    }
    match reqwest::Url::parse(value) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        _ => errors.push(format!("{} is not a valid http(s) URL: {}", name, value)),
    }
}

impl RawSettings {
    fn validate(self) -> Result<Config, Vec<String>> {
        let mut errors = Vec::new();

        let authentik_url = required(self.authentik_url, "AUTHENTIK_URL", &mut errors);
        let authentik_token = required(self.authentik_token, "AUTHENTIK_TOKEN", &mut errors);
        let matrix_homeserver_url =
            required(self.matrix_homeserver_url, "MATRIX_HOMESERVER_URL", &mut errors);
        let matrix_user_id = required(self.matrix_user_id, "MATRIX_USER_ID", &mut errors);
        let matrix_access_token =
            required(self.matrix_access_token, "MATRIX_ACCESS_TOKEN", &mut errors);

        check_url(&authentik_url, "AUTHENTIK_URL", &mut errors);
        check_url(&matrix_homeserver_url, "MATRIX_HOMESERVER_URL", &mut errors);

        let matrix_user_id = MemberId::new(matrix_user_id);
        if !matrix_user_id.as_str().is_empty() && !matrix_user_id.is_well_formed() {
            errors.push(format!(
                "Invalid MATRIX_USER_ID: {}. Must look like @localpart:domain",
                matrix_user_id
            ));
        }

        let join_method = self
            .join_method
            .parse::<JoinMethod>()
            .map_err(|e| errors.push(format!("Invalid JOIN_METHOD: {}", e)))
            .unwrap_or(JoinMethod::Invite);

        let remove_action = self
            .remove_action
            .parse::<RemovalAction>()
            .map_err(|e| errors.push(format!("Invalid REMOVE_ACTION: {}", e)))
            .unwrap_or(RemovalAction::Kick);

        let mappings = match serde_json::from_str::<Vec<Mapping>>(&self.sync_mappings) {
            Ok(mappings) => mappings,
            Err(e) => {
                errors.push(format!(
                    "Failed to parse SYNC_MAPPINGS JSON ({}). Ensure it is a list of \
                     {{\"group\": ..., \"space\": ...}} objects",
                    e
                ));
                Vec::new()
            }
        };
        for (index, mapping) in mappings.iter().enumerate() {
            if mapping.group.trim().is_empty() || mapping.space.trim().is_empty() {
                errors.push(format!(
                    "SYNC_MAPPINGS entry {} needs a non-empty group and space",
                    index
                ));
            }
        }

        if self.sync_interval_seconds == 0 {
            errors.push("SYNC_INTERVAL_SECONDS must be greater than 0".to_string());
        }
        if self.startup_check_attempts == 0 {
            errors.push("STARTUP_CHECK_ATTEMPTS must be at least 1".to_string());
        }
        if self.http_timeout_seconds == 0 {
            errors.push("HTTP_TIMEOUT_SECONDS must be greater than 0".to_string());
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Config {
            authentik_url,
            authentik_token,
            matrix_homeserver_url,
            matrix_user_id,
            matrix_access_token,
            sync_interval: Duration::from_secs(self.sync_interval_seconds),
            defaults: SyncDefaults {
                join_method,
                grace_period: minutes(self.cleanup_grace_period_minutes),
                remove_action,
            },
            mappings,
            removal_reason: self.removal_reason,
            backup_retention: self.db_backup_retention_count,
            database_path: PathBuf::from(self.database_path),
            startup_check_attempts: self.startup_check_attempts,
            startup_check_delay: Duration::from_secs(self.startup_check_delay_seconds),
            http_timeout: Duration::from_secs(self.http_timeout_seconds),
        })
    }
}
