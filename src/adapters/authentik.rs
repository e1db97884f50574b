use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::adapters::traits::{AddressSource, GroupMember, IdentityProvider};
use crate::error::{status_error, AppError, AppResult};
use crate::ledger::models::MemberId;

/// Account attribute holding an explicit room address
pub const MATRIX_ID_ATTRIBUTE: &str = "matrix_id";

const PAGE_SIZE: u32 = 100;
const MAX_PAGES: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct AuthentikConfig {
    pub base_url: String,
    pub token: String,
    /// Domain used when an account has no `matrix_id` attribute
    pub fallback_domain: String,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    #[serde(default)]
    pagination: Option<Pagination>,
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    /// Next page number, 0 on the last page
    #[serde(default)]
    next: u64,
}

#[derive(Debug, Deserialize)]
struct GroupRecord {
    pk: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    username: String,
    #[serde(default)]
    attributes: serde_json::Map<String, serde_json::Value>,
}

/// Authentik core API client (`/api/v3/core/...`)
pub struct AuthentikClient {
    client: Client,
    base_url: String,
    token: String,
    fallback_domain: String,
}

impl AuthentikClient {
    pub fn new(config: AuthentikConfig) -> AppResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
            fallback_domain: config.fallback_domain,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> AppResult<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &format!("Authentik GET {}", path), &body));
        }

        Ok(response.json::<T>().await?)
    }

    /// Group primary key from a UUID or an exact group name
    async fn resolve_group_pk(&self, group_ref: &str) -> AppResult<String> {
        if let Ok(pk) = Uuid::parse_str(group_ref) {
            let group: GroupRecord = self
                .get_json(&format!("/api/v3/core/groups/{}/", pk), &[])
                .await?;
            debug!("Authentik group {} is '{}'", group.pk, group.name);
            return Ok(group.pk);
        }

        let page: Page<GroupRecord> = self
            .get_json("/api/v3/core/groups/", &[("name", group_ref.to_string())])
            .await?;

        page.results
            .into_iter()
            .find(|group| group.name == group_ref)
            .map(|group| group.pk)
            .ok_or_else(|| AppError::NotFound(format!("Authentik group not found: {}", group_ref)))
    }

    async fn list_users_in_group(&self, group_pk: &str) -> AppResult<Vec<UserRecord>> {
        let mut users = Vec::new();
        let mut page_number: u64 = 1;

        loop {
            let page: Page<UserRecord> = self
                .get_json(
                    "/api/v3/core/users/",
                    &[
                        ("groups_by_pk", group_pk.to_string()),
                        ("page", page_number.to_string()),
                        ("page_size", PAGE_SIZE.to_string()),
                    ],
                )
                .await?;

            users.extend(page.results);

            let next = page.pagination.map(|p| p.next).unwrap_or(0);
            if next == 0 {
                break;
            }
            // A partial member list must never pass for the whole group
            if next <= page_number || next > MAX_PAGES {
                return Err(AppError::External(format!(
                    "Authentik returned page {} after page {} for group {}",
                    next, page_number, group_pk
                )));
            }
            page_number = next;
        }

        Ok(users)
    }

    fn resolve_address(&self, user: UserRecord) -> GroupMember {
        let explicit = user
            .attributes
            .get(MATRIX_ID_ATTRIBUTE)
            .and_then(|value| value.as_str())
            .map(str::trim)
            .filter(|value| !value.is_empty());

        match explicit {
            Some(address) => GroupMember {
                member_id: MemberId::new(address),
                username: user.username,
                source: AddressSource::Attribute,
            },
            None => GroupMember {
                member_id: MemberId::new(format!("@{}:{}", user.username, self.fallback_domain)),
                username: user.username,
                source: AddressSource::Derived,
            },
        }
    }
}

#[async_trait]
impl IdentityProvider for AuthentikClient {
    fn name(&self) -> &'static str {
        "authentik"
    }

    async fn list_group_members(&self, group_ref: &str) -> AppResult<Vec<GroupMember>> {
        let group_pk = self.resolve_group_pk(group_ref).await?;
        let users = self.list_users_in_group(&group_pk).await?;

        let members: Vec<GroupMember> = users
            .into_iter()
            .map(|user| self.resolve_address(user))
            .collect();

        info!("Authentik group '{}' has {} members", group_ref, members.len());
        Ok(members)
    }

    async fn check_health(&self) -> AppResult<()> {
        let _: serde_json::Value = self.get_json("/api/v3/core/users/me/", &[]).await?;
        Ok(())
    }
}
