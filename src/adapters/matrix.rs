use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::adapters::traits::RoomDirectory;
use crate::error::{status_error, AppError, AppResult};
use crate::ledger::models::MemberId;

#[derive(Debug, Clone)]
pub struct MatrixConfig {
    pub homeserver_url: String,
    pub access_token: String,
    pub user_id: MemberId,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct JoinedMembers {
    #[serde(default)]
    joined: HashMap<String, serde_json::Value>,
}

/// Non-error result of a membership POST
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PostOutcome {
    Done,
    /// Rejected only because the member is already joined
    AlreadyInRoom,
}

#[derive(Debug, Deserialize)]
struct WhoAmI {
    user_id: String,
}

/// Client-server API client, plus the Synapse admin join endpoint
pub struct MatrixClient {
    client: Client,
    homeserver: Url,
    access_token: String,
    user_id: MemberId,
}

impl MatrixClient {
    pub fn new(config: MatrixConfig) -> AppResult<Self> {
        let homeserver = Url::parse(&config.homeserver_url).map_err(|e| {
            AppError::Config(format!("Invalid homeserver URL {}: {}", config.homeserver_url, e))
        })?;
        if homeserver.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "Homeserver URL cannot be used as a base: {}",
                config.homeserver_url
            )));
        }
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            homeserver,
            access_token: config.access_token,
            user_id: config.user_id,
        })
    }

    /// Homeserver URL with percent-encoded path segments appended
    fn endpoint(&self, segments: &[&str]) -> AppResult<Url> {
        let mut url = self.homeserver.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("homeserver URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post(&self, url: Url, body: serde_json::Value) -> AppResult<PostOutcome> {
        let context = format!("Matrix POST {}", url.path());
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(PostOutcome::Done);
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("is already in the room") {
            return Ok(PostOutcome::AlreadyInRoom);
        }
        Err(status_error(status, &context, &body))
    }

    async fn fetch_joined_members(&self, room: &str) -> AppResult<HashSet<MemberId>> {
        let url = self.endpoint(&["_matrix", "client", "v3", "rooms", room, "joined_members"])?;
        let context = format!("Matrix GET {}", url.path());
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &context, &body));
        }

        let members: JoinedMembers = response.json().await?;
        Ok(members.joined.into_keys().map(MemberId::from).collect())
    }

    async fn join_room(&self, room: &str) -> AppResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "join", room])?;
        self.post(url, json!({})).await?;
        info!("Joined room {}", room);
        Ok(())
    }
}

#[async_trait]
impl RoomDirectory for MatrixClient {
    fn name(&self) -> &'static str {
        "matrix"
    }

    async fn list_members(&self, room: &str) -> AppResult<HashSet<MemberId>> {
        match self.fetch_joined_members(room).await {
            Err(AppError::Permission(detail)) => {
                warn!(
                    "Bot not in room {} or not allowed to read it ({}). Attempting to join.",
                    room, detail
                );
                self.join_room(room).await?;
                self.fetch_joined_members(room).await
            }
            other => other,
        }
    }

    async fn invite(&self, room: &str, member: &MemberId) -> AppResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "rooms", room, "invite"])?;
        match self.post(url, json!({ "user_id": member })).await? {
            PostOutcome::Done => info!("Invited {} to {}", member, room),
            PostOutcome::AlreadyInRoom => debug!("{} is already in {}", member, room),
        }
        Ok(())
    }

    async fn force_join(&self, room: &str, member: &MemberId) -> AppResult<()> {
        let url = self.endpoint(&["_synapse", "admin", "v1", "join", room])?;
        match self.post(url, json!({ "user_id": member })).await? {
            PostOutcome::Done => info!("Force joined {} to {}", member, room),
            PostOutcome::AlreadyInRoom => debug!("{} is already in {}", member, room),
        }
        Ok(())
    }

    async fn kick(&self, room: &str, member: &MemberId, reason: &str) -> AppResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "rooms", room, "kick"])?;
        self.post(url, json!({ "user_id": member, "reason": reason })).await?;
        info!("Kicked {} from {}", member, room);
        Ok(())
    }

    async fn ban(&self, room: &str, member: &MemberId, reason: &str) -> AppResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "rooms", room, "ban"])?;
        self.post(url, json!({ "user_id": member, "reason": reason })).await?;
        info!("Banned {} from {}", member, room);
        Ok(())
    }

    async fn check_health(&self) -> AppResult<()> {
        let url = self.endpoint(&["_matrix", "client", "v3", "account", "whoami"])?;
        let context = format!("Matrix GET {}", url.path());
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &context, &body));
        }

        let whoami: WhoAmI = response.json().await?;
        if whoami.user_id != self.user_id.as_str() {
            warn!(
                "Access token belongs to {} but MATRIX_USER_ID is {}",
                whoami.user_id, self.user_id
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> MatrixClient {
        MatrixClient::new(MatrixConfig {
            homeserver_url: server.uri(),
            access_token: "syt-token".to_string(),
            user_id: MemberId::from("@bot:example.org"),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_endpoint_encodes_room_alias() {
        let client = MatrixClient::new(MatrixConfig {
            homeserver_url: "https://matrix.example.org/".to_string(),
            access_token: "t".to_string(),
            user_id: MemberId::from("@bot:example.org"),
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        let url = client
            .endpoint(&["_matrix", "client", "v3", "join", "#staff:example.org"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://matrix.example.org/_matrix/client/v3/join/%23staff:example.org"
        );
    }

    #[test]
    fn test_rejects_invalid_homeserver() {
        let result = MatrixClient::new(MatrixConfig {
            homeserver_url: "not a url".to_string(),
            access_token: "t".to_string(),
            user_id: MemberId::from("@bot:example.org"),
            timeout: Duration::from_secs(5),
        });
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_list_members() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/rooms/!abc:example.org/joined_members"))
            .and(header("Authorization", "Bearer syt-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "joined": {
                    "@bot:example.org": {"display_name": "bot"},
                    "@alice:example.org": {}
                }
            })))
            .mount(&server)
            .await;

        let members = client_for(&server).list_members("!abc:example.org").await.unwrap();
        assert_eq!(members.len(), 2);
        assert!(members.contains(&MemberId::from("@alice:example.org")));
    }

    #[tokio::test]
    async fn test_list_members_joins_on_forbidden() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/rooms/!abc:example.org/joined_members"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "errcode": "M_FORBIDDEN"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/join/!abc:example.org"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"room_id": "!abc:example.org"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/rooms/!abc:example.org/joined_members"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "joined": {"@bot:example.org": {}}
            })))
            .mount(&server)
            .await;

        let members = client_for(&server).list_members("!abc:example.org").await.unwrap();
        assert_eq!(members.len(), 1);
    }

    #[tokio::test]
    async fn test_list_members_permission_error_when_join_fails() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/rooms/!abc:example.org/joined_members"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/join/!abc:example.org"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result = client_for(&server).list_members("!abc:example.org").await;
        assert!(matches!(result, Err(AppError::Permission(_))));
    }

    #[tokio::test]
    async fn test_invite_treats_existing_member_as_success() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/rooms/!abc:example.org/invite"))
            .and(body_json(json!({"user_id": "@alice:example.org"})))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "errcode": "M_FORBIDDEN",
                "error": "@alice:example.org is already in the room."
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .invite("!abc:example.org", &MemberId::from("@alice:example.org"))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_force_join_uses_admin_api() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_synapse/admin/v1/join/!abc:example.org"))
            .and(body_json(json!({"user_id": "@alice:example.org"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .force_join("!abc:example.org", &MemberId::from("@alice:example.org"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_kick_and_ban_send_reason() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/rooms/!abc:example.org/kick"))
            .and(body_json(json!({"user_id": "@eve:example.org", "reason": "Account sync cleanup"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/rooms/!abc:example.org/ban"))
            .and(body_json(json!({"user_id": "@eve:example.org", "reason": "Account sync cleanup"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        let eve = MemberId::from("@eve:example.org");
        client.kick("!abc:example.org", &eve, "Account sync cleanup").await.unwrap();
        client.ban("!abc:example.org", &eve, "Account sync cleanup").await.unwrap();
    }

    #[tokio::test]
    async fn test_kick_failure_is_reported() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/_matrix/client/v3/rooms/!abc:example.org/kick"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .kick("!abc:example.org", &MemberId::from("@eve:example.org"), "cleanup")
            .await;
        assert!(matches!(result, Err(AppError::External(_))));
    }

    #[tokio::test]
    async fn test_health_check_whoami() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/account/whoami"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"user_id": "@bot:example.org"})),
            )
            .mount(&server)
            .await;

        assert!(client_for(&server).check_health().await.is_ok());
    }

    #[tokio::test]
    async fn test_health_check_rejected_token() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/_matrix/client/v3/account/whoami"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        assert!(matches!(
            client_for(&server).check_health().await,
            Err(AppError::Permission(_))
        ));
    }
}
