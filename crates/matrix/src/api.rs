//! Thin typed wrapper over the Matrix client-server API.

use std::time::Duration;

use {
    reqwest::{Client, RequestBuilder, Response},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, de::DeserializeOwned},
    serde_json::json,
    tracing::{debug, trace},
};

use crate::sync::SyncResponse;

const CLIENT_PATH: &str = "/_matrix/client/v3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("homeserver returned {status}: {errcode}: {message}")]
    Status {
        status: u16,
        errcode: String,
        message: String,
    },
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errcode: String,
    #[serde(default)]
    error: String,
}

#[derive(Deserialize)]
struct LoginResponse {
    user_id: String,
    access_token: String,
}

#[derive(Deserialize)]
struct JoinedRoomsResponse {
    joined_rooms: Vec<String>,
}

#[derive(Deserialize)]
struct RoomIdResponse {
    room_id: String,
}

#[derive(Deserialize)]
struct DisplayNameResponse {
    displayname: Option<String>,
}

#[derive(Deserialize)]
struct EventIdResponse {
    event_id: String,
}

/// Authenticated session against one homeserver.
pub struct MatrixClient {
    http: Client,
    base: String,
    user_id: String,
    access_token: Secret<String>,
}

impl std::fmt::Debug for MatrixClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatrixClient")
            .field("base", &self.base)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

impl MatrixClient {
    /// `POST /login` with `m.login.password`.
    pub async fn login(
        http: Client,
        homeserver: &str,
        username: &str,
        password: &Secret<String>,
    ) -> ApiResult<Self> {
        let base = format!("{}{CLIENT_PATH}", homeserver.trim_end_matches('/'));
        let body = json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": username },
            "password": password.expose_secret(),
            "initial_device_display_name": "relaybot",
        });
        let resp = http
            .post(format!("{base}/login"))
            .timeout(REQUEST_TIMEOUT)
            .json(&body)
            .send()
            .await?;
        let login: LoginResponse = parse(resp).await?;
        debug!(user_id = %login.user_id, "matrix login succeeded");

        Ok(Self {
            http,
            base,
            user_id: login.user_id,
            access_token: Secret::new(login.access_token),
        })
    }

    /// Fully-qualified id of the logged-in user.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(self.access_token.expose_secret())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn set_display_name(&self, name: &str) -> ApiResult<()> {
        let url = self.url(&format!("/profile/{}/displayname", enc(&self.user_id)));
        let resp = self
            .authed(self.http.put(url))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "displayname": name }))
            .send()
            .await?;
        parse::<serde_json::Value>(resp).await.map(drop)
    }

    pub async fn joined_rooms(&self) -> ApiResult<Vec<String>> {
        let resp = self
            .authed(self.http.get(self.url("/joined_rooms")))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(parse::<JoinedRoomsResponse>(resp).await?.joined_rooms)
    }

    /// Join by room id or alias, returning the canonical room id.
    pub async fn join_room(&self, room: &str) -> ApiResult<String> {
        let url = self.url(&format!("/join/{}", enc(room)));
        let resp = self
            .authed(self.http.post(url))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({}))
            .send()
            .await?;
        Ok(parse::<RoomIdResponse>(resp).await?.room_id)
    }

    /// `GET /sync`. The HTTP timeout is stretched past the long-poll window.
    pub async fn sync(&self, since: Option<&str>, timeout: Duration) -> ApiResult<SyncResponse> {
        let timeout_ms = timeout.as_millis().to_string();
        let mut query = vec![("timeout", timeout_ms.as_str())];
        if let Some(since) = since {
            query.push(("since", since));
        }
        let resp = self
            .authed(self.http.get(self.url("/sync")))
            .query(&query)
            .timeout(timeout + REQUEST_TIMEOUT)
            .send()
            .await?;
        parse(resp).await
    }

    /// Profile display name of `user_id`, if it has one.
    pub async fn display_name(&self, user_id: &str) -> ApiResult<Option<String>> {
        let url = self.url(&format!("/profile/{}/displayname", enc(user_id)));
        let resp = self
            .authed(self.http.get(url))
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        Ok(parse::<DisplayNameResponse>(resp)
            .await?
            .displayname
            .filter(|name| !name.is_empty()))
    }

    pub async fn mark_read(&self, room_id: &str, event_id: &str) -> ApiResult<()> {
        let url = self.url(&format!(
            "/rooms/{}/receipt/m.read/{}",
            enc(room_id),
            enc(event_id)
        ));
        let resp = self
            .authed(self.http.post(url))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({}))
            .send()
            .await?;
        parse::<serde_json::Value>(resp).await.map(drop)
    }

    /// Send an `m.text` message, returning the new event id.
    pub async fn send_text(&self, room_id: &str, text: &str) -> ApiResult<String> {
        let txn = uuid::Uuid::new_v4().simple().to_string();
        let url = self.url(&format!(
            "/rooms/{}/send/m.room.message/{txn}",
            enc(room_id)
        ));
        let resp = self
            .authed(self.http.put(url))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "msgtype": "m.text", "body": text }))
            .send()
            .await?;
        Ok(parse::<EventIdResponse>(resp).await?.event_id)
    }

    /// Invalidate the access token.
    pub async fn logout(&self) -> ApiResult<()> {
        let resp = self
            .authed(self.http.post(self.url("/logout")))
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({}))
            .send()
            .await?;
        parse::<serde_json::Value>(resp).await.map(drop)
    }
}

fn enc(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

async fn parse<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
    let status = resp.status();
    trace!(url = %resp.url().path(), %status, "matrix response");
    if status.is_success() {
        return Ok(resp.json().await?);
    }
    let body: ErrorBody = resp.json().await.unwrap_or(ErrorBody {
        errcode: "M_UNKNOWN".into(),
        error: status.canonical_reason().unwrap_or_default().into(),
    });
    Err(ApiError::Status {
        status: status.as_u16(),
        errcode: body.errcode,
        message: body.error,
    })
}
