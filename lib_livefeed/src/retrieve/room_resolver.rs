//! # Room Resolver
//!
//! Resolves a live id (the path segment of the public room address) into the internal
//! room id and a `ttwid` session cookie:
//!
//! 1. `GET /` on the live site; the response sets the `ttwid` cookie.
//! 2. `GET /<live_id>` with that cookie and a random `msToken`; the page embeds
//!    `roomId\":\"<digits>\"` in an escaped JSON blob.
//!
//! Room status comes from the room-entry API (`webcast/room/web/enter/`), whose JSON
//! carries `data.room_status` (0 while live) and the streamer's id and nickname. The
//! request may carry an `a_bogus` signature from an optional signing oracle.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, COOKIE, REFERER, SET_COOKIE};
use serde::Deserialize;
use tracing::{debug, info};
use url::form_urlencoded;

use crate::core::collaborators::{CollaboratorError, RoomInfo, RoomResolver, RoomStatus, SigningOracle};
use crate::retrieve::ky_http::ApiClient;

pub const LIVE_BASE_URL: &str = "https://live.douyin.com/";
const ROOM_ENTER_PATH: &str = "webcast/room/web/enter/";

const MS_TOKEN_ALPHABET: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";
const MS_TOKEN_LEN: usize = 182;
const AC_NONCE: &str = "0123407cc00a9e438deb4";

/// Random `msToken` cookie value.
pub fn generate_ms_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| MS_TOKEN_ALPHABET[rng.random_range(0..MS_TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Query of the room-entry API, in request order.
pub fn room_enter_query(live_id: &str, room_id: &str, ms_token: &str) -> Vec<(&'static str, String)> {
    vec![
        ("aid", "6383".to_string()),
        ("app_name", "douyin_web".to_string()),
        ("live_id", "1".to_string()),
        ("device_platform", "web".to_string()),
        ("language", "zh-CN".to_string()),
        ("enter_from", "page_refresh".to_string()),
        ("cookie_enabled", "true".to_string()),
        ("screen_width", "5120".to_string()),
        ("screen_height", "1440".to_string()),
        ("browser_language", "zh-CN".to_string()),
        ("browser_platform", "Win32".to_string()),
        ("browser_name", "Edge".to_string()),
        ("browser_version", "140.0.0.0".to_string()),
        ("web_rid", live_id.to_string()),
        ("room_id_str", room_id.to_string()),
        ("enter_source", String::new()),
        ("is_need_double_stream", "false".to_string()),
        ("insert_task_id", String::new()),
        ("live_reason", String::new()),
        ("msToken", ms_token.to_string()),
    ]
}

#[derive(Deserialize)]
struct EnterResponse {
    data: Option<EnterData>,
}

#[derive(Deserialize)]
struct EnterData {
    room_status: Option<i64>,
    user: Option<EnterUser>,
}

#[derive(Deserialize, Default)]
struct EnterUser {
    #[serde(default)]
    id_str: String,
    #[serde(default)]
    nickname: String,
}

/// Reads a room-entry API response body.
pub fn parse_room_status(body: &str) -> Result<RoomStatus, CollaboratorError> {
    let response: EnterResponse = serde_json::from_str(body)
        .map_err(|e| CollaboratorError::Resolve(format!("room status is not valid JSON: {e}")))?;
    let data = response
        .data
        .ok_or_else(|| CollaboratorError::Resolve("room status response has no data".to_string()))?;
    let room_status = data
        .room_status
        .ok_or_else(|| CollaboratorError::Resolve("room status response has no room_status".to_string()))?;
    let user = data.user.unwrap_or_default();
    Ok(RoomStatus {
        streamer_id: user.id_str,
        nickname: user.nickname,
        live: room_status == 0,
    })
}

fn header_value(value: &str) -> Result<HeaderValue, CollaboratorError> {
    HeaderValue::from_str(value).map_err(|e| CollaboratorError::Resolve(format!("invalid header value: {e}")))
}

/// Value of cookie `name` among the `set-cookie` headers, if present and non-empty.
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, v)| k.trim() == name && !v.trim().is_empty())
        .map(|(_, v)| v.trim().to_string())
}

pub struct HttpRoomResolver {
    client: ApiClient,
    room_id_pattern: Regex,
    status_signer: Option<Arc<dyn SigningOracle>>,
}

impl HttpRoomResolver {
    pub fn new(user_agent: &str) -> anyhow::Result<Self> {
        Self::with_base_url(LIVE_BASE_URL, user_agent)
    }

    pub fn with_base_url(base_url: &str, user_agent: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: ApiClient::new(base_url, user_agent)?,
            room_id_pattern: Regex::new(r#"roomId\\":\\"(\d+)\\""#)?,
            status_signer: None,
        })
    }

    /// Signs room status requests (`a_bogus`) with `signer`.
    pub fn with_status_signer(mut self, signer: Arc<dyn SigningOracle>) -> Self {
        self.status_signer = Some(signer);
        self
    }

    /// First embedded room id in a room page.
    pub fn extract_room_id(&self, page: &str) -> Option<String> {
        self.room_id_pattern
            .captures(page)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    async fn fetch_ttwid(&self) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .get_text("", None)
            .await
            .map_err(|e| CollaboratorError::Resolve(format!("landing page request failed: {e}")))?;
        if !response.success {
            return Err(CollaboratorError::Resolve(format!(
                "landing page returned HTTP {}",
                response.status
            )));
        }
        extract_cookie(&response.headers, "ttwid")
            .ok_or_else(|| CollaboratorError::Resolve("landing page set no ttwid cookie".to_string()))
    }
}

#[async_trait]
impl RoomResolver for HttpRoomResolver {
    async fn resolve(&self, live_id: &str) -> Result<RoomInfo, CollaboratorError> {
        let ttwid = self.fetch_ttwid().await?;
        debug!("obtained ttwid cookie");

        let cookie = format!(
            "ttwid={ttwid}&msToken={}; __ac_nonce={AC_NONCE}",
            generate_ms_token(MS_TOKEN_LEN)
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&cookie)
                .map_err(|e| CollaboratorError::Resolve(format!("invalid cookie header: {e}")))?,
        );

        let response = self
            .client
            .get_text(live_id, Some(headers))
            .await
            .map_err(|e| CollaboratorError::Resolve(format!("room page request failed: {e}")))?;
        let page = match response.data {
            Some(page) if response.success => page,
            _ => {
                return Err(CollaboratorError::Resolve(format!(
                    "room page returned HTTP {}",
                    response.status
                )))
            }
        };

        let room_id = self
            .extract_room_id(&page)
            .ok_or_else(|| CollaboratorError::Resolve(format!("no roomId found on page for {live_id}")))?;
        info!(live_id, room_id = %room_id, "room resolved");

        Ok(RoomInfo {
            room_id,
            session_cookie: ttwid,
        })
    }

    async fn room_status(
        &self,
        live_id: &str,
        room: &RoomInfo,
    ) -> Result<Option<RoomStatus>, CollaboratorError> {
        let mut query = room_enter_query(live_id, &room.room_id, &generate_ms_token(MS_TOKEN_LEN));
        if let Some(signer) = &self.status_signer {
            let signing: BTreeMap<String, String> =
                query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
            query.push(("a_bogus", signer.sign(&signing).await?));
        }
        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())))
            .finish();

        let referer = self
            .client
            .base_url()
            .join(live_id)
            .map_err(|e| CollaboratorError::Resolve(format!("invalid live id {live_id:?}: {e}")))?;
        let mut headers = HeaderMap::new();
        headers.insert(REFERER, header_value(referer.as_str())?);
        headers.insert(
            COOKIE,
            header_value(&format!("ttwid={};__ac_nonce={AC_NONCE}", room.session_cookie))?,
        );

        let response = self
            .client
            .get_text(&format!("{ROOM_ENTER_PATH}?{encoded}"), Some(headers))
            .await
            .map_err(|e| CollaboratorError::Resolve(format!("room status request failed: {e}")))?;
        let body = match response.data {
            Some(body) if response.success => body,
            _ => {
                return Err(CollaboratorError::Resolve(format!(
                    "room status returned HTTP {}",
                    response.status
                )))
            }
        };

        let status = parse_room_status(&body)?;
        debug!(live_id, live = status.live, "room status fetched");
        Ok(Some(status))
    }
}
