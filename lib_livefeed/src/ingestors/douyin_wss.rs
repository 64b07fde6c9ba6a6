//! # Douyin WSS Ingestor
//!
//! WebSocket ingestor for a Douyin live room's protobuf push channel.
//!
//! [`DouyinEndpoint`] prepares each connection attempt: it resolves the room once
//! (room id and `ttwid` cookie are cached), stamps the browser-style query with the
//! current time, asks the signing oracle for a signature and attaches the cookie and
//! user-agent headers. A failed resolution is not cached, so the next attempt retries
//! it. After a session ends on its own, the endpoint asks the resolver whether the
//! room is still live and logs the answer. [`DouyinWssIngestor`] wires the endpoint, the default handlers,
//! the log sink and the alert channel into a [`ConnectionSupervisor`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::collaborators::{AlertChannel, LogSink, RoomInfo, RoomResolver, SigningOracle};
use crate::core::dispatcher::Dispatcher;
use crate::core::handlers::register_defaults;
use crate::core::registry::Vocabulary;
use crate::core::session::{
    EndpointSource, SessionEndpoint, SessionError, SessionFactory, SessionOutcome, SessionSettings,
};
use crate::core::supervisor::{ConnectionSupervisor, SupervisorError, SupervisorSettings};

pub const DEFAULT_PUSH_URL: &str = "wss://webcast100-ws-web-lq.douyin.com/webcast/im/push/v2/";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36 Edg/140.0.0.0";

const BROWSER_VERSION: &str = "5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, \
     like Gecko) Chrome/126.0.0.0 Safari/537.36";
const DEVICE_ID: &str = "7319483754668557238";

/// Configuration for one room.
#[derive(Debug, Clone)]
pub struct DouyinConfig {
    pub live_id: String,
    pub push_url: String,
    pub user_agent: String,
    pub vocabularies: Vec<Vocabulary>,
    pub session: SessionSettings,
    pub supervisor: SupervisorSettings,
}

impl DouyinConfig {
    pub fn new(live_id: impl Into<String>) -> Self {
        Self {
            live_id: live_id.into(),
            push_url: DEFAULT_PUSH_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            vocabularies: Vocabulary::ALL.to_vec(),
            session: SessionSettings::default(),
            supervisor: SupervisorSettings::default(),
        }
    }
}

/// Ordered push query for `room_id` at `now_ms` (epoch milliseconds).
pub fn push_query(room_id: &str, now_ms: i64) -> Vec<(&'static str, String)> {
    let cursor = format!("d-1_u-1_fh-7392091211001140287_t-{now_ms}_r-1");
    let internal_ext = format!(
        "internal_src:dim|wss_push_room_id:{room_id}|wss_push_did:{DEVICE_ID}\
         |first_req_ms:{now_ms}|fetch_time:{now_ms}|seq:1|wss_info:0-{now_ms}-0-0\
         |wrds_v:7392094459690748497"
    );
    vec![
        ("app_name", "douyin_web".to_string()),
        ("version_code", "180800".to_string()),
        ("webcast_sdk_version", "1.0.14-beta.0".to_string()),
        ("update_version_code", "1.0.14-beta.0".to_string()),
        ("compress", "gzip".to_string()),
        ("device_platform", "web".to_string()),
        ("cookie_enabled", "true".to_string()),
        ("screen_width", "1536".to_string()),
        ("screen_height", "864".to_string()),
        ("browser_language", "zh-CN".to_string()),
        ("browser_platform", "Win32".to_string()),
        ("browser_name", "Mozilla".to_string()),
        ("browser_version", BROWSER_VERSION.to_string()),
        ("browser_online", "true".to_string()),
        ("tz_name", "Asia/Shanghai".to_string()),
        ("cursor", cursor),
        ("internal_ext", internal_ext),
        ("host", "https://live.douyin.com".to_string()),
        ("aid", "6383".to_string()),
        ("live_id", "1".to_string()),
        ("did_rule", "3".to_string()),
        ("endpoint", "live_pc".to_string()),
        ("support_wrds", "1".to_string()),
        ("user_unique_id", DEVICE_ID.to_string()),
        ("im_path", "/webcast/im/fetch/".to_string()),
        ("identity", "audience".to_string()),
        ("need_persist_msg_count", "15".to_string()),
        ("insert_task_id", String::new()),
        ("live_reason", String::new()),
        ("room_id", room_id.to_string()),
        ("heartbeatDuration", "0".to_string()),
    ]
}

/// Assembles the final URL. Values are placed verbatim; the URL parser escapes
/// what a query may not contain.
pub fn push_url(base: &str, query: &[(&str, String)], signature: &str) -> Result<Url, SessionError> {
    let mut url = Url::parse(base).map_err(|e| SessionError::InvalidEndpoint(format!("{base}: {e}")))?;
    let raw = query
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .chain(std::iter::once(format!("signature={signature}")))
        .collect::<Vec<_>>()
        .join("&");
    url.set_query(Some(&raw));
    Ok(url)
}

/// Endpoint source for one Douyin room.
pub struct DouyinEndpoint {
    live_id: String,
    push_url: String,
    user_agent: String,
    resolver: Arc<dyn RoomResolver>,
    signer: Arc<dyn SigningOracle>,
    room: Mutex<Option<RoomInfo>>,
}

impl DouyinEndpoint {
    pub fn new(
        config: &DouyinConfig,
        resolver: Arc<dyn RoomResolver>,
        signer: Arc<dyn SigningOracle>,
    ) -> Self {
        Self {
            live_id: config.live_id.clone(),
            push_url: config.push_url.clone(),
            user_agent: config.user_agent.clone(),
            resolver,
            signer,
            room: Mutex::new(None),
        }
    }

    async fn room(&self) -> Result<RoomInfo, SessionError> {
        let mut cached = self.room.lock().await;
        if let Some(room) = cached.as_ref() {
            return Ok(room.clone());
        }
        let room = self.resolver.resolve(&self.live_id).await?;
        *cached = Some(room.clone());
        Ok(room)
    }
}

#[async_trait]
impl EndpointSource for DouyinEndpoint {
    async fn endpoint(&self) -> Result<SessionEndpoint, SessionError> {
        let room = self.room().await?;
        let query = push_query(&room.room_id, chrono::Utc::now().timestamp_millis());

        let signing_map: BTreeMap<String, String> =
            query.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
        let signature = self.signer.sign(&signing_map).await?;
        debug!(room_id = %room.room_id, "push endpoint signed");

        let url = push_url(&self.push_url, &query, &signature)?;
        Ok(SessionEndpoint {
            url: url.into(),
            headers: vec![
                ("cookie".to_string(), format!("ttwid={}", room.session_cookie)),
                ("user-agent".to_string(), self.user_agent.clone()),
            ],
        })
    }

    async fn session_ended(&self, outcome: &SessionOutcome) {
        let Some(room) = self.room.lock().await.clone() else {
            return;
        };
        match self.resolver.room_status(&self.live_id, &room).await {
            Ok(Some(status)) => info!(%status, session = %outcome, "room status after session"),
            Ok(None) => debug!("room status unavailable"),
            Err(e) => warn!(error = %e, "room status check failed"),
        }
    }
}

/// A ready-to-run feed for one room.
pub struct DouyinWssIngestor {
    supervisor: Arc<ConnectionSupervisor>,
}

impl DouyinWssIngestor {
    pub fn new(
        config: DouyinConfig,
        resolver: Arc<dyn RoomResolver>,
        signer: Arc<dyn SigningOracle>,
        sink: Arc<dyn LogSink>,
        alert: Arc<dyn AlertChannel>,
    ) -> Self {
        let mut dispatcher = Dispatcher::new();
        register_defaults(&mut dispatcher, &config.vocabularies);
        if dispatcher.registry().is_empty() {
            warn!(live_id = %config.live_id, "no vocabulary enabled; every message will be ignored");
        }
        info!(
            live_id = %config.live_id,
            handlers = dispatcher.registry().len(),
            "ingestor configured"
        );

        let endpoint = DouyinEndpoint::new(&config, resolver, signer);
        let factory = SessionFactory::new(
            Arc::new(endpoint),
            Arc::new(dispatcher),
            sink,
            config.session,
        );
        let supervisor = ConnectionSupervisor::new(Arc::new(factory), alert, config.supervisor);
        Self {
            supervisor: Arc::new(supervisor),
        }
    }

    /// Runs until stopped or until the broadcast ends.
    pub async fn run(&self) -> Result<(), SupervisorError> {
        self.supervisor.start().await
    }

    pub fn stop(&self) {
        self.supervisor.stop();
    }

    /// Shared handle, e.g. for a signal handler.
    pub fn supervisor(&self) -> Arc<ConnectionSupervisor> {
        Arc::clone(&self.supervisor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collaborators::{CollaboratorError, LogSessionKey, RoomStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    struct FixedResolver(AtomicUsize);

    #[async_trait]
    impl RoomResolver for FixedResolver {
        async fn resolve(&self, _live_id: &str) -> Result<RoomInfo, CollaboratorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(RoomInfo {
                room_id: "7392091211001140287".to_string(),
                session_cookie: "1%7Cabc".to_string(),
            })
        }
    }

    /// Fails the first `failures` resolutions, then behaves like [`FixedResolver`] and
    /// reports the room as ended.
    struct FlakyResolver {
        failures: usize,
        resolves: AtomicUsize,
        status_checks: AtomicUsize,
    }

    impl FlakyResolver {
        fn new(failures: usize) -> Arc<Self> {
            Arc::new(Self {
                failures,
                resolves: AtomicUsize::new(0),
                status_checks: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RoomResolver for FlakyResolver {
        async fn resolve(&self, _live_id: &str) -> Result<RoomInfo, CollaboratorError> {
            if self.resolves.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(CollaboratorError::Resolve("room page unavailable".to_string()));
            }
            Ok(RoomInfo {
                room_id: "7392091211001140287".to_string(),
                session_cookie: "1%7Cabc".to_string(),
            })
        }

        async fn room_status(
            &self,
            live_id: &str,
            room: &RoomInfo,
        ) -> Result<Option<RoomStatus>, CollaboratorError> {
            self.status_checks.fetch_add(1, Ordering::SeqCst);
            Ok(Some(RoomStatus {
                streamer_id: live_id.to_string(),
                nickname: room.room_id.clone(),
                live: false,
            }))
        }
    }

    struct NullSink;

    #[async_trait]
    impl LogSink for NullSink {
        async fn append_line(&self, _key: &LogSessionKey, _line: &str) -> Result<(), CollaboratorError> {
            Ok(())
        }

        async fn close_session(&self, _key: &LogSessionKey) {}
    }

    struct EchoSigner;

    #[async_trait]
    impl SigningOracle for EchoSigner {
        async fn sign(&self, query: &BTreeMap<String, String>) -> Result<String, CollaboratorError> {
            Ok(format!("sig-{}", query.get("room_id").cloned().unwrap_or_default()))
        }
    }

    struct BrokenSigner;

    #[async_trait]
    impl SigningOracle for BrokenSigner {
        async fn sign(&self, _query: &BTreeMap<String, String>) -> Result<String, CollaboratorError> {
            Err(CollaboratorError::Signing("offline".to_string()))
        }
    }

    #[test]
    fn query_is_stamped_with_room_and_time() {
        let query = push_query("42", 1_721_106_114_633);
        let get = |key: &str| query.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str());
        assert_eq!(get("room_id"), Some("42"));
        assert_eq!(get("compress"), Some("gzip"));
        assert_eq!(get("heartbeatDuration"), Some("0"));
        assert_eq!(get("cursor"), Some("d-1_u-1_fh-7392091211001140287_t-1721106114633_r-1"));
        assert!(get("internal_ext").unwrap().contains("wss_push_room_id:42|"));
        assert_eq!(query.last().map(|(k, _)| *k), Some("heartbeatDuration"));
    }

    #[test]
    fn url_keeps_order_and_appends_signature() {
        let query = push_query("42", 1);
        let url = push_url(DEFAULT_PUSH_URL, &query, "abc").unwrap();
        let s = url.as_str();
        assert!(s.starts_with("wss://webcast100-ws-web-lq.douyin.com/webcast/im/push/v2/?app_name=douyin_web&"));
        assert!(s.ends_with("&room_id=42&heartbeatDuration=0&signature=abc"));
        assert!(s.contains("browser_version=5.0%20(Windows%20NT%2010.0;"));
        assert!(!s.contains(' '));
    }

    #[tokio::test]
    async fn endpoint_resolves_once_and_signs_every_time() {
        let resolver = Arc::new(FixedResolver(AtomicUsize::new(0)));
        let endpoint = DouyinEndpoint::new(&DouyinConfig::new("261378947940"), resolver.clone(), Arc::new(EchoSigner));

        let first = endpoint.endpoint().await.unwrap();
        let second = endpoint.endpoint().await.unwrap();
        assert_eq!(resolver.0.load(Ordering::SeqCst), 1);

        assert!(first.url.ends_with("&signature=sig-7392091211001140287"));
        assert!(second.url.ends_with("&signature=sig-7392091211001140287"));
        assert!(first.headers.contains(&("cookie".to_string(), "ttwid=1%7Cabc".to_string())));
        assert!(first
            .headers
            .iter()
            .any(|(k, v)| k == "user-agent" && v == DEFAULT_USER_AGENT));
    }

    #[tokio::test]
    async fn failed_resolution_is_retried_not_cached() {
        let resolver = FlakyResolver::new(1);
        let endpoint = DouyinEndpoint::new(&DouyinConfig::new("1"), resolver.clone(), Arc::new(EchoSigner));

        assert!(matches!(
            endpoint.endpoint().await,
            Err(SessionError::Endpoint(CollaboratorError::Resolve(_)))
        ));
        assert!(endpoint.endpoint().await.is_ok());
        assert!(endpoint.endpoint().await.is_ok());
        assert_eq!(resolver.resolves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn collaborator_failure_fails_the_session() {
        let factory = SessionFactory::new(
            Arc::new(DouyinEndpoint::new(
                &DouyinConfig::new("1"),
                Arc::new(FixedResolver(AtomicUsize::new(0))),
                Arc::new(BrokenSigner),
            )),
            Arc::new(Dispatcher::new()),
            Arc::new(NullSink),
            SessionSettings::default(),
        );
        let outcome = factory.session(CancellationToken::new()).run().await;
        assert!(
            matches!(outcome, SessionOutcome::Failed(SessionError::Endpoint(CollaboratorError::Signing(_)))),
            "got {outcome}"
        );
    }

    #[tokio::test]
    async fn room_status_is_checked_only_once_the_room_is_known() {
        let resolver = FlakyResolver::new(1);
        let endpoint = DouyinEndpoint::new(&DouyinConfig::new("1"), resolver.clone(), Arc::new(EchoSigner));
        let lost = SessionOutcome::Closed {
            reason: "stream ended".to_string(),
        };

        let _ = endpoint.endpoint().await;
        endpoint.session_ended(&lost).await;
        assert_eq!(resolver.status_checks.load(Ordering::SeqCst), 0);

        endpoint.endpoint().await.unwrap();
        endpoint.session_ended(&lost).await;
        assert_eq!(resolver.status_checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn signing_failure_is_an_endpoint_error() {
        let endpoint = DouyinEndpoint::new(
            &DouyinConfig::new("1"),
            Arc::new(FixedResolver(AtomicUsize::new(0))),
            Arc::new(BrokenSigner),
        );
        assert!(matches!(
            endpoint.endpoint().await,
            Err(SessionError::Endpoint(CollaboratorError::Signing(_)))
        ));
    }
}
