use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_livefeed::core::{HeartbeatMode, SessionSettings, SupervisorSettings, Vocabulary};
use lib_livefeed::ingestors::douyin_wss::{DouyinConfig, DEFAULT_PUSH_URL, DEFAULT_USER_AGENT};

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Self-healing Douyin live room feed recorder", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "LIVEFEED_LIVE_ID", help = "Live id, as found in https://live.douyin.com/<live id>.")]
    pub live_id: Option<String>,

    #[clap(long, env = "LIVEFEED_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "LIVEFEED_LOG_DIR", help = "Directory for diagnostic log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "LIVEFEED_LOG_LEVEL", help = "Logging level or filter directive (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "LIVEFEED_RECORD_DIR", help = "Directory for broadcast record files.")]
    pub record_dir: Option<PathBuf>,

    #[clap(long, env = "LIVEFEED_RETRY_INTERVAL_SECS", help = "Seconds to wait before reconnecting after a lost session.")]
    pub retry_interval_secs: Option<u64>,

    #[clap(long, env = "LIVEFEED_HEARTBEAT_INTERVAL_SECS", help = "Seconds between heartbeat frames.")]
    pub heartbeat_interval_secs: Option<u64>,

    #[clap(long, env = "LIVEFEED_HEARTBEAT_MODE", help = "Heartbeat transport: 'ping' or 'binary'.")]
    pub heartbeat_mode: Option<String>,

    #[clap(long, env = "LIVEFEED_IDLE_TIMEOUT_SECS", help = "Seconds of inbound silence before reconnecting (0 disables).")]
    pub idle_timeout_secs: Option<u64>,

    #[clap(long, env = "LIVEFEED_CONNECT_TIMEOUT_SECS", help = "Seconds allowed for the WebSocket handshake.")]
    pub connect_timeout_secs: Option<u64>,

    #[clap(long, env = "LIVEFEED_ALERT_THRESHOLD", help = "Disconnects tolerated before the alert command runs.")]
    pub alert_threshold: Option<u64>,

    #[clap(long, env = "LIVEFEED_ALERT_COMMAND", help = "Command launched once when the disconnect threshold is exceeded.")]
    pub alert_command: Option<String>,

    #[clap(long, env = "LIVEFEED_SIGN_COMMAND", help = "Command that reads the signature input on stdin and prints the signature.")]
    pub sign_command: Option<String>,

    #[clap(long, env = "LIVEFEED_STATUS_SIGN_COMMAND", help = "Command that reads a room status query on stdin and prints its a_bogus signature.")]
    pub status_sign_command: Option<String>,

    #[clap(long, env = "LIVEFEED_USER_AGENT", help = "User-Agent for HTTP and WebSocket requests.")]
    pub user_agent: Option<String>,

    #[clap(long, env = "LIVEFEED_WS_URL", help = "Push endpoint base URL.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "LIVEFEED_VOCABULARIES", help = "Comma-separated message vocabularies to handle: legacy, im.")]
    pub vocabularies: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            live_id: other.live_id.or(self.live_id),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            record_dir: other.record_dir.or(self.record_dir),
            retry_interval_secs: other.retry_interval_secs.or(self.retry_interval_secs),
            heartbeat_interval_secs: other.heartbeat_interval_secs.or(self.heartbeat_interval_secs),
            heartbeat_mode: other.heartbeat_mode.or(self.heartbeat_mode),
            idle_timeout_secs: other.idle_timeout_secs.or(self.idle_timeout_secs),
            connect_timeout_secs: other.connect_timeout_secs.or(self.connect_timeout_secs),
            alert_threshold: other.alert_threshold.or(self.alert_threshold),
            alert_command: other.alert_command.or(self.alert_command),
            sign_command: other.sign_command.or(self.sign_command),
            status_sign_command: other.status_sign_command.or(self.status_sign_command),
            user_agent: other.user_agent.or(self.user_agent),
            ws_url: other.ws_url.or(self.ws_url),
            vocabularies: other.vocabularies.or(self.vocabularies),
        }
    }

    fn defaults() -> Config {
        Config {
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            record_dir: Some(PathBuf::from("./records")),
            retry_interval_secs: Some(5),
            heartbeat_interval_secs: Some(5),
            heartbeat_mode: Some("ping".to_string()),
            idle_timeout_secs: Some(60),
            connect_timeout_secs: Some(10),
            alert_threshold: Some(5),
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            ws_url: Some(DEFAULT_PUSH_URL.to_string()),
            vocabularies: Some("legacy,im".to_string()),
            ..Default::default()
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> String {
        self.log_level.clone().unwrap_or_else(|| "info".to_string())
    }

    pub fn record_dir(&self) -> PathBuf {
        self.record_dir.clone().unwrap_or_else(|| PathBuf::from("./records"))
    }

    /// Converts the merged configuration into the ingestor's typed settings.
    pub fn ingestor_config(&self) -> Result<DouyinConfig> {
        let live_id = self
            .live_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("a live id is required (--live-id or LIVEFEED_LIVE_ID)"))?;

        let mut config = DouyinConfig::new(live_id.trim());
        if let Some(url) = &self.ws_url {
            config.push_url = url.clone();
        }
        if let Some(ua) = &self.user_agent {
            config.user_agent = ua.clone();
        }
        if let Some(list) = &self.vocabularies {
            config.vocabularies = parse_vocabularies(list)?;
        }

        let defaults = SessionSettings::default();
        config.session = SessionSettings {
            heartbeat_interval: self
                .heartbeat_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_interval),
            heartbeat_mode: match &self.heartbeat_mode {
                Some(mode) => mode.parse::<HeartbeatMode>().map_err(|e| anyhow!(e))?,
                None => defaults.heartbeat_mode,
            },
            idle_timeout: match self.idle_timeout_secs {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.idle_timeout,
            },
            connect_timeout: self
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
        };

        let defaults = SupervisorSettings::default();
        config.supervisor = SupervisorSettings {
            retry_interval: self
                .retry_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.retry_interval),
            alert_threshold: self.alert_threshold.unwrap_or(defaults.alert_threshold),
        };

        Ok(config)
    }
}

fn parse_vocabularies(list: &str) -> Result<Vec<Vocabulary>> {
    let mut out = Vec::new();
    for item in list.split(',').filter(|s| !s.trim().is_empty()) {
        let vocabulary = item.parse::<Vocabulary>().map_err(|e| anyhow!(e))?;
        if !out.contains(&vocabulary) {
            out.push(vocabulary);
        }
    }
    if out.is_empty() {
        return Err(anyhow!("at least one vocabulary must be enabled"));
    }
    Ok(out)
}

/// Layers defaults, the JSON config file and CLI/env arguments (in that order).
pub fn load_config_from(cli: Config) -> Result<Config> {
    let config_file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("live_fetcher.conf"));

    let mut current_config = Config::defaults();
    if let Some(file_config) = read_config_file(&config_file_path)? {
        current_config = current_config.merge(file_config);
    }
    Ok(current_config.merge(cli))
}

pub fn load_config() -> Result<Config> {
    load_config_from(Config::parse())
}

fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = serde_json::from_str::<Config>(&text)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(config))
}
