use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub station: StationConfig,
    /// CORS relays tried in order before the direct status page fetch.
    #[serde(default = "default_relays")]
    pub relays: Vec<RelayConfig>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// The one upstream station this daemon follows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationConfig {
    /// Display name, also the offline fallback for the stream title.
    #[serde(default = "default_station_name")]
    pub name: String,
    /// CSV status line (`currentlisteners,...,songtitle`).
    #[serde(default = "default_now_url")]
    pub now_url: String,
    /// HTML status page scraped for DJ, genre and server fields.
    #[serde(default = "default_status_url")]
    pub status_url: String,
    /// Live audio stream.
    #[serde(default = "default_stream_url")]
    pub stream_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// One rung of the relay ladder.
///
/// `template` is expanded with `{url}` (percent-encoded page URL) or
/// `{raw_url}` (page URL verbatim).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    pub name: String,
    pub template: String,
    #[serde(default)]
    pub envelope: Envelope,
}

/// How a relay wraps the proxied page.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Envelope {
    /// Body is the page itself.
    #[default]
    Raw,
    /// Body is a JSON object; the page sits in the first non-empty string
    /// field out of `fields`.
    Json {
        #[serde(default = "default_envelope_fields")]
        fields: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_now_timeout_ms")]
    pub now_ms: u64,
    /// Applies to every relay rung and to the direct fetch individually.
    #[serde(default = "default_status_timeout_ms")]
    pub status_ms: u64,
    #[serde(default = "default_stream_connect_timeout_ms")]
    pub stream_connect_ms: u64,
}

impl TimeoutConfig {
    pub fn now(&self) -> Duration {
        Duration::from_millis(self.now_ms)
    }

    pub fn status(&self) -> Duration {
        Duration::from_millis(self.status_ms)
    }

    pub fn stream_connect(&self) -> Duration {
        Duration::from_millis(self.stream_connect_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: default_station_name(),
            now_url: default_now_url(),
            status_url: default_status_url(),
            stream_url: default_stream_url(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            now_ms: default_now_timeout_ms(),
            status_ms: default_status_timeout_ms(),
            stream_connect_ms: default_stream_connect_timeout_ms(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8989
}

fn default_station_name() -> String {
    "Radio Habblive".to_string()
}

fn default_now_url() -> String {
    "http://sonicpanel.oficialserver.com:8342/7.html".to_string()
}

fn default_status_url() -> String {
    "http://sonicpanel.oficialserver.com:8342/".to_string()
}

fn default_stream_url() -> String {
    "https://sonicpanel.oficialserver.com:8342/;".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}

fn default_envelope_fields() -> Vec<String> {
    vec!["contents".to_string(), "data".to_string()]
}

fn default_relays() -> Vec<RelayConfig> {
    vec![
        RelayConfig {
            name: "allorigins".to_string(),
            template: "https://api.allorigins.win/get?url={url}".to_string(),
            envelope: Envelope::Json {
                fields: default_envelope_fields(),
            },
        },
        RelayConfig {
            name: "corsproxy".to_string(),
            template: "https://corsproxy.io/?{url}".to_string(),
            envelope: Envelope::Raw,
        },
        RelayConfig {
            name: "cors-anywhere".to_string(),
            template: "https://cors-anywhere.herokuapp.com/{raw_url}".to_string(),
            envelope: Envelope::Raw,
        },
    ]
}

fn default_now_timeout_ms() -> u64 {
    5_000
}

fn default_status_timeout_ms() -> u64 {
    8_000
}

fn default_stream_connect_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_secs() -> u64 {
    10
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_file()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http: HttpConfig::default(),
            station: StationConfig::default(),
            relays: default_relays(),
            timeouts: TimeoutConfig::default(),
            poll: PollConfig::default(),
        }
    }
}
