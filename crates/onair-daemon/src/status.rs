//! DJ, program and server fields scraped from the upstream status page.
//!
//! The page is reached through a ladder of sources: every configured CORS
//! relay in order, then one direct fetch.  The first source that yields a
//! non-empty page wins; when none does, a complete offline placeholder is
//! returned instead.
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use onair_proto::config::{Config, Envelope, RelayConfig};
use onair_proto::protocol::{DebugInfo, ServerStatus, StatusInfo, StatusReport, StreamStatus};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::extract::{ExtractionTable, Field};
use crate::fetch::{with_timeout, FetchError, Fetcher};

const SERVER_UP_PHRASE: &str = "Server is currently up";
const EXCERPT_CHARS: usize = 200;

// ── Sources ───────────────────────────────────────────────────────────────────

/// One way of obtaining the raw status page.
#[async_trait]
pub trait Source: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<String, FetchError>;
}

/// A public CORS relay wrapping the page URL.
pub struct RelaySource {
    name: String,
    url: String,
    envelope: Envelope,
    fetcher: Fetcher,
}

impl RelaySource {
    pub fn new(fetcher: Fetcher, relay: &RelayConfig, page_url: &str) -> Self {
        Self {
            name: relay.name.clone(),
            url: expand_template(&relay.template, page_url),
            envelope: relay.envelope.clone(),
            fetcher,
        }
    }
}

#[async_trait]
impl Source for RelaySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<String, FetchError> {
        let mut headers = HeaderMap::new();
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        let body = self.fetcher.get_text(&self.url, headers).await?;
        unwrap_envelope(&self.envelope, body)
    }
}

/// The page itself, no relay.
pub struct DirectSource {
    url: String,
    fetcher: Fetcher,
}

impl DirectSource {
    pub fn new(fetcher: Fetcher, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            fetcher,
        }
    }
}

#[async_trait]
impl Source for DirectSource {
    fn name(&self) -> &str {
        "direct"
    }

    async fn fetch(&self) -> Result<String, FetchError> {
        let body = self.fetcher.get_text(&self.url, HeaderMap::new()).await?;
        unwrap_envelope(&Envelope::Raw, body)
    }
}

/// `{url}` becomes the percent-encoded page URL, `{raw_url}` the URL as is.
pub fn expand_template(template: &str, page_url: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(page_url.as_bytes()).collect();
    template
        .replace("{url}", &encoded)
        .replace("{raw_url}", page_url)
}

pub fn unwrap_envelope(envelope: &Envelope, body: String) -> Result<String, FetchError> {
    match envelope {
        Envelope::Raw => {
            if body.trim().is_empty() {
                return Err(FetchError::MalformedPayload("empty body".to_string()));
            }
            Ok(body)
        }
        Envelope::Json { fields } => {
            let value: Value = serde_json::from_str(&body).map_err(|e| {
                FetchError::MalformedPayload(format!("relay envelope is not JSON: {}", e))
            })?;
            for field in fields {
                if let Some(page) = value.get(field).and_then(Value::as_str) {
                    if !page.trim().is_empty() {
                        return Ok(page.to_string());
                    }
                }
            }
            Err(FetchError::MalformedPayload(format!(
                "relay envelope has no usable {:?}",
                fields
            )))
        }
    }
}

// ── Ladder ────────────────────────────────────────────────────────────────────

/// A page and the name of the source that produced it.
#[derive(Debug, Clone)]
pub struct Page {
    pub html: String,
    pub source: String,
}

pub struct Ladder {
    relays: Vec<Box<dyn Source>>,
    direct: Box<dyn Source>,
    attempt_timeout: Duration,
}

impl Ladder {
    pub fn new(relays: Vec<Box<dyn Source>>, direct: Box<dyn Source>, attempt_timeout: Duration) -> Self {
        Self {
            relays,
            direct,
            attempt_timeout,
        }
    }

    /// Tries relays in order, then the direct source, each under its own
    /// deadline.  On total failure returns one `"name: reason"` line per
    /// attempt.
    pub async fn fetch(&self) -> Result<Page, Vec<String>> {
        let mut tried = Vec::new();

        for source in self.relays.iter().chain(std::iter::once(&self.direct)) {
            debug!("status: trying {}", source.name());
            match with_timeout(self.attempt_timeout, source.fetch()).await {
                Ok(html) => {
                    if !tried.is_empty() {
                        info!("status: {} succeeded after {} failed attempts", source.name(), tried.len());
                    }
                    return Ok(Page {
                        html,
                        source: source.name().to_string(),
                    });
                }
                Err(e) => {
                    warn!("status: {} failed: {}", source.name(), e);
                    tried.push(format!("{}: {}", source.name(), e));
                }
            }
        }

        Err(tried)
    }
}

// ── Collector ─────────────────────────────────────────────────────────────────

/// Both views of one status page fetch.
#[derive(Debug, Clone)]
pub struct StatusSnapshot {
    pub info: StatusInfo,
    pub report: StatusReport,
}

pub struct StatusCollector {
    ladder: Ladder,
    table: ExtractionTable,
    station_name: String,
    stream_url: String,
}

impl StatusCollector {
    pub fn new(ladder: Ladder, table: ExtractionTable, station_name: String, stream_url: String) -> Self {
        Self {
            ladder,
            table,
            station_name,
            stream_url,
        }
    }

    pub fn from_config(config: &Config, fetcher: &Fetcher) -> anyhow::Result<Self> {
        let page_url = &config.station.status_url;
        let relays = config
            .relays
            .iter()
            .map(|r| Box::new(RelaySource::new(fetcher.clone(), r, page_url)) as Box<dyn Source>)
            .collect();
        let direct = Box::new(DirectSource::new(fetcher.clone(), page_url.clone()));
        let ladder = Ladder::new(relays, direct, config.timeouts.status());
        let table = ExtractionTable::new(&config.station.name)?;

        Ok(Self::new(
            ladder,
            table,
            config.station.name.clone(),
            config.station.stream_url.clone(),
        ))
    }

    /// Never fails; an unreachable page gives the offline placeholder.
    pub async fn collect(&self) -> StatusSnapshot {
        match self.ladder.fetch().await {
            Ok(page) => self.parse_page(&page),
            Err(tried) => {
                warn!("status: every source failed, reporting offline");
                StatusSnapshot {
                    info: StatusInfo::default(),
                    report: StatusReport::offline(&self.station_name, &self.stream_url, tried),
                }
            }
        }
    }

    pub async fn fetch_status(&self) -> StatusInfo {
        self.collect().await.info
    }

    pub async fn fetch_report(&self) -> StatusReport {
        self.collect().await.report
    }

    pub fn parse_page(&self, page: &Page) -> StatusSnapshot {
        let html = page.html.as_str();
        let t = &self.table;

        let info = StatusInfo {
            dj: t.lookup(html, Field::StreamTitle),
            program: t.lookup(html, Field::StreamGenre),
        };

        let report = StatusReport {
            server_status: if html.contains(SERVER_UP_PHRASE) {
                ServerStatus::Online
            } else {
                ServerStatus::Offline
            },
            stream_status: StreamStatus {
                bitrate: format!("{} kbps", t.value(html, Field::Bitrate)),
                current_listeners: t.number(html, Field::CurrentListeners),
                max_listeners: t.number(html, Field::MaxListeners),
            },
            peak_listeners: t.number(html, Field::PeakListeners),
            average_listen_time: t.value(html, Field::AverageListenTime),
            radio_title: t.value(html, Field::StreamTitle),
            current_song: t.value(html, Field::CurrentSong),
            genre: t.value(html, Field::StreamGenre),
            stream_url: self.stream_url.clone(),
            last_updated: Utc::now(),
            debug_info: DebugInfo {
                proxy_used: Some(page.source.clone()),
                html_length: Some(html.len()),
                extracted_from_html: Some(excerpt(html)),
                ..DebugInfo::default()
            },
        };

        debug!("status: via {} dj={:?} program={:?}", page.source, info.dj, info.program);
        StatusSnapshot { info, report }
    }
}

fn excerpt(html: &str) -> String {
    let head: String = html.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", head)
}
