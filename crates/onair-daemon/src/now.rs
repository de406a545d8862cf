//! Listener count and current song from the CSV status line.
//!
//! The line looks like
//! `currentlisteners,peaklisteners,maxlisteners,reportedlisteners,bitrate,serverstatus,songtitle`
//! and the song title may itself contain commas.
use std::time::Duration;

use onair_proto::protocol::NowInfo;
use reqwest::header::HeaderMap;
use tracing::{debug, warn};

use crate::fetch::{with_timeout, FetchError, Fetcher};

const MIN_FIELDS: usize = 7;
const SONG_FIELD: usize = 6;

pub struct NowCollector {
    fetcher: Fetcher,
    url: String,
    timeout: Duration,
}

impl NowCollector {
    pub fn new(fetcher: Fetcher, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            fetcher,
            url: url.into(),
            timeout,
        }
    }

    /// Never fails: any error yields `NowInfo { listeners: 0, song: None }`.
    pub async fn fetch_now(&self) -> NowInfo {
        match self.try_fetch().await {
            Ok(now) => {
                debug!("now: {} listeners, song={:?}", now.listeners, now.song);
                now
            }
            Err(e) => {
                warn!("now: {} failed, using defaults: {}", self.url, e);
                NowInfo::default()
            }
        }
    }

    async fn try_fetch(&self) -> Result<NowInfo, FetchError> {
        let body = with_timeout(self.timeout, self.fetcher.get_text(&self.url, HeaderMap::new())).await?;
        parse_now(&body)
    }
}

/// Parses one status line.  Fewer than seven fields is malformed; a
/// non-numeric listener field becomes 0 without discarding the song.
pub fn parse_now(text: &str) -> Result<NowInfo, FetchError> {
    let line = strip_html_body(text).trim();
    let parts: Vec<&str> = line.split(',').collect();

    if parts.len() < MIN_FIELDS {
        return Err(FetchError::MalformedPayload(format!(
            "expected at least {} fields, got {}",
            MIN_FIELDS,
            parts.len()
        )));
    }

    let listeners = parts[0].trim().parse::<u64>().unwrap_or(0);
    let song = parts[SONG_FIELD..].join(",").trim().to_string();

    Ok(NowInfo {
        listeners,
        song: if song.is_empty() { None } else { Some(song) },
    })
}

/// Shoutcast v1 wraps the line in `<html>...<body>LINE</body></html>`.
/// Returns the body contents when such a wrapper is present.
fn strip_html_body(text: &str) -> &str {
    let lower = text.to_ascii_lowercase();
    let Some(open) = lower.find("<body>") else {
        return text;
    };
    let start = open + "<body>".len();
    let end = lower[start..]
        .find("</body>")
        .map(|i| start + i)
        .unwrap_or(text.len());
    &text[start..end]
}
