use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Placeholder shown by the widget while a label is unknown.
pub const LOADING_LABEL: &str = "Carregando...";
/// Song placeholder when the status page cannot be reached at all.
pub const STREAM_UNAVAILABLE_LABEL: &str = "Stream temporariamente indisponível";
/// Shown when `play()` fails to connect.
pub const CONNECT_ERROR_LABEL: &str = "Erro ao conectar com a rádio";
/// Shown when an established stream drops.
pub const STREAM_ERROR_LABEL: &str = "Erro na conexão";

/// DJ and program scraped from the status page.  Either field may be absent
/// without affecting the other.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusInfo {
    pub dj: Option<String>,
    pub program: Option<String>,
}

/// Listener count and current song from the CSV status line.
/// `listeners` is always a number; parse failures yield 0.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NowInfo {
    pub listeners: u64,
    pub song: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Online,
    #[default]
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatus {
    pub bitrate: String,
    pub current_listeners: u64,
    pub max_listeners: u64,
}

/// How a status report was obtained.  Success fills the first three fields,
/// total failure fills the last two.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_used: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_from_html: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_tried: Option<Vec<String>>,
}

/// The full record scraped from the status page.  Every field carries a
/// literal default, so a report is always complete even when the page was
/// unreachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub server_status: ServerStatus,
    pub stream_status: StreamStatus,
    pub peak_listeners: u64,
    pub average_listen_time: String,
    pub radio_title: String,
    pub current_song: String,
    pub genre: String,
    pub stream_url: String,
    pub last_updated: DateTime<Utc>,
    pub debug_info: DebugInfo,
}

impl StatusReport {
    /// Placeholder returned when neither the relays nor the direct fetch
    /// produced a page.  `tried` names every candidate with its failure.
    pub fn offline(station_name: &str, stream_url: &str, tried: Vec<String>) -> Self {
        Self {
            server_status: ServerStatus::Offline,
            stream_status: StreamStatus {
                bitrate: "128 kbps".to_string(),
                current_listeners: 0,
                max_listeners: 1000,
            },
            peak_listeners: 0,
            average_listen_time: "0:00".to_string(),
            radio_title: station_name.to_string(),
            current_song: STREAM_UNAVAILABLE_LABEL.to_string(),
            genre: "Variados".to_string(),
            stream_url: stream_url.to_string(),
            last_updated: Utc::now(),
            debug_info: DebugInfo {
                error: Some("all connection methods failed".to_string()),
                proxy_tried: Some(tried),
                ..DebugInfo::default()
            },
        }
    }
}

/// Playback lifecycle of the single live stream handle.
///
/// Transitions:
///   Idle -> Loading -> Playing | Errored | Idle (cancelled)
///   Playing -> Idle (pause) | Errored (stream dropped)
///   Errored -> Loading | Idle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Playing,
    Errored,
}

impl PlaybackState {
    /// True while a connection is held or being established.
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackState::Loading | PlaybackState::Playing)
    }
}

/// Merged snapshot served to the widget.  `rev` increases on every change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayState {
    pub rev: u64,
    pub status: StatusInfo,
    pub now: NowInfo,
    pub server_status: ServerStatus,
    pub playback: PlaybackState,
    pub playback_error: Option<String>,
    /// When the last poll tick landed.  `None` before the first tick.
    pub updated_at: Option<DateTime<Utc>>,
}

/// Render-ready labels for the widget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetView {
    pub dj: String,
    pub program: String,
    pub listeners: String,
    pub song: Option<String>,
    pub live: bool,
    pub message: Option<String>,
}

impl DisplayState {
    pub fn view(&self) -> WidgetView {
        WidgetView {
            dj: label_or_loading(self.status.dj.as_deref()),
            program: label_or_loading(self.status.program.as_deref()),
            listeners: group_thousands(self.now.listeners),
            song: self.now.song.clone(),
            live: self.playback == PlaybackState::Playing,
            message: self.playback_error.clone(),
        }
    }
}

fn label_or_loading(label: Option<&str>) -> String {
    match label {
        Some(l) if !l.trim().is_empty() => l.to_string(),
        _ => LOADING_LABEL.to_string(),
    }
}

/// Formats with `.` as the thousands separator (pt-BR).
fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1.000");
        assert_eq!(group_thousands(1234567), "1.234.567");
    }

    #[test]
    fn test_view_placeholders() {
        let view = DisplayState::default().view();
        assert_eq!(view.dj, LOADING_LABEL);
        assert_eq!(view.program, LOADING_LABEL);
        assert_eq!(view.listeners, "0");
        assert_eq!(view.song, None);
        assert!(!view.live);
    }

    #[test]
    fn test_view_keeps_known_labels_independent() {
        let state = DisplayState {
            status: StatusInfo {
                dj: Some("DJ Mike".to_string()),
                program: None,
            },
            now: NowInfo {
                listeners: 1500,
                song: Some("Artist - Song".to_string()),
            },
            playback: PlaybackState::Playing,
            ..DisplayState::default()
        };
        let view = state.view();
        assert_eq!(view.dj, "DJ Mike");
        assert_eq!(view.program, LOADING_LABEL);
        assert_eq!(view.listeners, "1.500");
        assert_eq!(view.song.as_deref(), Some("Artist - Song"));
        assert!(view.live);
    }

    #[test]
    fn test_now_info_json_shape() {
        let json = serde_json::to_value(NowInfo::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "listeners": 0, "song": null }));
    }

    #[test]
    fn test_offline_report_shape() {
        let report = StatusReport::offline(
            "Radio Test",
            "http://radio.example:8000",
            vec!["direct: timed out".to_string()],
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["serverStatus"], "offline");
        assert_eq!(json["streamStatus"]["bitrate"], "128 kbps");
        assert_eq!(json["streamStatus"]["maxListeners"], 1000);
        assert_eq!(json["radioTitle"], "Radio Test");
        assert_eq!(json["currentSong"], STREAM_UNAVAILABLE_LABEL);
        assert_eq!(json["debugInfo"]["proxyTried"][0], "direct: timed out");
        assert!(json["debugInfo"].get("proxyUsed").is_none());
    }
}
