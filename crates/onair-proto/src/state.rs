use crate::protocol::{DisplayState, NowInfo, PlaybackState, ServerStatus, StatusInfo};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Owner of the merged display state.  Poll ticks and the playback
/// controller write through here; the HTTP API reads snapshots.
///
/// Every write replaces whole sub-records, so readers never observe a
/// half-applied poll.
#[derive(Debug, Default)]
pub struct StateManager {
    state: Arc<RwLock<DisplayState>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_state(&self) -> DisplayState {
        self.state.read().await.clone()
    }

    /// Merges one poll tick.  Latest write wins.
    pub async fn apply_poll(&self, status: StatusInfo, now: NowInfo, server_status: ServerStatus) {
        let mut state = self.state.write().await;
        state.status = status;
        state.now = now;
        state.server_status = server_status;
        state.updated_at = Some(Utc::now());
        state.rev += 1;
    }

    pub async fn set_playback(&self, playback: PlaybackState, error: Option<String>) {
        let mut state = self.state.write().await;
        state.playback = playback;
        state.playback_error = error;
        state.rev += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_apply_poll_replaces_and_bumps_rev() {
        let manager = StateManager::new();
        assert_eq!(manager.get_state().await.rev, 0);

        manager
            .apply_poll(
                StatusInfo {
                    dj: Some("DJ Mike".to_string()),
                    program: Some("Pop".to_string()),
                },
                NowInfo {
                    listeners: 42,
                    song: Some("Artist - Song".to_string()),
                },
                ServerStatus::Online,
            )
            .await;
        manager
            .apply_poll(StatusInfo::default(), NowInfo::default(), ServerStatus::Offline)
            .await;

        let state = manager.get_state().await;
        assert_eq!(state.rev, 2);
        assert_eq!(state.status, StatusInfo::default());
        assert_eq!(state.now.listeners, 0);
        assert_eq!(state.server_status, ServerStatus::Offline);
        assert!(state.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_playback_does_not_touch_metadata() {
        let manager = StateManager::new();
        manager
            .apply_poll(
                StatusInfo::default(),
                NowInfo {
                    listeners: 7,
                    song: None,
                },
                ServerStatus::Online,
            )
            .await;
        manager
            .set_playback(PlaybackState::Errored, Some("boom".to_string()))
            .await;

        let state = manager.get_state().await;
        assert_eq!(state.now.listeners, 7);
        assert_eq!(state.playback, PlaybackState::Errored);
        assert_eq!(state.playback_error.as_deref(), Some("boom"));
    }
}
