/// Playback controller: owner of the single live stream connection.
///
/// `play()` opens a fresh upstream connection (cache-busted so no stale
/// buffer is resumed) and a pump task fans the bytes out over a broadcast
/// channel; `GET /stream` subscribers read from there.  `pause()` drops the
/// connection outright: this is a live stream, so resuming later must
/// reconnect at the live edge.
///
/// Every transition bumps a generation counter.  A connection attempt that
/// finishes after its generation was superseded (pause, or a newer play) is
/// dropped on the spot, which is what keeps play-then-pause ending `Idle`.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::StreamExt;
use onair_proto::protocol::{PlaybackState, CONNECT_ERROR_LABEL, STREAM_ERROR_LABEL};
use onair_proto::state::StateManager;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fetch::{with_timeout, FetchError};

/// Buffered chunks per subscriber before it starts lagging.
const RELAY_CAPACITY: usize = 64;

// ── Live stream handle ────────────────────────────────────────────────────────

/// An open upstream audio connection.  Dropping it aborts the pump task,
/// which closes the socket and ends every subscriber's stream.
pub struct LiveStream {
    tx: broadcast::Sender<Bytes>,
    headers: Vec<(String, String)>,
    finished: CancellationToken,
    pump: Option<AbortHandle>,
}

impl LiveStream {
    pub fn from_response(response: reqwest::Response) -> Self {
        // Forward content-type and all ICY headers; skip hop-by-hop headers
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| {
                let name = name.as_str();
                name.starts_with("icy-") || name == "content-type"
            })
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut live = Self::detached(headers);
        let tx = live.tx.clone();
        let done = live.finished.clone();
        let pump = tokio::spawn(async move {
            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    // No subscribers is fine; the connection stays at the live edge.
                    Ok(bytes) => {
                        let _ = tx.send(bytes);
                    }
                    Err(e) => {
                        warn!("playback: stream read error: {}", e);
                        break;
                    }
                }
            }
            done.cancel();
        });
        live.pump = Some(pump.abort_handle());
        live
    }

    /// A handle with no upstream pump behind it.
    pub fn detached(headers: Vec<(String, String)>) -> Self {
        let (tx, _) = broadcast::channel(RELAY_CAPACITY);
        Self {
            tx,
            headers,
            finished: CancellationToken::new(),
            pump: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.tx.subscribe()
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Cancelled when the upstream ends or the handle is dropped.
    pub fn finished(&self) -> CancellationToken {
        self.finished.clone()
    }

    #[cfg(test)]
    pub fn sender(&self) -> broadcast::Sender<Bytes> {
        self.tx.clone()
    }
}

impl Drop for LiveStream {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.finished.cancel();
    }
}

// ── Connector ─────────────────────────────────────────────────────────────────

#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<LiveStream, FetchError>;
}

/// Opens the stream over HTTP.  Only the time to response headers is
/// bounded; the body then flows for as long as the connection lives.
pub struct HttpConnector {
    client: reqwest::Client,
    connect_timeout: Duration,
}

impl HttpConnector {
    pub fn new(client: reqwest::Client, connect_timeout: Duration) -> Self {
        Self {
            client,
            connect_timeout,
        }
    }
}

#[async_trait]
impl StreamConnector for HttpConnector {
    async fn connect(&self, url: &str) -> Result<LiveStream, FetchError> {
        let response = with_timeout(self.connect_timeout, async {
            Ok::<_, FetchError>(self.client.get(url).send().await?)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::UpstreamStatus(status));
        }

        Ok(LiveStream::from_response(response))
    }
}

/// Appends `t=<millis>` so every play opens a brand-new connection.
pub fn cache_busted(url: &str, millis: i64) -> String {
    let sep = if url.contains('?') { '&' } else { '?' };
    format!("{}{}t={}", url, sep, millis)
}

// ── Controller ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackSnapshot {
    pub playback: PlaybackState,
    pub error: Option<String>,
}

/// What a `/stream` listener gets: the byte feed plus headers to forward.
pub struct Subscription {
    pub receiver: broadcast::Receiver<Bytes>,
    pub headers: Vec<(String, String)>,
}

struct Inner {
    state: PlaybackState,
    error: Option<String>,
    generation: u64,
    stream: Option<LiveStream>,
}

impl Inner {
    fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            playback: self.state,
            error: self.error.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PlaybackController {
    inner: Arc<Mutex<Inner>>,
    connector: Arc<dyn StreamConnector>,
    stream_url: String,
    state_manager: Arc<StateManager>,
}

impl PlaybackController {
    pub fn new(
        connector: Arc<dyn StreamConnector>,
        stream_url: impl Into<String>,
        state_manager: Arc<StateManager>,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: PlaybackState::Idle,
                error: None,
                generation: 0,
                stream: None,
            })),
            connector,
            stream_url: stream_url.into(),
            state_manager,
        }
    }

    pub async fn state(&self) -> PlaybackState {
        self.inner.lock().await.state
    }

    #[cfg(test)]
    pub async fn snapshot(&self) -> PlaybackSnapshot {
        self.inner.lock().await.snapshot()
    }

    /// Connects to the live stream.  Returns once the attempt settles:
    /// `Playing`, `Errored`, or `Idle` if a pause arrived meanwhile.
    /// A call while already `Loading` is ignored.
    ///
    /// The attempt runs in its own task, so a caller that goes away mid-connect
    /// (an HTTP client hanging up) still leaves a settled state behind.
    pub async fn play(&self) -> PlaybackSnapshot {
        let generation = {
            let mut inner = self.inner.lock().await;
            if inner.state == PlaybackState::Loading {
                debug!("playback: play ignored, already connecting");
                return inner.snapshot();
            }
            inner.generation += 1;
            inner.stream = None;
            inner.state = PlaybackState::Loading;
            inner.error = None;
            self.publish(&inner).await;
            inner.generation
        };

        let this = self.clone();
        let attempt = tokio::spawn(async move { this.connect_and_settle(generation).await });
        match attempt.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("playback: connect task failed: {}", e);
                self.inner.lock().await.snapshot()
            }
        }
    }

    async fn connect_and_settle(&self, generation: u64) -> PlaybackSnapshot {
        let url = cache_busted(&self.stream_url, chrono::Utc::now().timestamp_millis());
        info!("playback: connecting to {}", url);
        let result = self.connector.connect(&url).await;

        let mut inner = self.inner.lock().await;
        if inner.generation != generation {
            // `result` drops here, closing the connection we no longer want.
            debug!("playback: connect attempt superseded");
            return inner.snapshot();
        }

        match result {
            Ok(stream) => {
                info!("playback: live");
                self.spawn_watchdog(generation, stream.finished());
                inner.stream = Some(stream);
                inner.state = PlaybackState::Playing;
            }
            Err(e) => {
                warn!("playback: connect failed: {}", e);
                inner.state = PlaybackState::Errored;
                inner.error = Some(CONNECT_ERROR_LABEL.to_string());
            }
        }
        self.publish(&inner).await;
        inner.snapshot()
    }

    /// Drops the connection unconditionally and returns to `Idle`.
    pub async fn pause(&self) -> PlaybackSnapshot {
        let mut inner = self.inner.lock().await;
        inner.generation += 1;
        if inner.stream.take().is_some() {
            info!("playback: released live stream");
        }
        inner.state = PlaybackState::Idle;
        inner.error = None;
        self.publish(&inner).await;
        inner.snapshot()
    }

    pub async fn toggle(&self) -> PlaybackSnapshot {
        let active = self.state().await.is_active();
        if active {
            self.pause().await
        } else {
            self.play().await
        }
    }

    /// `None` unless a stream is live.
    pub async fn subscribe(&self) -> Option<Subscription> {
        let inner = self.inner.lock().await;
        inner.stream.as_ref().map(|s| Subscription {
            receiver: s.subscribe(),
            headers: s.headers().to_vec(),
        })
    }

    /// Flags `Errored` if the upstream ends on its own while still current.
    fn spawn_watchdog(&self, generation: u64, finished: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            finished.cancelled().await;
            let mut inner = this.inner.lock().await;
            if inner.generation == generation && inner.state == PlaybackState::Playing {
                warn!("playback: live stream ended unexpectedly");
                inner.stream = None;
                inner.state = PlaybackState::Errored;
                inner.error = Some(STREAM_ERROR_LABEL.to_string());
                this.publish(&inner).await;
            }
        });
    }

    async fn publish(&self, inner: &Inner) {
        self.state_manager
            .set_playback(inner.state, inner.error.clone())
            .await;
    }
}
