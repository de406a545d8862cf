/// Periodic refresh of the display state.
///
/// One tick fires immediately on start, then one per interval.  Every tick
/// runs as its own task that collects status and now-playing concurrently and
/// replaces that part of the display state in a single write.  Ticks are not
/// serialized against each other; the latest write wins.
///
/// Shutdown cancels the timer, aborts in-flight ticks before they can write,
/// and releases the live stream.
use std::sync::Arc;
use std::time::Duration;

use onair_proto::state::StateManager;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::now::NowCollector;
use crate::playback::PlaybackController;
use crate::status::StatusCollector;

pub struct Poller {
    status: Arc<StatusCollector>,
    now: Arc<NowCollector>,
    state_manager: Arc<StateManager>,
    playback: PlaybackController,
    interval: Duration,
}

pub struct PollerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    playback: PlaybackController,
}

impl Poller {
    pub fn new(
        status: Arc<StatusCollector>,
        now: Arc<NowCollector>,
        state_manager: Arc<StateManager>,
        playback: PlaybackController,
        interval: Duration,
    ) -> Self {
        Self {
            status,
            now,
            state_manager,
            playback,
            interval,
        }
    }

    pub fn start(self) -> PollerHandle {
        let cancel = CancellationToken::new();
        let playback = self.playback.clone();
        info!("poller: starting, interval {:?}", self.interval);
        let task = tokio::spawn(self.run(cancel.clone()));
        PollerHandle { cancel, task, playback }
    }

    async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    ticks.spawn(tick(
                        Arc::clone(&self.status),
                        Arc::clone(&self.now),
                        Arc::clone(&self.state_manager),
                    ));
                }
                Some(res) = ticks.join_next(), if !ticks.is_empty() => {
                    if let Err(e) = res {
                        warn!("poller: tick task failed: {}", e);
                    }
                }
            }
        }

        // Aborted ticks never reach their state write.
        ticks.shutdown().await;
        info!("poller: stopped");
    }
}

async fn tick(status: Arc<StatusCollector>, now: Arc<NowCollector>, state_manager: Arc<StateManager>) {
    let (snapshot, now) = tokio::join!(status.collect(), now.fetch_now());
    debug!(
        "poller: dj={:?} program={:?} listeners={} server={:?}",
        snapshot.info.dj, snapshot.info.program, now.listeners, snapshot.report.server_status
    );
    state_manager
        .apply_poll(snapshot.info, now, snapshot.report.server_status)
        .await;
}

impl PollerHandle {
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("poller: task ended abnormally: {}", e);
        }
        self.playback.pause().await;
    }
}
