/// Live audio relay for the widget.
///
/// `GET /stream` hands the browser the bytes of the one upstream connection
/// held by the playback controller, with the upstream `content-type` and
/// `icy-*` headers.  The widget's media element never talks to the station
/// directly.
///
/// Design notes
/// ─────────────
/// • Listeners share the single upstream connection through a broadcast
///   channel; a slow listener skips ahead instead of stalling the others.
/// • `pause()` drops the connection, which closes the channel and ends every
///   relay response.
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::stream;
use onair_proto::protocol::STREAM_UNAVAILABLE_LABEL;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tracing::{debug, info};

use crate::playback::PlaybackController;

// ── Route handler ─────────────────────────────────────────────────────────────

pub async fn stream_live(State(playback): State<PlaybackController>) -> Response {
    let Some(subscription) = playback.subscribe().await else {
        debug!("proxy: stream requested while not playing");
        return (StatusCode::SERVICE_UNAVAILABLE, STREAM_UNAVAILABLE_LABEL).into_response();
    };

    info!("proxy: listener attached");

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CACHE_CONTROL, "no-cache, no-store");
    let mut has_content_type = false;
    for (name, value) in &subscription.headers {
        has_content_type |= name == "content-type";
        builder = builder.header(name.as_str(), value.as_str());
    }
    if !has_content_type {
        builder = builder.header(CONTENT_TYPE, "audio/mpeg");
    }

    match builder.body(Body::from_stream(relay(subscription.receiver))) {
        Ok(response) => response,
        Err(e) => {
            debug!("proxy: invalid upstream header: {}", e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

/// Turns the broadcast receiver into a body stream that ends when the
/// upstream connection is released.
fn relay(receiver: Receiver<Bytes>) -> impl futures_util::Stream<Item = Result<Bytes, std::io::Error>> {
    stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(bytes) => return Some((Ok(bytes), rx)),
                Err(RecvError::Lagged(skipped)) => {
                    debug!("proxy: listener lagged, skipped {} chunks", skipped);
                }
                Err(RecvError::Closed) => {
                    info!("proxy: upstream released, closing listener");
                    return None;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::sync::broadcast;

    #[tokio::test]
    async fn test_relay_ends_on_close() {
        let (tx, rx) = broadcast::channel(4);
        tx.send(Bytes::from_static(b"a")).unwrap();
        tx.send(Bytes::from_static(b"b")).unwrap();
        drop(tx);

        let chunks: Vec<Bytes> = relay(rx).map(|r| r.unwrap()).collect().await;
        assert_eq!(chunks, vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
    }

    #[tokio::test]
    async fn test_relay_skips_lag() {
        let (tx, rx) = broadcast::channel(2);
        for chunk in [&b"1"[..], b"2", b"3", b"4"] {
            tx.send(Bytes::copy_from_slice(chunk)).unwrap();
        }
        drop(tx);

        let chunks: Vec<Bytes> = relay(rx).map(|r| r.unwrap()).collect().await;
        assert_eq!(chunks, vec![Bytes::from_static(b"3"), Bytes::from_static(b"4")]);
    }
}
