use std::sync::Arc;

use axum::extract::{FromRef, State};
use axum::http::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use onair_proto::protocol::{DisplayState, WidgetView};
use onair_proto::state::StateManager;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::now::NowCollector;
use crate::playback::PlaybackController;
use crate::proxy;
use crate::status::StatusCollector;

#[derive(Clone)]
pub struct ApiState {
    pub state_manager: Arc<StateManager>,
    pub status: Arc<StatusCollector>,
    pub now: Arc<NowCollector>,
    pub playback: PlaybackController,
}

impl FromRef<ApiState> for PlaybackController {
    fn from_ref(state: &ApiState) -> Self {
        state.playback.clone()
    }
}

#[derive(Serialize)]
struct StateResponse {
    state: DisplayState,
    view: WidgetView,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/status/full", get(get_status_full))
        .route("/api/now", get(get_now))
        .route("/api/state", get(get_state))
        .route("/api/play", post(play))
        .route("/api/pause", post(pause))
        .route("/api/toggle", post(toggle))
        .route("/stream", get(proxy::stream_live))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Binds first so a port clash surfaces at startup, then serves until
/// `shutdown` is cancelled.
pub async fn start_server(
    bind_address: &str,
    port: u16,
    state: ApiState,
    shutdown: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let addr = format!("{}:{}", bind_address, port);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP API server listening on http://{}", addr);

    let app = router(state);
    Ok(tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(e) = result {
            error!("HTTP server error: {}", e);
        }
        info!("HTTP API server stopped");
    }))
}

/// Wraps a JSON body with headers that keep browsers and relays from
/// caching live metadata.
fn no_cache<T: Serialize>(value: T) -> impl IntoResponse {
    (
        [
            (CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
            (PRAGMA, "no-cache"),
            (EXPIRES, "0"),
        ],
        Json(value),
    )
}

// ── Metadata ──────────────────────────────────────────────────────────────────

async fn get_status(State(state): State<ApiState>) -> impl IntoResponse {
    no_cache(state.status.fetch_status().await)
}

async fn get_status_full(State(state): State<ApiState>) -> impl IntoResponse {
    no_cache(state.status.fetch_report().await)
}

async fn get_now(State(state): State<ApiState>) -> impl IntoResponse {
    no_cache(state.now.fetch_now().await)
}

async fn get_state(State(state): State<ApiState>) -> impl IntoResponse {
    let display = state.state_manager.get_state().await;
    let view = display.view();
    no_cache(StateResponse { state: display, view })
}

// ── Playback ──────────────────────────────────────────────────────────────────

async fn play(State(playback): State<PlaybackController>) -> impl IntoResponse {
    info!("HTTP API: play");
    no_cache(playback.play().await)
}

async fn pause(State(playback): State<PlaybackController>) -> impl IntoResponse {
    info!("HTTP API: pause");
    no_cache(playback.pause().await)
}

async fn toggle(State(playback): State<PlaybackController>) -> impl IntoResponse {
    info!("HTTP API: toggle");
    no_cache(playback.toggle().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::Fetcher;
    use crate::playback::testing::{FakeConnector, Mode};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use onair_proto::config::Config;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn app(server: &MockServer, mode: Mode) -> (Router, Arc<StateManager>) {
        let mut config = Config::default();
        config.relays.clear();
        config.station.status_url = format!("{}/status", server.uri());
        config.timeouts.status_ms = 500;

        let fetcher = Fetcher::new("onair-test/0.1").unwrap();
        let state_manager = Arc::new(StateManager::new());
        let status = StatusCollector::from_config(&config, &fetcher).unwrap();
        let now = NowCollector::new(
            fetcher.clone(),
            format!("{}/7.html", server.uri()),
            Duration::from_millis(500),
        );
        let playback = PlaybackController::new(
            FakeConnector::new(mode),
            "http://radio.example:8342/;",
            state_manager.clone(),
        );

        let state = ApiState {
            state_manager: state_manager.clone(),
            status: Arc::new(status),
            now: Arc::new(now),
            playback,
        };
        (router(state), state_manager)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::post(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_now_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/7.html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("42,50,100,42,128,1,Artist - Song Title"))
            .mount(&server)
            .await;
        let (app, _) = app(&server, Mode::Succeed).await;

        let response = app.oneshot(get("/api/now")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CACHE_CONTROL],
            "no-cache, no-store, must-revalidate"
        );
        assert_eq!(response.headers()[PRAGMA], "no-cache");
        assert_eq!(response.headers()[EXPIRES], "0");
        assert_eq!(
            json_body(response).await,
            json!({ "listeners": 42, "song": "Artist - Song Title" })
        );
    }

    #[tokio::test]
    async fn test_status_endpoint_degrades_to_nulls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (app, _) = app(&server, Mode::Succeed).await;

        let response = app.oneshot(get("/api/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({ "dj": null, "program": null }));
    }

    #[tokio::test]
    async fn test_status_full_offline_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let (app, _) = app(&server, Mode::Succeed).await;

        let response = app.oneshot(get("/api/status/full")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["serverStatus"], "offline");
        assert_eq!(body["radioTitle"], "Radio Habblive");
        assert_eq!(body["streamStatus"]["bitrate"], "128 kbps");
        assert_eq!(body["debugInfo"]["proxyTried"][0].as_str().map(|s| s.starts_with("direct")), Some(true));
    }

    #[tokio::test]
    async fn test_state_endpoint_before_first_poll() {
        let server = MockServer::start().await;
        let (app, _) = app(&server, Mode::Succeed).await;

        let response = app.oneshot(get("/api/state")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["state"]["rev"], 0);
        assert_eq!(body["state"]["playback"], "idle");
        assert_eq!(body["view"]["listeners"], "0");
        assert_eq!(body["view"]["live"], false);
    }

    #[tokio::test]
    async fn test_stream_unavailable_when_idle() {
        let server = MockServer::start().await;
        let (app, _) = app(&server, Mode::Succeed).await;

        let response = app.oneshot(get("/stream")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_play_then_stream() {
        let server = MockServer::start().await;
        let (app, state_manager) = app(&server, Mode::Succeed).await;

        let response = app.clone().oneshot(post("/api/play")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({ "playback": "playing", "error": null })
        );
        assert_eq!(
            state_manager.get_state().await.playback,
            onair_proto::protocol::PlaybackState::Playing
        );

        let response = app.clone().oneshot(get("/stream")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "audio/mpeg");
        drop(response);

        let response = app.oneshot(post("/api/pause")).await.unwrap();
        assert_eq!(
            json_body(response).await,
            json!({ "playback": "idle", "error": null })
        );
    }

    #[tokio::test]
    async fn test_play_failure_reports_message() {
        let server = MockServer::start().await;
        let (app, _) = app(&server, Mode::Fail).await;

        let response = app.oneshot(post("/api/toggle")).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["playback"], "errored");
        assert_eq!(body["error"], "Erro ao conectar com a rádio");
    }

    #[tokio::test]
    async fn test_cors_is_permissive() {
        let server = MockServer::start().await;
        let (app, _) = app(&server, Mode::Succeed).await;

        let request = Request::get("/api/state")
            .header("origin", "https://widget.example")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }
}
