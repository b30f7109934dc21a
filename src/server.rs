use crate::config::StreamConfig;
use crate::live::{ContextEvent, LiveHandle};
use crate::session::SessionDocument;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

struct AppState {
    live: LiveHandle,
}

pub fn router(live: LiveHandle) -> Router {
    let state = Arc::new(AppState { live });

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/session", get(session))
        .route("/events", post(enqueue_event))
        .route("/ws", get(stream))
        .with_state(state)
}

/// Bind the configured port and serve the live session until `shutdown` resolves.
pub async fn run_server<F>(config: &StreamConfig, live: LiveHandle, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    log::info!("Session stream listening on ws://{}/ws", addr);

    serve(listener, live, shutdown).await
}

/// Serve on an already bound listener.
///
/// Returns only after every open connection has finished, so no request
/// handler still holds a [`LiveHandle`] once this resolves.
pub async fn serve<F>(listener: TcpListener, live: LiveHandle, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router(live))
        .with_graceful_shutdown(shutdown)
        .await?;

    log::info!("Session stream stopped");
    Ok(())
}

async fn health() -> &'static str {
    "acss stream OK"
}

async fn index() -> Html<&'static str> {
    Html(r#"<!DOCTYPE html>
<html>
<head><title>acss live session</title></head>
<body>
<h1>acss live session</h1>
<ul>
<li><a href="session">Current session (JSON)</a></li>
<li><a href="health">Health Check</a></li>
</ul>
<pre id="session"></pre>
<script>
const ws = new WebSocket(`ws://${location.host}/ws`);
ws.onmessage = (msg) => {
  document.getElementById('session').textContent = JSON.stringify(JSON.parse(msg.data), null, 2);
};
</script>
</body>
</html>"#)
}

async fn session(State(state): State<Arc<AppState>>) -> Json<SessionDocument> {
    Json(state.live.snapshot())
}

async fn enqueue_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<ContextEvent>,
) -> impl IntoResponse {
    let kind = event.kind();
    match state.live.send(event).await {
        Ok(()) => {
            log::debug!("Queued {} event from HTTP producer", kind);
            (StatusCode::ACCEPTED, format!("Queued {} event", kind))
        }
        Err(e) => {
            log::error!("Failed to queue {} event: {}", kind, e);
            (StatusCode::SERVICE_UNAVAILABLE, format!("Error: {}", e))
        }
    }
}

async fn stream(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let updates = state.live.subscribe();
    ws.on_upgrade(move |socket| push_updates(socket, updates))
}

/// Send the full document on connect and again after every change.
async fn push_updates(mut socket: WebSocket, mut updates: watch::Receiver<SessionDocument>) {
    log::info!("Stream client connected");
    loop {
        let payload = serde_json::to_string(&*updates.borrow_and_update());
        match payload {
            Ok(text) => {
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            Err(e) => log::error!("Failed to serialize session for broadcast: {}", e),
        }

        if updates.changed().await.is_err() {
            break;
        }
    }
    log::info!("Stream client disconnected");
}
