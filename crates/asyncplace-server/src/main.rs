//! ASynC Place realtime store server
//!
//! Holds the `canvas/*` and `users/*` collections and serves them over WebSocket.
//!
//! ## Protocol
//!
//! Messages are JSON tagged by `type` (see `asyncplace_core::protocol`):
//! ```json
//! { "type": "subscribe", "collection": "canvas" }
//! { "type": "commit", "request_id": 1, "writes": { "3_4": { "x": 3, "y": 4, "color": 2, "placedBy": "alice", "timestamp": 0 } } }
//! { "type": "presence", "request_id": 2, "username": "alice", "online": true }
//! ```
//! Subscribers receive the full collection on subscribe and after every change.

mod config;
mod persist;
mod state;

use asyncplace_core::protocol::{ClientMessage, Collection, ServerMessage};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use config::ServerConfig;
use state::{encode, AppState, Snapshot};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asyncplace_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();

    let pixels = match &config.snapshot {
        Some(path) => match persist::load_snapshot(path) {
            Ok(pixels) => {
                info!("Loaded {} pixels from {}", pixels.len(), path.display());
                pixels
            }
            Err(e) => {
                error!("Failed to load snapshot {}: {}", path.display(), e);
                return;
            }
        },
        None => Vec::new(),
    };
    let state = Arc::new(AppState::with_canvas(pixels));

    let autosave = config.snapshot.clone().map(|path| {
        tokio::spawn(persist::run_autosave(
            state.clone(),
            path,
            config.snapshot_interval,
        ))
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let listener = match tokio::net::TcpListener::bind(config.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {}: {}", config.addr, e);
            return;
        }
    };
    info!("ASynC Place store server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }

    if let Some(task) = autosave {
        task.abort();
    }
    if let Some(path) = &config.snapshot {
        match persist::save_snapshot(path, &state.canvas_snapshot()) {
            Ok(()) => info!("Saved canvas to {}", path.display()),
            Err(e) => error!("Failed to save canvas on shutdown: {}", e),
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// Index page
async fn index() -> &'static str {
    "ASynC Place Store Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Next snapshot from an optional subscription; pends forever when unsubscribed.
async fn next_snapshot(rx: &mut Option<broadcast::Receiver<Snapshot>>) -> Result<Snapshot, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Newest snapshot already queued for a subscription, if any.
fn take_ready(rx: &mut Option<broadcast::Receiver<Snapshot>>) -> Option<Snapshot> {
    let rx = rx.as_mut()?;
    let mut latest = None;
    loop {
        match rx.try_recv() {
            Ok(json) => latest = Some(json),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return latest,
        }
    }
}

/// Reply to a request, preceded by any snapshot the request produced so
/// clients see the new state before the acknowledgement.
fn reply_after_snapshots(
    reply: ServerMessage,
    canvas_rx: &mut Option<broadcast::Receiver<Snapshot>>,
    users_rx: &mut Option<broadcast::Receiver<Snapshot>>,
) -> Vec<Snapshot> {
    let mut out: Vec<Snapshot> = [take_ready(canvas_rx), take_ready(users_rx)]
        .into_iter()
        .flatten()
        .collect();
    out.push(encode(&reply));
    out
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = Uuid::new_v4().to_string();
    info!("New connection: {}", conn_id);

    let (mut sender, mut receiver) = socket.split();
    let mut canvas_rx: Option<broadcast::Receiver<Snapshot>> = None;
    let mut users_rx: Option<broadcast::Receiver<Snapshot>> = None;

    'conn: loop {
        let outgoing: Vec<Snapshot> = tokio::select! {
            // Requests from the client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { collection }) => {
                                let rx = state.subscribe(collection);
                                match collection {
                                    Collection::Canvas => canvas_rx = Some(rx),
                                    Collection::Users => users_rx = Some(rx),
                                }
                                debug!("{} subscribed to {:?}", conn_id, collection);
                                vec![state.snapshot_message(collection)]
                            }
                            Ok(ClientMessage::Unsubscribe { collection }) => {
                                match collection {
                                    Collection::Canvas => canvas_rx = None,
                                    Collection::Users => users_rx = None,
                                }
                                debug!("{} unsubscribed from {:?}", conn_id, collection);
                                continue;
                            }
                            Ok(request) => match state.handle_request(&conn_id, request) {
                                Some(reply) => reply_after_snapshots(reply, &mut canvas_rx, &mut users_rx),
                                None => continue,
                            },
                            Err(e) => {
                                warn!("Invalid message from {}: {}", conn_id, e);
                                vec![encode(&ServerMessage::Error {
                                    request_id: None,
                                    message: format!("Invalid message: {}", e),
                                })]
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ignore binary/ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", conn_id, e);
                        break;
                    }
                }
            }

            // Canvas snapshots
            snapshot = next_snapshot(&mut canvas_rx) => match snapshot {
                Ok(json) => vec![json],
                Err(RecvError::Lagged(skipped)) => {
                    debug!("{} lagged {} canvas snapshots", conn_id, skipped);
                    vec![state.snapshot_message(Collection::Canvas)]
                }
                Err(RecvError::Closed) => {
                    canvas_rx = None;
                    continue;
                }
            },

            // Users snapshots
            snapshot = next_snapshot(&mut users_rx) => match snapshot {
                Ok(json) => vec![json],
                Err(RecvError::Lagged(skipped)) => {
                    debug!("{} lagged {} users snapshots", conn_id, skipped);
                    vec![state.snapshot_message(Collection::Users)]
                }
                Err(RecvError::Closed) => {
                    users_rx = None;
                    continue;
                }
            },
        };

        for json in outgoing {
            if sender.send(Message::Text(json.to_string().into())).await.is_err() {
                break 'conn;
            }
        }
    }

    // Disconnect hooks
    state.disconnect(&conn_id);
    info!("Connection closed: {}", conn_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncplace_core::buffer::PixelWrites;
    use asyncplace_core::pixel::{CellKey, Pixel};

    #[test]
    fn test_snapshot_sent_before_ack() {
        let state = AppState::new();
        let mut canvas_rx = Some(state.subscribe(Collection::Canvas));
        let mut users_rx = None;

        let key = CellKey::new(0, 0);
        let request = ClientMessage::Commit {
            request_id: 9,
            writes: PixelWrites::from([(key, Some(Pixel::new(key, 3, "alice", 1)))]),
        };
        let reply = state.handle_request("conn", request).unwrap();
        let out = reply_after_snapshots(reply, &mut canvas_rx, &mut users_rx);

        let msgs: Vec<ServerMessage> = out
            .iter()
            .map(|json| serde_json::from_str(json).unwrap())
            .collect();
        assert_eq!(msgs.len(), 2);
        assert!(matches!(&msgs[0], ServerMessage::Canvas { pixels } if pixels.len() == 1));
        assert_eq!(msgs[1], ServerMessage::Ack { request_id: 9 });
        // Nothing left to forward twice.
        assert!(take_ready(&mut canvas_rx).is_none());
    }

    #[test]
    fn test_take_ready_keeps_newest() {
        let state = AppState::new();
        let mut rx = Some(state.subscribe(Collection::Users));
        assert!(take_ready(&mut rx).is_none());
        state.set_presence("c", "alice", true);
        state.set_presence("c", "bob", true);

        let json = take_ready(&mut rx).unwrap();
        match serde_json::from_str::<ServerMessage>(&json).unwrap() {
            ServerMessage::Users { users } => assert_eq!(users.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        assert!(take_ready(&mut None).is_none());
    }
}
