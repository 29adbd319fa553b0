//! WebSocket client for the realtime store server.
//!
//! A background thread owns the socket. Requests carry an id and resolve a
//! oneshot when the server acknowledges them; snapshots fan out to every live
//! subscription.

use super::{BoxFuture, RemoteStore, StoreError, StoreResult, Subscription, UserPresence};
use crate::buffer::PixelWrites;
use crate::pixel::{CellKey, Pixel};
use crate::protocol::{ClientMessage, Collection, ServerMessage};
use futures::channel::oneshot;
use std::collections::HashMap;
use std::sync::mpsc::{channel, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::{connect, Message};
use url::Url;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Commands sent to the WebSocket thread.
enum WsCommand {
    Send(ClientMessage),
    Close,
}

/// Reply payload for a pending request.
type Reply = StoreResult<Option<Vec<Pixel>>>;

struct Shared {
    state: ConnectionState,
    next_id: u64,
    pending: HashMap<u64, oneshot::Sender<Reply>>,
    canvas_subs: HashMap<u64, Sender<StoreResult<Vec<Pixel>>>>,
    user_subs: HashMap<u64, Sender<StoreResult<Vec<UserPresence>>>>,
}

impl Shared {
    fn new(state: ConnectionState) -> Self {
        Self {
            state,
            next_id: 0,
            pending: HashMap::new(),
            canvas_subs: HashMap::new(),
            user_subs: HashMap::new(),
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn dispatch(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::Canvas { pixels } => {
                self.canvas_subs
                    .retain(|_, tx| tx.send(Ok(pixels.clone())).is_ok());
            }
            ServerMessage::Users { users } => {
                self.user_subs
                    .retain(|_, tx| tx.send(Ok(users.clone())).is_ok());
            }
            ServerMessage::Ack { request_id } => {
                if let Some(tx) = self.pending.remove(&request_id) {
                    let _ = tx.send(Ok(None));
                }
            }
            ServerMessage::ReadResult { request_id, pixels } => {
                if let Some(tx) = self.pending.remove(&request_id) {
                    let _ = tx.send(Ok(Some(pixels)));
                }
            }
            ServerMessage::Error { request_id: Some(id), message } => {
                if let Some(tx) = self.pending.remove(&id) {
                    let _ = tx.send(Err(StoreError::Rejected(message)));
                }
            }
            ServerMessage::Error { request_id: None, message } => {
                log::warn!("Store server error: {}", message);
                let err = StoreError::Other(message);
                for tx in self.canvas_subs.values() {
                    let _ = tx.send(Err(err.clone()));
                }
                for tx in self.user_subs.values() {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }
    }

    /// Fail every outstanding request and subscription.
    fn close(&mut self, state: ConnectionState) {
        self.state = state;
        for (_, tx) in self.pending.drain() {
            let _ = tx.send(Err(StoreError::Closed));
        }
        for tx in self.canvas_subs.values() {
            let _ = tx.send(Err(StoreError::Closed));
        }
        for tx in self.user_subs.values() {
            let _ = tx.send(Err(StoreError::Closed));
        }
    }
}

/// [`RemoteStore`] backed by a WebSocket connection to the store server.
pub struct WsRemoteStore {
    shared: Arc<Mutex<Shared>>,
    cmd_tx: Mutex<Sender<WsCommand>>,
    _thread: Option<JoinHandle<()>>,
}

impl WsRemoteStore {
    /// Connect to a store server, e.g. `ws://localhost:3030/ws`.
    ///
    /// The handshake runs on the background thread; requests issued before
    /// it completes are queued.
    pub fn connect(url: &str) -> StoreResult<Self> {
        let parsed_url = Url::parse(url).map_err(|e| StoreError::Unavailable(format!("Invalid URL: {}", e)))?;
        if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
            return Err(StoreError::Unavailable(format!(
                "Invalid WebSocket URL scheme: {}",
                parsed_url.scheme()
            )));
        }

        let shared = Arc::new(Mutex::new(Shared::new(ConnectionState::Connecting)));
        let (cmd_tx, cmd_rx) = channel::<WsCommand>();
        let thread_shared = shared.clone();
        let url = url.to_string();

        let handle = thread::spawn(move || run_socket(&url, &thread_shared, &cmd_rx));

        Ok(Self {
            shared,
            cmd_tx: Mutex::new(cmd_tx),
            _thread: Some(handle),
        })
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared
            .lock()
            .map(|s| s.state)
            .unwrap_or(ConnectionState::Error)
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    fn send(&self, msg: ClientMessage) -> StoreResult<()> {
        let tx = self
            .cmd_tx
            .lock()
            .map_err(|e| StoreError::Other(format!("Lock error: {}", e)))?;
        tx.send(WsCommand::Send(msg)).map_err(|_| StoreError::Closed)
    }

    /// Register a pending request and send the message built from its id.
    fn request(&self, build: impl FnOnce(u64) -> ClientMessage) -> StoreResult<oneshot::Receiver<Reply>> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut shared = self
                .shared
                .lock()
                .map_err(|e| StoreError::Other(format!("Lock error: {}", e)))?;
            if matches!(shared.state, ConnectionState::Disconnected | ConnectionState::Error) {
                return Err(StoreError::Closed);
            }
            let id = shared.next_id();
            shared.pending.insert(id, tx);
            id
        };
        self.send(build(id))?;
        Ok(rx)
    }

    fn ack(&self, build: impl FnOnce(u64) -> ClientMessage) -> BoxFuture<'_, StoreResult<()>> {
        let rx = self.request(build);
        Box::pin(async move {
            rx?.await.map_err(|_| StoreError::Closed)??;
            Ok(())
        })
    }

    /// Register a subscriber and ask the server for a fresh snapshot.
    ///
    /// Every subscriber sends `Subscribe`, so each one starts from a full
    /// collection even when others are already live. The send happens under
    /// the shared lock to stay ordered with a concurrent last-cancel
    /// `Unsubscribe`.
    fn subscribe<T>(
        &self,
        collection: Collection,
        subs: fn(&mut Shared) -> &mut HashMap<u64, Sender<StoreResult<T>>>,
    ) -> StoreResult<Subscription<T>> {
        let (tx, rx) = channel();
        let id = {
            let mut shared = self
                .shared
                .lock()
                .map_err(|e| StoreError::Other(format!("Lock error: {}", e)))?;
            let id = shared.next_id();
            subs(&mut *shared).insert(id, tx);
            if let Err(e) = self.send(ClientMessage::Subscribe { collection }) {
                subs(&mut *shared).remove(&id);
                return Err(e);
            }
            id
        };
        Ok(Subscription::new(rx, self.cancel_handle(id, collection)))
    }

    fn cancel_handle(&self, id: u64, collection: Collection) -> impl FnOnce() + Send + use<> {
        let weak: Weak<Mutex<Shared>> = Arc::downgrade(&self.shared);
        let cmd_tx = self.cmd_tx.lock().ok().map(|tx| tx.clone());
        move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let Ok(mut shared) = shared.lock() else {
                return;
            };
            let empty = match collection {
                Collection::Canvas => {
                    shared.canvas_subs.remove(&id);
                    shared.canvas_subs.is_empty()
                }
                Collection::Users => {
                    shared.user_subs.remove(&id);
                    shared.user_subs.is_empty()
                }
            };
            if empty {
                if let Some(tx) = cmd_tx {
                    let _ = tx.send(WsCommand::Send(ClientMessage::Unsubscribe { collection }));
                }
            }
        }
    }
}

impl RemoteStore for WsRemoteStore {
    fn subscribe_canvas(&self) -> StoreResult<Subscription<Vec<Pixel>>> {
        self.subscribe(Collection::Canvas, |shared| &mut shared.canvas_subs)
    }

    fn subscribe_users(&self) -> StoreResult<Subscription<Vec<UserPresence>>> {
        self.subscribe(Collection::Users, |shared| &mut shared.user_subs)
    }

    fn read_canvas(&self) -> BoxFuture<'_, StoreResult<Vec<Pixel>>> {
        let rx = self.request(|request_id| ClientMessage::Read { request_id });
        Box::pin(async move {
            let reply = rx?.await.map_err(|_| StoreError::Closed)??;
            Ok(reply.unwrap_or_default())
        })
    }

    fn commit(&self, writes: PixelWrites) -> BoxFuture<'_, StoreResult<()>> {
        self.ack(move |request_id| ClientMessage::Commit { request_id, writes })
    }

    fn set_presence(&self, username: &str, online: bool) -> BoxFuture<'_, StoreResult<()>> {
        let username = username.to_string();
        self.ack(move |request_id| ClientMessage::Presence {
            request_id,
            username,
            online,
        })
    }

    fn set_cursor(&self, username: &str, cursor: CellKey) -> BoxFuture<'_, StoreResult<()>> {
        let username = username.to_string();
        self.ack(move |request_id| ClientMessage::Cursor {
            request_id,
            username,
            cursor,
        })
    }
}

impl Drop for WsRemoteStore {
    fn drop(&mut self) {
        if let Ok(tx) = self.cmd_tx.lock() {
            let _ = tx.send(WsCommand::Close);
        }
    }
}

fn set_state(shared: &Mutex<Shared>, state: ConnectionState) {
    if let Ok(mut shared) = shared.lock() {
        shared.state = state;
    }
}

fn close_shared(shared: &Mutex<Shared>, state: ConnectionState) {
    if let Ok(mut shared) = shared.lock() {
        shared.close(state);
    }
}

/// Socket thread body.
fn run_socket(url: &str, shared: &Mutex<Shared>, cmd_rx: &Receiver<WsCommand>) {
    log::info!("Store socket: connecting to {}", url);

    let (mut socket, response) = match connect(url) {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("Store connection failed: {}", e);
            close_shared(shared, ConnectionState::Error);
            return;
        }
    };
    log::info!("Store socket connected, status: {}", response.status());
    set_state(shared, ConnectionState::Connected);

    // Short read timeout so the loop can interleave outgoing commands.
    if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
        let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
        let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
    }

    let mut final_state = ConnectionState::Disconnected;
    'outer: loop {
        loop {
            match cmd_rx.try_recv() {
                Ok(WsCommand::Send(msg)) => {
                    let text = match serde_json::to_string(&msg) {
                        Ok(text) => text,
                        Err(e) => {
                            log::error!("Failed to encode store message: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = socket.send(Message::Text(text)) {
                        log::error!("Store socket send error: {}", e);
                        final_state = ConnectionState::Error;
                        break 'outer;
                    }
                }
                Ok(WsCommand::Close) | Err(TryRecvError::Disconnected) => {
                    let _ = socket.close(None);
                    break 'outer;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(txt)) => match serde_json::from_str::<ServerMessage>(&txt) {
                Ok(msg) => {
                    if let Ok(mut shared) = shared.lock() {
                        shared.dispatch(msg);
                    }
                }
                Err(e) => log::warn!("Failed to parse store message: {}", e),
            },
            Ok(Message::Ping(data)) => {
                let _ = socket.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) => {
                log::info!("Store socket received close frame");
                break;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(ref e))
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                log::error!("Store socket read error: {}", e);
                final_state = ConnectionState::Error;
                break;
            }
        }
    }

    log::info!("Store socket thread exiting");
    close_shared(shared, final_state);
}
