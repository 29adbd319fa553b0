//! Shared store state: the canvas and users collections.

use asyncplace_core::buffer::PixelWrites;
use asyncplace_core::palette::PALETTE_SIZE;
use asyncplace_core::pixel::{CellKey, Pixel};
use asyncplace_core::protocol::{ClientMessage, Collection, ServerMessage};
use asyncplace_core::remote::UserPresence;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 64;

/// Serialized full-collection snapshot shared by every subscriber.
pub type Snapshot = Arc<str>;

/// Shared application state
pub struct AppState {
    /// `canvas/{x}_{y}`. One lock so commits apply atomically.
    canvas: RwLock<HashMap<CellKey, Pixel>>,
    /// `users/{username}`
    users: DashMap<String, UserPresence>,
    /// Held across a users change and its broadcast so snapshots go out in order.
    users_publish: Mutex<()>,
    /// Usernames whose disconnect hook belongs to a connection.
    hooks: DashMap<String, HashSet<String>>,
    canvas_tx: broadcast::Sender<Snapshot>,
    users_tx: broadcast::Sender<Snapshot>,
    /// Canvas changed since the last persisted snapshot.
    dirty: AtomicBool,
}

impl AppState {
    pub fn new() -> Self {
        Self::with_canvas(Vec::new())
    }

    /// State preloaded with a canvas snapshot.
    pub fn with_canvas(pixels: Vec<Pixel>) -> Self {
        let (canvas_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (users_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            canvas: RwLock::new(pixels.into_iter().map(|p| (p.key(), p)).collect()),
            users: DashMap::new(),
            users_publish: Mutex::new(()),
            hooks: DashMap::new(),
            canvas_tx,
            users_tx,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn subscribe(&self, collection: Collection) -> broadcast::Receiver<Snapshot> {
        match collection {
            Collection::Canvas => self.canvas_tx.subscribe(),
            Collection::Users => self.users_tx.subscribe(),
        }
    }

    /// Every pixel, ordered by key.
    pub fn canvas_snapshot(&self) -> Vec<Pixel> {
        match self.canvas.read() {
            Ok(canvas) => sorted_pixels(&canvas),
            Err(poisoned) => sorted_pixels(&poisoned.into_inner()),
        }
    }

    /// Every presence record, ordered by username.
    pub fn users_snapshot(&self) -> Vec<UserPresence> {
        let mut users: Vec<UserPresence> = self.users.iter().map(|u| u.value().clone()).collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    /// Serialized snapshot message for a collection.
    pub fn snapshot_message(&self, collection: Collection) -> Snapshot {
        let msg = match collection {
            Collection::Canvas => ServerMessage::Canvas {
                pixels: self.canvas_snapshot(),
            },
            Collection::Users => ServerMessage::Users {
                users: self.users_snapshot(),
            },
        };
        encode(&msg)
    }

    /// Broadcast the users collection. Callers hold `users_publish`.
    fn broadcast_users(&self) {
        if self.users_tx.receiver_count() > 0 {
            let _ = self.users_tx.send(self.snapshot_message(Collection::Users));
        }
    }

    fn lock_users(&self) -> std::sync::MutexGuard<'_, ()> {
        self.users_publish
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply every write and delete in one step.
    pub fn commit(&self, writes: PixelWrites) -> Result<usize, String> {
        for (key, intent) in &writes {
            if let Some(pixel) = intent {
                if pixel.key() != *key {
                    return Err(format!("Pixel at {} stored under key {}", pixel.key(), key));
                }
                if usize::from(pixel.color) >= PALETTE_SIZE {
                    return Err(format!("Color {} out of palette at {}", pixel.color, key));
                }
            }
        }

        let count = writes.len();
        let mut canvas = self
            .canvas
            .write()
            .map_err(|_| "Canvas lock poisoned".to_string())?;
        for (key, intent) in writes {
            match intent {
                Some(pixel) => {
                    canvas.insert(key, pixel);
                }
                None => {
                    canvas.remove(&key);
                }
            }
        }
        self.dirty.store(true, Ordering::Release);

        // Sent under the write lock so snapshots reach subscribers in commit order.
        if self.canvas_tx.receiver_count() > 0 {
            let snapshot = encode(&ServerMessage::Canvas {
                pixels: sorted_pixels(&canvas),
            });
            let _ = self.canvas_tx.send(snapshot);
        }
        Ok(count)
    }

    /// Set presence. Going online registers the disconnect hook for `conn_id`.
    pub fn set_presence(&self, conn_id: &str, username: &str, online: bool) {
        let _publish = self.lock_users();
        self.users
            .entry(username.to_string())
            .or_insert_with(|| UserPresence::new(username))
            .online = online;

        let mut hooks = self.hooks.entry(conn_id.to_string()).or_default();
        if online {
            hooks.insert(username.to_string());
        } else {
            hooks.remove(username);
        }
        drop(hooks);

        info!("User {} is now {}", username, if online { "online" } else { "offline" });
        self.broadcast_users();
    }

    pub fn set_cursor(&self, username: &str, cursor: CellKey) {
        let _publish = self.lock_users();
        self.users
            .entry(username.to_string())
            .or_insert_with(|| UserPresence::new(username))
            .cursor = Some(cursor);
        self.broadcast_users();
    }

    /// Run the disconnect hooks for a closed connection.
    pub fn disconnect(&self, conn_id: &str) {
        let Some((_, usernames)) = self.hooks.remove(conn_id) else {
            return;
        };
        if usernames.is_empty() {
            return;
        }
        let _publish = self.lock_users();
        for username in &usernames {
            if let Some(mut user) = self.users.get_mut(username) {
                user.online = false;
            }
            info!("User {} went offline (connection {} closed)", username, conn_id);
        }
        self.broadcast_users();
    }

    /// Take the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Answer a request message. Subscriptions are handled by the socket.
    pub fn handle_request(&self, conn_id: &str, msg: ClientMessage) -> Option<ServerMessage> {
        match msg {
            ClientMessage::Subscribe { .. } | ClientMessage::Unsubscribe { .. } => None,
            ClientMessage::Read { request_id } => Some(ServerMessage::ReadResult {
                request_id,
                pixels: self.canvas_snapshot(),
            }),
            ClientMessage::Commit { request_id, writes } => match self.commit(writes) {
                Ok(count) => {
                    debug!("Connection {} committed {} keys", conn_id, count);
                    Some(ServerMessage::Ack { request_id })
                }
                Err(message) => {
                    warn!("Rejected commit from {}: {}", conn_id, message);
                    Some(ServerMessage::Error {
                        request_id: Some(request_id),
                        message,
                    })
                }
            },
            ClientMessage::Presence {
                request_id,
                username,
                online,
            } => {
                self.set_presence(conn_id, &username, online);
                Some(ServerMessage::Ack { request_id })
            }
            ClientMessage::Cursor {
                request_id,
                username,
                cursor,
            } => {
                self.set_cursor(&username, cursor);
                Some(ServerMessage::Ack { request_id })
            }
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

fn sorted_pixels(canvas: &HashMap<CellKey, Pixel>) -> Vec<Pixel> {
    let mut pixels: Vec<Pixel> = canvas.values().cloned().collect();
    pixels.sort_by_key(Pixel::key);
    pixels
}

/// Serialize a server message.
pub fn encode(msg: &ServerMessage) -> Snapshot {
    match serde_json::to_string(msg) {
        Ok(json) => json.into(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            let fallback = ServerMessage::Error {
                request_id: None,
                message: "Internal encoding error".to_string(),
            };
            serde_json::to_string(&fallback)
                .unwrap_or_default()
                .into()
        }
    }
}
