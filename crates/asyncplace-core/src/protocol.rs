//! Wire protocol between clients and the realtime store server.
//!
//! Messages are JSON objects tagged by `type`:
//! ```json
//! { "type": "subscribe", "collection": "canvas" }
//! { "type": "commit", "request_id": 7, "writes": { "3_4": { "x": 3, "y": 4, "color": 2, "placedBy": "alice", "timestamp": 0 }, "5_5": null } }
//! { "type": "presence", "request_id": 8, "username": "alice", "online": true }
//! ```

use serde::{Deserialize, Serialize};

use crate::buffer::PixelWrites;
use crate::pixel::{CellKey, Pixel};
use crate::remote::UserPresence;

/// Collections a client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Canvas,
    Users,
}

/// Messages sent to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving full snapshots of a collection.
    Subscribe { collection: Collection },
    /// Stop receiving snapshots of a collection.
    Unsubscribe { collection: Collection },
    /// One-shot read of the canvas.
    Read { request_id: u64 },
    /// Atomic multi-key write; `null` deletes the key.
    Commit { request_id: u64, writes: PixelWrites },
    /// Set presence; going online arms the disconnect hook for this connection.
    Presence {
        request_id: u64,
        username: String,
        online: bool,
    },
    /// Set the user's hovered cell.
    Cursor {
        request_id: u64,
        username: String,
        cursor: CellKey,
    },
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full canvas collection.
    Canvas { pixels: Vec<Pixel> },
    /// Full users collection.
    Users { users: Vec<UserPresence> },
    /// Request applied.
    Ack { request_id: u64 },
    /// Reply to [`ClientMessage::Read`].
    ReadResult { request_id: u64, pixels: Vec<Pixel> },
    /// Error, tied to a request when one caused it.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<u64>,
        message: String,
    },
}
