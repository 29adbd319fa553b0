//! Remote document store abstraction.
//!
//! The store owns two collections: `canvas/{x}_{y}` pixel records and
//! `users/{username}` presence records. Subscriptions always deliver the full
//! collection, and pixel writes are applied atomically as one multi-key update.

mod memory;

#[cfg(not(target_arch = "wasm32"))]
mod ws;

pub use memory::MemoryStore;

#[cfg(not(target_arch = "wasm32"))]
pub use ws::{ConnectionState, WsRemoteStore};

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::mpsc::{Receiver, TryRecvError};
use thiserror::Error;

use crate::buffer::PixelWrites;
use crate::pixel::{CellKey, Pixel};

/// Root path of the presence collection.
pub const USERS_PATH: &str = "users";

/// Remote store errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Write rejected: {0}")]
    Rejected(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Connection closed")]
    Closed,
    #[error("Store error: {0}")]
    Other(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Boxed future for async operations (compatible with WASM).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + 'a>>;

/// Presence/profile record under `users/{username}`.
///
/// The canvas only reads `online` and `cursor`; the rest is carried through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserPresence {
    pub username: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<CellKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pfpurl: Option<String>,
    #[serde(default, rename = "timeOnPage")]
    pub time_on_page: u64,
    #[serde(default)]
    pub achievements: Vec<String>,
}

impl UserPresence {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            ..Self::default()
        }
    }

    pub fn path(&self) -> String {
        format!("{USERS_PATH}/{}", self.username)
    }
}

/// Number of users currently marked online.
pub fn online_count(users: &[UserPresence]) -> usize {
    users.iter().filter(|u| u.online).count()
}

/// A live subscription to a collection.
///
/// Each delivered item is a complete snapshot. Dropping the subscription
/// cancels it.
pub struct Subscription<T> {
    rx: Receiver<StoreResult<T>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl<T> Subscription<T> {
    pub fn new(rx: Receiver<StoreResult<T>>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Take every notification delivered since the last call, in order.
    ///
    /// A disconnected source yields a final [`StoreError::Closed`].
    pub fn drain(&self) -> Vec<StoreResult<T>> {
        let mut items = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !matches!(items.last(), Some(Err(StoreError::Closed))) {
                        items.push(Err(StoreError::Closed));
                    }
                    break;
                }
            }
        }
        items
    }

    /// Cancel explicitly. Equivalent to dropping.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Trait for remote store backends.
///
/// Implementations talk to the realtime store service or keep everything in
/// memory for tests.
///
/// Note: On native platforms, implementations must be Send + Sync.
/// On WASM, these bounds are relaxed since it's single-threaded.
#[cfg(not(target_arch = "wasm32"))]
pub trait RemoteStore: Send + Sync {
    /// Subscribe to full snapshots of `canvas/`.
    fn subscribe_canvas(&self) -> StoreResult<Subscription<Vec<Pixel>>>;

    /// Subscribe to full snapshots of `users/`.
    fn subscribe_users(&self) -> StoreResult<Subscription<Vec<UserPresence>>>;

    /// Read the whole canvas once.
    fn read_canvas(&self) -> BoxFuture<'_, StoreResult<Vec<Pixel>>>;

    /// Apply every write and delete atomically.
    fn commit(&self, writes: PixelWrites) -> BoxFuture<'_, StoreResult<()>>;

    /// Set `users/{username}/online`. Going online also registers the
    /// disconnect hook that marks the user offline when the connection drops.
    fn set_presence(&self, username: &str, online: bool) -> BoxFuture<'_, StoreResult<()>>;

    /// Set `users/{username}/cursor`.
    fn set_cursor(&self, username: &str, cursor: CellKey) -> BoxFuture<'_, StoreResult<()>>;
}

/// Trait for remote store backends (WASM version without Send + Sync).
#[cfg(target_arch = "wasm32")]
pub trait RemoteStore {
    /// Subscribe to full snapshots of `canvas/`.
    fn subscribe_canvas(&self) -> StoreResult<Subscription<Vec<Pixel>>>;

    /// Subscribe to full snapshots of `users/`.
    fn subscribe_users(&self) -> StoreResult<Subscription<Vec<UserPresence>>>;

    /// Read the whole canvas once.
    fn read_canvas(&self) -> BoxFuture<'_, StoreResult<Vec<Pixel>>>;

    /// Apply every write and delete atomically.
    fn commit(&self, writes: PixelWrites) -> BoxFuture<'_, StoreResult<()>>;

    /// Set `users/{username}/online`.
    fn set_presence(&self, username: &str, online: bool) -> BoxFuture<'_, StoreResult<()>>;

    /// Set `users/{username}/cursor`.
    fn set_cursor(&self, username: &str, cursor: CellKey) -> BoxFuture<'_, StoreResult<()>>;
}

/// Simple blocking executor for tests.
#[cfg(test)]
pub(crate) fn block_on<F: std::future::Future>(f: F) -> F::Output {
    use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

    fn dummy_raw_waker() -> RawWaker {
        fn no_op(_: *const ()) {}
        fn clone(_: *const ()) -> RawWaker {
            dummy_raw_waker()
        }
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }

    let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
    let mut cx = Context::from_waker(&waker);
    let mut f = std::pin::pin!(f);

    loop {
        match f.as_mut().poll(&mut cx) {
            Poll::Ready(result) => return result,
            Poll::Pending => {}
        }
    }
}
