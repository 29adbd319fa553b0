//! In-memory remote store implementation.

use super::{BoxFuture, RemoteStore, StoreError, StoreResult, Subscription, UserPresence};
use crate::buffer::PixelWrites;
use crate::pixel::{CellKey, Pixel};
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

#[derive(Default)]
struct Inner {
    canvas: HashMap<CellKey, Pixel>,
    users: BTreeMap<String, UserPresence>,
    canvas_subs: HashMap<u64, Sender<StoreResult<Vec<Pixel>>>>,
    user_subs: HashMap<u64, Sender<StoreResult<Vec<UserPresence>>>>,
    next_sub_id: u64,
    /// Users whose disconnect hook is armed.
    disconnect_hooks: Vec<String>,
    /// Number of upcoming writes to reject.
    failing_writes: usize,
    /// Every applied commit, in order.
    commit_log: Vec<PixelWrites>,
}

impl Inner {
    fn canvas_snapshot(&self) -> Vec<Pixel> {
        let mut pixels: Vec<Pixel> = self.canvas.values().cloned().collect();
        pixels.sort_by_key(Pixel::key);
        pixels
    }

    fn users_snapshot(&self) -> Vec<UserPresence> {
        self.users.values().cloned().collect()
    }

    fn notify_canvas(&mut self) {
        let snapshot = self.canvas_snapshot();
        self.canvas_subs
            .retain(|_, tx| tx.send(Ok(snapshot.clone())).is_ok());
    }

    fn notify_users(&mut self) {
        let snapshot = self.users_snapshot();
        self.user_subs
            .retain(|_, tx| tx.send(Ok(snapshot.clone())).is_ok());
    }

    fn take_write_failure(&mut self) -> StoreResult<()> {
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StoreError::Unavailable("simulated write failure".to_string()));
        }
        Ok(())
    }

    fn user_mut(&mut self, username: &str) -> &mut UserPresence {
        self.users
            .entry(username.to_string())
            .or_insert_with(|| UserPresence::new(username))
    }
}

/// In-memory store for testing and offline use.
///
/// Cloning shares the same underlying data, which lets tests play several
/// clients against one store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|e| StoreError::Other(format!("Lock error: {}", e)))
    }

    /// Reject the next `count` writes with [`StoreError::Unavailable`].
    pub fn fail_next_writes(&self, count: usize) {
        if let Ok(mut inner) = self.lock() {
            inner.failing_writes = count;
        }
    }

    /// Current record at a key.
    pub fn pixel(&self, key: CellKey) -> Option<Pixel> {
        self.lock().ok()?.canvas.get(&key).cloned()
    }

    pub fn pixel_count(&self) -> usize {
        self.lock().map(|inner| inner.canvas.len()).unwrap_or(0)
    }

    /// Current presence record.
    pub fn user(&self, username: &str) -> Option<UserPresence> {
        self.lock().ok()?.users.get(username).cloned()
    }

    /// Every commit applied so far.
    pub fn commit_log(&self) -> Vec<PixelWrites> {
        self.lock().map(|inner| inner.commit_log.clone()).unwrap_or_default()
    }

    /// Number of live subscriptions across both collections.
    pub fn subscriber_count(&self) -> usize {
        self.lock()
            .map(|inner| inner.canvas_subs.len() + inner.user_subs.len())
            .unwrap_or(0)
    }

    /// Simulate a client connection dropping: fire the disconnect hook for
    /// `username` if one is armed.
    pub fn disconnect(&self, username: &str) {
        let Ok(mut inner) = self.lock() else {
            return;
        };
        let before = inner.disconnect_hooks.len();
        inner.disconnect_hooks.retain(|u| u != username);
        if inner.disconnect_hooks.len() != before {
            inner.user_mut(username).online = false;
            inner.notify_users();
        }
    }

    /// Push a subscription error to every canvas subscriber.
    pub fn emit_canvas_error(&self, error: StoreError) {
        if let Ok(inner) = self.lock() {
            for tx in inner.canvas_subs.values() {
                let _ = tx.send(Err(error.clone()));
            }
        }
    }

    fn cancel_handle(&self, id: u64, canvas: bool) -> impl FnOnce() + Send + use<> {
        let weak: Weak<Mutex<Inner>> = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut inner) = inner.lock() {
                    if canvas {
                        inner.canvas_subs.remove(&id);
                    } else {
                        inner.user_subs.remove(&id);
                    }
                }
            }
        }
    }
}

impl RemoteStore for MemoryStore {
    fn subscribe_canvas(&self) -> StoreResult<Subscription<Vec<Pixel>>> {
        let (tx, rx) = channel();
        let id = {
            let mut inner = self.lock()?;
            inner.next_sub_id += 1;
            let id = inner.next_sub_id;
            let _ = tx.send(Ok(inner.canvas_snapshot()));
            inner.canvas_subs.insert(id, tx);
            id
        };
        Ok(Subscription::new(rx, self.cancel_handle(id, true)))
    }

    fn subscribe_users(&self) -> StoreResult<Subscription<Vec<UserPresence>>> {
        let (tx, rx) = channel();
        let id = {
            let mut inner = self.lock()?;
            inner.next_sub_id += 1;
            let id = inner.next_sub_id;
            let _ = tx.send(Ok(inner.users_snapshot()));
            inner.user_subs.insert(id, tx);
            id
        };
        Ok(Subscription::new(rx, self.cancel_handle(id, false)))
    }

    fn read_canvas(&self) -> BoxFuture<'_, StoreResult<Vec<Pixel>>> {
        Box::pin(async move { Ok(self.lock()?.canvas_snapshot()) })
    }

    fn commit(&self, writes: PixelWrites) -> BoxFuture<'_, StoreResult<()>> {
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.take_write_failure()?;
            for (key, intent) in &writes {
                match intent {
                    Some(pixel) => {
                        inner.canvas.insert(*key, pixel.clone());
                    }
                    None => {
                        inner.canvas.remove(key);
                    }
                }
            }
            inner.commit_log.push(writes);
            inner.notify_canvas();
            Ok(())
        })
    }

    fn set_presence(&self, username: &str, online: bool) -> BoxFuture<'_, StoreResult<()>> {
        let username = username.to_string();
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.take_write_failure()?;
            inner.user_mut(&username).online = online;
            if online {
                if !inner.disconnect_hooks.contains(&username) {
                    inner.disconnect_hooks.push(username);
                }
            } else {
                inner.disconnect_hooks.retain(|u| u != &username);
            }
            inner.notify_users();
            Ok(())
        })
    }

    fn set_cursor(&self, username: &str, cursor: CellKey) -> BoxFuture<'_, StoreResult<()>> {
        let username = username.to_string();
        Box::pin(async move {
            let mut inner = self.lock()?;
            inner.take_write_failure()?;
            inner.user_mut(&username).cursor = Some(cursor);
            inner.notify_users();
            Ok(())
        })
    }
}
