//! Remote sync subscriber.
//!
//! Holds the canvas and presence subscriptions for one mounted view and turns
//! their notifications into [`SyncEvent`]s. Every snapshot is complete, so the
//! consumer replaces its state rather than patching it.

use crate::pixel::Pixel;
use crate::remote::{online_count, RemoteStore, StoreError, StoreResult, Subscription, UserPresence};

/// Which subscription an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncSource {
    Canvas,
    Users,
}

/// Events produced by the subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// The full canvas collection.
    CanvasSnapshot(Vec<Pixel>),
    /// The full presence collection with its derived online count.
    UsersSnapshot {
        users: Vec<UserPresence>,
        online: usize,
    },
    /// A subscription reported an error. The last snapshot stays in place.
    Error { source: SyncSource, error: StoreError },
}

/// Subscriptions for one mounted canvas view.
#[derive(Debug, Default)]
pub struct SyncSubscriber {
    canvas: Option<Subscription<Vec<Pixel>>>,
    users: Option<Subscription<Vec<UserPresence>>>,
}

impl SyncSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open both subscriptions. Remounting replaces the previous ones.
    pub fn mount(&mut self, store: &dyn RemoteStore) -> StoreResult<()> {
        self.unmount();
        let canvas = store.subscribe_canvas()?;
        let users = store.subscribe_users()?;
        self.canvas = Some(canvas);
        self.users = Some(users);
        log::info!("Sync subscriber mounted");
        Ok(())
    }

    /// Cancel both subscriptions.
    pub fn unmount(&mut self) {
        if self.canvas.take().is_some() | self.users.take().is_some() {
            log::info!("Sync subscriber unmounted");
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.canvas.is_some() || self.users.is_some()
    }

    /// Drain pending notifications.
    ///
    /// Only the newest canvas and users snapshots are reported since each one
    /// supersedes everything before it. A closed subscription is dropped.
    pub fn poll(&mut self) -> Vec<SyncEvent> {
        let mut events = Vec::new();

        if let Some(sub) = &self.canvas {
            let (latest, closed) = collect(sub.drain(), SyncSource::Canvas, &mut events);
            if let Some(pixels) = latest {
                events.push(SyncEvent::CanvasSnapshot(pixels));
            }
            if closed {
                self.canvas = None;
            }
        }

        if let Some(sub) = &self.users {
            let (latest, closed) = collect(sub.drain(), SyncSource::Users, &mut events);
            if let Some(users) = latest {
                let online = online_count(&users);
                events.push(SyncEvent::UsersSnapshot { users, online });
            }
            if closed {
                self.users = None;
            }
        }

        events
    }
}

/// Keep the newest snapshot and log every error.
fn collect<T>(
    items: Vec<StoreResult<T>>,
    source: SyncSource,
    events: &mut Vec<SyncEvent>,
) -> (Option<T>, bool) {
    let mut latest = None;
    let mut closed = false;
    for item in items {
        match item {
            Ok(snapshot) => latest = Some(snapshot),
            Err(error) => {
                log::warn!("{:?} subscription error: {}", source, error);
                closed |= error == StoreError::Closed;
                events.push(SyncEvent::Error { source, error });
            }
        }
    }
    (latest, closed)
}
