//! One client's canvas session.
//!
//! `CanvasSession` owns every piece of client state and is driven by the host
//! through three entry points: pointer events, `tick(now)`, and the results of
//! store commands. Store I/O never happens inside the session. It queues
//! [`StoreCommand`]s; the host runs them against a [`RemoteStore`] and reports
//! back with [`CanvasSession::handle_result`], so input is never blocked on the
//! network.

use image::RgbaImage;
use kurbo::{Point, Size};
use thiserror::Error;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

use crate::autopan::AutoPan;
use crate::buffer::{FlushBatch, FlushOutcome, FlushTimer, PixelWrites, WriteBuffer};
use crate::camera::{CellBounds, Viewport};
use crate::config::CanvasConfig;
use crate::controller::{normalize_username, Effect, InteractionController, InteractionError, Tool};
use crate::input::PointerEvent;
use crate::notice::Notices;
use crate::paste::{PasteError, PasteState};
use crate::pixel::{now_millis, BrushSize, CellKey, Pixel};
use crate::remote::{RemoteStore, StoreResult, UserPresence};
use crate::store::{visible_pixels, MergedPixels, PixelStore};
use crate::sync::{SyncEvent, SyncSubscriber};

/// Errors from session operations that combine several checks.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Interaction(#[from] InteractionError),
    #[error(transparent)]
    Paste(#[from] PasteError),
    #[error("A paste is still being saved")]
    PasteInFlight,
}

/// A store operation queued by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCommand {
    /// Commit one write-buffer generation.
    Flush(FlushBatch),
    /// Bulk paste, committed in one shot outside the write buffer.
    BulkWrite { id: u64, writes: PixelWrites },
    SetPresence { username: String, online: bool },
    SetCursor { username: String, cell: CellKey },
}

/// Outcome of a [`StoreCommand`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommandResult {
    Flushed { id: u64, result: StoreResult<()> },
    BulkWritten { id: u64, cells: usize, result: StoreResult<()> },
    PresenceSet { online: bool, result: StoreResult<()> },
    CursorSet { result: StoreResult<()> },
}

impl StoreCommand {
    /// Run the command against a store.
    pub async fn execute(self, store: &dyn RemoteStore) -> CommandResult {
        match self {
            StoreCommand::Flush(batch) => CommandResult::Flushed {
                id: batch.id,
                result: store.commit(batch.writes).await,
            },
            StoreCommand::BulkWrite { id, writes } => {
                let cells = writes.len();
                CommandResult::BulkWritten {
                    id,
                    cells,
                    result: store.commit(writes).await,
                }
            }
            StoreCommand::SetPresence { username, online } => CommandResult::PresenceSet {
                online,
                result: store.set_presence(&username, online).await,
            },
            StoreCommand::SetCursor { username, cell } => CommandResult::CursorSet {
                result: store.set_cursor(&username, cell).await,
            },
        }
    }
}

/// Client-side canvas engine.
#[derive(Debug)]
pub struct CanvasSession {
    config: CanvasConfig,
    viewport: Viewport,
    screen: Size,
    pixels: PixelStore,
    buffer: WriteBuffer,
    flush_timer: FlushTimer,
    controller: InteractionController,
    paste: PasteState,
    autopan: AutoPan,
    notices: Notices,
    sync: SyncSubscriber,
    users: Vec<UserPresence>,
    online: usize,
    username: Option<String>,
    last_cursor: Option<CellKey>,
    commands: Vec<StoreCommand>,
    next_bulk_id: u64,
    /// Bulk write awaiting its result.
    paste_in_flight: Option<u64>,
    dirty: bool,
    torn_down: bool,
}

impl CanvasSession {
    pub fn new(config: CanvasConfig) -> Self {
        Self::with_seed(config, now_millis())
    }

    /// Session with a fixed auto-pan seed.
    pub fn with_seed(config: CanvasConfig, seed: u64) -> Self {
        Self {
            viewport: Viewport::from_config(&config),
            screen: Size::new(800.0, 600.0),
            pixels: PixelStore::new(),
            buffer: WriteBuffer::new(),
            flush_timer: FlushTimer::new(config.flush_interval),
            controller: InteractionController::new(config.menu_close_distance),
            paste: PasteState::new(),
            autopan: AutoPan::new(seed),
            notices: Notices::new(config.notice_duration),
            sync: SyncSubscriber::new(),
            users: Vec::new(),
            online: 0,
            username: None,
            last_cursor: None,
            commands: Vec::new(),
            next_bulk_id: 0,
            paste_in_flight: None,
            dirty: true,
            torn_down: false,
            config,
        }
    }

    // --- Lifecycle ---

    /// Subscribe to the store and start idling.
    pub fn mount(&mut self, store: &dyn RemoteStore, now: Instant) -> StoreResult<()> {
        if let Err(e) = self.sync.mount(store) {
            log::warn!("Failed to subscribe to canvas: {}", e);
            self.notices.error(format!("Could not connect to the canvas: {}", e), now);
            return Err(e);
        }
        self.torn_down = false;
        if self.username.is_none() {
            self.autopan.start(now);
        }
        self.dirty = true;
        Ok(())
    }

    /// Stop timers and cancel subscriptions.
    ///
    /// Staged writes are queued for one last flush; any result arriving
    /// afterwards is discarded.
    pub fn teardown(&mut self) {
        self.flush_timer.stop();
        self.request_flush();
        self.autopan.stop();
        self.sync.unmount();
        self.controller.reset();
        self.notices.clear();
        self.paste_in_flight = None;
        self.torn_down = true;
        log::info!("Canvas session torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Register a name and go online.
    pub fn sign_in(&mut self, name: &str, now: Instant) -> Result<(), InteractionError> {
        let username = match normalize_username(name) {
            Ok(username) => username,
            Err(e) => {
                self.notices.warn(e.to_string(), now);
                return Err(e);
            }
        };
        if self.username.as_deref() == Some(username.as_str()) {
            return Ok(());
        }
        if self.username.is_some() {
            self.sign_out(now);
        }
        log::info!("Signed in as {}", username);
        self.autopan.stop();
        self.commands.push(StoreCommand::SetPresence {
            username: username.clone(),
            online: true,
        });
        self.notices.info(format!("Signed in as {}", username), now);
        self.username = Some(username);
        self.last_cursor = None;
        self.dirty = true;
        Ok(())
    }

    /// Flush anything staged, go offline and resume idling.
    pub fn sign_out(&mut self, now: Instant) {
        let Some(username) = self.username.take() else {
            return;
        };
        self.flush_timer.stop();
        self.request_flush();
        self.controller.reset();
        self.commands.push(StoreCommand::SetPresence {
            username: username.clone(),
            online: false,
        });
        log::info!("Signed out {}", username);
        self.last_cursor = None;
        self.autopan.start(now);
        self.dirty = true;
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.username.is_some()
    }

    // --- Settings ---

    pub fn set_tool(&mut self, tool: Tool) {
        let tool = match tool {
            Tool::Paint(index) => Tool::paint(index),
            other => other,
        };
        if self.controller.tool != tool {
            self.controller.tool = tool;
            self.dirty = true;
        }
    }

    pub fn tool(&self) -> Tool {
        self.controller.tool
    }

    pub fn set_brush(&mut self, size: BrushSize) {
        if self.controller.brush != size {
            self.controller.brush = size;
            self.dirty = true;
        }
    }

    /// Pick a size from the open brush menu.
    pub fn select_brush(&mut self, size: BrushSize) {
        self.controller.select_brush(size);
        self.dirty = true;
    }

    pub fn brush(&self) -> BrushSize {
        self.controller.brush
    }

    /// Toggle the wider zoom-out bound. A view preference only.
    pub fn set_admin_mode(&mut self, enabled: bool) {
        self.config.admin_mode = enabled;
        self.viewport
            .set_scale_bounds(self.config.min_scale(), self.config.max_scale);
        self.dirty = true;
    }

    pub fn set_show_grid(&mut self, show: bool) {
        if self.config.show_grid != show {
            self.config.show_grid = show;
            self.dirty = true;
        }
    }

    pub fn set_screen_size(&mut self, screen: Size) {
        if self.screen != screen {
            self.screen = screen;
            self.dirty = true;
        }
    }

    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    pub fn screen_size(&self) -> Size {
        self.screen
    }

    // --- Input ---

    /// Feed one pointer event.
    pub fn handle_pointer(&mut self, event: &PointerEvent, now: Instant) {
        if self.torn_down {
            return;
        }
        let signed_in = self.is_signed_in();
        let effects = self.controller.handle(event, &self.viewport, signed_in, now);
        for effect in effects {
            self.apply(effect, now);
        }
    }

    fn apply(&mut self, effect: Effect, now: Instant) {
        match effect {
            Effect::Stroke { cell } => self.stroke(cell, now),
            Effect::EndStroke => {
                self.flush_timer.stop();
                self.request_flush();
            }
            Effect::Pan(delta) => {
                self.viewport.pan(delta);
                self.dirty = true;
            }
            Effect::Zoom { anchor, delta } => {
                self.viewport.zoom_wheel(anchor, delta, self.config.zoom_factor);
                self.dirty = true;
            }
            Effect::Hover(cell) => {
                self.dirty = true;
                if let (Some(cell), Some(username)) = (cell, &self.username) {
                    if self.last_cursor != Some(cell) {
                        self.last_cursor = Some(cell);
                        self.commands.push(StoreCommand::SetCursor {
                            username: username.clone(),
                            cell,
                        });
                    }
                }
            }
            Effect::OpenBrushMenu { .. } | Effect::CloseBrushMenu => self.dirty = true,
            Effect::SetPasteTarget(cell) => {
                self.paste.set_target(cell);
                self.dirty = true;
            }
            Effect::CommitPaste => {
                // Failures are already raised as notices.
                if let Err(e) = self.commit_paste(now) {
                    log::debug!("Paste commit skipped: {}", e);
                }
                self.dirty = true;
            }
            Effect::Rejected(e) => {
                log::warn!("Interaction rejected: {}", e);
                self.notices.warn(e.to_string(), now);
                self.dirty = true;
            }
        }
    }

    /// Stage the brush neighborhood around `cell` with the current tool.
    fn stroke(&mut self, cell: CellKey, now: Instant) {
        let Some(username) = self.username.as_deref() else {
            return;
        };
        let timestamp = now_millis();
        let tool = self.controller.tool;
        for key in self.controller.brush.neighborhood(cell) {
            let intent = match tool {
                Tool::Paint(color) => Some(Pixel::new(key, color, username, timestamp)),
                Tool::Eraser => None,
                Tool::Paste => return,
            };
            self.buffer.stage(key, intent);
        }
        self.flush_timer.start(now);
        self.dirty = true;
    }

    /// Queue a flush of everything staged.
    ///
    /// Only one flush is in flight at a time; a request made meanwhile is
    /// picked up when that flush completes.
    pub fn request_flush(&mut self) {
        if let Some(batch) = self.buffer.begin_flush() {
            log::debug!("Flushing {} pixel writes (batch {})", batch.len(), batch.id);
            self.commands.push(StoreCommand::Flush(batch));
        }
    }

    // --- Paste ---

    pub fn load_paste_image(&mut self, image: RgbaImage, now: Instant) -> Result<(), PasteError> {
        let result = self.paste.load(image);
        self.after_paste_load(result, now)
    }

    pub fn load_paste_bytes(&mut self, data: &[u8], now: Instant) -> Result<(), PasteError> {
        let result = self.paste.load_bytes(data);
        self.after_paste_load(result, now)
    }

    fn after_paste_load(&mut self, result: Result<(), PasteError>, now: Instant) -> Result<(), PasteError> {
        match &result {
            Ok(()) => {
                self.set_tool(Tool::Paste);
                self.dirty = true;
            }
            Err(e) => {
                log::warn!("Paste image rejected: {}", e);
                self.notices.warn(e.to_string(), now);
            }
        }
        result
    }

    /// Commit the staged image as one bulk write.
    pub fn commit_paste(&mut self, now: Instant) -> Result<(), SessionError> {
        let Some(username) = self.username.clone() else {
            let e = InteractionError::NotSignedIn;
            self.notices.warn(e.to_string(), now);
            return Err(e.into());
        };
        if self.paste_in_flight.is_some() {
            let e = SessionError::PasteInFlight;
            self.notices.info(e.to_string(), now);
            return Err(e);
        }
        match self.paste.commit_writes(&username, now_millis()) {
            Ok(writes) => {
                self.next_bulk_id += 1;
                self.paste_in_flight = Some(self.next_bulk_id);
                log::info!("Pasting {} pixels", writes.len());
                self.commands.push(StoreCommand::BulkWrite {
                    id: self.next_bulk_id,
                    writes,
                });
                Ok(())
            }
            Err(e) => {
                log::warn!("Paste rejected: {}", e);
                self.notices.warn(e.to_string(), now);
                Err(e.into())
            }
        }
    }

    pub fn paste_preview(&self) -> &[Pixel] {
        self.paste.preview()
    }

    // --- Timers and sync ---

    /// Advance timers and drain subscription notifications.
    pub fn tick(&mut self, now: Instant) {
        if self.torn_down {
            return;
        }

        self.sync_remote();

        let delta = self.autopan.update(now);
        if delta.hypot2() > 0.0 {
            self.viewport.pan(delta);
            self.dirty = true;
        }

        if self.flush_timer.poll(now) {
            log::debug!("Flush timer fired");
            self.request_flush();
        }
        if self.buffer.wants_flush() {
            self.request_flush();
        }

        if self.notices.expire(now) {
            self.dirty = true;
        }
    }

    /// Apply every pending subscription notification.
    fn sync_remote(&mut self) {
        for event in self.sync.poll() {
            self.handle_sync_event(event);
        }
    }

    /// Apply one subscription event.
    pub fn handle_sync_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::CanvasSnapshot(pixels) => {
                log::debug!("Canvas snapshot: {} pixels", pixels.len());
                self.pixels.apply_snapshot(pixels);
                self.dirty = true;
            }
            SyncEvent::UsersSnapshot { users, online } => {
                self.users = users;
                if self.online != online {
                    self.online = online;
                    self.dirty = true;
                }
            }
            // Already logged by the subscriber; the last snapshot stays.
            SyncEvent::Error { .. } => {}
        }
    }

    /// Take queued store commands.
    pub fn take_commands(&mut self) -> Vec<StoreCommand> {
        std::mem::take(&mut self.commands)
    }

    pub fn has_commands(&self) -> bool {
        !self.commands.is_empty()
    }

    /// Report the outcome of a command taken from [`Self::take_commands`].
    pub fn handle_result(&mut self, result: CommandResult, now: Instant) {
        if self.torn_down {
            log::debug!("Discarding store result after teardown: {:?}", result);
            return;
        }
        match result {
            CommandResult::Flushed { id, result } => {
                // The store's snapshot precedes its ack; take it before the
                // overlay drops the batch so committed cells never blink out.
                if result.is_ok() {
                    self.sync_remote();
                }
                let outcome = self.buffer.complete_flush(id, result.is_ok());
                match (outcome, result) {
                    (FlushOutcome::Committed { keys }, _) => {
                        log::debug!("Flush {} committed {} keys", id, keys);
                    }
                    (FlushOutcome::Restored { keys }, Err(e)) => {
                        log::warn!("Flush {} failed, keeping {} keys: {}", id, keys, e);
                        self.notices.error(format!("Could not save pixels: {}", e), now);
                    }
                    (outcome, _) => log::debug!("Flush {} completion ignored: {:?}", id, outcome),
                }
                if self.buffer.wants_flush() {
                    self.request_flush();
                }
                self.dirty = true;
            }
            CommandResult::BulkWritten { id, cells, result } => {
                if self.paste_in_flight == Some(id) {
                    self.paste_in_flight = None;
                }
                self.paste_result(id, cells, result, now);
            }
            CommandResult::PresenceSet { online, result } => {
                if let Err(e) = result {
                    log::warn!("Failed to set presence online={}: {}", online, e);
                    self.notices.warn(format!("Could not update presence: {}", e), now);
                }
            }
            CommandResult::CursorSet { result } => {
                if let Err(e) = result {
                    log::debug!("Cursor write failed: {}", e);
                }
            }
        }
    }

    fn paste_result(&mut self, id: u64, cells: usize, result: StoreResult<()>, now: Instant) {
        match result {
            Ok(()) => {
                log::info!("Paste {} committed {} pixels", id, cells);
                self.sync_remote();
                self.notices.info(format!("Pasted {} pixels", cells), now);
                self.paste.clear();
                self.dirty = true;
            }
            Err(e) => {
                log::warn!("Paste {} failed: {}", id, e);
                self.notices.error(format!("Could not paste image: {}", e), now);
            }
        }
    }

    // --- Views ---

    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    pub fn pixel_store(&self) -> &PixelStore {
        &self.pixels
    }

    pub fn write_buffer(&self) -> &WriteBuffer {
        &self.buffer
    }

    /// Unconfirmed local writes as pixels.
    pub fn overlay(&self) -> Vec<Pixel> {
        self.buffer.overlay()
    }

    /// Remote snapshot with the overlay on top.
    pub fn merged(&self) -> MergedPixels {
        let overlay = self.buffer.overlay();
        self.pixels.merged(&overlay)
    }

    /// Cells on screen.
    pub fn visible_bounds(&self) -> CellBounds {
        self.viewport.visible_cells(self.screen)
    }

    /// Drawable pixels inside the current view.
    pub fn visible_pixels(&self) -> Vec<Pixel> {
        let merged = self.merged();
        visible_pixels(&merged, self.visible_bounds())
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn hovered(&self) -> Option<CellKey> {
        self.controller.hovered()
    }

    pub fn brush_menu_origin(&self) -> Option<Point> {
        self.controller.menu().map(|m| m.origin)
    }

    pub fn is_painting(&self) -> bool {
        self.controller.is_painting()
    }

    pub fn is_auto_panning(&self) -> bool {
        self.autopan.is_running()
    }

    pub fn online_count(&self) -> usize {
        self.online
    }

    pub fn users(&self) -> &[UserPresence] {
        &self.users
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Whether anything visible changed since the last call.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Center the view on another user's last cursor.
    pub fn jump_to_user(&mut self, username: &str, now: Instant) -> bool {
        let name = username.trim().to_lowercase();
        let cursor = self
            .users
            .iter()
            .find(|u| u.username == name)
            .and_then(|u| u.cursor);
        match cursor {
            Some(cell) => {
                let world = self.viewport.cell_center_world(cell);
                self.viewport.center_on(world, self.screen);
                self.dirty = true;
                true
            }
            None => {
                self.notices.info(format!("No cursor found for {}", name), now);
                self.dirty = true;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{Modifiers, MouseButton};
    use crate::notice::AdvisoryKind;
    use crate::remote::{block_on, MemoryStore, StoreError};
    use image::Rgba;
    use kurbo::Vec2;
    use std::time::Duration;

    /// Run queued commands to completion and report the results.
    fn pump(session: &mut CanvasSession, store: &MemoryStore, now: Instant) {
        while session.has_commands() {
            for command in session.take_commands() {
                let result = block_on(command.execute(store));
                session.handle_result(result, now);
            }
        }
        session.tick(now);
    }

    /// Screen point at the center of a cell with the default viewport.
    fn at(x: i32, y: i32) -> Point {
        Point::new(x as f64 * 10.0 + 5.0, y as f64 * 10.0 + 5.0)
    }

    fn click(session: &mut CanvasSession, p: Point, now: Instant) {
        session.handle_pointer(
            &PointerEvent::Down {
                position: p,
                button: MouseButton::Left,
                modifiers: Modifiers::NONE,
            },
            now,
        );
        session.handle_pointer(
            &PointerEvent::Up {
                position: p,
                button: MouseButton::Left,
            },
            now,
        );
    }

    fn mounted(store: &MemoryStore, now: Instant) -> CanvasSession {
        let mut session = CanvasSession::with_seed(CanvasConfig::default(), 1);
        session.mount(store, now).unwrap();
        session.tick(now);
        session
    }

    #[test]
    fn test_alice_paints_and_flushes_on_pointer_up() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);

        session.sign_in("Alice", now).unwrap();
        session.set_tool(Tool::Paint(3));
        click(&mut session, at(0, 0), now);
        pump(&mut session, &store, now);

        let pixel = store.pixel(CellKey::new(0, 0)).unwrap();
        assert_eq!((pixel.x, pixel.y, pixel.color), (0, 0, 3));
        assert_eq!(pixel.placed_by, "alice");
        assert!(pixel.timestamp > 0);
        assert!(session.overlay().is_empty());
        assert!(session.write_buffer().is_idle());
        // The own write comes back through the subscription.
        assert_eq!(session.pixel_store().get_remote(CellKey::new(0, 0)), Some(&pixel));
    }

    #[test]
    fn test_erase_removes_remote_key() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let key = CellKey::new(2, 2);
        block_on(store.commit(PixelWrites::from([(key, Some(Pixel::new(key, 5, "bob", 1)))]))).unwrap();

        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();
        session.set_tool(Tool::Eraser);

        session.handle_pointer(
            &PointerEvent::Down {
                position: at(2, 2),
                button: MouseButton::Left,
                modifiers: Modifiers::NONE,
            },
            now,
        );
        // Hidden locally before the flush.
        assert!(session.visible_pixels().iter().all(|p| p.key() != key));

        session.handle_pointer(
            &PointerEvent::Up {
                position: at(2, 2),
                button: MouseButton::Left,
            },
            now,
        );
        pump(&mut session, &store, now);

        assert!(store.pixel(key).is_none());
        assert_eq!(store.commit_log().last().unwrap()[&key], None);
    }

    #[test]
    fn test_overlay_visible_before_flush() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();
        session.set_brush(BrushSize::Three);
        session.set_tool(Tool::Paint(9));

        session.handle_pointer(
            &PointerEvent::Down {
                position: at(10, 10),
                button: MouseButton::Left,
                modifiers: Modifiers::NONE,
            },
            now,
        );
        let overlay = session.overlay();
        assert_eq!(overlay.len(), 9);
        assert!(overlay.iter().all(|p| (9..=11).contains(&p.x) && (9..=11).contains(&p.y)));
        assert_eq!(store.pixel_count(), 0);
    }

    #[test]
    fn test_flush_timer_fires_during_long_stroke() {
        let store = MemoryStore::new();
        let start = Instant::now();
        let mut session = mounted(&store, start);
        session.sign_in("alice", start).unwrap();
        pump(&mut session, &store, start);

        session.handle_pointer(
            &PointerEvent::Down {
                position: at(0, 0),
                button: MouseButton::Left,
                modifiers: Modifiers::NONE,
            },
            start,
        );
        session.handle_pointer(&PointerEvent::Move { position: at(1, 0) }, start + Duration::from_secs(4));
        session.tick(start + Duration::from_secs(9));
        assert!(!session.take_commands().iter().any(|c| matches!(c, StoreCommand::Flush(_))));

        session.tick(start + Duration::from_secs(10));
        let commands = session.take_commands();
        let Some(StoreCommand::Flush(batch)) = commands.first() else {
            panic!("expected a flush, got {:?}", commands);
        };
        assert_eq!(batch.len(), 2);
        assert!(session.is_painting());
    }

    #[test]
    fn test_failed_flush_keeps_overlay_and_retries() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();
        pump(&mut session, &store, now);

        store.fail_next_writes(1);
        click(&mut session, at(4, 4), now);
        let overlay_before = session.overlay();
        pump(&mut session, &store, now);

        assert_eq!(session.overlay(), overlay_before);
        assert_eq!(store.pixel_count(), 0);
        assert!(session.notices().active().any(|n| n.kind == AdvisoryKind::Error));

        // The next action flushes the preserved writes along with its own.
        click(&mut session, at(5, 4), now);
        pump(&mut session, &store, now);
        assert_eq!(store.pixel_count(), 2);
        assert!(session.overlay().is_empty());
    }

    #[test]
    fn test_signed_out_paint_is_rejected() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);

        click(&mut session, at(0, 0), now);
        assert!(session.write_buffer().is_idle());
        assert!(session.take_commands().is_empty());
        assert!(session.notices().active().any(|n| n.kind == AdvisoryKind::Warning));
    }

    #[test]
    fn test_cursor_written_once_per_cell() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();
        session.take_commands();

        session.handle_pointer(&PointerEvent::Move { position: Point::new(1.0, 1.0) }, now);
        session.handle_pointer(&PointerEvent::Move { position: Point::new(8.0, 8.0) }, now);
        session.handle_pointer(&PointerEvent::Move { position: Point::new(12.0, 8.0) }, now);

        let cursors: Vec<_> = session
            .take_commands()
            .into_iter()
            .filter_map(|c| match c {
                StoreCommand::SetCursor { cell, .. } => Some(cell),
                _ => None,
            })
            .collect();
        assert_eq!(cursors, vec![CellKey::new(0, 0), CellKey::new(1, 0)]);
    }

    #[test]
    fn test_autopan_only_while_signed_out() {
        let store = MemoryStore::new();
        let start = Instant::now();
        let mut session = mounted(&store, start);
        assert!(session.is_auto_panning());

        let mut t = start;
        for _ in 0..40 {
            t += Duration::from_millis(100);
            session.tick(t);
        }
        assert_ne!(session.viewport().offset, Vec2::ZERO);
        assert!(session.write_buffer().is_idle());
        assert!(session.take_commands().is_empty());

        session.sign_in("alice", t).unwrap();
        assert!(!session.is_auto_panning());
        let offset = session.viewport().offset;
        session.tick(t + Duration::from_secs(1));
        assert_eq!(session.viewport().offset, offset);

        session.sign_out(t + Duration::from_secs(1));
        assert!(session.is_auto_panning());
    }

    #[test]
    fn test_sign_in_sets_presence_and_online_count() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        assert!(session.sign_in("  ", now).is_err());

        session.sign_in("Alice", now).unwrap();
        pump(&mut session, &store, now);
        assert!(store.user("alice").unwrap().online);
        assert_eq!(session.online_count(), 1);

        store.disconnect("alice");
        session.tick(now);
        assert_eq!(session.online_count(), 0);
    }

    #[test]
    fn test_paste_bulk_write() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();

        let mut image = RgbaImage::new(20, 20);
        for px in image.pixels_mut() {
            *px = Rgba([255, 0, 0, 255]);
        }
        session.load_paste_image(image, now).unwrap();
        assert_eq!(session.tool(), Tool::Paste);

        assert_eq!(
            session.commit_paste(now),
            Err(SessionError::Paste(PasteError::NoTarget))
        );

        click(&mut session, at(-5, -5), now);
        assert_eq!(session.paste_preview().len(), 400);
        session.handle_pointer(
            &PointerEvent::Down {
                position: at(-5, -5),
                button: MouseButton::Left,
                modifiers: Modifiers::NONE,
            },
            now + Duration::from_millis(100),
        );
        pump(&mut session, &store, now);

        assert_eq!(store.pixel_count(), 400);
        assert_eq!(store.commit_log().len(), 1);
        assert!(store.pixel(CellKey::new(14, 14)).is_some());
        assert!(session.paste_preview().is_empty());
        assert!(session.write_buffer().is_idle());
    }

    fn red_square(edge: u32) -> RgbaImage {
        let mut image = RgbaImage::new(edge, edge);
        for px in image.pixels_mut() {
            *px = Rgba([255, 0, 0, 255]);
        }
        image
    }

    #[test]
    fn test_second_paste_waits_for_first() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();
        pump(&mut session, &store, now);

        session.load_paste_image(red_square(4), now).unwrap();
        click(&mut session, at(0, 0), now);
        session.commit_paste(now).unwrap();
        assert_eq!(session.commit_paste(now), Err(SessionError::PasteInFlight));

        let commands = session.take_commands();
        assert_eq!(
            commands
                .iter()
                .filter(|c| matches!(c, StoreCommand::BulkWrite { .. }))
                .count(),
            1
        );

        // A failed paste frees the slot and keeps the image for a retry.
        store.fail_next_writes(1);
        for command in commands {
            let result = block_on(command.execute(&store));
            session.handle_result(result, now);
        }
        assert_eq!(session.paste_preview().len(), 16);
        session.commit_paste(now).unwrap();
        pump(&mut session, &store, now);
        assert_eq!(store.pixel_count(), 16);
    }

    #[test]
    fn test_double_click_without_image_warns() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();
        pump(&mut session, &store, now);
        session.set_tool(Tool::Paste);

        click(&mut session, at(1, 1), now);
        click(&mut session, at(1, 1), now + Duration::from_millis(100));

        assert!(!session.has_commands());
        assert!(
            session
                .notices()
                .active()
                .any(|n| n.kind == AdvisoryKind::Warning && n.message == PasteError::NoImage.to_string())
        );
    }

    #[test]
    fn test_acked_flush_shows_snapshot_without_tick() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();
        session.set_tool(Tool::Paint(3));
        click(&mut session, at(0, 0), now);

        for command in session.take_commands() {
            let result = block_on(command.execute(&store));
            session.handle_result(result, now);
            // Between ack and the next tick the cell must stay drawn.
            let visible = session.visible_pixels();
            assert!(visible.iter().any(|p| p.key() == CellKey::new(0, 0) && p.color == 3));
        }
        assert!(session.overlay().is_empty());
    }

    #[test]
    fn test_wheel_zoom_and_admin_bounds() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();

        for _ in 0..100 {
            session.handle_pointer(
                &PointerEvent::Scroll {
                    position: Point::new(400.0, 300.0),
                    delta: Vec2::new(0.0, 1.0),
                },
                now,
            );
        }
        assert!((session.viewport().scale - session.config().base_min_scale).abs() < 1e-9);

        session.set_admin_mode(true);
        for _ in 0..100 {
            session.handle_pointer(
                &PointerEvent::Scroll {
                    position: Point::new(400.0, 300.0),
                    delta: Vec2::new(0.0, 1.0),
                },
                now,
            );
        }
        assert!((session.viewport().scale - session.config().admin_min_scale).abs() < 1e-9);

        session.set_admin_mode(false);
        assert!((session.viewport().scale - session.config().base_min_scale).abs() < 1e-9);
    }

    #[test]
    fn test_take_redraw_tracks_changes() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = CanvasSession::with_seed(CanvasConfig::default(), 1);
        session.sign_in("alice", now).unwrap();
        session.mount(&store, now).unwrap();
        assert!(session.take_redraw());
        assert!(!session.take_redraw());

        session.set_brush(BrushSize::Five);
        assert!(session.take_redraw());

        session.tick(now);
        assert!(session.take_redraw());
        session.tick(now);
        assert!(!session.take_redraw());
    }

    #[test]
    fn test_jump_to_user() {
        let store = MemoryStore::new();
        let now = Instant::now();
        block_on(store.set_cursor("bob", CellKey::new(100, 50))).unwrap();
        let mut session = mounted(&store, now);
        session.set_screen_size(Size::new(800.0, 600.0));

        assert!(session.jump_to_user("Bob", now));
        let center = session.viewport().screen_to_cell(Point::new(400.0, 300.0));
        assert_eq!(center, CellKey::new(100, 50));

        assert!(!session.jump_to_user("nobody", now));
    }

    #[test]
    fn test_results_after_teardown_are_discarded() {
        let store = MemoryStore::new();
        let now = Instant::now();
        let mut session = mounted(&store, now);
        session.sign_in("alice", now).unwrap();
        pump(&mut session, &store, now);

        session.handle_pointer(
            &PointerEvent::Down {
                position: at(0, 0),
                button: MouseButton::Left,
                modifiers: Modifiers::NONE,
            },
            now,
        );
        session.teardown();
        assert_eq!(store.subscriber_count(), 0);
        assert!(!session.is_auto_panning());

        let commands = session.take_commands();
        assert_eq!(commands.len(), 1);
        for command in commands {
            let result = block_on(command.execute(&store));
            session.handle_result(result, now);
        }
        assert_eq!(store.pixel_count(), 1);
        session.handle_result(
            CommandResult::Flushed {
                id: 99,
                result: Err(StoreError::Closed),
            },
            now,
        );
        assert!(session.notices().is_empty());
    }
}
