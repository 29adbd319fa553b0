//! ASynC Place Core Library
//!
//! Platform-agnostic sync engine for the ASynC Place collaborative pixel canvas.

pub mod autopan;
pub mod buffer;
pub mod camera;
pub mod config;
pub mod controller;
pub mod input;
pub mod notice;
pub mod palette;
pub mod paste;
pub mod pixel;
pub mod protocol;
pub mod remote;
pub mod session;
pub mod store;
pub mod sync;

pub use autopan::AutoPan;
pub use buffer::{FlushBatch, FlushOutcome, FlushTimer, PixelWrites, WriteBuffer};
pub use camera::{CellBounds, Viewport};
pub use config::{CanvasConfig, ConfigError};
pub use controller::{Effect, InteractionController, InteractionError, Tool};
pub use input::{InputState, Modifiers, MouseButton, PointerEvent};
pub use notice::{Advisory, AdvisoryKind, Notices};
pub use paste::{PasteError, PasteState};
pub use pixel::{BrushSize, CellKey, Pixel};
pub use remote::{MemoryStore, RemoteStore, StoreError, StoreResult, Subscription, UserPresence};
#[cfg(not(target_arch = "wasm32"))]
pub use remote::{ConnectionState, WsRemoteStore};
pub use session::{CanvasSession, CommandResult, SessionError, StoreCommand};
pub use store::{merge, visible_pixels, MergedPixels, PixelStore};
pub use sync::{SyncEvent, SyncSubscriber};
