//! Interaction controller: pointer input to strokes, pans, zooms and menus.
//!
//! The controller never touches the store or the viewport directly. It
//! returns [`Effect`]s that the session applies, which keeps the state machine
//! testable without a store.

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(target_arch = "wasm32")]
use web_time::Instant;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

use crate::camera::Viewport;
use crate::input::{InputState, MouseButton, PointerEvent};
use crate::palette::BACKGROUND_INDEX;
use crate::pixel::{BrushSize, CellKey};

/// Interactions rejected before reaching the write buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InteractionError {
    #[error("Sign in to paint on the canvas")]
    NotSignedIn,
    #[error("Invalid username: {0:?}")]
    InvalidUsername(String),
}

/// Active tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tool {
    /// Paint with a palette index.
    Paint(u8),
    Eraser,
    /// Stamp a loaded image.
    Paste,
}

impl Default for Tool {
    fn default() -> Self {
        Tool::Paint(0)
    }
}

impl Tool {
    /// Paint tool for an index. The background index erases.
    pub fn paint(index: u8) -> Self {
        if index >= BACKGROUND_INDEX {
            Tool::Eraser
        } else {
            Tool::Paint(index)
        }
    }

    /// Whether left-drag paints or erases with this tool.
    pub fn strokes(&self) -> bool {
        matches!(self, Tool::Paint(_) | Tool::Eraser)
    }
}

/// Pointer interaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Idle,
    /// Left button held with a stroking tool.
    Painting { last_cell: CellKey },
    /// Dragging the view with `button`.
    Panning { button: MouseButton },
}

/// Something the session should do in response to input.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Apply the brush around `cell` with the current tool.
    Stroke { cell: CellKey },
    /// The painting session ended.
    EndStroke,
    /// Pan by a screen-space delta.
    Pan(Vec2),
    /// Zoom anchored at a screen point.
    Zoom { anchor: Point, delta: f64 },
    /// The hovered cell changed.
    Hover(Option<CellKey>),
    OpenBrushMenu { at: Point },
    CloseBrushMenu,
    SetPasteTarget(CellKey),
    CommitPaste,
    Rejected(InteractionError),
}

/// Open brush-size menu.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrushMenu {
    pub origin: Point,
}

/// Per-client pointer state machine.
#[derive(Debug, Clone)]
pub struct InteractionController {
    pub tool: Tool,
    pub brush: BrushSize,
    mode: Mode,
    input: InputState,
    hovered: Option<CellKey>,
    menu: Option<BrushMenu>,
    menu_close_distance: f64,
}

impl InteractionController {
    pub fn new(menu_close_distance: f64) -> Self {
        Self {
            tool: Tool::default(),
            brush: BrushSize::One,
            mode: Mode::Idle,
            input: InputState::new(),
            hovered: None,
            menu: None,
            menu_close_distance,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn hovered(&self) -> Option<CellKey> {
        self.hovered
    }

    pub fn menu(&self) -> Option<BrushMenu> {
        self.menu
    }

    pub fn is_painting(&self) -> bool {
        matches!(self.mode, Mode::Painting { .. })
    }

    /// Pick a brush size from the menu and close it.
    pub fn select_brush(&mut self, size: BrushSize) -> Vec<Effect> {
        self.brush = size;
        self.close_menu().into_iter().collect()
    }

    fn close_menu(&mut self) -> Option<Effect> {
        self.menu.take().map(|_| Effect::CloseBrushMenu)
    }

    /// Drop any in-progress gesture, e.g. on teardown.
    pub fn reset(&mut self) {
        self.mode = Mode::Idle;
        self.menu = None;
        self.hovered = None;
        self.input = InputState::new();
    }

    /// Translate one pointer event.
    pub fn handle(
        &mut self,
        event: &PointerEvent,
        viewport: &Viewport,
        signed_in: bool,
        now: Instant,
    ) -> Vec<Effect> {
        self.input.handle_pointer_event(event, now);
        let mut effects = Vec::new();

        match *event {
            PointerEvent::Down {
                position,
                button,
                modifiers,
            } => {
                let cell = viewport.screen_to_cell(position);
                match button {
                    MouseButton::Right => {
                        self.menu = Some(BrushMenu { origin: position });
                        effects.push(Effect::OpenBrushMenu { at: position });
                    }
                    MouseButton::Middle => self.start_pan(button, &mut effects),
                    MouseButton::Left if modifiers.pans() => self.start_pan(button, &mut effects),
                    MouseButton::Left => {
                        if let Some(close) = self.close_menu() {
                            // A click outside the menu only dismisses it.
                            effects.push(close);
                            return effects;
                        }
                        self.left_down(cell, signed_in, &mut effects);
                    }
                }
            }
            PointerEvent::Up { button, .. } => match self.mode {
                Mode::Painting { .. } if button == MouseButton::Left => {
                    self.mode = Mode::Idle;
                    effects.push(Effect::EndStroke);
                }
                Mode::Panning { button: held } if held == button => {
                    self.mode = Mode::Idle;
                }
                _ => {}
            },
            PointerEvent::Move { position } => {
                let cell = viewport.screen_to_cell(position);
                if self.hovered != Some(cell) {
                    self.hovered = Some(cell);
                    effects.push(Effect::Hover(Some(cell)));
                }
                if let Some(menu) = self.menu {
                    if (position - menu.origin).hypot() > self.menu_close_distance {
                        effects.extend(self.close_menu());
                    }
                }
                match self.mode {
                    Mode::Painting { last_cell } if last_cell != cell => {
                        self.mode = Mode::Painting { last_cell: cell };
                        effects.push(Effect::Stroke { cell });
                    }
                    Mode::Panning { .. } => {
                        let delta = self.input.pointer_delta();
                        if delta != Vec2::ZERO {
                            effects.push(Effect::Pan(delta));
                        }
                    }
                    _ => {}
                }
            }
            PointerEvent::Scroll { position, delta } => {
                if delta.y != 0.0 {
                    effects.push(Effect::Zoom {
                        anchor: position,
                        delta: delta.y,
                    });
                }
            }
            PointerEvent::Leave => {
                if self.hovered.take().is_some() {
                    effects.push(Effect::Hover(None));
                }
                if self.is_painting() {
                    effects.push(Effect::EndStroke);
                }
                self.mode = Mode::Idle;
            }
        }

        effects
    }

    /// Enter panning. A stroke in progress ends first so its writes flush.
    fn start_pan(&mut self, button: MouseButton, effects: &mut Vec<Effect>) {
        effects.extend(self.close_menu());
        if self.is_painting() {
            effects.push(Effect::EndStroke);
        }
        self.mode = Mode::Panning { button };
    }

    fn left_down(&mut self, cell: CellKey, signed_in: bool, effects: &mut Vec<Effect>) {
        match self.tool {
            Tool::Paint(_) | Tool::Eraser => {
                if !signed_in {
                    effects.push(Effect::Rejected(InteractionError::NotSignedIn));
                    return;
                }
                self.mode = Mode::Painting { last_cell: cell };
                effects.push(Effect::Stroke { cell });
            }
            Tool::Paste => {
                if self.input.is_double_click() {
                    if signed_in {
                        effects.push(Effect::CommitPaste);
                    } else {
                        effects.push(Effect::Rejected(InteractionError::NotSignedIn));
                    }
                } else {
                    effects.push(Effect::SetPasteTarget(cell));
                }
            }
        }
    }
}

/// Trim and lowercase a sign-in name.
pub fn normalize_username(name: &str) -> Result<String, InteractionError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed.contains(['/', '.', '#', '$', '[', ']']) {
        return Err(InteractionError::InvalidUsername(name.to_string()));
    }
    Ok(trimmed.to_lowercase())
}
