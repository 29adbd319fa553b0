//! Input state management for pointer and keyboard events.

use kurbo::{Point, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// Use web_time for WASM compatibility
#[cfg(target_arch = "wasm32")]
use web_time::Instant;
#[cfg(not(target_arch = "wasm32"))]
use std::time::Instant;

/// Mouse button identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// Modifier keys state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        ctrl: false,
        alt: false,
        meta: false,
    };

    pub const CTRL: Modifiers = Modifiers {
        shift: false,
        ctrl: true,
        alt: false,
        meta: false,
    };

    /// Ctrl or Meta turns a left drag into a pan.
    pub fn pans(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// Pointer event type for unified mouse/touch handling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Down {
        position: Point,
        button: MouseButton,
        modifiers: Modifiers,
    },
    Up {
        position: Point,
        button: MouseButton,
    },
    Move {
        position: Point,
    },
    Scroll {
        position: Point,
        delta: Vec2,
    },
    /// Pointer left the canvas.
    Leave,
}

/// Double-click detection constants.
const DOUBLE_CLICK_TIME_MS: u128 = 500;
const DOUBLE_CLICK_DISTANCE: f64 = 5.0;

/// Tracks pointer state between events.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    /// Current pointer position in screen coordinates, if over the canvas.
    pub pointer_position: Option<Point>,
    /// Previous pointer position for delta calculations.
    pub previous_pointer_position: Option<Point>,
    /// Currently pressed mouse buttons.
    pressed_buttons: HashSet<MouseButton>,
    /// Current modifier keys state.
    pub modifiers: Modifiers,
    /// Last click time for double-click detection.
    last_click_time: Option<Instant>,
    /// Last click position for double-click detection.
    last_click_position: Option<Point>,
    /// Whether the latest left press completed a double-click.
    double_click_detected: bool,
}

impl InputState {
    /// Create a new input state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a pointer event that happened at `now`.
    pub fn handle_pointer_event(&mut self, event: &PointerEvent, now: Instant) {
        self.previous_pointer_position = self.pointer_position;
        self.double_click_detected = false;
        match *event {
            PointerEvent::Down {
                position,
                button,
                modifiers,
            } => {
                self.pointer_position = Some(position);
                self.modifiers = modifiers;
                self.pressed_buttons.insert(button);

                if button == MouseButton::Left {
                    self.detect_double_click(position, now);
                }
            }
            PointerEvent::Up { position, button } => {
                self.pointer_position = Some(position);
                self.pressed_buttons.remove(&button);
            }
            PointerEvent::Move { position } | PointerEvent::Scroll { position, .. } => {
                self.pointer_position = Some(position);
            }
            PointerEvent::Leave => {
                self.pointer_position = None;
                self.pressed_buttons.clear();
            }
        }
    }

    fn detect_double_click(&mut self, position: Point, now: Instant) {
        if let (Some(last_time), Some(last_pos)) = (self.last_click_time, self.last_click_position) {
            let elapsed = now.saturating_duration_since(last_time).as_millis();
            let distance = (position - last_pos).hypot();

            if elapsed < DOUBLE_CLICK_TIME_MS && distance < DOUBLE_CLICK_DISTANCE {
                self.double_click_detected = true;
                // Reset so a triple click is not a second double-click
                self.last_click_time = None;
                self.last_click_position = None;
                return;
            }
        }
        self.last_click_time = Some(now);
        self.last_click_position = Some(position);
    }

    /// Check if a button is currently pressed.
    pub fn is_button_pressed(&self, button: MouseButton) -> bool {
        self.pressed_buttons.contains(&button)
    }

    /// Whether the latest press completed a double-click.
    pub fn is_double_click(&self) -> bool {
        self.double_click_detected
    }

    /// Pointer movement since the previous event.
    pub fn pointer_delta(&self) -> Vec2 {
        match (self.pointer_position, self.previous_pointer_position) {
            (Some(current), Some(previous)) => current - previous,
            _ => Vec2::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn down(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Down {
            position: Point::new(x, y),
            button: MouseButton::Left,
            modifiers: Modifiers::NONE,
        }
    }

    fn up(x: f64, y: f64) -> PointerEvent {
        PointerEvent::Up {
            position: Point::new(x, y),
            button: MouseButton::Left,
        }
    }

    #[test]
    fn test_button_press_and_release() {
        let mut input = InputState::new();
        let now = Instant::now();

        input.handle_pointer_event(&down(100.0, 100.0), now);
        assert!(input.is_button_pressed(MouseButton::Left));
        assert!(!input.is_button_pressed(MouseButton::Right));

        input.handle_pointer_event(&up(100.0, 100.0), now);
        assert!(!input.is_button_pressed(MouseButton::Left));
    }

    #[test]
    fn test_pointer_delta() {
        let mut input = InputState::new();
        let now = Instant::now();
        input.handle_pointer_event(&PointerEvent::Move { position: Point::new(10.0, 10.0) }, now);
        input.handle_pointer_event(&PointerEvent::Move { position: Point::new(25.0, 5.0) }, now);

        let delta = input.pointer_delta();
        assert!((delta.x - 15.0).abs() < f64::EPSILON);
        assert!((delta.y + 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_double_click_detection() {
        let mut input = InputState::new();
        let start = Instant::now();

        input.handle_pointer_event(&down(100.0, 100.0), start);
        assert!(!input.is_double_click());
        input.handle_pointer_event(&up(100.0, 100.0), start);

        let later = start + Duration::from_millis(200);
        input.handle_pointer_event(&down(102.0, 101.0), later);
        assert!(input.is_double_click());

        // Cleared by the next event
        input.handle_pointer_event(&up(102.0, 101.0), later);
        assert!(!input.is_double_click());
    }

    #[test]
    fn test_double_click_too_slow_or_far() {
        let mut input = InputState::new();
        let start = Instant::now();

        input.handle_pointer_event(&down(100.0, 100.0), start);
        input.handle_pointer_event(&down(100.0, 100.0), start + Duration::from_millis(600));
        assert!(!input.is_double_click());

        input.handle_pointer_event(&down(150.0, 100.0), start + Duration::from_millis(700));
        assert!(!input.is_double_click());
    }

    #[test]
    fn test_leave_clears_pointer() {
        let mut input = InputState::new();
        let now = Instant::now();
        input.handle_pointer_event(&down(1.0, 1.0), now);
        input.handle_pointer_event(&PointerEvent::Leave, now);
        assert!(input.pointer_position.is_none());
        assert!(!input.is_button_pressed(MouseButton::Left));
    }

    #[test]
    fn test_pan_modifiers() {
        assert!(Modifiers::CTRL.pans());
        assert!(Modifiers { meta: true, ..Modifiers::NONE }.pans());
        assert!(!Modifiers { shift: true, ..Modifiers::NONE }.pans());
    }
}
