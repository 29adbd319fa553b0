//! Viewport transform between screen pixels and grid cells.

use kurbo::{Affine, Point, Rect, Size, Vec2};
use serde::{Deserialize, Serialize};

use crate::config::{CanvasConfig, BASE_MIN_SCALE, MAX_SCALE, PIXEL_SIZE};
use crate::pixel::CellKey;

/// Inclusive range of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellBounds {
    pub min: CellKey,
    pub max: CellKey,
}

impl CellBounds {
    pub fn contains(&self, key: CellKey) -> bool {
        key.x >= self.min.x && key.x <= self.max.x && key.y >= self.min.y && key.y <= self.max.y
    }

    /// Grow the bounds by `cells` on every side.
    pub fn expand(self, cells: i32) -> Self {
        Self {
            min: CellKey::new(self.min.x.saturating_sub(cells), self.min.y.saturating_sub(cells)),
            max: CellKey::new(self.max.x.saturating_add(cells), self.max.y.saturating_add(cells)),
        }
    }
}

/// Pan offset and zoom scale of one client's view.
///
/// World `(0,0)` maps to screen `offset`. The transform is translate-then-scale,
/// so `screen = world * scale + offset`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub offset: Vec2,
    pub scale: f64,
    pub min_scale: f64,
    pub max_scale: f64,
    /// Cell edge length in unscaled pixels.
    pub pixel_size: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset: Vec2::ZERO,
            scale: 1.0,
            min_scale: BASE_MIN_SCALE,
            max_scale: MAX_SCALE,
            pixel_size: PIXEL_SIZE,
        }
    }
}

impl Viewport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Viewport with bounds taken from a config.
    pub fn from_config(config: &CanvasConfig) -> Self {
        Self {
            min_scale: config.min_scale(),
            max_scale: config.max_scale,
            pixel_size: config.pixel_size,
            ..Self::default()
        }
        .clamped()
    }

    /// Update the zoom bounds, re-clamping the current scale.
    pub fn set_scale_bounds(&mut self, min_scale: f64, max_scale: f64) {
        self.min_scale = min_scale;
        self.max_scale = max_scale;
        self.scale = self.scale.clamp(self.min_scale, self.max_scale);
    }

    fn clamped(mut self) -> Self {
        self.scale = self.scale.clamp(self.min_scale, self.max_scale);
        self
    }

    /// World-to-screen transform.
    pub fn transform(&self) -> Affine {
        Affine::translate(self.offset) * Affine::scale(self.scale)
    }

    /// Screen-to-world transform.
    pub fn inverse_transform(&self) -> Affine {
        Affine::scale(1.0 / self.scale) * Affine::translate(-self.offset)
    }

    pub fn screen_to_world(&self, screen: Point) -> Point {
        Point::new(
            (screen.x - self.offset.x) / self.scale,
            (screen.y - self.offset.y) / self.scale,
        )
    }

    pub fn world_to_screen(&self, world: Point) -> Point {
        Point::new(world.x * self.scale + self.offset.x, world.y * self.scale + self.offset.y)
    }

    /// Grid cell under a screen point.
    pub fn screen_to_cell(&self, screen: Point) -> CellKey {
        let world = self.screen_to_world(screen);
        CellKey::new(
            floor_to_i32(world.x / self.pixel_size),
            floor_to_i32(world.y / self.pixel_size),
        )
    }

    /// Screen rectangle covered by a cell.
    pub fn cell_to_screen(&self, cell: CellKey) -> Rect {
        let side = self.pixel_size * self.scale;
        let origin = Point::new(
            f64::from(cell.x) * self.pixel_size * self.scale + self.offset.x,
            f64::from(cell.y) * self.pixel_size * self.scale + self.offset.y,
        );
        Rect::from_origin_size(origin, Size::new(side, side))
    }

    /// World-space center of a cell.
    pub fn cell_center_world(&self, cell: CellKey) -> Point {
        Point::new(
            (f64::from(cell.x) + 0.5) * self.pixel_size,
            (f64::from(cell.y) + 0.5) * self.pixel_size,
        )
    }

    /// Pan by a raw screen-space delta.
    pub fn pan(&mut self, delta: Vec2) {
        self.offset += delta;
    }

    /// Scale multiplier applied for a wheel delta: scrolling up (negative
    /// delta) zooms in, scrolling down zooms out, zero leaves scale alone.
    pub fn wheel_factor(delta: f64, zoom_factor: f64) -> f64 {
        if delta < 0.0 {
            zoom_factor
        } else if delta > 0.0 {
            1.0 / zoom_factor
        } else {
            1.0
        }
    }

    /// Zoom for a wheel event anchored at a screen point.
    pub fn zoom_wheel(&mut self, anchor: Point, delta: f64, zoom_factor: f64) {
        self.zoom_at(anchor, Self::wheel_factor(delta, zoom_factor));
    }

    /// Zoom by `factor`, keeping the world point under `anchor` fixed on screen.
    pub fn zoom_at(&mut self, anchor: Point, factor: f64) {
        let new_scale = (self.scale * factor).clamp(self.min_scale, self.max_scale);
        if (new_scale - self.scale).abs() < f64::EPSILON {
            return;
        }
        let ratio = new_scale / self.scale;
        let anchor = anchor.to_vec2();
        self.offset = anchor - (anchor - self.offset) * ratio;
        self.scale = new_scale;
    }

    /// Center the view on a world point for a given screen size.
    pub fn center_on(&mut self, world: Point, screen: Size) {
        self.offset = Vec2::new(
            screen.width / 2.0 - world.x * self.scale,
            screen.height / 2.0 - world.y * self.scale,
        );
    }

    /// Cells touched by a screen area of the given size, without margin.
    pub fn visible_cells(&self, screen: Size) -> CellBounds {
        let min = self.screen_to_cell(Point::ZERO);
        let max = self.screen_to_cell(Point::new(screen.width, screen.height));
        CellBounds { min, max }
    }
}

/// `floor` then saturate into `i32`.
fn floor_to_i32(v: f64) -> i32 {
    let f = v.floor();
    if f.is_nan() {
        0
    } else {
        // `as` saturates for out-of-range floats.
        f as i32
    }
}
