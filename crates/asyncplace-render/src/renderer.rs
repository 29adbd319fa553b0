//! Frame rendering over an abstract drawing surface.

use asyncplace_core::camera::Viewport;
use asyncplace_core::palette;
use asyncplace_core::pixel::{BrushSize, CellKey, Pixel};
use asyncplace_core::session::CanvasSession;
use kurbo::{Affine, Point, Rect, Size};
use peniko::Color;

/// Drawing backend for a frame.
///
/// Geometry is given in world space together with the world-to-screen
/// transform; implementations decide how to rasterize it.
pub trait Surface {
    /// Surface size in screen pixels.
    fn size(&self) -> Size;

    /// Fill the whole surface.
    fn clear(&mut self, color: Color);

    /// Fill a world-space rectangle.
    fn fill_rect(&mut self, rect: Rect, transform: Affine, color: Color);

    /// Stroke a world-space line `width` screen pixels wide.
    fn stroke_line(&mut self, p0: Point, p1: Point, transform: Affine, width: f64, color: Color);
}

/// Context for a single render frame.
pub struct RenderContext<'a> {
    /// View transform and cell size.
    pub viewport: &'a Viewport,
    /// Pixels to draw, already filtered to the view.
    pub pixels: &'a [Pixel],
    /// Background color.
    pub background_color: Color,
    /// Whether the grid overlay is enabled.
    pub show_grid: bool,
    pub grid_color: Color,
    /// Hovered cell and the brush whose neighborhood to highlight.
    pub hover: Option<(CellKey, BrushSize)>,
    pub highlight_color: Color,
    /// Image staged for pasting.
    pub paste_preview: &'a [Pixel],
    pub paste_opacity: f32,
}

impl<'a> RenderContext<'a> {
    /// Create a new render context.
    pub fn new(viewport: &'a Viewport, pixels: &'a [Pixel]) -> Self {
        Self {
            viewport,
            pixels,
            background_color: palette::color(palette::BACKGROUND_INDEX),
            show_grid: true,
            grid_color: Color::from_rgba8(200, 200, 200, 255),
            hover: None,
            highlight_color: Color::from_rgba8(0, 0, 0, 64),
            paste_preview: &[],
            paste_opacity: 0.5,
        }
    }

    /// Set the background color.
    pub fn with_background(mut self, color: Color) -> Self {
        self.background_color = color;
        self
    }

    /// Enable or disable the grid overlay.
    pub fn with_grid(mut self, show: bool) -> Self {
        self.show_grid = show;
        self
    }

    /// Highlight the brush neighborhood around a hovered cell.
    pub fn with_hover(mut self, hover: Option<(CellKey, BrushSize)>) -> Self {
        self.hover = hover;
        self
    }

    /// Draw a paste preview.
    pub fn with_paste_preview(mut self, preview: &'a [Pixel]) -> Self {
        self.paste_preview = preview;
        self
    }
}

/// What a frame drew.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub pixels: usize,
    pub grid_lines: usize,
    pub highlighted_cells: usize,
    pub preview_pixels: usize,
}

/// Draw one frame.
pub fn render_frame(surface: &mut dyn Surface, ctx: &RenderContext) -> FrameStats {
    let mut stats = FrameStats::default();
    let viewport = ctx.viewport;
    let transform = viewport.transform();
    let size = viewport.pixel_size;

    // 1. Clear
    surface.clear(ctx.background_color);

    // 2. Grid, only when cells are large enough to read
    if ctx.show_grid && viewport.scale > 1.0 {
        stats.grid_lines = render_grid(surface, ctx, transform);
    }

    // 3. Pixels, grown slightly when downscaled so neighbors do not seam
    let side = if viewport.scale < 1.0 {
        size + 1.0 / viewport.scale
    } else {
        size
    };
    for pixel in ctx.pixels.iter().filter(|p| !p.is_background()) {
        surface.fill_rect(cell_rect(pixel.key(), size, side), transform, palette::color(pixel.color));
        stats.pixels += 1;
    }

    // 4. Brush neighborhood highlight
    if let Some((cell, brush)) = ctx.hover {
        let r = brush.radius();
        let (x, y, r) = (f64::from(cell.x), f64::from(cell.y), f64::from(r));
        let rect = Rect::new(
            (x - r) * size,
            (y - r) * size,
            (x + r + 1.0) * size,
            (y + r + 1.0) * size,
        );
        surface.fill_rect(rect, transform, ctx.highlight_color);
        stats.highlighted_cells = (brush.cells() * brush.cells()) as usize;
    }

    // 5. Paste preview
    for pixel in ctx.paste_preview {
        let color = palette::color(pixel.color).multiply_alpha(ctx.paste_opacity);
        surface.fill_rect(cell_rect(pixel.key(), size, side), transform, color);
        stats.preview_pixels += 1;
    }

    stats
}

/// Render a session's current state.
pub fn render_session(surface: &mut dyn Surface, session: &CanvasSession) -> FrameStats {
    let pixels = session.visible_pixels();
    let hover = session.hovered().map(|cell| (cell, session.brush()));
    let ctx = RenderContext::new(session.viewport(), &pixels)
        .with_grid(session.config().show_grid)
        .with_hover(hover)
        .with_paste_preview(session.paste_preview());
    render_frame(surface, &ctx)
}

fn cell_rect(cell: CellKey, size: f64, side: f64) -> Rect {
    let origin = Point::new(f64::from(cell.x) * size, f64::from(cell.y) * size);
    Rect::from_origin_size(origin, Size::new(side, side))
}

/// Grid lines on cell boundaries across the visible area.
fn render_grid(surface: &mut dyn Surface, ctx: &RenderContext, transform: Affine) -> usize {
    let size = ctx.viewport.pixel_size;
    let bounds = ctx.viewport.visible_cells(surface.size());
    let x0 = f64::from(bounds.min.x) * size;
    let y0 = f64::from(bounds.min.y) * size;
    let x1 = (f64::from(bounds.max.x) + 1.0) * size;
    let y1 = (f64::from(bounds.max.y) + 1.0) * size;
    let mut lines = 0;

    for x in bounds.min.x..=bounds.max.x.saturating_add(1) {
        let wx = f64::from(x) * size;
        surface.stroke_line(Point::new(wx, y0), Point::new(wx, y1), transform, 1.0, ctx.grid_color);
        lines += 1;
    }
    for y in bounds.min.y..=bounds.max.y.saturating_add(1) {
        let wy = f64::from(y) * size;
        surface.stroke_line(Point::new(x0, wy), Point::new(x1, wy), transform, 1.0, ctx.grid_color);
        lines += 1;
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use kurbo::Vec2;

    /// Records draw calls without rasterizing.
    #[derive(Default)]
    struct Recorder {
        fills: Vec<(Rect, Color)>,
        lines: usize,
        clears: usize,
    }

    impl Surface for Recorder {
        fn size(&self) -> Size {
            Size::new(100.0, 100.0)
        }

        fn clear(&mut self, _color: Color) {
            self.clears += 1;
        }

        fn fill_rect(&mut self, rect: Rect, transform: Affine, color: Color) {
            self.fills.push((transform.transform_rect_bbox(rect), color));
        }

        fn stroke_line(&mut self, _p0: Point, _p1: Point, _transform: Affine, _width: f64, _color: Color) {
            self.lines += 1;
        }
    }

    fn viewport(scale: f64) -> Viewport {
        Viewport {
            offset: Vec2::ZERO,
            scale,
            min_scale: 0.05,
            max_scale: 10.0,
            pixel_size: 10.0,
        }
    }

    fn px(x: i32, y: i32, color: u8) -> Pixel {
        Pixel::new(CellKey::new(x, y), color, "t", 0)
    }

    #[test]
    fn test_grid_only_above_unit_scale() {
        let pixels: [Pixel; 0] = [];
        for (scale, expect_grid) in [(0.5, false), (1.0, false), (2.0, true)] {
            let vp = viewport(scale);
            let mut surface = Recorder::default();
            let stats = render_frame(&mut surface, &RenderContext::new(&vp, &pixels));
            assert_eq!(surface.lines > 0, expect_grid, "scale {}", scale);
            assert_eq!(stats.grid_lines, surface.lines);
            assert_eq!(surface.clears, 1);
        }
    }

    #[test]
    fn test_grid_toggle() {
        let vp = viewport(2.0);
        let mut surface = Recorder::default();
        render_frame(&mut surface, &RenderContext::new(&vp, &[]).with_grid(false));
        assert_eq!(surface.lines, 0);
    }

    #[test]
    fn test_background_pixels_skipped() {
        let vp = viewport(1.0);
        let pixels = [px(0, 0, 3), px(1, 0, palette::BACKGROUND_INDEX)];
        let mut surface = Recorder::default();
        let stats = render_frame(&mut surface, &RenderContext::new(&vp, &pixels));
        assert_eq!(stats.pixels, 1);
        assert_eq!(surface.fills.len(), 1);
    }

    #[test]
    fn test_anti_gap_when_downscaled() {
        let pixels = [px(0, 0, 3)];

        let vp = viewport(0.5);
        let mut surface = Recorder::default();
        render_frame(&mut surface, &RenderContext::new(&vp, &pixels));
        let rect = surface.fills[0].0;
        // (10 + 1/0.5) * 0.5 screen px
        assert!((rect.width() - 6.0).abs() < 1e-9);

        let vp = viewport(2.0);
        let mut surface = Recorder::default();
        render_frame(&mut surface, &RenderContext::new(&vp, &pixels).with_grid(false));
        assert!((surface.fills[0].0.width() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_hover_highlights_brush_neighborhood() {
        let vp = viewport(1.0);
        let mut surface = Recorder::default();
        let ctx = RenderContext::new(&vp, &[]).with_hover(Some((CellKey::new(10, 10), BrushSize::Three)));
        let stats = render_frame(&mut surface, &ctx);
        assert_eq!(stats.highlighted_cells, 9);
        let rect = surface.fills[0].0;
        assert_eq!(rect, Rect::new(90.0, 90.0, 120.0, 120.0));
    }

    #[test]
    fn test_hover_at_grid_edge() {
        let vp = viewport(1.0);
        let mut surface = Recorder::default();
        let cell = CellKey::new(i32::MAX, i32::MIN);
        let ctx = RenderContext::new(&vp, &[]).with_hover(Some((cell, BrushSize::Seven)));
        render_frame(&mut surface, &ctx);
        let rect = surface.fills[0].0;
        assert_eq!(rect.width(), 70.0);
        assert!(rect.x1 > f64::from(i32::MAX) * 10.0);
    }

    #[test]
    fn test_paste_preview_half_opacity() {
        let vp = viewport(1.0);
        let preview = [px(0, 0, 3), px(1, 0, 3)];
        let mut surface = Recorder::default();
        let stats = render_frame(&mut surface, &RenderContext::new(&vp, &[]).with_paste_preview(&preview));
        assert_eq!(stats.preview_pixels, 2);
        let alpha = surface.fills[0].1.to_rgba8().a;
        assert!((i32::from(alpha) - 128).abs() <= 1);
    }
}
