//! CPU raster surface backed by an RGBA image.

use image::{Rgba, RgbaImage};
use kurbo::{Affine, Point, Rect, Size};
use peniko::Color;

use crate::renderer::Surface;

/// Software surface. Covers a screen pixel when its center lies inside a
/// shape and blends source-over.
///
/// Only axis-aligned geometry is supported, which is all the canvas draws.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    image: RgbaImage,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: RgbaImage::new(width, height),
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }

    /// RGBA at a screen pixel, if in range.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.image.get_pixel_checked(x, y).map(|p| p.0)
    }

    /// Fill a screen-space rectangle.
    fn fill_screen_rect(&mut self, rect: Rect, color: Color) {
        let rgba = color.to_rgba8();
        let src = [rgba.r, rgba.g, rgba.b, rgba.a];
        if src[3] == 0 {
            return;
        }
        let (width, height) = self.image.dimensions();
        let x_start = (rect.x0 - 0.5).ceil().max(0.0) as u32;
        let y_start = (rect.y0 - 0.5).ceil().max(0.0) as u32;
        let x_end = ((rect.x1 - 0.5).ceil().max(0.0) as u32).min(width);
        let y_end = ((rect.y1 - 0.5).ceil().max(0.0) as u32).min(height);

        for y in y_start..y_end {
            for x in x_start..x_end {
                let dst = self.image.get_pixel_mut(x, y);
                *dst = blend(*dst, src);
            }
        }
    }
}

impl Surface for RasterSurface {
    fn size(&self) -> Size {
        Size::new(f64::from(self.image.width()), f64::from(self.image.height()))
    }

    fn clear(&mut self, color: Color) {
        let rgba = color.to_rgba8();
        let fill = Rgba([rgba.r, rgba.g, rgba.b, rgba.a]);
        for px in self.image.pixels_mut() {
            *px = fill;
        }
    }

    fn fill_rect(&mut self, rect: Rect, transform: Affine, color: Color) {
        self.fill_screen_rect(transform.transform_rect_bbox(rect), color);
    }

    fn stroke_line(&mut self, p0: Point, p1: Point, transform: Affine, width: f64, color: Color) {
        let (a, b) = (transform * p0, transform * p1);
        let half = width / 2.0;
        let rect = Rect::from_points(a, b).inflate(half, half);
        self.fill_screen_rect(rect, color);
    }
}

/// Source-over blend in 8-bit straight alpha.
fn blend(dst: Rgba<u8>, src: [u8; 4]) -> Rgba<u8> {
    if src[3] == 255 {
        return Rgba(src);
    }
    let sa = f32::from(src[3]) / 255.0;
    let da = f32::from(dst.0[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let mut out = [0u8; 4];
    for i in 0..3 {
        let s = f32::from(src[i]) * sa;
        let d = f32::from(dst.0[i]) * da * (1.0 - sa);
        out[i] = ((s + d) / out_a).round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    Rgba(out)
}
