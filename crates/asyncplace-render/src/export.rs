//! Derived, read-only exports of the canvas.

use std::fmt::Write as _;

use asyncplace_core::camera::Viewport;
use asyncplace_core::palette;
use asyncplace_core::pixel::Pixel;
use kurbo::Size;
use thiserror::Error;

/// Largest PNG export, in image pixels.
pub const MAX_EXPORT_PIXELS: u64 = 4096 * 4096;

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Nothing to export")]
    Empty,
    #[error("Export of {width}x{height} px exceeds {max} px")]
    TooLarge { width: u32, height: u32, max: u64 },
    #[error("Encoding failed: {0}")]
    Encode(String),
}

/// Encode painted pixels as a PNG cropped to their bounding box.
///
/// Each cell becomes a `cell_px` square; unpainted cells stay transparent.
pub fn export_png<'a>(
    pixels: impl IntoIterator<Item = &'a Pixel>,
    cell_px: u32,
) -> Result<Vec<u8>, ExportError> {
    let painted: Vec<&Pixel> = pixels.into_iter().filter(|p| !p.is_background()).collect();
    let (Some(min_x), Some(min_y), Some(max_x), Some(max_y)) = (
        painted.iter().map(|p| p.x).min(),
        painted.iter().map(|p| p.y).min(),
        painted.iter().map(|p| p.x).max(),
        painted.iter().map(|p| p.y).max(),
    ) else {
        return Err(ExportError::Empty);
    };

    let cell_px = cell_px.max(1);
    let cells_w = u32::try_from(i64::from(max_x) - i64::from(min_x) + 1)
        .map_err(|e| ExportError::Encode(e.to_string()))?;
    let cells_h = u32::try_from(i64::from(max_y) - i64::from(min_y) + 1)
        .map_err(|e| ExportError::Encode(e.to_string()))?;
    let width = cells_w
        .checked_mul(cell_px)
        .ok_or_else(|| ExportError::Encode("image too wide".to_string()))?;
    let height = cells_h
        .checked_mul(cell_px)
        .ok_or_else(|| ExportError::Encode("image too tall".to_string()))?;

    if u64::from(width) * u64::from(height) > MAX_EXPORT_PIXELS {
        return Err(ExportError::TooLarge {
            width,
            height,
            max: MAX_EXPORT_PIXELS,
        });
    }

    let mut rgba = vec![0u8; width as usize * height as usize * 4];
    for pixel in &painted {
        let [r, g, b] = palette::rgb(pixel.color);
        let cx = (i64::from(pixel.x) - i64::from(min_x)) as u32 * cell_px;
        let cy = (i64::from(pixel.y) - i64::from(min_y)) as u32 * cell_px;
        for y in cy..cy + cell_px {
            let row = y as usize * width as usize;
            for x in cx..cx + cell_px {
                let i = (row + x as usize) * 4;
                rgba[i..i + 4].copy_from_slice(&[r, g, b, 255]);
            }
        }
    }

    let png_data = encode_png(&rgba, width, height)?;
    log::info!("PNG export complete: {}x{} px, {} bytes", width, height, png_data.len());
    Ok(png_data)
}

/// Encode RGBA pixel data to PNG bytes.
fn encode_png(rgba_data: &[u8], width: u32, height: u32) -> Result<Vec<u8>, ExportError> {
    let mut png_data = Vec::new();
    {
        let mut encoder = png::Encoder::new(&mut png_data, width, height);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);

        let mut writer = encoder
            .write_header()
            .map_err(|e| ExportError::Encode(format!("PNG header: {}", e)))?;
        writer
            .write_image_data(rgba_data)
            .map_err(|e| ExportError::Encode(format!("PNG data: {}", e)))?;
    }
    Ok(png_data)
}

/// SVG with one rectangle per painted pixel inside the view.
pub fn export_svg<'a>(
    pixels: impl IntoIterator<Item = &'a Pixel>,
    viewport: &Viewport,
    screen: Size,
) -> String {
    let bounds = viewport.visible_cells(screen);
    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = screen.width,
        h = screen.height
    );
    for pixel in pixels {
        if pixel.is_background() || !bounds.contains(pixel.key()) {
            continue;
        }
        let rect = viewport.cell_to_screen(pixel.key());
        let _ = writeln!(
            svg,
            r#"  <rect x="{}" y="{}" width="{}" height="{}" fill="{}"/>"#,
            rect.x0,
            rect.y0,
            rect.width(),
            rect.height(),
            palette::hex(pixel.color)
        );
    }
    svg.push_str("</svg>\n");
    svg
}

#[cfg(test)]
mod tests {
    use super::*;
    use asyncplace_core::palette::BACKGROUND_INDEX;
    use asyncplace_core::pixel::CellKey;

    fn px(x: i32, y: i32, color: u8) -> Pixel {
        Pixel::new(CellKey::new(x, y), color, "t", 0)
    }

    #[test]
    fn test_png_cropped_to_painted_bounds() {
        let pixels = [px(-2, 5, 3), px(1, 6, 4), px(50, 50, BACKGROUND_INDEX)];
        let data = export_png(&pixels, 2).unwrap();

        let decoder = png::Decoder::new(std::io::Cursor::new(data));
        let reader = decoder.read_info().unwrap();
        let info = reader.info();
        // 4x2 cells at 2px each
        assert_eq!((info.width, info.height), (8, 4));
    }

    #[test]
    fn test_png_rejects_sprawling_canvas() {
        let pixels = [px(-1_000_000, 0, 3), px(1_000_000, 0, 3)];
        assert!(matches!(
            export_png(&pixels, 1),
            Err(ExportError::TooLarge { width: 2_000_001, height: 1, .. })
        ));

        let pixels = [px(0, 0, 3), px(40, 40, 3)];
        assert!(matches!(export_png(&pixels, 100), Err(ExportError::TooLarge { .. })));
    }

    #[test]
    fn test_png_empty() {
        let pixels = [px(0, 0, BACKGROUND_INDEX)];
        assert!(matches!(export_png(&pixels, 1), Err(ExportError::Empty)));
    }

    #[test]
    fn test_svg_one_rect_per_visible_pixel() {
        let vp = Viewport::new();
        let pixels = [
            px(0, 0, 3),
            px(1, 0, BACKGROUND_INDEX),
            px(500, 500, 3),
        ];
        let svg = export_svg(&pixels, &vp, Size::new(100.0, 100.0));
        assert_eq!(svg.matches("<rect").count(), 1);
        assert!(svg.contains(&format!(r#"fill="{}""#, palette::hex(3))));
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
    }
}
