//! Image stamping onto the canvas.
//!
//! A source image is quantized to the palette and written as one bulk commit
//! with its top-left corner on the target cell.

use image::RgbaImage;
use thiserror::Error;

use crate::buffer::PixelWrites;
use crate::palette;
use crate::pixel::{CellKey, Pixel};

/// Largest accepted source edge, in cells.
pub const MAX_PASTE_EDGE: u32 = 512;

/// Alpha below this is treated as transparent and skipped.
pub const ALPHA_THRESHOLD: u8 = 128;

/// Paste validation errors. All are raised before any write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PasteError {
    #[error("No image loaded")]
    NoImage,
    #[error("No paste target selected")]
    NoTarget,
    #[error("Image is empty")]
    EmptyImage,
    #[error("Image is {width}x{height}, larger than {max}x{max}")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("Failed to decode image: {0}")]
    Decode(String),
}

/// Decode PNG or JPEG bytes into RGBA.
pub fn decode_image(data: &[u8]) -> Result<RgbaImage, PasteError> {
    let decoded = image::load_from_memory(data).map_err(|e| PasteError::Decode(e.to_string()))?;
    Ok(decoded.to_rgba8())
}

/// Reject empty or oversized sources.
pub fn validate_image(image: &RgbaImage) -> Result<(), PasteError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(PasteError::EmptyImage);
    }
    if width > MAX_PASTE_EDGE || height > MAX_PASTE_EDGE {
        return Err(PasteError::TooLarge {
            width,
            height,
            max: MAX_PASTE_EDGE,
        });
    }
    Ok(())
}

/// Quantized, non-transparent source pixels placed at `target`.
pub fn stamp_pixels(image: &RgbaImage, target: CellKey, placed_by: &str, timestamp: u64) -> Vec<Pixel> {
    image
        .enumerate_pixels()
        .filter(|(_, _, px)| px.0[3] >= ALPHA_THRESHOLD)
        .map(|(x, y, px)| {
            let [r, g, b, _] = px.0;
            let key = CellKey::new(
                target.x.saturating_add(x as i32),
                target.y.saturating_add(y as i32),
            );
            Pixel::new(key, palette::nearest([r, g, b]), placed_by, timestamp)
        })
        .collect()
}

/// Bulk write covering every stamped cell.
pub fn stamp_writes(image: &RgbaImage, target: CellKey, placed_by: &str, timestamp: u64) -> PixelWrites {
    stamp_pixels(image, target, placed_by, timestamp)
        .into_iter()
        .map(|p| (p.key(), Some(p)))
        .collect()
}

/// Paste tool state: a loaded source and the chosen target.
#[derive(Debug, Clone, Default)]
pub struct PasteState {
    image: Option<RgbaImage>,
    target: Option<CellKey>,
    /// Quantized preview, rebuilt when image or target changes.
    preview: Vec<Pixel>,
}

impl PasteState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a decoded source. The target is kept.
    pub fn load(&mut self, image: RgbaImage) -> Result<(), PasteError> {
        validate_image(&image)?;
        log::debug!("Paste image loaded: {}x{}", image.width(), image.height());
        self.image = Some(image);
        self.rebuild_preview();
        Ok(())
    }

    /// Decode and load encoded bytes.
    pub fn load_bytes(&mut self, data: &[u8]) -> Result<(), PasteError> {
        self.load(decode_image(data)?)
    }

    pub fn set_target(&mut self, target: CellKey) {
        if self.target != Some(target) {
            self.target = Some(target);
            self.rebuild_preview();
        }
    }

    pub fn image(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }

    pub fn target(&self) -> Option<CellKey> {
        self.target
    }

    /// Pixels to draw at half opacity, empty until both image and target are set.
    pub fn preview(&self) -> &[Pixel] {
        &self.preview
    }

    pub fn clear(&mut self) {
        self.image = None;
        self.target = None;
        self.preview.clear();
    }

    /// Build the bulk write for the current image and target.
    pub fn commit_writes(&self, placed_by: &str, timestamp: u64) -> Result<PixelWrites, PasteError> {
        let image = self.image.as_ref().ok_or(PasteError::NoImage)?;
        let target = self.target.ok_or(PasteError::NoTarget)?;
        validate_image(image)?;
        Ok(stamp_writes(image, target, placed_by, timestamp))
    }

    fn rebuild_preview(&mut self) {
        self.preview = match (&self.image, self.target) {
            (Some(image), Some(target)) => stamp_pixels(image, target, "", 0),
            _ => Vec::new(),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checker() -> RgbaImage {
        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        image.put_pixel(1, 0, Rgba([0, 0, 0, 255]));
        image.put_pixel(0, 1, Rgba([0, 0, 255, 10]));
        image.put_pixel(1, 1, Rgba([255, 255, 255, 200]));
        image
    }

    #[test]
    fn test_stamp_skips_transparent_and_offsets() {
        let writes = stamp_writes(&checker(), CellKey::new(10, -3), "alice", 1);
        assert_eq!(writes.len(), 3);
        assert!(writes.contains_key(&CellKey::new(10, -3)));
        assert!(writes.contains_key(&CellKey::new(11, -3)));
        assert!(!writes.contains_key(&CellKey::new(10, -2)));
        assert!(writes.contains_key(&CellKey::new(11, -2)));
    }

    #[test]
    fn test_stamp_quantizes_to_palette() {
        let writes = stamp_writes(&checker(), CellKey::new(0, 0), "alice", 1);
        for pixel in writes.values().flatten() {
            assert!(palette::is_paintable(pixel.color));
            assert_eq!(pixel.placed_by, "alice");
        }
        let red = writes[&CellKey::new(0, 0)].as_ref().unwrap();
        assert_eq!(red.color, palette::nearest([255, 0, 0]));
    }

    #[test]
    fn test_commit_requires_image_and_target() {
        let mut state = PasteState::new();
        assert_eq!(state.commit_writes("a", 0), Err(PasteError::NoImage));

        state.load(checker()).unwrap();
        assert_eq!(state.commit_writes("a", 0), Err(PasteError::NoTarget));
        assert!(state.preview().is_empty());

        state.set_target(CellKey::new(0, 0));
        assert_eq!(state.preview().len(), 3);
        assert_eq!(state.commit_writes("a", 0).unwrap().len(), 3);
    }

    #[test]
    fn test_rejects_empty_and_oversized() {
        let mut state = PasteState::new();
        assert_eq!(state.load(RgbaImage::new(0, 4)), Err(PasteError::EmptyImage));
        assert!(matches!(
            state.load(RgbaImage::new(MAX_PASTE_EDGE + 1, 1)),
            Err(PasteError::TooLarge { .. })
        ));
        assert!(state.image().is_none());
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(decode_image(b"not an image"), Err(PasteError::Decode(_))));
    }

    #[test]
    fn test_decode_png_bytes() {
        let mut bytes = Vec::new();
        checker()
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        let decoded = decode_image(&bytes).unwrap();
        assert_eq!(decoded.dimensions(), (2, 2));
    }
}
