//! The fixed 32-color canvas palette.

use peniko::Color;

/// Number of palette entries.
pub const PALETTE_SIZE: usize = 32;

/// Reserved "transparent/background" slot. Pixels with this index are never
/// rendered nor counted.
pub const BACKGROUND_INDEX: u8 = 31;

/// RGB values of every palette slot, in index order.
pub const PALETTE: [[u8; 3]; PALETTE_SIZE] = [
    [0x6D, 0x00, 0x1A],
    [0xBE, 0x00, 0x39],
    [0xFF, 0x45, 0x00],
    [0xFF, 0xA8, 0x00],
    [0xFF, 0xD6, 0x35],
    [0xFF, 0xF8, 0xB8],
    [0x00, 0xA3, 0x68],
    [0x00, 0xCC, 0x78],
    [0x7E, 0xED, 0x56],
    [0x00, 0x75, 0x6F],
    [0x00, 0x9E, 0xAA],
    [0x00, 0xCC, 0xC0],
    [0x24, 0x50, 0xA4],
    [0x36, 0x90, 0xEA],
    [0x51, 0xE9, 0xF4],
    [0x49, 0x3A, 0xC1],
    [0x6A, 0x5C, 0xFF],
    [0x94, 0xB3, 0xFF],
    [0x81, 0x1E, 0x9F],
    [0xB4, 0x4A, 0xC0],
    [0xE4, 0xAB, 0xFF],
    [0xDE, 0x10, 0x7F],
    [0xFF, 0x38, 0x81],
    [0xFF, 0x99, 0xAA],
    [0x6D, 0x48, 0x2F],
    [0x9C, 0x69, 0x26],
    [0xFF, 0xB4, 0x70],
    [0x00, 0x00, 0x00],
    [0x51, 0x52, 0x52],
    [0x89, 0x8D, 0x90],
    [0xD4, 0xD7, 0xD9],
    [0xFF, 0xFF, 0xFF],
];

/// RGB triple for a palette index, falling back to the background slot for
/// out-of-range indices.
pub fn rgb(index: u8) -> [u8; 3] {
    PALETTE
        .get(index as usize)
        .copied()
        .unwrap_or(PALETTE[BACKGROUND_INDEX as usize])
}

/// Opaque color for a palette index.
pub fn color(index: u8) -> Color {
    let [r, g, b] = rgb(index);
    Color::from_rgba8(r, g, b, 255)
}

/// CSS hex string (`#rrggbb`) for a palette index.
pub fn hex(index: u8) -> String {
    let [r, g, b] = rgb(index);
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Whether `index` names a paintable (non-background) slot.
pub fn is_paintable(index: u8) -> bool {
    (index as usize) < PALETTE_SIZE && index != BACKGROUND_INDEX
}

/// Nearest paintable palette index by Euclidean RGB distance.
///
/// The background slot is never returned, so a white source pixel maps to the
/// closest light gray instead of disappearing.
pub fn nearest(rgb: [u8; 3]) -> u8 {
    let mut best = 0u8;
    let mut best_dist = u32::MAX;
    for (i, entry) in PALETTE.iter().enumerate() {
        if i == BACKGROUND_INDEX as usize {
            continue;
        }
        let dist = entry
            .iter()
            .zip(rgb.iter())
            .map(|(a, b)| {
                let d = i32::from(*a) - i32::from(*b);
                d.unsigned_abs() * d.unsigned_abs()
            })
            .sum::<u32>();
        if dist < best_dist {
            best_dist = dist;
            // Index is bounded by PALETTE_SIZE.
            best = i as u8;
        }
    }
    best
}
