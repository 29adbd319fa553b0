//! Pixel records, grid keys and brush neighborhoods.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::palette::BACKGROUND_INDEX;

/// Root path of the canvas collection in the remote store.
pub const CANVAS_PATH: &str = "canvas";

/// Integer grid coordinate, the primary key of a pixel.
///
/// The wire form is `"{x}_{y}"`, which is what the remote store uses as the
/// child key under [`CANVAS_PATH`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CellKey {
    pub x: i32,
    pub y: i32,
}

impl CellKey {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Full store path, e.g. `canvas/3_-4`.
    pub fn path(&self) -> String {
        format!("{CANVAS_PATH}/{self}")
    }

    /// Chebyshev distance to another cell.
    pub fn distance(&self, other: CellKey) -> u32 {
        self.x.abs_diff(other.x).max(self.y.abs_diff(other.y))
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.x, self.y)
    }
}

/// Error returned when a `"x_y"` key cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid cell key: {0}")]
pub struct ParseCellKeyError(pub String);

impl FromStr for CellKey {
    type Err = ParseCellKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Negative coordinates contain '-', never '_', so the first '_' after
        // position 0 is the separator.
        let split = s
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '_')
            .map(|(i, _)| i)
            .ok_or_else(|| ParseCellKeyError(s.to_string()))?;
        let x = s[..split].parse().map_err(|_| ParseCellKeyError(s.to_string()))?;
        let y = s[split + 1..].parse().map_err(|_| ParseCellKeyError(s.to_string()))?;
        Ok(Self { x, y })
    }
}

impl Serialize for CellKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One painted cell of the canvas.
///
/// Writing a pixel to an existing key replaces the whole record; there is no
/// field-level merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pixel {
    pub x: i32,
    pub y: i32,
    /// Palette index.
    pub color: u8,
    /// Lowercased username of the last writer.
    #[serde(rename = "placedBy")]
    pub placed_by: String,
    /// Milliseconds since the Unix epoch. Informational only.
    pub timestamp: u64,
}

impl Pixel {
    pub fn new(key: CellKey, color: u8, placed_by: impl Into<String>, timestamp: u64) -> Self {
        Self {
            x: key.x,
            y: key.y,
            color,
            placed_by: placed_by.into(),
            timestamp,
        }
    }

    pub fn key(&self) -> CellKey {
        CellKey::new(self.x, self.y)
    }

    /// Background pixels are never drawn nor counted.
    pub fn is_background(&self) -> bool {
        self.color == BACKGROUND_INDEX
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    #[cfg(target_arch = "wasm32")]
    use web_time::{SystemTime, UNIX_EPOCH};
    #[cfg(not(target_arch = "wasm32"))]
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Square brush edge length in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BrushSize {
    #[default]
    One,
    Three,
    Five,
    Seven,
}

impl BrushSize {
    pub const ALL: [BrushSize; 4] = [BrushSize::One, BrushSize::Three, BrushSize::Five, BrushSize::Seven];

    /// Edge length in cells.
    pub fn cells(self) -> i32 {
        match self {
            BrushSize::One => 1,
            BrushSize::Three => 3,
            BrushSize::Five => 5,
            BrushSize::Seven => 7,
        }
    }

    pub fn from_cells(cells: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.cells() == cells)
    }

    /// Distance from the center cell to the brush edge.
    pub fn radius(self) -> i32 {
        self.cells() / 2
    }

    /// All cells covered by a brush centered on `center`, row by row.
    ///
    /// Clipped at the edges of the `i32` grid.
    pub fn neighborhood(self, center: CellKey) -> impl Iterator<Item = CellKey> {
        let r = self.radius();
        let xs = center.x.saturating_sub(r)..=center.x.saturating_add(r);
        (center.y.saturating_sub(r)..=center.y.saturating_add(r))
            .flat_map(move |y| xs.clone().map(move |x| CellKey::new(x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_key_display_and_parse() {
        let key = CellKey::new(-3, 12);
        assert_eq!(key.to_string(), "-3_12");
        assert_eq!("-3_12".parse::<CellKey>().unwrap(), key);
        assert_eq!("-3_-12".parse::<CellKey>().unwrap(), CellKey::new(-3, -12));
        assert_eq!(key.path(), "canvas/-3_12");
    }

    #[test]
    fn test_cell_key_parse_rejects_garbage() {
        assert!("".parse::<CellKey>().is_err());
        assert!("12".parse::<CellKey>().is_err());
        assert!("a_b".parse::<CellKey>().is_err());
        assert!("1_2_3".parse::<CellKey>().is_err());
    }

    #[test]
    fn test_pixel_serializes_placed_by() {
        let pixel = Pixel::new(CellKey::new(0, 0), 3, "alice", 42);
        let json = serde_json::to_string(&pixel).unwrap();
        assert!(json.contains("\"placedBy\":\"alice\""));
        let back: Pixel = serde_json::from_str(&json).unwrap();
        assert_eq!(back, pixel);
    }

    #[test]
    fn test_background_pixel() {
        assert!(Pixel::new(CellKey::new(1, 1), BACKGROUND_INDEX, "bob", 0).is_background());
        assert!(!Pixel::new(CellKey::new(1, 1), 0, "bob", 0).is_background());
    }

    #[test]
    fn test_brush_neighborhood_size_three() {
        let cells: Vec<_> = BrushSize::Three.neighborhood(CellKey::new(10, 10)).collect();
        assert_eq!(cells.len(), 9);
        for y in 9..=11 {
            for x in 9..=11 {
                assert!(cells.contains(&CellKey::new(x, y)));
            }
        }
    }

    #[test]
    fn test_brush_neighborhood_size_one() {
        let cells: Vec<_> = BrushSize::One.neighborhood(CellKey::new(-4, 7)).collect();
        assert_eq!(cells, vec![CellKey::new(-4, 7)]);
    }

    #[test]
    fn test_brush_neighborhood_clipped_at_grid_edge() {
        let corner = CellKey::new(i32::MAX, i32::MIN);
        let cells: Vec<_> = BrushSize::Three.neighborhood(corner).collect();
        assert_eq!(cells.len(), 4);
        assert!(cells.contains(&corner));
        assert!(cells.contains(&CellKey::new(i32::MAX - 1, i32::MIN + 1)));
    }

    #[test]
    fn test_brush_from_cells() {
        assert_eq!(BrushSize::from_cells(5), Some(BrushSize::Five));
        assert_eq!(BrushSize::from_cells(4), None);
    }
}
