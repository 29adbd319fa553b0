//! Client-side pixel cache merging the remote snapshot with local edits.

use std::collections::HashMap;

use crate::camera::CellBounds;
use crate::pixel::{CellKey, Pixel};

/// Merged view of the canvas keyed by cell.
pub type MergedPixels = HashMap<CellKey, Pixel>;

/// Merge the authoritative snapshot with the local overlay.
///
/// Overlay entries win for the same key. Erased cells appear in the overlay as
/// background pixels so they hide the remote record until the delete lands.
pub fn merge<'a>(
    remote: impl IntoIterator<Item = &'a Pixel>,
    overlay: impl IntoIterator<Item = &'a Pixel>,
) -> MergedPixels {
    let mut merged = MergedPixels::new();
    for pixel in remote {
        merged.insert(pixel.key(), pixel.clone());
    }
    for pixel in overlay {
        merged.insert(pixel.key(), pixel.clone());
    }
    merged
}

/// Non-background pixels inside `bounds` expanded by a one-cell margin.
pub fn visible_pixels(merged: &MergedPixels, bounds: CellBounds) -> Vec<&Pixel> {
    let bounds = bounds.expand(1);
    merged
        .values()
        .filter(|p| !p.is_background() && bounds.contains(p.key()))
        .collect()
}

/// The remote half of the merged view.
///
/// Only the sync subscriber replaces the snapshot; the overlay half lives in
/// the write buffer.
#[derive(Debug, Clone, Default)]
pub struct PixelStore {
    remote: HashMap<CellKey, Pixel>,
    /// Bumped on every snapshot so renderers can detect changes.
    revision: u64,
}

impl PixelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the remote snapshot. Every notification is a complete
    /// collection, never a delta.
    pub fn apply_snapshot(&mut self, pixels: Vec<Pixel>) {
        self.remote = pixels.into_iter().map(|p| (p.key(), p)).collect();
        self.revision += 1;
    }

    pub fn remote(&self) -> impl Iterator<Item = &Pixel> {
        self.remote.values()
    }

    pub fn get_remote(&self, key: CellKey) -> Option<&Pixel> {
        self.remote.get(&key)
    }

    pub fn remote_len(&self) -> usize {
        self.remote.len()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Merge the remote snapshot with an overlay.
    pub fn merged<'a>(&'a self, overlay: impl IntoIterator<Item = &'a Pixel>) -> MergedPixels {
        merge(self.remote.values(), overlay)
    }

    /// Count of painted (non-background) remote pixels.
    pub fn painted_count(&self) -> usize {
        self.remote.values().filter(|p| !p.is_background()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::BACKGROUND_INDEX;

    fn px(x: i32, y: i32, color: u8) -> Pixel {
        Pixel::new(CellKey::new(x, y), color, "tester", 0)
    }

    fn everything() -> CellBounds {
        CellBounds {
            min: CellKey::new(-100, -100),
            max: CellKey::new(100, 100),
        }
    }

    #[test]
    fn test_merge_overlay_wins() {
        let remote = vec![px(3, 3, 5), px(1, 1, 2)];
        let overlay = vec![px(3, 3, 9)];
        let merged = merge(&remote, &overlay);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[&CellKey::new(3, 3)].color, 9);
        assert_eq!(merged[&CellKey::new(1, 1)].color, 2);
    }

    #[test]
    fn test_background_excluded_from_both_sources() {
        let remote = vec![px(0, 0, BACKGROUND_INDEX), px(1, 0, 4)];
        let overlay = vec![px(2, 0, BACKGROUND_INDEX)];
        let merged = merge(&remote, &overlay);
        let visible = visible_pixels(&merged, everything());
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].key(), CellKey::new(1, 0));
    }

    #[test]
    fn test_overlay_erase_hides_remote() {
        let remote = vec![px(2, 2, 7)];
        let overlay = vec![px(2, 2, BACKGROUND_INDEX)];
        let merged = merge(&remote, &overlay);
        assert!(visible_pixels(&merged, everything()).is_empty());
    }

    #[test]
    fn test_visible_pixels_respects_bounds_with_margin() {
        let remote = vec![px(-1, 0, 1), px(-2, 0, 1), px(11, 5, 1), px(12, 5, 1)];
        let merged = merge(&remote, std::iter::empty());
        let bounds = CellBounds {
            min: CellKey::new(0, 0),
            max: CellKey::new(10, 10),
        };
        let mut keys: Vec<_> = visible_pixels(&merged, bounds).iter().map(|p| p.key()).collect();
        keys.sort();
        assert_eq!(keys, vec![CellKey::new(-1, 0), CellKey::new(11, 5)]);
    }

    #[test]
    fn test_apply_snapshot_replaces() {
        let mut store = PixelStore::new();
        store.apply_snapshot(vec![px(0, 0, 1), px(1, 1, 1)]);
        assert_eq!(store.remote_len(), 2);
        store.apply_snapshot(vec![px(5, 5, 1)]);
        assert_eq!(store.remote_len(), 1);
        assert!(store.get_remote(CellKey::new(0, 0)).is_none());
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_painted_count_skips_background() {
        let mut store = PixelStore::new();
        store.apply_snapshot(vec![px(0, 0, 1), px(1, 1, BACKGROUND_INDEX)]);
        assert_eq!(store.painted_count(), 1);
    }
}
