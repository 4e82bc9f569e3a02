use common::{ChunkCoord, GridLayout};
use serde::Serialize;

/// Inclusive rectangle of chunk coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkRange {
    pub row_min: u32,
    pub row_max: u32,
    pub col_min: u32,
    pub col_max: u32,
}

impl ChunkRange {
    pub fn new(row_min: u32, row_max: u32, col_min: u32, col_max: u32) -> Self {
        Self {
            row_min,
            row_max,
            col_min,
            col_max,
        }
    }

    pub fn contains(&self, coord: ChunkCoord) -> bool {
        coord.row >= self.row_min
            && coord.row <= self.row_max
            && coord.col >= self.col_min
            && coord.col <= self.col_max
    }

    pub fn chunk_count(&self) -> usize {
        (self.row_max - self.row_min + 1) as usize * (self.col_max - self.col_min + 1) as usize
    }

    /// Row-major walk over the range.
    pub fn iter(&self) -> impl Iterator<Item = ChunkCoord> + '_ {
        (self.row_min..=self.row_max)
            .flat_map(move |row| (self.col_min..=self.col_max).map(move |col| ChunkCoord::new(row, col)))
    }
}

/// Pan offset, zoom and screen size. Screen = world * scale + pan.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Viewport {
    pub pan_x: f64,
    pub pan_y: f64,
    pub scale: f64,
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64, scale: f64) -> Self {
        Self {
            pan_x: 0.0,
            pan_y: 0.0,
            scale,
            width,
            height,
        }
    }

    pub fn screen_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.pan_x) / self.scale, (y - self.pan_y) / self.scale)
    }

    pub fn world_to_screen(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale + self.pan_x, y * self.scale + self.pan_y)
    }

    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        self.pan_x += dx;
        self.pan_y += dy;
    }

    /// Multiply the scale by `factor`, clamped to `[min, max]`, keeping the world
    /// point under (mouse_x, mouse_y) fixed on screen. Returns whether the scale
    /// changed.
    pub fn zoom_at(&mut self, mouse_x: f64, mouse_y: f64, factor: f64, min: f64, max: f64) -> bool {
        let new_scale = (self.scale * factor).clamp(min, max);
        if new_scale == self.scale {
            return false;
        }
        let (world_x, world_y) = self.screen_to_world(mouse_x, mouse_y);
        self.scale = new_scale;
        self.pan_x = mouse_x - world_x * new_scale;
        self.pan_y = mouse_y - world_y * new_scale;
        true
    }

    /// Put the world point (x, y) in the middle of the screen.
    pub fn center_on(&mut self, world_x: f64, world_y: f64) {
        self.pan_x = self.width / 2.0 - world_x * self.scale;
        self.pan_y = self.height / 2.0 - world_y * self.scale;
    }

    /// Chunks overlapping the screen grown by `buffer_chunks` chunk widths on
    /// every side, clamped to the chunk grid. `None` when nothing of the grid
    /// is in range.
    pub fn visible_chunks(&self, layout: &GridLayout, buffer_chunks: u32) -> Option<ChunkRange> {
        let chunk_px = layout.chunk_pixel_size();
        if self.scale <= 0.0 || chunk_px <= 0.0 || self.width <= 0.0 || self.height <= 0.0 {
            return None;
        }
        let margin = buffer_chunks as f64 * chunk_px;
        let (left, top) = self.screen_to_world(0.0, 0.0);
        let (right, bottom) = self.screen_to_world(self.width, self.height);

        let first = |edge: f64| ((edge - margin) / chunk_px).floor() as i64;
        let last = |edge: f64| ((edge + margin) / chunk_px).ceil() as i64 - 1;

        let rows = layout.chunk_rows() as i64;
        let cols = layout.chunk_cols() as i64;
        let row_min = first(top).max(0);
        let row_max = last(bottom).min(rows - 1);
        let col_min = first(left).max(0);
        let col_max = last(right).min(cols - 1);

        if row_min > row_max || col_min > col_max {
            return None;
        }
        Some(ChunkRange::new(
            row_min as u32,
            row_max as u32,
            col_min as u32,
            col_max as u32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> GridLayout {
        GridLayout::new(100, 10, 10.0, 10_000)
    }

    #[test]
    fn test_zoom_keeps_cursor_point_fixed() {
        let mut viewport = Viewport::new(800.0, 600.0, 1.0);
        viewport.pan_by(-120.0, 40.0);
        let before = viewport.screen_to_world(300.0, 200.0);

        assert!(viewport.zoom_at(300.0, 200.0, 1.1, 0.1, 4.0));
        let after = viewport.screen_to_world(300.0, 200.0);
        assert!((before.0 - after.0).abs() < 1e-9);
        assert!((before.1 - after.1).abs() < 1e-9);
        assert!((viewport.scale - 1.1).abs() < 1e-12);
    }

    #[test]
    fn test_zoom_clamps() {
        let mut viewport = Viewport::new(800.0, 600.0, 3.9);
        assert!(viewport.zoom_at(0.0, 0.0, 1.1, 0.1, 4.0));
        assert_eq!(viewport.scale, 4.0);
        assert!(!viewport.zoom_at(0.0, 0.0, 1.1, 0.1, 4.0));
    }

    #[test]
    fn test_visible_chunks_with_buffer() {
        // A 1000x20 strip showing cell rows 45..46 (ids 4,500..4,699).
        let mut viewport = Viewport::new(1_000.0, 20.0, 1.0);
        viewport.pan_by(0.0, -450.0);
        let range = viewport.visible_chunks(&layout(), 2).unwrap();
        assert_eq!(range, ChunkRange::new(2, 6, 0, 9));

        let tight = viewport.visible_chunks(&layout(), 0).unwrap();
        assert_eq!(tight, ChunkRange::new(4, 4, 0, 9));
        assert_eq!(tight.chunk_count(), 10);
    }

    #[test]
    fn test_visible_chunks_clamped_and_empty() {
        let viewport = Viewport::new(250.0, 150.0, 1.0);
        assert_eq!(
            viewport.visible_chunks(&layout(), 2),
            Some(ChunkRange::new(0, 3, 0, 4))
        );

        let mut away = Viewport::new(100.0, 100.0, 1.0);
        away.pan_by(5_000.0, 5_000.0);
        assert_eq!(away.visible_chunks(&layout(), 2), None);
    }

    #[test]
    fn test_range_iter_row_major() {
        let range = ChunkRange::new(1, 2, 3, 4);
        let coords: Vec<ChunkCoord> = range.iter().collect();
        assert_eq!(
            coords,
            vec![
                ChunkCoord::new(1, 3),
                ChunkCoord::new(1, 4),
                ChunkCoord::new(2, 3),
                ChunkCoord::new(2, 4),
            ]
        );
        assert!(range.contains(ChunkCoord::new(2, 4)));
        assert!(!range.contains(ChunkCoord::new(0, 4)));
    }
}
