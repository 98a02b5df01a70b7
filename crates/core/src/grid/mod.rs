use std::cmp::min;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    atlas::{GlyphAtlas, GlyphId},
    config::DisplayConfig,
    Result, TermToneError,
};

/// Packed `0xRRGGBB` colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rgb(pub u32);

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct StyleFlags: u8 {
        const BOLD      = 1 << 0;
        const ITALIC    = 1 << 1;
        const UNDERLINE = 1 << 2;
        const INVERSE   = 1 << 3;
        const DIM       = 1 << 4;
        const BLINK     = 1 << 5;
    }
}

/// Colours and flags applied to a written cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellStyle {
    pub foreground: Rgb,
    pub background: Rgb,
    pub flags: StyleFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub glyph: GlyphId,
    pub foreground: Rgb,
    pub background: Rgb,
    pub flags: StyleFlags,
}

impl Cell {
    fn blank(glyph: GlyphId, style: CellStyle) -> Self {
        Self {
            glyph,
            foreground: style.foreground,
            background: style.background,
            flags: StyleFlags::empty(),
        }
    }
}

/// Size of one cell in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalDimensions {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalDimensions {
    pub fn cell_count(&self) -> usize {
        self.cols as usize * self.rows as usize
    }
}

/// Painted area in device pixels; always a whole number of cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

/// Display surface as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
}

impl Viewport {
    pub fn new(width: u32, height: u32, pixel_ratio: f32) -> Self {
        Self {
            width,
            height,
            pixel_ratio,
        }
    }

    fn effective_ratio(&self) -> f32 {
        if self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0 {
            self.pixel_ratio
        } else {
            1.0
        }
    }
}

/// Scales the atlas metrics to device pixels, never below one pixel.
pub fn cell_metrics(atlas: &GlyphAtlas, pixel_ratio: f32) -> CellMetrics {
    let font = atlas.metrics();
    CellMetrics {
        width: ((font.advance_width * pixel_ratio).round() as u32).max(1),
        height: ((font.line_height * pixel_ratio).round() as u32).max(1),
    }
}

/// Upper bound on the number of cells a grid holds. Rows past the limit are
/// dropped from the bottom.
pub const MAX_CELLS: usize = 1 << 20;

/// Fits whole cells into the viewport. A viewport smaller than one cell still
/// yields a single cell, and the total never exceeds [`MAX_CELLS`].
pub fn layout(
    viewport_width: u32,
    viewport_height: u32,
    cell: CellMetrics,
) -> (TerminalDimensions, CanvasSize) {
    let cols = (viewport_width / cell.width).clamp(1, u16::MAX as u32);
    let mut rows = (viewport_height / cell.height).clamp(1, u16::MAX as u32);
    let max_rows = (MAX_CELLS / cols as usize).max(1) as u32;
    if rows > max_rows {
        tracing::warn!(cols, rows, max_rows, "viewport exceeds the cell limit; clipping rows");
        rows = max_rows;
    }
    let dims = TerminalDimensions {
        cols: cols as u16,
        rows: rows as u16,
    };
    let canvas = CanvasSize {
        width: cols * cell.width,
        height: rows * cell.height,
    };
    (dims, canvas)
}

/// Cell buffer plus the sizing derived from the atlas and the viewport.
///
/// All writes go through `&mut self`, so a [`GridSnapshot`] taken between
/// writes can never observe a partially written cell.
#[derive(Debug)]
pub struct TerminalGrid {
    atlas: GlyphAtlas,
    viewport: Viewport,
    metrics: CellMetrics,
    dims: TerminalDimensions,
    canvas: CanvasSize,
    default_style: CellStyle,
    cells: Vec<Cell>,
    generation: u64,
}

impl TerminalGrid {
    pub fn new(atlas: GlyphAtlas, display: &DisplayConfig) -> Self {
        let default_style = CellStyle {
            foreground: display.foreground,
            background: display.background,
            flags: StyleFlags::empty(),
        };
        let viewport = Viewport::new(display.width, display.height, display.pixel_ratio);
        let metrics = cell_metrics(&atlas, viewport.effective_ratio());
        let (dims, canvas) = layout(viewport.width, viewport.height, metrics);
        let cells = vec![Cell::blank(atlas.blank_glyph(), default_style); dims.cell_count()];

        Self {
            atlas,
            viewport,
            metrics,
            dims,
            canvas,
            default_style,
            cells,
            generation: 0,
        }
    }

    pub fn atlas(&self) -> &GlyphAtlas {
        &self.atlas
    }

    pub fn atlas_mut(&mut self) -> &mut GlyphAtlas {
        &mut self.atlas
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn cell_metrics(&self) -> CellMetrics {
        self.metrics
    }

    pub fn dimensions(&self) -> TerminalDimensions {
        self.dims
    }

    pub fn canvas_size(&self) -> CanvasSize {
        self.canvas
    }

    pub fn default_style(&self) -> CellStyle {
        self.default_style
    }

    /// Bumped on every mutation; lets the frame scheduler skip idle frames.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Recomputes sizing and reallocates the buffer, keeping the top-left
    /// region that still fits.
    pub fn resize(&mut self, viewport_width: u32, viewport_height: u32, pixel_ratio: f32) {
        self.viewport = Viewport::new(viewport_width, viewport_height, pixel_ratio);
        self.metrics = cell_metrics(&self.atlas, self.viewport.effective_ratio());
        let (dims, canvas) = layout(viewport_width, viewport_height, self.metrics);
        self.canvas = canvas;

        tracing::debug!(
            viewport_width,
            viewport_height,
            pixel_ratio,
            cols = dims.cols,
            rows = dims.rows,
            "resized terminal grid"
        );

        if dims != self.dims {
            self.cells = self.resize_cells(self.dims, dims);
            self.dims = dims;
        }
        self.generation += 1;
    }

    fn resize_cells(&self, old: TerminalDimensions, new: TerminalDimensions) -> Vec<Cell> {
        let empty = Cell::blank(self.atlas.blank_glyph(), self.default_style);
        let mut cells = vec![empty; new.cell_count()];

        for y in 0..min(old.rows, new.rows) as usize {
            for x in 0..min(old.cols, new.cols) as usize {
                cells[y * new.cols as usize + x] = self.cells[y * old.cols as usize + x];
            }
        }
        cells
    }

    fn index_of(&self, col: u16, row: u16) -> Result<usize> {
        if col >= self.dims.cols || row >= self.dims.rows {
            return Err(TermToneError::OutOfBounds {
                col,
                row,
                cols: self.dims.cols,
                rows: self.dims.rows,
            });
        }
        Ok(row as usize * self.dims.cols as usize + col as usize)
    }

    /// Overwrites one cell. Glyph ids outside the atlas are replaced by the
    /// fallback glyph.
    pub fn set_cell(
        &mut self,
        col: u16,
        row: u16,
        glyph: GlyphId,
        foreground: Rgb,
        background: Rgb,
        flags: StyleFlags,
    ) -> Result<()> {
        let index = self.index_of(col, row)?;
        let glyph = if self.atlas.lookup_symbol(glyph).is_some() {
            glyph
        } else {
            self.atlas.fallback_glyph()
        };

        self.cells[index] = Cell {
            glyph,
            foreground,
            background,
            flags,
        };
        self.generation += 1;
        Ok(())
    }

    /// Writes a character, resolving it through the atlas.
    pub fn put_char(&mut self, col: u16, row: u16, symbol: char, style: CellStyle) -> Result<()> {
        self.index_of(col, row)?;
        let glyph = self.atlas.resolve(symbol);
        self.set_cell(col, row, glyph, style.foreground, style.background, style.flags)
    }

    /// Writes `text` left to right starting at `(col, row)`, clipped at the
    /// right edge. Returns the number of cells written.
    pub fn write_str(&mut self, col: u16, row: u16, text: &str, style: CellStyle) -> Result<usize> {
        self.index_of(col, row)?;
        let available = (self.dims.cols - col) as usize;
        let mut written = 0;
        for (offset, symbol) in text.chars().take(available).enumerate() {
            self.put_char(col + offset as u16, row, symbol, style)?;
            written += 1;
        }
        Ok(written)
    }

    pub fn cell(&self, col: u16, row: u16) -> Option<Cell> {
        self.index_of(col, row).ok().map(|index| self.cells[index])
    }

    pub fn clear(&mut self) {
        let empty = Cell::blank(self.atlas.blank_glyph(), self.default_style);
        self.cells.fill(empty);
        self.generation += 1;
    }

    /// Swaps in a new atlas, carrying existing cells over by symbol.
    pub fn replace_atlas(&mut self, atlas: GlyphAtlas) {
        let old = std::mem::replace(&mut self.atlas, atlas);
        for cell in &mut self.cells {
            cell.glyph = match old.lookup_symbol(cell.glyph) {
                Some(symbol) => self.atlas.resolve(symbol),
                None => self.atlas.fallback_glyph(),
            };
        }
        tracing::debug!(glyphs = self.atlas.glyph_count(), "replaced glyph atlas");

        let viewport = self.viewport;
        self.resize(viewport.width, viewport.height, viewport.pixel_ratio);
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            dims: self.dims,
            metrics: self.metrics,
            canvas: self.canvas,
            generation: self.generation,
            cells: self.cells.clone(),
        }
    }
}

/// Owned copy of the grid state at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSnapshot {
    pub dims: TerminalDimensions,
    pub metrics: CellMetrics,
    pub canvas: CanvasSize,
    pub generation: u64,
    cells: Vec<Cell>,
}

impl GridSnapshot {
    pub fn cell(&self, col: u16, row: u16) -> Option<&Cell> {
        if col >= self.dims.cols || row >= self.dims.rows {
            return None;
        }
        self.cells
            .get(row as usize * self.dims.cols as usize + col as usize)
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    /// Iterates `(col, row, cell)` in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16, &Cell)> + '_ {
        let cols = self.dims.cols as usize;
        self.cells
            .iter()
            .enumerate()
            .map(move |(index, cell)| ((index % cols) as u16, (index / cols) as u16, cell))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{atlas::FontMetrics, config::AtlasConfig};

    fn grid(width: u32, height: u32) -> TerminalGrid {
        let atlas = GlyphAtlas::from_config(&AtlasConfig::default()).unwrap();
        let display = DisplayConfig {
            width,
            height,
            ..DisplayConfig::default()
        };
        TerminalGrid::new(atlas, &display)
    }

    fn style() -> CellStyle {
        CellStyle {
            foreground: Rgb(0xFFFFFF),
            background: Rgb(0x000000),
            flags: StyleFlags::BOLD,
        }
    }

    #[test]
    fn exact_viewport_fills_canvas() {
        let grid = grid(800, 600);
        assert_eq!(grid.cell_metrics(), CellMetrics { width: 10, height: 20 });
        assert_eq!(grid.dimensions(), TerminalDimensions { cols: 80, rows: 30 });
        assert_eq!(grid.canvas_size(), CanvasSize { width: 800, height: 600 });
    }

    #[test]
    fn trailing_pixels_are_left_unused() {
        let mut grid = grid(800, 600);
        grid.resize(805, 605, 1.0);
        assert_eq!(grid.dimensions(), TerminalDimensions { cols: 80, rows: 30 });
        assert_eq!(grid.canvas_size(), CanvasSize { width: 800, height: 600 });
    }

    #[test]
    fn pixel_ratio_scales_cells() {
        let mut grid = grid(800, 600);
        grid.resize(1600, 1200, 2.0);
        assert_eq!(grid.cell_metrics(), CellMetrics { width: 20, height: 40 });
        assert_eq!(grid.dimensions(), TerminalDimensions { cols: 80, rows: 30 });
    }

    #[test]
    fn zero_sized_viewport_keeps_one_cell() {
        let mut grid = grid(800, 600);
        grid.resize(0, 0, 1.0);
        assert_eq!(grid.dimensions(), TerminalDimensions { cols: 1, rows: 1 });
        assert_eq!(grid.canvas_size(), CanvasSize { width: 10, height: 20 });
    }

    #[test]
    fn bogus_pixel_ratio_is_treated_as_one() {
        let mut grid = grid(800, 600);
        grid.resize(800, 600, f32::NAN);
        assert_eq!(grid.cell_metrics(), CellMetrics { width: 10, height: 20 });
    }

    #[test]
    fn canvas_never_exceeds_viewport() {
        let mut grid = grid(800, 600);
        for (w, h) in [(10, 20), (11, 21), (333, 97), (1920, 1080), (12345, 678)] {
            for ratio in [1.0, 1.25, 1.5, 2.0] {
                grid.resize(w, h, ratio);
                let dims = grid.dimensions();
                let canvas = grid.canvas_size();
                let cell = grid.cell_metrics();
                assert!(dims.cols >= 1 && dims.rows >= 1);
                if w >= cell.width && h >= cell.height {
                    assert!(canvas.width <= w && canvas.height <= h, "{w}x{h}@{ratio}");
                }
                assert_eq!(canvas.width % cell.width, 0);
                assert_eq!(canvas.height % cell.height, 0);
            }
        }
    }

    #[test]
    fn huge_viewports_are_capped_at_the_cell_limit() {
        let (dims, canvas) = layout(u32::MAX, u32::MAX, CellMetrics { width: 10, height: 20 });
        assert_eq!(dims.cols, u16::MAX);
        assert!(dims.cell_count() <= MAX_CELLS);
        assert_eq!(canvas.height, dims.rows as u32 * 20);

        let mut grid = grid(800, 600);
        grid.resize(u32::MAX, u32::MAX, 1.0);
        assert!(grid.dimensions().cell_count() <= MAX_CELLS);
        assert_eq!(grid.snapshot().cells().len(), grid.dimensions().cell_count());
    }

    #[test]
    fn resize_preserves_top_left_content() {
        let mut grid = grid(100, 100);
        grid.put_char(0, 0, 'a', style()).unwrap();
        grid.put_char(9, 4, 'z', style()).unwrap();
        grid.put_char(2, 1, 'k', style()).unwrap();

        grid.resize(50, 40, 1.0);
        assert_eq!(grid.dimensions(), TerminalDimensions { cols: 5, rows: 2 });
        let at = |grid: &TerminalGrid, c: u16, r: u16| {
            atlas_symbol(grid, grid.cell(c, r).unwrap().glyph)
        };
        assert_eq!(at(&grid, 0, 0), 'a');
        assert_eq!(at(&grid, 2, 1), 'k');

        grid.resize(200, 200, 1.0);
        assert_eq!(at(&grid, 0, 0), 'a');
        assert_eq!(at(&grid, 2, 1), 'k');
        // The cell that was cropped away does not come back.
        assert_eq!(at(&grid, 9, 4), ' ');
        assert_eq!(grid.cell(15, 9).unwrap().background, grid.default_style().background);
    }

    fn atlas_symbol(grid: &TerminalGrid, glyph: GlyphId) -> char {
        grid.atlas().lookup_symbol(glyph).unwrap()
    }

    #[test]
    fn out_of_bounds_writes_are_rejected() {
        let mut grid = grid(800, 600);
        let glyph = grid.atlas().glyph_id('x').unwrap();
        let err = grid
            .set_cell(80, 0, glyph, Rgb(0), Rgb(0), StyleFlags::empty())
            .unwrap_err();
        assert!(matches!(
            err,
            TermToneError::OutOfBounds { col: 80, row: 0, cols: 80, rows: 30 }
        ));
        assert!(grid.put_char(0, 30, 'x', style()).is_err());
        assert!(grid.cell(0, 30).is_none());
    }

    #[test]
    fn unknown_glyph_ids_fall_back() {
        let mut grid = grid(800, 600);
        grid.set_cell(1, 1, GlyphId(60_000), Rgb(1), Rgb(2), StyleFlags::empty()).unwrap();
        assert_eq!(grid.cell(1, 1).unwrap().glyph, grid.atlas().fallback_glyph());
    }

    #[test]
    fn missing_symbols_render_fallback_and_are_logged() {
        let mut grid = grid(800, 600);
        grid.write_str(0, 0, "h\u{263A}\u{263A}", style()).unwrap();
        assert_eq!(grid.cell(1, 0).unwrap().glyph, grid.atlas().fallback_glyph());
        assert_eq!(grid.atlas().drain_misses(), vec!['\u{263A}']);
    }

    #[test]
    fn write_str_clips_at_right_edge() {
        let mut grid = grid(50, 20);
        let written = grid.write_str(3, 0, "abcdef", style()).unwrap();
        assert_eq!(written, 2);
        assert_eq!(atlas_symbol(&grid, grid.cell(4, 0).unwrap().glyph), 'b');
    }

    #[test]
    fn snapshots_are_detached_from_later_writes() {
        let mut grid = grid(100, 40);
        grid.put_char(0, 0, 'a', style()).unwrap();
        let before = grid.snapshot();
        grid.put_char(0, 0, 'b', style()).unwrap();

        let a = grid.atlas().glyph_id('a').unwrap();
        assert_eq!(before.cell(0, 0).unwrap().glyph, a);
        assert!(grid.snapshot().generation > before.generation);
        assert_eq!(before.iter().count(), before.dims.cell_count());
    }

    #[test]
    fn replacing_atlas_remaps_cells_by_symbol() {
        let mut grid = grid(100, 40);
        grid.write_str(0, 0, "ab", style()).unwrap();

        let metrics = FontMetrics {
            advance_width: 5.0,
            line_height: 10.0,
        };
        let smaller = GlyphAtlas::from_symbols(['?', 'b'], metrics).unwrap();
        grid.replace_atlas(smaller);

        assert_eq!(grid.dimensions(), TerminalDimensions { cols: 20, rows: 4 });
        assert_eq!(atlas_symbol(&grid, grid.cell(1, 0).unwrap().glyph), 'b');
        assert_eq!(atlas_symbol(&grid, grid.cell(0, 0).unwrap().glyph), '?');
        assert!(grid.atlas().drain_misses().contains(&'a'));
    }

    #[test]
    fn clear_resets_every_cell() {
        let mut grid = grid(100, 40);
        grid.write_str(0, 0, "abc", style()).unwrap();
        grid.clear();
        let blank = grid.atlas().blank_glyph();
        assert!(grid.snapshot().cells().iter().all(|cell| cell.glyph == blank));
    }
}
