use serde::{Deserialize, Serialize};

use crate::{
    atlas::GlyphId,
    grid::{CanvasSize, CellMetrics, Rgb, StyleFlags, TerminalDimensions},
    Result,
};

/// Geometry of the frame about to be painted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameInfo {
    pub number: u64,
    pub dims: TerminalDimensions,
    pub metrics: CellMetrics,
    pub canvas: CanvasSize,
    /// Set when every cell is drawn rather than only the changed ones.
    pub full_repaint: bool,
}

/// One draw command: a cell with its pixel origin and resolved symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawCell {
    pub col: u16,
    pub row: u16,
    pub x: u32,
    pub y: u32,
    pub glyph: GlyphId,
    pub symbol: char,
    pub foreground: Rgb,
    pub background: Rgb,
    pub flags: StyleFlags,
}

/// Rendering backend abstraction the frame scheduler paints into.
pub trait Surface {
    fn begin_frame(&mut self, frame: &FrameInfo) -> Result<()>;
    fn draw_cell(&mut self, cell: &DrawCell) -> Result<()>;
    fn end_frame(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedFrame {
    pub info: FrameInfo,
    pub cells: Vec<DrawCell>,
}

/// Keeps every frame and draw command it receives.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    frames: Vec<RecordedFrame>,
    open: Option<RecordedFrame>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> &[RecordedFrame] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&RecordedFrame> {
        self.frames.last()
    }
}

impl Surface for RecordingSurface {
    fn begin_frame(&mut self, frame: &FrameInfo) -> Result<()> {
        self.open = Some(RecordedFrame {
            info: *frame,
            cells: Vec::new(),
        });
        Ok(())
    }

    fn draw_cell(&mut self, cell: &DrawCell) -> Result<()> {
        match self.open.as_mut() {
            Some(frame) => {
                frame.cells.push(*cell);
                Ok(())
            }
            None => Err("draw_cell called outside of a frame".into()),
        }
    }

    fn end_frame(&mut self) -> Result<()> {
        let frame = self
            .open
            .take()
            .ok_or("end_frame called without begin_frame")?;
        self.frames.push(frame);
        Ok(())
    }
}

/// Character buffer surface, handy for headless runs and the CLI demo.
#[derive(Debug, Default)]
pub struct TextSurface {
    cols: usize,
    rows: usize,
    chars: Vec<char>,
}

impl TextSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    /// The buffer as newline separated rows with trailing blanks trimmed.
    pub fn contents(&self) -> String {
        if self.cols == 0 {
            return String::new();
        }
        self.chars
            .chunks(self.cols)
            .map(|row| row.iter().collect::<String>().trim_end().to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Surface for TextSurface {
    fn begin_frame(&mut self, frame: &FrameInfo) -> Result<()> {
        let cols = frame.dims.cols as usize;
        let rows = frame.dims.rows as usize;
        if frame.full_repaint || (cols, rows) != (self.cols, self.rows) {
            self.cols = cols;
            self.rows = rows;
            self.chars = vec![' '; cols * rows];
        }
        Ok(())
    }

    fn draw_cell(&mut self, cell: &DrawCell) -> Result<()> {
        let index = cell.row as usize * self.cols + cell.col as usize;
        let slot = self
            .chars
            .get_mut(index)
            .ok_or("draw_cell outside of the text buffer")?;
        *slot = cell.symbol;
        Ok(())
    }

    fn end_frame(&mut self) -> Result<()> {
        Ok(())
    }
}
