//! Read-only inspection surface used by diagnostics and automated tests.
//!
//! The facade only holds shared borrows and copies, so nothing reachable from
//! it can mutate the components it describes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    atlas::{Glyph, GlyphId},
    audio::{AudioDeviceState, AudioStatus},
    frame::{FrameState, FrameStats},
    grid::{CanvasSize, CellMetrics, TerminalDimensions, TerminalGrid, Viewport},
    input::{InputLog, KeyEvent},
    Result,
};

#[derive(Debug, Clone, Copy)]
pub struct DebugFacade<'a> {
    grid: &'a TerminalGrid,
    input: &'a InputLog,
    frame_state: FrameState,
    frame_stats: FrameStats,
    audio: AudioStatus,
}

impl<'a> DebugFacade<'a> {
    pub fn new(
        grid: &'a TerminalGrid,
        input: &'a InputLog,
        frame_state: FrameState,
        frame_stats: FrameStats,
        audio: AudioStatus,
    ) -> Self {
        Self {
            grid,
            input,
            frame_state,
            frame_stats,
            audio,
        }
    }

    pub fn glyph_count(&self) -> usize {
        self.grid.atlas().glyph_count()
    }

    /// Full symbol to id table.
    pub fn atlas_lookup(&self) -> BTreeMap<char, GlyphId> {
        self.grid
            .atlas()
            .entries()
            .map(|glyph| (glyph.symbol, glyph.id))
            .collect()
    }

    pub fn glyph_id(&self, symbol: char) -> Option<GlyphId> {
        self.grid.atlas().glyph_id(symbol)
    }

    /// Id of a symbol given as text. Anything other than exactly one code
    /// point has no glyph.
    pub fn base_glyph_id(&self, symbol: &str) -> Option<GlyphId> {
        let mut chars = symbol.chars();
        match (chars.next(), chars.next()) {
            (Some(only), None) => self.glyph_id(only),
            _ => None,
        }
    }

    pub fn symbol(&self, id: GlyphId) -> Option<char> {
        self.grid.atlas().lookup_symbol(id)
    }

    pub fn missing_glyphs(&self) -> Vec<char> {
        self.grid.atlas().drain_misses()
    }

    pub fn cell_size(&self) -> CellMetrics {
        self.grid.cell_metrics()
    }

    pub fn canvas_size(&self) -> CanvasSize {
        self.grid.canvas_size()
    }

    pub fn terminal_size(&self) -> TerminalDimensions {
        self.grid.dimensions()
    }

    pub fn viewport(&self) -> Viewport {
        self.grid.viewport()
    }

    pub fn frame_state(&self) -> FrameState {
        self.frame_state
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.frame_stats
    }

    pub fn audio_state(&self) -> AudioDeviceState {
        self.audio.state
    }

    pub fn audio(&self) -> AudioStatus {
        self.audio
    }

    pub fn last_key(&self) -> Option<KeyEvent> {
        self.input.last().cloned()
    }

    /// Owned snapshot of everything above.
    pub fn report(&self) -> DebugReport {
        DebugReport {
            glyph_count: self.glyph_count(),
            atlas: self.grid.atlas().entries().collect(),
            missing_glyphs: self.missing_glyphs(),
            cell_size: self.cell_size(),
            canvas_size: self.canvas_size(),
            terminal_size: self.terminal_size(),
            viewport: self.viewport(),
            frame_state: self.frame_state,
            frame_stats: self.frame_stats,
            audio: self.audio,
            last_key: self.last_key(),
            keys_recorded: self.input.total(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugReport {
    pub glyph_count: usize,
    pub atlas: Vec<Glyph>,
    pub missing_glyphs: Vec<char>,
    pub cell_size: CellMetrics,
    pub canvas_size: CanvasSize,
    pub terminal_size: TerminalDimensions,
    pub viewport: Viewport,
    pub frame_state: FrameState,
    pub frame_stats: FrameStats,
    pub audio: AudioStatus,
    pub last_key: Option<KeyEvent>,
    pub keys_recorded: u64,
}

impl DebugReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
