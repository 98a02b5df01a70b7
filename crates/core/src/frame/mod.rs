//! Cooperative repaint loop.
//!
//! `request_frame` registers at most one callback with the host; when the host
//! fires it the grid is snapshotted and only the cells that changed since the
//! previous paint are drawn.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{
    grid::{GridSnapshot, TerminalGrid},
    render::{DrawCell, FrameInfo, Surface},
    timeline::SharedClock,
    Result,
};

/// Handle for one registered animation callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameToken(pub u64);

/// Platform side of the frame loop: hands out callback registrations and
/// takes them back.
pub trait FrameHost {
    fn schedule(&mut self) -> FrameToken;
    fn release(&mut self, token: FrameToken);
}

/// Host whose callbacks fire only when the owner drains them.
#[derive(Debug, Default)]
pub struct ManualFrameHost {
    next_token: u64,
    queued: VecDeque<FrameToken>,
}

impl ManualFrameHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands every registered callback to the caller, as the platform would
    /// at its next animation opportunity.
    pub fn take_ready(&mut self) -> Vec<FrameToken> {
        self.queued.drain(..).collect()
    }

    pub fn registrations(&self) -> usize {
        self.queued.len()
    }
}

impl FrameHost for ManualFrameHost {
    fn schedule(&mut self) -> FrameToken {
        self.next_token += 1;
        let token = FrameToken(self.next_token);
        self.queued.push_back(token);
        token
    }

    fn release(&mut self, token: FrameToken) {
        self.queued.retain(|queued| *queued != token);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameState {
    Idle,
    Scheduled,
    Painting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameStats {
    pub frames_painted: u64,
    pub cells_drawn_last_frame: usize,
    pub last_full_repaint: bool,
    /// Shared clock reading taken when the last paint started.
    pub last_paint_at: Option<f64>,
}

pub struct FrameScheduler<H: FrameHost> {
    host: H,
    clock: SharedClock,
    state: FrameState,
    pending: Option<FrameToken>,
    previous: Option<GridSnapshot>,
    stats: FrameStats,
}

impl<H: FrameHost> FrameScheduler<H> {
    pub fn new(host: H, clock: SharedClock) -> Self {
        Self {
            host,
            clock,
            state: FrameState::Idle,
            pending: None,
            previous: None,
            stats: FrameStats::default(),
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Asks for a paint at the next opportunity. Returns `false` when a
    /// frame is already pending; repeated requests coalesce into one paint.
    pub fn request_frame(&mut self) -> bool {
        if self.state != FrameState::Idle {
            return false;
        }
        let token = self.host.schedule();
        tracing::trace!(?token, "frame scheduled");
        self.pending = Some(token);
        self.state = FrameState::Scheduled;
        true
    }

    /// Drops any pending frame and gives its registration back to the host.
    /// A callback the host already dispatched becomes a no-op.
    pub fn cancel(&mut self) {
        if let Some(token) = self.pending.take() {
            self.host.release(token);
            tracing::trace!(?token, "frame cancelled");
        }
        self.state = FrameState::Idle;
    }

    /// Forces the next paint to redraw every cell.
    pub fn invalidate(&mut self) {
        self.previous = None;
    }

    /// Host callback entry point. Paints when `token` is the pending frame and
    /// returns `Ok(None)` for stale or cancelled callbacks.
    pub fn on_animation_frame(
        &mut self,
        token: FrameToken,
        grid: &TerminalGrid,
        surface: &mut dyn Surface,
    ) -> Result<Option<FrameStats>> {
        if self.state != FrameState::Scheduled || self.pending != Some(token) {
            tracing::trace!(?token, "ignoring stale frame callback");
            return Ok(None);
        }
        self.pending = None;
        self.state = FrameState::Painting;

        let outcome = self.paint(grid, surface);
        self.state = FrameState::Idle;

        match outcome {
            Ok(stats) => Ok(Some(stats)),
            Err(err) => {
                // The surface may hold a partial frame; redraw it all next time.
                self.previous = None;
                Err(err)
            }
        }
    }

    fn paint(&mut self, grid: &TerminalGrid, surface: &mut dyn Surface) -> Result<FrameStats> {
        let started_at = self.clock.now();
        let snapshot = grid.snapshot();
        let previous = self
            .previous
            .take()
            .filter(|prev| prev.dims == snapshot.dims && prev.metrics == snapshot.metrics);
        let full_repaint = previous.is_none();

        let info = FrameInfo {
            number: self.stats.frames_painted + 1,
            dims: snapshot.dims,
            metrics: snapshot.metrics,
            canvas: snapshot.canvas,
            full_repaint,
        };
        surface.begin_frame(&info)?;

        let atlas = grid.atlas();
        let fallback = atlas
            .lookup_symbol(atlas.fallback_glyph())
            .unwrap_or(char::REPLACEMENT_CHARACTER);
        let mut drawn = 0;

        let unchanged = previous
            .as_ref()
            .is_some_and(|prev| prev.generation == snapshot.generation);
        if !unchanged {
            for (col, row, cell) in snapshot.iter() {
                let dirty = previous
                    .as_ref()
                    .and_then(|prev| prev.cell(col, row))
                    .map_or(true, |old| old != cell);
                if !dirty {
                    continue;
                }

                surface.draw_cell(&DrawCell {
                    col,
                    row,
                    x: col as u32 * snapshot.metrics.width,
                    y: row as u32 * snapshot.metrics.height,
                    glyph: cell.glyph,
                    symbol: atlas.lookup_symbol(cell.glyph).unwrap_or(fallback),
                    foreground: cell.foreground,
                    background: cell.background,
                    flags: cell.flags,
                })?;
                drawn += 1;
            }
        }
        surface.end_frame()?;

        tracing::debug!(frame = info.number, drawn, full_repaint, "painted frame");

        self.stats = FrameStats {
            frames_painted: info.number,
            cells_drawn_last_frame: drawn,
            last_full_repaint: full_repaint,
            last_paint_at: Some(started_at),
        };
        self.previous = Some(snapshot);
        Ok(self.stats)
    }
}

impl<H: FrameHost> Drop for FrameScheduler<H> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<H: FrameHost + std::fmt::Debug> std::fmt::Debug for FrameScheduler<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("host", &self.host)
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("stats", &self.stats)
            .finish()
    }
}
