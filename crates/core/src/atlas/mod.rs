//! Fixed glyph table with symbol/id lookups in both directions.
//!
//! A miss is an ordinary outcome: callers get `None` and the symbol is
//! appended to a deduplicated miss log that diagnostics can read as often as
//! they like.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{config::AtlasConfig, Result, TermToneError};

/// Dense, zero-based glyph index.
///
/// `u16::MAX` is reserved and never handed out, so an atlas holds at most
/// 65 535 glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlyphId(pub u16);

impl GlyphId {
    const RESERVED: u16 = u16::MAX;

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One atlas slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glyph {
    pub id: GlyphId,
    pub symbol: char,
}

/// Natural size of one glyph cell at a pixel ratio of 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FontMetrics {
    pub advance_width: f32,
    pub line_height: f32,
}

#[derive(Debug, Clone, Default)]
struct MissLog {
    order: Vec<char>,
    seen: HashSet<char>,
}

impl MissLog {
    fn record(&mut self, symbol: char) -> bool {
        if self.seen.insert(symbol) {
            self.order.push(symbol);
            true
        } else {
            false
        }
    }

    fn clear(&mut self) {
        self.order.clear();
        self.seen.clear();
    }
}

#[derive(Debug, Clone)]
pub struct GlyphAtlas {
    symbols: Vec<char>,
    ids: HashMap<char, GlyphId>,
    metrics: FontMetrics,
    fallback: GlyphId,
    blank: GlyphId,
    misses: MissLog,
}

impl GlyphAtlas {
    /// Builds the atlas described by `config`.
    pub fn from_config(config: &AtlasConfig) -> Result<Self> {
        let metrics = FontMetrics {
            advance_width: config.advance_width,
            line_height: config.line_height,
        };
        let symbols: Vec<char> = config.symbols.chars().collect();
        Self::build(symbols, metrics, config.fallback, config.blank)
    }

    /// Builds an atlas from an explicit glyph table. The first symbol doubles
    /// as both fallback and blank glyph.
    pub fn from_symbols<I>(symbols: I, metrics: FontMetrics) -> Result<Self>
    where
        I: IntoIterator<Item = char>,
    {
        let symbols: Vec<char> = symbols.into_iter().collect();
        let first = *symbols
            .first()
            .ok_or_else(|| TermToneError::InvalidAtlas("glyph table is empty".into()))?;
        Self::build(symbols, metrics, first, first)
    }

    fn build(
        symbols: Vec<char>,
        metrics: FontMetrics,
        fallback: char,
        blank: char,
    ) -> Result<Self> {
        if symbols.is_empty() {
            return Err(TermToneError::InvalidAtlas("glyph table is empty".into()));
        }
        if symbols.len() > GlyphId::RESERVED as usize {
            return Err(TermToneError::InvalidAtlas(format!(
                "{} glyphs exceed the {} slot limit",
                symbols.len(),
                GlyphId::RESERVED
            )));
        }
        if !(metrics.advance_width > 0.0 && metrics.line_height > 0.0) {
            return Err(TermToneError::InvalidAtlas("font metrics must be positive".into()));
        }

        let mut ids = HashMap::with_capacity(symbols.len());
        for (index, symbol) in symbols.iter().enumerate() {
            if ids.insert(*symbol, GlyphId(index as u16)).is_some() {
                return Err(TermToneError::InvalidAtlas(format!(
                    "symbol {symbol:?} appears more than once"
                )));
            }
        }

        let required = |symbol: char, role: &str| {
            ids.get(&symbol).copied().ok_or_else(|| {
                TermToneError::InvalidAtlas(format!("{role} symbol {symbol:?} is not in the table"))
            })
        };
        let fallback = required(fallback, "fallback")?;
        let blank = required(blank, "blank")?;

        tracing::debug!(glyphs = symbols.len(), "built glyph atlas");

        Ok(Self {
            symbols,
            ids,
            metrics,
            fallback,
            blank,
            misses: MissLog::default(),
        })
    }

    pub fn glyph_count(&self) -> usize {
        self.symbols.len()
    }

    pub fn metrics(&self) -> FontMetrics {
        self.metrics
    }

    pub fn fallback_glyph(&self) -> GlyphId {
        self.fallback
    }

    pub fn blank_glyph(&self) -> GlyphId {
        self.blank
    }

    /// Looks a symbol up without touching the miss log.
    pub fn glyph_id(&self, symbol: char) -> Option<GlyphId> {
        self.ids.get(&symbol).copied()
    }

    /// Looks a symbol up, recording it in the miss log when absent.
    pub fn lookup_glyph(&mut self, symbol: char) -> Option<GlyphId> {
        let found = self.glyph_id(symbol);
        if found.is_none() {
            self.record_miss(symbol);
        }
        found
    }

    /// Returns the symbol stored at `id`, or `None` for ids outside the table.
    pub fn lookup_symbol(&self, id: GlyphId) -> Option<char> {
        self.symbols.get(id.index()).copied()
    }

    /// Like [`lookup_glyph`](Self::lookup_glyph) but substitutes the fallback
    /// glyph on a miss.
    pub fn resolve(&mut self, symbol: char) -> GlyphId {
        self.lookup_glyph(symbol).unwrap_or(self.fallback)
    }

    pub fn record_miss(&mut self, symbol: char) {
        if self.misses.record(symbol) {
            tracing::warn!(?symbol, "glyph missing from atlas");
        }
    }

    /// Misses in first-seen order. Reading does not clear the log.
    pub fn drain_misses(&self) -> Vec<char> {
        self.misses.order.clone()
    }

    pub fn clear_misses(&mut self) {
        self.misses.clear();
    }

    /// Every glyph in id order.
    pub fn entries(&self) -> impl Iterator<Item = Glyph> + '_ {
        self.symbols.iter().enumerate().map(|(index, symbol)| Glyph {
            id: GlyphId(index as u16),
            symbol: *symbol,
        })
    }
}
