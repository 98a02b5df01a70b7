use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{grid::Rgb, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub atlas: AtlasConfig,
    pub display: DisplayConfig,
    pub frame: FrameConfig,
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Missing sections and fields fall back
    /// to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        tracing::debug!(?path, "loaded configuration");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Glyph table and font metrics the atlas is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Every symbol the atlas holds, in glyph id order.
    pub symbols: String,
    /// Natural advance width of one glyph at a pixel ratio of 1.0.
    pub advance_width: f32,
    /// Line height at a pixel ratio of 1.0.
    pub line_height: f32,
    /// Substituted for symbols the atlas does not contain.
    pub fallback: char,
    /// Fills cells that have never been written.
    pub blank: char,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        let mut symbols: String = (' '..='~').collect();
        symbols.push_str("─│┌┐└┘├┤┬┴┼═║╔╗╚╝");
        symbols.push_str("█▀▄▌▐░▒▓");
        symbols.push_str("·•…←↑→↓");
        symbols.push('\u{FFFD}');

        Self {
            symbols,
            advance_width: 10.0,
            line_height: 20.0,
            fallback: '\u{FFFD}',
            blank: ' ',
        }
    }
}

/// Initial display surface and default cell colours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_ratio: f32,
    pub foreground: Rgb,
    pub background: Rgb,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            pixel_ratio: 1.0,
            foreground: Rgb(0xD0D0D0),
            background: Rgb(0x000000),
        }
    }
}

/// Logic tick pacing relative to the frame loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub tick_rate_hz: u32,
    /// Upper bound on catch-up ticks run for a single frame.
    pub max_ticks_per_frame: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            max_ticks_per_frame: 5,
        }
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Linear slider position in `[0, 1]`; the engine applies its own curve.
    pub volume: f32,
    /// Minimum spacing between two cues, in milliseconds.
    pub min_gap_ms: Option<u64>,
    /// Maximum number of simultaneously sounding voices.
    pub max_voices: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            volume: 0.8,
            min_gap_ms: Some(60),
            max_voices: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_atlas_contains_fallback_and_blank() {
        let atlas = AtlasConfig::default();
        assert!(atlas.symbols.contains(atlas.fallback));
        assert!(atlas.symbols.contains(atlas.blank));
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "display": { "width": 1024 } }"#).unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.display.width, 1024);
        assert_eq!(config.display.height, 600);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = AppConfig::default();
        config.audio.max_voices = Some(4);
        config.save(&path).unwrap();

        assert_eq!(AppConfig::load(&path).unwrap(), config);
    }
}
