//! Core library for the Termtone terminal front end.
//!
//! A glyph atlas maps symbols to texture slots, a cell grid sized from the
//! atlas metrics and the viewport holds what is on screen, and a frame
//! scheduler repaints only the cells that changed. Alongside, a procedural
//! audio engine plays short synthesized cues on a single output device.
//! Every platform dependency (time, animation callbacks, drawing, audio)
//! sits behind a trait with a headless implementation.

pub mod analysis;
pub mod atlas;
pub mod audio;
pub mod config;
pub mod debug;
pub mod error;
pub mod frame;
pub mod grid;
pub mod input;
pub mod persist;
pub mod render;
pub mod session;
pub mod timeline;

pub use analysis::{SignalAnalyzer, SignalReport};
pub use atlas::{FontMetrics, Glyph, GlyphAtlas, GlyphId};
pub use audio::{
    AudioDeviceState, AudioEngine, AudioOutput, Cue, CueOutcome, PlayOutcome, SoftwareOutput,
    ToneEnvelope, VoicePolicy, Waveform,
};
pub use config::{AppConfig, AtlasConfig, AudioConfig, DisplayConfig, FrameConfig};
pub use debug::{DebugFacade, DebugReport};
pub use error::{Result, TermToneError};
pub use frame::{FrameHost, FrameScheduler, FrameStats, FrameToken, ManualFrameHost};
pub use grid::{Cell, CellStyle, Rgb, StyleFlags, TerminalGrid};
pub use input::{InputLog, KeyEvent};
pub use persist::{FileStore, KeyValueStore, MemoryStore};
pub use render::{RecordingSurface, Surface, TextSurface};
pub use session::{FrameTick, Session};
pub use timeline::{Clock, ManualClock, MonotonicClock, SharedClock};
