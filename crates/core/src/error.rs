/// Result alias that carries the custom [`TermToneError`] type.
pub type Result<T> = std::result::Result<T, TermToneError>;

/// Common error type for the core crate.
///
/// Lookup misses are not represented here: the atlas reports them as `None`
/// and the grid substitutes the fallback glyph.
#[derive(Debug, thiserror::Error)]
pub enum TermToneError {
    /// A cell write addressed a position outside the current grid.
    #[error("cell ({col}, {row}) is outside the {cols}x{rows} grid")]
    OutOfBounds {
        col: u16,
        row: u16,
        cols: u16,
        rows: u16,
    },
    /// A tone request was rejected before any device call was made.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
    /// The audio device has been closed and cannot be used again.
    #[error("audio device is closed")]
    DeviceClosed,
    /// The audio device is waiting for a user gesture before it may run.
    #[error("audio device is suspended")]
    DeviceSuspended,
    /// The glyph table could not be turned into an atlas.
    #[error("invalid atlas: {0}")]
    InvalidAtlas(String),
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl TermToneError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    pub(crate) fn envelope<T: Into<String>>(reason: T) -> Self {
        Self::InvalidEnvelope(reason.into())
    }
}

impl From<&str> for TermToneError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for TermToneError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
