use std::fmt;
use std::io;

/// Error type for the emulator.
#[derive(Debug)]
pub enum EmuError {
    /// An OS call failed. `context` says what we were doing at the time.
    Io { context: String, source: io::Error },
    /// A transfer call moved zero bytes before the sector was complete.
    ShortTransfer { sector: u64, done: usize },
    /// The sector index does not translate to a byte offset.
    SectorOutOfRange(u64),
    /// A payload reference doesn't fit inside the buffer window.
    BadPayload { offset: usize, len: usize, window: usize },
    /// The hardware published a queue layout we can't use.
    BadQueue(String),
}

impl EmuError {
    /// Convenient creation of an IO error with context.
    pub fn io<S>(context: S, source: io::Error) -> Self
        where S: Into<String>
    {
        EmuError::Io { context: context.into(), source }
    }

    /// Wrap an IO error with context, for use with `map_err`.
    pub fn with_context<S>(context: S) -> impl FnOnce(io::Error) -> Self
        where S: Into<String>
    {
        move |source| EmuError::io(context, source)
    }
}

impl fmt::Display for EmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmuError::Io { context, source } => write!(f, "{}: {}", context, source),
            EmuError::ShortTransfer { sector, done } => write!(
                f, "transfer of sector {} stopped after {} bytes", sector, done),
            EmuError::SectorOutOfRange(sector) => write!(
                f, "sector {} is beyond the addressable range", sector),
            EmuError::BadPayload { offset, len, window } => write!(
                f, "payload {:#x}+{:#x} does not fit the {:#x} byte buffer window",
                offset, len, window),
            EmuError::BadQueue(msg) => write!(f, "unusable command queue: {}", msg),
        }
    }
}

impl std::error::Error for EmuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EmuError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias.
pub type EmuResult<T> = Result<T, EmuError>;
