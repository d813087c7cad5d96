//! Error types for channel and runtime operations.
//!
//! Every fallible operation in the crate reports a single [`Error`] carrying
//! an [`ErrorKind`] plus optional context text. The kinds form a closed
//! taxonomy: callers are expected to match on [`Error::kind`] (or use the
//! predicate helpers) rather than parse messages.

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: storage already wired, send clause without a message.
    InvalidArgument,
    /// The calling task is being torn down; nothing was done.
    Cancelled,
    /// The handle does not name a live object.
    BadHandle,
    /// The handle names an object of a different type.
    NotSupported,
    /// The direction of travel has been poisoned, or the pair was destroyed
    /// while the operation was parked.
    BrokenPipe,
    /// Sender and receiver disagreed on the payload length; neither side
    /// transferred anything.
    SizeMismatch,
    /// The deadline elapsed before a rendezvous happened.
    TimedOut,
    /// Resource exhaustion: no free slot in the handle table.
    OutOfMemory,
}

impl ErrorKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::Cancelled => "cancelled",
            Self::BadHandle => "bad handle",
            Self::NotSupported => "not supported",
            Self::BrokenPipe => "broken pipe",
            Self::SizeMismatch => "size mismatch",
            Self::TimedOut => "timed out",
            Self::OutOfMemory => "out of memory",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error type for channel and runtime operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Returns true if this error reports task cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if this error reports an elapsed deadline.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    /// Returns true if this error reports a poisoned or destroyed channel.
    #[must_use]
    pub const fn is_broken_pipe(&self) -> bool {
        matches!(self.kind, ErrorKind::BrokenPipe)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::new(ErrorKind::BadHandle).with_context("h3 was closed");
        assert_eq!(err.to_string(), "bad handle: h3 was closed");
    }

    #[test]
    fn display_without_context() {
        assert_eq!(Error::new(ErrorKind::TimedOut).to_string(), "timed out");
    }

    #[test]
    fn predicates_match_kind() {
        assert!(Error::new(ErrorKind::Cancelled).is_cancelled());
        assert!(Error::new(ErrorKind::TimedOut).is_timed_out());
        assert!(Error::new(ErrorKind::BrokenPipe).is_broken_pipe());
        assert!(!Error::new(ErrorKind::BrokenPipe).is_timed_out());
    }

    #[test]
    fn kind_round_trips_through_from() {
        let err: Error = ErrorKind::SizeMismatch.into();
        assert_eq!(err.kind(), ErrorKind::SizeMismatch);
    }
}
