use std::{fmt, result};

/// Error variants emitted by this crate.
///
/// Every variant carries a message built by [`err_at`], which prefixes
/// the call-site's `file:line` so a failed commit can be traced back to
/// the statement that raised it without attaching a debugger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Operation attempted on a disconnected [`crate::Database`].
    NotConnected(String),
    /// Commit/abort on a transaction that is not OPEN, or a structural
    /// change attempted while the database is connected.
    InvalidState(String),
    /// Commit lost the race against an earlier sibling commit.
    Conflict(String),
    /// Per-store state stack exceeded `MAX_STACK_SIZE`.
    StackOverflow(String),
    /// A unique index would have held two primary keys for one
    /// secondary key.
    UniqueConstraintViolation(String),
    /// Malformed call arguments (duplicate stores in a combined
    /// commit, a nested transaction passed to a combined commit, a
    /// database version below 1, ...).
    InvalidArguments(String),
    /// Error from a persistence backend, always surfaced unchanged.
    BackendFailure(String),
    /// `close()`/`destroy()` requested while transactions were open.
    CloseWhileActive(String),
    /// Write attempted on a transaction that already left the OPEN
    /// state.
    TransactionClosed(String),
    /// Write attempted on a transaction that has an OPEN child.
    NestedTransactionBlocked(String),
    /// Wrapped I/O failure from an adapter or the generic encoding.
    IOError(String),
    /// A numeric or type conversion failed, typically while decoding
    /// the generic value encoding of the backend contract.
    FailConvert(String),
    /// Invariant violation that should not be reachable; if this ever
    /// fires the bug is in this crate, not the caller.
    Fatal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Error::*;

        match self {
            NotConnected(msg) => write!(f, "NotConnected: {}", msg),
            InvalidState(msg) => write!(f, "InvalidState: {}", msg),
            Conflict(msg) => write!(f, "Conflict: {}", msg),
            StackOverflow(msg) => write!(f, "StackOverflow: {}", msg),
            UniqueConstraintViolation(msg) => {
                write!(f, "UniqueConstraintViolation: {}", msg)
            }
            InvalidArguments(msg) => write!(f, "InvalidArguments: {}", msg),
            BackendFailure(msg) => write!(f, "BackendFailure: {}", msg),
            CloseWhileActive(msg) => write!(f, "CloseWhileActive: {}", msg),
            TransactionClosed(msg) => write!(f, "TransactionClosed: {}", msg),
            NestedTransactionBlocked(msg) => {
                write!(f, "NestedTransactionBlocked: {}", msg)
            }
            IOError(msg) => write!(f, "IOError: {}", msg),
            FailConvert(msg) => write!(f, "FailConvert: {}", msg),
            Fatal(msg) => write!(f, "Fatal: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = result::Result<T, Error>;

/// Construct or wrap an [`Error`], prefixing the message with the
/// call-site's location the way the rest of this workspace's error
/// sites already do.
///
/// ```ignore
/// err_at!(Conflict, msg: "base {} already closed", base_id)
/// err_at!(IOError, some_fallible_io_call())
/// ```
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let msg = format!($($arg),+);
        Err($crate::Error::$v(format!("{}:{} {}", file!(), line!(), msg)))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let msg = format!("{}:{} err:{}", file!(), line!(), err);
                Err($crate::Error::$v(msg))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!($($arg),+);
                let msg = format!("{}:{} {} err:{}", file!(), line!(), prefix, err);
                Err($crate::Error::$v(msg))
            }
        }
    }};
}

pub(crate) use err_at;
