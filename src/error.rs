//! Error type for the resolver context.

#![warn(missing_docs)]

use std::error;
use std::fmt::{Display, Formatter};
use std::io;
use std::sync::Arc;

//------------ Error ---------------------------------------------------------

/// Error type for the resolver context.
///
/// Errors at admission time are returned directly by the operation that
/// failed. A failed resolution is not an operation failure: the query was
/// admitted fine, so it is delivered as the result of that query instead.
#[derive(Clone, Debug)]
pub enum Error {
    /// Allocation failed or the identifier space is exhausted.
    NoMem,

    /// Sending or receiving on a channel failed.
    Transport(Arc<io::Error>),

    /// The other end of a channel has gone away.
    ChannelClosed,

    /// The query was malformed.
    Syntax(&'static str),

    /// The module stack failed to resolve the query.
    ServFail,

    /// Finalizing the context failed.
    InitFail(String),

    /// The configuration cannot be changed after the context was finalized.
    AfterFinal,

    /// The query was cancelled because the context was torn down.
    Cancelled,
}

impl Error {
    /// Returns the numeric code used on the result channel.
    pub fn code(&self) -> u8 {
        match self {
            Error::NoMem => 1,
            Error::Transport(_) => 2,
            Error::Syntax(_) => 3,
            Error::ServFail => 4,
            Error::InitFail(_) => 5,
            Error::AfterFinal => 6,
            Error::Cancelled => 7,
            Error::ChannelClosed => 8,
        }
    }

    /// Creates an error from a code received on the result channel.
    ///
    /// Details that did not survive the trip through the channel are
    /// replaced by generic values. Unknown codes and zero turn into
    /// `ServFail`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Error::NoMem,
            2 => Error::Transport(Arc::new(io::Error::other(
                "transport failure in worker",
            ))),
            3 => Error::Syntax("rejected by worker"),
            5 => Error::InitFail("worker initialization failed".into()),
            6 => Error::AfterFinal,
            7 => Error::Cancelled,
            8 => Error::ChannelClosed,
            _ => Error::ServFail,
        }
    }

    /// Creates a transport error for a malformed channel message.
    pub(crate) fn malformed(msg: &'static str) -> Self {
        Error::Transport(Arc::new(io::Error::new(
            io::ErrorKind::InvalidData,
            msg,
        )))
    }
}

//--- From

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Transport(Arc::new(err))
    }
}

//--- Display and Error

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            Error::NoMem => write!(f, "out of memory or query identifiers"),
            Error::Transport(err) => write!(f, "channel failure: {err}"),
            Error::ChannelClosed => write!(f, "channel closed"),
            Error::Syntax(msg) => write!(f, "syntax error: {msg}"),
            Error::ServFail => write!(f, "resolution failed"),
            Error::InitFail(msg) => {
                write!(f, "initialization failed: {msg}")
            }
            Error::AfterFinal => {
                write!(f, "configuration change after finalize")
            }
            Error::Cancelled => write!(f, "query cancelled"),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

//============ Tests =========================================================
