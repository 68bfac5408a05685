use std::sync::Arc;

use thiserror::Error;

/// Errors surfaced on a [`Call`](crate::Call) or returned by the client
///
/// Cloneable because one connection failure is handed to every call that
/// was still waiting.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// The connection is dead or was closed by its owner
    #[error("connection is shut down")]
    Shutdown,

    /// Error string returned by the remote side for one call
    #[error("{0}")]
    Server(String),

    /// The reply body for one call could not be decoded
    #[error("reading body: {0}")]
    ReadingBody(#[source] Box<Error>),

    /// The body following an error response could not be consumed
    #[error("reading error body: {0}")]
    ReadingErrorBody(#[source] Box<Error>),

    /// The stream ended cleanly
    #[error("EOF")]
    Eof,

    /// The stream ended without the client asking for it
    #[error("unexpected EOF")]
    UnexpectedEof,

    /// A completion channel was asked for with no buffer
    #[error("completion channel must be buffered")]
    UnbufferedDone,

    #[error("unexpected HTTP response: {0}")]
    UnexpectedHttpResponse(String),

    #[error("dial-http {address}: {source}")]
    DialHttp {
        address: String,
        #[source]
        source: Box<Error>,
    },

    /// Failure reported by a custom codec
    #[error("codec error: {0}")]
    Codec(String),

    #[error(transparent)]
    Transport(Arc<tether_fabric::Error>),
}

impl Error {
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// True for failures confined to one call
    pub fn is_call_local(&self) -> bool {
        matches!(self, Self::Server(_) | Self::ReadingBody(_))
    }
}

impl From<tether_fabric::Error> for Error {
    fn from(err: tether_fabric::Error) -> Self {
        match err {
            tether_fabric::Error::ConnectionClosed => Self::Eof,
            err => Self::Transport(Arc::new(err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
