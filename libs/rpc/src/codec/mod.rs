//! Client side of the wire protocol.
//!
//! A request is a [`Request`] header followed by the call's arguments. A
//! response is a [`Response`] header followed by exactly one body, which is
//! the reply when the header carries no error and a placeholder otherwise.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod framed;

pub use self::framed::{FramedCodec, FramedReader, FramedWriter};

/// Header written before every request's arguments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Format: "Service.Method"
    pub service_method: String,
    pub seq: u64,
}

/// Header read before every response body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Echoes the request; not used for routing
    pub service_method: String,
    pub seq: u64,
    /// Empty on success
    pub error: String,
}

impl Response {
    /// The remote error for this response, if there is one
    pub fn remote_error(&self) -> Option<&str> {
        if self.error.is_empty() {
            None
        } else {
            Some(&self.error)
        }
    }
}

/// Pluggable wire format for one client connection
///
/// The read half is owned by the client's receiver task. The write half is
/// shared by every caller and only ever used by one of them at a time.
pub trait ClientCodec: Send + 'static {
    type Reader: ResponseReader;
    type Writer: RequestWriter;

    fn split(self) -> (Self::Reader, Self::Writer);
}

#[async_trait::async_trait]
pub trait RequestWriter: Send + 'static {
    /// Write the header and arguments of one request as a single unit
    async fn write_request<A>(&mut self, request: &Request, args: &A) -> Result<()>
    where
        A: Serialize + Sync + ?Sized;

    /// Close the connection
    ///
    /// Must not wait on the peer: it runs while the peer may have stopped
    /// reading.
    async fn close(&mut self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait ResponseReader: Send + 'static {
    /// Read the next response header
    ///
    /// Returns [`Error::Eof`](crate::Error::Eof) when the stream ends
    /// between responses.
    async fn read_response_header(&mut self) -> Result<Response>;

    /// Read the body following a successful header into a reply value
    async fn read_response_body<R>(&mut self) -> Result<R>
    where
        R: DeserializeOwned + Send;

    /// Consume the body following a header without decoding it
    async fn discard_response_body(&mut self) -> Result<()>;
}
