use tokio::io::DuplexStream;

use crate::error::Result;
use crate::frame::{FrameReader, FrameWriter};

pub mod tcp;
pub mod unix;

pub use self::tcp::{TcpTransport, TcpTransportBuilder, TcpTransportListener};
pub use self::unix::{UnixTransport, UnixTransportBuilder, UnixTransportListener};

/// A single established connection
///
/// The connection is split into independently owned read and write halves
/// so one task can block on reads while others write.
pub trait Transport: Send + 'static {
    /// Split into framed read and write halves
    fn into_framed(self) -> (FrameReader, FrameWriter);
}

/// Listener producing transports for incoming connections
#[async_trait::async_trait]
pub trait TransportListener: Send + Sync {
    type Transport: Transport;

    /// Accept the next incoming connection
    async fn accept(&self) -> Result<Self::Transport>;

    /// Stop listening
    async fn close(&mut self) -> Result<()>;
}

/// In-memory pipe, mostly useful for tests
impl Transport for DuplexStream {
    fn into_framed(self) -> (FrameReader, FrameWriter) {
        let (read, write) = tokio::io::split(self);
        (FrameReader::new(read), FrameWriter::new(write))
    }
}
