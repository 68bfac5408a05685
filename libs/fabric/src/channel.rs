use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::error::Result;
use crate::frame::{FrameReader, FrameWriter};
use crate::transport::Transport;

/// High-level channel for bidirectional communication
///
/// Combines a transport and codec for persistent connections. Split it to
/// read and write from different tasks.
pub struct Channel<C> {
    reader: ChannelReader<C>,
    writer: ChannelWriter<C>,
}

impl<C: Codec> Channel<C> {
    /// Create a channel from an existing transport
    pub fn from_transport(transport: impl Transport, codec: C) -> Self {
        let (reader, writer) = transport.into_framed();
        Self::from_framed(reader, writer, codec)
    }

    /// Create a channel from halves that already did some unframed I/O
    pub fn from_framed(reader: FrameReader, writer: FrameWriter, codec: C) -> Self {
        Self {
            reader: ChannelReader {
                frames: reader,
                codec: codec.clone(),
            },
            writer: ChannelWriter {
                frames: writer,
                codec,
            },
        }
    }

    /// Send a message and flush it
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        self.writer.send(message).await
    }

    /// Receive a message from the channel
    pub async fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T> {
        self.reader.receive().await
    }

    pub fn split(self) -> (ChannelReader<C>, ChannelWriter<C>) {
        (self.reader, self.writer)
    }

    /// Close the write side of the channel
    pub async fn close(mut self) -> Result<()> {
        self.writer.close().await
    }
}

/// Receiving half of a [`Channel`]
pub struct ChannelReader<C> {
    frames: FrameReader,
    codec: C,
}

impl<C: Codec> ChannelReader<C> {
    /// Receive and decode the next message
    pub async fn receive<T: for<'de> Deserialize<'de>>(&mut self) -> Result<T> {
        let bytes = self.frames.read_frame().await?;
        self.codec.decode(&bytes)
    }

    /// Drop the next message without decoding it
    pub async fn skip(&mut self) -> Result<()> {
        self.frames.skip_frame().await
    }
}

/// Sending half of a [`Channel`]
pub struct ChannelWriter<C> {
    frames: FrameWriter,
    codec: C,
}

impl<C: Codec> ChannelWriter<C> {
    /// Queue a message without flushing it
    ///
    /// Nothing is written to the frame buffer if encoding fails.
    pub async fn feed<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        let bytes = self.codec.encode(message)?;
        self.frames.write_frame(&bytes).await
    }

    /// Send a message and flush it
    pub async fn send<T: Serialize + ?Sized>(&mut self, message: &T) -> Result<()> {
        self.feed(message).await?;
        self.flush().await
    }

    /// Encode a message with this writer's codec without sending it
    pub fn encode<T: Serialize + ?Sized>(&self, message: &T) -> Result<Vec<u8>> {
        self.codec.encode(message)
    }

    /// Send already encoded messages as one unit
    pub async fn send_encoded(&mut self, messages: &[&[u8]]) -> Result<()> {
        self.frames.write_frames(messages).await
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.frames.flush().await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.frames.close().await
    }

    /// Shut down without flushing; see [`FrameWriter::abort`]
    pub async fn abort(&mut self) -> Result<()> {
        self.frames.abort().await
    }
}
