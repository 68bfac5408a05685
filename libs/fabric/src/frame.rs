use std::time::Duration;

use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter,
};

use crate::error::{Error, Result};

/// Largest payload accepted by default (100MB)
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Longest text line accepted by [`FrameReader::read_line`]
const MAX_LINE_LEN: usize = 8 * 1024;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read half of a length-prefixed connection
///
/// Frames are a 4-byte big-endian length followed by that many bytes.
pub struct FrameReader {
    inner: BufReader<BoxedReader>,
    timeout: Option<Duration>,
    max_frame_len: usize,
}

impl FrameReader {
    pub fn new(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            inner: BufReader::new(Box::new(reader)),
            timeout: None,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Fail any single receive that takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Receive the next frame payload
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let timeout = self.timeout;
        with_timeout(timeout, "Receive", async {
            let len = self.read_len().await?;
            let mut buf = vec![0u8; len];
            self.inner
                .read_exact(&mut buf)
                .await
                .map_err(Error::from_read)?;
            Ok(buf)
        })
        .await
    }

    /// Consume the next frame without handing its payload to anyone
    pub async fn skip_frame(&mut self) -> Result<()> {
        let timeout = self.timeout;
        with_timeout(timeout, "Receive", async {
            let len = self.read_len().await? as u64;
            let skipped = tokio::io::copy(&mut (&mut self.inner).take(len), &mut tokio::io::sink())
                .await?;
            if skipped < len {
                return Err(Error::ConnectionClosed);
            }
            Ok(())
        })
        .await
    }

    /// Read one text line ending in `\n`, before any framing starts
    ///
    /// The trailing `\r\n` or `\n` is stripped. Bytes after the line stay
    /// buffered for the following frame reads.
    pub async fn read_line(&mut self) -> Result<String> {
        let timeout = self.timeout;
        with_timeout(timeout, "Receive", async {
            let mut line = Vec::new();
            let read = (&mut self.inner)
                .take(MAX_LINE_LEN as u64)
                .read_until(b'\n', &mut line)
                .await?;
            if read == 0 {
                return Err(Error::ConnectionClosed);
            }
            if line.last() != Some(&b'\n') {
                return Err(Error::InvalidFrame("Line too long or truncated".to_string()));
            }
            while matches!(line.last(), Some(b'\n' | b'\r')) {
                line.pop();
            }
            String::from_utf8(line).map_err(|e| Error::InvalidFrame(e.to_string()))
        })
        .await
    }

    async fn read_len(&mut self) -> Result<usize> {
        let len = self.inner.read_u32().await.map_err(Error::from_read)? as usize;

        if len > self.max_frame_len {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                len
            )));
        }
        Ok(len)
    }
}

/// Write half of a length-prefixed connection
///
/// Writes are buffered until [`FrameWriter::flush`], so a group of frames
/// reaches the socket as one unit.
pub struct FrameWriter {
    /// `None` once the writer was aborted
    inner: Option<BufWriter<BoxedWriter>>,
    timeout: Option<Duration>,
    max_frame_len: usize,
}

impl FrameWriter {
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            inner: Some(BufWriter::new(Box::new(writer))),
            timeout: None,
            max_frame_len: MAX_FRAME_LEN,
        }
    }

    /// Fail any single send that takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Queue one frame without flushing
    pub async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.max_frame_len {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                bytes.len()
            )));
        }

        let timeout = self.timeout;
        with_timeout(timeout, "Send", async {
            let inner = self.stream()?;
            // Write length prefix (4 bytes, big-endian)
            inner.write_u32(bytes.len() as u32).await?;
            inner.write_all(bytes).await?;
            Ok(())
        })
        .await
    }

    /// Write several frames and flush them together
    ///
    /// Every length is checked before anything is written, so an oversized
    /// frame cannot leave the earlier ones dangling in the buffer.
    pub async fn write_frames(&mut self, frames: &[&[u8]]) -> Result<()> {
        if let Some(frame) = frames.iter().find(|f| f.len() > self.max_frame_len) {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                frame.len()
            )));
        }
        for frame in frames {
            self.write_frame(frame).await?;
        }
        self.flush().await
    }

    /// Write and flush bytes that are not framed (handshake lines)
    pub async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let timeout = self.timeout;
        with_timeout(timeout, "Send", async {
            let inner = self.stream()?;
            inner.write_all(bytes).await?;
            inner.flush().await?;
            Ok(())
        })
        .await
    }

    pub async fn flush(&mut self) -> Result<()> {
        let timeout = self.timeout;
        with_timeout(timeout, "Send", async {
            self.stream()?.flush().await?;
            Ok(())
        })
        .await
    }

    /// Flush what is buffered and shut the write side down
    pub async fn close(&mut self) -> Result<()> {
        self.stream()?.shutdown().await?;
        Ok(())
    }

    /// Shut the write side down without flushing
    ///
    /// Anything still buffered is dropped, so this does not wait on a peer
    /// that stopped reading. Later writes fail with
    /// [`Error::ConnectionClosed`].
    pub async fn abort(&mut self) -> Result<()> {
        if let Some(inner) = self.inner.take() {
            inner.into_inner().shutdown().await?;
        }
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut BufWriter<BoxedWriter>> {
        self.inner.as_mut().ok_or(Error::ConnectionClosed)
    }
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    op: &'static str,
    fut: impl std::future::Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        Some(timeout) => tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| Error::Timeout(op))?,
        None => fut.await,
    }
}
