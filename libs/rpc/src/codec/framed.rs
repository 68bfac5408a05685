use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_fabric::codec::{BincodeCodec, Codec};
use tether_fabric::transport::Transport;
use tether_fabric::{Channel, ChannelReader, ChannelWriter, FrameReader, FrameWriter};

use crate::codec::{ClientCodec, Request, RequestWriter, Response, ResponseReader};
use crate::error::{Error, Result};

/// Default codec: every header and body is its own length-prefixed frame
pub struct FramedCodec<F = BincodeCodec> {
    reader: FramedReader<F>,
    writer: FramedWriter<F>,
}

impl<F: Codec> FramedCodec<F> {
    pub fn new(transport: impl Transport, format: F) -> Self {
        let (reader, writer) = transport.into_framed();
        Self::from_framed(reader, writer, format)
    }

    /// Build from halves that may already have done unframed I/O
    pub fn from_framed(reader: FrameReader, writer: FrameWriter, format: F) -> Self {
        let (reader, writer) = Channel::from_framed(reader, writer, format).split();
        Self {
            reader: FramedReader { inner: reader },
            writer: FramedWriter { inner: writer },
        }
    }
}

impl<F: Codec> ClientCodec for FramedCodec<F> {
    type Reader = FramedReader<F>;
    type Writer = FramedWriter<F>;

    fn split(self) -> (Self::Reader, Self::Writer) {
        (self.reader, self.writer)
    }
}

pub struct FramedReader<F = BincodeCodec> {
    inner: ChannelReader<F>,
}

pub struct FramedWriter<F = BincodeCodec> {
    inner: ChannelWriter<F>,
}

#[async_trait::async_trait]
impl<F: Codec> RequestWriter for FramedWriter<F> {
    async fn write_request<A>(&mut self, request: &Request, args: &A) -> Result<()>
    where
        A: Serialize + Sync + ?Sized,
    {
        let header = self.inner.encode(request)?;
        let body = self.inner.encode(args)?;
        self.inner.send_encoded(&[header.as_slice(), body.as_slice()]).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.abort().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<F: Codec> ResponseReader for FramedReader<F> {
    async fn read_response_header(&mut self) -> Result<Response> {
        Ok(self.inner.receive().await?)
    }

    async fn read_response_body<R>(&mut self) -> Result<R>
    where
        R: DeserializeOwned + Send,
    {
        self.inner.receive().await.map_err(Error::from)
    }

    async fn discard_response_body(&mut self) -> Result<()> {
        Ok(self.inner.skip().await?)
    }
}
