use std::net::SocketAddr;
use std::path::Path;

use tether_fabric::codec::BincodeCodec;
use tether_fabric::transport::{TcpTransport, Transport, UnixTransport};
use tether_fabric::{FrameReader, FrameWriter};

use crate::client::Client;
use crate::codec::FramedCodec;
use crate::error::{Error, Result};

/// Path the CONNECT handshake asks for unless told otherwise
pub const DEFAULT_RPC_PATH: &str = "/_goRPC_";

/// Status a server answers the CONNECT handshake with before switching to RPC
pub const CONNECTED: &str = "200 Connected to Go RPC";

impl Client {
    /// Create a client over an established transport using the default codec
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: impl Transport) -> Self {
        Self::with_codec(FramedCodec::new(transport, BincodeCodec))
    }
}

/// Connect to an RPC server over TCP
pub async fn dial(addr: SocketAddr) -> Result<Client> {
    let transport = TcpTransport::connect(addr).await?;
    Ok(Client::new(transport))
}

/// Connect to an RPC server over a Unix domain socket
pub async fn dial_unix(path: impl AsRef<Path>) -> Result<Client> {
    let transport = UnixTransport::connect(path).await?;
    Ok(Client::new(transport))
}

/// Connect to an RPC server behind an HTTP endpoint on [`DEFAULT_RPC_PATH`]
pub async fn dial_http(addr: SocketAddr) -> Result<Client> {
    dial_http_path(addr, DEFAULT_RPC_PATH).await
}

/// Connect to an RPC server behind an HTTP endpoint at `path`
///
/// Sends `CONNECT <path>` and only starts speaking RPC once the server
/// answers with [`CONNECTED`].
pub async fn dial_http_path(addr: SocketAddr, path: &str) -> Result<Client> {
    let transport = TcpTransport::connect(addr).await?;
    connect_tunnel(transport, path)
        .await
        .map_err(|e| Error::DialHttp {
            address: addr.to_string(),
            source: Box::new(e),
        })
}

/// Run the CONNECT handshake over `transport` and hand it to a new client
///
/// The connection is closed if the handshake fails.
pub async fn connect_tunnel(transport: impl Transport, path: &str) -> Result<Client> {
    let (mut reader, mut writer) = transport.into_framed();

    match handshake(&mut reader, &mut writer, path).await {
        Ok(()) => Ok(Client::with_codec(FramedCodec::from_framed(
            reader,
            writer,
            BincodeCodec,
        ))),
        Err(e) => {
            if let Err(close_err) = writer.abort().await {
                tracing::debug!(error = %close_err, "closing connection after failed handshake");
            }
            Err(e)
        }
    }
}

async fn handshake(reader: &mut FrameReader, writer: &mut FrameWriter, path: &str) -> Result<()> {
    tracing::debug!(path, "sending CONNECT");
    writer
        .write_raw(format!("CONNECT {} HTTP/1.0\n\n", path).as_bytes())
        .await?;

    let status_line = reader.read_line().await?;
    let status = match status_line.split_once(' ') {
        Some((proto, status)) if proto.starts_with("HTTP/") => status.trim().to_string(),
        _ => String::new(),
    };
    if status.is_empty() {
        return Err(Error::UnexpectedHttpResponse(status_line));
    }
    if status != CONNECTED {
        return Err(Error::UnexpectedHttpResponse(status));
    }

    // Skip the header block up to the blank line
    while !reader.read_line().await?.is_empty() {}

    tracing::debug!(path, "tunnel established");
    Ok(())
}
