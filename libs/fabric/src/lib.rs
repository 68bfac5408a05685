//! Tether Fabric - Low-level transport and codec layer
//!
//! Provides connection transports (TCP, Unix sockets, in-memory pipes),
//! length-prefixed framing, and serde codecs. Connections are split into
//! independent read and write halves so one task can wait on incoming
//! frames while others send.
//!
//! # Example
//!
//! ```no_run
//! use tether_fabric::{Channel, codec::BincodeCodec, transport::TcpTransport};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct MyRequest { data: String }
//!
//! #[derive(Serialize, Deserialize)]
//! struct MyResponse { result: i32 }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let addr = "127.0.0.1:8080".parse()?;
//! let transport = TcpTransport::connect(addr).await?;
//! let mut channel = Channel::from_transport(transport, BincodeCodec);
//!
//! channel.send(&MyRequest { data: "hello".to_string() }).await?;
//! let resp: MyResponse = channel.receive().await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod codec;
pub mod error;
pub mod frame;
pub mod transport;

// Re-exports for convenience
pub use channel::{Channel, ChannelReader, ChannelWriter};
pub use error::{Error, Result};
pub use frame::{FrameReader, FrameWriter, MAX_FRAME_LEN};
