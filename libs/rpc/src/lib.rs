//! Tether RPC - client multiplexer for request/response calls
//!
//! Many tasks can issue calls over one shared connection at the same time.
//! Every call is tagged with a sequence number, a single receiver task per
//! connection matches responses back to their calls, and when the
//! connection dies every call still waiting is failed rather than left
//! hanging.
//!
//! Failures come in two kinds. Remote errors and reply decode failures only
//! affect the call they belong to. Anything that leaves the stream in an
//! unknown state shuts the whole client down.
//!
//! # Example
//!
//! ```no_run
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Args { a: i32, b: i32 }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = tether_rpc::dial("127.0.0.1:1234".parse()?).await?;
//!
//! // Wait for the reply
//! let product: i32 = client.call("Arith.Multiply", Args { a: 7, b: 8 }).await?;
//!
//! // Or start the call and collect it later
//! let mut done = client.go::<_, i32>("Arith.Multiply", Args { a: 2, b: 3 });
//! if let Some(call) = done.recv().await {
//!     let method = call.service_method.clone();
//!     println!("{} -> {:?}", method, call.into_result());
//! }
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod call;
pub mod client;
pub mod codec;
pub mod dial;
pub mod error;

pub use call::{completion, Call, Completions, Done, DEFAULT_DONE_CAPACITY};
pub use client::Client;
pub use codec::{ClientCodec, FramedCodec, Request, RequestWriter, Response, ResponseReader};
pub use dial::{
    connect_tunnel, dial, dial_http, dial_http_path, dial_unix, CONNECTED, DEFAULT_RPC_PATH,
};
pub use error::{Error, Result};
