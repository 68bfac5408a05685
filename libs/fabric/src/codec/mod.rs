use serde::{Deserialize, Serialize};

use crate::error::Result;

pub mod bincode;

pub use self::bincode::BincodeCodec;

/// Serialization format used to turn messages into frame payloads
///
/// Codecs are cloned into both halves of a split channel, so they should be
/// cheap to copy (usually a unit struct).
pub trait Codec: Clone + Send + Sync + 'static {
    /// Encode a value into bytes
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes into a value
    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T>;
}
