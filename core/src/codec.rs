use serde::{Serialize, de::DeserializeOwned};

/*
 *  There's no unify output interface in each serde impl,
 *  whatever we serialize into (std::io::Write / Vec<u8>), the codec implement has to match.
 */

/// Interface for `strand-rpc-codec`
///
/// The codec is immutable and shared by every stream of a connection, if it needs changing
/// (like setting up cipher), it should have inner mutability.
pub trait Codec: Default + Send + Sync + Sized + 'static {
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, ()>;

    /// Serialize the msg into buf (with std::io::Writer), and return the size written
    fn encode_into<T: Serialize>(&self, msg: &T, buf: &mut Vec<u8>) -> Result<usize, ()>;

    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, ()>;
}
