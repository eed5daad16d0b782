use crate::Codec;
use serde::{Serialize, de::DeserializeOwned};

/// Msgpack with named fields, so that peers tolerate added struct members.
#[derive(Default)]
pub struct MsgpCodec();

impl Codec for MsgpCodec {
    #[inline(always)]
    fn encode<T: Serialize>(&self, msg: &T) -> Result<Vec<u8>, ()> {
        rmp_serde::encode::to_vec_named(msg).map_err(|e| {
            log::error!("encode error: {:?}", e);
        })
    }

    fn encode_into<T: Serialize>(&self, msg: &T, buf: &mut Vec<u8>) -> Result<usize, ()> {
        let pre_len = buf.len();
        if let Err(e) = rmp_serde::encode::write_named(buf, msg) {
            log::error!("encode error: {:?}", e);
            return Err(());
        }
        Ok(buf.len() - pre_len)
    }

    #[inline(always)]
    fn decode<T: DeserializeOwned>(&self, buf: &[u8]) -> Result<T, ()> {
        rmp_serde::decode::from_slice::<T>(buf).map_err(|e| {
            log::warn!("decode error: {:?}", e);
        })
    }
}
