use std::fmt;
use std::str::FromStr;

pub const RPC_ERR_PREFIX: &'static str = "rpc_";

/// The error surfaced by every stream operation.
///
/// [StreamError::EndOfStream] is not a failure: it is the sentinel of a direction that completed
/// normally, including the case where the peer refused early by closing its send side.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Normal completion of the inbound direction
    #[error("end of stream")]
    EndOfStream,
    /// Operation attempted after that direction was closed
    #[error("stream closed")]
    StreamClosed,
    /// The call context was cancelled, or its deadline elapsed
    #[error("call cancelled")]
    Cancelled,
    /// The underlying duplex connection failed
    #[error("connection lost")]
    ConnectionLost,
    /// The remote side reported a failure for this call
    #[error("peer error: {0}")]
    Peer(EncodedErr),
    /// One inbound message could not be decoded
    #[error("decode error")]
    Decode,
    /// One outbound message could not be encoded
    #[error("encode error")]
    Encode,
}

impl StreamError {
    /// An application failure reported by a handler, delivered to the peer as a string.
    #[inline]
    pub fn app<S: Into<String>>(msg: S) -> Self {
        Self::Peer(EncodedErr::Buf(msg.into().into_bytes()))
    }

    /// A per-message error, the call may go on.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode)
    }

    #[inline]
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::EndOfStream)
    }

    /// Translate an error frame received from the peer.
    pub fn from_peer(e: EncodedErr) -> Self {
        match e {
            EncodedErr::Rpc(RpcIntErr::Cancelled) | EncodedErr::Rpc(RpcIntErr::Timeout) => {
                Self::Cancelled
            }
            _ => Self::Peer(e),
        }
    }

    /// The payload of the error frame that reports this error to the peer.
    pub fn to_encoded(&self) -> EncodedErr {
        match self {
            Self::EndOfStream | Self::StreamClosed => RpcIntErr::Closed.into(),
            Self::Cancelled => RpcIntErr::Cancelled.into(),
            Self::ConnectionLost => RpcIntErr::IO.into(),
            Self::Peer(e) => e.clone(),
            Self::Decode => RpcIntErr::Decode.into(),
            Self::Encode => RpcIntErr::Encode.into(),
        }
    }
}

impl From<RpcIntErr> for StreamError {
    #[inline]
    fn from(e: RpcIntErr) -> Self {
        Self::from_peer(EncodedErr::Rpc(e))
    }
}

/// "rpc_" prefix is reserved for internal error
#[derive(
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
    PartialEq,
    PartialOrd,
    Clone,
    Copy,
    thiserror::Error,
)]
#[repr(u8)]
pub enum RpcIntErr {
    /// Peer not reachable
    #[strum(serialize = "rpc_unreachable")]
    Unreachable = 0,
    /// IO error
    #[strum(serialize = "rpc_io_err")]
    IO = 1,
    /// Deadline exceeded
    #[strum(serialize = "rpc_timeout")]
    Timeout = 2,
    /// Method not found
    #[strum(serialize = "rpc_method_notfound")]
    Method = 3,
    /// Encode Error
    #[strum(serialize = "rpc_encode")]
    Encode = 4,
    /// Decode Error
    #[strum(serialize = "rpc_decode")]
    Decode = 5,
    /// Internal error
    #[strum(serialize = "rpc_internal_err")]
    Internal = 6,
    /// invalid version number in frame header
    #[strum(serialize = "rpc_invalid_ver")]
    Version = 7,
    /// The call was cancelled by its owner
    #[strum(serialize = "rpc_cancelled")]
    Cancelled = 8,
    /// Operation on a closed stream
    #[strum(serialize = "rpc_closed")]
    Closed = 9,
}

// The default Debug derive just ignore strum customized string, by strum only have a Display derive
impl fmt::Debug for RpcIntErr {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl RpcIntErr {
    #[inline]
    pub fn as_bytes<'a>(&'a self) -> &'a [u8] {
        self.as_ref().as_bytes()
    }
}

impl From<std::io::Error> for RpcIntErr {
    #[inline(always)]
    fn from(_e: std::io::Error) -> Self {
        Self::IO
    }
}

/// A container for error message parse from / send into transport
#[derive(Debug, Clone, thiserror::Error)]
pub enum EncodedErr {
    /// Parsed back from string with "rpc_" prefix
    Rpc(RpcIntErr),
    /// For errno and the like
    Num(u32),
    /// Only for the sending side, will arrive as Buf
    Static(&'static str),
    /// Fallback after failing to parse RpcIntErr
    Buf(Vec<u8>),
}

impl EncodedErr {
    #[inline]
    pub fn try_as_str<'a>(&'a self) -> Result<&'a str, ()> {
        match self {
            Self::Static(s) => return Ok(s),
            Self::Buf(b) => {
                if let Ok(s) = str::from_utf8(b) {
                    return Ok(s);
                }
            }
            _ => {}
        }
        Err(())
    }

    /// The bytes carried by an error frame with string flag
    #[inline]
    pub fn as_str_bytes<'a>(&'a self) -> Option<&'a [u8]> {
        match self {
            Self::Rpc(e) => Some(e.as_bytes()),
            Self::Num(_) => None,
            Self::Static(s) => Some(s.as_bytes()),
            Self::Buf(b) => Some(b.as_slice()),
        }
    }

    /// Parse the error string of an error frame
    pub fn from_str_bytes(buf: &[u8]) -> Self {
        if buf.starts_with(RPC_ERR_PREFIX.as_bytes()) {
            if let Ok(s) = str::from_utf8(buf) {
                if let Ok(e) = RpcIntErr::from_str(s) {
                    return Self::Rpc(e);
                }
            }
        }
        Self::Buf(buf.to_vec())
    }
}

impl std::cmp::PartialEq<EncodedErr> for EncodedErr {
    fn eq(&self, other: &EncodedErr) -> bool {
        match self {
            Self::Rpc(e) => {
                if let Self::Rpc(o) = other {
                    return e == o;
                }
            }
            Self::Num(e) => {
                if let Self::Num(o) = other {
                    return e == o;
                }
            }
            Self::Static(s) => {
                if let Ok(o) = other.try_as_str() {
                    return *s == o;
                }
            }
            Self::Buf(s) => {
                if let Self::Buf(o) = other {
                    return s == o;
                } else if let Ok(o) = other.try_as_str() {
                    // other's type is not Buf
                    if let Ok(_s) = str::from_utf8(s) {
                        return _s == o;
                    }
                }
            }
        }
        false
    }
}

impl fmt::Display for EncodedErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(e) => e.fmt(f),
            Self::Num(no) => write!(f, "errno {}", no),
            Self::Static(s) => write!(f, "{}", s),
            Self::Buf(b) => match str::from_utf8(b) {
                Ok(s) => {
                    write!(f, "{}", s)
                }
                Err(_) => {
                    write!(f, "err blob {} length", b.len())
                }
            },
        }
    }
}

impl From<RpcIntErr> for EncodedErr {
    #[inline(always)]
    fn from(e: RpcIntErr) -> Self {
        Self::Rpc(e)
    }
}
