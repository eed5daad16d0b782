//! Frame model and its wire encoding on byte streams.
//!
//! Every frame is a fixed 32B header, followed by the method name (Open only), then the body:
//!
//! | 2B    | 1B  | 1B   | 1B   | 3B       |
//! | magic | ver | kind | flag | reserved |
//!
//! | 8B        | 4B         | 4B      | 4B         | 4B       |
//! | stream_id | method_len | msg_len | timeout_ms | reserved |
//!
//! Integers are little endian. For Error frames, when `flag` has [ERR_FLAG_NUM], `msg_len` is the
//! errno and no body follows. With [ERR_FLAG_STR] the body is the error string.

use std::fmt;
use std::mem::size_of;
use strand_rpc_core::error::{EncodedErr, RpcIntErr, StreamError};
use zerocopy::byteorder::{LittleEndian, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

pub const STREAM_MAGIC: [u8; 2] = [b'%', b'S'];
pub const PROTO_VER: u8 = 1;

/// The frame carries a message body
pub const FLAG_HAS_PAYLOAD: u8 = 1;
/// Error frame, `msg_len` is an errno
pub const ERR_FLAG_NUM: u8 = 2;
/// Error frame, the body is an error string
pub const ERR_FLAG_STR: u8 = 4;

pub const MAX_METHOD_LEN: usize = 1024;
pub const MAX_MSG_LEN: usize = 64 * 1024 * 1024;

/// A body the peer would reject fails the call here, instead of the whole connection over there.
#[inline]
pub(crate) fn check_msg_len(len: usize) -> Result<(), StreamError> {
    if len > MAX_MSG_LEN { Err(StreamError::Encode) } else { Ok(()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Starts a call, carries the method, the deadline and the optional initial message
    Open = 1,
    Data = 2,
    /// The sender will send no more Data on this stream
    HalfClose = 3,
    /// Normal completion of the sender's side, with an optional final message
    End = 4,
    /// Abnormal termination of the call
    Error = 5,
}

impl FrameKind {
    #[inline]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Open),
            2 => Some(Self::Data),
            3 => Some(Self::HalfClose),
            4 => Some(Self::End),
            5 => Some(Self::Error),
            _ => None,
        }
    }
}

/// A unit of transmission on a frame channel, tagged with the id of the stream it belongs to.
#[derive(Clone, PartialEq)]
pub struct Frame {
    pub stream_id: u64,
    pub kind: FrameKind,
    /// Open only
    pub method: Option<String>,
    /// Open only, remaining time of the caller in milliseconds, 0 for none
    pub timeout_ms: u32,
    pub payload: Option<Vec<u8>>,
    /// Error only
    pub err: Option<EncodedErr>,
}

impl Frame {
    #[inline]
    fn new(stream_id: u64, kind: FrameKind) -> Self {
        Self { stream_id, kind, method: None, timeout_ms: 0, payload: None, err: None }
    }

    pub fn open(stream_id: u64, method: &str, timeout_ms: u32, payload: Option<Vec<u8>>) -> Self {
        let mut f = Self::new(stream_id, FrameKind::Open);
        f.method = Some(method.to_string());
        f.timeout_ms = timeout_ms;
        f.payload = payload;
        f
    }

    #[inline]
    pub fn data(stream_id: u64, payload: Vec<u8>) -> Self {
        let mut f = Self::new(stream_id, FrameKind::Data);
        f.payload = Some(payload);
        f
    }

    #[inline]
    pub fn half_close(stream_id: u64) -> Self {
        Self::new(stream_id, FrameKind::HalfClose)
    }

    #[inline]
    pub fn end(stream_id: u64, payload: Option<Vec<u8>>) -> Self {
        let mut f = Self::new(stream_id, FrameKind::End);
        f.payload = payload;
        f
    }

    #[inline]
    pub fn error(stream_id: u64, err: EncodedErr) -> Self {
        let mut f = Self::new(stream_id, FrameKind::Error);
        f.err = Some(err);
        f
    }

    /// Header and body to write out. The method bytes are `self.method`.
    pub fn encode_head(&self) -> (FrameHead, Option<&[u8]>) {
        let method_len = self.method.as_ref().map(|m| m.len()).unwrap_or(0);
        let mut flag = 0;
        let mut msg_len = 0;
        let mut body: Option<&[u8]> = None;
        if let Some(err) = self.err.as_ref() {
            match err {
                EncodedErr::Num(no) => {
                    flag |= ERR_FLAG_NUM;
                    msg_len = *no;
                }
                _ => {
                    flag |= ERR_FLAG_STR;
                    body = err.as_str_bytes();
                }
            }
        } else if let Some(payload) = self.payload.as_ref() {
            flag |= FLAG_HAS_PAYLOAD;
            body = Some(payload.as_slice());
        }
        if let Some(b) = body {
            msg_len = b.len() as u32;
        }
        let head = FrameHead {
            magic: STREAM_MAGIC,
            ver: PROTO_VER,
            kind: self.kind as u8,
            flag,
            _reserved: [0; 3],
            stream_id: U64::new(self.stream_id),
            method_len: U32::new(method_len as u32),
            msg_len: U32::new(msg_len),
            timeout_ms: U32::new(self.timeout_ms),
            _reserved2: U32::new(0),
        };
        (head, body)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "frame(id={}, {:?}", self.stream_id, self.kind)?;
        if let Some(m) = self.method.as_ref() {
            write!(f, ", method={}, timeout_ms={}", m, self.timeout_ms)?;
        }
        if let Some(p) = self.payload.as_ref() {
            write!(f, ", payload={}B", p.len())?;
        }
        if let Some(e) = self.err.as_ref() {
            write!(f, ", err={}", e)?;
        }
        write!(f, ")")
    }
}

#[derive(AsBytes, FromBytes, FromZeroes, Unaligned, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct FrameHead {
    pub magic: [u8; 2],
    pub ver: u8,
    pub kind: u8,
    pub flag: u8,
    _reserved: [u8; 3],
    pub stream_id: U64<LittleEndian>,
    pub method_len: U32<LittleEndian>,
    /// message length, or errno with [ERR_FLAG_NUM]
    pub msg_len: U32<LittleEndian>,
    pub timeout_ms: U32<LittleEndian>,
    _reserved2: U32<LittleEndian>,
}

pub const FRAME_HEAD_LEN: usize = size_of::<FrameHead>();

impl FrameHead {
    /// Parse and validate a header
    pub fn decode(buf: &[u8]) -> Result<Self, RpcIntErr> {
        let Some(head) = Self::read_from(buf) else {
            return Err(RpcIntErr::Decode);
        };
        if head.magic != STREAM_MAGIC {
            warn!("wrong magic receive {:?}", head.magic);
            return Err(RpcIntErr::Decode);
        }
        if head.ver != PROTO_VER {
            warn!("version {} not supported", head.ver);
            return Err(RpcIntErr::Version);
        }
        if FrameKind::from_u8(head.kind).is_none() {
            warn!("unknown frame kind {}", head.kind);
            return Err(RpcIntErr::Decode);
        }
        if head.method_len() > MAX_METHOD_LEN || head.body_len() > MAX_MSG_LEN {
            warn!("frame too large {:?}", head);
            return Err(RpcIntErr::Decode);
        }
        Ok(head)
    }

    #[inline]
    pub fn method_len(&self) -> usize {
        self.method_len.get() as usize
    }

    /// Bytes following the method name
    #[inline]
    pub fn body_len(&self) -> usize {
        if self.flag & ERR_FLAG_NUM != 0 { 0 } else { self.msg_len.get() as usize }
    }

    /// Assemble the frame after method name and body are read.
    pub fn into_frame(self, method: Option<String>, body: Vec<u8>) -> Result<Frame, RpcIntErr> {
        let kind = FrameKind::from_u8(self.kind).ok_or(RpcIntErr::Decode)?;
        let mut frame = Frame::new(self.stream_id.get(), kind);
        if kind == FrameKind::Open {
            frame.method = Some(method.unwrap_or_default());
            frame.timeout_ms = self.timeout_ms.get();
        }
        if kind == FrameKind::Error {
            if self.flag & ERR_FLAG_NUM != 0 {
                frame.err = Some(EncodedErr::Num(self.msg_len.get()));
            } else {
                frame.err = Some(EncodedErr::from_str_bytes(&body));
            }
        } else if self.flag & FLAG_HAS_PAYLOAD != 0 {
            frame.payload = Some(body);
        }
        Ok(frame)
    }
}

impl fmt::Debug for FrameHead {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[id:{}, kind:{}, flag:{}, method:{}, msg:{}]",
            self.stream_id.get(),
            self.kind,
            self.flag,
            self.method_len.get(),
            self.msg_len.get()
        )
    }
}
