use super::FrameTransport;
use crate::proto::Frame;
use crossfire::{MAsyncRx, MTx};
use std::sync::Mutex;
use std::{fmt, io};

/// One end of an in-process frame channel, created by [mem_pair()].
///
/// Frames are moved without serialization, which makes it the channel of choice for tests.
pub struct MemTransport {
    name: &'static str,
    tx: Mutex<Option<MTx<Frame>>>,
    rx: MAsyncRx<Frame>,
}

/// Return two connected ends, frames written on one are read from the other in order.
pub fn mem_pair() -> (MemTransport, MemTransport) {
    let (a_tx, b_rx) = crossfire::mpmc::unbounded_async();
    let (b_tx, a_rx) = crossfire::mpmc::unbounded_async();
    (
        MemTransport { name: "mem-a", tx: Mutex::new(Some(a_tx)), rx: a_rx },
        MemTransport { name: "mem-b", tx: Mutex::new(Some(b_tx)), rx: b_rx },
    )
}

impl fmt::Debug for MemTransport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl FrameTransport for MemTransport {
    async fn read_frame(&self) -> io::Result<Frame> {
        match self.rx.recv().await {
            Ok(frame) => Ok(frame),
            Err(_) => Err(io::ErrorKind::UnexpectedEof.into()),
        }
    }

    async fn write_frame(&self, frame: Frame) -> io::Result<()> {
        let guard = self.tx.lock().unwrap();
        if let Some(tx) = guard.as_ref() {
            if tx.send(frame).is_ok() {
                return Ok(());
            }
        }
        Err(io::ErrorKind::BrokenPipe.into())
    }

    #[inline]
    async fn flush(&self) -> io::Result<()> {
        Ok(())
    }

    async fn close(&self) {
        let _ = self.tx.lock().unwrap().take();
    }
}
