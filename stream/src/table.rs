//! Routing of inbound frames to live streams.

use crossfire::MTx;
use rustc_hash::FxHashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use strand_rpc_core::context::CallContext;
use strand_rpc_core::error::EncodedErr;

/// What the routing loop hands over to a stream's inbound queue
#[derive(Debug)]
pub enum Inbound {
    Data(Vec<u8>),
    HalfClose,
    End(Option<Vec<u8>>),
    Error(EncodedErr),
}

struct StreamEntry {
    tx: MTx<Inbound>,
    ctx: CallContext,
}

/// Stream id to inbound queue of one connection.
///
/// The lock is only held inside each accessor, never across an await.
pub struct StreamTable {
    streams: Mutex<FxHashMap<u64, StreamEntry>>,
    next_id: AtomicU64,
}

impl StreamTable {
    pub fn new() -> Self {
        Self { streams: Mutex::new(FxHashMap::default()), next_id: AtomicU64::new(1) }
    }

    /// Ids start from 1 and are never reused within a connection
    #[inline]
    pub fn alloc_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Return false when the id is already live
    pub fn insert(&self, id: u64, tx: MTx<Inbound>, ctx: CallContext) -> bool {
        let mut streams = self.streams.lock().unwrap();
        if streams.contains_key(&id) {
            return false;
        }
        streams.insert(id, StreamEntry { tx, ctx });
        true
    }

    #[inline]
    pub fn contains(&self, id: u64) -> bool {
        self.streams.lock().unwrap().contains_key(&id)
    }

    /// Queue an inbound item, false if the stream is unknown (a late frame of a finished call)
    pub fn route(&self, id: u64, item: Inbound) -> bool {
        let streams = self.streams.lock().unwrap();
        if let Some(entry) = streams.get(&id) {
            // The receiver might be dropped, that is a finished call as well
            return entry.tx.send(item).is_ok();
        }
        false
    }

    /// Queue the item and forget the entry, the stream sees a disconnect after draining it.
    pub fn route_last(&self, id: u64, item: Inbound) -> bool {
        let entry = self.streams.lock().unwrap().remove(&id);
        if let Some(entry) = entry {
            return entry.tx.send(item).is_ok();
        }
        false
    }

    /// Cancel the context of a live stream
    pub fn cancel(&self, id: u64) -> bool {
        let ctx = self.streams.lock().unwrap().get(&id).map(|e| e.ctx.clone());
        if let Some(ctx) = ctx {
            ctx.cancel();
            return true;
        }
        false
    }

    #[inline]
    pub fn remove(&self, id: u64) {
        let _ = self.streams.lock().unwrap().remove(&id);
    }

    /// Drop every entry, the pending receivers observe a disconnected queue
    pub fn clear(&self) -> usize {
        let streams = std::mem::take(&mut *self.streams.lock().unwrap());
        streams.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.streams.lock().unwrap().len()
    }
}
