//! The control-op queue between client threads and the I/O worker.
//!
//! A mutex-guarded FIFO with a condition variable gating the worker's pop.
//! Clients push loads and stores at the back; flushes jump the queue with a
//! front push after subsuming the per-descriptor ops they make redundant.
//! Flush-class ops carry a completion latch so the submitting thread can
//! wait for exactly its own op, never for the whole queue to drain.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::collections::VecDeque;

use super::descriptor::Descriptor;

/// Write-back targets of a flush: (frame index, page-aligned file offset).
pub(crate) type FlushTargets = SmallVec<[(usize, u64); 16]>;

/// One queued control operation.
pub(crate) enum CtrlOp {
    /// Read a page from the source into its frame.
    Load {
        desc: Arc<Descriptor>,
        frame: usize,
        offset: u64,
    },
    /// Write a dirty frame back to the source.
    Store {
        desc: Arc<Descriptor>,
        frame: usize,
        offset: u64,
    },
    /// Write back the listed frames, then release the latch.
    Flush {
        desc: Arc<Descriptor>,
        targets: FlushTargets,
        done: Arc<OpDone>,
    },
    /// Flush, then close the source and invalidate the descriptor.
    FlushClose {
        desc: Arc<Descriptor>,
        targets: FlushTargets,
        done: Arc<OpDone>,
    },
    /// Terminate the worker.
    Quit,
}

/// Completion latch for flush-class ops.
#[derive(Default)]
pub(crate) struct OpDone {
    finished: Mutex<bool>,
    signal: Condvar,
}

impl OpDone {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn finish(&self) {
        *self.finished.lock() = true;
        self.signal.notify_all();
    }

    pub fn wait(&self) {
        let mut finished = self.finished.lock();
        while !*finished {
            self.signal.wait(&mut finished);
        }
    }
}

#[derive(Default)]
pub(crate) struct OpQueue {
    ops: Mutex<VecDeque<CtrlOp>>,
    available: Condvar,
}

impl OpQueue {
    /// Appends an op in FIFO position.
    pub fn push(&self, op: CtrlOp) {
        self.ops.lock().push_back(op);
        self.available.notify_one();
    }

    /// Pushes a priority op ahead of everything queued.
    pub fn push_front(&self, op: CtrlOp) {
        self.ops.lock().push_front(op);
        self.available.notify_one();
    }

    /// Blocks until an op is available and removes it.
    pub fn pop(&self) -> CtrlOp {
        let mut ops = self.ops.lock();
        loop {
            if let Some(op) = ops.pop_front() {
                return op;
            }
            self.available.wait(&mut ops);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Removes every queued op matching `pred` and returns them in queue
    /// order, so the caller can unwind their side effects.
    pub fn remove_matching(&self, mut pred: impl FnMut(&CtrlOp) -> bool) -> Vec<CtrlOp> {
        let mut ops = self.ops.lock();
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(ops.len());
        for op in ops.drain(..) {
            if pred(&op) {
                removed.push(op);
            } else {
                kept.push_back(op);
            }
        }
        *ops = kept;
        removed
    }
}
