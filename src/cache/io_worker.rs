//! # The I/O worker
//!
//! One background thread owns every blocking source operation. It drains
//! the op queue in FIFO order; clients only ever touch frames that are
//! already in memory, blocking at most on a readiness or write-back signal
//! that this thread raises.
//!
//! Ops that reference a closed descriptor park on the descriptor's
//! reopen signal instead of failing: the op was enqueued while the
//! descriptor was live, and a reopen is the only thing that can make its
//! source usable again. Engine shutdown wakes those waiters and abandons
//! the op.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;

use log::{debug, error, trace, warn};

use super::descriptor::Descriptor;
use super::engine::EngineShared;
use super::op_queue::{CtrlOp, FlushTargets};
use super::page::page_align;
use crate::config::PAGE_SIZE;

pub(crate) struct IoWorker {
    shared: Arc<EngineShared>,
}

impl IoWorker {
    pub fn spawn(shared: Arc<EngineShared>) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name("bytecache-io".into())
            .spawn(move || IoWorker { shared }.run())
            .expect("failed to spawn cache i/o worker")
    }

    fn run(&self) {
        debug!("i/o worker started");
        loop {
            match self.shared.queue.pop() {
                CtrlOp::Quit => break,
                CtrlOp::Load { desc, frame, offset } => self.load(&desc, frame, offset),
                CtrlOp::Store { desc, frame, offset } => self.store(&desc, frame, offset),
                CtrlOp::Flush { desc, targets, done } => {
                    self.flush(&desc, &targets);
                    done.finish();
                }
                CtrlOp::FlushClose { desc, targets, done } => {
                    self.flush(&desc, &targets);
                    self.close_source(&desc);
                    done.finish();
                }
            }
        }
        debug!("i/o worker stopped");
    }

    /// True unless the engine is shutting down. Parks on the descriptor's
    /// reopen signal while it is closed.
    fn await_descriptor(&self, desc: &Descriptor) -> Option<u64> {
        desc.wait_valid_or_exit(&self.shared.exit)
    }

    fn load(&self, desc: &Arc<Descriptor>, frame: usize, offset: u64) {
        let Some(total_size) = self.await_descriptor(desc) else {
            return;
        };

        let guid = desc.page_guid(offset);
        {
            // The mapping may have been cancelled or reassigned since the
            // op was enqueued.
            let state = self.shared.state.lock();
            if state.page_map.lookup(guid) != Some(frame) {
                trace!("load {guid:?}: mapping gone, skipping");
                return;
            }
        }

        let frame_ref = &self.shared.frames[frame];
        let Some(mut data) = frame_ref.begin_load() else {
            trace!("load {guid:?}: frame already ready, skipping");
            return;
        };

        let page_offset = page_align(offset);
        let read = desc.source().read_at(page_offset, &mut data[..]);
        let used_size = match read {
            Ok(n) => {
                if n < PAGE_SIZE && page_offset + PAGE_SIZE as u64 <= total_size {
                    // A short read that does not reach the end of the
                    // source breaks the paging model.
                    error!(
                        "load {guid:?}: short read ({n} of {PAGE_SIZE} bytes) before end of source"
                    );
                }
                trace!("load {guid:?}: {n} bytes");
                n
            }
            Err(err) => {
                error!("load {guid:?} failed: {err}");
                0
            }
        };

        // An eviction may have reassigned the frame to another page while
        // the source read was in flight; publishing these bytes would hand
        // that page's readers the wrong data. Left unpublished, the frame
        // stays not-ready and the load queued for the new page fills it.
        // (Taking the engine lock under the data lock is safe: no path
        // holds the engine mutex while blocking on a data lock.)
        let still_mapped = self.shared.state.lock().page_map.lookup(guid) == Some(frame);
        if still_mapped {
            // Publish while still holding the data lock so readers woken by
            // the signal observe the final byte count.
            frame_ref
                .meta_write()
                .set_used_size(used_size)
                .set_ready(true);
        } else {
            trace!("load {guid:?}: frame reassigned during read, discarding");
        }
        drop(data);
    }

    fn store(&self, desc: &Arc<Descriptor>, frame: usize, offset: u64) {
        if self.await_descriptor(desc).is_none() {
            return;
        }

        let frame_ref = &self.shared.frames[frame];
        // Shared data lock without the readiness wait: after an eviction
        // the ready flag describes the page that replaced the victim, while
        // these bytes are still the victim's.
        let data = frame_ref.data_for_store();
        let (dirty, used_size) = {
            let meta = frame_ref.meta_read();
            (meta.dirty(), meta.used_size())
        };
        if !dirty {
            trace!("store frame {frame}@{offset}: already clean, skipping");
            return;
        }

        match desc.source().write_at(offset, &data[..used_size]) {
            Ok(()) => {
                trace!("store frame {frame}@{offset}: {used_size} bytes");
                // Clear dirty before releasing the data lock so no client
                // write can slip in between and have its dirty bit eaten.
                frame_ref.meta_write().set_dirty(false);
            }
            Err(err) => {
                warn!("store frame {frame}@{offset} failed: {err}");
                desc.state().last_error = Some(err);
            }
        }
        drop(data);
    }

    fn flush(&self, desc: &Arc<Descriptor>, targets: &FlushTargets) {
        for &(frame, offset) in targets {
            self.store(desc, frame, offset);
        }
    }

    fn close_source(&self, desc: &Arc<Descriptor>) {
        if let Err(err) = desc.source().close() {
            warn!("closing source '{}' failed: {err}", desc.path());
            desc.state().last_error = Some(err);
        }
        desc.state().valid = false;
        debug!("descriptor {} ('{}') closed", desc.id(), desc.path());
    }
}

impl EngineShared {
    /// Requests worker termination: pending stores drain first, then the
    /// queued `Quit` stops the loop. Parked valid-waiters are woken so a
    /// stuck op cannot outlive the engine.
    pub(crate) fn shutdown(&self) {
        if self.exit.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let state = self.state.lock();
            for desc in state.descriptors.values() {
                desc.notify_valid();
            }
        }
        self.queue.push(CtrlOp::Quit);
    }
}
