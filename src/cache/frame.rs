//! # Frames and their access guards
//!
//! A [`Frame`] is one page-sized buffer from the fixed pool, plus the
//! metadata the engine needs to reuse it: whether it is assigned (`used`),
//! whether its page has been loaded (`ready`), whether it diverges from the
//! source (`dirty`), how many of its bytes are meaningful (`used_size`, the
//! page may be a source's partial tail), and its last-use stamp for LRU
//! ordering.
//!
//! Access is mediated by four scoped guard types, each exposing only the
//! capability its lock mode grants:
//!
//! | Guard       | Lock              | Capability                           |
//! |-------------|-------------------|--------------------------------------|
//! | [`MetaRead`]  | meta mutex        | flag/counter getters               |
//! | [`MetaWrite`] | meta mutex        | chainable setters + signalling     |
//! | [`DataRead`]  | data lock, shared | `&[u8]`, waits for readiness       |
//! | [`DataWrite`] | data lock, excl.  | `&mut [u8]`, optional clean wait   |
//!
//! Readiness and dirty-clear transitions broadcast on the frame's condition
//! variable: `set_ready(true)` wakes readers blocked on a pending load, and
//! `set_dirty(false)` wakes loaders blocked behind an in-flight write-back.
//!
//! A frame handed to a client copy is held through a [`PinnedFrame`] guard:
//! the pin count keeps eviction from reassigning the frame to another page
//! while the client blocks on readiness or copies, and drops release it.
//!
//! Metadata sections are a handful of loads and stores and never block on
//! the data lock while holding the meta mutex; the waiting constructors
//! release the meta mutex before touching the data lock. The write-back
//! path reads the buffer without the readiness wait: after an eviction the
//! `ready` flag describes the page that *replaced* the victim, while the
//! write-back must still read the victim's bytes.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::PAGE_SIZE;

#[derive(Debug, Default)]
struct FrameMeta {
    used: bool,
    ready: bool,
    dirty: bool,
    used_size: usize,
    last_use: u64,
}

/// One slot of the frame pool.
pub(crate) struct Frame {
    meta: Mutex<FrameMeta>,
    ready_signal: Condvar,
    pins: AtomicU32,
    data: RwLock<Box<[u8; PAGE_SIZE]>>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            meta: Mutex::new(FrameMeta::default()),
            ready_signal: Condvar::new(),
            pins: AtomicU32::new(0),
            data: RwLock::new(Box::new([0u8; PAGE_SIZE])),
        }
    }

    fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        let prev = self.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "unpin called on an unpinned frame");
    }

    /// True while any [`PinnedFrame`] for this slot is live. Pinned frames
    /// are not eviction candidates.
    pub fn is_pinned(&self) -> bool {
        self.pins.load(Ordering::Acquire) > 0
    }

    /// Shared view of the metadata.
    pub fn meta_read(&self) -> MetaRead<'_> {
        MetaRead {
            guard: self.meta.lock(),
        }
    }

    /// Exclusive view of the metadata with signalling setters.
    pub fn meta_write(&self) -> MetaWrite<'_> {
        MetaWrite {
            guard: self.meta.lock(),
            signal: &self.ready_signal,
        }
    }

    /// Shared access to the buffer once the frame is ready.
    ///
    /// Blocks on the readiness signal while a load is outstanding.
    pub fn data_read(&self) -> DataRead<'_> {
        let mut meta = self.meta.lock();
        while !meta.ready {
            self.ready_signal.wait(&mut meta);
        }
        drop(meta);
        DataRead {
            guard: self.data.read(),
        }
    }

    /// Shared access to the buffer for write-back, regardless of readiness.
    pub fn data_for_store(&self) -> DataRead<'_> {
        DataRead {
            guard: self.data.read(),
        }
    }

    /// Exclusive access to the buffer.
    ///
    /// With `wait_for_clean`, first blocks until any in-flight write-back
    /// has cleared the dirty flag, so a load cannot clobber bytes that are
    /// still on their way to the source.
    pub fn data_write(&self, wait_for_clean: bool) -> DataWrite<'_> {
        if wait_for_clean {
            let mut meta = self.meta.lock();
            while meta.dirty {
                self.ready_signal.wait(&mut meta);
            }
        }
        DataWrite {
            guard: self.data.write(),
        }
    }

    /// Exclusive buffer access for the load path.
    ///
    /// Waits for a pending write-back to clear the dirty flag, then
    /// re-checks readiness under the data lock: a full-page client write
    /// may have published the page while we waited, in which case the load
    /// is stale and `None` tells the worker to drop it.
    pub fn begin_load(&self) -> Option<DataWrite<'_>> {
        let mut meta = self.meta.lock();
        loop {
            if meta.ready {
                return None;
            }
            if !meta.dirty {
                break;
            }
            self.ready_signal.wait(&mut meta);
        }
        drop(meta);

        let guard = self.data.write();
        // Writers publish readiness before releasing the data lock, so this
        // re-check closes the window between the wait above and the lock.
        if self.meta.lock().ready {
            return None;
        }
        Some(DataWrite { guard })
    }

    /// Exclusive buffer access for a whole-page client write.
    ///
    /// A ready frame is taken immediately. A freshly reassigned frame may
    /// still carry its previous page's bytes with a write-back in flight;
    /// then we wait for the dirty flag to clear so the store reads the old
    /// page, not ours.
    pub fn begin_overwrite(&self) -> DataWrite<'_> {
        let mut meta = self.meta.lock();
        while !meta.ready && meta.dirty {
            self.ready_signal.wait(&mut meta);
        }
        drop(meta);
        DataWrite {
            guard: self.data.write(),
        }
    }

    /// Exclusive buffer access for a partial-page client write.
    ///
    /// Partial writes merge with existing page content, so they wait for
    /// readiness like readers do.
    pub fn begin_merge(&self) -> DataWrite<'_> {
        let mut meta = self.meta.lock();
        while !meta.ready {
            self.ready_signal.wait(&mut meta);
        }
        drop(meta);
        DataWrite {
            guard: self.data.write(),
        }
    }
}

/// Pin guard over one frame, released on drop.
///
/// While a pin is live the engine's eviction passes over the frame, so the
/// page assignment a client resolved under the engine mutex stays valid for
/// the whole copy, including any wait on readiness. Derefs to [`Frame`] so
/// the data and meta guards are taken straight off the pin.
pub(crate) struct PinnedFrame<'a> {
    frame: &'a Frame,
}

impl<'a> PinnedFrame<'a> {
    pub fn new(frame: &'a Frame) -> Self {
        frame.pin();
        Self { frame }
    }
}

impl std::ops::Deref for PinnedFrame<'_> {
    type Target = Frame;

    fn deref(&self) -> &Frame {
        self.frame
    }
}

impl Drop for PinnedFrame<'_> {
    fn drop(&mut self) {
        self.frame.unpin();
    }
}

/// Shared metadata guard; getters only.
pub(crate) struct MetaRead<'a> {
    guard: MutexGuard<'a, FrameMeta>,
}

impl MetaRead<'_> {
    pub fn used(&self) -> bool {
        self.guard.used
    }

    pub fn ready(&self) -> bool {
        self.guard.ready
    }

    pub fn dirty(&self) -> bool {
        self.guard.dirty
    }

    pub fn used_size(&self) -> usize {
        self.guard.used_size
    }

    pub fn last_use(&self) -> u64 {
        self.guard.last_use
    }
}

/// Exclusive metadata guard; setters chain so reassignment reads as one
/// statement at the call site.
pub(crate) struct MetaWrite<'a> {
    guard: MutexGuard<'a, FrameMeta>,
    signal: &'a Condvar,
}

impl MetaWrite<'_> {
    pub fn used(&self) -> bool {
        self.guard.used
    }

    pub fn dirty(&self) -> bool {
        self.guard.dirty
    }

    pub fn used_size(&self) -> usize {
        self.guard.used_size
    }

    pub fn set_used(&mut self, used: bool) -> &mut Self {
        self.guard.used = used;
        self
    }

    /// Marks the frame loaded. Wakes every reader parked on readiness.
    pub fn set_ready(&mut self, ready: bool) -> &mut Self {
        self.guard.ready = ready;
        if ready {
            self.signal.notify_all();
        }
        self
    }

    /// Sets or clears the dirty flag. Clearing wakes loaders waiting for an
    /// in-flight write-back to finish.
    pub fn set_dirty(&mut self, dirty: bool) -> &mut Self {
        self.guard.dirty = dirty;
        if !dirty {
            self.signal.notify_all();
        }
        self
    }

    pub fn set_used_size(&mut self, used_size: usize) -> &mut Self {
        debug_assert!(used_size <= PAGE_SIZE);
        self.guard.used_size = used_size;
        self
    }

    pub fn set_last_use(&mut self, step: u64) -> &mut Self {
        self.guard.last_use = step;
        self
    }
}

/// Shared buffer guard.
pub(crate) struct DataRead<'a> {
    guard: RwLockReadGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl std::ops::Deref for DataRead<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[..]
    }
}

/// Exclusive buffer guard.
pub(crate) struct DataWrite<'a> {
    guard: RwLockWriteGuard<'a, Box<[u8; PAGE_SIZE]>>,
}

impl std::ops::Deref for DataWrite<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard[..]
    }
}

impl std::ops::DerefMut for DataWrite<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard[..]
    }
}
