//! Per-open-source descriptor state.
//!
//! A descriptor outlives `close`: its cursor, cached page set and policy
//! stick around so reopening the same path picks up where it left off.
//! Only `permanent_close` destroys it.
//!
//! The cursor-side state and the data source sit behind separate locks so
//! a client inspecting or moving the cursor never waits behind the worker's
//! blocking source I/O.

use std::collections::BTreeSet;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::page::PageGuid;
use super::policy::CachePolicy;
use crate::error::CacheError;
use crate::source::DataSource;

pub(crate) struct DescriptorState {
    /// Current read/write cursor in bytes.
    pub offset: u64,
    /// Cached source length; refreshed on open and `get_len`.
    pub total_size: u64,
    pub policy: CachePolicy,
    /// GUIDs of this descriptor's resident pages, in file order.
    pub pages: BTreeSet<PageGuid>,
    /// False between `close` and a reopening `open`.
    pub valid: bool,
    /// Sticky short-read marker, cleared by seek.
    pub eof: bool,
    /// Last worker-side store failure, taken by `last_error`.
    pub last_error: Option<CacheError>,
}

pub(crate) struct Descriptor {
    id: u32,
    /// Shifted 24-bit GUID prefix unique to this descriptor.
    prefix: u64,
    path: String,
    state: Mutex<DescriptorState>,
    became_valid: Condvar,
    source: Mutex<Box<dyn DataSource>>,
}

impl Descriptor {
    pub fn new(
        id: u32,
        prefix: u64,
        path: String,
        source: Box<dyn DataSource>,
        policy: CachePolicy,
        total_size: u64,
    ) -> Self {
        Self {
            id,
            prefix,
            path,
            state: Mutex::new(DescriptorState {
                offset: 0,
                total_size,
                policy,
                pages: BTreeSet::new(),
                valid: true,
                eof: false,
                last_error: None,
            }),
            became_valid: Condvar::new(),
            source: Mutex::new(source),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn prefix(&self) -> u64 {
        self.prefix
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// GUID of the page containing `offset` in this source.
    pub fn page_guid(&self, offset: u64) -> PageGuid {
        PageGuid::new(self.prefix, offset)
    }

    pub fn state(&self) -> MutexGuard<'_, DescriptorState> {
        self.state.lock()
    }

    pub fn source(&self) -> MutexGuard<'_, Box<dyn DataSource>> {
        self.source.lock()
    }

    /// Blocks until the descriptor is valid again, returning its total
    /// size, or `None` once `exit` is raised. Worker ops dequeued between a
    /// close and a reopen park here.
    pub fn wait_valid_or_exit(&self, exit: &std::sync::atomic::AtomicBool) -> Option<u64> {
        use std::sync::atomic::Ordering;

        let mut state = self.state.lock();
        while !state.valid {
            if exit.load(Ordering::SeqCst) {
                return None;
            }
            self.became_valid.wait(&mut state);
        }
        Some(state.total_size)
    }

    /// Wakes worker ops parked in [`Descriptor::wait_valid`].
    pub fn notify_valid(&self) {
        self.became_valid.notify_all();
    }
}
