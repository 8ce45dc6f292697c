//! # CacheEngine
//!
//! The public face of the cache and the owner of everything shared: the
//! frame pool, the page map, the policy pools, the descriptor registry and
//! the op queue feeding the I/O worker.
//!
//! ```text
//! ┌────────────┐ open/read/write/seek  ┌──────────────────────────────┐
//! │  clients   │ ─────────────────────>│  CacheEngine                 │
//! └────────────┘                       │  ├─ engine mutex             │
//!       ▲ block on frame               │  │   ├─ PageMap              │
//!       │ readiness                    │  │   ├─ PolicySet            │
//!       │                              │  │   ├─ step counter         │
//! ┌────────────┐   Load/Store/Flush    │  │   └─ descriptor registry  │
//! │  IoWorker  │ <──── OpQueue ────────│  └─ frame pool (per-frame    │
//! └────────────┘                       │       meta + data locks)     │
//!       │ read_at/write_at             └──────────────────────────────┘
//!       ▼
//!   data sources
//! ```
//!
//! The engine mutex covers only structural work: map and pool mutations,
//! free-frame scans, the step counter, registry lookups. It is released
//! before any page copy and before blocking on frame signals, so clients
//! touching ready frames never serialize behind a miss. Frames handed out
//! by the miss path are pinned until the client copy finishes; eviction
//! passes over pinned frames, so a resolved page→frame assignment cannot
//! change under a reader parked on readiness or mid-copy.
//!
//! ## Lock order
//!
//! engine mutex → descriptor state → op queue → frame meta → frame data →
//! descriptor source. The queue and frame-meta locks are only ever held
//! together under the engine mutex; meta sections never block on the data
//! lock while holding the meta mutex. The worker re-validates a loaded
//! page's mapping under the engine mutex while holding that frame's data
//! lock, which is sound because no path blocks on a data lock while
//! holding the engine mutex.

use std::io::SeekFrom;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use hashbrown::HashMap;
use log::{debug, trace};
use parking_lot::Mutex;

use super::descriptor::Descriptor;
use super::frame::{Frame, PinnedFrame};
use super::io_worker::IoWorker;
use super::op_queue::{CtrlOp, FlushTargets, OpDone, OpQueue};
use super::page::{in_page, page_align, shift_prefix};
use super::page_map::PageMap;
use super::policy::{CachePolicy, PolicySet};
use crate::config::{
    DEFAULT_FRAME_COUNT, FIFO_THRESH, GUID_OFFSET_MASK, GUID_PREFIX_SPACE, LEN_UNSPECIFIED,
    PAGE_SIZE, SEEK_READ_AHEAD,
};
use crate::error::{CacheError, Result};
use crate::source::{FsProvider, OpenMode, SourceProvider};

/// Opaque reference to an open source. Stays valid across `close`; only
/// `permanent_close` retires it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

/// Point-in-time counters for observability and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub frame_count: usize,
    pub frames_in_use: usize,
    pub cached_pages: usize,
    pub permanent_pages: usize,
    pub lru_pages: usize,
    pub fifo_pages: usize,
    pub step: u64,
}

pub(crate) struct EngineState {
    pub page_map: PageMap,
    pub policies: PolicySet,
    pub step: u64,
    pub descriptors: HashMap<u32, Arc<Descriptor>>,
    by_path: HashMap<String, u32>,
    by_prefix: HashMap<u64, u32>,
    next_id: u32,
    next_prefix: u64,
}

/// State shared between the engine front end and the I/O worker.
pub(crate) struct EngineShared {
    pub frames: Vec<Frame>,
    pub state: Mutex<EngineState>,
    pub queue: OpQueue,
    pub exit: AtomicBool,
}

/// Configures and constructs a [`CacheEngine`].
pub struct CacheEngineBuilder {
    frame_count: usize,
    provider: Option<Box<dyn SourceProvider>>,
}

impl CacheEngineBuilder {
    /// Number of frames in the pool. Fixed for the engine's lifetime.
    pub fn frame_count(mut self, frames: usize) -> Self {
        self.frame_count = frames;
        self
    }

    /// Source provider used by `open`. Defaults to [`FsProvider`] resolving
    /// absolute paths.
    pub fn provider(mut self, provider: impl SourceProvider + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    pub fn build(self) -> Result<CacheEngine> {
        assert!(self.frame_count > 0, "cache needs at least one frame");

        let frames = (0..self.frame_count).map(|_| Frame::new()).collect();
        let shared = Arc::new(EngineShared {
            frames,
            state: Mutex::new(EngineState {
                page_map: PageMap::default(),
                policies: PolicySet::default(),
                step: 0,
                descriptors: HashMap::new(),
                by_path: HashMap::new(),
                by_prefix: HashMap::new(),
                next_id: 1,
                next_prefix: 1,
            }),
            queue: OpQueue::default(),
            exit: AtomicBool::new(false),
        });

        let worker = IoWorker::spawn(Arc::clone(&shared));
        debug!("cache engine started with {} frames", self.frame_count);

        Ok(CacheEngine {
            shared,
            provider: self
                .provider
                .unwrap_or_else(|| Box::new(FsProvider::default())),
            worker: Mutex::new(Some(worker)),
        })
    }
}

pub struct CacheEngine {
    shared: Arc<EngineShared>,
    provider: Box<dyn SourceProvider>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CacheEngine {
    pub fn builder() -> CacheEngineBuilder {
        CacheEngineBuilder {
            frame_count: DEFAULT_FRAME_COUNT,
            provider: None,
        }
    }

    /// Opens `path`, reviving the previous descriptor when the path was
    /// opened and closed earlier in this engine's lifetime.
    pub fn open(&self, path: &str, mode: OpenMode, policy: CachePolicy) -> Result<Handle> {
        if path.is_empty() {
            return Err(CacheError::EmptyPath);
        }

        let (handle, desc, prewarm_from, prewarm_pages) = {
            let mut state = self.shared.state.lock();

            if let Some(&id) = state.by_path.get(path) {
                let desc = Arc::clone(
                    state
                        .descriptors
                        .get(&id)
                        .expect("path index points at a live descriptor"),
                );
                let mut dst = desc.state();
                if dst.valid {
                    return Err(CacheError::AlreadyOpen(path.to_string()));
                }

                desc.source().reopen(mode)?;
                dst.total_size = desc.source().len()?;
                if dst.policy != policy {
                    // Move every resident page into the new policy's pool.
                    let step = state.step;
                    let old = dst.policy;
                    for &guid in &dst.pages {
                        state.policies.on_remove(guid, old);
                        state.policies.on_insert(guid, policy, step);
                    }
                    dst.policy = policy;
                }
                dst.valid = true;
                dst.eof = false;
                let offset = dst.offset;
                drop(dst);

                // Worker ops parked across the close may proceed now.
                desc.notify_valid();
                debug!("revived '{path}' as handle {id}");
                (Handle(id), desc, offset, SEEK_READ_AHEAD)
            } else {
                let source = self.provider.open(path, mode)?;
                let total_size = source.len()?;

                let id = state.next_id;
                state.next_id += 1;
                let raw_prefix = state.next_prefix;
                state.next_prefix += 1;
                assert!(
                    raw_prefix < GUID_PREFIX_SPACE,
                    "descriptor prefix space exhausted"
                );
                let prefix = shift_prefix(raw_prefix);

                let desc = Arc::new(Descriptor::new(
                    id,
                    prefix,
                    path.to_string(),
                    source,
                    policy,
                    total_size,
                ));
                state.descriptors.insert(id, Arc::clone(&desc));
                state.by_path.insert(path.to_string(), id);
                state.by_prefix.insert(prefix, id);

                debug!("opened '{path}' as handle {id} ({policy:?}, {total_size} bytes)");
                (Handle(id), desc, 0, policy.prewarm_pages())
            }
        };

        self.prefetch(&desc, prewarm_from, prewarm_pages);
        Ok(handle)
    }

    /// Flushes the descriptor's dirty pages, closes its source and marks it
    /// invalid. Cached pages and the cursor survive for a later `open` of
    /// the same path.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let desc = self.descriptor(handle)?;
        let done = {
            let mut state = self.shared.state.lock();
            if !desc.state().valid {
                return Ok(());
            }
            // Queued loads die with the close; their frames go back to the
            // free pool.
            self.cancel_loads(&mut state, &desc, None);
            let targets = self.collect_flush_targets(&mut state, &desc);
            let done = OpDone::new();
            self.shared.queue.push_front(CtrlOp::FlushClose {
                desc: Arc::clone(&desc),
                targets,
                done: Arc::clone(&done),
            });
            done
        };
        done.wait();
        Ok(())
    }

    /// `close`, then evicts the descriptor's pages and destroys it. The
    /// handle is dead afterwards.
    pub fn permanent_close(&self, handle: Handle) -> Result<()> {
        let desc = self.descriptor(handle)?;
        self.close(handle)?;

        let mut state = self.shared.state.lock();
        let (pages, policy) = {
            let dst = desc.state();
            (dst.pages.iter().copied().collect::<Vec<_>>(), dst.policy)
        };
        for guid in pages {
            if let Some(idx) = state.page_map.erase(guid) {
                state.policies.on_remove(guid, policy);
                self.shared.frames[idx]
                    .meta_write()
                    .set_used(false)
                    .set_ready(false)
                    .set_used_size(0);
            }
        }
        desc.state().pages.clear();

        state.descriptors.remove(&desc.id());
        state.by_path.remove(desc.path());
        state.by_prefix.remove(&desc.prefix());
        debug!("destroyed descriptor {} ('{}')", desc.id(), desc.path());
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at the cursor. Returns short at the
    /// end of the source, zero-filling the unread tail of `buf`.
    pub fn read(&self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        let desc = self.descriptor(handle)?;
        if buf.is_empty() {
            return Ok(0);
        }

        let (start, total_size) = {
            let dst = desc.state();
            if !dst.valid {
                return Err(CacheError::cant_read(dst.offset, "source is closed"));
            }
            (dst.offset, dst.total_size)
        };

        let want = (buf.len() as u64).min(total_size.saturating_sub(start)) as usize;
        let mut done = 0;
        while done < want {
            let offset = start + done as u64;
            let in_pg = in_page(offset);
            let chunk = (PAGE_SIZE - in_pg).min(want - done);

            // The pin keeps the frame's page assignment stable across the
            // readiness wait and the copy.
            let frame = self.ensure_page(&desc, offset)?;

            let data = frame.data_read();
            // Clamp to the page's meaningful bytes; the last page of a
            // source is usually partial.
            let used = frame.meta_read().used_size();
            let copy = used.saturating_sub(in_pg).min(chunk);
            buf[done..done + copy].copy_from_slice(&data[in_pg..in_pg + copy]);
            drop(data);
            drop(frame);

            done += copy;
            if copy < chunk {
                break;
            }
        }

        buf[done..].fill(0);
        {
            let mut dst = desc.state();
            dst.offset = start + done as u64;
            dst.eof = done < buf.len();
        }
        Ok(done)
    }

    /// Stores `data` at the cursor. Bytes land in the cache only; they
    /// reach the source on write-back (eviction, flush, close).
    pub fn write(&self, handle: Handle, data: &[u8]) -> Result<usize> {
        let desc = self.descriptor(handle)?;
        if data.is_empty() {
            return Ok(0);
        }

        let start = {
            let dst = desc.state();
            if !dst.valid {
                return Err(CacheError::cant_write(dst.offset, "source is closed"));
            }
            dst.offset
        };

        let mut done = 0;
        while done < data.len() {
            let offset = start + done as u64;
            let in_pg = in_page(offset);
            let chunk = (PAGE_SIZE - in_pg).min(data.len() - done);

            // Pinned until this segment's bytes and dirty flag are
            // published, so eviction cannot hand the frame to another page
            // in between.
            let frame = self.ensure_page(&desc, offset)?;

            if chunk == PAGE_SIZE {
                // Whole page: no need for the old contents, but a pending
                // write-back of the evicted page must drain first.
                let mut page = frame.begin_overwrite();
                page.copy_from_slice(&data[done..done + chunk]);
                frame
                    .meta_write()
                    .set_used_size(PAGE_SIZE)
                    .set_dirty(true)
                    .set_ready(true);
                drop(page);
            } else {
                // Partial page: merge with loaded content.
                let mut page = frame.begin_merge();
                page[in_pg..in_pg + chunk].copy_from_slice(&data[done..done + chunk]);
                let mut meta = frame.meta_write();
                let used = meta.used_size().max(in_pg + chunk);
                meta.set_used_size(used).set_dirty(true);
                drop(meta);
                drop(page);
            }

            done += chunk;
        }

        desc.state().offset = start + done as u64;
        Ok(done)
    }

    /// Moves the cursor. Queued loads farther than [`FIFO_THRESH`] pages
    /// from the target are cancelled, then [`SEEK_READ_AHEAD`] pages around
    /// the target are prefetched.
    pub fn seek(&self, handle: Handle, pos: SeekFrom) -> Result<u64> {
        let desc = self.descriptor(handle)?;

        let eff = {
            let mut state = self.shared.state.lock();
            let eff: i128 = {
                let dst = desc.state();
                match pos {
                    SeekFrom::Start(offset) => offset as i128,
                    SeekFrom::Current(delta) => dst.offset as i128 + delta as i128,
                    SeekFrom::End(delta) => dst.total_size as i128 + delta as i128,
                }
            };
            if eff < 0 || eff > GUID_OFFSET_MASK as i128 {
                return Err(CacheError::InvalidOffset);
            }
            let eff = eff as u64;

            if !self.shared.queue.is_empty() {
                self.cancel_loads(&mut state, &desc, Some(eff / PAGE_SIZE as u64));
            }

            let mut dst = desc.state();
            dst.offset = eff;
            dst.eof = false;
            eff
        };

        self.prefetch(&desc, eff, SEEK_READ_AHEAD);
        Ok(eff)
    }

    /// Write-backs every page of `handle` that is dirty at the moment of
    /// the call, returning once the source reflects them.
    pub fn flush(&self, handle: Handle) -> Result<()> {
        let desc = self.descriptor(handle)?;
        let done = {
            let mut state = self.shared.state.lock();
            if !desc.state().valid {
                // Close already flushed everything; nothing can be dirty.
                return Ok(());
            }
            let targets = self.collect_flush_targets(&mut state, &desc);
            let done = OpDone::new();
            self.shared.queue.push_front(CtrlOp::Flush {
                desc: Arc::clone(&desc),
                targets,
                done: Arc::clone(&done),
            });
            done
        };
        done.wait();
        Ok(())
    }

    /// Current source length. Queries the source when open and never lets
    /// the cached size shrink.
    pub fn get_len(&self, handle: Handle) -> Result<u64> {
        let desc = self.descriptor(handle)?;
        if !desc.state().valid {
            return Ok(desc.state().total_size);
        }
        let len = desc.source().len()?;
        let mut dst = desc.state();
        if len > dst.total_size {
            dst.total_size = len;
        }
        Ok(len)
    }

    /// True after a read came up short.
    pub fn eof_reached(&self, handle: Handle) -> Result<bool> {
        Ok(self.descriptor(handle)?.state().eof)
    }

    /// Current cursor position.
    pub fn position(&self, handle: Handle) -> Result<u64> {
        Ok(self.descriptor(handle)?.state().offset)
    }

    /// Takes the descriptor's last asynchronous write-back error, if any.
    pub fn last_error(&self, handle: Handle) -> Result<Option<CacheError>> {
        Ok(self.descriptor(handle)?.state().last_error.take())
    }

    /// Ensures the pages covering `length` bytes at the cursor are resident
    /// or on their way, enqueueing loads for the misses. Call before bulk
    /// reads. [`LEN_UNSPECIFIED`] prefetches the default read-ahead.
    pub fn check_cache(&self, handle: Handle, length: u64) -> Result<()> {
        let desc = self.descriptor(handle)?;
        let (offset, total_size) = {
            let dst = desc.state();
            if !dst.valid {
                return Ok(());
            }
            (dst.offset, dst.total_size)
        };

        if length == LEN_UNSPECIFIED {
            self.prefetch(&desc, offset, SEEK_READ_AHEAD);
            return Ok(());
        }

        let end = page_align(offset.saturating_add(length)).saturating_add(PAGE_SIZE as u64);
        let mut page = page_align(offset);
        while page < end && page < total_size {
            self.ensure_page(&desc, page)?;
            page += PAGE_SIZE as u64;
        }
        Ok(())
    }

    /// Counters for tests and monitoring.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        let frames_in_use = self
            .shared
            .frames
            .iter()
            .filter(|f| f.meta_read().used())
            .count();
        debug_assert_eq!(
            state.policies.len(),
            state.page_map.len(),
            "policy pools must partition the page map"
        );
        for frame in &self.shared.frames {
            debug_assert!(
                frame.meta_read().last_use() <= state.step,
                "frame stamped past the step counter"
            );
        }
        CacheStats {
            frame_count: self.shared.frames.len(),
            frames_in_use,
            cached_pages: state.page_map.len(),
            permanent_pages: state.policies.permanent_len(),
            lru_pages: state.policies.lru_len(),
            fifo_pages: state.policies.fifo_len(),
            step: state.step,
        }
    }

    /// File offsets of the pages currently resident for `handle`.
    pub fn resident_pages(&self, handle: Handle) -> Result<Vec<u64>> {
        let desc = self.descriptor(handle)?;
        let _state = self.shared.state.lock();
        let pages = desc.state().pages.iter().map(|g| g.file_offset()).collect();
        Ok(pages)
    }

    fn descriptor(&self, handle: Handle) -> Result<Arc<Descriptor>> {
        self.shared
            .state
            .lock()
            .descriptors
            .get(&handle.0)
            .cloned()
            .ok_or(CacheError::NoSuchHandle)
    }

    /// Resolves the page containing `offset` to a pinned frame, mapping it
    /// on a miss. The pin is taken under the engine mutex, so the returned
    /// assignment stays valid until the guard drops. On a miss within the
    /// source a load is enqueued; beyond the end the frame is zero-filled
    /// and published synchronously.
    fn ensure_page(&self, desc: &Arc<Descriptor>, offset: u64) -> Result<PinnedFrame<'_>> {
        let guid = desc.page_guid(offset);
        let mut zero_fill = false;

        let pinned = {
            let mut state = self.shared.state.lock();
            let step = state.step;
            state.step += 1;

            let policy = desc.state().policy;
            if let Some(idx) = state.page_map.lookup(guid) {
                state.policies.on_update(guid, policy, step);
                let frame = &self.shared.frames[idx];
                frame.meta_write().set_last_use(step);
                return Ok(PinnedFrame::new(frame));
            }

            let idx = match self.claim_free_frame(step) {
                Some(idx) => idx,
                None => self.evict_one(&mut state, policy, step)?,
            };

            state.page_map.insert(guid, idx);
            state.policies.on_insert(guid, policy, step);
            {
                let mut dst = desc.state();
                dst.pages.insert(guid);
                if page_align(offset) >= dst.total_size {
                    zero_fill = true;
                }
            }

            if !zero_fill {
                self.shared.queue.push(CtrlOp::Load {
                    desc: Arc::clone(desc),
                    frame: idx,
                    offset: page_align(offset),
                });
            }
            PinnedFrame::new(&self.shared.frames[idx])
        };

        if zero_fill {
            // Page past the end of the source: nothing to load. Wait out a
            // pending write-back of the evicted page, then publish zeros.
            let mut data = pinned.data_write(true);
            debug_assert!(
                !pinned.meta_read().ready(),
                "freshly claimed frame cannot be ready"
            );
            data.fill(0);
            pinned.meta_write().set_used_size(0).set_ready(true);
            drop(data);
        }

        Ok(pinned)
    }

    /// Linear scan for an unassigned frame; claims it when found. Only
    /// engine paths flip `used`, and they all hold the engine mutex, so the
    /// scan cannot race.
    fn claim_free_frame(&self, step: u64) -> Option<usize> {
        for (idx, frame) in self.shared.frames.iter().enumerate() {
            let mut meta = frame.meta_write();
            if !meta.used() {
                // Dirty and used_size stay untouched: a cancelled load's
                // frame may still have a write-back in flight.
                meta.set_used(true).set_ready(false).set_last_use(step);
                return Some(idx);
            }
        }
        None
    }

    /// Picks a victim via the requesting descriptor's policy and reassigns
    /// its frame. Pages whose frame is pinned by an in-flight client copy
    /// are passed over; `CacheExhausted` means every resident page is
    /// pinned at once. Dirty victims get a write-back enqueued; the frame's
    /// `wait_for_clean` discipline keeps the subsequent load from
    /// overwriting the old bytes early.
    fn evict_one(
        &self,
        state: &mut EngineState,
        policy: CachePolicy,
        step: u64,
    ) -> Result<usize> {
        let victim = {
            let frames = &self.shared.frames;
            let EngineState {
                policies, page_map, ..
            } = &mut *state;
            policies
                .evict(policy, step, |guid| {
                    page_map
                        .lookup(guid)
                        .map(|idx| !frames[idx].is_pinned())
                        .unwrap_or(false)
                })
                .ok_or(CacheError::CacheExhausted)?
        };
        let frame_idx = state
            .page_map
            .erase(victim)
            .expect("policy pool entry without a page mapping");

        let owner_id = *state
            .by_prefix
            .get(&victim.prefix())
            .expect("cached page without a descriptor");
        let owner = Arc::clone(
            state
                .descriptors
                .get(&owner_id)
                .expect("prefix index points at a live descriptor"),
        );

        {
            let mut meta = self.shared.frames[frame_idx].meta_write();
            if meta.dirty() {
                trace!("evicting dirty page {victim:?}, write-back enqueued");
                self.shared.queue.push(CtrlOp::Store {
                    desc: Arc::clone(&owner),
                    frame: frame_idx,
                    offset: victim.file_offset(),
                });
            } else {
                trace!("evicting clean page {victim:?}");
            }
            meta.set_used(true).set_ready(false).set_last_use(step);
        }

        owner.state().pages.remove(&victim);
        Ok(frame_idx)
    }

    /// Speculatively maps and loads up to `pages` pages starting at `from`,
    /// stopping at the end of the source. No-op while the descriptor is
    /// closed: a queued load would park the worker until the reopen.
    fn prefetch(&self, desc: &Arc<Descriptor>, from: u64, pages: usize) {
        let total_size = {
            let dst = desc.state();
            if !dst.valid {
                return;
            }
            dst.total_size
        };
        for i in 0..pages {
            let offset = page_align(from) + (i * PAGE_SIZE) as u64;
            if offset >= total_size {
                break;
            }
            if let Err(err) = self.ensure_page(desc, offset) {
                debug!("prefetch stopped at {offset}: {err}");
                break;
            }
        }
    }

    /// Drops queued loads for `desc` (all of them, or only those farther
    /// than [`FIFO_THRESH`] pages from `near_page`) and returns their
    /// frames to the free pool. Caller holds the engine mutex.
    fn cancel_loads(&self, state: &mut EngineState, desc: &Arc<Descriptor>, near_page: Option<u64>) {
        let id = desc.id();
        let removed = self.shared.queue.remove_matching(|op| match op {
            CtrlOp::Load { desc: d, offset, .. } if d.id() == id => match near_page {
                Some(target) => {
                    let page = *offset / PAGE_SIZE as u64;
                    page.abs_diff(target) > FIFO_THRESH as u64
                }
                None => true,
            },
            _ => false,
        });

        let policy = desc.state().policy;
        for op in removed {
            let CtrlOp::Load { frame, offset, .. } = op else {
                unreachable!("cancel predicate only matches loads");
            };
            let guid = desc.page_guid(offset);
            if state.page_map.lookup(guid) != Some(frame) {
                continue;
            }
            state.page_map.erase(guid);
            state.policies.on_remove(guid, policy);
            desc.state().pages.remove(&guid);
            // Dirty flag survives: the frame may carry a pending write-back
            // from the page it was reassigned from.
            self.shared.frames[frame]
                .meta_write()
                .set_used(false)
                .set_ready(false);
            trace!("cancelled queued load of {guid:?}");
        }
    }

    /// Snapshot of the write-back work a flush must cover: every currently
    /// dirty resident page of `desc`, plus queued stores it subsumes.
    /// Eviction write-backs whose frame now belongs to another page are
    /// included too; erasing those without taking over their work would
    /// strand the load waiting behind them.
    fn collect_flush_targets(
        &self,
        state: &mut EngineState,
        desc: &Arc<Descriptor>,
    ) -> FlushTargets {
        let mut targets = FlushTargets::new();
        {
            let dst = desc.state();
            for &guid in &dst.pages {
                let idx = state
                    .page_map
                    .lookup(guid)
                    .expect("cached page without a frame");
                if self.shared.frames[idx].meta_read().dirty() {
                    targets.push((idx, guid.file_offset()));
                }
            }
        }

        let id = desc.id();
        let removed = self
            .shared
            .queue
            .remove_matching(|op| matches!(op, CtrlOp::Store { desc: d, .. } if d.id() == id));
        for op in removed {
            if let CtrlOp::Store { frame, offset, .. } = op {
                if !targets.iter().any(|t| *t == (frame, offset)) {
                    targets.push((frame, offset));
                }
            }
        }
        targets
    }
}

impl Drop for CacheEngine {
    fn drop(&mut self) {
        self.shared.shutdown();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}
