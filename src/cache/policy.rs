//! # Replacement policies
//!
//! Every resident page belongs to exactly one of three pools, selected by
//! its descriptor's [`CachePolicy`]:
//!
//! - **Permanent**: sources meant to stay resident; ordered by last use,
//!   yields its own pages only under pressure.
//! - **LRU**: ordered by last use; the default general-purpose pool.
//! - **FIFO**: insertion order, newest at the front; streaming reads churn
//!   through here without disturbing the aged pools.
//!
//! Eviction is cooperative: each policy first tries the pools it is allowed
//! to raid while they sit above their soft thresholds, then falls back so a
//! victim is produced whenever any evictable page exists (pages pinned by
//! an in-flight client copy are passed over). Aged pools resolve victims as
//! a coin flip between their two oldest evictable entries, which keeps a
//! uniform-age working set from thrashing a single deterministic slot.

use std::collections::{BTreeSet, VecDeque};

use hashbrown::HashMap;
use log::trace;
use rand::Rng;

use super::page::PageGuid;
use crate::config::{FIFO_THRESH, KEEP_THRESH, LRU_THRESH};

/// Replacement policy of one open source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Keep pages resident as long as the pool allows.
    Permanent,
    /// Evict the least recently used page.
    Lru,
    /// Evict in insertion order.
    Fifo,
}

impl CachePolicy {
    /// Number of pages pre-warmed when a source opens under this policy.
    pub(crate) fn prewarm_pages(self) -> usize {
        match self {
            CachePolicy::Permanent => KEEP_THRESH,
            CachePolicy::Lru => LRU_THRESH,
            CachePolicy::Fifo => FIFO_THRESH,
        }
    }
}

/// A pool ordered by last-use step.
#[derive(Default)]
struct AgedPool {
    by_age: BTreeSet<(u64, PageGuid)>,
    steps: HashMap<PageGuid, u64>,
}

impl AgedPool {
    fn insert(&mut self, guid: PageGuid, step: u64) {
        let prev = self.steps.insert(guid, step);
        debug_assert!(prev.is_none(), "page {guid:?} already pooled");
        self.by_age.insert((step, guid));
    }

    fn touch(&mut self, guid: PageGuid, step: u64) {
        if let Some(old) = self.steps.get_mut(&guid) {
            self.by_age.remove(&(*old, guid));
            *old = step;
            self.by_age.insert((step, guid));
        }
    }

    fn remove(&mut self, guid: PageGuid) -> bool {
        match self.steps.remove(&guid) {
            Some(step) => {
                self.by_age.remove(&(step, guid));
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.steps.len()
    }

    fn oldest_step(&self) -> Option<u64> {
        self.by_age.iter().next().map(|(step, _)| *step)
    }

    /// Takes one of the two oldest evictable entries, chosen by coin flip.
    fn take_victim(&mut self, evictable: &impl Fn(PageGuid) -> bool) -> Option<PageGuid> {
        let mut oldest = self
            .by_age
            .iter()
            .filter(|(_, guid)| evictable(*guid))
            .take(2);
        let first = oldest.next().copied()?;
        let second = oldest.next().copied();
        drop(oldest);

        let (step, guid) = match second {
            Some(second) if rand::thread_rng().gen::<bool>() => second,
            _ => first,
        };
        self.by_age.remove(&(step, guid));
        self.steps.remove(&guid);
        Some(guid)
    }

    /// True when the pool is over `thresh` and its oldest entry is more
    /// than `thresh` steps behind `now`.
    fn borrowable(&self, thresh: usize, now: u64) -> bool {
        self.len() > thresh
            && self
                .oldest_step()
                .is_some_and(|oldest| now.saturating_sub(oldest) > thresh as u64)
    }
}

/// The three pools partitioning the page map's keys.
#[derive(Default)]
pub(crate) struct PolicySet {
    permanent: AgedPool,
    lru: AgedPool,
    /// Insertion order, front = newest.
    fifo: VecDeque<PageGuid>,
}

impl PolicySet {
    /// Registers a freshly mapped page under its descriptor's policy.
    pub fn on_insert(&mut self, guid: PageGuid, policy: CachePolicy, step: u64) {
        match policy {
            CachePolicy::Permanent => self.permanent.insert(guid, step),
            CachePolicy::Lru => self.lru.insert(guid, step),
            CachePolicy::Fifo => self.fifo.push_front(guid),
        }
    }

    /// Cache hit: refresh ordering. FIFO keeps insertion order and ignores
    /// hits.
    pub fn on_update(&mut self, guid: PageGuid, policy: CachePolicy, step: u64) {
        match policy {
            CachePolicy::Permanent => self.permanent.touch(guid, step),
            CachePolicy::Lru => self.lru.touch(guid, step),
            CachePolicy::Fifo => {}
        }
    }

    /// A mapping is about to be erased (eviction, cancellation, teardown).
    pub fn on_remove(&mut self, guid: PageGuid, policy: CachePolicy) {
        let found = match policy {
            CachePolicy::Permanent => self.permanent.remove(guid),
            CachePolicy::Lru => self.lru.remove(guid),
            CachePolicy::Fifo => {
                let pos = self.fifo.iter().position(|g| *g == guid);
                if let Some(pos) = pos {
                    self.fifo.remove(pos);
                }
                pos.is_some()
            }
        };
        debug_assert!(found, "page {guid:?} missing from its policy pool");
    }

    /// Selects and removes a victim on behalf of a descriptor with the
    /// given policy. `now` is the current step counter; `evictable` rejects
    /// pages whose frame is pinned by an in-flight client copy.
    ///
    /// Threshold-gated preferences come first; the fallback chain then
    /// guarantees a victim whenever any evictable page is resident.
    /// Permanent pages are surrendered before other pools only once the
    /// permanent pool exceeds half its threshold. `None` means every
    /// resident page is pinned (or none exist).
    pub fn evict(
        &mut self,
        policy: CachePolicy,
        now: u64,
        evictable: impl Fn(PageGuid) -> bool,
    ) -> Option<PageGuid> {
        let victim = match policy {
            CachePolicy::Permanent => self
                .take_fifo_over_thresh(&evictable)
                .or_else(|| self.take_lru_aged(now, &evictable))
                .or_else(|| {
                    (self.permanent.len() > KEEP_THRESH / 2)
                        .then(|| self.permanent.take_victim(&evictable))
                        .flatten()
                })
                .or_else(|| self.pop_fifo_oldest(&evictable))
                .or_else(|| self.lru.take_victim(&evictable))
                .or_else(|| self.permanent.take_victim(&evictable)),

            CachePolicy::Lru => self
                .take_lru_aged(now, &evictable)
                .or_else(|| self.take_fifo_over_thresh(&evictable))
                .or_else(|| self.lru.take_victim(&evictable))
                .or_else(|| self.pop_fifo_oldest(&evictable))
                .or_else(|| self.permanent.take_victim(&evictable)),

            CachePolicy::Fifo => {
                let own = if self.fifo.len() >= (FIFO_THRESH / 4).max(1) {
                    self.pop_fifo_oldest(&evictable)
                } else {
                    None
                };
                own.or_else(|| self.take_lru_aged(now, &evictable))
                    .or_else(|| self.pop_fifo_oldest(&evictable))
                    .or_else(|| self.lru.take_victim(&evictable))
                    .or_else(|| self.permanent.take_victim(&evictable))
            }
        };

        if let Some(guid) = victim {
            trace!("policy {policy:?} evicting {guid:?}");
        }
        victim
    }

    /// Removes the oldest evictable FIFO entry (front is newest).
    fn pop_fifo_oldest(&mut self, evictable: &impl Fn(PageGuid) -> bool) -> Option<PageGuid> {
        let pos = self.fifo.iter().rposition(|guid| evictable(*guid))?;
        self.fifo.remove(pos)
    }

    fn take_fifo_over_thresh(&mut self, evictable: &impl Fn(PageGuid) -> bool) -> Option<PageGuid> {
        if self.fifo.len() > FIFO_THRESH {
            self.pop_fifo_oldest(evictable)
        } else {
            None
        }
    }

    fn take_lru_aged(&mut self, now: u64, evictable: &impl Fn(PageGuid) -> bool) -> Option<PageGuid> {
        if self.lru.borrowable(LRU_THRESH, now) {
            self.lru.take_victim(evictable)
        } else {
            None
        }
    }

    pub fn permanent_len(&self) -> usize {
        self.permanent.len()
    }

    pub fn lru_len(&self) -> usize {
        self.lru.len()
    }

    pub fn fifo_len(&self) -> usize {
        self.fifo.len()
    }

    /// Total pages tracked across the pools. Must always equal the page
    /// map's length.
    pub fn len(&self) -> usize {
        self.permanent.len() + self.lru.len() + self.fifo.len()
    }
}
