//! # Cache Configuration Constants
//!
//! All tuning knobs for the page cache live here. Constants that constrain
//! each other are co-located and documented, and the critical relationships
//! are enforced with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       │
//!       ├─> CACHE_SIZE (derived: PAGE_SIZE * DEFAULT_FRAME_COUNT)
//!       │
//!       └─> GUID_OFFSET_MASK (low 40 bits; page-aligned, so the low
//!             12 bits of any page GUID are always zero)
//!
//! DEFAULT_FRAME_COUNT (16)
//!       │
//!       └─> SEEK_READ_AHEAD (must be <=)
//!             A seek prefetches this many pages. If it exceeded the pool
//!             size, a single seek could evict every resident page,
//!             including the ones it just prefetched.
//!
//! KEEP_THRESH / LRU_THRESH / FIFO_THRESH (8 each)
//!       Soft per-pool occupancy targets. Eviction borrows across pools
//!       only while the donor pool is above its threshold; FIFO borrows
//!       from LRU below FIFO_THRESH / 4, Permanent yields its own pages
//!       above KEEP_THRESH / 2.
//! ```

// ============================================================================
// PAGE GEOMETRY
// ============================================================================

/// Size of one cache page in bytes. This is the unit of caching, transfer
/// and write-back; sources are addressed in whole pages.
pub const PAGE_SIZE: usize = 4096;

/// Default number of frames in the pool. Fixed at engine construction;
/// there is no automatic resizing.
pub const DEFAULT_FRAME_COUNT: usize = 16;

/// Total default cache capacity in bytes.
pub const CACHE_SIZE: usize = PAGE_SIZE * DEFAULT_FRAME_COUNT;

const _: () = assert!(PAGE_SIZE.is_power_of_two(), "PAGE_SIZE must be a power of two");

// ============================================================================
// PAGE GUID LAYOUT
// A page GUID packs a 24-bit descriptor prefix above a 40-bit page-aligned
// file offset, letting one flat map span every open source.
// ============================================================================

/// Bit position of the descriptor prefix within a page GUID.
pub const GUID_PREFIX_SHIFT: u32 = 40;

/// Mask selecting the file-offset bits of a page GUID.
pub const GUID_OFFSET_MASK: u64 = 0x0000_00FF_FFFF_FFFF;

/// Number of distinct descriptor prefixes.
pub const GUID_PREFIX_SPACE: u64 = 1 << 24;

const _: () = assert!(
    GUID_OFFSET_MASK == (1u64 << GUID_PREFIX_SHIFT) - 1,
    "GUID_OFFSET_MASK must cover exactly the bits below GUID_PREFIX_SHIFT"
);

// ============================================================================
// REPLACEMENT POLICY TUNING
// ============================================================================

/// Soft occupancy target for the Permanent pool. Permanent pages become
/// evictable only while their pool holds more than KEEP_THRESH / 2 pages.
pub const KEEP_THRESH: usize = 8;

/// Soft occupancy target for the LRU pool, in pages. Doubles as the age
/// bound: an LRU page is borrowable once it is more than LRU_THRESH steps
/// old and the pool is above the threshold.
pub const LRU_THRESH: usize = 8;

/// Soft occupancy target for the FIFO pool, in pages. Also the seek
/// cancellation radius: queued loads farther than FIFO_THRESH pages from a
/// seek target are dropped.
pub const FIFO_THRESH: usize = 8;

/// Number of pages prefetched after a seek and on open.
pub const SEEK_READ_AHEAD: usize = 8;

/// Sentinel length for `check_cache` meaning "request size unknown, use the
/// default read-ahead".
pub const LEN_UNSPECIFIED: u64 = u64::MAX;

const _: () = assert!(KEEP_THRESH > 0 && LRU_THRESH > 0 && FIFO_THRESH > 0);

const _: () = assert!(
    SEEK_READ_AHEAD <= DEFAULT_FRAME_COUNT,
    "SEEK_READ_AHEAD must not exceed the default pool size"
);
