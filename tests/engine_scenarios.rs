//! # End-to-End Cache Engine Scenarios
//!
//! Exercises the engine through its public surface against instrumented
//! in-memory sources. Coverage:
//!
//! 1. Exact serving of small reads and cursor/EOF semantics
//! 2. Multi-page reads and page-table accounting
//! 3. FIFO eviction and reload after a working-set switch
//! 4. Dirty write-back driven by eviction and flush
//! 5. Seek cancellation of stale prefetch loads (gated source)
//! 6. Close/reopen preserving handle, cursor and resident pages
//!
//! Plus the cache laws (round-trip at arbitrary alignment, flush
//! stability, policy isolation), boundary behavior (zero-length ops, reads
//! across EOF, extension on write), and a cross-handle concurrency smoke
//! test.

use std::io::SeekFrom;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use bytecache::config::PAGE_SIZE;
use bytecache::{
    CacheEngine, CachePolicy, DataSource, MemoryProvider, OpenMode, Result, SourceEvent,
    SourceEventKind, SourceProvider,
};

const PAGE: u64 = PAGE_SIZE as u64;

struct SharedProvider(Arc<MemoryProvider>);

impl SourceProvider for SharedProvider {
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn DataSource>> {
        self.0.open(path, mode)
    }
}

fn engine_with(
    frames: usize,
    sources: &[(&str, Vec<u8>)],
) -> (CacheEngine, Arc<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    for (path, contents) in sources {
        provider.register(path, contents.clone());
    }
    let engine = CacheEngine::builder()
        .frame_count(frames)
        .provider(SharedProvider(Arc::clone(&provider)))
        .build()
        .unwrap();
    (engine, provider)
}

fn read_offsets(events: &[SourceEvent], path: &str) -> Vec<u64> {
    events
        .iter()
        .filter(|e| e.kind == SourceEventKind::Read && e.path == path)
        .map(|e| e.offset)
        .collect()
}

// ============================================================================
// Scenario 1 & 2: exact reads
// ============================================================================

#[test]
fn simple_read_serves_exact_bytes() {
    let source = b"hello\nworl".to_vec();
    let (engine, _) = engine_with(16, &[("greeting", source)]);
    let h = engine
        .open("greeting", OpenMode::Read, CachePolicy::Lru)
        .unwrap();

    let mut buf = [0u8; 10];
    assert_eq!(engine.read(h, &mut buf).unwrap(), 10);
    assert_eq!(&buf, b"hello\nworl");

    // Reading exactly to the end is not EOF.
    assert!(!engine.eof_reached(h).unwrap());
    assert_eq!(engine.seek(h, SeekFrom::Current(0)).unwrap(), 10);
}

#[test]
fn two_page_read_tracks_both_pages() {
    let (engine, _) = engine_with(16, &[("aa", vec![0x41u8; 6000])]);
    let before = engine.stats().step;

    let h = engine.open("aa", OpenMode::Read, CachePolicy::Lru).unwrap();
    let mut buf = vec![0u8; 6000];
    assert_eq!(engine.read(h, &mut buf).unwrap(), 6000);
    assert!(buf.iter().all(|&b| b == 0x41));

    assert_eq!(engine.resident_pages(h).unwrap(), vec![0, PAGE]);
    assert!(engine.stats().step >= before + 2);
}

// ============================================================================
// Scenario 3: eviction and reload under FIFO
// ============================================================================

#[test]
fn fifo_working_set_switch_evicts_and_reloads() {
    let (engine, provider) = engine_with(
        3,
        &[
            ("a", vec![0x41u8; 3 * PAGE_SIZE]),
            ("b", vec![0x42u8; 3 * PAGE_SIZE]),
        ],
    );

    let ha = engine.open("a", OpenMode::Read, CachePolicy::Fifo).unwrap();
    let mut buf = vec![0u8; 3 * PAGE_SIZE];
    assert_eq!(engine.read(ha, &mut buf).unwrap(), 3 * PAGE_SIZE);
    assert!(buf.iter().all(|&b| b == 0x41));

    let hb = engine.open("b", OpenMode::Read, CachePolicy::Fifo).unwrap();
    assert_eq!(engine.read(hb, &mut buf).unwrap(), 3 * PAGE_SIZE);
    assert!(buf.iter().all(|&b| b == 0x42));

    // B's pages displaced every page of A.
    assert!(engine.resident_pages(ha).unwrap().is_empty());
    assert_eq!(engine.resident_pages(hb).unwrap().len(), 3);

    // Reloading A page 0 goes back to the source and serves its bytes.
    provider.take_events();
    engine.seek(ha, SeekFrom::Start(0)).unwrap();
    let mut one = [0u8; 1];
    assert_eq!(engine.read(ha, &mut one).unwrap(), 1);
    assert_eq!(one[0], 0x41);
    assert!(read_offsets(&provider.take_events(), "a").contains(&0));
}

// ============================================================================
// Scenario 4: dirty write-back driven by eviction
// ============================================================================

#[test]
fn eviction_of_dirty_page_writes_back() {
    let (engine, provider) = engine_with(1, &[("d", vec![0u8; 2 * PAGE_SIZE])]);
    let h = engine.open("d", OpenMode::ReadWrite, CachePolicy::Lru).unwrap();

    engine.seek(h, SeekFrom::Start(0)).unwrap();
    assert_eq!(engine.write(h, &[0xFF]).unwrap(), 1);

    // Touching page 1 with a single frame forces the dirty page 0 out.
    engine.seek(h, SeekFrom::Start(PAGE)).unwrap();
    let mut one = [0u8; 1];
    assert_eq!(engine.read(h, &mut one).unwrap(), 1);
    assert_eq!(one[0], 0);

    engine.flush(h).unwrap();
    assert_eq!(provider.contents("d").unwrap()[0], 0xFF);
}

// ============================================================================
// Scenario 5: seek cancellation (gated source)
// ============================================================================

struct Gate {
    open: Mutex<bool>,
    signal: Condvar,
}

impl Gate {
    fn new() -> Arc<Self> {
        Arc::new(Gate {
            open: Mutex::new(false),
            signal: Condvar::new(),
        })
    }

    fn release(&self) {
        *self.open.lock() = true;
        self.signal.notify_all();
    }

    fn pass(&self) {
        let mut open = self.open.lock();
        while !*open {
            self.signal.wait(&mut open);
        }
    }
}

/// Delegating source that parks reads until the gate opens, keeping queued
/// loads pending long enough to observe cancellation.
struct GatedSource {
    inner: Box<dyn DataSource>,
    gate: Arc<Gate>,
}

impl DataSource for GatedSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.gate.pass();
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.inner.write_at(offset, data)
    }

    fn len(&self) -> Result<u64> {
        self.inner.len()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }

    fn reopen(&mut self, mode: OpenMode) -> Result<()> {
        self.inner.reopen(mode)
    }
}

struct GatedProvider {
    inner: Arc<MemoryProvider>,
    gate: Arc<Gate>,
}

impl SourceProvider for GatedProvider {
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn DataSource>> {
        Ok(Box::new(GatedSource {
            inner: self.inner.open(path, mode)?,
            gate: Arc::clone(&self.gate),
        }))
    }
}

#[test]
fn distant_seek_cancels_stale_prefetch_loads() {
    let provider = Arc::new(MemoryProvider::new());
    provider.register("big", vec![0x5Au8; 100 * PAGE_SIZE]);
    let gate = Gate::new();
    let engine = CacheEngine::builder()
        .frame_count(16)
        .provider(GatedProvider {
            inner: Arc::clone(&provider),
            gate: Arc::clone(&gate),
        })
        .build()
        .unwrap();

    // Open prefetches pages 0..8; the gate holds every load in (or before)
    // its source read.
    let h = engine.open("big", OpenMode::Read, CachePolicy::Lru).unwrap();

    // Jumping 90 pages away invalidates the queued prefetches.
    engine.seek(h, SeekFrom::Start(90 * PAGE)).unwrap();
    gate.release();

    // Block until the post-seek prefetch lands, then inspect the journal.
    let mut buf = [0u8; 16];
    assert_eq!(engine.read(h, &mut buf).unwrap(), 16);
    assert_eq!(buf, [0x5Au8; 16]);

    let reads = read_offsets(&provider.take_events(), "big");
    assert!(
        reads.contains(&(90 * PAGE)),
        "prefetch after the seek must load the new vicinity"
    );
    for page in 1..8u64 {
        assert!(
            !reads.contains(&(page * PAGE)),
            "load of stale page {page} should have been cancelled"
        );
    }
}

// ============================================================================
// Scenario 6: close/reopen keeps descriptor state
// ============================================================================

#[test]
fn reopen_preserves_handle_offset_and_resident_pages() {
    let contents: Vec<u8> = (0..8 * PAGE_SIZE).map(|i| (i % 251) as u8).collect();
    let (engine, provider) = engine_with(16, &[("seq", contents.clone())]);

    let h = engine.open("seq", OpenMode::Read, CachePolicy::Lru).unwrap();
    let mut buf = vec![0u8; 5000];
    assert_eq!(engine.read(h, &mut buf).unwrap(), 5000);
    assert_eq!(buf[..], contents[..5000]);

    engine.close(h).unwrap();
    let resident_before = engine.resident_pages(h).unwrap();
    assert!(resident_before.contains(&0) && resident_before.contains(&PAGE));

    provider.take_events();
    let h2 = engine.open("seq", OpenMode::Read, CachePolicy::Lru).unwrap();
    assert_eq!(h2, h, "reopening a path must revive the same handle");
    assert_eq!(engine.position(h2).unwrap(), 5000);

    let mut tail = vec![0u8; 100];
    assert_eq!(engine.read(h2, &mut tail).unwrap(), 100);
    assert_eq!(tail[..], contents[5000..5100]);

    // Pages that stayed resident across the close must be served from
    // memory, not the source.
    let reads = read_offsets(&provider.take_events(), "seq");
    for offset in resident_before {
        assert!(
            !reads.contains(&offset),
            "resident page at {offset} was re-read from the source"
        );
    }
}

// ============================================================================
// Laws
// ============================================================================

#[test]
fn round_trip_at_arbitrary_alignment() {
    let (engine, _) = engine_with(4, &[]);
    let h = engine
        .open("scratch", OpenMode::Create, CachePolicy::Lru)
        .unwrap();

    let data: Vec<u8> = (0..10_000).map(|i| (i * 7 % 256) as u8).collect();
    engine.seek(h, SeekFrom::Start(1000)).unwrap();
    assert_eq!(engine.write(h, &data).unwrap(), data.len());

    engine
        .seek(h, SeekFrom::Current(-(data.len() as i64)))
        .unwrap();
    // The cache does not extend the descriptor size until the source
    // observes it; flush so reloads of evicted pages see the bytes.
    engine.flush(h).unwrap();
    assert!(engine.get_len(h).unwrap() >= 11_000);

    let mut back = vec![0u8; data.len()];
    assert_eq!(engine.read(h, &mut back).unwrap(), data.len());
    assert_eq!(back, data);
}

#[test]
fn round_trip_survives_single_frame_pool() {
    let (engine, _) = engine_with(1, &[]);
    let h = engine
        .open("tiny", OpenMode::Create, CachePolicy::Lru)
        .unwrap();

    let data: Vec<u8> = (0..3 * PAGE_SIZE + 123).map(|i| (i % 256) as u8).collect();
    engine.seek(h, SeekFrom::Start(17)).unwrap();
    assert_eq!(engine.write(h, &data).unwrap(), data.len());

    engine.seek(h, SeekFrom::Start(17)).unwrap();
    engine.flush(h).unwrap();
    assert_eq!(engine.get_len(h).unwrap(), 17 + data.len() as u64);

    let mut back = vec![0u8; data.len()];
    assert_eq!(engine.read(h, &mut back).unwrap(), data.len());
    assert_eq!(back, data);
}

#[test]
fn flush_reflects_every_dirty_page() {
    let (engine, provider) = engine_with(16, &[("f", vec![0u8; 4 * PAGE_SIZE])]);
    let h = engine.open("f", OpenMode::ReadWrite, CachePolicy::Lru).unwrap();

    let pattern: Vec<u8> = (0..3 * PAGE_SIZE).map(|i| (i % 200) as u8).collect();
    engine.seek(h, SeekFrom::Start(100)).unwrap();
    engine.write(h, &pattern).unwrap();
    engine.flush(h).unwrap();

    let stored = provider.contents("f").unwrap();
    assert_eq!(stored[100..100 + pattern.len()], pattern[..]);
    assert!(stored[..100].iter().all(|&b| b == 0));
}

#[test]
fn permanent_pages_survive_lru_pressure() {
    let (engine, _) = engine_with(
        16,
        &[
            ("keep", vec![0x11u8; 3 * PAGE_SIZE]),
            ("churn", vec![0x22u8; 20 * PAGE_SIZE]),
        ],
    );

    let hp = engine
        .open("keep", OpenMode::Read, CachePolicy::Permanent)
        .unwrap();
    let mut buf = vec![0u8; 3 * PAGE_SIZE];
    engine.read(hp, &mut buf).unwrap();
    assert_eq!(engine.resident_pages(hp).unwrap().len(), 3);

    let hl = engine
        .open("churn", OpenMode::Read, CachePolicy::Lru)
        .unwrap();
    let mut chunk = vec![0u8; PAGE_SIZE];
    for _ in 0..20 {
        engine.read(hl, &mut chunk).unwrap();
        assert!(chunk.iter().all(|&b| b == 0x22));
    }

    // Every LRU page churned through the pool, the Permanent set is intact.
    let stats = engine.stats();
    assert_eq!(stats.permanent_pages, 3);
    assert_eq!(engine.resident_pages(hp).unwrap().len(), 3);

    let mut first = [0u8; 1];
    engine.seek(hp, SeekFrom::Start(0)).unwrap();
    engine.read(hp, &mut first).unwrap();
    assert_eq!(first[0], 0x11);
}

// ============================================================================
// Boundaries
// ============================================================================

#[test]
fn zero_length_ops_are_noops() {
    let (engine, _) = engine_with(4, &[("z", vec![1u8; 100])]);
    let h = engine.open("z", OpenMode::ReadWrite, CachePolicy::Lru).unwrap();

    let mut empty = [0u8; 0];
    assert_eq!(engine.read(h, &mut empty).unwrap(), 0);
    assert_eq!(engine.write(h, &empty).unwrap(), 0);
    assert_eq!(engine.position(h).unwrap(), 0);
}

#[test]
fn read_across_eof_is_short_and_zero_filled() {
    let (engine, _) = engine_with(4, &[("s", vec![0xAAu8; 10])]);
    let h = engine.open("s", OpenMode::Read, CachePolicy::Lru).unwrap();

    let mut buf = [0x55u8; 64];
    assert_eq!(engine.read(h, &mut buf).unwrap(), 10);
    assert_eq!(&buf[..10], &[0xAAu8; 10]);
    assert_eq!(&buf[10..], &[0u8; 54]);
    assert!(engine.eof_reached(h).unwrap());

    // A read starting at the end returns nothing.
    assert_eq!(engine.read(h, &mut buf).unwrap(), 0);
}

#[test]
fn write_at_eof_extends_size_after_writeback() {
    let (engine, _) = engine_with(4, &[("grow", vec![3u8; 10])]);
    let h = engine
        .open("grow", OpenMode::ReadWrite, CachePolicy::Lru)
        .unwrap();

    assert_eq!(engine.seek(h, SeekFrom::End(0)).unwrap(), 10);
    assert_eq!(engine.write(h, b"extend").unwrap(), 6);

    // Extension is observed through the source, not retroactively.
    engine.flush(h).unwrap();
    assert_eq!(engine.get_len(h).unwrap(), 16);
}

// ============================================================================
// Concurrency smoke
// ============================================================================

#[test]
fn concurrent_handles_do_not_interfere() {
    let (engine, provider) = engine_with(
        8,
        &[
            ("left", vec![0u8; 4 * PAGE_SIZE]),
            ("right", vec![0u8; 4 * PAGE_SIZE]),
        ],
    );
    let engine = Arc::new(engine);

    let workers: Vec<_> = [("left", 0x33u8), ("right", 0x44u8)]
        .into_iter()
        .map(|(path, fill)| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let h = engine
                    .open(path, OpenMode::ReadWrite, CachePolicy::Lru)
                    .unwrap();
                let block = vec![fill; PAGE_SIZE + 100];
                for i in 0..3 {
                    engine
                        .seek(h, SeekFrom::Start(i * (PAGE_SIZE as u64 + 100)))
                        .unwrap();
                    engine.write(h, &block).unwrap();
                }
                engine.flush(h).unwrap();

                let mut back = vec![0u8; 3 * (PAGE_SIZE + 100)];
                engine.seek(h, SeekFrom::Start(0)).unwrap();
                assert_eq!(engine.read(h, &mut back).unwrap(), back.len());
                assert!(back.iter().all(|&b| b == fill));
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    let written = 3 * (PAGE_SIZE + 100);
    assert!(provider.contents("left").unwrap()[..written]
        .iter()
        .all(|&b| b == 0x33));
    assert!(provider.contents("right").unwrap()[..written]
        .iter()
        .all(|&b| b == 0x44));
}

#[test]
fn eviction_pressure_from_concurrent_handles_stays_coherent() {
    // Two frames serving eight pages across two handles: nearly every
    // access evicts a page the other thread may be about to hit. Each page
    // carries a distinct fill, so serving another page's frame (or a frame
    // reassigned mid-copy) is caught byte-for-byte.
    fn tagged(tag: u8) -> Vec<u8> {
        (0..4 * PAGE_SIZE)
            .map(|i| tag + (i / PAGE_SIZE) as u8)
            .collect()
    }

    let (engine, _) = engine_with(2, &[("x", tagged(0x60)), ("y", tagged(0xA0))]);
    let engine = Arc::new(engine);

    let workers: Vec<_> = [("x", 0x60u8), ("y", 0xA0u8)]
        .into_iter()
        .map(|(path, tag)| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                let h = engine.open(path, OpenMode::Read, CachePolicy::Fifo).unwrap();
                let mut buf = vec![0u8; 512];
                for round in 0..40u64 {
                    let page = round % 4;
                    let offset = page * PAGE + (round % 7) * 256;
                    engine.seek(h, SeekFrom::Start(offset)).unwrap();
                    assert_eq!(engine.read(h, &mut buf).unwrap(), 512);
                    let expect = tag + page as u8;
                    assert!(
                        buf.iter().all(|&b| b == expect),
                        "read of '{path}' page {page} returned foreign bytes"
                    );
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
}
