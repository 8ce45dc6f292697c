//! # bytecache: a user-space page cache for random-access byte streams
//!
//! Clients open a named data source (anything that can serve positional
//! reads and writes), get back an opaque handle, and perform buffered
//! `read`/`write`/`seek`/`flush`/`close` calls against it. Internally each
//! source is divided into 4 KiB pages; a bounded pool of in-memory frames
//! holds the hot subset of pages across every open source, and a single
//! background worker services cache misses and write-backs so client
//! threads block only when the byte they want is not in memory yet.
//!
//! ## Quick Start
//!
//! ```ignore
//! use bytecache::{CacheEngine, CachePolicy, CachedFile, FsProvider, OpenMode};
//! use std::sync::Arc;
//!
//! let engine = Arc::new(
//!     CacheEngine::builder()
//!         .frame_count(64)
//!         .provider(FsProvider::new("./assets"))
//!         .build()?,
//! );
//!
//! let mut file = CachedFile::open(&engine, "level1.dat", OpenMode::Read, CachePolicy::Lru)?;
//! let mut header = [0u8; 128];
//! file.read(&mut header)?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │       CachedFile (std::io façade)     │
//! ├──────────────────────────────────────┤
//! │  CacheEngine (open/read/write/seek)   │
//! ├──────────────┬───────────────────────┤
//! │   PageMap    │  PolicySet (Keep/LRU/ │
//! │  guid→frame  │   FIFO pools)         │
//! ├──────────────┴───────────────────────┤
//! │  Frame pool (meta + data RW guards)   │
//! ├──────────────────────────────────────┤
//! │  OpQueue ──> IoWorker (one thread)    │
//! ├──────────────────────────────────────┤
//! │  DataSource (file, memory, …)         │
//! └──────────────────────────────────────┘
//! ```
//!
//! Descriptors survive `close`: reopening the same path restores the
//! cursor and whatever pages are still resident. Three replacement
//! policies (Permanent, LRU and FIFO) partition the pool so streaming
//! reads cannot wash out pages a client asked to keep.
//!
//! ## Module Overview
//!
//! - [`cache`]: frames, page table, policies, op queue, worker, engine
//! - [`source`]: the data-source traits plus file and memory backends
//! - [`config`]: geometry and tuning constants
//! - [`error`]: the [`CacheError`] kinds

pub mod cache;
pub mod config;
pub mod error;
pub mod source;

mod cached_file;

pub use cache::{CacheEngine, CacheEngineBuilder, CachePolicy, CacheStats, Handle};
pub use cached_file::CachedFile;
pub use error::{CacheError, Result};
pub use source::{
    DataSource, FileSource, FsProvider, MemoryProvider, MemorySource, OpenMode, SourceEvent,
    SourceEventKind, SourceProvider,
};
