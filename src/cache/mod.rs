//! # Cache Core
//!
//! The page/frame data model and the machinery tying it together:
//!
//! - `page`: GUID packing (descriptor prefix | page-aligned offset)
//! - `frame`: the pooled buffers and their meta/data access guards
//! - `page_map`: GUID → frame table
//! - `descriptor`: per-open-source state surviving close/reopen
//! - `policy`: Permanent/LRU/FIFO pools and eviction selection
//! - `op_queue`: the control queue feeding the worker
//! - `io_worker`: the single background thread doing source I/O
//! - `engine`: the public API

mod descriptor;
mod engine;
mod frame;
mod io_worker;
mod op_queue;
mod page;
mod page_map;
mod policy;

pub use engine::{CacheEngine, CacheEngineBuilder, CacheStats, Handle};
pub use page::{in_page, page_align, PageGuid};
pub use policy::CachePolicy;
