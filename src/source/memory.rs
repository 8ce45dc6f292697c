//! In-memory data sources with an I/O journal.
//!
//! Buffers are registered by name on a [`MemoryProvider`] and shared between
//! every source opened from it, so the "storage" survives close/reopen
//! cycles exactly like a file would. The provider also keeps a journal of
//! physical reads and writes; tests use it to assert which offsets actually
//! reached the source.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use super::{DataSource, OpenMode, SourceProvider};
use crate::error::{CacheError, Result};

type SharedBuf = Arc<Mutex<Vec<u8>>>;
type Journal = Arc<Mutex<Vec<SourceEvent>>>;

/// What a [`SourceEvent`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEventKind {
    Read,
    Write,
}

/// One physical source access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub path: String,
    pub kind: SourceEventKind,
    pub offset: u64,
    pub len: usize,
}

/// Named in-memory buffers acting as a source registry.
#[derive(Default)]
pub struct MemoryProvider {
    buffers: Mutex<hashbrown::HashMap<String, SharedBuf>>,
    journal: Journal,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a named buffer with the given contents.
    pub fn register(&self, path: &str, contents: impl Into<Vec<u8>>) {
        self.buffers
            .lock()
            .insert(path.to_string(), Arc::new(Mutex::new(contents.into())));
    }

    /// Snapshot of a registered buffer's current contents.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let buffers = self.buffers.lock();
        buffers.get(path).map(|buf| buf.lock().clone())
    }

    /// Drains and returns every journaled access so far.
    pub fn take_events(&self) -> Vec<SourceEvent> {
        std::mem::take(&mut *self.journal.lock())
    }
}

impl SourceProvider for MemoryProvider {
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn DataSource>> {
        let buf = {
            let mut buffers = self.buffers.lock();
            match buffers.get(path) {
                Some(buf) => Arc::clone(buf),
                None if mode == OpenMode::Create => {
                    let buf: SharedBuf = Arc::new(Mutex::new(Vec::new()));
                    buffers.insert(path.to_string(), Arc::clone(&buf));
                    buf
                }
                None => return Err(CacheError::NotFound(path.to_string())),
            }
        };

        Ok(Box::new(MemorySource {
            path: path.to_string(),
            buf,
            journal: Arc::clone(&self.journal),
            mode,
            open: true,
        }))
    }
}

/// A source view over one shared buffer.
pub struct MemorySource {
    path: String,
    buf: SharedBuf,
    journal: Journal,
    mode: OpenMode,
    open: bool,
}

impl MemorySource {
    fn record(&self, kind: SourceEventKind, offset: u64, len: usize) {
        self.journal.lock().push(SourceEvent {
            path: self.path.clone(),
            kind,
            offset,
            len,
        });
    }

    fn check_open(&self, offset: u64, writing: bool) -> Result<()> {
        if self.open {
            return Ok(());
        }
        Err(if writing {
            CacheError::cant_write(offset, "source is closed")
        } else {
            CacheError::cant_read(offset, "source is closed")
        })
    }
}

impl DataSource for MemorySource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.check_open(offset, false)?;

        let data = self.buf.lock();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        drop(data);

        trace!("memory source '{}' read {n}@{offset}", self.path);
        self.record(SourceEventKind::Read, offset, n);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.check_open(offset, true)?;
        if !self.mode.writable() {
            return Err(CacheError::InvalidMode {
                path: self.path.clone(),
                mode: self.mode.as_str(),
            });
        }

        let mut buf = self.buf.lock();
        let end = offset as usize + data.len();
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[offset as usize..end].copy_from_slice(data);
        drop(buf);

        trace!("memory source '{}' wrote {}@{offset}", self.path, data.len());
        self.record(SourceEventKind::Write, offset, data.len());
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.buf.lock().len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.open = false;
        Ok(())
    }

    fn reopen(&mut self, mode: OpenMode) -> Result<()> {
        self.open = true;
        self.mode = mode;
        Ok(())
    }
}
