//! File-like façade over the cache engine.
//!
//! Thin wiring only: every call forwards to [`CacheEngine`], which owns all
//! caching behavior. The façade also implements the `std::io` traits so a
//! cached source drops into code written against `Read`/`Write`/`Seek`.

use std::io::{self, SeekFrom};
use std::sync::Arc;

use crate::cache::{CacheEngine, CachePolicy, Handle};
use crate::config::LEN_UNSPECIFIED;
use crate::error::{CacheError, Result};
use crate::source::OpenMode;

/// An open, cached source. Closes itself (flushing dirty pages) on drop.
pub struct CachedFile {
    engine: Arc<CacheEngine>,
    handle: Handle,
    open: bool,
}

impl CachedFile {
    pub fn open(
        engine: &Arc<CacheEngine>,
        path: &str,
        mode: OpenMode,
        policy: CachePolicy,
    ) -> Result<Self> {
        let handle = engine.open(path, mode, policy)?;
        Ok(Self {
            engine: Arc::clone(engine),
            handle,
            open: true,
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.engine.check_cache(self.handle, buf.len() as u64)?;
        self.engine.read(self.handle, buf)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.engine.write(self.handle, data)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let off = self.engine.seek(self.handle, pos)?;
        self.engine.check_cache(self.handle, LEN_UNSPECIFIED)?;
        Ok(off)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.engine.flush(self.handle)
    }

    pub fn len(&self) -> Result<u64> {
        self.engine.get_len(self.handle)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn position(&self) -> Result<u64> {
        self.engine.position(self.handle)
    }

    pub fn eof_reached(&self) -> Result<bool> {
        self.engine.eof_reached(self.handle)
    }

    /// Reads one byte at the cursor.
    pub fn read_u8(&mut self) -> Result<u8> {
        let mut byte = [0u8; 1];
        if self.read(&mut byte)? < 1 {
            return Err(CacheError::EofReached);
        }
        Ok(byte[0])
    }

    /// Writes one byte at the cursor.
    pub fn write_u8(&mut self, byte: u8) -> Result<()> {
        self.write(&[byte])?;
        Ok(())
    }

    /// Closes the source, keeping the descriptor (and its cached pages)
    /// around for a later `open` of the same path.
    pub fn close(&mut self) -> Result<()> {
        if self.open {
            self.engine.close(self.handle)?;
            self.open = false;
        }
        Ok(())
    }

    /// Closes and destroys the descriptor; the handle is dead afterwards.
    pub fn permanent_close(mut self) -> Result<()> {
        self.open = false;
        self.engine.permanent_close(self.handle)
    }
}

impl Drop for CachedFile {
    fn drop(&mut self) {
        if self.open {
            let _ = self.engine.close(self.handle);
        }
    }
}

impl io::Read for CachedFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        CachedFile::read(self, buf).map_err(Into::into)
    }
}

impl io::Write for CachedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        CachedFile::write(self, buf).map_err(Into::into)
    }

    fn flush(&mut self) -> io::Result<()> {
        CachedFile::flush(self).map_err(Into::into)
    }
}

impl io::Seek for CachedFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        CachedFile::seek(self, pos).map_err(Into::into)
    }
}
