//! Filesystem-backed data sources using positional I/O.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;

use log::debug;

use super::{DataSource, OpenMode, SourceProvider};
use crate::error::{CacheError, Result};

/// Opens [`FileSource`]s relative to a base directory, or absolute paths
/// when constructed with [`FsProvider::default`].
#[derive(Debug, Default)]
pub struct FsProvider {
    base: Option<PathBuf>,
}

impl FsProvider {
    /// Provider resolving paths under `base`.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: Some(base.into()),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.base {
            Some(base) => base.join(path),
            None => PathBuf::from(path),
        }
    }
}

impl SourceProvider for FsProvider {
    fn open(&self, path: &str, mode: OpenMode) -> Result<Box<dyn DataSource>> {
        let file = FileSource::open(self.resolve(path), mode)?;
        Ok(Box::new(file))
    }
}

/// A file on disk accessed with positional reads and writes, so the cache
/// worker never has to maintain a shared cursor.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    file: Option<File>,
    mode: OpenMode,
}

impl FileSource {
    pub fn open(path: impl Into<PathBuf>, mode: OpenMode) -> Result<Self> {
        let path = path.into();
        let file = open_with_mode(&path, mode)?;
        debug!("opened file source {:?} ({mode})", path);
        Ok(Self {
            path,
            file: Some(file),
            mode,
        })
    }

    fn file(&self) -> Result<&File> {
        self.file.as_ref().ok_or_else(|| {
            CacheError::cant_open(&self.path.to_string_lossy(), "source is closed")
        })
    }
}

fn open_with_mode(path: &std::path::Path, mode: OpenMode) -> Result<File> {
    let display = path.to_string_lossy();
    let result = match mode {
        OpenMode::Read => OpenOptions::new().read(true).open(path),
        OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path),
        OpenMode::Create => OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path),
    };
    result.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CacheError::NotFound(display.into_owned())
        } else {
            CacheError::cant_open(&display, e)
        }
    })
}

#[cfg(unix)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    // read_at may return short mid-file on signal interruption; loop until
    // EOF or the buffer is full.
    let mut total = 0;
    while total < buf.len() {
        match file.read_at(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(unix)]
fn write_at(file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(data, offset)
}

#[cfg(windows)]
fn read_at(file: &File, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
    use std::os::windows::fs::FileExt;
    let mut total = 0;
    while total < buf.len() {
        match file.seek_read(&mut buf[total..], offset + total as u64) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

#[cfg(windows)]
fn write_at(file: &File, offset: u64, data: &[u8]) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    let mut written = 0;
    while written < data.len() {
        match file.seek_write(&data[written..], offset + written as u64) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

impl DataSource for FileSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let file = self.file()?;
        read_at(file, offset, buf).map_err(|e| CacheError::cant_read(offset, e))
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        if !self.mode.writable() {
            return Err(CacheError::InvalidMode {
                path: self.path.to_string_lossy().into_owned(),
                mode: self.mode.as_str(),
            });
        }
        let file = self.file()?;
        write_at(file, offset, data).map_err(|e| CacheError::cant_write(offset, e))
    }

    fn len(&self) -> Result<u64> {
        let file = self.file()?;
        let meta = file
            .metadata()
            .map_err(|e| CacheError::cant_open(&self.path.to_string_lossy(), e))?;
        Ok(meta.len())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            debug!("closed file source {:?}", self.path);
        }
        Ok(())
    }

    fn reopen(&mut self, mode: OpenMode) -> Result<()> {
        let file = open_with_mode(&self.path, mode)?;
        self.file = Some(file);
        self.mode = mode;
        debug!("reopened file source {:?} ({mode})", self.path);
        Ok(())
    }
}
