use std::fs::File;
use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead {
        offset: u64,
        wanted: usize,
        got: usize,
    },
}

/// Read-only random access over the evidence image. The coordinator owns the
/// only instance; workers never see the image itself, only sliced chunk bytes.
pub trait ByteSource: Send + Sync {
    fn len(&self) -> u64;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError>;
}

pub struct RawImageSource {
    file: File,
    len: u64,
    #[cfg(not(unix))]
    lock: std::sync::Mutex<()>,
}

impl RawImageSource {
    pub fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            len,
            #[cfg(not(unix))]
            lock: std::sync::Mutex::new(()),
        })
    }
}

impl ByteSource for RawImageSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, SourceError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            Ok(self.file.read_at(buf, offset)?)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let _guard = self.lock.lock().unwrap();
            let mut f = &self.file;
            f.seek(SeekFrom::Start(offset))?;
            Ok(f.read(buf)?)
        }
    }
}

/// Read `[start, end)` completely, failing instead of returning a short slice.
pub fn read_range(source: &dyn ByteSource, start: u64, end: u64) -> Result<Vec<u8>, SourceError> {
    let wanted = end.saturating_sub(start) as usize;
    let mut buf = vec![0u8; wanted];
    let mut read = 0usize;
    while read < wanted {
        let n = source.read_at(start + read as u64, &mut buf[read..])?;
        if n == 0 {
            return Err(SourceError::ShortRead {
                offset: start,
                wanted,
                got: read,
            });
        }
        read += n;
    }
    Ok(buf)
}
