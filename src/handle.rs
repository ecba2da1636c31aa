//! Seekable, readable virtual file handles.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::debug;
use memmap2::Mmap;

use crate::error::{Error, Result};

/// Origin of a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the stream
    Set,
    /// From the current cursor
    Cur,
    /// From the end of the stream
    End,
}

impl Whence {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Whence::Set => "start",
            Whence::Cur => "current",
            Whence::End => "end",
        }
    }
}

/// Capability set of a virtual file handle
///
/// Reads follow the permissive contract of the format drivers built on top:
/// they return the number of bytes actually read, and a short count is
/// reported through [`VirtualHandle::eof`] / [`VirtualHandle::error`]
/// rather than as an `Err`.
pub trait VirtualHandle: Send {
    fn seek(&mut self, offset: u64, whence: Whence) -> Result<()>;
    fn tell(&self) -> u64;
    fn read(&mut self, buf: &mut [u8]) -> usize;
    /// Write `buf`, returning the number of bytes written
    fn write(&mut self, _buf: &[u8]) -> usize {
        0
    }
    fn eof(&self) -> bool;
    fn error(&self) -> bool;
    fn close(&mut self) -> Result<()>;
}

impl<H: VirtualHandle + ?Sized> VirtualHandle for Box<H> {
    fn seek(&mut self, offset: u64, whence: Whence) -> Result<()> {
        (**self).seek(offset, whence)
    }
    fn tell(&self) -> u64 {
        (**self).tell()
    }
    fn read(&mut self, buf: &mut [u8]) -> usize {
        (**self).read(buf)
    }
    fn write(&mut self, buf: &[u8]) -> usize {
        (**self).write(buf)
    }
    fn eof(&self) -> bool {
        (**self).eof()
    }
    fn error(&self) -> bool {
        (**self).error()
    }
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// Virtual handle over any std reader (files, in-memory cursors)
#[derive(Debug)]
pub struct FileHandle<R> {
    /// Underlying reader, `None` once closed
    inner: Option<R>,
    /// Cursor position
    pos: u64,
    /// End of stream reached by the last read
    eof: bool,
    /// The last read failed
    error: bool,
}

impl FileHandle<File> {
    /// Open a file read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(FileHandle::new(File::open(path)?))
    }
}

impl<R: Read + Seek + Send> FileHandle<R> {
    pub fn new(inner: R) -> Self {
        FileHandle {
            inner: Some(inner),
            pos: 0,
            eof: false,
            error: false,
        }
    }

    /// Give back the wrapped reader
    pub fn into_inner(mut self) -> Option<R> {
        self.inner.take()
    }
}

impl<R: Read + Seek + Send> VirtualHandle for FileHandle<R> {
    fn seek(&mut self, offset: u64, whence: Whence) -> Result<()> {
        let inner = self.inner.as_mut().ok_or(Error::NotSupported("seek on closed handle"))?;
        let from = match whence {
            Whence::Set => SeekFrom::Start(offset),
            Whence::Cur => SeekFrom::Current(to_signed(offset)?),
            Whence::End => SeekFrom::End(to_signed(offset)?),
        };
        self.pos = inner.seek(from)?;
        self.eof = false;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let Some(inner) = self.inner.as_mut() else {
            self.error = true;
            return 0;
        };
        let mut done = 0;
        while done < buf.len() {
            match inner.read(&mut buf[done..]) {
                Ok(0) => {
                    self.eof = true;
                    break;
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("read failed at offset {}: {}", self.pos + done as u64, e);
                    self.error = true;
                    break;
                }
            }
        }
        self.pos += done as u64;
        done
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn error(&self) -> bool {
        self.error
    }

    fn close(&mut self) -> Result<()> {
        self.inner.take();
        Ok(())
    }
}

/// Read-only virtual handle over a memory-mapped file
#[derive(Debug)]
pub struct MmapHandle {
    map: Option<Mmap>,
    pos: u64,
    eof: bool,
}

impl MmapHandle {
    /// Map `path` read-only
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only; callers must not truncate the
        // file while the handle is alive.
        let map = unsafe { Mmap::map(&file)? };
        Ok(MmapHandle {
            map: Some(map),
            pos: 0,
            eof: false,
        })
    }

    fn len(&self) -> u64 {
        self.map.as_ref().map_or(0, |m| m.len() as u64)
    }
}

impl VirtualHandle for MmapHandle {
    fn seek(&mut self, offset: u64, whence: Whence) -> Result<()> {
        self.pos = match whence {
            Whence::Set => offset,
            Whence::Cur => self.pos.checked_add(offset).ok_or(Error::UnsupportedSeek {
                offset,
                whence: whence.name(),
            })?,
            Whence::End => self.len().checked_add(offset).ok_or(Error::UnsupportedSeek {
                offset,
                whence: whence.name(),
            })?,
        };
        self.eof = false;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let Some(map) = self.map.as_ref() else {
            return 0;
        };
        let len = map.len() as u64;
        if self.pos >= len {
            self.eof = !buf.is_empty();
            return 0;
        }
        let start = self.pos as usize;
        let n = buf.len().min(map.len() - start);
        buf[..n].copy_from_slice(&map[start..start + n]);
        if n < buf.len() {
            self.eof = true;
        }
        self.pos += n as u64;
        n
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn error(&self) -> bool {
        false
    }

    fn close(&mut self) -> Result<()> {
        self.map.take();
        Ok(())
    }
}

fn to_signed(offset: u64) -> Result<i64> {
    i64::try_from(offset).map_err(|_| Error::UnsupportedSeek {
        offset,
        whence: "signed range",
    })
}
