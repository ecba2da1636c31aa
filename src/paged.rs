//! Read-only handle over a logical sub-stream of a page-structured file.

use std::io;

use crate::diag::{self, Severity};
use crate::error::{Error, Result};
use crate::handle::{VirtualHandle, Whence};
use crate::translate::PageLayout;

/// Logical view of one sub-stream, skipping page trailers on read
///
/// Owns its raw handle exclusively until [`PagedStreamHandle::take_raw`]
/// transfers it out.
#[derive(Debug)]
pub struct PagedStreamHandle<H: VirtualHandle> {
    /// Raw physical handle, `None` once closed or transferred
    raw: Option<H>,
    /// Page geometry of the container
    layout: PageLayout,
    /// Physical offset the sub-stream is anchored at
    base: u64,
    /// Header bytes skipped at the start of the sub-stream
    header_size: u64,
    /// Logical length, header excluded
    length: u64,
    /// Logical cursor
    pos: u64,
    /// End-of-stream flag
    eof: bool,
    /// Scratch buffer for trailer skips
    trailer: Vec<u8>,
}

impl<H: VirtualHandle> PagedStreamHandle<H> {
    /// Wrap `raw` to expose `length` logical bytes starting `header_size`
    /// logical bytes after physical offset `base`
    pub fn new(
        raw: H,
        layout: PageLayout,
        base: u64,
        header_size: u64,
        length: u64,
    ) -> Result<Self> {
        if let Err(err) = layout.check_stream_start(base) {
            diag::report(Severity::Failure, &err);
            return Err(err);
        }
        Ok(PagedStreamHandle {
            raw: Some(raw),
            layout,
            base,
            header_size,
            length,
            pos: 0,
            eof: false,
            trailer: vec![0; layout.trailer_size() as usize],
        })
    }

    /// Logical length of the sub-stream
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Transfer the raw handle out; later `close` calls become no-ops
    pub fn take_raw(&mut self) -> Option<H> {
        self.raw.take()
    }

    /// Physical offset of the current logical cursor
    pub fn physical_position(&self) -> Option<u64> {
        let logical = self.pos.checked_add(self.header_size)?;
        self.layout.checked_to_physical(self.base, logical)
    }

    fn read_pages(&mut self, buf: &mut [u8]) -> usize {
        let Some(logical) = self.pos.checked_add(self.header_size) else {
            return 0;
        };
        let Some(physical) = self.layout.checked_to_physical(self.base, logical) else {
            return 0;
        };
        let Some(raw) = self.raw.as_mut() else {
            return 0;
        };
        if raw.seek(physical, Whence::Set).is_err() {
            self.eof = true;
            return 0;
        }

        let mut in_page = self.layout.bytes_before_trailer(self.base, logical);
        let mut done = 0usize;
        while done < buf.len() {
            let chunk = (buf.len() - done).min(usize::try_from(in_page).unwrap_or(usize::MAX));
            let got = raw.read(&mut buf[done..done + chunk]);
            done += got;
            if got < chunk {
                self.eof = true;
                break;
            }
            in_page -= chunk as u64;
            if in_page == 0 && done < buf.len() {
                let at = raw.tell();
                if raw.read(&mut self.trailer) != self.trailer.len() {
                    let err = Error::MalformedTrailer { offset: at };
                    diag::report(Severity::Warning, &err);
                    self.eof = true;
                    break;
                }
                in_page = self.layout.logical_page_size();
            }
        }
        done
    }
}

impl<H: VirtualHandle> VirtualHandle for PagedStreamHandle<H> {
    fn seek(&mut self, offset: u64, whence: Whence) -> Result<()> {
        let target = match whence {
            Whence::Set => Some(offset),
            Whence::Cur => self.pos.checked_add(offset),
            Whence::End if offset == 0 => Some(self.length),
            Whence::End => None,
        };
        let Some(target) = target else {
            let err = Error::UnsupportedSeek {
                offset,
                whence: whence.name(),
            };
            debug_assert!(false, "{}", err);
            diag::report(Severity::Failure, &err);
            return Err(err);
        };
        self.pos = target;
        self.eof = false;
        Ok(())
    }

    fn tell(&self) -> u64 {
        self.pos
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        if self.eof || buf.is_empty() || self.pos >= self.length {
            return 0;
        }
        if self.pos.checked_add(buf.len() as u64).is_none() {
            return 0;
        }

        let available = self.length - self.pos;
        let wanted = buf.len().min(usize::try_from(available).unwrap_or(usize::MAX));
        let done = self.read_pages(&mut buf[..wanted]);
        if wanted < buf.len() {
            self.eof = true;
        }
        self.pos += done as u64;
        done
    }

    fn write(&mut self, _buf: &[u8]) -> usize {
        0
    }

    fn eof(&self) -> bool {
        self.eof
    }

    fn error(&self) -> bool {
        self.raw.as_ref().map_or(false, |raw| raw.error())
    }

    fn close(&mut self) -> Result<()> {
        match self.raw.take() {
            Some(mut raw) => raw.close(),
            None => Ok(()),
        }
    }
}

impl<H: VirtualHandle> Drop for PagedStreamHandle<H> {
    fn drop(&mut self) {
        if let Some(mut raw) = self.raw.take() {
            let _ = raw.close();
        }
    }
}

impl<H: VirtualHandle> io::Read for PagedStreamHandle<H> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = VirtualHandle::read(self, buf);
        if n == 0 && VirtualHandle::error(self) {
            return Err(io::Error::new(io::ErrorKind::Other, "raw handle read failed"));
        }
        Ok(n)
    }
}

impl<H: VirtualHandle> io::Seek for PagedStreamHandle<H> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(offset) => Some(offset),
            io::SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            io::SeekFrom::End(delta) => self.length.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
        })?;
        self.pos = target;
        self.eof = false;
        Ok(target)
    }
}
