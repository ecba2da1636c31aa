//! Logical to physical offset translation for page-structured containers.
//!
//! Every physical page of `page_size` bytes ends with a `trailer_size`
//! record (typically a checksum). The logical view of a sub-stream skips
//! those trailers and is contiguous.

use crate::constants::MAX_PAGE_SIZE;
use crate::error::{Error, Result};

/// Physical page geometry of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    page_size: u64,
    trailer_size: u64,
}

impl PageLayout {
    /// Validate and build a layout
    ///
    /// The page size must exceed the trailer size, be a multiple of it and
    /// not exceed [`MAX_PAGE_SIZE`].
    pub fn new(page_size: u64, trailer_size: u64) -> Result<Self> {
        if trailer_size == 0
            || page_size <= trailer_size
            || page_size % trailer_size != 0
            || page_size > MAX_PAGE_SIZE
        {
            return Err(Error::InvalidPageLayout {
                page_size,
                trailer_size,
            });
        }
        Ok(PageLayout {
            page_size,
            trailer_size,
        })
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub fn trailer_size(&self) -> u64 {
        self.trailer_size
    }

    /// Payload bytes per physical page
    pub fn logical_page_size(&self) -> u64 {
        self.page_size - self.trailer_size
    }

    /// Reject sub-streams starting inside the last `trailer_size - 1` bytes
    /// of a page
    ///
    /// A start on the first trailer byte is accepted: it is equivalent to
    /// the start of the next page.
    pub fn check_stream_start(&self, base: u64) -> Result<()> {
        if base % self.page_size > self.logical_page_size() {
            return Err(Error::InvalidOffset { base });
        }
        Ok(())
    }

    /// Number of trailers crossed between `base` and `base + logical`
    pub fn pages_crossed(&self, base: u64, logical: u64) -> u64 {
        (base % self.page_size + logical) / self.logical_page_size()
    }

    /// Physical offset of logical offset `logical` of the sub-stream at `base`
    pub fn to_physical(&self, base: u64, logical: u64) -> u64 {
        base + logical + self.pages_crossed(base, logical) * self.trailer_size
    }

    /// Checked variant of [`PageLayout::to_physical`]
    pub fn checked_to_physical(&self, base: u64, logical: u64) -> Option<u64> {
        let in_page = (base % self.page_size).checked_add(logical)?;
        let crossed = in_page / self.logical_page_size();
        base.checked_add(logical)?
            .checked_add(crossed.checked_mul(self.trailer_size)?)
    }

    /// Payload bytes left before the next trailer, from logical `logical`
    pub fn bytes_before_trailer(&self, base: u64, logical: u64) -> u64 {
        let lps = self.logical_page_size();
        lps - (base % self.page_size + logical) % lps
    }
}

/// Physical offset of `logical` in the sub-stream anchored at `base`
pub fn logical_to_physical(base: u64, logical: u64, page_size: u64, trailer_size: u64) -> u64 {
    let lps = page_size - trailer_size;
    let crossed = (base % page_size + logical) / lps;
    base + logical + crossed * trailer_size
}
