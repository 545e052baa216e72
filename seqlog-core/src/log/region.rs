//! Page-granular mapping of the backing file.
//!
//! Pages are mapped on first touch and stay mapped until the region is
//! dropped, so a reference into a page is valid for the lifetime of the
//! region. Lookups of already-mapped pages take no lock; a mutex guards
//! only the path that grows the file and maps a new page.

use super::header::{HEADER_SIZE, MAX_PAGES, PAGE_SIZE};
use crate::error::{Result, SeqlogError};
use crate::types::Offset;
use fs2::FileExt;
use memmap2::{MmapOptions, MmapRaw};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

/// A growable set of mapped pages over one file.
pub(crate) struct Region {
    file: File,
    path: PathBuf,
    writable: bool,
    pages: Box<[OnceLock<MmapRaw>]>,
    grow: Mutex<()>,
    /// Pages below this index have been handed to `flush_async`.
    flushed: AtomicU64,
}

impl Region {
    /// Open `path`, creating it when writable.
    pub(crate) fn open(path: &Path, writable: bool) -> Result<Self> {
        let path = path.to_path_buf();

        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(writable)
            .truncate(false)
            .open(&path)
            .map_err(|e| SeqlogError::LogOpen {
                path: path.clone(),
                cause: e.to_string(),
            })?;

        if !writable {
            let len = file
                .metadata()
                .map_err(|e| SeqlogError::LogOpen {
                    path: path.clone(),
                    cause: e.to_string(),
                })?
                .len();
            if len < HEADER_SIZE {
                return Err(SeqlogError::InvalidFormat {
                    path,
                    cause: format!("file is {} bytes, smaller than the header", len),
                });
            }
        }

        let pages = (0..MAX_PAGES).map(|_| OnceLock::new()).collect();

        Ok(Self {
            file,
            path,
            writable,
            pages,
            grow: Mutex::new(()),
            flushed: AtomicU64::new(0),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }

    /// Current length of the backing file.
    pub(crate) fn file_len(&self) -> Result<u64> {
        self.file
            .metadata()
            .map(|m| m.len())
            .map_err(|e| SeqlogError::LogOpen {
                path: self.path.clone(),
                cause: e.to_string(),
            })
    }

    /// Get page `index`, mapping it (and growing the file) if needed.
    pub(crate) fn page(&self, index: usize) -> Result<&MmapRaw> {
        let slot = self.pages.get(index).ok_or(SeqlogError::Capacity {
            offset: Offset::new(index as u64 * PAGE_SIZE),
            max_pages: MAX_PAGES as u64,
        })?;
        if let Some(page) = slot.get() {
            return Ok(page);
        }

        let _guard = self.grow.lock();
        if let Some(page) = slot.get() {
            return Ok(page);
        }

        let start = index as u64 * PAGE_SIZE;
        let mapped = if self.writable {
            // `allocate` never shrinks, so racing processes can only grow the file.
            self.file
                .allocate(start + PAGE_SIZE)
                .map_err(|e| SeqlogError::LogOpen {
                    path: self.path.clone(),
                    cause: format!("Failed to grow file to {} bytes: {}", start + PAGE_SIZE, e),
                })?;
            unsafe {
                MmapOptions::new()
                    .offset(start)
                    .len(PAGE_SIZE as usize)
                    .map_raw(&self.file)
            }
        } else {
            let len = self.file_len()?;
            if len <= start {
                return Err(SeqlogError::InvalidOffset {
                    offset: Offset::new(start),
                    cause: format!("beyond the end of a {} byte read-only file", len),
                });
            }
            unsafe {
                MmapOptions::new()
                    .offset(start)
                    .len((len - start).min(PAGE_SIZE) as usize)
                    .map_raw_read_only(&self.file)
            }
        };
        let mapped = mapped.map_err(|e| SeqlogError::LogMmap {
            path: self.path.clone(),
            page: index as u64,
            cause: e.to_string(),
        })?;

        tracing::debug!(path = %self.path.display(), page = index, "mapped log page");
        Ok(slot.get_or_init(|| mapped))
    }

    /// Raw pointer to `len` bytes at `offset`. The range must lie in one page.
    pub(crate) fn ptr(&self, offset: u64, len: u64) -> Result<*mut u8> {
        let index = offset / PAGE_SIZE;
        let within = offset % PAGE_SIZE;
        if within + len > PAGE_SIZE {
            return Err(SeqlogError::InvalidOffset {
                offset: Offset::new(offset),
                cause: format!("{} bytes straddle a page boundary", len),
            });
        }
        let page = self.page(index as usize)?;
        if within + len > page.len() as u64 {
            return Err(SeqlogError::InvalidOffset {
                offset: Offset::new(offset),
                cause: "beyond the mapped end of the file".to_string(),
            });
        }
        // SAFETY: `within + len` was checked against the mapping length.
        Ok(unsafe { page.as_mut_ptr().add(within as usize) })
    }

    /// Atomic word at `offset`.
    pub(crate) fn word(&self, offset: u64) -> Result<&AtomicU64> {
        if offset % 8 != 0 {
            return Err(SeqlogError::InvalidOffset {
                offset: Offset::new(offset),
                cause: "not word aligned".to_string(),
            });
        }
        let ptr = self.ptr(offset, 8)?;
        // SAFETY: pages are page-aligned, the offset is 8-aligned and the
        // mapping outlives `&self`. Shared words are only accessed atomically.
        Ok(unsafe { &*(ptr as *const AtomicU64) })
    }

    /// Shared view of `len` bytes at `offset`.
    pub(crate) fn bytes(&self, offset: u64, len: u64) -> Result<&[u8]> {
        let ptr = self.ptr(offset, len)?;
        // SAFETY: bounds were checked by `ptr`; committed payloads are never
        // written again.
        Ok(unsafe { std::slice::from_raw_parts(ptr, len as usize) })
    }

    /// Exclusive view of `len` bytes at `offset`.
    ///
    /// # Safety
    ///
    /// The caller must own the range: it belongs to a reservation that has
    /// not been committed yet, so no other reference to it exists.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn bytes_mut(&self, offset: u64, len: u64) -> Result<&mut [u8]> {
        let ptr = self.ptr(offset, len)?;
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len as usize) })
    }

    /// Map every page needed to cover `end` bytes.
    pub(crate) fn ensure_mapped(&self, end: u64) -> Result<()> {
        let last = end.saturating_sub(1) / PAGE_SIZE;
        for index in 0..=last {
            self.page(index as usize)?;
        }
        Ok(())
    }

    /// Start asynchronous write-back of pages touched since the last call.
    ///
    /// The page holding `frontier` is flushed every time since it is still
    /// being written.
    pub(crate) fn flush_async(&self, frontier: u64) -> Result<()> {
        let current = frontier / PAGE_SIZE;
        let start = self.flushed.load(Ordering::Acquire).min(current);
        for index in start..=current {
            if let Some(page) = self.pages.get(index as usize).and_then(|p| p.get()) {
                page.flush_async().map_err(|e| SeqlogError::LogFlush {
                    path: self.path.clone(),
                    cause: e.to_string(),
                })?;
            }
        }
        self.flushed.store(current, Ordering::Release);
        Ok(())
    }

    /// Synchronously flush every mapped page.
    pub(crate) fn flush(&self) -> Result<()> {
        for page in self.pages.iter().filter_map(|p| p.get()) {
            page.flush().map_err(|e| SeqlogError::LogFlush {
                path: self.path.clone(),
                cause: e.to_string(),
            })?;
        }
        Ok(())
    }
}
