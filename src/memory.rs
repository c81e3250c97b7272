// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Page-aligned memory backing the ring buffers.
//!
//! Ring memory either comes from the process heap (page aligned, zeroed) or
//! from a Linux DMA heap, in which case it is physically contiguous (CMA)
//! and mapped into the process with `mmap`. Both are released when the
//! [`Allocation`] is dropped.

use crate::error::{Error, Result};
use dma_heap::{Heap, HeapKind};
use std::{
    alloc::{alloc_zeroed, dealloc, Layout},
    ffi::c_void,
    fmt, io,
    os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd},
    ptr::{self, NonNull},
    slice::{from_raw_parts, from_raw_parts_mut},
};
use tracing::{debug, warn};

/// Fallback when the page size cannot be queried.
const DEFAULT_PAGE_SIZE: usize = 4096;

/// Sector size used to round up header regions placed before a payload.
pub const SECTOR_SIZE: usize = 512;

/// Returns the system page size.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        DEFAULT_PAGE_SIZE
    }
}

/// Rounds `value` up to the next multiple of `align`.
pub const fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

/// DMA heap to allocate from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmaHeapKind {
    /// Physically contiguous memory (`/dev/dma_heap/linux,cma`).
    Cma,
    /// Scattered system pages (`/dev/dma_heap/system`).
    System,
}

impl From<DmaHeapKind> for HeapKind {
    fn from(kind: DmaHeapKind) -> Self {
        match kind {
            DmaHeapKind::Cma => HeapKind::Cma,
            DmaHeapKind::System => HeapKind::System,
        }
    }
}

/// Where the buffer pool gets memory from when the caller supplies none.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Allocator {
    /// Page-aligned process heap memory.
    #[default]
    System,
    /// Linux DMA heap memory mapped into the process.
    DmaHeap(DmaHeapKind),
}

enum Backing {
    System(Layout),
    DmaHeap(OwnedFd),
}

/// Zero-filled, page-aligned memory region owned by the buffer pool.
///
/// # Safety
///
/// While the API is safe, the memory is handed to a DMA engine which writes
/// it asynchronously. Slices obtained from an `Allocation` may observe
/// concurrent hardware writes if the ring overruns.
pub struct Allocation {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// The region is exclusively owned; the raw pointer is not shared with any
// other Rust object.
unsafe impl Send for Allocation {}

impl Allocation {
    /// Allocates `len` zeroed bytes from `allocator`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `len` is zero
    /// - The process heap is exhausted
    /// - The DMA heap device cannot be opened or has no memory left
    /// - The DMA buffer cannot be mapped
    pub fn new(len: usize, allocator: Allocator) -> Result<Self> {
        if len == 0 {
            return Err(Error::Allocation("zero sized allocation".to_string()));
        }
        match allocator {
            Allocator::System => Self::system(len),
            Allocator::DmaHeap(kind) => Self::dma_heap(len, kind),
        }
    }

    fn system(len: usize) -> Result<Self> {
        let layout = Layout::from_size_align(len, page_size())
            .map_err(|e| Error::Allocation(e.to_string()))?;
        let ptr = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr)
            .ok_or_else(|| Error::Allocation(format!("out of memory allocating {len} bytes")))?;
        debug!(len, "system buffer allocated");
        Ok(Self {
            ptr,
            len,
            backing: Backing::System(layout),
        })
    }

    fn dma_heap(len: usize, kind: DmaHeapKind) -> Result<Self> {
        let heap = Heap::new(kind.into()).map_err(|e| Error::Allocation(e.to_string()))?;
        let fd = heap
            .allocate(len)
            .map_err(|e| Error::Allocation(e.to_string()))?;
        let mmap = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if mmap == libc::MAP_FAILED {
            return Err(io::Error::last_os_error().into());
        }
        let ptr = NonNull::new(mmap.cast::<u8>())
            .ok_or_else(|| Error::Allocation("mmap returned null".to_string()))?;
        // DMA heaps do not guarantee cleared pages.
        unsafe { ptr::write_bytes(ptr.as_ptr(), 0, len) };
        debug!(len, ?kind, "DMA heap buffer allocated");
        Ok(Self {
            ptr,
            len,
            backing: Backing::DmaHeap(fd),
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// File descriptor of the DMA buffer, for sharing with other processes
    /// or devices. `None` for process heap memory.
    pub fn fd(&self) -> Option<BorrowedFd<'_>> {
        match &self.backing {
            Backing::System(_) => None,
            Backing::DmaHeap(fd) => Some(fd.as_fd()),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_slice_mut(&mut self) -> &mut [u8] {
        unsafe { from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        match &self.backing {
            Backing::System(layout) => unsafe { dealloc(self.ptr.as_ptr(), *layout) },
            Backing::DmaHeap(_) => {
                if unsafe { libc::munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } != 0 {
                    warn!("unmap failed: {}", io::Error::last_os_error());
                }
            }
        }
        debug!(len = self.len, "buffer freed");
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let kind = match &self.backing {
            Backing::System(_) => "system".to_string(),
            Backing::DmaHeap(fd) => format!("dma fd:{}", fd.as_raw_fd()),
        };
        write!(f, "Allocation({:p}, {} bytes, {})", self.ptr, self.len, kind)
    }
}

/// Caller-supplied memory for a ring slot or a block of slots.
///
/// The pool never frees external memory.
#[derive(Copy, Clone, Debug)]
pub struct ExternalBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl ExternalBuffer {
    /// Wraps `len` bytes starting at `ptr`.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    /// - `ptr` is non-null and valid for reads and writes of `len` bytes
    /// - The memory outlives every buffer pool configured with it, up to the
    ///   pool's `disable()` or drop
    /// - Nothing else accesses the memory while the pool hands it to the
    ///   transfer channel
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Option<Self> {
        NonNull::new(ptr).map(|ptr| Self { ptr, len })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<&'static mut [u8]> for ExternalBuffer {
    fn from(buf: &'static mut [u8]) -> Self {
        Self {
            ptr: NonNull::from(&mut *buf).cast::<u8>(),
            len: buf.len(),
        }
    }
}
