//! Typed access to memory-mapped register windows.
//!
//! A `RegisterWindow` is only ever touched through `load` and `store`, which
//! are parameterised by access width and always perform a single volatile
//! access of exactly that width. Device memory is little-endian; values are
//! converted on the way in and out so that callers see host integers
//! regardless of host byte order.

use std::mem;
use std::ptr::{self, NonNull};

use crate::error::{EmuError, EmuResult};

mod sealed {
    pub trait Sealed {}
}

/// An access width supported by the register window.
pub trait Width: Copy + sealed::Sealed {
    /// Convert from device byte order to host byte order.
    fn from_device(raw: Self) -> Self;
    /// Convert from host byte order to device byte order.
    fn to_device(self) -> Self;
}

macro_rules! impl_width {
    ($($t:ty),*) => {$(
        impl sealed::Sealed for $t {}

        impl Width for $t {
            #[inline]
            fn from_device(raw: Self) -> Self {
                <$t>::from_le(raw)
            }

            #[inline]
            fn to_device(self) -> Self {
                self.to_le()
            }
        }
    )*}
}

impl_width!(u8, u16, u32, u64);

/// Where the window's memory came from, which decides how it is released.
enum Backing {
    /// An `mmap`ed device region.
    Mapped,
    /// A heap allocation of this many `u64` words.
    Owned(usize),
}

/// A fixed-size window of device-visible memory.
pub struct RegisterWindow {
    base: NonNull<u8>,
    len: usize,
    backing: Backing,
}

impl RegisterWindow {
    /// Allocate a zeroed window on the heap. Used in place of a device
    /// mapping when no hardware is present.
    pub fn anonymous(len: usize) -> Self {
        // u64 words keep every supported width naturally aligned.
        let words = (len + mem::size_of::<u64>() - 1) / mem::size_of::<u64>();
        let raw = Box::into_raw(vec![0u64; words.max(1)].into_boxed_slice());
        RegisterWindow {
            // Box pointers are never null.
            base: NonNull::new(raw as *mut u8).unwrap(),
            len,
            backing: Backing::Owned(words.max(1)),
        }
    }

    /// Adopt an existing `mmap` of `len` bytes. The window unmaps it on drop.
    ///
    /// # Safety
    /// `base` must be the page-aligned result of a successful `mmap` of
    /// exactly `len` bytes that nothing else will unmap.
    pub(crate) unsafe fn from_mapping(base: NonNull<u8>, len: usize) -> Self {
        RegisterWindow {
            base,
            len,
            backing: Backing::Mapped,
        }
    }

    /// The size of the window in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check that `len` bytes at `offset` lie inside the window and that
    /// `offset` is a multiple of `align`.
    pub fn check(&self, offset: usize, len: usize, align: usize) -> EmuResult<()> {
        let in_bounds = offset.checked_add(len).map_or(false, |end| end <= self.len);
        if in_bounds && offset % align == 0 {
            Ok(())
        } else {
            Err(EmuError::BadPayload { offset, len, window: self.len })
        }
    }

    /// Load a value of width `W` from `offset`.
    ///
    /// Panics if the access is out of bounds or misaligned; callers validate
    /// hardware-supplied offsets with `check` first.
    #[inline]
    pub fn load<W: Width>(&self, offset: usize) -> W {
        let ptr = self.pointer::<W>(offset);
        // SAFETY: `pointer` guarantees an aligned, in-bounds address within
        // memory owned by this window for its whole lifetime.
        W::from_device(unsafe { ptr::read_volatile(ptr) })
    }

    /// Store a value of width `W` at `offset`.
    ///
    /// Panics if the access is out of bounds or misaligned.
    #[inline]
    pub fn store<W: Width>(&self, offset: usize, value: W) {
        let ptr = self.pointer::<W>(offset);
        // SAFETY: as for `load`.
        unsafe { ptr::write_volatile(ptr, value.to_device()) }
    }

    fn pointer<W: Width>(&self, offset: usize) -> *mut W {
        let size = mem::size_of::<W>();
        assert!(
            offset.checked_add(size).map_or(false, |end| end <= self.len),
            "register access {:#x}+{} outside window of {:#x} bytes", offset, size, self.len
        );
        assert_eq!(offset % size, 0, "misaligned {} byte register access at {:#x}", size, offset);
        // SAFETY: offset is within the allocation, checked above.
        unsafe { self.base.as_ptr().add(offset) as *mut W }
    }
}

impl Drop for RegisterWindow {
    fn drop(&mut self) {
        match self.backing {
            Backing::Mapped => {
                // SAFETY: established by `from_mapping`.
                unsafe {
                    libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len);
                }
            }
            Backing::Owned(words) => {
                let slice = ptr::slice_from_raw_parts_mut(self.base.as_ptr() as *mut u64, words);
                // SAFETY: this is the pointer produced by `Box::into_raw` in
                // `anonymous`, with the same length.
                drop(unsafe { Box::from_raw(slice) });
            }
        }
    }
}
