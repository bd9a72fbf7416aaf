//! Register window mapper for Linux userspace I/O (UIO) devices.
//!
//! A UIO device exposes each of its memory regions as a "map". Map `N` is
//! selected by mmapping the device file at offset `N * page_size`, and its
//! size is published in sysfs at `/sys/class/uio/uioX/maps/mapN/size`.

use log::info;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};

use crate::error::{EmuError, EmuResult};
use crate::mmio::RegisterWindow;

pub const SYSFS_UIO_ROOT: &str = "/sys/class/uio";

/// Something that can map numbered register windows.
pub trait RegisterMapper {
    fn map(&self, index: usize) -> EmuResult<RegisterWindow>;
}

/// An open UIO device.
pub struct Uio {
    device: PathBuf,
    file: File,
    sysfs: PathBuf,
}

impl Uio {
    /// Open the given UIO device node, e.g. `/dev/uio0`.
    pub fn open(device: impl AsRef<Path>) -> EmuResult<Self> {
        Self::open_with_sysfs(device, SYSFS_UIO_ROOT)
    }

    /// Open a UIO device whose sysfs class directory lives under
    /// `sysfs_root` rather than the usual location.
    pub fn open_with_sysfs(device: impl AsRef<Path>,
                           sysfs_root: impl AsRef<Path>) -> EmuResult<Self> {
        let device = device.as_ref();
        let name = device.file_name().ok_or_else(|| EmuError::io(
            format!("Bad UIO device path '{}'", device.display()),
            io::Error::new(io::ErrorKind::InvalidInput, "no device name")))?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(EmuError::with_context(
                format!("Failed to open UIO device '{}'", device.display())))?;
        Ok(Uio {
            device: device.to_path_buf(),
            file,
            sysfs: sysfs_root.as_ref().join(name),
        })
    }

    /// The size in bytes of map `index`, as published by the kernel.
    pub fn map_size(&self, index: usize) -> EmuResult<usize> {
        let path = self.sysfs.join("maps").join(format!("map{}", index)).join("size");
        let context = || format!("Failed to read size of UIO map {} from '{}'",
                                 index, path.display());
        let text = fs::read_to_string(&path).map_err(|e| EmuError::io(context(), e))?;
        let size = parse_hex(&text).ok_or_else(|| EmuError::io(context(), io::Error::new(
            io::ErrorKind::InvalidData, format!("unparseable size {:?}", text.trim()))))?;
        if size == 0 {
            return Err(EmuError::io(context(), io::Error::new(
                io::ErrorKind::InvalidData, "map has zero size")));
        }
        Ok(size)
    }
}

impl RegisterMapper for Uio {
    /// Map region `index` of the device into our address space.
    fn map(&self, index: usize) -> EmuResult<RegisterWindow> {
        let len = self.map_size(index)?;
        let offset = index * page_size();
        // SAFETY: plain mmap call; the result is checked before use.
        let addr = unsafe {
            libc::mmap(ptr::null_mut(),
                       len,
                       libc::PROT_READ | libc::PROT_WRITE,
                       libc::MAP_SHARED,
                       self.file.as_raw_fd(),
                       offset as libc::off_t)
        };
        if addr == libc::MAP_FAILED {
            return Err(EmuError::io(
                format!("Failed to map region {} of '{}'", index, self.device.display()),
                io::Error::last_os_error()));
        }
        info!("Mapped region {} of '{}': {:#x} bytes.", index, self.device.display(), len);
        let base = NonNull::new(addr as *mut u8).ok_or_else(|| EmuError::io(
            format!("Region {} of '{}' mapped at null", index, self.device.display()),
            io::Error::new(io::ErrorKind::Other, "null mapping")))?;
        // SAFETY: `base` is a fresh mapping of exactly `len` bytes.
        Ok(unsafe { RegisterWindow::from_mapping(base, len) })
    }
}

/// The system page size.
pub fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

/// Parse a sysfs hex value such as `0x00001000\n`.
fn parse_hex(text: &str) -> Option<usize> {
    let text = text.trim();
    let digits = text.strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    usize::from_str_radix(digits, 16).ok()
}
