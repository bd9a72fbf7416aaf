//! The block backend: a file standing in for the card's flash.

use log::{debug, log_enabled, trace, Level};
use sdcard_emu_utils::crc16::crc16_xmodem;
use sdcard_emu_utils::hexprint::hex_dump;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::{EmuError, EmuResult};
use crate::mmio::RegisterWindow;

pub const SECTOR_SIZE: usize = 512;

/// Size of the checksum trailer placed after a sector when enabled. Only the
/// first two bytes carry the CRC; the rest pad to a word multiple.
pub const CRC_TRAILER_SIZE: usize = 8;

const WORD: usize = mem::size_of::<u32>();

/// `_IOR(0x12, 114, size_t)`: block device size in bytes.
const BLKGETSIZE64: libc::c_ulong = (2 << 30)
    | ((mem::size_of::<usize>() as libc::c_ulong) << 16)
    | (0x12 << 8)
    | 114;

/// Something that can hold the emulated medium.
pub trait BackingStore: Read + Write + Seek {
    /// Total capacity in bytes.
    fn capacity(&self) -> io::Result<u64>;
}

impl BackingStore for File {
    fn capacity(&self) -> io::Result<u64> {
        let mut size: u64 = 0;
        // SAFETY: BLKGETSIZE64 writes a single u64 through the pointer.
        let r = unsafe { libc::ioctl(self.as_raw_fd(), BLKGETSIZE64 as _, &mut size as *mut u64) };
        if r == 0 {
            return Ok(size);
        }
        // Not a block device (ENOTTY), so it's a plain file.
        Ok(self.metadata()?.len())
    }
}

/// Backend tunables.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Append a CRC-16/XMODEM trailer after each sector read.
    pub crc_trailer: bool,
}

/// Sector-level access to a backing store.
pub struct BlockBackend<S = File> {
    store: S,
    config: BackendConfig,
}

impl BlockBackend<File> {
    /// Open the backing file for reading and writing.
    pub fn open(path: impl AsRef<Path>, config: BackendConfig) -> EmuResult<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(EmuError::with_context(
                format!("Unable to open '{}'", path.display())))?;
        Ok(Self::new(file, config))
    }
}

impl<S: BackingStore> BlockBackend<S> {
    pub fn new(store: S, config: BackendConfig) -> Self {
        BlockBackend { store, config }
    }

    pub fn config(&self) -> BackendConfig {
        self.config
    }

    /// Number of payload bytes a sector read produces.
    pub fn read_len(&self) -> usize {
        if self.config.crc_trailer {
            SECTOR_SIZE + CRC_TRAILER_SIZE
        } else {
            SECTOR_SIZE
        }
    }

    /// Capacity of the backing store in bytes.
    pub fn capacity(&self) -> EmuResult<u64> {
        self.store.capacity()
            .map_err(EmuError::with_context("Failed to query backing store size"))
    }

    /// Store the capacity into the 8-byte payload slot. The slot need only be
    /// word aligned; it is then filled as two words, low first.
    pub fn size(&self, window: &RegisterWindow, payload: usize) -> EmuResult<u64> {
        window.check(payload, mem::size_of::<u64>(), WORD)?;
        let size = self.capacity()?;
        if payload % mem::size_of::<u64>() == 0 {
            window.store::<u64>(payload, size);
        } else {
            window.store::<u32>(payload, size as u32);
            window.store::<u32>(payload + WORD, (size >> 32) as u32);
        }
        debug!("Reported size {} bytes.", size);
        Ok(size)
    }

    /// Copy sector `sector` into the payload buffer.
    pub fn read_sector(&mut self, sector: u64, window: &RegisterWindow,
                       payload: usize) -> EmuResult<()> {
        debug!("Reading sector {}.", sector);
        window.check(payload, self.read_len(), WORD)?;
        let buf = self.read_block(sector)?;

        for (i, word) in buf.chunks_exact(WORD).enumerate() {
            window.store::<u32>(payload + i * WORD, word_from(word));
        }
        if self.config.crc_trailer {
            let crc = crc16_xmodem(&buf);
            let mut trailer = [0u8; CRC_TRAILER_SIZE];
            trailer[..2].copy_from_slice(&crc.to_be_bytes());
            for (i, word) in trailer.chunks_exact(WORD).enumerate() {
                window.store::<u32>(payload + SECTOR_SIZE + i * WORD, word_from(word));
            }
            trace!("Sector {} crc16 = {:#06x}.", sector, crc);
        }
        Ok(())
    }

    /// Persist the payload buffer as sector `sector`.
    pub fn write_sector(&mut self, sector: u64, window: &RegisterWindow,
                        payload: usize) -> EmuResult<()> {
        debug!("Writing sector {}.", sector);
        window.check(payload, SECTOR_SIZE, WORD)?;
        let mut buf = [0u8; SECTOR_SIZE];
        for (i, word) in buf.chunks_exact_mut(WORD).enumerate() {
            let value = window.load::<u32>(payload + i * WORD);
            word.copy_from_slice(&value.to_le_bytes());
        }
        self.write_block(sector, &buf)
    }

    /// Read a whole sector from the store, retrying short reads.
    pub fn read_block(&mut self, sector: u64) -> EmuResult<[u8; SECTOR_SIZE]> {
        self.seek_to(sector)?;
        let mut buf = [0u8; SECTOR_SIZE];
        let mut done = 0;
        while done < SECTOR_SIZE {
            match self.store.read(&mut buf[done..]) {
                Ok(0) => return Err(EmuError::ShortTransfer { sector, done }),
                Ok(n) => {
                    if done + n < SECTOR_SIZE {
                        trace!("Short read of {} bytes from sector {}.", n, sector);
                    }
                    done += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EmuError::io(
                    format!("Read error on sector {}", sector), e)),
            }
        }
        if log_enabled!(Level::Trace) {
            trace!("Sector {} contents:\n{}", sector, hex_dump(&buf, 0));
        }
        Ok(buf)
    }

    /// Write a whole sector to the store, retrying short writes.
    pub fn write_block(&mut self, sector: u64, buf: &[u8; SECTOR_SIZE]) -> EmuResult<()> {
        self.seek_to(sector)?;
        let mut done = 0;
        while done < SECTOR_SIZE {
            match self.store.write(&buf[done..]) {
                Ok(0) => return Err(EmuError::ShortTransfer { sector, done }),
                Ok(n) => {
                    if done + n < SECTOR_SIZE {
                        trace!("Short write of {} bytes to sector {}.", n, sector);
                    }
                    done += n;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(EmuError::io(
                    format!("Write error on sector {}", sector), e)),
            }
        }
        Ok(())
    }

    fn seek_to(&mut self, sector: u64) -> EmuResult<()> {
        let offset = sector.checked_mul(SECTOR_SIZE as u64)
            .ok_or(EmuError::SectorOutOfRange(sector))?;
        self.store.seek(SeekFrom::Start(offset))
            .map_err(EmuError::with_context(format!("Seek to sector {} failed", sector)))?;
        Ok(())
    }
}

/// Assemble a word in memory order, so the bytes land in the window exactly
/// as they sit in the buffer.
#[inline]
fn word_from(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
