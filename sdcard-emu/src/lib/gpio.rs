use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{EmuError, EmuResult};

pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// A control line that holds the emulated controller in reset.
pub trait ResetLine {
    fn assert_reset(&mut self) -> EmuResult<()>;
    fn deassert_reset(&mut self) -> EmuResult<()>;
}

/// A reset line driven through the Linux sysfs GPIO interface.
pub struct SysfsGpio {
    line: u32,
    value_path: PathBuf,
    active_low: bool,
}

impl SysfsGpio {
    /// Claim GPIO `line` as an output. If `active_low` is set, reset is
    /// asserted by driving the line low.
    pub fn open(line: u32, active_low: bool) -> EmuResult<Self> {
        Self::open_with_root(SYSFS_GPIO_ROOT, line, active_low)
    }

    /// As `open`, with the sysfs GPIO class directory at `root`.
    pub fn open_with_root(root: impl AsRef<Path>, line: u32,
                          active_low: bool) -> EmuResult<Self> {
        let root = root.as_ref();
        let dir = root.join(format!("gpio{}", line));
        if !dir.exists() {
            debug!("Exporting GPIO {}.", line);
            fs::write(root.join("export"), line.to_string())
                .map_err(EmuError::with_context(format!("Failed to export GPIO {}", line)))?;
        }
        fs::write(dir.join("direction"), "out")
            .map_err(EmuError::with_context(
                format!("Failed to make GPIO {} an output", line)))?;
        Ok(SysfsGpio {
            line,
            value_path: dir.join("value"),
            active_low,
        })
    }

    fn drive(&mut self, asserted: bool) -> EmuResult<()> {
        let high = asserted != self.active_low;
        fs::write(&self.value_path, if high { "1" } else { "0" })
            .map_err(EmuError::with_context(format!("Failed to drive GPIO {}", self.line)))
    }
}

impl ResetLine for SysfsGpio {
    fn assert_reset(&mut self) -> EmuResult<()> {
        debug!("Asserting reset on GPIO {}.", self.line);
        self.drive(true)
    }

    fn deassert_reset(&mut self) -> EmuResult<()> {
        debug!("Releasing reset on GPIO {}.", self.line);
        self.drive(false)
    }
}
