use std::path::PathBuf;

use crate::backend::BackendConfig;
use crate::diagnostics::BenchConfig;
use crate::dispatcher::DeviceConfig;

pub const DEFAULT_UIO_DEVICE: &str = "/dev/uio0";
pub const DEFAULT_BUFFER_MAP: usize = 0;
pub const DEFAULT_CONTROL_MAP: usize = 1;
pub const DEFAULT_RESET_GPIO: u32 = 0;

/// Everything needed to bring the emulator up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The file (or block device) holding the card image.
    pub backing_file: PathBuf,
    pub uio_device: PathBuf,
    /// UIO map index of the shared data buffers.
    pub buffer_map: usize,
    /// UIO map index of the control registers and command ring.
    pub control_map: usize,
    pub reset_gpio: u32,
    /// Reset is asserted by driving the line low.
    pub reset_active_low: bool,
    pub bench: BenchConfig,
    pub backend: BackendConfig,
    pub device: DeviceConfig,
}

impl Config {
    /// Default settings for the given card image.
    pub fn new(backing_file: impl Into<PathBuf>) -> Self {
        Config {
            backing_file: backing_file.into(),
            uio_device: PathBuf::from(DEFAULT_UIO_DEVICE),
            buffer_map: DEFAULT_BUFFER_MAP,
            control_map: DEFAULT_CONTROL_MAP,
            reset_gpio: DEFAULT_RESET_GPIO,
            reset_active_low: true,
            bench: BenchConfig::default(),
            backend: BackendConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}
