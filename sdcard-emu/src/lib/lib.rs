pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod gpio;
pub mod mmio;
pub mod reset;
pub mod transport;
pub mod uio;

use crate::backend::BlockBackend;
use crate::gpio::{ResetLine, SysfsGpio};
use crate::transport::{MmioQueue, Transport};
use crate::uio::{RegisterMapper, Uio};

pub use crate::config::Config;
pub use crate::dispatcher::Device;
pub use crate::error::{EmuError, EmuResult};

/// Bring the emulator up on real hardware: UIO device, sysfs reset line and
/// the backing file named in `config`.
pub fn start(config: &Config) -> EmuResult<Device<MmioQueue>> {
    let uio = Uio::open(&config.uio_device)?;
    let mut reset_line = SysfsGpio::open(config.reset_gpio, config.reset_active_low)?;
    start_with(config, &uio, &mut reset_line)
}

/// The bring-up sequence, over any mapper and reset line. The controller is
/// held in reset until every fallible step has succeeded.
pub fn start_with<M, R>(config: &Config, mapper: &M, reset_line: &mut R)
                        -> EmuResult<Device<MmioQueue>>
    where M: RegisterMapper,
          R: ResetLine
{
    let windows = reset::bring_up(reset_line, mapper, config.buffer_map, config.control_map)?;
    diagnostics::run(&windows.buffer, &windows.control, &config.bench);

    let mut transport = MmioQueue::new(windows.control);
    transport.init()?;

    let backend = BlockBackend::open(&config.backing_file, config.backend)?;
    reset::release(reset_line)?;

    Ok(Device::new(backend, windows.buffer, transport, config.device))
}


#[cfg(test)]
use test_logging::init_test_logging;
