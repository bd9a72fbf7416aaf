use log::info;

use crate::error::EmuResult;
use crate::gpio::ResetLine;
use crate::mmio::RegisterWindow;
use crate::uio::RegisterMapper;

/// The two register banks of the SD controller.
pub struct Windows {
    /// Data buffers shared with the hardware; command payloads point here.
    pub buffer: RegisterWindow,
    /// Control registers and the command ring.
    pub control: RegisterWindow,
}

/// Put the controller into reset, then map its register banks. Nothing read
/// from the windows is meaningful until this has happened.
pub fn bring_up<R, M>(reset: &mut R, mapper: &M,
                      buffer_map: usize, control_map: usize) -> EmuResult<Windows>
    where R: ResetLine,
          M: RegisterMapper
{
    reset.assert_reset()?;
    info!("Controller held in reset.");
    let buffer = mapper.map(buffer_map)?;
    let control = mapper.map(control_map)?;
    Ok(Windows { buffer, control })
}

/// Let the controller run once the software side is ready for commands.
pub fn release<R: ResetLine>(reset: &mut R) -> EmuResult<()> {
    reset.deassert_reset()?;
    info!("Controller released from reset.");
    Ok(())
}
