use crate::error::EmuResult;

// Opcode wire values, as written by the hardware into a queue slot.
pub const OPCODE_DEBUG: u32 = b'D' as u32;
pub const OPCODE_DEBUG_INT: u32 = b'I' as u32;
pub const OPCODE_GET_SIZE: u32 = b'S' as u32;
pub const OPCODE_READ_SECTOR: u32 = b'R' as u32;
pub const OPCODE_WRITE_SECTOR: u32 = b'W' as u32;

/// A decoded command opcode.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum Opcode {
    /// Log the NUL-terminated string in the payload.
    Debug,
    /// Log the payload string followed by `extra` in hex.
    DebugInt,
    /// Store the backing store capacity in bytes into the payload.
    GetSize,
    /// Copy sector `extra` into the payload.
    ReadSector,
    /// Persist the payload as sector `extra`.
    WriteSector,
    /// Anything else; carries the raw value for logging.
    Unknown(u32),
}

impl From<u32> for Opcode {
    fn from(raw: u32) -> Self {
        match raw {
            OPCODE_DEBUG => Opcode::Debug,
            OPCODE_DEBUG_INT => Opcode::DebugInt,
            OPCODE_GET_SIZE => Opcode::GetSize,
            OPCODE_READ_SECTOR => Opcode::ReadSector,
            OPCODE_WRITE_SECTOR => Opcode::WriteSector,
            other => Opcode::Unknown(other),
        }
    }
}

impl Opcode {
    /// The wire value of this opcode.
    pub fn raw(self) -> u32 {
        match self {
            Opcode::Debug => OPCODE_DEBUG,
            Opcode::DebugInt => OPCODE_DEBUG_INT,
            Opcode::GetSize => OPCODE_GET_SIZE,
            Opcode::ReadSector => OPCODE_READ_SECTOR,
            Opcode::WriteSector => OPCODE_WRITE_SECTOR,
            Opcode::Unknown(raw) => raw,
        }
    }
}

/// Completion status reported back to the hardware with each acknowledgment.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    IoError = 1,
    UnknownCommand = 2,
    BadPayload = 3,
}

/// A command dequeued from the transport.
///
/// Not `Clone`: `Transport::acknowledge` consumes it, so each slot goes back
/// to the hardware exactly once.
#[derive(Debug, PartialEq, Eq)]
pub struct Command {
    slot: u32,
    opcode: Opcode,
    extra: u64,
    payload: usize,
}

impl Command {
    pub fn new(slot: u32, opcode: Opcode, extra: u64, payload: usize) -> Self {
        Command { slot, opcode, extra, payload }
    }

    /// The transport slot this command occupies.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Sector index for sector commands, the value to print for `DebugInt`.
    pub fn extra(&self) -> u64 {
        self.extra
    }

    /// Byte offset of the payload within the buffer window.
    pub fn payload(&self) -> usize {
        self.payload
    }
}

/// The queue that carries commands between hardware and software.
pub trait Transport {
    /// Prepare the queue for use. Called once before the first poll.
    fn init(&mut self) -> EmuResult<()>;

    /// Dequeue the oldest pending command, if any.
    fn next_command(&mut self) -> Option<Command>;

    /// Return a command's slot to the hardware along with its status.
    fn acknowledge(&mut self, cmd: Command, status: Status);
}
