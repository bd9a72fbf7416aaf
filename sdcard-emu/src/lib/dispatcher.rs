//! The serving loop: take commands off the transport, carry them out against
//! the block backend, and hand each one back.

use log::{debug, error, info, warn};
use std::fs::File;
use std::thread;
use std::time::Duration;

use crate::backend::{BackingStore, BlockBackend};
use crate::error::{EmuError, EmuResult};
use crate::mmio::RegisterWindow;
use crate::transport::{Command, Opcode, Status, Transport};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Longest debug string we will pull out of the buffer window.
pub const MAX_DEBUG_LEN: usize = 4096;

/// Dispatcher tunables.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// How long to sleep when the queue is empty.
    pub poll_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// What became of a dequeued command.
#[derive(Debug)]
pub enum Outcome {
    Handled,
    Failed(EmuError),
    Unknown(u32),
}

impl Outcome {
    /// The completion status reported to the hardware.
    pub fn status(&self) -> Status {
        match self {
            Outcome::Handled => Status::Ok,
            Outcome::Failed(EmuError::BadPayload { .. }) => Status::BadPayload,
            Outcome::Failed(_) => Status::IoError,
            Outcome::Unknown(_) => Status::UnknownCommand,
        }
    }
}

impl From<EmuResult<()>> for Outcome {
    fn from(result: EmuResult<()>) -> Self {
        match result {
            Ok(()) => Outcome::Handled,
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// The emulated card: everything the serving loop needs, owned in one place.
pub struct Device<T, S = File> {
    backend: BlockBackend<S>,
    buffer: RegisterWindow,
    transport: T,
    config: DeviceConfig,
}

impl<T: Transport, S: BackingStore> Device<T, S> {
    pub fn new(backend: BlockBackend<S>, buffer: RegisterWindow,
               transport: T, config: DeviceConfig) -> Self {
        Device {
            backend,
            buffer,
            transport,
            config,
        }
    }

    pub fn buffer(&self) -> &RegisterWindow {
        &self.buffer
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The next pending command, if any.
    pub fn poll(&mut self) -> Option<Command> {
        self.transport.next_command()
    }

    /// Carry out a single command.
    pub fn dispatch(&mut self, cmd: &Command) -> Outcome {
        let outcome: Outcome = match cmd.opcode() {
            Opcode::Debug => self.read_string(cmd.payload()).map(|text| {
                info!("[dbg] {}", text.strip_suffix('\n').unwrap_or(&text));
            }).into(),
            Opcode::DebugInt => self.read_string(cmd.payload()).map(|text| {
                info!("[dbg] {}{}", text, alt_hex(cmd.extra()));
            }).into(),
            Opcode::GetSize => self.backend
                .size(&self.buffer, cmd.payload())
                .map(|_| ())
                .into(),
            Opcode::ReadSector => self.backend
                .read_sector(cmd.extra(), &self.buffer, cmd.payload())
                .into(),
            Opcode::WriteSector => self.backend
                .write_sector(cmd.extra(), &self.buffer, cmd.payload())
                .into(),
            Opcode::Unknown(raw) => {
                warn!("Unknown command {:#x} ({:?}) in slot {}.",
                      raw, printable(raw), cmd.slot());
                Outcome::Unknown(raw)
            }
        };
        if let Outcome::Failed(e) = &outcome {
            error!("{:?} command in slot {} failed: {}", cmd.opcode(), cmd.slot(), e);
        }
        outcome
    }

    /// Poll once; if there was a command, dispatch and acknowledge it.
    pub fn serve_one(&mut self) -> Option<Outcome> {
        let cmd = self.poll()?;
        debug!("Command {:?} slot={} extra={:#x} payload={:#x}.",
               cmd.opcode(), cmd.slot(), cmd.extra(), cmd.payload());
        let outcome = self.dispatch(&cmd);
        self.transport.acknowledge(cmd, outcome.status());
        Some(outcome)
    }

    /// Serve commands until the queue is empty, returning how many were
    /// served.
    pub fn serve_pending(&mut self) -> usize {
        let mut served = 0;
        while self.serve_one().is_some() {
            served += 1;
        }
        served
    }

    /// Serve forever, sleeping for the poll interval whenever the queue runs
    /// dry.
    pub fn run(&mut self) -> ! {
        info!("Starting SD card emulation ...");
        loop {
            if self.serve_one().is_none() {
                thread::sleep(self.config.poll_interval);
            }
        }
    }

    /// Pull a NUL-terminated string out of the buffer window. Stops at the
    /// window end or after `MAX_DEBUG_LEN` bytes if no terminator turns up.
    fn read_string(&self, payload: usize) -> EmuResult<String> {
        self.buffer.check(payload, 1, 1)?;
        let end = self.buffer.len().min(payload.saturating_add(MAX_DEBUG_LEN));
        let bytes: Vec<u8> = (payload..end)
            .map(|offset| self.buffer.load::<u8>(offset))
            .take_while(|&b| b != 0)
            .collect();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Hex with a `0x` prefix, except that zero is a bare `0`.
fn alt_hex(value: u64) -> String {
    if value == 0 {
        "0".to_string()
    } else {
        format!("{:#x}", value)
    }
}

/// Opcodes are often ASCII letters; show the character when there is one.
fn printable(raw: u32) -> char {
    match char::from_u32(raw) {
        Some(c) if c.is_ascii_graphic() => c,
        _ => '.',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ntest::timeout;
    use std::io;
    use tempfile;

    use crate::backend::{BackendConfig, SECTOR_SIZE};
    use crate::test_logging::take_logged;
    use crate::init_test_logging;
    use crate::transport::*;
    use log::Level;

    const BUFFER_SIZE: usize = 0x1000;

    /// A device on a zero-filled backing file, fed by a mock transport.
    struct DeviceFixture {
        device: Device<MockTransport>,
        _temp_dir: tempfile::TempDir,
    }

    impl DeviceFixture {
        fn new(size: u64) -> io::Result<Self> {
            init_test_logging();

            let temp_dir = tempfile::tempdir()?;
            let path = temp_dir.path().join("card.img");
            File::create(&path)?.set_len(size)?;
            let backend = BlockBackend::open(&path, BackendConfig::default()).unwrap();
            let device = Device::new(backend,
                                     RegisterWindow::anonymous(BUFFER_SIZE),
                                     MockTransport::new(),
                                     DeviceConfig::default());
            Ok(DeviceFixture {
                device,
                _temp_dir: temp_dir,
            })
        }

        fn push(&mut self, opcode: u32, extra: u64, payload: usize) -> u32 {
            self.device.transport_mut().push(opcode, extra, payload)
        }

        fn write_bytes(&self, payload: usize, data: &[u8]) {
            for (i, b) in data.iter().enumerate() {
                self.device.buffer().store::<u8>(payload + i, *b);
            }
        }

        fn read_bytes(&self, payload: usize, len: usize) -> Vec<u8> {
            (0..len).map(|i| self.device.buffer().load::<u8>(payload + i)).collect()
        }
    }

    #[test]
    fn test_empty_queue() {
        let mut fixture = DeviceFixture::new(SECTOR_SIZE as u64).unwrap();
        assert!(fixture.device.poll().is_none());
        assert!(fixture.device.serve_one().is_none());
        assert_eq!(fixture.device.serve_pending(), 0);
        assert!(fixture.device.transport().acknowledged.is_empty());
    }

    #[test]
    #[timeout(5000)]
    fn test_write_then_read_back() {
        let mut fixture = DeviceFixture::new(10 * SECTOR_SIZE as u64).unwrap();
        fixture.write_bytes(0, &[0xFF; SECTOR_SIZE]);
        fixture.push(OPCODE_WRITE_SECTOR, 3, 0);
        fixture.push(OPCODE_READ_SECTOR, 3, SECTOR_SIZE);
        fixture.push(OPCODE_READ_SECTOR, 4, 2 * SECTOR_SIZE);

        assert_eq!(fixture.device.serve_pending(), 3);
        assert_eq!(fixture.read_bytes(SECTOR_SIZE, SECTOR_SIZE), vec![0xFF; SECTOR_SIZE]);
        assert_eq!(fixture.read_bytes(2 * SECTOR_SIZE, SECTOR_SIZE), vec![0; SECTOR_SIZE]);
        assert_eq!(fixture.device.transport().acknowledged,
                   vec![(0, Status::Ok), (1, Status::Ok), (2, Status::Ok)]);
    }

    #[test]
    fn test_get_size() {
        let mut fixture = DeviceFixture::new(5120).unwrap();
        fixture.push(OPCODE_GET_SIZE, 0, 0x800);
        assert!(matches!(fixture.device.serve_one(), Some(Outcome::Handled)));
        assert_eq!(fixture.device.buffer().load::<u64>(0x800), 5120);
        assert_eq!(fixture.device.transport().acknowledged, vec![(0, Status::Ok)]);
    }

    #[test]
    fn test_unknown_opcode_is_acknowledged() {
        let mut fixture = DeviceFixture::new(SECTOR_SIZE as u64).unwrap();
        fixture.push(0x7F, 0, 0);
        fixture.push(OPCODE_GET_SIZE, 0, 0);

        take_logged();

        assert!(matches!(fixture.device.serve_one(), Some(Outcome::Unknown(0x7F))));
        let warnings: Vec<String> = take_logged().into_iter()
            .filter(|(level, _)| *level == Level::Warn)
            .map(|(_, msg)| msg)
            .collect();
        assert_eq!(warnings, vec!["Unknown command 0x7f ('.') in slot 0."]);

        assert!(matches!(fixture.device.serve_one(), Some(Outcome::Handled)));
        assert_eq!(fixture.device.transport().acknowledged,
                   vec![(0, Status::UnknownCommand), (1, Status::Ok)]);
    }

    #[test]
    fn test_debug_messages() {
        let mut fixture = DeviceFixture::new(SECTOR_SIZE as u64).unwrap();
        fixture.write_bytes(0x100, b"card init\n\0");
        fixture.write_bytes(0x200, b"cmd arg = \0");
        fixture.push(OPCODE_DEBUG, 0, 0x100);
        fixture.push(OPCODE_DEBUG_INT, 0x1234, 0x200);
        fixture.push(OPCODE_DEBUG_INT, 0, 0x200);
        take_logged();

        assert_eq!(fixture.device.serve_pending(), 3);
        let messages: Vec<String> = take_logged().into_iter()
            .filter(|(level, _)| *level == Level::Info)
            .map(|(_, msg)| msg)
            .collect();
        assert_eq!(messages, vec![
            "[dbg] card init",
            "[dbg] cmd arg = 0x1234",
            "[dbg] cmd arg = 0",
        ]);
        assert_eq!(fixture.device.transport().acknowledged,
                   vec![(0, Status::Ok), (1, Status::Ok), (2, Status::Ok)]);
    }

    #[test]
    fn test_get_size_word_aligned_slot() {
        let mut fixture = DeviceFixture::new(5120).unwrap();
        fixture.push(OPCODE_GET_SIZE, 0, 0x44);
        assert!(matches!(fixture.device.serve_one(), Some(Outcome::Handled)));
        assert_eq!(fixture.device.buffer().load::<u32>(0x44), 5120);
        assert_eq!(fixture.device.buffer().load::<u32>(0x48), 0);
        assert_eq!(fixture.device.transport().acknowledged, vec![(0, Status::Ok)]);
    }

    #[test]
    fn test_read_string() {
        let fixture = DeviceFixture::new(SECTOR_SIZE as u64).unwrap();
        fixture.write_bytes(0x10, b"hello\0world");
        assert_eq!(fixture.device.read_string(0x10).unwrap(), "hello");
        assert_eq!(fixture.device.read_string(0x16).unwrap(), "world");

        // Unterminated at the end of the window.
        fixture.write_bytes(BUFFER_SIZE - 3, b"abc");
        assert_eq!(fixture.device.read_string(BUFFER_SIZE - 3).unwrap(), "abc");
        assert!(fixture.device.read_string(BUFFER_SIZE).is_err());
    }

    #[test]
    fn test_read_string_is_bounded() {
        init_test_logging();
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("card.img");
        File::create(&path).unwrap();
        let device = Device::new(BlockBackend::open(&path, BackendConfig::default()).unwrap(),
                                 RegisterWindow::anonymous(2 * MAX_DEBUG_LEN),
                                 MockTransport::new(),
                                 DeviceConfig::default());
        for i in 0..2 * MAX_DEBUG_LEN {
            device.buffer().store::<u8>(i, b'x');
        }
        assert_eq!(device.read_string(0).unwrap().len(), MAX_DEBUG_LEN);
    }

    #[test]
    fn test_every_command_acknowledged_once_in_order() {
        let mut fixture = DeviceFixture::new(4 * SECTOR_SIZE as u64).unwrap();
        fixture.write_bytes(0xF00, b"x\0");
        let slots = vec![
            fixture.push(OPCODE_READ_SECTOR, 1, 0),              // fine
            fixture.push(OPCODE_READ_SECTOR, 9, 0),              // past the end
            fixture.push(OPCODE_WRITE_SECTOR, 0, BUFFER_SIZE),   // payload outside window
            fixture.push(0x00, 0, 0),                            // unknown
            fixture.push(OPCODE_GET_SIZE, 0, 3),                 // misaligned
            fixture.push(OPCODE_DEBUG, 0, 0xF00),                // fine
            fixture.push(OPCODE_WRITE_SECTOR, 2, SECTOR_SIZE),   // fine
        ];

        assert_eq!(fixture.device.serve_pending(), slots.len());
        assert_eq!(fixture.device.transport().pending(), 0);
        let acked = &fixture.device.transport().acknowledged;
        assert_eq!(acked.iter().map(|(slot, _)| *slot).collect::<Vec<_>>(), slots);
        assert_eq!(acked.iter().map(|(_, status)| *status).collect::<Vec<_>>(), vec![
            Status::Ok,
            Status::IoError,
            Status::BadPayload,
            Status::UnknownCommand,
            Status::BadPayload,
            Status::Ok,
            Status::Ok,
        ]);
    }

    #[test]
    fn test_outcome_status() {
        assert_eq!(Outcome::Handled.status(), Status::Ok);
        assert_eq!(Outcome::Unknown(1).status(), Status::UnknownCommand);
        assert_eq!(Outcome::Failed(EmuError::SectorOutOfRange(1)).status(), Status::IoError);
        assert_eq!(Outcome::Failed(EmuError::BadPayload { offset: 0, len: 1, window: 0 })
                       .status(), Status::BadPayload);
    }

    #[test]
    fn test_alt_hex() {
        assert_eq!(alt_hex(0), "0");
        assert_eq!(alt_hex(0x1234), "0x1234");
        assert_eq!(alt_hex(u64::MAX), "0xffffffffffffffff");
    }

    #[test]
    fn test_printable() {
        assert_eq!(printable(0x52), 'R');
        assert_eq!(printable(0x7F), '.');
        assert_eq!(printable(0x110000), '.');
    }
}
