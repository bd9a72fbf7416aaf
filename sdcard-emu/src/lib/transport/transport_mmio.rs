use log::{debug, info};
use std::sync::atomic::{fence, Ordering};

use crate::error::{EmuError, EmuResult};
use crate::mmio::RegisterWindow;

use super::transport_interface::*;

// Control register offsets.
pub const REG_PRODUCER: usize = 0x00;   // Slots filled by hardware (free-running).
pub const REG_CONSUMER: usize = 0x04;   // Slots acknowledged by software (free-running).
pub const REG_SLOT_COUNT: usize = 0x08; // Ring size, published by hardware.

// Slot ring.
pub const SLOTS_BASE: usize = 0x40;
pub const SLOT_STRIDE: usize = 0x20;

// Field offsets within a slot.
pub const SLOT_OPCODE: usize = 0x00;    // u32
pub const SLOT_PAYLOAD: usize = 0x04;   // u32, offset into the buffer window
pub const SLOT_EXTRA: usize = 0x08;     // u64
pub const SLOT_STATUS: usize = 0x10;    // u32, written by software

/// A command ring living in the mapped control window.
///
/// Hardware fills the slot at `PRODUCER % slots` and then bumps `PRODUCER`;
/// software consumes from its own cursor and publishes it through
/// `CONSUMER` as each command is acknowledged.
pub struct MmioQueue {
    window: RegisterWindow,
    slots: u32,
    consumer: u32,
}

impl MmioQueue {
    /// Wrap the control window. The queue is unusable until `init`.
    pub fn new(window: RegisterWindow) -> Self {
        MmioQueue {
            window,
            slots: 0,
            consumer: 0,
        }
    }

    /// The underlying control window.
    pub fn window(&self) -> &RegisterWindow {
        &self.window
    }

    fn slot_offset(&self, index: u32) -> usize {
        SLOTS_BASE + (index % self.slots) as usize * SLOT_STRIDE
    }
}

impl Transport for MmioQueue {
    fn init(&mut self) -> EmuResult<()> {
        if self.window.len() < SLOTS_BASE {
            return Err(EmuError::BadQueue(format!(
                "control window is only {:#x} bytes", self.window.len())));
        }
        let slots = self.window.load::<u32>(REG_SLOT_COUNT);
        // The free-running counters only map onto slots consistently across
        // a 32-bit wrap if the ring size divides 2^32.
        if !slots.is_power_of_two() {
            return Err(EmuError::BadQueue(format!(
                "slot count {} is not a power of two", slots)));
        }
        let ring_end = (slots as usize).checked_mul(SLOT_STRIDE)
            .and_then(|ring| ring.checked_add(SLOTS_BASE));
        if ring_end.map_or(true, |end| end > self.window.len()) {
            return Err(EmuError::BadQueue(format!(
                "{} slots do not fit in a {:#x} byte window", slots, self.window.len())));
        }
        self.slots = slots;

        // Anything queued before we came up is stale.
        self.consumer = self.window.load::<u32>(REG_PRODUCER);
        self.window.store::<u32>(REG_CONSUMER, self.consumer);
        info!("Command queue ready: {} slots, starting at {}.", slots, self.consumer);
        Ok(())
    }

    fn next_command(&mut self) -> Option<Command> {
        if self.slots == 0 {
            return None;
        }
        let producer = self.window.load::<u32>(REG_PRODUCER);
        if producer == self.consumer {
            return None;
        }
        // Slot contents must not be read before the producer count.
        fence(Ordering::Acquire);

        let base = self.slot_offset(self.consumer);
        let opcode = self.window.load::<u32>(base + SLOT_OPCODE);
        let payload = self.window.load::<u32>(base + SLOT_PAYLOAD) as usize;
        let extra = self.window.load::<u64>(base + SLOT_EXTRA);
        Some(Command::new(self.consumer, Opcode::from(opcode), extra, payload))
    }

    fn acknowledge(&mut self, cmd: Command, status: Status) {
        debug_assert_eq!(cmd.slot(), self.consumer, "acknowledged out of order");
        let base = self.slot_offset(cmd.slot());
        self.window.store::<u32>(base + SLOT_STATUS, status as u32);
        // Status and payload writes must land before the slot is released.
        fence(Ordering::Release);
        self.consumer = self.consumer.wrapping_add(1);
        self.window.store::<u32>(REG_CONSUMER, self.consumer);
        debug!("Acknowledged slot {} with {:?}.", cmd.slot(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::init_test_logging;

    const SLOTS: u32 = 4;
    const WINDOW_SIZE: usize = SLOTS_BASE + SLOTS as usize * SLOT_STRIDE;

    /// Play the hardware's part: fill the next slot and bump the producer.
    fn hw_push(window: &RegisterWindow, opcode: u32, payload: u32, extra: u64) {
        let producer = window.load::<u32>(REG_PRODUCER);
        let base = SLOTS_BASE + (producer % SLOTS) as usize * SLOT_STRIDE;
        window.store::<u32>(base + SLOT_OPCODE, opcode);
        window.store::<u32>(base + SLOT_PAYLOAD, payload);
        window.store::<u64>(base + SLOT_EXTRA, extra);
        window.store::<u32>(REG_PRODUCER, producer.wrapping_add(1));
    }

    fn ready_queue() -> MmioQueue {
        init_test_logging();
        let window = RegisterWindow::anonymous(WINDOW_SIZE);
        window.store::<u32>(REG_SLOT_COUNT, SLOTS);
        let mut queue = MmioQueue::new(window);
        queue.init().unwrap();
        queue
    }

    #[test]
    fn test_empty() {
        let mut queue = ready_queue();
        assert_eq!(queue.next_command(), None);
    }

    #[test]
    fn test_uninitialised_queue_is_empty() {
        init_test_logging();
        let window = RegisterWindow::anonymous(WINDOW_SIZE);
        window.store::<u32>(REG_PRODUCER, 3);
        let mut queue = MmioQueue::new(window);
        assert_eq!(queue.next_command(), None);
    }

    #[test]
    fn test_rejects_bad_layouts() {
        init_test_logging();
        let mut queue = MmioQueue::new(RegisterWindow::anonymous(WINDOW_SIZE));
        assert!(matches!(queue.init(), Err(EmuError::BadQueue(_))));

        let window = RegisterWindow::anonymous(WINDOW_SIZE);
        window.store::<u32>(REG_SLOT_COUNT, SLOTS * 2);
        let mut queue = MmioQueue::new(window);
        assert!(matches!(queue.init(), Err(EmuError::BadQueue(_))));

        let window = RegisterWindow::anonymous(WINDOW_SIZE);
        window.store::<u32>(REG_SLOT_COUNT, 3);
        let mut queue = MmioQueue::new(window);
        assert!(matches!(queue.init(), Err(EmuError::BadQueue(_))));

        let mut queue = MmioQueue::new(RegisterWindow::anonymous(8));
        assert!(matches!(queue.init(), Err(EmuError::BadQueue(_))));
    }

    #[test]
    fn test_init_discards_stale_commands() {
        init_test_logging();
        let window = RegisterWindow::anonymous(WINDOW_SIZE);
        window.store::<u32>(REG_SLOT_COUNT, SLOTS);
        hw_push(&window, OPCODE_DEBUG, 0, 0);
        hw_push(&window, OPCODE_DEBUG, 0, 0);
        let mut queue = MmioQueue::new(window);
        queue.init().unwrap();
        assert_eq!(queue.window().load::<u32>(REG_CONSUMER), 2);
        assert_eq!(queue.next_command(), None);
    }

    #[test]
    fn test_dequeue_and_acknowledge() {
        let mut queue = ready_queue();
        hw_push(queue.window(), OPCODE_READ_SECTOR, 0x200, 7);

        let cmd = queue.next_command().unwrap();
        assert_eq!(cmd.opcode(), Opcode::ReadSector);
        assert_eq!(cmd.payload(), 0x200);
        assert_eq!(cmd.extra(), 7);
        assert_eq!(cmd.slot(), 0);
        // Not released until acknowledged.
        assert_eq!(queue.window().load::<u32>(REG_CONSUMER), 0);

        queue.acknowledge(cmd, Status::IoError);
        assert_eq!(queue.window().load::<u32>(REG_CONSUMER), 1);
        assert_eq!(queue.window().load::<u32>(SLOTS_BASE + SLOT_STATUS), Status::IoError as u32);
        assert_eq!(queue.next_command(), None);
    }

    #[test]
    fn test_fifo_with_wraparound() {
        let mut queue = ready_queue();
        for round in 0..3u64 {
            for i in 0..SLOTS as u64 {
                hw_push(queue.window(), OPCODE_WRITE_SECTOR, 0, round * 10 + i);
            }
            for i in 0..SLOTS as u64 {
                let cmd = queue.next_command().unwrap();
                assert_eq!(cmd.extra(), round * 10 + i);
                queue.acknowledge(cmd, Status::Ok);
            }
            assert_eq!(queue.next_command(), None);
        }
        assert_eq!(queue.window().load::<u32>(REG_CONSUMER), 3 * SLOTS);
    }

    #[test]
    fn test_counter_wraps() {
        init_test_logging();
        let window = RegisterWindow::anonymous(WINDOW_SIZE);
        window.store::<u32>(REG_SLOT_COUNT, SLOTS);
        window.store::<u32>(REG_PRODUCER, u32::MAX);
        let mut queue = MmioQueue::new(window);
        queue.init().unwrap();

        hw_push(queue.window(), OPCODE_GET_SIZE, 0, 0);
        let cmd = queue.next_command().unwrap();
        assert_eq!(cmd.slot(), u32::MAX);
        queue.acknowledge(cmd, Status::Ok);
        assert_eq!(queue.window().load::<u32>(REG_CONSUMER), 0);
        assert_eq!(queue.next_command(), None);
    }
}
