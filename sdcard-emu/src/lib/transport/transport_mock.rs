use std::collections::VecDeque;

use crate::error::EmuResult;

use super::transport_interface::*;

/// An in-memory transport that records every acknowledgment, used when
/// testing the dispatcher.
#[derive(Default)]
pub struct MockTransport {
    pub initialised: bool,
    pending: VecDeque<Command>,
    next_slot: u32,
    /// `(slot, status)` for each acknowledgment, in order.
    pub acknowledged: Vec<(u32, Status)>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a command as the hardware would, returning its slot.
    pub fn push(&mut self, opcode: u32, extra: u64, payload: usize) -> u32 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.pending.push_back(Command::new(slot, Opcode::from(opcode), extra, payload));
        slot
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl Transport for MockTransport {
    fn init(&mut self) -> EmuResult<()> {
        self.initialised = true;
        Ok(())
    }

    fn next_command(&mut self) -> Option<Command> {
        self.pending.pop_front()
    }

    fn acknowledge(&mut self, cmd: Command, status: Status) {
        self.acknowledged.push((cmd.slot(), status));
    }
}
