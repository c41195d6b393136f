//! In-memory transport for exercising register maps without hardware.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::{RegisterKind, Transport, TransportError, WriteTarget};

#[derive(Debug, Default)]
struct MockState {
    registers: HashMap<(RegisterKind, u16), u16>,
    failures: VecDeque<TransportError>,
    reads: Vec<(RegisterKind, u16, u16)>,
    writes: Vec<(WriteTarget, u16, u16)>,
    /// Words returned by the next read before the failure is reported.
    garbage: Option<Vec<u16>>,
}

/// Scripted transport. Clones share state so a test can keep a handle after
/// moving the transport into a client.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Rc<RefCell<MockState>>,
    buffer: Vec<u16>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store consecutive words starting at `start`.
    pub fn set_registers(&self, kind: RegisterKind, start: u16, values: &[u16]) {
        let mut state = self.state.borrow_mut();
        for (index, value) in values.iter().enumerate() {
            state
                .registers
                .insert((kind, start.wrapping_add(index as u16)), *value);
        }
    }

    pub fn register(&self, kind: RegisterKind, address: u16) -> Option<u16> {
        self.state.borrow().registers.get(&(kind, address)).copied()
    }

    /// Fail the next transaction (read or write) with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.state.borrow_mut().failures.push_back(error);
    }

    /// Leave `words` in the response buffer when the next scripted failure fires.
    pub fn leave_garbage(&self, words: Vec<u16>) {
        self.state.borrow_mut().garbage = Some(words);
    }

    pub fn reads(&self) -> Vec<(RegisterKind, u16, u16)> {
        self.state.borrow().reads.clone()
    }

    pub fn writes(&self) -> Vec<(WriteTarget, u16, u16)> {
        self.state.borrow().writes.clone()
    }
}

impl Transport for MockTransport {
    fn read(&mut self, kind: RegisterKind, start: u16, count: u16) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        state.reads.push((kind, start, count));
        if let Some(error) = state.failures.pop_front() {
            if let Some(words) = state.garbage.take() {
                self.buffer = words;
            }
            return Err(error);
        }

        let mut values = Vec::with_capacity(usize::from(count));
        for offset in 0..count {
            let address = start.wrapping_add(offset);
            match state.registers.get(&(kind, address)) {
                Some(value) => values.push(*value),
                None => return Err(TransportError::IllegalDataAddress),
            }
        }
        self.buffer = values;
        Ok(())
    }

    fn response_buffer(&self) -> &[u16] {
        &self.buffer
    }

    fn clear_response_buffer(&mut self) {
        self.buffer.clear();
    }

    fn write(&mut self, target: WriteTarget, address: u16, value: u16) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        state.writes.push((target, address, value));
        let kind = match target {
            WriteTarget::Register => RegisterKind::Holding,
            WriteTarget::Coil => RegisterKind::Coils,
        };
        state.registers.insert((kind, address), value);
        Ok(())
    }
}
