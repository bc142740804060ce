//! In-memory register bank used by the unit tests.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

use super::RegisterBus;
use crate::{
    error::BusError,
    registers::{Access, Register, DEVICE_ID},
};

#[derive(Debug)]
struct BoardState {
    registers: [u8; 256],
    writes: Vec<(u8, u8)>,
    reads: Vec<u8>,
    failing_reads: HashSet<u8>,
    failing_writes: HashSet<u8>,
    dropped: bool,
}

/// Register bank that behaves like the firmware: read-clear registers reset
/// when read, inputs idle high.
#[derive(Debug)]
pub(crate) struct SimulatedBoard {
    state: Arc<Mutex<BoardState>>,
}

/// Handle that keeps observing a board after it has been moved into a
/// transport.
#[derive(Debug, Clone)]
pub(crate) struct BoardProbe {
    state: Arc<Mutex<BoardState>>,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        let mut registers = [0u8; 256];
        registers[Register::DeviceId.addr() as usize] = DEVICE_ID;
        registers[Register::FirmwareMajor.addr() as usize] = 1;
        registers[Register::InputStatusLow.addr() as usize] = 0xFF;
        registers[Register::InputStatusHigh.addr() as usize] = 0x0F;

        Self {
            state: Arc::new(Mutex::new(BoardState {
                registers,
                writes: Vec::new(),
                reads: Vec::new(),
                failing_reads: HashSet::new(),
                failing_writes: HashSet::new(),
                dropped: false,
            })),
        }
    }

    pub fn with_register(self, register: Register, value: u8) -> Self {
        self.probe().set(register, value);
        self
    }

    pub fn failing_reads(self, register: Register) -> Self {
        self.probe().fail_reads(register);
        self
    }

    pub fn failing_writes(self, register: Register) -> Self {
        lock(&self.state).failing_writes.insert(register.addr());
        self
    }

    pub fn probe(&self) -> BoardProbe {
        BoardProbe {
            state: self.state.clone(),
        }
    }
}

impl RegisterBus for SimulatedBoard {
    fn read_byte(&mut self, register: u8) -> Result<u8, BusError> {
        let mut state = lock(&self.state);
        if state.failing_reads.contains(&register) {
            return Err(format!("simulated read failure at 0x{register:02X}").into());
        }

        state.reads.push(register);
        let value = state.registers[register as usize];
        if Register::from_addr(register).map(Register::access) == Some(Access::ReadClear) {
            state.registers[register as usize] = 0;
        }
        Ok(value)
    }

    fn write_byte(&mut self, register: u8, value: u8) -> Result<(), BusError> {
        let mut state = lock(&self.state);
        if state.failing_writes.contains(&register) {
            return Err(format!("simulated write failure at 0x{register:02X}").into());
        }

        state.writes.push((register, value));
        state.registers[register as usize] = value;
        Ok(())
    }
}

impl Drop for SimulatedBoard {
    fn drop(&mut self) {
        lock(&self.state).dropped = true;
    }
}

impl BoardProbe {
    pub fn register(&self, register: Register) -> u8 {
        lock(&self.state).registers[register.addr() as usize]
    }

    pub fn set(&self, register: Register, value: u8) {
        lock(&self.state).registers[register.addr() as usize] = value;
    }

    pub fn fail_reads(&self, register: Register) {
        lock(&self.state).failing_reads.insert(register.addr());
    }

    pub fn writes_to(&self, register: Register) -> Vec<u8> {
        lock(&self.state)
            .writes
            .iter()
            .filter(|(addr, _)| *addr == register.addr())
            .map(|(_, value)| *value)
            .collect()
    }

    pub fn read_count(&self, register: Register) -> usize {
        lock(&self.state)
            .reads
            .iter()
            .filter(|addr| **addr == register.addr())
            .count()
    }

    pub fn dropped(&self) -> bool {
        lock(&self.state).dropped
    }
}

fn lock(state: &Mutex<BoardState>) -> MutexGuard<'_, BoardState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
