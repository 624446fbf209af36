//! Flat-RAM bus implementations that record every access, so tests can
//! assert on bus traffic order as well as end state.

use crate::bus::BusInterface;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAccess {
    Read(u16),
    Write(u16, u8),
}

pub struct RecordingBus {
    pub ram: Vec<u8>,
    pub accesses: Vec<BusAccess>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self { ram: vec![0; 0x10000], accesses: Vec::new() }
    }

    /// RAM with a program at `origin` and the reset vector pointing to it.
    pub fn with_program(origin: u16, program: &[u8]) -> Self {
        let mut bus = Self::new();
        for (i, &byte) in program.iter().enumerate() {
            bus.ram[usize::from(origin) + i] = byte;
        }
        bus.ram[0xFFFC] = origin as u8;
        bus.ram[0xFFFD] = (origin >> 8) as u8;
        bus
    }

    pub fn clear_log(&mut self) {
        self.accesses.clear();
    }

    pub fn writes(&self) -> Vec<(u16, u8)> {
        self.accesses
            .iter()
            .filter_map(|&access| match access {
                BusAccess::Write(address, value) => Some((address, value)),
                BusAccess::Read(_) => None,
            })
            .collect()
    }
}

impl BusInterface for RecordingBus {
    fn read(&mut self, address: u16) -> u8 {
        self.accesses.push(BusAccess::Read(address));
        self.ram[usize::from(address)]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.accesses.push(BusAccess::Write(address, value));
        self.ram[usize::from(address)] = value;
    }
}

/// Multi-bank RAM for 6509 tests. Plain reads and writes go to bank 0;
/// bank-qualified reads select a bank explicitly.
pub struct BankedBus {
    pub banks: Vec<Vec<u8>>,
}

impl BankedBus {
    pub fn new(bank_count: usize) -> Self {
        Self { banks: vec![vec![0; 0x10000]; bank_count] }
    }
}

impl BusInterface for BankedBus {
    fn read(&mut self, address: u16) -> u8 {
        self.banks[0][usize::from(address)]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.banks[0][usize::from(address)] = value;
    }

    fn read_banked(&mut self, bank: u8, address: u16) -> u8 {
        self.banks[usize::from(bank) % self.banks.len()][usize::from(address)]
    }
}
