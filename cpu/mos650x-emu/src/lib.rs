//! Instruction-set interpreter for the MOS 6502 family, including the 6509
//! variant used by Commodore's CBM-II line.
//!
//! The core executes whole instructions against a caller-supplied cycle
//! budget and performs every bus access the silicon would, in silicon order,
//! so that memory-mapped I/O observes dummy reads and read-modify-write
//! write-backs exactly as on hardware.

pub mod bus;

mod addressing;
mod dispatch;

#[cfg(test)]
mod testsupport;

use crate::bus::BusInterface;
use bincode::{Decode, Encode};
use m65_common::num::{GetBit, U16Ext};

pub use addressing::{BankedVectorFetch, DirectVectorFetch, IndirectVectorFetch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum StatusReadContext {
    HardwareInterruptHandler,
    Brk,
    PushStack,
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct StatusFlags {
    negative: bool,
    overflow: bool,
    decimal: bool,
    interrupt_disable: bool,
    zero: bool,
    carry: bool,
}

impl StatusFlags {
    #[must_use]
    pub fn new() -> Self {
        // I flag defaults to 1, others default to 0
        Self {
            negative: false,
            overflow: false,
            decimal: false,
            interrupt_disable: true,
            zero: false,
            carry: false,
        }
    }

    pub fn set_negative(&mut self, negative: bool) -> &mut Self {
        self.negative = negative;
        self
    }

    pub fn set_overflow(&mut self, overflow: bool) -> &mut Self {
        self.overflow = overflow;
        self
    }

    pub fn set_zero(&mut self, zero: bool) -> &mut Self {
        self.zero = zero;
        self
    }

    pub fn set_carry(&mut self, carry: bool) -> &mut Self {
        self.carry = carry;
        self
    }

    #[must_use]
    pub fn to_byte(self, read_ctx: StatusReadContext) -> u8 {
        // The B bit is not a latch; it only exists in pushed snapshots. It
        // reads 1 for BRK and PHP pushes, 0 for hardware interrupt pushes.
        let b_flag = match read_ctx {
            StatusReadContext::Brk | StatusReadContext::PushStack => 0x10,
            StatusReadContext::HardwareInterruptHandler => 0x00,
        };

        // Bit 5 is unused, always reads as 1
        (u8::from(self.negative) << 7)
            | (u8::from(self.overflow) << 6)
            | 0x20
            | b_flag
            | (u8::from(self.decimal) << 3)
            | (u8::from(self.interrupt_disable) << 2)
            | (u8::from(self.zero) << 1)
            | u8::from(self.carry)
    }

    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        Self {
            negative: byte.bit(7),
            overflow: byte.bit(6),
            decimal: byte.bit(3),
            interrupt_disable: byte.bit(2),
            zero: byte.bit(1),
            carry: byte.bit(0),
        }
    }
}

impl Default for StatusFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct CpuRegisters {
    pub accumulator: u8,
    pub x: u8,
    pub y: u8,
    pub status: StatusFlags,
    pub pc: u16,
    pub sp: u8,
    /// 6509 indirect bank register; unused on the plain 6502 but kept in the
    /// register file so debug/save state round-trips the whole CPU.
    pub indirect_bank: u8,
}

impl CpuRegisters {
    fn new(reset_vector: u16) -> Self {
        Self {
            accumulator: 0,
            x: 0,
            y: 0,
            status: StatusFlags::new(),
            pc: reset_vector,
            sp: 0xFD,
            indirect_bank: 0,
        }
    }
}

const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

const INTERRUPT_SERVICE_CYCLES: u32 = 7;

/// The CPU core, generic over the indirect-pointer fetch policy that
/// distinguishes the 6509 from the plain 6502. Use the [`Mos6502`] and
/// [`Mos6509`] aliases.
///
/// Each instance is fully self-contained; multi-processor boards simply
/// create one instance per CPU.
#[derive(Debug, Clone, Encode, Decode)]
pub struct Mos650x<F: IndirectVectorFetch> {
    registers: CpuRegisters,
    vector_fetch: F,
    halted: bool,
    irq_line: bool,
    nmi_pending: bool,
}

pub type Mos6502 = Mos650x<DirectVectorFetch>;
pub type Mos6509 = Mos650x<BankedVectorFetch>;

impl<F: IndirectVectorFetch> Mos650x<F> {
    /// Create a new CPU with the PC pointing to the RESET vector, read from $FFFC.
    pub fn new<B: BusInterface>(bus: &mut B) -> Self {
        let reset_vector_lsb = bus.read(RESET_VECTOR);
        let reset_vector_msb = bus.read(RESET_VECTOR + 1);
        let reset_vector = u16::from_le_bytes([reset_vector_lsb, reset_vector_msb]);

        Self {
            registers: CpuRegisters::new(reset_vector),
            vector_fetch: F::default(),
            halted: false,
            irq_line: false,
            nmi_pending: false,
        }
    }

    /// Reset the CPU, which does the following:
    /// * Update PC to point to the RESET vector
    /// * Subtract 3 from the stack pointer without touching memory
    /// * Disable IRQs and clear decimal mode
    /// * Drop any latched NMI and un-jam a CPU halted by a KIL opcode
    pub fn reset<B: BusInterface>(&mut self, bus: &mut B) {
        let reset_vector_lsb = bus.read(RESET_VECTOR);
        let reset_vector_msb = bus.read(RESET_VECTOR + 1);
        self.registers.pc = u16::from_le_bytes([reset_vector_lsb, reset_vector_msb]);

        self.registers.sp = self.registers.sp.wrapping_sub(3);

        self.registers.status.interrupt_disable = true;
        self.registers.status.decimal = false;

        self.nmi_pending = false;
        self.halted = false;
    }

    /// Run whole instructions until at least `cycle_budget` cycles have been
    /// consumed or the CPU jams, and return the cycles actually consumed.
    ///
    /// Instructions are never split, so the return value can overshoot the
    /// budget by at most one instruction's cost (or one 7-cycle interrupt
    /// sequence). A jammed CPU consumes nothing.
    ///
    /// Interrupt lines are sampled once per instruction boundary, never
    /// mid-instruction.
    pub fn execute<B: BusInterface>(&mut self, bus: &mut B, cycle_budget: u32) -> u32 {
        let mut remaining = i64::from(cycle_budget);
        let mut consumed = 0;

        while remaining > 0 && !self.halted {
            let cycles = self.step(bus);
            remaining -= i64::from(cycles);
            consumed += cycles;
        }

        consumed
    }

    fn step<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        if self.nmi_pending || (self.irq_line && !self.registers.status.interrupt_disable) {
            return self.service_interrupt(bus);
        }

        let opcode = bus.read(self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);

        dispatch::execute_instruction(self, bus, opcode)
    }

    // 7-cycle hardware interrupt sequence. NMI wins over IRQ, and the vector
    // is chosen when P is pushed, so an NMI raised by one of the earlier
    // stack writes can still hijack the sequence.
    fn service_interrupt<B: BusInterface>(&mut self, bus: &mut B) -> u32 {
        // The squashed opcode fetch plus a spurious operand read
        bus.read(self.registers.pc);
        bus.read(self.registers.pc);

        dispatch::push_stack(self, bus, self.registers.pc.msb());
        dispatch::push_stack(self, bus, self.registers.pc.lsb());

        let status = self.registers.status.to_byte(StatusReadContext::HardwareInterruptHandler);
        dispatch::push_stack(self, bus, status);

        let vector = self.take_interrupt_vector();
        self.registers.pc = bus.read(vector).into();
        self.registers.status.interrupt_disable = true;
        let pc_msb = bus.read(vector + 1);
        self.registers.pc.set_msb(pc_msb);

        INTERRUPT_SERVICE_CYCLES
    }

    fn take_interrupt_vector(&mut self) -> u16 {
        if self.nmi_pending {
            self.nmi_pending = false;
            NMI_VECTOR
        } else {
            IRQ_VECTOR
        }
    }

    /// Assert the level-triggered IRQ line. The line stays asserted until
    /// [`Self::clear_irq`]; it is sampled at instruction boundaries and
    /// ignored while the I flag is set.
    pub fn assert_irq(&mut self) {
        self.irq_line = true;
    }

    pub fn clear_irq(&mut self) {
        self.irq_line = false;
    }

    /// Pulse the edge-triggered NMI line. The pulse is latched until the CPU
    /// services it at the next instruction boundary, regardless of the I flag.
    pub fn pulse_nmi(&mut self) {
        self.nmi_pending = true;
    }

    #[inline]
    #[must_use]
    pub fn pc(&self) -> u16 {
        self.registers.pc
    }

    #[must_use]
    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    pub fn set_registers(&mut self, registers: CpuRegisters) {
        self.registers = registers;
    }

    #[must_use]
    pub fn indirect_bank(&self) -> u8 {
        self.registers.indirect_bank
    }

    pub fn set_indirect_bank(&mut self, bank: u8) {
        self.registers.indirect_bank = bank;
    }

    /// Return whether the CPU has jammed on a KIL instruction. A jammed CPU
    /// executes nothing further until [`Self::reset`].
    #[inline]
    #[must_use]
    pub fn halted(&self) -> bool {
        self.halted
    }
}
