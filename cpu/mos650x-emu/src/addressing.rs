//! Addressing-mode resolution.
//!
//! Every resolver performs the exact bus access sequence the silicon does
//! for that mode and access class, including the dummy read at the
//! un-carried address during indexed addressing and the dummy write-back
//! during read-modify-write instructions. On this CPU family every cycle is
//! a bus access, so these sequences are also the timing ground truth.

use crate::bus::BusInterface;
use crate::{CpuRegisters, Mos650x};
use bincode::{Decode, Encode};

/// Policy for fetching the two pointer bytes of `(zp,X)` and `(zp),Y`
/// addressing. This is the only point where the 6509 differs from the plain
/// 6502: its indirect bank register selects which bank the pointer is read
/// through. Injecting the difference here keeps the handlers variant-free.
pub trait IndirectVectorFetch: Copy + Default {
    fn read_vector_byte<B: BusInterface>(self, bus: &mut B, indirect_bank: u8, zp_addr: u8) -> u8;
}

/// Plain 6502: pointer bytes come straight from page 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct DirectVectorFetch;

impl IndirectVectorFetch for DirectVectorFetch {
    #[inline]
    fn read_vector_byte<B: BusInterface>(self, bus: &mut B, _indirect_bank: u8, zp_addr: u8) -> u8 {
        bus.read(zp_addr.into())
    }
}

/// 6509: pointer bytes come from page 0 of the bank selected by the
/// indirect bank register. Direct zero-page and absolute addressing are
/// unaffected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct BankedVectorFetch;

impl IndirectVectorFetch for BankedVectorFetch {
    #[inline]
    fn read_vector_byte<B: BusInterface>(self, bus: &mut B, indirect_bank: u8, zp_addr: u8) -> u8 {
        bus.read_banked(indirect_bank, zp_addr.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    // JMP only
    Indirect,
    // (zp,X)
    IndexedIndirect,
    // (zp),Y
    IndirectIndexed,
    Relative,
}

#[inline]
pub(crate) fn fetch_operand<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
) -> u8 {
    let operand = bus.read(cpu.registers.pc);
    cpu.registers.pc = cpu.registers.pc.wrapping_add(1);
    operand
}

#[inline]
fn read_pointer<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    zp_addr: u8,
) -> u8 {
    cpu.vector_fetch.read_vector_byte(bus, cpu.registers.indirect_bank, zp_addr)
}

fn index_for<F: IndirectVectorFetch>(cpu: &Mos650x<F>, mode: AddressingMode) -> u8 {
    match mode {
        AddressingMode::ZeroPageX | AddressingMode::AbsoluteX => cpu.registers.x,
        AddressingMode::ZeroPageY
        | AddressingMode::AbsoluteY
        | AddressingMode::IndirectIndexed => cpu.registers.y,
        _ => 0,
    }
}

/// Resolve a read-class operand. Returns the operand byte and the
/// page-cross cycle penalty (0 or 1).
pub(crate) fn read_operand<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    mode: AddressingMode,
) -> (u8, u32) {
    match mode {
        AddressingMode::Immediate => (fetch_operand(cpu, bus), 0),
        AddressingMode::ZeroPage => {
            let address = fetch_operand(cpu, bus);
            (bus.read(address.into()), 0)
        }
        AddressingMode::ZeroPageX | AddressingMode::ZeroPageY => {
            let index = index_for(cpu, mode);
            let base = fetch_operand(cpu, bus);
            // Dummy read at the base address while the index is added;
            // the sum wraps within page 0
            bus.read(base.into());
            (bus.read(base.wrapping_add(index).into()), 0)
        }
        AddressingMode::Absolute => {
            let lsb = fetch_operand(cpu, bus);
            let msb = fetch_operand(cpu, bus);
            (bus.read(u16::from_le_bytes([lsb, msb])), 0)
        }
        AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => {
            let index = index_for(cpu, mode);
            let lsb = fetch_operand(cpu, bus);
            let msb = fetch_operand(cpu, bus);

            let (address_lsb, crossed) = lsb.overflowing_add(index);
            let value = bus.read(u16::from_le_bytes([address_lsb, msb]));
            if crossed {
                let address = u16::from_le_bytes([lsb, msb]).wrapping_add(index.into());
                (bus.read(address), 1)
            } else {
                (value, 0)
            }
        }
        AddressingMode::IndexedIndirect => {
            let base = fetch_operand(cpu, bus);
            bus.read(base.into());
            let pointer = base.wrapping_add(cpu.registers.x);
            let lsb = read_pointer(cpu, bus, pointer);
            let msb = read_pointer(cpu, bus, pointer.wrapping_add(1));
            (bus.read(u16::from_le_bytes([lsb, msb])), 0)
        }
        AddressingMode::IndirectIndexed => {
            let pointer = fetch_operand(cpu, bus);
            let lsb = read_pointer(cpu, bus, pointer);
            let msb = read_pointer(cpu, bus, pointer.wrapping_add(1));

            let (address_lsb, crossed) = lsb.overflowing_add(cpu.registers.y);
            let value = bus.read(u16::from_le_bytes([address_lsb, msb]));
            if crossed {
                let address =
                    u16::from_le_bytes([lsb, msb]).wrapping_add(cpu.registers.y.into());
                (bus.read(address), 1)
            } else {
                (value, 0)
            }
        }
        AddressingMode::Implied
        | AddressingMode::Accumulator
        | AddressingMode::Indirect
        | AddressingMode::Relative => unreachable!("not a read-class addressing mode: {mode:?}"),
    }
}

/// Resolve a store-class effective address. Stores always perform the dummy
/// read when indexed, so there is no variable penalty; the fixed cost is in
/// the opcode's base cycles.
pub(crate) fn write_target<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    mode: AddressingMode,
) -> u16 {
    match mode {
        AddressingMode::ZeroPage => fetch_operand(cpu, bus).into(),
        AddressingMode::ZeroPageX | AddressingMode::ZeroPageY => {
            let index = index_for(cpu, mode);
            let base = fetch_operand(cpu, bus);
            bus.read(base.into());
            base.wrapping_add(index).into()
        }
        AddressingMode::Absolute => {
            let lsb = fetch_operand(cpu, bus);
            let msb = fetch_operand(cpu, bus);
            u16::from_le_bytes([lsb, msb])
        }
        AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => {
            let index = index_for(cpu, mode);
            let lsb = fetch_operand(cpu, bus);
            let msb = fetch_operand(cpu, bus);

            bus.read(u16::from_le_bytes([lsb.wrapping_add(index), msb]));
            u16::from_le_bytes([lsb, msb]).wrapping_add(index.into())
        }
        AddressingMode::IndexedIndirect => {
            let base = fetch_operand(cpu, bus);
            bus.read(base.into());
            let pointer = base.wrapping_add(cpu.registers.x);
            let lsb = read_pointer(cpu, bus, pointer);
            let msb = read_pointer(cpu, bus, pointer.wrapping_add(1));
            u16::from_le_bytes([lsb, msb])
        }
        AddressingMode::IndirectIndexed => {
            let pointer = fetch_operand(cpu, bus);
            let lsb = read_pointer(cpu, bus, pointer);
            let msb = read_pointer(cpu, bus, pointer.wrapping_add(1));

            bus.read(u16::from_le_bytes([lsb.wrapping_add(cpu.registers.y), msb]));
            u16::from_le_bytes([lsb, msb]).wrapping_add(cpu.registers.y.into())
        }
        AddressingMode::Implied
        | AddressingMode::Accumulator
        | AddressingMode::Immediate
        | AddressingMode::Indirect
        | AddressingMode::Relative => unreachable!("not a store-class addressing mode: {mode:?}"),
    }
}

/// Execute a read-modify-write operation: read the operand, write the
/// unmodified value back, then write the result. The double write is
/// observable through memory-mapped I/O and must not be elided.
pub(crate) fn modify<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    mode: AddressingMode,
    op: impl FnOnce(&mut CpuRegisters, u8) -> u8,
) {
    if mode == AddressingMode::Accumulator {
        // Spurious operand read
        bus.read(cpu.registers.pc);
        let operand = cpu.registers.accumulator;
        let value = op(&mut cpu.registers, operand);
        cpu.registers.accumulator = value;
        return;
    }

    let address = match mode {
        AddressingMode::ZeroPage => fetch_operand(cpu, bus).into(),
        AddressingMode::ZeroPageX => {
            let base = fetch_operand(cpu, bus);
            bus.read(base.into());
            base.wrapping_add(cpu.registers.x).into()
        }
        AddressingMode::Absolute => {
            let lsb = fetch_operand(cpu, bus);
            let msb = fetch_operand(cpu, bus);
            u16::from_le_bytes([lsb, msb])
        }
        AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => {
            let index = index_for(cpu, mode);
            let lsb = fetch_operand(cpu, bus);
            let msb = fetch_operand(cpu, bus);

            bus.read(u16::from_le_bytes([lsb.wrapping_add(index), msb]));
            u16::from_le_bytes([lsb, msb]).wrapping_add(index.into())
        }
        AddressingMode::IndexedIndirect => {
            let base = fetch_operand(cpu, bus);
            bus.read(base.into());
            let pointer = base.wrapping_add(cpu.registers.x);
            let lsb = read_pointer(cpu, bus, pointer);
            let msb = read_pointer(cpu, bus, pointer.wrapping_add(1));
            u16::from_le_bytes([lsb, msb])
        }
        AddressingMode::IndirectIndexed => {
            let pointer = fetch_operand(cpu, bus);
            let lsb = read_pointer(cpu, bus, pointer);
            let msb = read_pointer(cpu, bus, pointer.wrapping_add(1));

            bus.read(u16::from_le_bytes([lsb.wrapping_add(cpu.registers.y), msb]));
            u16::from_le_bytes([lsb, msb]).wrapping_add(cpu.registers.y.into())
        }
        _ => unreachable!("not a read-modify-write addressing mode: {mode:?}"),
    };

    let operand = bus.read(address);
    bus.write(address, operand);
    let value = op(&mut cpu.registers, operand);
    bus.write(address, value);
}

/// Partially resolved target for the address-unstable store opcodes
/// (SAH/SSH/SYH/SXH). The stored value and the final address both depend on
/// the un-incremented high byte, so resolution stops before the write.
pub(crate) struct UnstableStoreTarget {
    pub indexed_lsb: u8,
    pub base_msb: u8,
    pub page_crossed: bool,
}

/// Resolve the target of an unstable store through `absolute,Y`,
/// `absolute,X`, or `(zp),Y` addressing, up to (and including) the dummy
/// read at the un-carried address.
pub(crate) fn unstable_store_target<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    mode: AddressingMode,
) -> UnstableStoreTarget {
    let index = index_for(cpu, mode);
    let (lsb, msb) = match mode {
        AddressingMode::AbsoluteX | AddressingMode::AbsoluteY => {
            let lsb = fetch_operand(cpu, bus);
            let msb = fetch_operand(cpu, bus);
            (lsb, msb)
        }
        AddressingMode::IndirectIndexed => {
            let pointer = fetch_operand(cpu, bus);
            let lsb = read_pointer(cpu, bus, pointer);
            let msb = read_pointer(cpu, bus, pointer.wrapping_add(1));
            (lsb, msb)
        }
        _ => unreachable!("not an unstable-store addressing mode: {mode:?}"),
    };

    let (indexed_lsb, page_crossed) = lsb.overflowing_add(index);
    bus.read(u16::from_le_bytes([indexed_lsb, msb]));

    UnstableStoreTarget { indexed_lsb, base_msb: msb, page_crossed }
}
