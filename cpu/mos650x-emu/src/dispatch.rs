//! Opcode dispatch: one table entry per opcode byte, interpreted by a
//! single generic executor.
//!
//! Every byte value 0x00-0xFF has a defined handler; on this silicon there
//! is no such thing as an invalid instruction, only undocumented ones.
//! The undocumented combined opcodes (SLO, RLA, ..., and the
//! address-unstable SAH/SSH/SYH/SXH family) reproduce the reverse-engineered
//! hardware behavior because real programs and copy protections depend on it.

use crate::addressing::{self, AddressingMode, IndirectVectorFetch};
use crate::bus::BusInterface;
use crate::{CpuRegisters, Mos650x, StatusFlags, StatusReadContext};
use m65_common::num::{GetBit, U16Ext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    // Official
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
    // Undocumented
    Slo,
    Rla,
    Sre,
    Rra,
    Dcp,
    Isb,
    Lax,
    Sax,
    Anc,
    Asr,
    Arr,
    Ane,
    Oal,
    Asx,
    Ast,
    Sah,
    Ssh,
    Syh,
    Sxh,
    Kil,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct OpcodeEntry {
    pub op: Operation,
    pub mode: AddressingMode,
    pub cycles: u8,
}

const fn entry(op: Operation, mode: AddressingMode, cycles: u8) -> OpcodeEntry {
    OpcodeEntry { op, mode, cycles }
}

use AddressingMode as M;
use Operation as Op;

/// Base cycle costs follow the hardware tables; page-cross and taken-branch
/// penalties are added by the executor. The undocumented opcodes cost the
/// same as the official read/RMW instruction with the same addressing mode.
#[rustfmt::skip]
pub(crate) static OPCODE_TABLE: [OpcodeEntry; 256] = [
    // 0x00
    entry(Op::Brk, M::Implied, 7),
    entry(Op::Ora, M::IndexedIndirect, 6),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Slo, M::IndexedIndirect, 8),
    entry(Op::Nop, M::ZeroPage, 3),
    entry(Op::Ora, M::ZeroPage, 3),
    entry(Op::Asl, M::ZeroPage, 5),
    entry(Op::Slo, M::ZeroPage, 5),
    entry(Op::Php, M::Implied, 3),
    entry(Op::Ora, M::Immediate, 2),
    entry(Op::Asl, M::Accumulator, 2),
    entry(Op::Anc, M::Immediate, 2),
    entry(Op::Nop, M::Absolute, 4),
    entry(Op::Ora, M::Absolute, 4),
    entry(Op::Asl, M::Absolute, 6),
    entry(Op::Slo, M::Absolute, 6),
    // 0x10
    entry(Op::Bpl, M::Relative, 2),
    entry(Op::Ora, M::IndirectIndexed, 5),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Slo, M::IndirectIndexed, 8),
    entry(Op::Nop, M::ZeroPageX, 4),
    entry(Op::Ora, M::ZeroPageX, 4),
    entry(Op::Asl, M::ZeroPageX, 6),
    entry(Op::Slo, M::ZeroPageX, 6),
    entry(Op::Clc, M::Implied, 2),
    entry(Op::Ora, M::AbsoluteY, 4),
    entry(Op::Nop, M::Implied, 2),
    entry(Op::Slo, M::AbsoluteY, 7),
    entry(Op::Nop, M::AbsoluteX, 4),
    entry(Op::Ora, M::AbsoluteX, 4),
    entry(Op::Asl, M::AbsoluteX, 7),
    entry(Op::Slo, M::AbsoluteX, 7),
    // 0x20
    entry(Op::Jsr, M::Absolute, 6),
    entry(Op::And, M::IndexedIndirect, 6),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Rla, M::IndexedIndirect, 8),
    entry(Op::Bit, M::ZeroPage, 3),
    entry(Op::And, M::ZeroPage, 3),
    entry(Op::Rol, M::ZeroPage, 5),
    entry(Op::Rla, M::ZeroPage, 5),
    entry(Op::Plp, M::Implied, 4),
    entry(Op::And, M::Immediate, 2),
    entry(Op::Rol, M::Accumulator, 2),
    entry(Op::Anc, M::Immediate, 2),
    entry(Op::Bit, M::Absolute, 4),
    entry(Op::And, M::Absolute, 4),
    entry(Op::Rol, M::Absolute, 6),
    entry(Op::Rla, M::Absolute, 6),
    // 0x30
    entry(Op::Bmi, M::Relative, 2),
    entry(Op::And, M::IndirectIndexed, 5),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Rla, M::IndirectIndexed, 8),
    entry(Op::Nop, M::ZeroPageX, 4),
    entry(Op::And, M::ZeroPageX, 4),
    entry(Op::Rol, M::ZeroPageX, 6),
    entry(Op::Rla, M::ZeroPageX, 6),
    entry(Op::Sec, M::Implied, 2),
    entry(Op::And, M::AbsoluteY, 4),
    entry(Op::Nop, M::Implied, 2),
    entry(Op::Rla, M::AbsoluteY, 7),
    entry(Op::Nop, M::AbsoluteX, 4),
    entry(Op::And, M::AbsoluteX, 4),
    entry(Op::Rol, M::AbsoluteX, 7),
    entry(Op::Rla, M::AbsoluteX, 7),
    // 0x40
    entry(Op::Rti, M::Implied, 6),
    entry(Op::Eor, M::IndexedIndirect, 6),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Sre, M::IndexedIndirect, 8),
    entry(Op::Nop, M::ZeroPage, 3),
    entry(Op::Eor, M::ZeroPage, 3),
    entry(Op::Lsr, M::ZeroPage, 5),
    entry(Op::Sre, M::ZeroPage, 5),
    entry(Op::Pha, M::Implied, 3),
    entry(Op::Eor, M::Immediate, 2),
    entry(Op::Lsr, M::Accumulator, 2),
    entry(Op::Asr, M::Immediate, 2),
    entry(Op::Jmp, M::Absolute, 3),
    entry(Op::Eor, M::Absolute, 4),
    entry(Op::Lsr, M::Absolute, 6),
    entry(Op::Sre, M::Absolute, 6),
    // 0x50
    entry(Op::Bvc, M::Relative, 2),
    entry(Op::Eor, M::IndirectIndexed, 5),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Sre, M::IndirectIndexed, 8),
    entry(Op::Nop, M::ZeroPageX, 4),
    entry(Op::Eor, M::ZeroPageX, 4),
    entry(Op::Lsr, M::ZeroPageX, 6),
    entry(Op::Sre, M::ZeroPageX, 6),
    entry(Op::Cli, M::Implied, 2),
    entry(Op::Eor, M::AbsoluteY, 4),
    entry(Op::Nop, M::Implied, 2),
    entry(Op::Sre, M::AbsoluteY, 7),
    entry(Op::Nop, M::AbsoluteX, 4),
    entry(Op::Eor, M::AbsoluteX, 4),
    entry(Op::Lsr, M::AbsoluteX, 7),
    entry(Op::Sre, M::AbsoluteX, 7),
    // 0x60
    entry(Op::Rts, M::Implied, 6),
    entry(Op::Adc, M::IndexedIndirect, 6),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Rra, M::IndexedIndirect, 8),
    entry(Op::Nop, M::ZeroPage, 3),
    entry(Op::Adc, M::ZeroPage, 3),
    entry(Op::Ror, M::ZeroPage, 5),
    entry(Op::Rra, M::ZeroPage, 5),
    entry(Op::Pla, M::Implied, 4),
    entry(Op::Adc, M::Immediate, 2),
    entry(Op::Ror, M::Accumulator, 2),
    entry(Op::Arr, M::Immediate, 2),
    entry(Op::Jmp, M::Indirect, 5),
    entry(Op::Adc, M::Absolute, 4),
    entry(Op::Ror, M::Absolute, 6),
    entry(Op::Rra, M::Absolute, 6),
    // 0x70
    entry(Op::Bvs, M::Relative, 2),
    entry(Op::Adc, M::IndirectIndexed, 5),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Rra, M::IndirectIndexed, 8),
    entry(Op::Nop, M::ZeroPageX, 4),
    entry(Op::Adc, M::ZeroPageX, 4),
    entry(Op::Ror, M::ZeroPageX, 6),
    entry(Op::Rra, M::ZeroPageX, 6),
    entry(Op::Sei, M::Implied, 2),
    entry(Op::Adc, M::AbsoluteY, 4),
    entry(Op::Nop, M::Implied, 2),
    entry(Op::Rra, M::AbsoluteY, 7),
    entry(Op::Nop, M::AbsoluteX, 4),
    entry(Op::Adc, M::AbsoluteX, 4),
    entry(Op::Ror, M::AbsoluteX, 7),
    entry(Op::Rra, M::AbsoluteX, 7),
    // 0x80
    entry(Op::Nop, M::Immediate, 2),
    entry(Op::Sta, M::IndexedIndirect, 6),
    entry(Op::Nop, M::Immediate, 2),
    entry(Op::Sax, M::IndexedIndirect, 6),
    entry(Op::Sty, M::ZeroPage, 3),
    entry(Op::Sta, M::ZeroPage, 3),
    entry(Op::Stx, M::ZeroPage, 3),
    entry(Op::Sax, M::ZeroPage, 3),
    entry(Op::Dey, M::Implied, 2),
    entry(Op::Nop, M::Immediate, 2),
    entry(Op::Txa, M::Implied, 2),
    entry(Op::Ane, M::Immediate, 2),
    entry(Op::Sty, M::Absolute, 4),
    entry(Op::Sta, M::Absolute, 4),
    entry(Op::Stx, M::Absolute, 4),
    entry(Op::Sax, M::Absolute, 4),
    // 0x90
    entry(Op::Bcc, M::Relative, 2),
    entry(Op::Sta, M::IndirectIndexed, 6),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Sah, M::IndirectIndexed, 6),
    entry(Op::Sty, M::ZeroPageX, 4),
    entry(Op::Sta, M::ZeroPageX, 4),
    entry(Op::Stx, M::ZeroPageY, 4),
    entry(Op::Sax, M::ZeroPageY, 4),
    entry(Op::Tya, M::Implied, 2),
    entry(Op::Sta, M::AbsoluteY, 5),
    entry(Op::Txs, M::Implied, 2),
    entry(Op::Ssh, M::AbsoluteY, 5),
    entry(Op::Syh, M::AbsoluteX, 5),
    entry(Op::Sta, M::AbsoluteX, 5),
    entry(Op::Sxh, M::AbsoluteY, 5),
    entry(Op::Sah, M::AbsoluteY, 5),
    // 0xA0
    entry(Op::Ldy, M::Immediate, 2),
    entry(Op::Lda, M::IndexedIndirect, 6),
    entry(Op::Ldx, M::Immediate, 2),
    entry(Op::Lax, M::IndexedIndirect, 6),
    entry(Op::Ldy, M::ZeroPage, 3),
    entry(Op::Lda, M::ZeroPage, 3),
    entry(Op::Ldx, M::ZeroPage, 3),
    entry(Op::Lax, M::ZeroPage, 3),
    entry(Op::Tay, M::Implied, 2),
    entry(Op::Lda, M::Immediate, 2),
    entry(Op::Tax, M::Implied, 2),
    entry(Op::Oal, M::Immediate, 2),
    entry(Op::Ldy, M::Absolute, 4),
    entry(Op::Lda, M::Absolute, 4),
    entry(Op::Ldx, M::Absolute, 4),
    entry(Op::Lax, M::Absolute, 4),
    // 0xB0
    entry(Op::Bcs, M::Relative, 2),
    entry(Op::Lda, M::IndirectIndexed, 5),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Lax, M::IndirectIndexed, 5),
    entry(Op::Ldy, M::ZeroPageX, 4),
    entry(Op::Lda, M::ZeroPageX, 4),
    entry(Op::Ldx, M::ZeroPageY, 4),
    entry(Op::Lax, M::ZeroPageY, 4),
    entry(Op::Clv, M::Implied, 2),
    entry(Op::Lda, M::AbsoluteY, 4),
    entry(Op::Tsx, M::Implied, 2),
    entry(Op::Ast, M::AbsoluteY, 4),
    entry(Op::Ldy, M::AbsoluteX, 4),
    entry(Op::Lda, M::AbsoluteX, 4),
    entry(Op::Ldx, M::AbsoluteY, 4),
    entry(Op::Lax, M::AbsoluteY, 4),
    // 0xC0
    entry(Op::Cpy, M::Immediate, 2),
    entry(Op::Cmp, M::IndexedIndirect, 6),
    entry(Op::Nop, M::Immediate, 2),
    entry(Op::Dcp, M::IndexedIndirect, 8),
    entry(Op::Cpy, M::ZeroPage, 3),
    entry(Op::Cmp, M::ZeroPage, 3),
    entry(Op::Dec, M::ZeroPage, 5),
    entry(Op::Dcp, M::ZeroPage, 5),
    entry(Op::Iny, M::Implied, 2),
    entry(Op::Cmp, M::Immediate, 2),
    entry(Op::Dex, M::Implied, 2),
    entry(Op::Asx, M::Immediate, 2),
    entry(Op::Cpy, M::Absolute, 4),
    entry(Op::Cmp, M::Absolute, 4),
    entry(Op::Dec, M::Absolute, 6),
    entry(Op::Dcp, M::Absolute, 6),
    // 0xD0
    entry(Op::Bne, M::Relative, 2),
    entry(Op::Cmp, M::IndirectIndexed, 5),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Dcp, M::IndirectIndexed, 8),
    entry(Op::Nop, M::ZeroPageX, 4),
    entry(Op::Cmp, M::ZeroPageX, 4),
    entry(Op::Dec, M::ZeroPageX, 6),
    entry(Op::Dcp, M::ZeroPageX, 6),
    entry(Op::Cld, M::Implied, 2),
    entry(Op::Cmp, M::AbsoluteY, 4),
    entry(Op::Nop, M::Implied, 2),
    entry(Op::Dcp, M::AbsoluteY, 7),
    entry(Op::Nop, M::AbsoluteX, 4),
    entry(Op::Cmp, M::AbsoluteX, 4),
    entry(Op::Dec, M::AbsoluteX, 7),
    entry(Op::Dcp, M::AbsoluteX, 7),
    // 0xE0
    entry(Op::Cpx, M::Immediate, 2),
    entry(Op::Sbc, M::IndexedIndirect, 6),
    entry(Op::Nop, M::Immediate, 2),
    entry(Op::Isb, M::IndexedIndirect, 8),
    entry(Op::Cpx, M::ZeroPage, 3),
    entry(Op::Sbc, M::ZeroPage, 3),
    entry(Op::Inc, M::ZeroPage, 5),
    entry(Op::Isb, M::ZeroPage, 5),
    entry(Op::Inx, M::Implied, 2),
    entry(Op::Sbc, M::Immediate, 2),
    entry(Op::Nop, M::Implied, 2),
    entry(Op::Sbc, M::Immediate, 2),
    entry(Op::Cpx, M::Absolute, 4),
    entry(Op::Sbc, M::Absolute, 4),
    entry(Op::Inc, M::Absolute, 6),
    entry(Op::Isb, M::Absolute, 6),
    // 0xF0
    entry(Op::Beq, M::Relative, 2),
    entry(Op::Sbc, M::IndirectIndexed, 5),
    entry(Op::Kil, M::Implied, 2),
    entry(Op::Isb, M::IndirectIndexed, 8),
    entry(Op::Nop, M::ZeroPageX, 4),
    entry(Op::Sbc, M::ZeroPageX, 4),
    entry(Op::Inc, M::ZeroPageX, 6),
    entry(Op::Isb, M::ZeroPageX, 6),
    entry(Op::Sed, M::Implied, 2),
    entry(Op::Sbc, M::AbsoluteY, 4),
    entry(Op::Nop, M::Implied, 2),
    entry(Op::Isb, M::AbsoluteY, 7),
    entry(Op::Nop, M::AbsoluteX, 4),
    entry(Op::Sbc, M::AbsoluteX, 4),
    entry(Op::Inc, M::AbsoluteX, 7),
    entry(Op::Isb, M::AbsoluteX, 7),
];

fn add(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let existing_carry = flags.carry;

    let (result, carry1) = accumulator.overflowing_add(value);
    let (result, carry2) = result.overflowing_add(existing_carry.into());
    let new_carry = carry1 || carry2;

    let bit_6_carry = (accumulator & 0x7F) + (value & 0x7F) + u8::from(existing_carry) >= 0x80;
    let overflow = new_carry ^ bit_6_carry;

    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(new_carry);

    result
}

fn add_bcd(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    // Formulas from http://www.6502.org/tutorials/decimal_mode.html#A which
    // correctly handle invalid digits. On NMOS parts Z tracks the binary sum
    // while N and V track the pre-adjustment intermediate.
    let existing_carry = u8::from(flags.carry);

    let binary_sum = accumulator.wrapping_add(value).wrapping_add(existing_carry);

    let mut al = (accumulator & 0x0F) + (value & 0x0F) + existing_carry;
    if al >= 0x0A {
        al = 0x10 | ((al + 0x06) & 0x0F);
    }

    let mut a = u16::from(accumulator & 0xF0) + u16::from(value & 0xF0) + u16::from(al);

    let intermediate = a as u8;
    let overflow = !(accumulator ^ value) & (accumulator ^ intermediate) & 0x80 != 0;

    if a >= 0xA0 {
        a += 0x60;
    }

    flags
        .set_negative(intermediate.bit(7))
        .set_overflow(overflow)
        .set_zero(binary_sum == 0)
        .set_carry(a >= 0x100);

    a as u8
}

fn subtract(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    // Carry flag is inverted in subtraction
    let existing_borrow = u8::from(!flags.carry);

    let (result, borrowed1) = accumulator.overflowing_sub(value);
    let (result, borrowed2) = result.overflowing_sub(existing_borrow);
    let borrowed = borrowed1 || borrowed2;

    let bit_6_borrowed = accumulator & 0x7F < (value & 0x7F) + existing_borrow;
    let overflow = borrowed ^ bit_6_borrowed;

    flags
        .set_negative(result.bit(7))
        .set_overflow(overflow)
        .set_zero(result == 0)
        .set_carry(!borrowed);

    result
}

fn subtract_bcd(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    // Same source as add_bcd. On NMOS parts every flag comes from the binary
    // subtraction; only the stored accumulator is decimal-adjusted.
    let existing_borrow = u8::from(!flags.carry);

    let mut al = i16::from(accumulator & 0x0F)
        - i16::from(value & 0x0F)
        - i16::from(existing_borrow);
    if al < 0 {
        al = ((al - 0x06) & 0x0F) - 0x10;
    }

    let mut a = i16::from(accumulator & 0xF0) - i16::from(value & 0xF0) + al;
    if a < 0 {
        a -= 0x60;
    }

    subtract(accumulator, value, flags);

    a as u8
}

fn and(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator & value;
    flags.set_negative(result.bit(7)).set_zero(result == 0);
    result
}

fn or(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator | value;
    flags.set_negative(result.bit(7)).set_zero(result == 0);
    result
}

fn xor(accumulator: u8, value: u8, flags: &mut StatusFlags) -> u8 {
    let result = accumulator ^ value;
    flags.set_negative(result.bit(7)).set_zero(result == 0);
    result
}

fn bit_test(accumulator: u8, value: u8, flags: &mut StatusFlags) {
    flags.set_negative(value.bit(7)).set_overflow(value.bit(6)).set_zero(accumulator & value == 0);
}

fn compare(register: u8, value: u8, flags: &mut StatusFlags) {
    flags
        .set_negative(register.wrapping_sub(value).bit(7))
        .set_zero(register == value)
        .set_carry(register >= value);
}

fn shift_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let shifted = value << 1;
    flags.set_carry(value.bit(7)).set_negative(shifted.bit(7)).set_zero(shifted == 0);
    shifted
}

fn logical_shift_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let shifted = value >> 1;
    flags.set_carry(value.bit(0)).set_negative(false).set_zero(shifted == 0);
    shifted
}

fn rotate_left(value: u8, flags: &mut StatusFlags) -> u8 {
    let rotated = (value << 1) | u8::from(flags.carry);
    flags.set_carry(value.bit(7)).set_negative(rotated.bit(7)).set_zero(rotated == 0);
    rotated
}

fn rotate_right(value: u8, flags: &mut StatusFlags) -> u8 {
    let rotated = (value >> 1) | (u8::from(flags.carry) << 7);
    flags.set_carry(value.bit(0)).set_negative(rotated.bit(7)).set_zero(rotated == 0);
    rotated
}

fn increment(value: u8, flags: &mut StatusFlags) -> u8 {
    let incremented = value.wrapping_add(1);
    flags.set_negative(incremented.bit(7)).set_zero(incremented == 0);
    incremented
}

fn decrement(value: u8, flags: &mut StatusFlags) -> u8 {
    let decremented = value.wrapping_sub(1);
    flags.set_negative(decremented.bit(7)).set_zero(decremented == 0);
    decremented
}

fn and_with_rotate_right(registers: &mut CpuRegisters, operand: u8) {
    // ARR is like a mix of AND, ROR, and ADC; the accumulator is set to
    // (A & #imm) rotated, but the flags are set differently from ROR

    let old_carry = registers.status.carry;
    let and_value = registers.accumulator & operand;
    let rotated = (and_value >> 1) | (u8::from(old_carry) << 7);

    if registers.status.decimal {
        // In decimal mode the ADC half of the instruction shows through: N
        // copies the previous carry, V tracks whether the rotate changed
        // bit 6, Z looks at the pre-fixup value, and each nibble of the
        // rotated result gets the BCD fixup its half of (A & #imm) calls
        // for, with the high-nibble fixup driving the carry out
        registers
            .status
            .set_negative(old_carry)
            .set_overflow((and_value ^ rotated).bit(6))
            .set_zero(rotated == 0);

        let mut result = rotated;
        if (and_value & 0x0F) + (and_value & 0x01) > 0x05 {
            result = (result & 0xF0) | (result.wrapping_add(0x06) & 0x0F);
        }

        let carry = u16::from(and_value & 0xF0) + u16::from(and_value & 0x10) > 0x50;
        if carry {
            result = result.wrapping_add(0x60);
        }
        registers.status.set_carry(carry);

        registers.accumulator = result;
        return;
    }

    registers.accumulator = rotated;

    // The overflow flag is set as if an ADC was performed between the AND and
    // ROR, and the carry flag is set based on what was bit 7 prior to rotation
    let overflow = rotated.bit(6) ^ rotated.bit(5);
    registers
        .status
        .set_negative(rotated.bit(7))
        .set_overflow(overflow)
        .set_carry(rotated.bit(6))
        .set_zero(rotated == 0);
}

#[inline]
pub(crate) fn push_stack<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    value: u8,
) {
    let address = u16::from_be_bytes([0x01, cpu.registers.sp]);
    bus.write(address, value);
    cpu.registers.sp = cpu.registers.sp.wrapping_sub(1);
}

#[inline]
fn pull_stack<F: IndirectVectorFetch, B: BusInterface>(cpu: &mut Mos650x<F>, bus: &mut B) -> u8 {
    cpu.registers.sp = cpu.registers.sp.wrapping_add(1);
    bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]))
}

// Implied-mode operations spend their second cycle re-reading the opcode's
// successor byte; the result is discarded but the access is observable.
fn implied<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    body: impl FnOnce(&mut CpuRegisters),
) {
    bus.read(cpu.registers.pc);
    body(&mut cpu.registers);
}

/// Returns the extra cycles beyond the 2-cycle base: +1 if taken, +1 more if
/// the target sits on a different page than the instruction after the branch.
fn branch<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    taken: bool,
) -> u32 {
    let offset = addressing::fetch_operand(cpu, bus) as i8;
    if !taken {
        return 0;
    }

    bus.read(cpu.registers.pc);
    let target = cpu.registers.pc.wrapping_add_signed(offset.into());

    if cpu.registers.pc & 0xFF00 == target & 0xFF00 {
        cpu.registers.pc = target;
        1
    } else {
        bus.read((cpu.registers.pc & 0xFF00) | (target & 0x00FF));
        cpu.registers.pc = target;
        2
    }
}

fn jmp<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    mode: AddressingMode,
) {
    let lsb = addressing::fetch_operand(cpu, bus);
    let msb = bus.read(cpu.registers.pc);
    let target = u16::from_le_bytes([lsb, msb]);

    cpu.registers.pc = match mode {
        AddressingMode::Absolute => target,
        AddressingMode::Indirect => {
            let pc_lsb = bus.read(target);
            // The NMOS bug: the pointer's high byte is fetched without
            // carrying into the page, so JMP ($xxFF) wraps to $xx00
            let msb_address = (target & 0xFF00) | u16::from((target as u8).wrapping_add(1));
            let pc_msb = bus.read(msb_address);
            u16::from_le_bytes([pc_lsb, pc_msb])
        }
        _ => unreachable!("JMP only has absolute and indirect forms: {mode:?}"),
    };
}

fn jsr<F: IndirectVectorFetch, B: BusInterface>(cpu: &mut Mos650x<F>, bus: &mut B) {
    let lsb = addressing::fetch_operand(cpu, bus);

    // Spurious stack read
    bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]));

    push_stack(cpu, bus, cpu.registers.pc.msb());
    push_stack(cpu, bus, cpu.registers.pc.lsb());

    let msb = bus.read(cpu.registers.pc);
    cpu.registers.pc = u16::from_le_bytes([lsb, msb]);
}

fn rts<F: IndirectVectorFetch, B: BusInterface>(cpu: &mut Mos650x<F>, bus: &mut B) {
    // Spurious operand and stack reads
    bus.read(cpu.registers.pc);
    bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]));

    cpu.registers.pc = pull_stack(cpu, bus).into();
    let pc_msb = pull_stack(cpu, bus);
    cpu.registers.pc.set_msb(pc_msb);

    // Fetch and discard the byte after the stacked address, incrementing PC
    addressing::fetch_operand(cpu, bus);
}

fn rti<F: IndirectVectorFetch, B: BusInterface>(cpu: &mut Mos650x<F>, bus: &mut B) {
    // Spurious operand and stack reads
    bus.read(cpu.registers.pc);
    bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]));

    let status = pull_stack(cpu, bus);
    cpu.registers.status = StatusFlags::from_byte(status);

    cpu.registers.pc = pull_stack(cpu, bus).into();
    let pc_msb = pull_stack(cpu, bus);
    cpu.registers.pc.set_msb(pc_msb);
}

// Software interrupt: same stack sequence as a hardware interrupt but with
// B forced to 1 in the pushed status byte and PC advanced past the padding
// byte. A pending NMI at push time hijacks the vector.
fn brk<F: IndirectVectorFetch, B: BusInterface>(cpu: &mut Mos650x<F>, bus: &mut B) {
    addressing::fetch_operand(cpu, bus);

    push_stack(cpu, bus, cpu.registers.pc.msb());
    push_stack(cpu, bus, cpu.registers.pc.lsb());

    let status = cpu.registers.status.to_byte(StatusReadContext::Brk);
    push_stack(cpu, bus, status);

    let vector = cpu.take_interrupt_vector();
    cpu.registers.pc = bus.read(vector).into();
    cpu.registers.status.interrupt_disable = true;
    let pc_msb = bus.read(vector + 1);
    cpu.registers.pc.set_msb(pc_msb);
}

// The unstable store family (SAH/SSH/SYH/SXH): the stored value is the
// source register ANDed with the base address high byte plus one, and when
// indexing crosses a page the corrupted value replaces the high byte of the
// effective address.
fn unstable_store<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    mode: AddressingMode,
    source: u8,
) {
    let target = addressing::unstable_store_target(cpu, bus, mode);

    let value = source & target.base_msb.wrapping_add(1);
    let msb = if target.page_crossed { value } else { target.base_msb };
    bus.write(u16::from_le_bytes([target.indexed_lsb, msb]), value);
}

pub(crate) fn execute_instruction<F: IndirectVectorFetch, B: BusInterface>(
    cpu: &mut Mos650x<F>,
    bus: &mut B,
    opcode: u8,
) -> u32 {
    let entry = OPCODE_TABLE[usize::from(opcode)];
    let mut cycles = u32::from(entry.cycles);

    match entry.op {
        Op::Lda => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            cpu.registers.accumulator = operand;
            cpu.registers.status.set_negative(operand.bit(7)).set_zero(operand == 0);
        }
        Op::Ldx => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            cpu.registers.x = operand;
            cpu.registers.status.set_negative(operand.bit(7)).set_zero(operand == 0);
        }
        Op::Ldy => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            cpu.registers.y = operand;
            cpu.registers.status.set_negative(operand.bit(7)).set_zero(operand == 0);
        }
        Op::Lax => {
            // LDA and LDX simultaneously
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            cpu.registers.accumulator = operand;
            cpu.registers.x = operand;
            cpu.registers.status.set_negative(operand.bit(7)).set_zero(operand == 0);
        }
        Op::Adc => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            registers.accumulator = if registers.status.decimal {
                add_bcd(registers.accumulator, operand, &mut registers.status)
            } else {
                add(registers.accumulator, operand, &mut registers.status)
            };
        }
        Op::Sbc => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            registers.accumulator = if registers.status.decimal {
                subtract_bcd(registers.accumulator, operand, &mut registers.status)
            } else {
                subtract(registers.accumulator, operand, &mut registers.status)
            };
        }
        Op::And => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            registers.accumulator = and(registers.accumulator, operand, &mut registers.status);
        }
        Op::Ora => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            registers.accumulator = or(registers.accumulator, operand, &mut registers.status);
        }
        Op::Eor => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            registers.accumulator = xor(registers.accumulator, operand, &mut registers.status);
        }
        Op::Bit => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            bit_test(registers.accumulator, operand, &mut registers.status);
        }
        Op::Cmp => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            compare(registers.accumulator, operand, &mut registers.status);
        }
        Op::Cpx => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            compare(registers.x, operand, &mut registers.status);
        }
        Op::Cpy => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            compare(registers.y, operand, &mut registers.status);
        }
        Op::Nop => {
            if entry.mode == AddressingMode::Implied {
                implied(cpu, bus, |_registers| {});
            } else {
                // Multi-byte NOPs still perform their operand accesses
                let (_, extra) = addressing::read_operand(cpu, bus, entry.mode);
                cycles += extra;
            }
        }
        Op::Anc => {
            // AND, then set C the way ASL would
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            registers.accumulator = and(registers.accumulator, operand, &mut registers.status);
            registers.status.carry = registers.accumulator.bit(7);
        }
        Op::Asr => {
            // AND followed by LSR
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            let and_value = and(registers.accumulator, operand, &mut registers.status);
            registers.accumulator = logical_shift_right(and_value, &mut registers.status);
        }
        Op::Arr => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            and_with_rotate_right(&mut cpu.registers, operand);
        }
        Op::Ane => {
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            registers.accumulator = registers.x & operand;
            registers
                .status
                .set_negative(registers.accumulator.bit(7))
                .set_zero(registers.accumulator == 0);
        }
        Op::Oal => {
            // A and X both load (A | $EE) & #imm; the $EE term is the stable
            // value of the internal bus conflict
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            let value = (registers.accumulator | 0xEE) & operand;
            registers.accumulator = value;
            registers.x = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }
        Op::Asx => {
            // X = (A & X) - #imm, ignoring the current carry; flags are set as
            // if comparing (A & X) with the immediate
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            let ax = registers.accumulator & registers.x;
            let mut flags = StatusFlags {
                // Set carry to true because SBC inverts the carry flag for borrowing
                carry: true,
                ..StatusFlags::new()
            };
            registers.x = subtract(ax, operand, &mut flags);
            compare(ax, operand, &mut registers.status);
        }
        Op::Ast => {
            // A, X, and S all load S & value
            let (operand, extra) = addressing::read_operand(cpu, bus, entry.mode);
            cycles += extra;
            let registers = &mut cpu.registers;
            let value = operand & registers.sp;
            registers.accumulator = value;
            registers.x = value;
            registers.sp = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }
        Op::Sta => {
            let address = addressing::write_target(cpu, bus, entry.mode);
            bus.write(address, cpu.registers.accumulator);
        }
        Op::Stx => {
            let address = addressing::write_target(cpu, bus, entry.mode);
            bus.write(address, cpu.registers.x);
        }
        Op::Sty => {
            let address = addressing::write_target(cpu, bus, entry.mode);
            bus.write(address, cpu.registers.y);
        }
        Op::Sax => {
            let address = addressing::write_target(cpu, bus, entry.mode);
            bus.write(address, cpu.registers.accumulator & cpu.registers.x);
        }
        Op::Sah => {
            let source = cpu.registers.accumulator & cpu.registers.x;
            unstable_store(cpu, bus, entry.mode, source);
        }
        Op::Ssh => {
            // Copies A & X into S, then stores like SAH
            let source = cpu.registers.accumulator & cpu.registers.x;
            cpu.registers.sp = source;
            unstable_store(cpu, bus, entry.mode, source);
        }
        Op::Syh => {
            let source = cpu.registers.y;
            unstable_store(cpu, bus, entry.mode, source);
        }
        Op::Sxh => {
            let source = cpu.registers.x;
            unstable_store(cpu, bus, entry.mode, source);
        }
        Op::Asl => {
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                shift_left(operand, &mut registers.status)
            });
        }
        Op::Lsr => {
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                logical_shift_right(operand, &mut registers.status)
            });
        }
        Op::Rol => {
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                rotate_left(operand, &mut registers.status)
            });
        }
        Op::Ror => {
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                rotate_right(operand, &mut registers.status)
            });
        }
        Op::Inc => {
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                increment(operand, &mut registers.status)
            });
        }
        Op::Dec => {
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                decrement(operand, &mut registers.status)
            });
        }
        Op::Slo => {
            // ASL then ORA
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                let shifted = shift_left(operand, &mut registers.status);
                registers.accumulator = or(registers.accumulator, shifted, &mut registers.status);
                shifted
            });
        }
        Op::Rla => {
            // ROL then AND
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                let rotated = rotate_left(operand, &mut registers.status);
                registers.accumulator = and(registers.accumulator, rotated, &mut registers.status);
                rotated
            });
        }
        Op::Sre => {
            // LSR then EOR
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                let shifted = logical_shift_right(operand, &mut registers.status);
                registers.accumulator = xor(registers.accumulator, shifted, &mut registers.status);
                shifted
            });
        }
        Op::Rra => {
            // ROR then ADC, decimal mode included
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                let rotated = rotate_right(operand, &mut registers.status);
                registers.accumulator = if registers.status.decimal {
                    add_bcd(registers.accumulator, rotated, &mut registers.status)
                } else {
                    add(registers.accumulator, rotated, &mut registers.status)
                };
                rotated
            });
        }
        Op::Dcp => {
            // DEC then CMP
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                let decremented = decrement(operand, &mut registers.status);
                compare(registers.accumulator, decremented, &mut registers.status);
                decremented
            });
        }
        Op::Isb => {
            // INC then SBC
            addressing::modify(cpu, bus, entry.mode, |registers, operand| {
                let incremented = increment(operand, &mut registers.status);
                registers.accumulator = if registers.status.decimal {
                    subtract_bcd(registers.accumulator, incremented, &mut registers.status)
                } else {
                    subtract(registers.accumulator, incremented, &mut registers.status)
                };
                incremented
            });
        }
        Op::Clc => implied(cpu, bus, |registers| {
            registers.status.carry = false;
        }),
        Op::Cld => implied(cpu, bus, |registers| {
            registers.status.decimal = false;
        }),
        Op::Cli => implied(cpu, bus, |registers| {
            registers.status.interrupt_disable = false;
        }),
        Op::Clv => implied(cpu, bus, |registers| {
            registers.status.overflow = false;
        }),
        Op::Sec => implied(cpu, bus, |registers| {
            registers.status.carry = true;
        }),
        Op::Sed => implied(cpu, bus, |registers| {
            registers.status.decimal = true;
        }),
        Op::Sei => implied(cpu, bus, |registers| {
            registers.status.interrupt_disable = true;
        }),
        Op::Inx => implied(cpu, bus, |registers| {
            let value = registers.x.wrapping_add(1);
            registers.x = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        Op::Iny => implied(cpu, bus, |registers| {
            let value = registers.y.wrapping_add(1);
            registers.y = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        Op::Dex => implied(cpu, bus, |registers| {
            let value = registers.x.wrapping_sub(1);
            registers.x = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        Op::Dey => implied(cpu, bus, |registers| {
            let value = registers.y.wrapping_sub(1);
            registers.y = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        Op::Tax => implied(cpu, bus, |registers| {
            let value = registers.accumulator;
            registers.x = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        Op::Tay => implied(cpu, bus, |registers| {
            let value = registers.accumulator;
            registers.y = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        Op::Tsx => implied(cpu, bus, |registers| {
            let value = registers.sp;
            registers.x = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        Op::Txa => implied(cpu, bus, |registers| {
            let value = registers.x;
            registers.accumulator = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        Op::Tya => implied(cpu, bus, |registers| {
            let value = registers.y;
            registers.accumulator = value;
            registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }),
        // TXS does not affect flags
        Op::Txs => implied(cpu, bus, |registers| {
            registers.sp = registers.x;
        }),
        Op::Bcc => {
            let taken = !cpu.registers.status.carry;
            cycles += branch(cpu, bus, taken);
        }
        Op::Bcs => {
            let taken = cpu.registers.status.carry;
            cycles += branch(cpu, bus, taken);
        }
        Op::Beq => {
            let taken = cpu.registers.status.zero;
            cycles += branch(cpu, bus, taken);
        }
        Op::Bne => {
            let taken = !cpu.registers.status.zero;
            cycles += branch(cpu, bus, taken);
        }
        Op::Bmi => {
            let taken = cpu.registers.status.negative;
            cycles += branch(cpu, bus, taken);
        }
        Op::Bpl => {
            let taken = !cpu.registers.status.negative;
            cycles += branch(cpu, bus, taken);
        }
        Op::Bvc => {
            let taken = !cpu.registers.status.overflow;
            cycles += branch(cpu, bus, taken);
        }
        Op::Bvs => {
            let taken = cpu.registers.status.overflow;
            cycles += branch(cpu, bus, taken);
        }
        Op::Jmp => jmp(cpu, bus, entry.mode),
        Op::Jsr => jsr(cpu, bus),
        Op::Rts => rts(cpu, bus),
        Op::Rti => rti(cpu, bus),
        Op::Brk => brk(cpu, bus),
        Op::Pha => {
            bus.read(cpu.registers.pc);
            let value = cpu.registers.accumulator;
            push_stack(cpu, bus, value);
        }
        Op::Php => {
            bus.read(cpu.registers.pc);
            let value = cpu.registers.status.to_byte(StatusReadContext::PushStack);
            push_stack(cpu, bus, value);
        }
        Op::Pla => {
            bus.read(cpu.registers.pc);
            bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]));
            let value = pull_stack(cpu, bus);
            cpu.registers.accumulator = value;
            cpu.registers.status.set_negative(value.bit(7)).set_zero(value == 0);
        }
        Op::Plp => {
            bus.read(cpu.registers.pc);
            bus.read(u16::from_be_bytes([0x01, cpu.registers.sp]));
            let value = pull_stack(cpu, bus);
            cpu.registers.status = StatusFlags::from_byte(value);
        }
        Op::Kil => {
            // Jam: the CPU stops fetching until reset
            cpu.halted = true;
        }
    }

    cycles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testsupport::{BusAccess, RecordingBus};
    use crate::Mos6502;

    // Base costs from the published hardware tables; the executor adds
    // page-cross and taken-branch penalties on top of these.
    #[rustfmt::skip]
    const EXPECTED_BASE_CYCLES: [u8; 256] = [
        7, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 4, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 4, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        6, 6, 2, 8, 3, 3, 5, 5, 3, 2, 2, 2, 3, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        6, 6, 2, 8, 3, 3, 5, 5, 4, 2, 2, 2, 5, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4,
        2, 6, 2, 6, 4, 4, 4, 4, 2, 5, 2, 5, 5, 5, 5, 5,
        2, 6, 2, 6, 3, 3, 3, 3, 2, 2, 2, 2, 4, 4, 4, 4,
        2, 5, 2, 5, 4, 4, 4, 4, 2, 4, 2, 4, 4, 4, 4, 4,
        2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
        2, 6, 2, 8, 3, 3, 5, 5, 2, 2, 2, 2, 4, 4, 6, 6,
        2, 5, 2, 8, 4, 4, 6, 6, 2, 4, 2, 7, 4, 4, 7, 7,
    ];

    #[test]
    fn base_cycle_table_matches_hardware() {
        for opcode in 0_usize..256 {
            assert_eq!(
                OPCODE_TABLE[opcode].cycles, EXPECTED_BASE_CYCLES[opcode],
                "base cycles for opcode {opcode:02X}"
            );
        }
    }

    // With all registers zero and RAM zero-filled, no indexed access crosses
    // a page, so the consumed cycle count must equal the number of bus
    // accesses for every opcode. KIL is the one exception: it charges its
    // 2-cycle fetch cost but only performs the opcode read before jamming.
    #[test]
    fn every_cycle_is_a_bus_access() {
        for opcode in 0_u16..256 {
            let opcode = opcode as u8;

            let mut bus = RecordingBus::with_program(0x8000, &[opcode, 0x00, 0x00]);
            let mut cpu = Mos6502::new(&mut bus);
            bus.clear_log();

            let consumed = cpu.execute(&mut bus, 1);

            if OPCODE_TABLE[usize::from(opcode)].op == Operation::Kil {
                assert!(cpu.halted(), "opcode {opcode:02X} should jam");
                continue;
            }

            assert_eq!(
                consumed as usize,
                bus.accesses.len(),
                "cycles vs bus accesses for opcode {opcode:02X}"
            );
        }
    }

    fn run_one(program: &[u8], prep: impl FnOnce(&mut Mos6502, &mut RecordingBus)) -> (Mos6502, RecordingBus, u32) {
        let mut bus = RecordingBus::with_program(0x8000, program);
        let mut cpu = Mos6502::new(&mut bus);
        prep(&mut cpu, &mut bus);
        bus.clear_log();
        let consumed = cpu.execute(&mut bus, 1);
        (cpu, bus, consumed)
    }

    fn set_registers(cpu: &mut Mos6502, f: impl FnOnce(&mut crate::CpuRegisters)) {
        let mut registers = cpu.registers().clone();
        f(&mut registers);
        cpu.set_registers(registers);
    }

    #[test]
    fn branch_cycle_counts() {
        // Untaken: BEQ with Z clear
        let (_, _, consumed) = run_one(&[0xF0, 0x10], |_, _| {});
        assert_eq!(consumed, 2);

        // Taken, same page: BNE with Z clear
        let (cpu, _, consumed) = run_one(&[0xD0, 0x10], |_, _| {});
        assert_eq!(consumed, 3);
        assert_eq!(cpu.pc(), 0x8012);

        // Taken, negative offset, same page
        let (cpu, _, consumed) = run_one(&[0xD0, 0xFE], |_, _| {});
        assert_eq!(consumed, 3);
        assert_eq!(cpu.pc(), 0x8000);

        // Taken, page crossed: from $80FD the post-operand PC is $80FF and
        // +$10 lands on page $81
        let mut bus = RecordingBus::with_program(0x80FD, &[0xD0, 0x10]);
        let mut cpu = Mos6502::new(&mut bus);
        bus.clear_log();
        let consumed = cpu.execute(&mut bus, 1);
        assert_eq!(consumed, 4);
        assert_eq!(cpu.pc(), 0x810F);
        // The extra cycle is a dummy read at the un-carried address
        assert!(bus.accesses.contains(&BusAccess::Read(0x800F)));
    }

    #[test]
    fn zero_page_indexing_wraps() {
        // LDA $FF,X with X=2 reads $0001, not $0101
        let (cpu, _, _) = run_one(&[0xB5, 0xFF], |cpu, bus| {
            set_registers(cpu, |r| r.x = 2);
            bus.ram[0x0001] = 0x42;
            bus.ram[0x0101] = 0x99;
        });
        assert_eq!(cpu.registers().accumulator, 0x42);

        // LDA ($FF,X) with X=0 reads the pointer from $FF and $00
        let (cpu, _, _) = run_one(&[0xA1, 0xFF], |_, bus| {
            bus.ram[0x00FF] = 0x34;
            bus.ram[0x0000] = 0x12;
            bus.ram[0x1234] = 0x77;
        });
        assert_eq!(cpu.registers().accumulator, 0x77);
    }

    #[test]
    fn jmp_indirect_page_wrap_bug() {
        // JMP ($12FF) reads the high byte from $1200, not $1300
        let (cpu, _, consumed) = run_one(&[0x6C, 0xFF, 0x12], |_, bus| {
            bus.ram[0x12FF] = 0x00;
            bus.ram[0x1200] = 0x90;
            bus.ram[0x1300] = 0x66;
        });
        assert_eq!(consumed, 5);
        assert_eq!(cpu.pc(), 0x9000);
    }

    #[test]
    fn rmw_writes_unmodified_value_first() {
        let (_, bus, consumed) = run_one(&[0xE6, 0x10], |_, bus| {
            bus.ram[0x0010] = 0x41;
        });
        assert_eq!(consumed, 5);
        assert_eq!(bus.writes(), vec![(0x0010, 0x41), (0x0010, 0x42)]);
    }

    #[test]
    fn indexed_store_performs_dummy_read() {
        // STA $12FF,X with X=1: dummy read at $1200, write at $1300
        let (_, bus, consumed) = run_one(&[0x9D, 0xFF, 0x12], |cpu, _| {
            set_registers(cpu, |r| {
                r.accumulator = 0xAB;
                r.x = 1;
            });
        });
        assert_eq!(consumed, 5);
        assert_eq!(
            bus.accesses[3..],
            [BusAccess::Read(0x1200), BusAccess::Write(0x1300, 0xAB)]
        );
    }

    #[test]
    fn read_page_cross_costs_one_extra_cycle() {
        let (cpu, _, consumed) = run_one(&[0xB9, 0xFF, 0x12], |cpu, bus| {
            set_registers(cpu, |r| r.y = 1);
            bus.ram[0x1300] = 0x55;
        });
        assert_eq!(consumed, 5);
        assert_eq!(cpu.registers().accumulator, 0x55);

        let (cpu, _, consumed) = run_one(&[0xB9, 0xFE, 0x12], |cpu, bus| {
            set_registers(cpu, |r| r.y = 1);
            bus.ram[0x12FF] = 0x56;
        });
        assert_eq!(consumed, 4);
        assert_eq!(cpu.registers().accumulator, 0x56);
    }

    #[test]
    fn bcd_add_wraps_with_nmos_flags() {
        // 99 + 01 = 00 with carry out; Z comes from the binary sum (0x9A, so
        // clear) and N from the pre-adjustment intermediate (0xA0, so set)
        let mut flags = StatusFlags::new();
        let result = add_bcd(0x99, 0x01, &mut flags);
        assert_eq!(result, 0x00);
        assert!(flags.carry);
        assert!(!flags.zero);
        assert!(flags.negative);
    }

    #[test]
    fn bcd_add_basic_sums() {
        let mut flags = StatusFlags::new();
        assert_eq!(add_bcd(0x12, 0x34, &mut flags), 0x46);
        assert!(!flags.carry);

        flags.set_carry(true);
        assert_eq!(add_bcd(0x58, 0x46, &mut flags), 0x05);
        assert!(flags.carry);
    }

    #[test]
    fn bcd_subtract_flags_are_binary() {
        // 00 - 01 = 99 decimal, but C/N/Z/V come from the binary 00 - 01
        let mut flags = StatusFlags::new();
        flags.set_carry(true);
        let result = subtract_bcd(0x00, 0x01, &mut flags);
        assert_eq!(result, 0x99);
        assert!(!flags.carry);
        assert!(flags.negative);
        assert!(!flags.zero);

        flags.set_carry(true);
        assert_eq!(subtract_bcd(0x46, 0x12, &mut flags), 0x34);
        assert!(flags.carry);
    }

    #[test]
    fn decimal_mode_applies_to_adc_and_sbc() {
        // SED; LDA #$19; ADC #$01 -> $20
        let mut bus = RecordingBus::with_program(0x8000, &[0xF8, 0xA9, 0x19, 0x69, 0x01]);
        let mut cpu = Mos6502::new(&mut bus);
        cpu.execute(&mut bus, 6);
        assert_eq!(cpu.registers().accumulator, 0x20);
    }

    #[test]
    fn lax_loads_a_and_x() {
        let (cpu, _, _) = run_one(&[0xA7, 0x10], |_, bus| {
            bus.ram[0x0010] = 0x8F;
        });
        assert_eq!(cpu.registers().accumulator, 0x8F);
        assert_eq!(cpu.registers().x, 0x8F);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn sax_stores_a_and_x() {
        let (_, bus, _) = run_one(&[0x87, 0x10], |cpu, _| {
            set_registers(cpu, |r| {
                r.accumulator = 0xF0;
                r.x = 0x3C;
            });
        });
        assert_eq!(bus.ram[0x0010], 0x30);
    }

    #[test]
    fn dcp_decrements_then_compares() {
        let (cpu, bus, _) = run_one(&[0xC7, 0x10], |_, bus| {
            bus.ram[0x0010] = 0x01;
        });
        assert_eq!(bus.ram[0x0010], 0x00);
        assert!(cpu.registers().status.zero);
        assert!(cpu.registers().status.carry);
    }

    #[test]
    fn anc_copies_result_sign_into_carry() {
        let (cpu, _, _) = run_one(&[0x0B, 0xF0], |cpu, _| {
            set_registers(cpu, |r| r.accumulator = 0xF0);
        });
        assert_eq!(cpu.registers().accumulator, 0xF0);
        assert!(cpu.registers().status.negative);
        assert!(cpu.registers().status.carry);
    }

    #[test]
    fn asr_ands_then_shifts() {
        let (cpu, _, _) = run_one(&[0x4B, 0x03], |cpu, _| {
            set_registers(cpu, |r| r.accumulator = 0x03);
        });
        assert_eq!(cpu.registers().accumulator, 0x01);
        assert!(cpu.registers().status.carry);
    }

    #[test]
    fn arr_sets_carry_and_overflow_from_rotated_result() {
        let (cpu, _, _) = run_one(&[0x6B, 0xFF], |cpu, _| {
            set_registers(cpu, |r| {
                r.accumulator = 0xFF;
                r.status.set_carry(true);
            });
        });
        assert_eq!(cpu.registers().accumulator, 0xFF);
        assert!(cpu.registers().status.carry);
        assert!(!cpu.registers().status.overflow);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn arr_decimal_mode_applies_low_nibble_fixup() {
        // SED; LDA #$05; SEC; ARR #$05: the rotated value $82 has its low
        // nibble adjusted to $88 because (t & $0F) + (t & $01) exceeds 5;
        // the high nibble of t is 0 so no carry comes out
        let mut bus =
            RecordingBus::with_program(0x8000, &[0xF8, 0xA9, 0x05, 0x38, 0x6B, 0x05]);
        let mut cpu = Mos6502::new(&mut bus);
        cpu.execute(&mut bus, 8);

        assert_eq!(cpu.registers().accumulator, 0x88);
        assert!(!cpu.registers().status.carry);
        // N copies the carry that rotated in
        assert!(cpu.registers().status.negative);
        assert!(!cpu.registers().status.overflow);
    }

    #[test]
    fn arr_decimal_mode_high_nibble_fixup_sets_carry() {
        // t = $60: the high nibble calls for the +$60 fixup, so $30 becomes
        // $90 with carry set
        let mut registers = crate::CpuRegisters {
            accumulator: 0x60,
            x: 0,
            y: 0,
            status: StatusFlags::new(),
            pc: 0,
            sp: 0xFD,
            indirect_bank: 0,
        };
        registers.status.decimal = true;

        and_with_rotate_right(&mut registers, 0xFF);

        assert_eq!(registers.accumulator, 0x90);
        assert!(registers.status.carry);
        assert!(!registers.status.negative);
    }

    #[test]
    fn bcd_add_handles_invalid_digits() {
        // $0F + $0F is not valid BCD; the NMOS adder still runs the nibble
        // adjustments and produces $14 with no carry
        let mut flags = StatusFlags::new();
        let result = add_bcd(0x0F, 0x0F, &mut flags);
        assert_eq!(result, 0x14);
        assert!(!flags.carry);
        assert!(!flags.zero);
        assert!(!flags.negative);

        // $99 + $99 = $98 with carry out
        let mut flags = StatusFlags::new();
        let result = add_bcd(0x99, 0x99, &mut flags);
        assert_eq!(result, 0x98);
        assert!(flags.carry);
    }

    #[test]
    fn branch_timing_for_every_branch_opcode() {
        fn run_branch(
            opcode: u8,
            origin: u16,
            set_flags: fn(&mut StatusFlags, bool),
            taken: bool,
        ) -> (u32, u16) {
            let mut bus = RecordingBus::with_program(origin, &[opcode, 0x10]);
            let mut cpu = Mos6502::new(&mut bus);
            set_registers(&mut cpu, |r| set_flags(&mut r.status, taken));
            bus.clear_log();
            let consumed = cpu.execute(&mut bus, 1);
            (consumed, cpu.pc())
        }

        // (opcode, how to force the branch taken or untaken)
        let cases: [(u8, fn(&mut StatusFlags, bool)); 8] = [
            (0x10, |f, taken| {
                f.set_negative(!taken);
            }),
            (0x30, |f, taken| {
                f.set_negative(taken);
            }),
            (0x50, |f, taken| {
                f.set_overflow(!taken);
            }),
            (0x70, |f, taken| {
                f.set_overflow(taken);
            }),
            (0x90, |f, taken| {
                f.set_carry(!taken);
            }),
            (0xB0, |f, taken| {
                f.set_carry(taken);
            }),
            (0xD0, |f, taken| {
                f.set_zero(!taken);
            }),
            (0xF0, |f, taken| {
                f.set_zero(taken);
            }),
        ];

        for (opcode, set_flags) in cases {
            assert_eq!(
                run_branch(opcode, 0x8000, set_flags, false),
                (2, 0x8002),
                "untaken, opcode {opcode:02X}"
            );
            assert_eq!(
                run_branch(opcode, 0x8000, set_flags, true),
                (3, 0x8012),
                "taken same page, opcode {opcode:02X}"
            );
            // From $80FD the post-operand PC is $80FF, so +$10 crosses
            assert_eq!(
                run_branch(opcode, 0x80FD, set_flags, true),
                (4, 0x810F),
                "taken with page cross, opcode {opcode:02X}"
            );
        }
    }

    #[test]
    fn oal_ors_with_ee_before_masking() {
        let (cpu, _, _) = run_one(&[0xAB, 0xAA], |cpu, _| {
            set_registers(cpu, |r| r.accumulator = 0x00);
        });
        assert_eq!(cpu.registers().accumulator, 0xAA);
        assert_eq!(cpu.registers().x, 0xAA);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn asx_subtracts_from_a_and_x_without_borrow() {
        let (cpu, _, _) = run_one(&[0xCB, 0x01], |cpu, _| {
            set_registers(cpu, |r| {
                r.accumulator = 0xF0;
                r.x = 0x0F;
            });
        });
        assert_eq!(cpu.registers().x, 0xFF);
        assert!(!cpu.registers().status.carry);
        assert!(cpu.registers().status.negative);
    }

    #[test]
    fn ast_masks_a_x_and_sp_with_stack_pointer() {
        let (cpu, _, _) = run_one(&[0xBB, 0x00, 0x30], |cpu, bus| {
            set_registers(cpu, |r| r.sp = 0x7F);
            bus.ram[0x3000] = 0x35;
        });
        assert_eq!(cpu.registers().accumulator, 0x35);
        assert_eq!(cpu.registers().x, 0x35);
        assert_eq!(cpu.registers().sp, 0x35);
    }

    #[test]
    fn unstable_store_masks_with_high_byte_plus_one() {
        // SYH $1210,X with no page cross: Y & ($12 + 1) stored at $1210
        let (_, bus, consumed) = run_one(&[0x9C, 0x10, 0x12], |cpu, _| {
            set_registers(cpu, |r| r.y = 0x55);
        });
        assert_eq!(consumed, 5);
        assert_eq!(bus.ram[0x1210], 0x55 & 0x13);
    }

    #[test]
    fn unstable_store_corrupts_high_byte_on_page_cross() {
        // SYH $1210,X with X=$F1 crosses into page $13; the corrupted value
        // ($55 & $13 = $11) replaces the high byte, so the write lands at
        // $1101 instead of $1301
        let (_, bus, _) = run_one(&[0x9C, 0x10, 0x12], |cpu, _| {
            set_registers(cpu, |r| {
                r.y = 0x55;
                r.x = 0xF1;
            });
        });
        assert_eq!(bus.ram[0x1101], 0x11);
        assert_eq!(bus.ram[0x1301], 0x00);
    }

    #[test]
    fn ssh_copies_a_and_x_into_sp() {
        let (cpu, bus, _) = run_one(&[0x9B, 0x00, 0x20], |cpu, _| {
            set_registers(cpu, |r| {
                r.accumulator = 0x73;
                r.x = 0x37;
            });
        });
        assert_eq!(cpu.registers().sp, 0x33);
        assert_eq!(bus.ram[0x2000], 0x33 & 0x21);
    }

    #[test]
    fn php_pushes_b_and_bit5_set() {
        let (cpu, bus, _) = run_one(&[0x08], |_, _| {});
        assert_eq!(cpu.registers().sp, 0xFC);
        // I is set out of reset; B and bit 5 read as 1 in the pushed copy
        assert_eq!(bus.ram[0x01FD], 0x34);
    }

    #[test]
    fn jsr_pushes_address_of_last_operand_byte() {
        let (cpu, bus, consumed) = run_one(&[0x20, 0x00, 0x90], |_, _| {});
        assert_eq!(consumed, 6);
        assert_eq!(cpu.pc(), 0x9000);
        assert_eq!(bus.ram[0x01FD], 0x80);
        assert_eq!(bus.ram[0x01FC], 0x02);
    }

    #[test]
    fn jsr_rts_round_trip() {
        let mut bus = RecordingBus::with_program(0x8000, &[0x20, 0x00, 0x90]);
        bus.ram[0x9000] = 0x60;
        let mut cpu = Mos6502::new(&mut bus);

        cpu.execute(&mut bus, 1);
        assert_eq!(cpu.pc(), 0x9000);
        cpu.execute(&mut bus, 1);
        assert_eq!(cpu.pc(), 0x8003);
        assert_eq!(cpu.registers().sp, 0xFD);
    }
}
