//! Drives the single-step JSON vector suites (one file per opcode; each
//! case carries an initial state, the expected final state, and the exact
//! bus trace) against the interpreter core.
//!
//! `--banked` routes the same vectors through the 6509 core, with the
//! bank-qualified pointer fetches serviced from the same flat memory; the
//! traces must come out identical, which pins down that the banking hook is
//! transparent when the bank registers and memory agree.

use anyhow::{bail, Context};
use clap::Parser;
use env_logger::Env;
use mos650x_emu::bus::BusInterface;
use mos650x_emu::{
    BankedVectorFetch, CpuRegisters, DirectVectorFetch, IndirectVectorFetch, Mos650x,
    StatusFlags, StatusReadContext,
};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TraceStep {
    Read(u16, u8),
    Write(u16, u8),
}

/// 64 KiB flat memory that records the access trace. Bank-qualified reads
/// land in the same memory so the 6509 core sees the flat address space the
/// vectors assume.
struct VectorBus {
    memory: Vec<u8>,
    trace: Vec<TraceStep>,
}

impl VectorBus {
    fn new() -> Self {
        Self { memory: vec![0; 0x10000], trace: Vec::new() }
    }

    fn load(&mut self, cells: &[(u16, u8)]) {
        self.memory.fill(0);
        self.trace.clear();
        for &(address, value) in cells {
            self.memory[usize::from(address)] = value;
        }
    }
}

impl BusInterface for VectorBus {
    #[inline]
    fn read(&mut self, address: u16) -> u8 {
        let value = self.memory[usize::from(address)];
        self.trace.push(TraceStep::Read(address, value));
        value
    }

    #[inline]
    fn write(&mut self, address: u16, value: u8) {
        self.memory[usize::from(address)] = value;
        self.trace.push(TraceStep::Write(address, value));
    }

    #[inline]
    fn read_banked(&mut self, _bank: u8, address: u16) -> u8 {
        self.read(address)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct CpuState {
    pc: u16,
    s: u8,
    a: u8,
    x: u8,
    y: u8,
    p: u8,
    ram: Vec<(u16, u8)>,
}

#[derive(Debug, Clone, Deserialize)]
struct TraceEntry(u16, u8, String);

impl TraceEntry {
    fn decode(&self) -> anyhow::Result<TraceStep> {
        match self.2.as_str() {
            "read" => Ok(TraceStep::Read(self.0, self.1)),
            "write" => Ok(TraceStep::Write(self.0, self.1)),
            kind => bail!("unknown bus cycle kind '{kind}'"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TestCase {
    name: String,
    initial: CpuState,
    #[serde(rename = "final")]
    expected: CpuState,
    cycles: Vec<TraceEntry>,
}

#[derive(Debug, Default)]
struct Totals {
    passed: u64,
    failed: u64,
    jammed: u64,
}

#[derive(Debug, Parser)]
struct Args {
    /// Directory containing the per-opcode JSON files (00.json .. ff.json)
    #[arg(long, short = 'd')]
    dir_path: PathBuf,

    /// Run the vectors through the 6509 core with banked pointer fetches
    #[arg(long)]
    banked: bool,

    /// Only run the file for this opcode (hex, e.g. 6b)
    #[arg(long)]
    opcode: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let opcodes: Vec<u8> = match &args.opcode {
        Some(hex) => {
            vec![u8::from_str_radix(hex, 16).with_context(|| format!("invalid opcode '{hex}'"))?]
        }
        None => (0x00..=0xFF).collect(),
    };

    let totals = if args.banked {
        run_suite::<BankedVectorFetch>(&args.dir_path, &opcodes)?
    } else {
        run_suite::<DirectVectorFetch>(&args.dir_path, &opcodes)?
    };

    log::info!(
        "{} cases passed, {} failed, {} jam cases skipped",
        totals.passed,
        totals.failed,
        totals.jammed
    );
    if totals.failed != 0 {
        bail!("{} test cases failed", totals.failed);
    }
    Ok(())
}

fn run_suite<F: IndirectVectorFetch>(dir: &Path, opcodes: &[u8]) -> anyhow::Result<Totals> {
    let mut bus = VectorBus::new();
    let mut totals = Totals::default();

    for &opcode in opcodes {
        let path = dir.join(format!("{opcode:02x}.json"));
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let cases: Vec<TestCase> = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("parsing {}", path.display()))?;

        let case_count = cases.len();
        let mut failed_here = 0_u64;
        for case in &cases {
            match run_case::<F>(&mut bus, case)? {
                CaseOutcome::Jammed => totals.jammed += 1,
                CaseOutcome::Mismatches(mismatches) if mismatches.is_empty() => {
                    totals.passed += 1;
                }
                CaseOutcome::Mismatches(mismatches) => {
                    failed_here += 1;
                    totals.failed += 1;
                    for mismatch in mismatches {
                        log::debug!("[{}] {mismatch}", case.name);
                    }
                }
            }
        }

        if failed_here != 0 {
            log::error!("opcode {opcode:02X}: {failed_here}/{case_count} cases failed");
        }
    }

    Ok(totals)
}

enum CaseOutcome {
    /// KIL case; the vectors only pin down that the CPU stops
    Jammed,
    Mismatches(Vec<String>),
}

fn run_case<F: IndirectVectorFetch>(
    bus: &mut VectorBus,
    case: &TestCase,
) -> anyhow::Result<CaseOutcome> {
    bus.load(&case.initial.ram);

    let mut cpu = Mos650x::<F>::new(bus);
    cpu.set_registers(CpuRegisters {
        accumulator: case.initial.a,
        x: case.initial.x,
        y: case.initial.y,
        status: StatusFlags::from_byte(case.initial.p),
        pc: case.initial.pc,
        sp: case.initial.s,
        indirect_bank: 0,
    });

    bus.trace.clear();
    cpu.execute(bus, 1);
    if cpu.halted() {
        return Ok(CaseOutcome::Jammed);
    }

    let mut mismatches = Vec::new();
    let expected = &case.expected;

    for &(address, value) in &expected.ram {
        let actual = bus.memory[usize::from(address)];
        if actual != value {
            mismatches
                .push(format!("memory {address:04X}: expected {value:02X}, got {actual:02X}"));
        }
    }

    let registers = cpu.registers();
    let register_pairs = [
        ("A", expected.a, registers.accumulator),
        ("X", expected.x, registers.x),
        ("Y", expected.y, registers.y),
        ("S", expected.s, registers.sp),
        // The vectors leave B unspecified; compare with it forced on
        ("P", expected.p | 0x10, registers.status.to_byte(StatusReadContext::Brk) | 0x10),
    ];
    for (name, want, got) in register_pairs {
        if want != got {
            mismatches.push(format!("{name}: expected {want:02X}, got {got:02X}"));
        }
    }
    if registers.pc != expected.pc {
        mismatches
            .push(format!("PC: expected {:04X}, got {:04X}", expected.pc, registers.pc));
    }

    let expected_trace =
        case.cycles.iter().map(TraceEntry::decode).collect::<anyhow::Result<Vec<_>>>()?;
    if expected_trace.len() != bus.trace.len() {
        mismatches.push(format!(
            "trace length: expected {}, got {}",
            expected_trace.len(),
            bus.trace.len()
        ));
    } else if let Some(i) =
        (0..expected_trace.len()).find(|&i| expected_trace[i] != bus.trace[i])
    {
        mismatches.push(format!(
            "trace step {i}: expected {:?}, got {:?}",
            expected_trace[i], bus.trace[i]
        ));
    }

    Ok(CaseOutcome::Mismatches(mismatches))
}
