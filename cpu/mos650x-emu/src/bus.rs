//! The memory bus as seen by the CPU core.
//!
//! Reads and writes can have side effects (memory-mapped I/O, sound latches
//! that raise interrupts, PPU registers), so the core calls these methods in
//! the exact order and count that the silicon performs its bus accesses,
//! dummy accesses included.

pub trait BusInterface {
    fn read(&mut self, address: u16) -> u8;

    fn write(&mut self, address: u16, value: u8);

    /// Bank-qualified read, used by the 6509 when fetching the two pointer
    /// bytes of `(zp,X)`/`(zp),Y` addressing through its indirect bank
    /// register. Hosts without banked memory can ignore the bank, which is
    /// what the default implementation does.
    #[inline]
    fn read_banked(&mut self, bank: u8, address: u16) -> u8 {
        let _ = bank;
        self.read(address)
    }
}
