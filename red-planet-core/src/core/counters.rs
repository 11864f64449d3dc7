use space_time::allocator::Allocator;

use super::{Core, CsrReadResult, CsrWriteResult};
use crate::system_bus::SystemBus;

/// Collection of counter registers and associated read/write logic.
///
/// > RISC-V ISAs provide a set of up to 32×64-bit performance counters and timers that are
/// > accessible via unprivileged XLEN read-only CSR registers 0xC00–0xC1F (with the upper 32
/// > bits accessed via CSR registers 0xC80–0xC9F on RV32). The first three of these (CYCLE,
/// > TIME, and INSTRET) have dedicated functions (cycle count, real-time clock, and
/// > instructions-retired respectively), while the remaining counters, if implemented, provide
/// > programmable event counting.
///
/// > The RDCYCLE pseudoinstruction reads the low XLEN bits of the cycle CSR which holds a count
/// > of the number of clock cycles executed by the processor core on which the hart is running
/// > from an arbitrary start time in the past. The underlying 64-bit counter should never
/// > overflow in practice. The rate at which the cycle counter advances will depend on the
/// > implementation and operating environment.
///
/// > The RDTIME pseudoinstruction reads the low XLEN bits of the time CSR, which counts
/// > wall-clock real time that has passed from an arbitrary start time in the past. The
/// > underlying 64-bit counter should never overflow in practice.
///
/// > The RDINSTRET pseudoinstruction reads the low XLEN bits of the instret CSR, which counts
/// > the number of instructions retired by this hart from some arbitrary start point in the
/// > past. The underlying 64-bit counter should never overflow in practice.
///
/// > There is CSR space allocated for 29 additional unprivileged 64-bit hardware performance
/// > counters, hpmcounter3–hpmcounter31. These counters count platform-specific events and are
/// > configured via additional privileged registers. The number and width of these additional
/// > counters, and the set of events they count is platform-specific.
///
/// > The cycle, instret, and hpmcountern CSRs are read-only shadows of mcycle, minstret, and
/// > mhpmcountern, respectively. The time CSR is a read-only shadow of the memory-mapped mtime
/// > register.
///
/// On RV64, all of these counters are natively 64 bits wide, so (unlike RV32) no `*h` shadow CSR
/// is needed to read the upper half.
#[derive(Debug, Clone)]
pub struct Counters {
    mcycle: u64,
    minstret: u64,
    skip_next_mcycle_increment: bool,
    skip_next_minstret_increment: bool,
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}

impl Counters {
    pub fn new() -> Self {
        Self {
            // mcycle and minstret are reset to an arbitrary value
            mcycle: 0,
            minstret: 0,
            skip_next_mcycle_increment: false,
            skip_next_minstret_increment: false,
        }
    }

    pub(super) fn increment_cycle(&mut self) {
        if self.skip_next_mcycle_increment {
            self.skip_next_mcycle_increment = false;
            return;
        }
        self.mcycle = self.mcycle.wrapping_add(1);
    }

    pub(super) fn increment_instret(&mut self) {
        if self.skip_next_minstret_increment {
            self.skip_next_minstret_increment = false;
            return;
        }
        self.minstret = self.minstret.wrapping_add(1);
    }

    pub fn read_cycle(&self) -> u64 {
        self.read_mcycle()
    }

    pub fn read_instret(&self) -> u64 {
        self.read_minstret()
    }

    pub fn read_hpmcounter(&self, n: u8) -> u64 {
        self.read_mhpmcounter(n)
    }

    pub fn read_mcycle(&self) -> u64 {
        self.mcycle
    }

    pub fn write_mcycle(&mut self, value: u64, mask: u64) {
        self.mcycle = self.mcycle & !mask | value & mask;
        self.skip_next_mcycle_increment = true;
    }

    pub fn read_minstret(&self) -> u64 {
        self.minstret
    }

    pub fn write_minstret(&mut self, value: u64, mask: u64) {
        self.minstret = self.minstret & !mask | value & mask;
        self.skip_next_minstret_increment = true;
    }

    pub fn read_mhpmcounter(&self, n: u8) -> u64 {
        if !(3..=31).contains(&n) {
            panic!("invalid hpm counter number: {n}");
        }
        0
    }

    pub fn write_mhpmcounter(&self, n: u8, value: u64, mask: u64) {
        if !(3..=31).contains(&n) {
            panic!("invalid hpm counter number: {n}");
        }
        // Writes are ignored
        let _ = value;
        let _ = mask;
    }

    pub fn read_mhpmevent(&self, n: u8) -> u64 {
        if !(3..=31).contains(&n) {
            panic!("invalid hpm event number: {n}");
        }
        0
    }

    pub fn write_mhpmevent(&self, n: u8, value: u64, mask: u64) {
        if !(3..=31).contains(&n) {
            panic!("invalid hpm event number: {n}");
        }
        // Writes are ignored
        let _ = value;
        let _ = mask;
    }
}

impl<A: Allocator, B: SystemBus<A>> Core<A, B> {
    pub fn read_cycle(&self, allocator: &mut A) -> CsrReadResult {
        Ok(self.counters.get(allocator).read_cycle())
    }

    pub fn read_instret(&self, allocator: &mut A) -> CsrReadResult {
        Ok(self.counters.get(allocator).read_instret())
    }

    pub fn read_hpmcounter(&self, allocator: &mut A, n: u8) -> CsrReadResult {
        Ok(self.counters.get(allocator).read_hpmcounter(n))
    }

    pub fn read_mcycle(&self, allocator: &mut A) -> CsrReadResult {
        Ok(self.counters.get(allocator).read_mcycle())
    }

    pub fn write_mcycle(&self, allocator: &mut A, value: u64, mask: u64) -> CsrWriteResult {
        self.counters.get_mut(allocator).write_mcycle(value, mask);
        Ok(())
    }

    pub fn read_minstret(&self, allocator: &mut A) -> CsrReadResult {
        Ok(self.counters.get(allocator).read_minstret())
    }

    pub fn write_minstret(&self, allocator: &mut A, value: u64, mask: u64) -> CsrWriteResult {
        self.counters.get_mut(allocator).write_minstret(value, mask);
        Ok(())
    }

    pub fn read_mhpmcounter(&self, allocator: &mut A, n: u8) -> CsrReadResult {
        Ok(self.counters.get(allocator).read_mhpmcounter(n))
    }

    pub fn write_mhpmcounter(
        &self,
        allocator: &mut A,
        n: u8,
        value: u64,
        mask: u64,
    ) -> CsrWriteResult {
        self.counters.get(allocator).write_mhpmcounter(n, value, mask);
        Ok(())
    }

    pub fn read_mhpmevent(&self, allocator: &mut A, n: u8) -> CsrReadResult {
        Ok(self.counters.get(allocator).read_mhpmevent(n))
    }

    pub fn write_mhpmevent(
        &self,
        allocator: &mut A,
        n: u8,
        value: u64,
        mask: u64,
    ) -> CsrWriteResult {
        self.counters.get(allocator).write_mhpmevent(n, value, mask);
        Ok(())
    }
}
