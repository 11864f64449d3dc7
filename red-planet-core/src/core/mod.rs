//! Provides a simulatable RV64GC core implementation.

mod control;
mod counters;
pub mod csr;
mod execute;
mod interrupts;
mod mconfig;
pub mod mmu;
mod status;
#[cfg(test)]
mod test_support;
mod trap;

use crate::core::mmu::MemoryError;
use crate::instruction::{
    AmoOp, AmoWidth, BranchCondition, CsrOp, FLoadWidth, FStoreWidth, Instruction, LoadWidth,
    RegImmOp, RegRegOp, RegRegOp32, RegShiftImmOp, RegShiftImmOp32, StoreWidth,
};
use crate::registers::Registers;
use crate::simulator::Simulatable;
use crate::system_bus::SystemBus;
use crate::{Allocated, Allocator, Endianness, PrivilegeLevel, RawPrivilegeLevel};
use control::Control;
use counters::Counters;
use execute::Executor;
pub use interrupts::{ExternalInterruptCallback, ExternalInterruptLine, MachineSoftwareInterruptLine};
use interrupts::Interrupts;
use mconfig::Mconfig;
use mmu::Mmu;
use status::Status;
use std::fmt::Debug;
use thiserror::Error;
use trap::{Trap, TrapCause, VectorMode};

pub use csr::CsrSpecifier;

#[derive(Debug, Clone)]
pub struct Config {
    /// > The mhartid CSR is an MXLEN-bit read-only register containing the integer ID of the
    /// > hardware thread running the code. This register must be readable in any implementation.
    /// > Hart IDs might not necessarily be numbered contiguously in a multiprocessor system, but at
    /// > least one hart must have a hart ID of zero. Hart IDs must be unique within the execution
    /// > environment.
    pub hart_id: u32,
    /// Physical memory address of memory-mapped mtime control register.
    /// The register should be 64 bits wide, and the address must support reads of 8 bytes.
    ///
    /// Note that this address is accessed directly on the system bus, ignoring other configuration
    /// options such as [`Config::support_misaligned_memory_access`].
    pub mtime_address: u64,
    /// Physical memory address of memory-mapped mtimecmp control register.
    /// The register should be 64 bits wide, and the address must support reads of 8 bytes.
    ///
    /// Note that this address is accessed directly on the system bus, ignoring other configuration
    /// options such as [`Config::support_misaligned_memory_access`].
    pub mtimecmp_address: u64,
    /// If `true`, non-naturally-aligned memory accesses are supported.
    /// If `false`, they will generate an address-misaligned exception.
    pub support_misaligned_memory_access: bool,
    /// Address to which the core's PC register is reset.
    pub reset_vector: u64,
    /// Address of the handler for Non-Maskable Interrupts.
    pub nmi_vector: u64,
}

/// RISC-V core implementing the RV64GC ISA (RV64I + M + A + C, plus F/D load/store encodings and
/// Zicsr/Zifencei).
///
/// As we don't support hardware multithreading, every core always only has a single hart.
/// We therefore don't model RISC-V harts explicitly, but rather consider [`Core`] to be the whole
/// of a core with a single hart.
///
/// > A component is termed a core if it contains an independent instruction fetch unit.
/// > A RISC-V-compatible core might support multiple RISC-V-compatible hardware threads, or harts,
/// > through multithreading.
///
/// # RISC-V hart
///
/// > From the perspective of software running in a given execution environment, a hart is a
/// > resource that autonomously fetches and executes RISC-V instructions within that execution
/// > environment. In this respect, a hart behaves like a hardware thread resource even if
/// > time-multiplexed onto real hardware by the execution environment. Some EEIs support the
/// > creation and destruction of additional harts, for example, via environment calls to fork new
/// > harts.
///
/// > The execution environment is responsible for ensuring the eventual forward progress of each of
/// > its harts. For a given hart, that responsibility is suspended while the hart is exercising a
/// > mechanism that explicitly waits for an event, such as the wait-for-interrupt instruction
/// > defined in Volume II of this specification; and that responsibility ends if the hart is
/// > terminated. The following events constitute forward progress:
/// >
/// > - The retirement of an instruction.
/// > - A trap, as defined in Section 1.6.
/// > - Any other event defined by an extension to constitute forward progress.
///
/// # Control and Status Registers
///
/// This structure also contains the CSRs as per the Zicsr extension.
///
/// > RISC-V defines a separate address space of 4096 Control and Status registers associated with
/// > each hart.
///
/// > The standard RISC-V ISA sets aside a 12-bit encoding space (csr\[11:0]) for up to 4,096 CSRs.
/// > By convention, the upper 4 bits of the CSR address (csr\[11:8]) are used to encode the read
/// > and write accessibility of the CSRs according to privilege level as shown in Table 2.1. The
/// > top two bits (csr\[11:10]) indicate whether the register is read/write (00, 01, or 10) or
/// > read-only (11). The next two bits (csr\[9:8]) encode the lowest privilege level that can
/// > access the CSR.
#[derive(Debug)]
pub struct Core<A: Allocator, B: SystemBus<A>> {
    /// Configuration options for this core. See [`Config`].
    config: Config,
    /// The system bus used via which physical memory is accessed by this core.
    system_bus: B,
    /// General purpose registers: x, f, and pc registers.
    registers: Allocated<A, Registers>,
    /// The core's current privilege mode.
    ///
    /// Allocated separately, because this is updated independently of other registers.
    privilege_mode: Allocated<A, PrivilegeLevel>,
    /// Status (mstatus/sstatus) registers.
    ///
    /// Allocated separately, because these are often mutated independently of other registers.
    status: Allocated<A, Status>,
    /// All CSR counter registers.
    ///
    /// Allocated together, since most of them will be updated simultaneously.
    counters: Allocated<A, Counters>,
    trap: Allocated<A, Trap>,
    control: Allocated<A, Control>,
    mconfig: Allocated<A, Mconfig>,
    /// mip/mie/mideleg and the SEIP bookkeeping. See [`interrupts::Interrupts`].
    interrupts: Allocated<A, Interrupts>,
    /// Address reserved by the most recent `LR.W`/`LR.D`, or `None` if there is no live
    /// reservation. Consumed (and cleared) by a matching `SC.W`/`SC.D`; also cleared by any trap.
    reservation: Allocated<A, Option<u64>>,
}

impl<A: Allocator, B: SystemBus<A>> Core<A, B> {
    /// The misa CSR is set to indicate that MXL=64 and that extensions I, M, A, C, F, D, S, and U
    /// are supported.
    ///
    /// > The misa CSR is a WARL read-write register reporting the ISA supported by the hart. This
    /// > register must be readable in any implementation, but a value of zero can be returned to
    /// > indicate the misa register has not been implemented, requiring that CPU capabilities be
    /// > determined through a separate non-standard mechanism.
    ///
    /// > The MXL (Machine XLEN) field encodes the native base integer ISA width as shown in Table
    /// > 3.1. The MXL field may be writable in implementations that support multiple base ISAs.
    /// > The effective XLEN in M-mode, MXLEN, is given by the setting of MXL, or has a fixed value
    /// > if misa is zero. The MXL field is always set to the widest supported ISA variant at reset.
    ///
    /// > Table 3.1: Encoding of MXL field in misa.
    /// > | MXL | XLEN |
    /// > | ---:| ----:|
    /// > |   1 |   32 |
    /// > |   2 |   64 |
    /// > |   3 |  128 |
    pub const MISA: u64 = (2u64 << 62) // MXL = 2 (XLEN = 64)
        | (1 << (b'A' - b'A')) // A
        | (1 << (b'C' - b'A')) // C
        | (1 << (b'D' - b'A')) // D
        | (1 << (b'F' - b'A')) // F
        | (1 << (b'I' - b'A')) // I
        | (1 << (b'M' - b'A')) // M
        | (1 << (b'S' - b'A')) // S
        | (1 << (b'U' - b'A')); // U
    /// The mvendorid CSR is set to 0 to indicate this is a non-commercial implementation.
    ///
    /// > The mvendorid CSR is a 32-bit read-only register providing the JEDEC manufacturer ID of
    /// > the provider of the core. This register must be readable in any implementation, but a
    /// > value of 0 can be returned to indicate the field is not implemented or that this is a
    /// > non-commercial implementation.
    pub const MVENDORID: u64 = 0;
    /// The marchid CSR is set to 0 to indicate it is not implemented.
    ///
    /// > The marchid CSR is an MXLEN-bit read-only register encoding the base microarchitecture of
    /// > the hart. This register must be readable in any implementation, but a value of 0 can be
    /// > returned to indicate the field is not implemented. The combination of mvendorid and
    /// > marchid should uniquely identify the type of hart microarchitecture that is implemented.
    pub const MARCHID: u64 = 0;
    /// The mimpid CSR is set to 0 to indicate it is not implemented.
    ///
    /// > The mimpid CSR provides a unique encoding of the version of the processor implementation.
    /// > This register must be readable in any implementation, but a value of 0 can be returned to
    /// > indicate that the field is not implemented. The Implementation value should reflect the
    /// > design of the RISC-V processor itself and not any surrounding system.
    pub const MIMPID: u64 = 0;
    /// The mconfigptr CSR is set to 0 to indicate the configuration data structure does not exists.
    ///
    /// > mconfigptr is an MXLEN-bit read-only CSR [...] that holds the physical address of a
    /// > configuration data structure. Software can traverse this data structure to discover
    /// > information about the harts, the platform, and their configuration.
    pub const MCONFIGPTR: u64 = 0;

    /// Allocates storage for the interrupt-pending/enabled state ([`Interrupts`]) ahead of
    /// constructing the [`Core`] itself.
    ///
    /// This is needed to wire up external interrupt sources (e.g. a PLIC, via
    /// [`ExternalInterruptCallback`]) into a board's system bus before the [`Core`] that owns that
    /// system bus can be built. Pass the returned handle to [`Core::new`].
    pub fn allocate_interrupts(allocator: &mut A) -> Allocated<A, Interrupts> {
        Allocated::new(allocator, Interrupts::new())
    }

    pub fn new(
        allocator: &mut A,
        system_bus: B,
        config: Config,
        interrupts: Allocated<A, Interrupts>,
    ) -> Self {
        let registers = Allocated::new(allocator, Registers::new(config.reset_vector));
        Self {
            config,
            system_bus,
            registers,
            trap: Allocated::new(allocator, Trap::new()),
            counters: Allocated::new(allocator, Counters::new()),
            status: Allocated::new(allocator, Status::new()),
            privilege_mode: Allocated::new(allocator, PrivilegeLevel::Machine),
            control: Allocated::new(allocator, Control::new()),
            mconfig: Allocated::new(allocator, Mconfig::new()),
            interrupts,
            reservation: Allocated::new(allocator, None),
        }
    }

    pub fn drop(self, allocator: &mut A) {
        self.registers.drop(allocator);
        self.privilege_mode.drop(allocator);
        self.status.drop(allocator);
        self.counters.drop(allocator);
        self.trap.drop(allocator);
        self.control.drop(allocator);
        self.mconfig.drop(allocator);
        self.interrupts.drop(allocator);
        self.reservation.drop(allocator);
    }

    /// Provide a read-only view of this core's configuration.
    ///
    /// It is not possible to modify the configuration after creation.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the Hart ID that was assigned to this core's single Hart.
    pub fn hart_id(&self) -> u32 {
        self.config.hart_id
    }

    /// Returns the current privilege mode.
    ///
    /// Note that loads and stores execute at the
    /// [`effective_privilege_mode`](Self::effective_privilege_mode).
    ///
    /// See also [`PrivilegeLevel`].
    pub fn privilege_mode(&self, allocator: &A) -> PrivilegeLevel {
        *self.privilege_mode.get(allocator)
    }

    /// Returns the current *effective privilege mode*. This is the privilege level at which load
    /// and stores execute (but not instruction fetches).
    ///
    /// See [`privilege_mode`](Self::privilege_mode) for the privilege mode used for all other
    /// operations.
    ///
    /// See also [`PrivilegeLevel`].
    pub fn effective_privilege_mode(&self, allocator: &A) -> PrivilegeLevel {
        let status = self.status.get(allocator);
        match status.mprv() {
            true => status.mpp(),
            false => *self.privilege_mode.get(allocator),
        }
    }

    /// Returns the endianness of the core for the given privilege mode.
    pub fn endianness(&self, allocator: &A, privilege_mode: PrivilegeLevel) -> Endianness {
        let status = self.status.get(allocator);
        let be = match privilege_mode {
            PrivilegeLevel::User => status.ube(),
            PrivilegeLevel::Supervisor => status.sbe(),
            PrivilegeLevel::Machine => status.mbe(),
        };
        match be {
            true => Endianness::BE,
            false => Endianness::LE,
        }
    }

    /// Provides immutable access to the general purpose (x, f) registers, and the pc register.
    pub fn registers<'a>(&self, allocator: &'a A) -> &'a Registers {
        self.registers.get(allocator)
    }

    /// Provides mutable access to the general purpose (x, f) registers, and the pc register.
    pub fn registers_mut<'a>(&self, allocator: &'a mut A) -> &'a mut Registers {
        self.registers.get_mut(allocator)
    }

    /// Generate a Reset.
    pub fn reset(&self, allocator: &mut A) {
        *self.registers.get_mut(allocator) = Registers::new(self.config.reset_vector);
        self.trap.get_mut(allocator).mcause.set_exception(None);
        self.trap.get_mut(allocator).clear_halted();
        *self.counters.get_mut(allocator) = Counters::new();
        let status = self.status.get_mut(allocator);
        status.set_mie(false);
        status.set_mprv(false);
        status.set_mbe(false);
        *self.privilege_mode.get_mut(allocator) = PrivilegeLevel::Machine;
        *self.control.get_mut(allocator) = Control::new();
        *self.mconfig.get_mut(allocator) = Mconfig::new();
        *self.reservation.get_mut(allocator) = None;
    }

    /// Returns the address reserved by the most recent `LR`, if its reservation is still live.
    pub fn reservation(&self, allocator: &A) -> Option<u64> {
        *self.reservation.get(allocator)
    }

    /// Records a reservation on `address`, as performed by `LR.W`/`LR.D`.
    pub(super) fn set_reservation(&self, allocator: &mut A, address: u64) {
        *self.reservation.get_mut(allocator) = Some(address);
    }

    /// Clears any live reservation. Performed unconditionally by a `SC.W`/`SC.D` (whether it
    /// succeeds or fails) and by any trap.
    pub(super) fn clear_reservation(&self, allocator: &mut A) {
        *self.reservation.get_mut(allocator) = None;
    }

    /// Returns `true` once this hart has taken a [`TrapOutcome::Fatal`] exception. A halted hart
    /// no longer makes forward progress: [`Self::step`] becomes a no-op until [`Self::reset`].
    pub fn is_halted(&self, allocator: &A) -> bool {
        self.trap.get(allocator).is_halted()
    }

    /// Generate a Non-Maskable Interrupt.
    pub fn nmi(&self, allocator: &mut A) {
        let pc = self.registers.get_mut(allocator).pc_mut();
        let old_pc = std::mem::replace(pc, self.config.nmi_vector);
        let trap = self.trap.get_mut(allocator);
        trap.write_mepc(old_pc, u64::MAX);
        trap.mcause.set_interrupt(None);
        *self.privilege_mode.get_mut(allocator) = PrivilegeLevel::Machine;
    }

    /// Read the value of a CSR by its specifier.
    ///
    /// `privilege_level` indicates at what privilege level the read is performed. If the CSR that
    /// is being read requires a higher privilege level (see
    /// [`csr::required_privilege_level`]), then an [`CsrAccessError::Privileged`] will be
    /// given.
    pub fn read_csr(
        &self,
        allocator: &mut A,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<u64, CsrAccessError> {
        self.check_csr_access(allocator, specifier, privilege_level)?;
        match specifier {
            //
            // Machine info registers
            //
            csr::MISA => Ok(Self::MISA),
            csr::MVENDORID => Ok(Self::MVENDORID),
            csr::MARCHID => Ok(Self::MARCHID),
            csr::MIMPID => Ok(Self::MIMPID),
            csr::MCONFIGPTR => Ok(Self::MCONFIGPTR),
            csr::MHARTID => Ok(self.config.hart_id as u64),
            //
            // Status registers
            //
            csr::MSTATUS => self.read_mstatus(allocator),
            csr::SSTATUS => self.read_sstatus(allocator),
            //
            // Machine trap handling
            //
            csr::MSCRATCH => Ok(self.trap.get(allocator).read_mscratch()),
            csr::MEPC => Ok(self.trap.get(allocator).read_mepc()),
            csr::MCAUSE => Ok(self.trap.get(allocator).mcause.read()),
            csr::MTVAL => Ok(self.trap.get(allocator).read_mtval()),
            csr::MIDELEG => self.read_mideleg(allocator),
            csr::MIE => self.read_mie(allocator),
            csr::MIP => self.read_mip(allocator),
            csr::MTINST => Ok(self.trap.get(allocator).read_mtinst()),
            csr::MTVAL2 => Ok(self.trap.get(allocator).read_mtval2()),
            //
            // Supervisor trap handling
            //
            csr::SSCRATCH => Ok(self.trap.get(allocator).read_sscratch()),
            csr::SEPC => Ok(self.trap.get(allocator).read_sepc()),
            csr::SCAUSE => Ok(self.trap.get(allocator).scause.read()),
            csr::STVAL => Ok(self.trap.get(allocator).read_stval()),
            csr::SIE => self.read_sie(allocator),
            csr::SIP => self.read_sip(allocator),
            //
            // Supervisor protection and translation
            //
            csr::SATP => Ok(self.trap.get(allocator).read_satp()),
            //
            // Counter registers
            //
            csr::CYCLE => self.read_cycle(allocator),
            csr::MCYCLE => self.read_mcycle(allocator),
            csr::INSTRET => self.read_instret(allocator),
            csr::MINSTRET => self.read_minstret(allocator),
            csr::TIME => Ok(self.read_mtime(allocator)),
            csr::HPMCOUNTER3..=csr::HPMCOUNTER31 => {
                let offset = 3 + (specifier - csr::HPMCOUNTER3);
                self.read_hpmcounter(allocator, offset as u8)
            }
            csr::MHPMCOUNTER3..=csr::MHPMCOUNTER31 => {
                let offset = 3 + (specifier - csr::MHPMCOUNTER3);
                self.read_mhpmcounter(allocator, offset as u8)
            }
            //
            // Machine counter setup
            //
            csr::MHPMEVENT3..=csr::MHPMEVENT31 => {
                let offset = 3 + (specifier - csr::MHPMEVENT3);
                self.read_mhpmevent(allocator, offset as u8)
            }
            csr::MCOUNTINHIBIT => Ok(self.control.get(allocator).mcountinhibit.read()),
            //
            // Trap setup registers
            //
            csr::MTVEC => Ok(self.trap.get(allocator).mtvec.read()),
            csr::MEDELEG => Ok(self.trap.get(allocator).medeleg.read()),
            csr::MCOUNTEREN => Ok(self.control.get(allocator).mcounteren.read()),
            csr::STVEC => Ok(self.trap.get(allocator).stvec.read()),
            csr::SCOUNTEREN => Ok(self.control.get(allocator).scounteren.read()),
            //
            // Machine configuration registers
            //
            csr::MENVCFG => Ok(self.mconfig.get(allocator).read_menvcfg()),
            csr::SENVCFG => Ok(self.mconfig.get(allocator).read_senvcfg()),
            csr::MSECCFG => Err(CsrAccessError::CsrUnsupported(specifier)),
            _ => Err(CsrAccessError::CsrUnsupported(specifier)),
        }
    }

    /// Write a (masked) value to a CSR by its specifier.
    ///
    /// `privilege_level` indicates at what privilege level the write is performed. If the CSR that
    /// is being written requires a higher privilege level (see
    /// [`csr::required_privilege_level`]), then an [`CsrAccessError::Privileged`] will be
    /// given.
    ///
    /// Only the bits of `value` for which the corresponding bit in `mask` is `1` will be written.
    /// However, even if `mask == 0`, write side-effects will still be performed.
    pub fn write_csr(
        &self,
        allocator: &mut A,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
        value: u64,
        mask: u64,
    ) -> Result<(), CsrWriteError> {
        self.check_csr_access(allocator, specifier, privilege_level)?;
        if csr::is_read_only(specifier) {
            return Err(CsrWriteError::WriteToReadOnly);
        }
        match specifier {
            //
            // Machine info registers
            //
            // The machine info registers are read-only or read-only WARL in this implementation.
            csr::MISA => {}
            csr::MVENDORID => {}
            csr::MARCHID => {}
            csr::MIMPID => {}
            csr::MCONFIGPTR => {}
            csr::MHARTID => {}
            //
            // Status registers
            //
            csr::MSTATUS => self.write_mstatus(allocator, value, mask)?,
            csr::SSTATUS => self.write_sstatus(allocator, value, mask)?,
            //
            // Machine trap handling
            //
            csr::MSCRATCH => self.trap.get_mut(allocator).write_mscratch(value, mask),
            csr::MEPC => self.trap.get_mut(allocator).write_mepc(value, mask),
            csr::MCAUSE => self.trap.get_mut(allocator).mcause.write(value, mask),
            csr::MTVAL => self.trap.get_mut(allocator).write_mtval(value, mask),
            csr::MIDELEG => self.write_mideleg(allocator, value, mask)?,
            csr::MIE => self.write_mie(allocator, value, mask)?,
            csr::MIP => self.write_mip(allocator, value, mask)?,
            csr::MTINST => self.trap.get_mut(allocator).write_mtinst(value, mask),
            csr::MTVAL2 => self.trap.get_mut(allocator).write_mtval2(value, mask),
            //
            // Supervisor trap handling
            //
            csr::SSCRATCH => self.trap.get_mut(allocator).write_sscratch(value, mask),
            csr::SEPC => self.trap.get_mut(allocator).write_sepc(value, mask),
            csr::SCAUSE => self.trap.get_mut(allocator).scause.write(value, mask),
            csr::STVAL => self.trap.get_mut(allocator).write_stval(value, mask),
            csr::SIE => self.write_sie(allocator, value, mask)?,
            csr::SIP => self.write_sip(allocator, value, mask)?,
            //
            // Supervisor protection and translation
            //
            csr::SATP => self.trap.get_mut(allocator).write_satp(value, mask),
            //
            // Counter registers
            //
            // Non-m-counters are read-only shadows of their m-counter counterparts.
            csr::CYCLE
            | csr::INSTRET
            | csr::TIME
            | csr::HPMCOUNTER3..=csr::HPMCOUNTER31 => {}
            csr::MCYCLE => self.write_mcycle(allocator, value, mask)?,
            csr::MINSTRET => self.write_minstret(allocator, value, mask)?,
            csr::MHPMCOUNTER3..=csr::MHPMCOUNTER31 => {
                let offset = 3 + (specifier - csr::MHPMCOUNTER3);
                self.write_mhpmcounter(allocator, offset as u8, value, mask)?;
            }
            //
            // Machine counter setup
            //
            csr::MHPMEVENT3..=csr::MHPMEVENT31 => {
                let offset = 3 + (specifier - csr::MHPMEVENT3);
                self.write_mhpmevent(allocator, offset as u8, value, mask)?;
            }
            csr::MCOUNTINHIBIT => self
                .control
                .get_mut(allocator)
                .mcountinhibit
                .write(value, mask),
            //
            // Trap setup registers
            //
            csr::MTVEC => self.trap.get_mut(allocator).mtvec.write(value, mask),
            csr::MEDELEG => self.trap.get_mut(allocator).medeleg.write(value, mask),
            csr::MCOUNTEREN => self
                .control
                .get_mut(allocator)
                .mcounteren
                .write(value, mask),
            csr::STVEC => self.trap.get_mut(allocator).stvec.write(value, mask),
            csr::SCOUNTEREN => self
                .control
                .get_mut(allocator)
                .scounteren
                .write(value, mask),
            //
            // Machine configuration registers
            //
            csr::MENVCFG => self.mconfig.get_mut(allocator).write_menvcfg(value, mask),
            csr::SENVCFG => self.mconfig.get_mut(allocator).write_senvcfg(value, mask),
            csr::MSECCFG => Err(CsrAccessError::CsrUnsupported(specifier))?,
            _ => Err(CsrAccessError::CsrUnsupported(specifier))?,
        }
        Ok(())
    }

    fn check_csr_access(
        &self,
        _allocator: &A,
        specifier: CsrSpecifier,
        privilege_level: PrivilegeLevel,
    ) -> Result<(), CsrAccessError> {
        if !csr::is_valid(specifier) {
            return Err(CsrAccessError::CsrUnsupported(specifier));
        }
        let required_level = csr::required_privilege_level(specifier);
        if privilege_level < required_level {
            return Err(CsrAccessError::Privileged {
                specifier,
                required_level,
                actual_level: privilege_level,
            });
        }
        Ok(())
    }

    /// Performs a read of the memory-mapped mtime register.
    pub fn read_mtime(&self, allocator: &mut A) -> u64 {
        let mut buf = [0u8; 8];
        self.system_bus
            .read(&mut buf, allocator, self.config.mtime_address);
        u64::from_le_bytes(buf)
    }

    /// Performs a read of the memory-mapped mtimecmp register.
    pub fn read_mtimecmp(&self, allocator: &mut A) -> u64 {
        let mut buf = [0u8; 8];
        self.system_bus
            .read(&mut buf, allocator, self.config.mtimecmp_address);
        u64::from_le_bytes(buf)
    }

    /// Updates `mip.MTIP` by comparing the memory-mapped `mtime` and `mtimecmp` registers.
    ///
    /// Called once per [`Self::step`], ahead of interrupt polling, as per the CPU driver's
    /// per-tick sequence: `mtime`/`mtimecmp` are owned by a CLINT-like bus device, not by the
    /// core itself, so this is how the core observes a timer interrupt becoming pending.
    fn poll_timer_interrupt(&self, allocator: &mut A) {
        let pending = self.read_mtime(allocator) >= self.read_mtimecmp(allocator);
        self.interrupts.get_mut(allocator).set_m_timer(pending);
    }

    /// Returns the highest-priority interrupt that is currently pending and enabled, if any.
    ///
    /// This is checked by the driver loop on every [`Self::step`], as per
    /// [`Interrupts::pending`](interrupts::Interrupts::pending).
    pub fn pending_interrupt(&self, allocator: &mut A) -> Option<Interrupt> {
        let current_privilege = *self.privilege_mode.get(allocator);
        let status = self.status.get(allocator);
        let (mstatus_mie, sstatus_sie) = (status.mie(), status.sie());
        self.interrupts
            .get(allocator)
            .pending(current_privilege, mstatus_mie, sstatus_sie)
    }

    /// Provides an access wrapper around the system bus to address it as memory from this core's
    /// point of view.
    ///
    /// This takes into account the core's current privilege level, its memory mapping (i.e. which
    /// regions can be accessed), its configuration (e.g. whether misaligned memory accesses are
    /// supported), its page tables (Sv39), etc.
    pub fn mmu(&self) -> Mmu<A, B> {
        Mmu { core: self }
    }

    /// Advance the core by one tick: deliver a pending interrupt if one is taken, otherwise fetch
    /// the next instruction at pc and execute it.
    pub fn step(&self, allocator: &mut A) {
        if self.is_halted(allocator) {
            return;
        }
        self.poll_timer_interrupt(allocator);
        if let Some(interrupt) = self.pending_interrupt(allocator) {
            self.trap(allocator, interrupt.into());
            return;
        }
        let pc = self.registers(allocator).pc();
        let raw_instruction = self.fetch_instruction(allocator, pc);
        self.step_with_raw(allocator, raw_instruction);
    }

    /// Execute a single (raw) instruction, decoding the (possibly compressed) instruction at `pc`
    /// from the low halfword(s) of `raw_instruction`.
    pub fn step_with_raw(&self, allocator: &mut A, raw_instruction: ExecutionResult<u32>) {
        let instruction = raw_instruction.and_then(|raw| self.decode(raw));
        self.step_with(allocator, instruction);
    }

    /// Execute a single (decoded) instruction.
    pub fn step_with(&self, allocator: &mut A, instruction: ExecutionResult<DecodedInstruction>) {
        let exception = instruction
            .and_then(|decoded| {
                self.execute_instruction(allocator, decoded.instruction, decoded.length)
            })
            .err();

        let counters = self.counters.get_mut(allocator);
        counters.increment_cycle();
        match instruction {
            // ECALL and EBREAK are not considered to retire.
            // Similarly, if the instruction fetch/decode failed, then instret should not be
            // incremented.
            Ok(DecodedInstruction {
                instruction: Instruction::Ecall | Instruction::Ebreak,
                ..
            })
            | Err(_) => {}
            _ => counters.increment_instret(),
        };

        if let Some(exception) = exception {
            self.trap(allocator, exception.into());
        }
    }

    /// Decodes a 16- or 32-bit-wide raw instruction starting at the current pc, returning its
    /// decoded form together with its length in bytes (2 for compressed, 4 otherwise).
    fn decode(&self, raw_instruction: u32) -> ExecutionResult<DecodedInstruction> {
        let first_halfword = raw_instruction as u16;
        if Instruction::is_compressed(first_halfword) {
            Instruction::decode_compressed(first_halfword)
                .map(|instruction| DecodedInstruction {
                    instruction,
                    length: 2,
                })
                .map_err(|_| Exception::IllegalInstruction(Some(first_halfword as u32)))
        } else {
            Instruction::decode(raw_instruction)
                .map(|instruction| DecodedInstruction {
                    instruction,
                    length: 4,
                })
                .map_err(|_| Exception::IllegalInstruction(Some(raw_instruction)))
        }
    }

    /// Execute a single (raw) instruction.
    ///
    /// This is not the same as [`Self::step_with_raw`]! This only takes care of executing the
    /// instruction-specific operations, such as updating `x`/`f` registers, updating memory,
    /// updating the `pc` register, and depending on the instruction also updating CSRs. However,
    /// additional state updates that normally happen at a tick, such as incrementing the
    /// appropriate counters, are not performed.
    ///
    /// This can be useful for executing the operation defined by an instruction, without actually
    /// progressing general execution. If used for this scenario, consider first decrementing the
    /// `pc` register by the instruction's length so that the current instruction is in fact
    /// treated as the next, which will ensure the `pc` register will be as expected after
    /// executing the instruction. Take into account that this influences jump/branch targets.
    ///
    /// # Unspecified behavior
    ///
    /// > The behavior upon decoding a reserved instruction is UNSPECIFIED.
    ///
    /// This implementation chooses to raise an [`Exception::IllegalInstruction`] when
    /// `raw_instruction` has a reserved opcode.
    pub fn execute_raw_instruction(
        &self,
        allocator: &mut A,
        raw_instruction: u32,
    ) -> ExecutionResult {
        let decoded = self
            .decode(raw_instruction)
            .map_err(|_| Exception::IllegalInstruction(Some(raw_instruction)))?;
        self.execute_instruction(allocator, decoded.instruction, decoded.length)
            .map_err(|err| match err {
                Exception::IllegalInstruction(None) => {
                    Exception::IllegalInstruction(Some(raw_instruction))
                }
                err => err,
            })
    }

    /// Execute a single (decoded) instruction. `instruction_len` is the length in bytes (2 or 4)
    /// of the instruction being executed, used to compute the default next-pc.
    ///
    /// Performs the same operation as [`Self::execute_raw_instruction`], but takes an already
    /// decoded instruction.
    ///
    /// Note that this is not the same as [`Self::step_with`]!
    /// See [`Self::execute_raw_instruction`] for why.
    pub fn execute_instruction(
        &self,
        allocator: &mut A,
        instruction: Instruction,
        instruction_len: u64,
    ) -> ExecutionResult {
        let mut executor = Executor {
            allocator,
            core: self,
            instruction_len,
        };
        match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => executor.op_imm(op, dest, src, immediate),
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u6,
            } => executor.op_shift_imm(op, dest, src, shift_amount_u6),
            Instruction::Addiw {
                dest,
                src,
                immediate,
            } => executor.addiw(dest, src, immediate),
            Instruction::OpShiftImm32 {
                op,
                dest,
                src,
                shift_amount_u5,
            } => executor.op_shift_imm32(op, dest, src, shift_amount_u5),
            Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
            Instruction::Amo {
                op,
                width,
                aq,
                rl,
                src,
                addr,
                dest,
            } => executor.amo(op, width, aq, rl, src, addr, dest),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => executor.op(op, dest, src1, src2),
            Instruction::Op32 {
                op,
                dest,
                src1,
                src2,
            } => executor.op32(op, dest, src1, src2),
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => executor.load(width, dest, base, offset),
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => executor.store(width, src, base, offset),
            Instruction::FLoad {
                width,
                dest,
                base,
                offset,
            } => executor.fload(width, dest, base, offset),
            Instruction::FStore {
                width,
                src,
                base,
                offset,
            } => executor.fstore(width, src, base, offset),
            Instruction::Fence {
                predecessor,
                successor,
            } => executor.fence(predecessor, successor),
            Instruction::FenceI => executor.fence_i(),
            Instruction::Ecall => executor.ecall(),
            Instruction::Ebreak => executor.ebreak(),
            Instruction::Sret => executor.sret(),
            Instruction::Mret => executor.mret(),
            Instruction::Wfi => executor.wfi(),
            Instruction::SfenceVma { vaddr, asid } => executor.sfence_vma(vaddr, asid),
            Instruction::Csr { op, dest, csr, src } => executor.csr(op, dest, csr, src),
            Instruction::Csri {
                op,
                dest,
                csr,
                immediate,
            } => executor.csri(op, dest, csr, immediate),
        }
    }

    /// "Independent instruction fetch unit"
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit little-endian parcels,
    /// > regardless of memory system endianness. Parcels forming one instruction are stored at
    /// > increasing halfword addresses, with the lowest-addressed parcel holding the
    /// > lowest-numbered bits in the instruction specification.
    ///
    /// Since the `C` extension is always enabled, instructions need only be halfword-aligned; a
    /// full word is always read (even for a 2-byte compressed instruction), since whether an
    /// instruction is compressed can only be known after inspecting its first halfword.
    fn fetch_instruction(&self, allocator: &mut A, address: u64) -> Result<u32, Exception> {
        self.mmu()
            .fetch_instruction(allocator, address)
            .map_err(|err| match err {
                MemoryError::MisalignedAccess => Exception::InstructionAddressMisaligned(address),
                MemoryError::AccessFault => Exception::InstructionAccessFault(address),
                MemoryError::PageFault => Exception::InstructionPageFault(address),
            })
    }

    fn trap(&self, allocator: &mut A, cause: TrapCause) {
        self.clear_reservation(allocator);
        if let TrapCause::Exception(exception) = cause {
            if exception.outcome() == TrapOutcome::Fatal {
                self.trap.get_mut(allocator).set_halted();
            }
        }
        if let TrapCause::Interrupt(interrupt) = cause {
            // Taking an interrupt clears its mip bit; see RISC-V privileged spec §3.1.9.
            self.interrupts.get_mut(allocator).clear_pending(interrupt);
        }
        let pc = self.registers(allocator).pc();
        let privilege_mode = *self.privilege_mode.get(allocator);
        let trap = self.trap.get_mut(allocator);
        // Determine if we should be delegating. Note that `delegate == true` does not necessarily
        // mean the trap will be handled in S-mode, since traps that occur while running in M-mode
        // are always handled in M-mode. That check is performed later; see `trap_to_s_mode`.
        let delegate = match cause {
            TrapCause::Exception(exception) => trap.medeleg.should_delegate(exception),
            TrapCause::Interrupt(interrupt) => {
                self.interrupts.get(allocator).should_delegate(interrupt)
            }
        };
        let trap = self.trap.get_mut(allocator);
        // Determine whether we are trapping into S-mode or M-mode.
        let trap_to_s_mode = match (privilege_mode, delegate) {
            (PrivilegeLevel::Machine, _) | (_, false) => false,
            (_, true) => true,
        };
        // Set xcause register.
        match trap_to_s_mode {
            true => trap.scause.set(&cause),
            false => trap.mcause.set(&cause),
        };
        // Set xepc register.
        match trap_to_s_mode {
            true => trap.write_sepc(pc, u64::MAX),
            false => trap.write_mepc(pc, u64::MAX),
        };
        // Write xtval and mtval2 register.
        let tval = match cause {
            TrapCause::Exception(exception) => match exception {
                Exception::IllegalInstruction(raw_instruction) => {
                    raw_instruction.unwrap_or(0) as u64
                }
                Exception::Breakpoint => pc,
                Exception::InstructionAddressMisaligned(vaddr)
                | Exception::InstructionAccessFault(vaddr)
                | Exception::LoadAddressMisaligned(vaddr)
                | Exception::StoreOrAmoAddressMisaligned(vaddr)
                | Exception::LoadAccessFault(vaddr)
                | Exception::StoreOrAmoAccessFault(vaddr)
                | Exception::InstructionPageFault(vaddr)
                | Exception::LoadPageFault(vaddr)
                | Exception::StoreOrAmoPageFault(vaddr) => vaddr,
                Exception::EnvironmentCallFromUMode
                | Exception::EnvironmentCallFromSMode
                | Exception::EnvironmentCallFromMMode => 0,
            },
            TrapCause::Interrupt(_) => 0,
        };
        match trap_to_s_mode {
            true => trap.write_stval(tval, u64::MAX),
            false => {
                trap.write_mtval(tval, u64::MAX);
                trap.write_mtval2(0, u64::MAX);
            }
        };
        // Determine trap handler address base on xtvec register and cause type.
        let tvec = match trap_to_s_mode {
            true => &trap.stvec,
            false => &trap.mtvec,
        };
        let trap_handler_address = match (tvec.mode(), &cause) {
            (VectorMode::Vectored, TrapCause::Interrupt(interrupt)) => {
                tvec.base() + 4 * interrupt.code() as u64
            }
            (VectorMode::Vectored, TrapCause::Exception(_)) | (VectorMode::Direct, _) => {
                tvec.base()
            }
        };
        // Set pc to the correct trap handler.
        *self.registers_mut(allocator).pc_mut() = trap_handler_address;
        // Update fields of status register.
        let status = self.status.get_mut(allocator);
        match trap_to_s_mode {
            true => {
                status.set_spie(status.sie());
                status.set_sie(false);
                status.set_spp(privilege_mode.into());
            }
            false => {
                status.set_mpie(status.mie());
                status.set_mie(false);
                status.set_mpp(privilege_mode.into());
            }
        }
        // Update the core's privilege mode.
        *self.privilege_mode.get_mut(allocator) = match trap_to_s_mode {
            true => PrivilegeLevel::Supervisor,
            false => PrivilegeLevel::Machine,
        };
    }
}

impl<A: Allocator, B: SystemBus<A>> Simulatable<A> for Core<A, B> {
    fn tick(&self, allocator: &mut A) {
        self.step(allocator)
    }

    fn drop(self, allocator: &mut A) {
        self.drop(allocator);
    }
}

/// A decoded instruction together with the length (in bytes) of its original encoding.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DecodedInstruction {
    pub instruction: Instruction,
    /// `2` if decoded from a compressed (`C` extension) encoding, `4` otherwise.
    pub length: u64,
}

/// Result type shared by the CSR read/write dispatch in [`Core::read_csr`]/[`Core::write_csr`] and
/// by the per-CSR-group `Core` impls spread across this module's submodules.
pub(self) type CsrReadResult = Result<u64, CsrAccessError>;
pub(self) type CsrWriteResult = Result<(), CsrWriteError>;

/// Errors that can occur when attempting to access a CSR.
#[derive(Error, Debug)]
pub enum CsrAccessError {
    #[error("unsupported CSR: {0:#05X}")]
    CsrUnsupported(CsrSpecifier),
    /// Attempt to access a CSR that requires a higher privilege level.
    #[error(
        "cannot access specifier {specifier:#05X} from privilege level {actual_level}, \
             since it requires privilege level {required_level}"
    )]
    Privileged {
        /// The CSR for which access was requested.
        specifier: CsrSpecifier,
        /// The minimum required privilege level to access that CSR.
        required_level: RawPrivilegeLevel,
        /// The actual privilegel level from which the access was performed.
        actual_level: PrivilegeLevel,
    },
}

/// Errors that can occur when attempting to write to a CSR.
#[derive(Error, Debug)]
pub enum CsrWriteError {
    /// A non-write specific access error. See [`CsrAccessError`].
    #[error("{0}")]
    AccessError(CsrAccessError),
    /// Attempt to write to a read-only register.
    #[error("writing to read-only CSR is invalid")]
    WriteToReadOnly,
}

impl From<CsrAccessError> for CsrWriteError {
    fn from(value: CsrAccessError) -> Self {
        Self::AccessError(value)
    }
}

/// Result of executing a single instruction. [`Ok`] if execution went normal, [`Err`] if an
/// exception occurred.
pub type ExecutionResult<T = ()> = Result<T, Exception>;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a two-byte aligned boundary in memory.
    ///
    /// The inner value is the faulting virtual address.
    InstructionAddressMisaligned(u64),
    /// The inner value is the faulting virtual address.
    InstructionAccessFault(u64),
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - (*UNSPECIFIED*) Attempt to decode a reserved instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    ///
    /// The inner value is the raw instruction if that data was available.
    IllegalInstruction(Option<u32>),
    Breakpoint,
    /// The inner value is the virtual address of the portion of the access that caused the fault.
    LoadAddressMisaligned(u64),
    /// The inner value is the faulting virtual address.
    LoadAccessFault(u64),
    /// The inner value is the virtual address of the portion of the access that caused the fault.
    StoreOrAmoAddressMisaligned(u64),
    /// The inner value is the faulting virtual address.
    StoreOrAmoAccessFault(u64),
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    /// The inner value is the faulting virtual address.
    InstructionPageFault(u64),
    /// The inner value is the faulting virtual address.
    LoadPageFault(u64),
    /// The inner value is the faulting virtual address.
    StoreOrAmoPageFault(u64),
}

impl Exception {
    pub const INSTRUCTION_ADDRESS_MISALIGNED: u64 = 0;
    pub const INSTRUCTION_ACCESS_FAULT: u64 = 1;
    pub const ILLEGAL_INSTRUCTION: u64 = 2;
    pub const BREAKPOINT: u64 = 3;
    pub const LOAD_ADDRESS_MISALIGNED: u64 = 4;
    pub const LOAD_ACCESS_FAULT: u64 = 5;
    pub const STORE_OR_AMO_ADDRESS_MISALIGNED: u64 = 6;
    pub const STORE_OR_AMO_ACCESS_FAULT: u64 = 7;
    pub const ENVIRONMENT_CALL_FROM_U_MODE: u64 = 8;
    pub const ENVIRONMENT_CALL_FROM_S_MODE: u64 = 9;
    pub const ENVIRONMENT_CALL_FROM_M_MODE: u64 = 11;
    pub const INSTRUCTION_PAGE_FAULT: u64 = 12;
    pub const LOAD_PAGE_FAULT: u64 = 13;
    pub const STORE_OR_AMO_PAGE_FAULT: u64 = 15;

    /// Returns the exception code (cause) for this exception.
    pub const fn code(&self) -> u64 {
        match self {
            Self::InstructionAddressMisaligned(_) => Self::INSTRUCTION_ADDRESS_MISALIGNED,
            Self::InstructionAccessFault(_) => Self::INSTRUCTION_ACCESS_FAULT,
            Self::IllegalInstruction(_) => Self::ILLEGAL_INSTRUCTION,
            Self::Breakpoint => Self::BREAKPOINT,
            Self::LoadAddressMisaligned(_) => Self::LOAD_ADDRESS_MISALIGNED,
            Self::LoadAccessFault(_) => Self::LOAD_ACCESS_FAULT,
            Self::StoreOrAmoAddressMisaligned(_) => Self::STORE_OR_AMO_ADDRESS_MISALIGNED,
            Self::StoreOrAmoAccessFault(_) => Self::STORE_OR_AMO_ACCESS_FAULT,
            Self::EnvironmentCallFromUMode => Self::ENVIRONMENT_CALL_FROM_U_MODE,
            Self::EnvironmentCallFromSMode => Self::ENVIRONMENT_CALL_FROM_S_MODE,
            Self::EnvironmentCallFromMMode => Self::ENVIRONMENT_CALL_FROM_M_MODE,
            Self::InstructionPageFault(_) => Self::INSTRUCTION_PAGE_FAULT,
            Self::LoadPageFault(_) => Self::LOAD_PAGE_FAULT,
            Self::StoreOrAmoPageFault(_) => Self::STORE_OR_AMO_PAGE_FAULT,
        }
    }

    /// Classifies this exception as the driver is expected to react to it once the trap engine
    /// has redirected control to its handler.
    ///
    /// - [`TrapOutcome::Fatal`] for address-misaligned/access-fault/illegal-instruction: these
    ///   indicate either a broken guest or an unimplemented corner of this emulator, so the
    ///   driver halts rather than feeding the guest a trap it has no hope of servicing sensibly.
    /// - [`TrapOutcome::Requested`] for breakpoints and environment calls: routine traps a guest
    ///   OS issues on purpose and is expected to handle.
    /// - [`TrapOutcome::Invisible`] for any page fault: the handler is expected to fix up the page
    ///   tables and retry the faulting instruction.
    pub const fn outcome(&self) -> TrapOutcome {
        match self {
            Self::InstructionAddressMisaligned(_)
            | Self::InstructionAccessFault(_)
            | Self::IllegalInstruction(_)
            | Self::LoadAddressMisaligned(_)
            | Self::LoadAccessFault(_)
            | Self::StoreOrAmoAddressMisaligned(_)
            | Self::StoreOrAmoAccessFault(_) => TrapOutcome::Fatal,
            Self::Breakpoint
            | Self::EnvironmentCallFromUMode
            | Self::EnvironmentCallFromSMode
            | Self::EnvironmentCallFromMMode => TrapOutcome::Requested,
            Self::InstructionPageFault(_) | Self::LoadPageFault(_) | Self::StoreOrAmoPageFault(_) => {
                TrapOutcome::Invisible
            }
        }
    }
}

/// Outcome of a synchronous exception, as classified by [`Exception::outcome`] and surfaced by
/// the trap engine to the CPU driver.
///
/// Interrupts are never classified this way: they are always continuable by definition, since
/// they don't indicate anything about the instruction that was about to execute.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum TrapOutcome {
    /// Misaligned access fault, access fault, or illegal instruction: the driver halts the
    /// emulator.
    Fatal,
    /// Breakpoint or environment call: the guest requested this trap and is expected to handle
    /// it; the driver keeps running.
    Requested,
    /// Page fault of any kind: the handler is expected to resolve the fault and retry the
    /// faulting instruction; the driver keeps running.
    Invisible,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Interrupt {
    SupervisorSoftwareInterrupt = 1,
    MachineSoftwareInterrupt = 3,
    SupervisorTimerInterrupt = 5,
    MachineTimerInterrupt = 7,
    SupervisorExternalInterrupt = 9,
    MachineExternalInterrupt = 11,
}

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt.
    pub fn code(&self) -> u64 {
        *self as u64
    }

    /// Maps an interrupt code (as used by [`Interrupts::pending`](interrupts::Interrupts::pending)
    /// internally) back to the [`Interrupt`] it identifies. Returns `None` for a code that does
    /// not correspond to any implemented interrupt.
    pub fn from_code(code: usize) -> Option<Self> {
        match code {
            1 => Some(Self::SupervisorSoftwareInterrupt),
            3 => Some(Self::MachineSoftwareInterrupt),
            5 => Some(Self::SupervisorTimerInterrupt),
            7 => Some(Self::MachineTimerInterrupt),
            9 => Some(Self::SupervisorExternalInterrupt),
            11 => Some(Self::MachineExternalInterrupt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::new_core;
    use crate::instruction::{AmoOp, AmoWidth};
    use crate::registers::Specifier;

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    /// An `SC` whose reservation was invalidated by an intervening trap must fail, even though
    /// nothing else touched the reserved address.
    #[test]
    fn test_sc_fails_after_intervening_trap() {
        let (mut allocator, core) = new_core(0x1000);
        core.registers_mut(&mut allocator).set_x(x(1), 0x100);

        core.execute_instruction(
            &mut allocator,
            Instruction::Amo {
                op: AmoOp::Lr,
                width: AmoWidth::Word,
                aq: false,
                rl: false,
                src: Specifier::X0,
                addr: x(1),
                dest: x(2),
            },
            4,
        )
        .unwrap();
        assert_eq!(Some(0x100), core.reservation(&allocator));

        core.trap(&mut allocator, TrapCause::Interrupt(Interrupt::MachineTimerInterrupt));
        assert_eq!(None, core.reservation(&allocator));

        core.registers_mut(&mut allocator).set_x(x(3), 0xDEAD_BEEF);
        core.execute_instruction(
            &mut allocator,
            Instruction::Amo {
                op: AmoOp::Sc,
                width: AmoWidth::Word,
                aq: false,
                rl: false,
                src: x(3),
                addr: x(1),
                dest: x(4),
            },
            4,
        )
        .unwrap();

        assert_eq!(1, core.registers(&allocator).x(x(4)), "SC should report failure");
    }

    /// With bit 9 (environment-call-from-S-mode) set in `medeleg`, an `ECALL` from S-mode traps
    /// to S-mode and clears `mip`... er, sets `scause`, not `mcause`.
    #[test]
    fn test_ecall_from_s_mode_delegated_traps_to_s_mode() {
        let (mut allocator, core) = new_core(0x1000);
        *core.privilege_mode.get_mut(&mut allocator) = PrivilegeLevel::Supervisor;
        core.trap.get_mut(&mut allocator).medeleg.write(1 << Exception::ENVIRONMENT_CALL_FROM_S_MODE, u64::MAX);
        *core.registers_mut(&mut allocator).pc_mut() = 0x8000;

        let err = core
            .execute_instruction(&mut allocator, Instruction::Ecall, 4)
            .unwrap_err();
        assert_eq!(Exception::EnvironmentCallFromSMode, err);

        core.trap(&mut allocator, TrapCause::Exception(err));

        assert_eq!(PrivilegeLevel::Supervisor, core.privilege_mode(&allocator));
        assert_eq!(Exception::ENVIRONMENT_CALL_FROM_S_MODE, core.trap.get(&allocator).scause.read());
        assert_eq!(0x8000, core.trap.get(&allocator).read_sepc());
    }

    /// Without delegation, the same `ECALL` instead traps to M-mode regardless of the mode it was
    /// issued from.
    #[test]
    fn test_ecall_from_s_mode_undelegated_traps_to_m_mode() {
        let (mut allocator, core) = new_core(0x1000);
        *core.privilege_mode.get_mut(&mut allocator) = PrivilegeLevel::Supervisor;
        *core.registers_mut(&mut allocator).pc_mut() = 0x8000;

        let err = core
            .execute_instruction(&mut allocator, Instruction::Ecall, 4)
            .unwrap_err();

        core.trap(&mut allocator, TrapCause::Exception(err));

        assert_eq!(PrivilegeLevel::Machine, core.privilege_mode(&allocator));
        assert_eq!(Exception::ENVIRONMENT_CALL_FROM_S_MODE, core.trap.get(&allocator).mcause.read());
        assert_eq!(0x8000, core.trap.get(&allocator).read_mepc());
    }
}
