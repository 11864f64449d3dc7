use bitvec::{array::BitArray, field::BitField, order::Lsb0, view::BitView};
use space_time::allocator::Allocator;

use super::{Core, CsrReadResult, CsrWriteResult, Interrupt};
use crate::interrupt::IrqCallback;
use crate::system_bus::SystemBus;
use crate::Allocated;

const SUPERVISOR_SOFTWARE_INTERRUPT: usize = Interrupt::SupervisorSoftwareInterrupt as usize;
const MACHINE_SOFTWARE_INTERRUPT: usize = Interrupt::MachineSoftwareInterrupt as usize;
const SUPERVISOR_TIMER_INTERRUPT: usize = Interrupt::SupervisorTimerInterrupt as usize;
const MACHINE_TIMER_INTERRUPT: usize = Interrupt::MachineTimerInterrupt as usize;
const SUPERVISOR_EXTERNAL_INTERRUPT: usize = Interrupt::SupervisorExternalInterrupt as usize;
const MACHINE_EXTERNAL_INTERRUPT: usize = Interrupt::MachineExternalInterrupt as usize;

#[allow(clippy::identity_op)]
const VALID_INTERRUPTS_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << MACHINE_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << MACHINE_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT)
    | (1 << MACHINE_EXTERNAL_INTERRUPT);

// Delegetable interrupts according to QEMU's implementation.
#[allow(clippy::identity_op)]
const DELEGATABLE_INTERRUPTS_MASK: u16 = 0
    | (1 << SUPERVISOR_SOFTWARE_INTERRUPT)
    | (1 << SUPERVISOR_TIMER_INTERRUPT)
    | (1 << SUPERVISOR_EXTERNAL_INTERRUPT);

#[derive(Debug, Clone)]
pub struct Interrupts {
    /// Array of booleans, with for each bit index matching an interrupts's code a bool indicating
    /// whether handling that interrupt should be delegated to S-mode (if not triggered in M-mode).
    delegate: BitArray<[u16; 1], Lsb0>,

    /// Software-writable bit that is ORed with [`seip_external`] to become the SEIP field of the
    /// final [`mip`] register.
    seip_external: bool,
    /// External interrupt bit that is ORed with [`seip_internal`] to become the SEIP field of the
    /// final [`mip`] register.
    seip_internal: bool,

    /// The final mip register as visible from guest software. This means the SEIP field is
    /// recomputed each time [`seip_external`] or [`seip_internal`] changes.
    mip: BitArray<[u16; 1], Lsb0>,

    /// The mie register.
    mie: BitArray<[u16; 1], Lsb0>,
}

impl Default for Interrupts {
    fn default() -> Self {
        Self::new()
    }
}

impl Interrupts {
    #![allow(dead_code)] // TODO: remove once methods are used.

    pub fn new() -> Self {
        Self {
            // TODO: Are these defaults correct?
            delegate: BitArray::new([0x0000_0000]),
            seip_external: false,
            seip_internal: false,
            mip: BitArray::new([0x0000_0000]),
            mie: BitArray::new([0x0000_0000]),
        }
    }

    pub fn should_delegate(&self, interrupt: Interrupt) -> bool {
        self.delegate[interrupt as usize]
    }

    /// Indicate whether there is an M-level external interrupt pending (MEIP).
    ///
    /// Controlled by the PLIC.
    pub fn set_m_external(&mut self, value: bool) {
        self.mip.set(MACHINE_EXTERNAL_INTERRUPT, value);
    }

    /// Indicate whether there is an S-level external interrupt pending (SEIP).
    ///
    /// Controlled by the PLIC. Note that calling this with `false` does not mean the SEIP field
    /// will be set to `0`, since it is ORed with the (hidden) software-writable SEIP bit.
    pub fn set_s_external(&mut self, value: bool) {
        self.seip_external = value;
        self.mip.set(
            SUPERVISOR_EXTERNAL_INTERRUPT,
            self.seip_external | self.seip_internal,
        );
    }

    /// Indicate whether there is an M-level timer interrupt pending (MTIP).
    ///
    /// Controlled externally based on memory-mapped mtime and mtimecmp registers.
    pub fn set_m_timer(&mut self, value: bool) {
        self.mip.set(MACHINE_TIMER_INTERRUPT, value);
    }

    // set_s_timer is missing, since STIP is only controllable by M-mode guest code.

    /// Set or clear the M-level software interrupt pending bit (MSIP).
    ///
    /// Driven by a CLINT-style memory-mapped register: unlike most `mip` fields, this one can be
    /// both set and cleared by the device (real hardware clears it by writing `0` to the
    /// memory-mapped `msip` register), rather than only ever being raised externally.
    pub fn set_m_software(&mut self, value: bool) {
        self.mip.set(MACHINE_SOFTWARE_INTERRUPT, value);
    }

    /// Indicate that an S-level software interrupt is pending (SSIP).
    ///
    /// Note that it is not possible to clear this bit. That is only possible from guest code.
    ///
    /// May be set to 1 by the PLIC, but is also settable from guest code.
    pub fn set_s_soft(&mut self) {
        self.mip.set(SUPERVISOR_SOFTWARE_INTERRUPT, true);
    }

    /// Clears the `mip` bit for `interrupt`, as done by the trap engine once it has taken that
    /// interrupt.
    ///
    /// For the level-triggered lines (MEIP/MTIP, and the external half of SEIP) this only lasts
    /// until the driving device re-asserts them on a later tick if the condition still holds;
    /// for the software-writable ones (MSIP, SSIP, SEIP's internal half) it sticks until guest
    /// code sets it again.
    pub fn clear_pending(&mut self, interrupt: Interrupt) {
        if interrupt == Interrupt::SupervisorExternalInterrupt {
            self.seip_internal = false;
        }
        self.mip.set(interrupt as usize, false);
    }

    /// Returns the highest-priority pending-and-enabled interrupt that should be taken while
    /// running at `current_privilege`, or `None` if none should be taken right now.
    ///
    /// Follows the standard RISC-V priority order (highest first): machine external, machine
    /// software, machine timer, supervisor external, supervisor software, supervisor timer. An
    /// interrupt delegated to S-mode (per [`mideleg`](Self::should_delegate)) is only visible while
    /// `current_privilege` is S or U, and is masked by `sstatus.SIE` while in S-mode. An interrupt
    /// not delegated is only visible while `current_privilege` is S, U, or M, and is masked by
    /// `mstatus.MIE` while in M-mode.
    pub fn pending(
        &self,
        current_privilege: crate::PrivilegeLevel,
        mstatus_mie: bool,
        sstatus_sie: bool,
    ) -> Option<Interrupt> {
        use crate::PrivilegeLevel::*;

        let pending_enabled = self.mip & self.mie;

        const PRIORITY: [usize; 6] = [
            MACHINE_EXTERNAL_INTERRUPT,
            MACHINE_SOFTWARE_INTERRUPT,
            MACHINE_TIMER_INTERRUPT,
            SUPERVISOR_EXTERNAL_INTERRUPT,
            SUPERVISOR_SOFTWARE_INTERRUPT,
            SUPERVISOR_TIMER_INTERRUPT,
        ];

        for code in PRIORITY {
            if !pending_enabled[code] {
                continue;
            }
            let delegated = self.delegate[code];
            let visible = if delegated {
                match current_privilege {
                    Machine => false,
                    Supervisor => sstatus_sie,
                    User => true,
                }
            } else {
                match current_privilege {
                    Machine => mstatus_mie,
                    Supervisor | User => true,
                }
            };
            if visible {
                return Interrupt::from_code(code);
            }
        }
        None
    }
}

/// Which of a hart's external interrupt lines ([`mip.MEIP`](Interrupts::set_m_external) or
/// [`mip.SEIP`](Interrupts::set_s_external)) an [`ExternalInterruptCallback`] drives.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ExternalInterruptLine {
    Machine,
    Supervisor,
}

/// An [`IrqCallback`] that raises/lowers a hart's MEIP or SEIP bit directly.
///
/// This is what lets a board wire an external interrupt source (a PLIC, typically) directly into a
/// [`Core`]'s [`Interrupts`] CSR state, without the core itself needing to be constructed first: the
/// core's `Allocated<A, Interrupts>` handle can be obtained up front via
/// [`Core::allocate_interrupts`] and cloned into as many callbacks as needed before the core (and
/// the system bus it depends on) is actually built.
#[derive(Debug, Clone, Copy)]
pub struct ExternalInterruptCallback<A: Allocator> {
    interrupts: Allocated<A, Interrupts>,
    line: ExternalInterruptLine,
}

impl<A: Allocator> ExternalInterruptCallback<A> {
    pub fn new(interrupts: Allocated<A, Interrupts>, line: ExternalInterruptLine) -> Self {
        Self { interrupts, line }
    }

    fn set(&self, allocator: &mut A, value: bool) {
        let interrupts = self.interrupts.get_mut(allocator);
        match self.line {
            ExternalInterruptLine::Machine => interrupts.set_m_external(value),
            ExternalInterruptLine::Supervisor => interrupts.set_s_external(value),
        }
    }
}

impl<A: Allocator> IrqCallback<A> for ExternalInterruptCallback<A> {
    fn raise(&self, allocator: &mut A) {
        self.set(allocator, true);
    }

    fn lower(&self, allocator: &mut A) {
        self.set(allocator, false);
    }
}

/// A handle that directly sets or clears a hart's MSIP bit (`mip.MSIP`).
///
/// Unlike [`ExternalInterruptCallback`], this isn't modeled as an [`IrqCallback`] raise/lower line:
/// a CLINT-style `msip` memory-mapped register sets the bit to whatever value is written to it
/// (including clearing it), which doesn't fit the level-raise/lower shape. Obtained the same way as
/// [`ExternalInterruptCallback`], from a [`Core::allocate_interrupts`] handle created before the
/// `Core` itself.
#[derive(Debug, Clone, Copy)]
pub struct MachineSoftwareInterruptLine<A: Allocator> {
    interrupts: Allocated<A, Interrupts>,
}

impl<A: Allocator> MachineSoftwareInterruptLine<A> {
    pub fn new(interrupts: Allocated<A, Interrupts>) -> Self {
        Self { interrupts }
    }

    pub fn set(&self, allocator: &mut A, value: bool) {
        self.interrupts.get_mut(allocator).set_m_software(value);
    }
}

impl<A: Allocator, B: SystemBus<A>> Core<A, B> {
    pub fn read_mideleg(&self, allocator: &mut A) -> CsrReadResult {
        Ok(self.interrupts.get(allocator).delegate.load_le())
    }

    /// The mideleg register is **WARL**.
    pub fn write_mideleg(&self, allocator: &mut A, value: u64, mask: u64) -> CsrWriteResult {
        let mideleg = &mut self.interrupts.get_mut(allocator).delegate;
        let mask = mask as u16 & DELEGATABLE_INTERRUPTS_MASK;
        mideleg.store_le(mideleg.load_le::<u16>() & !mask | value as u16 & mask);
        Ok(())
    }

    pub fn read_mip(&self, allocator: &mut A) -> CsrReadResult {
        Ok(self.interrupts.get(allocator).mip.load_le())
    }

    pub fn write_mip(&self, allocator: &mut A, value: u64, mask: u64) -> CsrWriteResult {
        let mask = mask.view_bits::<Lsb0>();
        let value = value.view_bits::<Lsb0>();

        // Writes to MEIP, MTIP, and MSIP are ignored. Their values are managed externally.
        // MEIP is managed by the PLIC.
        // MTIP is set/cleared based on the memory-mapped mtime and mtimecmp registers.
        // MSIP is written by accesses to memory-mapped control registers.

        let interrupts = &mut self.interrupts.get_mut(allocator);

        if mask[SUPERVISOR_EXTERNAL_INTERRUPT] {
            interrupts.seip_internal = value[SUPERVISOR_EXTERNAL_INTERRUPT];
            interrupts.mip.set(
                SUPERVISOR_EXTERNAL_INTERRUPT,
                interrupts.seip_external | interrupts.seip_internal,
            );
        }

        if mask[SUPERVISOR_TIMER_INTERRUPT] {
            interrupts.mip.set(
                SUPERVISOR_TIMER_INTERRUPT,
                value[SUPERVISOR_TIMER_INTERRUPT],
            );
        }

        if mask[SUPERVISOR_SOFTWARE_INTERRUPT] {
            interrupts.mip.set(
                SUPERVISOR_SOFTWARE_INTERRUPT,
                value[SUPERVISOR_SOFTWARE_INTERRUPT],
            );
        }

        Ok(())
    }

    pub fn read_mie(&self, allocator: &mut A) -> CsrReadResult {
        Ok(self.interrupts.get(allocator).mie.load_le())
    }

    pub fn write_mie(&self, allocator: &mut A, value: u64, mask: u64) -> CsrWriteResult {
        let mie = &mut self.interrupts.get_mut(allocator).mie;
        let mask = mask as u16 & VALID_INTERRUPTS_MASK;
        mie.store_le(mie.load_le::<u16>() & !mask | value as u16 & mask);
        Ok(())
    }

    pub fn read_sip(&self, allocator: &mut A) -> CsrReadResult {
        let interrupts = self.interrupts.get(allocator);
        Ok((interrupts.mip & interrupts.delegate).load_le())
    }

    pub fn write_sip(&self, allocator: &mut A, value: u64, mask: u64) -> CsrWriteResult {
        let mask = mask.view_bits::<Lsb0>();
        let value = value.view_bits::<Lsb0>();

        // SEIP and STIP are read-only in sip, so writes to it are ignored.

        let interrupts = &mut self.interrupts.get_mut(allocator);

        if mask[SUPERVISOR_SOFTWARE_INTERRUPT] {
            interrupts.mip.set(
                SUPERVISOR_SOFTWARE_INTERRUPT,
                value[SUPERVISOR_SOFTWARE_INTERRUPT],
            );
        }

        Ok(())
    }

    pub fn read_sie(&self, allocator: &mut A) -> CsrReadResult {
        let interrupts = self.interrupts.get(allocator);
        Ok((interrupts.mie & interrupts.delegate).load_le())
    }

    pub fn write_sie(&self, allocator: &mut A, value: u64, mask: u64) -> CsrWriteResult {
        let interrupts = self.interrupts.get_mut(allocator);
        let delegate = interrupts.delegate.load_le::<u16>();
        // Since we are masking with `delegate`, it is not needed to also mask with
        // VALID_INTERRUPTS_MASK (or DELEGETABLE_INTERRUPTS_MASK).
        let mask = mask as u16 & delegate;
        let mie = &mut interrupts.mie;
        mie.store_le(mie.load_le::<u16>() & !mask | value as u16 & mask);
        Ok(())
    }
}
