//! Core-local interruptor: the `mtime`/`mtimecmp` timer and the `msip` software-interrupt
//! register, memory-mapped in the layout used by SiFive's CLINT (and QEMU's `virt` machine).

use space_time::allocator::Allocator;

use crate::bus::{Bus, PureAccessResult};
use crate::core::MachineSoftwareInterruptLine;

/// Offset of the single hart's `msip` register (4 bytes, only bit 0 is meaningful).
pub const MSIP_OFFSET: u64 = 0x0000;
/// Offset of `mtimecmp` (8 bytes).
pub const MTIMECMP_OFFSET: u64 = 0x4000;
/// Offset of the free-running `mtime` counter (8 bytes).
pub const MTIME_OFFSET: u64 = 0xBFF8;
/// Size of the address region this device occupies.
pub const SIZE: u64 = 0xC000;

#[derive(Debug)]
pub struct Clint<A: Allocator> {
    state: A::Id<State>,
    msip_line: MachineSoftwareInterruptLine<A>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
struct State {
    mtime: u64,
    mtimecmp: u64,
    msip: bool,
}

impl<A: Allocator> Clint<A> {
    /// Creates a new CLINT in its reset state (`mtime = mtimecmp = 0`, `msip` cleared).
    pub fn new(allocator: &mut A, msip_line: MachineSoftwareInterruptLine<A>) -> Self {
        Self {
            state: allocator.insert(State::default()),
            msip_line,
        }
    }

    pub fn reset(&self, allocator: &mut A) {
        *allocator.get_mut(self.state).unwrap() = State::default();
    }

    pub fn drop(self, allocator: &mut A) {
        allocator.remove(self.state).unwrap();
    }

    /// Advances the free-running `mtime` counter by one tick.
    pub fn tick(&self, allocator: &mut A) {
        let state = allocator.get_mut(self.state).unwrap();
        state.mtime = state.mtime.wrapping_add(1);
    }
}

impl<A: Allocator> Bus<A> for Clint<A> {
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
        let state = *allocator.get(self.state).unwrap();
        read_register(&state, buf, address);
    }

    fn read_pure(&self, buf: &mut [u8], allocator: &A, address: u64) -> PureAccessResult {
        let state = *allocator.get(self.state).unwrap();
        read_register(&state, buf, address);
        Ok(())
    }

    fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        let state = allocator.get_mut(self.state).unwrap();
        match (address, buf.len()) {
            (MSIP_OFFSET, 4) => {
                let value = u32::from_le_bytes(buf.try_into().unwrap());
                state.msip = value & 1 != 0;
                let msip = state.msip;
                self.msip_line.set(allocator, msip);
            }
            (MTIMECMP_OFFSET, 8) => {
                state.mtimecmp = u64::from_le_bytes(buf.try_into().unwrap());
            }
            (MTIME_OFFSET, 8) => {
                state.mtime = u64::from_le_bytes(buf.try_into().unwrap());
            }
            _ => {}
        }
    }
}

fn read_register(state: &State, buf: &mut [u8], address: u64) {
    match (address, buf.len()) {
        (MSIP_OFFSET, 4) => buf.copy_from_slice(&(state.msip as u32).to_le_bytes()),
        (MTIMECMP_OFFSET, 8) => buf.copy_from_slice(&state.mtimecmp.to_le_bytes()),
        (MTIME_OFFSET, 8) => buf.copy_from_slice(&state.mtime.to_le_bytes()),
        _ => buf.fill(0),
    }
}
