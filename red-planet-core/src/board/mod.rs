//! Provides a generic RV64GC board: a single hart wired up to boot ROM, flash, DRAM, a 16550
//! UART, a platform-level interrupt controller (PLIC), and a core-local interruptor (CLINT).

mod system_bus;

use crate::bus::Bus;
use crate::core::{Core, ExternalInterruptCallback, ExternalInterruptLine, MachineSoftwareInterruptLine};
use crate::interrupt::DynIrqCallback;
use crate::resources::clint::Clint;
use crate::resources::plic::{Plic, PlicInputLine};
use crate::resources::ram::Ram;
use crate::resources::rom::Rom;
use crate::resources::uart::Uart;
use crate::simulator::Simulatable;
use crate::system_bus::AccessType;
use crate::{two_way_addr_map, Allocator, Endianness};
use std::ops::Deref;
use std::rc::Rc;
use system_bus::{Resource, SystemBus};

/// UART0's PLIC interrupt source number.
const UART0_IRQ: u8 = 10;

#[derive(Debug, Clone)]
pub struct Config {
    /// If `true`, the reset vector in MROM will jump to flash, otherwise to the start of DRAM.
    pub boot_to_flash: bool,
    /// M-mode endianness used by the MROM reset stub when encoding the jump target.
    pub endianness: Endianness,
    /// Contents of flash (max 64 MiB).
    pub flash: Vec<u8>,
    /// Address of the handler for Non-Maskable Interrupts.
    pub nmi_vector: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            boot_to_flash: false,
            endianness: Endianness::LE,
            flash: Vec::default(),
            nmi_vector: 0,
        }
    }
}

/// RISC-V hardware platform representing a generic RV64GC board.
///
/// This currently is a single-core board, with a single-hart core.
/// Multiprocessing and hardware multithreading are not supported.
///
/// > A RISC-V hardware platform can contain one or more RISC-V-compatible processing cores together
/// > with other non-RISC-V-compatible cores, fixed-function accelerators, various physical memory
/// > structures, I/O devices, and an interconnect structure to allow the components to communicate.
#[derive(Debug)]
pub struct Board<A: Allocator> {
    /// The single core of this board. Multiprocessing is not supported.
    core: Core<A, Interconnect<A>>,
    system_bus: Rc<SystemBus<A>>,
}

impl<A: Allocator> Board<A> {
    pub fn new(allocator: &mut A, config: Config) -> Self {
        let memory_map = two_way_addr_map! {
            [0x0000_1000, 0x0000_FFFF] <=> Resource::Mrom,
            [0x0200_0000, 0x0200_BFFF] <=> Resource::Clint,
            [0x0C00_0000, 0x0C20_0007] <=> Resource::Plic,
            [0x1000_0000, 0x1000_00FF] <=> Resource::Uart0,
            [0x2000_0000, 0x23FF_FFFF] <=> Resource::Flash,
            [0x8000_0000, 0xFFFF_FFFF] <=> Resource::Dram,
        };

        let mrom_range = memory_map.range_for(&Resource::Mrom).unwrap();
        let flash_range = memory_map.range_for(&Resource::Flash).unwrap();
        let dram_range = memory_map.range_for(&Resource::Dram).unwrap();

        let start_address: u64 = if config.boot_to_flash {
            flash_range.start()
        } else {
            dram_range.start()
        };

        let reset_vector = {
            let s: [u8; 8] = match config.endianness {
                Endianness::LE => start_address.to_le_bytes(),
                Endianness::BE => start_address.to_be_bytes(),
            };
            [
                0x97, 0x02, 0x00, 0x00, // auipc  t0, 0x0
                0x73, 0x25, 0x40, 0xf1, // csrr   a0, mhartid
                0x03, 0xb2, 0x02, 0x01, // ld     t0, 16(t0)
                0x67, 0x80, 0x02, 0x00, // jr     t0
                s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7], // .dword start_address
            ]
        };

        let mrom = Rom::new(allocator, mrom_range.size().unwrap(), &reset_vector).unwrap();

        let flash = Rom::new(allocator, flash_range.size().unwrap(), &config.flash).unwrap();

        let dram = Ram::new(allocator, dram_range.size().unwrap()).unwrap();

        // The interrupt-pending state is allocated up front so interrupt sources (PLIC, CLINT)
        // can be wired into it before the core that owns it exists.
        let interrupts = Core::allocate_interrupts(allocator);

        let meip_callback = ExternalInterruptCallback::new(interrupts, ExternalInterruptLine::Machine);
        let plic = Rc::new(Plic::new(allocator, DynIrqCallback(Box::new(meip_callback))));

        let uart0 = Uart::new(
            allocator,
            DynIrqCallback(Box::new(PlicInputLine::new(Rc::clone(&plic), UART0_IRQ))),
        );

        let msip_line = MachineSoftwareInterruptLine::new(interrupts);
        let clint = Clint::new(allocator, msip_line);

        let clint_address = memory_map.range_for(&Resource::Clint).unwrap().start();

        let system_bus = Rc::new(SystemBus {
            memory_map,
            mrom,
            clint,
            plic,
            uart0,
            flash,
            dram,
        });

        let core = Core::new(
            allocator,
            Rc::clone(&system_bus),
            crate::core::Config {
                // At least one Hart must have ID 0 according to the spec.
                hart_id: 0,
                mtime_address: clint_address + crate::resources::clint::MTIME_OFFSET,
                mtimecmp_address: clint_address + crate::resources::clint::MTIMECMP_OFFSET,
                support_misaligned_memory_access: true,
                reset_vector: mrom_range.start(),
                nmi_vector: config.nmi_vector,
            },
            interrupts,
        );

        Self { core, system_bus }
    }

    pub fn core(&self) -> &Core<A, impl crate::system_bus::SystemBus<A>> {
        &self.core
    }

    pub fn mrom(&self) -> &Rom<A> {
        &self.system_bus.mrom
    }

    pub fn flash(&self) -> &Rom<A> {
        &self.system_bus.flash
    }

    pub fn dram(&self) -> &Ram<A> {
        &self.system_bus.dram
    }

    pub fn uart0(&self) -> &Uart<A> {
        &self.system_bus.uart0
    }

    pub fn plic(&self) -> &Plic<A> {
        self.system_bus.plic.as_ref()
    }

    pub fn clint(&self) -> &Clint<A> {
        &self.system_bus.clint
    }

    /// Returns `true` once the core has taken a fatal trap (misaligned access, access fault, or
    /// illegal instruction) and stopped making forward progress.
    ///
    /// Named after the condition a driver loop actually cares about: there's nothing left to
    /// usefully simulate, whether that's because the guest powered itself off or because it
    /// crashed the hart.
    pub fn is_powered_down(&self, allocator: &A) -> bool {
        self.core.is_halted(allocator)
    }

    /// Force board back to its reset state.
    pub fn reset(&self, allocator: &mut A) {
        self.core.reset(allocator);
        self.system_bus.dram.reset(allocator);
        self.system_bus.uart0.reset(allocator);
        self.system_bus.plic.reset(allocator);
        self.system_bus.clint.reset(allocator);
    }

    /// Write a byte buffer into the physical address space.
    ///
    /// Bytes written to vacant, read-only, or I/O regions are ignored.
    pub fn load_physical(&self, allocator: &mut A, base_address: u64, buf: &[u8]) {
        let memory_map = &self.system_bus.memory_map;
        let mut next_address = Some(base_address);
        while let Some(address) = next_address {
            let (range, resource) = memory_map.range_value(address);

            next_address = range.end().checked_add(1);

            let Some(resource) = resource else {
                continue;
            };

            match resource {
                Resource::Dram => {
                    const_assert!(usize::BITS >= 32);
                    let slice_start = (address - base_address) as usize;
                    let slice_end = (range.end().min(base_address + buf.len() as u64 - 1) - base_address) as usize;
                    let slice = &buf[slice_start..=slice_end];
                    self.system_bus.write(allocator, address, slice);
                }
                // Skip read-only
                Resource::Mrom => {}
                Resource::Flash => {}
                // Skip MMIO
                Resource::Uart0 => {}
                Resource::Clint => {}
                Resource::Plic => {}
            }
        }
    }
}

impl<A: Allocator> Simulatable<A> for Board<A> {
    fn tick(&self, allocator: &mut A) {
        self.system_bus.clint.tick(allocator);
        self.core.tick(allocator)
    }

    fn drop(self, allocator: &mut A) {
        self.core.drop(allocator);
    }
}

type Interconnect<A> = Rc<SystemBus<A>>;

impl<A: Allocator> Bus<A> for Interconnect<A> {
    fn read(&self, buf: &mut [u8], allocator: &mut A, address: u64) {
        self.deref().read(buf, allocator, address)
    }

    fn read_pure(&self, buf: &mut [u8], allocator: &A, address: u64) -> crate::bus::PureAccessResult {
        self.deref().read_pure(buf, allocator, address)
    }

    fn write(&self, allocator: &mut A, address: u64, buf: &[u8]) {
        self.deref().write(allocator, address, buf)
    }
}

impl<A: Allocator> crate::system_bus::SystemBus<A> for Interconnect<A> {
    fn accepts(&self, address: u64, size: usize, access_type: AccessType) -> bool {
        self.deref().accepts(address, size, access_type)
    }
}
