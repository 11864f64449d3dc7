use bitvec::{order::Lsb0, view::BitView};

/// On RV64 the menvcfg register is a single 64-bit register; unlike RV32 it has no `menvcfgh`
/// shadow for the upper half.
///
/// senvcfg is the restricted S-mode view of the same set of environment configuration bits that
/// are meaningful below M-mode (currently just FIOM); it is stored independently since M-mode
/// software may configure a different FIOM setting for S-mode than for itself.
#[derive(Debug, Clone)]
pub struct Mconfig {
    menvcfg: u64,
    senvcfg: u64,
}

impl Default for Mconfig {
    fn default() -> Self {
        Self::new()
    }
}

impl Mconfig {
    pub fn new() -> Self {
        Self {
            menvcfg: 0x0000_0000_0000_0000,
            senvcfg: 0x0000_0000_0000_0000,
        }
    }

    pub fn read_menvcfg(&self) -> u64 {
        self.menvcfg
    }

    pub fn write_menvcfg(&mut self, value: u64, mask: u64) {
        self.menvcfg = self.menvcfg & !mask | value & mask;
    }

    pub fn read_senvcfg(&self) -> u64 {
        self.senvcfg
    }

    pub fn write_senvcfg(&mut self, value: u64, mask: u64) {
        // Only FIOM is defined for senvcfg; the rest are WPRI and read as zero.
        self.senvcfg = self.senvcfg & !mask | value & mask & 0b1;
    }

    pub fn fiom(&self) -> bool {
        self.menvcfg.view_bits::<Lsb0>()[idx::FIOM]
    }

    pub fn set_fiom(&mut self, value: bool) {
        self.menvcfg.view_bits_mut::<Lsb0>().set(idx::FIOM, value);
    }

    pub fn pbmte(&self) -> bool {
        self.menvcfg.view_bits::<Lsb0>()[idx::PBMTE]
    }

    pub fn set_pbmte(&mut self, value: bool) {
        self.menvcfg.view_bits_mut::<Lsb0>().set(idx::PBMTE, value);
    }
}

/// Bit indices for the fields of the 64-bit menvcfg register.
mod idx {
    pub const FIOM: usize = 0;
    // The meaning of the following fields is not yet defined in the latest spec.
    // const CBIE: usize = 4;
    // const CBCFE: usize = 6;
    // const CBZE: usize = 7;
    pub const PBMTE: usize = 62;
    // const STCE: usize = 63;
}
