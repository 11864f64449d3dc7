use log::trace;

use super::mmu::MemoryError;
use crate::core::{Core, CsrSpecifier, Exception, ExecutionResult, Interrupt};
use crate::instruction::{
    AmoOp, AmoWidth, CsrOp, FLoadWidth, FStoreWidth, FenceOrderCombination, LoadWidth,
    RegImmOp, RegRegOp, RegRegOp32, RegShiftImmOp, RegShiftImmOp32, StoreWidth,
};
use crate::registers::{Registers, Specifier};
use crate::system_bus::SystemBus;
use crate::{Alignment, Allocator, PrivilegeLevel, RawPrivilegeLevel};

#[derive(Debug)]
pub(super) struct Executor<'a, 'c, A: Allocator, B: SystemBus<A>> {
    pub allocator: &'a mut A,
    pub core: &'c Core<A, B>,
    /// Length in bytes of the instruction currently being executed (2 for compressed, 4
    /// otherwise), used to compute the default next-pc.
    pub instruction_len: u64,
}

impl<'a, 'c, A: Allocator, B: SystemBus<A>> Executor<'a, 'c, A, B> {
    /// Executes any `OP-IMM` instruction with a plain sign-extended immediate.
    pub fn op_imm(&mut self, op: RegImmOp, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing op_imm {op:?} {dest} {src} {immediate}");
        match op {
            RegImmOp::Addi => self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm)),
            RegImmOp::Slti => self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i64) < imm) as u64),
            RegImmOp::Sltiu => self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u64)) as u64),
            RegImmOp::Andi => self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u64)),
            RegImmOp::Ori => self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u64)),
            RegImmOp::Xori => self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u64)),
        }
    }

    /// Executes a full-width (`XLEN`-bit) `OP-IMM` shift-by-immediate instruction.
    ///
    /// # Panics
    ///
    /// `shift_amount_u6` must fit in a u6 (`0..=63`), otherwise this will panic.
    pub fn op_shift_imm(
        &mut self,
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount_u6: u32,
    ) -> ExecutionResult {
        trace!("Executing op_shift_imm {op:?} {dest} {src} {shift_amount_u6}");
        if shift_amount_u6 > 63 {
            panic!("out of range u6 used");
        }
        match op {
            RegShiftImmOp::Slli => self.reg_shamt_op(dest, src, shift_amount_u6, |s, shamt| s << shamt),
            RegShiftImmOp::Srli => self.reg_shamt_op(dest, src, shift_amount_u6, |s, shamt| s >> shamt),
            RegShiftImmOp::Srai => {
                self.reg_shamt_op(dest, src, shift_amount_u6, |s, shamt| ((s as i64) >> shamt) as u64)
            }
        }
    }

    /// Executes an `ADDIW` instruction: adds the sign-extended 12-bit immediate to the lower 32
    /// bits of `src`, then sign-extends the 32-bit result to 64 bits.
    pub fn addiw(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing addiw {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            ((s as i32).wrapping_add(imm as i32)) as i64 as u64
        })
    }

    /// Executes an `OP-IMM-32` shift-by-immediate instruction: shifts the lower 32 bits of `src`,
    /// then sign-extends the 32-bit result to 64 bits.
    ///
    /// # Panics
    ///
    /// `shift_amount_u5` must fit in a u5 (`0..=31`), otherwise this will panic.
    pub fn op_shift_imm32(
        &mut self,
        op: RegShiftImmOp32,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    ) -> ExecutionResult {
        trace!("Executing op_shift_imm32 {op:?} {dest} {src} {shift_amount_u5}");
        if shift_amount_u5 > 31 {
            panic!("out of range u5 used");
        }
        match op {
            RegShiftImmOp32::Slliw => {
                self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
                    ((s as i32) << shamt) as i64 as u64
                })
            }
            RegShiftImmOp32::Srliw => {
                self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
                    ((s as u32) >> shamt) as i32 as i64 as u64
                })
            }
            RegShiftImmOp32::Sraiw => {
                self.reg_shamt_op(dest, src, shift_amount_u5, |s, shamt| {
                    ((s as i32) >> shamt) as i64 as u64
                })
            }
        }
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) is used to build 32-bit constants and uses the U-type format.
    /// > LUI places the U-immediate value in the top 20 bits of the destination register rd,
    /// > filling in the lowest 12 bits with zeros.
    pub fn lui(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing lui {dest} {immediate}");
        let result = (immediate as u64) & !0xFFF;
        let registers = self.core.registers_mut(self.allocator);
        registers.set_x(dest, result);
        self.increment_pc();
        Ok(())
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) is used to build pc-relative addresses and uses the
    /// > U-type format. AUIPC forms a 32-bit offset from the 20-bit U-immediate, filling in the
    /// > lowest 12 bits with zeros, adds this offset to the address of the AUIPC instruction, then
    /// > places the result in register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing auipc {dest} {immediate}");
        let registers = self.core.registers_mut(self.allocator);
        let result = registers.pc().wrapping_add_signed(immediate & !0xFFF);
        registers.set_x(dest, result);
        self.increment_pc();
        Ok(())
    }

    /// Executes an `OP` (register-register, `XLEN`-bit) instruction.
    pub fn op(&mut self, op: RegRegOp, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing op {op:?} {dest} {src1} {src2}");
        match op {
            RegRegOp::Add => self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2)),
            RegRegOp::Sub => self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2)),
            RegRegOp::Slt => {
                self.reg_reg_op(dest, src1, src2, |s1, s2| ((s1 as i64) < (s2 as i64)) as u64)
            }
            RegRegOp::Sltu => self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u64),
            RegRegOp::And => self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2),
            RegRegOp::Or => self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2),
            RegRegOp::Xor => self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2),
            RegRegOp::Sll => self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x3F)),
            RegRegOp::Srl => self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x3F)),
            RegRegOp::Sra => {
                self.reg_reg_op(dest, src1, src2, |s1, s2| ((s1 as i64) >> (s2 & 0x3F)) as u64)
            }
            RegRegOp::Mul => self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_mul(s2)),
            RegRegOp::Mulh => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                (((s1 as i64 as i128) * (s2 as i64 as i128)) >> 64) as u64
            }),
            RegRegOp::Mulhsu => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                (((s1 as i64 as i128) * (s2 as u128 as i128)) >> 64) as u64
            }),
            RegRegOp::Mulhu => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                (((s1 as u128) * (s2 as u128)) >> 64) as u64
            }),
            RegRegOp::Div => self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 as i64 {
                0 => u64::MAX,
                -1 if s1 as i64 == i64::MIN => s1,
                d => (s1 as i64).wrapping_div(d) as u64,
            }),
            RegRegOp::Divu => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                s1.checked_div(s2).unwrap_or(u64::MAX)
            }),
            RegRegOp::Rem => self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 as i64 {
                0 => s1,
                -1 if s1 as i64 == i64::MIN => 0,
                d => (s1 as i64).wrapping_rem(d) as u64,
            }),
            RegRegOp::Remu => {
                self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_rem(s2).unwrap_or(s1))
            }
        }
    }

    /// Executes an `OP-32` (register-register, `*W`) instruction: operates on the lower 32 bits
    /// of both operands, sign-extending the 32-bit result to 64 bits.
    pub fn op32(&mut self, op: RegRegOp32, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing op32 {op:?} {dest} {src1} {src2}");
        match op {
            RegRegOp32::Addw => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                ((s1 as i32).wrapping_add(s2 as i32)) as i64 as u64
            }),
            RegRegOp32::Subw => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                ((s1 as i32).wrapping_sub(s2 as i32)) as i64 as u64
            }),
            RegRegOp32::Sllw => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                ((s1 as u32) << (s2 & 0x1F)) as i32 as i64 as u64
            }),
            RegRegOp32::Srlw => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                ((s1 as u32) >> (s2 & 0x1F)) as i32 as i64 as u64
            }),
            RegRegOp32::Sraw => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                ((s1 as i32) >> (s2 & 0x1F)) as i64 as u64
            }),
            RegRegOp32::Mulw => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                ((s1 as i32).wrapping_mul(s2 as i32)) as i64 as u64
            }),
            RegRegOp32::Divw => self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 as i32 {
                0 => u64::MAX,
                -1 if s1 as i32 == i32::MIN => s1 as i32 as i64 as u64,
                d => ((s1 as i32).wrapping_div(d)) as i64 as u64,
            }),
            RegRegOp32::Divuw => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                ((s1 as u32).checked_div(s2 as u32).unwrap_or(u32::MAX)) as i32 as i64 as u64
            }),
            RegRegOp32::Remw => self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 as i32 {
                0 => s1 as i32 as i64 as u64,
                -1 if s1 as i32 == i32::MIN => 0,
                d => ((s1 as i32).wrapping_rem(d)) as i64 as u64,
            }),
            RegRegOp32::Remuw => self.reg_reg_op(dest, src1, src2, |s1, s2| {
                ((s1 as u32).checked_rem(s2 as u32).unwrap_or(s1 as u32)) as i32 as i64 as u64
            }),
        }
    }

    pub fn jal(&mut self, dest: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing jal {dest} {offset}");
        self.jump_op(dest, |registers| registers.pc().wrapping_add_signed(offset))
    }

    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing jalr {dest} {base} {offset}");
        self.jump_op(dest, |registers| {
            registers.x(base).wrapping_add_signed(offset) & !1
        })
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing beq {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bne {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing blt {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i64) < (s2 as i64))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bltu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bge {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i64) >= (s2 as i64))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bgeu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    pub fn load(&mut self, width: LoadWidth, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing load {width:?} {dest} {offset}({base})");
        match width {
            LoadWidth::Lb => self.load_op(dest, base, offset, |this, address| {
                this.core.mmu().read_byte(this.allocator, address).map(|v| v as i8 as i64 as u64)
            }),
            LoadWidth::Lbu => self.load_op(dest, base, offset, |this, address| {
                this.core.mmu().read_byte(this.allocator, address).map(|v| v as u64)
            }),
            LoadWidth::Lh => self.load_op(dest, base, offset, |this, address| {
                this.core.mmu().read_halfword(this.allocator, address).map(|v| v as i16 as i64 as u64)
            }),
            LoadWidth::Lhu => self.load_op(dest, base, offset, |this, address| {
                this.core.mmu().read_halfword(this.allocator, address).map(|v| v as u64)
            }),
            LoadWidth::Lw => self.load_op(dest, base, offset, |this, address| {
                this.core.mmu().read_word(this.allocator, address).map(|v| v as i32 as i64 as u64)
            }),
            LoadWidth::Lwu => self.load_op(dest, base, offset, |this, address| {
                this.core.mmu().read_word(this.allocator, address).map(|v| v as u64)
            }),
            LoadWidth::Ld => self.load_op(dest, base, offset, |this, address| {
                this.core.mmu().read_doubleword(this.allocator, address)
            }),
        }
    }

    pub fn store(&mut self, width: StoreWidth, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing store {width:?} {src} {offset}({base})");
        match width {
            StoreWidth::Sb => self.store_op(src, base, offset, |this, address, value| {
                this.core.mmu().write_byte(this.allocator, address, value as u8)
            }),
            StoreWidth::Sh => self.store_op(src, base, offset, |this, address, value| {
                this.core.mmu().write_halfword(this.allocator, address, value as u16)
            }),
            StoreWidth::Sw => self.store_op(src, base, offset, |this, address, value| {
                this.core.mmu().write_word(this.allocator, address, value as u32)
            }),
            StoreWidth::Sd => self.store_op(src, base, offset, |this, address, value| {
                this.core.mmu().write_doubleword(this.allocator, address, value)
            }),
        }
    }

    /// Executes `FLW`/`FLD`: loads raw bits from memory into an `f` register, without any
    /// floating-point interpretation. `FLW` zero-extends the loaded word to the full 64-bit `f`
    /// register width (NaN-boxing).
    pub fn fload(&mut self, width: FLoadWidth, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing fload {width:?} {dest} {offset}({base})");
        let registers = self.core.registers(self.allocator);
        let address = registers.x(base).wrapping_add_signed(offset);
        let value = match width {
            FLoadWidth::Flw => self
                .core
                .mmu()
                .read_word(self.allocator, address)
                .map(|v| v as u64 | 0xFFFF_FFFF_0000_0000),
            FLoadWidth::Fld => self.core.mmu().read_doubleword(self.allocator, address),
        }
        .map_err(|err| match err {
            MemoryError::MisalignedAccess => Exception::LoadAddressMisaligned(address),
            MemoryError::AccessFault => Exception::LoadAccessFault(address),
            MemoryError::PageFault => Exception::LoadPageFault(address),
        })?;
        let registers = self.core.registers_mut(self.allocator);
        registers.set_f(dest, value);
        self.increment_pc();
        Ok(())
    }

    /// Executes `FSW`/`FSD`: stores raw bits from an `f` register to memory.
    pub fn fstore(&mut self, width: FStoreWidth, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing fstore {width:?} {src} {offset}({base})");
        let registers = self.core.registers(self.allocator);
        let value = registers.f(src);
        let address = registers.x(base).wrapping_add_signed(offset);
        let result = match width {
            FStoreWidth::Fsw => self.core.mmu().write_word(self.allocator, address, value as u32),
            FStoreWidth::Fsd => self.core.mmu().write_doubleword(self.allocator, address, value),
        };
        result.map_err(|err| match err {
            MemoryError::MisalignedAccess => Exception::StoreOrAmoAddressMisaligned(address),
            MemoryError::AccessFault => Exception::StoreOrAmoAccessFault(address),
            MemoryError::PageFault => Exception::StoreOrAmoPageFault(address),
        })?;
        self.increment_pc();
        Ok(())
    }

    pub fn amo(
        &mut self,
        op: AmoOp,
        width: AmoWidth,
        aq: bool,
        rl: bool,
        src: Specifier,
        addr: Specifier,
        dest: Specifier,
    ) -> ExecutionResult {
        trace!("Executing amo {op:?} {width:?} aq={aq} rl={rl} {dest} {src} ({addr})");
        match op {
            AmoOp::Lr => self.lr(width, dest, addr),
            AmoOp::Sc => self.sc(width, dest, src, addr),
            AmoOp::Swap => self.amo_op(width, dest, src, addr, |_, reg| reg),
            AmoOp::Add => self.amo_op(width, dest, src, addr, |mem, reg| mem.wrapping_add(reg)),
            AmoOp::And => self.amo_op(width, dest, src, addr, |mem, reg| mem & reg),
            AmoOp::Or => self.amo_op(width, dest, src, addr, |mem, reg| mem | reg),
            AmoOp::Xor => self.amo_op(width, dest, src, addr, |mem, reg| mem ^ reg),
        }
    }

    fn lr(&mut self, width: AmoWidth, dest: Specifier, addr: Specifier) -> ExecutionResult {
        self.load_op(dest, addr, 0, move |this, address| {
            let alignment = match width {
                AmoWidth::Word => Alignment::WORD,
                AmoWidth::Doubleword => Alignment::DOUBLEWORD,
            };
            if !alignment.is_aligned(address) {
                return Err(MemoryError::MisalignedAccess);
            }
            let result = match width {
                AmoWidth::Word => this.core.mmu().read_word(this.allocator, address).map(|v| v as i32 as i64 as u64),
                AmoWidth::Doubleword => this.core.mmu().read_doubleword(this.allocator, address),
            };
            if result.is_ok() {
                this.core.set_reservation(this.allocator, address);
            }
            result
        })
    }

    /// `SC` succeeds (returns `0` in `dest`, and performs the store) iff there is a live
    /// reservation for `address`, as set by a preceding `LR`. It clears the reservation
    /// unconditionally, whether it succeeds or fails.
    fn sc(&mut self, width: AmoWidth, dest: Specifier, src: Specifier, addr: Specifier) -> ExecutionResult {
        self.store_op(src, addr, 0, move |this, address, value| {
            let alignment = match width {
                AmoWidth::Word => Alignment::WORD,
                AmoWidth::Doubleword => Alignment::DOUBLEWORD,
            };
            if !alignment.is_aligned(address) {
                return Err(MemoryError::MisalignedAccess);
            }
            let reserved = this.core.reservation(this.allocator) == Some(address);
            this.core.clear_reservation(this.allocator);
            if !reserved {
                this.core.registers_mut(this.allocator).set_x(dest, 1);
                return Ok(());
            }
            this.core.registers_mut(this.allocator).set_x(dest, 0);
            match width {
                AmoWidth::Word => this.core.mmu().write_word(this.allocator, address, value as u32),
                AmoWidth::Doubleword => this.core.mmu().write_doubleword(this.allocator, address, value),
            }
        })
    }

    /// First argument to `op` is the value from memory, the second from `src`.
    fn amo_op<F>(
        &mut self,
        width: AmoWidth,
        dest: Specifier,
        src: Specifier,
        addr: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: Fn(u64, u64) -> u64,
    {
        let registers = self.core.registers(self.allocator);
        let address = registers.x(addr);
        let alignment = match width {
            AmoWidth::Word => Alignment::WORD,
            AmoWidth::Doubleword => Alignment::DOUBLEWORD,
        };

        if !alignment.is_aligned(address) {
            return Err(Exception::StoreOrAmoAddressMisaligned(address));
        }

        let src_value = registers.x(src);

        let mem_value = match width {
            AmoWidth::Word => self
                .core
                .mmu()
                .read_word(self.allocator, address)
                .map(|v| v as i32 as i64 as u64),
            AmoWidth::Doubleword => self.core.mmu().read_doubleword(self.allocator, address),
        }
        .map_err(|err| match err {
            MemoryError::MisalignedAccess => Exception::StoreOrAmoAddressMisaligned(address),
            MemoryError::AccessFault => Exception::StoreOrAmoAccessFault(address),
            MemoryError::PageFault => Exception::StoreOrAmoPageFault(address),
        })?;

        let new_value = op(mem_value, src_value);

        match width {
            AmoWidth::Word => self.core.mmu().write_word(self.allocator, address, new_value as u32),
            AmoWidth::Doubleword => self.core.mmu().write_doubleword(self.allocator, address, new_value),
        }
        .map_err(|err| match err {
            MemoryError::MisalignedAccess => Exception::StoreOrAmoAddressMisaligned(address),
            MemoryError::AccessFault => Exception::StoreOrAmoAccessFault(address),
            MemoryError::PageFault => Exception::StoreOrAmoPageFault(address),
        })?;

        let registers = self.core.registers_mut(self.allocator);
        registers.set_x(dest, mem_value);
        self.increment_pc();
        Ok(())
    }

    pub fn fence(
        &mut self,
        predecessor: FenceOrderCombination,
        successor: FenceOrderCombination,
    ) -> ExecutionResult {
        trace!(predecessor:?, successor:?; "Executing fence");
        // Since only one hart is simulated, this is equivalent to a nop instruction.
        let _ = predecessor;
        let _ = successor;
        self.increment_pc();
        Ok(())
    }

    pub fn fence_i(&mut self) -> ExecutionResult {
        trace!("Executing fence.i");
        // No decode cache is kept, so there is nothing to invalidate; the instruction and data
        // streams are always coherent from the hart's perspective.
        self.increment_pc();
        Ok(())
    }

    pub fn ecall(&mut self) -> ExecutionResult {
        trace!("Executing ecall");
        match self.core.privilege_mode(self.allocator) {
            PrivilegeLevel::User => Err(Exception::EnvironmentCallFromUMode),
            PrivilegeLevel::Supervisor => Err(Exception::EnvironmentCallFromSMode),
            PrivilegeLevel::Machine => Err(Exception::EnvironmentCallFromMMode),
        }
    }

    pub fn ebreak(&mut self) -> ExecutionResult {
        trace!("Executing ebreak");
        Err(Exception::Breakpoint)
    }

    pub fn csr(&mut self, op: CsrOp, dest: Specifier, csr: CsrSpecifier, src: Specifier) -> ExecutionResult {
        trace!("Executing csr {op:?} {dest} {csr:#x} {src}");
        self.csr_op(
            op,
            dest,
            csr,
            (op == CsrOp::ReadWrite || src != Specifier::X0)
                .then(|| self.core.registers(self.allocator).x(src)),
        )
    }

    pub fn csri(&mut self, op: CsrOp, dest: Specifier, csr: CsrSpecifier, immediate: u64) -> ExecutionResult {
        trace!("Executing csri {op:?} {dest} {csr:#x} {immediate}");
        self.csr_op(
            op,
            dest,
            csr,
            (op == CsrOp::ReadWrite || immediate != 0).then_some(immediate),
        )
    }

    pub fn sret(&mut self) -> ExecutionResult {
        trace!("Executing sret");
        if self.core.privilege_mode(self.allocator) < PrivilegeLevel::Supervisor {
            return Err(Exception::IllegalInstruction(None));
        }
        let status = self.core.status.get_mut(self.allocator);
        if status.tsr() {
            return Err(Exception::IllegalInstruction(None));
        }
        let pp = status.spp();
        // Set xIE to xPIE.
        status.set_sie(status.spie());
        // Set xPIE = 1.
        status.set_spie(true);
        // Set xPP to lowest supported privilege level, which is U-mode.
        status.set_spp(RawPrivilegeLevel::User);
        // Set MPRV=0 if xPP != M.
        if pp != PrivilegeLevel::Machine {
            status.set_mprv(false);
        }
        // Set core's privilege mode to xPP.
        *self.core.privilege_mode.get_mut(self.allocator) = pp;
        // Set pc to xepc.
        let sepc = self.core.trap.get(self.allocator).sepc();
        *self.core.registers_mut(self.allocator).pc_mut() = sepc;
        Ok(())
    }

    pub fn mret(&mut self) -> ExecutionResult {
        trace!("Executing mret");
        if self.core.privilege_mode(self.allocator) < PrivilegeLevel::Machine {
            return Err(Exception::IllegalInstruction(None));
        }
        let status = self.core.status.get_mut(self.allocator);
        let pp = status.mpp();
        // Set xIE to xPIE.
        status.set_mie(status.mpie());
        // Set xPIE = 1.
        status.set_mpie(true);
        // Set xPP to lowest supported privilege level, which is U-mode.
        status.set_mpp(RawPrivilegeLevel::User);
        // Set MPRV=0 if xPP != M.
        if pp != PrivilegeLevel::Machine {
            status.set_mprv(false);
        }
        // Set core's privilege mode to xPP.
        *self.core.privilege_mode.get_mut(self.allocator) = pp;
        // Set pc to xepc.
        let mepc = self.core.trap.get(self.allocator).mepc();
        *self.core.registers_mut(self.allocator).pc_mut() = mepc;
        Ok(())
    }

    pub fn wfi(&mut self) -> ExecutionResult {
        trace!("Executing wfi");
        if self.core.privilege_mode(self.allocator) < PrivilegeLevel::Machine
            && self.core.status.get(self.allocator).tw()
        {
            return Err(Exception::IllegalInstruction(None));
        }
        // There's nothing stopping the (single-hart) driver loop from stepping past a WFI
        // immediately: whether any implemented interrupt is pending is re-checked on every
        // step anyway, so treating this as a nop is a legal (if non-power-saving)
        // implementation.
        let _ = Interrupt::MachineExternalInterrupt; // keep the import used for doc purposes
        self.increment_pc();
        Ok(())
    }

    pub fn sfence_vma(&mut self, vaddr: Specifier, asid: Specifier) -> ExecutionResult {
        trace!("Executing sfence.vma {vaddr} {asid}");
        let _ = vaddr;
        let _ = asid;
        if self.core.privilege_mode(self.allocator) == PrivilegeLevel::Supervisor
            && self.core.status.get(self.allocator).tvm()
        {
            return Err(Exception::IllegalInstruction(None));
        }
        // No TLB is implemented, so there's nothing to flush.
        self.increment_pc();
        Ok(())
    }

    // Private generic implementations

    fn increment_pc(&mut self) {
        let len = self.instruction_len;
        let registers = self.core.registers_mut(self.allocator);
        let pc = registers.pc_mut();
        *pc = pc.wrapping_add(len);
    }

    fn reg_imm_op<F>(&mut self, dest: Specifier, src: Specifier, immediate: i64, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, i64) -> u64,
    {
        let registers = self.core.registers_mut(self.allocator);
        registers.set_x(dest, op(registers.x(src), immediate));
        self.increment_pc();
        Ok(())
    }

    fn reg_shamt_op<F>(&mut self, dest: Specifier, src: Specifier, shift_amount: u32, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, u32) -> u64,
    {
        let registers = self.core.registers_mut(self.allocator);
        registers.set_x(dest, op(registers.x(src), shift_amount));
        self.increment_pc();
        Ok(())
    }

    fn reg_reg_op<F>(&mut self, dest: Specifier, src1: Specifier, src2: Specifier, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, u64) -> u64,
    {
        let registers = self.core.registers_mut(self.allocator);
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        self.increment_pc();
        Ok(())
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Registers) -> u64,
    {
        let len = self.instruction_len;
        let registers = self.core.registers_mut(self.allocator);
        // Compute target pc.
        let new_pc = compute_target(registers);
        // Check target pc is 16-bit aligned: base RV64IC only requires halfword alignment since
        // the C extension allows jump targets that aren't 32-bit aligned.
        if !Alignment::HALFWORD.is_aligned(new_pc) {
            return Err(Exception::InstructionAddressMisaligned(new_pc));
        }
        // Update pc to target.
        let old_pc = std::mem::replace(registers.pc_mut(), new_pc);
        // Write incremented old pc to `dest` register.
        registers.set_x(dest, old_pc.wrapping_add(len));
        Ok(())
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(&mut self, src1: Specifier, src2: Specifier, offset: i64, predicate: P) -> ExecutionResult
    where
        P: FnOnce(u64, u64) -> bool,
    {
        let registers = self.core.registers_mut(self.allocator);
        if predicate(registers.x(src1), registers.x(src2)) {
            let new_pc = registers.pc().wrapping_add_signed(offset);
            if !Alignment::HALFWORD.is_aligned(new_pc) {
                return Err(Exception::InstructionAddressMisaligned(new_pc));
            }
            *registers.pc_mut() = new_pc;
            Ok(())
        } else {
            self.increment_pc();
            Ok(())
        }
    }

    fn load_op<F>(&mut self, dest: Specifier, base: Specifier, offset: i64, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut Self, u64) -> Result<u64, MemoryError>,
    {
        let registers = self.core.registers(self.allocator);
        let address = registers.x(base).wrapping_add_signed(offset);
        let value = op(self, address).map_err(|err| match err {
            MemoryError::MisalignedAccess => Exception::LoadAddressMisaligned(address),
            MemoryError::AccessFault => Exception::LoadAccessFault(address),
            MemoryError::PageFault => Exception::LoadPageFault(address),
        })?;
        let registers = self.core.registers_mut(self.allocator);
        registers.set_x(dest, value);
        self.increment_pc();
        Ok(())
    }

    fn store_op<F>(&mut self, src: Specifier, base: Specifier, offset: i64, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut Self, u64, u64) -> Result<(), MemoryError>,
    {
        let registers = self.core.registers(self.allocator);
        let value = registers.x(src);
        let address = registers.x(base).wrapping_add_signed(offset);
        op(self, address, value).map_err(|err| match err {
            MemoryError::MisalignedAccess => Exception::StoreOrAmoAddressMisaligned(address),
            MemoryError::AccessFault => Exception::StoreOrAmoAccessFault(address),
            MemoryError::PageFault => Exception::StoreOrAmoPageFault(address),
        })?;
        self.increment_pc();
        Ok(())
    }

    fn csr_op(&mut self, op: CsrOp, dest: Specifier, csr: CsrSpecifier, src_value: Option<u64>) -> ExecutionResult {
        // Read and store the core's current privilege mode, since the CSR read may cause the
        // privilege mode to be changed as a side-effect. This CSR operation should be atomic, so
        // both the read and write should be performed at the same, original privilege level.
        let privilege_level = self.core.privilege_mode(self.allocator);
        if op != CsrOp::ReadWrite || dest != Specifier::X0 {
            let old_value = self
                .core
                .read_csr(self.allocator, csr, privilege_level)
                .map_err(|_| Exception::IllegalInstruction(None))?;
            let registers = self.core.registers_mut(self.allocator);
            registers.set_x(dest, old_value);
        };
        if let Some(src_value) = src_value {
            let (value, mask) = match op {
                CsrOp::ReadWrite => (src_value, u64::MAX),
                CsrOp::ReadSet => (u64::MAX, src_value),
                CsrOp::ReadClear => (0, src_value),
            };
            self.core
                .write_csr(self.allocator, csr, privilege_level, value, mask)
                .map_err(|_| Exception::IllegalInstruction(None))?;
        }
        self.increment_pc();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::core::test_support::new_core;
    use crate::instruction::{BranchCondition, Instruction, RegRegOp, RegRegOp32};
    use crate::registers::Specifier;

    fn x(index: u8) -> Specifier {
        Specifier::from_u5(index)
    }

    /// `INT64_MIN / -1` overflows two's complement division; RISC-V defines the result to be
    /// `INT64_MIN` itself rather than trapping.
    #[test]
    fn test_div_overflow_returns_dividend() {
        let (mut allocator, core) = new_core(0x1000);
        core.registers_mut(&mut allocator).set_x(x(2), i64::MIN as u64);
        core.registers_mut(&mut allocator).set_x(x(3), u64::MAX); // -1

        core.execute_instruction(
            &mut allocator,
            Instruction::Op {
                op: RegRegOp::Div,
                dest: x(1),
                src1: x(2),
                src2: x(3),
            },
            4,
        )
        .unwrap();

        assert_eq!(i64::MIN as u64, core.registers(&allocator).x(x(1)));
    }

    /// Division and remainder by zero don't trap: `DIVU x, x, 0` yields all-ones, `REM x, x, 0`
    /// yields the dividend unchanged.
    #[test]
    fn test_divu_and_rem_by_zero() {
        let (mut allocator, core) = new_core(0x1000);
        core.registers_mut(&mut allocator).set_x(x(2), 42);
        core.registers_mut(&mut allocator).set_x(x(3), 0);

        core.execute_instruction(
            &mut allocator,
            Instruction::Op {
                op: RegRegOp::Divu,
                dest: x(1),
                src1: x(2),
                src2: x(3),
            },
            4,
        )
        .unwrap();
        assert_eq!(u64::MAX, core.registers(&allocator).x(x(1)));

        core.execute_instruction(
            &mut allocator,
            Instruction::Op {
                op: RegRegOp::Rem,
                dest: x(1),
                src1: x(2),
                src2: x(3),
            },
            4,
        )
        .unwrap();
        assert_eq!(42, core.registers(&allocator).x(x(1)));
    }

    /// `ADDIW` operates on the lower 32 bits and sign-extends the result, so incrementing
    /// `0x7FFFFFFF` overflows into a negative 64-bit value rather than wrapping within 32 bits
    /// unsigned.
    #[test]
    fn test_addiw_sign_extends_result() {
        let (mut allocator, core) = new_core(0x1000);
        core.registers_mut(&mut allocator).set_x(x(2), 0x0000_0000_7FFF_FFFF);

        core.execute_instruction(
            &mut allocator,
            Instruction::Addiw {
                dest: x(1),
                src: x(2),
                immediate: 1,
            },
            4,
        )
        .unwrap();

        assert_eq!(0xFFFF_FFFF_8000_0000, core.registers(&allocator).x(x(1)));
    }

    /// `*W` register-register ops sign-extend their 32-bit result, e.g. `ADDW` of two values that
    /// sum to a negative 32-bit number must produce a negative 64-bit one.
    #[test]
    fn test_addw_sign_extends_result() {
        let (mut allocator, core) = new_core(0x1000);
        core.registers_mut(&mut allocator).set_x(x(2), 0x0000_0000_7FFF_FFFF);
        core.registers_mut(&mut allocator).set_x(x(3), 1);

        core.execute_instruction(
            &mut allocator,
            Instruction::Op32 {
                op: RegRegOp32::Addw,
                dest: x(1),
                src1: x(2),
                src2: x(3),
            },
            4,
        )
        .unwrap();

        assert_eq!(0xFFFF_FFFF_8000_0000, core.registers(&allocator).x(x(1)));
    }

    #[test]
    fn test_branch_taken_jumps_by_offset() {
        let (mut allocator, core) = new_core(0x1000);
        *core.registers_mut(&mut allocator).pc_mut() = 0x1000;
        core.registers_mut(&mut allocator).set_x(x(1), 1);
        core.registers_mut(&mut allocator).set_x(x(2), 1);

        core.execute_instruction(
            &mut allocator,
            Instruction::Branch {
                condition: BranchCondition::Beq,
                src1: x(1),
                src2: x(2),
                offset: 0x20,
            },
            4,
        )
        .unwrap();

        assert_eq!(0x1020, core.registers(&allocator).pc());
    }

    #[test]
    fn test_branch_not_taken_falls_through() {
        let (mut allocator, core) = new_core(0x1000);
        *core.registers_mut(&mut allocator).pc_mut() = 0x1000;
        core.registers_mut(&mut allocator).set_x(x(1), 1);
        core.registers_mut(&mut allocator).set_x(x(2), 2);

        core.execute_instruction(
            &mut allocator,
            Instruction::Branch {
                condition: BranchCondition::Beq,
                src1: x(1),
                src2: x(2),
                offset: 0x20,
            },
            4,
        )
        .unwrap();

        assert_eq!(0x1004, core.registers(&allocator).pc());
    }
}
