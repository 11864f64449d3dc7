use crate::core::CsrSpecifier;
use crate::registers::Specifier;
use log::trace;
use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
///
/// Both 32-bit (base) and 16-bit (compressed, `C` extension) encodings decode into this same
/// representation: a compressed instruction is always expanded into the equivalent base
/// instruction it is defined to be a shorthand for, so nothing downstream of [`Instruction::decode`]
/// /ever needs to know whether the original encoding was compressed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i64,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount_u6: u32,
    },
    /// `ADDIW`: the only `OP-IMM-32` instruction with a plain immediate (rather than a shift
    /// amount). Operates on the lower 32 bits of `src`, sign-extending the 32-bit result to 64
    /// bits.
    Addiw {
        dest: Specifier,
        src: Specifier,
        immediate: i64,
    },
    OpShiftImm32 {
        op: RegShiftImmOp32,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    },
    Auipc {
        dest: Specifier,
        immediate: i64,
    },
    Lui {
        dest: Specifier,
        immediate: i64,
    },
    Amo {
        op: AmoOp,
        width: AmoWidth,
        aq: bool,
        rl: bool,
        src: Specifier,
        addr: Specifier,
        dest: Specifier,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Op32 {
        op: RegRegOp32,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i64,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i64,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i64,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i64,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i64,
    },
    /// `FLW`/`FLD`: load raw bits from memory into an `f` register. No floating-point
    /// interpretation happens anywhere in this crate; see [`crate::registers::F`].
    FLoad {
        width: FLoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i64,
    },
    /// `FSW`/`FSD`: store raw bits from an `f` register to memory.
    FStore {
        width: FStoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i64,
    },
    Fence {
        predecessor: FenceOrderCombination,
        successor: FenceOrderCombination,
    },
    /// `FENCE.I`: synchronize the instruction and data streams (Zifencei).
    FenceI,
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Wfi,
    SfenceVma {
        vaddr: Specifier,
        asid: Specifier,
    },
    Csr {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        src: Specifier,
    },
    Csri {
        op: CsrOp,
        dest: Specifier,
        csr: CsrSpecifier,
        immediate: u64,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

/// Full-width (`XLEN`-bit) shift-by-immediate operations, encoded under `OP-IMM` with a 6-bit
/// shift amount (`shamt[5:0] == inst[25:20]`).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
}

/// 32-bit shift-by-immediate operations, encoded under `OP-IMM-32` with a 5-bit shift amount.
/// The shifted 32-bit result is sign-extended to 64 bits.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp32 {
    Slliw,
    Srliw,
    Sraiw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoOp {
    Lr,
    Sc,
    Swap,
    Add,
    Xor,
    And,
    Or,
}

/// The width of the memory access performed by an atomic memory operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoWidth {
    Word,
    Doubleword,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

/// `OP-32` register-register operations: `*W` variants that operate on the lower 32 bits of
/// both operands and sign-extend the 32-bit result to 64 bits.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp32 {
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
    Mulw,
    Divw,
    Divuw,
    Remw,
    Remuw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    /// `LWU`: zero-extended word load, only present in RV64.
    Lwu,
    /// `LD`: doubleword load, only present in RV64.
    Ld,
    Lbu,
    Lhu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
    /// `SD`: doubleword store, only present in RV64.
    Sd,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FLoadWidth {
    Flw,
    Fld,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FStoreWidth {
    Fsw,
    Fsd,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FenceOrderCombination {
    pub device_input: bool,
    pub device_output: bool,
    pub memory_reads: bool,
    pub memory_writes: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    /// Atomic Read/Write CSR.
    ReadWrite,
    /// Atomic Read and Set Bits in CSR.
    ReadSet,
    /// Atomic Read and Clear Bits in CSR.
    ReadClear,
}

impl Instruction {
    /// Returns `true` if the low 2 bits of `first_halfword` indicate a 16-bit (compressed)
    /// instruction, i.e. if they are anything other than `0b11`.
    pub fn is_compressed(first_halfword: u16) -> bool {
        first_halfword & 0b11 != 0b11
    }

    /// Decodes a full 32-bit instruction word. Callers must first check
    /// [`Instruction::is_compressed`] on the low halfword and call [`Instruction::decode_compressed`]
    /// instead if it returns `true`.
    pub fn decode(raw_instruction: u32) -> Result<Self, DecodeError> {
        trace!("Decoding instruction {raw_instruction:#010x}");
        match opcode(raw_instruction).ok_or(DecodeError::UnsupportedOpcode)? {
            Opcode::Load => match i_width(raw_instruction) {
                Some(width) => Ok(Self::Load {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::LoadFp => match i_fwidth(raw_instruction) {
                Some(width) => Ok(Self::FLoad {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::OpImm => match i_funct(raw_instruction) {
                Some(op) => Ok(Self::OpImm {
                    op,
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate: i_imm(raw_instruction),
                }),
                None => match i_shfunct(raw_instruction) {
                    Some(op) => Ok(Self::OpShiftImm {
                        op,
                        dest: rd(raw_instruction),
                        src: rs1(raw_instruction),
                        shift_amount_u6: shamt6(raw_instruction),
                    }),
                    None => Err(DecodeError::IllegalInstruction),
                },
            },
            Opcode::Auipc => Ok(Self::Auipc {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::OpImm32 => match funct3(raw_instruction) {
                0b000 => Ok(Self::Addiw {
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate: i_imm(raw_instruction),
                }),
                _ => match i_shfunct32(raw_instruction) {
                    Some(op) => Ok(Self::OpShiftImm32 {
                        op,
                        dest: rd(raw_instruction),
                        src: rs1(raw_instruction),
                        shift_amount_u5: shamt5(raw_instruction),
                    }),
                    None => Err(DecodeError::IllegalInstruction),
                },
            },
            Opcode::Store => match s_width(raw_instruction) {
                Some(width) => Ok(Self::Store {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::StoreFp => match s_fwidth(raw_instruction) {
                Some(width) => Ok(Self::FStore {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Amo => match (amo_op(raw_instruction), amo_width(raw_instruction)) {
                (Some(op), Some(width)) => Ok(Self::Amo {
                    op,
                    width,
                    aq: amo_aq(raw_instruction),
                    rl: amo_rl(raw_instruction),
                    src: rs2(raw_instruction),
                    addr: rs1(raw_instruction),
                    dest: rd(raw_instruction),
                }),
                _ => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Op => match r_funct(raw_instruction) {
                Some(op) => Ok(Self::Op {
                    op,
                    dest: rd(raw_instruction),
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Lui => Ok(Self::Lui {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Op32 => match r_funct32(raw_instruction) {
                Some(op) => Ok(Self::Op32 {
                    op,
                    dest: rd(raw_instruction),
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Branch => match b_funct(raw_instruction) {
                Some(condition) => Ok(Self::Branch {
                    condition,
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                    offset: b_imm(raw_instruction),
                }),
                None => Err(DecodeError::IllegalInstruction),
            },
            Opcode::Jalr => Ok(Self::Jalr {
                dest: rd(raw_instruction),
                base: rs1(raw_instruction),
                offset: i_imm(raw_instruction),
            }),
            Opcode::Jal => Ok(Self::Jal {
                dest: rd(raw_instruction),
                offset: j_imm(raw_instruction),
            }),
            Opcode::MiscMem => {
                match i_mem(raw_instruction) {
                    Some(mem_funct) => match mem_funct {
                        MemFunct::Fence => {
                            let fm = raw_instruction >> 28;
                            let rd = u8::from(rd(raw_instruction));
                            let rs1 = u8::from(rs1(raw_instruction));
                            if fm != 0b0000 || rd != 0 || rs1 != 0 {
                                // All unused fields in the FENCE instruction encoding are reserved
                                // for future use. According to the spec, they should be treated as
                                // normal fence instructions (with fm == 0b0000) for forward
                                // compatibility.
                                //
                                // Note that the current spec defines one more optional encoding
                                // that we don't support: FENCE.TSO, which is encoded by
                                // fm == 0b1000 && predecessor==0b0011 && successor==0b0011
                                // && rs1 == 0 && rd == 0. The spec states this must be treated as
                                // "reserved for future use" if not supported, which again means
                                // treating it as a normal fence instruction (with fm == 0b0000) for
                                // forward compatibility.
                                //
                                // Therefore, there's nothing to be done here. No [`DecodeError`]
                                // that must be returned. We just continue with decoding the
                                // instruction as if fm == 0b0000 && rs1 == 0 && rd == 0.
                            }
                            let predecessor = FenceOrderCombination {
                                device_input: (raw_instruction >> 27) & 0b1 == 1,
                                device_output: (raw_instruction >> 26) & 0b1 == 1,
                                memory_reads: (raw_instruction >> 25) & 0b1 == 1,
                                memory_writes: (raw_instruction >> 24) & 0b1 == 1,
                            };
                            let successor = FenceOrderCombination {
                                device_input: (raw_instruction >> 23) & 0b1 == 1,
                                device_output: (raw_instruction >> 22) & 0b1 == 1,
                                memory_reads: (raw_instruction >> 21) & 0b1 == 1,
                                memory_writes: (raw_instruction >> 20) & 0b1 == 1,
                            };
                            Ok(Self::Fence {
                                predecessor,
                                successor,
                            })
                        }
                        // All bits besides opcode/funct3 are reserved in the base ISA encoding of
                        // FENCE.I and currently ignored, per the same forward-compatibility
                        // reasoning as FENCE above.
                        MemFunct::FenceI => Ok(Self::FenceI),
                    },
                    None => Err(DecodeError::IllegalInstruction),
                }
            }
            Opcode::System => match i_sys(raw_instruction) {
                Some(sys) => match sys {
                    SysFunct::Priv => match sys_priv(raw_instruction) {
                        Some(sys_priv) => Ok(match sys_priv {
                            SysPriv::Ecall => Self::Ecall,
                            SysPriv::Ebreak => Self::Ebreak,
                            SysPriv::Sret => Self::Sret,
                            SysPriv::Mret => Self::Mret,
                            SysPriv::Wfi => Self::Wfi,
                            SysPriv::SfenceVma => Self::SfenceVma {
                                vaddr: rs1(raw_instruction),
                                asid: rs2(raw_instruction),
                            },
                        }),
                        None => Err(DecodeError::IllegalInstruction),
                    },
                    SysFunct::Csrrw | SysFunct::Csrrs | SysFunct::Csrrc => {
                        Ok(Instruction::Csr {
                            op: match sys {
                                SysFunct::Csrrw => CsrOp::ReadWrite,
                                SysFunct::Csrrs => CsrOp::ReadSet,
                                SysFunct::Csrrc => CsrOp::ReadClear,
                                _ => unreachable!(), // Already checked in outer match
                            },
                            dest: rd(raw_instruction),
                            csr: csr(raw_instruction),
                            src: rs1(raw_instruction),
                        })
                    }
                    SysFunct::Csrrwi | SysFunct::Csrrsi | SysFunct::Csrrci => {
                        Ok(Instruction::Csri {
                            op: match sys {
                                SysFunct::Csrrwi => CsrOp::ReadWrite,
                                SysFunct::Csrrsi => CsrOp::ReadSet,
                                SysFunct::Csrrci => CsrOp::ReadClear,
                                _ => unreachable!(), // Already checked in outer match
                            },
                            dest: rd(raw_instruction),
                            csr: csr(raw_instruction),
                            immediate: u64::from(u8::from(rs1(raw_instruction))),
                        })
                    }
                },
                None => Err(DecodeError::IllegalInstruction),
            },
        }
    }

    /// Decodes a 16-bit compressed instruction, expanding it into the base instruction it is
    /// defined to be a shorthand for.
    ///
    /// `raw_instruction == 0` (all zero bits) is always illegal, matching the base ISA's
    /// reservation of the all-zero 32-bit word.
    pub fn decode_compressed(raw_instruction: u16) -> Result<Self, DecodeError> {
        trace!("Decoding compressed instruction {raw_instruction:#06x}");
        if raw_instruction == 0 {
            return Err(DecodeError::IllegalInstruction);
        }
        let quadrant = raw_instruction & 0b11;
        let funct3 = (raw_instruction >> 13) & 0b111;
        match quadrant {
            0b00 => match funct3 {
                0b000 => {
                    // C.ADDI4SPN
                    let nzuimm = ciw_addi4spn_imm(raw_instruction);
                    if nzuimm == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::OpImm {
                        op: RegImmOp::Addi,
                        dest: c_reg_low(raw_instruction, 2),
                        src: Specifier::from_u5(2), // x2 == sp
                        immediate: nzuimm as i64,
                    })
                }
                0b001 => {
                    // C.FLD
                    Ok(Self::FLoad {
                        width: FLoadWidth::Fld,
                        dest: c_reg_low(raw_instruction, 2),
                        base: c_reg_low(raw_instruction, 7),
                        offset: cl_d_imm(raw_instruction) as i64,
                    })
                }
                0b010 => {
                    // C.LW
                    Ok(Self::Load {
                        width: LoadWidth::Lw,
                        dest: c_reg_low(raw_instruction, 2),
                        base: c_reg_low(raw_instruction, 7),
                        offset: cl_w_imm(raw_instruction) as i64,
                    })
                }
                0b011 => {
                    // C.LD
                    Ok(Self::Load {
                        width: LoadWidth::Ld,
                        dest: c_reg_low(raw_instruction, 2),
                        base: c_reg_low(raw_instruction, 7),
                        offset: cl_d_imm(raw_instruction) as i64,
                    })
                }
                0b101 => {
                    // C.FSD
                    Ok(Self::FStore {
                        width: FStoreWidth::Fsd,
                        src: c_reg_low(raw_instruction, 2),
                        base: c_reg_low(raw_instruction, 7),
                        offset: cl_d_imm(raw_instruction) as i64,
                    })
                }
                0b110 => {
                    // C.SW
                    Ok(Self::Store {
                        width: StoreWidth::Sw,
                        src: c_reg_low(raw_instruction, 2),
                        base: c_reg_low(raw_instruction, 7),
                        offset: cl_w_imm(raw_instruction) as i64,
                    })
                }
                0b111 => {
                    // C.SD
                    Ok(Self::Store {
                        width: StoreWidth::Sd,
                        src: c_reg_low(raw_instruction, 2),
                        base: c_reg_low(raw_instruction, 7),
                        offset: cl_d_imm(raw_instruction) as i64,
                    })
                }
                _ => Err(DecodeError::IllegalInstruction),
            },
            0b01 => match funct3 {
                0b000 => {
                    // C.NOP / C.ADDI (rd == 0 is a HINT, still decoded as ADDI x0, x0, imm)
                    let rd = ci_rd(raw_instruction);
                    Ok(Self::OpImm {
                        op: RegImmOp::Addi,
                        dest: rd,
                        src: rd,
                        immediate: ci_imm6(raw_instruction),
                    })
                }
                0b001 => {
                    // C.ADDIW (reserved if rd == x0)
                    let rd = ci_rd(raw_instruction);
                    if u8::from(rd) == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::Addiw {
                        dest: rd,
                        src: rd,
                        immediate: ci_imm6(raw_instruction),
                    })
                }
                0b010 => {
                    // C.LI
                    Ok(Self::OpImm {
                        op: RegImmOp::Addi,
                        dest: ci_rd(raw_instruction),
                        src: Specifier::X0,
                        immediate: ci_imm6(raw_instruction),
                    })
                }
                0b011 => {
                    let rd = ci_rd(raw_instruction);
                    match u8::from(rd) {
                        0 => Err(DecodeError::IllegalInstruction),
                        2 => {
                            // C.ADDI16SP
                            let imm = ci_addi16sp_imm(raw_instruction);
                            if imm == 0 {
                                return Err(DecodeError::IllegalInstruction);
                            }
                            Ok(Self::OpImm {
                                op: RegImmOp::Addi,
                                dest: rd,
                                src: rd,
                                immediate: imm,
                            })
                        }
                        _ => {
                            // C.LUI
                            let nzimm = ci_lui_imm(raw_instruction);
                            if nzimm == 0 {
                                return Err(DecodeError::IllegalInstruction);
                            }
                            Ok(Self::Lui {
                                dest: rd,
                                immediate: nzimm << 12,
                            })
                        }
                    }
                }
                0b100 => {
                    let funct2 = (raw_instruction >> 10) & 0b11;
                    let dest_src = c_reg_low(raw_instruction, 7);
                    match funct2 {
                        0b00 => Ok(Self::OpShiftImm {
                            op: RegShiftImmOp::Srli,
                            dest: dest_src,
                            src: dest_src,
                            shift_amount_u6: cb_shamt(raw_instruction),
                        }),
                        0b01 => Ok(Self::OpShiftImm {
                            op: RegShiftImmOp::Srai,
                            dest: dest_src,
                            src: dest_src,
                            shift_amount_u6: cb_shamt(raw_instruction),
                        }),
                        0b10 => Ok(Self::OpImm {
                            op: RegImmOp::Andi,
                            dest: dest_src,
                            src: dest_src,
                            immediate: ci_imm6(raw_instruction),
                        }),
                        _ /* 0b11 */ => {
                            let rs2 = c_reg_low(raw_instruction, 2);
                            let is_word = (raw_instruction >> 12) & 0b1 == 1;
                            let sub_funct2 = (raw_instruction >> 5) & 0b11;
                            if is_word {
                                match sub_funct2 {
                                    0b00 => Ok(Self::Op32 {
                                        op: RegRegOp32::Subw,
                                        dest: dest_src,
                                        src1: dest_src,
                                        src2: rs2,
                                    }),
                                    0b01 => Ok(Self::Op32 {
                                        op: RegRegOp32::Addw,
                                        dest: dest_src,
                                        src1: dest_src,
                                        src2: rs2,
                                    }),
                                    _ => Err(DecodeError::IllegalInstruction),
                                }
                            } else {
                                match sub_funct2 {
                                    0b00 => Ok(Self::Op {
                                        op: RegRegOp::Sub,
                                        dest: dest_src,
                                        src1: dest_src,
                                        src2: rs2,
                                    }),
                                    0b01 => Ok(Self::Op {
                                        op: RegRegOp::Xor,
                                        dest: dest_src,
                                        src1: dest_src,
                                        src2: rs2,
                                    }),
                                    0b10 => Ok(Self::Op {
                                        op: RegRegOp::Or,
                                        dest: dest_src,
                                        src1: dest_src,
                                        src2: rs2,
                                    }),
                                    _ /* 0b11 */ => Ok(Self::Op {
                                        op: RegRegOp::And,
                                        dest: dest_src,
                                        src1: dest_src,
                                        src2: rs2,
                                    }),
                                }
                            }
                        }
                    }
                }
                0b101 => Ok(Self::Jal {
                    dest: Specifier::X0,
                    offset: cj_imm(raw_instruction),
                }),
                0b110 => Ok(Self::Branch {
                    condition: BranchCondition::Beq,
                    src1: c_reg_low(raw_instruction, 7),
                    src2: Specifier::X0,
                    offset: cb_branch_imm(raw_instruction),
                }),
                0b111 => Ok(Self::Branch {
                    condition: BranchCondition::Bne,
                    src1: c_reg_low(raw_instruction, 7),
                    src2: Specifier::X0,
                    offset: cb_branch_imm(raw_instruction),
                }),
                _ => Err(DecodeError::IllegalInstruction),
            },
            0b10 => match funct3 {
                0b000 => {
                    // C.SLLI
                    let rd = ci_rd(raw_instruction);
                    if u8::from(rd) == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::OpShiftImm {
                        op: RegShiftImmOp::Slli,
                        dest: rd,
                        src: rd,
                        shift_amount_u6: cb_shamt(raw_instruction),
                    })
                }
                0b001 => {
                    // C.FLDSP
                    Ok(Self::FLoad {
                        width: FLoadWidth::Fld,
                        dest: ci_rd(raw_instruction),
                        base: Specifier::from_u5(2),
                        offset: ci_ldsp_imm(raw_instruction) as i64,
                    })
                }
                0b010 => {
                    // C.LWSP (reserved if rd == x0)
                    let rd = ci_rd(raw_instruction);
                    if u8::from(rd) == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::Load {
                        width: LoadWidth::Lw,
                        dest: rd,
                        base: Specifier::from_u5(2),
                        offset: ci_lwsp_imm(raw_instruction) as i64,
                    })
                }
                0b011 => {
                    // C.LDSP (reserved if rd == x0)
                    let rd = ci_rd(raw_instruction);
                    if u8::from(rd) == 0 {
                        return Err(DecodeError::IllegalInstruction);
                    }
                    Ok(Self::Load {
                        width: LoadWidth::Ld,
                        dest: rd,
                        base: Specifier::from_u5(2),
                        offset: ci_ldsp_imm(raw_instruction) as i64,
                    })
                }
                0b100 => {
                    let bit12 = (raw_instruction >> 12) & 0b1;
                    let rd_rs1 = ci_rd(raw_instruction);
                    let rs2 = cr_rs2(raw_instruction);
                    match (bit12, u8::from(rs2)) {
                        (0, 0) => {
                            // C.JR (reserved if rs1 == x0)
                            if u8::from(rd_rs1) == 0 {
                                return Err(DecodeError::IllegalInstruction);
                            }
                            Ok(Self::Jalr {
                                dest: Specifier::X0,
                                base: rd_rs1,
                                offset: 0,
                            })
                        }
                        (0, _) => Ok(Self::Op {
                            // C.MV
                            op: RegRegOp::Add,
                            dest: rd_rs1,
                            src1: Specifier::X0,
                            src2: rs2,
                        }),
                        (1, 0) => {
                            if u8::from(rd_rs1) == 0 {
                                Ok(Self::Ebreak) // C.EBREAK
                            } else {
                                Ok(Self::Jalr {
                                    // C.JALR
                                    dest: Specifier::from_u5(1),
                                    base: rd_rs1,
                                    offset: 0,
                                })
                            }
                        }
                        (1, _) => Ok(Self::Op {
                            // C.ADD
                            op: RegRegOp::Add,
                            dest: rd_rs1,
                            src1: rd_rs1,
                            src2: rs2,
                        }),
                        _ => unreachable!(),
                    }
                }
                0b101 => {
                    // C.FSDSP
                    Ok(Self::FStore {
                        width: FStoreWidth::Fsd,
                        src: cr_rs2(raw_instruction),
                        base: Specifier::from_u5(2),
                        offset: css_d_imm(raw_instruction) as i64,
                    })
                }
                0b110 => {
                    // C.SWSP
                    Ok(Self::Store {
                        width: StoreWidth::Sw,
                        src: cr_rs2(raw_instruction),
                        base: Specifier::from_u5(2),
                        offset: css_w_imm(raw_instruction) as i64,
                    })
                }
                0b111 => {
                    // C.SDSP
                    Ok(Self::Store {
                        width: StoreWidth::Sd,
                        src: cr_rs2(raw_instruction),
                        base: Specifier::from_u5(2),
                        offset: css_d_imm(raw_instruction) as i64,
                    })
                }
                _ => Err(DecodeError::IllegalInstruction),
            },
            _ => Err(DecodeError::IllegalInstruction), // quadrant 0b11 is never compressed
        }
    }
}

// TODO: Create either more decode errors or join this in to one, because the current variants are
//       misleading! (i.e. they both indicate this is an unsupported encoding, which means it may
//       be reserved, not implemented, part of another extension, intended for a coprocessor, etc.)
#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    #[error("instruction has unsupported opcode")]
    UnsupportedOpcode,
    #[error("illegal instruction")]
    IllegalInstruction,
}

/// Returns the 7-bit *opcode* value of the instruction, or `None` if it isn't supported.
fn opcode(raw_instruction: u32) -> Option<Opcode> {
    #[allow(clippy::unusual_byte_groupings)]
    match raw_instruction & 0x7F {
        0b00_000_11 => Some(Opcode::Load),
        0b00_001_11 => Some(Opcode::LoadFp),
        // custom-0
        0b00_011_11 => Some(Opcode::MiscMem),
        0b00_100_11 => Some(Opcode::OpImm),
        0b00_101_11 => Some(Opcode::Auipc),
        0b00_110_11 => Some(Opcode::OpImm32),
        // 48b
        0b01_000_11 => Some(Opcode::Store),
        0b01_001_11 => Some(Opcode::StoreFp),
        // custom-1
        0b01_011_11 => Some(Opcode::Amo),
        0b01_100_11 => Some(Opcode::Op),
        0b01_101_11 => Some(Opcode::Lui),
        0b01_110_11 => Some(Opcode::Op32),
        // 64b
        // Madd = 0b10_000_11,
        // Msub = 0b10_001_11,
        // Nmsub = 0b10_010_11,
        // Nmadd = 0b10_011_11,
        // OpFp = 0b10_100_11,
        // reserved
        // custom-2/rv128
        // 48b
        0b11_000_11 => Some(Opcode::Branch),
        0b11_001_11 => Some(Opcode::Jalr),
        // reserved
        0b11_011_11 => Some(Opcode::Jal),
        0b11_100_11 => Some(Opcode::System),
        // reserved
        // custom-3/rv128
        // >= 80b
        _ => None,
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
fn rd(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
fn rs1(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 15) & 0x1F) as u8)
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
fn rs2(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 20) & 0x1F) as u8)
}

fn csr(raw_instruction: u32) -> CsrSpecifier {
    (raw_instruction >> 20) as u16
}

fn i_funct(raw_instruction: u32) -> Option<RegImmOp> {
    match funct3(raw_instruction) {
        0b000 => Some(RegImmOp::Addi),
        0b010 => Some(RegImmOp::Slti),
        0b011 => Some(RegImmOp::Sltiu),
        0b100 => Some(RegImmOp::Xori),
        0b110 => Some(RegImmOp::Ori),
        0b111 => Some(RegImmOp::Andi),
        _ => None,
    }
}

/// Decodes the full-width (`OP-IMM`) shift-by-immediate funct, using a 6-bit funct6
/// (`inst[31:26]`) since the shift amount itself now occupies `inst[25:20]`.
fn i_shfunct(raw_instruction: u32) -> Option<RegShiftImmOp> {
    let funct6 = (raw_instruction >> 26) & 0x3F;
    match (funct6, funct3(raw_instruction)) {
        (0b000000, 0b001) => Some(RegShiftImmOp::Slli),
        (0b000000, 0b101) => Some(RegShiftImmOp::Srli),
        (0b010000, 0b101) => Some(RegShiftImmOp::Srai),
        _ => None,
    }
}

/// Decodes the `OP-IMM-32` shift-by-immediate funct, which keeps the original RV32-style 7-bit
/// funct7 (`inst[31:25]`) and 5-bit shift amount, since it shifts a 32-bit value.
fn i_shfunct32(raw_instruction: u32) -> Option<RegShiftImmOp32> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b001) => Some(RegShiftImmOp32::Slliw),
        (0b0000000, 0b101) => Some(RegShiftImmOp32::Srliw),
        (0b0100000, 0b101) => Some(RegShiftImmOp32::Sraiw),
        _ => None,
    }
}

fn i_sys(raw_instruction: u32) -> Option<SysFunct> {
    match funct3(raw_instruction) {
        0b000 => Some(SysFunct::Priv),
        0b001 => Some(SysFunct::Csrrw),
        0b010 => Some(SysFunct::Csrrs),
        0b011 => Some(SysFunct::Csrrc),
        0b101 => Some(SysFunct::Csrrwi),
        0b110 => Some(SysFunct::Csrrsi),
        0b111 => Some(SysFunct::Csrrci),
        _ => None,
    }
}

fn sys_priv(raw_instruction: u32) -> Option<SysPriv> {
    if u8::from(rd(raw_instruction)) != 0 {
        return None;
    }
    if funct7(raw_instruction) == 0b0001001 {
        return Some(SysPriv::SfenceVma);
    }
    if u8::from(rs1(raw_instruction)) != 0 {
        return None;
    }
    let funct = funct12(raw_instruction);
    if funct >> 11 != 0 {
        // Custom SYSTEM instruction, but none are supported.
        return None;
    }
    match funct {
        0 => Some(SysPriv::Ecall),
        1 => Some(SysPriv::Ebreak),
        _ => match (funct7(raw_instruction), u8::from(rs2(raw_instruction))) {
            (0b0001000, 2) => Some(SysPriv::Sret),
            (0b0011000, 2) => Some(SysPriv::Mret),
            (0b0001000, 5) => Some(SysPriv::Wfi),
            _ => None,
        },
    }
}

fn i_mem(raw_instruction: u32) -> Option<MemFunct> {
    match funct3(raw_instruction) {
        0b000 => Some(MemFunct::Fence),
        0b001 => Some(MemFunct::FenceI),
        _ => None,
    }
}

fn i_width(raw_instruction: u32) -> Option<LoadWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(LoadWidth::Lb),
        0b001 => Some(LoadWidth::Lh),
        0b010 => Some(LoadWidth::Lw),
        0b011 => Some(LoadWidth::Ld),
        0b100 => Some(LoadWidth::Lbu),
        0b101 => Some(LoadWidth::Lhu),
        0b110 => Some(LoadWidth::Lwu),
        _ => None,
    }
}

fn i_fwidth(raw_instruction: u32) -> Option<FLoadWidth> {
    match funct3(raw_instruction) {
        0b010 => Some(FLoadWidth::Flw),
        0b011 => Some(FLoadWidth::Fld),
        _ => None,
    }
}

fn s_width(raw_instruction: u32) -> Option<StoreWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(StoreWidth::Sb),
        0b001 => Some(StoreWidth::Sh),
        0b010 => Some(StoreWidth::Sw),
        0b011 => Some(StoreWidth::Sd),
        _ => None,
    }
}

fn s_fwidth(raw_instruction: u32) -> Option<FStoreWidth> {
    match funct3(raw_instruction) {
        0b010 => Some(FStoreWidth::Fsw),
        0b011 => Some(FStoreWidth::Fsd),
        _ => None,
    }
}

fn r_funct(raw_instruction: u32) -> Option<RegRegOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b000) => Some(RegRegOp::Add),
        (0b0000000, 0b001) => Some(RegRegOp::Sll),
        (0b0000000, 0b010) => Some(RegRegOp::Slt),
        (0b0000000, 0b011) => Some(RegRegOp::Sltu),
        (0b0000000, 0b100) => Some(RegRegOp::Xor),
        (0b0000000, 0b101) => Some(RegRegOp::Srl),
        (0b0000000, 0b110) => Some(RegRegOp::Or),
        (0b0000000, 0b111) => Some(RegRegOp::And),
        (0b0100000, 0b000) => Some(RegRegOp::Sub),
        (0b0100000, 0b101) => Some(RegRegOp::Sra),
        // funct7 == MULDIV
        (0b0000001, 0b000) => Some(RegRegOp::Mul),
        (0b0000001, 0b001) => Some(RegRegOp::Mulh),
        (0b0000001, 0b010) => Some(RegRegOp::Mulhsu),
        (0b0000001, 0b011) => Some(RegRegOp::Mulhu),
        (0b0000001, 0b100) => Some(RegRegOp::Div),
        (0b0000001, 0b101) => Some(RegRegOp::Divu),
        (0b0000001, 0b110) => Some(RegRegOp::Rem),
        (0b0000001, 0b111) => Some(RegRegOp::Remu),
        _ => None,
    }
}

fn r_funct32(raw_instruction: u32) -> Option<RegRegOp32> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b0000000, 0b000) => Some(RegRegOp32::Addw),
        (0b0100000, 0b000) => Some(RegRegOp32::Subw),
        (0b0000000, 0b001) => Some(RegRegOp32::Sllw),
        (0b0000000, 0b101) => Some(RegRegOp32::Srlw),
        (0b0100000, 0b101) => Some(RegRegOp32::Sraw),
        // funct7 == MULDIV
        (0b0000001, 0b000) => Some(RegRegOp32::Mulw),
        (0b0000001, 0b100) => Some(RegRegOp32::Divw),
        (0b0000001, 0b101) => Some(RegRegOp32::Divuw),
        (0b0000001, 0b110) => Some(RegRegOp32::Remw),
        (0b0000001, 0b111) => Some(RegRegOp32::Remuw),
        _ => None,
    }
}

fn b_funct(raw_instruction: u32) -> Option<BranchCondition> {
    match funct3(raw_instruction) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

fn amo_op(raw_instruction: u32) -> Option<AmoOp> {
    match funct7(raw_instruction) >> 2 {
        0b00010 => Some(AmoOp::Lr),
        0b00011 => Some(AmoOp::Sc),
        0b00001 => Some(AmoOp::Swap),
        0b00000 => Some(AmoOp::Add),
        0b00100 => Some(AmoOp::Xor),
        0b01100 => Some(AmoOp::And),
        0b01000 => Some(AmoOp::Or),
        // `amomin`/`amomax`/`amominu`/`amomaxu` are not decoded: this core does not implement the
        // atomic min/max variants.
        _ => None,
    }
}

fn amo_width(raw_instruction: u32) -> Option<AmoWidth> {
    match funct3(raw_instruction) {
        0b010 => Some(AmoWidth::Word),
        0b011 => Some(AmoWidth::Doubleword),
        _ => None,
    }
}

fn amo_rl(raw_instruction: u32) -> bool {
    (raw_instruction >> 25) & 0b1 == 1
}

fn amo_aq(raw_instruction: u32) -> bool {
    (raw_instruction >> 26) & 0b1 == 1
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
fn funct3(raw_instruction: u32) -> u8 {
    ((raw_instruction >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
fn funct7(raw_instruction: u32) -> u8 {
    (raw_instruction >> 25) as u8
}

/// Returns the 6-bit *shamt* value used for full-width (`OP-IMM`) shift instructions.
fn shamt6(raw_instruction: u32) -> u32 {
    (raw_instruction >> 20) & 0x3F
}

/// Returns the 5-bit *shamt* value used for `OP-IMM-32` (32-bit) shift instructions.
fn shamt5(raw_instruction: u32) -> u32 {
    (raw_instruction >> 20) & 0x1F
}

/// Returns the 12-bit I-immediate sign-extended to 64 bits.
fn i_imm(raw_instruction: u32) -> i64 {
    (raw_instruction as i32 >> 20) as i64
}

/// Returns the 12-bit I-immediate zero-extended to 32 bits.
fn funct12(raw_instruction: u32) -> u32 {
    raw_instruction >> 20
}

/// Returns the 12-bit S-immediate sign-extended to 64 bits.
fn s_imm(raw_instruction: u32) -> i64 {
    let imm_11_5 = raw_instruction & 0xFE00_0000;
    let imm_4_0 = raw_instruction & 0x0000_0F80;
    ((imm_11_5 | (imm_4_0 << 13)) as i32 >> 20) as i64
}

/// Returns the 13-bit B-immediate sign-extended to 64 bits.
fn b_imm(raw_instruction: u32) -> i64 {
    let imm_12 = raw_instruction & 0x8000_0000;
    let imm_10_5 = raw_instruction & 0x7E00_0000;
    let imm_4_1 = raw_instruction & 0x0000_0F00;
    let imm_11 = raw_instruction & 0x0000_0080;
    ((imm_12 | (imm_11 << 23) | (imm_10_5 >> 1) | (imm_4_1 << 12)) as i32 >> 19) as i64
}

/// Returns the signed 32-bit U-immediate, sign-extended to 64 bits.
fn u_imm(raw_instruction: u32) -> i64 {
    ((raw_instruction & 0xFFFF_F000) as i32) as i64
}

/// Returns the 21-bit J-immediate sign-extended to 64 bits.
fn j_imm(raw_instruction: u32) -> i64 {
    let imm_20 = raw_instruction & 0x8000_0000;
    let imm_10_1 = raw_instruction & 0x7FE0_0000;
    let imm_11 = raw_instruction & 0x0010_0000;
    let imm_19_12 = raw_instruction & 0x000F_F000;
    ((imm_20 | (imm_19_12 << 11) | (imm_11 << 2) | (imm_10_1 >> 9)) as i32 >> 11) as i64
}

// --- Compressed (16-bit) instruction field extraction ---
//
// Register specifiers in the `CIW`/`CL`/`CS`/`CA`/`CB` formats are 3-bit fields referring to
// registers `x8`-`x15`; [`c_reg_low`] maps such a field (at bit offset `at`, width 3) to its full
// 5-bit specifier. Full 5-bit `rd`/`rs1`/`rs2` fields (`CI`/`CR`/`CSS`) are extracted directly.

fn c_reg_low(raw_instruction: u16, at: u32) -> Specifier {
    Specifier::from_u5(((raw_instruction >> at) & 0b111) as u8 + 8)
}

/// Full 5-bit `rd`/`rs1` field at `inst[11:7]`, used by `CI` formats.
fn ci_rd(raw_instruction: u16) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 7) & 0x1F) as u8)
}

/// Full 5-bit `rs2` field at `inst[6:2]`, used by `CR` formats.
fn cr_rs2(raw_instruction: u16) -> Specifier {
    Specifier::from_u5(((raw_instruction >> 2) & 0x1F) as u8)
}

/// `C.ADDI4SPN` unsigned immediate: `nzuimm[5:4|9:6|2|3] = inst[12:5]`.
fn ciw_addi4spn_imm(raw_instruction: u16) -> u32 {
    let inst = raw_instruction as u32;
    let bit = |i: u32| (inst >> i) & 1;
    (bit(12) << 5)
        | (bit(11) << 4)
        | (bit(10) << 9)
        | (bit(9) << 8)
        | (bit(8) << 7)
        | (bit(7) << 6)
        | (bit(6) << 2)
        | (bit(5) << 3)
}

/// `C.LW`/`C.SW` immediate: `imm[5:3|2|6] = inst[12:10|6|5]`, unsigned.
fn cl_w_imm(raw_instruction: u16) -> u32 {
    let inst = raw_instruction as u32;
    let bit = |i: u32| (inst >> i) & 1;
    let imm_5_3 = (inst >> 10) & 0b111;
    (imm_5_3 << 3) | (bit(6) << 2) | (bit(5) << 6)
}

/// `C.LD`/`C.SD`/`C.FLD`/`C.FSD` immediate: `imm[5:3|7:6] = inst[12:10|6:5]`, unsigned.
fn cl_d_imm(raw_instruction: u16) -> u32 {
    let inst = raw_instruction as u32;
    let imm_5_3 = (inst >> 10) & 0b111;
    let imm_7_6 = (inst >> 5) & 0b11;
    (imm_5_3 << 3) | (imm_7_6 << 6)
}

/// `C.ADDI`/`C.ADDIW`/`C.LI`/`C.ANDI` 6-bit signed immediate: `imm[5] = inst[12]`,
/// `imm[4:0] = inst[6:2]`, sign-extended to 64 bits.
fn ci_imm6(raw_instruction: u16) -> i64 {
    let inst = raw_instruction as u32;
    let imm = (((inst >> 12) & 1) << 5) | ((inst >> 2) & 0x1F);
    sign_extend(imm, 6)
}

/// `C.ADDI16SP` immediate: `imm[9|4|6|8:7|5] = inst[12|6|5|4:3|2]`, scaled (multiple of 16),
/// sign-extended to 64 bits.
fn ci_addi16sp_imm(raw_instruction: u16) -> i64 {
    let inst = raw_instruction as u32;
    let bit = |i: u32| (inst >> i) & 1;
    let imm = (bit(12) << 9)
        | (bit(6) << 4)
        | (bit(5) << 6)
        | (((inst >> 3) & 0b11) << 7)
        | (bit(2) << 5);
    sign_extend(imm, 10)
}

/// `C.LUI` non-zero immediate: `nzimm[17|16:12] = inst[12|6:2]`, returned as the signed 6-bit
/// value occupying bits `[5:0]` (i.e. not yet shifted into position `[17:12]`).
fn ci_lui_imm(raw_instruction: u16) -> i64 {
    ci_imm6(raw_instruction)
}

/// Shift amount for `C.SLLI`/`C.SRLI`/`C.SRAI`: `shamt[5] = inst[12]`, `shamt[4:0] = inst[6:2]`.
fn cb_shamt(raw_instruction: u16) -> u32 {
    let inst = raw_instruction as u32;
    (((inst >> 12) & 1) << 5) | ((inst >> 2) & 0x1F)
}

/// `C.J`/`C.JAL` jump target: `imm[11|4|9:8|10|6|7|3:1|5] = inst[12|11|10:9|8|7|6|5:3|2]`,
/// sign-extended to 64 bits.
fn cj_imm(raw_instruction: u16) -> i64 {
    let inst = raw_instruction as u32;
    let bit = |i: u32| (inst >> i) & 1;
    let imm = (bit(12) << 11)
        | (bit(11) << 4)
        | (((inst >> 9) & 0b11) << 8)
        | (bit(8) << 10)
        | (bit(7) << 6)
        | (bit(6) << 7)
        | (((inst >> 3) & 0b111) << 1)
        | (bit(2) << 5);
    sign_extend(imm, 12)
}

/// `C.BEQZ`/`C.BNEZ` branch offset: `imm[8|4:3|7:6|2:1|5] = inst[12|11:10|6:5|4:3|2]`,
/// sign-extended to 64 bits.
fn cb_branch_imm(raw_instruction: u16) -> i64 {
    let inst = raw_instruction as u32;
    let bit = |i: u32| (inst >> i) & 1;
    let imm = (bit(12) << 8)
        | (((inst >> 10) & 0b11) << 3)
        | (((inst >> 5) & 0b11) << 6)
        | (((inst >> 3) & 0b11) << 1)
        | (bit(2) << 5);
    sign_extend(imm, 9)
}

/// `C.LWSP` immediate: `imm[5|4:2|7:6] = inst[12|6:4|3:2]`, unsigned.
fn ci_lwsp_imm(raw_instruction: u16) -> u32 {
    let inst = raw_instruction as u32;
    let bit = |i: u32| (inst >> i) & 1;
    (bit(12) << 5) | (((inst >> 4) & 0b111) << 2) | (((inst >> 2) & 0b11) << 6)
}

/// `C.LDSP`/`C.FLDSP` immediate: `imm[5|4:3|8:6] = inst[12|6:5|4:2]`, unsigned.
fn ci_ldsp_imm(raw_instruction: u16) -> u32 {
    let inst = raw_instruction as u32;
    let bit = |i: u32| (inst >> i) & 1;
    (bit(12) << 5) | (((inst >> 5) & 0b11) << 3) | (((inst >> 2) & 0b111) << 6)
}

/// `C.SWSP` immediate: `imm[5:2|7:6] = inst[12:9|8:7]`, unsigned.
fn css_w_imm(raw_instruction: u16) -> u32 {
    let inst = raw_instruction as u32;
    (((inst >> 9) & 0xF) << 2) | (((inst >> 7) & 0b11) << 6)
}

/// `C.SDSP`/`C.FSDSP` immediate: `imm[5:3|8:6] = inst[12:10|9:7]`, unsigned.
fn css_d_imm(raw_instruction: u16) -> u32 {
    let inst = raw_instruction as u32;
    (((inst >> 10) & 0b111) << 3) | (((inst >> 7) & 0b111) << 6)
}

/// Sign-extends the lowest `bits` bits of `value` to a full 64-bit signed value.
fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 32 - bits;
    (((value << shift) as i32) >> shift) as i64
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    Load,
    LoadFp,
    OpImm,
    Auipc,
    OpImm32,
    Store,
    StoreFp,
    Amo,
    Op,
    Lui,
    Op32,
    Jal,
    Jalr,
    Branch,
    MiscMem,
    System,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SysFunct {
    Priv,
    Csrrw,
    Csrrs,
    Csrrc,
    Csrrwi,
    Csrrsi,
    Csrrci,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SysPriv {
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Wfi,
    SfenceVma,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum MemFunct {
    Fence,
    FenceI,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i_imm() {
        assert_eq!(0, i_imm(0x0000_0000));
        assert_eq!(-1, i_imm(0xFFF0_0000));
        assert_eq!(2047, i_imm(2047 << 20));
        assert_eq!(-2048, i_imm(0x8000_0000));
        assert_eq!(-42, i_imm((-42_i32 << 20) as u32));
        // Check other bits are ignored
        assert_eq!(0, i_imm(0x000F_FFFF));
        assert_eq!(-1, i_imm(0xFFF1_2345));
        assert_eq!(1209, i_imm((1209 << 20) | 0x000C_D10A));
    }

    #[test]
    fn test_decode_addiw() {
        // addiw x1, x2, -1
        let raw = (0xFFF << 20) | (2 << 15) | (0b000 << 12) | (1 << 7) | 0b0011011;
        assert_eq!(
            Instruction::Addiw {
                dest: Specifier::from_u5(1),
                src: Specifier::from_u5(2),
                immediate: -1,
            },
            Instruction::decode(raw).unwrap()
        );
    }

    #[test]
    fn test_decode_ld_sd() {
        // ld x5, 8(x6)
        let raw = (8 << 20) | (6 << 15) | (0b011 << 12) | (5 << 7) | 0b0000011;
        assert_eq!(
            Instruction::Load {
                width: LoadWidth::Ld,
                dest: Specifier::from_u5(5),
                base: Specifier::from_u5(6),
                offset: 8,
            },
            Instruction::decode(raw).unwrap()
        );
        // sd x5, 8(x6)
        let raw = (0 << 25) | (5 << 20) | (6 << 15) | (0b011 << 12) | (8 << 7) | 0b0100011;
        assert_eq!(
            Instruction::Store {
                width: StoreWidth::Sd,
                src: Specifier::from_u5(5),
                base: Specifier::from_u5(6),
                offset: 8,
            },
            Instruction::decode(raw).unwrap()
        );
    }

    #[test]
    fn test_decode_addw() {
        // addw x1, x2, x3
        let raw = (0 << 25) | (3 << 20) | (2 << 15) | (0b000 << 12) | (1 << 7) | 0b0111011;
        assert_eq!(
            Instruction::Op32 {
                op: RegRegOp32::Addw,
                dest: Specifier::from_u5(1),
                src1: Specifier::from_u5(2),
                src2: Specifier::from_u5(3),
            },
            Instruction::decode(raw).unwrap()
        );
    }

    #[test]
    fn test_decode_fence_i() {
        // fence.i  =>  opcode = MISC-MEM (0x0F), funct3 = 0b001, all other fields zero.
        let raw: u32 = 0b0000000_00000_00000_001_00000_0001111;
        assert_eq!(Instruction::FenceI, Instruction::decode(raw).unwrap());
    }

    #[test]
    fn test_is_compressed() {
        assert!(Instruction::is_compressed(0b00));
        assert!(Instruction::is_compressed(0b01));
        assert!(Instruction::is_compressed(0b10));
        assert!(!Instruction::is_compressed(0b11));
    }

    #[test]
    fn test_decode_compressed_addi4spn() {
        // c.addi4spn x8, 4  =>  addi x8, x2, 4
        // nzuimm[5:4|9:6|2|3] = inst[12:5]; here we only set bit 3 -> inst[5] = 1
        let raw: u16 = 0b000_0_0000_0100_00;
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::from_u5(8),
                src: Specifier::from_u5(2),
                immediate: 4,
            },
            Instruction::decode_compressed(raw).unwrap()
        );
    }

    #[test]
    fn test_decode_compressed_addi4spn_zero_immediate_illegal() {
        // c.addi4spn with nzuimm == 0 is reserved, not addi x_, x2, 0.
        let raw: u16 = 0b000_0_0000_0000_00;
        assert_eq!(
            DecodeError::IllegalInstruction,
            Instruction::decode_compressed(raw).unwrap_err()
        );
    }

    #[test]
    fn test_decode_compressed_addi() {
        // c.addi x5, 1 => addi x5, x5, 1
        let raw: u16 = 0b000_0_00101_00001_01;
        assert_eq!(
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::from_u5(5),
                src: Specifier::from_u5(5),
                immediate: 1,
            },
            Instruction::decode_compressed(raw).unwrap()
        );
    }

    #[test]
    fn test_decode_compressed_mv() {
        // c.mv x5, x6 => add x5, x0, x6
        let raw: u16 = 0b1000_00101_00110_10;
        assert_eq!(
            Instruction::Op {
                op: RegRegOp::Add,
                dest: Specifier::from_u5(5),
                src1: Specifier::X0,
                src2: Specifier::from_u5(6),
            },
            Instruction::decode_compressed(raw).unwrap()
        );
    }

    #[test]
    fn test_decode_compressed_ebreak() {
        // c.ebreak
        let raw: u16 = 0b1001_00000_00000_10;
        assert_eq!(Instruction::Ebreak, Instruction::decode_compressed(raw).unwrap());
    }

    #[test]
    fn test_decode_compressed_zero_is_illegal() {
        assert_eq!(
            DecodeError::IllegalInstruction,
            Instruction::decode_compressed(0).unwrap_err()
        );
    }
}
