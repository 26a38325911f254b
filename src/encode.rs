//! Instruction encoder: typed record in, packed 32-bit word plus pending
//! fixups out. Pure and stateless apart from the layout table lookup.

use tracing::trace;

use crate::bits::{fits_field, fits_signed, fits_unsigned, set_field};
use crate::fixup::Fixup;
use crate::layout::{
    Format, BT_IMM16_BITS, BT_IMM20_BITS, BT_PAYLOAD_OFFSET, OPERAND16_OFFSET, OPERAND_OFFSET,
    REG1_OFFSET, REG_BITS, RI_FLAG_BIT, RI_IMM_BITS, RI_IMM_OFFSET, RI_REG_OFFSET,
};
use crate::operand::{BranchTarget, Imm, Inst, MemTarget, Operand, Reg, SourceLoc, SymExpr};

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{loc}: immediate {value:#x} does not fit the {bits}-bit field of `{mnemonic}`")]
    ImmOutOfRange { mnemonic: &'static str, value: i64, bits: u32, loc: SourceLoc },
    #[error("{loc}: `{mnemonic}` cannot take the symbolic operand `{expr}`")]
    SymbolNotAllowed { mnemonic: &'static str, expr: SymExpr, loc: SourceLoc },
}

/// Encode one instruction. `offset` is the byte offset the word will occupy
/// in the section being emitted; it is recorded in any fixup produced.
pub fn encode(inst: &Inst, offset: u32) -> Result<(u32, Vec<Fixup>), EncodeError> {
    let desc = inst.op.desc();
    let mut word = inst.op as u32;
    let mut fixups = Vec::new();

    match desc.format {
        Format::Nullary => {
            expect_arity(inst, 0);
        }
        Format::Reg => {
            expect_arity(inst, 1);
            word = set_field(word, REG1_OFFSET, REG_BITS, expect_reg(inst, 0).0 as u32);
        }
        Format::RegRi => {
            expect_arity(inst, 2);
            word = set_field(word, REG1_OFFSET, REG_BITS, expect_reg(inst, 0).0 as u32);
            let field = encode_reg_or_imm(inst, 1)?;
            word = set_field(word, OPERAND_OFFSET, RI_IMM_OFFSET + RI_IMM_BITS, field);
        }
        Format::RegImm20 => {
            expect_arity(inst, 2);
            word = set_field(word, REG1_OFFSET, REG_BITS, expect_reg(inst, 0).0 as u32);
            let field = encode_imm_field(inst, 1, BT_IMM20_BITS, offset, &mut fixups)?;
            word = set_field(word, OPERAND_OFFSET, BT_IMM20_BITS + 1, field);
        }
        Format::RegImm16 => {
            expect_arity(inst, 2);
            word = set_field(word, REG1_OFFSET, REG_BITS, expect_reg(inst, 0).0 as u32);
            let field = encode_imm_field(inst, 1, BT_IMM16_BITS, offset, &mut fixups)?;
            word = set_field(word, OPERAND16_OFFSET, BT_IMM16_BITS + 1, field);
        }
        Format::Mem => {
            expect_arity(inst, 2);
            word = set_field(word, REG1_OFFSET, REG_BITS, expect_reg(inst, 0).0 as u32);
            let field = encode_mem(inst, expect_mem(inst, 1))?;
            word = set_field(word, OPERAND_OFFSET, RI_IMM_OFFSET + RI_IMM_BITS, field);
        }
        Format::Jump => {
            expect_arity(inst, 1);
            let field = encode_branch(inst, 0, BT_IMM20_BITS, offset, &mut fixups)?;
            word = set_field(word, OPERAND_OFFSET, BT_IMM20_BITS + 1, field);
        }
        Format::CondJump => {
            expect_arity(inst, 1);
            let field = encode_branch(inst, 0, BT_IMM16_BITS, offset, &mut fixups)?;
            word = set_field(word, OPERAND16_OFFSET, BT_IMM16_BITS + 1, field);
        }
    }

    trace!(mnemonic = desc.mnemonic, offset, word, fixups = fixups.len(), "encoded");
    Ok((word, fixups))
}

/// reg-or-imm15 field: register in the low bits, or the is-immediate flag
/// plus a 15-bit value.
fn encode_reg_or_imm(inst: &Inst, idx: usize) -> Result<u32, EncodeError> {
    match &inst.operands[idx] {
        Operand::Reg(r) => Ok(set_field(0, RI_REG_OFFSET, REG_BITS, r.0 as u32)),
        Operand::Imm(Imm::Val(v)) => {
            if !fits_field(*v, RI_IMM_BITS) {
                return Err(EncodeError::ImmOutOfRange {
                    mnemonic: inst.op.mnemonic(),
                    value: *v,
                    bits: RI_IMM_BITS,
                    loc: inst.loc,
                });
            }
            let mut f = 1u32 << RI_FLAG_BIT;
            f = set_field(f, RI_IMM_OFFSET, RI_IMM_BITS, *v as u32);
            Ok(f)
        }
        Operand::Imm(Imm::Sym(expr)) => Err(EncodeError::SymbolNotAllowed {
            mnemonic: inst.op.mnemonic(),
            expr: expr.clone(),
            loc: inst.loc,
        }),
        other => operand_mismatch(inst, idx, "register or immediate", other),
    }
}

/// Memory target: base register, offset-present flag, 15-bit offset. A zero
/// offset takes the optimized bare-register form.
fn encode_mem(inst: &Inst, mem: MemTarget) -> Result<u32, EncodeError> {
    let mut f = set_field(0, RI_REG_OFFSET, REG_BITS, mem.base.0 as u32);
    if mem.offset == 0 {
        return Ok(f);
    }
    if !fits_field(mem.offset as i64, RI_IMM_BITS) {
        return Err(EncodeError::ImmOutOfRange {
            mnemonic: inst.op.mnemonic(),
            value: mem.offset as i64,
            bits: RI_IMM_BITS,
            loc: inst.loc,
        });
    }
    f |= 1 << RI_FLAG_BIT;
    f = set_field(f, RI_IMM_OFFSET, RI_IMM_BITS, mem.offset as u32);
    Ok(f)
}

/// Immediate-only field (`li`, `liu`, `la`): value-present flag in bit 0,
/// payload above it. Symbolic values defer to a fixup and leave the field
/// zero.
fn encode_imm_field(
    inst: &Inst,
    idx: usize,
    bits: u32,
    offset: u32,
    fixups: &mut Vec<Fixup>,
) -> Result<u32, EncodeError> {
    match &inst.operands[idx] {
        Operand::Imm(Imm::Val(v)) => {
            // The 16-bit field is zero-extended (`liu`), the 20-bit one
            // sign-extended.
            let ok = if bits == BT_IMM16_BITS {
                fits_unsigned(*v, bits)
            } else {
                fits_signed(*v, bits)
            };
            if !ok {
                return Err(EncodeError::ImmOutOfRange {
                    mnemonic: inst.op.mnemonic(),
                    value: *v,
                    bits,
                    loc: inst.loc,
                });
            }
            Ok(imm_payload(*v, bits))
        }
        Operand::Imm(Imm::Sym(expr)) => {
            defer_symbol(inst, expr, offset, fixups)?;
            Ok(0)
        }
        other => operand_mismatch(inst, idx, "immediate", other),
    }
}

/// Branch target: register with the flag clear, or immediate with the flag
/// set. A literal zero still sets the flag but leaves the payload empty, so
/// no evaluated fixup is needed.
fn encode_branch(
    inst: &Inst,
    idx: usize,
    bits: u32,
    offset: u32,
    fixups: &mut Vec<Fixup>,
) -> Result<u32, EncodeError> {
    let target = match &inst.operands[idx] {
        Operand::Branch(t) => t,
        other => return operand_mismatch(inst, idx, "branch target", other),
    };
    match target {
        BranchTarget::Reg(r) => Ok(set_field(0, BT_PAYLOAD_OFFSET, REG_BITS, r.0 as u32)),
        BranchTarget::Imm(Imm::Val(v)) => {
            if !fits_signed(*v, bits) {
                return Err(EncodeError::ImmOutOfRange {
                    mnemonic: inst.op.mnemonic(),
                    value: *v,
                    bits,
                    loc: inst.loc,
                });
            }
            Ok(imm_payload(*v, bits))
        }
        BranchTarget::Imm(Imm::Sym(expr)) => {
            defer_symbol(inst, expr, offset, fixups)?;
            Ok(0)
        }
    }
}

fn imm_payload(v: i64, bits: u32) -> u32 {
    let mask = (1u32 << bits) - 1;
    ((v as u32 & mask) << BT_PAYLOAD_OFFSET) | 1
}

fn defer_symbol(
    inst: &Inst,
    expr: &SymExpr,
    offset: u32,
    fixups: &mut Vec<Fixup>,
) -> Result<(), EncodeError> {
    let kind = inst.op.branch_fixup_kind().ok_or_else(|| EncodeError::SymbolNotAllowed {
        mnemonic: inst.op.mnemonic(),
        expr: expr.clone(),
        loc: inst.loc,
    })?;
    fixups.push(Fixup { offset, kind, expr: expr.clone(), loc: inst.loc });
    Ok(())
}

fn expect_arity(inst: &Inst, n: usize) {
    assert!(
        inst.operands.len() == n,
        "`{}` takes {} operand(s), record has {}",
        inst.op.mnemonic(),
        n,
        inst.operands.len()
    );
}

fn expect_reg(inst: &Inst, idx: usize) -> Reg {
    match &inst.operands[idx] {
        Operand::Reg(r) => *r,
        other => operand_mismatch(inst, idx, "register", other),
    }
}

fn expect_mem(inst: &Inst, idx: usize) -> MemTarget {
    match &inst.operands[idx] {
        Operand::Mem(m) => *m,
        other => operand_mismatch(inst, idx, "memory target", other),
    }
}

fn operand_mismatch<T>(inst: &Inst, idx: usize, wanted: &str, got: &Operand) -> T {
    panic!(
        "operand {} of `{}` must be a {}, got {:?}",
        idx,
        inst.op.mnemonic(),
        wanted,
        got
    );
}
