//! Structural inverse of the encoder.
//!
//! Each declared field is extracted by offset/width and the discriminated
//! unions are rebuilt from their flag bits exactly as packed. The PI_20/PA_20
//! /PA_16 arithmetic is *not* reversed here: that transform only ever applies
//! to unresolved symbolic references, which no longer exist in fully
//! assembled code — a decoded immediate is the literal value the encoder or
//! resolver wrote.

use crate::bits::{get_field, sign_ext};
use crate::layout::{
    Format, Opcode, BT_FLAG_BIT, BT_IMM16_BITS, BT_IMM20_BITS, BT_PAYLOAD_OFFSET, OPCODE_BITS,
    OPERAND16_BITS, OPERAND16_OFFSET, OPERAND_BITS, OPERAND_OFFSET, REG1_OFFSET, REG_BITS,
    RI_FLAG_BIT, RI_IMM_BITS, RI_IMM_OFFSET,
};
use crate::operand::{BranchTarget, Imm, Inst, MemTarget, Operand, Reg};

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unrecognized instruction word {word:#010x}")]
    BadOpcode { word: u32 },
}

/// Decode one 32-bit instruction word. Failure is reported per word; a
/// caller scanning mixed code and data may skip and continue.
pub fn decode(word: u32) -> Result<Inst, DecodeError> {
    let op = Opcode::from_raw(get_field(word, 0, OPCODE_BITS))
        .ok_or(DecodeError::BadOpcode { word })?;

    let reg1 = || Reg(get_field(word, REG1_OFFSET, REG_BITS) as u8);

    let operands = match op.format() {
        Format::Nullary => vec![],
        Format::Reg => vec![Operand::Reg(reg1())],
        Format::RegRi => {
            let field = get_field(word, OPERAND_OFFSET, OPERAND_BITS);
            vec![Operand::Reg(reg1()), decode_reg_or_imm(field)]
        }
        Format::RegImm20 => {
            let field = get_field(word, OPERAND_OFFSET, OPERAND_BITS);
            let v = sign_ext(field >> BT_PAYLOAD_OFFSET, BT_IMM20_BITS) as i64;
            vec![Operand::Reg(reg1()), Operand::imm(v)]
        }
        Format::RegImm16 => {
            let field = get_field(word, OPERAND16_OFFSET, OPERAND16_BITS);
            // liu is zero-extended
            let v = (field >> BT_PAYLOAD_OFFSET) as i64;
            vec![Operand::Reg(reg1()), Operand::imm(v)]
        }
        Format::Mem => {
            let field = get_field(word, OPERAND_OFFSET, OPERAND_BITS);
            let base = Reg((field & ((1 << REG_BITS) - 1)) as u8);
            let offset = if field & (1 << RI_FLAG_BIT) != 0 {
                sign_ext(field >> RI_IMM_OFFSET, RI_IMM_BITS)
            } else {
                0
            };
            vec![Operand::Reg(reg1()), Operand::Mem(MemTarget { base, offset })]
        }
        Format::Jump => {
            let field = get_field(word, OPERAND_OFFSET, OPERAND_BITS);
            vec![Operand::Branch(decode_branch(field, BT_IMM20_BITS))]
        }
        Format::CondJump => {
            let field = get_field(word, OPERAND16_OFFSET, OPERAND16_BITS);
            vec![Operand::Branch(decode_branch(field, BT_IMM16_BITS))]
        }
    };

    Ok(Inst::new(op, operands))
}

fn decode_reg_or_imm(field: u32) -> Operand {
    if field & (1 << RI_FLAG_BIT) != 0 {
        Operand::imm(sign_ext(field >> RI_IMM_OFFSET, RI_IMM_BITS) as i64)
    } else {
        Operand::Reg(Reg((field & ((1 << REG_BITS) - 1)) as u8))
    }
}

fn decode_branch(field: u32, bits: u32) -> BranchTarget {
    if field & (1 << BT_FLAG_BIT) != 0 {
        BranchTarget::Imm(Imm::Val(sign_ext(field >> BT_PAYLOAD_OFFSET, bits) as i64))
    } else {
        BranchTarget::Reg(Reg(get_field(field, BT_PAYLOAD_OFFSET, REG_BITS) as u8))
    }
}
