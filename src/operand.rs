use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of general purpose registers. r30 and r31 are architecturally the
/// frame and stack pointer.
pub const NUM_REGS: u8 = 32;
pub const FP: Reg = Reg(30);
pub const SP: Reg = Reg(31);

/// A register index, 0..31.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reg(pub u8);

impl Reg {
    pub fn new(idx: u8) -> Self {
        assert!(idx < NUM_REGS, "register index {} out of range", idx);
        Reg(idx)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            30 => write!(f, "fp"),
            31 => write!(f, "sp"),
            n => write!(f, "r{}", n),
        }
    }
}

/// A symbolic expression: a symbol plus a constant byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymExpr {
    pub symbol: String,
    pub addend: i64,
}

impl SymExpr {
    pub fn new(symbol: impl Into<String>) -> Self {
        SymExpr { symbol: symbol.into(), addend: 0 }
    }

    pub fn with_addend(symbol: impl Into<String>, addend: i64) -> Self {
        SymExpr { symbol: symbol.into(), addend }
    }
}

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.addend == 0 {
            write!(f, "{}", self.symbol)
        } else if self.addend > 0 {
            write!(f, "{}+{}", self.symbol, self.addend)
        } else {
            write!(f, "{}{}", self.symbol, self.addend)
        }
    }
}

/// An immediate operand: a known constant, or a symbol still to be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Imm {
    Val(i64),
    Sym(SymExpr),
}

/// A branch target is a register (indirect) or an immediate/symbolic
/// expression (direct) — never both. One flag bit in the encoding records
/// which alternative is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchTarget {
    Reg(Reg),
    Imm(Imm),
}

/// A base register plus byte offset. Offset 0 is the bare-register form and
/// is encoded with the offset-present bit clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemTarget {
    pub base: Reg,
    pub offset: i32,
}

impl MemTarget {
    pub fn base(base: Reg) -> Self {
        MemTarget { base, offset: 0 }
    }

    pub fn offset(base: Reg, offset: i32) -> Self {
        MemTarget { base, offset }
    }
}

/// One typed instruction operand. The runtime tag must match the kind the
/// layout table declares for that position; a mismatch is a bug in the
/// producer, not a recoverable condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Reg(Reg),
    Imm(Imm),
    Branch(BranchTarget),
    Mem(MemTarget),
}

impl Operand {
    pub fn imm(v: i64) -> Self {
        Operand::Imm(Imm::Val(v))
    }

    pub fn sym(s: impl Into<String>) -> Self {
        Operand::Imm(Imm::Sym(SymExpr::new(s)))
    }
}

/// Source position for diagnostics, carried from whichever producer built the
/// record (textual assembler or instruction selection).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLoc {
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub fn line(line: u32) -> Self {
        SourceLoc { line, col: 0 }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.col == 0 {
            write!(f, "line {}", self.line)
        } else {
            write!(f, "line {}:{}", self.line, self.col)
        }
    }
}

/// An opcode plus its ordered operands; immutable once built by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inst {
    pub op: crate::layout::Opcode,
    pub operands: Vec<Operand>,
    pub loc: SourceLoc,
}

impl Inst {
    pub fn new(op: crate::layout::Opcode, operands: Vec<Operand>) -> Self {
        Inst { op, operands, loc: SourceLoc::default() }
    }

    pub fn with_loc(op: crate::layout::Opcode, operands: Vec<Operand>, loc: SourceLoc) -> Self {
        Inst { op, operands, loc }
    }
}
