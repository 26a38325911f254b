use crate::layout::{Category, Format};
use crate::operand::{BranchTarget, Imm, Inst, MemTarget, Operand};

/// Render one decoded instruction in assembler syntax.
pub fn fmt_inst(inst: &Inst) -> String {
    let mn = inst.op.mnemonic();
    match inst.op.format() {
        Format::Nullary => mn.to_string(),
        Format::Reg => format!("{} {}", mn, inst.operands[0]),
        Format::RegRi | Format::RegImm20 | Format::RegImm16 => {
            format!("{} {}, {}", mn, inst.operands[0], inst.operands[1])
        }
        Format::Mem => {
            // Loads name the destination first, stores the memory target.
            if inst.op.category() == Category::Store {
                format!("{} {}, {}", mn, inst.operands[1], inst.operands[0])
            } else {
                format!("{} {}, {}", mn, inst.operands[0], inst.operands[1])
            }
        }
        Format::Jump | Format::CondJump => format!("{} {}", mn, inst.operands[0]),
    }
}

impl std::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Imm(imm) => write!(f, "{}", imm),
            Operand::Branch(BranchTarget::Reg(r)) => write!(f, "{}", r),
            Operand::Branch(BranchTarget::Imm(imm)) => write!(f, "{}", imm),
            Operand::Mem(m) => write!(f, "{}", m),
        }
    }
}

impl std::fmt::Display for Imm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Imm::Val(v) => write!(f, "{:#x}", v),
            Imm::Sym(e) => write!(f, "{}", e),
        }
    }
}

impl std::fmt::Display for MemTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.offset == 0 {
            write!(f, "{}", self.base)
        } else {
            write!(f, "{}[{:#x}]", self.base, self.offset)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Opcode;
    use crate::operand::Reg;

    #[test]
    fn formats_match_assembler_syntax() {
        let add = Inst::new(Opcode::Add, vec![Operand::Reg(Reg(0)), Operand::imm(0x79)]);
        assert_eq!(fmt_inst(&add), "add r0, 0x79");

        let lw = Inst::new(
            Opcode::Lw,
            vec![Operand::Reg(Reg(1)), Operand::Mem(MemTarget::offset(Reg(2), 0x79))],
        );
        assert_eq!(fmt_inst(&lw), "lw r1, r2[0x79]");

        let stw = Inst::new(
            Opcode::Stw,
            vec![Operand::Reg(Reg(3)), Operand::Mem(MemTarget::base(Reg(31)))],
        );
        assert_eq!(fmt_inst(&stw), "stw sp, r3");

        let j = Inst::new(Opcode::J, vec![Operand::Branch(BranchTarget::Reg(Reg(5)))]);
        assert_eq!(fmt_inst(&j), "j r5");

        let ret = Inst::new(Opcode::Ret, vec![]);
        assert_eq!(fmt_inst(&ret), "ret");
    }
}
