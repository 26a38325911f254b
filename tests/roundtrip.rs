use pretty_assertions::assert_eq;

use teal_rs::decode::decode;
use teal_rs::encode::encode;
use teal_rs::layout::{Opcode, TABLE};
use teal_rs::operand::{BranchTarget, Imm, Inst, MemTarget, Operand, Reg};

fn word_of(inst: &Inst) -> u32 {
    let (word, fixups) = encode(inst, 0).unwrap();
    assert!(fixups.is_empty(), "{:?} produced unexpected fixups", inst);
    word
}

#[test]
fn known_encodings() {
    // lw r0, r0
    let lw = Inst::new(
        Opcode::Lw,
        vec![Operand::Reg(Reg(0)), Operand::Mem(MemTarget::base(Reg(0)))],
    );
    assert_eq!(word_of(&lw), 0x0000_0001);

    // lw sp, fp
    let lw = Inst::new(
        Opcode::Lw,
        vec![Operand::Reg(Reg(31)), Operand::Mem(MemTarget::base(Reg(30)))],
    );
    assert_eq!(word_of(&lw), 0x0000_F7C1);

    // lw r1, r2[0x79]
    let lw = Inst::new(
        Opcode::Lw,
        vec![Operand::Reg(Reg(1)), Operand::Mem(MemTarget::offset(Reg(2), 0x79))],
    );
    assert_eq!(word_of(&lw), 0x00F3_1041);

    // lw r1, r2[-0x97] — offset is sign-extended
    let lw = Inst::new(
        Opcode::Lw,
        vec![Operand::Reg(Reg(1)), Operand::Mem(MemTarget::offset(Reg(2), -0x97))],
    );
    assert_eq!(word_of(&lw), 0xFED3_1041);

    // add r0, r1
    let add = Inst::new(Opcode::Add, vec![Operand::Reg(Reg(0)), Operand::Reg(Reg(1))]);
    assert_eq!(word_of(&add), 0x0000_081C);

    // add r1, sp
    let add = Inst::new(Opcode::Add, vec![Operand::Reg(Reg(1)), Operand::Reg(Reg(31))]);
    assert_eq!(word_of(&add), 0x0000_F85C);

    // add fp, 0x79
    let add = Inst::new(Opcode::Add, vec![Operand::Reg(Reg(30)), Operand::imm(0x79)]);
    assert_eq!(word_of(&add), 0x00F3_079C);

    // add r0, 0x7fff — representable in the 15-bit field
    let add = Inst::new(Opcode::Add, vec![Operand::Reg(Reg(0)), Operand::imm(0x7FFF)]);
    assert_eq!(word_of(&add), 0xFFFF_001C);
}

#[test]
fn roundtrip_all_formats() {
    let cases = vec![
        Inst::new(Opcode::Nop, vec![]),
        Inst::new(Opcode::Ret, vec![]),
        Inst::new(Opcode::Hlt, vec![]),
        Inst::new(Opcode::Not, vec![Operand::Reg(Reg(7))]),
        Inst::new(Opcode::Push, vec![Operand::Reg(Reg(31))]),
        Inst::new(Opcode::Add, vec![Operand::Reg(Reg(3)), Operand::Reg(Reg(4))]),
        Inst::new(Opcode::Sub, vec![Operand::Reg(Reg(0)), Operand::imm(-1)]),
        Inst::new(Opcode::Mov, vec![Operand::Reg(Reg(29)), Operand::imm(0x3FFF)]),
        Inst::new(Opcode::Cmp, vec![Operand::Reg(Reg(1)), Operand::imm(-0x4000)]),
        Inst::new(Opcode::Selne, vec![Operand::Reg(Reg(9)), Operand::Reg(Reg(10))]),
        Inst::new(Opcode::Li, vec![Operand::Reg(Reg(2)), Operand::imm(-0x80000)]),
        Inst::new(Opcode::Li, vec![Operand::Reg(Reg(2)), Operand::imm(0x7FFFF)]),
        Inst::new(Opcode::La, vec![Operand::Reg(Reg(4)), Operand::imm(0x1234)]),
        Inst::new(Opcode::Liu, vec![Operand::Reg(Reg(5)), Operand::imm(0xFFFF)]),
        Inst::new(Opcode::Lw, vec![Operand::Reg(Reg(1)), Operand::Mem(MemTarget::offset(Reg(2), 0x79))]),
        Inst::new(Opcode::Lb, vec![Operand::Reg(Reg(1)), Operand::Mem(MemTarget::offset(Reg(2), -0x97))]),
        Inst::new(Opcode::Stw, vec![Operand::Reg(Reg(8)), Operand::Mem(MemTarget::base(Reg(30)))]),
        Inst::new(Opcode::J, vec![Operand::Branch(BranchTarget::Reg(Reg(12)))]),
        Inst::new(Opcode::J, vec![Operand::Branch(BranchTarget::Imm(Imm::Val(0)))]),
        Inst::new(Opcode::Call, vec![Operand::Branch(BranchTarget::Imm(Imm::Val(-0x80000)))]),
        Inst::new(Opcode::Be, vec![Operand::Branch(BranchTarget::Imm(Imm::Val(0x7FFF)))]),
        Inst::new(Opcode::Ble, vec![Operand::Branch(BranchTarget::Reg(Reg(3)))]),
        Inst::new(Opcode::Bnz, vec![Operand::Branch(BranchTarget::Imm(Imm::Val(-0x8000)))]),
    ];
    for inst in cases {
        let word = word_of(&inst);
        let back = decode(word).unwrap();
        assert_eq!(back, inst, "word {:#010x}", word);
    }
}

#[test]
fn mem_offset_zero_fast_path() {
    // Base-register form: offset-present bit clear, offset bits zero.
    let lw = Inst::new(
        Opcode::Lw,
        vec![Operand::Reg(Reg(1)), Operand::Mem(MemTarget::base(Reg(3)))],
    );
    let word = word_of(&lw);
    assert_eq!((word >> 16) & 1, 0);
    assert_eq!(word >> 17, 0);
    assert_eq!((word >> 11) & 0x1F, 3);

    let back = decode(word).unwrap();
    assert_eq!(
        back.operands[1],
        Operand::Mem(MemTarget { base: Reg(3), offset: 0 })
    );
}

#[test]
fn branch_zero_sets_flag_without_payload() {
    let j = Inst::new(Opcode::J, vec![Operand::Branch(BranchTarget::Imm(Imm::Val(0)))]);
    let word = word_of(&j);
    assert_eq!((word >> 11) & 1, 1, "is-immediate flag");
    assert_eq!(word >> 12, 0, "payload omitted");
}

#[test]
fn encode_rejects_out_of_range_immediates() {
    let too_big = Inst::new(Opcode::Add, vec![Operand::Reg(Reg(0)), Operand::imm(0x8000)]);
    assert!(encode(&too_big, 0).is_err());

    let too_big = Inst::new(Opcode::Liu, vec![Operand::Reg(Reg(0)), Operand::imm(0x10000)]);
    assert!(encode(&too_big, 0).is_err());

    let too_big = Inst::new(Opcode::Li, vec![Operand::Reg(Reg(0)), Operand::imm(0x80000)]);
    assert!(encode(&too_big, 0).is_err());

    let too_far = Inst::new(
        Opcode::Be,
        vec![Operand::Branch(BranchTarget::Imm(Imm::Val(0x8000)))],
    );
    assert!(encode(&too_far, 0).is_err());

    let off = Inst::new(
        Opcode::Lw,
        vec![Operand::Reg(Reg(0)), Operand::Mem(MemTarget::offset(Reg(0), 0x8000))],
    );
    assert!(encode(&off, 0).is_err());
}

#[test]
fn bad_opcode_fails_per_word_only() {
    // 56..63 are unassigned opcode values.
    assert!(decode(0x0000_0038).is_err());
    assert!(decode(0x0000_003F).is_err());
    // The failure does not poison later words.
    assert!(decode(0x0000_0001).is_ok());
}

#[test]
fn every_table_entry_roundtrips_with_minimal_operands() {
    use teal_rs::layout::Format;
    for desc in TABLE {
        let operands = match desc.format {
            Format::Nullary => vec![],
            Format::Reg => vec![Operand::Reg(Reg(1))],
            Format::RegRi => vec![Operand::Reg(Reg(1)), Operand::Reg(Reg(2))],
            Format::RegImm20 | Format::RegImm16 => {
                vec![Operand::Reg(Reg(1)), Operand::imm(5)]
            }
            Format::Mem => vec![Operand::Reg(Reg(1)), Operand::Mem(MemTarget::base(Reg(2)))],
            Format::Jump | Format::CondJump => {
                vec![Operand::Branch(BranchTarget::Imm(Imm::Val(4)))]
            }
        };
        let inst = Inst::new(desc.op, operands);
        let word = word_of(&inst);
        assert_eq!(decode(word).unwrap(), inst, "{}", desc.mnemonic);
    }
}
