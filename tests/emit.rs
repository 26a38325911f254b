use pretty_assertions::assert_eq;

use teal_rs::layout::Opcode;
use teal_rs::object::{Obj, SectionEmitter, SectionFlags, SymbolDef};
use teal_rs::operand::{BranchTarget, Imm, Inst, Operand, Reg, SourceLoc, SymExpr};
use teal_rs::reloc::{RelocEntry, RelocKind};

fn j_sym(name: &str) -> Inst {
    Inst::new(
        Opcode::J,
        vec![Operand::Branch(BranchTarget::Imm(Imm::Sym(SymExpr::new(name))))],
    )
}

fn nop() -> Inst {
    Inst::new(Opcode::Nop, vec![])
}

fn word_at(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

#[test]
fn forward_branch_to_local_label_resolves_in_place() {
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    em.emit(&j_sym("target")).unwrap();
    em.emit(&nop()).unwrap();
    em.define_label("target").unwrap();
    em.emit(&nop()).unwrap();

    let (section, symbols) = em.finalize().unwrap();
    assert!(section.relocs.is_empty(), "local reference must not persist");
    // Displacement 8 from the branch: v = 1, field = 3.
    assert_eq!(word_at(&section.bytes, 0), (3 << 11) | Opcode::J as u32);
    assert_eq!(symbols, vec![("target".to_string(), 8)]);
}

#[test]
fn backward_branch_resolves_too() {
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    em.define_label("loop").unwrap();
    em.emit(&nop()).unwrap();
    let cond = Inst::new(
        Opcode::Bne,
        vec![Operand::Branch(BranchTarget::Imm(Imm::Sym(SymExpr::new("loop"))))],
    );
    em.emit(&cond).unwrap();

    let (section, _) = em.finalize().unwrap();
    assert!(section.relocs.is_empty());
    // Branch at 4 back to 0: value = -4, v = -2.
    let field = word_at(&section.bytes, 4) >> 15;
    assert_eq!(field, (((-2i32 as u32) & 0xFFFF) << 1) | 1);
}

#[test]
fn external_symbol_becomes_a_relocation_entry() {
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    let call = Inst::new(
        Opcode::Call,
        vec![Operand::Branch(BranchTarget::Imm(Imm::Sym(SymExpr::with_addend("ext", 4))))],
    );
    em.emit(&call).unwrap();

    let (section, _) = em.finalize().unwrap();
    assert_eq!(
        section.relocs,
        vec![RelocEntry {
            offset: 0,
            kind: RelocKind::Pa20,
            symbol: "ext".into(),
            addend: 4,
        }]
    );
    // The deferred field stays zero.
    assert_eq!(word_at(&section.bytes, 0), Opcode::Call as u32);
}

#[test]
fn word_directive_with_symbol_defers_even_when_local() {
    // Sys_Data_4 wants an absolute address, which assembly time never has.
    let mut em = SectionEmitter::new(".data", SectionFlags::data());
    em.define_label("here").unwrap();
    em.emit_word(&Imm::Sym(SymExpr::new("here")), SourceLoc::line(3));
    em.emit_word(&Imm::Val(0x1122_3344), SourceLoc::line(4));

    let (section, _) = em.finalize().unwrap();
    assert_eq!(section.relocs.len(), 1);
    assert_eq!(section.relocs[0].kind, RelocKind::SysData4);
    assert_eq!(section.relocs[0].offset, 0);
    assert_eq!(word_at(&section.bytes, 0), 0);
    assert_eq!(word_at(&section.bytes, 4), 0x1122_3344);
}

#[test]
fn every_fixup_is_settled_exactly_once() {
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    em.emit(&j_sym("local")).unwrap();
    em.emit(&j_sym("extern1")).unwrap();
    em.define_label("local").unwrap();
    em.emit(&j_sym("extern2")).unwrap();

    let (section, _) = em.finalize().unwrap();
    // Two deferred, one resolved; the resolved one left no entry behind.
    let symbols: Vec<_> = section.relocs.iter().map(|r| r.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["extern1", "extern2"]);
    assert_ne!(word_at(&section.bytes, 0), Opcode::J as u32, "local was patched");
    assert_eq!(word_at(&section.bytes, 4), Opcode::J as u32, "extern left zero");
}

#[test]
fn load_address_uses_pi20() {
    // External symbol: deferred as a PI_20 entry.
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    let la = Inst::new(Opcode::La, vec![Operand::Reg(Reg(1)), Operand::sym("buffer")]);
    em.emit(&la).unwrap();
    let (section, _) = em.finalize().unwrap();
    assert_eq!(section.relocs.len(), 1);
    assert_eq!(section.relocs[0].kind, RelocKind::Pi20);

    // Local symbol: PC-relative, resolved at emission.
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    let la = Inst::new(Opcode::La, vec![Operand::Reg(Reg(1)), Operand::sym("here")]);
    em.emit(&la).unwrap();
    em.emit(&nop()).unwrap();
    em.define_label("here").unwrap();
    let (section, _) = em.finalize().unwrap();
    assert!(section.relocs.is_empty());
    // Displacement 8: field = ((8 - 4) << 1) | 1 at bit 11.
    assert_eq!(
        word_at(&section.bytes, 0),
        (((4 << 1) | 1) << 11) | Opcode::La as u32
    );
}

#[test]
fn unaligned_local_target_is_a_fatal_emit_error() {
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    em.emit(&j_sym("odd")).unwrap();
    em.emit_byte(0);
    em.define_label("odd").unwrap();
    assert!(em.finalize().is_err());
}

#[test]
fn duplicate_labels_are_rejected() {
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    em.define_label("twice").unwrap();
    em.emit(&nop()).unwrap();
    assert!(em.define_label("twice").is_err());
}

#[test]
fn object_json_roundtrip() {
    let mut em = SectionEmitter::new(".text", SectionFlags::text());
    em.define_label("entry").unwrap();
    em.emit(&j_sym("ext")).unwrap();
    let (section, symbols) = em.finalize().unwrap();

    let obj = Obj {
        sections: vec![section],
        symbols: symbols
            .into_iter()
            .map(|(name, offset)| SymbolDef { name, section: 0, offset })
            .collect(),
    };

    let json = serde_json::to_string(&obj).unwrap();
    assert!(json.contains("\"PA_20\""), "kinds serialize under their wire names");
    let back: Obj = serde_json::from_str(&json).unwrap();
    assert_eq!(back, obj);
}
