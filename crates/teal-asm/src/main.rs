use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;

use teal_rs::layout::{Format, InstrDesc};
use teal_rs::object::{Obj, SectionEmitter, SectionFlags, SymbolDef};
use teal_rs::operand::{BranchTarget, Imm, Inst, MemTarget, Operand, Reg, SourceLoc, SymExpr, FP, SP};

#[derive(Parser, Debug)]
#[command(author, version, about = "Teal-32 assembler")]
struct Opts {
    /// Input assembly file (one instruction or directive per line)
    #[arg(short, long)]
    input: PathBuf,
    /// Output object file (JSON)
    #[arg(short, long)]
    output: PathBuf,
}

/// The two progbits sections an input may populate.
struct Assembler {
    text: SectionEmitter,
    data: SectionEmitter,
    in_text: bool,
}

impl Assembler {
    fn new() -> Self {
        Assembler {
            text: SectionEmitter::new(".text", SectionFlags::text()),
            data: SectionEmitter::new(".data", SectionFlags::data()),
            in_text: true,
        }
    }

    fn cur(&mut self) -> &mut SectionEmitter {
        if self.in_text {
            &mut self.text
        } else {
            &mut self.data
        }
    }

    fn finish(self) -> Result<Obj> {
        let mut obj = Obj::default();
        for emitter in [self.text, self.data] {
            if emitter.is_empty() {
                continue;
            }
            let (section, symbols) = emitter.finalize()?;
            let idx = obj.sections.len();
            for (name, offset) in symbols {
                if obj.symbol(&name).is_some() {
                    bail!("symbol `{}` defined in more than one section", name);
                }
                obj.symbols.push(SymbolDef { name, section: idx, offset });
            }
            obj.sections.push(section);
        }
        Ok(obj)
    }
}

fn parse_reg(s: &str) -> Option<Reg> {
    match s {
        "fp" => return Some(FP),
        "sp" => return Some(SP),
        _ => {}
    }
    let n = s.strip_prefix('r')?.parse::<u8>().ok()?;
    (n < 30).then(|| Reg::new(n))
}

fn parse_num(s: &str) -> Option<i64> {
    let t = s.trim();
    let (neg, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    let v = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else {
        t.parse::<i64>().ok()?
    };
    Some(if neg { -v } else { v })
}

/// `symbol`, `symbol+4`, `symbol-4`.
fn parse_sym_expr(s: &str) -> Option<SymExpr> {
    let t = s.trim();
    let first = t.chars().next()?;
    if !(first.is_ascii_alphabetic() || first == '_' || first == '.') {
        return None;
    }
    let split = t[1..].find(['+', '-']).map(|i| i + 1);
    let (name, addend) = match split {
        Some(i) => (&t[..i], parse_num(&t[i..])?),
        None => (t, 0),
    };
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.') {
        return None;
    }
    Some(SymExpr::with_addend(name, addend))
}

/// An immediate token: a number, or a symbol expression.
fn parse_imm(s: &str) -> Result<Imm> {
    if let Some(v) = parse_num(s) {
        return Ok(Imm::Val(v));
    }
    parse_sym_expr(s)
        .map(Imm::Sym)
        .ok_or_else(|| anyhow!("bad immediate: {}", s))
}

/// `rB[off]` or bare `rB`.
fn parse_mem(s: &str) -> Result<MemTarget> {
    let t = s.trim();
    if let Some(open) = t.find('[') {
        if !t.ends_with(']') {
            bail!("expected memory operand like rB[off]: {}", s);
        }
        let base = parse_reg(&t[..open]).ok_or_else(|| anyhow!("bad base register in {}", s))?;
        let off = parse_num(&t[open + 1..t.len() - 1])
            .ok_or_else(|| anyhow!("bad offset in {}", s))?;
        let off = i32::try_from(off).map_err(|_| anyhow!("offset out of range in {}", s))?;
        Ok(MemTarget::offset(base, off))
    } else {
        let base = parse_reg(t).ok_or_else(|| anyhow!("bad base register: {}", s))?;
        Ok(MemTarget::base(base))
    }
}

fn parse_branch_target(s: &str) -> Result<BranchTarget> {
    if let Some(r) = parse_reg(s.trim()) {
        return Ok(BranchTarget::Reg(r));
    }
    Ok(BranchTarget::Imm(parse_imm(s)?))
}

fn split_operands(rest: &str) -> Vec<String> {
    rest.split(',').map(|x| x.trim().to_string()).filter(|x| !x.is_empty()).collect()
}

/// Build the typed instruction record for one source line. All register-name
/// and symbol-name resolution happens here; the core only sees the operand
/// model.
fn parse_inst(desc: &'static InstrDesc, rest: &str, loc: SourceLoc) -> Result<Inst> {
    let p = split_operands(rest);
    let want = |n: usize| -> Result<()> {
        if p.len() != n {
            bail!("`{}` takes {} operand(s), got {}", desc.mnemonic, n, p.len());
        }
        Ok(())
    };

    let operands = match desc.format {
        Format::Nullary => {
            want(0)?;
            vec![]
        }
        Format::Reg => {
            want(1)?;
            vec![Operand::Reg(parse_reg(&p[0]).ok_or_else(|| anyhow!("bad register: {}", p[0]))?)]
        }
        Format::RegRi => {
            want(2)?;
            let rd = parse_reg(&p[0]).ok_or_else(|| anyhow!("bad register: {}", p[0]))?;
            let src = match parse_reg(&p[1]) {
                Some(r) => Operand::Reg(r),
                None => Operand::Imm(parse_imm(&p[1])?),
            };
            vec![Operand::Reg(rd), src]
        }
        Format::RegImm20 | Format::RegImm16 => {
            want(2)?;
            let rd = parse_reg(&p[0]).ok_or_else(|| anyhow!("bad register: {}", p[0]))?;
            vec![Operand::Reg(rd), Operand::Imm(parse_imm(&p[1])?)]
        }
        Format::Mem => {
            want(2)?;
            // Loads: `lw rD, rB[off]`; stores: `stw rB[off], rS`.
            let (reg_tok, mem_tok) = if desc.category == teal_rs::layout::Category::Store {
                (&p[1], &p[0])
            } else {
                (&p[0], &p[1])
            };
            let reg = parse_reg(reg_tok).ok_or_else(|| anyhow!("bad register: {}", reg_tok))?;
            vec![Operand::Reg(reg), Operand::Mem(parse_mem(mem_tok)?)]
        }
        Format::Jump | Format::CondJump => {
            want(1)?;
            vec![Operand::Branch(parse_branch_target(&p[0])?)]
        }
    };
    Ok(Inst::with_loc(desc.op, operands, loc))
}

fn assemble_line(asm: &mut Assembler, line: &str, lineno: u32) -> Result<()> {
    // '#' starts a comment line; ';' comments out the rest of any line.
    let ls = line.trim_start();
    if ls.starts_with('#') {
        return Ok(());
    }
    let mut s = line;
    if let Some(p) = s.find(';') {
        s = &s[..p];
    }
    let s = s.trim();
    if s.is_empty() {
        return Ok(());
    }

    if let Some(name) = s.strip_suffix(':') {
        asm.cur().define_label(name.trim())?;
        return Ok(());
    }

    match s {
        ".text" => {
            asm.in_text = true;
            return Ok(());
        }
        ".data" => {
            asm.in_text = false;
            return Ok(());
        }
        _ => {}
    }

    let loc = SourceLoc::line(lineno);
    if let Some(rest) = s.strip_prefix(".word") {
        let v = parse_imm(rest.trim())?;
        asm.cur().align4();
        asm.cur().emit_word(&v, loc);
        return Ok(());
    }
    if let Some(rest) = s.strip_prefix(".byte") {
        let v = parse_num(rest.trim()).ok_or_else(|| anyhow!("bad .byte: {}", rest))?;
        asm.cur().emit_byte((v & 0xFF) as u8);
        return Ok(());
    }

    let (mn, rest) = match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim()),
        None => (s, ""),
    };
    let desc = InstrDesc::by_mnemonic(&mn.to_lowercase())
        .ok_or_else(|| anyhow!("unknown mnemonic: {}", mn))?;
    let inst = parse_inst(desc, rest, loc)?;
    asm.cur().align4();
    asm.cur().emit(&inst)?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let text = fs::read_to_string(&opts.input)
        .with_context(|| format!("reading {}", opts.input.display()))?;

    let mut asm = Assembler::new();
    for (i, line) in text.lines().enumerate() {
        assemble_line(&mut asm, line, i as u32 + 1)
            .with_context(|| format!("{}:{}", opts.input.display(), i + 1))?;
    }

    let obj = asm.finish()?;
    obj.write_json(&opts.output)?;
    Ok(())
}
