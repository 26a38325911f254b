//! Object-file model and streaming section emission.
//!
//! A section is emitted front to back: instructions and data append bytes,
//! labels pin offsets, and every symbolic reference leaves a fixup behind.
//! `finalize` then settles each fixup exactly once — PC-relative references
//! to a symbol defined in the same section are resolved and patched in place;
//! everything else is persisted as a relocation entry for the linker.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::encode::{encode, EncodeError};
use crate::fixup::{resolve, Fixup, FixupError};
use crate::operand::{Imm, Inst, SourceLoc};
use crate::reloc::{RelocEntry, RelocKind};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct SectionFlags: u32 {
        const ALLOC = 1 << 0;
        const WRITE = 1 << 1;
        const EXEC  = 1 << 2;
    }
}

impl SectionFlags {
    pub fn text() -> Self {
        SectionFlags::ALLOC | SectionFlags::EXEC
    }

    pub fn data() -> Self {
        SectionFlags::ALLOC | SectionFlags::WRITE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    pub flags: SectionFlags,
    pub bytes: Vec<u8>,
    pub relocs: Vec<RelocEntry>,
}

/// A defined symbol: section index within the object plus byte offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDef {
    pub name: String,
    pub section: usize,
    pub offset: u32,
}

/// One relocatable object file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Obj {
    pub sections: Vec<Section>,
    pub symbols: Vec<SymbolDef>,
}

impl Obj {
    pub fn symbol(&self, name: &str) -> Option<&SymbolDef> {
        self.symbols.iter().find(|s| s.name == name)
    }

    pub fn read_json(path: &Path) -> anyhow::Result<Obj> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading object {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing object {}", path.display()))
    }

    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).with_context(|| format!("writing object {}", path.display()))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EmitError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Fixup(#[from] FixupError),
    #[error("symbol `{name}` defined twice in section {section}")]
    DuplicateSymbol { name: String, section: String },
}

/// Streaming emitter for one section.
pub struct SectionEmitter {
    name: String,
    flags: SectionFlags,
    bytes: Vec<u8>,
    fixups: Vec<Fixup>,
    labels: HashMap<String, u32>,
}

impl SectionEmitter {
    pub fn new(name: impl Into<String>, flags: SectionFlags) -> Self {
        SectionEmitter {
            name: name.into(),
            flags,
            bytes: Vec::new(),
            fixups: Vec::new(),
            labels: HashMap::new(),
        }
    }

    /// Current emission offset, i.e. where the next byte lands.
    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() && self.labels.is_empty()
    }

    pub fn define_label(&mut self, name: impl Into<String>) -> Result<(), EmitError> {
        let name = name.into();
        let off = self.offset();
        if self.labels.insert(name.clone(), off).is_some() {
            return Err(EmitError::DuplicateSymbol { name, section: self.name.clone() });
        }
        Ok(())
    }

    /// Encode one instruction and append its word.
    pub fn emit(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let (word, fixups) = encode(inst, self.offset())?;
        self.bytes.extend_from_slice(&word.to_le_bytes());
        self.fixups.extend(fixups);
        Ok(())
    }

    /// `.word`: a 32-bit datum. A symbolic value emits zero bytes plus a
    /// Sys_Data_4 fixup.
    pub fn emit_word(&mut self, value: &Imm, loc: SourceLoc) {
        match value {
            Imm::Val(v) => self.bytes.extend_from_slice(&(*v as u32).to_le_bytes()),
            Imm::Sym(expr) => {
                self.fixups.push(Fixup {
                    offset: self.offset(),
                    kind: RelocKind::SysData4,
                    expr: expr.clone(),
                    loc,
                });
                self.bytes.extend_from_slice(&0u32.to_le_bytes());
            }
        }
    }

    pub fn emit_byte(&mut self, value: u8) {
        self.bytes.push(value);
    }

    /// Pad with zero bytes to a 4-byte boundary.
    pub fn align4(&mut self) {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
    }

    /// Settle all fixups and produce the finished section plus its defined
    /// symbols. PC-relative fixups against same-section labels are patched
    /// here; absolute and out-of-section references become relocation
    /// entries.
    pub fn finalize(mut self) -> Result<(Section, Vec<(String, u32)>), EmitError> {
        let mut relocs = Vec::new();
        for fixup in std::mem::take(&mut self.fixups) {
            let local = fixup.kind.field_info().pc_rel && self.labels.contains_key(&fixup.expr.symbol);
            if local {
                let target = self.labels[&fixup.expr.symbol] as i64 + fixup.expr.addend;
                let value = target - fixup.offset as i64;
                resolve(&fixup, value, &mut self.bytes)?;
            } else {
                debug!(
                    kind = fixup.kind.name(),
                    offset = fixup.offset,
                    symbol = %fixup.expr.symbol,
                    "deferring fixup to link time"
                );
                relocs.push(RelocEntry {
                    offset: fixup.offset,
                    kind: fixup.kind,
                    symbol: fixup.expr.symbol,
                    addend: fixup.expr.addend,
                });
            }
        }
        let section = Section {
            name: self.name,
            flags: self.flags,
            bytes: self.bytes,
            relocs,
        };
        let mut symbols: Vec<(String, u32)> = self.labels.into_iter().collect();
        symbols.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        Ok((section, symbols))
    }
}
