//! Relocation entries and the link-time applier.
//!
//! A relocation entry is the persisted form of a fixup whose symbol could not
//! be resolved within its own compilation unit. At link time the applier
//! recomputes the very same bit-field transform the assembly-time resolver
//! uses, from raw inputs alone: the two phases never share a symbol table.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bits::{fits_signed, fits_unsigned, read_u32_le, set_field, write_u32_le};

/// The four relocation kinds of the Teal-32 ISA.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelocKind {
    /// Absolute 32-bit data value.
    #[serde(rename = "Sys_Data_4")]
    SysData4,
    /// Load-address high bits, byte-granularity PC-relative.
    #[serde(rename = "PI_20")]
    Pi20,
    /// Branch/call target, word-granularity PC-relative, 4-byte aligned.
    #[serde(rename = "PA_20")]
    Pa20,
    /// Conditional-branch target, word-granularity PC-relative, 4-byte aligned.
    #[serde(rename = "PA_16")]
    Pa16,
}

impl std::fmt::Display for RelocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Target bit-field of a relocation kind: where in the patched word the value
/// lands, how wide it is (flag bit included), and whether the stored value is
/// a displacement from the patch location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub bit_offset: u32,
    pub bits: u32,
    pub pc_rel: bool,
}

pub(crate) enum AdjustError {
    OutOfRange,
    Misaligned,
}

impl RelocKind {
    pub fn name(self) -> &'static str {
        match self {
            RelocKind::SysData4 => "Sys_Data_4",
            RelocKind::Pi20 => "PI_20",
            RelocKind::Pa20 => "PA_20",
            RelocKind::Pa16 => "PA_16",
        }
    }

    /// Parse a serialized kind name. Anything unrecognized is a tool/object
    /// version mismatch and must be fatal at the phase that reads it.
    pub fn from_name(name: &str) -> Result<RelocKind, RelocError> {
        match name {
            "Sys_Data_4" => Ok(RelocKind::SysData4),
            "PI_20" => Ok(RelocKind::Pi20),
            "PA_20" => Ok(RelocKind::Pa20),
            "PA_16" => Ok(RelocKind::Pa16),
            _ => Err(RelocError::UnknownKind { name: name.into() }),
        }
    }

    pub fn field_info(self) -> FieldInfo {
        // The 20/16-bit value plus its value-present flag bit; the flag is
        // folded into the same shift the transform applies.
        match self {
            RelocKind::SysData4 => FieldInfo { bit_offset: 0, bits: 32, pc_rel: false },
            RelocKind::Pi20 => FieldInfo { bit_offset: 11, bits: 21, pc_rel: true },
            RelocKind::Pa20 => FieldInfo { bit_offset: 11, bits: 21, pc_rel: true },
            RelocKind::Pa16 => FieldInfo { bit_offset: 15, bits: 17, pc_rel: true },
        }
    }

    /// Kind-specific value transform, applied before range validation in both
    /// the assembly-time resolver and the link-time applier.
    pub(crate) fn adjust(self, value: i64) -> Result<u32, AdjustError> {
        match self {
            RelocKind::SysData4 => {
                if !fits_signed(value, 32) && !fits_unsigned(value, 32) {
                    return Err(AdjustError::OutOfRange);
                }
                Ok(value as u32)
            }
            RelocKind::Pi20 => {
                // Compensates for the fixed instruction-width lead of the
                // load-address idiom.
                let v = value - 4;
                if !fits_signed(v, 20) {
                    return Err(AdjustError::OutOfRange);
                }
                Ok((((v as u32) & 0xF_FFFF) << 1) | 1)
            }
            RelocKind::Pa20 | RelocKind::Pa16 => {
                if value & 3 != 0 {
                    return Err(AdjustError::Misaligned);
                }
                // Word granularity, biased by one word: the reference point
                // is the next instruction.
                let v = (value >> 2) - 1;
                let bits = if self == RelocKind::Pa20 { 20 } else { 16 };
                if !fits_signed(v, bits) {
                    return Err(AdjustError::OutOfRange);
                }
                let mask = (1u32 << bits) - 1;
                Ok((((v as u32) & mask) << 1) | 1)
            }
        }
    }
}

/// Merge an adjusted field value into the word at `offset`, preserving every
/// bit outside the target field.
pub(crate) fn patch_word(bytes: &mut [u8], offset: usize, kind: RelocKind, field: u32) {
    let info = kind.field_info();
    let cur = read_u32_le(bytes, offset);
    let patched = set_field(cur, info.bit_offset, info.bits, field);
    write_u32_le(bytes, offset, patched);
}

/// Serialized relocation entry, owned by the object file. Consumed exactly
/// once at link time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelocEntry {
    /// Section-relative byte offset of the patched word.
    pub offset: u32,
    pub kind: RelocKind,
    pub symbol: String,
    pub addend: i64,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RelocError {
    #[error("{kind} relocation against `{symbol}` at {offset:#010x} out of range")]
    OutOfRange { kind: RelocKind, offset: u32, symbol: String },
    #[error("{kind} relocation against `{symbol}` at {offset:#010x}: target {value:#x} is not 4-byte aligned")]
    Misaligned { kind: RelocKind, offset: u32, symbol: String, value: i64 },
    #[error("{kind} relocation at {offset:#010x} was already applied")]
    AlreadyApplied { kind: RelocKind, offset: u32 },
    #[error("relocation at {offset:#010x} outside section bytes (len {len:#x})")]
    OutOfBounds { offset: u32, len: usize },
    #[error("relocations at {first:#010x} and {second:#010x} target overlapping bytes")]
    Overlap { first: u32, second: u32 },
    #[error("unrecognized relocation kind `{name}`")]
    UnknownKind { name: String },
}

/// Apply one relocation entry to a section's bytes.
///
/// `symbol_value` is the symbol's final absolute address; `section_base` the
/// final address of the section the entry belongs to. For PC-relative kinds
/// the applier itself computes the displacement from the entry's own final
/// address. Nothing is written on failure.
pub fn apply(
    entry: &RelocEntry,
    symbol_value: i64,
    section_base: u32,
    bytes: &mut [u8],
) -> Result<(), RelocError> {
    let info = entry.kind.field_info();
    let offset = entry.offset as usize;
    if offset + 4 > bytes.len() {
        return Err(RelocError::OutOfBounds { offset: entry.offset, len: bytes.len() });
    }

    let place = section_base as i64 + entry.offset as i64;
    let mut value = symbol_value + entry.addend;
    if info.pc_rel {
        value -= place;
    }

    debug!(
        kind = entry.kind.name(),
        offset = entry.offset,
        symbol = %entry.symbol,
        value,
        "applying relocation"
    );

    if info.pc_rel {
        // The value-present flag of an unresolved field is zero; finding it
        // set means these bytes were already patched.
        let cur = read_u32_le(bytes, offset);
        if (cur >> info.bit_offset) & 1 != 0 {
            return Err(RelocError::AlreadyApplied { kind: entry.kind, offset: entry.offset });
        }
    }

    let field = entry.kind.adjust(value).map_err(|e| match e {
        AdjustError::OutOfRange => RelocError::OutOfRange {
            kind: entry.kind,
            offset: entry.offset,
            symbol: entry.symbol.clone(),
        },
        AdjustError::Misaligned => RelocError::Misaligned {
            kind: entry.kind,
            offset: entry.offset,
            symbol: entry.symbol.clone(),
            value,
        },
    })?;

    patch_word(bytes, offset, entry.kind, field);
    Ok(())
}

/// Reject relocation entries whose patched byte ranges overlap. The applier
/// assumes non-overlapping writes; the surrounding layout step must guarantee
/// it, and this check makes a violation detectable.
pub fn validate_no_overlap(entries: &[RelocEntry]) -> Result<(), RelocError> {
    let mut ranges: Vec<(u32, u32)> = entries.iter().map(|e| (e.offset, e.offset + 4)).collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(RelocError::Overlap { first: pair[0].0, second: pair[1].0 });
        }
    }
    Ok(())
}
