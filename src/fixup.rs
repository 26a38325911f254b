//! Deferred patches recorded by the encoder.
//!
//! A fixup says where and how a not-yet-known value must later be written
//! into an instruction word. Each fixup is consumed exactly once: either the
//! resolver patches it here, at object-emission time, or the relocation
//! encoder persists it for the linker. Never both, never neither.

use tracing::trace;

use crate::operand::{SourceLoc, SymExpr};
use crate::reloc::{patch_word, AdjustError, RelocKind};

/// A pending patch against the section currently being emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixup {
    /// Byte offset of the instruction word within the section.
    pub offset: u32,
    /// Determines the target bit field and the value transform.
    pub kind: RelocKind,
    /// The expression whose value will be patched in.
    pub expr: SymExpr,
    /// Originating instruction, for diagnostics.
    pub loc: SourceLoc,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum FixupError {
    #[error("{loc}: fixup out of range ({kind} against `{expr}`)")]
    OutOfRange { kind: RelocKind, expr: SymExpr, loc: SourceLoc },
    #[error("{loc}: {kind} target `{expr}` resolves to {value:#x}, not 4-byte aligned")]
    Misaligned { kind: RelocKind, expr: SymExpr, value: i64, loc: SourceLoc },
}

/// Patch `fixup` with its resolved `value` (for PC-relative kinds, the
/// displacement from the fixup's own location). The target field is merged
/// read-modify-write; every other bit of the word is preserved.
pub fn resolve(fixup: &Fixup, value: i64, bytes: &mut [u8]) -> Result<(), FixupError> {
    debug_assert!(
        fixup.offset as usize + 4 <= bytes.len(),
        "fixup at {:#x} outside emitted bytes",
        fixup.offset
    );

    trace!(
        kind = fixup.kind.name(),
        offset = fixup.offset,
        expr = %fixup.expr,
        value,
        "resolving fixup"
    );

    let field = fixup.kind.adjust(value).map_err(|e| match e {
        AdjustError::OutOfRange => FixupError::OutOfRange {
            kind: fixup.kind,
            expr: fixup.expr.clone(),
            loc: fixup.loc,
        },
        AdjustError::Misaligned => FixupError::Misaligned {
            kind: fixup.kind,
            expr: fixup.expr.clone(),
            value,
            loc: fixup.loc,
        },
    })?;

    patch_word(bytes, fixup.offset as usize, fixup.kind, field);
    Ok(())
}
