pub mod bits;
pub mod decode;
pub mod disasm;
pub mod encode;
pub mod fixup;
pub mod layout;
pub mod object;
pub mod operand;
pub mod reloc;

pub use decode::{decode, DecodeError};
pub use encode::{encode, EncodeError};
pub use fixup::{Fixup, FixupError};
pub use layout::{Category, Format, InstrDesc, Opcode, TABLE};
pub use object::{Obj, Section, SectionEmitter, SectionFlags, SymbolDef};
pub use operand::{BranchTarget, Imm, Inst, MemTarget, Operand, Reg, SourceLoc, SymExpr};
pub use reloc::{RelocEntry, RelocError, RelocKind};
