//! Instruction set and encoder for the replay stack machine.
//!
//! Every instruction encodes to one or more 32-bit words laid out as
//! `[opcode:6 | payload:26]`. Literals wider than the 20-bit immediate of
//! `PushI` spill into one or two `Extend` words; the encoder always picks
//! the shortest form. See [`Instruction`] for the variant list and
//! [`WordWriter`] for the packing primitives.

#![warn(missing_docs)]

mod disasm;
mod encode;
mod instruction;
mod opcode;

pub use disasm::disassemble;
pub use encode::{encode_push, WordWriter};
pub use instruction::{FunctionInfo, Instruction, PatchUp};
pub use opcode::Opcode;

use thiserror::Error;

/// Largest blob the commit-time optimiser will fold into an
/// [`Instruction::InlineResource`].
pub const MAX_INLINE_RESOURCE_SIZE: usize = 128;

/// Most value patch-ups a single inline resource may absorb.
pub const MAX_INLINE_PATCH_UPS: usize = 64;

/// Errors produced while packing instruction words.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A field value exceeded the bit width of its slot. This signals a
    /// bug upstream of the encoder; it is never silently truncated.
    #[error("value {value:#x} does not fit in a {bits}-bit field")]
    Overflow {
        /// The value that did not fit.
        value: u64,
        /// Width of the destination field in bits.
        bits: u32,
    },
}
