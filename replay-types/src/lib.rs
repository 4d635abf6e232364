//! Atomic types shared by the replay builder, encoder and session.
//!
//! Everything here is plain data: typed primitive [`Value`]s, the closed
//! [`ProtocolType`] set they lower to on the wire, the pointer address
//! spaces and the [`Resolver`] protocol that turns capture-time addresses
//! into replay-time ones, target ABI description, and interval arithmetic
//! over memory ranges.

#![warn(missing_docs)]

mod abi;
mod protocol;
mod range;
mod resolver;
mod value;

pub use abi::{Endianness, TargetAbi};
pub use protocol::ProtocolType;
pub use range::{MemoryRange, RangeList};
pub use resolver::Resolver;
pub use value::{Resolved, Value};

/// Observed addresses below this are treated as invalid pointers.
pub const FIRST_VALID_ADDRESS: u64 = 0x1001;

/// Sentinel absolute address produced when an observed pointer falls
/// outside every reserved range.
pub const UNOBSERVED_POINTER: u64 = 0xBADF00D;
