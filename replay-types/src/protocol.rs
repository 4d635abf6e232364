use crate::TargetAbi;

/// Closed set of primitive types understood by the replay agent.
///
/// The discriminants are part of the wire format: `PushI` and the typed
/// load instructions carry them in their 6-bit type field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ProtocolType {
    /// Single byte boolean, `0` or `1`.
    Bool = 0,
    /// Signed 8-bit integer.
    I8 = 1,
    /// Signed 16-bit integer.
    I16 = 2,
    /// Signed 32-bit integer.
    I32 = 3,
    /// Signed 64-bit integer.
    I64 = 4,
    /// Unsigned 8-bit integer.
    U8 = 5,
    /// Unsigned 16-bit integer.
    U16 = 6,
    /// Unsigned 32-bit integer.
    U32 = 7,
    /// Unsigned 64-bit integer.
    U64 = 8,
    /// IEEE-754 single precision.
    Float = 9,
    /// IEEE-754 double precision.
    Double = 10,
    /// Raw address in the agent's address space.
    AbsolutePointer = 11,
    /// Offset into the payload's constant memory blob.
    ConstantPointer = 12,
    /// Offset into the payload's volatile memory.
    VolatilePointer = 13,
    /// No value.
    Void = 14,
}

impl ProtocolType {
    /// Decode a 6-bit wire type field.
    pub const fn from_wire(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => ProtocolType::Bool,
            1 => ProtocolType::I8,
            2 => ProtocolType::I16,
            3 => ProtocolType::I32,
            4 => ProtocolType::I64,
            5 => ProtocolType::U8,
            6 => ProtocolType::U16,
            7 => ProtocolType::U32,
            8 => ProtocolType::U64,
            9 => ProtocolType::Float,
            10 => ProtocolType::Double,
            11 => ProtocolType::AbsolutePointer,
            12 => ProtocolType::ConstantPointer,
            13 => ProtocolType::VolatilePointer,
            14 => ProtocolType::Void,
            _ => return None,
        })
    }

    /// Size in bytes of a value of this type on the target.
    ///
    /// Pointer types take their width from the target ABI.
    pub const fn wire_size(&self, abi: &TargetAbi) -> u32 {
        match self {
            ProtocolType::Bool | ProtocolType::I8 | ProtocolType::U8 => 1,
            ProtocolType::I16 | ProtocolType::U16 => 2,
            ProtocolType::I32 | ProtocolType::U32 | ProtocolType::Float => 4,
            ProtocolType::I64 | ProtocolType::U64 | ProtocolType::Double => 8,
            ProtocolType::AbsolutePointer
            | ProtocolType::ConstantPointer
            | ProtocolType::VolatilePointer => abi.pointer_size(),
            ProtocolType::Void => 0,
        }
    }

    /// Whether the type is one of the signed integer types.
    pub const fn is_signed(&self) -> bool {
        matches!(
            self,
            ProtocolType::I8 | ProtocolType::I16 | ProtocolType::I32 | ProtocolType::I64
        )
    }

    /// Whether the type is one of the pointer types.
    pub const fn is_pointer(&self) -> bool {
        matches!(
            self,
            ProtocolType::AbsolutePointer
                | ProtocolType::ConstantPointer
                | ProtocolType::VolatilePointer
        )
    }
}
