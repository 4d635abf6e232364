/// Byte order of the replay target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endianness {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endianness {
    /// Serialize a `u32` in this byte order.
    pub const fn u32_bytes(self, v: u32) -> [u8; 4] {
        match self {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        }
    }

    /// Serialize a `u64` in this byte order.
    pub const fn u64_bytes(self, v: u64) -> [u8; 8] {
        match self {
            Endianness::Little => v.to_le_bytes(),
            Endianness::Big => v.to_be_bytes(),
        }
    }

    /// Deserialize a `u32` in this byte order.
    pub const fn u32_from(self, b: [u8; 4]) -> u32 {
        match self {
            Endianness::Little => u32::from_le_bytes(b),
            Endianness::Big => u32::from_be_bytes(b),
        }
    }
}

/// Description of the ABI the replay agent executes under.
///
/// The pointer width decides the wire size of the pointer protocol types
/// and the alignment of the volatile memory layout; the endianness decides
/// the byte order of every serialized payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TargetAbi {
    pointer_size: u32,
    endian: Endianness,
}

impl TargetAbi {
    /// 64-bit little-endian target.
    pub const LITTLE_64: Self = Self::new(8, Endianness::Little);

    /// 32-bit little-endian target.
    pub const LITTLE_32: Self = Self::new(4, Endianness::Little);

    /// 64-bit big-endian target.
    pub const BIG_64: Self = Self::new(8, Endianness::Big);

    /// Construct an ABI from a pointer width in bytes and a byte order.
    pub const fn new(pointer_size: u32, endian: Endianness) -> Self {
        Self {
            pointer_size,
            endian,
        }
    }

    /// Pointer width in bytes.
    pub const fn pointer_size(&self) -> u32 {
        self.pointer_size
    }

    /// Byte order of the target.
    pub const fn endian(&self) -> Endianness {
        self.endian
    }

    /// Round `offset` up to the target's pointer alignment.
    pub const fn pointer_align(&self, offset: u64) -> u64 {
        let align = self.pointer_size as u64;
        offset.div_ceil(align) * align
    }
}

impl Default for TargetAbi {
    fn default() -> Self {
        Self::LITTLE_64
    }
}
