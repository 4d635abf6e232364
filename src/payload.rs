//! The self-contained unit shipped to the replay agent.

use replay_types::TargetAbi;

/// Stable identifier of a content-addressed resource blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// Wrap a stable identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// One entry of the payload's resource table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    /// Stable identifier the agent uses to request the blob.
    pub id: ResourceId,
    /// Declared size of the blob in bytes.
    pub size: u32,
}

/// Header, constant blob, resource table and opcode stream of one
/// replay pass.
///
/// The serialized layout, all integers in the target's byte order:
///
/// ```text
/// uint32 stackSize
/// uint32 volatileMemorySize
/// uint32 constantsLength
/// bytes  constants
/// uint32 resourceCount
/// repeated { uint32 idLength ; bytes id ; uint32 size }
/// uint32 opcodesLength            # in bytes
/// bytes  opcodes                  # packed 32-bit words
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    /// Capacity the agent must give the value stack.
    pub stack_size: u32,
    /// Bytes of volatile memory the agent must allocate.
    pub volatile_size: u32,
    /// The constant memory blob.
    pub constants: Vec<u8>,
    /// Resources the opcode stream references, by table index.
    pub resources: Vec<ResourceInfo>,
    /// Packed instruction words.
    pub opcodes: Vec<u32>,
    /// ABI the payload was assembled for.
    pub abi: TargetAbi,
}

impl Payload {
    /// Serialize the payload for the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let e = self.abi.endian();
        let mut out = Vec::with_capacity(
            16 + self.constants.len()
                + self.resources.iter().map(|r| 8 + r.id.as_str().len()).sum::<usize>()
                + self.opcodes.len() * 4,
        );
        out.extend_from_slice(&e.u32_bytes(self.stack_size));
        out.extend_from_slice(&e.u32_bytes(self.volatile_size));
        out.extend_from_slice(&e.u32_bytes(self.constants.len() as u32));
        out.extend_from_slice(&self.constants);
        out.extend_from_slice(&e.u32_bytes(self.resources.len() as u32));
        for r in &self.resources {
            let id = r.id.as_str().as_bytes();
            out.extend_from_slice(&e.u32_bytes(id.len() as u32));
            out.extend_from_slice(id);
            out.extend_from_slice(&e.u32_bytes(r.size));
        }
        out.extend_from_slice(&e.u32_bytes((self.opcodes.len() * 4) as u32));
        for word in &self.opcodes {
            out.extend_from_slice(&e.u32_bytes(*word));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use replay_types::Endianness;

    fn payload(abi: TargetAbi) -> Payload {
        Payload {
            stack_size: 4,
            volatile_size: 0x100,
            constants: vec![0xAA, 0xBB],
            resources: vec![ResourceInfo {
                id: ResourceId::from("r0"),
                size: 16,
            }],
            opcodes: vec![0x0401_0203],
            abi,
        }
    }

    #[test]
    fn serializes_little_endian() {
        let bytes = payload(TargetAbi::LITTLE_64).serialize();
        assert_eq!(&bytes[0..4], &[4, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[2, 0, 0, 0]);
        assert_eq!(&bytes[12..14], &[0xAA, 0xBB]);
        // resource table: count, id length, "r0", size.
        assert_eq!(&bytes[14..18], &[1, 0, 0, 0]);
        assert_eq!(&bytes[18..22], &[2, 0, 0, 0]);
        assert_eq!(&bytes[22..24], b"r0");
        assert_eq!(&bytes[24..28], &[16, 0, 0, 0]);
        // opcode section: byte length then the word.
        assert_eq!(&bytes[28..32], &[4, 0, 0, 0]);
        assert_eq!(&bytes[32..36], &[0x03, 0x02, 0x01, 0x04]);
    }

    #[test]
    fn serializes_big_endian() {
        let bytes = payload(TargetAbi::BIG_64).serialize();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 4]);
        assert_eq!(&bytes[32..36], &[0x04, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn endianness_helpers_round_trip() {
        for e in [Endianness::Little, Endianness::Big] {
            assert_eq!(e.u32_from(e.u32_bytes(0xDEAD_BEEF)), 0xDEAD_BEEF);
        }
    }
}
