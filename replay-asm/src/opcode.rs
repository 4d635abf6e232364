use strum::EnumIter;

/// Operation selector of an instruction word, stored in the top 6 bits.
///
/// The payload interpretation per opcode:
///
/// | shape | opcodes |
/// |---|---|
/// | `api:4 \| pushReturn:1 \| functionId:16` | Call |
/// | `type:6 \| value:20` | PushI, LoadC, LoadV, Load |
/// | `value:26` | everything else |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Opcode {
    /// Invoke an API function; arguments are popped from the stack.
    Call = 0,
    /// Push an immediate; the 20-bit field may be widened by `Extend`s.
    PushI = 1,
    /// Push a typed load from a 20-bit constant-memory offset.
    LoadC = 2,
    /// Push a typed load from a 20-bit volatile-memory offset.
    LoadV = 3,
    /// Push a typed load from the address on top of the stack.
    Load = 4,
    /// Discard the top N stack entries.
    Pop = 5,
    /// Pop a value into a 26-bit volatile-memory offset.
    StoreV = 6,
    /// Pop an address, then pop a value into it.
    Store = 7,
    /// Fill the popped destination from a resource blob by table index.
    Resource = 8,
    /// Send popped (address, size) back to the host.
    Post = 9,
    /// Copy N bytes between two popped pointers.
    Copy = 10,
    /// Duplicate the N-th stack entry onto the top.
    Clone = 11,
    /// Bounded C-string copy between two popped pointers.
    Strcpy = 12,
    /// Widen the preceding `PushI` by another 26 bits.
    Extend = 13,
    /// Pop N values, push their sum.
    Add = 14,
    /// Mark the start of a command for diagnostics.
    Label = 15,
    /// Make the N-th replay thread current.
    SwitchThread = 16,
    /// Unconditional jump to a `Label`.
    JumpLabel = 17,
    /// Jump to a `Label` when the popped value is non-zero.
    JumpNZ = 18,
    /// Jump to a `Label` when the popped value is zero.
    JumpZ = 19,
    /// Send popped (address, size) to the host reader with the given id.
    Notification = 20,
    /// Block until the host signals the given fence.
    Wait = 21,
    /// Fill the popped destination from words carried in the stream.
    InlineResource = 22,
    /// Do nothing.
    Nop = 23,
}

impl Opcode {
    /// Decode the top 6 bits of an instruction word.
    pub const fn from_word(word: u32) -> Option<Self> {
        Some(match word >> 26 {
            0 => Opcode::Call,
            1 => Opcode::PushI,
            2 => Opcode::LoadC,
            3 => Opcode::LoadV,
            4 => Opcode::Load,
            5 => Opcode::Pop,
            6 => Opcode::StoreV,
            7 => Opcode::Store,
            8 => Opcode::Resource,
            9 => Opcode::Post,
            10 => Opcode::Copy,
            11 => Opcode::Clone,
            12 => Opcode::Strcpy,
            13 => Opcode::Extend,
            14 => Opcode::Add,
            15 => Opcode::Label,
            16 => Opcode::SwitchThread,
            17 => Opcode::JumpLabel,
            18 => Opcode::JumpNZ,
            19 => Opcode::JumpZ,
            20 => Opcode::Notification,
            21 => Opcode::Wait,
            22 => Opcode::InlineResource,
            23 => Opcode::Nop,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use strum::IntoEnumIterator;

    #[test]
    fn from_word_round_trips_every_opcode() {
        for op in Opcode::iter() {
            let word = (op as u32) << 26;
            assert_eq!(Opcode::from_word(word), Some(op));
        }
    }

    #[test]
    fn from_word_rejects_unassigned_selectors() {
        assert_eq!(Opcode::from_word(24 << 26), None);
        assert_eq!(Opcode::from_word(u32::MAX), None);
    }
}
