use crate::encode::{encode_push, WordWriter};
use crate::{EncodeError, Opcode};

use replay_types::{ProtocolType, Resolver, Value};

const MASK_26: u64 = 0x03ff_ffff;
const MASK_20: u64 = 0x000f_ffff;

/// Identity of a callable API function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionInfo {
    /// Index of the API the function belongs to, 4 bits on the wire.
    pub api_index: u8,
    /// Function identifier within the API.
    pub function_id: u16,
    /// Number of arguments popped from the stack.
    pub parameters: u8,
    /// Whether the call leaves its return value on the stack.
    pub push_return: bool,
}

/// A deferred store absorbed into an [`Instruction::InlineResource`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchUp {
    /// Volatile-memory offset the value is written to.
    pub offset: u32,
    /// The value to write, resolved at encode time.
    pub value: Value,
}

/// One operation of the replay program.
///
/// Instructions are kept in this high-level form until the payload is
/// assembled; [`Instruction::encode`] lowers each to one or more packed
/// words, consulting the resolver for observed and temporary addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Invoke an API function.
    Call(FunctionInfo),
    /// Push a value onto the stack.
    Push(Value),
    /// Push a typed load from `addr`.
    Load {
        /// Type of the loaded value.
        ty: ProtocolType,
        /// Address loaded from.
        addr: Value,
    },
    /// Pop the top of the stack into `addr`.
    Store {
        /// Address stored to.
        addr: Value,
    },
    /// Discard the top `count` stack entries.
    Pop {
        /// Number of entries to discard.
        count: u32,
    },
    /// Copy `count` bytes from the popped source to the popped target.
    Copy {
        /// Number of bytes to copy.
        count: u64,
    },
    /// Duplicate the `index`-th entry from the top onto the top.
    Clone {
        /// Distance from the top of the stack, `0` being the top.
        index: u32,
    },
    /// Bounded C-string copy between two popped pointers.
    Strcpy {
        /// Capacity of the destination, including the terminator.
        max_size: u64,
    },
    /// Fill the destination from a resource blob by table index.
    Resource {
        /// Index into the payload's resource table.
        index: u32,
        /// Destination pointer.
        dest: Value,
    },
    /// Send `size` bytes at `addr` back to the host.
    Post {
        /// Source pointer.
        addr: Value,
        /// Number of bytes to post.
        size: u32,
    },
    /// Pop `count` values, push their sum.
    Add {
        /// Number of values to sum.
        count: u32,
    },
    /// Mark the start of a command for diagnostics.
    Label {
        /// Command identifier, truncated to 26 bits.
        value: u32,
    },
    /// Make the thread with the given dense index current.
    SwitchThread {
        /// 1-based dense thread index.
        index: u32,
    },
    /// Unconditional jump to the matching [`Instruction::Label`].
    JumpLabel {
        /// Label value jumped to.
        label: u32,
    },
    /// Jump when the popped value is non-zero.
    JumpNZ {
        /// Label value jumped to.
        label: u32,
    },
    /// Jump when the popped value is zero.
    JumpZ {
        /// Label value jumped to.
        label: u32,
    },
    /// Send `size` bytes at `addr` to the host reader with `id`.
    Notification {
        /// Notification stream identifier.
        id: u32,
        /// Source pointer.
        addr: Value,
        /// Number of bytes to send.
        size: u32,
    },
    /// Block until the host signals fence `id`.
    Wait {
        /// Fence identifier.
        id: u32,
    },
    /// Fill the destination from bytes carried in the instruction stream,
    /// then apply the absorbed store patch-ups.
    InlineResource {
        /// The blob, at most [`crate::MAX_INLINE_RESOURCE_SIZE`] bytes.
        data: Vec<u8>,
        /// Destination pointer.
        dest: Value,
        /// Absorbed `Push` + `Store` pairs, applied after the copy.
        patch_ups: Vec<PatchUp>,
        /// Absorbed `Load` + `Store` pairs as `(dst, src)` volatile
        /// offsets; a pointer-sized cell is copied from `src` to `dst`.
        pointer_patch_ups: Vec<(u32, u32)>,
    },
    /// Do nothing.
    Nop,
}

impl Instruction {
    /// Lower the instruction to packed words.
    pub fn encode<R: Resolver + ?Sized>(
        &self,
        resolver: &R,
        w: &mut WordWriter,
    ) -> Result<(), EncodeError> {
        match self {
            Instruction::Call(f) => w.call(f.api_index, f.push_return, f.function_id),
            Instruction::Push(v) => push(w, resolver, v),
            Instruction::Load { ty, addr } => {
                let r = addr.resolve(resolver);
                match r.ty {
                    ProtocolType::ConstantPointer if !r.on_stack && r.bits <= MASK_20 => {
                        w.typed(Opcode::LoadC, *ty, r.bits)
                    }
                    ProtocolType::VolatilePointer if !r.on_stack && r.bits <= MASK_20 => {
                        w.typed(Opcode::LoadV, *ty, r.bits)
                    }
                    _ => {
                        if !r.on_stack {
                            encode_push(w, r)?;
                        }
                        w.typed(Opcode::Load, *ty, 0)
                    }
                }
            }
            Instruction::Store { addr } => {
                let r = addr.resolve(resolver);
                if r.ty == ProtocolType::VolatilePointer && !r.on_stack && r.bits <= MASK_26 {
                    w.op(Opcode::StoreV, r.bits)
                } else {
                    if !r.on_stack {
                        encode_push(w, r)?;
                    }
                    w.op(Opcode::Store, 0)
                }
            }
            Instruction::Pop { count } => w.op(Opcode::Pop, *count as u64),
            Instruction::Copy { count } => w.op(Opcode::Copy, *count),
            Instruction::Clone { index } => w.op(Opcode::Clone, *index as u64),
            Instruction::Strcpy { max_size } => w.op(Opcode::Strcpy, *max_size),
            Instruction::Resource { index, dest } => {
                push(w, resolver, dest)?;
                w.op(Opcode::Resource, *index as u64)
            }
            Instruction::Post { addr, size } => {
                push(w, resolver, addr)?;
                encode_push(w, Value::U32(*size).resolve(resolver))?;
                w.op(Opcode::Post, 0)
            }
            Instruction::Add { count } => w.op(Opcode::Add, *count as u64),
            Instruction::Label { value } => w.op(Opcode::Label, *value as u64),
            Instruction::SwitchThread { index } => w.op(Opcode::SwitchThread, *index as u64),
            Instruction::JumpLabel { label } => w.op(Opcode::JumpLabel, *label as u64),
            Instruction::JumpNZ { label } => w.op(Opcode::JumpNZ, *label as u64),
            Instruction::JumpZ { label } => w.op(Opcode::JumpZ, *label as u64),
            Instruction::Notification { id, addr, size } => {
                push(w, resolver, addr)?;
                encode_push(w, Value::U32(*size).resolve(resolver))?;
                w.op(Opcode::Notification, *id as u64)
            }
            Instruction::Wait { id } => w.op(Opcode::Wait, *id as u64),
            Instruction::InlineResource {
                data,
                dest,
                patch_ups,
                pointer_patch_ups,
            } => {
                push(w, resolver, dest)?;
                let data_words = data.len().div_ceil(4);
                let extra = 1 + data_words + 1 + 4 * patch_ups.len() + 1 + 2 * pointer_patch_ups.len();
                w.op(Opcode::InlineResource, extra as u64)?;
                w.raw(data.len() as u32);
                for chunk in data.chunks(4) {
                    let mut word = [0u8; 4];
                    word[..chunk.len()].copy_from_slice(chunk);
                    w.raw(u32::from_le_bytes(word));
                }
                w.raw(patch_ups.len() as u32);
                for p in patch_ups {
                    let r = p.value.resolve(resolver);
                    w.raw(p.offset);
                    w.raw(r.ty as u32);
                    w.raw(r.bits as u32);
                    w.raw((r.bits >> 32) as u32);
                }
                w.raw(pointer_patch_ups.len() as u32);
                for (dst, src) in pointer_patch_ups {
                    w.raw(*dst);
                    w.raw(*src);
                }
                Ok(())
            }
            Instruction::Nop => w.op(Opcode::Nop, 0),
        }
    }
}

fn push<R: Resolver + ?Sized>(
    w: &mut WordWriter,
    resolver: &R,
    v: &Value,
) -> Result<(), EncodeError> {
    let r = v.resolve(resolver);
    if r.on_stack {
        return Ok(());
    }
    encode_push(w, r)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;

    impl Resolver for Identity {
        fn pointer_size(&self) -> u32 {
            8
        }

        fn resolve_observed(&self, addr: u64) -> (ProtocolType, u64) {
            (ProtocolType::VolatilePointer, addr)
        }

        fn resolve_pointer_index(&self, index: u32) -> (ProtocolType, u64) {
            (ProtocolType::VolatilePointer, index as u64 * 8)
        }

        fn resolve_temporary(&self, offset: u32) -> u64 {
            offset as u64
        }
    }

    fn words(i: Instruction) -> Vec<u32> {
        let mut w = WordWriter::new();
        i.encode(&Identity, &mut w).unwrap();
        w.into_words()
    }

    #[test]
    fn store_to_small_volatile_offset_uses_storev() {
        assert_eq!(
            words(Instruction::Store {
                addr: Value::VolatilePointer(0x10)
            }),
            vec![(Opcode::StoreV as u32) << 26 | 0x10]
        );
    }

    #[test]
    fn store_to_large_volatile_offset_pushes_the_address() {
        let w = words(Instruction::Store {
            addr: Value::VolatilePointer(0x400_0000),
        });
        assert_eq!(w.len(), 3);
        assert_eq!(Opcode::from_word(w[0]), Some(Opcode::PushI));
        assert_eq!(Opcode::from_word(w[1]), Some(Opcode::Extend));
        assert_eq!(Opcode::from_word(w[2]), Some(Opcode::Store));
    }

    #[test]
    fn load_from_small_offsets_uses_short_forms() {
        let w = words(Instruction::Load {
            ty: ProtocolType::U32,
            addr: Value::ConstantPointer(0x20),
        });
        assert_eq!(w, vec![(Opcode::LoadC as u32) << 26 | (ProtocolType::U32 as u32) << 20 | 0x20]);

        let w = words(Instruction::Load {
            ty: ProtocolType::U32,
            addr: Value::VolatilePointer(0x20),
        });
        assert_eq!(w, vec![(Opcode::LoadV as u32) << 26 | (ProtocolType::U32 as u32) << 20 | 0x20]);
    }

    #[test]
    fn load_from_absolute_address_is_generic() {
        let w = words(Instruction::Load {
            ty: ProtocolType::U8,
            addr: Value::AbsolutePointer(0x1234),
        });
        assert_eq!(w.len(), 2);
        assert_eq!(Opcode::from_word(w[0]), Some(Opcode::PushI));
        assert_eq!(Opcode::from_word(w[1]), Some(Opcode::Load));
    }

    #[test]
    fn pushing_a_stack_resident_value_emits_nothing() {
        assert!(words(Instruction::Push(Value::AbsoluteStackPointer)).is_empty());
    }

    #[test]
    fn call_packs_api_flag_and_function() {
        let w = words(Instruction::Call(FunctionInfo {
            api_index: 3,
            function_id: 0x1234,
            parameters: 2,
            push_return: true,
        }));
        assert_eq!(w, vec![3 << 17 | 1 << 16 | 0x1234]);
    }

    #[test]
    fn inline_resource_carries_blob_and_patch_ups() {
        let w = words(Instruction::InlineResource {
            data: vec![1, 2, 3, 4, 5],
            dest: Value::VolatilePointer(0),
            patch_ups: vec![PatchUp {
                offset: 0x8,
                value: Value::U64(0xDEAD_BEEF_0000_0001),
            }],
            pointer_patch_ups: vec![(0x10, 0x20)],
        });
        // push dest, head, size, 2 data words, patch count, 4 patch
        // words, pointer patch count, 2 pointer patch words.
        assert_eq!(w.len(), 13);
        assert_eq!(Opcode::from_word(w[1]), Some(Opcode::InlineResource));
        assert_eq!(w[1] & 0x03ff_ffff, 11);
        assert_eq!(w[2], 5);
        assert_eq!(w[3], u32::from_le_bytes([1, 2, 3, 4]));
        assert_eq!(w[4], 5);
        assert_eq!(w[5], 1);
        assert_eq!(w[6], 0x8);
        assert_eq!(w[7], ProtocolType::U64 as u32);
        assert_eq!(w[8], 0x0000_0001);
        assert_eq!(w[9], 0xDEAD_BEEF);
        assert_eq!(w[10], 1);
        assert_eq!(w[11], 0x10);
        assert_eq!(w[12], 0x20);
    }
}
