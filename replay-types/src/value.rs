use crate::{ProtocolType, Resolver, FIRST_VALID_ADDRESS};

/// A typed primitive or pointer handled by the replay instruction stream.
///
/// The four pointer address spaces (absolute, constant, volatile,
/// observed) are joined by two derived kinds: [`Value::PointerIndex`],
/// an index into the pointer-table sub-region of volatile memory, and
/// [`Value::TemporaryPointer`], an offset into the per-command temporary
/// arena. [`Value::AbsoluteStackPointer`] stands for a pointer the emitted
/// instructions have already materialised on the agent's stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed 8-bit integer.
    I8(i8),
    /// Signed 16-bit integer.
    I16(i16),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 16-bit integer.
    U16(u16),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// IEEE-754 single precision value.
    F32(f32),
    /// IEEE-754 double precision value.
    F64(f64),
    /// Raw address passed through to the agent unchanged.
    AbsolutePointer(u64),
    /// An absolute pointer already sitting on top of the agent's stack.
    AbsoluteStackPointer,
    /// Offset into the payload's constant memory blob.
    ConstantPointer(u32),
    /// Offset into the payload's volatile memory.
    VolatilePointer(u32),
    /// Capture-time address, remapped through the reserved ranges.
    ObservedPointer(u64),
    /// Index into the pointer-table sub-region of volatile memory.
    PointerIndex(u32),
    /// Offset into the temporary arena; valid within one command only.
    TemporaryPointer(u32),
}

/// The wire form of a [`Value`]: its protocol type, its 64-bit bit
/// pattern, and whether it is already on the agent's stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    /// Protocol type the value lowers to.
    pub ty: ProtocolType,
    /// Bit pattern, sign- or zero-extended to 64 bits.
    pub bits: u64,
    /// The value is already on the stack; nothing needs pushing.
    pub on_stack: bool,
}

impl Resolved {
    const fn new(ty: ProtocolType, bits: u64) -> Self {
        Self {
            ty,
            bits,
            on_stack: false,
        }
    }
}

impl Value {
    /// Lower the value to its wire form.
    ///
    /// Observed pointers, pointer indices and temporary offsets go through
    /// `resolver`; everything else resolves to its own bit pattern.
    pub fn resolve<R: Resolver + ?Sized>(&self, resolver: &R) -> Resolved {
        match *self {
            Value::Bool(v) => Resolved::new(ProtocolType::Bool, v as u64),
            Value::I8(v) => Resolved::new(ProtocolType::I8, v as i64 as u64),
            Value::I16(v) => Resolved::new(ProtocolType::I16, v as i64 as u64),
            Value::I32(v) => Resolved::new(ProtocolType::I32, v as i64 as u64),
            Value::I64(v) => Resolved::new(ProtocolType::I64, v as u64),
            Value::U8(v) => Resolved::new(ProtocolType::U8, v as u64),
            Value::U16(v) => Resolved::new(ProtocolType::U16, v as u64),
            Value::U32(v) => Resolved::new(ProtocolType::U32, v as u64),
            Value::U64(v) => Resolved::new(ProtocolType::U64, v),
            Value::F32(v) => Resolved::new(ProtocolType::Float, v.to_bits() as u64),
            Value::F64(v) => Resolved::new(ProtocolType::Double, v.to_bits()),
            Value::AbsolutePointer(a) => Resolved::new(ProtocolType::AbsolutePointer, a),
            Value::AbsoluteStackPointer => Resolved {
                ty: ProtocolType::AbsolutePointer,
                bits: 0,
                on_stack: true,
            },
            Value::ConstantPointer(o) => Resolved::new(ProtocolType::ConstantPointer, o as u64),
            Value::VolatilePointer(o) => Resolved::new(ProtocolType::VolatilePointer, o as u64),
            Value::ObservedPointer(a) => {
                let (ty, bits) = resolver.resolve_observed(a);
                Resolved::new(ty, bits)
            }
            Value::PointerIndex(i) => {
                let (ty, bits) = resolver.resolve_pointer_index(i);
                Resolved::new(ty, bits)
            }
            Value::TemporaryPointer(o) => Resolved::new(
                ProtocolType::VolatilePointer,
                resolver.resolve_temporary(o),
            ),
        }
    }

    /// Displace a pointer by `n` bytes. Non-pointer values are returned
    /// unchanged.
    pub const fn offset(self, n: u64) -> Value {
        match self {
            Value::AbsolutePointer(a) => Value::AbsolutePointer(a + n),
            Value::ConstantPointer(o) => Value::ConstantPointer(o + n as u32),
            Value::VolatilePointer(o) => Value::VolatilePointer(o + n as u32),
            Value::ObservedPointer(a) => Value::ObservedPointer(a + n),
            Value::TemporaryPointer(o) => Value::TemporaryPointer(o + n as u32),
            other => other,
        }
    }

    /// Whether the value may be used as an instruction destination.
    ///
    /// Observed pointers are only valid from [`FIRST_VALID_ADDRESS`] up;
    /// every other value is always valid.
    pub const fn is_valid(&self) -> bool {
        match self {
            Value::ObservedPointer(a) => *a >= FIRST_VALID_ADDRESS,
            _ => true,
        }
    }

    /// Whether the value is one of the pointer kinds.
    pub const fn is_pointer(&self) -> bool {
        matches!(
            self,
            Value::AbsolutePointer(_)
                | Value::AbsoluteStackPointer
                | Value::ConstantPointer(_)
                | Value::VolatilePointer(_)
                | Value::ObservedPointer(_)
                | Value::PointerIndex(_)
                | Value::TemporaryPointer(_)
        )
    }
}
