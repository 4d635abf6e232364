use crate::ProtocolType;

/// Translates build-time address spaces into replay-time ones.
///
/// The builder constructs a resolver once the volatile memory layout is
/// final; the instruction encoder consults it for every observed pointer,
/// pointer-table index and temporary offset it serializes.
pub trait Resolver {
    /// Pointer width of the target, in bytes.
    fn pointer_size(&self) -> u32;

    /// Resolve a capture-time address.
    ///
    /// Returns a volatile pointer inside the reserved range that covers
    /// `addr`, or `(AbsolutePointer, UNOBSERVED_POINTER)` when no
    /// reservation does.
    fn resolve_observed(&self, addr: u64) -> (ProtocolType, u64);

    /// Resolve an index into the pointer-table sub-region.
    fn resolve_pointer_index(&self, index: u32) -> (ProtocolType, u64);

    /// Resolve a temporary-arena offset to its volatile address.
    fn resolve_temporary(&self, offset: u32) -> u64;
}
