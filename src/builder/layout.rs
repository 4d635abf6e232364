//! Final volatile memory layout and the resolver built from it.

use replay_types::{MemoryRange, ProtocolType, RangeList, Resolver, TargetAbi, UNOBSERVED_POINTER};

/// Placement of every volatile region, fixed when the payload is built.
///
/// Low to high: the dependent carry-over, the heap, the temporary arena,
/// the reserved ranges, then the pointer-table ranges, each range padded
/// to pointer alignment. This is the resolver the instruction encoder
/// consults.
#[derive(Debug, Clone)]
pub struct VolatileLayout {
    pointer_size: u32,
    temp_base: u64,
    reserved: Vec<(MemoryRange, u64)>,
    pointers: Vec<(MemoryRange, u64)>,
    size: u64,
}

impl VolatileLayout {
    pub(crate) fn new(
        abi: TargetAbi,
        carry: u64,
        heap_size: u64,
        temp_size: u64,
        reserved: &RangeList,
        pointers: &RangeList,
    ) -> Self {
        let mut at = carry + heap_size;
        let temp_base = at;
        at += temp_size;
        let mut place = |ranges: &RangeList| {
            let mut placed = Vec::with_capacity(ranges.len());
            for r in ranges {
                at = abi.pointer_align(at);
                placed.push((*r, at));
                at += r.size;
            }
            placed
        };
        let reserved = place(reserved);
        let pointers = place(pointers);
        Self {
            pointer_size: abi.pointer_size(),
            temp_base,
            reserved,
            pointers,
            size: at,
        }
    }

    /// Total volatile memory the payload requires.
    pub fn size(&self) -> u64 {
        self.size
    }
}

fn resolve_in(spans: &[(MemoryRange, u64)], addr: u64) -> Option<u64> {
    let idx = spans.partition_point(|(r, _)| r.end() <= addr);
    let (range, base) = spans.get(idx)?;
    range.contains(addr).then(|| base + (addr - range.base))
}

impl Resolver for VolatileLayout {
    fn pointer_size(&self) -> u32 {
        self.pointer_size
    }

    fn resolve_observed(&self, addr: u64) -> (ProtocolType, u64) {
        match resolve_in(&self.reserved, addr) {
            Some(at) => (ProtocolType::VolatilePointer, at),
            None => (ProtocolType::AbsolutePointer, UNOBSERVED_POINTER),
        }
    }

    fn resolve_pointer_index(&self, index: u32) -> (ProtocolType, u64) {
        let addr = index as u64 * self.pointer_size as u64;
        match resolve_in(&self.pointers, addr) {
            Some(at) => (ProtocolType::VolatilePointer, at),
            None => (ProtocolType::AbsolutePointer, UNOBSERVED_POINTER),
        }
    }

    fn resolve_temporary(&self, offset: u32) -> u64 {
        self.temp_base + offset as u64
    }
}
