//! Translates high-level replay operations into a linear instruction
//! program over the constant, volatile and temporary address spaces.
//!
//! A builder accumulates instructions between [`Builder::begin_command`]
//! / [`Builder::commit_command`] pairs, tracks which instruction put
//! every value on the stack so commit can retro-optimise unconsumed
//! results, and lays out volatile memory once at [`Builder::build`].

mod arena;
mod layout;

pub use layout::VolatileLayout;

use arena::{Arena, ConstantArena};

use crate::adapters::ResourceProvider;
use crate::config::ReplayConfig;
use crate::error::{BuilderError, ReplayError};
use crate::payload::{Payload, ResourceId, ResourceInfo};
use crate::session::{
    FenceCallback, FenceHandler, NotificationHandler, NotificationReader, Postback,
    PostbackDecoder, PostbackHandler, FIRST_USER_NOTIFICATION_ID,
};

use replay_asm::{
    FunctionInfo, Instruction, PatchUp, WordWriter, MAX_INLINE_PATCH_UPS,
    MAX_INLINE_RESOURCE_SIZE,
};
use replay_types::{MemoryRange, ProtocolType, RangeList, TargetAbi, Value};

use std::collections::HashMap;

use tracing::debug;

const LABEL_MASK: u64 = 0x03ff_ffff;

#[derive(Debug, Clone, Copy)]
enum Scope {
    Outside,
    Inside {
        start: usize,
        decoders_start: usize,
    },
}

#[derive(Debug, Clone, Copy)]
struct StackEntry {
    instruction: usize,
}

#[derive(Debug, Clone, Copy)]
struct MappedRange {
    range: MemoryRange,
    /// Volatile offset of the heap cell holding the live base pointer.
    target: u32,
}

/// State a dependent builder inherits from its predecessor, enabling a
/// split-replay scheme where a payload reuses memory a priming payload
/// left behind.
#[derive(Debug, Clone, Default)]
pub struct DependentState {
    volatile_size: u64,
    mapped: Vec<MappedRange>,
}

/// Everything [`Builder::build`] produces: the payload and the three
/// demultiplexers the session feeds from the wire.
pub struct Built {
    /// The assembled payload.
    pub payload: Payload,
    /// Post-back decoders in registration order.
    pub postbacks: PostbackHandler,
    /// Notification readers by id.
    pub notifications: NotificationHandler,
    /// Fence callbacks by id.
    pub fences: FenceHandler,
    /// State a dependent builder may inherit.
    pub dependent: DependentState,
}

impl std::fmt::Debug for Built {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Built")
            .field("payload", &self.payload)
            .field("postbacks", &self.postbacks.len())
            .field("dependent", &self.dependent)
            .finish()
    }
}

/// Accumulates a replay instruction program. See the module docs.
pub struct Builder {
    abi: TargetAbi,
    carry: u64,
    instructions: Vec<Instruction>,
    constants: ConstantArena,
    heap: Arena,
    temp: Arena,
    reserved: RangeList,
    pointer_table: RangeList,
    mapped: Vec<MappedRange>,
    decoders: Vec<Postback>,
    notifications: HashMap<u32, NotificationReader>,
    next_notification: u32,
    fences: HashMap<u32, FenceCallback>,
    stack: Vec<StackEntry>,
    stack_peak: usize,
    threads: HashMap<u64, u32>,
    current_thread: u32,
    pending_thread: u32,
    last_label: Option<u32>,
    pending_label: Option<u32>,
    scope: Scope,
    resources: Vec<ResourceInfo>,
    resource_index: HashMap<ResourceId, u32>,
    /// Inline resources awaiting their blob bytes at build time, as
    /// (instruction index, resource table index).
    pending_inline: Vec<(usize, u32)>,
    config: ReplayConfig,
}

impl Builder {
    /// A fresh builder for the given target.
    pub fn new(abi: TargetAbi, config: ReplayConfig) -> Self {
        Self::with_carry(abi, config, DependentState::default())
    }

    /// A builder whose payload executes after `predecessor`'s payload,
    /// inheriting its volatile footprint and mapped-memory state.
    pub fn new_dependent(abi: TargetAbi, config: ReplayConfig, predecessor: &DependentState) -> Self {
        Self::with_carry(abi, config, predecessor.clone())
    }

    fn with_carry(abi: TargetAbi, config: ReplayConfig, carry: DependentState) -> Self {
        Self {
            abi,
            carry: carry.volatile_size,
            instructions: Vec::new(),
            constants: ConstantArena::new(abi),
            heap: Arena::new(carry.volatile_size),
            temp: Arena::new(0),
            reserved: RangeList::new(),
            pointer_table: RangeList::new(),
            mapped: carry.mapped,
            decoders: Vec::new(),
            notifications: HashMap::new(),
            next_notification: FIRST_USER_NOTIFICATION_ID,
            fences: HashMap::new(),
            stack: Vec::new(),
            stack_peak: 0,
            threads: HashMap::new(),
            current_thread: 0,
            pending_thread: 0,
            last_label: None,
            pending_label: None,
            scope: Scope::Outside,
            resources: Vec::new(),
            resource_index: HashMap::new(),
            pending_inline: Vec::new(),
            config,
        }
    }

    /// The target the payload is assembled for.
    pub const fn abi(&self) -> TargetAbi {
        self.abi
    }

    /// Number of instructions accumulated so far.
    pub fn instruction_count(&self) -> usize {
        self.instructions.len()
    }

    // ---- command lifecycle -------------------------------------------------

    /// Open a command scope.
    ///
    /// Emits a `Label` when the 26-bit-truncated `id` differs from the
    /// last committed one, and a `SwitchThread` when `thread` differs
    /// from the current replay thread.
    pub fn begin_command(&mut self, id: u64, thread: u64) -> Result<(), BuilderError> {
        if matches!(self.scope, Scope::Inside { .. }) {
            return Err(BuilderError::AlreadyInsideCommand);
        }
        self.scope = Scope::Inside {
            start: self.instructions.len(),
            decoders_start: self.decoders.len(),
        };
        let label = (id & LABEL_MASK) as u32;
        if self.last_label != Some(label) {
            self.emit(Instruction::Label { value: label }, 0, 0, 0)?;
        }
        self.pending_label = Some(label);
        let next_index = self.threads.len() as u32 + 1;
        let index = *self.threads.entry(thread).or_insert(next_index);
        self.pending_thread = index;
        if self.pending_thread != self.current_thread {
            self.emit(Instruction::SwitchThread { index }, 0, 0, 0)?;
        }
        Ok(())
    }

    /// Close the current command successfully.
    ///
    /// Runs the post-commit optimisations unless the config disables
    /// them: unconsumed `Call` results lose their push-return flag,
    /// unconsumed `Clone`/`Push`/`Load` results become `Nop`, trailing
    /// `Nop`s are trimmed, anything else left on the stack is dropped
    /// with a single `Pop`, and, when enabled, small resources are
    /// folded inline.
    pub fn commit_command(&mut self) -> Result<(), BuilderError> {
        let Scope::Inside { start, .. } = self.scope else {
            return Err(BuilderError::NotInsideCommand);
        };
        let mut leftovers = 0u32;
        if self.config.disable_optimisations {
            leftovers = self.stack.len() as u32;
            self.stack.clear();
        } else {
            for entry in std::mem::take(&mut self.stack) {
                let producer = &mut self.instructions[entry.instruction];
                match producer {
                    Instruction::Call(f) => f.push_return = false,
                    // Only pure pushes may vanish: a Load whose address
                    // itself came from the stack still has to consume it.
                    Instruction::Clone { .. } | Instruction::Push(_) => {
                        *producer = Instruction::Nop;
                    }
                    Instruction::Load { addr, .. }
                        if !matches!(addr, Value::AbsoluteStackPointer) =>
                    {
                        *producer = Instruction::Nop;
                    }
                    _ => leftovers += 1,
                }
            }
            while self.instructions.len() > start
                && matches!(self.instructions.last(), Some(Instruction::Nop))
            {
                self.instructions.pop();
            }
        }
        if leftovers > 0 {
            self.instructions.push(Instruction::Pop { count: leftovers });
        }
        if self.config.inline_resources && !self.config.disable_optimisations {
            self.inline_small_resources(start);
        }
        self.temp.reset();
        self.current_thread = self.pending_thread;
        self.last_label = self.pending_label;
        self.scope = Scope::Outside;
        Ok(())
    }

    /// Abort the current command.
    ///
    /// The instruction log is truncated to the command start and every
    /// post-back decoder registered since [`Builder::begin_command`]
    /// receives `err` exactly once. Heap allocations, reservations,
    /// resource writes and map/unmap side effects are kept: the final
    /// memory layout must stay a superset of everything any command
    /// attempted, even an aborted one.
    pub fn revert_command(&mut self, err: &ReplayError) -> Result<(), BuilderError> {
        let Scope::Inside {
            start,
            decoders_start,
        } = self.scope
        else {
            return Err(BuilderError::NotInsideCommand);
        };
        debug!(start, %err, "reverting command");
        self.instructions.truncate(start);
        for mut p in self.decoders.drain(decoders_start..) {
            (p.decoder)(Err(err));
        }
        self.stack.clear();
        self.temp.reset();
        self.pending_thread = self.current_thread;
        self.pending_label = self.last_label;
        self.scope = Scope::Outside;
        Ok(())
    }

    // ---- memory ------------------------------------------------------------

    /// Allocate payload-lifetime volatile memory.
    pub fn allocate_memory(&mut self, size: u64) -> Value {
        let align = self.abi.pointer_size() as u64;
        Value::VolatilePointer(self.heap.alloc(size, align) as u32)
    }

    /// Allocate memory valid only within the current command; the
    /// returned pointer is invalidated by the next commit or revert.
    pub fn allocate_temporary_memory(&mut self, size: u64) -> Value {
        let align = self.abi.pointer_size() as u64;
        Value::TemporaryPointer(self.temp.alloc(size, align) as u32)
    }

    /// Record that the observed range must exist at replay time.
    pub fn reserve_memory(&mut self, range: MemoryRange) {
        self.reserved.insert(range);
    }

    /// Record that observed pointer-table indices covering `range` must
    /// exist at replay time.
    pub fn reserve_pointer_table(&mut self, range: MemoryRange) {
        self.pointer_table.insert(range);
    }

    /// Register `range` as mapped to the absolute address currently on
    /// top of the stack.
    ///
    /// The address is captured into a heap cell; observed pointers
    /// falling inside `range` are thereafter remapped through that cell
    /// at the point of use.
    pub fn map_memory(&mut self, range: MemoryRange) -> Result<(), BuilderError> {
        if self.stack.is_empty() {
            return Err(BuilderError::NothingToMap);
        }
        if self.mapped.iter().any(|m| m.range.overlaps(&range)) {
            return Err(BuilderError::AlreadyMapped(range));
        }
        let ptr = self.abi.pointer_size() as u64;
        let target = self.heap.alloc(ptr, ptr) as u32;
        self.emit(
            Instruction::Store {
                addr: Value::VolatilePointer(target),
            },
            1,
            0,
            1,
        )?;
        let at = self
            .mapped
            .partition_point(|m| m.range.base < range.base);
        self.mapped.insert(at, MappedRange { range, target });
        Ok(())
    }

    /// Remove a mapping previously registered with exactly this span.
    pub fn unmap_memory(&mut self, range: MemoryRange) -> Result<(), BuilderError> {
        match self.mapped.iter().position(|m| m.range == range) {
            Some(at) => {
                self.mapped.remove(at);
                Ok(())
            }
            None => Err(BuilderError::NotMapped(range)),
        }
    }

    // ---- constant memory ---------------------------------------------------

    /// Intern a NUL-terminated string in constant memory.
    pub fn string(&mut self, s: &str) -> Value {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        Value::ConstantPointer(self.constants.intern(&bytes, 1))
    }

    /// Intern raw bytes in constant memory.
    pub fn constant_data(&mut self, bytes: &[u8], align: u32) -> Value {
        Value::ConstantPointer(self.constants.intern(bytes, align))
    }

    /// Intern a value sequence in constant memory, serialized in the
    /// target byte order. Writing the same sequence twice yields the
    /// same pointer.
    pub fn constant_values(&mut self, values: &[Value]) -> Value {
        let resolver = ConstSpaceResolver {
            pointer_size: self.abi.pointer_size(),
        };
        let resolved: Vec<_> = values.iter().map(|v| v.resolve(&resolver)).collect();
        Value::ConstantPointer(self.constants.intern_values(&resolved))
    }

    // ---- instruction operations --------------------------------------------

    /// Push a value onto the stack, remapping observed pointers that
    /// fall inside a mapped range.
    pub fn push(&mut self, value: Value) -> Result<(), BuilderError> {
        let value = self.remap(value)?;
        if matches!(value, Value::AbsoluteStackPointer) {
            // Already on the stack, either from remapping or because the
            // caller is forwarding a prior result.
            return Ok(());
        }
        self.emit(Instruction::Push(value), 0, 1, 1)
    }

    /// Invoke an API function; its arguments must already be pushed.
    pub fn call(&mut self, function: FunctionInfo) -> Result<(), BuilderError> {
        let pushes = function.push_return as usize;
        self.emit(
            Instruction::Call(function),
            function.parameters as usize,
            pushes,
            0,
        )
    }

    /// Push a typed load from `addr`.
    pub fn load(&mut self, ty: ProtocolType, addr: Value) -> Result<(), BuilderError> {
        self.valid(addr)?;
        let addr = self.remap(addr)?;
        let pops = matches!(addr, Value::AbsoluteStackPointer) as usize;
        self.emit(Instruction::Load { ty, addr }, pops, 1, 1)
    }

    /// Pop the top of the stack into `addr`.
    pub fn store(&mut self, addr: Value) -> Result<(), BuilderError> {
        self.valid(addr)?;
        let addr = self.remap(addr)?;
        let pops = 1 + matches!(addr, Value::AbsoluteStackPointer) as usize;
        self.emit(Instruction::Store { addr }, pops, 0, 1)
    }

    /// Duplicate the `index`-th entry from the top onto the top.
    pub fn clone_stack(&mut self, index: u32) -> Result<(), BuilderError> {
        self.emit(Instruction::Clone { index }, 0, 1, 1)
    }

    /// Discard the top `count` stack entries.
    pub fn pop(&mut self, count: u32) -> Result<(), BuilderError> {
        self.emit(Instruction::Pop { count }, count as usize, 0, 0)
    }

    /// Copy `count` bytes; source and target must already be pushed.
    pub fn copy(&mut self, count: u64) -> Result<(), BuilderError> {
        self.emit(Instruction::Copy { count }, 2, 0, 0)
    }

    /// Bounded C-string copy; source and target must already be pushed.
    pub fn strcpy(&mut self, max_size: u64) -> Result<(), BuilderError> {
        self.emit(Instruction::Strcpy { max_size }, 2, 0, 0)
    }

    /// Fill `range` from the resource blob identified by `id`, and
    /// reserve the range.
    pub fn write(&mut self, range: MemoryRange, id: ResourceId) -> Result<(), BuilderError> {
        let dest = Value::ObservedPointer(range.base);
        self.valid(dest)?;
        let index = self.resource(id, range.size);
        let dest = self.remap(dest)?;
        let pops = matches!(dest, Value::AbsoluteStackPointer) as usize;
        self.emit(Instruction::Resource { index, dest }, pops, 0, 1)?;
        self.reserve_memory(range);
        Ok(())
    }

    /// Post `size` bytes at `addr` back to the host; `decoder` receives
    /// exactly that many bytes, or the error that ended the pass.
    pub fn post(
        &mut self,
        addr: Value,
        size: u32,
        decoder: PostbackDecoder,
    ) -> Result<(), BuilderError> {
        self.valid(addr)?;
        let addr = self.remap(addr)?;
        let pops = matches!(addr, Value::AbsoluteStackPointer) as usize;
        self.emit(Instruction::Post { addr, size }, pops, 0, 2)?;
        self.decoders.push(Postback { size, decoder });
        Ok(())
    }

    /// Register a reader for a fresh notification stream, returning its
    /// id. Ids are dense and strictly increasing from
    /// [`FIRST_USER_NOTIFICATION_ID`].
    pub fn add_notification_reader(&mut self, reader: NotificationReader) -> u32 {
        let id = self.next_notification;
        self.next_notification += 1;
        self.notifications.insert(id, reader);
        id
    }

    /// Register a reader for one of the reserved notification ids.
    pub fn set_reserved_reader(&mut self, id: u32, reader: NotificationReader) {
        debug_assert!(id < FIRST_USER_NOTIFICATION_ID);
        self.notifications.insert(id, reader);
    }

    /// Send `size` bytes at `addr` to the reader registered for `id`.
    pub fn notification(&mut self, id: u32, addr: Value, size: u32) -> Result<(), BuilderError> {
        if !self.notifications.contains_key(&id) {
            return Err(BuilderError::UnknownNotification(id));
        }
        self.valid(addr)?;
        let addr = self.remap(addr)?;
        let pops = matches!(addr, Value::AbsoluteStackPointer) as usize;
        self.emit(Instruction::Notification { id, addr, size }, pops, 0, 2)
    }

    /// Register a callback for fence `id`.
    pub fn add_fence_callback(&mut self, id: u32, callback: FenceCallback) {
        self.fences.insert(id, callback);
    }

    /// Make the agent block until the host signals fence `id`.
    pub fn wait(&mut self, id: u32) -> Result<(), BuilderError> {
        if !self.fences.contains_key(&id) {
            return Err(BuilderError::UnknownFence(id));
        }
        self.emit(Instruction::Wait { id }, 0, 0, 0)
    }

    /// Emit a jump to the command label `label`.
    pub fn jump_label(&mut self, label: u32) -> Result<(), BuilderError> {
        self.emit(Instruction::JumpLabel { label }, 0, 0, 0)
    }

    /// Emit a jump taken when the popped value is non-zero.
    pub fn jump_nz(&mut self, label: u32) -> Result<(), BuilderError> {
        self.emit(Instruction::JumpNZ { label }, 1, 0, 0)
    }

    /// Emit a jump taken when the popped value is zero.
    pub fn jump_z(&mut self, label: u32) -> Result<(), BuilderError> {
        self.emit(Instruction::JumpZ { label }, 1, 0, 0)
    }

    // ---- assembly ----------------------------------------------------------

    /// Lay out volatile memory, encode the program and hand back the
    /// payload plus its demultiplexers.
    ///
    /// This is the only suspending operation of the builder: inline
    /// resources fetch their bytes from the database here.
    pub async fn build<P: ResourceProvider + ?Sized>(
        mut self,
        provider: &P,
    ) -> Result<Built, ReplayError> {
        if matches!(self.scope, Scope::Inside { .. }) {
            return Err(BuilderError::AlreadyInsideCommand.into());
        }
        let layout = VolatileLayout::new(
            self.abi,
            self.carry,
            self.heap.size(),
            self.temp.size(),
            &self.reserved,
            &self.pointer_table,
        );
        for (at, res) in std::mem::take(&mut self.pending_inline) {
            let info = &self.resources[res as usize];
            let bytes = provider.lookup(&info.id).await?;
            if bytes.len() as u64 != info.size as u64 {
                return Err(BuilderError::InvalidResource {
                    id: info.id.as_str().to_owned(),
                    declared: info.size as u64,
                    actual: bytes.len() as u64,
                }
                .into());
            }
            if let Instruction::InlineResource { data, .. } = &mut self.instructions[at] {
                *data = bytes;
            }
        }
        let mut writer = WordWriter::new();
        for i in &self.instructions {
            i.encode(&layout, &mut writer)
                .map_err(BuilderError::Encode)?;
        }
        debug!(
            instructions = self.instructions.len(),
            words = writer.len(),
            volatile = layout.size(),
            "payload assembled"
        );
        Ok(Built {
            payload: Payload {
                stack_size: self.stack_peak as u32,
                volatile_size: layout.size() as u32,
                constants: self.constants.into_bytes(),
                resources: self.resources,
                opcodes: writer.into_words(),
                abi: self.abi,
            },
            postbacks: PostbackHandler::new(self.decoders),
            notifications: NotificationHandler::new(self.notifications),
            fences: FenceHandler::new(self.fences),
            dependent: DependentState {
                volatile_size: layout.size(),
                mapped: self.mapped,
            },
        })
    }

    /// Build the payload for serialisation to disk instead of
    /// execution: every registered decoder receives
    /// [`ReplayError::Cancelled`], since no post-backs will ever arrive.
    pub async fn export<P: ResourceProvider + ?Sized>(
        self,
        provider: &P,
    ) -> Result<Built, ReplayError> {
        let mut built = self.build(provider).await?;
        let err = ReplayError::Cancelled;
        built.postbacks.fail_all(&err);
        built.notifications.fail_all(&err);
        built.fences.fail_all(&err);
        Ok(built)
    }

    // ---- internals ---------------------------------------------------------

    /// Route an observed pointer through the mapped-memory indirection.
    ///
    /// A pointer inside a mapped range becomes three instructions (load
    /// the live base, push the offset, add) and is replaced by the
    /// resulting stack-resident absolute pointer; anything else passes
    /// through unchanged.
    fn remap(&mut self, value: Value) -> Result<Value, BuilderError> {
        let Value::ObservedPointer(addr) = value else {
            return Ok(value);
        };
        let Some(m) = self.mapped.iter().find(|m| m.range.contains(addr)).copied() else {
            return Ok(value);
        };
        let offset = addr - m.range.base;
        self.emit(
            Instruction::Load {
                ty: ProtocolType::AbsolutePointer,
                addr: Value::VolatilePointer(m.target),
            },
            0,
            1,
            1,
        )?;
        self.emit(Instruction::Push(Value::U64(offset)), 0, 1, 1)?;
        self.emit(Instruction::Add { count: 2 }, 2, 1, 0)?;
        Ok(Value::AbsoluteStackPointer)
    }

    fn valid(&self, value: Value) -> Result<(), BuilderError> {
        if value.is_valid() {
            Ok(())
        } else {
            Err(BuilderError::InvalidPointer(value))
        }
    }

    fn resource(&mut self, id: ResourceId, size: u64) -> u32 {
        if let Some(&index) = self.resource_index.get(&id) {
            return index;
        }
        let index = self.resources.len() as u32;
        self.resources.push(ResourceInfo {
            id: id.clone(),
            size: size as u32,
        });
        self.resource_index.insert(id, index);
        index
    }

    fn emit(
        &mut self,
        instruction: Instruction,
        pops: usize,
        pushes: usize,
        transient: usize,
    ) -> Result<(), BuilderError> {
        self.stack_peak = self.stack_peak.max(self.stack.len() + transient);
        for _ in 0..pops {
            self.stack.pop().ok_or(BuilderError::StackUnderflow)?;
        }
        let at = self.instructions.len();
        self.instructions.push(instruction);
        for _ in 0..pushes {
            self.stack.push(StackEntry { instruction: at });
        }
        self.stack_peak = self.stack_peak.max(self.stack.len());
        Ok(())
    }

    /// Replace small `Resource` fills emitted by this command with
    /// inline carriers, absorbing directly trailing `Push`+`Store` and
    /// `Load`+`Store` pairs as patch-ups.
    fn inline_small_resources(&mut self, start: usize) {
        let tail: Vec<Instruction> = self.instructions.drain(start..).collect();
        let mut k = 0;
        while k < tail.len() {
            let small = match &tail[k] {
                Instruction::Resource { index, dest }
                    if self.resources[*index as usize].size as usize
                        <= MAX_INLINE_RESOURCE_SIZE =>
                {
                    Some((*index, *dest))
                }
                _ => None,
            };
            let Some((index, dest)) = small else {
                self.instructions.push(tail[k].clone());
                k += 1;
                continue;
            };
            let mut patch_ups = Vec::new();
            let mut pointer_patch_ups = Vec::new();
            let mut j = k + 1;
            while j + 1 < tail.len() {
                match (&tail[j], &tail[j + 1]) {
                    (
                        Instruction::Push(v),
                        Instruction::Store {
                            addr: Value::VolatilePointer(o),
                        },
                    ) if patch_ups.len() < MAX_INLINE_PATCH_UPS => {
                        patch_ups.push(PatchUp {
                            offset: *o,
                            value: *v,
                        });
                        j += 2;
                    }
                    (
                        Instruction::Load {
                            addr: Value::VolatilePointer(src),
                            ..
                        },
                        Instruction::Store {
                            addr: Value::VolatilePointer(dst),
                        },
                    ) => {
                        pointer_patch_ups.push((*dst, *src));
                        j += 2;
                    }
                    _ => break,
                }
            }
            self.instructions.push(Instruction::InlineResource {
                data: Vec::new(),
                dest,
                patch_ups,
                pointer_patch_ups,
            });
            self.pending_inline
                .push((self.instructions.len() - 1, index));
            k = j;
        }
    }
}

/// Resolver used while interning constants: nothing volatile has an
/// address yet, so observed pointers degrade to the sentinel.
struct ConstSpaceResolver {
    pointer_size: u32,
}

impl replay_types::Resolver for ConstSpaceResolver {
    fn pointer_size(&self) -> u32 {
        self.pointer_size
    }

    fn resolve_observed(&self, _addr: u64) -> (ProtocolType, u64) {
        (ProtocolType::AbsolutePointer, replay_types::UNOBSERVED_POINTER)
    }

    fn resolve_pointer_index(&self, _index: u32) -> (ProtocolType, u64) {
        (ProtocolType::AbsolutePointer, replay_types::UNOBSERVED_POINTER)
    }

    fn resolve_temporary(&self, offset: u32) -> u64 {
        offset as u64
    }
}
