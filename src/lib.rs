//! Core of a graphics-API replay backend.
//!
//! Concurrent replay requests against a captured trace are coalesced
//! into shared passes, compiled into a compact stack-machine program,
//! executed on a remote replay agent and demultiplexed back to the
//! requesters:
//!
//! - [`manager::ReplayManager`] is the submission entry point; it keeps
//!   one [`scheduler::Scheduler`] per target device.
//! - The scheduler batches compatible requests and hands each batch to
//!   an executor, which asks the request's [`adapters::Generator`] to
//!   drive a [`builder::Builder`].
//! - The builder lowers replay operations to `replay-asm` instructions
//!   over the constant, volatile and temporary address spaces and
//!   assembles the final [`payload::Payload`].
//! - [`session::ReplaySession`] ships the payload over a framed
//!   connection, serves the agent's resource requests and routes
//!   post-backs, notifications and fence signals to their callbacks.

#![warn(missing_docs)]

pub mod adapters;
pub mod builder;
pub mod config;
pub mod error;
pub mod manager;
pub mod payload;
pub mod scheduler;
pub mod session;

pub mod prelude {
    //! Convenience re-exports of the types most integrations need.

    pub use replay_asm::{FunctionInfo, Instruction, Opcode};
    pub use replay_types::{
        Endianness, MemoryRange, ProtocolType, TargetAbi, Value,
    };

    pub use crate::adapters::{
        Capture, CaptureHeader, CaptureId, CaptureLoader, CommandWriter, CrashReporter, Device,
        DeviceId, DeviceInstance, DeviceRegistry, Generator, GeneratorId, ReplayCommand,
        ReplayIntent, ReplayTask, ResourceProvider,
    };
    pub use crate::builder::{Builder, Built, DependentState};
    pub use crate::config::{ReplayConfig, SchedulerConfig, UsageHint};
    pub use crate::error::{BuilderError, ReplayError, SessionError};
    pub use crate::manager::{BatchKey, ReplayManager, ReplayRequest};
    pub use crate::payload::{Payload, ResourceId, ResourceInfo};
    pub use crate::scheduler::{
        Batch, Executable, Executor, Precondition, Priority, ResultSlot, Scheduler, Signal,
        SignalHandle,
    };
    pub use crate::session::{ReplayExecutor, ReplaySession};
}
