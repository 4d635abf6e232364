//! Error surface of the replay core.

use replay_asm::EncodeError;
use replay_types::{MemoryRange, Value};

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Misuse of the builder contract. These are programming errors in the
/// code driving the builder; the current pass cannot recover, but they
/// surface as per-request failures rather than process aborts.
#[derive(Debug, Clone, Error)]
pub enum BuilderError {
    /// `begin_command` was called while a command was already open.
    #[error("begin_command called inside an open command")]
    AlreadyInsideCommand,
    /// `commit_command` or `revert_command` was called with no open
    /// command, or an instruction was emitted outside one.
    #[error("operation requires an open command")]
    NotInsideCommand,
    /// An instruction was given an invalid destination pointer.
    #[error("invalid pointer {0:?}")]
    InvalidPointer(Value),
    /// An instruction consumed more stack entries than were pushed.
    #[error("instruction would underflow the stack model")]
    StackUnderflow,
    /// `map_memory` was called with nothing on the stack to capture.
    #[error("map_memory requires the mapped target address on the stack")]
    NothingToMap,
    /// `map_memory` was given a span overlapping an existing mapping.
    #[error("range {0} overlaps an existing mapping")]
    AlreadyMapped(MemoryRange),
    /// `unmap_memory` was given a span that is not exactly a prior
    /// `map_memory` span.
    #[error("range {0} is not an exactly mapped span")]
    NotMapped(MemoryRange),
    /// A `notification` was emitted for an id with no registered reader.
    #[error("notification id {0} has no registered reader")]
    UnknownNotification(u32),
    /// A `wait` was emitted for a fence with no registered callback.
    #[error("fence id {0} has no registered callback")]
    UnknownFence(u32),
    /// A resource blob's size no longer matched its declared size when
    /// the payload was assembled.
    #[error("resource {id} is {actual} bytes, declared {declared}")]
    InvalidResource {
        /// The stable resource identifier.
        id: String,
        /// Size recorded when the resource was written.
        declared: u64,
        /// Size the database returned at build time.
        actual: u64,
    },
    /// A packed field overflowed its bit width.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Failures of the framed session protocol.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Socket read or write failure; terminates the pass.
    #[error("transport error: {0}")]
    Io(Arc<io::Error>),
    /// The agent requested an unknown payload identifier.
    #[error("unknown payload id {0}")]
    UnknownPayload(u32),
    /// The blobs resolved for a resource request did not add up to the
    /// size the agent expected.
    #[error("resource request resolved to {actual} bytes, agent expected {expected}")]
    ResourceSizeMismatch {
        /// Total size the agent declared.
        expected: u64,
        /// Total size of the resolved blobs.
        actual: u64,
    },
    /// A post-back piece did not match the decoder's expected size.
    #[error("post-back {index} carried {actual} bytes, decoder expects {expected}")]
    PostbackSizeMismatch {
        /// Registration index of the decoder.
        index: usize,
        /// Size registered with the decoder.
        expected: u64,
        /// Size of the delivered piece.
        actual: u64,
    },
    /// A piece arrived after an earlier size mismatch poisoned the
    /// post-back stream.
    #[error("post-back stream poisoned by an earlier size mismatch")]
    PoisonedPostbacks,
    /// A post-back piece referenced a decoder index that was never
    /// registered.
    #[error("post-back referenced unknown decoder index {0}")]
    UnknownDecoder(usize),
    /// A frame carried an unknown message tag.
    #[error("unknown frame tag {0:#x}")]
    UnknownFrame(u8),
    /// A frame ended before its declared fields did.
    #[error("truncated frame")]
    TruncatedFrame,
    /// `set_replay_executor` was called while an executor was active.
    #[error("a replay executor is already installed")]
    ExecutorActive,
    /// The pass ran without an installed executor.
    #[error("no replay executor installed")]
    NoExecutor,
}

impl From<io::Error> for SessionError {
    fn from(e: io::Error) -> Self {
        SessionError::Io(Arc::new(e))
    }
}

/// Top-level error of the replay core, fanned out to request results,
/// post-back decoders, notification readers and fence callbacks.
#[derive(Debug, Clone, Error)]
pub enum ReplayError {
    /// Builder misuse or build-time validation failure.
    #[error(transparent)]
    Builder(#[from] BuilderError),
    /// Session transport or protocol failure.
    #[error(transparent)]
    Session(#[from] SessionError),
    /// The request was cancelled before its batch was dispatched, or
    /// the payload was exported instead of executed.
    #[error("replay cancelled")]
    Cancelled,
    /// An export was asked to combine jobs with differing batch keys.
    #[error("batch contains incompatible keys")]
    IncompatibleBatch,
    /// The scheduler was stopped before the request could run.
    #[error("scheduler stopped")]
    SchedulerStopped,
    /// The agent reported that the replay finished with an error.
    #[error("replay agent failed: {0}")]
    Agent(String),
    /// A collaborator (capture loader, device registry, resource
    /// database) failed to produce its input.
    #[error("collaborator failure: {0}")]
    Collaborator(String),
}

impl From<EncodeError> for ReplayError {
    fn from(e: EncodeError) -> Self {
        ReplayError::Builder(BuilderError::Encode(e))
    }
}
