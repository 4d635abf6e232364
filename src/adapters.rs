//! Interfaces to the core's external collaborators: captures, devices,
//! generators, the resource database and the crash-report sink.
//!
//! The core never touches graphics semantics; everything API-specific
//! reaches it through [`Generator`], which drives a [`Builder`] through
//! the [`CommandWriter`] one command at a time.

use crate::builder::Builder;
use crate::config::ReplayConfig;
use crate::error::ReplayError;
use crate::payload::ResourceId;
use crate::scheduler::ResultSlot;

use replay_types::{MemoryRange, TargetAbi};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::warn;

/// Identifier of a replay target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u64);

/// Identifier of a capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CaptureId(pub String);

/// Identity of a generator implementation, used for batch keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeneratorId(pub u32);

/// What a replay request is for: which capture on which device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayIntent {
    /// The target device.
    pub device: DeviceId,
    /// The capture being replayed.
    pub capture: CaptureId,
}

/// Static description of a device.
#[derive(Debug, Clone)]
pub struct DeviceInstance {
    /// The device's identifier.
    pub id: DeviceId,
    /// Operating system name, for diagnostics.
    pub os: String,
    /// ABIs the device can run a replay agent under.
    pub abis: Vec<TargetAbi>,
}

/// Read half of an agent connection.
pub type ConnectionReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of an agent connection.
pub type ConnectionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A device that can host a remote replay agent.
#[async_trait]
pub trait Device: Send + Sync {
    /// The device description.
    fn instance(&self) -> &DeviceInstance;

    /// Open a connection to a replay agent running under `abi`.
    async fn connect(
        &self,
        abi: TargetAbi,
    ) -> Result<(ConnectionReader, ConnectionWriter), ReplayError>;
}

/// Looks devices up by id.
pub trait DeviceRegistry: Send + Sync {
    /// The device with the given id, if registered.
    fn device(&self, id: DeviceId) -> Option<Arc<dyn Device>>;
}

/// Header metadata of a capture.
#[derive(Debug, Clone)]
pub struct CaptureHeader {
    /// ABI the capture was taken under: pointer width and endianness.
    pub abi: TargetAbi,
}

/// A loaded capture.
pub trait Capture: Send + Sync {
    /// The capture's identifier.
    fn id(&self) -> &CaptureId;

    /// Header metadata.
    fn header(&self) -> &CaptureHeader;

    /// Observed ranges every replay of this capture must reserve.
    fn initial_ranges(&self) -> &[MemoryRange];
}

/// Loads captures by id.
#[async_trait]
pub trait CaptureLoader: Send + Sync {
    /// Load the capture with the given id.
    async fn load(&self, id: &CaptureId) -> Result<Arc<dyn Capture>, ReplayError>;
}

/// Content-addressed blob storage. Lookups are read-only and may run
/// concurrently.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// The blob bytes for `id`.
    async fn lookup(&self, id: &ResourceId) -> Result<Vec<u8>, ReplayError>;
}

/// Sink for agent crash dumps, uploaded opaquely.
pub trait CrashReporter: Send + Sync {
    /// Report one dump.
    fn report(&self, name: &str, data: &[u8]);
}

/// One request travelling through a generator: its payload and the
/// hook its replay result must be delivered through.
pub struct ReplayTask<Q, V> {
    /// The request payload, meaningful only to the generator.
    pub request: Q,
    /// Where the result goes. Resolve exactly once.
    pub result: ResultSlot<V>,
}

/// An API-specific collaborator that turns a capture's command stream
/// into builder operations.
#[async_trait]
pub trait Generator: Send + Sync + 'static {
    /// Per-request payload understood by this generator.
    type Request: Send + Sync + 'static;
    /// Per-request result produced by this generator.
    type Value: Send + Sync + 'static;

    /// Stable identity, used for batch keying.
    fn id(&self) -> GeneratorId;

    /// Drive the builder for every request of one batch.
    ///
    /// The generator typically registers a post-back per request and
    /// resolves each task from its decoder once the agent responds.
    async fn replay(
        &self,
        intent: &ReplayIntent,
        config: &ReplayConfig,
        requests: &mut Vec<ReplayTask<Self::Request, Self::Value>>,
        device: &DeviceInstance,
        capture: &dyn Capture,
        out: &mut CommandWriter<'_>,
    ) -> Result<(), ReplayError>;
}

/// One captured command, replayed by emitting builder operations.
pub trait ReplayCommand {
    /// The capture thread the command ran on.
    fn thread(&self) -> u64;

    /// Emit this command's replay operations.
    fn mutate(&self, builder: &mut Builder) -> Result<(), ReplayError>;
}

/// Per-command wrapper around a builder: every written command is
/// bracketed by `begin_command` and `commit_command`, or rolled back
/// with `revert_command` when its mutation fails.
pub struct CommandWriter<'a> {
    builder: &'a mut Builder,
}

impl<'a> CommandWriter<'a> {
    /// Wrap a builder.
    pub fn new(builder: &'a mut Builder) -> Self {
        Self { builder }
    }

    /// Direct access to the builder, for work outside command scopes
    /// (reservations, constant interning, notification readers).
    pub fn builder(&mut self) -> &mut Builder {
        self.builder
    }

    /// Replay one command.
    ///
    /// A failing mutation reverts the command and the replay moves on;
    /// only builder lifecycle violations propagate, since the
    /// instruction stream is unrecoverable after those.
    pub fn mutate_and_write(
        &mut self,
        id: u64,
        command: &dyn ReplayCommand,
    ) -> Result<(), ReplayError> {
        self.builder.begin_command(id, command.thread())?;
        match command.mutate(self.builder) {
            Ok(()) => Ok(self.builder.commit_command()?),
            Err(err) => {
                warn!(id, %err, "command mutation failed, reverting");
                self.builder.revert_command(&err)?;
                Ok(())
            }
        }
    }
}
