//! Entry point of the replay core: owns a scheduler per device, maps
//! usage hints to batching behaviour, and runs the executor that turns
//! a batch into a payload and a session pass.

use crate::adapters::{
    CaptureId, CaptureLoader, CommandWriter, CrashReporter, DeviceId, DeviceRegistry, Generator,
    ReplayIntent, ReplayTask, ResourceProvider,
};
use crate::builder::Builder;
use crate::config::{ReplayConfig, SchedulerConfig, UsageHint};
use crate::error::ReplayError;
use crate::payload::Payload;
use crate::scheduler::{Batch, Executable, Executor, Precondition, Priority, Scheduler, Signal};
use crate::session::{ReplayExecutor, ReplaySession};

use replay_types::TargetAbi;

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tracing::{debug, info};

/// Value-equality key deciding which requests share a replay pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BatchKey {
    /// The capture being replayed.
    pub capture: CaptureId,
    /// The target device.
    pub device: DeviceId,
    /// Replay settings; requests only batch when these match.
    pub config: ReplayConfig,
    /// The generator implementation.
    pub generator: crate::adapters::GeneratorId,
    /// Whether the split-replay scheme is disabled for this batch.
    pub force_non_split: bool,
}

/// One replay request as submitted to the manager.
pub struct ReplayRequest<Q> {
    /// The target device.
    pub device: DeviceId,
    /// The capture to replay.
    pub capture: CaptureId,
    /// Replay settings, part of the batch key.
    pub config: ReplayConfig,
    /// Scheduling hint; `None` gets default priority and window.
    pub hint: Option<UsageHint>,
    /// Disable the split-replay scheme for this request.
    pub force_non_split: bool,
    /// Generator-specific request payload.
    pub request: Q,
}

type DeviceScheduler<G> =
    Arc<Scheduler<BatchKey, Job<G>, <G as Generator>::Value>>;

/// Per-device scheduler lifecycle and the submission entry point.
pub struct ReplayManager<G: Generator> {
    executor: Arc<PassExecutor<G>>,
    config: SchedulerConfig,
    schedulers: StdMutex<HashMap<DeviceId, DeviceScheduler<G>>>,
}

/// The payload travelling through the scheduler for each request.
pub struct Job<G: Generator> {
    generator: Arc<G>,
    request: G::Request,
}

impl<G: Generator> ReplayManager<G> {
    /// Wire a manager to its collaborators.
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        captures: Arc<dyn CaptureLoader>,
        resources: Arc<dyn ResourceProvider>,
        crash: Arc<dyn CrashReporter>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            executor: Arc::new(PassExecutor {
                registry,
                captures,
                resources,
                crash,
                sessions: tokio::sync::Mutex::new(HashMap::new()),
                next_payload: AtomicU32::new(0),
                _generator: PhantomData,
            }),
            config,
            schedulers: StdMutex::new(HashMap::new()),
        }
    }

    /// Submit a request and wait for its replay result.
    pub async fn replay(
        &self,
        generator: Arc<G>,
        request: ReplayRequest<G::Request>,
        cancelled: Signal,
    ) -> Result<G::Value, ReplayError> {
        let (priority, precondition) = self.dispatch_policy(request.hint);
        let key = BatchKey {
            capture: request.capture,
            device: request.device,
            config: request.config,
            generator: generator.id(),
            force_non_split: request.force_non_split,
        };
        let scheduler = self.scheduler_for(request.device);
        debug!(device = request.device.0, ?priority, "filing replay request");
        scheduler
            .schedule(
                Job {
                    generator,
                    request: request.request,
                },
                Batch {
                    key,
                    priority,
                    precondition,
                },
                cancelled,
            )
            .await
    }

    /// Build the payload for a batch of requests without executing it,
    /// for serialisation to disk. Every request must map to the same
    /// batch key; post-backs are resolved with
    /// [`ReplayError::Cancelled`].
    pub async fn export(
        &self,
        generator: Arc<G>,
        mut requests: Vec<ReplayRequest<G::Request>>,
    ) -> Result<Payload, ReplayError> {
        let Some(first) = requests.first() else {
            return Err(ReplayError::IncompatibleBatch);
        };
        let key = BatchKey {
            capture: first.capture.clone(),
            device: first.device,
            config: first.config,
            generator: generator.id(),
            force_non_split: first.force_non_split,
        };
        for r in &requests {
            let other = BatchKey {
                capture: r.capture.clone(),
                device: r.device,
                config: r.config,
                generator: generator.id(),
                force_non_split: r.force_non_split,
            };
            if other != key {
                return Err(ReplayError::IncompatibleBatch);
            }
        }
        let tasks = requests
            .drain(..)
            .map(|r| ReplayTask {
                request: r.request,
                result: crate::scheduler::ResultSlot::detached(),
            })
            .collect();
        self.executor
            .assemble(&generator, &key, tasks, true)
            .await
            .map(|built| built.payload)
    }

    /// Jobs filed across every device scheduler but not yet dispatched.
    pub fn num_tasks_queued(&self) -> usize {
        self.schedulers
            .lock()
            .map(|m| m.values().map(|s| s.num_tasks_queued()).sum())
            .unwrap_or(0)
    }

    fn scheduler_for(&self, device: DeviceId) -> DeviceScheduler<G> {
        let mut map = match self.schedulers.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(
            map.entry(device)
                .or_insert_with(|| Arc::new(Scheduler::new(self.executor.clone()))),
        )
    }

    fn dispatch_policy(&self, hint: Option<UsageHint>) -> (Priority, Precondition) {
        match hint {
            Some(UsageHint::Background) => (
                Priority::Background,
                Precondition::After(self.config.background_delay),
            ),
            Some(UsageHint::Preview) => (
                Priority::Low,
                Precondition::After(self.config.default_delay),
            ),
            Some(UsageHint::Primary) => (Priority::High, Precondition::None),
            None => (
                Priority::Default,
                Precondition::After(self.config.default_delay),
            ),
        }
    }
}

/// Executes one batch: generator drives a builder, the payload ships
/// through the device's session, responses resolve the requests.
struct PassExecutor<G: Generator> {
    registry: Arc<dyn DeviceRegistry>,
    captures: Arc<dyn CaptureLoader>,
    resources: Arc<dyn ResourceProvider>,
    crash: Arc<dyn CrashReporter>,
    sessions: tokio::sync::Mutex<HashMap<DeviceId, DeviceSession>>,
    next_payload: AtomicU32,
    _generator: PhantomData<fn() -> G>,
}

struct DeviceSession {
    abi: TargetAbi,
    session: ReplaySession<crate::adapters::ConnectionReader, crate::adapters::ConnectionWriter>,
}

#[async_trait]
impl<G: Generator> Executor<BatchKey, Job<G>, G::Value> for PassExecutor<G> {
    async fn execute(&self, batch: Batch<BatchKey>, tasks: Vec<Executable<Job<G>, G::Value>>) {
        let slots: Vec<_> = tasks.iter().map(|t| t.result()).collect();
        match self.run(batch, tasks).await {
            Ok(()) => {
                for slot in slots {
                    slot.resolve(Err(ReplayError::Collaborator(
                        "replay finished without producing a result for this request".into(),
                    )));
                }
            }
            Err(err) => {
                // Batch-uniform failure: every request sees the same
                // error.
                for slot in slots {
                    slot.resolve(Err(err.clone()));
                }
            }
        }
    }
}

impl<G: Generator> PassExecutor<G> {
    async fn run(
        &self,
        batch: Batch<BatchKey>,
        tasks: Vec<Executable<Job<G>, G::Value>>,
    ) -> Result<(), ReplayError> {
        let key = &batch.key;
        let generator = Arc::clone(&tasks[0].task().generator);
        let replay_tasks: Vec<ReplayTask<G::Request, G::Value>> = tasks
            .into_iter()
            .map(|t| {
                let result = t.result();
                ReplayTask {
                    request: t.into_task().request,
                    result,
                }
            })
            .collect();
        let built = self
            .assemble(&generator, key, replay_tasks, false)
            .await?;
        let device = self
            .registry
            .device(key.device)
            .ok_or_else(|| ReplayError::Collaborator(format!("unknown device {:?}", key.device)))?;
        let abi = built.payload.abi;
        let payload_id = self.next_payload.fetch_add(1, Ordering::Relaxed);
        let existing = { self.sessions.lock().await.remove(&key.device) };
        let mut held = match existing {
            Some(s) if s.abi == abi => s,
            other => {
                if other.is_some() {
                    // A different ABI needs a fresh agent; the old
                    // connection closes first.
                    info!(device = key.device.0, "closing connection for ABI switch");
                }
                drop(other);
                let (reader, writer) = device.connect(abi).await?;
                DeviceSession {
                    abi,
                    session: ReplaySession::new(reader, writer, abi),
                }
            }
        };
        held.session.add_payload(payload_id, &built.payload);
        held.session
            .set_replay_executor(ReplayExecutor {
                postbacks: built.postbacks,
                notifications: built.notifications,
                fences: built.fences,
            })
            .map_err(ReplayError::from)?;
        let result = held
            .session
            .execute(payload_id, &*self.resources, &*self.crash)
            .await;
        if result.is_ok() {
            self.sessions.lock().await.insert(key.device, held);
        }
        result
    }

    /// Drive the generator over a fresh builder and assemble the
    /// payload. `export` switches the final step from `build` to
    /// `export`, resolving all post-backs with `Cancelled`.
    async fn assemble(
        &self,
        generator: &Arc<G>,
        key: &BatchKey,
        mut tasks: Vec<ReplayTask<G::Request, G::Value>>,
        export: bool,
    ) -> Result<crate::builder::Built, ReplayError> {
        let capture = self.captures.load(&key.capture).await?;
        let device = self
            .registry
            .device(key.device)
            .ok_or_else(|| ReplayError::Collaborator(format!("unknown device {:?}", key.device)))?;
        let instance = device.instance().clone();
        let abi = pick_abi(&instance.abis, capture.header().abi)?;
        let mut builder = Builder::new(abi, key.config);
        for range in capture.initial_ranges() {
            builder.reserve_memory(*range);
        }
        let intent = ReplayIntent {
            device: key.device,
            capture: key.capture.clone(),
        };
        let mut writer = CommandWriter::new(&mut builder);
        generator
            .replay(
                &intent,
                &key.config,
                &mut tasks,
                &instance,
                capture.as_ref(),
                &mut writer,
            )
            .await?;
        if export {
            builder.export(&*self.resources).await
        } else {
            builder.build(&*self.resources).await
        }
    }
}

/// The ABI the pass runs under: the capture's ABI, which the device
/// must support.
fn pick_abi(device: &[TargetAbi], capture: TargetAbi) -> Result<TargetAbi, ReplayError> {
    if device.contains(&capture) {
        Ok(capture)
    } else {
        Err(ReplayError::Collaborator(
            "device supports no ABI compatible with the capture".into(),
        ))
    }
}
