//! End-to-end: requests submitted to the manager batch per device,
//! drive a generator-built payload through a stub agent and fan the
//! post-back results back to the callers.

use replay_host::adapters::{
    Capture, CaptureHeader, CaptureId, CaptureLoader, CommandWriter, ConnectionReader,
    ConnectionWriter, CrashReporter, Device, DeviceId, DeviceInstance, DeviceRegistry, Generator,
    GeneratorId, ReplayIntent, ReplayTask, ResourceProvider,
};
use replay_host::config::{ReplayConfig, SchedulerConfig};
use replay_host::error::ReplayError;
use replay_host::manager::{ReplayManager, ReplayRequest};
use replay_host::payload::ResourceId;
use replay_host::scheduler::Signal;
use replay_host::session::protocol::{
    read_frame, write_frame, AgentMessage, HostMessage, PostPiece,
};

use replay_types::{Endianness, MemoryRange, TargetAbi};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

const ABI: TargetAbi = TargetAbi::LITTLE_64;
const E: Endianness = Endianness::Little;

struct StubCapture {
    id: CaptureId,
    header: CaptureHeader,
}

impl Capture for StubCapture {
    fn id(&self) -> &CaptureId {
        &self.id
    }

    fn header(&self) -> &CaptureHeader {
        &self.header
    }

    fn initial_ranges(&self) -> &[MemoryRange] {
        &[]
    }
}

struct StubLoader;

#[async_trait]
impl CaptureLoader for StubLoader {
    async fn load(&self, id: &CaptureId) -> Result<Arc<dyn Capture>, ReplayError> {
        Ok(Arc::new(StubCapture {
            id: id.clone(),
            header: CaptureHeader { abi: ABI },
        }))
    }
}

struct StubDevice {
    instance: DeviceInstance,
    io: Mutex<Option<(ConnectionReader, ConnectionWriter)>>,
}

#[async_trait]
impl Device for StubDevice {
    fn instance(&self) -> &DeviceInstance {
        &self.instance
    }

    async fn connect(
        &self,
        _abi: TargetAbi,
    ) -> Result<(ConnectionReader, ConnectionWriter), ReplayError> {
        self.io
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ReplayError::Collaborator("device already connected".into()))
    }
}

struct Registry(HashMap<DeviceId, Arc<dyn Device>>);

impl DeviceRegistry for Registry {
    fn device(&self, id: DeviceId) -> Option<Arc<dyn Device>> {
        self.0.get(&id).cloned()
    }
}

#[derive(Default)]
struct NoBlobs;

#[async_trait]
impl ResourceProvider for NoBlobs {
    async fn lookup(&self, id: &ResourceId) -> Result<Vec<u8>, ReplayError> {
        Err(ReplayError::Collaborator(format!("no blob {id}")))
    }
}

#[derive(Default)]
struct NoCrashes;

impl CrashReporter for NoCrashes {
    fn report(&self, _name: &str, _data: &[u8]) {}
}

/// Emits one command per request: reserve four bytes and post them
/// back; the decoder resolves the request with the posted word.
struct PostGen;

#[async_trait]
impl Generator for PostGen {
    type Request = u32;
    type Value = u32;

    fn id(&self) -> GeneratorId {
        GeneratorId(7)
    }

    async fn replay(
        &self,
        _intent: &ReplayIntent,
        _config: &ReplayConfig,
        requests: &mut Vec<ReplayTask<u32, u32>>,
        _device: &DeviceInstance,
        _capture: &dyn Capture,
        out: &mut CommandWriter<'_>,
    ) -> Result<(), ReplayError> {
        let b = out.builder();
        for (i, task) in requests.iter_mut().enumerate() {
            b.begin_command(i as u64 + 1, 1)?;
            let ptr = b.allocate_memory(4);
            let slot = task.result.clone();
            b.post(
                ptr,
                4,
                Box::new(move |r| {
                    if let Ok(bytes) = r {
                        let v = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                        slot.resolve(Ok(v));
                    }
                }),
            )?;
            b.commit_command()?;
        }
        Ok(())
    }
}

fn manager_with_device(host_io: tokio::io::DuplexStream) -> ReplayManager<PostGen> {
    let (hr, hw) = tokio::io::split(host_io);
    let device = Arc::new(StubDevice {
        instance: DeviceInstance {
            id: DeviceId(1),
            os: "linux".into(),
            abis: vec![ABI],
        },
        io: Mutex::new(Some((Box::new(hr), Box::new(hw)))),
    });
    let registry = Registry(HashMap::from([(DeviceId(1), device as Arc<dyn Device>)]));
    ReplayManager::new(
        Arc::new(registry),
        Arc::new(StubLoader),
        Arc::new(NoBlobs),
        Arc::new(NoCrashes),
        SchedulerConfig::default(),
    )
}

fn request(payload: u32) -> ReplayRequest<u32> {
    ReplayRequest {
        device: DeviceId(1),
        capture: CaptureId("cap".into()),
        config: ReplayConfig::default(),
        hint: None,
        force_non_split: false,
        request: payload,
    }
}

async fn agent_send(w: &mut (impl AsyncWrite + Unpin), m: AgentMessage) {
    write_frame(w, E, &m.encode(E)).await.unwrap();
}

async fn agent_recv(r: &mut (impl AsyncRead + Unpin)) -> HostMessage {
    HostMessage::decode(E, &read_frame(r, E).await.unwrap()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn concurrent_requests_share_one_pass() {
    let (host_io, agent_io) = tokio::io::duplex(1 << 16);
    let manager = Arc::new(manager_with_device(host_io));

    let agent = tokio::spawn(async move {
        let (mut r, mut w) = tokio::io::split(agent_io);
        let HostMessage::BeginReplay { id } = agent_recv(&mut r).await else {
            panic!("expected begin");
        };
        agent_send(&mut w, AgentMessage::PayloadRequest { id }).await;
        let HostMessage::PayloadReply { data } = agent_recv(&mut r).await else {
            panic!("expected payload");
        };
        assert!(!data.is_empty());
        agent_send(
            &mut w,
            AgentMessage::PostData {
                pieces: vec![
                    PostPiece {
                        index: 0,
                        data: 100u32.to_le_bytes().to_vec(),
                    },
                    PostPiece {
                        index: 1,
                        data: 101u32.to_le_bytes().to_vec(),
                    },
                ],
            },
        )
        .await;
        agent_send(&mut w, AgentMessage::Finished { error: None }).await;
    });

    let generator = Arc::new(PostGen);
    let a = {
        let m = Arc::clone(&manager);
        let g = Arc::clone(&generator);
        tokio::spawn(async move { m.replay(g, request(0), Signal::never()).await })
    };
    let b = {
        let m = Arc::clone(&manager);
        let g = Arc::clone(&generator);
        tokio::spawn(async move { m.replay(g, request(1), Signal::never()).await })
    };

    let mut values = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
    values.sort_unstable();
    assert_eq!(values, vec![100, 101]);
    agent.await.unwrap();
    assert_eq!(manager.num_tasks_queued(), 0);
}

#[tokio::test(start_paused = true)]
async fn agent_failure_fans_out_to_every_request() {
    let (host_io, agent_io) = tokio::io::duplex(1 << 16);
    let manager = Arc::new(manager_with_device(host_io));

    let agent = tokio::spawn(async move {
        let (mut r, mut w) = tokio::io::split(agent_io);
        let _ = agent_recv(&mut r).await;
        agent_send(
            &mut w,
            AgentMessage::Finished {
                error: Some("device lost".into()),
            },
        )
        .await;
    });

    let generator = Arc::new(PostGen);
    let a = {
        let m = Arc::clone(&manager);
        let g = Arc::clone(&generator);
        tokio::spawn(async move { m.replay(g, request(0), Signal::never()).await })
    };
    let b = {
        let m = Arc::clone(&manager);
        let g = Arc::clone(&generator);
        tokio::spawn(async move { m.replay(g, request(1), Signal::never()).await })
    };

    for h in [a, b] {
        let err = h.await.unwrap().unwrap_err();
        assert!(matches!(err, ReplayError::Agent(ref m) if m == "device lost"));
    }
    agent.await.unwrap();
}

#[tokio::test]
async fn export_refuses_mixed_batch_keys() {
    let (host_io, _agent_io) = tokio::io::duplex(64);
    let manager = manager_with_device(host_io);
    let mut other = request(1);
    other.config.disable_optimisations = true;
    let err = manager
        .export(Arc::new(PostGen), vec![request(0), other])
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::IncompatibleBatch));
}

#[tokio::test]
async fn export_produces_a_payload_without_executing() {
    let (host_io, _agent_io) = tokio::io::duplex(64);
    let manager = manager_with_device(host_io);
    let payload = manager
        .export(Arc::new(PostGen), vec![request(0)])
        .await
        .unwrap();
    assert!(!payload.opcodes.is_empty());
    assert_eq!(payload.abi, ABI);
}
