//! Session protocol tests over an in-memory pipe: payload and resource
//! serving, post-back and notification routing, fence acknowledgement
//! and transport failure propagation.

use replay_host::adapters::{CrashReporter, ResourceProvider};
use replay_host::builder::{Builder, Built};
use replay_host::config::ReplayConfig;
use replay_host::error::{ReplayError, SessionError};
use replay_host::payload::ResourceId;
use replay_host::session::protocol::{
    read_frame, write_frame, AgentMessage, HostMessage, PostPiece,
};
use replay_host::session::{ReplayExecutor, ReplaySession};

use replay_types::{Endianness, MemoryRange, TargetAbi, Value};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

const ABI: TargetAbi = TargetAbi::LITTLE_64;
const E: Endianness = Endianness::Little;

#[derive(Default)]
struct Blobs(HashMap<String, Vec<u8>>);

#[async_trait]
impl ResourceProvider for Blobs {
    async fn lookup(&self, id: &ResourceId) -> Result<Vec<u8>, ReplayError> {
        self.0
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| ReplayError::Collaborator(format!("no blob {id}")))
    }
}

#[derive(Default)]
struct Crashes(Mutex<Vec<String>>);

impl CrashReporter for Crashes {
    fn report(&self, name: &str, _data: &[u8]) {
        self.0.lock().unwrap().push(name.to_owned());
    }
}

type Log = Arc<Mutex<Vec<Result<Vec<u8>, String>>>>;

fn recorder(log: &Log) -> Box<dyn FnMut(Result<&[u8], &ReplayError>) + Send> {
    let log = Arc::clone(log);
    Box::new(move |r| {
        log.lock()
            .unwrap()
            .push(r.map(|b| b.to_vec()).map_err(|e| e.to_string()));
    })
}

/// A payload with one 4-byte post-back, one user notification stream
/// and one fence, plus the logs their handlers write to.
async fn sample_built() -> (Built, Log, Log, Log) {
    let postback_log = Log::default();
    let notification_log = Log::default();
    let fence_log = Log::default();
    let mut b = Builder::new(ABI, ReplayConfig::default());
    let notification_id = b.add_notification_reader(recorder(&notification_log));
    assert_eq!(notification_id, 2);
    {
        let log = Arc::clone(&fence_log);
        b.add_fence_callback(
            5,
            Box::new(move |r| {
                log.lock()
                    .unwrap()
                    .push(r.map(|_| Vec::new()).map_err(|e| e.to_string()));
            }),
        );
    }
    b.begin_command(1, 1).unwrap();
    let ptr = b.allocate_memory(4);
    b.post(ptr, 4, recorder(&postback_log)).unwrap();
    b.notification(notification_id, ptr, 4).unwrap();
    b.wait(5).unwrap();
    b.write(MemoryRange::new(0x10_0000, 0x20), ResourceId::from("blob"))
        .unwrap();
    b.push(Value::U32(1)).unwrap();
    b.store(ptr).unwrap();
    b.commit_command().unwrap();
    let built = b
        .build(&Blobs(HashMap::from([(
            "blob".to_owned(),
            vec![9u8; 0x20],
        )])))
        .await
        .unwrap();
    (built, postback_log, notification_log, fence_log)
}

fn executor(built: Built) -> ReplayExecutor {
    ReplayExecutor {
        postbacks: built.postbacks,
        notifications: built.notifications,
        fences: built.fences,
    }
}

async fn agent_send(w: &mut (impl AsyncWrite + Unpin), m: AgentMessage) {
    write_frame(w, E, &m.encode(E)).await.unwrap();
}

async fn agent_recv(r: &mut (impl AsyncRead + Unpin)) -> HostMessage {
    HostMessage::decode(E, &read_frame(r, E).await.unwrap()).unwrap()
}

#[tokio::test]
async fn full_pass_serves_and_routes_everything() {
    let (built, postback_log, notification_log, fence_log) = sample_built().await;
    let payload = built.payload.clone();
    let (host_io, agent_io) = tokio::io::duplex(1 << 16);
    let (hr, hw) = tokio::io::split(host_io);
    let mut session = ReplaySession::new(hr, hw, ABI);
    session.add_payload(1, &payload);
    session.set_replay_executor(executor(built)).unwrap();

    let agent = tokio::spawn(async move {
        let (mut r, mut w) = tokio::io::split(agent_io);
        assert_eq!(agent_recv(&mut r).await, HostMessage::BeginReplay { id: 1 });
        agent_send(&mut w, AgentMessage::PayloadRequest { id: 1 }).await;
        let HostMessage::PayloadReply { data } = agent_recv(&mut r).await else {
            panic!("expected payload reply");
        };
        assert!(!data.is_empty());
        agent_send(
            &mut w,
            AgentMessage::ResourceRequest {
                ids: vec![ResourceId::from("blob")],
                expected_total: 0x20,
            },
        )
        .await;
        let HostMessage::ResourceReply { data } = agent_recv(&mut r).await else {
            panic!("expected resource reply");
        };
        assert_eq!(data.len(), 0x20);
        agent_send(
            &mut w,
            AgentMessage::PostData {
                pieces: vec![PostPiece {
                    index: 0,
                    data: vec![1, 2, 3, 4],
                }],
            },
        )
        .await;
        agent_send(
            &mut w,
            AgentMessage::Notification {
                id: 2,
                data: vec![0xAA; 8],
            },
        )
        .await;
        // Unknown id: logged and dropped by the session.
        agent_send(
            &mut w,
            AgentMessage::Notification {
                id: 99,
                data: vec![1],
            },
        )
        .await;
        agent_send(&mut w, AgentMessage::FenceReady { id: 5 }).await;
        assert_eq!(agent_recv(&mut r).await, HostMessage::FenceAck { id: 5 });
        agent_send(
            &mut w,
            AgentMessage::CrashDump {
                name: "late.dmp".into(),
                data: vec![0; 4],
            },
        )
        .await;
        agent_send(&mut w, AgentMessage::Finished { error: None }).await;
    });

    let blobs = Blobs(HashMap::from([("blob".to_owned(), vec![9u8; 0x20])]));
    let crashes = Crashes::default();
    session.execute(1, &blobs, &crashes).await.unwrap();
    agent.await.unwrap();

    assert_eq!(
        postback_log.lock().unwrap().as_slice(),
        &[Ok(vec![1, 2, 3, 4])]
    );
    assert_eq!(
        notification_log.lock().unwrap().as_slice(),
        &[Ok(vec![0xAA; 8])]
    );
    assert_eq!(fence_log.lock().unwrap().len(), 1);
    assert_eq!(crashes.0.lock().unwrap().as_slice(), &["late.dmp".to_owned()]);
}

#[tokio::test]
async fn transport_loss_poisons_every_handler() {
    let (built, postback_log, notification_log, fence_log) = sample_built().await;
    let payload = built.payload.clone();
    let (host_io, agent_io) = tokio::io::duplex(1 << 16);
    let (hr, hw) = tokio::io::split(host_io);
    let mut session = ReplaySession::new(hr, hw, ABI);
    session.add_payload(1, &payload);
    session.set_replay_executor(executor(built)).unwrap();

    let agent = tokio::spawn(async move {
        let (mut r, _w) = tokio::io::split(agent_io);
        let _ = agent_recv(&mut r).await;
        // Connection drops without a Finished message.
    });

    let err = session
        .execute(1, &Blobs::default(), &Crashes::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::Session(SessionError::Io(_))));
    agent.await.unwrap();

    assert_eq!(postback_log.lock().unwrap().len(), 1);
    assert!(postback_log.lock().unwrap()[0].is_err());
    assert!(notification_log.lock().unwrap()[0].is_err());
    assert!(fence_log.lock().unwrap()[0].is_err());
}

#[tokio::test]
async fn postback_size_mismatch_poisons_later_pieces_only() {
    let (built, postback_log, _notifications, _fences) = sample_built().await;
    let payload = built.payload.clone();
    let (host_io, agent_io) = tokio::io::duplex(1 << 16);
    let (hr, hw) = tokio::io::split(host_io);
    let mut session = ReplaySession::new(hr, hw, ABI);
    session.add_payload(1, &payload);
    session.set_replay_executor(executor(built)).unwrap();

    let agent = tokio::spawn(async move {
        let (mut r, mut w) = tokio::io::split(agent_io);
        let _ = agent_recv(&mut r).await;
        agent_send(
            &mut w,
            AgentMessage::PostData {
                pieces: vec![
                    PostPiece {
                        index: 0,
                        data: vec![1, 2, 3],
                    },
                    PostPiece {
                        index: 0,
                        data: vec![1, 2, 3, 4],
                    },
                ],
            },
        )
        .await;
        agent_send(&mut w, AgentMessage::Finished { error: None }).await;
    });

    session
        .execute(1, &Blobs::default(), &Crashes::default())
        .await
        .unwrap();
    agent.await.unwrap();

    let log = postback_log.lock().unwrap();
    assert!(log[0].as_ref().unwrap_err().contains("decoder expects"));
    assert!(log[1].as_ref().unwrap_err().contains("poisoned"));
}

#[tokio::test]
async fn agent_failure_surfaces_as_an_error() {
    let (built, _postbacks, _notifications, _fences) = sample_built().await;
    let payload = built.payload.clone();
    let (host_io, agent_io) = tokio::io::duplex(1 << 16);
    let (hr, hw) = tokio::io::split(host_io);
    let mut session = ReplaySession::new(hr, hw, ABI);
    session.add_payload(1, &payload);
    session.set_replay_executor(executor(built)).unwrap();

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

    let err = session
        .execute(1, &Blobs::default(), &Crashes::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ReplayError::Agent(ref m) if m == "device lost"));
    agent.await.unwrap();
}

#[tokio::test]
async fn only_one_executor_may_be_installed() {
    let (built, ..) = sample_built().await;
    let (host_io, _agent_io) = tokio::io::duplex(64);
    let (hr, hw) = tokio::io::split(host_io);
    let mut session = ReplaySession::new(hr, hw, ABI);
    session.set_replay_executor(executor(built)).unwrap();

    let (second, ..) = sample_built().await;
    assert!(matches!(
        session.set_replay_executor(executor(second)),
        Err(SessionError::ExecutorActive)
    ));
}

#[tokio::test]
async fn executing_without_an_executor_is_an_error() {
    let (host_io, _agent_io) = tokio::io::duplex(64);
    let (hr, hw) = tokio::io::split(host_io);
    let mut session: ReplaySession<_, _> = ReplaySession::new(hr, hw, ABI);
    let err = session
        .execute(1, &Blobs::default(), &Crashes::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReplayError::Session(SessionError::NoExecutor)
    ));
}
