//! Bidirectional framed session with a remote replay agent.
//!
//! The session ships payloads, serves the agent's payload and resource
//! requests, and demultiplexes the asynchronous response streams
//! (post-backs, notifications, fence signals) back to the callbacks
//! registered during the build. The read loop never runs user code:
//! handler dispatch happens on a separate worker task fed through a
//! channel, so a slow decoder cannot stall the wire.

mod demux;
pub mod protocol;

pub use demux::{
    FenceCallback, FenceHandler, NotificationHandler, NotificationReader, PostbackDecoder,
    PostbackHandler, FIRST_USER_NOTIFICATION_ID, ISSUES_NOTIFICATION_ID,
    REPLAY_PROGRESS_NOTIFICATION_ID,
};

pub(crate) use demux::Postback;

use protocol::{read_frame, write_frame, AgentMessage, HostMessage};

use crate::adapters::{CrashReporter, ResourceProvider};
use crate::error::{ReplayError, SessionError};
use crate::payload::Payload;

use replay_types::{Endianness, TargetAbi};

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// The demultiplexer trio produced by one payload build, installed into
/// the session for the duration of a pass.
pub struct ReplayExecutor {
    /// Post-back decoders in registration order.
    pub postbacks: PostbackHandler,
    /// Notification readers by id.
    pub notifications: NotificationHandler,
    /// Fence callbacks by id.
    pub fences: FenceHandler,
}

impl ReplayExecutor {
    fn fail_all(&mut self, err: &ReplayError) {
        self.postbacks.fail_all(err);
        self.notifications.fail_all(err);
        self.fences.fail_all(err);
    }
}

enum Dispatch {
    Post { pieces: Vec<protocol::PostPiece> },
    Notification { id: u32, data: Vec<u8> },
    Fence { id: u32 },
}

/// One framed connection to a replay agent.
///
/// `R` and `W` are the two halves of the transport; the writer is
/// shared with the dispatch worker so fence acknowledgements do not
/// have to round-trip through the read loop.
pub struct ReplaySession<R, W> {
    reader: R,
    writer: Arc<Mutex<W>>,
    endian: Endianness,
    payloads: HashMap<u32, Vec<u8>>,
    executor: Option<ReplayExecutor>,
    executing: bool,
}

impl<R, W> ReplaySession<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap an open connection to an agent running under `abi`.
    pub fn new(reader: R, writer: W, abi: TargetAbi) -> Self {
        Self {
            reader,
            writer: Arc::new(Mutex::new(writer)),
            endian: abi.endian(),
            payloads: HashMap::new(),
            executor: None,
            executing: false,
        }
    }

    /// Make a payload available for the agent to request.
    pub fn add_payload(&mut self, id: u32, payload: &Payload) {
        self.payloads.insert(id, payload.serialize());
    }

    /// Install the demultiplexer for the next pass.
    ///
    /// Only one executor may be installed at a time; installing another
    /// while one is pending or a pass is running is an error.
    pub fn set_replay_executor(&mut self, executor: ReplayExecutor) -> Result<(), SessionError> {
        if self.executor.is_some() || self.executing {
            return Err(SessionError::ExecutorActive);
        }
        self.executor = Some(executor);
        Ok(())
    }

    /// Run one replay pass: announce `payload_id`, then serve the agent
    /// until it reports `Finished`.
    ///
    /// On a transport or protocol error the pass terminates and the
    /// error is propagated to every decoder, reader and fence callback
    /// of the installed executor.
    pub async fn execute(
        &mut self,
        payload_id: u32,
        resources: &(impl ResourceProvider + ?Sized),
        crash: &(impl CrashReporter + ?Sized),
    ) -> Result<(), ReplayError> {
        let executor = self
            .executor
            .take()
            .ok_or(SessionError::NoExecutor)?;
        self.executing = true;
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(dispatch_loop(
            rx,
            executor,
            Arc::clone(&self.writer),
            self.endian,
        ));
        let result = self.serve(payload_id, &tx, resources, crash).await;
        drop(tx);
        let mut executor = match worker.await {
            Ok(executor) => executor,
            Err(e) => {
                self.executing = false;
                return Err(ReplayError::Collaborator(format!(
                    "dispatch worker died: {e}"
                )));
            }
        };
        if let Err(err) = &result {
            executor.fail_all(err);
        }
        self.executing = false;
        result
    }

    async fn serve(
        &mut self,
        payload_id: u32,
        dispatch: &mpsc::UnboundedSender<Dispatch>,
        resources: &(impl ResourceProvider + ?Sized),
        crash: &(impl CrashReporter + ?Sized),
    ) -> Result<(), ReplayError> {
        self.send(HostMessage::BeginReplay { id: payload_id }).await?;
        loop {
            let frame = read_frame(&mut self.reader, self.endian).await?;
            match AgentMessage::decode(self.endian, &frame)? {
                AgentMessage::PayloadRequest { id } => {
                    let data = self
                        .payloads
                        .get(&id)
                        .ok_or(SessionError::UnknownPayload(id))?
                        .clone();
                    debug!(id, bytes = data.len(), "serving payload");
                    self.send(HostMessage::PayloadReply { data }).await?;
                }
                AgentMessage::ResourceRequest {
                    ids,
                    expected_total,
                } => {
                    let mut data = Vec::new();
                    for id in &ids {
                        data.extend_from_slice(&resources.lookup(id).await?);
                    }
                    if data.len() as u64 != expected_total {
                        return Err(SessionError::ResourceSizeMismatch {
                            expected: expected_total,
                            actual: data.len() as u64,
                        }
                        .into());
                    }
                    debug!(count = ids.len(), bytes = data.len(), "serving resources");
                    self.send(HostMessage::ResourceReply { data }).await?;
                }
                AgentMessage::PostData { pieces } => {
                    let _ = dispatch.send(Dispatch::Post { pieces });
                }
                AgentMessage::Notification { id, data } => {
                    let _ = dispatch.send(Dispatch::Notification { id, data });
                }
                AgentMessage::FenceReady { id } => {
                    let _ = dispatch.send(Dispatch::Fence { id });
                }
                AgentMessage::CrashDump { name, data } => {
                    warn!(name, bytes = data.len(), "agent crash dump");
                    crash.report(&name, &data);
                }
                AgentMessage::Finished { error } => {
                    return match error {
                        None => Ok(()),
                        Some(e) => Err(ReplayError::Agent(e)),
                    };
                }
            }
        }
    }

    async fn send(&mut self, message: HostMessage) -> Result<(), SessionError> {
        let bytes = message.encode(self.endian);
        let mut w = self.writer.lock().await;
        write_frame(&mut *w, self.endian, &bytes).await
    }
}

async fn dispatch_loop<W: AsyncWrite + Unpin + Send>(
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
    mut executor: ReplayExecutor,
    writer: Arc<Mutex<W>>,
    endian: Endianness,
) -> ReplayExecutor {
    while let Some(event) = rx.recv().await {
        match event {
            Dispatch::Post { pieces } => {
                for p in pieces {
                    if let Err(e) = executor.postbacks.dispatch(p.index as usize, &p.data) {
                        warn!(index = p.index, %e, "dropping post-back piece");
                    }
                }
            }
            Dispatch::Notification { id, data } => {
                executor.notifications.dispatch(id, &data);
            }
            Dispatch::Fence { id } => {
                executor.fences.dispatch(id);
                let bytes = HostMessage::FenceAck { id }.encode(endian);
                let mut w = writer.lock().await;
                if let Err(e) = write_frame(&mut *w, endian, &bytes).await {
                    warn!(id, %e, "failed to acknowledge fence");
                }
            }
        }
    }
    executor
}
