//! Framed message codec of the replay protocol.
//!
//! Every frame is a `uint32` length followed by that many payload
//! bytes; the first payload byte is the message tag. All integers use
//! the target ABI's byte order.

use crate::error::SessionError;
use crate::payload::ResourceId;

use replay_types::Endianness;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame, to catch corrupt length prefixes
/// before they turn into giant allocations.
const MAX_FRAME_LEN: u32 = 64 << 20;

/// Messages the agent sends to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    /// Request for the payload blob with the given identifier.
    PayloadRequest { id: u32 },
    /// Request for resource blobs; the reply must concatenate them into
    /// exactly `expected_total` bytes.
    ResourceRequest {
        ids: Vec<ResourceId>,
        expected_total: u64,
    },
    /// A batch of post-back pieces.
    PostData { pieces: Vec<PostPiece> },
    /// One record of a notification stream.
    Notification { id: u32, data: Vec<u8> },
    /// An in-VM fence was reached.
    FenceReady { id: u32 },
    /// The agent crashed; the dump is forwarded opaquely.
    CrashDump { name: String, data: Vec<u8> },
    /// End of replay.
    Finished { error: Option<String> },
}

/// One post-back piece: the decoder registration index and its bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct PostPiece {
    /// Registration index of the receiving decoder.
    pub index: u32,
    /// The piece bytes.
    pub data: Vec<u8>,
}

/// Messages the host sends to the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum HostMessage {
    /// Start executing the payload with the given identifier.
    BeginReplay { id: u32 },
    /// Reply to [`AgentMessage::PayloadRequest`].
    PayloadReply { data: Vec<u8> },
    /// Reply to [`AgentMessage::ResourceRequest`].
    ResourceReply { data: Vec<u8> },
    /// Release the agent blocked on the given fence.
    FenceAck { id: u32 },
}

const TAG_PAYLOAD_REQUEST: u8 = 0;
const TAG_RESOURCE_REQUEST: u8 = 1;
const TAG_POST_DATA: u8 = 2;
const TAG_NOTIFICATION: u8 = 3;
const TAG_FENCE_READY: u8 = 4;
const TAG_CRASH_DUMP: u8 = 5;
const TAG_FINISHED: u8 = 6;

const TAG_BEGIN_REPLAY: u8 = 0;
const TAG_PAYLOAD_REPLY: u8 = 1;
const TAG_RESOURCE_REPLY: u8 = 2;
const TAG_FENCE_ACK: u8 = 3;

/// Read one frame payload. I/O failures, oversized lengths and EOF all
/// surface as transport errors: the peer must end the stream with
/// `Finished`, not by closing it.
pub async fn read_frame<R: AsyncRead + Unpin>(
    r: &mut R,
    endian: Endianness,
) -> Result<Vec<u8>, SessionError> {
    let mut len = [0u8; 4];
    r.read_exact(&mut len).await?;
    let len = endian.u32_from(len);
    if len > MAX_FRAME_LEN {
        return Err(SessionError::TruncatedFrame);
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    w: &mut W,
    endian: Endianness,
    payload: &[u8],
) -> Result<(), SessionError> {
    w.write_all(&endian.u32_bytes(payload.len() as u32)).await?;
    w.write_all(payload).await?;
    w.flush().await?;
    Ok(())
}

pub(crate) struct FrameWriter {
    endian: Endianness,
    buf: Vec<u8>,
}

impl FrameWriter {
    pub(crate) fn new(endian: Endianness) -> Self {
        Self {
            endian,
            buf: Vec::new(),
        }
    }

    fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&self.endian.u32_bytes(v));
        self
    }

    fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&self.endian.u64_bytes(v));
        self
    }

    fn bytes(&mut self, v: &[u8]) -> &mut Self {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) struct FrameParser<'a> {
    endian: Endianness,
    buf: &'a [u8],
    at: usize,
}

impl<'a> FrameParser<'a> {
    pub(crate) fn new(endian: Endianness, buf: &'a [u8]) -> Self {
        Self { endian, buf, at: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SessionError> {
        let end = self.at.checked_add(n).ok_or(SessionError::TruncatedFrame)?;
        let s = self
            .buf
            .get(self.at..end)
            .ok_or(SessionError::TruncatedFrame)?;
        self.at = end;
        Ok(s)
    }

    fn u8(&mut self) -> Result<u8, SessionError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, SessionError> {
        let b = self.take(4)?;
        Ok(self.endian.u32_from([b[0], b[1], b[2], b[3]]))
    }

    fn u64(&mut self) -> Result<u64, SessionError> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(match self.endian {
            Endianness::Little => u64::from_le_bytes(arr),
            Endianness::Big => u64::from_be_bytes(arr),
        })
    }

    fn bytes(&mut self) -> Result<&'a [u8], SessionError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, SessionError> {
        let b = self.bytes()?;
        String::from_utf8(b.to_vec()).map_err(|_| SessionError::TruncatedFrame)
    }
}

impl AgentMessage {
    /// Serialize into a frame payload.
    pub fn encode(&self, endian: Endianness) -> Vec<u8> {
        let mut w = FrameWriter::new(endian);
        match self {
            AgentMessage::PayloadRequest { id } => {
                w.u8(TAG_PAYLOAD_REQUEST).u32(*id);
            }
            AgentMessage::ResourceRequest {
                ids,
                expected_total,
            } => {
                w.u8(TAG_RESOURCE_REQUEST).u64(*expected_total);
                w.u32(ids.len() as u32);
                for id in ids {
                    w.bytes(id.as_str().as_bytes());
                }
            }
            AgentMessage::PostData { pieces } => {
                w.u8(TAG_POST_DATA).u32(pieces.len() as u32);
                for p in pieces {
                    w.u32(p.index).bytes(&p.data);
                }
            }
            AgentMessage::Notification { id, data } => {
                w.u8(TAG_NOTIFICATION).u32(*id).bytes(data);
            }
            AgentMessage::FenceReady { id } => {
                w.u8(TAG_FENCE_READY).u32(*id);
            }
            AgentMessage::CrashDump { name, data } => {
                w.u8(TAG_CRASH_DUMP).bytes(name.as_bytes()).bytes(data);
            }
            AgentMessage::Finished { error } => {
                w.u8(TAG_FINISHED).u8(error.is_some() as u8);
                if let Some(e) = error {
                    w.bytes(e.as_bytes());
                }
            }
        }
        w.finish()
    }

    /// Parse a frame payload.
    pub fn decode(endian: Endianness, buf: &[u8]) -> Result<Self, SessionError> {
        let mut p = FrameParser::new(endian, buf);
        let tag = p.u8()?;
        Ok(match tag {
            TAG_PAYLOAD_REQUEST => AgentMessage::PayloadRequest { id: p.u32()? },
            TAG_RESOURCE_REQUEST => {
                let expected_total = p.u64()?;
                let count = p.u32()?;
                let mut ids = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let b = p.bytes()?;
                    let s =
                        std::str::from_utf8(b).map_err(|_| SessionError::TruncatedFrame)?;
                    ids.push(ResourceId::from(s));
                }
                AgentMessage::ResourceRequest {
                    ids,
                    expected_total,
                }
            }
            TAG_POST_DATA => {
                let count = p.u32()?;
                let mut pieces = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let index = p.u32()?;
                    let data = p.bytes()?.to_vec();
                    pieces.push(PostPiece { index, data });
                }
                AgentMessage::PostData { pieces }
            }
            TAG_NOTIFICATION => AgentMessage::Notification {
                id: p.u32()?,
                data: p.bytes()?.to_vec(),
            },
            TAG_FENCE_READY => AgentMessage::FenceReady { id: p.u32()? },
            TAG_CRASH_DUMP => AgentMessage::CrashDump {
                name: p.string()?,
                data: p.bytes()?.to_vec(),
            },
            TAG_FINISHED => {
                let has_error = p.u8()? != 0;
                let error = if has_error { Some(p.string()?) } else { None };
                AgentMessage::Finished { error }
            }
            tag => return Err(SessionError::UnknownFrame(tag)),
        })
    }
}

impl HostMessage {
    /// Serialize into a frame payload.
    pub fn encode(&self, endian: Endianness) -> Vec<u8> {
        let mut w = FrameWriter::new(endian);
        match self {
            HostMessage::BeginReplay { id } => {
                w.u8(TAG_BEGIN_REPLAY).u32(*id);
            }
            HostMessage::PayloadReply { data } => {
                w.u8(TAG_PAYLOAD_REPLY).bytes(data);
            }
            HostMessage::ResourceReply { data } => {
                w.u8(TAG_RESOURCE_REPLY).bytes(data);
            }
            HostMessage::FenceAck { id } => {
                w.u8(TAG_FENCE_ACK).u32(*id);
            }
        }
        w.finish()
    }

    /// Parse a frame payload.
    pub fn decode(endian: Endianness, buf: &[u8]) -> Result<Self, SessionError> {
        let mut p = FrameParser::new(endian, buf);
        let tag = p.u8()?;
        Ok(match tag {
            TAG_BEGIN_REPLAY => HostMessage::BeginReplay { id: p.u32()? },
            TAG_PAYLOAD_REPLY => HostMessage::PayloadReply {
                data: p.bytes()?.to_vec(),
            },
            TAG_RESOURCE_REPLY => HostMessage::ResourceReply {
                data: p.bytes()?.to_vec(),
            },
            TAG_FENCE_ACK => HostMessage::FenceAck { id: p.u32()? },
            tag => return Err(SessionError::UnknownFrame(tag)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(Endianness::Little)]
    #[case(Endianness::Big)]
    fn agent_messages_round_trip(#[case] endian: Endianness) {
        let messages = [
            AgentMessage::PayloadRequest { id: 7 },
            AgentMessage::ResourceRequest {
                ids: vec![ResourceId::from("a"), ResourceId::from("bb")],
                expected_total: 0x1_0000_0001,
            },
            AgentMessage::PostData {
                pieces: vec![
                    PostPiece {
                        index: 0,
                        data: vec![1, 2],
                    },
                    PostPiece {
                        index: 1,
                        data: vec![],
                    },
                ],
            },
            AgentMessage::Notification {
                id: 2,
                data: vec![9; 40],
            },
            AgentMessage::FenceReady { id: 3 },
            AgentMessage::CrashDump {
                name: "agent.dmp".into(),
                data: vec![0xFF; 16],
            },
            AgentMessage::Finished { error: None },
            AgentMessage::Finished {
                error: Some("device lost".into()),
            },
        ];
        for m in messages {
            let bytes = m.encode(endian);
            assert_eq!(AgentMessage::decode(endian, &bytes).unwrap(), m);
        }
    }

    #[rstest]
    #[case(Endianness::Little)]
    #[case(Endianness::Big)]
    fn host_messages_round_trip(#[case] endian: Endianness) {
        let messages = [
            HostMessage::BeginReplay { id: 1 },
            HostMessage::PayloadReply {
                data: vec![1, 2, 3],
            },
            HostMessage::ResourceReply { data: vec![] },
            HostMessage::FenceAck { id: 9 },
        ];
        for m in messages {
            let bytes = m.encode(endian);
            assert_eq!(HostMessage::decode(endian, &bytes).unwrap(), m);
        }
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let bytes = AgentMessage::Notification {
            id: 2,
            data: vec![1, 2, 3],
        }
        .encode(Endianness::Little);
        assert!(matches!(
            AgentMessage::decode(Endianness::Little, &bytes[..bytes.len() - 1]),
            Err(SessionError::TruncatedFrame)
        ));
    }

    #[tokio::test]
    async fn frames_round_trip_over_a_pipe() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, Endianness::Big, &[1, 2, 3]).await.unwrap();
        let got = read_frame(&mut b, Endianness::Big).await.unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }
}
