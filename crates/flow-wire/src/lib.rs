// Framing and protocol messages for producer/consumer flow streams.
use base64::Engine;
use bytes::{Buf, Bytes, BytesMut};
use flow_common::ids::{FlowId, StreamId};
use serde::{Deserialize, Serialize};

pub const MAGIC: u32 = 0x464C4F57;
pub const VERSION: u16 = 1;
// Flags are reserved; every frame produced today carries a JSON payload.
pub const FLAG_NONE: u16 = 0x0000;

/// Version of the flow stream protocol advertised in consumer handshakes.
pub const PROTOCOL_VERSION: u32 = 1;
/// Oldest protocol version a producer in this build can talk to.
pub const MIN_ACCEPTED_PROTOCOL_VERSION: u32 = 1;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid magic number")]
    InvalidMagic,
    #[error("unsupported version {0}")]
    UnsupportedVersion(u16),
    #[error("frame too large")]
    FrameTooLarge,
    #[error("incomplete frame")]
    Incomplete,
    #[error("failed to serialize message")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to deserialize message")]
    Deserialize(#[source] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub length: u32,
}

impl FrameHeader {
    pub const LEN: usize = 12;

    pub fn new(flags: u16, length: u32) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            flags,
            length,
        }
    }

    pub fn encode_into(&self, out: &mut [u8; Self::LEN]) {
        out[0..4].copy_from_slice(&self.magic.to_be_bytes());
        out[4..6].copy_from_slice(&self.version.to_be_bytes());
        out[6..8].copy_from_slice(&self.flags.to_be_bytes());
        out[8..12].copy_from_slice(&self.length.to_be_bytes());
    }

    pub fn decode(mut buf: Bytes) -> Result<Self> {
        // Validate before trusting the length field.
        if buf.remaining() < Self::LEN {
            return Err(Error::Incomplete);
        }
        let magic = buf.get_u32();
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = buf.get_u16();
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        let flags = buf.get_u16();
        let length = buf.get_u32();
        Ok(Self {
            magic,
            version,
            flags,
            length,
        })
    }
}

/// Frame containing a header and payload.
///
/// ```
/// use bytes::Bytes;
/// use flow_wire::Frame;
///
/// let frame = Frame::new(0, Bytes::from_static(b"rows")).expect("frame");
/// let decoded = Frame::decode(frame.encode()).expect("decode");
/// assert_eq!(decoded.payload, Bytes::from_static(b"rows"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(flags: u16, payload: Bytes) -> Result<Self> {
        let length = u32::try_from(payload.len()).map_err(|_| Error::FrameTooLarge)?;
        Ok(Self {
            header: FrameHeader::new(flags, length),
            payload,
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut header = [0u8; FrameHeader::LEN];
        self.header.encode_into(&mut header);
        let mut buf = BytesMut::with_capacity(FrameHeader::LEN + self.payload.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(input: Bytes) -> Result<Self> {
        if input.len() < FrameHeader::LEN {
            return Err(Error::Incomplete);
        }
        let header = FrameHeader::decode(input.slice(0..FrameHeader::LEN))?;
        let length = header.length as usize;
        if input.len() < FrameHeader::LEN + length {
            return Err(Error::Incomplete);
        }
        let payload = input.slice(FrameHeader::LEN..FrameHeader::LEN + length);
        Ok(Self { header, payload })
    }
}

/// First message on every flow stream; tells the consumer which inbox to route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerHeader {
    pub flow_id: FlowId,
    pub stream_id: StreamId,
}

/// Serialized batch bytes plus any trailing metadata.
///
/// Data messages sent while rows are flowing carry no metadata. The final message of a
/// stream carries the drained metadata and an empty payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducerData {
    #[serde(with = "base64_bytes", default, skip_serializing_if = "Bytes::is_empty")]
    pub raw_bytes: Bytes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metadata: Vec<ProducerMetadata>,
}

/// Side-channel records drained from a producer once it stops sending rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProducerMetadata {
    Error {
        message: String,
    },
    RowNum {
        sender_id: String,
        row_num: u64,
        last_msg: bool,
    },
    TraceData {
        spans: Vec<String>,
    },
    Metrics {
        rows_read: u64,
        bytes_read: u64,
    },
}

impl ProducerMetadata {
    // Keep the whole context chain so the consumer sees the root cause.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self::Error { message }
    }
}

/// Producer to consumer messages.
///
/// ```
/// use bytes::Bytes;
/// use flow_wire::ProducerMessage;
///
/// let message = ProducerMessage::data(Bytes::from_static(b"batch"));
/// let decoded = ProducerMessage::decode(message.encode().expect("encode")).expect("decode");
/// assert_eq!(message, decoded);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProducerMessage {
    Header(ProducerHeader),
    Data(ProducerData),
}

impl ProducerMessage {
    pub fn header(flow_id: FlowId, stream_id: StreamId) -> Self {
        Self::Header(ProducerHeader { flow_id, stream_id })
    }

    pub fn data(raw_bytes: Bytes) -> Self {
        Self::Data(ProducerData {
            raw_bytes,
            metadata: Vec::new(),
        })
    }

    pub fn metadata(metadata: Vec<ProducerMetadata>) -> Self {
        Self::Data(ProducerData {
            raw_bytes: Bytes::new(),
            metadata,
        })
    }

    pub fn encode(&self) -> Result<Frame> {
        encode_json(self)
    }

    pub fn decode(frame: Frame) -> Result<Self> {
        serde_json::from_slice(&frame.payload).map_err(Error::Deserialize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerHandshake {
    pub consumer_scheduled: bool,
    pub version: u32,
    pub min_accepted_version: u32,
}

impl ConsumerHandshake {
    pub fn current(consumer_scheduled: bool) -> Self {
        Self {
            consumer_scheduled,
            version: PROTOCOL_VERSION,
            min_accepted_version: MIN_ACCEPTED_PROTOCOL_VERSION,
        }
    }

    // A producer is compatible when each side accepts the other's version.
    pub fn is_compatible(&self) -> bool {
        self.version >= MIN_ACCEPTED_PROTOCOL_VERSION && PROTOCOL_VERSION >= self.min_accepted_version
    }
}

/// Consumer to producer control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsumerSignal {
    Handshake(ConsumerHandshake),
    DrainRequest,
}

impl ConsumerSignal {
    pub fn encode(&self) -> Result<Frame> {
        encode_json(self)
    }

    pub fn decode(frame: Frame) -> Result<Self> {
        serde_json::from_slice(&frame.payload).map_err(Error::Deserialize)
    }
}

fn encode_json<T: Serialize>(value: &T) -> Result<Frame> {
    let payload = serde_json::to_vec(value).map_err(Error::Serialize)?;
    Frame::new(FLAG_NONE, Bytes::from(payload))
}

mod base64_bytes {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S>(value: &Bytes, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let encoded = base64::engine::general_purpose::STANDARD.encode(value);
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Bytes, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(D::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rejects_foreign_magic() {
        let mut bytes = [0u8; FrameHeader::LEN];
        FrameHeader::new(FLAG_NONE, 4).encode_into(&mut bytes);
        bytes[0] ^= 0xFF;
        let err = FrameHeader::decode(Bytes::copy_from_slice(&bytes)).expect_err("magic");
        assert!(matches!(err, Error::InvalidMagic));
    }

    #[test]
    fn header_rejects_future_version() {
        let mut bytes = [0u8; FrameHeader::LEN];
        let mut header = FrameHeader::new(FLAG_NONE, 0);
        header.version = VERSION + 1;
        header.encode_into(&mut bytes);
        let err = FrameHeader::decode(Bytes::copy_from_slice(&bytes)).expect_err("version");
        assert!(matches!(err, Error::UnsupportedVersion(v) if v == VERSION + 1));
    }

    #[test]
    fn truncated_frame_is_incomplete() {
        let frame = Frame::new(FLAG_NONE, Bytes::from_static(b"payload")).expect("frame");
        let encoded = frame.encode();
        let err = Frame::decode(encoded.slice(0..encoded.len() - 1)).expect_err("short");
        assert!(matches!(err, Error::Incomplete));
    }

    #[test]
    fn metadata_message_omits_empty_payload() {
        let message = ProducerMessage::metadata(vec![ProducerMetadata::Metrics {
            rows_read: 10,
            bytes_read: 80,
        }]);
        let frame = message.encode().expect("encode");
        let json: serde_json::Value = serde_json::from_slice(&frame.payload).expect("json");
        assert_eq!(json["type"], "data");
        assert!(json.get("raw_bytes").is_none());
        assert_eq!(json["metadata"][0]["kind"], "metrics");
        assert_eq!(ProducerMessage::decode(frame).expect("decode"), message);
    }

    #[test]
    fn data_message_carries_base64_payload() {
        let message = ProducerMessage::data(Bytes::from_static(b"\x00\x01rows"));
        let frame = message.encode().expect("encode");
        let json: serde_json::Value = serde_json::from_slice(&frame.payload).expect("json");
        assert_eq!(json["raw_bytes"], "AAFyb3dz");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn drain_request_uses_unit_tag() {
        let frame = ConsumerSignal::DrainRequest.encode().expect("encode");
        assert_eq!(frame.payload.as_ref(), br#"{"type":"drain_request"}"#);
        assert_eq!(
            ConsumerSignal::decode(frame).expect("decode"),
            ConsumerSignal::DrainRequest
        );
    }

    #[test]
    fn error_metadata_includes_source_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("serialize batch")]
        struct Outer(#[source] std::io::Error);

        let err = Outer(std::io::Error::other("disk on fire"));
        assert_eq!(
            ProducerMetadata::from_error(&err),
            ProducerMetadata::Error {
                message: "serialize batch: disk on fire".to_string()
            }
        );
    }

    #[test]
    fn handshake_compatibility_checks_both_directions() {
        assert!(ConsumerHandshake::current(true).is_compatible());
        let too_new = ConsumerHandshake {
            consumer_scheduled: true,
            version: PROTOCOL_VERSION + 5,
            min_accepted_version: PROTOCOL_VERSION + 1,
        };
        assert!(!too_new.is_compatible());
    }
}
