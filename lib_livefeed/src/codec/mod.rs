//! # Frame Codec
//!
//! The push protocol has two independent layers:
//!
//! 1. **Frame** (transport): a [`PushFrame`] per WebSocket binary message, tagged as a
//!    data frame, a heartbeat or an acknowledgement.
//! 2. **Envelope** (application): the gzip-compressed [`Response`] carried by data
//!    frames, holding an ordered batch of typed messages and the ack contract.
//!
//! [`FrameCodec`] converts between raw bytes and the engine's [`Frame`] / [`Envelope`]
//! types. All decoding failures are reported as [`CodecError`] and are meant to drop a
//! single incoming message, never the connection.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use prost::Message as _;
use thiserror::Error;

pub mod events;
pub mod proto_handler;

use proto_handler::{HeadersList, PushFrame, Response};

/// Wire tag of a data-carrying frame.
pub const PAYLOAD_TYPE_DATA: &str = "msg";
/// Wire tag of a keep-alive frame.
pub const PAYLOAD_TYPE_HEARTBEAT: &str = "hb";
/// Wire tag of an acknowledgement frame.
pub const PAYLOAD_TYPE_ACK: &str = "ack";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound for a decompressed envelope.
pub const MAX_ENVELOPE_BYTES: u64 = 16 * 1024 * 1024;

/// Errors raised while decoding frames or envelopes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] prost::DecodeError),

    #[error("unknown frame payload type {0:?}")]
    UnknownPayloadType(String),

    #[error("payload decompression failed: {0}")]
    Decompression(#[source] std::io::Error),

    #[error("decompressed payload exceeds {MAX_ENVELOPE_BYTES} bytes")]
    EnvelopeTooLarge,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] prost::DecodeError),

    #[error("frame of type {0:?} carries no envelope")]
    NotData(PayloadType),
}

impl CodecError {
    /// Short processing stage name used in diagnostics.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::MalformedFrame(_) | Self::UnknownPayloadType(_) => "frame",
            Self::Decompression(_) | Self::EnvelopeTooLarge => "decompress",
            Self::MalformedEnvelope(_) | Self::NotData(_) => "envelope",
        }
    }
}

/// Transport-level classification of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Data,
    Heartbeat,
    Ack,
}

impl PayloadType {
    /// Parses a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            PAYLOAD_TYPE_DATA => Some(Self::Data),
            PAYLOAD_TYPE_HEARTBEAT => Some(Self::Heartbeat),
            PAYLOAD_TYPE_ACK => Some(Self::Ack),
            _ => None,
        }
    }

    /// The wire tag for this payload type.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Data => PAYLOAD_TYPE_DATA,
            Self::Heartbeat => PAYLOAD_TYPE_HEARTBEAT,
            Self::Ack => PAYLOAD_TYPE_ACK,
        }
    }
}

/// A decoded transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub log_id: u64,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
    pub compressed: bool,
}

/// A single typed event inside an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Kind tag selecting the handler (the wire `method`).
    pub kind: String,
    pub payload: Vec<u8>,
}

/// The application batch carried by a data frame. `messages` keeps wire order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub need_ack: bool,
    pub internal_ext: String,
    pub messages: Vec<Message>,
}

/// Stateless encoder/decoder for both protocol layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Decodes the outer frame of one WebSocket binary message.
    pub fn decode_frame(raw: &[u8]) -> Result<Frame, CodecError> {
        let push = PushFrame::decode(raw).map_err(CodecError::MalformedFrame)?;
        let payload_type = PayloadType::from_tag(&push.payload_type)
            .ok_or_else(|| CodecError::UnknownPayloadType(push.payload_type.clone()))?;

        let compressed = push
            .headers_list
            .iter()
            .any(|h| h.key == "compress_type" && h.value.eq_ignore_ascii_case("gzip"))
            || push.payload.starts_with(&GZIP_MAGIC);

        Ok(Frame {
            log_id: push.log_id,
            payload_type,
            payload: push.payload,
            compressed,
        })
    }

    /// Decodes the envelope of a data frame, decompressing first when needed.
    pub fn decode_envelope(frame: &Frame) -> Result<Envelope, CodecError> {
        if frame.payload_type != PayloadType::Data {
            return Err(CodecError::NotData(frame.payload_type));
        }

        let response = if frame.compressed {
            let body = gunzip(&frame.payload)?;
            Response::decode(body.as_slice())
        } else {
            Response::decode(frame.payload.as_slice())
        }
        .map_err(CodecError::MalformedEnvelope)?;

        Ok(Envelope {
            need_ack: response.need_ack,
            internal_ext: response.internal_ext,
            messages: response
                .messages
                .into_iter()
                .map(|m| Message {
                    kind: m.method,
                    payload: m.payload,
                })
                .collect(),
        })
    }

    /// Builds the acknowledgement for a data frame whose envelope set `need_ack`.
    pub fn encode_ack(frame: &Frame, envelope: &Envelope) -> Vec<u8> {
        PushFrame {
            log_id: frame.log_id,
            payload_type: PAYLOAD_TYPE_ACK.to_string(),
            payload: envelope.internal_ext.as_bytes().to_vec(),
            ..Default::default()
        }
        .encode_to_vec()
    }

    /// Builds an empty keep-alive frame.
    pub fn encode_heartbeat() -> Vec<u8> {
        PushFrame {
            payload_type: PAYLOAD_TYPE_HEARTBEAT.to_string(),
            ..Default::default()
        }
        .encode_to_vec()
    }

    /// Builds a data frame the way the push server emits it. Used by replay fixtures
    /// and tests.
    pub fn encode_data_frame(
        log_id: u64,
        response: &Response,
        compress: bool,
    ) -> Result<Vec<u8>, std::io::Error> {
        let body = response.encode_to_vec();
        let (payload, headers_list) = if compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&body)?;
            let headers = vec![HeadersList {
                key: "compress_type".to_string(),
                value: "gzip".to_string(),
            }];
            (encoder.finish()?, headers)
        } else {
            (body, Vec::new())
        };

        Ok(PushFrame {
            log_id,
            payload_type: PAYLOAD_TYPE_DATA.to_string(),
            payload_encoding: "pb".to_string(),
            headers_list,
            payload,
            ..Default::default()
        }
        .encode_to_vec())
    }
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    GzDecoder::new(data)
        .take(MAX_ENVELOPE_BYTES + 1)
        .read_to_end(&mut out)
        .map_err(CodecError::Decompression)?;
    if out.len() as u64 > MAX_ENVELOPE_BYTES {
        return Err(CodecError::EnvelopeTooLarge);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::proto_handler::WireMessage;
    use super::*;

    fn sample_response(need_ack: bool) -> Response {
        Response {
            need_ack,
            internal_ext: "internal_src:dim|seq:42".to_string(),
            messages: vec![
                WireMessage {
                    method: "WebcastChatMessage".to_string(),
                    payload: vec![1, 2, 3],
                    ..Default::default()
                },
                WireMessage {
                    method: "WebcastLikeMessage".to_string(),
                    payload: vec![4],
                    ..Default::default()
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn heartbeat_decodes_as_empty_heartbeat_frame() {
        let frame = FrameCodec::decode_frame(&FrameCodec::encode_heartbeat()).unwrap();
        assert_eq!(frame.payload_type, PayloadType::Heartbeat);
        assert!(frame.payload.is_empty());
        assert!(!frame.compressed);
    }

    #[test]
    fn ack_echoes_log_id_and_internal_ext() {
        for log_id in [0u64, 1, 7_392_091_211_001_140_287, u64::MAX] {
            let raw = FrameCodec::encode_data_frame(log_id, &sample_response(true), true).unwrap();
            let frame = FrameCodec::decode_frame(&raw).unwrap();
            let envelope = FrameCodec::decode_envelope(&frame).unwrap();
            assert!(envelope.need_ack);

            let ack = FrameCodec::decode_frame(&FrameCodec::encode_ack(&frame, &envelope)).unwrap();
            assert_eq!(ack.payload_type, PayloadType::Ack);
            assert_eq!(ack.log_id, log_id);
            assert_eq!(ack.payload, envelope.internal_ext.as_bytes());
        }
    }

    #[test]
    fn compressed_envelope_keeps_message_order() {
        let raw = FrameCodec::encode_data_frame(9, &sample_response(false), true).unwrap();
        let frame = FrameCodec::decode_frame(&raw).unwrap();
        assert!(frame.compressed);

        let envelope = FrameCodec::decode_envelope(&frame).unwrap();
        let kinds: Vec<_> = envelope.messages.iter().map(|m| m.kind.as_str()).collect();
        assert_eq!(kinds, ["WebcastChatMessage", "WebcastLikeMessage"]);
        assert_eq!(envelope.messages[0].payload, vec![1, 2, 3]);
    }

    #[test]
    fn uncompressed_envelope_is_accepted() {
        let raw = FrameCodec::encode_data_frame(3, &sample_response(false), false).unwrap();
        let frame = FrameCodec::decode_frame(&raw).unwrap();
        assert!(!frame.compressed);
        assert_eq!(FrameCodec::decode_envelope(&frame).unwrap().messages.len(), 2);
    }

    #[test]
    fn garbage_is_a_malformed_frame() {
        let err = FrameCodec::decode_frame(&[0xff, 0xff, 0xff]).unwrap_err();
        assert!(matches!(err, CodecError::MalformedFrame(_)));
        assert_eq!(err.stage(), "frame");
    }

    #[test]
    fn unknown_payload_type_is_rejected() {
        let raw = PushFrame {
            payload_type: "close".to_string(),
            ..Default::default()
        }
        .encode_to_vec();
        assert!(matches!(
            FrameCodec::decode_frame(&raw),
            Err(CodecError::UnknownPayloadType(tag)) if tag == "close"
        ));
    }

    #[test]
    fn corrupt_gzip_is_a_decompression_error() {
        let frame = Frame {
            log_id: 1,
            payload_type: PayloadType::Data,
            // valid gzip header followed by a deflate block with a reserved type
            payload: vec![
                0x1f, 0x8b, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0xff, 0xff, 0xff,
            ],
            compressed: true,
        };
        let err = FrameCodec::decode_envelope(&frame).unwrap_err();
        assert!(matches!(err, CodecError::Decompression(_)));
        assert_eq!(err.stage(), "decompress");
    }

    #[test]
    fn heartbeat_frame_has_no_envelope() {
        let frame = FrameCodec::decode_frame(&FrameCodec::encode_heartbeat()).unwrap();
        assert!(matches!(
            FrameCodec::decode_envelope(&frame),
            Err(CodecError::NotData(PayloadType::Heartbeat))
        ));
    }
}
