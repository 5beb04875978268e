//! JSON wire format of the relay channel and the typed events behind it.
//!
//! One WebSocket text frame carries one JSON object. Inbound frames are decoded
//! loosely into [`Frame`], then validated into a [`RoutedEvent`] whose `from`
//! is always the server-verified sender.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Identity;

/// Text of the soft error sent back when a call target is not reachable.
pub const OFFLINE_MESSAGE: &str = "user is offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameType {
    Message,
    Call,
    CallResponse,
    CallReject,
    CallEnd,
    /// Server to client only.
    CallError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    Voice,
    Video,
}

impl CallType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Voice => "voice",
            Self::Video => "video",
        }
    }
}

/// WebRTC ICE candidate as produced by `RTCIceCandidate.toJSON()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: String,
    pub sdp_m_line_index: u32,
}

/// Raw frame as it appears on the wire. Every field is optional here;
/// [`RoutedEvent::from_frame`] decides what a given kind requires.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FrameType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_type: Option<CallType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Frame {
    /// `{"type":"call-error","message":...}`
    pub fn call_error(message: &str) -> Self {
        Self {
            kind: Some(FrameType::CallError),
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Decode one text frame. Errors mean the frame is malformed and should be dropped.
pub fn decode_frame(text: &str) -> Result<Frame, serde_json::Error> {
    serde_json::from_str(text)
}

/// Why a decoded frame cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("frame has no type")]
    MissingType,
    #[error("frame type {0:?} cannot be sent by clients")]
    UnsupportedType(FrameType),
    #[error("frame has no recipient")]
    MissingRecipient,
    #[error("{kind} frame is missing {field}")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Message {
        text: String,
        created_at: Option<DateTime<Utc>>,
    },
    CallOffer {
        call_type: CallType,
        sdp: String,
    },
    CallCandidate {
        candidate: IceCandidate,
    },
    CallAnswer {
        sdp: String,
    },
    CallReject,
    CallEnd,
}

/// One validated relay event with the sender stamped by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutedEvent {
    pub from: Identity,
    pub to: Identity,
    pub payload: EventPayload,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl RoutedEvent {
    pub fn message(from: &str, to: &str, text: &str, created_at: Option<DateTime<Utc>>) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            payload: EventPayload::Message {
                text: text.to_string(),
                created_at,
            },
        }
    }

    pub fn call_offer(from: &str, to: &str, call_type: CallType, sdp: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            payload: EventPayload::CallOffer {
                call_type,
                sdp: sdp.to_string(),
            },
        }
    }

    /// Validate a decoded frame. Any `from` the client supplied is discarded
    /// in favour of `sender`, and client timestamps are dropped: `createdAt`
    /// only travels on messages that came out of the store.
    pub fn from_frame(sender: &str, frame: Frame) -> Result<Self, EventError> {
        let kind = frame.kind.ok_or(EventError::MissingType)?;
        let to = present(frame.to).ok_or(EventError::MissingRecipient)?;

        let payload = match kind {
            FrameType::Message => {
                let text = present(frame.text).ok_or(EventError::MissingField {
                    kind: "message",
                    field: "text",
                })?;
                EventPayload::Message {
                    text,
                    created_at: None,
                }
            }
            FrameType::Call => match (frame.call_type, present(frame.sdp), frame.candidate) {
                (Some(call_type), Some(sdp), _) => EventPayload::CallOffer { call_type, sdp },
                (_, _, Some(candidate)) => EventPayload::CallCandidate { candidate },
                (None, _, None) => {
                    return Err(EventError::MissingField {
                        kind: "call",
                        field: "callType",
                    })
                }
                (Some(_), None, None) => {
                    return Err(EventError::MissingField {
                        kind: "call",
                        field: "sdp",
                    })
                }
            },
            FrameType::CallResponse => {
                let sdp = present(frame.sdp).ok_or(EventError::MissingField {
                    kind: "call-response",
                    field: "sdp",
                })?;
                EventPayload::CallAnswer { sdp }
            }
            FrameType::CallReject => EventPayload::CallReject,
            FrameType::CallEnd => EventPayload::CallEnd,
            FrameType::CallError => return Err(EventError::UnsupportedType(kind)),
        };

        Ok(Self {
            from: sender.to_string(),
            to,
            payload,
        })
    }

    /// Call-signaling kinds report an unreachable peer back to the caller.
    pub fn is_call_signal(&self) -> bool {
        !matches!(self.payload, EventPayload::Message { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self.payload {
            EventPayload::Message { .. } => "message",
            EventPayload::CallOffer { .. } => "call-offer",
            EventPayload::CallCandidate { .. } => "call-candidate",
            EventPayload::CallAnswer { .. } => "call-answer",
            EventPayload::CallReject => "call-reject",
            EventPayload::CallEnd => "call-end",
        }
    }

    pub fn to_frame(&self) -> Frame {
        let mut frame = Frame {
            from: Some(self.from.clone()),
            to: Some(self.to.clone()),
            ..Default::default()
        };

        match &self.payload {
            EventPayload::Message { text, created_at } => {
                frame.kind = Some(FrameType::Message);
                frame.text = Some(text.clone());
                frame.created_at = *created_at;
            }
            EventPayload::CallOffer { call_type, sdp } => {
                frame.kind = Some(FrameType::Call);
                frame.call_type = Some(*call_type);
                frame.sdp = Some(sdp.clone());
            }
            EventPayload::CallCandidate { candidate } => {
                frame.kind = Some(FrameType::Call);
                frame.candidate = Some(candidate.clone());
            }
            EventPayload::CallAnswer { sdp } => {
                frame.kind = Some(FrameType::CallResponse);
                frame.sdp = Some(sdp.clone());
            }
            EventPayload::CallReject => frame.kind = Some(FrameType::CallReject),
            EventPayload::CallEnd => frame.kind = Some(FrameType::CallEnd),
        }

        frame
    }
}
