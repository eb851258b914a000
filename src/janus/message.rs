//! Janus wire protocol (VideoRoom publisher dialect)
//!
//! Requests are tagged with a fixed `transaction` name per request kind and
//! the gateway echoes it in the response:
//!
//! ```text
//! create    -> success (data.id = session)
//! attach    -> success (data.id = handle)
//! join      -> ack, event (plugindata joined)
//! configure -> ack, event (jsep answer)
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::PublishConfig;
use crate::media::{IceCandidate, SdpType, SessionDescription};

/// Plugin the publisher attaches to
pub const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";

/// Transaction names used to correlate responses with requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transaction {
    Create,
    Attach,
    JoinRoom,
    Configure,
    Candidate,
    Unpublish,
    Keepalive,
}

impl Transaction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Attach => "Attach",
            Self::JoinRoom => "JoinRoom",
            Self::Configure => "Configure",
            Self::Candidate => "Candidate",
            Self::Unpublish => "Unpublish",
            Self::Keepalive => "Keepalive",
        }
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transaction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Create" => Ok(Self::Create),
            "Attach" => Ok(Self::Attach),
            "JoinRoom" => Ok(Self::JoinRoom),
            "Configure" => Ok(Self::Configure),
            "Candidate" => Ok(Self::Candidate),
            "Unpublish" => Ok(Self::Unpublish),
            "Keepalive" => Ok(Self::Keepalive),
            _ => Err(()),
        }
    }
}

/// Outbound requests
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "janus", rename_all = "lowercase")]
pub enum Request {
    Create {
        transaction: Transaction,
    },
    Attach {
        transaction: Transaction,
        plugin: &'static str,
        session_id: u64,
    },
    Message {
        transaction: Transaction,
        handle_id: u64,
        session_id: u64,
        body: MessageBody,
        #[serde(skip_serializing_if = "Option::is_none")]
        jsep: Option<SessionDescription>,
    },
    Trickle {
        transaction: Transaction,
        handle_id: u64,
        session_id: u64,
        candidate: TrickleCandidate,
    },
    Keepalive {
        transaction: Transaction,
        session_id: u64,
    },
}

/// VideoRoom plugin request body
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "request", rename_all = "lowercase")]
pub enum MessageBody {
    Join {
        ptype: &'static str,
        room: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        pin: Option<String>,
        display: String,
        id: u32,
    },
    Configure {
        audio: bool,
        video: bool,
    },
    Unpublish,
}

/// A trickled candidate, or the end-of-candidates marker
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TrickleCandidate {
    Candidate(IceCandidate),
    Completed { completed: bool },
}

impl Request {
    pub fn create() -> Self {
        Self::Create {
            transaction: Transaction::Create,
        }
    }

    pub fn attach(session_id: u64) -> Self {
        Self::Attach {
            transaction: Transaction::Attach,
            plugin: VIDEOROOM_PLUGIN,
            session_id,
        }
    }

    pub fn join(session_id: u64, handle_id: u64, config: &PublishConfig) -> Self {
        Self::Message {
            transaction: Transaction::JoinRoom,
            handle_id,
            session_id,
            body: MessageBody::Join {
                ptype: "publisher",
                room: config.room,
                pin: config.pin.clone(),
                display: config.display.clone(),
                id: config.id,
            },
            jsep: None,
        }
    }

    pub fn configure(session_id: u64, handle_id: u64, offer: SessionDescription) -> Self {
        Self::Message {
            transaction: Transaction::Configure,
            handle_id,
            session_id,
            body: MessageBody::Configure {
                audio: true,
                video: true,
            },
            jsep: Some(offer),
        }
    }

    pub fn trickle(session_id: u64, handle_id: u64, candidate: IceCandidate) -> Self {
        Self::Trickle {
            transaction: Transaction::Candidate,
            handle_id,
            session_id,
            candidate: TrickleCandidate::Candidate(candidate),
        }
    }

    pub fn trickle_completed(session_id: u64, handle_id: u64) -> Self {
        Self::Trickle {
            transaction: Transaction::Candidate,
            handle_id,
            session_id,
            candidate: TrickleCandidate::Completed { completed: true },
        }
    }

    pub fn unpublish(session_id: u64, handle_id: u64) -> Self {
        Self::Message {
            transaction: Transaction::Unpublish,
            handle_id,
            session_id,
            body: MessageBody::Unpublish,
            jsep: None,
        }
    }

    pub fn keepalive(session_id: u64) -> Self {
        Self::Keepalive {
            transaction: Transaction::Keepalive,
            session_id,
        }
    }

    pub fn transaction(&self) -> Transaction {
        match self {
            Self::Create { transaction }
            | Self::Attach { transaction, .. }
            | Self::Message { transaction, .. }
            | Self::Trickle { transaction, .. }
            | Self::Keepalive { transaction, .. } => *transaction,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Error object of a `janus: error` response
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

/// `plugindata` of an event
#[derive(Debug, Clone, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: String,
    #[serde(default)]
    pub data: Value,
}

/// Any inbound message. Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    pub janus: String,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub session_id: Option<u64>,
    /// Handle the message is about
    #[serde(default)]
    pub sender: Option<u64>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub jsep: Option<SessionDescription>,
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub error: Option<GatewayError>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// What an inbound message means to the publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JanusEvent {
    SessionCreated { session_id: u64 },
    HandleAttached { handle_id: u64 },
    Joined,
    Configured { answer: Option<SessionDescription> },
    Hangup { reason: String },
    SessionTimeout,
    Ack,
    Error { transaction: Transaction, reason: String },
    Unhandled,
}

impl Response {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn transaction(&self) -> Option<Transaction> {
        self.transaction.as_deref().and_then(|t| t.parse().ok())
    }

    fn data_id(&self) -> Option<u64> {
        self.data
            .as_ref()
            .and_then(|data| data.get("id"))
            .and_then(Value::as_u64)
            .filter(|&id| id != 0)
    }

    /// VideoRoom reports request failures inside a successful event
    fn plugin_error(&self) -> Option<String> {
        let data = &self.plugindata.as_ref()?.data;
        let error = data.get("error")?.as_str().unwrap_or("unknown error");
        Some(match data.get("error_code").and_then(Value::as_i64) {
            Some(code) => format!("{} (code {})", error, code),
            None => error.to_string(),
        })
    }

    /// Classify by (`transaction`, `janus`), or by `janus` alone for
    /// unsolicited events
    pub fn event(&self) -> JanusEvent {
        let transaction = self.transaction();

        match (transaction, self.janus.as_str()) {
            (_, "ack") => JanusEvent::Ack,
            (Some(transaction), "error") => JanusEvent::Error {
                transaction,
                reason: match &self.error {
                    Some(e) => format!("{} (code {})", e.reason, e.code),
                    None => "unknown error".to_string(),
                },
            },
            (Some(Transaction::Create), "success") => match self.data_id() {
                Some(session_id) => JanusEvent::SessionCreated { session_id },
                None => JanusEvent::Unhandled,
            },
            (Some(Transaction::Attach), "success") => match self.data_id() {
                Some(handle_id) => JanusEvent::HandleAttached { handle_id },
                None => JanusEvent::Unhandled,
            },
            (Some(t @ (Transaction::JoinRoom | Transaction::Configure)), "event") => {
                if let Some(reason) = self.plugin_error() {
                    return JanusEvent::Error {
                        transaction: t,
                        reason,
                    };
                }
                if t == Transaction::JoinRoom {
                    JanusEvent::Joined
                } else {
                    JanusEvent::Configured {
                        answer: self
                            .jsep
                            .clone()
                            .filter(|jsep| jsep.sdp_type == SdpType::Answer),
                    }
                }
            }
            (None, "hangup") => JanusEvent::Hangup {
                reason: self.reason.clone().unwrap_or_default(),
            },
            (None, "timeout") => JanusEvent::SessionTimeout,
            _ => JanusEvent::Unhandled,
        }
    }
}
