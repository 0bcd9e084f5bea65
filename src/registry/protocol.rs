//! Wire frames for the coordination-service protocol.
//!
//! Frames travel length-prefixed (`LengthDelimitedCodec`) and
//! bincode-encoded. Requests carry a client-chosen transaction id;
//! responses echo it. Watch notifications are server-pushed frames with
//! the reserved xid [`crate::constants::WATCH_NOTIFICATION_XID`].

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed automatically when the owning session ends.
    Ephemeral,
    /// Ephemeral with a server-assigned monotonic suffix.
    EphemeralSequential,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum WatchKind {
    Data,
    Children,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RequestFrame {
    pub xid: u64,
    pub op: RequestOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum RequestOp {
    StartSession {
        timeout_ms: u64,
    },
    CloseSession,
    Ping,
    AddAuth {
        scheme: String,
        credential: Vec<u8>,
    },
    GetData {
        path: String,
        watch: bool,
    },
    GetChildren {
        path: String,
        watch: bool,
    },
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    SetData {
        path: String,
        data: Vec<u8>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) enum ReplyCode {
    Ok,
    NoNode,
    NodeExists,
    AuthRequired,
    SessionExpired,
    MarshallingError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResponseFrame {
    pub xid: u64,
    pub code: ReplyCode,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum ResponseBody {
    None,
    Session { session_id: u64, timeout_ms: u64 },
    Data { value: Vec<u8> },
    Children { names: Vec<String> },
    Created { path: String },
    Watch { path: String, kind: WatchKind },
}
