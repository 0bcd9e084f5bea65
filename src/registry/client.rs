//! Session client for the coordination service.
//!
//! This module:
//! - Establishes and authenticates a session over one TCP connection
//! - Routes responses back to callers by transaction id
//! - Delivers server-pushed watch notifications to one-shot handles
//! - Replaces a prior session on reconnect, waking its armed watches
//!
//! The session must be connected before the registrar or dispatcher can
//! operate; watch loops call [`Registry::reconnect`] on session loss and
//! retry after a fixed backoff.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use futures::SinkExt;
use futures::StreamExt;
#[cfg(test)]
use mockall::automock;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::protocol::CreateMode;
use super::protocol::ReplyCode;
use super::protocol::RequestFrame;
use super::protocol::RequestOp;
use super::protocol::ResponseBody;
use super::protocol::ResponseFrame;
use super::protocol::WatchKind;
use super::DiscoverEvent;
use super::WatchHandle;
use crate::constants::WATCH_NOTIFICATION_XID;
use crate::CoordinationError;
use crate::Error;
use crate::RegistryConfig;
use crate::Result;

type WireSink = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
type WireStream = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

/// Coordination-service operations consumed by the registrar and the
/// dispatcher.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Session liveness check.
    async fn ping(&self) -> Result<()>;

    /// Drop the current session and establish a fresh one.
    async fn reconnect(&self) -> Result<()>;

    /// Read a node's value.
    async fn get(
        &self,
        path: &str,
    ) -> Result<Vec<u8>>;

    /// Read a node's value and arm a one-shot data watch on it.
    async fn get_with_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, WatchHandle)>;

    /// List a node's children.
    async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>>;

    /// List a node's children and arm a one-shot children watch.
    async fn watch_children(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, WatchHandle)>;

    /// Create a node; returns the created path (which differs from the
    /// requested one for sequential modes).
    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String>;

    /// Write a node's value, creating the node when it does not exist.
    async fn update(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<()>;

    async fn create_ephemeral_sequential(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<String>;

    /// Create every missing ancestor, then write the leaf value.
    async fn create_recursive(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<()>;
}

/// One live session: framed writer, xid-routed pending table, and the
/// armed one-shot watches.
struct Session {
    alive: AtomicBool,
    session_id: AtomicU64,
    next_xid: AtomicU64,
    writer: Mutex<WireSink>,
    pending: DashMap<u64, oneshot::Sender<ResponseFrame>>,
    watches: DashMap<(String, WatchKind), Vec<oneshot::Sender<DiscoverEvent>>>,
    reader: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Session {
    fn new(writer: WireSink) -> Self {
        Self {
            alive: AtomicBool::new(true),
            session_id: AtomicU64::new(0),
            next_xid: AtomicU64::new(1),
            writer: Mutex::new(writer),
            pending: DashMap::new(),
            watches: DashMap::new(),
            reader: parking_lot::Mutex::new(None),
        }
    }

    async fn request(
        &self,
        op: RequestOp,
    ) -> Result<ResponseFrame> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(CoordinationError::ConnectionClosed.into());
        }

        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(xid, tx);

        let encoded =
            bincode::serialize(&RequestFrame { xid, op }).map_err(CoordinationError::Codec)?;
        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.send(Bytes::from(encoded)).await {
                self.pending.remove(&xid);
                warn!("failed to send frame (xid={}): {}", xid, e);
                return Err(CoordinationError::ConnectionClosed.into());
            }
        }

        // The reader task fulfills the oneshot; a dropped sender means
        // the connection died underneath us.
        rx.await
            .map_err(|_| CoordinationError::ConnectionClosed.into())
    }

    /// Arm a one-shot watch on `(path, kind)` before the request that
    /// registers it server-side, so no notification can be missed.
    fn arm_watch(
        &self,
        path: &str,
        kind: WatchKind,
    ) -> WatchHandle {
        let (tx, rx) = oneshot::channel();
        self.watches
            .entry((path.to_string(), kind))
            .or_default()
            .push(tx);
        rx
    }

    fn fire_watch(
        &self,
        path: &str,
        kind: WatchKind,
    ) {
        if let Some((_, senders)) = self.watches.remove(&(path.to_string(), kind)) {
            for tx in senders {
                let _ = tx.send(DiscoverEvent {
                    key: path.to_string(),
                    data: vec![],
                    error: None,
                });
            }
        } else {
            debug!("watch notification for unarmed path {}", path);
        }
    }

    /// Best-effort close announcement so the server can retire the
    /// session (and its ephemeral nodes) without waiting for the lease
    /// to expire.
    async fn announce_close(&self) {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let encoded = match bincode::serialize(&RequestFrame {
            xid,
            op: RequestOp::CloseSession,
        }) {
            Ok(encoded) => encoded,
            Err(_) => return,
        };
        let mut writer = self.writer.lock().await;
        let _ = writer.send(Bytes::from(encoded)).await;
    }

    /// Mark the session dead, fail callers and wake armed watches so
    /// their loops go through reconnect-and-reread.
    fn teardown(
        &self,
        reason: &str,
    ) {
        if self.alive.swap(false, Ordering::AcqRel) {
            info!("registry session closed: {}", reason);
        }
        self.pending.clear();

        let armed: Vec<(String, WatchKind)> = self.watches.iter().map(|e| e.key().clone()).collect();
        for key in armed {
            if let Some((_, senders)) = self.watches.remove(&key) {
                for tx in senders {
                    let _ = tx.send(DiscoverEvent {
                        key: key.0.clone(),
                        data: vec![],
                        error: Some(reason.to_string()),
                    });
                }
            }
        }
    }

    fn close(&self) {
        self.teardown("session replaced");
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

async fn read_loop(
    session: Arc<Session>,
    mut stream: WireStream,
) {
    while let Some(next) = stream.next().await {
        let buf = match next {
            Ok(buf) => buf,
            Err(e) => {
                warn!("registry stream error: {}", e);
                break;
            }
        };

        let frame: ResponseFrame = match bincode::deserialize(&buf) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("dropping undecodable frame: {}", e);
                continue;
            }
        };

        if frame.xid == WATCH_NOTIFICATION_XID {
            if let ResponseBody::Watch { path, kind } = frame.body {
                session.fire_watch(&path, kind);
            } else {
                warn!("watch notification without watch body");
            }
        } else if let Some((_, tx)) = session.pending.remove(&frame.xid) {
            let _ = tx.send(frame);
        } else {
            debug!("response for unknown xid {}", frame.xid);
        }
    }
    session.teardown("connection closed");
}

/// Client to the distributed coordination service. One instance is
/// constructed at process start and shared by every component that
/// needs it; there is no global singleton.
pub struct MembershipRegistry {
    config: RegistryConfig,
    session: ArcSwapOption<Session>,
    /// Serializes the connect sequence: concurrent reconnects from the
    /// watch loops must not both build a session and leak the loser's
    /// reader task.
    connect_lock: Mutex<()>,
}

impl MembershipRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            session: ArcSwapOption::const_empty(),
            connect_lock: Mutex::new(()),
        }
    }

    /// Establish a session and authenticate, closing a prior session
    /// first if one exists.
    pub async fn connect(&self) -> Result<()> {
        self.connect_with_timeout(self.config.connect_timeout()).await
    }

    pub async fn connect_with_timeout(
        &self,
        connect_timeout: Duration,
    ) -> Result<()> {
        let _guard = self.connect_lock.lock().await;

        if let Some(old) = self.session.swap(None) {
            if old.alive.load(Ordering::Acquire) {
                old.announce_close().await;
            }
            old.close();
        }

        let endpoint = self.config.endpoint.clone();
        let stream = match timeout(connect_timeout, TcpStream::connect(&endpoint)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!("connect to {} failed: {}", endpoint, e);
                return Err(CoordinationError::ConnectError(endpoint).into());
            }
            Err(_) => {
                return Err(CoordinationError::ConnectTimeout {
                    endpoint,
                    timeout_ms: connect_timeout.as_millis() as u64,
                }
                .into())
            }
        };

        let framed = Framed::new(stream, LengthDelimitedCodec::new());
        let (sink, stream) = framed.split();
        let session = Arc::new(Session::new(sink));
        let handle = tokio::spawn(read_loop(session.clone(), stream));
        *session.reader.lock() = Some(handle);

        let reply = session
            .request(RequestOp::StartSession {
                timeout_ms: self.config.session_timeout_in_ms,
            })
            .await?;
        if reply.code != ReplyCode::Ok {
            session.close();
            return Err(CoordinationError::Protocol(format!(
                "session handshake rejected: {:?}",
                reply.code
            ))
            .into());
        }
        match reply.body {
            ResponseBody::Session { session_id, timeout_ms } => {
                session.session_id.store(session_id, Ordering::Release);
                debug!(session_id, timeout_ms, "coordination session established");
            }
            _ => {
                session.close();
                return Err(
                    CoordinationError::Protocol("handshake reply carried no session".into()).into(),
                );
            }
        }

        self.session.store(Some(session));

        if self.config.auth_scheme.is_some() {
            self.authenticate().await?;
        }

        info!("connected to coordination service at {}", self.config.endpoint);
        Ok(())
    }

    fn current_session(&self) -> Result<Arc<Session>> {
        match self.session.load_full() {
            Some(session) if session.alive.load(Ordering::Acquire) => Ok(session),
            Some(_) => Err(CoordinationError::ConnectionClosed.into()),
            None => Err(CoordinationError::NotConnected.into()),
        }
    }

    async fn authenticate(&self) -> Result<()> {
        let (scheme, credential) = match (&self.config.auth_scheme, &self.config.auth_credential) {
            (Some(scheme), Some(credential)) => (scheme.clone(), credential.clone().into_bytes()),
            // Nothing to re-authenticate with: propagate.
            _ => return Err(CoordinationError::AuthRequired.into()),
        };

        let reply = self
            .current_session()?
            .request(RequestOp::AddAuth { scheme, credential })
            .await?;
        if reply.code == ReplyCode::Ok {
            Ok(())
        } else {
            Err(CoordinationError::AuthFailed(format!("{:?}", reply.code)).into())
        }
    }

    /// Send `op`, re-authenticating once and retrying once on an
    /// authorization-required reply.
    async fn call(
        &self,
        op: RequestOp,
        path: &str,
    ) -> Result<ResponseFrame> {
        let reply = self.current_session()?.request(op.clone()).await?;
        if reply.code == ReplyCode::AuthRequired {
            warn!("authorization required for {}, re-authenticating", path);
            self.authenticate().await?;
            let retry = self.current_session()?.request(op).await?;
            return into_result(retry, path);
        }
        into_result(reply, path)
    }
}

#[async_trait]
impl Registry for MembershipRegistry {
    async fn ping(&self) -> Result<()> {
        self.call(RequestOp::Ping, "/").await.map(|_| ())
    }

    async fn reconnect(&self) -> Result<()> {
        self.connect().await
    }

    async fn get(
        &self,
        path: &str,
    ) -> Result<Vec<u8>> {
        let reply = self
            .call(
                RequestOp::GetData {
                    path: path.to_string(),
                    watch: false,
                },
                path,
            )
            .await?;
        match reply.body {
            ResponseBody::Data { value } => Ok(value),
            other => Err(unexpected_body(path, &other)),
        }
    }

    async fn get_with_watch(
        &self,
        path: &str,
    ) -> Result<(Vec<u8>, WatchHandle)> {
        let session = self.current_session()?;
        let handle = session.arm_watch(path, WatchKind::Data);
        let reply = self
            .call(
                RequestOp::GetData {
                    path: path.to_string(),
                    watch: true,
                },
                path,
            )
            .await?;
        match reply.body {
            ResponseBody::Data { value } => Ok((value, handle)),
            other => Err(unexpected_body(path, &other)),
        }
    }

    async fn get_children(
        &self,
        path: &str,
    ) -> Result<Vec<String>> {
        let reply = self
            .call(
                RequestOp::GetChildren {
                    path: path.to_string(),
                    watch: false,
                },
                path,
            )
            .await?;
        match reply.body {
            ResponseBody::Children { names } => Ok(names),
            other => Err(unexpected_body(path, &other)),
        }
    }

    async fn watch_children(
        &self,
        path: &str,
    ) -> Result<(Vec<String>, WatchHandle)> {
        let session = self.current_session()?;
        let handle = session.arm_watch(path, WatchKind::Children);
        let reply = self
            .call(
                RequestOp::GetChildren {
                    path: path.to_string(),
                    watch: true,
                },
                path,
            )
            .await?;
        match reply.body {
            ResponseBody::Children { names } => Ok((names, handle)),
            other => Err(unexpected_body(path, &other)),
        }
    }

    async fn create(
        &self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
    ) -> Result<String> {
        let reply = self
            .call(
                RequestOp::Create {
                    path: path.to_string(),
                    data: data.to_vec(),
                    mode,
                },
                path,
            )
            .await?;
        match reply.body {
            ResponseBody::Created { path } => Ok(path),
            ResponseBody::None => Ok(path.to_string()),
            other => Err(unexpected_body(path, &other)),
        }
    }

    async fn update(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        let result = self
            .call(
                RequestOp::SetData {
                    path: path.to_string(),
                    data: data.to_vec(),
                },
                path,
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(Error::Coordination(CoordinationError::NoNode(_))) => {
                self.create(path, data, CreateMode::Persistent).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn create_ephemeral_sequential(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<String> {
        self.create(path, data, CreateMode::EphemeralSequential).await
    }

    async fn create_recursive(
        &self,
        path: &str,
        data: &[u8],
    ) -> Result<()> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(CoordinationError::Protocol(format!("invalid path: {}", path)).into());
        }

        let mut current = String::new();
        for (index, segment) in segments.iter().enumerate() {
            current.push('/');
            current.push_str(segment);
            let is_leaf = index == segments.len() - 1;
            let node_data = if is_leaf { data.to_vec() } else { Vec::new() };

            match self.create(&current, &node_data, CreateMode::Persistent).await {
                Ok(_) => {}
                Err(Error::Coordination(CoordinationError::NodeExists(_))) => {
                    if is_leaf {
                        self.update(&current, data).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn into_result(
    reply: ResponseFrame,
    path: &str,
) -> Result<ResponseFrame> {
    match reply.code {
        ReplyCode::Ok => Ok(reply),
        ReplyCode::NoNode => Err(CoordinationError::NoNode(path.to_string()).into()),
        ReplyCode::NodeExists => Err(CoordinationError::NodeExists(path.to_string()).into()),
        ReplyCode::AuthRequired => Err(CoordinationError::AuthRequired.into()),
        ReplyCode::SessionExpired => Err(CoordinationError::SessionExpired.into()),
        ReplyCode::MarshallingError => {
            Err(CoordinationError::Protocol(format!("marshalling error at {}", path)).into())
        }
    }
}

fn unexpected_body(
    path: &str,
    body: &ResponseBody,
) -> Error {
    CoordinationError::Protocol(format!("unexpected reply body for {}: {:?}", path, body)).into()
}
