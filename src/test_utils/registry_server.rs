//! In-process coordination server for tests.
//!
//! [`spawn_registry_server`] binds an ephemeral port and serves the
//! framed wire protocol with a caller-scripted handler. Session
//! handshakes are answered automatically; every other request is passed
//! to the handler, which returns the frames to write back. The first
//! returned frame is the reply; any additional frames are written
//! afterwards, which is how tests deliver watch pushes.

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio_util::bytes::Bytes;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;

use crate::constants::WATCH_NOTIFICATION_XID;
use crate::registry::protocol::ReplyCode;
use crate::registry::protocol::RequestFrame;
use crate::registry::protocol::RequestOp;
use crate::registry::protocol::ResponseBody;
use crate::registry::protocol::ResponseFrame;
use crate::registry::WatchKind;
use crate::RegistryConfig;

pub(crate) fn ok_frame(
    xid: u64,
    body: ResponseBody,
) -> ResponseFrame {
    ResponseFrame {
        xid,
        code: ReplyCode::Ok,
        body,
    }
}

pub(crate) fn err_frame(
    xid: u64,
    code: ReplyCode,
) -> ResponseFrame {
    ResponseFrame {
        xid,
        code,
        body: ResponseBody::None,
    }
}

/// Server-pushed watch notification frame.
pub(crate) fn watch_push(
    path: &str,
    kind: WatchKind,
) -> ResponseFrame {
    ResponseFrame {
        xid: WATCH_NOTIFICATION_XID,
        code: ReplyCode::Ok,
        body: ResponseBody::Watch {
            path: path.to_string(),
            kind,
        },
    }
}

/// Registry config pointing at the scripted server, with short timeouts
/// so failing tests do not hang.
pub(crate) fn config_for(addr: SocketAddr) -> RegistryConfig {
    RegistryConfig {
        endpoint: addr.to_string(),
        session_timeout_in_ms: 5_000,
        connect_timeout_in_ms: 2_000,
        watch_retry_interval_in_ms: 50,
        ..RegistryConfig::default()
    }
}

/// Start a scripted server on an ephemeral port and return its address.
///
/// The handler sees `(xid, op)` for every non-handshake request and is
/// shared across connections, so reconnecting clients keep talking to
/// the same script. `CloseSession` is forwarded to the handler, then
/// the connection is dropped.
pub(crate) async fn spawn_registry_server<H>(handler: H) -> SocketAddr
where
    H: FnMut(u64, RequestOp) -> Vec<ResponseFrame> + Send + 'static,
{
    spawn_registry_server_with(Duration::ZERO, handler).await.0
}

/// Variant with a slowed session handshake and an open-connection
/// gauge, for exercising reconnect races.
pub(crate) async fn spawn_registry_server_with<H>(
    handshake_delay: Duration,
    handler: H,
) -> (SocketAddr, Arc<AtomicUsize>)
where
    H: FnMut(u64, RequestOp) -> Vec<ResponseFrame> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind test server");
    let addr = listener.local_addr().expect("local addr");
    let handler = Arc::new(parking_lot::Mutex::new(handler));
    let open = Arc::new(AtomicUsize::new(0));

    let gauge = open.clone();
    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let handler = handler.clone();
            let gauge = gauge.clone();
            tokio::spawn(async move {
                gauge.fetch_add(1, Ordering::SeqCst);
                serve_connection(socket, handshake_delay, handler).await;
                gauge.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    (addr, open)
}

async fn serve_connection<H>(
    socket: TcpStream,
    handshake_delay: Duration,
    handler: Arc<parking_lot::Mutex<H>>,
) where
    H: FnMut(u64, RequestOp) -> Vec<ResponseFrame> + Send + 'static,
{
    let mut framed = Framed::new(socket, LengthDelimitedCodec::new());

    while let Some(Ok(buf)) = framed.next().await {
        let request: RequestFrame = match bincode::deserialize(&buf) {
            Ok(request) => request,
            Err(_) => continue,
        };

        let closing = matches!(request.op, RequestOp::CloseSession);
        let replies = match request.op {
            RequestOp::StartSession { timeout_ms } => {
                if !handshake_delay.is_zero() {
                    tokio::time::sleep(handshake_delay).await;
                }
                vec![ok_frame(
                    request.xid,
                    ResponseBody::Session {
                        session_id: 1,
                        timeout_ms,
                    },
                )]
            }
            op => {
                let mut handler = handler.lock();
                (*handler)(request.xid, op)
            }
        };

        for reply in replies {
            let encoded = bincode::serialize(&reply).expect("encode test frame");
            if framed.send(Bytes::from(encoded)).await.is_err() {
                return;
            }
        }
        if closing {
            return;
        }
    }
}
