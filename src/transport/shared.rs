//! One UDP socket multiplexed across many targets.
//!
//! ```text
//! SharedUdpTransport  (owns socket, spawns recv loop)
//!        |
//!        +-- SharedUdpHandle(10.0.0.1:161) -- Session
//!        +-- SharedUdpHandle(10.0.0.2:161) -- Session
//! ```
//!
//! The recv loop reads every datagram, pulls out its request-id and queues
//! it for the handle whose send used that id, provided it came from that
//! handle's target. Handles draw ids from one counter so concurrent
//! sessions never collide.
//!
//! ```rust,no_run
//! use snmp_query::transport::SharedUdpTransport;
//! use snmp_query::{Credential, Session};
//!
//! # async fn example() -> snmp_query::Result<()> {
//! let shared = SharedUdpTransport::bind("0.0.0.0:0").await?;
//! let a = Session::builder("192.0.2.1", Credential::v2c("public"))
//!     .build(shared.handle("192.0.2.1:161".parse().unwrap()))?;
//! let b = Session::builder("192.0.2.2", Credential::v2c("public"))
//!     .build(shared.handle("192.0.2.2:161".parse().unwrap()))?;
//! # Ok(())
//! # }
//! ```

use super::Transport;
use super::router::{ResponseRouter, spawn_recv_loop};
use crate::error::{Error, Result};
use crate::util::{RequestIdCounter, bind_udp_socket};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::{CancellationToken, DropGuard};

const LOG_TARGET: &str = "snmp_query::transport";

/// Shared UDP socket. Create per-target handles with [`handle`](Self::handle).
///
/// The background recv task stops once this value and every handle made
/// from it have been dropped.
#[derive(Clone)]
pub struct SharedUdpTransport {
    inner: Arc<SharedInner>,
}

struct SharedInner {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    router: Arc<ResponseRouter>,
    request_ids: RequestIdCounter,
    _shutdown: DropGuard,
}

impl SharedUdpTransport {
    /// Bind with default settings.
    pub async fn bind(addr: impl Into<String>) -> Result<Self> {
        Self::builder().bind(addr).build().await
    }

    pub fn builder() -> SharedUdpTransportBuilder {
        SharedUdpTransportBuilder::new()
    }

    /// Logical connection to `target` over the shared socket.
    pub fn handle(&self, target: SocketAddr) -> SharedUdpHandle {
        SharedUdpHandle {
            shared: self.clone(),
            target,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }
}

/// Builder for [`SharedUdpTransport`].
#[derive(Debug, Clone)]
pub struct SharedUdpTransportBuilder {
    bind_addr: String,
    max_message_size: usize,
    recv_buffer_size: Option<usize>,
}

impl SharedUdpTransportBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "0.0.0.0:0".into(),
            max_message_size: 65535,
            recv_buffer_size: None,
        }
    }

    /// Local bind address (default `0.0.0.0:0`).
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    /// Largest datagram accepted (default 65535). Longer datagrams are truncated.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Kernel receive buffer hint. Raise this when polling many targets at once.
    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = Some(size);
        self
    }

    pub async fn build(self) -> Result<SharedUdpTransport> {
        let bind_addr: SocketAddr = self.bind_addr.parse().map_err(|_| Error::Io {
            target: None,
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid bind address: {}", self.bind_addr),
            ),
        })?;

        let io_err = |source| Error::Io {
            target: Some(bind_addr),
            source,
        };
        let socket = bind_udp_socket(bind_addr, self.recv_buffer_size).map_err(io_err)?;
        let local_addr = socket.local_addr().map_err(io_err)?;

        tracing::debug!(
            target: LOG_TARGET,
            { snmp.local_addr = %local_addr },
            "shared UDP transport bound"
        );

        let socket = Arc::new(socket);
        let router = Arc::new(ResponseRouter::new());
        let shutdown = CancellationToken::new();
        spawn_recv_loop(
            Arc::clone(&socket),
            Arc::clone(&router),
            self.max_message_size,
            shutdown.clone(),
        );

        Ok(SharedUdpTransport {
            inner: Arc::new(SharedInner {
                socket,
                local_addr,
                router,
                request_ids: RequestIdCounter::random(),
                _shutdown: shutdown.drop_guard(),
            }),
        })
    }
}

impl Default for SharedUdpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-target view of a [`SharedUdpTransport`].
#[derive(Clone)]
pub struct SharedUdpHandle {
    shared: SharedUdpTransport,
    target: SocketAddr,
}

impl std::fmt::Debug for SharedUdpHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedUdpHandle")
            .field("target", &self.target)
            .field("local_addr", &self.shared.inner.local_addr)
            .finish()
    }
}

impl Transport for SharedUdpHandle {
    async fn send(&self, data: &[u8]) -> Result<()> {
        tracing::trace!(
            target: LOG_TARGET,
            { snmp.target = %self.target, snmp.bytes = data.len() },
            "shared UDP send"
        );
        self.shared.inner.router.register_outgoing(data, self.target);
        self.shared
            .inner
            .socket
            .send_to(data, self.target)
            .await
            .map_err(|source| Error::Io {
                target: Some(self.target),
                source,
            })?;
        Ok(())
    }

    async fn recv(&self, request_id: i32, timeout: Duration) -> Result<(Bytes, SocketAddr)> {
        self.shared
            .inner
            .router
            .recv(request_id, self.target, timeout)
            .await
    }

    fn release(&self, request_id: i32) {
        self.shared.inner.router.release(request_id);
    }

    fn peer_addr(&self) -> SocketAddr {
        self.target
    }

    fn local_addr(&self) -> SocketAddr {
        self.shared.inner.local_addr
    }

    fn alloc_request_id(&self) -> Option<i32> {
        Some(self.shared.inner.request_ids.next())
    }
}
