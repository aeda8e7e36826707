//! Connected UDP transport, one socket per target.

use super::Transport;
use super::router::{ResponseRouter, spawn_recv_loop};
use crate::error::{Error, Result};
use crate::util::{bind_udp_socket, unspecified_for};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Largest UDP payload we will read.
const MAX_DATAGRAM: usize = 65535;

/// UDP socket connected to a single agent.
///
/// The kernel filters datagrams from other sources once the socket is
/// connected. A background task reads the socket and hands each response
/// to the call that sent the matching request, so concurrent calls on one
/// session never steal each other's replies. Clones share the socket; the
/// task stops when the last clone is dropped.
#[derive(Clone)]
pub struct UdpTransport {
    inner: Arc<UdpInner>,
}

struct UdpInner {
    socket: Arc<UdpSocket>,
    target: SocketAddr,
    local_addr: SocketAddr,
    router: Arc<ResponseRouter>,
    _shutdown: DropGuard,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to `target`.
    pub async fn connect(target: SocketAddr) -> Result<Self> {
        Self::connect_with_buffer(target, None).await
    }

    /// As [`connect`](Self::connect), with an explicit receive buffer size.
    pub async fn connect_with_buffer(
        target: SocketAddr,
        recv_buffer_size: Option<usize>,
    ) -> Result<Self> {
        let io_err = |source| Error::Io {
            target: Some(target),
            source,
        };
        let socket = bind_udp_socket(unspecified_for(target), recv_buffer_size).map_err(io_err)?;
        socket.connect(target).await.map_err(io_err)?;
        let local_addr = socket.local_addr().map_err(io_err)?;

        tracing::debug!(
            target: "snmp_query::transport",
            { snmp.target = %target, snmp.local_addr = %local_addr },
            "UDP transport connected"
        );

        let socket = Arc::new(socket);
        let router = Arc::new(ResponseRouter::new());
        let shutdown = CancellationToken::new();
        spawn_recv_loop(
            Arc::clone(&socket),
            Arc::clone(&router),
            MAX_DATAGRAM,
            shutdown.clone(),
        );

        Ok(Self {
            inner: Arc::new(UdpInner {
                socket,
                target,
                local_addr,
                router,
                _shutdown: shutdown.drop_guard(),
            }),
        })
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("target", &self.inner.target)
            .field("local_addr", &self.inner.local_addr)
            .field("awaiting", &self.inner.router.len())
            .finish()
    }
}

impl Transport for UdpTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        tracing::trace!(
            target: "snmp_query::transport",
            { snmp.target = %self.inner.target, snmp.bytes = data.len() },
            "UDP send"
        );
        self.inner.router.register_outgoing(data, self.inner.target);
        self.inner.socket.send(data).await.map_err(|source| Error::Io {
            target: Some(self.inner.target),
            source,
        })?;
        Ok(())
    }

    async fn recv(&self, request_id: i32, timeout: Duration) -> Result<(Bytes, SocketAddr)> {
        self.inner
            .router
            .recv(request_id, self.inner.target, timeout)
            .await
    }

    fn release(&self, request_id: i32) {
        self.inner.router.release(request_id);
    }

    fn peer_addr(&self) -> SocketAddr {
        self.inner.target
    }

    fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }
}
