//! Socket setup and request-id allocation shared by transports and sessions.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicI32, Ordering};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Create a non-blocking UDP socket bound to `addr`.
///
/// IPv6 sockets are dual-stack. `recv_buffer_size` is a hint; the kernel
/// caps it at `net.core.rmem_max`.
pub(crate) fn bind_udp_socket(
    addr: SocketAddr,
    recv_buffer_size: Option<usize>,
) -> io::Result<UdpSocket> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    if let Some(size) = recv_buffer_size
        && let Err(e) = socket.set_recv_buffer_size(size)
    {
        tracing::debug!(
            target: "snmp_query::transport",
            error = %e,
            size,
            "receive buffer size rejected"
        );
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    UdpSocket::from_std(socket.into())
}

/// Wildcard address of the same family as `target`, port 0.
pub(crate) fn unspecified_for(target: SocketAddr) -> SocketAddr {
    if target.is_ipv6() {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    }
}

/// Monotonic request-id source.
///
/// Ids are strictly positive. After `i32::MAX` the counter wraps to 1.
#[derive(Debug)]
pub(crate) struct RequestIdCounter(AtomicI32);

impl RequestIdCounter {
    /// Start at `first` (clamped into `1..=i32::MAX`).
    pub(crate) fn starting_at(first: i32) -> Self {
        Self(AtomicI32::new(first.max(1)))
    }

    /// Start at a random point so a restarted process does not reuse the
    /// ids its previous incarnation had in flight.
    pub(crate) fn random() -> Self {
        let mut seed = [0u8; 4];
        let first = match getrandom::fill(&mut seed) {
            Ok(()) => i32::from_be_bytes(seed) & 0x3FFF_FFFF,
            Err(e) => {
                tracing::warn!(
                    target: "snmp_query::session",
                    error = %e,
                    "no OS randomness, seeding request ids from 1"
                );
                1
            }
        };
        Self::starting_at(first)
    }

    pub(crate) fn next(&self) -> i32 {
        self.0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |id| {
                Some(if id == i32::MAX { 1 } else { id + 1 })
            })
            .unwrap_or_else(|id| id)
    }
}
