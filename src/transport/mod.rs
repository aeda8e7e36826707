//! Transport layer abstraction.
//!
//! Provides the `Transport` trait and implementations for a connected UDP
//! socket per target and a shared UDP socket for many targets.

mod router;
mod shared;
mod udp;

#[cfg(any(test, feature = "testing"))]
mod mock;

pub use shared::*;
pub use udp::*;

#[cfg(any(test, feature = "testing"))]
pub use mock::*;

use crate::ber::{Decoder, tag};
use crate::error::Result;
use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

/// Client-side datagram transport.
///
/// The `Clone` bound lets walk streams own a handle to the session's
/// transport. Implementations share state behind an `Arc`, so cloning is cheap.
pub trait Transport: Send + Sync + Clone {
    /// Send one encoded message to the peer.
    fn send(&self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Wait up to `timeout` for the next datagram addressed to `request_id`.
    ///
    /// Socket transports route by the request-id (msgID for v3) found in
    /// each datagram; the session still checks what it is handed.
    ///
    /// Returns (datagram, source address).
    fn recv(
        &self,
        request_id: i32,
        timeout: Duration,
    ) -> impl Future<Output = Result<(Bytes, SocketAddr)>> + Send;

    /// The call using `request_id` is over; drop anything still queued for it.
    fn release(&self, _request_id: i32) {}

    /// Remote address this transport talks to.
    fn peer_addr(&self) -> SocketAddr;

    /// Local bind address.
    fn local_addr(&self) -> SocketAddr;

    /// Request ID from a counter shared with other users of the same socket.
    ///
    /// `None` means the session allocates its own.
    fn alloc_request_id(&self) -> Option<i32> {
        None
    }
}

/// Pull the request-id (v1/v2c) or msgID (v3) out of a raw datagram.
///
/// Only the header is parsed, so this works on encrypted v3 messages too.
pub fn extract_request_id(data: &[u8]) -> Option<i32> {
    let mut outer = Decoder::from_slice(data);
    let mut msg = outer.read_sequence().ok()?;
    let version = msg.read_integer().ok()?;

    if version == 3 {
        let mut global = msg.read_sequence().ok()?;
        return global.read_integer().ok();
    }

    msg.expect_tag(tag::universal::OCTET_STRING)
        .and_then(|len| msg.read_bytes(len))
        .ok()?;
    let pdu_tag = msg.read_tag().ok()?;
    if !(tag::pdu::GET_REQUEST..=tag::pdu::REPORT).contains(&pdu_tag) {
        return None;
    }
    let len = msg.read_length().ok()?;
    msg.sub_decoder(len).ok()?.read_integer().ok()
}
