//! Per-request mailboxes filled by a background receive task.
//!
//! A request opens its mailbox when it is sent, so a reply that lands
//! before the caller starts waiting is queued rather than lost. Datagrams
//! are routed by request-id (msgID for v3); one that carries no readable
//! id goes to every mailbox waiting on its source, where the session
//! rejects it.

use super::extract_request_id;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const LOG_TARGET: &str = "snmp_query::transport";

/// Datagrams held per request before further ones are dropped.
const MAX_QUEUED: usize = 16;

struct Mailbox {
    target: SocketAddr,
    queue: VecDeque<(Bytes, SocketAddr)>,
    notify: Arc<Notify>,
}

impl Mailbox {
    fn push(&mut self, data: Bytes, source: SocketAddr) -> bool {
        if self.queue.len() >= MAX_QUEUED {
            return false;
        }
        self.queue.push_back((data, source));
        self.notify.notify_one();
        true
    }
}

#[derive(Default)]
pub(crate) struct ResponseRouter {
    mailboxes: Mutex<HashMap<i32, Mailbox>>,
}

impl ResponseRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn mailboxes(&self) -> MutexGuard<'_, HashMap<i32, Mailbox>> {
        self.mailboxes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a mailbox for `request_id`. Returns false if one is already open.
    pub(crate) fn register(&self, request_id: i32, target: SocketAddr) -> bool {
        match self.mailboxes().entry(request_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Mailbox {
                    target,
                    queue: VecDeque::new(),
                    notify: Arc::new(Notify::new()),
                });
                true
            }
        }
    }

    /// Open the mailbox for an outgoing message, keyed by its own id.
    pub(crate) fn register_outgoing(&self, data: &[u8], target: SocketAddr) {
        if let Some(request_id) = extract_request_id(data) {
            self.register(request_id, target);
        }
    }

    pub(crate) fn release(&self, request_id: i32) {
        self.mailboxes().remove(&request_id);
    }

    pub(crate) fn len(&self) -> usize {
        self.mailboxes().len()
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self, request_id: i32) -> bool {
        self.mailboxes().contains_key(&request_id)
    }

    /// Queue a datagram. Returns how many mailboxes took it.
    pub(crate) fn dispatch(&self, data: Bytes, source: SocketAddr) -> usize {
        let mut mailboxes = self.mailboxes();
        let Some(request_id) = extract_request_id(&data) else {
            let mut delivered = 0;
            for mailbox in mailboxes.values_mut().filter(|m| m.target == source) {
                delivered += usize::from(mailbox.push(data.clone(), source));
            }
            if delivered == 0 {
                tracing::debug!(
                    target: LOG_TARGET,
                    { snmp.source = %source, len = data.len() },
                    "dropping datagram without request id"
                );
            }
            return delivered;
        };

        match mailboxes.get_mut(&request_id) {
            Some(mailbox) if mailbox.target != source => {
                tracing::debug!(
                    target: LOG_TARGET,
                    {
                        snmp.request_id = request_id,
                        snmp.target = %mailbox.target,
                        snmp.source = %source,
                    },
                    "dropping response from unexpected source"
                );
                0
            }
            Some(mailbox) => {
                if mailbox.push(data, source) {
                    1
                } else {
                    tracing::debug!(
                        target: LOG_TARGET,
                        { snmp.request_id = request_id },
                        "mailbox full, dropping response"
                    );
                    0
                }
            }
            None => {
                tracing::debug!(
                    target: LOG_TARGET,
                    { snmp.request_id = request_id, snmp.source = %source },
                    "dropping response for unknown request id"
                );
                0
            }
        }
    }

    /// Wait up to `timeout` for the next datagram queued for `request_id`.
    ///
    /// A mailbox opened here, rather than by a send, is closed again on
    /// return.
    pub(crate) async fn recv(
        &self,
        request_id: i32,
        target: SocketAddr,
        timeout: Duration,
    ) -> Result<(Bytes, SocketAddr)> {
        let _cleanup = self.register(request_id, target).then_some(Release {
            router: self,
            request_id,
        });
        let deadline = Instant::now() + timeout;
        loop {
            let notify = {
                let mut mailboxes = self.mailboxes();
                let Some(mailbox) = mailboxes.get_mut(&request_id) else {
                    break;
                };
                if let Some(received) = mailbox.queue.pop_front() {
                    return Ok(received);
                }
                Arc::clone(&mailbox.notify)
            };
            if tokio::time::timeout_at(deadline, notify.notified()).await.is_err() {
                break;
            }
        }
        Err(Error::Timeout {
            target: Some(target),
            elapsed: timeout,
            request_id,
            retries: 0,
        })
    }
}

struct Release<'a> {
    router: &'a ResponseRouter,
    request_id: i32,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.router.release(self.request_id);
    }
}

/// Read `socket` until `shutdown` fires, routing every datagram.
pub(crate) fn spawn_recv_loop(
    socket: Arc<UdpSocket>,
    router: Arc<ResponseRouter>,
    max_message_size: usize,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; max_message_size];
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = socket.recv_from(&mut buf) => r,
            };
            match received {
                Ok((len, source)) => {
                    tracing::trace!(
                        target: LOG_TARGET,
                        { snmp.source = %source, snmp.bytes = len },
                        "UDP recv"
                    );
                    router.dispatch(Bytes::copy_from_slice(&buf[..len]), source);
                }
                // ICMP errors surface here on some platforms; keep serving.
                Err(e) => tracing::warn!(target: LOG_TARGET, error = %e, "UDP recv error"),
            }
        }
        tracing::debug!(target: LOG_TARGET, "UDP recv loop stopped");
    });
}
