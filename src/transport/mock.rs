//! Scripted in-memory transport for session tests.

use super::{Transport, extract_request_id};
use crate::error::{Error, Result};
use crate::message::{CommunityMessage, Message};
use crate::pdu::Pdu;
use crate::varbind::VarBind;
use crate::version::Version;
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// What the mock does on the next `recv`.
#[derive(Clone, Debug)]
pub enum MockResponse {
    /// Community message whose request-id is rewritten to the last one sent.
    Reply(Bytes),
    /// Delivered byte for byte.
    Raw(Bytes),
    /// Delivered byte for byte, claiming to come from another address.
    FromSource(SocketAddr, Bytes),
    /// Nothing arrives; `recv` waits out its timeout.
    Silence,
    /// `recv` fails with an I/O error of this kind.
    IoError(std::io::ErrorKind),
}

/// A datagram the session sent.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub data: Bytes,
    pub request_id: Option<i32>,
}

impl RecordedRequest {
    /// Decoded PDU, for community messages.
    pub fn pdu(&self) -> Option<Pdu> {
        Message::decode(self.data.clone()).ok()?.into_pdu()
    }
}

struct MockState {
    responses: VecDeque<MockResponse>,
    requests: Vec<RecordedRequest>,
    last_request_id: Option<i32>,
}

/// In-memory [`Transport`] that plays back queued responses.
///
/// When the queue runs dry every `recv` behaves like [`MockResponse::Silence`].
#[derive(Clone)]
pub struct MockTransport {
    target: SocketAddr,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target,
            state: Arc::new(Mutex::new(MockState {
                responses: VecDeque::new(),
                requests: Vec::new(),
                last_request_id: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, response: MockResponse) -> &Self {
        self.state().responses.push_back(response);
        self
    }

    /// Queue a response PDU; its request-id is patched on delivery.
    pub fn reply(&self, pdu: ResponseBuilder) -> &Self {
        self.push(MockResponse::Reply(pdu.build_v2c()))
    }

    pub fn silence(&self) -> &Self {
        self.push(MockResponse::Silence)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state().requests.clone()
    }

    pub fn queued(&self) -> usize {
        self.state().responses.len()
    }

    fn patch_request_id(data: Bytes, request_id: i32) -> Bytes {
        match Message::decode(data.clone()) {
            Ok(Message::Community(mut msg)) => {
                msg.pdu.request_id = request_id;
                msg.encode()
            }
            _ => data,
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("target", &self.target)
            .field("queued", &self.queued())
            .finish()
    }
}

impl Transport for MockTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        let data = Bytes::copy_from_slice(data);
        let request_id = extract_request_id(&data);
        let mut state = self.state();
        state.last_request_id = request_id;
        state.requests.push(RecordedRequest { data, request_id });
        Ok(())
    }

    async fn recv(&self, request_id: i32, timeout: Duration) -> Result<(Bytes, SocketAddr)> {
        let (next, last_id) = {
            let mut state = self.state();
            let next = state.responses.pop_front().unwrap_or(MockResponse::Silence);
            (next, state.last_request_id)
        };

        match next {
            MockResponse::Reply(data) => {
                let id = last_id.unwrap_or(request_id);
                Ok((Self::patch_request_id(data, id), self.target))
            }
            MockResponse::Raw(data) => Ok((data, self.target)),
            MockResponse::FromSource(source, data) => Ok((data, source)),
            MockResponse::Silence => {
                tokio::time::sleep(timeout).await;
                Err(Error::Timeout {
                    target: Some(self.target),
                    elapsed: timeout,
                    request_id,
                    retries: 0,
                })
            }
            MockResponse::IoError(kind) => Err(Error::Io {
                target: Some(self.target),
                source: std::io::Error::new(kind, "mock transport error"),
            }),
        }
    }

    fn peer_addr(&self) -> SocketAddr {
        self.target
    }

    fn local_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }
}

/// Builds encoded Response messages for [`MockTransport`] and fake agents.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    request_id: i32,
    varbinds: Vec<VarBind>,
    error_status: i32,
    error_index: i32,
}

impl ResponseBuilder {
    pub fn new(request_id: i32) -> Self {
        Self {
            request_id,
            varbinds: Vec::new(),
            error_status: 0,
            error_index: 0,
        }
    }

    pub fn varbind(mut self, oid: crate::oid::Oid, value: crate::value::Value) -> Self {
        self.varbinds.push(VarBind::new(oid, value));
        self
    }

    pub fn error(mut self, status: crate::error::ErrorStatus, index: i32) -> Self {
        self.error_status = status.as_i32();
        self.error_index = index;
        self
    }

    pub fn pdu(&self) -> Pdu {
        Pdu {
            error_status: self.error_status,
            error_index: self.error_index,
            ..Pdu::response(self.request_id, self.varbinds.clone())
        }
    }

    pub fn build(&self, version: Version, community: &[u8]) -> Bytes {
        CommunityMessage {
            version,
            community: Bytes::copy_from_slice(community),
            pdu: self.pdu(),
        }
        .encode()
    }

    pub fn build_v1(&self) -> Bytes {
        self.build(Version::V1, b"public")
    }

    pub fn build_v2c(&self) -> Bytes {
        self.build(Version::V2c, b"public")
    }
}
