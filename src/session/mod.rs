//! SNMP session: one target, one credential, many concurrent requests.
//!
//! A [`Session`] allocates request-ids, tracks every call awaiting a
//! response, retransmits on timeout and maps responses onto [`Error`]s.
//!
//! ```rust,no_run
//! use snmp_query::{Credential, Session, oid};
//!
//! # async fn example() -> snmp_query::Result<()> {
//! let session = Session::builder("192.0.2.1", Credential::v2c("public"))
//!     .connect()
//!     .await?;
//!
//! let name = session.get_one(&oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)).await?;
//! println!("sysName = {name}");
//! # Ok(())
//! # }
//! ```

mod builder;
mod pending;
mod retry;
mod v3;
mod walk;

pub use builder::{DEFAULT_PORT, SessionBuilder};
pub use retry::{
    Backoff, DEFAULT_ATTEMPTS, DEFAULT_TIMEOUT, MAX_ATTEMPT_TIMEOUT, MIN_ATTEMPT_TIMEOUT, Retry,
    RetryBuilder,
};
pub use walk::{BulkWalk, TableWalk, Walk, WalkMode, WalkStream};

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{Span, instrument};

use crate::credential::Credential;
use crate::error::{ConfigError, DecodeErrorKind, Error, ErrorStatus, Result};
use crate::message::{Message, encode_request};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};
use crate::transport::{Transport, UdpTransport};
use crate::util::RequestIdCounter;
use crate::v3::{EngineCache, EngineState};
use crate::value::Value;
use crate::varbind::VarBind;
use crate::version::Version;

use pending::{PendingGuard, PendingTable};
use v3::V3Security;

const LOG_TARGET: &str = "snmp_query::session";

/// What to do with one received datagram.
#[derive(Debug)]
pub(crate) enum Verdict<R> {
    /// The awaited response.
    Done(R),
    /// Valid, but not for this call.
    Ignore(&'static str),
    /// Undecodable or failed verification. Keep waiting; reported if the
    /// final attempt sees nothing better.
    Reject(Error),
    /// Send the request again right away.
    Resend(Error),
    /// Give up without retrying.
    Fail(Error),
}

#[derive(Debug, Clone)]
pub(crate) struct SessionConfig {
    pub retry: Retry,
    pub max_oids_per_request: usize,
    pub max_repetitions: u32,
    pub walk_mode: WalkMode,
    pub max_walk_results: Option<usize>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: Retry::default(),
            max_oids_per_request: 10,
            max_repetitions: 10,
            walk_mode: WalkMode::Auto,
            max_walk_results: None,
        }
    }
}

/// Handle to an SNMP session. Clones share the same state.
///
/// Generic over the transport; [`UdpTransport`] by default.
pub struct Session<T: Transport = UdpTransport> {
    inner: Arc<SessionInner<T>>,
}

impl<T: Transport> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct SessionInner<T: Transport> {
    transport: T,
    credential: Credential,
    config: SessionConfig,
    request_ids: RequestIdCounter,
    pending: Arc<PendingTable>,
    v3: Option<V3Security>,
}

impl<T: Transport> Drop for SessionInner<T> {
    fn drop(&mut self) {
        let in_flight = self.pending.len();
        if in_flight > 0 {
            tracing::debug!(
                target: LOG_TARGET,
                { snmp.target = %self.transport.peer_addr(), in_flight },
                "session dropped with calls in flight"
            );
        }
        self.pending.close();
    }
}

impl<T: Transport> std::fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("target", &self.peer_addr())
            .field("credential", &self.inner.credential)
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl Session<UdpTransport> {
    /// Start configuring a session to `target` (`host`, `host:port` or
    /// `[v6]:port`; port 161 when omitted).
    pub fn builder(target: impl Into<String>, credential: Credential) -> SessionBuilder {
        SessionBuilder::new(target, credential)
    }
}

impl<T: Transport> Session<T> {
    pub(crate) fn from_parts(
        transport: T,
        credential: Credential,
        config: SessionConfig,
        engine_cache: Option<Arc<EngineCache>>,
    ) -> Self {
        let v3 = credential
            .as_usm()
            .map(|usm| V3Security::new(usm.clone(), engine_cache));
        Self {
            inner: Arc::new(SessionInner {
                transport,
                credential,
                config,
                request_ids: RequestIdCounter::random(),
                pending: PendingTable::new(),
                v3,
            }),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.inner.transport.peer_addr()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.transport.local_addr()
    }

    pub fn version(&self) -> Version {
        self.inner.credential.version()
    }

    pub fn credential(&self) -> &Credential {
        &self.inner.credential
    }

    /// Discovered SNMPv3 engine, if any.
    pub fn engine_state(&self) -> Option<EngineState> {
        self.inner.v3.as_ref().and_then(V3Security::engine)
    }

    /// Number of calls awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }

    /// Cancel the call waiting on `request_id`. It fails with
    /// [`Error::Cancelled`]; a response arriving later is dropped.
    pub fn cancel(&self, request_id: i32) -> bool {
        let found = self.inner.pending.cancel(request_id);
        if found {
            tracing::debug!(
                target: LOG_TARGET,
                { snmp.target = %self.peer_addr(), snmp.request_id = request_id },
                "request cancelled"
            );
        }
        found
    }

    /// Cancel every call in flight. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        self.inner.pending.cancel_all()
    }

    /// Cancel every call in flight and refuse new ones.
    pub fn close(&self) {
        tracing::debug!(
            target: LOG_TARGET,
            { snmp.target = %self.peer_addr(), in_flight = self.in_flight() },
            "session closed"
        );
        self.inner.pending.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.pending.is_closed()
    }

    /// GET. Returns one binding per OID, in request order.
    ///
    /// On v2c/v3, missing objects come back as [`Value::NoSuchObject`] or
    /// [`Value::NoSuchInstance`]; on v1 they fail with
    /// [`Error::Remote`] carrying `noSuchName`.
    #[instrument(
        skip(self, oids),
        err,
        fields(snmp.target = %self.peer_addr(), snmp.oid_count = oids.len())
    )]
    pub async fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>> {
        let response = self.request(Pdu::get_request(0, oids)).await?;
        self.expect_one_per_oid(oids.len(), response)
    }

    /// GET a single object and return its value.
    ///
    /// Unlike [`get`](Self::get), a missing object is always an error:
    /// `noSuchObject` and `noSuchInstance` map to [`Error::Remote`] with
    /// `noSuchName` at index 1.
    #[instrument(skip(self), err, fields(snmp.target = %self.peer_addr(), snmp.oid = %oid))]
    pub async fn get_one(&self, oid: &Oid) -> Result<Value> {
        let mut varbinds = self.get(std::slice::from_ref(oid)).await?;
        let Some(vb) = varbinds.pop() else {
            return Err(self.count_mismatch(1, 0));
        };
        match vb.value {
            Value::NoSuchObject | Value::NoSuchInstance => Err(Error::Remote {
                target: Some(self.peer_addr()),
                status: ErrorStatus::NoSuchName,
                index: 1,
                oid: Some(vb.oid),
            }),
            value => Ok(value),
        }
    }

    /// GET any number of OIDs, split into requests of at most
    /// `max_oids_per_request`.
    #[instrument(
        skip(self, oids),
        err,
        fields(snmp.target = %self.peer_addr(), snmp.oid_count = oids.len())
    )]
    pub async fn get_many(&self, oids: &[Oid]) -> Result<Vec<VarBind>> {
        let mut results = Vec::with_capacity(oids.len());
        for chunk in oids.chunks(self.inner.config.max_oids_per_request.max(1)) {
            results.extend(self.get(chunk).await?);
        }
        Ok(results)
    }

    /// GETNEXT. Returns the successor of each OID, in request order.
    #[instrument(
        skip(self, oids),
        err,
        fields(snmp.target = %self.peer_addr(), snmp.oid_count = oids.len())
    )]
    pub async fn get_next(&self, oids: &[Oid]) -> Result<Vec<VarBind>> {
        let response = self.request(Pdu::get_next_request(0, oids)).await?;
        self.expect_one_per_oid(oids.len(), response)
    }

    /// GETBULK. Returns the flat binding list as the agent sent it.
    #[instrument(skip(self, oids), err, fields(
        snmp.target = %self.peer_addr(),
        snmp.oid_count = oids.len(),
        snmp.non_repeaters = non_repeaters,
        snmp.max_repetitions = max_repetitions
    ))]
    pub async fn get_bulk(
        &self,
        oids: &[Oid],
        non_repeaters: u32,
        max_repetitions: u32,
    ) -> Result<Vec<VarBind>> {
        let version = self.version();
        if !version.supports_bulk() {
            return Err(ConfigError::BulkUnsupported { version }.into());
        }
        let pdu = Pdu::get_bulk(
            0,
            i32::try_from(non_repeaters).unwrap_or(i32::MAX),
            i32::try_from(max_repetitions).unwrap_or(i32::MAX),
            oids,
        );
        Ok(self.request(pdu).await?.varbinds)
    }

    /// Lazily walk the subtree under `root`.
    ///
    /// Uses GETBULK on v2c/v3 and GETNEXT on v1 unless the builder chose a
    /// [`WalkMode`].
    pub fn walk(&self, root: Oid) -> Result<WalkStream<T>>
    where
        T: 'static,
    {
        let version = self.version();
        let bulk = match self.inner.config.walk_mode {
            WalkMode::Auto => version.supports_bulk(),
            WalkMode::GetNext => false,
            WalkMode::GetBulk if version.supports_bulk() => true,
            WalkMode::GetBulk => return Err(ConfigError::BulkUnsupported { version }.into()),
        };
        tracing::debug!(
            target: LOG_TARGET,
            { snmp.target = %self.peer_addr(), snmp.oid = %root, bulk },
            "starting walk"
        );
        Ok(if bulk {
            WalkStream::Bulk(self.bulk_walk(root, self.inner.config.max_repetitions))
        } else {
            WalkStream::Next(self.walk_next(root))
        })
    }

    /// Walk with GETNEXT regardless of the configured mode.
    pub fn walk_next(&self, root: Oid) -> Walk<T>
    where
        T: 'static,
    {
        Walk::new(self.clone(), root, self.inner.config.max_walk_results)
    }

    /// Walk with GETBULK, `max_repetitions` bindings per request.
    pub fn bulk_walk(&self, root: Oid, max_repetitions: u32) -> BulkWalk<T>
    where
        T: 'static,
    {
        BulkWalk::new(
            self.clone(),
            root,
            max_repetitions.max(1),
            self.inner.config.max_walk_results,
        )
    }

    /// Walk several table columns in lockstep, one row per step.
    pub fn table_walk(&self, columns: Vec<Oid>) -> TableWalk<T>
    where
        T: 'static,
    {
        TableWalk::new(self.clone(), columns, self.inner.config.max_walk_results)
    }

    fn count_mismatch(&self, expected: usize, actual: usize) -> Error {
        Error::malformed(0, DecodeErrorKind::VarbindCountMismatch { expected, actual })
            .with_target(self.peer_addr())
    }

    fn expect_one_per_oid(&self, expected: usize, response: Pdu) -> Result<Vec<VarBind>> {
        if response.varbinds.len() != expected {
            tracing::debug!(
                target: LOG_TARGET,
                { snmp.target = %self.peer_addr(), expected, actual = response.varbinds.len() },
                "response binding count differs from request"
            );
            return Err(self.count_mismatch(expected, response.varbinds.len()));
        }
        Ok(response.varbinds)
    }

    /// Claim a request-id that no other call of this session is using.
    fn register(&self) -> PendingGuard {
        loop {
            let id = self
                .inner
                .transport
                .alloc_request_id()
                .unwrap_or_else(|| self.inner.request_ids.next());
            if let Some(guard) = self.inner.pending.register(id) {
                return guard;
            }
            tracing::trace!(
                target: LOG_TARGET,
                { snmp.request_id = id },
                "request id still in flight, skipping"
            );
        }
    }

    fn cancelled(&self, request_id: i32) -> Error {
        Error::Cancelled {
            target: Some(self.peer_addr()),
            request_id,
        }
    }

    /// Send `pdu` under a fresh request-id and return the matching response.
    #[instrument(
        level = "debug",
        skip_all,
        fields(
            snmp.target = %self.peer_addr(),
            snmp.pdu_type = %pdu.pdu_type,
            snmp.request_id = tracing::field::Empty,
            snmp.attempt = tracing::field::Empty,
            snmp.elapsed_ms = tracing::field::Empty,
        )
    )]
    pub(crate) async fn request(&self, mut pdu: Pdu) -> Result<Pdu> {
        if self.is_closed() {
            return Err(self.cancelled(0));
        }
        pdu.validate_oids()?;
        let target = self.peer_addr();
        if let Some(v3) = &self.inner.v3 {
            self.ensure_engine(v3).await?;
        }

        let guard = self.register();
        let request_id = guard.request_id();
        pdu.request_id = request_id;
        Span::current().record("snmp.request_id", request_id);

        let response = match &self.inner.v3 {
            Some(v3) => {
                self.exchange(
                    &guard,
                    || v3.encode_request(&pdu),
                    |data| v3.classify_response(data, request_id, target),
                )
                .await?
            }
            None => {
                let encoded = encode_request(&pdu, &self.inner.credential)?;
                let version = self.version();
                self.exchange(
                    &guard,
                    || Ok(encoded.clone()),
                    |data| classify_community(data, version, request_id, target),
                )
                .await?
            }
        };

        check_status(&pdu, response, target)
    }

    /// Discover the agent's engine unless this session or the shared cache
    /// already knows it.
    async fn ensure_engine(&self, v3: &V3Security) -> Result<()> {
        let target = self.peer_addr();
        if v3.is_discovered() || v3.adopt_cached(target) {
            return Ok(());
        }

        tracing::debug!(target: LOG_TARGET, { snmp.target = %target }, "discovering engine");
        let guard = self.register();
        let msg_id = guard.request_id();
        let discovery = v3::discovery_request(msg_id);
        let state = self
            .exchange(
                &guard,
                || Ok(discovery.clone()),
                |data| v3::classify_discovery(data, msg_id, target),
            )
            .await?;

        tracing::debug!(
            target: LOG_TARGET,
            {
                snmp.target = %target,
                snmp.engine_boots = state.engine_boots,
                snmp.engine_time = state.engine_time,
            },
            "engine discovered"
        );
        v3.install(state, target, true);
        Ok(())
    }

    /// Send and retransmit until `classify` accepts a datagram, the call is
    /// cancelled, or the attempt budget runs out.
    async fn exchange<R>(
        &self,
        guard: &PendingGuard,
        mut encode: impl FnMut() -> Result<Bytes>,
        mut classify: impl FnMut(Bytes) -> Verdict<R>,
    ) -> Result<R> {
        let transport = &self.inner.transport;
        let retry = &self.inner.config.retry;
        let target = transport.peer_addr();
        let request_id = guard.request_id();
        let _release = ReleaseOnDrop {
            transport,
            request_id,
        };
        let token = guard.token();
        let started = Instant::now();
        let record_elapsed = || {
            Span::current().record("snmp.elapsed_ms", started.elapsed().as_millis() as u64);
        };

        let mut rejected: Option<Error> = None;
        let mut resynced = false;
        let mut attempt = 0;
        while attempt < retry.max_attempts {
            Span::current().record("snmp.attempt", attempt);
            if attempt > 0 {
                tracing::debug!(
                    target: LOG_TARGET,
                    { snmp.target = %target, snmp.request_id = request_id, snmp.attempt = attempt },
                    "retrying request"
                );
            }

            let data = encode()?;
            tracing::trace!(target: LOG_TARGET, { snmp.bytes = data.len() }, "sending request");
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    record_elapsed();
                    return Err(self.cancelled(request_id));
                }
                sent = transport.send(&data) => sent?,
            }

            rejected = None;
            let deadline = Instant::now() + retry.attempt_timeout(attempt);
            attempt += 1;

            loop {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let received = tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        record_elapsed();
                        return Err(self.cancelled(request_id));
                    }
                    received = transport.recv(request_id, remaining) => received,
                };
                let (data, source) = match received {
                    Ok(received) => received,
                    Err(Error::Timeout { .. }) => break,
                    Err(e) => {
                        record_elapsed();
                        return Err(e);
                    }
                };
                if source != target {
                    tracing::debug!(
                        target: LOG_TARGET,
                        { snmp.target = %target, snmp.source = %source },
                        "discarding datagram from unexpected source"
                    );
                    continue;
                }

                match classify(data) {
                    Verdict::Done(response) => {
                        record_elapsed();
                        return Ok(response);
                    }
                    Verdict::Ignore(reason) => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            { snmp.target = %target, snmp.request_id = request_id, reason },
                            "discarding response"
                        );
                    }
                    Verdict::Reject(e) => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            { snmp.target = %target, snmp.request_id = request_id, error = %e },
                            "discarding invalid response"
                        );
                        rejected = Some(e);
                    }
                    Verdict::Resend(e) => {
                        tracing::debug!(
                            target: LOG_TARGET,
                            { snmp.target = %target, snmp.request_id = request_id, error = %e },
                            "resending request"
                        );
                        if !resynced {
                            resynced = true;
                            attempt -= 1;
                        }
                        rejected = Some(e);
                        break;
                    }
                    Verdict::Fail(e) => {
                        record_elapsed();
                        return Err(e);
                    }
                }
            }
        }

        record_elapsed();
        Err(rejected.unwrap_or(Error::Timeout {
            target: Some(target),
            elapsed: started.elapsed(),
            request_id,
            retries: retry.max_attempts.saturating_sub(1),
        }))
    }
}

/// Tells the transport a call is finished, however the exchange ends.
struct ReleaseOnDrop<'a, T: Transport> {
    transport: &'a T,
    request_id: i32,
}

impl<T: Transport> Drop for ReleaseOnDrop<'_, T> {
    fn drop(&mut self) {
        self.transport.release(self.request_id);
    }
}

/// Accept only a Response of our version carrying `request_id`.
fn classify_community(
    data: Bytes,
    version: Version,
    request_id: i32,
    target: SocketAddr,
) -> Verdict<Pdu> {
    match Message::decode(data) {
        Ok(Message::Community(msg)) if msg.version != version => {
            Verdict::Ignore("version mismatch")
        }
        Ok(Message::Community(msg)) if msg.pdu.request_id != request_id => {
            Verdict::Ignore("stale request id")
        }
        Ok(Message::Community(msg)) if msg.pdu.pdu_type != PduType::Response => {
            Verdict::Ignore("not a Response PDU")
        }
        Ok(Message::Community(msg)) => Verdict::Done(msg.pdu),
        Ok(Message::V3(_)) => Verdict::Ignore("v3 message on community session"),
        Err(e) => Verdict::Reject(e.with_target(target)),
    }
}

/// Turn a non-zero error-status into [`Error::Remote`], pointing at the
/// request's OID.
fn check_status(request: &Pdu, response: Pdu, target: SocketAddr) -> Result<Pdu> {
    if !response.is_error() {
        return Ok(response);
    }
    let index = u32::try_from(response.error_index).unwrap_or(0);
    let oid = (index as usize)
        .checked_sub(1)
        .and_then(|i| request.varbinds.get(i))
        .map(|vb| vb.oid.clone());
    let status = response.error_status_enum();
    tracing::debug!(
        target: LOG_TARGET,
        { snmp.target = %target, %status, index },
        "agent reported error"
    );
    Err(Error::Remote {
        target: Some(target),
        status,
        index,
        oid,
    })
}
