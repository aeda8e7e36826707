//! In-process SNMP agent on a loopback UDP socket.
//!
//! Serves a fixed MIB over v1, v2c and v3 (one USM user). Knobs let tests
//! drop requests, send a stale response ahead of the real one, or answer
//! the first secured request with a notInTimeWindow report.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use snmp_query::ber::Decoder;
use snmp_query::message::{
    CommunityMessage, DEFAULT_MSG_MAX_SIZE, Message, MsgFlags, MsgGlobalData, ScopedPdu,
    SecurityLevel, V3Message, V3MessageData,
};
use snmp_query::transport::extract_request_id;
use snmp_query::v3::auth::{authenticate_message, verify_message};
use snmp_query::v3::{
    AuthProtocol, LocalizedKey, MasterKeys, PrivKey, PrivProtocol, SaltCounter, UsmSecurityParams,
    report_oids,
};
use snmp_query::{ErrorStatus, Oid, Pdu, PduType, Value, VarBind, Version};

use super::fixtures::{COMMUNITY, standard_mib};

pub const ENGINE_ID: &[u8] = b"\x80\x00\x1f\x88\x80fake-agent";
pub const ENGINE_BOOTS: u32 = 7;
const ENGINE_TIME_BASE: u32 = 10_000;

struct UsmUser {
    username: Bytes,
    auth: Option<LocalizedKey>,
    privacy: Option<PrivKey>,
}

struct AgentState {
    mib: BTreeMap<Oid, Value>,
    community: Bytes,
    user: Option<UsmUser>,
    started: Instant,
    salt: SaltCounter,
    drop_next: AtomicUsize,
    stale_first: AtomicBool,
    time_window_report: AtomicBool,
    received: Mutex<Vec<Bytes>>,
}

pub struct FakeAgentBuilder {
    mib: Vec<(Oid, Value)>,
    community: String,
    username: Option<String>,
    auth: Option<(AuthProtocol, String)>,
    privacy: Option<(PrivProtocol, String)>,
}

impl FakeAgentBuilder {
    pub fn object(mut self, oid: Oid, value: Value) -> Self {
        self.mib.push((oid, value));
        self
    }

    pub fn community(mut self, community: &str) -> Self {
        self.community = community.to_owned();
        self
    }

    pub fn user(mut self, username: &str) -> Self {
        self.username = Some(username.to_owned());
        self
    }

    pub fn auth(mut self, protocol: AuthProtocol, password: &str) -> Self {
        self.auth = Some((protocol, password.to_owned()));
        self
    }

    pub fn privacy(mut self, protocol: PrivProtocol, password: &str) -> Self {
        self.privacy = Some((protocol, password.to_owned()));
        self
    }

    pub async fn start(self) -> FakeAgent {
        let user = self.username.map(|username| {
            let (auth, privacy) = match &self.auth {
                Some((protocol, password)) => {
                    let mut master = MasterKeys::new(*protocol, password.as_bytes());
                    if let Some((priv_protocol, priv_password)) = &self.privacy {
                        master = master.with_privacy(*priv_protocol, priv_password.as_bytes());
                    }
                    let (auth, privacy) = master.localize(ENGINE_ID);
                    (Some(auth), privacy)
                }
                None => (None, None),
            };
            UsmUser {
                username: Bytes::from(username),
                auth,
                privacy,
            }
        });

        let state = Arc::new(AgentState {
            mib: self.mib.into_iter().collect(),
            community: Bytes::from(self.community),
            user,
            started: Instant::now(),
            salt: SaltCounter::new(),
            drop_next: AtomicUsize::new(0),
            stale_first: AtomicBool::new(false),
            time_window_report: AtomicBool::new(false),
            received: Mutex::new(Vec::new()),
        });

        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let task = tokio::spawn(serve(socket, Arc::clone(&state)));
        FakeAgent { addr, state, task }
    }
}

pub struct FakeAgent {
    addr: SocketAddr,
    state: Arc<AgentState>,
    task: JoinHandle<()>,
}

impl FakeAgent {
    /// Agent serving [`standard_mib`] to community `public`.
    pub fn builder() -> FakeAgentBuilder {
        FakeAgentBuilder {
            mib: standard_mib(),
            community: COMMUNITY.to_owned(),
            username: None,
            auth: None,
            privacy: None,
        }
    }

    pub async fn start() -> Self {
        Self::builder().start().await
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Target string for `Session::builder`.
    pub fn target(&self) -> String {
        self.addr.to_string()
    }

    /// Silently discard the next `count` datagrams.
    pub fn drop_next(&self, count: usize) {
        self.state.drop_next.store(count, Ordering::SeqCst);
    }

    /// Precede the next response with one carrying another request-id.
    pub fn send_stale_first(&self) {
        self.state.stale_first.store(true, Ordering::SeqCst);
    }

    /// Answer the next secured request with a notInTimeWindow report.
    pub fn report_not_in_time_window(&self) {
        self.state.time_window_report.store(true, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.state.received.lock().unwrap().clone()
    }

    /// Request-ids (msgIDs for v3) of every datagram received.
    pub fn request_ids(&self) -> Vec<i32> {
        self.received()
            .iter()
            .filter_map(|data| extract_request_id(data))
            .collect()
    }
}

impl Drop for FakeAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(socket: UdpSocket, state: Arc<AgentState>) {
    let mut buf = vec![0u8; 65535];
    loop {
        let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
            continue;
        };
        let data = Bytes::copy_from_slice(&buf[..len]);
        state.received.lock().unwrap().push(data.clone());

        if state
            .drop_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            continue;
        }
        for reply in state.handle(data) {
            let _ = socket.send_to(&reply, peer).await;
        }
    }
}

impl AgentState {
    fn engine_time(&self) -> u32 {
        ENGINE_TIME_BASE + self.started.elapsed().as_secs() as u32
    }

    fn handle(&self, data: Bytes) -> Vec<Bytes> {
        match Message::decode(data.clone()) {
            Ok(Message::Community(msg)) => self.handle_community(msg),
            Ok(Message::V3(msg)) => self.handle_v3(&data, msg),
            Err(_) => Vec::new(),
        }
    }

    fn handle_community(&self, msg: CommunityMessage) -> Vec<Bytes> {
        if msg.community != self.community {
            return Vec::new();
        }
        let response = self.respond(&msg.pdu, msg.version);
        let mut replies = Vec::new();
        if self.stale_first.swap(false, Ordering::SeqCst) {
            let stale = Pdu::response(
                response.request_id.wrapping_add(1000),
                response
                    .varbinds
                    .iter()
                    .map(|vb| VarBind::new(vb.oid.clone(), Value::OctetString("stale".into())))
                    .collect(),
            );
            replies.push(
                CommunityMessage {
                    version: msg.version,
                    community: msg.community.clone(),
                    pdu: stale,
                }
                .encode(),
            );
        }
        replies.push(
            CommunityMessage {
                version: msg.version,
                community: msg.community,
                pdu: response,
            }
            .encode(),
        );
        replies
    }

    fn next_after(&self, oid: &Oid) -> Option<(&Oid, &Value)> {
        self.mib
            .range((Bound::Excluded(oid), Bound::Unbounded))
            .next()
    }

    fn next_or_end(&self, oid: &Oid) -> VarBind {
        match self.next_after(oid) {
            Some((next, value)) => VarBind::new(next.clone(), value.clone()),
            None => VarBind::new(oid.clone(), Value::EndOfMibView),
        }
    }

    fn respond(&self, request: &Pdu, version: Version) -> Pdu {
        let v1 = version == Version::V1;
        let fail = |status: ErrorStatus, index: usize| {
            Pdu::response(request.request_id, request.varbinds.clone())
                .with_error(status, index as i32)
        };

        let mut varbinds = Vec::with_capacity(request.varbinds.len());
        match request.pdu_type {
            PduType::GetRequest => {
                for (i, vb) in request.varbinds.iter().enumerate() {
                    match self.mib.get(&vb.oid) {
                        Some(value) => varbinds.push(VarBind::new(vb.oid.clone(), value.clone())),
                        None if v1 => return fail(ErrorStatus::NoSuchName, i + 1),
                        None => varbinds.push(VarBind::new(vb.oid.clone(), Value::NoSuchObject)),
                    }
                }
            }
            PduType::GetNextRequest => {
                for (i, vb) in request.varbinds.iter().enumerate() {
                    match self.next_after(&vb.oid) {
                        Some((next, value)) => {
                            varbinds.push(VarBind::new(next.clone(), value.clone()))
                        }
                        None if v1 => return fail(ErrorStatus::NoSuchName, i + 1),
                        None => varbinds.push(VarBind::new(vb.oid.clone(), Value::EndOfMibView)),
                    }
                }
            }
            PduType::GetBulkRequest if !v1 => {
                let non_repeaters =
                    (request.error_status.max(0) as usize).min(request.varbinds.len());
                let max_repetitions = request.error_index.max(0) as usize;
                let (fixed, repeating) = request.varbinds.split_at(non_repeaters);
                varbinds.extend(fixed.iter().map(|vb| self.next_or_end(&vb.oid)));
                let mut cursors: Vec<Oid> = repeating.iter().map(|vb| vb.oid.clone()).collect();
                for _ in 0..max_repetitions {
                    for cursor in &mut cursors {
                        let vb = self.next_or_end(cursor);
                        *cursor = vb.oid.clone();
                        varbinds.push(vb);
                    }
                }
            }
            _ => return fail(ErrorStatus::GenErr, 0),
        }
        Pdu::response(request.request_id, varbinds)
    }

    fn handle_v3(&self, raw: &Bytes, msg: V3Message) -> Vec<Bytes> {
        let Some(user) = &self.user else {
            return Vec::new();
        };
        let Ok(usm) = UsmSecurityParams::decode(msg.security_params.clone()) else {
            return Vec::new();
        };
        let msg_id = msg.msg_id();
        let level = msg.security_level();

        if usm.engine_id.is_empty() {
            let request_id = msg.pdu().map_or(msg_id, |pdu| pdu.request_id);
            return vec![self.report(
                msg_id,
                request_id,
                report_oids::unknown_engine_ids(),
                SecurityLevel::NoAuthNoPriv,
                None,
            )];
        }
        if usm.username != user.username || usm.engine_id[..] != *ENGINE_ID {
            return Vec::new();
        }
        if let Some(key) = &user.auth {
            let verified = UsmSecurityParams::find_auth_params_offset(raw)
                .is_some_and(|(offset, len)| verify_message(key, raw, offset, len));
            if !verified {
                return Vec::new();
            }
        }

        let scoped = match msg.data {
            V3MessageData::Plaintext(scoped) => scoped,
            V3MessageData::Encrypted(ciphertext) => {
                let Some(privacy) = &user.privacy else {
                    return Vec::new();
                };
                let Ok(plain) = privacy.decrypt(
                    &ciphertext,
                    usm.engine_boots,
                    usm.engine_time,
                    &usm.priv_params,
                ) else {
                    return Vec::new();
                };
                let Ok(scoped) = ScopedPdu::decode(&mut Decoder::new(plain)) else {
                    return Vec::new();
                };
                scoped
            }
        };

        if level.requires_auth() && self.time_window_report.swap(false, Ordering::SeqCst) {
            return vec![self.report(
                msg_id,
                scoped.pdu.request_id,
                report_oids::not_in_time_windows(),
                SecurityLevel::AuthNoPriv,
                user.auth.as_ref(),
            )];
        }

        let response = self.respond(&scoped.pdu, Version::V3);
        vec![self.secure(user, msg_id, level, response)]
    }

    fn report(
        &self,
        msg_id: i32,
        request_id: i32,
        counter: Oid,
        level: SecurityLevel,
        auth: Option<&LocalizedKey>,
    ) -> Bytes {
        let pdu = Pdu {
            pdu_type: PduType::Report,
            ..Pdu::response(request_id, vec![VarBind::new(counter, Value::Counter32(1))])
        };
        let username = match (auth, &self.user) {
            (Some(_), Some(user)) => user.username.clone(),
            _ => Bytes::new(),
        };
        let mut params = UsmSecurityParams::new(
            Bytes::from_static(ENGINE_ID),
            ENGINE_BOOTS,
            self.engine_time(),
            username,
        );
        if let Some(key) = auth {
            params = params.with_auth_placeholder(key.mac_len());
        }
        let encoded = V3Message::new(
            MsgGlobalData::new(msg_id, DEFAULT_MSG_MAX_SIZE, MsgFlags::new(level, false)),
            params.encode(),
            ScopedPdu::new(Bytes::from_static(ENGINE_ID), Bytes::new(), pdu),
        )
        .encode();
        match auth {
            Some(key) => sign(key, encoded),
            None => encoded,
        }
    }

    fn secure(&self, user: &UsmUser, msg_id: i32, level: SecurityLevel, response: Pdu) -> Bytes {
        let time = self.engine_time();
        let scoped = ScopedPdu::new(Bytes::from_static(ENGINE_ID), Bytes::new(), response);
        let mut params = UsmSecurityParams::new(
            Bytes::from_static(ENGINE_ID),
            ENGINE_BOOTS,
            time,
            user.username.clone(),
        );
        let global = MsgGlobalData::new(msg_id, DEFAULT_MSG_MAX_SIZE, MsgFlags::new(level, false));
        let auth = user.auth.as_ref().filter(|_| level.requires_auth());
        if let Some(key) = auth {
            params = params.with_auth_placeholder(key.mac_len());
        }

        let message = match user.privacy.as_ref().filter(|_| level.requires_priv()) {
            Some(privacy) => {
                let (ciphertext, priv_params) = privacy
                    .encrypt(&scoped.encode_to_bytes(), ENGINE_BOOTS, time, self.salt.next())
                    .unwrap();
                params = params.with_priv_params(priv_params);
                V3Message::new_encrypted(global, params.encode(), ciphertext)
            }
            None => V3Message::new(global, params.encode(), scoped),
        };

        match auth {
            Some(key) => sign(key, message.encode()),
            None => message.encode(),
        }
    }
}

fn sign(key: &LocalizedKey, encoded: Bytes) -> Bytes {
    let (offset, len) = UsmSecurityParams::find_auth_params_offset(&encoded).unwrap();
    let mut buf = encoded.to_vec();
    authenticate_message(key, &mut buf, offset, len).unwrap();
    Bytes::from(buf)
}
