//! SNMPv3 exchange: engine discovery, outgoing message security, and
//! processing of incoming messages.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError, RwLock};

use bytes::Bytes;

use super::Verdict;
use crate::ber::Decoder;
use crate::credential::UsmCredential;
use crate::error::{
    AuthErrorKind, CryptoErrorKind, EncodeErrorKind, Error, ErrorStatus, Result,
};
use crate::message::{
    DEFAULT_MSG_MAX_SIZE, Message, MsgFlags, MsgGlobalData, ScopedPdu, V3Message, V3MessageData,
};
use crate::pdu::{Pdu, PduType};
use crate::v3::auth::{authenticate_message, verify_message};
use crate::v3::{
    EngineCache, EngineState, LocalizedKey, MasterKeys, PrivKey, ReportKind, SaltCounter,
    UsmSecurityParams, parse_discovery_response,
};

const LOG_TARGET: &str = "snmp_query::session";

/// Keys localized to the discovered engine.
struct LocalKeys {
    auth: Option<LocalizedKey>,
    privacy: Option<PrivKey>,
}

/// Per-session USM state.
pub(crate) struct V3Security {
    credential: UsmCredential,
    master: Option<MasterKeys>,
    engine: RwLock<Option<(EngineState, Arc<LocalKeys>)>>,
    cache: Option<Arc<EngineCache>>,
    salt: SaltCounter,
}

impl std::fmt::Debug for V3Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V3Security")
            .field("credential", &self.credential)
            .field("discovered", &self.is_discovered())
            .finish()
    }
}

impl V3Security {
    /// Expands passwords into master keys up front; localization waits for
    /// discovery.
    pub(crate) fn new(credential: UsmCredential, cache: Option<Arc<EngineCache>>) -> Self {
        let master = credential.auth.as_ref().map(|(auth_protocol, auth_password)| {
            let keys = MasterKeys::new(*auth_protocol, auth_password);
            match &credential.privacy {
                Some((priv_protocol, priv_password)) => {
                    keys.with_privacy(*priv_protocol, priv_password)
                }
                None => keys,
            }
        });
        Self {
            credential,
            master,
            engine: RwLock::new(None),
            cache,
            salt: SaltCounter::new(),
        }
    }

    fn current(&self) -> Option<(EngineState, Arc<LocalKeys>)> {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn is_discovered(&self) -> bool {
        self.current().is_some()
    }

    pub(crate) fn engine(&self) -> Option<EngineState> {
        self.current().map(|(state, _)| state)
    }

    /// Adopt an engine from the shared cache, if it knows `target`.
    pub(crate) fn adopt_cached(&self, target: SocketAddr) -> bool {
        match self.cache.as_ref().and_then(|cache| cache.get(&target)) {
            Some(state) => {
                tracing::debug!(
                    target: LOG_TARGET,
                    { snmp.target = %target },
                    "using cached engine state"
                );
                self.install(state, target, false);
                true
            }
            None => false,
        }
    }

    /// Store discovered state, localize keys, and publish to the cache.
    pub(crate) fn install(&self, state: EngineState, target: SocketAddr, publish: bool) {
        let keys = match &self.master {
            Some(master) => {
                let (auth, privacy) = master.localize(&state.engine_id);
                LocalKeys {
                    auth: Some(auth),
                    privacy,
                }
            }
            None => LocalKeys {
                auth: None,
                privacy: None,
            },
        };
        if publish && let Some(cache) = &self.cache {
            cache.insert(target, state.clone());
        }
        *self.engine.write().unwrap_or_else(PoisonError::into_inner) =
            Some((state, Arc::new(keys)));
    }

    /// Forget the engine so the next call rediscovers it.
    fn forget(&self, target: SocketAddr) {
        *self.engine.write().unwrap_or_else(PoisonError::into_inner) = None;
        if let Some(cache) = &self.cache {
            cache.remove(&target);
        }
    }

    fn with_engine(&self, f: impl FnOnce(&mut EngineState)) {
        if let Some((state, _)) = self
            .engine
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .as_mut()
        {
            f(state);
        }
    }

    /// Encode `pdu` with the user's security level. Called once per attempt
    /// so every send carries a fresh engine time estimate.
    pub(crate) fn encode_request(&self, pdu: &Pdu) -> Result<Bytes> {
        let (engine, keys) = self
            .current()
            .ok_or_else(|| Error::encode(EncodeErrorKind::EngineNotDiscovered))?;
        let level = self.credential.security_level();
        let boots = engine.engine_boots;
        let time = engine.estimated_time();

        let scoped = ScopedPdu::new(
            engine.engine_id.clone(),
            self.credential.context_name.clone(),
            pdu.clone(),
        );
        let mut usm = UsmSecurityParams::new(
            engine.engine_id.clone(),
            boots,
            time,
            self.credential.username.clone(),
        );

        let data = if level.requires_priv() {
            let priv_key = keys
                .privacy
                .as_ref()
                .ok_or_else(|| Error::encode(EncodeErrorKind::NoPrivKey))?;
            let (ciphertext, priv_params) =
                priv_key.encrypt(&scoped.encode_to_bytes(), boots, time, self.salt.next())?;
            usm = usm.with_priv_params(priv_params);
            V3MessageData::Encrypted(ciphertext)
        } else {
            V3MessageData::Plaintext(scoped)
        };

        let auth_key = if level.requires_auth() {
            let key = keys
                .auth
                .as_ref()
                .ok_or_else(|| Error::encode(EncodeErrorKind::KeysNotDerived))?;
            usm = usm.with_auth_placeholder(key.mac_len());
            Some(key)
        } else {
            None
        };

        let msg = V3Message {
            global_data: MsgGlobalData::new(
                pdu.request_id,
                DEFAULT_MSG_MAX_SIZE,
                MsgFlags::new(level, true),
            ),
            security_params: usm.encode(),
            data,
        };
        let encoded = msg.encode();

        let Some(key) = auth_key else {
            return Ok(encoded);
        };
        let (offset, len) = UsmSecurityParams::find_auth_params_offset(&encoded)
            .ok_or_else(|| Error::encode(EncodeErrorKind::MissingAuthParams))?;
        let mut buf = encoded.to_vec();
        authenticate_message(key, &mut buf, offset, len)?;
        Ok(Bytes::from(buf))
    }

    /// Classify a datagram received while waiting for `request_id`.
    pub(crate) fn classify_response(
        &self,
        data: Bytes,
        request_id: i32,
        target: SocketAddr,
    ) -> Verdict<Pdu> {
        let msg = match Message::decode(data.clone()) {
            Ok(Message::V3(msg)) => msg,
            Ok(Message::Community(_)) => return Verdict::Ignore("community message on v3 session"),
            Err(e) => return Verdict::Reject(e.with_target(target)),
        };
        if msg.msg_id() != request_id {
            return Verdict::Ignore("msgID does not match");
        }
        let usm = match UsmSecurityParams::decode(msg.security_params.clone()) {
            Ok(usm) => usm,
            Err(e) => return Verdict::Reject(e.with_target(target)),
        };
        let Some((engine, keys)) = self.current() else {
            return Verdict::Ignore("engine state was reset");
        };

        let authenticated = msg.security_level().requires_auth();
        if authenticated {
            let Some(key) = keys.auth.as_ref() else {
                return Verdict::Reject(Error::auth(Some(target), AuthErrorKind::NoAuthKey));
            };
            let verified = UsmSecurityParams::find_auth_params_offset(&data)
                .is_some_and(|(offset, len)| verify_message(key, &data, offset, len));
            if !verified {
                return Verdict::Reject(Error::auth(Some(target), AuthErrorKind::HmacMismatch));
            }
            tracing::trace!(target: LOG_TARGET, "response HMAC verified");
            if !engine.is_in_time_window(usm.engine_boots, usm.engine_time) {
                tracing::debug!(
                    target: LOG_TARGET,
                    {
                        snmp.target = %target,
                        snmp.engine_boots = usm.engine_boots,
                        snmp.engine_time = usm.engine_time,
                    },
                    "authenticated message outside the time window"
                );
                return Verdict::Reject(Error::NotInTimeWindow {
                    target: Some(target),
                });
            }
        }

        // Only unknownEngineID Reports may arrive without auth on an auth session.
        if self.credential.security_level().requires_auth() && !authenticated {
            return match &msg.data {
                V3MessageData::Plaintext(scoped)
                    if ReportKind::of(&scoped.pdu) == Some(ReportKind::UnknownEngineId) =>
                {
                    self.handle_report(ReportKind::UnknownEngineId, &scoped.pdu, &usm, target)
                }
                _ => Verdict::Reject(Error::auth(Some(target), AuthErrorKind::Unauthenticated)),
            };
        }

        let scoped = match msg.data {
            V3MessageData::Plaintext(scoped) => scoped,
            V3MessageData::Encrypted(ciphertext) => {
                let Some(priv_key) = keys.privacy.as_ref() else {
                    return Verdict::Reject(Error::decrypt(
                        Some(target),
                        CryptoErrorKind::NoPrivKey,
                    ));
                };
                let decoded = priv_key
                    .decrypt(&ciphertext, usm.engine_boots, usm.engine_time, &usm.priv_params)
                    .and_then(|plain| {
                        let mut decoder = Decoder::new(plain);
                        ScopedPdu::decode(&mut decoder)
                    });
                match decoded {
                    Ok(scoped) => scoped,
                    Err(e) => return Verdict::Reject(e.with_target(target)),
                }
            }
        };

        if let Some(kind) = ReportKind::of(&scoped.pdu) {
            return self.handle_report(kind, &scoped.pdu, &usm, target);
        }

        if scoped.pdu.pdu_type != PduType::Response || scoped.pdu.request_id != request_id {
            return Verdict::Ignore("not the awaited response");
        }
        if authenticated {
            self.with_engine(|state| {
                state.update_time(usm.engine_boots, usm.engine_time);
            });
        }
        Verdict::Done(scoped.pdu)
    }

    fn handle_report(
        &self,
        kind: ReportKind,
        report: &Pdu,
        usm: &UsmSecurityParams,
        target: SocketAddr,
    ) -> Verdict<Pdu> {
        tracing::debug!(
            target: LOG_TARGET,
            { snmp.target = %target, snmp.report = ?kind },
            "received Report"
        );
        match kind {
            ReportKind::NotInTimeWindow => {
                self.with_engine(|state| state.resync(usm.engine_boots, usm.engine_time));
                Verdict::Resend(Error::NotInTimeWindow {
                    target: Some(target),
                })
            }
            ReportKind::UnknownEngineId => {
                self.forget(target);
                Verdict::Fail(Error::UnknownEngineId {
                    target: Some(target),
                })
            }
            _ => Verdict::Fail(Error::Remote {
                target: Some(target),
                status: ErrorStatus::GenErr,
                index: 0,
                oid: report.varbinds.first().map(|vb| vb.oid.clone()),
            }),
        }
    }
}

/// Classify a reply to a discovery request sent with `msg_id`.
pub(crate) fn classify_discovery(
    data: Bytes,
    msg_id: i32,
    target: SocketAddr,
) -> Verdict<EngineState> {
    let msg = match Message::decode(data) {
        Ok(Message::V3(msg)) => msg,
        Ok(Message::Community(_)) => return Verdict::Ignore("community message on v3 session"),
        Err(e) => return Verdict::Reject(e.with_target(target)),
    };
    if msg.msg_id() != msg_id {
        return Verdict::Ignore("msgID does not match");
    }
    match parse_discovery_response(&msg.security_params, msg.global_data.msg_max_size) {
        Ok(state) => Verdict::Done(state),
        Err(e) => Verdict::Reject(e.with_target(target)),
    }
}

/// Encoded discovery request.
pub(crate) fn discovery_request(msg_id: i32) -> Bytes {
    V3Message::discovery_request(msg_id).encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{Credential, CredentialParams};
    use crate::message::SecurityLevel;
    use crate::oid;
    use crate::v3::{AuthProtocol, PrivProtocol};
    use crate::value::Value;
    use crate::varbind::VarBind;
    use crate::version::Version;

    const ENGINE_ID: &[u8] = b"\x80\x00\x1f\x88\x80test-engine";

    fn target() -> SocketAddr {
        "192.0.2.10:161".parse().unwrap()
    }

    fn security(params: CredentialParams) -> V3Security {
        let Credential::Usm(usm) = Credential::build(Version::V3, params).unwrap() else {
            unreachable!()
        };
        let security = V3Security::new(usm, None);
        security.install(
            EngineState::new(Bytes::from_static(ENGINE_ID), 3, 1000),
            target(),
            true,
        );
        security
    }

    fn auth_priv() -> V3Security {
        security(
            CredentialParams::usm("admin")
                .auth(AuthProtocol::Sha256, "authpassword")
                .privacy(PrivProtocol::Aes128, "privpassword"),
        )
    }

    /// Turn a request into the agent's answer, secured with the same keys.
    fn answer(security: &V3Security, request: &Bytes, value: Value) -> Bytes {
        let Ok(Message::V3(msg)) = Message::decode(request.clone()) else {
            panic!("not a v3 message");
        };
        let V3MessageData::Encrypted(ciphertext) = msg.data else {
            panic!("request was not encrypted");
        };
        let usm = UsmSecurityParams::decode(msg.security_params.clone()).unwrap();
        let (_, keys) = security.current().unwrap();
        let plain = keys
            .privacy
            .as_ref()
            .unwrap()
            .decrypt(&ciphertext, usm.engine_boots, usm.engine_time, &usm.priv_params)
            .unwrap();
        let scoped = ScopedPdu::decode(&mut Decoder::new(plain)).unwrap();
        let oid = scoped.pdu.varbinds[0].oid.clone();
        let response = Pdu::response(scoped.pdu.request_id, vec![VarBind::new(oid, value)]);
        security.encode_request(&response).unwrap()
    }

    #[test]
    fn auth_priv_request_round_trips() {
        let security = auth_priv();
        let request = security
            .encode_request(&Pdu::get_request(42, &[oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)]))
            .unwrap();
        let reply = answer(&security, &request, Value::OctetString(Bytes::from_static(b"core-sw")));

        match security.classify_response(reply, 42, target()) {
            Verdict::Done(pdu) => {
                assert_eq!(pdu.request_id, 42);
                assert_eq!(pdu.varbinds[0].value.as_str(), Some("core-sw"));
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }

    #[test]
    fn tampered_response_is_rejected() {
        let security = auth_priv();
        let request = security
            .encode_request(&Pdu::get_request(7, &[oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)]))
            .unwrap();
        let mut reply = answer(&security, &request, Value::Integer(1)).to_vec();
        let last = reply.len() - 1;
        reply[last] ^= 0xFF;

        assert!(matches!(
            security.classify_response(Bytes::from(reply), 7, target()),
            Verdict::Reject(Error::AuthenticationFailed {
                kind: AuthErrorKind::HmacMismatch,
                ..
            })
        ));
    }

    #[test]
    fn other_msg_id_is_ignored() {
        let security = auth_priv();
        let request = security
            .encode_request(&Pdu::get_request(8, &[oid!(1, 3, 6, 1)]))
            .unwrap();
        let reply = answer(&security, &request, Value::Integer(1));
        assert!(matches!(
            security.classify_response(reply, 9, target()),
            Verdict::Ignore(_)
        ));
    }

    #[test]
    fn no_auth_messages_are_plaintext() {
        let security = security(CredentialParams::usm("public-user"));
        let request = security.encode_request(&Pdu::get_request(1, &[])).unwrap();
        let Ok(Message::V3(msg)) = Message::decode(request) else {
            panic!("not v3");
        };
        assert!(matches!(msg.data, V3MessageData::Plaintext(_)));
        let usm = UsmSecurityParams::decode(msg.security_params).unwrap();
        assert!(usm.auth_params.is_empty());
        assert_eq!(&usm.engine_id[..], ENGINE_ID);
    }

    #[test]
    fn discovery_reply_yields_engine_state() {
        let report = V3Message::new(
            MsgGlobalData::new(77, 1472, MsgFlags::new(SecurityLevel::NoAuthNoPriv, false)),
            UsmSecurityParams::new(Bytes::from_static(ENGINE_ID), 9, 500, Bytes::new()).encode(),
            ScopedPdu::with_empty_context(Pdu {
                pdu_type: PduType::Report,
                ..Pdu::response(77, vec![VarBind::new(
                    crate::v3::report_oids::unknown_engine_ids(),
                    Value::Counter32(1),
                )])
            }),
        )
        .encode();

        match classify_discovery(report.clone(), 77, target()) {
            Verdict::Done(state) => {
                assert_eq!(&state.engine_id[..], ENGINE_ID);
                assert_eq!((state.engine_boots, state.engine_time), (9, 500));
                assert_eq!(state.msg_max_size, 1472);
            }
            other => panic!("unexpected verdict {other:?}"),
        }
        assert!(matches!(classify_discovery(report, 78, target()), Verdict::Ignore(_)));
    }

    #[test]
    fn unknown_engine_report_forgets_engine() {
        let security = security(CredentialParams::usm("user"));
        let report = V3Message::new(
            MsgGlobalData::new(5, 65507, MsgFlags::new(SecurityLevel::NoAuthNoPriv, false)),
            UsmSecurityParams::new(Bytes::from_static(b"other-engine"), 1, 1, Bytes::new())
                .encode(),
            ScopedPdu::with_empty_context(Pdu {
                pdu_type: PduType::Report,
                ..Pdu::response(5, vec![VarBind::new(
                    crate::v3::report_oids::unknown_engine_ids(),
                    Value::Counter32(3),
                )])
            }),
        )
        .encode();

        assert!(matches!(
            security.classify_response(report, 5, target()),
            Verdict::Fail(Error::UnknownEngineId { .. })
        ));
        assert!(!security.is_discovered());
    }

    fn plaintext_report(msg_id: i32, boots: u32, time: u32, counter: crate::oid::Oid) -> Bytes {
        V3Message::new(
            MsgGlobalData::new(msg_id, 65507, MsgFlags::new(SecurityLevel::NoAuthNoPriv, false)),
            UsmSecurityParams::new(Bytes::from_static(ENGINE_ID), boots, time, Bytes::new())
                .encode(),
            ScopedPdu::with_empty_context(Pdu {
                pdu_type: PduType::Report,
                ..Pdu::response(msg_id, vec![VarBind::new(counter, Value::Counter32(1))])
            }),
        )
        .encode()
    }

    #[test]
    fn unauthenticated_time_report_cannot_move_the_clock() {
        let security = auth_priv();
        let counter = crate::v3::report_oids::not_in_time_windows();
        let report = plaintext_report(11, 999_999, 1, counter);

        assert!(matches!(
            security.classify_response(report, 11, target()),
            Verdict::Reject(Error::AuthenticationFailed {
                kind: AuthErrorKind::Unauthenticated,
                ..
            })
        ));
        let engine = security.engine().unwrap();
        assert_eq!((engine.engine_boots, engine.engine_time), (3, 1000));
    }

    #[test]
    fn unauthenticated_unknown_engine_report_is_honored() {
        let security = auth_priv();
        let report = plaintext_report(12, 1, 1, crate::v3::report_oids::unknown_engine_ids());

        assert!(matches!(
            security.classify_response(report, 12, target()),
            Verdict::Fail(Error::UnknownEngineId { .. })
        ));
        assert!(!security.is_discovered());
    }

    #[test]
    fn unauthenticated_response_is_rejected_on_auth_session() {
        let security = auth_priv();
        let reply = V3Message::new(
            MsgGlobalData::new(13, 65507, MsgFlags::new(SecurityLevel::NoAuthNoPriv, false)),
            UsmSecurityParams::new(Bytes::from_static(ENGINE_ID), 3, 1000, Bytes::new()).encode(),
            ScopedPdu::with_empty_context(Pdu::response(13, vec![VarBind::new(
                oid!(1, 3, 6, 1, 2, 1, 1, 5, 0),
                Value::Integer(1),
            )])),
        )
        .encode();

        assert!(matches!(
            security.classify_response(reply, 13, target()),
            Verdict::Reject(Error::AuthenticationFailed {
                kind: AuthErrorKind::Unauthenticated,
                ..
            })
        ));
    }

    #[test]
    fn stale_authenticated_response_is_rejected() {
        let security = auth_priv();
        let request = security
            .encode_request(&Pdu::get_request(21, &[oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)]))
            .unwrap();
        let reply = answer(&security, &request, Value::Integer(1));

        security.with_engine(|state| {
            state.update_time(3, 1000 + crate::v3::TIME_WINDOW + 60);
        });
        assert!(matches!(
            security.classify_response(reply, 21, target()),
            Verdict::Reject(Error::NotInTimeWindow { .. })
        ));
    }
}
