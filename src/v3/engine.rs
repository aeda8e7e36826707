//! Authoritative engine state: discovery, time tracking, Report classification.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use bytes::Bytes;
use tokio::time::Instant;

use super::UsmSecurityParams;
use crate::error::{DecodeErrorKind, Error, Result};
use crate::oid::Oid;
use crate::pdu::{Pdu, PduType};

/// Allowed skew between our estimate and the engine's clock, in seconds.
pub const TIME_WINDOW: u32 = 150;

/// Largest snmpEngineTime / snmpEngineBoots value.
pub const MAX_ENGINE_TIME: u32 = 2_147_483_647;

/// usmStats counters carried in Report PDUs (RFC 3414 section 5).
pub mod report_oids {
    use crate::oid;
    use crate::oid::Oid;

    pub fn unsupported_sec_levels() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 1, 0)
    }

    pub fn not_in_time_windows() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 2, 0)
    }

    pub fn unknown_user_names() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 3, 0)
    }

    pub fn unknown_engine_ids() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 4, 0)
    }

    pub fn wrong_digests() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 5, 0)
    }

    pub fn decryption_errors() -> Oid {
        oid!(1, 3, 6, 1, 6, 3, 15, 1, 1, 6, 0)
    }
}

/// What a Report PDU is complaining about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    UnsupportedSecLevel,
    NotInTimeWindow,
    UnknownUserName,
    UnknownEngineId,
    WrongDigest,
    DecryptionError,
    Other,
}

impl ReportKind {
    /// Classify by the first usmStats binding. `None` if `pdu` is not a Report.
    pub fn of(pdu: &Pdu) -> Option<Self> {
        if pdu.pdu_type != PduType::Report {
            return None;
        }
        let table: [(Oid, ReportKind); 6] = [
            (report_oids::unsupported_sec_levels(), Self::UnsupportedSecLevel),
            (report_oids::not_in_time_windows(), Self::NotInTimeWindow),
            (report_oids::unknown_user_names(), Self::UnknownUserName),
            (report_oids::unknown_engine_ids(), Self::UnknownEngineId),
            (report_oids::wrong_digests(), Self::WrongDigest),
            (report_oids::decryption_errors(), Self::DecryptionError),
        ];
        let kind = pdu
            .varbinds
            .iter()
            .find_map(|vb| table.iter().find(|(oid, _)| *oid == vb.oid).map(|(_, kind)| *kind))
            .unwrap_or(Self::Other);
        Some(kind)
    }
}

/// Discovered engine parameters plus a local clock anchor.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub engine_id: Bytes,
    pub engine_boots: u32,
    pub engine_time: u32,
    /// When `engine_time` was last synchronized.
    pub synced_at: Instant,
    /// Highest engine time seen in the current boot cycle.
    pub latest_received_engine_time: u32,
    pub msg_max_size: u32,
}

impl EngineState {
    pub fn new(engine_id: Bytes, engine_boots: u32, engine_time: u32) -> Self {
        Self {
            engine_id,
            engine_boots,
            engine_time,
            synced_at: Instant::now(),
            latest_received_engine_time: engine_time,
            msg_max_size: crate::message::DEFAULT_MSG_MAX_SIZE as u32,
        }
    }

    /// Engine time now, extrapolated from the last sync.
    pub fn estimated_time(&self) -> u32 {
        let elapsed = u32::try_from(self.synced_at.elapsed().as_secs()).unwrap_or(u32::MAX);
        self.engine_time.saturating_add(elapsed).min(MAX_ENGINE_TIME)
    }

    /// Accept a newer (boots, time) pair. Older values are ignored so a
    /// replayed message cannot move the clock backwards.
    pub fn update_time(&mut self, boots: u32, time: u32) -> bool {
        let newer = boots > self.engine_boots
            || (boots == self.engine_boots && time > self.latest_received_engine_time);
        if newer {
            self.engine_boots = boots;
            self.engine_time = time;
            self.synced_at = Instant::now();
            self.latest_received_engine_time = time;
        }
        newer
    }

    /// Force a resync after a notInTimeWindow Report.
    pub fn resync(&mut self, boots: u32, time: u32) {
        self.engine_boots = boots;
        self.engine_time = time;
        self.synced_at = Instant::now();
        self.latest_received_engine_time = time;
    }

    /// RFC 3414 section 3.2 step 7b, from the manager's side: an
    /// authenticated message is stale when it carries an older boot count,
    /// or an engine time more than [`TIME_WINDOW`] seconds behind the latest
    /// one received.
    pub fn is_in_time_window(&self, msg_boots: u32, msg_time: u32) -> bool {
        if msg_boots == MAX_ENGINE_TIME {
            return false;
        }
        match msg_boots.cmp(&self.engine_boots) {
            Ordering::Less => false,
            Ordering::Greater => true,
            Ordering::Equal => {
                msg_time.saturating_add(TIME_WINDOW) >= self.latest_received_engine_time
            }
        }
    }
}

/// Engine state shared across sessions, keyed by target address.
#[derive(Debug, Default)]
pub struct EngineCache {
    engines: RwLock<HashMap<SocketAddr, EngineState>>,
}

impl EngineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, target: &SocketAddr) -> Option<EngineState> {
        self.engines.read().ok()?.get(target).cloned()
    }

    pub fn insert(&self, target: SocketAddr, state: EngineState) {
        if let Ok(mut engines) = self.engines.write() {
            engines.insert(target, state);
        }
    }

    pub fn remove(&self, target: &SocketAddr) -> Option<EngineState> {
        self.engines.write().ok()?.remove(target)
    }

    pub fn len(&self) -> usize {
        self.engines.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Build engine state from the security parameters of a discovery Report.
pub fn parse_discovery_response(security_params: &Bytes, msg_max_size: i32) -> Result<EngineState> {
    let usm = UsmSecurityParams::decode(security_params.clone())?;
    if usm.engine_id.is_empty() {
        tracing::debug!(target: "snmp_query::v3", "discovery response carried an empty engine ID");
        return Err(Error::malformed(0, DecodeErrorKind::EmptyEngineId));
    }
    let mut state = EngineState::new(usm.engine_id, usm.engine_boots, usm.engine_time);
    state.msg_max_size = u32::try_from(msg_max_size)
        .unwrap_or(0)
        .min(crate::message::DEFAULT_MSG_MAX_SIZE as u32);
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use crate::varbind::VarBind;
    use std::time::Duration;

    fn state() -> EngineState {
        EngineState::new(Bytes::from_static(b"engine"), 1, 1000)
    }

    #[test]
    fn update_time_ignores_replays() {
        let mut s = state();
        assert!(s.update_time(1, 1100));
        assert!(!s.update_time(1, 1050));
        assert!(!s.update_time(1, 1100));
        assert!(!s.update_time(0, 9999));
        assert_eq!(s.latest_received_engine_time, 1100);

        assert!(s.update_time(2, 5));
        assert_eq!((s.engine_boots, s.engine_time), (2, 5));
    }

    #[tokio::test(start_paused = true)]
    async fn estimated_time_advances_with_clock() {
        let s = state();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(s.estimated_time(), 1030);
    }

    #[test]
    fn time_window_rejects_old_messages() {
        let mut s = state();
        s.update_time(1, 1200);
        assert!(s.is_in_time_window(1, 1200));
        assert!(s.is_in_time_window(1, 1200 - TIME_WINDOW));
        assert!(!s.is_in_time_window(1, 1200 - TIME_WINDOW - 1));
        assert!(s.is_in_time_window(2, 0));
        assert!(!s.is_in_time_window(0, 5000));
        assert!(!s.is_in_time_window(MAX_ENGINE_TIME, 1200));
    }

    #[test]
    fn report_classification() {
        let report = |oid: Oid| Pdu {
            pdu_type: PduType::Report,
            ..Pdu::response(1, vec![VarBind::new(oid, Value::Counter32(1))])
        };
        assert_eq!(
            ReportKind::of(&report(report_oids::not_in_time_windows())),
            Some(ReportKind::NotInTimeWindow)
        );
        assert_eq!(
            ReportKind::of(&report(report_oids::unknown_engine_ids())),
            Some(ReportKind::UnknownEngineId)
        );
        assert_eq!(
            ReportKind::of(&report(crate::oid!(1, 3, 6, 1, 6, 3, 11, 2, 1, 3, 0))),
            Some(ReportKind::Other)
        );
        assert_eq!(ReportKind::of(&Pdu::response(1, vec![])), None);
    }

    #[test]
    fn discovery_requires_engine_id() {
        let engine_id = Bytes::from_static(b"\x80\x00\x1f\x88\x04x");
        let params = UsmSecurityParams::new(engine_id, 7, 42, Bytes::new());
        let s = parse_discovery_response(&params.encode(), 1500).unwrap();
        assert_eq!((s.engine_boots, s.engine_time, s.msg_max_size), (7, 42, 1500));

        let empty = UsmSecurityParams::empty().encode();
        assert!(parse_discovery_response(&empty, 1500).is_err());
    }

    #[test]
    fn cache_is_keyed_by_target() {
        let cache = EngineCache::new();
        let a: SocketAddr = "192.0.2.1:161".parse().unwrap();
        cache.insert(a, state());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&"192.0.2.2:161".parse().unwrap()).is_none());
        assert_eq!(cache.remove(&a).map(|s| s.engine_boots), Some(1));
        assert!(cache.is_empty());
    }
}
