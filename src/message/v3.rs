//! SNMPv3 messages (RFC 3412).
//!
//! ```text
//! SEQUENCE {
//!     INTEGER version (3)
//!     SEQUENCE msgGlobalData { msgID, msgMaxSize, msgFlags, msgSecurityModel }
//!     OCTET STRING msgSecurityParameters
//!     ScopedPDU, or OCTET STRING holding an encrypted ScopedPDU
//! }
//! ```

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf};
use crate::error::{DecodeErrorKind, Error, Result};
use crate::pdu::Pdu;
use crate::v3::UsmSecurityParams;
use crate::version::Version;

/// Smallest msgMaxSize a conforming engine may advertise.
pub const MSG_MAX_SIZE_MINIMUM: i32 = 484;

/// msgMaxSize sent in our requests (largest IPv4 UDP payload).
pub const DEFAULT_MSG_MAX_SIZE: i32 = 65507;

/// Security model identifiers. Only USM is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SecurityModel {
    Usm = 3,
}

impl SecurityModel {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            3 => Some(Self::Usm),
            _ => None,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// USM security level, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SecurityLevel {
    NoAuthNoPriv,
    AuthNoPriv,
    AuthPriv,
}

impl SecurityLevel {
    /// Decode the auth/priv bits of msgFlags. Privacy without authentication is invalid.
    pub fn from_flags(flags: u8) -> Option<Self> {
        match (flags & 0x01 != 0, flags & 0x02 != 0) {
            (false, false) => Some(Self::NoAuthNoPriv),
            (true, false) => Some(Self::AuthNoPriv),
            (true, true) => Some(Self::AuthPriv),
            (false, true) => None,
        }
    }

    pub fn to_flags(self) -> u8 {
        match self {
            Self::NoAuthNoPriv => 0x00,
            Self::AuthNoPriv => 0x01,
            Self::AuthPriv => 0x03,
        }
    }

    pub fn requires_auth(self) -> bool {
        self >= Self::AuthNoPriv
    }

    pub fn requires_priv(self) -> bool {
        self == Self::AuthPriv
    }
}

impl std::fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::NoAuthNoPriv => "noAuthNoPriv",
            Self::AuthNoPriv => "authNoPriv",
            Self::AuthPriv => "authPriv",
        })
    }
}

/// msgFlags: security level plus the reportable bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgFlags {
    pub security_level: SecurityLevel,
    pub reportable: bool,
}

impl MsgFlags {
    pub fn new(security_level: SecurityLevel, reportable: bool) -> Self {
        Self {
            security_level,
            reportable,
        }
    }

    pub fn from_byte(byte: u8, offset: usize) -> Result<Self> {
        let security_level = SecurityLevel::from_flags(byte)
            .ok_or_else(|| Error::malformed(offset, DecodeErrorKind::InvalidMsgFlags))?;
        Ok(Self {
            security_level,
            reportable: byte & 0x04 != 0,
        })
    }

    pub fn to_byte(self) -> u8 {
        let mut flags = self.security_level.to_flags();
        if self.reportable {
            flags |= 0x04;
        }
        flags
    }
}

/// msgGlobalData header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgGlobalData {
    pub msg_id: i32,
    pub msg_max_size: i32,
    pub msg_flags: MsgFlags,
    pub msg_security_model: SecurityModel,
}

impl MsgGlobalData {
    pub fn new(msg_id: i32, msg_max_size: i32, msg_flags: MsgFlags) -> Self {
        Self {
            msg_id,
            msg_max_size,
            msg_flags,
            msg_security_model: SecurityModel::Usm,
        }
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            buf.push_integer(self.msg_security_model.as_i32());
            buf.push_octet_string(&[self.msg_flags.to_byte()]);
            buf.push_integer(self.msg_max_size);
            buf.push_integer(self.msg_id);
        });
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;

        let offset = seq.offset();
        let msg_id = seq.read_integer()?;
        if msg_id < 0 {
            return Err(Error::malformed(offset, DecodeErrorKind::NegativeValue));
        }

        let offset = seq.offset();
        let msg_max_size = seq.read_integer()?;
        if msg_max_size < MSG_MAX_SIZE_MINIMUM {
            return Err(Error::malformed(
                offset,
                DecodeErrorKind::MsgMaxSizeTooSmall {
                    value: msg_max_size,
                    minimum: MSG_MAX_SIZE_MINIMUM,
                },
            ));
        }

        let offset = seq.offset();
        let flags = seq.read_octet_string()?;
        let [flag_byte] = flags[..] else {
            return Err(Error::malformed(offset, DecodeErrorKind::InvalidMsgFlags));
        };
        let msg_flags = MsgFlags::from_byte(flag_byte, offset)?;

        let offset = seq.offset();
        let model = seq.read_integer()?;
        let msg_security_model = SecurityModel::from_i32(model)
            .ok_or_else(|| Error::malformed(offset, DecodeErrorKind::UnknownSecurityModel(model)))?;
        seq.finish()?;

        Ok(Self {
            msg_id,
            msg_max_size,
            msg_flags,
            msg_security_model,
        })
    }
}

/// PDU together with its context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopedPdu {
    pub context_engine_id: Bytes,
    pub context_name: Bytes,
    pub pdu: Pdu,
}

impl ScopedPdu {
    pub fn new(
        context_engine_id: impl Into<Bytes>,
        context_name: impl Into<Bytes>,
        pdu: Pdu,
    ) -> Self {
        Self {
            context_engine_id: context_engine_id.into(),
            context_name: context_name.into(),
            pdu,
        }
    }

    /// Scoped PDU with empty context engine ID and name.
    pub fn with_empty_context(pdu: Pdu) -> Self {
        Self::new(Bytes::new(), Bytes::new(), pdu)
    }

    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_sequence(|buf| {
            self.pdu.encode(buf);
            buf.push_octet_string(&self.context_name);
            buf.push_octet_string(&self.context_engine_id);
        });
    }

    /// Encode on its own; this is the plaintext that gets encrypted.
    pub fn encode_to_bytes(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        self.encode(&mut buf);
        buf.finish()
    }

    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let mut seq = decoder.read_sequence()?;
        let context_engine_id = seq.read_octet_string()?;
        let context_name = seq.read_octet_string()?;
        let pdu = Pdu::decode(&mut seq)?;
        seq.finish()?;
        Ok(Self {
            context_engine_id,
            context_name,
            pdu,
        })
    }
}

/// msgData: plaintext or still-encrypted scoped PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum V3MessageData {
    Plaintext(ScopedPdu),
    Encrypted(Bytes),
}

/// A complete SNMPv3 message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V3Message {
    pub global_data: MsgGlobalData,
    /// BER-encoded USM parameters, carried as an opaque OCTET STRING.
    pub security_params: Bytes,
    pub data: V3MessageData,
}

impl V3Message {
    pub fn new(global_data: MsgGlobalData, security_params: Bytes, scoped_pdu: ScopedPdu) -> Self {
        Self {
            global_data,
            security_params,
            data: V3MessageData::Plaintext(scoped_pdu),
        }
    }

    pub fn new_encrypted(
        global_data: MsgGlobalData,
        security_params: Bytes,
        encrypted: Bytes,
    ) -> Self {
        Self {
            global_data,
            security_params,
            data: V3MessageData::Encrypted(encrypted),
        }
    }

    /// Engine discovery request: unauthenticated, reportable, empty GET.
    pub fn discovery_request(msg_id: i32) -> Self {
        let global_data = MsgGlobalData::new(
            msg_id,
            DEFAULT_MSG_MAX_SIZE,
            MsgFlags::new(SecurityLevel::NoAuthNoPriv, true),
        );
        let scoped_pdu = ScopedPdu::with_empty_context(Pdu::get_request(msg_id, &[]));
        Self::new(global_data, UsmSecurityParams::empty().encode(), scoped_pdu)
    }

    pub fn msg_id(&self) -> i32 {
        self.global_data.msg_id
    }

    pub fn security_level(&self) -> SecurityLevel {
        self.global_data.msg_flags.security_level
    }

    pub fn scoped_pdu(&self) -> Option<&ScopedPdu> {
        match &self.data {
            V3MessageData::Plaintext(scoped) => Some(scoped),
            V3MessageData::Encrypted(_) => None,
        }
    }

    pub fn pdu(&self) -> Option<&Pdu> {
        self.scoped_pdu().map(|s| &s.pdu)
    }

    pub fn into_pdu(self) -> Option<Pdu> {
        match self.data {
            V3MessageData::Plaintext(scoped) => Some(scoped.pdu),
            V3MessageData::Encrypted(_) => None,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            match &self.data {
                V3MessageData::Plaintext(scoped) => scoped.encode(buf),
                V3MessageData::Encrypted(ciphertext) => buf.push_octet_string(ciphertext),
            }
            buf.push_octet_string(&self.security_params);
            self.global_data.encode(buf);
            buf.push_integer(Version::V3.as_i32());
        });
        buf.finish()
    }

    /// Decode a complete v3 datagram.
    pub fn decode(data: Bytes) -> Result<Self> {
        match super::Message::decode(data)? {
            super::Message::V3(msg) => Ok(msg),
            super::Message::Community(msg) => Err(Error::malformed(
                0,
                DecodeErrorKind::UnknownVersion(msg.version.as_i32()),
            )),
        }
    }

    /// Decode the remainder of a message whose version has been read.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder) -> Result<Self> {
        let global_data = MsgGlobalData::decode(seq)?;
        let security_params = seq.read_octet_string()?;

        let offset = seq.offset();
        let data = match (global_data.msg_flags.security_level.requires_priv(), seq.peek_tag()) {
            (true, Some(crate::ber::tag::universal::OCTET_STRING)) => {
                V3MessageData::Encrypted(seq.read_octet_string()?)
            }
            (true, _) => {
                return Err(Error::malformed(offset, DecodeErrorKind::ExpectedEncryption));
            }
            (false, Some(crate::ber::tag::universal::OCTET_STRING)) => {
                return Err(Error::malformed(offset, DecodeErrorKind::UnexpectedEncryption));
            }
            (false, _) => V3MessageData::Plaintext(ScopedPdu::decode(seq)?),
        };
        seq.finish()?;

        Ok(Self {
            global_data,
            security_params,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::oid;
    use crate::pdu::PduType;

    #[test]
    fn security_level_flags() {
        assert_eq!(SecurityLevel::from_flags(0x00), Some(SecurityLevel::NoAuthNoPriv));
        assert_eq!(SecurityLevel::from_flags(0x05), Some(SecurityLevel::AuthNoPriv));
        assert_eq!(SecurityLevel::from_flags(0x03), Some(SecurityLevel::AuthPriv));
        assert_eq!(SecurityLevel::from_flags(0x02), None);
        assert_eq!(MsgFlags::new(SecurityLevel::AuthPriv, true).to_byte(), 0x07);
        assert!(SecurityLevel::AuthPriv.requires_auth());
        assert!(!SecurityLevel::AuthNoPriv.requires_priv());
    }

    #[test]
    fn global_data_limits() {
        let encode = |id, max| {
            let mut buf = EncodeBuf::new();
            MsgGlobalData::new(id, max, MsgFlags::new(SecurityLevel::AuthNoPriv, true))
                .encode(&mut buf);
            buf.finish()
        };

        let decoded = MsgGlobalData::decode(&mut Decoder::new(encode(12345, 1472))).unwrap();
        assert_eq!(decoded.msg_id, 12345);
        assert_eq!(decoded.msg_max_size, 1472);
        assert!(decoded.msg_flags.reportable);

        assert!(MsgGlobalData::decode(&mut Decoder::new(encode(-1, 1472))).is_err());
        assert!(MsgGlobalData::decode(&mut Decoder::new(encode(1, 483))).is_err());
    }

    #[test]
    fn plaintext_message_round_trip() {
        let pdu = Pdu::get_request(42, &[oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)]);
        let msg = V3Message::new(
            MsgGlobalData::new(
                42,
                DEFAULT_MSG_MAX_SIZE,
                MsgFlags::new(SecurityLevel::NoAuthNoPriv, true),
            ),
            UsmSecurityParams::empty().encode(),
            ScopedPdu::new(Bytes::from_static(b"engine"), Bytes::new(), pdu.clone()),
        );
        let decoded = V3Message::decode(msg.encode()).unwrap();
        assert_eq!(decoded, msg);
        assert_eq!(decoded.into_pdu(), Some(pdu));
    }

    #[test]
    fn encrypted_data_must_match_flags() {
        let global = MsgGlobalData::new(9, 1500, MsgFlags::new(SecurityLevel::AuthPriv, false));
        let msg =
            V3Message::new_encrypted(global.clone(), Bytes::new(), Bytes::from_static(&[1; 16]));
        let decoded = V3Message::decode(msg.encode()).unwrap();
        assert_eq!(decoded.data, V3MessageData::Encrypted(Bytes::from_static(&[1; 16])));
        assert!(decoded.pdu().is_none());

        let plain = V3Message::new(
            global,
            Bytes::new(),
            ScopedPdu::with_empty_context(Pdu::get_request(9, &[])),
        );
        let err = V3Message::decode(plain.encode()).unwrap_err();
        assert_eq!(err.decode_error(), Some(DecodeError::UnknownTag));
    }

    #[test]
    fn discovery_request_shape() {
        let msg = V3Message::discovery_request(100);
        assert_eq!(msg.msg_id(), 100);
        assert_eq!(msg.security_level(), SecurityLevel::NoAuthNoPriv);
        assert!(msg.global_data.msg_flags.reportable);
        let pdu = msg.pdu().unwrap();
        assert_eq!(pdu.pdu_type, PduType::GetRequest);
        assert!(pdu.varbinds.is_empty());
    }
}
