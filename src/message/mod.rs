//! SNMP message envelopes.
//!
//! A message wraps one PDU with a version header and security data:
//! [`CommunityMessage`] for v1/v2c, [`V3Message`] for v3. [`Message::decode`]
//! reads the version and dispatches.

mod community;
mod v3;

pub use community::CommunityMessage;
pub use v3::{
    DEFAULT_MSG_MAX_SIZE, MSG_MAX_SIZE_MINIMUM, MsgFlags, MsgGlobalData, ScopedPdu, SecurityLevel,
    SecurityModel, V3Message, V3MessageData,
};

use bytes::Bytes;

use crate::ber::decode_message_sequence;
use crate::credential::Credential;
use crate::error::{DecodeErrorKind, EncodeErrorKind, Error, Result};
use crate::pdu::Pdu;
use crate::version::Version;

/// A decoded message of any version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Community(CommunityMessage),
    V3(V3Message),
}

impl Message {
    /// Decode a complete datagram.
    ///
    /// The outer SEQUENCE must span the whole input and the version must be
    /// 0, 1 or 3.
    pub fn decode(data: Bytes) -> Result<Self> {
        let mut seq = decode_message_sequence(data)?;
        let offset = seq.offset();
        let raw = seq.read_integer()?;
        let version = Version::from_i32(raw)
            .ok_or_else(|| Error::malformed(offset, DecodeErrorKind::UnknownVersion(raw)))?;

        match version {
            Version::V3 => V3Message::decode_from_sequence(&mut seq).map(Message::V3),
            _ => CommunityMessage::decode_from_sequence(&mut seq, version).map(Message::Community),
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Message::Community(msg) => msg.version,
            Message::V3(_) => Version::V3,
        }
    }

    /// The PDU, unless the message is still encrypted.
    pub fn pdu(&self) -> Option<&Pdu> {
        match self {
            Message::Community(msg) => Some(&msg.pdu),
            Message::V3(msg) => msg.pdu(),
        }
    }

    pub fn into_pdu(self) -> Option<Pdu> {
        match self {
            Message::Community(msg) => Some(msg.pdu),
            Message::V3(msg) => msg.into_pdu(),
        }
    }
}

/// Encode a request PDU under a community credential.
///
/// Binding names that would not survive BER unchanged fail with
/// [`Error::InvalidOid`]. USM credentials need engine state and keys, so their messages are built
/// by the session; passing one here fails with
/// [`EncodeErrorKind::WrongCredential`].
pub fn encode_request(pdu: &Pdu, credential: &Credential) -> Result<Bytes> {
    pdu.validate_oids()?;
    match credential {
        Credential::Community { version, community } => {
            let msg = CommunityMessage::new(*version, community.clone(), pdu.clone())?;
            Ok(msg.encode())
        }
        Credential::Usm(_) => Err(Error::encode(EncodeErrorKind::WrongCredential)),
    }
}
