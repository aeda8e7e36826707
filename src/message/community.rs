//! Community-based messages (SNMPv1 and SNMPv2c).
//!
//! ```text
//! SEQUENCE {
//!     INTEGER version (0 = v1, 1 = v2c)
//!     OCTET STRING community
//!     PDU
//! }
//! ```

use bytes::Bytes;

use crate::ber::{Decoder, EncodeBuf};
use crate::error::{EncodeErrorKind, Error, Result};
use crate::pdu::Pdu;
use crate::version::Version;

/// A v1 or v2c message: version, community string, one PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunityMessage {
    pub version: Version,
    pub community: Bytes,
    pub pdu: Pdu,
}

impl CommunityMessage {
    /// Create a message for a community version.
    ///
    /// Fails with [`EncodeErrorKind::WrongCredential`] for v3.
    pub fn new(version: Version, community: impl Into<Bytes>, pdu: Pdu) -> Result<Self> {
        if !version.is_community() {
            return Err(Error::encode(EncodeErrorKind::WrongCredential));
        }
        Ok(Self {
            version,
            community: community.into(),
            pdu,
        })
    }

    /// Create a v1 message.
    pub fn v1(community: impl Into<Bytes>, pdu: Pdu) -> Self {
        Self {
            version: Version::V1,
            community: community.into(),
            pdu,
        }
    }

    /// Create a v2c message.
    pub fn v2c(community: impl Into<Bytes>, pdu: Pdu) -> Self {
        Self {
            version: Version::V2c,
            community: community.into(),
            pdu,
        }
    }

    /// Encode to BER.
    pub fn encode(&self) -> Bytes {
        let mut buf = EncodeBuf::new();
        buf.push_sequence(|buf| {
            self.pdu.encode(buf);
            buf.push_octet_string(&self.community);
            buf.push_integer(self.version.as_i32());
        });
        buf.finish()
    }

    /// Decode a complete datagram.
    pub fn decode(data: Bytes) -> Result<Self> {
        match super::Message::decode(data)? {
            super::Message::Community(msg) => Ok(msg),
            super::Message::V3(_) => Err(Error::malformed(
                0,
                crate::error::DecodeErrorKind::UnknownVersion(Version::V3.as_i32()),
            )),
        }
    }

    /// Decode the remainder of a message whose version has been read.
    pub(crate) fn decode_from_sequence(seq: &mut Decoder, version: Version) -> Result<Self> {
        let community = seq.read_octet_string()?;
        let pdu = Pdu::decode(seq)?;
        seq.finish()?;
        Ok(Self {
            version,
            community,
            pdu,
        })
    }

    /// Consume and return the PDU.
    pub fn into_pdu(self) -> Pdu {
        self.pdu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use crate::oid;
    use crate::pdu::PduType;

    #[test]
    fn v2c_get_wire_format() {
        let pdu = Pdu::get_request(1, &[oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)]);
        let bytes = CommunityMessage::v2c(Bytes::from_static(b"public"), pdu).encode();
        let expected: &[u8] = &[
            0x30, 0x26, // message
            0x02, 0x01, 0x01, // version 1 (v2c)
            0x04, 0x06, b'p', b'u', b'b', b'l', b'i', b'c', // community
            0xA0, 0x19, // GetRequest
            0x02, 0x01, 0x01, // request-id
            0x02, 0x01, 0x00, // error-status
            0x02, 0x01, 0x00, // error-index
            0x30, 0x0E, // varbind list
            0x30, 0x0C, 0x06, 0x08, 0x2B, 0x06, 0x01, 0x02, 0x01, 0x01, 0x05, 0x00, 0x05, 0x00,
        ];
        assert_eq!(&bytes[..], expected);
    }

    #[test]
    fn decode_keeps_version_and_community() {
        let pdu = Pdu::get_next_request(77, &[oid!(1, 3, 6, 1)]);
        let bytes = CommunityMessage::v1(Bytes::from_static(b"private"), pdu.clone()).encode();
        let msg = CommunityMessage::decode(bytes).unwrap();
        assert_eq!(msg.version, Version::V1);
        assert_eq!(&msg.community[..], b"private");
        assert_eq!(msg.pdu.pdu_type, PduType::GetNextRequest);
        assert_eq!(msg.into_pdu(), pdu);
    }

    #[test]
    fn v3_is_not_a_community_version() {
        let pdu = Pdu::get_request(1, &[]);
        assert!(CommunityMessage::new(Version::V3, Bytes::new(), pdu.clone()).is_err());
        assert!(CommunityMessage::new(Version::V2c, Bytes::new(), pdu).is_ok());
    }

    #[test]
    fn trailing_element_inside_message_is_rejected() {
        let pdu = Pdu::get_request(1, &[]);
        let mut bytes = CommunityMessage::v2c(Bytes::from_static(b"c"), pdu)
            .encode()
            .to_vec();
        // Append a NULL inside the outer SEQUENCE and bump its length.
        bytes[1] += 2;
        bytes.extend_from_slice(&[0x05, 0x00]);
        let err = CommunityMessage::decode(Bytes::from(bytes)).unwrap_err();
        assert_eq!(err.decode_error(), Some(DecodeError::MalformedLength));
    }
}
