//! SNMP Protocol Data Units.
//!
//! All request and response PDUs share one wire layout:
//! `[tag] { request-id, error-status, error-index, varbinds }`.
//! GETBULK reuses the two middle integers as non-repeaters and
//! max-repetitions; [`GetBulkPdu`] gives those fields their own names.

use crate::ber::{Decoder, EncodeBuf, tag};
use crate::error::{DecodeErrorKind, Error, ErrorStatus, Result};
use crate::oid::Oid;
use crate::varbind::{VarBind, decode_varbind_list, encode_varbind_list};

/// PDU type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    GetRequest = tag::pdu::GET_REQUEST,
    GetNextRequest = tag::pdu::GET_NEXT_REQUEST,
    Response = tag::pdu::RESPONSE,
    SetRequest = tag::pdu::SET_REQUEST,
    GetBulkRequest = tag::pdu::GET_BULK_REQUEST,
    Report = tag::pdu::REPORT,
}

impl PduType {
    /// Create from tag byte.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            tag::pdu::GET_REQUEST => Some(Self::GetRequest),
            tag::pdu::GET_NEXT_REQUEST => Some(Self::GetNextRequest),
            tag::pdu::RESPONSE => Some(Self::Response),
            tag::pdu::SET_REQUEST => Some(Self::SetRequest),
            tag::pdu::GET_BULK_REQUEST => Some(Self::GetBulkRequest),
            tag::pdu::REPORT => Some(Self::Report),
            _ => None,
        }
    }

    /// Get the tag byte.
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for PduType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::GetRequest => "GetRequest",
            Self::GetNextRequest => "GetNextRequest",
            Self::Response => "Response",
            Self::SetRequest => "SetRequest",
            Self::GetBulkRequest => "GetBulkRequest",
            Self::Report => "Report",
        };
        f.write_str(name)
    }
}

/// Generic PDU structure for request/response operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    /// PDU type
    pub pdu_type: PduType,
    /// Correlates a response with its request
    pub request_id: i32,
    /// Error status (0 in requests); non-repeaters for GETBULK
    pub error_status: i32,
    /// 1-based index of the failing binding; max-repetitions for GETBULK
    pub error_index: i32,
    /// Variable bindings
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    fn with_null_bindings(pdu_type: PduType, request_id: i32, oids: &[Oid]) -> Self {
        Self {
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds: oids.iter().cloned().map(VarBind::null).collect(),
        }
    }

    /// Create a GET request PDU.
    pub fn get_request(request_id: i32, oids: &[Oid]) -> Self {
        Self::with_null_bindings(PduType::GetRequest, request_id, oids)
    }

    /// Create a GETNEXT request PDU.
    pub fn get_next_request(request_id: i32, oids: &[Oid]) -> Self {
        Self::with_null_bindings(PduType::GetNextRequest, request_id, oids)
    }

    /// Create a GETBULK request PDU.
    pub fn get_bulk(
        request_id: i32,
        non_repeaters: i32,
        max_repetitions: i32,
        oids: &[Oid],
    ) -> Self {
        GetBulkPdu::new(request_id, non_repeaters, max_repetitions, oids).into()
    }

    /// Create a Response PDU (used by agents and test fixtures).
    pub fn response(request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type: PduType::Response,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }

    /// Set error status and index (builder style).
    pub fn with_error(mut self, status: ErrorStatus, index: i32) -> Self {
        self.error_status = status.as_i32();
        self.error_index = index;
        self
    }

    /// Requested OIDs, in order.
    pub fn oids(&self) -> impl Iterator<Item = &Oid> {
        self.varbinds.iter().map(|vb| &vb.oid)
    }

    /// Check that every binding name encodes to exactly the OID it holds.
    ///
    /// [`encode`](Self::encode) packs arcs without checking them, so requests
    /// go through this first.
    pub fn validate_oids(&self) -> Result<()> {
        self.oids().try_for_each(|oid| {
            oid.validate()?;
            oid.validate_length()
        })
    }

    /// Encode to BER.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        buf.push_constructed(self.pdu_type.tag(), |buf| {
            encode_varbind_list(buf, &self.varbinds);
            buf.push_integer(self.error_index);
            buf.push_integer(self.error_status);
            buf.push_integer(self.request_id);
        });
    }

    /// Encode to a standalone buffer.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = EncodeBuf::new();
        self.encode(&mut buf);
        buf.finish()
    }

    /// Decode from BER.
    ///
    /// The PDU's declared length must be consumed exactly by its four fields.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let tag_offset = decoder.offset();
        let tag = decoder.read_tag()?;
        let pdu_type = PduType::from_tag(tag)
            .ok_or_else(|| Error::malformed(tag_offset, DecodeErrorKind::UnknownPduType(tag)))?;

        let len = decoder.read_length()?;
        let mut pdu_decoder = decoder.sub_decoder(len)?;

        let request_id = pdu_decoder.read_integer()?;
        let error_status = pdu_decoder.read_integer()?;
        let error_index = pdu_decoder.read_integer()?;
        let varbinds = decode_varbind_list(&mut pdu_decoder)?;
        pdu_decoder.finish()?;

        Ok(Pdu {
            pdu_type,
            request_id,
            error_status,
            error_index,
            varbinds,
        })
    }

    /// Check if this is an error response.
    pub fn is_error(&self) -> bool {
        self.error_status != 0
    }

    /// Get the error status as an enum.
    pub fn error_status_enum(&self) -> ErrorStatus {
        ErrorStatus::from_i32(self.error_status)
    }
}

/// GETBULK request with its header fields named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetBulkPdu {
    pub request_id: i32,
    /// Leading bindings fetched once (like GETNEXT).
    pub non_repeaters: i32,
    /// Successors fetched for each remaining binding.
    pub max_repetitions: i32,
    pub varbinds: Vec<VarBind>,
}

impl GetBulkPdu {
    /// Create a GETBULK request. Negative counts are clamped to zero.
    pub fn new(request_id: i32, non_repeaters: i32, max_repetitions: i32, oids: &[Oid]) -> Self {
        Self {
            request_id,
            non_repeaters: non_repeaters.max(0),
            max_repetitions: max_repetitions.max(0),
            varbinds: oids.iter().cloned().map(VarBind::null).collect(),
        }
    }

    /// Decode a GETBULK PDU.
    pub fn decode(decoder: &mut Decoder) -> Result<Self> {
        let offset = decoder.offset();
        let pdu = Pdu::decode(decoder)?;
        Self::try_from(pdu).map_err(|pdu| {
            Error::malformed(
                offset,
                DecodeErrorKind::UnexpectedTag {
                    expected: tag::pdu::GET_BULK_REQUEST,
                    actual: pdu.pdu_type.tag(),
                },
            )
        })
    }

    /// Encode to BER.
    pub fn encode(&self, buf: &mut EncodeBuf) {
        Pdu::from(self.clone()).encode(buf);
    }
}

impl From<GetBulkPdu> for Pdu {
    fn from(bulk: GetBulkPdu) -> Self {
        Pdu {
            pdu_type: PduType::GetBulkRequest,
            request_id: bulk.request_id,
            error_status: bulk.non_repeaters,
            error_index: bulk.max_repetitions,
            varbinds: bulk.varbinds,
        }
    }
}

impl TryFrom<Pdu> for GetBulkPdu {
    type Error = Pdu;

    fn try_from(pdu: Pdu) -> std::result::Result<Self, Pdu> {
        if pdu.pdu_type != PduType::GetBulkRequest {
            return Err(pdu);
        }
        Ok(GetBulkPdu {
            request_id: pdu.request_id,
            non_repeaters: pdu.error_status,
            max_repetitions: pdu.error_index,
            varbinds: pdu.varbinds,
        })
    }
}
