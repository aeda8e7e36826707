//! Error types for snmp-query.
//!
//! All errors are `#[non_exhaustive]` to allow adding new variants without breaking changes.

use std::net::SocketAddr;
use std::time::Duration;

use crate::oid::Oid;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a decode failure.
///
/// Every [`DecodeErrorKind`] folds into exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeError {
    /// A length field is invalid, or does not agree with the bytes present.
    MalformedLength,
    /// A tag, version, or enumerated field carries an unrecognized value.
    UnknownTag,
    /// Input ended before the encoding did.
    Truncated,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MalformedLength => write!(f, "malformed-length"),
            Self::UnknownTag => write!(f, "unknown-tag"),
            Self::Truncated => write!(f, "truncated"),
        }
    }
}

/// BER decode error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeErrorKind {
    /// Expected different tag.
    UnexpectedTag { expected: u8, actual: u8 },
    /// Value tag not part of the SNMP type set.
    UnknownValueTag(u8),
    /// Data truncated unexpectedly.
    TruncatedData,
    /// Invalid BER length encoding.
    InvalidLength,
    /// Indefinite length not supported.
    IndefiniteLength,
    /// Length field too long.
    LengthTooLong { octets: usize },
    /// Length exceeds maximum.
    LengthExceedsMax { length: usize, max: usize },
    /// Declared length does not match the bytes consumed.
    LengthMismatch { declared: usize, consumed: usize },
    /// Bytes remain after the outer message.
    TrailingData { remaining: usize },
    /// Insufficient data for read.
    InsufficientData { needed: usize, available: usize },
    /// Integer value overflow.
    IntegerOverflow,
    /// Zero-length integer.
    ZeroLengthInteger,
    /// Integer64 too long.
    Integer64TooLong { length: usize },
    /// Invalid OID encoding.
    InvalidOidEncoding,
    /// OBJECT IDENTIFIER with no content octets.
    EmptyOid,
    /// OID has more arcs than allowed.
    OidTooLong { count: usize, max: usize },
    /// NULL with non-zero length.
    InvalidNull,
    /// Invalid IP address length.
    InvalidIpAddressLength { length: usize },
    /// Constructed OCTET STRING not supported.
    ConstructedOctetString,
    /// Unknown SNMP version.
    UnknownVersion(i32),
    /// Unknown PDU type.
    UnknownPduType(u8),
    /// Unknown security model.
    UnknownSecurityModel(i32),
    /// Invalid msgFlags (priv without auth).
    InvalidMsgFlags,
    /// msgMaxSize below RFC 3412 minimum (484 octets).
    MsgMaxSizeTooSmall { value: i32, minimum: i32 },
    /// Negative value in a field that must be non-negative.
    NegativeValue,
    /// Expected plaintext, got encrypted.
    UnexpectedEncryption,
    /// Expected encrypted, got plaintext.
    ExpectedEncryption,
    /// Missing required PDU.
    MissingPdu,
    /// Response carries a different number of bindings than requested.
    VarbindCountMismatch { expected: usize, actual: usize },
    /// Discovery report carried an empty engine ID.
    EmptyEngineId,
}

impl DecodeErrorKind {
    /// Fold this kind into its coarse category.
    pub fn category(&self) -> DecodeError {
        match self {
            Self::TruncatedData
            | Self::InsufficientData { .. }
            | Self::MissingPdu => DecodeError::Truncated,

            Self::UnexpectedTag { .. }
            | Self::UnknownValueTag(_)
            | Self::ConstructedOctetString
            | Self::UnknownVersion(_)
            | Self::UnknownPduType(_)
            | Self::UnknownSecurityModel(_)
            | Self::InvalidMsgFlags
            | Self::UnexpectedEncryption
            | Self::ExpectedEncryption => DecodeError::UnknownTag,

            Self::InvalidLength
            | Self::IndefiniteLength
            | Self::LengthTooLong { .. }
            | Self::LengthExceedsMax { .. }
            | Self::LengthMismatch { .. }
            | Self::TrailingData { .. }
            | Self::IntegerOverflow
            | Self::ZeroLengthInteger
            | Self::Integer64TooLong { .. }
            | Self::InvalidOidEncoding
            | Self::EmptyOid
            | Self::OidTooLong { .. }
            | Self::InvalidNull
            | Self::InvalidIpAddressLength { .. }
            | Self::MsgMaxSizeTooSmall { .. }
            | Self::NegativeValue
            | Self::VarbindCountMismatch { .. }
            | Self::EmptyEngineId => DecodeError::MalformedLength,
        }
    }
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnexpectedTag { expected, actual } => {
                write!(f, "expected tag 0x{:02X}, got 0x{:02X}", expected, actual)
            }
            Self::UnknownValueTag(t) => write!(f, "unknown value tag: 0x{:02X}", t),
            Self::TruncatedData => write!(f, "unexpected end of data"),
            Self::InvalidLength => write!(f, "invalid length encoding"),
            Self::IndefiniteLength => write!(f, "indefinite length encoding not supported"),
            Self::LengthTooLong { octets } => {
                write!(f, "length encoding too long ({} octets)", octets)
            }
            Self::LengthExceedsMax { length, max } => {
                write!(f, "length {} exceeds maximum {}", length, max)
            }
            Self::LengthMismatch { declared, consumed } => {
                write!(f, "declared length {} but consumed {}", declared, consumed)
            }
            Self::TrailingData { remaining } => {
                write!(f, "{} trailing bytes after message", remaining)
            }
            Self::InsufficientData { needed, available } => {
                write!(f, "need {} bytes but only {} remaining", needed, available)
            }
            Self::IntegerOverflow => write!(f, "integer overflow"),
            Self::ZeroLengthInteger => write!(f, "zero-length integer"),
            Self::Integer64TooLong { length } => {
                write!(f, "integer64 too long: {} bytes", length)
            }
            Self::InvalidOidEncoding => write!(f, "invalid OID encoding"),
            Self::EmptyOid => write!(f, "zero-length OID"),
            Self::OidTooLong { count, max } => {
                write!(f, "OID has {} arcs, exceeds maximum {}", count, max)
            }
            Self::InvalidNull => write!(f, "NULL with non-zero length"),
            Self::InvalidIpAddressLength { length } => {
                write!(f, "IP address must be 4 bytes, got {}", length)
            }
            Self::ConstructedOctetString => {
                write!(f, "constructed OCTET STRING (0x24) not supported")
            }
            Self::UnknownVersion(v) => write!(f, "unknown SNMP version: {}", v),
            Self::UnknownPduType(t) => write!(f, "unknown PDU type: 0x{:02X}", t),
            Self::UnknownSecurityModel(m) => write!(f, "unknown security model: {}", m),
            Self::InvalidMsgFlags => write!(f, "invalid msgFlags: privacy without authentication"),
            Self::MsgMaxSizeTooSmall { value, minimum } => {
                write!(f, "msgMaxSize {} below RFC 3412 minimum {}", value, minimum)
            }
            Self::NegativeValue => write!(f, "negative value in unsigned field"),
            Self::UnexpectedEncryption => write!(f, "expected plaintext scoped PDU"),
            Self::ExpectedEncryption => write!(f, "expected encrypted scoped PDU"),
            Self::MissingPdu => write!(f, "missing PDU in message"),
            Self::VarbindCountMismatch { expected, actual } => {
                write!(f, "expected {} varbinds, got {}", expected, actual)
            }
            Self::EmptyEngineId => write!(f, "empty engine ID in discovery response"),
        }
    }
}

/// BER encode error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeErrorKind {
    /// Credential cannot encode this message (e.g. USM for a community codec).
    WrongCredential,
    /// Engine not discovered.
    EngineNotDiscovered,
    /// Keys not derived.
    KeysNotDerived,
    /// Privacy key not available.
    NoPrivKey,
    /// Could not locate auth params position in encoded message.
    MissingAuthParams,
    /// OID could not be BER encoded.
    InvalidOid,
}

impl std::fmt::Display for EncodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongCredential => write!(f, "credential does not match message version"),
            Self::EngineNotDiscovered => write!(f, "engine not discovered"),
            Self::KeysNotDerived => write!(f, "keys not derived"),
            Self::NoPrivKey => write!(f, "privacy key not available"),
            Self::MissingAuthParams => {
                write!(f, "could not find auth params position in encoded message")
            }
            Self::InvalidOid => write!(f, "OID cannot be encoded"),
        }
    }
}

/// Authentication error kinds (SNMPv3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// No authentication key available.
    NoAuthKey,
    /// HMAC verification failed.
    HmacMismatch,
    /// Could not locate auth params in message.
    AuthParamsNotFound,
    /// Response was not authenticated although the request was.
    Unauthenticated,
}

impl std::fmt::Display for AuthErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoAuthKey => write!(f, "no authentication key available"),
            Self::HmacMismatch => write!(f, "HMAC verification failed"),
            Self::AuthParamsNotFound => write!(f, "could not locate auth params in message"),
            Self::Unauthenticated => write!(f, "response lacks authentication"),
        }
    }
}

/// Cryptographic error kinds (encryption/decryption).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoErrorKind {
    /// No privacy key available.
    NoPrivKey,
    /// Invalid key length for cipher.
    InvalidKeyLength,
    /// Invalid priv params length.
    InvalidPrivParamsLength { expected: usize, actual: usize },
    /// Ciphertext length not a multiple of block size.
    InvalidCiphertextLength { length: usize, block_size: usize },
}

impl std::fmt::Display for CryptoErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoPrivKey => write!(f, "no privacy key available"),
            Self::InvalidKeyLength => write!(f, "invalid key length"),
            Self::InvalidPrivParamsLength { expected, actual } => {
                write!(
                    f,
                    "invalid privParameters length: expected {}, got {}",
                    expected, actual
                )
            }
            Self::InvalidCiphertextLength { length, block_size } => {
                write!(
                    f,
                    "ciphertext length {} not multiple of block size {}",
                    length, block_size
                )
            }
        }
    }
}

/// OID validation error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidErrorKind {
    /// Empty OID string.
    Empty,
    /// Invalid arc value.
    InvalidArc,
    /// First arc must be 0, 1, or 2.
    InvalidFirstArc(u32),
    /// Second arc too large for first arc value.
    InvalidSecondArc { first: u32, second: u32 },
    /// OID has too many arcs (exceeds MAX_OID_LEN).
    TooManyArcs { count: usize, max: usize },
    /// BER needs at least two arcs.
    TooFewArcs { count: usize },
}

impl std::fmt::Display for OidErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty OID"),
            Self::InvalidArc => write!(f, "invalid arc value"),
            Self::InvalidFirstArc(v) => write!(f, "first arc must be 0, 1, or 2, got {}", v),
            Self::InvalidSecondArc { first, second } => {
                write!(f, "second arc {} too large for first arc {}", second, first)
            }
            Self::TooManyArcs { count, max } => {
                write!(f, "OID has {} arcs, exceeds maximum {}", count, max)
            }
            Self::TooFewArcs { count } => {
                write!(f, "OID has {} arcs, at least 2 are required", count)
            }
        }
    }
}

/// Credential validation failures.
///
/// Raised by [`Credential::build`](crate::Credential::build) and the session
/// builder before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// Privacy requested without authentication.
    #[error("privacy requires authentication")]
    InvalidSecurityCombination,
    /// SNMPv3 username is empty.
    #[error("SNMPv3 username must not be empty")]
    EmptyUsername,
    /// v1/v2c parameters without a community string.
    #[error("{version} requires a community string")]
    MissingCommunity { version: crate::version::Version },
    /// v1/v2c parameters that also carry USM fields.
    #[error("{version} accepts only a community string")]
    UnexpectedUsmParameters { version: crate::version::Version },
    /// v3 parameters that also carry a community string.
    #[error("SNMPv3 does not use a community string")]
    UnexpectedCommunity,
    /// Authentication or privacy password is empty.
    #[error("{which} password must not be empty")]
    EmptyPassword { which: &'static str },
    /// Target address could not be resolved.
    #[error("cannot resolve target {target:?}")]
    InvalidTarget { target: String },
    /// GETBULK requested on SNMPv1.
    #[error("GETBULK is not available in {version}")]
    BulkUnsupported { version: crate::version::Version },
}

/// SNMP error status codes (RFC 3416).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorStatus {
    NoError,
    TooBig,
    NoSuchName,
    BadValue,
    ReadOnly,
    GenErr,
    NoAccess,
    WrongType,
    WrongLength,
    WrongEncoding,
    WrongValue,
    NoCreation,
    InconsistentValue,
    ResourceUnavailable,
    CommitFailed,
    UndoFailed,
    AuthorizationError,
    NotWritable,
    InconsistentName,
    /// Unknown/future error status code.
    Unknown(i32),
}

const STATUS_TABLE: [(ErrorStatus, &str); 19] = [
    (ErrorStatus::NoError, "noError"),
    (ErrorStatus::TooBig, "tooBig"),
    (ErrorStatus::NoSuchName, "noSuchName"),
    (ErrorStatus::BadValue, "badValue"),
    (ErrorStatus::ReadOnly, "readOnly"),
    (ErrorStatus::GenErr, "genErr"),
    (ErrorStatus::NoAccess, "noAccess"),
    (ErrorStatus::WrongType, "wrongType"),
    (ErrorStatus::WrongLength, "wrongLength"),
    (ErrorStatus::WrongEncoding, "wrongEncoding"),
    (ErrorStatus::WrongValue, "wrongValue"),
    (ErrorStatus::NoCreation, "noCreation"),
    (ErrorStatus::InconsistentValue, "inconsistentValue"),
    (ErrorStatus::ResourceUnavailable, "resourceUnavailable"),
    (ErrorStatus::CommitFailed, "commitFailed"),
    (ErrorStatus::UndoFailed, "undoFailed"),
    (ErrorStatus::AuthorizationError, "authorizationError"),
    (ErrorStatus::NotWritable, "notWritable"),
    (ErrorStatus::InconsistentName, "inconsistentName"),
];

impl ErrorStatus {
    /// Create from raw status code.
    pub fn from_i32(value: i32) -> Self {
        usize::try_from(value)
            .ok()
            .and_then(|idx| STATUS_TABLE.get(idx))
            .map(|(status, _)| *status)
            .unwrap_or(Self::Unknown(value))
    }

    /// Convert to raw status code.
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Unknown(code) => *code,
            known => STATUS_TABLE
                .iter()
                .position(|(status, _)| status == known)
                .map(|idx| idx as i32)
                .unwrap_or(-1),
        }
    }
}

impl std::fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "unknown({})", code),
            known => {
                let name = STATUS_TABLE
                    .iter()
                    .find(|(status, _)| status == known)
                    .map(|(_, name)| *name)
                    .unwrap_or("unknown");
                f.write_str(name)
            }
        }
    }
}

fn with_target(target: &Option<SocketAddr>, prefix: &str) -> String {
    target
        .map(|t| format!(" {} {}", prefix, t))
        .unwrap_or_default()
}

/// Library error type.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// I/O error during communication.
    #[error("I/O error{}: {source}", with_target(target, "communicating with"))]
    Io {
        target: Option<SocketAddr>,
        #[source]
        source: std::io::Error,
    },

    /// No correlated response within the retry budget.
    #[error("timeout after {elapsed:?}{} (request_id={request_id}, retries={retries})", with_target(target, "waiting for"))]
    Timeout {
        target: Option<SocketAddr>,
        elapsed: Duration,
        request_id: i32,
        retries: u32,
    },

    /// Message could not be decoded.
    #[error("malformed message{} at offset {offset}: {kind} ({})", with_target(target, "from"), kind.category())]
    Malformed {
        target: Option<SocketAddr>,
        offset: usize,
        kind: DecodeErrorKind,
    },

    /// Error status reported by the agent.
    ///
    /// `index` is 1-based into the request's OID list; 0 means the error
    /// applies to the PDU as a whole.
    #[error("SNMP error{}: {status} at index {index}", with_target(target, "from"))]
    Remote {
        target: Option<SocketAddr>,
        status: ErrorStatus,
        index: u32,
        oid: Option<Oid>,
    },

    /// Request was cancelled before a response arrived.
    #[error("request {request_id} cancelled{}", with_target(target, "for"))]
    Cancelled {
        target: Option<SocketAddr>,
        request_id: i32,
    },

    /// Invalid credential or session configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Invalid OID format.
    #[error("invalid OID: {kind}")]
    InvalidOid {
        kind: OidErrorKind,
        input: Option<Box<str>>,
    },

    /// BER encoding error.
    #[error("encode error: {kind}")]
    Encode { kind: EncodeErrorKind },

    /// Unknown engine ID (SNMPv3).
    #[error("unknown engine ID")]
    UnknownEngineId { target: Option<SocketAddr> },

    /// Message outside time window (SNMPv3).
    #[error("message not in time window")]
    NotInTimeWindow { target: Option<SocketAddr> },

    /// Authentication failed (SNMPv3).
    #[error("authentication failed: {kind}")]
    AuthenticationFailed {
        target: Option<SocketAddr>,
        kind: AuthErrorKind,
    },

    /// Decryption failed (SNMPv3).
    #[error("decryption failed: {kind}")]
    DecryptionFailed {
        target: Option<SocketAddr>,
        kind: CryptoErrorKind,
    },

    /// Encryption failed (SNMPv3).
    #[error("encryption failed: {kind}")]
    EncryptionFailed {
        target: Option<SocketAddr>,
        kind: CryptoErrorKind,
    },

    /// Non-increasing OID detected during walk (agent misbehavior).
    ///
    /// Returned when a walk receives an OID that is not lexicographically
    /// greater than the previous one, which would otherwise loop forever.
    #[error("walk detected non-increasing OID: {previous} >= {current}")]
    NonIncreasingOid { previous: Oid, current: Oid },
}

impl Error {
    /// Create a decode error with no target attached.
    pub fn malformed(offset: usize, kind: DecodeErrorKind) -> Self {
        Self::Malformed {
            target: None,
            offset,
            kind,
        }
    }

    /// Create an encode error.
    pub fn encode(kind: EncodeErrorKind) -> Self {
        Self::Encode { kind }
    }

    /// Create an authentication error.
    pub fn auth(target: Option<SocketAddr>, kind: AuthErrorKind) -> Self {
        Self::AuthenticationFailed { target, kind }
    }

    /// Create a decryption error.
    pub fn decrypt(target: Option<SocketAddr>, kind: CryptoErrorKind) -> Self {
        Self::DecryptionFailed { target, kind }
    }

    /// Create an encryption error.
    pub fn encrypt(target: Option<SocketAddr>, kind: CryptoErrorKind) -> Self {
        Self::EncryptionFailed { target, kind }
    }

    /// Create an invalid OID error from a kind (no input string).
    pub fn invalid_oid(kind: OidErrorKind) -> Self {
        Self::InvalidOid { kind, input: None }
    }

    /// Create an invalid OID error with the input string that failed.
    pub fn invalid_oid_with_input(kind: OidErrorKind, input: impl Into<Box<str>>) -> Self {
        Self::InvalidOid {
            kind,
            input: Some(input.into()),
        }
    }

    /// Coarse decode category, for `Malformed` errors.
    pub fn decode_error(&self) -> Option<DecodeError> {
        match self {
            Self::Malformed { kind, .. } => Some(kind.category()),
            _ => None,
        }
    }

    /// Whether the session may retry the attempt that produced this error.
    ///
    /// Only transient transport conditions qualify; remote errors and
    /// cancellation surface immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Malformed { .. })
    }

    /// Attach a target address to errors that carry one and lack it.
    pub fn with_target(mut self, addr: SocketAddr) -> Self {
        match &mut self {
            Self::Io { target, .. }
            | Self::Timeout { target, .. }
            | Self::Malformed { target, .. }
            | Self::Remote { target, .. }
            | Self::Cancelled { target, .. }
            | Self::UnknownEngineId { target }
            | Self::NotInTimeWindow { target }
            | Self::AuthenticationFailed { target, .. }
            | Self::DecryptionFailed { target, .. }
            | Self::EncryptionFailed { target, .. } => {
                target.get_or_insert(addr);
            }
            _ => {}
        }
        self
    }

    /// Get the target address if this error has one.
    pub fn target(&self) -> Option<SocketAddr> {
        match self {
            Self::Io { target, .. }
            | Self::Timeout { target, .. }
            | Self::Malformed { target, .. }
            | Self::Remote { target, .. }
            | Self::Cancelled { target, .. }
            | Self::UnknownEngineId { target }
            | Self::NotInTimeWindow { target }
            | Self::AuthenticationFailed { target, .. }
            | Self::DecryptionFailed { target, .. }
            | Self::EncryptionFailed { target, .. } => *target,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_status_round_trips_known_codes() {
        for code in 0..=18 {
            let status = ErrorStatus::from_i32(code);
            assert!(!matches!(status, ErrorStatus::Unknown(_)));
            assert_eq!(status.as_i32(), code);
        }
        assert_eq!(ErrorStatus::from_i32(2), ErrorStatus::NoSuchName);
        assert_eq!(ErrorStatus::from_i32(99), ErrorStatus::Unknown(99));
        assert_eq!(ErrorStatus::from_i32(-1), ErrorStatus::Unknown(-1));
        assert_eq!(ErrorStatus::Unknown(42).as_i32(), 42);
    }

    #[test]
    fn error_status_display_uses_rfc_names() {
        assert_eq!(ErrorStatus::NoSuchName.to_string(), "noSuchName");
        assert_eq!(ErrorStatus::InconsistentName.to_string(), "inconsistentName");
        assert_eq!(ErrorStatus::Unknown(77).to_string(), "unknown(77)");
    }

    #[test]
    fn decode_kinds_fold_into_three_categories() {
        assert_eq!(
            DecodeErrorKind::TruncatedData.category(),
            DecodeError::Truncated
        );
        assert_eq!(
            DecodeErrorKind::InsufficientData {
                needed: 4,
                available: 1
            }
            .category(),
            DecodeError::Truncated
        );
        assert_eq!(
            DecodeErrorKind::UnknownVersion(7).category(),
            DecodeError::UnknownTag
        );
        assert_eq!(
            DecodeErrorKind::UnknownValueTag(0x47).category(),
            DecodeError::UnknownTag
        );
        assert_eq!(
            DecodeErrorKind::IndefiniteLength.category(),
            DecodeError::MalformedLength
        );
        assert_eq!(
            DecodeErrorKind::TrailingData { remaining: 2 }.category(),
            DecodeError::MalformedLength
        );
    }

    #[test]
    fn with_target_does_not_overwrite() {
        let a: SocketAddr = "192.0.2.1:161".parse().unwrap();
        let b: SocketAddr = "192.0.2.2:161".parse().unwrap();

        let err = Error::malformed(3, DecodeErrorKind::TruncatedData).with_target(a);
        assert_eq!(err.target(), Some(a));
        let err = err.with_target(b);
        assert_eq!(err.target(), Some(a));
        assert_eq!(err.decode_error(), Some(DecodeError::Truncated));
    }

    #[test]
    fn retryable_classification() {
        let timeout = Error::Timeout {
            target: None,
            elapsed: Duration::from_secs(1),
            request_id: 1,
            retries: 0,
        };
        assert!(timeout.is_retryable());
        assert!(Error::malformed(0, DecodeErrorKind::TruncatedData).is_retryable());

        let remote = Error::Remote {
            target: None,
            status: ErrorStatus::NoSuchName,
            index: 1,
            oid: None,
        };
        assert!(!remote.is_retryable());
        let cancelled = Error::Cancelled {
            target: None,
            request_id: 9,
        };
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn config_error_converts() {
        let err: Error = ConfigError::InvalidSecurityCombination.into();
        assert!(matches!(
            err,
            Error::Config(ConfigError::InvalidSecurityCombination)
        ));
        assert!(err.to_string().contains("privacy requires authentication"));
    }
}
