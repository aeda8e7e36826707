#![allow(clippy::result_large_err)]

//! # snmp-query
//!
//! Async SNMP client core: GET, GETNEXT and GETBULK over UDP for SNMPv1,
//! v2c and v3 (USM), with retries, cancellation and lazy subtree walks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snmp_query::{Credential, Session, oid};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), snmp_query::Error> {
//!     let session = Session::builder("192.0.2.1", Credential::v2c("public"))
//!         .connect()
//!         .await?;
//!
//!     let name = session.get_one(&oid!(1, 3, 6, 1, 2, 1, 1, 5, 0)).await?;
//!     println!("sysName: {name}");
//!
//!     let mut walk = session.walk(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2))?;
//!     while let Some(vb) = walk.next().await {
//!         let vb = vb?;
//!         println!("{}: {}", vb.oid, vb.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Every operation returns [`Error`]. The ones a caller usually matches on:
//!
//! - [`Error::Timeout`]: no valid response after all attempts.
//! - [`Error::Malformed`]: the response could not be decoded.
//! - [`Error::Remote`]: the agent answered with a non-zero error-status.
//!   `index` is 1-based into the request's bindings.
//! - [`Error::Cancelled`]: the call was cancelled or the session closed.

pub mod ber;
pub mod credential;
pub mod error;
pub mod message;
pub mod oid;
pub mod pdu;
pub mod prelude;
pub mod session;
pub mod transport;
pub mod v3;
pub mod value;
pub mod varbind;
pub mod version;

pub(crate) mod util;

pub use credential::{Credential, CredentialParams, UsmCredential};
pub use error::{
    AuthErrorKind, ConfigError, CryptoErrorKind, DecodeError, DecodeErrorKind, EncodeErrorKind,
    Error, ErrorStatus, OidErrorKind, Result,
};
pub use message::SecurityLevel;
pub use oid::Oid;
pub use pdu::{Pdu, PduType};
pub use session::{
    Backoff, BulkWalk, Retry, RetryBuilder, Session, SessionBuilder, TableWalk, Walk, WalkMode,
    WalkStream,
};
pub use transport::{SharedUdpHandle, SharedUdpTransport, Transport, UdpTransport};
pub use v3::{AuthProtocol, EngineCache, EngineState, PrivProtocol};
pub use value::Value;
pub use varbind::VarBind;
pub use version::Version;

/// Session over a dedicated UDP socket.
pub type UdpSession = Session<UdpTransport>;

/// Session multiplexed over a [`SharedUdpTransport`].
pub type SharedSession = Session<SharedUdpHandle>;

/// Scripted transport and response builders, exposed via the `testing`
/// feature.
#[cfg(feature = "testing")]
pub mod testing {
    pub use crate::transport::{MockResponse, MockTransport, RecordedRequest, ResponseBuilder};
}
