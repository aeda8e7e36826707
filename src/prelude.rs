//! Common imports.
//!
//! ```rust,no_run
//! use snmp_query::prelude::*;
//! ```

pub use crate::credential::{Credential, CredentialParams};
pub use crate::error::{Error, ErrorStatus, Result};
pub use crate::oid::Oid;
pub use crate::session::{Retry, Session};
pub use crate::v3::{AuthProtocol, PrivProtocol};
pub use crate::value::Value;
pub use crate::varbind::VarBind;
pub use crate::version::Version;

#[doc(no_inline)]
pub use crate::oid;
