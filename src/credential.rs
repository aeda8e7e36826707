//! Credential model.
//!
//! [`Credential::build`] validates a version and a set of
//! [`CredentialParams`] before any network activity:
//!
//! - v1/v2c take a community string and nothing else.
//! - v3 takes a non-empty username, optionally authentication, and
//!   optionally privacy. Privacy without authentication is rejected with
//!   [`ConfigError::InvalidSecurityCombination`].
//!
//! ```
//! use snmp_query::{AuthProtocol, Credential, CredentialParams, PrivProtocol, Version};
//!
//! let v2c = Credential::build(Version::V2c, CredentialParams::community("public")).unwrap();
//! assert_eq!(v2c.version(), Version::V2c);
//!
//! let v3 = Credential::build(
//!     Version::V3,
//!     CredentialParams::usm("admin")
//!         .auth(AuthProtocol::Sha256, "authpass123")
//!         .privacy(PrivProtocol::Aes128, "privpass123"),
//! )
//! .unwrap();
//! assert_eq!(v3.version(), Version::V3);
//! ```

use bytes::Bytes;
use zeroize::Zeroizing;

use crate::error::ConfigError;
use crate::message::SecurityLevel;
use crate::v3::{AuthProtocol, PrivProtocol};
use crate::version::Version;

/// Raw credential parameters, validated by [`Credential::build`].
#[derive(Clone, Default)]
pub struct CredentialParams {
    community: Option<Bytes>,
    username: Option<Bytes>,
    auth: Option<(AuthProtocol, Zeroizing<Vec<u8>>)>,
    privacy: Option<(PrivProtocol, Zeroizing<Vec<u8>>)>,
    context_name: Option<Bytes>,
}

impl CredentialParams {
    /// Parameters holding a community string.
    pub fn community(community: impl Into<Bytes>) -> Self {
        Self {
            community: Some(community.into()),
            ..Self::default()
        }
    }

    /// Parameters for a USM user.
    pub fn usm(username: impl Into<Bytes>) -> Self {
        Self {
            username: Some(username.into()),
            ..Self::default()
        }
    }

    /// Set (or add) a community string.
    pub fn with_community(mut self, community: impl Into<Bytes>) -> Self {
        self.community = Some(community.into());
        self
    }

    /// Enable authentication.
    pub fn auth(mut self, protocol: AuthProtocol, password: impl AsRef<[u8]>) -> Self {
        self.auth = Some((protocol, Zeroizing::new(password.as_ref().to_vec())));
        self
    }

    /// Enable privacy. Requires [`auth`](Self::auth) as well.
    pub fn privacy(mut self, protocol: PrivProtocol, password: impl AsRef<[u8]>) -> Self {
        self.privacy = Some((protocol, Zeroizing::new(password.as_ref().to_vec())));
        self
    }

    /// SNMPv3 context name (empty by default).
    pub fn context_name(mut self, name: impl Into<Bytes>) -> Self {
        self.context_name = Some(name.into());
        self
    }

    fn has_usm_fields(&self) -> bool {
        self.username.is_some()
            || self.auth.is_some()
            || self.privacy.is_some()
            || self.context_name.is_some()
    }
}

impl std::fmt::Debug for CredentialParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialParams")
            .field("community", &self.community.as_ref().map(|_| "<redacted>"))
            .field("username", &self.username)
            .field("auth", &self.auth.as_ref().map(|(p, _)| p))
            .field("privacy", &self.privacy.as_ref().map(|(p, _)| p))
            .field("context_name", &self.context_name)
            .finish()
    }
}

/// Validated security parameters for a session.
#[derive(Clone)]
pub enum Credential {
    /// v1 or v2c community string.
    Community { version: Version, community: Bytes },
    /// SNMPv3 user.
    Usm(UsmCredential),
}

/// SNMPv3 user with its protocols and passwords.
///
/// Passwords are wiped from memory when the credential is dropped.
#[derive(Clone)]
pub struct UsmCredential {
    pub(crate) username: Bytes,
    pub(crate) auth: Option<(AuthProtocol, Zeroizing<Vec<u8>>)>,
    pub(crate) privacy: Option<(PrivProtocol, Zeroizing<Vec<u8>>)>,
    pub(crate) context_name: Bytes,
}

impl UsmCredential {
    pub fn username(&self) -> &[u8] {
        &self.username
    }

    pub fn auth_protocol(&self) -> Option<AuthProtocol> {
        self.auth.as_ref().map(|(p, _)| *p)
    }

    pub fn priv_protocol(&self) -> Option<PrivProtocol> {
        self.privacy.as_ref().map(|(p, _)| *p)
    }

    pub fn context_name(&self) -> &[u8] {
        &self.context_name
    }

    pub fn security_level(&self) -> SecurityLevel {
        match (&self.auth, &self.privacy) {
            (Some(_), Some(_)) => SecurityLevel::AuthPriv,
            (Some(_), None) => SecurityLevel::AuthNoPriv,
            _ => SecurityLevel::NoAuthNoPriv,
        }
    }
}

impl std::fmt::Debug for UsmCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsmCredential")
            .field("username", &String::from_utf8_lossy(&self.username))
            .field("auth", &self.auth_protocol())
            .field("privacy", &self.priv_protocol())
            .field("context_name", &String::from_utf8_lossy(&self.context_name))
            .finish()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Community { version, .. } => f
                .debug_struct("Community")
                .field("version", version)
                .field("community", &"<redacted>")
                .finish(),
            Credential::Usm(usm) => usm.fmt(f),
        }
    }
}

impl Credential {
    /// Validate `params` for `version`.
    pub fn build(version: Version, params: CredentialParams) -> Result<Self, ConfigError> {
        if version.is_community() {
            if params.has_usm_fields() {
                return Err(ConfigError::UnexpectedUsmParameters { version });
            }
            let community = params
                .community
                .ok_or(ConfigError::MissingCommunity { version })?;
            return Ok(Credential::Community { version, community });
        }

        if params.community.is_some() {
            return Err(ConfigError::UnexpectedCommunity);
        }
        let username = match params.username {
            Some(name) if !name.is_empty() => name,
            _ => return Err(ConfigError::EmptyUsername),
        };
        if params.privacy.is_some() && params.auth.is_none() {
            return Err(ConfigError::InvalidSecurityCombination);
        }
        if params.auth.as_ref().is_some_and(|(_, pw)| pw.is_empty()) {
            return Err(ConfigError::EmptyPassword { which: "authentication" });
        }
        if params.privacy.as_ref().is_some_and(|(_, pw)| pw.is_empty()) {
            return Err(ConfigError::EmptyPassword { which: "privacy" });
        }

        Ok(Credential::Usm(UsmCredential {
            username,
            auth: params.auth,
            privacy: params.privacy,
            context_name: params.context_name.unwrap_or_default(),
        }))
    }

    /// SNMPv1 community credential.
    pub fn v1(community: impl Into<Bytes>) -> Self {
        Credential::Community {
            version: Version::V1,
            community: community.into(),
        }
    }

    /// SNMPv2c community credential.
    pub fn v2c(community: impl Into<Bytes>) -> Self {
        Credential::Community {
            version: Version::V2c,
            community: community.into(),
        }
    }

    pub fn version(&self) -> Version {
        match self {
            Credential::Community { version, .. } => *version,
            Credential::Usm(_) => Version::V3,
        }
    }

    pub fn as_usm(&self) -> Option<&UsmCredential> {
        match self {
            Credential::Usm(usm) => Some(usm),
            Credential::Community { .. } => None,
        }
    }
}

impl Default for Credential {
    fn default() -> Self {
        Credential::v2c("public")
    }
}
