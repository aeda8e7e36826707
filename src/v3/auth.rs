//! Key derivation and message authentication (RFC 3414 section 6, RFC 7860).
//!
//! Password-to-key runs once per credential ([`MasterKey`]); localization
//! binds the result to an engine ID ([`LocalizedKey`]) and is cheap.

use digest::{Digest, KeyInit};
use hmac::{Hmac, Mac};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::{AuthProtocol, PrivKey, PrivProtocol};
use crate::error::{AuthErrorKind, Error, Result};

/// net-snmp refuses passwords shorter than this.
pub const MIN_PASSWORD_LENGTH: usize = 8;

const EXPANSION_SIZE: usize = 1_048_576;

/// Non-localized key (Ku): the password stretched over 1 MiB and hashed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl MasterKey {
    pub fn from_password(protocol: AuthProtocol, password: &[u8]) -> Self {
        if password.len() < MIN_PASSWORD_LENGTH {
            tracing::warn!(
                target: "snmp_query::v3",
                { password_len = password.len(), min_len = MIN_PASSWORD_LENGTH },
                "SNMPv3 password shorter than recommended minimum"
            );
        }
        let key = match protocol {
            AuthProtocol::Md5 => password_to_key::<md5::Md5>(password),
            AuthProtocol::Sha1 => password_to_key::<sha1::Sha1>(password),
            AuthProtocol::Sha224 => password_to_key::<sha2::Sha224>(password),
            AuthProtocol::Sha256 => password_to_key::<sha2::Sha256>(password),
            AuthProtocol::Sha384 => password_to_key::<sha2::Sha384>(password),
            AuthProtocol::Sha512 => password_to_key::<sha2::Sha512>(password),
        };
        Self { key, protocol }
    }

    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Kul = H(Ku || engineID || Ku)
    pub fn localize(&self, engine_id: &[u8]) -> LocalizedKey {
        LocalizedKey {
            key: hash(self.protocol, &[&self.key, engine_id, &self.key]),
            protocol: self.protocol,
        }
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Master keys for one user: authentication plus optional privacy.
///
/// Privacy keys are stretched with the authentication hash.
#[derive(Clone, Debug)]
pub struct MasterKeys {
    auth: MasterKey,
    privacy: Option<(PrivProtocol, MasterKey)>,
}

impl MasterKeys {
    pub fn new(auth_protocol: AuthProtocol, auth_password: &[u8]) -> Self {
        Self {
            auth: MasterKey::from_password(auth_protocol, auth_password),
            privacy: None,
        }
    }

    pub fn with_privacy(mut self, protocol: PrivProtocol, password: &[u8]) -> Self {
        let master = MasterKey::from_password(self.auth.protocol, password);
        self.privacy = Some((protocol, master));
        self
    }

    pub fn auth_protocol(&self) -> AuthProtocol {
        self.auth.protocol
    }

    pub fn priv_protocol(&self) -> Option<PrivProtocol> {
        self.privacy.as_ref().map(|(p, _)| *p)
    }

    /// Localize both keys for an engine.
    pub fn localize(&self, engine_id: &[u8]) -> (LocalizedKey, Option<PrivKey>) {
        let auth = self.auth.localize(engine_id);
        let privacy = self
            .privacy
            .as_ref()
            .map(|(protocol, master)| PrivKey::from_master_key(master, *protocol, engine_id));
        (auth, privacy)
    }
}

/// Authentication key bound to one engine (Kul).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct LocalizedKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: AuthProtocol,
}

impl LocalizedKey {
    pub fn from_password(protocol: AuthProtocol, password: &[u8], engine_id: &[u8]) -> Self {
        MasterKey::from_password(protocol, password).localize(engine_id)
    }

    pub fn from_bytes(protocol: AuthProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    pub fn protocol(&self) -> AuthProtocol {
        self.protocol
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.key
    }

    pub fn mac_len(&self) -> usize {
        self.protocol.mac_len()
    }

    /// HMAC over `data`, truncated to [`mac_len`](Self::mac_len).
    pub fn compute_hmac(&self, data: &[u8]) -> Result<Vec<u8>> {
        let len = self.mac_len();
        match self.protocol {
            AuthProtocol::Md5 => truncated_mac::<Hmac<md5::Md5>>(&self.key, data, len),
            AuthProtocol::Sha1 => truncated_mac::<Hmac<sha1::Sha1>>(&self.key, data, len),
            AuthProtocol::Sha224 => truncated_mac::<Hmac<sha2::Sha224>>(&self.key, data, len),
            AuthProtocol::Sha256 => truncated_mac::<Hmac<sha2::Sha256>>(&self.key, data, len),
            AuthProtocol::Sha384 => truncated_mac::<Hmac<sha2::Sha384>>(&self.key, data, len),
            AuthProtocol::Sha512 => truncated_mac::<Hmac<sha2::Sha512>>(&self.key, data, len),
        }
    }

    /// Constant-time MAC check.
    pub fn verify_hmac(&self, data: &[u8], expected: &[u8]) -> bool {
        match self.compute_hmac(data) {
            Ok(computed) => computed.ct_eq(expected).into(),
            Err(_) => false,
        }
    }
}

impl std::fmt::Debug for LocalizedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalizedKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Write the MAC of `message` into its zero-filled authentication parameters.
pub fn authenticate_message(
    key: &LocalizedKey,
    message: &mut [u8],
    auth_offset: usize,
    auth_len: usize,
) -> Result<()> {
    let mac = key.compute_hmac(message)?;
    let slot = auth_offset
        .checked_add(auth_len)
        .and_then(|end| message.get_mut(auth_offset..end))
        .filter(|slot| slot.len() == mac.len())
        .ok_or_else(|| Error::auth(None, AuthErrorKind::AuthParamsNotFound))?;
    slot.copy_from_slice(&mac);
    tracing::trace!(target: "snmp_query::v3", { snmp.mac_len = auth_len }, "message authenticated");
    Ok(())
}

/// Check the MAC carried at `auth_offset` against the rest of `message`.
pub fn verify_message(
    key: &LocalizedKey,
    message: &[u8],
    auth_offset: usize,
    auth_len: usize,
) -> bool {
    let Some(received) = auth_offset
        .checked_add(auth_len)
        .and_then(|end| message.get(auth_offset..end))
    else {
        return false;
    };
    if received.len() != key.mac_len() {
        return false;
    }
    let mut zeroed = message.to_vec();
    zeroed[auth_offset..auth_offset + auth_len].fill(0);
    key.verify_hmac(&zeroed, received)
}

/// Blumenthal extension: append H(key) until `len` bytes are available.
pub(crate) fn extend_key(protocol: AuthProtocol, key: &[u8], len: usize) -> Vec<u8> {
    let mut extended = key.to_vec();
    while extended.len() < len {
        let next = hash(protocol, &[&extended]);
        extended.extend_from_slice(&next);
    }
    extended.truncate(len);
    extended
}

fn hash(protocol: AuthProtocol, parts: &[&[u8]]) -> Vec<u8> {
    match protocol {
        AuthProtocol::Md5 => hash_parts::<md5::Md5>(parts),
        AuthProtocol::Sha1 => hash_parts::<sha1::Sha1>(parts),
        AuthProtocol::Sha224 => hash_parts::<sha2::Sha224>(parts),
        AuthProtocol::Sha256 => hash_parts::<sha2::Sha256>(parts),
        AuthProtocol::Sha384 => hash_parts::<sha2::Sha384>(parts),
        AuthProtocol::Sha512 => hash_parts::<sha2::Sha512>(parts),
    }
}

fn hash_parts<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

/// RFC 3414 A.2: hash the password repeated to fill 1 MiB, 64 bytes at a time.
fn password_to_key<D: Digest>(password: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return vec![0u8; <D as Digest>::output_size()];
    }

    let mut hasher = D::new();
    let mut chunk = [0u8; 64];
    let mut index = 0;
    for _ in 0..EXPANSION_SIZE / chunk.len() {
        for byte in &mut chunk {
            *byte = password[index];
            index = (index + 1) % password.len();
        }
        hasher.update(chunk);
    }
    chunk.zeroize();
    hasher.finalize().to_vec()
}

fn truncated_mac<M: Mac + KeyInit>(key: &[u8], data: &[u8], len: usize) -> Result<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key)
        .map_err(|_| Error::auth(None, AuthErrorKind::NoAuthKey))?;
    Mac::update(&mut mac, data);
    let full = mac.finalize().into_bytes();
    Ok(full[..len.min(full.len())].to_vec())
}
