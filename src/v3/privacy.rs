//! Privacy protocols: DES-CBC (RFC 3414 section 8) and AES-CFB (RFC 3826).
//!
//! DES: privParameters = engineBoots (4) || counter (4); IV = preIV XOR salt,
//! where preIV is the second half of the 16-byte key.
//!
//! AES: privParameters = 64-bit counter; IV = engineBoots (4) ||
//! engineTime (4) || salt (8).

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::auth::{MasterKey, extend_key};
use super::{AuthProtocol, KeyExtension, PrivProtocol};
use crate::error::{CryptoErrorKind, Error, Result};

const DES_BLOCK: usize = 8;

/// Per-session salt source. Starts at a random value, never yields zero.
#[derive(Debug)]
pub struct SaltCounter(AtomicU64);

impl SaltCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(random_seed()))
    }

    pub fn from_value(value: u64) -> Self {
        Self(AtomicU64::new(value))
    }

    pub fn next(&self) -> u64 {
        match self.0.fetch_add(1, Ordering::Relaxed) {
            0 => self.0.fetch_add(1, Ordering::Relaxed),
            value => value,
        }
    }
}

impl Default for SaltCounter {
    fn default() -> Self {
        Self::new()
    }
}

fn random_seed() -> u64 {
    let mut buf = [0u8; 8];
    match getrandom::fill(&mut buf) {
        Ok(()) => u64::from_ne_bytes(buf).max(1),
        Err(err) => {
            tracing::warn!(
                target: "snmp_query::v3",
                error = %err,
                "no OS randomness; seeding salt from clock"
            );
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(1)
                .max(1)
        }
    }
}

/// Localized privacy key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivKey {
    key: Vec<u8>,
    #[zeroize(skip)]
    protocol: PrivProtocol,
}

impl PrivKey {
    /// Derive from a password, hashing with the user's authentication protocol.
    pub fn from_password(
        auth_protocol: AuthProtocol,
        priv_protocol: PrivProtocol,
        password: &[u8],
        engine_id: &[u8],
    ) -> Self {
        let master = MasterKey::from_password(auth_protocol, password);
        Self::from_master_key(&master, priv_protocol, engine_id)
    }

    /// Localize `master` and extend it if the cipher needs more key material.
    pub fn from_master_key(master: &MasterKey, protocol: PrivProtocol, engine_id: &[u8]) -> Self {
        let auth_protocol = master.protocol();
        let localized = master.localize(engine_id);
        let key = match protocol.key_extension_for(auth_protocol) {
            KeyExtension::None => localized.as_bytes().to_vec(),
            KeyExtension::Blumenthal => {
                extend_key(auth_protocol, localized.as_bytes(), protocol.key_len())
            }
        };
        Self { key, protocol }
    }

    pub fn from_bytes(protocol: PrivProtocol, key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            protocol,
        }
    }

    pub fn protocol(&self) -> PrivProtocol {
        self.protocol
    }

    /// Encrypt a scoped PDU. Returns (ciphertext, privParameters).
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt: u64,
    ) -> Result<(Bytes, Bytes)> {
        tracing::trace!(
            target: "snmp_query::v3",
            { snmp.protocol = %self.protocol, snmp.bytes = plaintext.len() },
            "encrypting scoped PDU"
        );
        match self.protocol {
            PrivProtocol::Des => self.encrypt_des(plaintext, engine_boots, salt),
            _ => self.encrypt_aes(plaintext, engine_boots, engine_time, salt),
        }
    }

    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        priv_params: &[u8],
    ) -> Result<Bytes> {
        let Ok(salt) = <[u8; 8]>::try_from(priv_params) else {
            return Err(Error::decrypt(
                None,
                CryptoErrorKind::InvalidPrivParamsLength {
                    expected: self.protocol.salt_len(),
                    actual: priv_params.len(),
                },
            ));
        };
        match self.protocol {
            PrivProtocol::Des => self.decrypt_des(ciphertext, salt),
            _ => self.decrypt_aes(ciphertext, engine_boots, engine_time, salt),
        }
    }

    fn key_part(&self, range: std::ops::Range<usize>) -> Option<&[u8]> {
        self.key.get(range)
    }

    fn des_iv(&self, salt: &[u8; 8]) -> Option<[u8; 8]> {
        let pre_iv = self.key_part(8..16)?;
        let mut iv = [0u8; 8];
        for (out, (p, s)) in iv.iter_mut().zip(pre_iv.iter().zip(salt)) {
            *out = p ^ s;
        }
        Some(iv)
    }

    fn encrypt_des(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        counter: u64,
    ) -> Result<(Bytes, Bytes)> {
        use cbc::cipher::block_padding::NoPadding;
        use cbc::cipher::{BlockEncryptMut, KeyIvInit};
        type DesCbc = cbc::Encryptor<des::Des>;

        let mut salt = [0u8; 8];
        salt[..4].copy_from_slice(&engine_boots.to_be_bytes());
        salt[4..].copy_from_slice(&(counter as u32).to_be_bytes());

        let key_error = || Error::encrypt(None, CryptoErrorKind::InvalidKeyLength);
        let key = self.key_part(0..8).ok_or_else(key_error)?;
        let iv = self.des_iv(&salt).ok_or_else(key_error)?;

        let padded_len = plaintext.len().div_ceil(DES_BLOCK) * DES_BLOCK;
        let mut buffer = vec![0u8; padded_len];
        buffer[..plaintext.len()].copy_from_slice(plaintext);

        let cipher = DesCbc::new_from_slices(key, &iv).map_err(|_| key_error())?;
        let ciphertext = cipher
            .encrypt_padded_mut::<NoPadding>(&mut buffer, padded_len)
            .map_err(|_| {
                Error::encrypt(
                    None,
                    CryptoErrorKind::InvalidCiphertextLength {
                        length: padded_len,
                        block_size: DES_BLOCK,
                    },
                )
            })?;
        Ok((Bytes::copy_from_slice(ciphertext), Bytes::copy_from_slice(&salt)))
    }

    fn decrypt_des(&self, ciphertext: &[u8], salt: [u8; 8]) -> Result<Bytes> {
        use cbc::cipher::block_padding::NoPadding;
        use cbc::cipher::{BlockDecryptMut, KeyIvInit};
        type DesCbc = cbc::Decryptor<des::Des>;

        let length_error = || {
            Error::decrypt(
                None,
                CryptoErrorKind::InvalidCiphertextLength {
                    length: ciphertext.len(),
                    block_size: DES_BLOCK,
                },
            )
        };
        if ciphertext.is_empty() || !ciphertext.len().is_multiple_of(DES_BLOCK) {
            return Err(length_error());
        }

        let key_error = || Error::decrypt(None, CryptoErrorKind::InvalidKeyLength);
        let key = self.key_part(0..8).ok_or_else(key_error)?;
        let iv = self.des_iv(&salt).ok_or_else(key_error)?;

        let cipher = DesCbc::new_from_slices(key, &iv).map_err(|_| key_error())?;
        let mut buffer = ciphertext.to_vec();
        let plaintext = cipher
            .decrypt_padded_mut::<NoPadding>(&mut buffer)
            .map_err(|_| length_error())?;
        Ok(Bytes::copy_from_slice(plaintext))
    }

    fn aes_iv(engine_boots: u32, engine_time: u32, salt: &[u8; 8]) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..4].copy_from_slice(&engine_boots.to_be_bytes());
        iv[4..8].copy_from_slice(&engine_time.to_be_bytes());
        iv[8..].copy_from_slice(salt);
        iv
    }

    fn encrypt_aes(
        &self,
        plaintext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt: u64,
    ) -> Result<(Bytes, Bytes)> {
        use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};

        let salt = salt.to_be_bytes();
        let iv = Self::aes_iv(engine_boots, engine_time, &salt);
        let key_error = || Error::encrypt(None, CryptoErrorKind::InvalidKeyLength);
        let key = self.key_part(0..self.protocol.key_len()).ok_or_else(key_error)?;

        let mut buffer = plaintext.to_vec();
        match self.protocol {
            PrivProtocol::Aes192 => cfb_mode::Encryptor::<aes::Aes192>::new_from_slices(key, &iv)
                .map_err(|_| key_error())?
                .encrypt(&mut buffer),
            PrivProtocol::Aes256 => cfb_mode::Encryptor::<aes::Aes256>::new_from_slices(key, &iv)
                .map_err(|_| key_error())?
                .encrypt(&mut buffer),
            _ => cfb_mode::Encryptor::<aes::Aes128>::new_from_slices(key, &iv)
                .map_err(|_| key_error())?
                .encrypt(&mut buffer),
        }
        Ok((Bytes::from(buffer), Bytes::copy_from_slice(&salt)))
    }

    fn decrypt_aes(
        &self,
        ciphertext: &[u8],
        engine_boots: u32,
        engine_time: u32,
        salt: [u8; 8],
    ) -> Result<Bytes> {
        use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};

        let iv = Self::aes_iv(engine_boots, engine_time, &salt);
        let key_error = || Error::decrypt(None, CryptoErrorKind::InvalidKeyLength);
        let key = self.key_part(0..self.protocol.key_len()).ok_or_else(key_error)?;

        let mut buffer = ciphertext.to_vec();
        match self.protocol {
            PrivProtocol::Aes192 => cfb_mode::Decryptor::<aes::Aes192>::new_from_slices(key, &iv)
                .map_err(|_| key_error())?
                .decrypt(&mut buffer),
            PrivProtocol::Aes256 => cfb_mode::Decryptor::<aes::Aes256>::new_from_slices(key, &iv)
                .map_err(|_| key_error())?
                .decrypt(&mut buffer),
            _ => cfb_mode::Decryptor::<aes::Aes128>::new_from_slices(key, &iv)
                .map_err(|_| key_error())?
                .decrypt(&mut buffer),
        }
        Ok(Bytes::from(buffer))
    }
}

impl std::fmt::Debug for PrivKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivKey")
            .field("protocol", &self.protocol)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENGINE: &[u8] = b"\x80\x00\x1f\x88\x04test-engine";

    #[test]
    fn des_round_trip_pads_to_block() {
        let key = PrivKey::from_bytes(PrivProtocol::Des, (1u8..=16).collect::<Vec<_>>());
        let plaintext = b"Hello, SNMPv3 World!";

        let (ciphertext, params) = key.encrypt(plaintext, 100, 12345, 7).unwrap();
        assert_eq!(ciphertext.len(), 24);
        assert_eq!(&params[..], &[0, 0, 0, 100, 0, 0, 0, 7]);

        let decrypted = key.decrypt(&ciphertext, 100, 12345, &params).unwrap();
        assert_eq!(&decrypted[..plaintext.len()], plaintext);
        assert!(decrypted[plaintext.len()..].iter().all(|&b| b == 0));
    }

    #[test]
    fn aes_round_trip_all_sizes() {
        for protocol in [PrivProtocol::Aes128, PrivProtocol::Aes192, PrivProtocol::Aes256] {
            let key = PrivKey::from_password(AuthProtocol::Sha1, protocol, b"privpass123", ENGINE);
            let plaintext = b"Hello, SNMPv3 AES World!";

            let (ciphertext, params) = key.encrypt(plaintext, 200, 54321, 0xDEAD_BEEF).unwrap();
            assert_eq!(ciphertext.len(), plaintext.len());
            assert_ne!(&ciphertext[..], plaintext);
            assert_eq!(&params[..], &0xDEAD_BEEFu64.to_be_bytes());

            let decrypted = key.decrypt(&ciphertext, 200, 54321, &params).unwrap();
            assert_eq!(&decrypted[..], plaintext);
        }
    }

    #[test]
    fn aes_iv_depends_on_engine_time() {
        let key = PrivKey::from_bytes(PrivProtocol::Aes128, vec![9; 16]);
        let (ciphertext, params) = key.encrypt(b"scoped pdu bytes", 1, 100, 1).unwrap();
        let wrong = key.decrypt(&ciphertext, 1, 101, &params).unwrap();
        assert_ne!(&wrong[..], b"scoped pdu bytes");
    }

    #[test]
    fn rejects_bad_lengths() {
        let des = PrivKey::from_bytes(PrivProtocol::Des, vec![0; 16]);
        assert!(matches!(
            des.decrypt(&[0; 12], 0, 0, &[0; 8]),
            Err(Error::DecryptionFailed {
                kind: CryptoErrorKind::InvalidCiphertextLength { length: 12, block_size: 8 },
                ..
            })
        ));
        assert!(matches!(
            des.decrypt(&[0; 16], 0, 0, &[0; 4]),
            Err(Error::DecryptionFailed {
                kind: CryptoErrorKind::InvalidPrivParamsLength { expected: 8, actual: 4 },
                ..
            })
        ));

        let short = PrivKey::from_bytes(PrivProtocol::Aes256, vec![0; 16]);
        assert!(short.encrypt(b"x", 0, 0, 1).is_err());
    }

    #[test]
    fn extended_keys_have_cipher_length() {
        let key =
            PrivKey::from_password(AuthProtocol::Md5, PrivProtocol::Aes256, b"privpass123", ENGINE);
        assert_eq!(key.key.len(), 32);
        let key = PrivKey::from_password(
            AuthProtocol::Sha512,
            PrivProtocol::Aes128,
            b"privpass123",
            ENGINE,
        );
        assert_eq!(key.key.len(), 64);
    }

    #[test]
    fn salt_counter_skips_zero() {
        let counter = SaltCounter::from_value(u64::MAX);
        assert_eq!(counter.next(), u64::MAX);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.next(), 2);
    }
}
