//! Susurrus Crypto -- symmetric primitives for the mail request path.
//!
//! scrypt password-to-key derivation (N=16384, r=8, p=1) and AES-256-GCM
//! sealing with a binary `[nonce:12 | ciphertext | tag:16]` layout. The
//! key is derived from the password alone (fixed domain salt) so any peer
//! knowing the password can open a mail request.

use std::collections::HashMap;
use std::sync::Mutex;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use sha2::{Digest, Sha256};

/// scrypt parameters: N=16384, r=8, p=1, 32-byte key.
const SCRYPT_LOG_N: u8 = 14; // 2^14 = 16384
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

pub const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

/// Domain-separation salt for mail symmetric keys. Fixed: the key must be
/// reproducible from the password alone on every node.
const SYM_KEY_SALT: &[u8] = b"susurrus-mail-sym-key-v1";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: authentication tag mismatch")]
    DecryptionFailed,
    #[error("undersized ciphertext: {0} bytes")]
    UndersizedCiphertext(usize),
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("unknown key id: {0}")]
    UnknownKeyId(String),
    #[error("lock poisoned")]
    LockPoisoned,
}

/// Derive a 256-bit symmetric key from a passphrase.
pub fn derive_sym_key(password: &str) -> Result<[u8; KEY_LENGTH], CryptoError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LENGTH)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    let mut key = [0u8; KEY_LENGTH];
    scrypt::scrypt(password.as_bytes(), SYM_KEY_SALT, &params, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;

    Ok(key)
}

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Registry of derived symmetric keys, addressed by opaque id.
///
/// The id is the hex SHA-256 of the key bytes, so re-deriving the same
/// password yields the same id.
#[derive(Default)]
pub struct SymKeyRing {
    keys: Mutex<HashMap<String, [u8; KEY_LENGTH]>>,
}

impl SymKeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a key from `password` and register it. Idempotent.
    pub fn add_from_password(&self, password: &str) -> Result<String, CryptoError> {
        let key = derive_sym_key(password)?;
        let id = hex::encode(sha256(&key));
        self.keys
            .lock()
            .map_err(|_| CryptoError::LockPoisoned)?
            .insert(id.clone(), key);
        Ok(id)
    }

    pub fn get(&self, key_id: &str) -> Result<[u8; KEY_LENGTH], CryptoError> {
        self.keys
            .lock()
            .map_err(|_| CryptoError::LockPoisoned)?
            .get(key_id)
            .copied()
            .ok_or_else(|| CryptoError::UnknownKeyId(key_id.to_string()))
    }
}

/// Encrypt `plaintext` under `key`. Output: `[nonce:12 | ciphertext | tag:16]`.
pub fn seal(key: &[u8; KEY_LENGTH], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| CryptoError::EncryptionFailed("invalid key".into()))?;
    let aead = LessSafeKey::new(unbound);

    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| CryptoError::EncryptionFailed("RNG failure".into()))?;
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    // ring appends the auth tag to the ciphertext
    let mut in_out = plaintext.to_vec();
    aead.seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::EncryptionFailed("seal failed".into()))?;

    let mut out = Vec::with_capacity(NONCE_LENGTH + in_out.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

/// Decrypt bytes produced by [`seal`].
pub fn open(key: &[u8; KEY_LENGTH], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LENGTH + TAG_LENGTH {
        return Err(CryptoError::UndersizedCiphertext(sealed.len()));
    }

    let unbound =
        UnboundKey::new(&AES_256_GCM, key).map_err(|_| CryptoError::DecryptionFailed)?;
    let aead = LessSafeKey::new(unbound);

    let mut nonce_bytes = [0u8; NONCE_LENGTH];
    nonce_bytes.copy_from_slice(&sealed[..NONCE_LENGTH]);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = sealed[NONCE_LENGTH..].to_vec();
    let plaintext = aead
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| CryptoError::DecryptionFailed)?;

    Ok(plaintext.to_vec())
}
