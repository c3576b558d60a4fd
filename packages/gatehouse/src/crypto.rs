//! Cryptographic utilities: token generation, token hashing, and encryption
//! of provider secrets at rest.

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use color_eyre::{
    Result,
    eyre::{Context, bail, eyre},
};
use derive_more::Debug;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::auth::SessionToken;

/// Length of the AES-GCM nonce prefixed to every sealed secret.
const NONCE_LENGTH: usize = 12;

/// A hashed session token.
///
/// Hashed tokens use SHA2 (SHA256): when you call `new`, the plaintext token
/// is hashed to produce a deterministic binary hash. Session lookups match the
/// hash of the presented token against the stored hash.
///
/// This type does not implement `Serialize` or `Deserialize`; clients send the
/// plaintext form and the hash only ever lives in the database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenHash(Vec<u8>);

impl TokenHash {
    /// Create a new instance from the given plaintext token.
    pub fn new(token: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(token.as_ref());
        let hash = hasher.finalize();
        Self(hash.to_vec())
    }

    /// Get the hash as bytes for storage.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Generate a new session token with 256 bits of entropy.
///
/// Returns a 64-character hex string (32 random bytes, hex-encoded).
pub fn generate_session_token() -> SessionToken {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    SessionToken::new(hex::encode(bytes))
}

/// Generate a workspace invitation token.
///
/// 32 random bytes, encoded as unpadded URL-safe base64 (43 characters) so it
/// can be embedded directly in an accept link.
pub fn generate_invitation_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a GitHub App manifest state token.
///
/// Same shape as an invitation token; it travels through GitHub and back in
/// a query string.
pub fn generate_manifest_state() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A secret as stored in the database.
///
/// When `key_id` is `None` the bytes are the plaintext secret.
#[derive(Clone, PartialEq, Eq, Debug)]
#[debug("SealedSecret(key_id = {:?}, {} bytes)", self.key_id, self.bytes.len())]
pub struct SealedSecret {
    pub bytes: Vec<u8>,
    pub key_id: Option<String>,
}

/// Encrypts provider secrets at rest with AES-256-GCM.
///
/// A cipher constructed without a key passes secrets through unchanged; the
/// sealed form then carries no key id.
#[derive(Clone, Debug)]
pub enum SecretCipher {
    Plaintext,
    #[debug("Aes256Gcm(key_id = {key_id})")]
    Aes256Gcm { cipher: Aes256Gcm, key_id: String },
}

impl SecretCipher {
    /// Build a cipher from a 64 character hex encoded 256-bit key.
    pub fn from_hex(key: &str) -> Result<Self> {
        let key = hex::decode(key.trim()).context("decode encryption key as hex")?;
        if key.len() != 32 {
            bail!("encryption key must be 32 bytes, got {}", key.len());
        }

        let key_id = hex::encode(&Sha256::digest(&key)[..4]);
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|err| eyre!("construct cipher: {err}"))?;
        Ok(Self::Aes256Gcm { cipher, key_id })
    }

    /// Build a cipher from an optional key, passing secrets through when the
    /// key is absent.
    pub fn from_optional_hex(key: Option<&str>) -> Result<Self> {
        match key {
            Some(key) => Self::from_hex(key),
            None => Ok(Self::Plaintext),
        }
    }

    /// The id of the active key, if any.
    pub fn key_id(&self) -> Option<&str> {
        match self {
            SecretCipher::Plaintext => None,
            SecretCipher::Aes256Gcm { key_id, .. } => Some(key_id),
        }
    }

    /// Seal a secret for storage; the nonce is prefixed to the ciphertext.
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedSecret> {
        match self {
            SecretCipher::Plaintext => Ok(SealedSecret {
                bytes: plaintext.to_vec(),
                key_id: None,
            }),
            SecretCipher::Aes256Gcm { cipher, key_id } => {
                let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
                let ciphertext = cipher
                    .encrypt(&nonce, plaintext)
                    .map_err(|err| eyre!("encrypt secret: {err}"))?;

                let mut bytes = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
                bytes.extend_from_slice(&nonce);
                bytes.extend_from_slice(&ciphertext);
                Ok(SealedSecret {
                    bytes,
                    key_id: Some(key_id.clone()),
                })
            }
        }
    }

    /// Open a sealed secret.
    pub fn open(&self, sealed: &SealedSecret) -> Result<Vec<u8>> {
        match (self, &sealed.key_id) {
            (_, None) => Ok(sealed.bytes.clone()),
            (SecretCipher::Plaintext, Some(key_id)) => {
                bail!("secret is encrypted with key {key_id} but no encryption key is configured")
            }
            (SecretCipher::Aes256Gcm { cipher, key_id }, Some(sealed_key)) => {
                if key_id != sealed_key {
                    bail!("secret is encrypted with key {sealed_key}, active key is {key_id}");
                }
                if sealed.bytes.len() < NONCE_LENGTH {
                    bail!("sealed secret too short");
                }

                let (nonce, ciphertext) = sealed.bytes.split_at(NONCE_LENGTH);
                cipher
                    .decrypt(Nonce::from_slice(nonce), ciphertext)
                    .map_err(|err| eyre!("decrypt secret: {err}"))
            }
        }
    }
}
