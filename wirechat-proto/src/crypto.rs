//! Symmetric frame encryption for the `WireChat` wire protocol.
//!
//! A single 256-bit key is shared out of band by all endpoints; there is
//! no per-session negotiation. Each sealed frame body is
//! `[12-byte nonce][ChaCha20-Poly1305 ciphertext]` with a fresh random
//! nonce. Media frames skip the cipher entirely (see the codec).

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

/// Nonce length used by ChaCha20-Poly1305.
const NONCE_LEN: usize = 12;

/// Built-in development key, the moral equivalent of the fixed key a
/// deployment would distribute out of band. Override it via config for
/// anything beyond local testing.
pub const DEFAULT_KEY: [u8; 32] = [
    0x5a, 0x7d, 0x19, 0xc4, 0x8e, 0x02, 0xb6, 0xf1, 0x3d, 0x90, 0x4a, 0xe7, 0x21, 0xcb, 0x65, 0x08,
    0xd2, 0x4f, 0x9b, 0x36, 0x70, 0xa8, 0x1c, 0xe3, 0x57, 0xbd, 0x02, 0x94, 0x6e, 0xf0, 0x83, 0x2a,
];

/// Errors that can occur while sealing or opening a frame body.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The sealed body is shorter than a nonce.
    #[error("sealed frame too short: {0} bytes")]
    TruncatedFrame(usize),
    /// Authentication or decryption failed — the body is corrupt or was
    /// sealed with a different key.
    #[error("decryption failed")]
    DecryptFailed,
    /// Encryption failed.
    #[error("encryption failed")]
    EncryptFailed,
    /// A key string could not be parsed as 64 hex characters.
    #[error("invalid key: expected 64 hex characters")]
    InvalidKey,
}

/// Seals and opens frame bodies with a pre-shared symmetric key.
#[derive(Clone)]
pub struct FrameCipher {
    cipher: ChaCha20Poly1305,
}

impl Default for FrameCipher {
    fn default() -> Self {
        Self::from_key(&DEFAULT_KEY)
    }
}

impl FrameCipher {
    /// Creates a cipher from a raw 256-bit key.
    #[must_use]
    pub fn from_key(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    /// Creates a cipher from a 64-character hex key string.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKey`] if the string is not exactly
    /// 64 hex characters.
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let hex = hex.trim();
        if hex.len() != 64 {
            return Err(CryptoError::InvalidKey);
        }
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            let pair = hex
                .get(i * 2..i * 2 + 2)
                .ok_or(CryptoError::InvalidKey)?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| CryptoError::InvalidKey)?;
        }
        Ok(Self::from_key(&key))
    }

    /// Encrypts a frame body, prepending the random nonce.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptFailed`] if encryption fails.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::EncryptFailed)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Decrypts a sealed frame body produced by [`Self::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::TruncatedFrame`] if the body is shorter than
    /// a nonce, or [`CryptoError::DecryptFailed`] if authentication fails.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LEN {
            return Err(CryptoError::TruncatedFrame(sealed.len()));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::DecryptFailed)
    }
}

impl std::fmt::Debug for FrameCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FrameCipher")
    }
}
