//! `XChaCha20-Poly1305` chunk encryption.
//!
//! Every chunk is sealed independently with a detached 128-bit tag. Nonces
//! are never drawn at random: they come from a [`NonceSequence`], which pairs
//! a per-session prefix with a monotonic 64-bit counter so that no two chunks
//! under one key ever share a nonce.
//!
//! ## Usage
//!
//! ```ignore
//! use sealdrop_crypto::aead::{ChunkCipher, NonceSequence, XChaChaChunkCipher};
//!
//! let cipher = XChaChaChunkCipher::new([0x42; 32]);
//! let mut nonces = NonceSequence::new([0x07; 16]);
//!
//! let nonce = nonces.next_nonce()?;
//! let (ciphertext, tag) = cipher.encrypt(&nonce, b"aad", b"chunk")?;
//! let plaintext = cipher.decrypt(&nonce, b"aad", &ciphertext, &tag)?;
//! ```

use crate::{CryptoError, KEY_SIZE, NONCE_PREFIX_SIZE, NONCE_SIZE, TAG_SIZE};
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{AeadInPlace, KeyInit},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// XChaCha20-Poly1305 nonce (24 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Create from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from slice (must be exactly 24 bytes).
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; NONCE_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Build a counter-based nonce: `counter (8 bytes LE) || prefix (16 bytes)`.
    #[must_use]
    pub fn from_counter(counter: u64, prefix: &[u8; NONCE_PREFIX_SIZE]) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[..8].copy_from_slice(&counter.to_le_bytes());
        bytes[8..].copy_from_slice(prefix);
        Self(bytes)
    }

    /// Counter portion of a counter-based nonce.
    #[must_use]
    pub fn counter(&self) -> u64 {
        let mut counter = [0u8; 8];
        counter.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(counter)
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    fn as_generic(&self) -> &chacha20poly1305::XNonce {
        chacha20poly1305::XNonce::from_slice(&self.0)
    }
}

/// Poly1305 authentication tag (16 bytes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag([u8; TAG_SIZE]);

impl Tag {
    /// Create from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from slice (must be exactly 16 bytes).
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        let bytes: [u8; TAG_SIZE] = slice.try_into().ok()?;
        Some(Self(bytes))
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; TAG_SIZE] {
        &self.0
    }
}

/// Authenticated encryption of a single chunk.
///
/// Implementations must never release plaintext whose tag failed to verify.
pub trait ChunkCipher {
    /// Encrypt `plaintext`, returning the ciphertext (same length) and a
    /// detached tag covering both the ciphertext and `aad`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::EncryptionFailed`] if the AEAD rejects the input.
    fn encrypt(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Tag), CryptoError>;

    /// Verify `tag` and decrypt `ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::TagMismatch`] if authentication fails.
    fn decrypt(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
        tag: &Tag,
    ) -> Result<Vec<u8>, CryptoError>;
}

/// [`ChunkCipher`] backed by `XChaCha20-Poly1305`.
#[derive(Clone, ZeroizeOnDrop)]
pub struct XChaChaChunkCipher {
    key: [u8; KEY_SIZE],
}

impl XChaChaChunkCipher {
    /// Create a cipher from a 32-byte key.
    #[must_use]
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    fn aead(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new((&self.key).into())
    }
}

impl std::fmt::Debug for XChaChaChunkCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XChaChaChunkCipher")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

impl ChunkCipher for XChaChaChunkCipher {
    fn encrypt(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, Tag), CryptoError> {
        let mut buffer = plaintext.to_vec();

        let tag = self
            .aead()
            .encrypt_in_place_detached(nonce.as_generic(), aad, &mut buffer)
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut tag_bytes = [0u8; TAG_SIZE];
        tag_bytes.copy_from_slice(&tag);
        Ok((buffer, Tag(tag_bytes)))
    }

    fn decrypt(
        &self,
        nonce: &Nonce,
        aad: &[u8],
        ciphertext: &[u8],
        tag: &Tag,
    ) -> Result<Vec<u8>, CryptoError> {
        let mut buffer = ciphertext.to_vec();

        if self
            .aead()
            .decrypt_in_place_detached(
                nonce.as_generic(),
                aad,
                &mut buffer,
                chacha20poly1305::Tag::from_slice(&tag.0),
            )
            .is_err()
        {
            buffer.zeroize();
            return Err(CryptoError::TagMismatch);
        }

        Ok(buffer)
    }
}

/// Monotonic nonce generator for one session key.
///
/// Yields `Nonce::from_counter(0, prefix)`, `Nonce::from_counter(1, prefix)`,
/// and so on. The counter never wraps: once `u64::MAX` has been issued every
/// further call fails with [`CryptoError::NonceOverflow`].
#[derive(Debug, Clone)]
pub struct NonceSequence {
    prefix: [u8; NONCE_PREFIX_SIZE],
    next: Option<u64>,
}

impl NonceSequence {
    /// Start a new sequence at counter 0.
    #[must_use]
    pub fn new(prefix: [u8; NONCE_PREFIX_SIZE]) -> Self {
        Self::starting_at(prefix, 0)
    }

    /// Start a sequence at an arbitrary counter value.
    #[must_use]
    pub fn starting_at(prefix: [u8; NONCE_PREFIX_SIZE], counter: u64) -> Self {
        Self {
            prefix,
            next: Some(counter),
        }
    }

    /// Take the next nonce in the sequence.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::NonceOverflow`] once the counter is exhausted.
    pub fn next_nonce(&mut self) -> Result<Nonce, CryptoError> {
        let counter = self.next.ok_or(CryptoError::NonceOverflow)?;
        self.next = counter.checked_add(1);
        Ok(Nonce::from_counter(counter, &self.prefix))
    }

    /// Counter value the next call to [`Self::next_nonce`] will use, if any.
    #[must_use]
    pub fn next_counter(&self) -> Option<u64> {
        self.next
    }

    /// Whether the sequence has no nonces left.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.next.is_none()
    }
}
