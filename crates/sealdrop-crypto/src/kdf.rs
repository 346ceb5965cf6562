//! Passphrase-based session key derivation.
//!
//! Both peers run Argon2id over the shared passphrase and the session salt,
//! then split the 32-byte result with BLAKE3 `derive_key` into independent
//! sub-keys:
//!
//! | Sub-key | Use |
//! |---------|-----|
//! | chunk key | `XChaCha20-Poly1305` chunk encryption |
//! | confirm key | keyed BLAKE3 key confirmation tags |
//! | nonce prefix | upper 16 bytes of every chunk nonce |
//!
//! The master key is wiped as soon as the split is done. Nothing in this
//! module is ever written to the wire except the salt.

use crate::aead::{NonceSequence, XChaChaChunkCipher};
use crate::confirm::ConfirmationTag;
use crate::{CryptoError, KEY_SIZE, NONCE_PREFIX_SIZE, SALT_SIZE, random};
use argon2::{Algorithm, Argon2, Params, ParamsBuilder, Version};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

const CHUNK_KEY_CONTEXT: &str = "sealdrop 2024-05-01 chunk encryption key";
const CONFIRM_KEY_CONTEXT: &str = "sealdrop 2024-05-01 key confirmation key";
const NONCE_PREFIX_CONTEXT: &str = "sealdrop 2024-05-01 chunk nonce prefix";
const FINGERPRINT_CONTEXT: &[u8] = b"sealdrop key fingerprint";

/// Per-session random salt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Draw a fresh salt from the OS CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::RandomFailed`] if the OS CSPRNG fails.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut bytes = [0u8; SALT_SIZE];
        random::fill_random(&mut bytes)?;
        Ok(Self(bytes))
    }

    /// Create from raw bytes received from the peer.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// Parameters for Argon2id key derivation.
///
/// Both peers must use identical values; any difference yields different
/// keys and fails key confirmation.
///
/// Defaults:
/// - Memory: 64 MiB (65536 KiB)
/// - Iterations: 3
/// - Parallelism: 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_cost_kib: u32,
    /// Number of iterations
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_cost_kib: 65536,
            iterations: 3,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Low-cost parameters for tests.
    ///
    /// **Warning:** Only use for testing. Not suitable for production.
    #[must_use]
    pub fn low_security() -> Self {
        Self {
            memory_cost_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Validate parameters are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidParameter`] describing the first
    /// out-of-range value.
    pub fn validate(&self) -> Result<(), CryptoError> {
        if self.parallelism < 1 || self.parallelism > 255 {
            return Err(CryptoError::InvalidParameter(
                "parallelism must be between 1 and 255".into(),
            ));
        }

        // Argon2 requires at least 8 KiB per lane
        if self.memory_cost_kib < 8 * self.parallelism {
            return Err(CryptoError::InvalidParameter(
                "memory_cost_kib must be at least 8 KiB per lane".into(),
            ));
        }

        if self.iterations < 1 {
            return Err(CryptoError::InvalidParameter(
                "iterations must be at least 1".into(),
            ));
        }

        Ok(())
    }

    fn build_argon2_params(&self) -> Result<Params, CryptoError> {
        self.validate()?;

        ParamsBuilder::new()
            .m_cost(self.memory_cost_kib)
            .t_cost(self.iterations)
            .p_cost(self.parallelism)
            .output_len(KEY_SIZE)
            .build()
            .map_err(|e| CryptoError::InvalidParameter(format!("Argon2 params: {e}")))
    }
}

/// Symmetric key material for one session.
#[derive(ZeroizeOnDrop)]
pub struct SessionKey {
    chunk_key: [u8; KEY_SIZE],
    confirm_key: [u8; KEY_SIZE],
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

impl SessionKey {
    /// Derive the session key from a passphrase and salt.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidParameter`] for bad `params` and
    /// [`CryptoError::KeyDerivationFailed`] if Argon2 rejects the input.
    pub fn derive(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<Self, CryptoError> {
        let argon2 = Argon2::new(
            Algorithm::Argon2id,
            Version::V0x13,
            params.build_argon2_params()?,
        );

        let mut master = [0u8; KEY_SIZE];
        argon2
            .hash_password_into(passphrase, salt.as_bytes(), &mut master)
            .map_err(|_| CryptoError::KeyDerivationFailed)?;

        let key = Self::from_master(&master);
        master.zeroize();
        Ok(key)
    }

    fn from_master(master: &[u8; KEY_SIZE]) -> Self {
        let chunk_key = blake3::derive_key(CHUNK_KEY_CONTEXT, master);
        let confirm_key = blake3::derive_key(CONFIRM_KEY_CONTEXT, master);
        let mut prefix_material = blake3::derive_key(NONCE_PREFIX_CONTEXT, master);

        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&prefix_material[..NONCE_PREFIX_SIZE]);
        prefix_material.zeroize();

        Self {
            chunk_key,
            confirm_key,
            nonce_prefix,
        }
    }

    /// Chunk cipher keyed with this session's chunk key.
    #[must_use]
    pub fn cipher(&self) -> XChaChaChunkCipher {
        XChaChaChunkCipher::new(self.chunk_key)
    }

    /// Fresh nonce sequence for this key, starting at counter 0.
    ///
    /// Sender and receiver each hold one and advance them in lockstep.
    #[must_use]
    pub fn nonce_sequence(&self) -> NonceSequence {
        NonceSequence::new(self.nonce_prefix)
    }

    /// Key confirmation tag over `context`.
    #[must_use]
    pub fn confirmation_tag(&self, context: &[u8]) -> ConfirmationTag {
        ConfirmationTag::compute(&self.confirm_key, context)
    }

    /// Short non-secret identifier of this key, for logs.
    #[must_use]
    pub fn fingerprint(&self) -> [u8; 8] {
        let digest = blake3::keyed_hash(&self.confirm_key, FINGERPRINT_CONTEXT);
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest.as_bytes()[..8]);
        out
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}
