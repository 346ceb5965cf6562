//! # sealdrop Crypto
//!
//! Cryptographic primitives for the sealdrop transfer protocol.
//!
//! This crate provides:
//! - Argon2id derivation of a per-session key from a passphrase and salt
//! - `XChaCha20-Poly1305` chunk encryption with detached tags
//! - Counter-based nonce sequences that never repeat under one key
//! - Key confirmation tags (keyed BLAKE3) compared in constant time
//! - Secure random number generation
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Passphrase KDF | Argon2id | memory-hard |
//! | Sub-key derivation | BLAKE3 `derive_key` | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | Key confirmation | keyed BLAKE3 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod confirm;
pub mod constant_time;
pub mod error;
pub mod kdf;
pub mod random;

pub use aead::{ChunkCipher, Nonce, NonceSequence, Tag, XChaChaChunkCipher};
pub use confirm::ConfirmationTag;
pub use error::CryptoError;
pub use kdf::{KdfParams, Salt, SessionKey};

/// XChaCha20-Poly1305 key size
pub const KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce size
pub const NONCE_SIZE: usize = 24;

/// Per-session nonce prefix size (the remainder of the nonce is the counter)
pub const NONCE_PREFIX_SIZE: usize = 16;

/// Poly1305 authentication tag size
pub const TAG_SIZE: usize = 16;

/// Key derivation salt size
pub const SALT_SIZE: usize = 16;

/// Key confirmation tag size
pub const CONFIRMATION_TAG_SIZE: usize = 32;
