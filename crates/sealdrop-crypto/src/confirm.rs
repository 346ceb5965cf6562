//! Key confirmation tags.
//!
//! A confirmation tag is `BLAKE3-keyed(confirm_key, context)`. Peers exchange
//! tags after deriving the session key; equal tags prove both derived the
//! same key without revealing it.

use crate::{CONFIRMATION_TAG_SIZE, KEY_SIZE, constant_time};

/// 32-byte key confirmation value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationTag([u8; CONFIRMATION_TAG_SIZE]);

impl ConfirmationTag {
    /// Compute the tag for `context` under `confirm_key`.
    #[must_use]
    pub fn compute(confirm_key: &[u8; KEY_SIZE], context: &[u8]) -> Self {
        Self(*blake3::keyed_hash(confirm_key, context).as_bytes())
    }

    /// Create from raw bytes received from the peer.
    #[must_use]
    pub fn from_bytes(bytes: [u8; CONFIRMATION_TAG_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CONFIRMATION_TAG_SIZE] {
        &self.0
    }

    /// Constant-time comparison against a received tag.
    #[must_use]
    pub fn verify(&self, received: &ConfirmationTag) -> bool {
        constant_time::verify_32(&self.0, &received.0)
    }
}

impl std::fmt::Debug for ConfirmationTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConfirmationTag({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_matching() {
        let key = [7u8; KEY_SIZE];
        let a = ConfirmationTag::compute(&key, b"server");
        let b = ConfirmationTag::from_bytes(*a.as_bytes());
        assert!(a.verify(&b));
    }

    #[test]
    fn test_context_separates_tags() {
        let key = [7u8; KEY_SIZE];
        let server = ConfirmationTag::compute(&key, b"server");
        let client = ConfirmationTag::compute(&key, b"client");
        assert!(!server.verify(&client));
    }

    #[test]
    fn test_single_bit_flip_rejected() {
        let key = [7u8; KEY_SIZE];
        let tag = ConfirmationTag::compute(&key, b"server");

        for i in 0..CONFIRMATION_TAG_SIZE {
            let mut bytes = *tag.as_bytes();
            bytes[i] ^= 0x80;
            assert!(!tag.verify(&ConfirmationTag::from_bytes(bytes)));
        }
    }
}
