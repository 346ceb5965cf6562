//! Wire records.
//!
//! All records travel over one [`Channel`] in a fixed order. Integers are
//! big-endian. Length fields are bounded before anything they describe is
//! read or allocated.
//!
//! ```text
//! ready          server -> client   "SDR1"
//! salt           client -> server   16 bytes
//! key confirm    server -> client   32 bytes, then client -> server 32 bytes
//! file name      sender -> receiver u16 len || name        (len 0 = end of session)
//! chunk          sender -> receiver u32 size || nonce(24) || tag(16) || ciphertext(size)
//!                                   (size 0 = authenticated end of file)
//! transfer ack   sender -> receiver "SDF1"
//! receipt        receiver -> sender "SDK1"
//! ```

use crate::error::{ErrorKind, ProtocolError};
use sealdrop_crypto::{
    CONFIRMATION_TAG_SIZE, ConfirmationTag, NONCE_SIZE, Nonce, SALT_SIZE, Salt, TAG_SIZE, Tag,
};
use sealdrop_transport::Channel;
use std::fmt;
use tracing::trace;

/// Server readiness signal.
pub const READY_SIGNAL: [u8; 4] = *b"SDR1";

/// Sent by the file sender after the final chunk.
pub const TRANSFER_ACK: [u8; 4] = *b"SDF1";

/// Sent by the receiver once the file has been committed.
pub const TRANSFER_RECEIPT: [u8; 4] = *b"SDK1";

/// Maximum file name length in bytes.
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Protocol cap on the plaintext size of one chunk (1 MiB).
pub const MAX_CHUNK_SIZE: u32 = 1024 * 1024;

/// Default plaintext chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: u32 = 64 * 1024;

/// Bytes of a chunk record that precede the ciphertext.
pub const CHUNK_HEADER_SIZE: usize = 4 + NONCE_SIZE + TAG_SIZE;

/// Result type for single wire records.
pub type WireResult<T> = Result<T, ErrorKind>;

/// Validated file name: a single path component, safe to join onto an
/// output directory.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FileName(String);

impl FileName {
    /// Validate a file name.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::NameTooLong`] above [`MAX_FILE_NAME_LEN`]
    /// bytes and [`ProtocolError::InvalidFileName`] for empty names, path
    /// separators, `.`/`..` and control characters.
    pub fn parse(name: &str) -> Result<Self, ProtocolError> {
        if name.is_empty() {
            return Err(ProtocolError::InvalidFileName("empty name"));
        }
        if name.len() > MAX_FILE_NAME_LEN {
            return Err(ProtocolError::NameTooLong {
                len: name.len(),
                max: MAX_FILE_NAME_LEN,
            });
        }
        if name == "." || name == ".." {
            return Err(ProtocolError::InvalidFileName("relative path component"));
        }
        if name.contains(['/', '\\']) {
            return Err(ProtocolError::InvalidFileName("contains a path separator"));
        }
        if name.chars().any(char::is_control) {
            return Err(ProtocolError::InvalidFileName("contains a control character"));
        }
        Ok(Self(name.to_string()))
    }

    fn from_wire(bytes: Vec<u8>) -> Result<Self, ProtocolError> {
        let name =
            String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidFileName("not UTF-8"))?;
        Self::parse(&name)
    }

    /// Name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; empty names are rejected by [`FileName::parse`].
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for FileName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FileName({:?})", self.0)
    }
}

/// One sealed chunk as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedChunk {
    /// Nonce the chunk was sealed under
    pub nonce: Nonce,
    /// Detached Poly1305 tag
    pub tag: Tag,
    /// Ciphertext, same length as the plaintext
    pub ciphertext: Vec<u8>,
}

impl EncryptedChunk {
    /// Value of the size field for this chunk.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.ciphertext.len() as u32
    }

    /// Whether this is the end-of-file record.
    #[must_use]
    pub fn is_final(&self) -> bool {
        self.ciphertext.is_empty()
    }

    fn encode(&self) -> Vec<u8> {
        let mut record = Vec::with_capacity(CHUNK_HEADER_SIZE + self.ciphertext.len());
        record.extend_from_slice(&self.size().to_be_bytes());
        record.extend_from_slice(self.nonce.as_bytes());
        record.extend_from_slice(self.tag.as_bytes());
        record.extend_from_slice(&self.ciphertext);
        record
    }
}

fn send_sentinel<C: Channel + ?Sized>(ch: &mut C, sentinel: [u8; 4]) -> WireResult<()> {
    ch.send_all(&sentinel)?;
    Ok(())
}

fn expect_sentinel<C: Channel + ?Sized>(ch: &mut C, expected: [u8; 4]) -> WireResult<()> {
    let mut actual = [0u8; 4];
    ch.receive_into(&mut actual)?;
    if actual != expected {
        return Err(ProtocolError::UnexpectedSentinel { expected, actual }.into());
    }
    Ok(())
}

/// Server: announce readiness.
///
/// # Errors
///
/// Transport failures only.
pub fn send_ready_signal<C: Channel + ?Sized>(ch: &mut C) -> WireResult<()> {
    send_sentinel(ch, READY_SIGNAL)
}

/// Client: block until the server is ready.
///
/// # Errors
///
/// Transport failures, or [`ProtocolError::UnexpectedSentinel`].
pub fn wait_for_ready<C: Channel + ?Sized>(ch: &mut C) -> WireResult<()> {
    expect_sentinel(ch, READY_SIGNAL)
}

/// Client: send the session salt.
///
/// # Errors
///
/// Transport failures only.
pub fn send_salt<C: Channel + ?Sized>(ch: &mut C, salt: &Salt) -> WireResult<()> {
    ch.send_all(salt.as_bytes())?;
    Ok(())
}

/// Server: receive the session salt.
///
/// # Errors
///
/// Transport failures only.
pub fn receive_salt<C: Channel + ?Sized>(ch: &mut C) -> WireResult<Salt> {
    let mut bytes = [0u8; SALT_SIZE];
    ch.receive_into(&mut bytes)?;
    Ok(Salt::from_bytes(bytes))
}

/// Send this side's key confirmation tag.
///
/// # Errors
///
/// Transport failures only.
pub fn send_key_acknowledgment<C: Channel + ?Sized>(
    ch: &mut C,
    tag: &ConfirmationTag,
) -> WireResult<()> {
    ch.send_all(tag.as_bytes())?;
    Ok(())
}

/// Receive the peer's key confirmation tag without checking it.
///
/// # Errors
///
/// Transport failures only.
pub fn receive_key_acknowledgment<C: Channel + ?Sized>(ch: &mut C) -> WireResult<ConfirmationTag> {
    let mut bytes = [0u8; CONFIRMATION_TAG_SIZE];
    ch.receive_into(&mut bytes)?;
    Ok(ConfirmationTag::from_bytes(bytes))
}

/// Receive the peer's key confirmation tag and compare it (constant time)
/// with `expected`.
///
/// # Errors
///
/// Transport failures, or [`ErrorKind::KeyMismatch`].
pub fn wait_for_key_acknowledgment<C: Channel + ?Sized>(
    ch: &mut C,
    expected: &ConfirmationTag,
) -> WireResult<()> {
    let received = receive_key_acknowledgment(ch)?;
    if !expected.verify(&received) {
        return Err(ErrorKind::KeyMismatch);
    }
    Ok(())
}

/// Sender: announce the next file.
///
/// # Errors
///
/// Transport failures only.
pub fn send_file_name<C: Channel + ?Sized>(ch: &mut C, name: &FileName) -> WireResult<()> {
    let mut record = Vec::with_capacity(2 + name.len());
    // FileName::parse caps the length at MAX_FILE_NAME_LEN
    record.extend_from_slice(&(name.len() as u16).to_be_bytes());
    record.extend_from_slice(name.as_str().as_bytes());
    ch.send_all(&record)?;
    Ok(())
}

/// Sender: no more files follow.
///
/// # Errors
///
/// Transport failures only.
pub fn send_end_of_session<C: Channel + ?Sized>(ch: &mut C) -> WireResult<()> {
    ch.send_all(&0u16.to_be_bytes())?;
    Ok(())
}

/// Receiver: read the next file name, or `None` at end of session.
///
/// An oversized length is rejected before any name byte is read.
///
/// # Errors
///
/// Transport failures, [`ProtocolError::NameTooLong`] or
/// [`ProtocolError::InvalidFileName`].
pub fn receive_file_name<C: Channel + ?Sized>(ch: &mut C) -> WireResult<Option<FileName>> {
    let mut len = [0u8; 2];
    ch.receive_into(&mut len)?;
    let len = usize::from(u16::from_be_bytes(len));

    if len == 0 {
        return Ok(None);
    }
    if len > MAX_FILE_NAME_LEN {
        return Err(ProtocolError::NameTooLong {
            len,
            max: MAX_FILE_NAME_LEN,
        }
        .into());
    }

    let bytes = ch.receive_all(len)?;
    Ok(Some(FileName::from_wire(bytes)?))
}

/// Sender: write one sealed chunk (size field included) as a single record.
///
/// # Errors
///
/// Transport failures only.
pub fn send_encrypted_chunk<C: Channel + ?Sized>(
    ch: &mut C,
    chunk: &EncryptedChunk,
) -> WireResult<()> {
    trace!(size = chunk.size(), counter = chunk.nonce.counter(), "sending chunk");
    ch.send_all(&chunk.encode())?;
    Ok(())
}

/// Receiver: read a chunk size field and bound it by `max`.
///
/// # Errors
///
/// Transport failures, or [`ProtocolError::ChunkTooLarge`].
pub fn receive_chunk_size<C: Channel + ?Sized>(ch: &mut C, max: u32) -> WireResult<u32> {
    let mut size = [0u8; 4];
    ch.receive_into(&mut size)?;
    let size = u32::from_be_bytes(size);

    if size > max {
        return Err(ProtocolError::ChunkTooLarge { size, max }.into());
    }
    Ok(size)
}

/// Receiver: read nonce, tag and exactly `size` ciphertext bytes.
///
/// `size` must already have been bounded by [`receive_chunk_size`].
///
/// # Errors
///
/// Transport failures only.
pub fn receive_encrypted_chunk<C: Channel + ?Sized>(
    ch: &mut C,
    size: u32,
) -> WireResult<EncryptedChunk> {
    let mut nonce = [0u8; NONCE_SIZE];
    ch.receive_into(&mut nonce)?;
    let mut tag = [0u8; TAG_SIZE];
    ch.receive_into(&mut tag)?;
    let ciphertext = ch.receive_all(size as usize)?;

    Ok(EncryptedChunk {
        nonce: Nonce::from_bytes(nonce),
        tag: Tag::from_bytes(tag),
        ciphertext,
    })
}

/// Sender: all chunks of the current file have been sent.
///
/// # Errors
///
/// Transport failures only.
pub fn send_transfer_ack<C: Channel + ?Sized>(ch: &mut C) -> WireResult<()> {
    send_sentinel(ch, TRANSFER_ACK)
}

/// Receiver: wait for the sender's transfer acknowledgment.
///
/// # Errors
///
/// Transport failures, or [`ProtocolError::UnexpectedSentinel`].
pub fn wait_for_transfer_ack<C: Channel + ?Sized>(ch: &mut C) -> WireResult<()> {
    expect_sentinel(ch, TRANSFER_ACK)
}

/// Receiver: the file is safely stored.
///
/// # Errors
///
/// Transport failures only.
pub fn send_transfer_receipt<C: Channel + ?Sized>(ch: &mut C) -> WireResult<()> {
    send_sentinel(ch, TRANSFER_RECEIPT)
}

/// Sender: wait for the receiver's receipt.
///
/// # Errors
///
/// Transport failures, or [`ProtocolError::UnexpectedSentinel`].
pub fn wait_for_transfer_receipt<C: Channel + ?Sized>(ch: &mut C) -> WireResult<()> {
    expect_sentinel(ch, TRANSFER_RECEIPT)
}
