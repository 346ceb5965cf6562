//! Chunked, authenticated-encrypted file transfer.
//!
//! Per file the sender emits: file name, a run of sealed chunks, a final
//! zero-size sealed chunk (authenticated end of file), then the transfer
//! ack; the receiver answers with a receipt once the file is committed.
//!
//! Both sides advance their own [`NonceSequence`] derived from the same
//! session key. The receiver refuses any chunk whose nonce is not the next
//! one in its sequence, and no plaintext reaches the [`ChunkSink`] before
//! its tag has been verified.

use crate::error::{Error, ErrorKind, Phase, PhaseExt, ProtocolError};
use crate::wire::{self, EncryptedChunk, FileName, MAX_CHUNK_SIZE};
use sealdrop_crypto::{ChunkCipher, NonceSequence, SessionKey, XChaChaChunkCipher};
use sealdrop_transport::Channel;
use std::io::{self, Read};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Destination for received plaintext.
///
/// One sink may receive several files in turn: `begin`, any number of
/// `write_chunk`, then exactly one of `commit` or `abort`.
pub trait ChunkSink {
    /// Prepare to receive `name`.
    ///
    /// # Errors
    ///
    /// Storage failures, e.g. the target already exists.
    fn begin(&mut self, name: &FileName) -> io::Result<()>;

    /// Append verified plaintext.
    ///
    /// # Errors
    ///
    /// Storage failures.
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// Make the file visible. Called only after the transfer ack.
    ///
    /// # Errors
    ///
    /// Storage failures.
    fn commit(&mut self) -> io::Result<()>;

    /// Discard everything written since `begin`.
    fn abort(&mut self);
}

/// Transfer progress notifications. All methods default to no-ops.
pub trait Progress {
    /// A file transfer starts; `total` is known on the sending side.
    fn start(&mut self, _name: &FileName, _total: Option<u64>) {}

    /// `bytes` more plaintext bytes were moved.
    fn advance(&mut self, _bytes: u64) {}

    /// The file completed.
    fn finish(&mut self, _report: &TransferReport) {}

    /// The file transfer failed.
    fn fail(&mut self, _error: &Error) {}
}

/// [`Progress`] that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl Progress for NoProgress {}

impl<P: Progress + ?Sized> Progress for &mut P {
    fn start(&mut self, name: &FileName, total: Option<u64>) {
        (**self).start(name, total);
    }

    fn advance(&mut self, bytes: u64) {
        (**self).advance(bytes);
    }

    fn finish(&mut self, report: &TransferReport) {
        (**self).finish(report);
    }

    fn fail(&mut self, error: &Error) {
        (**self).fail(error);
    }
}

/// Outcome of one file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// File name as sent on the wire
    pub name: String,
    /// Plaintext bytes transferred
    pub bytes: u64,
    /// Data chunks (the end-of-file record is not counted)
    pub chunks: u64,
    /// Wall time from name exchange to receipt
    pub elapsed: Duration,
}

impl TransferReport {
    /// Average throughput in bytes per second.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// A file queued for sending.
pub struct OutgoingFile {
    /// Name announced to the receiver
    pub name: FileName,
    /// Plaintext source
    pub reader: Box<dyn Read + Send>,
    /// Size in bytes, if known (progress only)
    pub len: Option<u64>,
}

impl OutgoingFile {
    /// Queue `reader` under `name`.
    pub fn new(name: FileName, reader: impl Read + Send + 'static, len: Option<u64>) -> Self {
        Self {
            name,
            reader: Box::new(reader),
            len,
        }
    }
}

impl std::fmt::Debug for OutgoingFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutgoingFile")
            .field("name", &self.name)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

fn check_chunk_size(chunk_size: u32, max_chunk_size: u32) -> Result<(), ProtocolError> {
    if max_chunk_size == 0 || max_chunk_size > MAX_CHUNK_SIZE {
        return Err(ProtocolError::InvalidConfig(format!(
            "max chunk size must be between 1 and {MAX_CHUNK_SIZE}"
        )));
    }
    if chunk_size == 0 || chunk_size > max_chunk_size {
        return Err(ProtocolError::InvalidConfig(format!(
            "chunk size must be between 1 and {max_chunk_size}"
        )));
    }
    Ok(())
}

/// Fill `buf` from `reader` until it is full or the reader is exhausted.
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Sending half of the chunk protocol.
#[derive(Debug)]
pub struct ChunkSender {
    cipher: XChaChaChunkCipher,
    nonces: NonceSequence,
    chunk_size: u32,
}

impl ChunkSender {
    /// Create a sender for one session.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidConfig`] if `chunk_size` is 0 or above
    /// [`MAX_CHUNK_SIZE`].
    pub fn new(key: &SessionKey, chunk_size: u32) -> Result<Self, ProtocolError> {
        check_chunk_size(chunk_size, MAX_CHUNK_SIZE)?;
        Ok(Self {
            cipher: key.cipher(),
            nonces: key.nonce_sequence(),
            chunk_size,
        })
    }

    /// Plaintext bytes per full chunk.
    #[must_use]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn seal_and_send<C: Channel + ?Sized>(
        &mut self,
        ch: &mut C,
        plaintext: &[u8],
    ) -> Result<(), Error> {
        let nonce = self.nonces.next_nonce().in_phase(Phase::ChunkTransfer)?;
        let aad = (plaintext.len() as u32).to_be_bytes();
        let (ciphertext, tag) = self
            .cipher
            .encrypt(&nonce, &aad, plaintext)
            .in_phase(Phase::ChunkTransfer)?;

        wire::send_encrypted_chunk(
            ch,
            &EncryptedChunk {
                nonce,
                tag,
                ciphertext,
            },
        )
        .in_phase(Phase::ChunkTransfer)
    }

    /// Send one file and wait for the receiver's receipt.
    ///
    /// # Errors
    ///
    /// Transport, crypto and storage failures, tagged with the phase in
    /// which they occurred.
    pub fn send_file<C, P>(
        &mut self,
        ch: &mut C,
        file: &mut OutgoingFile,
        progress: &mut P,
    ) -> Result<TransferReport, Error>
    where
        C: Channel + ?Sized,
        P: Progress + ?Sized,
    {
        let start = Instant::now();
        wire::send_file_name(ch, &file.name).in_phase(Phase::Naming)?;
        progress.start(&file.name, file.len);
        debug!(name = %file.name, len = ?file.len, "sending file");

        let mut buf = vec![0u8; self.chunk_size as usize];
        let mut bytes = 0u64;
        let mut chunks = 0u64;

        loop {
            let n = read_up_to(&mut *file.reader, &mut buf).in_phase(Phase::ChunkTransfer)?;
            if n == 0 {
                break;
            }
            self.seal_and_send(ch, &buf[..n])?;
            bytes += n as u64;
            chunks += 1;
            progress.advance(n as u64);
        }

        self.seal_and_send(ch, &[])?;

        wire::send_transfer_ack(ch).in_phase(Phase::FinalAck)?;
        wire::wait_for_transfer_receipt(ch).in_phase(Phase::FinalAck)?;

        let report = TransferReport {
            name: file.name.to_string(),
            bytes,
            chunks,
            elapsed: start.elapsed(),
        };
        info!(name = %report.name, bytes, chunks, "file sent");
        Ok(report)
    }

    /// Tell the receiver no more files follow.
    ///
    /// # Errors
    ///
    /// Transport failures, in [`Phase::Naming`].
    pub fn finish<C: Channel + ?Sized>(&mut self, ch: &mut C) -> Result<(), Error> {
        wire::send_end_of_session(ch).in_phase(Phase::Naming)
    }
}

/// Receiving half of the chunk protocol.
#[derive(Debug)]
pub struct ChunkReceiver {
    cipher: XChaChaChunkCipher,
    nonces: NonceSequence,
    max_chunk_size: u32,
}

impl ChunkReceiver {
    /// Create a receiver for one session.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidConfig`] if `max_chunk_size` is 0 or
    /// above [`MAX_CHUNK_SIZE`].
    pub fn new(key: &SessionKey, max_chunk_size: u32) -> Result<Self, ProtocolError> {
        check_chunk_size(max_chunk_size, max_chunk_size)?;
        Ok(Self {
            cipher: key.cipher(),
            nonces: key.nonce_sequence(),
            max_chunk_size,
        })
    }

    /// Largest chunk size field this receiver accepts.
    #[must_use]
    pub fn max_chunk_size(&self) -> u32 {
        self.max_chunk_size
    }

    /// Receive the next file into `sink`.
    ///
    /// Returns `Ok(None)` when the sender signals end of session. On any
    /// error after `begin` the sink is aborted.
    ///
    /// # Errors
    ///
    /// Transport, protocol, crypto and storage failures, tagged with the
    /// phase in which they occurred.
    pub fn receive_file<C, S, P>(
        &mut self,
        ch: &mut C,
        sink: &mut S,
        progress: &mut P,
    ) -> Result<Option<TransferReport>, Error>
    where
        C: Channel + ?Sized,
        S: ChunkSink + ?Sized,
        P: Progress + ?Sized,
    {
        let start = Instant::now();
        let Some(name) = wire::receive_file_name(ch).in_phase(Phase::Naming)? else {
            debug!("end of session");
            return Ok(None);
        };

        sink.begin(&name).in_phase(Phase::Naming)?;
        progress.start(&name, None);
        debug!(%name, "receiving file");

        match self.receive_body(ch, sink, progress) {
            Ok((bytes, chunks)) => {
                let report = TransferReport {
                    name: name.to_string(),
                    bytes,
                    chunks,
                    elapsed: start.elapsed(),
                };
                info!(name = %report.name, bytes, chunks, "file received");
                Ok(Some(report))
            }
            Err(e) => {
                sink.abort();
                Err(e)
            }
        }
    }

    fn receive_body<C, S, P>(
        &mut self,
        ch: &mut C,
        sink: &mut S,
        progress: &mut P,
    ) -> Result<(u64, u64), Error>
    where
        C: Channel + ?Sized,
        S: ChunkSink + ?Sized,
        P: Progress + ?Sized,
    {
        let mut bytes = 0u64;
        let mut chunks = 0u64;

        loop {
            let size =
                wire::receive_chunk_size(ch, self.max_chunk_size).in_phase(Phase::ChunkTransfer)?;
            let chunk = wire::receive_encrypted_chunk(ch, size).in_phase(Phase::ChunkTransfer)?;

            let expected = self.nonces.next_nonce().in_phase(Phase::ChunkTransfer)?;
            if chunk.nonce != expected {
                return Err(Error::new(
                    Phase::ChunkTransfer,
                    ErrorKind::NonceOutOfSequence {
                        expected: expected.counter(),
                        actual: chunk.nonce.counter(),
                    },
                ));
            }

            let plaintext = self
                .cipher
                .decrypt(&chunk.nonce, &size.to_be_bytes(), &chunk.ciphertext, &chunk.tag)
                .in_phase(Phase::ChunkTransfer)?;

            if chunk.is_final() {
                break;
            }

            sink.write_chunk(&plaintext).in_phase(Phase::ChunkTransfer)?;
            bytes += plaintext.len() as u64;
            chunks += 1;
            progress.advance(plaintext.len() as u64);
        }

        wire::wait_for_transfer_ack(ch).in_phase(Phase::FinalAck)?;
        sink.commit().in_phase(Phase::FinalAck)?;
        wire::send_transfer_receipt(ch).in_phase(Phase::FinalAck)?;

        Ok((bytes, chunks))
    }
}

/// In-memory [`ChunkSink`] collecting committed files.
#[derive(Debug, Default)]
pub struct MemorySink {
    current: Option<(String, Vec<u8>)>,
    committed: Vec<(String, Vec<u8>)>,
    aborted: usize,
}

impl MemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Files committed so far, in order.
    #[must_use]
    pub fn files(&self) -> &[(String, Vec<u8>)] {
        &self.committed
    }

    /// Number of transfers that were aborted.
    #[must_use]
    pub fn aborted(&self) -> usize {
        self.aborted
    }

    /// Whether a transfer is in progress.
    #[must_use]
    pub fn in_progress(&self) -> bool {
        self.current.is_some()
    }
}

impl ChunkSink for MemorySink {
    fn begin(&mut self, name: &FileName) -> io::Result<()> {
        if self.committed.iter().any(|(n, _)| n == name.as_str()) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{name} already received"),
            ));
        }
        self.current = Some((name.to_string(), Vec::new()));
        Ok(())
    }

    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let (_, buf) = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::other("write without begin"))?;
        buf.extend_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> io::Result<()> {
        let file = self
            .current
            .take()
            .ok_or_else(|| io::Error::other("commit without begin"))?;
        self.committed.push(file);
        Ok(())
    }

    fn abort(&mut self) {
        if self.current.take().is_some() {
            self.aborted += 1;
        }
    }
}
