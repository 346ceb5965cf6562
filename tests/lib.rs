//! Shared helpers for the sealdrop integration tests.

use rand::RngCore;
use sealdrop_core::{
    Error, FileName, MemorySink, NoProgress, OutgoingFile, SessionConfig, SessionReport,
    run_server,
};
use sealdrop_crypto::KdfParams;
use sealdrop_files::StagedFileSink;
use sealdrop_transport::{Channel, TransportError, TransportResult, TransportStats, setup_server};
use std::collections::VecDeque;
use std::io::Cursor;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Timeout used when a test does not exercise timeouts.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Session configuration with cheap key derivation.
#[must_use]
pub fn test_config(passphrase: &str) -> SessionConfig {
    SessionConfig::new(passphrase)
        .with_timeout(TEST_TIMEOUT)
        .with_kdf(KdfParams::low_security())
}

/// In-memory file queued for sending.
#[must_use]
pub fn outgoing(name: &str, data: &[u8]) -> OutgoingFile {
    OutgoingFile::new(
        FileName::parse(name).expect("valid test file name"),
        Cursor::new(data.to_vec()),
        Some(data.len() as u64),
    )
}

/// `len` random bytes.
#[must_use]
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut data);
    data
}

/// Bind a loopback listener and receive one session into `output_dir` on a
/// background thread.
pub fn spawn_server(
    config: SessionConfig,
    output_dir: PathBuf,
    overwrite: bool,
) -> (String, JoinHandle<Result<SessionReport, Error>>) {
    let listener = setup_server("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().to_string();

    let handle = thread::spawn(move || {
        let mut sink = StagedFileSink::new(output_dir, overwrite).expect("output dir");
        run_server(&listener, &config, &mut sink, &mut NoProgress)
    });

    (addr, handle)
}

/// Like [`spawn_server`] but collecting files in memory.
pub fn spawn_memory_server(
    config: SessionConfig,
) -> (
    String,
    JoinHandle<(Result<SessionReport, Error>, MemorySink)>,
) {
    let listener = setup_server("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().to_string();

    let handle = thread::spawn(move || {
        let mut sink = MemorySink::new();
        let result = run_server(&listener, &config, &mut sink, &mut NoProgress);
        (result, sink)
    });

    (addr, handle)
}

/// In-memory channel: reads drain `inbound`, writes append to `outbound`.
///
/// Running out of inbound bytes looks like the peer hanging up.
#[derive(Debug, Default)]
pub struct BufferChannel {
    /// Bytes still to be received
    pub inbound: VecDeque<u8>,
    /// Bytes sent so far
    pub outbound: Vec<u8>,
}

impl BufferChannel {
    /// Channel that will receive `bytes`.
    #[must_use]
    pub fn with_inbound(bytes: &[u8]) -> Self {
        Self {
            inbound: bytes.iter().copied().collect(),
            outbound: Vec::new(),
        }
    }
}

impl Channel for BufferChannel {
    fn send_all(&mut self, buf: &[u8]) -> TransportResult<()> {
        self.outbound.extend_from_slice(buf);
        Ok(())
    }

    fn receive_into(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        if self.inbound.len() < buf.len() {
            self.inbound.clear();
            return Err(TransportError::ConnectionClosed);
        }
        let n = buf.len();
        for (dst, src) in buf.iter_mut().zip(self.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }

    fn set_timeout(&mut self, _timeout: Duration) -> TransportResult<()> {
        Ok(())
    }

    fn teardown(&mut self) {}
}

/// Channel that keeps a copy of everything sent through it.
pub struct RecordingChannel<C> {
    inner: C,
    /// Every byte passed to `send_all`, in order
    pub sent: Vec<u8>,
}

impl<C: Channel> RecordingChannel<C> {
    /// Wrap `inner`.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            sent: Vec::new(),
        }
    }
}

impl<C: Channel> Channel for RecordingChannel<C> {
    fn send_all(&mut self, buf: &[u8]) -> TransportResult<()> {
        self.sent.extend_from_slice(buf);
        self.inner.send_all(buf)
    }

    fn receive_into(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        self.inner.receive_into(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        self.inner.set_timeout(timeout)
    }

    fn teardown(&mut self) {
        self.inner.teardown();
    }

    fn stats(&self) -> TransportStats {
        self.inner.stats()
    }
}

/// Channel that flips one bit of the outgoing byte stream at a fixed offset.
pub struct TamperingChannel<C> {
    inner: C,
    offset: usize,
    sent: usize,
    /// Whether the flip has happened
    pub tampered: bool,
}

impl<C: Channel> TamperingChannel<C> {
    /// Flip the lowest bit of the byte at stream position `offset`.
    pub fn new(inner: C, offset: usize) -> Self {
        Self {
            inner,
            offset,
            sent: 0,
            tampered: false,
        }
    }
}

impl<C: Channel> Channel for TamperingChannel<C> {
    fn send_all(&mut self, buf: &[u8]) -> TransportResult<()> {
        let start = self.sent;
        self.sent += buf.len();

        if (start..self.sent).contains(&self.offset) {
            let mut copy = buf.to_vec();
            copy[self.offset - start] ^= 0x01;
            self.tampered = true;
            return self.inner.send_all(&copy);
        }
        self.inner.send_all(buf)
    }

    fn receive_into(&mut self, buf: &mut [u8]) -> TransportResult<()> {
        self.inner.receive_into(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> TransportResult<()> {
        self.inner.set_timeout(timeout)
    }

    fn teardown(&mut self) {
        self.inner.teardown();
    }

    fn stats(&self) -> TransportStats {
        self.inner.stats()
    }
}

/// One chunk record parsed back out of a recorded client stream.
#[derive(Debug, Clone)]
pub struct RecordedChunk {
    /// File the chunk belongs to
    pub file: String,
    /// Value of the size field
    pub size: u32,
    /// The 24-byte nonce
    pub nonce: [u8; 24],
}

/// Parse the client-to-server stream of a complete session.
///
/// Layout: salt, confirmation tag, then per file a name record, chunk
/// records up to the zero-size one and a transfer ack, then an empty name.
#[must_use]
pub fn parse_client_stream(stream: &[u8]) -> Vec<RecordedChunk> {
    let mut pos = 16 + 32;
    let mut chunks = Vec::new();

    loop {
        let name_len = u16::from_be_bytes([stream[pos], stream[pos + 1]]) as usize;
        pos += 2;
        if name_len == 0 {
            assert_eq!(pos, stream.len(), "bytes after end of session");
            return chunks;
        }
        let file = String::from_utf8(stream[pos..pos + name_len].to_vec()).expect("utf-8 name");
        pos += name_len;

        loop {
            let size = u32::from_be_bytes(stream[pos..pos + 4].try_into().expect("4 bytes"));
            let nonce: [u8; 24] = stream[pos + 4..pos + 28].try_into().expect("24 bytes");
            pos += 4 + 24 + 16 + size as usize;
            chunks.push(RecordedChunk {
                file: file.clone(),
                size,
                nonce,
            });
            if size == 0 {
                break;
            }
        }

        assert_eq!(&stream[pos..pos + 4], b"SDF1");
        pos += 4;
    }
}
