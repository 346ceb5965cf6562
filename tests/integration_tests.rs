//! End-to-end tests over loopback TCP.
//!
//! A real server (`run_server` + `StagedFileSink`) runs on a background
//! thread; the client side is driven through the public session API, with
//! channel wrappers where a test needs to see or damage the byte stream.

use sealdrop_core::{
    Error, ErrorKind, HandshakeState, NoProgress, Phase, ProtocolError, SessionConfig,
    client_handshake, run_client, send_session, server_handshake,
};
use sealdrop_crypto::CryptoError;
use sealdrop_files::open_files;
use sealdrop_integration_tests::{
    RecordingChannel, TEST_TIMEOUT, TamperingChannel, outgoing, parse_client_stream, random_bytes,
    spawn_memory_server, spawn_server, test_config,
};
use sealdrop_transport::{Channel, connect, setup_server};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// ============================================================================
// Successful transfers
// ============================================================================

#[test]
fn test_small_file_over_loopback() {
    let out = TempDir::new().unwrap();
    let (addr, server) = spawn_server(test_config("s3cret"), out.path().to_path_buf(), false);

    let client = run_client(
        &addr,
        &test_config("s3cret"),
        vec![outgoing("a.txt", b"0123456789")],
        &mut NoProgress,
    )
    .unwrap();
    let server = server.join().unwrap().unwrap();

    assert_eq!(fs::read(out.path().join("a.txt")).unwrap(), b"0123456789");
    assert_eq!(dir_entries(out.path()), vec!["a.txt"]);

    assert_eq!(client.files.len(), 1);
    assert_eq!(client.files[0].bytes, 10);
    assert_eq!(client.files[0].chunks, 1);
    assert_eq!(server.files[0].name, "a.txt");
    assert_eq!(server.key_fingerprint, client.key_fingerprint);
    assert_eq!(client.stats.bytes_sent, server.stats.bytes_received);
}

#[test]
fn test_multi_chunk_files_from_disk() {
    let src = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();

    let big = random_bytes(300 * 1024 + 17);
    let exact = random_bytes(64 * 1024);
    fs::write(src.path().join("big.bin"), &big).unwrap();
    fs::write(src.path().join("exact.bin"), &exact).unwrap();
    fs::write(src.path().join("empty"), b"").unwrap();

    let config = test_config("pw").with_chunk_size(64 * 1024);
    let (addr, server) = spawn_server(config.clone(), out.path().to_path_buf(), false);

    let files = open_files(&[
        src.path().join("big.bin"),
        src.path().join("exact.bin"),
        src.path().join("empty"),
    ])
    .unwrap();
    let client = run_client(&addr, &config, files, &mut NoProgress).unwrap();
    let server = server.join().unwrap().unwrap();

    assert_eq!(fs::read(out.path().join("big.bin")).unwrap(), big);
    assert_eq!(fs::read(out.path().join("exact.bin")).unwrap(), exact);
    assert_eq!(fs::read(out.path().join("empty")).unwrap(), b"");

    let chunks: Vec<u64> = client.files.iter().map(|f| f.chunks).collect();
    assert_eq!(chunks, vec![5, 1, 0]);
    assert_eq!(server.total_bytes(), (big.len() + exact.len()) as u64);
}

#[test]
fn test_nonces_unique_across_files() {
    let (addr, server) = spawn_memory_server(test_config("pw"));

    let config = test_config("pw").with_chunk_size(1000);
    let session = connect(&addr, TEST_TIMEOUT).unwrap();
    let mut recorder = RecordingChannel::new(session);
    send_session(
        &mut recorder,
        &config,
        vec![
            outgoing("one", &random_bytes(4500)),
            outgoing("two", &random_bytes(1000)),
            outgoing("three", b""),
        ],
        &mut NoProgress,
    )
    .unwrap();
    let (result, sink) = server.join().unwrap();
    result.unwrap();
    assert_eq!(sink.files().len(), 3);

    let chunks = parse_client_stream(&recorder.sent);
    // 5 + 1 data chunks, plus one final record per file
    assert_eq!(chunks.len(), 9);
    assert_eq!(chunks.iter().filter(|c| c.size == 0).count(), 3);
    assert!(chunks.iter().all(|c| c.size <= 1000));

    let distinct: HashSet<[u8; 24]> = chunks.iter().map(|c| c.nonce).collect();
    assert_eq!(distinct.len(), chunks.len());

    // counters run on across file boundaries
    let counters: Vec<u64> = chunks
        .iter()
        .map(|c| u64::from_le_bytes(c.nonce[..8].try_into().unwrap()))
        .collect();
    assert!(counters.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(chunks[0].file, "one");
    assert_eq!(chunks[8].file, "three");
}

// ============================================================================
// Authentication failures
// ============================================================================

#[test]
fn test_wrong_passphrase_rejected_by_both_sides() {
    let out = TempDir::new().unwrap();
    let (addr, server) = spawn_server(test_config("right"), out.path().to_path_buf(), false);

    let client = run_client(
        &addr,
        &test_config("wrong"),
        vec![outgoing("a.txt", b"0123456789")],
        &mut NoProgress,
    )
    .unwrap_err();
    let server = server.join().unwrap().unwrap_err();

    for err in [&client, &server] {
        assert_eq!(err.phase, Phase::Handshake);
        assert!(matches!(err.kind, ErrorKind::KeyMismatch));
        assert!(err.is_security());
    }
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn test_mismatched_kdf_params_rejected() {
    let (addr, server) = spawn_memory_server(test_config("pw"));

    let mut params = sealdrop_crypto::KdfParams::low_security();
    params.iterations = 2;
    let client = run_client(
        &addr,
        &test_config("pw").with_kdf(params),
        vec![outgoing("a", b"x")],
        &mut NoProgress,
    )
    .unwrap_err();
    let (server, sink) = server.join().unwrap();

    assert!(matches!(client.kind, ErrorKind::KeyMismatch));
    assert!(matches!(server.unwrap_err().kind, ErrorKind::KeyMismatch));
    assert!(sink.files().is_empty());
}

/// Run a client whose outgoing stream is damaged at `offset`.
fn tampered_session(offset: usize) -> (Error, Result<(), Error>, TempDir) {
    let out = TempDir::new().unwrap();
    let (addr, server) = spawn_server(test_config("pw"), out.path().to_path_buf(), false);

    let session = connect(&addr, TEST_TIMEOUT).unwrap();
    let mut channel = TamperingChannel::new(session, offset);
    let client = send_session(
        &mut channel,
        &test_config("pw"),
        vec![outgoing("a.txt", b"0123456789")],
        &mut NoProgress,
    )
    .map(|_| ());
    assert!(channel.tampered);

    let server = server.join().unwrap().unwrap_err();
    (server, client, out)
}

// salt (16) + confirmation tag (32) + name record for "a.txt" (2 + 5)
const FIRST_CHUNK: usize = 16 + 32 + 7;

#[test]
fn test_flipped_ciphertext_detected() {
    let (server, client, out) = tampered_session(FIRST_CHUNK + 44);

    assert_eq!(server.phase, Phase::ChunkTransfer);
    assert!(matches!(
        server.kind,
        ErrorKind::Crypto(CryptoError::TagMismatch)
    ));
    assert!(server.is_security());
    assert!(client.is_err());
    // no file, no leftover part file
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn test_flipped_tag_detected() {
    let (server, client, out) = tampered_session(FIRST_CHUNK + 4 + 24);

    assert!(matches!(
        server.kind,
        ErrorKind::Crypto(CryptoError::TagMismatch)
    ));
    assert!(client.is_err());
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn test_flipped_nonce_detected() {
    let (server, _client, out) = tampered_session(FIRST_CHUNK + 4);

    assert_eq!(server.phase, Phase::ChunkTransfer);
    assert!(matches!(
        server.kind,
        ErrorKind::NonceOutOfSequence { expected: 0, .. }
    ));
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn test_flipped_size_field_rejected() {
    // most significant byte of the size field: 10 -> 16 MiB + 10
    let (server, _client, out) = tampered_session(FIRST_CHUNK);

    assert!(matches!(
        server.kind,
        ErrorKind::Protocol(ProtocolError::ChunkTooLarge { .. })
    ));
    assert!(dir_entries(out.path()).is_empty());
}

// ============================================================================
// Disconnects and timeouts
// ============================================================================

#[test]
fn test_peer_disconnect_mid_chunk() {
    let out = TempDir::new().unwrap();
    let config = test_config("pw").with_timeout(Duration::from_secs(5));
    let (addr, server) = spawn_server(config.clone(), out.path().to_path_buf(), false);

    let started = Instant::now();
    let client = thread::spawn(move || {
        let mut session = connect(&addr, TEST_TIMEOUT).unwrap();
        client_handshake(&mut session, b"pw", &sealdrop_crypto::KdfParams::low_security())
            .unwrap();

        session.send_all(&[0, 5]).unwrap();
        session.send_all(b"a.txt").unwrap();
        // announce 1000 bytes, deliver the header and 10 bytes, then vanish
        session.send_all(&1000u32.to_be_bytes()).unwrap();
        session.send_all(&[0u8; 24 + 16 + 10]).unwrap();
        session.teardown();
    });

    let err = server.join().unwrap().unwrap_err();
    client.join().unwrap();

    assert_eq!(err.phase, Phase::ChunkTransfer);
    assert!(err.is_connection_closed());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(dir_entries(out.path()).is_empty());
}

#[test]
fn test_silent_peer_times_out() {
    let config = test_config("pw").with_timeout(Duration::from_millis(300));
    let (addr, server) = spawn_memory_server(config);

    let client = thread::spawn(move || {
        let mut session = connect(&addr, TEST_TIMEOUT).unwrap();
        client_handshake(&mut session, b"pw", &sealdrop_crypto::KdfParams::low_security())
            .unwrap();
        // never send a file name
        thread::sleep(Duration::from_millis(1500));
    });

    let (result, sink) = server.join().unwrap();
    client.join().unwrap();

    let err = result.unwrap_err();
    assert_eq!(err.phase, Phase::Naming);
    assert!(err.is_timeout());
    assert!(!sink.in_progress());
}

#[test]
fn test_silent_server_times_out_in_handshake() {
    // a server that accepts but never sends the ready signal
    let listener = setup_server("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().to_string();
    let server = thread::spawn(move || {
        let _session = listener.accept_connection(TEST_TIMEOUT).unwrap();
        thread::sleep(Duration::from_millis(1500));
    });

    let config = test_config("pw").with_timeout(Duration::from_millis(300));
    let start = Instant::now();
    let err = run_client(&addr, &config, vec![outgoing("a", b"x")], &mut NoProgress).unwrap_err();
    let elapsed = start.elapsed();
    server.join().unwrap();

    assert_eq!(err.phase, Phase::Handshake);
    assert!(err.is_timeout());
    assert_eq!(err.handshake_state, Some(HandshakeState::AwaitingReady));
    assert!(elapsed < Duration::from_millis(1200), "took {elapsed:?}");
}

#[test]
fn test_server_gone_before_ack() {
    // a server that accepts the handshake and then hangs up
    let listener = setup_server("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().to_string();
    let server = thread::spawn(move || {
        let mut session = listener.accept_connection(TEST_TIMEOUT).unwrap();
        server_handshake(&mut session, b"pw", &sealdrop_crypto::KdfParams::low_security())
            .unwrap();
    });

    let err = run_client(
        &addr,
        &test_config("pw"),
        vec![outgoing("a.txt", &random_bytes(2 * 1024 * 1024))],
        &mut NoProgress,
    )
    .unwrap_err();
    server.join().unwrap();

    assert!(err.is_connection_closed());
    assert!(matches!(err.phase, Phase::ChunkTransfer | Phase::FinalAck | Phase::Naming));
}

#[test]
fn test_connect_refused_is_retryable() {
    let listener = setup_server("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().to_string();
    drop(listener);

    let err = run_client(
        &addr,
        &test_config("pw"),
        vec![outgoing("a", b"x")],
        &mut NoProgress,
    )
    .unwrap_err();

    assert_eq!(err.phase, Phase::Setup);
    assert!(err.is_retryable_setup());
}

// ============================================================================
// Receiving side storage
// ============================================================================

#[test]
fn test_existing_file_not_overwritten() {
    let out = TempDir::new().unwrap();
    fs::write(out.path().join("a.txt"), b"keep me").unwrap();
    let (addr, server) = spawn_server(test_config("pw"), out.path().to_path_buf(), false);

    let client = run_client(
        &addr,
        &test_config("pw"),
        vec![outgoing("a.txt", b"replacement")],
        &mut NoProgress,
    );
    let err = server.join().unwrap().unwrap_err();

    assert_eq!(err.phase, Phase::Naming);
    assert!(matches!(err.kind, ErrorKind::Storage(_)));
    assert!(client.is_err());
    assert_eq!(fs::read(out.path().join("a.txt")).unwrap(), b"keep me");
    assert_eq!(dir_entries(out.path()), vec!["a.txt"]);
}

#[test]
fn test_overwrite_allowed() {
    let out = TempDir::new().unwrap();
    fs::write(out.path().join("a.txt"), b"old").unwrap();
    let (addr, server) = spawn_server(test_config("pw"), out.path().to_path_buf(), true);

    run_client(
        &addr,
        &test_config("pw"),
        vec![outgoing("a.txt", b"new contents")],
        &mut NoProgress,
    )
    .unwrap();
    server.join().unwrap().unwrap();

    assert_eq!(fs::read(out.path().join("a.txt")).unwrap(), b"new contents");
}

#[test]
fn test_receiver_chunk_limit() {
    let receiver: SessionConfig = test_config("pw")
        .with_chunk_size(1024)
        .with_max_chunk_size(1024);
    let (addr, server) = spawn_memory_server(receiver);

    let sender = test_config("pw").with_chunk_size(4096);
    let client = run_client(
        &addr,
        &sender,
        vec![outgoing("a", &random_bytes(4096))],
        &mut NoProgress,
    );
    let (result, sink) = server.join().unwrap();

    let err = result.unwrap_err();
    assert!(matches!(
        err.kind,
        ErrorKind::Protocol(ProtocolError::ChunkTooLarge { size: 4096, max: 1024 })
    ));
    assert!(client.is_err());
    assert_eq!(sink.aborted(), 1);
}
