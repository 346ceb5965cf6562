//! Handshake: from "connected" to "sharing a confirmed session key".
//!
//! ```text
//! server                                   client
//!   | ---- READY ----------------------------> |
//!   | <--- salt (16) ------------------------- |   client generates the salt
//!   |   derive key                 derive key  |
//!   | ---- confirm tag (server) -------------> |
//!   | <--- confirm tag (client) -------------- |   sent before checking the server's
//!   |   verify                         verify  |
//! ```
//!
//! The client sends its own tag before checking the server's, so a wrong
//! passphrase is detected on both sides. There is no retry: any failure
//! moves the state machine to [`HandshakeState::Failed`] and the session is
//! torn down by the caller.

use crate::error::{Error, ErrorKind, Phase, PhaseExt, ProtocolError};
use crate::wire;
use sealdrop_crypto::{KdfParams, Salt, SessionKey};
use sealdrop_transport::{Channel, Role};
use tracing::{debug, info};

/// Context for the tag the server sends.
const SERVER_CONFIRMATION: &[u8] = b"sealdrop key confirmation v1: server";

/// Context for the tag the client sends.
const CLIENT_CONFIRMATION: &[u8] = b"sealdrop key confirmation v1: client";

/// Handshake states for both roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Server: connection accepted
    Accepted,
    /// Client: connection established
    Connected,
    /// Server: ready signal sent
    SentReady,
    /// Client: waiting for the ready signal
    AwaitingReady,
    /// Client: ready signal received
    ReadyReceived,
    /// Server: waiting for the client's salt
    AwaitingSalt,
    /// Both: session key derived
    KeyDerived,
    /// Both: waiting for the peer's confirmation tag
    AwaitingAck,
    /// Both: peer proved it holds the same key
    KeyConfirmed,
    /// Terminal failure
    Failed,
}

/// Handshake state machine for one side of a connection.
#[derive(Debug)]
pub struct Handshake {
    role: Role,
    state: HandshakeState,
}

impl Handshake {
    /// Start a handshake in the initial state for `role`.
    #[must_use]
    pub fn new(role: Role) -> Self {
        let state = match role {
            Role::Server => HandshakeState::Accepted,
            Role::Client => HandshakeState::Connected,
        };
        Self { role, state }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Role this state machine runs for.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether moving to `to` is allowed from the current state.
    #[must_use]
    pub fn can_transition(&self, to: HandshakeState) -> bool {
        use HandshakeState::{
            Accepted, AwaitingAck, AwaitingReady, AwaitingSalt, Connected, Failed, KeyConfirmed,
            KeyDerived, ReadyReceived, SentReady,
        };

        match (self.role, self.state, to) {
            // Terminal states
            (_, KeyConfirmed | Failed, _) => false,

            // Any live state may fail
            (_, _, Failed) => true,

            (Role::Server, Accepted, SentReady)
            | (Role::Server, SentReady, AwaitingSalt)
            | (Role::Server, AwaitingSalt, KeyDerived) => true,

            (Role::Client, Connected, AwaitingReady)
            | (Role::Client, AwaitingReady, ReadyReceived)
            | (Role::Client, ReadyReceived, KeyDerived) => true,

            (_, KeyDerived, AwaitingAck) | (_, AwaitingAck, KeyConfirmed) => true,

            _ => false,
        }
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidState`] if the transition is not allowed.
    pub fn transition_to(&mut self, to: HandshakeState) -> Result<(), ProtocolError> {
        if !self.can_transition(to) {
            return Err(ProtocolError::InvalidState {
                from: self.state,
                to,
            });
        }

        debug!(role = %self.role, "handshake state transition: {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }

    fn advance(&mut self, to: HandshakeState) -> Result<(), Error> {
        self.transition_to(to).in_phase(Phase::Handshake)
    }

    /// Move to [`HandshakeState::Failed`] and tag `err` with the state the
    /// handshake stopped in.
    fn fail(&mut self, err: Error) -> Error {
        let stopped_in = self.state;
        if self.transition_to(HandshakeState::Failed).is_err() {
            return err;
        }
        err.at_state(stopped_in)
    }
}

/// Run the server side of the handshake.
///
/// # Errors
///
/// Any transport, protocol or crypto failure, and [`ErrorKind::KeyMismatch`]
/// when the client's confirmation tag does not match. All in
/// [`Phase::Handshake`], tagged with the state the handshake stopped in.
pub fn server_handshake<C: Channel + ?Sized>(
    ch: &mut C,
    passphrase: &[u8],
    params: &KdfParams,
) -> Result<SessionKey, Error> {
    let mut hs = Handshake::new(Role::Server);
    run_server(&mut hs, ch, passphrase, params).map_err(|e| hs.fail(e))
}

fn run_server<C: Channel + ?Sized>(
    hs: &mut Handshake,
    ch: &mut C,
    passphrase: &[u8],
    params: &KdfParams,
) -> Result<SessionKey, Error> {
    wire::send_ready_signal(ch).in_phase(Phase::Handshake)?;
    hs.advance(HandshakeState::SentReady)?;

    hs.advance(HandshakeState::AwaitingSalt)?;
    let salt = wire::receive_salt(ch).in_phase(Phase::Handshake)?;

    let key = SessionKey::derive(passphrase, &salt, params).in_phase(Phase::Handshake)?;
    hs.advance(HandshakeState::KeyDerived)?;

    wire::send_key_acknowledgment(ch, &key.confirmation_tag(SERVER_CONFIRMATION))
        .in_phase(Phase::Handshake)?;
    hs.advance(HandshakeState::AwaitingAck)?;

    wire::wait_for_key_acknowledgment(ch, &key.confirmation_tag(CLIENT_CONFIRMATION))
        .in_phase(Phase::Handshake)?;
    hs.advance(HandshakeState::KeyConfirmed)?;

    info!("handshake complete (server)");
    Ok(key)
}

/// Run the client side of the handshake. The client owns the salt.
///
/// # Errors
///
/// Any transport, protocol or crypto failure, and [`ErrorKind::KeyMismatch`]
/// when the server's confirmation tag does not match. All in
/// [`Phase::Handshake`], tagged with the state the handshake stopped in.
pub fn client_handshake<C: Channel + ?Sized>(
    ch: &mut C,
    passphrase: &[u8],
    params: &KdfParams,
) -> Result<SessionKey, Error> {
    let mut hs = Handshake::new(Role::Client);
    run_client(&mut hs, ch, passphrase, params).map_err(|e| hs.fail(e))
}

fn run_client<C: Channel + ?Sized>(
    hs: &mut Handshake,
    ch: &mut C,
    passphrase: &[u8],
    params: &KdfParams,
) -> Result<SessionKey, Error> {
    hs.advance(HandshakeState::AwaitingReady)?;
    wire::wait_for_ready(ch).in_phase(Phase::Handshake)?;
    hs.advance(HandshakeState::ReadyReceived)?;

    let salt = Salt::generate().in_phase(Phase::Handshake)?;
    wire::send_salt(ch, &salt).in_phase(Phase::Handshake)?;

    let key = SessionKey::derive(passphrase, &salt, params).in_phase(Phase::Handshake)?;
    hs.advance(HandshakeState::KeyDerived)?;

    hs.advance(HandshakeState::AwaitingAck)?;
    let server_tag = wire::receive_key_acknowledgment(ch).in_phase(Phase::Handshake)?;
    wire::send_key_acknowledgment(ch, &key.confirmation_tag(CLIENT_CONFIRMATION))
        .in_phase(Phase::Handshake)?;

    if !key.confirmation_tag(SERVER_CONFIRMATION).verify(&server_tag) {
        return Err(Error::new(Phase::Handshake, ErrorKind::KeyMismatch));
    }
    hs.advance(HandshakeState::KeyConfirmed)?;

    info!("handshake complete (client)");
    Ok(key)
}
