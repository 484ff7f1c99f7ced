//! The upgrade orchestrator: one negotiation, one handshake, one swap.
//!
//! [`StartTlsUpgrader::upgrade`] drives the full sequence on a
//! [`LineSession`]: state guard, command, reply, configuration validation,
//! transport detach, handshake, and the atomic swap. The orchestrator owns
//! the session's state transitions; the handshake engine owns the
//! cryptography; the session owns the bytes. Errors carry their origin
//! unchanged so callers can tell a refusing peer from a broken configuration
//! from a failed handshake.

use std::io::{self, Read, Write};

use thiserror::Error;

use oc_starttls_protocol::{REPLY_CODE_READY, Reply, STARTTLS_COMMAND};

use crate::auth::{AuthConfig, ConfigError};
use crate::handshake::{HandshakeEngine, HandshakeError};
use crate::session::{LineSession, SessionState};
use crate::trace;

/// How a completed upgrade attempt ended.
///
/// Both variants carry the peer's negotiation reply so callers can log or
/// surface the server's own words. A refusal is not an error: the session
/// remains fully usable in plaintext and the caller decides whether that is
/// acceptable.
#[derive(Debug)]
pub enum UpgradeOutcome {
    /// The peer answered with something other than the ready code; no
    /// handshake was attempted and the session is unchanged.
    Refused(Reply),
    /// The handshake completed and the secured channel is installed.
    Secured(Reply),
}

impl UpgradeOutcome {
    /// Returns the peer's negotiation reply.
    #[must_use]
    pub const fn reply(&self) -> &Reply {
        match self {
            Self::Refused(reply) | Self::Secured(reply) => reply,
        }
    }

    /// Reports whether the session is now encrypted.
    #[must_use]
    pub const fn is_secured(&self) -> bool {
        matches!(self, Self::Secured(_))
    }
}

/// Errors that abort an upgrade attempt.
///
/// Apart from [`UpgradeError::InvalidState`] and [`UpgradeError::Config`]
/// before the command is sent, every variant leaves the session in the
/// `Failed` state: the wire is past the point where plaintext can safely
/// resume.
#[derive(Debug, Error)]
pub enum UpgradeError {
    /// The session was not in the plaintext state when the upgrade started.
    ///
    /// Guards against double upgrades and against negotiating on a session
    /// that already failed. Nothing was sent; the session is unchanged.
    #[error("cannot negotiate an upgrade from the {state} state")]
    InvalidState {
        /// The state the session was in.
        state: SessionState,
    },
    /// The authentication configuration is internally inconsistent.
    #[error("invalid authentication configuration")]
    Config(#[from] ConfigError),
    /// I/O or protocol failure during the plaintext command/reply exchange.
    #[error("negotiation exchange failed")]
    Exchange(#[source] io::Error),
    /// The peer sent bytes beyond its negotiation reply before the handshake.
    ///
    /// Plaintext pipelined past the ready reply cannot be replayed through
    /// the secured channel without breaking the clean phase boundary, so the
    /// attempt is aborted instead.
    #[error("{len} bytes of plaintext follow the negotiation reply")]
    BufferedPlaintext {
        /// Number of stranded plaintext bytes.
        len: usize,
    },
    /// The handshake engine reported a failure; carried verbatim.
    #[error("handshake failed")]
    Handshake(#[from] HandshakeError),
}

/// Drives in-place upgrades of plaintext sessions to an encrypted transport.
///
/// The upgrader is generic over its [`HandshakeEngine`] so the negotiation
/// logic can be exercised without any cryptography and callers can supply
/// their own engine. It holds no per-session state and may be reused across
/// sessions.
pub struct StartTlsUpgrader<E> {
    engine: E,
}

impl<E> StartTlsUpgrader<E> {
    /// Creates an upgrader around a handshake engine.
    #[must_use]
    pub const fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Consumes the upgrader and returns its engine.
    #[must_use]
    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Attempts to upgrade `session` to an encrypted transport.
    ///
    /// Sends the upgrade command, reads the peer's reply, and — exactly when
    /// the reply code is the ready code — validates `config`, hands the raw
    /// stream to the handshake engine, and installs the resulting secured
    /// channel. Any other reply code, including other success codes, is a
    /// refusal: `Ok(`[`UpgradeOutcome::Refused`]`)` with the session still in
    /// plaintext and untouched by the engine.
    ///
    /// Blocks for the full exchange and handshake. At most one upgrade ever
    /// succeeds per session; a refused attempt may be retried.
    ///
    /// # Errors
    ///
    /// Returns [`UpgradeError::InvalidState`] without side effects when the
    /// session is not in plaintext. All other errors leave the session
    /// `Failed` and unusable; see [`UpgradeError`] for the classification.
    pub fn upgrade<S>(
        &mut self,
        session: &mut LineSession<S>,
        config: &AuthConfig,
    ) -> Result<UpgradeOutcome, UpgradeError>
    where
        S: Read + Write,
        E: HandshakeEngine<S>,
    {
        let state = session.state();
        if state != SessionState::Plaintext {
            return Err(UpgradeError::InvalidState { state });
        }

        session
            .send_command(STARTTLS_COMMAND)
            .map_err(|err| fail_exchange(session, err))?;
        session.set_state(SessionState::NegotiationSent);
        trace::trace_command_sent(STARTTLS_COMMAND);

        let reply = session
            .read_reply()
            .map_err(|err| fail_exchange(session, err))?;
        trace::trace_reply_received(&reply);

        if reply.code() != REPLY_CODE_READY {
            // A refusal, even a polite 2xx one, ends the attempt cleanly:
            // nothing about the session changed and plaintext continues.
            session.set_state(SessionState::Plaintext);
            trace::trace_refused(reply.code());
            return Ok(UpgradeOutcome::Refused(reply));
        }
        session.set_state(SessionState::NegotiationAccepted);

        // Past this point the peer is waiting for handshake records, so any
        // abort leaves the wire unusable for plaintext.
        let auth = match config.validated() {
            Ok(auth) => auth,
            Err(err) => return Err(fail(session, UpgradeError::Config(err))),
        };

        let buffered = session.buffered_len();
        if buffered > 0 {
            return Err(fail(session, UpgradeError::BufferedPlaintext { len: buffered }));
        }

        let raw = session
            .detach_plain()
            .map_err(|err| fail(session, UpgradeError::Exchange(err)))?;
        session.set_state(SessionState::Handshaking);
        trace::trace_handshake_started();

        let channel = match self.engine.perform_client_handshake(raw, auth) {
            Ok(channel) => channel,
            Err(err) => return Err(fail(session, UpgradeError::Handshake(err))),
        };

        session
            .install_secured(channel)
            .map_err(|err| fail(session, UpgradeError::Exchange(err)))?;
        session.set_state(SessionState::Secured);
        trace::trace_secured();

        Ok(UpgradeOutcome::Secured(reply))
    }
}

fn fail_exchange<S: Read + Write>(session: &mut LineSession<S>, err: io::Error) -> UpgradeError {
    fail(session, UpgradeError::Exchange(err))
}

fn fail<S: Read + Write>(session: &mut LineSession<S>, err: UpgradeError) -> UpgradeError {
    trace::trace_failed(session.state(), &err);
    session.set_state(SessionState::Failed);
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_exposes_reply_and_security() {
        let refused = UpgradeOutcome::Refused(Reply::new(502, "nope".into()));
        assert!(!refused.is_secured());
        assert_eq!(refused.reply().code(), 502);

        let secured = UpgradeOutcome::Secured(Reply::new(220, "go".into()));
        assert!(secured.is_secured());
        assert_eq!(secured.reply().code(), 220);
    }

    #[test]
    fn config_error_converts_into_upgrade_error() {
        let err = AuthConfig::new()
            .with_common_name("mx.example.org")
            .validated()
            .expect_err("dangling common name");
        let upgrade_err = UpgradeError::from(err);
        assert!(matches!(upgrade_err, UpgradeError::Config(_)));
    }
}
