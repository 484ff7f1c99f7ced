//! The seam between the upgrade orchestrator and the cryptographic
//! handshake engine.
//!
//! The engine is an external collaborator: this crate defines the traits it
//! must satisfy and the error taxonomy it must report through, but never the
//! record layer or key-exchange math. An optional rustls-backed
//! implementation lives behind the `rustls` feature in [`crate::engine`].

use std::io::{self, Read, Write};

use thiserror::Error;

use crate::auth::ValidatedAuth;

/// An encrypted channel wrapping the session's original socket.
///
/// Produced only by a successful handshake. Ownership of the raw socket
/// transfers into the channel, which from then on is the sole owner of its
/// teardown: [`SecureChannel::close`] is idempotent and must close the
/// underlying socket exactly once (typically by dropping it after the
/// closing alert is flushed).
pub trait SecureChannel: Read + Write + Send {
    /// Shuts the channel down.
    ///
    /// Safe to call repeatedly; only the first call performs the closing
    /// exchange and the socket teardown.
    fn close(&mut self) -> io::Result<()>;
}

/// A blocking client-side handshake engine.
///
/// The raw transport moves into the engine for the duration of the
/// handshake and, on success, into the [`SecureChannel`] it returns. The
/// call blocks the
/// invoking thread for the full handshake; the engine may internally perform
/// any number of network round trips. No timeout is imposed here —
/// cancellation happens by closing the socket from outside, which the engine
/// must observe and report as [`HandshakeError::TransportFailure`].
pub trait HandshakeEngine<S: Read + Write> {
    /// Runs the handshake over `transport` using the validated identity,
    /// server-authentication policy, and opaque settings.
    ///
    /// # Errors
    ///
    /// Returns a [`HandshakeError`] classifying the failure; the orchestrator
    /// propagates it verbatim. The transport is consumed either way — after a
    /// failed handshake the connection is in a mixed state no caller should
    /// continue using.
    fn perform_client_handshake(
        &mut self,
        transport: S,
        auth: ValidatedAuth<'_>,
    ) -> Result<Box<dyn SecureChannel>, HandshakeError>;
}

/// Why the peer failed server authentication.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ServerAuthFailureKind {
    /// The end-entity certificate's digest did not match the pinned
    /// fingerprint.
    FingerprintMismatch,
    /// The presented chain did not extend to any configured trust anchor.
    UntrustedChain,
    /// The end-entity certificate did not carry the required name.
    NameMismatch,
}

impl ServerAuthFailureKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::FingerprintMismatch => "certificate fingerprint mismatch",
            Self::UntrustedChain => "certificate chain is not trusted",
            Self::NameMismatch => "certificate name mismatch",
        }
    }
}

/// Errors reported by a [`HandshakeEngine`].
///
/// The orchestrator never catches, wraps, or reclassifies these; callers
/// receive them verbatim so they can distinguish an authentication failure
/// from a protocol mismatch from a dead socket and decide whether to retry,
/// fall back, or abort.
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// The peer failed server authentication.
    #[error("server authentication failed: {}", .0.as_str())]
    ServerAuthFailure(ServerAuthFailureKind),
    /// The peer rejected the client's credentials.
    #[error("client authentication failed: {0}")]
    ClientAuthFailure(String),
    /// Version or ciphersuite negotiation failed, or the peer broke the
    /// handshake protocol.
    #[error("handshake protocol failure: {0}")]
    ProtocolFailure(String),
    /// I/O error on the raw socket while the handshake was in flight.
    #[error("transport failure during handshake")]
    TransportFailure(#[from] io::Error),
}

impl HandshakeError {
    /// Reports whether the failure was an authentication problem (either
    /// direction) rather than a protocol or transport one.
    #[must_use]
    pub const fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::ServerAuthFailure(_) | Self::ClientAuthFailure(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_auth_failure_display_names_the_kind() {
        let err = HandshakeError::ServerAuthFailure(ServerAuthFailureKind::FingerprintMismatch);
        assert!(
            err.to_string().contains("fingerprint mismatch"),
            "display should name the kind: {err}"
        );
    }

    #[test]
    fn transport_failure_preserves_io_source() {
        let err = HandshakeError::from(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        let HandshakeError::TransportFailure(inner) = &err else {
            panic!("io::Error must convert to TransportFailure");
        };
        assert_eq!(inner.kind(), io::ErrorKind::ConnectionReset);
    }

    #[test]
    fn auth_failures_are_classified() {
        assert!(
            HandshakeError::ServerAuthFailure(ServerAuthFailureKind::UntrustedChain)
                .is_auth_failure()
        );
        assert!(HandshakeError::ClientAuthFailure("rejected".into()).is_auth_failure());
        assert!(!HandshakeError::ProtocolFailure("no common suite".into()).is_auth_failure());
    }
}
