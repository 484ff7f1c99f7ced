//! In-place upgrade of a plaintext line-oriented session to an encrypted
//! transport.
//!
//! # Overview
//!
//! The crate implements the client side of an SMTP-style STARTTLS exchange:
//! a [`LineSession`] carries the plaintext command/reply dialogue, a
//! [`StartTlsUpgrader`] sends the upgrade command and — exactly when the
//! peer answers with reply code `220` — hands the raw stream to a
//! [`HandshakeEngine`] and atomically swaps the session's transport for the
//! [`SecureChannel`] the engine returns. Everything the caller sends or
//! receives afterwards flows through the encrypted channel without the
//! session object changing identity.
//!
//! # Design
//!
//! Responsibilities are deliberately split three ways. The session owns the
//! bytes: one [`TransportCell`] holding the active transport plus a replay
//! buffer that guarantees plaintext read ahead of a reply boundary is
//! delivered exactly once. The orchestrator owns the sequence: the state
//! ladder from plaintext through negotiation and handshake to secured, and
//! the strict single-code acceptance check. The engine owns the
//! cryptography behind the [`HandshakeEngine`] trait; an optional
//! rustls-backed implementation is available behind the `rustls` feature,
//! and tests substitute mock engines to exercise the negotiation without
//! any key exchange.
//!
//! Authentication material is described by [`AuthConfig`], whose mutual
//! exclusions (one client identity, one server-authentication policy, a
//! common name only next to a trust list) are enforced by
//! [`AuthConfig::validated`] before the engine ever sees the configuration.
//!
//! # Invariants
//!
//! - The upgrade command is only ever sent from the plaintext state; a
//!   session is secured at most once.
//! - Only the exact ready code `220` starts a handshake. Any other reply,
//!   including other `2xx` codes, is a refusal that leaves the session
//!   untouched and usable.
//! - The transport swap is atomic with respect to the session API: no read
//!   or write can observe a half-swapped transport, and buffered plaintext
//!   is never silently discarded or replayed through the secured channel.
//! - Credentials and key material are zeroized on drop and never appear in
//!   `Debug` output or log lines.
//!
//! # Errors
//!
//! Failures keep their origin: [`UpgradeError`] distinguishes a misuse of
//! the state machine, an inconsistent [`AuthConfig`], an I/O failure during
//! the plaintext exchange, and a [`HandshakeError`] from the engine, which
//! is propagated verbatim. A refusal by the peer is not an error at all; it
//! is the [`UpgradeOutcome::Refused`] outcome.
//!
//! # Examples
//!
//! ```no_run
//! # #[cfg(feature = "rustls")]
//! # fn upgrade_session() -> Result<(), Box<dyn std::error::Error>> {
//! use std::net::TcpStream;
//!
//! use oc_starttls_transport::{
//!     AuthConfig, LineSession, RustlsEngine, StartTlsUpgrader, UpgradeOutcome,
//! };
//!
//! let stream = TcpStream::connect("mx.example.org:25")?;
//! let mut session = LineSession::new(stream);
//!
//! let config = AuthConfig::new().with_fingerprint(
//!     "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08",
//! );
//! let mut upgrader = StartTlsUpgrader::new(RustlsEngine::new());
//!
//! match upgrader.upgrade(&mut session, &config)? {
//!     UpgradeOutcome::Secured(reply) => println!("secured: {reply}"),
//!     UpgradeOutcome::Refused(reply) => println!("refused: {reply}"),
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod auth;
#[cfg(feature = "rustls")]
#[cfg_attr(docsrs, doc(cfg(feature = "rustls")))]
mod engine;
mod handshake;
mod session;
mod trace;
mod upgrade;

pub use auth::{
    AuthConfig, ClientCertificate, ClientIdentity, ConfigError, ConfigErrorKind,
    HandshakeSettings, ServerAuthPolicy, SrpCredentials, TlsVersion, TrustAnchors, ValidatedAuth,
};
#[cfg(feature = "rustls")]
#[cfg_attr(docsrs, doc(cfg(feature = "rustls")))]
pub use engine::RustlsEngine;
pub use handshake::{HandshakeEngine, HandshakeError, SecureChannel, ServerAuthFailureKind};
pub use session::{LineSession, SessionState, TransportCell};
pub use upgrade::{StartTlsUpgrader, UpgradeError, UpgradeOutcome};

pub use oc_starttls_protocol as protocol;
