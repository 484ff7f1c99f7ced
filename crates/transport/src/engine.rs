//! Rustls-backed handshake engine.
//!
//! Translates a [`ValidatedAuth`] view into a `rustls::ClientConfig`, runs
//! the blocking handshake over the detached stream, and wraps the result in
//! a [`SecureChannel`]. Password-based SRP key exchange is not part of TLS
//! 1.2/1.3 as rustls implements it, so SRP identities are rejected before
//! any bytes hit the wire; callers needing SRP must supply their own engine.
//!
//! Server authentication follows the policy in the validated view:
//! trust-list policies use rustls's built-in WebPKI verification, while the
//! fingerprint and no-verification policies install custom certificate
//! verifiers that still check handshake signatures but replace (or skip)
//! chain validation.

use std::io::{self, Read, Write};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::{
    AlertDescription, CertificateError, ClientConfig, ClientConnection, DigitallySignedStruct,
    Error as TlsError, RootCertStore, SignatureScheme, StreamOwned, SupportedProtocolVersion,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use sha2::{Digest, Sha256};

use crate::auth::{ClientIdentity, HandshakeSettings, ServerAuthPolicy, TlsVersion, ValidatedAuth};
use crate::handshake::{HandshakeEngine, HandshakeError, SecureChannel, ServerAuthFailureKind};

/// A [`HandshakeEngine`] implemented on top of rustls.
///
/// Stateless and reusable across upgrade attempts; each call builds a fresh
/// client configuration from the validated view it receives.
#[derive(Clone, Copy, Debug, Default)]
pub struct RustlsEngine;

impl RustlsEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<S> HandshakeEngine<S> for RustlsEngine
where
    S: Read + Write + Send + 'static,
{
    fn perform_client_handshake(
        &mut self,
        mut transport: S,
        auth: ValidatedAuth<'_>,
    ) -> Result<Box<dyn SecureChannel>, HandshakeError> {
        let (config, server_name) = build_client_config(&auth)?;

        let mut connection =
            ClientConnection::new(Arc::new(config), server_name).map_err(classify_tls_error)?;
        while connection.is_handshaking() {
            connection
                .complete_io(&mut transport)
                .map_err(classify_handshake_io_error)?;
        }

        Ok(Box::new(RustlsChannel {
            stream: StreamOwned::new(connection, transport),
            closed: false,
        }))
    }
}

/// The secured channel produced by a completed rustls handshake.
struct RustlsChannel<S: Read + Write> {
    stream: StreamOwned<ClientConnection, S>,
    closed: bool,
}

impl<S: Read + Write> Read for RustlsChannel<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(channel_closed());
        }
        self.stream.read(buf)
    }
}

impl<S: Read + Write> Write for RustlsChannel<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(channel_closed());
        }
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(channel_closed());
        }
        self.stream.flush()
    }
}

impl<S: Read + Write + Send> SecureChannel for RustlsChannel<S> {
    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.conn.send_close_notify();
        // Flush the closing alert on a best-effort basis; a peer that
        // already slammed the connection must not turn teardown into an
        // error. The socket itself closes when the channel drops.
        let _ = self.stream.flush();
        Ok(())
    }
}

fn channel_closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "secure channel is closed")
}

fn build_client_config(
    auth: &ValidatedAuth<'_>,
) -> Result<(ClientConfig, ServerName<'static>), HandshakeError> {
    let server_name = resolve_server_name(auth)?;
    let provider = Arc::new(crypto_provider(auth.settings)?);
    let versions = protocol_versions(auth.settings)?;

    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(&versions)
        .map_err(|err| HandshakeError::ProtocolFailure(err.to_string()))?;

    let builder = match auth.server_auth {
        ServerAuthPolicy::TrustList { anchors, .. } => {
            let mut roots = RootCertStore::empty();
            for der in anchors.roots() {
                roots
                    .add(CertificateDer::from(der.clone()))
                    .map_err(|err| {
                        HandshakeError::ProtocolFailure(format!("invalid trust anchor: {err}"))
                    })?;
            }
            builder.with_root_certificates(roots)
        }
        ServerAuthPolicy::Fingerprint(expected) => {
            let expected = hex::decode(expected).map_err(|err| {
                HandshakeError::ProtocolFailure(format!(
                    "certificate fingerprint is not valid hex: {err}"
                ))
            })?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(FingerprintVerifier {
                    expected,
                    provider: Arc::clone(&provider),
                }))
        }
        ServerAuthPolicy::None => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert {
                provider: Arc::clone(&provider),
            })),
    };

    let config = match auth.identity {
        ClientIdentity::Anonymous => builder.with_no_client_auth(),
        ClientIdentity::Certificate(certificate) => {
            let chain = certificate
                .chain()
                .iter()
                .map(|der| CertificateDer::from(der.clone()))
                .collect();
            let key = PrivateKeyDer::try_from(certificate.private_key().to_vec())
                .map_err(|err| {
                    HandshakeError::ClientAuthFailure(format!("invalid private key: {err}"))
                })?;
            builder
                .with_client_auth_cert(chain, key)
                .map_err(|err| HandshakeError::ClientAuthFailure(err.to_string()))?
        }
        ClientIdentity::Srp(_) => {
            return Err(HandshakeError::ProtocolFailure(
                "SRP key exchange is not supported by the rustls engine".into(),
            ));
        }
    };

    Ok((config, server_name))
}

/// Picks the name the connection verifies (and sends as SNI).
///
/// Trust-list verification needs a real name; the fingerprint and
/// no-verification policies ignore it, so a placeholder keeps rustls's
/// connection API satisfied when the caller supplied none.
fn resolve_server_name(auth: &ValidatedAuth<'_>) -> Result<ServerName<'static>, HandshakeError> {
    let pinned = match auth.server_auth {
        ServerAuthPolicy::TrustList { common_name, .. } => common_name,
        ServerAuthPolicy::Fingerprint(_) | ServerAuthPolicy::None => None,
    };
    let configured = pinned.or(auth.settings.server_name.as_deref());

    let name = match (configured, &auth.server_auth) {
        (Some(name), _) => name.to_owned(),
        (None, ServerAuthPolicy::TrustList { .. }) => {
            return Err(HandshakeError::ProtocolFailure(
                "trust-list verification requires a server name or common name".into(),
            ));
        }
        (None, _) => "unverified.invalid".to_owned(),
    };

    ServerName::try_from(name)
        .map_err(|err| HandshakeError::ProtocolFailure(format!("invalid server name: {err}")))
}

fn crypto_provider(settings: &HandshakeSettings) -> Result<CryptoProvider, HandshakeError> {
    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    if !settings.cipher_suites.is_empty() {
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            settings
                .cipher_suites
                .iter()
                .any(|wanted| wanted.eq_ignore_ascii_case(&name))
        });
        if provider.cipher_suites.is_empty() {
            return Err(HandshakeError::ProtocolFailure(
                "none of the requested ciphersuites are supported".into(),
            ));
        }
    }
    Ok(provider)
}

fn protocol_versions(
    settings: &HandshakeSettings,
) -> Result<Vec<&'static SupportedProtocolVersion>, HandshakeError> {
    let in_bounds = |version: TlsVersion| {
        settings.min_version.is_none_or(|min| min <= version)
            && settings.max_version.is_none_or(|max| version <= max)
    };

    let mut versions = Vec::new();
    if in_bounds(TlsVersion::Tls12) {
        versions.push(&rustls::version::TLS12);
    }
    if in_bounds(TlsVersion::Tls13) {
        versions.push(&rustls::version::TLS13);
    }

    if versions.is_empty() {
        return Err(HandshakeError::ProtocolFailure(
            "version bounds exclude every supported protocol version".into(),
        ));
    }
    Ok(versions)
}

/// Maps an I/O failure from `complete_io` back onto the handshake taxonomy.
///
/// Rustls surfaces its own errors through `io::Error` with the TLS error as
/// the inner source; unwrap that layer so certificate failures do not get
/// misreported as transport problems.
fn classify_handshake_io_error(err: io::Error) -> HandshakeError {
    if err
        .get_ref()
        .is_some_and(|inner| inner.is::<TlsError>())
    {
        if let Some(inner) = err.into_inner() {
            if let Ok(tls) = inner.downcast::<TlsError>() {
                return classify_tls_error(*tls);
            }
        }
        return HandshakeError::ProtocolFailure("handshake failed".into());
    }
    HandshakeError::TransportFailure(err)
}

fn classify_tls_error(err: TlsError) -> HandshakeError {
    match err {
        TlsError::InvalidCertificate(
            CertificateError::NotValidForName | CertificateError::NotValidForNameContext { .. },
        ) => HandshakeError::ServerAuthFailure(ServerAuthFailureKind::NameMismatch),
        TlsError::InvalidCertificate(CertificateError::ApplicationVerificationFailure) => {
            HandshakeError::ServerAuthFailure(ServerAuthFailureKind::FingerprintMismatch)
        }
        TlsError::InvalidCertificate(_) => {
            HandshakeError::ServerAuthFailure(ServerAuthFailureKind::UntrustedChain)
        }
        TlsError::AlertReceived(
            alert @ (AlertDescription::BadCertificate
            | AlertDescription::CertificateRequired
            | AlertDescription::CertificateUnknown
            | AlertDescription::UnknownCA
            | AlertDescription::AccessDenied),
        ) => HandshakeError::ClientAuthFailure(format!("peer sent alert: {alert:?}")),
        other => HandshakeError::ProtocolFailure(other.to_string()),
    }
}

/// Pins the peer to the SHA-256 digest of its end-entity certificate.
///
/// Chain validation and name checks are intentionally skipped; possession of
/// the exact pinned certificate is the whole policy. Handshake signatures
/// are still verified.
#[derive(Debug)]
struct FingerprintVerifier {
    expected: Vec<u8>,
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for FingerprintVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        let digest = Sha256::digest(end_entity.as_ref());
        if digest.as_slice() == self.expected.as_slice() {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(TlsError::InvalidCertificate(
                CertificateError::ApplicationVerificationFailure,
            ))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Accepts any server certificate: the opportunistic-encryption policy.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, TlsError> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, TlsError> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
