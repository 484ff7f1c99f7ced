//! Authentication configuration and its structural validation.
//!
//! The configuration mirrors the mutually constrained optional parameters of
//! classic STARTTLS helpers: at most one client identity (SRP credentials or
//! a certificate chain), at most one server-authentication policy (a pinned
//! fingerprint or a trust list), and a `common_name` that only means anything
//! next to a trust list. Validation is purely structural, performed before
//! any network I/O, and repeatable; the successful result borrows the
//! configuration as tagged variants so invalid combinations cannot travel
//! past this seam.

use std::fmt;

use thiserror::Error;
use zeroize::Zeroizing;

/// SRP username/password credentials for password-based mutual
/// authentication.
///
/// The password is held in [`Zeroizing`] storage so the secret is wiped when
/// the credentials are dropped, matching how daemon-auth secrets are handled
/// elsewhere in this codebase.
#[derive(Clone)]
pub struct SrpCredentials {
    username: String,
    password: Zeroizing<String>,
}

impl SrpCredentials {
    /// Creates credentials from a username and password.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Returns the SRP username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the SRP password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for SrpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SrpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A DER-encoded client certificate chain plus its private key.
///
/// The chain is ordered end-entity first. The key material is zeroized on
/// drop and never printed by the [`fmt::Debug`] implementation.
#[derive(Clone)]
pub struct ClientCertificate {
    chain: Vec<Vec<u8>>,
    private_key: Zeroizing<Vec<u8>>,
}

impl ClientCertificate {
    /// Creates a client certificate identity from DER-encoded parts.
    #[must_use]
    pub fn new(chain: Vec<Vec<u8>>, private_key: Vec<u8>) -> Self {
        Self {
            chain,
            private_key: Zeroizing::new(private_key),
        }
    }

    /// Returns the DER-encoded certificate chain, end-entity first.
    #[must_use]
    pub fn chain(&self) -> &[Vec<u8>] {
        &self.chain
    }

    /// Returns the DER-encoded private key.
    #[must_use]
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

impl fmt::Debug for ClientCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCertificate")
            .field("chain_len", &self.chain.len())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// A set of DER-encoded trusted root certificates.
///
/// The peer must present a chain extending to one of these roots for
/// trust-list server authentication to succeed.
#[derive(Clone, Debug, Default)]
pub struct TrustAnchors {
    roots: Vec<Vec<u8>>,
}

impl TrustAnchors {
    /// Creates a trust list from DER-encoded root certificates.
    #[must_use]
    pub const fn new(roots: Vec<Vec<u8>>) -> Self {
        Self { roots }
    }

    /// Returns the DER-encoded roots.
    #[must_use]
    pub fn roots(&self) -> &[Vec<u8>] {
        &self.roots
    }
}

/// TLS protocol versions a caller may pin the handshake to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord)]
pub enum TlsVersion {
    /// TLS 1.2.
    Tls12,
    /// TLS 1.3.
    Tls13,
}

/// Opaque handshake preferences passed through to the engine unmodified.
///
/// The orchestrator never interprets these values; they exist so callers can
/// constrain the engine's version and ciphersuite selection without widening
/// the upgrade API. `server_name` carries the SNI / verification name for
/// engines that require one.
#[derive(Clone, Debug, Default)]
pub struct HandshakeSettings {
    /// Lowest protocol version the client will offer.
    pub min_version: Option<TlsVersion>,
    /// Highest protocol version the client will offer.
    pub max_version: Option<TlsVersion>,
    /// Ciphersuite names in preference order; empty means engine default.
    pub cipher_suites: Vec<String>,
    /// Server name indication handed to the engine.
    pub server_name: Option<String>,
}

/// Errors that can occur while validating an [`AuthConfig`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConfigErrorKind {
    /// Both SRP credentials and a client certificate were supplied.
    ConflictingClientIdentity,
    /// Both a fingerprint pin and a trust list were supplied.
    ConflictingServerAuthentication,
    /// A `common_name` was supplied without a trust list.
    CommonNameRequiresTrustAnchors,
}

/// Error type returned when an [`AuthConfig`] is internally inconsistent.
///
/// Configuration errors are detected before any network I/O and are always
/// recoverable: the caller can correct the configuration and retry the
/// upgrade on the same plaintext session.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub struct ConfigError {
    kind: ConfigErrorKind,
}

impl ConfigError {
    pub(crate) const fn new(kind: ConfigErrorKind) -> Self {
        Self { kind }
    }

    /// Returns the classification describing why validation failed.
    #[must_use]
    pub const fn kind(self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConfigErrorKind::ConflictingClientIdentity => {
                f.write_str("SRP credentials and a client certificate are mutually exclusive")
            }
            ConfigErrorKind::ConflictingServerAuthentication => {
                f.write_str("a certificate fingerprint and a trust list are mutually exclusive")
            }
            ConfigErrorKind::CommonNameRequiresTrustAnchors => {
                f.write_str("a common name is only meaningful together with a trust list")
            }
        }
    }
}

/// The client identity selected by a validated configuration.
#[derive(Clone, Copy, Debug)]
pub enum ClientIdentity<'a> {
    /// No client authentication; the anonymous/opportunistic case.
    Anonymous,
    /// Password-based mutual authentication via SRP.
    Srp(&'a SrpCredentials),
    /// Certificate-based client authentication.
    Certificate(&'a ClientCertificate),
}

/// The server-authentication policy selected by a validated configuration.
#[derive(Clone, Copy, Debug)]
pub enum ServerAuthPolicy<'a> {
    /// No certificate-based server authentication.
    ///
    /// Legal on its own (opportunistic encryption) and also the correct
    /// choice when SRP already authenticates the server implicitly.
    None,
    /// Pin the peer's end-entity certificate to a hex-encoded digest.
    Fingerprint(&'a str),
    /// Validate the peer's chain against a trust list, optionally requiring
    /// an exact peer name.
    TrustList {
        /// Trusted root certificates.
        anchors: &'a TrustAnchors,
        /// Expected end-entity name, when the caller pins one.
        common_name: Option<&'a str>,
    },
}

/// A structurally valid view of an [`AuthConfig`].
///
/// Produced only by [`AuthConfig::validated`]; holding one proves the
/// mutual-exclusion rules were checked. The handshake engine consumes this
/// view, never the raw configuration.
#[derive(Clone, Copy, Debug)]
pub struct ValidatedAuth<'a> {
    /// Client identity offered during the handshake.
    pub identity: ClientIdentity<'a>,
    /// How the peer's identity must be verified.
    pub server_auth: ServerAuthPolicy<'a>,
    /// Opaque handshake preferences, passed through unmodified.
    pub settings: &'a HandshakeSettings,
}

/// Caller-supplied authentication configuration for one upgrade attempt.
///
/// All fields are optional and independently settable; the mutual-exclusion
/// rules are enforced by [`Self::validated`] rather than at construction so a
/// caller assembling the value from CLI flags or config files gets one
/// coherent error instead of a panic mid-assembly.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    srp: Option<SrpCredentials>,
    client_certificate: Option<ClientCertificate>,
    fingerprint: Option<String>,
    trust_anchors: Option<TrustAnchors>,
    common_name: Option<String>,
    settings: HandshakeSettings,
}

impl AuthConfig {
    /// Creates an empty configuration: anonymous client, no server
    /// authentication, engine-default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies SRP credentials as the client identity.
    #[must_use]
    pub fn with_srp(mut self, credentials: SrpCredentials) -> Self {
        self.srp = Some(credentials);
        self
    }

    /// Supplies a certificate chain and key as the client identity.
    #[must_use]
    pub fn with_client_certificate(mut self, certificate: ClientCertificate) -> Self {
        self.client_certificate = Some(certificate);
        self
    }

    /// Pins the peer's certificate to a hex-encoded digest.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Supplies trusted roots for chain-based server authentication.
    #[must_use]
    pub fn with_trust_anchors(mut self, anchors: TrustAnchors) -> Self {
        self.trust_anchors = Some(anchors);
        self
    }

    /// Requires the peer's end-entity certificate to carry this name.
    ///
    /// Only meaningful together with [`Self::with_trust_anchors`]; validation
    /// rejects the combination otherwise.
    #[must_use]
    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = Some(common_name.into());
        self
    }

    /// Replaces the opaque handshake settings.
    #[must_use]
    pub fn with_settings(mut self, settings: HandshakeSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Returns the opaque handshake settings.
    #[must_use]
    pub const fn settings(&self) -> &HandshakeSettings {
        &self.settings
    }

    /// Checks the configuration's internal consistency.
    ///
    /// Pure and idempotent: no I/O, no mutation, callable any number of
    /// times. Configurations with no client identity and/or no
    /// server-authentication policy are accepted — anonymous and
    /// opportunistic upgrades are legal.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when both client identities are populated,
    /// when both server-authentication policies are populated, or when a
    /// `common_name` is present without trust anchors.
    pub fn validated(&self) -> Result<ValidatedAuth<'_>, ConfigError> {
        let identity = match (&self.srp, &self.client_certificate) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::new(ConfigErrorKind::ConflictingClientIdentity));
            }
            (Some(srp), None) => ClientIdentity::Srp(srp),
            (None, Some(certificate)) => ClientIdentity::Certificate(certificate),
            (None, None) => ClientIdentity::Anonymous,
        };

        let server_auth = match (&self.fingerprint, &self.trust_anchors) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::new(
                    ConfigErrorKind::ConflictingServerAuthentication,
                ));
            }
            (Some(fingerprint), None) => {
                if self.common_name.is_some() {
                    return Err(ConfigError::new(
                        ConfigErrorKind::CommonNameRequiresTrustAnchors,
                    ));
                }
                ServerAuthPolicy::Fingerprint(fingerprint)
            }
            (None, Some(anchors)) => ServerAuthPolicy::TrustList {
                anchors,
                common_name: self.common_name.as_deref(),
            },
            (None, None) => {
                if self.common_name.is_some() {
                    return Err(ConfigError::new(
                        ConfigErrorKind::CommonNameRequiresTrustAnchors,
                    ));
                }
                ServerAuthPolicy::None
            }
        };

        Ok(ValidatedAuth {
            identity,
            server_auth,
            settings: &self.settings,
        })
    }
}
