//! TLS material and policy for both negotiation roles.
//!
//! One `TlsSettings` value is built at startup and shared read-only by every
//! worker. The acceptor role needs a certificate and key; the initiator role
//! optionally verifies backends against a CA file or directory and otherwise
//! skips verification, matching the long-standing proxy behavior of only
//! verifying when the operator supplied trust anchors.

use std::time::Duration;

use crate::{Error, Result};

#[cfg(feature = "tls")]
use std::sync::Arc;

/// Default bound on the probe read and both handshakes.
pub const DEFAULT_NEGOTIATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether and how strongly security is wanted on proxied connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecurityPolicy {
    /// Never negotiate; acceptor declines, initiator stays silent
    #[default]
    Disable,
    /// Negotiate when possible; a declined handshake falls back to plaintext
    Prefer,
    /// Negotiate, and refuse explicit I/O on connections that did not end up
    /// secured
    Require,
}

impl SecurityPolicy {
    /// Whether negotiation should be attempted at all.
    pub fn wants_security(&self) -> bool {
        !matches!(self, Self::Disable)
    }

    /// Whether unsecured I/O must be refused after negotiation settles.
    pub fn mandates_security(&self) -> bool {
        matches!(self, Self::Require)
    }
}

impl std::fmt::Display for SecurityPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disable => write!(f, "disable"),
            Self::Prefer => write!(f, "prefer"),
            Self::Require => write!(f, "require"),
        }
    }
}

impl std::str::FromStr for SecurityPolicy {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "disable" => Ok(Self::Disable),
            "prefer" => Ok(Self::Prefer),
            "require" => Ok(Self::Require),
            _ => Err(Error::Config(format!(
                "invalid security policy '{s}': expected disable, prefer, or require"
            ))),
        }
    }
}

/// Compiled TLS material for both roles.
///
/// Built once via [`TlsSettings::builder`]; immutable afterwards. Bad paths
/// or unparsable PEM surface here as [`Error::Config`] instead of failing
/// per connection later.
///
/// # Examples
///
/// ```ignore
/// use poolgate_wire::connection::{SecurityPolicy, TlsSettings};
///
/// // Acceptor and initiator material for a proxy deployment
/// let settings = TlsSettings::builder()
///     .policy(SecurityPolicy::Prefer)
///     .cert_path("/etc/poolgate/server.crt")
///     .key_path("/etc/poolgate/server.key")
///     .ca_cert_path("/etc/poolgate/backend-ca.pem")
///     .build()?;
///
/// // No security anywhere
/// let settings = TlsSettings::disabled();
/// ```
#[derive(Clone)]
pub struct TlsSettings {
    policy: SecurityPolicy,
    cert_path: Option<String>,
    key_path: Option<String>,
    ca_cert_path: Option<String>,
    ca_cert_dir: Option<String>,
    negotiate_timeout: Duration,
    #[cfg(feature = "tls")]
    server_config: Option<Arc<rustls::ServerConfig>>,
    #[cfg(feature = "tls")]
    client_config: Option<Arc<rustls::ClientConfig>>,
}

impl TlsSettings {
    /// Create a new settings builder.
    pub fn builder() -> TlsSettingsBuilder {
        TlsSettingsBuilder::default()
    }

    /// Settings with security switched off entirely.
    pub fn disabled() -> TlsSettings {
        TlsSettings {
            policy: SecurityPolicy::Disable,
            cert_path: None,
            key_path: None,
            ca_cert_path: None,
            ca_cert_dir: None,
            negotiate_timeout: DEFAULT_NEGOTIATE_TIMEOUT,
            #[cfg(feature = "tls")]
            server_config: None,
            #[cfg(feature = "tls")]
            client_config: None,
        }
    }

    pub fn policy(&self) -> SecurityPolicy {
        self.policy
    }

    /// Explicit bound applied to the probe read and both handshakes.
    pub fn negotiate_timeout(&self) -> Duration {
        self.negotiate_timeout
    }

    /// True when an inbound probe can be answered with `'S'`.
    pub fn offers_security(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            self.policy.wants_security() && self.server_config.is_some()
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    /// True when an outbound connection should send the probe.
    pub fn initiates_security(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            self.policy.wants_security() && self.client_config.is_some()
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    /// Compiled acceptor-side config, when certificate and key were given.
    #[cfg(feature = "tls")]
    pub fn server_config(&self) -> Option<Arc<rustls::ServerConfig>> {
        self.server_config.clone()
    }

    /// Compiled initiator-side config.
    #[cfg(feature = "tls")]
    pub fn client_config(&self) -> Option<Arc<rustls::ClientConfig>> {
        self.client_config.clone()
    }
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("policy", &self.policy)
            .field("cert_path", &self.cert_path)
            .field("key_path", &self.key_path)
            .field("ca_cert_path", &self.ca_cert_path)
            .field("ca_cert_dir", &self.ca_cert_dir)
            .field("negotiate_timeout", &self.negotiate_timeout)
            .field("offers_security", &self.offers_security())
            .field("initiates_security", &self.initiates_security())
            .finish()
    }
}

/// Builder for [`TlsSettings`].
#[derive(Default)]
pub struct TlsSettingsBuilder {
    policy: SecurityPolicy,
    cert_path: Option<String>,
    key_path: Option<String>,
    ca_cert_path: Option<String>,
    ca_cert_dir: Option<String>,
    negotiate_timeout: Option<Duration>,
}

impl TlsSettingsBuilder {
    /// Set the negotiation policy (default: disable).
    pub fn policy(mut self, policy: SecurityPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Server certificate chain in PEM format (acceptor role).
    pub fn cert_path(mut self, path: impl Into<String>) -> Self {
        self.cert_path = Some(path.into());
        self
    }

    /// Server private key in PEM format (acceptor role).
    pub fn key_path(mut self, path: impl Into<String>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// CA certificate file used to verify backends (initiator role).
    pub fn ca_cert_path(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    /// Directory of CA certificates used to verify backends. Every `.pem`
    /// and `.crt` file inside is added to the root store.
    pub fn ca_cert_dir(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_dir = Some(path.into());
        self
    }

    /// Override the negotiation timeout (default 30s). Applies to the probe
    /// read and both handshake directions.
    pub fn negotiate_timeout(mut self, timeout: Duration) -> Self {
        self.negotiate_timeout = Some(timeout);
        self
    }

    /// Build the settings, loading and compiling all PEM material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a configured file cannot be read or
    /// parsed, if only one of certificate/key was given, or if the
    /// certificate and key do not match.
    pub fn build(self) -> Result<TlsSettings> {
        let negotiate_timeout = self.negotiate_timeout.unwrap_or(DEFAULT_NEGOTIATE_TIMEOUT);

        #[cfg(not(feature = "tls"))]
        {
            if self.policy.wants_security() {
                tracing::warn!(
                    policy = %self.policy,
                    "security policy configured but TLS support is not built in"
                );
            }
            Ok(TlsSettings {
                policy: self.policy,
                cert_path: self.cert_path,
                key_path: self.key_path,
                ca_cert_path: self.ca_cert_path,
                ca_cert_dir: self.ca_cert_dir,
                negotiate_timeout,
            })
        }

        #[cfg(feature = "tls")]
        {
            let mut server_config = None;
            let mut client_config = None;

            if self.policy.wants_security() {
                server_config = match (&self.cert_path, &self.key_path) {
                    (Some(cert), Some(key)) => Some(material::load_server_config(cert, key)?),
                    (None, None) => None,
                    _ => {
                        return Err(Error::Config(
                            "acceptor-side security needs both cert_path and key_path".into(),
                        ));
                    }
                };

                let roots = match (&self.ca_cert_path, &self.ca_cert_dir) {
                    (None, None) => None,
                    (file, dir) => Some(material::load_root_store(
                        file.as_deref(),
                        dir.as_deref(),
                    )?),
                };
                client_config = Some(material::build_client_config(roots));
            }

            Ok(TlsSettings {
                policy: self.policy,
                cert_path: self.cert_path,
                key_path: self.key_path,
                ca_cert_path: self.ca_cert_path,
                ca_cert_dir: self.ca_cert_dir,
                negotiate_timeout,
                server_config,
                client_config,
            })
        }
    }
}

/// Parse a hostname for TLS server name indication.
///
/// Strips a trailing dot and rejects obviously malformed names. IPv4
/// literals pass through; rustls turns them into IP-address server names.
pub fn parse_server_name(hostname: &str) -> Result<String> {
    let hostname = hostname.trim_end_matches('.');

    if hostname.is_empty() || hostname.len() > 253 {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{hostname}'"
        )));
    }

    if !hostname
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '.')
    {
        return Err(Error::Config(format!(
            "invalid hostname for TLS: '{hostname}'"
        )));
    }

    Ok(hostname.to_string())
}

#[cfg(feature = "tls")]
mod material {
    //! PEM loading and rustls config assembly.

    use std::fs;
    use std::sync::Arc;

    use rustls::{ClientConfig, RootCertStore, ServerConfig};
    use rustls_pemfile::Item;
    use rustls_pki_types::{CertificateDer, PrivateKeyDer};

    use crate::{Error, Result};

    pub fn load_server_config(cert_path: &str, key_path: &str) -> Result<Arc<ServerConfig>> {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;

        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| {
                Error::Config(format!(
                    "server certificate '{cert_path}' rejected: {e}"
                ))
            })?;

        Ok(Arc::new(config))
    }

    pub fn load_root_store(
        ca_file: Option<&str>,
        ca_dir: Option<&str>,
    ) -> Result<RootCertStore> {
        let mut store = RootCertStore::empty();
        let mut found = 0usize;

        if let Some(path) = ca_file {
            found += add_certs_from_file(&mut store, path)?;
        }

        if let Some(dir) = ca_dir {
            let entries = fs::read_dir(dir).map_err(|e| {
                Error::Config(format!("failed to read CA directory '{dir}': {e}"))
            })?;
            for entry in entries {
                let entry = entry.map_err(|e| {
                    Error::Config(format!("failed to read CA directory '{dir}': {e}"))
                })?;
                let path = entry.path();
                let is_pem = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("pem") || ext.eq_ignore_ascii_case("crt"))
                    .unwrap_or(false);
                if is_pem {
                    found += add_certs_from_file(&mut store, &path.to_string_lossy())?;
                }
            }
        }

        if found == 0 {
            return Err(Error::Config(
                "no usable CA certificates found in the configured locations".into(),
            ));
        }

        Ok(store)
    }

    /// Root store present: verify backends against it. Absent: accept any
    /// certificate, which matches deployments fronting backends with
    /// self-signed material.
    pub fn build_client_config(roots: Option<RootCertStore>) -> Arc<ClientConfig> {
        let config = match roots {
            Some(store) => ClientConfig::builder()
                .with_root_certificates(store)
                .with_no_client_auth(),
            None => ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(NoVerifier))
                .with_no_client_auth(),
        };
        Arc::new(config)
    }

    fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
        let data = fs::read(path).map_err(|e| {
            Error::Config(format!("failed to read certificate file '{path}': {e}"))
        })?;

        let mut reader = std::io::Cursor::new(&data);
        let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                Error::Config(format!("failed to parse certificates from '{path}': {e}"))
            })?;

        if certs.is_empty() {
            return Err(Error::Config(format!(
                "no certificates found in '{path}'"
            )));
        }
        Ok(certs)
    }

    fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>> {
        let data = fs::read(path).map_err(|e| {
            Error::Config(format!("failed to read private key file '{path}': {e}"))
        })?;

        let mut reader = std::io::Cursor::new(&data);
        rustls_pemfile::private_key(&mut reader)
            .map_err(|e| Error::Config(format!("failed to parse private key from '{path}': {e}")))?
            .ok_or_else(|| Error::Config(format!("no private key found in '{path}'")))
    }

    fn add_certs_from_file(store: &mut RootCertStore, path: &str) -> Result<usize> {
        let data = fs::read(path).map_err(|e| {
            Error::Config(format!("failed to read CA certificate file '{path}': {e}"))
        })?;

        let mut reader = std::io::Cursor::new(&data);
        let mut found = 0usize;

        loop {
            match rustls_pemfile::read_one(&mut reader) {
                Ok(Some(Item::X509Certificate(cert))) => {
                    let _ = store.add_parsable_certificates(std::iter::once(cert));
                    found += 1;
                }
                Ok(Some(_)) => {
                    // Skip non-certificate items (private keys, etc.)
                }
                Ok(None) => break,
                Err(_) => {
                    return Err(Error::Config(format!(
                        "failed to parse CA certificate from '{path}'"
                    )));
                }
            }
        }

        Ok(found)
    }

    /// Accepts every server certificate. Installed only when no CA material
    /// is configured.
    #[derive(Debug)]
    struct NoVerifier;

    impl rustls::client::danger::ServerCertVerifier for NoVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &rustls_pki_types::ServerName<'_>,
            _ocsp_response: &[u8],
            _now: rustls_pki_types::UnixTime,
        ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error>
        {
            Ok(rustls::client::danger::ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error>
        {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &rustls::DigitallySignedStruct,
        ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error>
        {
            Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms
                .supported_schemes()
        }
    }
}
