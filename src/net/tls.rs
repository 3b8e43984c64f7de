//! TLS policy and certificate loading.
//!
//! `TlsPolicy` is a plain description produced while the listener is being
//! assembled. It only touches the filesystem when it is turned into a
//! `rustls::ServerConfig` at bind time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::crypto::aws_lc_rs;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};

use crate::config::{SslContextConfig, SslEngineConfig};

/// Error type for TLS materialisation.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read store {path:?}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),
    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),
    #[error("unsupported TLS protocol '{0}'")]
    UnknownProtocol(String),
    #[error("unsupported cipher suite '{0}'")]
    UnknownCipherSuite(String),
    #[error("cipher suite restriction left no usable suites")]
    NoCipherSuites,
    #[error("protocol restriction left no usable versions")]
    NoProtocols,
    #[error(transparent)]
    Rustls(#[from] rustls::Error),
    #[error(transparent)]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),
}

/// A PEM store on disk with its passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    pub file: PathBuf,
    pub passphrase: String,
}

/// Engine restrictions applied on top of the key material.
///
/// `None` for a list means "engine defaults".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnginePolicy {
    pub cipher_suites: Option<Vec<String>>,
    pub protocols: Option<Vec<String>>,
    pub client_mode: bool,
    pub need_client_auth: bool,
    pub want_client_auth: bool,
}

/// Resolved TLS settings for a listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPolicy {
    pub key_store: Store,
    pub trust_store: Store,
    pub engine: EnginePolicy,
}

impl TlsPolicy {
    /// Translate configuration into a policy.
    ///
    /// Without an engine section the policy uses engine defaults. The cipher
    /// and protocol lists only apply when their `*_configured` flag is set.
    pub fn configure(context: &SslContextConfig, engine: Option<&SslEngineConfig>) -> Self {
        let engine = match engine {
            None => EnginePolicy::default(),
            Some(e) => EnginePolicy {
                cipher_suites: e.cipher_configured.then(|| e.enabled_cipher_suites.clone()),
                protocols: e.protocol_configured.then(|| e.enabled_protocols.clone()),
                client_mode: e.client_mode,
                need_client_auth: e.need_client_auth,
                want_client_auth: e.want_client_auth,
            },
        };

        Self {
            key_store: Store {
                file: PathBuf::from(&context.key_store_file),
                passphrase: context.key_store_pass.clone(),
            },
            trust_store: Store {
                file: PathBuf::from(&context.trust_store_file),
                passphrase: context.trust_store_pass.clone(),
            },
            engine,
        }
    }

    /// Whether peers are asked for a client certificate.
    pub fn requests_client_auth(&self) -> bool {
        self.engine.need_client_auth || self.engine.want_client_auth
    }

    /// Build the rustls server configuration described by this policy.
    pub fn server_config(&self) -> Result<ServerConfig, TlsError> {
        if self.engine.client_mode {
            tracing::warn!("client_mode has no effect on a listening socket; ignoring");
        }
        for store in [&self.key_store, &self.trust_store] {
            if !store.passphrase.is_empty() {
                tracing::warn!(
                    store = ?store.file,
                    "Store passphrase configured but encrypted PEM is not supported; reading store as plain PEM"
                );
            }
        }

        let mut provider = aws_lc_rs::default_provider();
        if let Some(names) = &self.engine.cipher_suites {
            provider.cipher_suites = select_cipher_suites(&provider.cipher_suites, names)?;
        }
        let provider = Arc::new(provider);
        let versions = select_protocols(self.engine.protocols.as_deref())?;

        let (certs, key) = load_key_store(&self.key_store.file)?;

        let builder = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(&versions)?;

        let builder = if self.requests_client_auth() {
            let roots = load_trust_store(&self.trust_store.file)?;
            let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider);
            let verifier = if self.engine.need_client_auth {
                verifier.build()?
            } else {
                verifier.allow_unauthenticated().build()?
            };
            builder.with_client_cert_verifier(verifier)
        } else {
            builder.with_no_client_auth()
        };

        let mut config = builder.with_single_cert(certs, key)?;
        config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
        Ok(config)
    }

    /// Build the acceptor configuration used by the listener.
    pub fn rustls_config(&self) -> Result<RustlsConfig, TlsError> {
        Ok(RustlsConfig::from_config(Arc::new(self.server_config()?)))
    }
}

fn select_cipher_suites(
    available: &[SupportedCipherSuite],
    names: &[String],
) -> Result<Vec<SupportedCipherSuite>, TlsError> {
    let mut selected = Vec::with_capacity(names.len());
    for name in names {
        let suite = available
            .iter()
            .find(|s| suite_matches(&format!("{:?}", s.suite()), name))
            .ok_or_else(|| TlsError::UnknownCipherSuite(name.clone()))?;
        selected.push(*suite);
    }
    if selected.is_empty() {
        return Err(TlsError::NoCipherSuites);
    }
    Ok(selected)
}

/// Match rustls suite names against IANA names, which spell TLS 1.3 suites
/// without the `13`.
fn suite_matches(rustls_name: &str, wanted: &str) -> bool {
    if rustls_name.eq_ignore_ascii_case(wanted) {
        return true;
    }
    match (rustls_name.strip_prefix("TLS13_"), wanted.strip_prefix("TLS_")) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

fn select_protocols(
    names: Option<&[String]>,
) -> Result<Vec<&'static SupportedProtocolVersion>, TlsError> {
    let Some(names) = names else {
        return Ok(rustls::DEFAULT_VERSIONS.to_vec());
    };
    let mut versions = Vec::new();
    for name in names {
        let version = match name.to_ascii_lowercase().replace('v', "").as_str() {
            "tls1.2" => &rustls::version::TLS12,
            "tls1.3" => &rustls::version::TLS13,
            _ => return Err(TlsError::UnknownProtocol(name.clone())),
        };
        if !versions.iter().any(|v: &&SupportedProtocolVersion| v.version == version.version) {
            versions.push(version);
        }
    }
    if versions.is_empty() {
        return Err(TlsError::NoProtocols);
    }
    Ok(versions)
}

fn read_store(path: &Path) -> Result<Vec<u8>, TlsError> {
    std::fs::read(path).map_err(|source| TlsError::Store {
        path: path.to_path_buf(),
        source,
    })
}

fn store_error(path: &Path) -> impl Fn(std::io::Error) -> TlsError + '_ {
    move |source| TlsError::Store {
        path: path.to_path_buf(),
        source,
    }
}

fn load_key_store(
    path: &Path,
) -> Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>), TlsError> {
    let pem = read_store(path)?;

    let certs = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<Vec<_>, _>>()
        .map_err(store_error(path))?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }

    let key = rustls_pemfile::private_key(&mut pem.as_slice())
        .map_err(store_error(path))?
        .ok_or_else(|| TlsError::NoPrivateKey(path.to_path_buf()))?;

    Ok((certs, key))
}

fn load_trust_store(path: &Path) -> Result<RootCertStore, TlsError> {
    let pem = read_store(path)?;
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
        roots.add(cert.map_err(store_error(path))?)?;
    }
    if roots.is_empty() {
        return Err(TlsError::NoCertificates(path.to_path_buf()));
    }
    Ok(roots)
}
