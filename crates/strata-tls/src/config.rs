//! Client configuration from `tls.*` properties.

use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::ServerCertVerifier;
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore, SupportedCipherSuite};
use strata_net::{LayerProperties, NetError, Result, TcpipAddress};

/// Property key: enabled cipher suites (`Vec<String>`).
pub const CIPHER_SUITES_KEY: &str = "tls.enabled_cipher_suites";
/// Property key: server certificate verifier (`Arc<dyn ServerCertVerifier>`).
pub const TRUST_MANAGERS_KEY: &str = "tls.trust_managers";
/// Property key: client certificate resolver (`Arc<dyn ResolvesClientCert>`).
pub const KEY_MANAGERS_KEY: &str = "tls.key_managers";
/// Property key: SNI and verification name (`String`).
pub const SERVER_NAME_KEY: &str = "tls.server_name";
/// Property key: bound on the handshake, in milliseconds.
pub const HANDSHAKE_TIMEOUT_KEY: &str = "tls.handshake_timeout_ms";

/// Handshake bound when `tls.handshake_timeout_ms` is absent.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// The handshake bound for one call.
pub fn handshake_timeout(own: &LayerProperties, default: Duration) -> Result<Duration> {
    Ok(own.get_millis(HANDSHAKE_TIMEOUT_KEY)?.unwrap_or(default))
}

/// The crypto provider every config in this crate is built on.
pub fn provider() -> CryptoProvider {
    rustls::crypto::ring::default_provider()
}

/// Rustls name of a suite, e.g. `TLS13_AES_128_GCM_SHA256`.
pub fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

/// Names of every suite the provider supports.
pub fn supported_suite_names() -> Vec<String> {
    provider().cipher_suites.iter().map(suite_name).collect()
}

fn normalise(name: &str) -> String {
    let name = name.trim().to_ascii_uppercase();
    // IANA spells TLS 1.3 suites without the "13".
    match name.strip_prefix("TLS_") {
        Some(rest) if !rest.contains("_WITH_") => format!("TLS13_{rest}"),
        _ => name,
    }
}

/// Select suites by name, keeping the caller's order.
///
/// # Errors
///
/// [`NetError::Tls`] naming the first unknown suite, or if `names` is empty.
pub fn select_suites(names: &[String]) -> Result<Vec<SupportedCipherSuite>> {
    if names.is_empty() {
        return Err(NetError::Tls("no cipher suites enabled".into()));
    }
    let available = provider().cipher_suites;
    names
        .iter()
        .map(|name| {
            let wanted = normalise(name);
            available
                .iter()
                .find(|suite| suite_name(suite) == wanted)
                .copied()
                .ok_or_else(|| NetError::Tls(format!("unknown cipher suite {name}")))
        })
        .collect()
}

/// Build the client configuration for one call from the `tls.*` namespace.
pub fn client_config(own: &LayerProperties) -> Result<ClientConfig> {
    let mut provider = provider();
    if let Some(value) = own.get_value(CIPHER_SUITES_KEY) {
        let names = value.downcast_ref::<Vec<String>>().ok_or_else(|| {
            NetError::Tls(format!("{CIPHER_SUITES_KEY} must be a Vec<String>"))
        })?;
        provider.cipher_suites = select_suites(names)?;
    }

    let builder = ClientConfig::builder_with_provider(Arc::new(provider))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| NetError::Tls(format!("client TLS version config failed: {e}")))?;

    let builder = match own.get_value(TRUST_MANAGERS_KEY) {
        Some(value) => {
            let verifier = value
                .downcast_ref::<Arc<dyn ServerCertVerifier>>()
                .ok_or_else(|| {
                    NetError::Tls(format!(
                        "{TRUST_MANAGERS_KEY} must be an Arc<dyn ServerCertVerifier>"
                    ))
                })?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::clone(verifier))
        }
        None => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots)
        }
    };

    let config = match own.get_value(KEY_MANAGERS_KEY) {
        Some(value) => {
            let resolver = value
                .downcast_ref::<Arc<dyn ResolvesClientCert>>()
                .ok_or_else(|| {
                    NetError::Tls(format!(
                        "{KEY_MANAGERS_KEY} must be an Arc<dyn ResolvesClientCert>"
                    ))
                })?;
            builder.with_client_cert_resolver(Arc::clone(resolver))
        }
        None => builder.with_no_client_auth(),
    };
    Ok(config)
}

/// The name to present and verify: `tls.server_name`, else the remote's host
/// or IP.
pub fn server_name(own: &LayerProperties, remote: &TcpipAddress) -> Result<ServerName<'static>> {
    let name = own
        .get_str(SERVER_NAME_KEY)
        .map(str::to_string)
        .unwrap_or_else(|| remote.host_or_ip());
    ServerName::try_from(name.clone())
        .map_err(|e| NetError::InvalidArgument(format!("invalid TLS server name {name:?}: {e}")))
}
