//! Self-signed certificates and server configuration.

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use strata_net::{NetError, Result};

/// A certificate with its PKCS#8 private key.
pub struct SelfSigned {
    pub cert: CertificateDer<'static>,
    pub key: PrivateKeyDer<'static>,
}

/// Generate an ECDSA P-256 self-signed certificate for `names`.
pub fn generate_self_signed(names: &[String]) -> Result<SelfSigned> {
    let key_pair = rcgen::KeyPair::generate()
        .map_err(|e| NetError::Tls(format!("key generation failed: {e}")))?;
    let params = rcgen::CertificateParams::new(names.to_vec())
        .map_err(|e| NetError::Tls(format!("certificate params failed: {e}")))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| NetError::Tls(format!("self-signing failed: {e}")))?;

    Ok(SelfSigned {
        cert: CertificateDer::from(cert.der().to_vec()),
        key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der())),
    })
}

/// Server configuration presenting `identity`, TLS 1.2 and 1.3, no client
/// authentication.
pub fn server_config(identity: &SelfSigned) -> Result<Arc<ServerConfig>> {
    let config = ServerConfig::builder_with_provider(Arc::new(crate::config::provider()))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| NetError::Tls(format!("server TLS version config failed: {e}")))?
        .with_no_client_auth()
        .with_single_cert(vec![identity.cert.clone()], identity.key.clone_key())
        .map_err(|e| NetError::Tls(format!("server certificate rejected: {e}")))?;
    Ok(Arc::new(config))
}

/// A fresh identity for `names` and a server configuration presenting it.
/// Returns the certificate for clients to pin.
pub fn self_signed_server_config(
    names: &[String],
) -> Result<(Arc<ServerConfig>, CertificateDer<'static>)> {
    let identity = generate_self_signed(names)?;
    let config = server_config(&identity)?;
    Ok((config, identity.cert))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_certificates_differ() {
        let a = generate_self_signed(&["node.local".to_string()]).expect("a");
        let b = generate_self_signed(&["node.local".to_string()]).expect("b");
        assert!(!a.cert.is_empty());
        assert_ne!(a.cert.as_ref(), b.cert.as_ref());
    }

    #[test]
    fn test_server_config_builds() {
        let (config, cert) =
            self_signed_server_config(&["localhost".to_string()]).expect("config");
        assert!(!cert.is_empty());
        assert!(config.alpn_protocols.is_empty());
    }
}
