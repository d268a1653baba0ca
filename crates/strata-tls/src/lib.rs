//! # strata-tls
//!
//! TLS negotiation wrapper for the Strata layer stack.
//!
//! [`TlsLayer`] obtains a socket from its lower layer first and then runs a
//! rustls handshake over it, so TLS works the same over TCP, SOCKS or onion
//! circuits. There is no plaintext fallback: any validation failure aborts
//! the handshake and the lower socket is dropped.
//!
//! - [`layer`] - the layer and its socket wrapper
//! - [`config`] - client configuration from `tls.*` properties
//! - [`verify`] - certificate pinning verifier
//! - [`certs`] - self-signed certificates and server configuration
//!
//! ## Key Parameters
//!
//! | Key | Type | Default |
//! |-----|------|---------|
//! | `tls.enabled_cipher_suites` | `Vec<String>` | all ring suites |
//! | `tls.trust_managers` | `Arc<dyn ServerCertVerifier>` | Mozilla roots |
//! | `tls.key_managers` | `Arc<dyn ResolvesClientCert>` | no client auth |
//! | `tls.server_name` | `String` | remote host or IP |
//! | `tls.handshake_timeout_ms` | milliseconds | 30 s |
//!
//! Protocol versions: TLS 1.2 and TLS 1.3, limited by the enabled suites.

pub mod certs;
pub mod config;
pub mod layer;
pub mod verify;

pub use config::{
    CIPHER_SUITES_KEY, DEFAULT_HANDSHAKE_TIMEOUT, HANDSHAKE_TIMEOUT_KEY, KEY_MANAGERS_KEY,
    SERVER_NAME_KEY, TRUST_MANAGERS_KEY,
};
pub use layer::{TlsLayer, TlsSocket};
pub use verify::PinnedCertVerifier;
