//! # strata-socks
//!
//! SOCKS protocol engine for the Strata layer stack.
//!
//! - [`proto`] - wire encoding for SOCKS5 (RFC 1928, no authentication) and
//!   SOCKS4/4a, plus reply codes
//! - [`client`] - [`SocksClientLayer`], negotiating destinations through a
//!   proxy reached over any lower layer
//! - [`server`] - [`SocksServer`], running sessions and relaying to an
//!   outbound layer, and [`SocksServerLayer`], whose server sockets hand
//!   negotiated streams to the application
//!
//! Both engines are explicit state machines. Once a session is established
//! the socket is a transparent byte pipe.
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |-----------|-------|
//! | Default client version | SOCKS5 |
//! | Authentication | none (method `0x00`) |
//! | Commands | CONNECT only |
//! | Max hostname | 255 bytes |
//! | Default client negotiation timeout (`socks.timeout_ms`) | 60 s |
//! | Default server handshake timeout | 30 s |
//! | Default relay connect timeout | 60 s |

pub mod client;
pub mod proto;
pub mod server;

pub use client::{ClientState, SocksClientLayer};
pub use proto::{Reply, SocksVersion};
pub use server::{RelayStats, ServerState, SocksServer, SocksServerLayer};
