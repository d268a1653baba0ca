//! Layers that need nothing beyond the OS and this crate.
//!
//! | Layer | Role | Namespace |
//! |---|---|---|
//! | [`TcpipLayer`] | OS TCP sockets, bottom of every real stack | `tcpip.` |
//! | [`NopLayer`] | Refuses everything | - |
//! | [`MockLayer`] | Scripted responses, records sessions | - |
//! | [`EchoLayer`] | Echoes written bytes back | - |
//! | [`LoggingLayer`] | Traces connects and byte counts | `logging.` |
//! | [`ModificationLayer`] | Rewrites bytes in both directions | - |
//! | [`BufferedLayer`] | Buffered reads and writes | `buffered.` |
//! | [`ForwardingLayer`] | Fixed destination, client only | - |

pub mod buffered;
pub mod echo;
pub mod forwarding;
pub mod logging;
pub mod mock;
pub mod modification;
pub mod nop;
pub mod tcpip;

pub use buffered::BufferedLayer;
pub use echo::EchoLayer;
pub use forwarding::ForwardingLayer;
pub use logging::LoggingLayer;
pub use mock::{MockLayer, MockSession};
pub use modification::{ByteModifier, ModificationLayer};
pub use nop::NopLayer;
pub use tcpip::TcpipLayer;
