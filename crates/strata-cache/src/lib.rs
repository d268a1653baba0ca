//! # strata-cache
//!
//! Bounded, expiring key/value storage for the Strata transport stack.
//!
//! - [`ttl`] - generic [`TimeBoundCache`](ttl::TimeBoundCache) with FIFO eviction
//!   and lazy expiry
//! - [`descriptor`] - hidden-service descriptor cache with publication-window
//!   checks and optional CBOR persistence
//!
//! ## Key Parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | Eviction order | oldest inserted first |
//! | Descriptor validity window | 24 hours |
//! | Persisted snapshot freshness | 24 hours |

pub mod descriptor;
pub mod ttl;

pub use descriptor::{DescriptorCache, Publication};
pub use ttl::TimeBoundCache;

/// Error types for cache persistence.
///
/// These never escape [`DescriptorCache`]: they are logged and the cache
/// behaves as if the disk copy did not exist.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading or writing the snapshot file failed.
    #[error("persistence error: {0}")]
    Persistence(#[from] std::io::Error),

    /// The snapshot could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The snapshot on disk could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Convenience result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::Serialization("bad map".into());
        assert_eq!(err.to_string(), "serialization error: bad map");

        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CacheError::from(io);
        assert!(err.to_string().starts_with("persistence error"));
    }
}
