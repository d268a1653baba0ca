//! Hidden-service descriptors.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use strata_cache::descriptor::Publication;

use crate::OnionAddress;

/// Rendezvous data for one onion service.
///
/// The payload is opaque here; only the circuit provider interprets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiddenServiceDescriptor {
    /// Address core the descriptor belongs to.
    pub onion: String,
    /// Publication time, used for the freshness window.
    pub published: SystemTime,
    /// Introduction point identifiers, provider-specific.
    pub introduction_points: Vec<String>,
    /// Raw descriptor body.
    pub payload: Vec<u8>,
}

impl HiddenServiceDescriptor {
    pub fn new(onion: &OnionAddress, published: SystemTime, payload: Vec<u8>) -> Self {
        Self {
            onion: onion.core().to_string(),
            published,
            introduction_points: Vec::new(),
            payload,
        }
    }

    pub fn with_introduction_point(mut self, point: impl Into<String>) -> Self {
        self.introduction_points.push(point.into());
        self
    }
}

impl Publication for HiddenServiceDescriptor {
    fn published_at(&self) -> SystemTime {
        self.published
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_validity_window() {
        let onion = OnionAddress::parse("expyuzz4wqqyqhjn").expect("onion");
        let now = SystemTime::now();
        let fresh = HiddenServiceDescriptor::new(&onion, now, vec![1, 2, 3])
            .with_introduction_point("ip-1");
        assert!(fresh.is_valid_at(now + Duration::from_secs(60)));
        assert!(!fresh.is_valid_at(now + Duration::from_secs(25 * 60 * 60)));
        assert_eq!(fresh.introduction_points, vec!["ip-1".to_string()]);
        assert_eq!(fresh.onion, "expyuzz4wqqyqhjn");
    }
}
