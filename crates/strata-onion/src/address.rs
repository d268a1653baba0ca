//! Onion-service addresses.
//!
//! The core is the base32 label before `.onion`: 16 characters for legacy
//! v2 services, 56 for v3. A v3 core decodes to 35 bytes ending in the
//! version byte `0x03`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strata_net::address::ONION_SUFFIX;
use strata_net::{NetError, Result};

const V2_CORE_LEN: usize = 16;
const V3_CORE_LEN: usize = 56;
const V3_VERSION: u8 = 0x03;

/// A validated onion-service address.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OnionAddress {
    core: String,
}

impl OnionAddress {
    /// Parse `core`, `core.onion` or `sub.core.onion`, case-insensitively.
    pub fn parse(input: &str) -> Result<Self> {
        let lower = input.trim().trim_end_matches('.').to_ascii_lowercase();
        let host = lower.strip_suffix(ONION_SUFFIX).unwrap_or(&lower);
        let core = host.rsplit('.').next().unwrap_or(host);

        if core.len() != V2_CORE_LEN && core.len() != V3_CORE_LEN {
            return Err(NetError::InvalidArgument(format!(
                "onion address {input:?} must have a 16 or 56 character core, got {}",
                core.len()
            )));
        }

        let decoded = base32::decode(
            base32::Alphabet::Rfc4648 { padding: false },
            &core.to_ascii_uppercase(),
        )
        .ok_or_else(|| {
            NetError::InvalidArgument(format!("onion address {input:?} is not base32"))
        })?;

        if core.len() == V3_CORE_LEN && decoded.last() != Some(&V3_VERSION) {
            return Err(NetError::InvalidArgument(format!(
                "onion address {input:?} has an unsupported version"
            )));
        }

        Ok(Self {
            core: core.to_string(),
        })
    }

    /// The base32 label, lowercase, without `.onion`.
    pub fn core(&self) -> &str {
        &self.core
    }

    /// `core.onion`.
    pub fn hostname(&self) -> String {
        format!("{}{ONION_SUFFIX}", self.core)
    }

    /// Onion-service protocol version: 2 or 3.
    pub fn version(&self) -> u8 {
        if self.core.len() == V3_CORE_LEN {
            3
        } else {
            2
        }
    }
}

impl FromStr for OnionAddress {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ONION_SUFFIX}", self.core)
    }
}

impl fmt::Debug for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionAddress({self})")
    }
}
