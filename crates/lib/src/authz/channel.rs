//! Channel names: private/public classification and family derivation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved prefix marking a channel as private.
pub const PRIVATE_PREFIX: &str = "private-";

/// Name of a logical broadcast channel (e.g. `private-dashboard`, `announcements`).
///
/// Private names start with [`PRIVATE_PREFIX`]. The family of a private channel is the text
/// after the prefix up to the first `.`: `private-orders.42` belongs to family `orders`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Private channel for `family`, optionally scoped (`private-orders.42`).
    pub fn private(family: &str, scope: Option<&str>) -> Self {
        match scope {
            Some(s) => Self(format!("{}{}.{}", PRIVATE_PREFIX, family, s)),
            None => Self(format!("{}{}", PRIVATE_PREFIX, family)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_private(&self) -> bool {
        self.0.starts_with(PRIVATE_PREFIX)
    }

    /// Family of a private channel. None for public channels and for a bare prefix.
    pub fn family(&self) -> Option<&str> {
        let rest = self.0.strip_prefix(PRIVATE_PREFIX)?;
        let family = rest.split('.').next().unwrap_or("");
        if family.is_empty() {
            None
        } else {
            Some(family)
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ChannelName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ChannelName {
    fn from(s: String) -> Self {
        Self(s)
    }
}
