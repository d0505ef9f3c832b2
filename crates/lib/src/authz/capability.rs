//! Authorization source: capability checks for identities.

use crate::config::AuthorizationConfig;
use crate::error::AuthorizationError;
use std::collections::HashSet;

/// Answers capability questions about an identity.
pub trait Authorization: Send + Sync {
    /// Does `identity` hold the super permission (full access, developer tooling)?
    fn check_super_permission(&self, identity: &str) -> Result<bool, AuthorizationError>;
}

/// Authorization backed by a fixed list of super users (from config).
#[derive(Debug, Clone, Default)]
pub struct StaticAuthorization {
    super_users: HashSet<String>,
}

impl StaticAuthorization {
    pub fn new<I, S>(super_users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            super_users: super_users
                .into_iter()
                .map(|s| s.into().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &AuthorizationConfig) -> Self {
        Self::new(config.super_users.iter().cloned())
    }
}

impl Authorization for StaticAuthorization {
    fn check_super_permission(&self, identity: &str) -> Result<bool, AuthorizationError> {
        let identity = identity.trim();
        if identity.is_empty() {
            return Err(AuthorizationError::InvalidIdentity(identity.to_string()));
        }
        Ok(self.super_users.contains(identity))
    }
}
