//! Feature flag resolution: developer mode per user.
//!
//! Policy, first match wins:
//! 1. the user holds the super permission → enabled (authorization override);
//! 2. the global debug setting is on → enabled (global debug);
//! 3. otherwise → disabled.
//!
//! A failing permission check counts as "not granted"; resolution never fails.

use crate::authz::Authorization;
use crate::error::AuthorizationError;
use serde::{Deserialize, Serialize};

/// Which rule produced a flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FlagRule {
    AuthorizationOverride,
    GlobalDebug,
    DefaultFalse,
}

impl FlagRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagRule::AuthorizationOverride => "authorization-override",
            FlagRule::GlobalDebug => "global-debug",
            FlagRule::DefaultFalse => "default-false",
        }
    }
}

impl std::fmt::Display for FlagRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolved flag value and the rule behind it. Reported to clients, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlagDecision {
    pub enabled: bool,
    pub rule: FlagRule,
}

impl FeatureFlagDecision {
    fn new(enabled: bool, rule: FlagRule) -> Self {
        Self { enabled, rule }
    }
}

/// Resolve a boolean flag for `identity`.
///
/// `super_permission` is called exactly once. `Err` is logged and treated as `false`.
/// `global_debug` is only consulted when the permission check does not grant the flag.
pub fn resolve<F>(identity: &str, super_permission: F, global_debug: bool) -> FeatureFlagDecision
where
    F: FnOnce() -> Result<bool, AuthorizationError>,
{
    let granted = match super_permission() {
        Ok(granted) => granted,
        Err(e) => {
            log::warn!("flags: super permission check failed for {:?}: {}", identity, e);
            false
        }
    };
    if granted {
        FeatureFlagDecision::new(true, FlagRule::AuthorizationOverride)
    } else if global_debug {
        FeatureFlagDecision::new(true, FlagRule::GlobalDebug)
    } else {
        FeatureFlagDecision::new(false, FlagRule::DefaultFalse)
    }
}

/// Developer mode for `identity`, using the authorization source's super permission.
pub fn developer_mode(
    authorization: &dyn Authorization,
    identity: &str,
    global_debug: bool,
) -> FeatureFlagDecision {
    resolve(
        identity,
        || authorization.check_super_permission(identity),
        global_debug,
    )
}
