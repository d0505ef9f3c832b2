//! Channel authorizer: may this subscriber attach to this channel?
//!
//! Public channels always authorize. Private channels are checked by the predicate
//! registered for their family; a missing predicate or a failing predicate denies.
//! The registry is fixed once the authorizer is built.

use crate::authz::capability::Authorization;
use crate::authz::channel::ChannelName;
use crate::config::AuthorizationConfig;
use crate::error::AuthorizationError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Per-family authorization check for private channels.
pub trait ChannelPredicate: Send + Sync {
    fn check(&self, identity: &str, channel: &ChannelName) -> Result<bool, AuthorizationError>;
}

impl<F> ChannelPredicate for F
where
    F: Fn(&str, &ChannelName) -> Result<bool, AuthorizationError> + Send + Sync,
{
    fn check(&self, identity: &str, channel: &ChannelName) -> Result<bool, AuthorizationError> {
        self(identity, channel)
    }
}

/// Admits listed members and, when `super_users` is set, anyone holding the super permission.
pub struct MemberPredicate {
    members: HashSet<String>,
    super_users: Option<Arc<dyn Authorization>>,
}

impl MemberPredicate {
    pub fn new<I, S>(members: I, super_users: Option<Arc<dyn Authorization>>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: members.into_iter().map(Into::into).collect(),
            super_users,
        }
    }
}

impl ChannelPredicate for MemberPredicate {
    fn check(&self, identity: &str, _channel: &ChannelName) -> Result<bool, AuthorizationError> {
        if self.members.contains(identity) {
            return Ok(true);
        }
        match self.super_users {
            Some(ref authz) => authz.check_super_permission(identity),
            None => Ok(false),
        }
    }
}

/// Decides channel attachment. Cheap to share behind an `Arc`.
pub struct ChannelAuthorizer {
    families: HashMap<String, Arc<dyn ChannelPredicate>>,
}

impl ChannelAuthorizer {
    pub fn builder() -> ChannelAuthorizerBuilder {
        ChannelAuthorizerBuilder::default()
    }

    /// Build from the `authorization.channels` config section: one [`MemberPredicate`] per family.
    pub fn from_config(config: &AuthorizationConfig, authorization: Arc<dyn Authorization>) -> Self {
        let mut builder = Self::builder();
        for (family, rule) in &config.channels {
            let super_users = if rule.super_users {
                Some(authorization.clone())
            } else {
                None
            };
            builder = builder.register_predicate(
                family.clone(),
                Arc::new(MemberPredicate::new(rule.members.iter().cloned(), super_users)),
            );
        }
        builder.build()
    }

    /// True when `identity` may attach to `channel`.
    pub fn authorize(&self, identity: &str, channel: &ChannelName) -> bool {
        if !channel.is_private() {
            return true;
        }
        let Some(family) = channel.family() else {
            log::debug!("authorize: {} has no channel family, denying", channel);
            return false;
        };
        let Some(predicate) = self.families.get(family) else {
            log::debug!("authorize: no predicate registered for family {:?}, denying", family);
            return false;
        };
        match predicate.check(identity, channel) {
            Ok(allowed) => allowed,
            Err(e) => {
                log::warn!(
                    "authorize: predicate for {} failed for {:?}: {}",
                    channel,
                    identity,
                    e
                );
                false
            }
        }
    }

    /// Registered family names, sorted.
    pub fn families(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.families.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Collects predicates before the authorizer is frozen.
#[derive(Default)]
pub struct ChannelAuthorizerBuilder {
    families: HashMap<String, Arc<dyn ChannelPredicate>>,
}

impl ChannelAuthorizerBuilder {
    /// Register a closure for `family`. Replaces an earlier registration for the same family.
    pub fn register<F>(self, family: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&str, &ChannelName) -> Result<bool, AuthorizationError> + Send + Sync + 'static,
    {
        self.register_predicate(family, Arc::new(predicate))
    }

    pub fn register_predicate(
        mut self,
        family: impl Into<String>,
        predicate: Arc<dyn ChannelPredicate>,
    ) -> Self {
        let family = family.into();
        if self.families.insert(family.clone(), predicate).is_some() {
            log::debug!("authorizer: replaced predicate for family {:?}", family);
        }
        self
    }

    pub fn build(self) -> ChannelAuthorizer {
        ChannelAuthorizer {
            families: self.families,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::StaticAuthorization;
    use crate::config::ChannelRuleConfig;
    use std::collections::BTreeMap;

    fn owner_only() -> ChannelAuthorizer {
        ChannelAuthorizer::builder()
            .register("dashboard", |identity: &str, _: &ChannelName| Ok(identity == "owner"))
            .build()
    }

    #[test]
    fn registered_family_follows_predicate() {
        let authz = owner_only();
        let channel = ChannelName::from("private-dashboard");
        assert!(authz.authorize("owner", &channel));
        assert!(!authz.authorize("guest", &channel));
    }

    #[test]
    fn public_channels_always_authorize() {
        let authz = ChannelAuthorizer::builder()
            .register("announcements", |_: &str, _: &ChannelName| Ok(false))
            .build();
        for name in ["announcements", "dashboard", "presence-room", ""] {
            assert!(authz.authorize("anyone", &ChannelName::from(name)), "{name}");
        }
    }

    #[test]
    fn unregistered_family_denies() {
        let authz = owner_only();
        assert!(!authz.authorize("owner", &ChannelName::from("private-billing")));
        assert!(!authz.authorize("owner", &ChannelName::from("private-")));
    }

    #[test]
    fn predicate_error_denies() {
        let authz = ChannelAuthorizer::builder()
            .register("dashboard", |_: &str, _: &ChannelName| {
                Err(AuthorizationError::Unavailable("timeout".into()))
            })
            .build();
        assert!(!authz.authorize("owner", &ChannelName::from("private-dashboard")));
    }

    #[test]
    fn scoped_channels_share_family_predicate() {
        let authz = ChannelAuthorizer::builder()
            .register("orders", |identity: &str, channel: &ChannelName| {
                Ok(channel.as_str() == format!("private-orders.{}", identity))
            })
            .build();
        assert!(authz.authorize("42", &ChannelName::from("private-orders.42")));
        assert!(!authz.authorize("7", &ChannelName::from("private-orders.42")));
    }

    #[test]
    fn repeated_calls_agree() {
        let authz = owner_only();
        let channel = ChannelName::from("private-dashboard");
        let first = authz.authorize("owner", &channel);
        for _ in 0..5 {
            assert_eq!(authz.authorize("owner", &channel), first);
        }
    }

    #[test]
    fn from_config_builds_member_predicates() {
        let mut channels = BTreeMap::new();
        channels.insert(
            "dashboard".to_string(),
            ChannelRuleConfig {
                members: vec!["ops".to_string()],
                super_users: true,
            },
        );
        channels.insert(
            "billing".to_string(),
            ChannelRuleConfig {
                members: vec!["finance".to_string()],
                super_users: false,
            },
        );
        let config = AuthorizationConfig {
            super_users: vec!["root".to_string()],
            channels,
        };
        let authorization: Arc<dyn Authorization> = Arc::new(StaticAuthorization::from_config(&config));
        let authz = ChannelAuthorizer::from_config(&config, authorization);

        assert_eq!(authz.families(), vec!["billing", "dashboard"]);
        let dashboard = ChannelName::from("private-dashboard");
        let billing = ChannelName::from("private-billing");
        assert!(authz.authorize("ops", &dashboard));
        assert!(authz.authorize("root", &dashboard));
        assert!(!authz.authorize("finance", &dashboard));
        assert!(authz.authorize("finance", &billing));
        assert!(!authz.authorize("root", &billing));
        // empty identity makes the super permission check fail: denied
        assert!(!authz.authorize("", &dashboard));
    }
}
