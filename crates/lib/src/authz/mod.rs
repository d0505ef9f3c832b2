//! Authorization: capability checks and private channel attachment.
//!
//! `Authorization` answers "does this identity hold a capability"; `ChannelAuthorizer`
//! maps private channel families to predicates and fails closed for everything it
//! cannot positively confirm.

mod authorizer;
mod capability;
mod channel;

pub use authorizer::{ChannelAuthorizer, ChannelAuthorizerBuilder, ChannelPredicate, MemberPredicate};
pub use capability::{Authorization, StaticAuthorization};
pub use channel::{ChannelName, PRIVATE_PREFIX};
