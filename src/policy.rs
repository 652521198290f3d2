//! Route authorization.
//!
//! Each route carries an explicit `AccessPolicy`, fixed when the router is built.
//! `authorize` is the only place a policy is evaluated, so route behaviour never
//! depends on middleware ordering.

use thiserror::Error;
use uuid::Uuid;

use crate::{auth::AuthUser, config::PostWritePolicy, models::Role};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    /// No identity was attached to the request.
    #[error("request is not authenticated")]
    Unauthenticated,
    /// The identity lacks the role the route requires.
    #[error("role {required:?} required")]
    Forbidden { required: Role },
    /// The identity is not the author of the resource.
    #[error("identity does not own the resource")]
    NotOwner,
}

/// AccessPolicy
///
/// What a route demands of the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessPolicy {
    /// Anyone, authenticated or not.
    Public,
    /// Any verified identity.
    Authenticated,
    /// A verified identity holding the given role.
    Role(Role),
    /// A verified identity that authored the resource.
    Owner,
    /// A verified identity holding the role that also authored the resource.
    RoleAndOwner(Role),
}

/// authorize
///
/// Evaluates `policy` for `identity`. `owner` is the author id of the resource the
/// route acts on, or `None` when the route has no target resource. An ownership
/// policy with no resource owner is refused as `NotOwner`.
///
/// Order of checks: identity presence (401), role (403), ownership (403).
pub fn authorize(
    identity: Option<&AuthUser>,
    policy: AccessPolicy,
    owner: Option<Uuid>,
) -> Result<(), AuthzError> {
    if policy == AccessPolicy::Public {
        return Ok(());
    }

    let identity = identity.ok_or(AuthzError::Unauthenticated)?;

    let (required_role, requires_owner) = match policy {
        AccessPolicy::Public | AccessPolicy::Authenticated => (None, false),
        AccessPolicy::Role(role) => (Some(role), false),
        AccessPolicy::Owner => (None, true),
        AccessPolicy::RoleAndOwner(role) => (Some(role), true),
    };

    if let Some(required) = required_role {
        if identity.role != required {
            tracing::warn!(
                user_id = %identity.id,
                role = identity.role.as_str(),
                required = required.as_str(),
                "Access denied: role requirement not met"
            );
            return Err(AuthzError::Forbidden { required });
        }
    }

    if requires_owner && owner != Some(identity.id) {
        tracing::warn!(user_id = %identity.id, owner = ?owner, "Access denied: not the author");
        return Err(AuthzError::NotOwner);
    }

    Ok(())
}

/// PostPolicies
///
/// The policies guarding mutating post routes, derived from the configured
/// `PostWritePolicy`. Post reads are public and carry no policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostPolicies {
    pub create: AccessPolicy,
    pub modify: AccessPolicy,
}

impl PostPolicies {
    pub fn for_write_policy(write: PostWritePolicy) -> Self {
        match write.required_role() {
            None => Self {
                create: AccessPolicy::Authenticated,
                modify: AccessPolicy::Owner,
            },
            Some(role) => Self {
                create: AccessPolicy::Role(role),
                modify: AccessPolicy::RoleAndOwner(role),
            },
        }
    }
}

impl Default for PostPolicies {
    fn default() -> Self {
        Self::for_write_policy(PostWritePolicy::Owner)
    }
}
