//! Identity and permission checks for RPC methods.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::rpc::context::{PERMISSIONS_HEADER, RequestContext, header_value};
use crate::rpc::transport::Transport;

/// Errors related to permission checks.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    /// No host services are configured to resolve identities.
    #[error("Permission denied: missing host services")]
    MissingHostServices,
    /// The caller's identity could not be resolved.
    #[error("Permission denied: no authenticated user")]
    Unauthenticated,
    /// The required permission was not granted.
    #[error("Permission denied: required '{permission}'")]
    PermissionDenied {
        /// The permission that was denied.
        permission: String,
    },
}

/// Errors raised by host services.
#[derive(Debug, Error)]
pub enum HostError {
    /// No user is attached to the request.
    #[error("no user in request context")]
    NoUser,
    /// Identity headers arrived on a transport that may not assert them.
    #[error("identity headers are not trusted on the {0} transport")]
    UntrustedTransport(Transport),
    /// Identity backend failure.
    #[error("identity lookup failed: {0}")]
    Backend(String),
}

/// An authenticated caller.
pub trait AppletUser: Send + Sync {
    /// Stable user identifier.
    fn id(&self) -> &str;

    /// Returns `true` if the user holds `permission`.
    fn has_permission(&self, permission: &str) -> bool;
}

/// Host capability resolving the caller of a request.
#[async_trait]
pub trait HostServices: Send + Sync {
    /// Resolves the calling user.
    ///
    /// # Errors
    ///
    /// Returns an error if no user can be resolved.
    async fn extract_user(&self, ctx: &RequestContext) -> Result<Arc<dyn AppletUser>, HostError>;
}

/// A user with a fixed permission set.
#[derive(Debug, Clone)]
pub struct StaticUser {
    id: String,
    permissions: HashSet<String>,
}

impl StaticUser {
    /// Create a user with the given allowed permissions.
    #[must_use]
    pub fn new(id: impl Into<String>, permissions: Vec<String>) -> Self {
        Self {
            id: id.into(),
            permissions: permissions.into_iter().collect(),
        }
    }
}

impl AppletUser for StaticUser {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_permission(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

/// Checks that `user` holds every permission in `required`. Blank entries are skipped.
///
/// # Errors
///
/// Returns the first missing permission.
pub fn require_all(user: &dyn AppletUser, required: &[String]) -> Result<(), PermissionError> {
    for permission in required {
        let permission = permission.trim();
        if permission.is_empty() {
            continue;
        }
        if !user.has_permission(permission) {
            return Err(PermissionError::PermissionDenied {
                permission: permission.to_string(),
            });
        }
    }
    Ok(())
}

/// Reads the identity asserted by an upstream authenticating proxy.
///
/// Uses the user id and the comma separated permission header. Headers are
/// only believed on the internal transport unless public trust is enabled,
/// which is only sound when every public request passed such a proxy.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedHeaderHostServices {
    trust_public: bool,
}

impl TrustedHeaderHostServices {
    /// Trusts identity headers on the internal transport only.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            trust_public: false,
        }
    }

    /// Also trusts identity headers on the public transport.
    #[must_use]
    pub const fn trusting_public(mut self, trust_public: bool) -> Self {
        self.trust_public = trust_public;
        self
    }
}

#[async_trait]
impl HostServices for TrustedHeaderHostServices {
    async fn extract_user(&self, ctx: &RequestContext) -> Result<Arc<dyn AppletUser>, HostError> {
        if ctx.transport == Transport::Public && !self.trust_public {
            return Err(HostError::UntrustedTransport(ctx.transport));
        }
        let id = ctx.user_id.clone().ok_or(HostError::NoUser)?;
        let permissions = header_value(&ctx.headers, PERMISSIONS_HEADER)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Arc::new(StaticUser::new(id, permissions)))
    }
}
