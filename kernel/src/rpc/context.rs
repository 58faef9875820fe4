//! Per-request execution context.

use axum::http::HeaderMap;

use crate::rpc::transport::Transport;

/// Header carrying the tenant identifier.
pub const TENANT_ID_HEADER: &str = "x-applet-tenant-id";
/// Header carrying the calling user's identifier.
pub const USER_ID_HEADER: &str = "x-applet-user-id";
/// Header carrying a caller supplied request identifier.
pub const REQUEST_ID_HEADER: &str = "x-applet-request-id";
/// Header carrying a comma separated permission list (trusted deployments only).
pub const PERMISSIONS_HEADER: &str = "x-applet-permissions";
/// Header naming the applet a forwarded call belongs to.
pub const APPLET_ID_HEADER: &str = "x-applet-id";

/// Identity and metadata propagated to middleware and handlers.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Transport the request arrived through.
    pub transport: Transport,
    /// Applet owning the resolved method. Empty until the method is resolved.
    pub applet_id: String,
    /// Tenant the request acts on behalf of.
    pub tenant_id: Option<String>,
    /// Calling user, as reported by the inbound headers.
    pub user_id: Option<String>,
    /// Correlation identifier.
    pub request_id: Option<String>,
    /// Inbound headers, kept for identity extraction and runtime forwarding.
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Creates an empty context for the given transport.
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            applet_id: String::new(),
            tenant_id: None,
            user_id: None,
            request_id: None,
            headers: HeaderMap::new(),
        }
    }

    /// Builds a context from inbound headers. Blank values are ignored.
    #[must_use]
    pub fn from_headers(transport: Transport, headers: &HeaderMap) -> Self {
        Self {
            transport,
            applet_id: String::new(),
            tenant_id: header_value(headers, TENANT_ID_HEADER),
            user_id: header_value(headers, USER_ID_HEADER),
            request_id: header_value(headers, REQUEST_ID_HEADER),
            headers: headers.clone(),
        }
    }

    /// Sets the tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = non_blank(tenant_id.into());
        self
    }

    /// Sets the user.
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = non_blank(user_id.into());
        self
    }

    /// Sets the request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = non_blank(request_id.into());
        self
    }

    /// Sets the applet identity.
    #[must_use]
    pub fn with_applet(mut self, applet_id: impl Into<String>) -> Self {
        self.applet_id = applet_id.into();
        self
    }

    /// Returns the tenant or an empty string.
    #[must_use]
    pub fn tenant_or_default(&self) -> &str {
        self.tenant_id.as_deref().unwrap_or_default()
    }
}

/// Reads a header as trimmed text, ignoring blank or non-UTF-8 values.
#[must_use]
pub fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| non_blank(v.to_string()))
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
