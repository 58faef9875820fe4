//! Method registry.
//!
//! An in-memory catalog of callable methods keyed by fully-qualified name.
//! Registration is append-only: names are unique across all applets and a
//! duplicate name fails without touching the first registration.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::rpc::context::RequestContext;
use crate::rpc::error::HandlerError;
use crate::rpc::middleware::Middleware;

/// Declared reachability of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Callable over the public and internal transports.
    Public,
    /// Callable over the internal transport only.
    ServerOnly,
}

impl Visibility {
    /// All visibilities, in table order.
    pub const ALL: [Visibility; 2] = [Visibility::Public, Visibility::ServerOnly];

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Public => 0,
            Self::ServerOnly => 1,
        }
    }
}

/// Runtime that executes a method's logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// The handler registered in this process.
    #[default]
    Native,
    /// The applet's secondary runtime, reached through a [`crate::runtime::SecondaryRuntime`].
    Secondary,
}

impl Target {
    /// Lowercase name used in logs and config.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::Secondary => "secondary",
        }
    }
}

/// A callable method implementation.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Executes the method.
    async fn call(&self, ctx: RequestContext, params: Value) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> MethodHandler for F
where
    F: Fn(RequestContext, Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn call(&self, ctx: RequestContext, params: Value) -> Result<Value, HandlerError> {
        (self)(ctx, params).await
    }
}

/// Definition supplied by an applet loader.
#[derive(Clone, Default)]
pub struct MethodDef {
    /// Implementation. Registration fails without one.
    pub handler: Option<Arc<dyn MethodHandler>>,
    /// Permissions the caller must hold, all of them.
    pub required_permissions: Vec<String>,
    /// Steps run, in order, before the handler.
    pub middlewares: Vec<Arc<dyn Middleware>>,
}

impl MethodDef {
    /// Creates a definition around a handler.
    pub fn new(handler: impl MethodHandler + 'static) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
            ..Self::default()
        }
    }

    /// Requires a permission.
    #[must_use]
    pub fn require_permission(mut self, permission: impl Into<String>) -> Self {
        self.required_permissions.push(permission.into());
        self
    }

    /// Appends a middleware step.
    #[must_use]
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }
}

impl std::fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDef")
            .field("has_handler", &self.handler.is_some())
            .field("required_permissions", &self.required_permissions)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// A catalog entry.
#[derive(Debug, Clone)]
pub struct RegisteredMethod {
    /// Fully-qualified name, `<applet>.<suffix>`.
    pub name: String,
    /// Owning applet.
    pub applet_name: String,
    /// Declared reachability.
    pub visibility: Visibility,
    /// Executing runtime.
    pub target: Target,
    /// Handler, permissions and middleware.
    pub def: Arc<MethodDef>,
}

impl RegisteredMethod {
    /// Returns the locally registered handler.
    #[must_use]
    pub fn handler(&self) -> Option<&Arc<dyn MethodHandler>> {
        self.def.handler.as_ref()
    }
}

/// Errors raised at registration time.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Applet name was empty.
    #[error("applet name is required")]
    EmptyAppletName,
    /// Method name was empty.
    #[error("method name is required for applet '{0}'")]
    EmptyMethodName(String),
    /// Method name is not namespaced under its applet.
    #[error("method '{method}' must be namespaced as '{applet}.<name>'")]
    NotNamespaced {
        /// Owning applet.
        applet: String,
        /// Offending name.
        method: String,
    },
    /// Definition had no handler.
    #[error("method '{0}' has no handler")]
    MissingHandler(String),
    /// Secondary runtime target on a server-only method.
    #[error("method '{0}' is server-only and cannot target the secondary runtime")]
    SecondaryTargetNotPublic(String),
    /// Name already taken.
    #[error("method '{0}' is already registered")]
    Duplicate(String),
}

/// Shared method catalog. Readers never block other readers.
pub struct Registry {
    methods: RwLock<HashMap<String, RegisteredMethod>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a public method executed natively.
    ///
    /// # Errors
    ///
    /// See [`Registry::register`].
    pub fn register_public(
        &self,
        applet: &str,
        name: &str,
        def: MethodDef,
    ) -> Result<(), RegistryError> {
        self.register(applet, name, def, Visibility::Public, Target::Native)
    }

    /// Registers a server-only method executed natively.
    ///
    /// # Errors
    ///
    /// See [`Registry::register`].
    pub fn register_server_only(
        &self,
        applet: &str,
        name: &str,
        def: MethodDef,
    ) -> Result<(), RegistryError> {
        self.register(applet, name, def, Visibility::ServerOnly, Target::Native)
    }

    /// Registers a public method with an explicit target.
    ///
    /// # Errors
    ///
    /// See [`Registry::register`].
    pub fn register_public_with_target(
        &self,
        applet: &str,
        name: &str,
        def: MethodDef,
        target: Target,
    ) -> Result<(), RegistryError> {
        self.register(applet, name, def, Visibility::Public, target)
    }

    /// Validates and inserts a method.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty or not namespaced under `applet`, the
    /// handler is missing, a server-only method targets the secondary
    /// runtime, or the name is already registered.
    pub fn register(
        &self,
        applet: &str,
        name: &str,
        def: MethodDef,
        visibility: Visibility,
        target: Target,
    ) -> Result<(), RegistryError> {
        let applet = applet.trim();
        let name = name.trim();
        if applet.is_empty() {
            return Err(RegistryError::EmptyAppletName);
        }
        if name.is_empty() {
            return Err(RegistryError::EmptyMethodName(applet.to_string()));
        }
        let namespaced = name
            .strip_prefix(applet)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|suffix| !suffix.is_empty());
        if !namespaced {
            return Err(RegistryError::NotNamespaced {
                applet: applet.to_string(),
                method: name.to_string(),
            });
        }
        if def.handler.is_none() {
            return Err(RegistryError::MissingHandler(name.to_string()));
        }
        if visibility == Visibility::ServerOnly && target == Target::Secondary {
            return Err(RegistryError::SecondaryTargetNotPublic(name.to_string()));
        }

        let mut methods = self.methods.write();
        if methods.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        debug!(applet, method = name, ?visibility, ?target, "Registering method");
        methods.insert(
            name.to_string(),
            RegisteredMethod {
                name: name.to_string(),
                applet_name: applet.to_string(),
                visibility,
                target,
                def: Arc::new(def),
            },
        );
        Ok(())
    }

    /// Looks up a method by fully-qualified name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<RegisteredMethod> {
        self.methods.read().get(name).cloned()
    }

    /// Retargets every public method of `applet`. Returns how many changed.
    pub fn set_public_target_for_applet(&self, applet: &str, target: Target) -> usize {
        let mut methods = self.methods.write();
        let mut changed = 0;
        for method in methods.values_mut() {
            if method.applet_name == applet
                && method.visibility == Visibility::Public
                && method.target != target
            {
                method.target = target;
                changed += 1;
            }
        }
        debug!(applet, ?target, changed, "Retargeted public methods");
        changed
    }

    /// Number of public methods.
    #[must_use]
    pub fn count_public(&self) -> usize {
        self.count(Visibility::Public)
    }

    /// Number of server-only methods.
    #[must_use]
    pub fn count_server_only(&self) -> usize {
        self.count(Visibility::ServerOnly)
    }

    fn count(&self, visibility: Visibility) -> usize {
        self.methods
            .read()
            .values()
            .filter(|m| m.visibility == visibility)
            .count()
    }

    /// Lists the methods owned by `applet`, sorted by name.
    #[must_use]
    pub fn list_for_applet(&self, applet: &str) -> Vec<RegisteredMethod> {
        let mut out: Vec<_> = self
            .methods
            .read()
            .values()
            .filter(|m| m.applet_name == applet)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Lists the applets with at least one method, sorted.
    #[must_use]
    pub fn applets(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .methods
            .read()
            .values()
            .map(|m| m.applet_name.clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_def() -> MethodDef {
        MethodDef::new(|_ctx: RequestContext, params: Value| async move {
            Ok::<_, HandlerError>(params)
        })
    }

    #[test]
    fn register_should_require_namespaced_name() {
        let registry = Registry::new();
        for bad in ["other.echo", "bichatecho", "bichat.", "bichat", "echo"] {
            let err = registry
                .register_public("bichat", bad, echo_def())
                .unwrap_err();
            assert!(
                matches!(err, RegistryError::NotNamespaced { .. }),
                "{bad}: {err}"
            );
        }
        assert!(registry.get("other.echo").is_none());
        assert!(registry.register_public("bichat", "bichat.echo", echo_def()).is_ok());
    }

    #[test]
    fn register_should_reject_empty_names() {
        let registry = Registry::new();
        assert_eq!(
            registry.register_public("", "x.y", echo_def()),
            Err(RegistryError::EmptyAppletName)
        );
        assert_eq!(
            registry.register_public("bichat", "  ", echo_def()),
            Err(RegistryError::EmptyMethodName("bichat".into()))
        );
    }

    #[test]
    fn register_should_reject_missing_handler() {
        let registry = Registry::new();
        let err = registry
            .register_server_only("bichat", "bichat.noop", MethodDef::default())
            .unwrap_err();
        assert_eq!(err, RegistryError::MissingHandler("bichat.noop".into()));
    }

    #[test]
    fn duplicate_registration_fails_and_keeps_first() {
        let registry = Registry::new();
        registry
            .register_public("bichat", "bichat.echo", echo_def())
            .unwrap();
        let err = registry
            .register_server_only("bichat", "bichat.echo", echo_def())
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("bichat.echo".into()));

        let method = registry.get("bichat.echo").unwrap();
        assert_eq!(method.visibility, Visibility::Public);
        assert_eq!(registry.count_public(), 1);
        assert_eq!(registry.count_server_only(), 0);
    }

    #[test]
    fn secondary_target_is_rejected_for_server_only() {
        let registry = Registry::new();
        let err = registry
            .register(
                "bichat",
                "bichat.internal",
                echo_def(),
                Visibility::ServerOnly,
                Target::Secondary,
            )
            .unwrap_err();
        assert_eq!(
            err,
            RegistryError::SecondaryTargetNotPublic("bichat.internal".into())
        );
        assert!(registry.get("bichat.internal").is_none());
    }

    #[test]
    fn set_public_target_only_touches_public_methods_of_applet() {
        let registry = Registry::new();
        registry.register_public("bichat", "bichat.a", echo_def()).unwrap();
        registry.register_public("bichat", "bichat.b", echo_def()).unwrap();
        registry
            .register_server_only("bichat", "bichat.admin", echo_def())
            .unwrap();
        registry.register_public("crm", "crm.a", echo_def()).unwrap();

        assert_eq!(registry.set_public_target_for_applet("bichat", Target::Secondary), 2);
        assert_eq!(registry.get("bichat.a").unwrap().target, Target::Secondary);
        assert_eq!(registry.get("bichat.b").unwrap().target, Target::Secondary);
        assert_eq!(registry.get("bichat.admin").unwrap().target, Target::Native);
        assert_eq!(registry.get("crm.a").unwrap().target, Target::Native);

        assert_eq!(registry.set_public_target_for_applet("bichat", Target::Secondary), 0);
        assert_eq!(registry.set_public_target_for_applet("bichat", Target::Native), 2);
    }

    #[test]
    fn listing_and_counts() {
        let registry = Registry::new();
        registry.register_public("crm", "crm.z", echo_def()).unwrap();
        registry.register_public("crm", "crm.a", echo_def()).unwrap();
        registry.register_server_only("hr", "hr.sync", echo_def()).unwrap();

        let names: Vec<_> = registry
            .list_for_applet("crm")
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["crm.a", "crm.z"]);
        assert_eq!(registry.applets(), vec!["crm", "hr"]);
        assert_eq!(registry.count_public(), 2);
        assert_eq!(registry.count_server_only(), 1);
    }

    #[tokio::test]
    async fn concurrent_readers_see_registered_methods() {
        let registry = Arc::new(Registry::new());
        registry.register_public("crm", "crm.echo", echo_def()).unwrap();

        let mut tasks = Vec::new();
        for i in 0..8 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let method = registry.get("crm.echo").expect("registered");
                let handler = method.handler().expect("handler").clone();
                let ctx = RequestContext::new(crate::rpc::Transport::Internal);
                handler.call(ctx, json!(i)).await
            }));
        }
        for (i, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), json!(i));
        }
    }
}
