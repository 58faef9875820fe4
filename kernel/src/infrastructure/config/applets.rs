//! Applets known at startup.

use serde::Deserialize;

use crate::rpc::Target;

/// Startup settings for one applet.
#[derive(Debug, Deserialize, Clone)]
pub struct AppletSettings {
    /// Applet name, the namespace of its methods.
    pub name: String,
    /// Base URL of an out-of-process runtime. Work for this applet goes there.
    #[serde(default)]
    pub runtime_url: Option<String>,
    /// Target applied to every public method of the applet.
    #[serde(default)]
    pub public_target: Target,
    /// Public methods served by the applet's runtime.
    #[serde(default)]
    pub public_methods: Vec<PublicMethodSettings>,
}

/// A public method whose logic lives in the applet runtime.
#[derive(Debug, Deserialize, Clone)]
pub struct PublicMethodSettings {
    /// Fully qualified name, for example `bichat.ask`.
    pub name: String,
    /// Permissions every caller must hold.
    #[serde(default)]
    pub permissions: Vec<String>,
}
