//! Configuration management for the applet kernel.
//!
//! Values come from built-in defaults, then an optional `applet-kernel`
//! file (TOML, YAML or JSON), then `APPLET__`-prefixed environment
//! variables with `__` as the nesting separator.
//!
//! # Example
//!
//! ```no_run
//! use applet_kernel::infrastructure::config::Settings;
//!
//! let settings = Settings::new().expect("Failed to load configuration");
//! ```

pub mod applets;
pub mod database;
pub mod jobs;
pub mod server;
pub mod telemetry;

pub use applets::{AppletSettings, PublicMethodSettings};
pub use database::DatabaseSettings;
pub use jobs::JobSettings;
pub use server::ServerSettings;
pub use telemetry::TelemetrySettings;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const CONFIG_FILE: &str = "applet-kernel";

/// Top-level configuration for the applet kernel.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Server settings.
    pub server: ServerSettings,
    /// Telemetry settings.
    pub telemetry: TelemetrySettings,
    /// Database settings.
    pub database: DatabaseSettings,
    /// Job runner settings.
    #[serde(default)]
    pub jobs: JobSettings,
    /// Applets known at startup.
    #[serde(default)]
    pub applets: Vec<AppletSettings>,
}

impl Settings {
    /// Loads settings from defaults, the optional config file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be built or deserialized.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_builder(
            Self::defaults()?
                .add_source(File::with_name(CONFIG_FILE).required(false))
                .add_source(Environment::with_prefix("APPLET").separator("__")),
        )
    }

    /// Loads settings from defaults overlaid with a single TOML document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is malformed or fails to deserialize.
    pub fn from_toml(document: &str) -> Result<Self, ConfigError> {
        Self::from_builder(
            Self::defaults()?.add_source(File::from_str(document, config::FileFormat::Toml)),
        )
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 9090)?
            .set_default("server.public_rpc_path", server::DEFAULT_PUBLIC_RPC_PATH)?
            .set_default("server.internal_rpc_path", server::DEFAULT_INTERNAL_RPC_PATH)?
            .set_default("server.ws_path", server::DEFAULT_WS_PATH)?
            .set_default("server.ws_control_path", server::DEFAULT_WS_CONTROL_PATH)?
            .set_default("server.max_body_bytes", server::DEFAULT_MAX_BODY_BYTES)?
            .set_default("database.url", database::DEFAULT_DATABASE_URL)?
            .set_default("telemetry.service_name", "applet-kernel")?
            .set_default("telemetry.sampling_ratio", 1.0)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }
}

/// Helper for strong typing addresses
pub struct BindAddress(pub String, pub u16);

impl BindAddress {
    /// Converts the bind address to a `SocketAddr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the IP address string cannot be parsed.
    pub fn to_socket_addr(&self) -> anyhow::Result<std::net::SocketAddr> {
        let ip = self
            .0
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid IP address '{}': {e}", self.0))?;
        Ok(std::net::SocketAddr::new(ip, self.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::Target;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_cover_every_section() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.server.public_rpc_path, "/rpc");
        assert_eq!(settings.server.internal_rpc_path, "/__internal/rpc");
        assert_eq!(settings.server.ws_path, "/ws/{applet_id}");
        assert_eq!(settings.server.max_body_bytes, 1 << 20);
        assert!(settings.jobs.enabled);
        assert_eq!(settings.jobs.poll_interval().as_millis(), 2000);
        assert!(settings.applets.is_empty());
        assert!(settings.database.url.expose_secret().starts_with("sqlite:"));
    }

    #[test]
    fn applets_and_overrides_are_read() {
        let settings = Settings::from_toml(
            r#"
            [server]
            port = 8088

            [jobs]
            enabled = false
            poll_interval_ms = 0

            [[applets]]
            name = "bichat"
            runtime_url = "http://127.0.0.1:4100"
            public_target = "secondary"
            public_methods = [
                { name = "bichat.ask", permissions = ["bichat.use"] },
                { name = "bichat.ping" },
            ]

            [[applets]]
            name = "crm"
            "#,
        )
        .unwrap();
        assert_eq!(settings.server.port, 8088);
        assert!(!settings.jobs.enabled);
        assert_eq!(settings.jobs.poll_interval().as_millis(), 2000);
        assert_eq!(settings.applets.len(), 2);
        assert_eq!(settings.applets[0].public_target, Target::Secondary);
        assert_eq!(settings.applets[1].public_target, Target::Native);
        assert_eq!(settings.applets[1].runtime_url, None);
        assert!(settings.applets[1].public_methods.is_empty());
        let methods = &settings.applets[0].public_methods;
        assert_eq!(methods.len(), 2);
        assert_eq!(methods[0].name, "bichat.ask");
        assert_eq!(methods[0].permissions, vec!["bichat.use".to_string()]);
        assert!(methods[1].permissions.is_empty());
        assert!(!settings.server.trust_public_identity_headers);
    }

    #[test]
    fn bind_address_parses() {
        let addr = BindAddress("127.0.0.1".into(), 80).to_socket_addr().unwrap();
        assert_eq!(addr.port(), 80);
        assert!(BindAddress("localhost:x".into(), 80).to_socket_addr().is_err());
    }
}
