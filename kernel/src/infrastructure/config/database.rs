//! Database configuration for the applet kernel.
//!
//! This module defines database connection settings.

use secrecy::SecretString;
use serde::Deserialize;

pub(super) const DEFAULT_DATABASE_URL: &str = "sqlite://applet-kernel.db?mode=rwc";

/// Database connection settings.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseSettings {
    /// Database connection URL.
    pub url: SecretString,
}
