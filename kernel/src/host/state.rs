//! Shared engine state handed to every HTTP handler.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::rpc::{Dispatcher, Registry};
use crate::ws::WsBridge;

/// Central coordination point for the HTTP surfaces.
///
/// Cheap to share behind an `Arc`; every collaborator is itself reference
/// counted.
pub struct EngineState {
    dispatcher: Arc<Dispatcher>,
    bridge: Arc<WsBridge>,
    db_pool: Option<SqlitePool>,
}

impl std::fmt::Debug for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineState")
            .field("methods", &self.registry().count_public())
            .field("connections", &self.bridge.connection_count())
            .finish_non_exhaustive()
    }
}

impl EngineState {
    /// Creates state over a dispatcher and socket bridge.
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, bridge: Arc<WsBridge>) -> Self {
        Self {
            dispatcher,
            bridge,
            db_pool: None,
        }
    }

    /// Attaches the database pool used by readiness checks.
    #[must_use]
    pub fn with_db(mut self, pool: SqlitePool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    /// Returns the RPC dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the method registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        self.dispatcher.registry()
    }

    /// Returns the websocket bridge.
    #[must_use]
    pub fn bridge(&self) -> &Arc<WsBridge> {
        &self.bridge
    }

    /// Returns the database pool, if one is attached.
    #[must_use]
    pub fn db(&self) -> Option<&SqlitePool> {
        self.db_pool.as_ref()
    }

    /// Checks that attached backing services answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the database does not respond.
    pub async fn ready(&self) -> anyhow::Result<()> {
        if let Some(pool) = &self.db_pool {
            sqlx::query("SELECT 1").execute(pool).await?;
        }
        Ok(())
    }
}
