use std::{ops::Deref, sync::Arc, sync::OnceLock};

use crate::Engine;
use crate::config::BotConfig;
use crate::error::StorageError;
use crate::storage::Database;

/// State shared by commands and event handlers
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

pub struct DataInner {
    pub config: BotConfig,
    pub db: Database,
    // Set once the client exists, since the platform needs its http and cache
    engine: OnceLock<Engine>,
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("config", &self.config)
            .field("data_dir", &self.db.dir)
            .field("engine_ready", &self.engine.get().is_some())
            .finish()
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Data {
    #[must_use]
    pub fn new(config: BotConfig, db: Database) -> Self {
        Self(Arc::new(DataInner {
            config,
            db,
            engine: OnceLock::new(),
        }))
    }

    /// Install the engine. Returns false if one was already installed.
    pub fn install_engine(&self, engine: Engine) -> bool {
        self.engine.set(engine).is_ok()
    }

    /// The engine, once startup has installed it
    #[must_use]
    pub fn engine(&self) -> Option<&Engine> {
        self.engine.get()
    }

    /// Write dirty tables to disk
    /// # Errors
    /// Fails if a table cannot be serialized or written.
    pub async fn save(&self) -> Result<(), StorageError> {
        self.db.save().await
    }
}
