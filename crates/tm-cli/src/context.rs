//! Runtime context for CLI commands

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tm_core::{Config, DbType};
use tm_db::{DuckDbStore, MemoryStore, MigrationStore};
use tm_migrate::{MigrationRunner, RunnerOptions};

use crate::catalog;
use crate::cli::GlobalArgs;

/// Runtime context containing loaded configuration and store connection
pub struct RuntimeContext {
    /// The loaded configuration, with CLI overrides applied
    pub config: Config,

    /// Store the shipped migrations are applied to
    pub store: Arc<dyn MigrationStore>,
}

impl RuntimeContext {
    /// Create a new runtime context from global arguments
    pub fn new(args: &GlobalArgs) -> Result<Self> {
        let config = load_config(args)?;
        let store = open_store(&config)?;
        log::debug!(
            "Using {} store at {} (history schema {})",
            store.store_type(),
            config.database.path,
            config.history.schema
        );
        Ok(Self { config, store })
    }

    /// Build a runner over the shipped migrations
    pub fn runner(&self, dry_run: bool) -> Result<MigrationRunner> {
        let options = RunnerOptions {
            dry_run,
            ..RunnerOptions::from(&self.config.lock)
        };
        let definitions = catalog::definitions().context("Shipped migration catalog is invalid")?;
        MigrationRunner::from_definitions(self.store.clone(), definitions, options)
            .context("Shipped migration catalog is invalid")
    }
}

/// Load config from `--config`, or from the project directory
pub(crate) fn load_config(args: &GlobalArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => {
            Config::load(Path::new(path)).context("Failed to load configuration file")?
        }
        None => Config::load_from_dir(Path::new(&args.project_dir))
            .context("Failed to load project configuration")?,
    };

    if let Some(database) = &args.database {
        config.database.path = database.clone();
        config
            .validate()
            .context("Invalid --database override")?;
    }
    Ok(config)
}

fn open_store(config: &Config) -> Result<Arc<dyn MigrationStore>> {
    let store: Arc<dyn MigrationStore> = match config.database.db_type {
        DbType::DuckDb => Arc::new(
            DuckDbStore::new(&config.database.path)
                .context("Failed to connect to database")?
                .with_schema(config.history.schema.clone()),
        ),
        DbType::Memory => Arc::new(MemoryStore::new()),
    };
    Ok(store)
}
