pub mod config;
pub mod datastore;
mod db;
pub mod facts;
pub mod filter;
pub mod migration;
pub mod resolver;
pub mod schema;
pub mod store;
pub mod sweeper;

pub use obsdb_core::*;
pub use config::{
    DatabaseConfig, LimitsConfig, ObsConfig, PoolConfig, RetentionConfig, ValidWindowConfig,
};
pub use datastore::{default_sqlite_path, load_or_init_config, open_store};
pub use filter::FilterCompiler;
pub use schema::{discover_natural_key, ensure_unique_main};
pub use store::ObsStore;
pub use sweeper::{RetentionSweeper, SweepReport, SweeperHandle};
