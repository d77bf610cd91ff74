use std::path::{Path, PathBuf};

use crate::{ObsConfig, ObsResult, ObsStore};

const DEFAULT_DB_NAME: &str = "obsdb.sqlite";

pub fn load_or_init_config(base: &Path) -> ObsResult<ObsConfig> {
    let default_sqlite = base.join(DEFAULT_DB_NAME);
    ObsConfig::load_or_init(base, &default_sqlite)
}

pub async fn open_store(base: &Path) -> ObsResult<ObsStore> {
    let config = load_or_init_config(base)?;
    ObsStore::connect(&config, base).await
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}
