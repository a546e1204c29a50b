use std::path::PathBuf;
use std::fs;
use crate::core::error::Result;

/// Directory structure under the engine home
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub data_dir: PathBuf,      // Record files: data/<db>/<collection>/<fileKey>
    pub meta_dir: PathBuf,      // Sidecar tables
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let data_dir = base_dir.join("data");
        let meta_dir = base_dir.join("meta");

        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&meta_dir)?;

        Ok(StorageLayout {
            base_dir,
            data_dir,
            meta_dir,
        })
    }

    pub fn database_dir(&self, db: &str) -> PathBuf {
        self.data_dir.join(db)
    }

    pub fn collection_dir(&self, db: &str, collection: &str) -> PathBuf {
        self.database_dir(db).join(collection)
    }

    pub fn record_file_path(&self, db: &str, collection: &str, file: &str) -> PathBuf {
        self.collection_dir(db, collection).join(file)
    }

    pub fn free_space_path(&self) -> PathBuf {
        self.meta_dir.join("free_space.json")
    }

    pub fn schema_path(&self) -> PathBuf {
        self.meta_dir.join("schema.json")
    }

    pub fn collections_path(&self) -> PathBuf {
        self.meta_dir.join("collections.json")
    }

    pub fn index_keys_path(&self) -> PathBuf {
        self.meta_dir.join("index_keys.json")
    }

    pub fn grants_path(&self) -> PathBuf {
        self.meta_dir.join("grants.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }
}
