use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::schema::schema::Schema;
use crate::storage::freespace::FreeSpaceCollection;
use crate::storage::layout::StorageLayout;

/// db → collection → entry
pub type Table<T> = BTreeMap<String, BTreeMap<String, T>>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionFiles {
    pub files: Vec<String>,
}

/// The persisted sidecar tables of an engine home.
#[derive(Debug)]
pub struct Catalog {
    layout: StorageLayout,
    pub free_space: Table<FreeSpaceCollection>,
    pub schemas: Table<Schema>,
    pub collections: Table<CollectionFiles>,
    pub index_keys: Table<Vec<String>>,
}

impl Catalog {
    pub fn load(layout: &StorageLayout) -> Result<Self> {
        Ok(Catalog {
            layout: layout.clone(),
            free_space: read_table(&layout.free_space_path())?,
            schemas: read_table(&layout.schema_path())?,
            collections: read_table(&layout.collections_path())?,
            index_keys: read_table(&layout.index_keys_path())?,
        })
    }

    /// Rewrite every table.
    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.layout.free_space_path(), &self.free_space)?;
        write_json_atomic(&self.layout.schema_path(), &self.schemas)?;
        write_json_atomic(&self.layout.collections_path(), &self.collections)?;
        write_json_atomic(&self.layout.index_keys_path(), &self.index_keys)?;
        Ok(())
    }

    /// Rewrite only the tables that change on record writes and deletes.
    pub fn save_records(&self) -> Result<()> {
        write_json_atomic(&self.layout.free_space_path(), &self.free_space)?;
        write_json_atomic(&self.layout.collections_path(), &self.collections)?;
        Ok(())
    }

    pub fn databases(&self) -> impl Iterator<Item = &String> {
        self.schemas.keys()
    }

    pub fn collection_names(&self, db: &str) -> Result<Vec<String>> {
        let cols = self
            .schemas
            .get(db)
            .ok_or_else(|| Error::not_found(format!("database {} does not exist", db)))?;
        Ok(cols.keys().cloned().collect())
    }

    pub fn has_database(&self, db: &str) -> bool {
        self.schemas.contains_key(db)
    }

    pub fn has_collection(&self, db: &str, collection: &str) -> bool {
        self.schemas.get(db).is_some_and(|cols| cols.contains_key(collection))
    }

    pub fn add_database(&mut self, db: &str) -> Result<()> {
        if self.has_database(db) {
            return Err(Error::new(ErrorKind::AlreadyExists, format!("database {} already exists", db)));
        }
        self.free_space.insert(db.to_string(), BTreeMap::new());
        self.schemas.insert(db.to_string(), BTreeMap::new());
        self.collections.insert(db.to_string(), BTreeMap::new());
        self.index_keys.insert(db.to_string(), BTreeMap::new());
        Ok(())
    }

    pub fn remove_database(&mut self, db: &str) -> Result<()> {
        if !self.has_database(db) {
            return Err(Error::not_found(format!("database {} does not exist", db)));
        }
        self.free_space.remove(db);
        self.schemas.remove(db);
        self.collections.remove(db);
        self.index_keys.remove(db);
        Ok(())
    }

    pub fn add_collection(&mut self, db: &str, collection: &str, schema: Schema) -> Result<()> {
        if !self.has_database(db) {
            return Err(Error::not_found(format!("database {} does not exist", db)));
        }
        if self.has_collection(db, collection) {
            return Err(Error::new(
                ErrorKind::AlreadyExists,
                format!("collection {}.{} already exists", db, collection),
            ));
        }
        let keys = schema.searchable_keys();
        entry(&mut self.free_space, db).insert(collection.to_string(), FreeSpaceCollection::new());
        entry(&mut self.collections, db).insert(collection.to_string(), CollectionFiles::default());
        entry(&mut self.index_keys, db).insert(collection.to_string(), keys);
        entry(&mut self.schemas, db).insert(collection.to_string(), schema);
        Ok(())
    }

    pub fn remove_collection(&mut self, db: &str, collection: &str) -> Result<()> {
        if !self.has_collection(db, collection) {
            return Err(not_found(db, collection));
        }
        if let Some(cols) = self.free_space.get_mut(db) {
            cols.remove(collection);
        }
        if let Some(cols) = self.schemas.get_mut(db) {
            cols.remove(collection);
        }
        if let Some(cols) = self.collections.get_mut(db) {
            cols.remove(collection);
        }
        if let Some(cols) = self.index_keys.get_mut(db) {
            cols.remove(collection);
        }
        Ok(())
    }

    pub fn schema(&self, db: &str, collection: &str) -> Result<&Schema> {
        self.schemas
            .get(db)
            .and_then(|cols| cols.get(collection))
            .ok_or_else(|| not_found(db, collection))
    }

    pub fn free_space(&self, db: &str, collection: &str) -> Result<&FreeSpaceCollection> {
        self.free_space
            .get(db)
            .and_then(|cols| cols.get(collection))
            .ok_or_else(|| not_found(db, collection))
    }

    pub fn set_free_space(&mut self, db: &str, collection: &str, table: FreeSpaceCollection) {
        entry(&mut self.free_space, db).insert(collection.to_string(), table);
    }

    pub fn files(&self, db: &str, collection: &str) -> Result<&[String]> {
        self.collections
            .get(db)
            .and_then(|cols| cols.get(collection))
            .map(|entry| entry.files.as_slice())
            .ok_or_else(|| not_found(db, collection))
    }

    pub fn has_file(&self, db: &str, collection: &str, file: &str) -> bool {
        self.files(db, collection)
            .is_ok_and(|files| files.iter().any(|f| f == file))
    }

    pub fn add_files(&mut self, db: &str, collection: &str, files: &[String]) {
        let entry = entry(&mut self.collections, db)
            .entry(collection.to_string())
            .or_default();
        entry.files.extend(files.iter().cloned());
        entry.files.sort();
    }

    pub fn set_files(&mut self, db: &str, collection: &str, files: Vec<String>) {
        entry(&mut self.collections, db).insert(collection.to_string(), CollectionFiles { files });
    }

    pub fn set_schema(&mut self, db: &str, collection: &str, schema: Schema) -> Result<()> {
        if !self.has_collection(db, collection) {
            return Err(not_found(db, collection));
        }
        entry(&mut self.index_keys, db).insert(collection.to_string(), schema.searchable_keys());
        entry(&mut self.schemas, db).insert(collection.to_string(), schema);
        Ok(())
    }
}

fn entry<'a, T>(table: &'a mut Table<T>, db: &str) -> &'a mut BTreeMap<String, T> {
    table.entry(db.to_string()).or_default()
}

fn not_found(db: &str, collection: &str) -> Error {
    Error::not_found(format!("collection {}.{} does not exist", db, collection))
}

/// Decode a JSON table; a missing file is the empty table.
pub fn read_table<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read(path) {
        Ok(data) => serde_json::from_slice(&data)
            .map_err(|e| Error::decode(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Write `value` as JSON to a sibling temp file, then rename over `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &data)
}

pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = temp_path(path);
    let result = (|| -> Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

pub fn temp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn schema() -> Schema {
        Schema::collection(&json!({"a": "string", "n": {"m": "int"}})).unwrap()
    }

    #[test]
    fn tables_survive_reload() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();

        let mut catalog = Catalog::load(&layout).unwrap();
        catalog.add_database("db").unwrap();
        catalog.add_collection("db", "col", schema()).unwrap();
        catalog.add_files("db", "col", &["k1".to_string()]);
        catalog.save().unwrap();

        let reloaded = Catalog::load(&layout).unwrap();
        assert_eq!(reloaded.schema("db", "col").unwrap(), &schema());
        assert_eq!(reloaded.files("db", "col").unwrap(), ["k1".to_string()]);
        assert_eq!(reloaded.index_keys["db"]["col"], vec!["a", "n.m"]);
        assert!(reloaded.free_space("db", "col").unwrap().files.is_empty());
    }

    #[test]
    fn duplicate_and_missing_entries() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let mut catalog = Catalog::load(&layout).unwrap();

        assert_eq!(catalog.add_collection("db", "col", schema()).unwrap_err().kind, ErrorKind::NotFound);
        catalog.add_database("db").unwrap();
        assert_eq!(catalog.add_database("db").unwrap_err().kind, ErrorKind::AlreadyExists);
        catalog.add_collection("db", "col", schema()).unwrap();
        assert_eq!(catalog.add_collection("db", "col", schema()).unwrap_err().kind, ErrorKind::AlreadyExists);

        catalog.remove_collection("db", "col").unwrap();
        assert!(!catalog.has_collection("db", "col"));
        assert_eq!(catalog.remove_collection("db", "col").unwrap_err().kind, ErrorKind::NotFound);
        catalog.remove_database("db").unwrap();
        assert!(!catalog.has_database("db"));
    }

    #[test]
    fn schema_change_refreshes_index_keys() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        let mut catalog = Catalog::load(&layout).unwrap();
        catalog.add_database("db").unwrap();
        catalog.add_collection("db", "col", schema()).unwrap();

        let wider = Schema::collection(&json!({"a": "string", "b": "bool"})).unwrap();
        catalog.set_schema("db", "col", wider.clone()).unwrap();
        assert_eq!(catalog.schema("db", "col").unwrap(), &wider);
        assert_eq!(catalog.index_keys["db"]["col"], vec!["a", "b"]);
        assert_eq!(catalog.set_schema("db", "nope", wider).unwrap_err().kind, ErrorKind::NotFound);

        catalog.add_files("db", "col", &["k2".to_string(), "k1".to_string()]);
        catalog.set_files("db", "col", vec!["k1".to_string()]);
        assert_eq!(catalog.files("db", "col").unwrap(), ["k1".to_string()]);
    }

    #[test]
    fn corrupt_table_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let layout = StorageLayout::new(dir.path().to_path_buf()).unwrap();
        fs::write(layout.schema_path(), b"{not json").unwrap();
        assert_eq!(Catalog::load(&layout).unwrap_err().kind, ErrorKind::Decode);
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.json");
        write_json_atomic(&path, &json!({"x": 1})).unwrap();
        assert!(path.exists());
        assert!(!temp_path(&path).exists());
    }
}
