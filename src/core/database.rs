use std::collections::BTreeMap;
use std::fs;
use std::sync::Arc;
use tracing::info;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Record, RecordId};
use crate::query::ast::{Action, FilterNode, Order, Response, Target};
use crate::query::filter::FilterEvaluator;
use crate::query::results;
use crate::schema::schema::Schema;
use crate::storage::catalog::Catalog;
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::storage::record_store::{CollectionState, RecordStore};

/// An open engine home. Owns every table; one instance per home.
pub struct Database {
    config: Config,

    storage: Arc<StorageLayout>,

    catalog: Catalog,

    collections: BTreeMap<(String, String), CollectionState>,

    _lock: FileLock,
}

impl Database {
    /// Open (or create) the engine home and rebuild every collection index
    /// from its record files.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(StorageLayout::new(config.home_dir.clone())?);
        let lock = FileLock::acquire(&storage)?;
        let mut catalog = Catalog::load(&storage)?;

        let mut collections = BTreeMap::new();
        let names: Vec<(String, String)> = catalog
            .schemas
            .iter()
            .flat_map(|(db, cols)| cols.keys().map(move |col| (db.clone(), col.clone())))
            .collect();
        let mut records = 0;
        for (db, col) in names {
            let schema = catalog.schema(&db, &col)?.clone();
            let mut state = CollectionState::new(&db, &col, &schema, config.record_cache_size);
            records += RecordStore::new(&storage, &mut catalog, &mut state, config.storage_line_limit)
                .rebuild_index()?;
            collections.insert((db, col), state);
        }

        info!(
            home = %storage.base_dir.display(),
            collections = collections.len(),
            records,
            "opened database"
        );
        Ok(Database {
            config,
            storage,
            catalog,
            collections,
            _lock: lock,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &StorageLayout {
        &self.storage
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn databases(&self) -> Vec<String> {
        self.catalog.databases().cloned().collect()
    }

    pub fn collections(&self, db: &str) -> Result<Vec<String>> {
        self.catalog.collection_names(db)
    }

    pub fn create_database(&mut self, db: &str) -> Result<()> {
        validate_name("database", db)?;
        self.catalog.add_database(db)?;
        fs::create_dir_all(self.storage.database_dir(db))?;
        self.catalog.save()?;
        info!(db, "created database");
        Ok(())
    }

    pub fn delete_database(&mut self, db: &str) -> Result<()> {
        self.catalog.remove_database(db)?;
        self.collections.retain(|(owner, _), _| owner != db);
        let dir = self.storage.database_dir(db);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        self.catalog.save()?;
        info!(db, "deleted database");
        Ok(())
    }

    pub fn create_collection(&mut self, db: &str, collection: &str, schema: Schema) -> Result<()> {
        validate_name("collection", collection)?;
        if !matches!(schema, Schema::Object(_)) {
            return Err(Error::schema("collection schema must be an object"));
        }
        let state = CollectionState::new(db, collection, &schema, self.config.record_cache_size);
        self.catalog.add_collection(db, collection, schema)?;
        fs::create_dir_all(self.storage.collection_dir(db, collection))?;
        self.catalog.save()?;
        self.collections.insert((db.to_string(), collection.to_string()), state);
        info!(db, collection, "created collection");
        Ok(())
    }

    /// Replace a collection's schema. Every stored record must satisfy the
    /// new one. The index is rebuilt for the new searchable keys.
    pub fn modify_collection(&mut self, db: &str, collection: &str, schema: Schema) -> Result<()> {
        if !matches!(schema, Schema::Object(_)) {
            return Err(Error::schema("collection schema must be an object"));
        }
        let ids = self.query(db, collection, None)?;
        let records = self.read(db, collection, &ids)?;
        for record in &records {
            schema.validate_record(record)?;
        }

        let previous = self.catalog.schema(db, collection)?.clone();
        self.catalog.set_schema(db, collection, schema.clone())?;
        if let Err(e) = self.catalog.save() {
            self.catalog.set_schema(db, collection, previous)?;
            return Err(e);
        }

        let mut state = CollectionState::new(db, collection, &schema, self.config.record_cache_size);
        for record in &records {
            state.index.add(record)?;
        }
        self.collections.insert((db.to_string(), collection.to_string()), state);
        info!(db, collection, records = records.len(), "modified collection");
        Ok(())
    }

    pub fn delete_collection(&mut self, db: &str, collection: &str) -> Result<()> {
        self.catalog.remove_collection(db, collection)?;
        self.collections.remove(&(db.to_string(), collection.to_string()));
        let dir = self.storage.collection_dir(db, collection);
        if dir.exists() {
            fs::remove_dir_all(dir)?;
        }
        self.catalog.save()?;
        info!(db, collection, "deleted collection");
        Ok(())
    }

    pub fn insert(&mut self, db: &str, collection: &str, records: Vec<Record>) -> Result<Vec<RecordId>> {
        self.store(db, collection)?.write(records)
    }

    /// Bodies of `ids`, in file/line order rather than the given order.
    pub fn read(&mut self, db: &str, collection: &str, ids: &[RecordId]) -> Result<Vec<Record>> {
        self.store(db, collection)?.read(ids)
    }

    pub fn update(
        &mut self,
        db: &str,
        collection: &str,
        ids: &[RecordId],
        fields: &Record,
    ) -> Result<Vec<Record>> {
        self.store(db, collection)?.update(ids, fields)
    }

    /// Replace whole records. Each record carries the `_id` it replaces.
    pub fn overwrite(&mut self, db: &str, collection: &str, records: Vec<Record>) -> Result<Vec<RecordId>> {
        let bodies = self.store(db, collection)?.overwrite(records)?;
        bodies.iter().map(RecordId::of).collect()
    }

    pub fn delete(&mut self, db: &str, collection: &str, ids: &[RecordId]) -> Result<usize> {
        self.store(db, collection)?.delete(ids)
    }

    /// IDs matching `filter`, sorted.
    pub fn query(&self, db: &str, collection: &str, filter: Option<&FilterNode>) -> Result<Vec<RecordId>> {
        let state = self.state(db, collection)?;
        Ok(FilterEvaluator::new(&state.index).evaluate(filter)?.into_vec())
    }

    pub fn count(&self, db: &str, collection: &str, filter: Option<&FilterNode>) -> Result<usize> {
        Ok(self.query(db, collection, filter)?.len())
    }

    pub fn get(
        &mut self,
        db: &str,
        collection: &str,
        filter: Option<&FilterNode>,
        order: Option<&Order>,
        limit: Option<usize>,
        fields: Option<&[String]>,
    ) -> Result<Vec<Record>> {
        let ids = self.query(db, collection, filter)?;
        let records = self.read(db, collection, &ids)?;
        Ok(results::shape(records, order, limit, fields))
    }

    pub fn searchable_keys(&self, db: &str, collection: &str) -> Result<Vec<String>> {
        Ok(self.state(db, collection)?.index.searchable_keys().cloned().collect())
    }

    /// Run a parsed action. Authorization is the caller's concern.
    pub fn execute(&mut self, action: Action) -> Result<Response> {
        match action {
            Action::Get { db, collection, filter, order, limit, fields } => {
                let records = self.get(
                    &db,
                    &collection,
                    filter.as_ref(),
                    order.as_ref(),
                    limit,
                    fields.as_deref(),
                )?;
                Ok(Response::Records(records))
            }
            Action::Count { db, collection, filter } => {
                Ok(Response::Count(self.count(&db, &collection, filter.as_ref())?))
            }
            Action::Insert { db, collection, records } => {
                Ok(Response::Ids(self.insert(&db, &collection, records)?))
            }
            Action::Update { db, collection, target, fields } => {
                let ids = self.resolve(&db, &collection, target)?;
                let updated = self.update(&db, &collection, &ids, &fields)?;
                let ids = updated.iter().map(RecordId::of).collect::<Result<Vec<_>>>()?;
                Ok(Response::Ids(ids))
            }
            Action::Overwrite { db, collection, records } => {
                Ok(Response::Ids(self.overwrite(&db, &collection, records)?))
            }
            Action::Delete { db, collection, target } => {
                let ids = self.resolve(&db, &collection, target)?;
                Ok(Response::Count(self.delete(&db, &collection, &ids)?))
            }
            Action::CreateDatabase { db } => {
                self.create_database(&db)?;
                Ok(Response::Done)
            }
            Action::DeleteDatabase { db } => {
                self.delete_database(&db)?;
                Ok(Response::Done)
            }
            Action::CreateCollection { db, collection, schema } => {
                self.create_collection(&db, &collection, schema)?;
                Ok(Response::Done)
            }
            Action::ModifyCollection { db, collection, schema } => {
                self.modify_collection(&db, &collection, schema)?;
                Ok(Response::Done)
            }
            Action::DeleteCollection { db, collection } => {
                self.delete_collection(&db, &collection)?;
                Ok(Response::Done)
            }
        }
    }

    fn resolve(&self, db: &str, collection: &str, target: Target) -> Result<Vec<RecordId>> {
        match target {
            Target::Ids(ids) => Ok(ids),
            Target::Filter(filter) => self.query(db, collection, filter.as_ref()),
        }
    }

    fn state(&self, db: &str, collection: &str) -> Result<&CollectionState> {
        self.collections
            .get(&(db.to_string(), collection.to_string()))
            .ok_or_else(|| missing_collection(db, collection))
    }

    fn store(&mut self, db: &str, collection: &str) -> Result<RecordStore<'_>> {
        let state = self
            .collections
            .get_mut(&(db.to_string(), collection.to_string()))
            .ok_or_else(|| missing_collection(db, collection))?;
        Ok(RecordStore::new(&self.storage, &mut self.catalog, state, self.config.storage_line_limit))
    }
}

fn missing_collection(db: &str, collection: &str) -> Error {
    Error::not_found(format!("collection {}.{} does not exist", db, collection))
}

fn validate_name(kind: &str, name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::InvalidArgument, format!("invalid {} name: {:?}", kind, name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        let mut config = Config::with_home(dir.path());
        config.storage_line_limit = 4;
        Database::open(config).unwrap()
    }

    #[test]
    fn catalog_operations_create_and_remove_directories() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        let schema = Schema::collection(&json!({"a": "string"})).unwrap();

        db.create_database("shop").unwrap();
        db.create_collection("shop", "items", schema.clone()).unwrap();
        assert!(db.storage().collection_dir("shop", "items").is_dir());
        assert_eq!(db.collections("shop").unwrap(), vec!["items"]);
        assert_eq!(db.searchable_keys("shop", "items").unwrap(), vec!["a"]);

        assert_eq!(
            db.create_collection("nope", "items", schema).unwrap_err().kind,
            ErrorKind::NotFound
        );
        assert_eq!(db.create_database("bad/name").unwrap_err().kind, ErrorKind::InvalidArgument);

        db.delete_collection("shop", "items").unwrap();
        assert!(!db.storage().collection_dir("shop", "items").exists());
        db.delete_database("shop").unwrap();
        assert!(db.databases().is_empty());
    }

    #[test]
    fn operations_on_missing_collection_fail() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        assert_eq!(db.count("x", "y", None).unwrap_err().kind, ErrorKind::NotFound);
        assert_eq!(db.insert("x", "y", vec![Record::new()]).unwrap_err().kind, ErrorKind::NotFound);
    }

    #[test]
    fn execute_runs_structured_actions() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.execute(Action::CreateDatabase { db: "d".into() }).unwrap();
        db.execute(Action::CreateCollection {
            db: "d".into(),
            collection: "c".into(),
            schema: Schema::collection(&json!({"n": "int"})).unwrap(),
        })
        .unwrap();

        let records = (0..5).map(|n| json!({"n": n}).as_object().cloned().unwrap()).collect();
        let Response::Ids(ids) = db
            .execute(Action::Insert { db: "d".into(), collection: "c".into(), records })
            .unwrap()
        else {
            panic!("insert returned no ids");
        };
        assert_eq!(ids.len(), 5);

        let big = FilterNode::compare("n", crate::query::ast::CompareOp::Gte, json!(3));
        let count = db
            .execute(Action::Count { db: "d".into(), collection: "c".into(), filter: Some(big.clone()) })
            .unwrap();
        assert_eq!(count, Response::Count(2));

        let deleted = db
            .execute(Action::Delete {
                db: "d".into(),
                collection: "c".into(),
                target: Target::Filter(Some(big)),
            })
            .unwrap();
        assert_eq!(deleted, Response::Count(2));
        assert_eq!(db.count("d", "c", None).unwrap(), 3);

        let first = ids[0].to_string();
        let replaced = db
            .execute(Action::Overwrite {
                db: "d".into(),
                collection: "c".into(),
                records: vec![json!({"_id": first, "n": 40}).as_object().cloned().unwrap()],
            })
            .unwrap();
        assert_eq!(replaced, Response::Ids(vec![ids[0].clone()]));
        assert_eq!(db.query("d", "c", Some(&FilterNode::eq("n", json!(40)))).unwrap(), vec![ids[0].clone()]);
    }

    #[test]
    fn modify_collection_rebuilds_searchable_keys() {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        db.create_database("d").unwrap();
        db.create_collection("d", "c", Schema::collection(&json!({"n": "int"})).unwrap()).unwrap();
        let records = (0..3).map(|n| json!({"n": n}).as_object().cloned().unwrap()).collect();
        db.insert("d", "c", records).unwrap();

        let narrower = Schema::collection(&json!({"s": "string"})).unwrap();
        let err = db.modify_collection("d", "c", narrower).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaViolation);
        assert_eq!(db.searchable_keys("d", "c").unwrap(), vec!["n"]);

        let wider = Schema::collection(&json!({"n": "float", "s": "string"})).unwrap();
        db.execute(Action::ModifyCollection { db: "d".into(), collection: "c".into(), schema: wider }).unwrap();
        assert_eq!(db.searchable_keys("d", "c").unwrap(), vec!["n", "s"]);
        assert_eq!(db.count("d", "c", Some(&FilterNode::eq("n", json!(2.0)))).unwrap(), 1);
        assert_eq!(db.catalog().index_keys["d"]["c"], vec!["n", "s"]);

        let tagged = json!({"n": 1.5, "s": "x"}).as_object().cloned().unwrap();
        db.insert("d", "c", vec![tagged]).unwrap();
        assert_eq!(db.count("d", "c", Some(&FilterNode::eq("s", json!("x")))).unwrap(), 1);

        drop(db);
        let db = open(&dir);
        assert_eq!(db.count("d", "c", None).unwrap(), 4);
        assert_eq!(db.searchable_keys("d", "c").unwrap(), vec!["n", "s"]);
    }
}
