use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{is_system_key, Record, RecordId, ID_KEY, TIME_KEY};
use crate::index::inverted::CollectionIndex;
use crate::index::record_cache::RecordCache;
use crate::schema::schema::Schema;
use crate::storage::catalog::{temp_path, write_atomic, Catalog};
use crate::storage::cursor::{Cursor, CursorMode, CursorOp};
use crate::storage::freespace::{build_intervals, group_by_file, FreeSpaceCollection, Interval};
use crate::storage::layout::StorageLayout;

/// In-memory state of one collection.
pub struct CollectionState {
    pub db: String,
    pub name: String,
    pub index: CollectionIndex,
    pub cache: RecordCache,
}

impl CollectionState {
    pub fn new(db: &str, name: &str, schema: &Schema, cache_size: usize) -> Self {
        CollectionState {
            db: db.to_string(),
            name: name.to_string(),
            index: CollectionIndex::new(schema),
            cache: RecordCache::new(cache_size),
        }
    }
}

/// A slot touched by a pass and its body before the pass.
#[derive(Debug)]
struct Slot {
    line: usize,
    previous: Option<Record>,
}

/// Result of one cursor pass over one file. `output` is the rewritten
/// content for write and delete passes, `original` what the file held
/// before (`None` for a file the pass creates).
#[derive(Debug)]
struct Pass {
    path: PathBuf,
    slots: Vec<Slot>,
    output: Option<String>,
    original: Option<String>,
}

/// Free space and file list of a collection before an operation.
struct SpaceSnapshot {
    table: FreeSpaceCollection,
    files: Vec<String>,
}

/// Record CRUD over the files of one collection. Allocator, index and
/// cache changes are applied only after every file of an operation has
/// been rewritten.
pub struct RecordStore<'a> {
    layout: &'a StorageLayout,
    catalog: &'a mut Catalog,
    state: &'a mut CollectionState,
    line_limit: usize,
}

impl<'a> RecordStore<'a> {
    pub fn new(
        layout: &'a StorageLayout,
        catalog: &'a mut Catalog,
        state: &'a mut CollectionState,
        line_limit: usize,
    ) -> Self {
        RecordStore { layout, catalog, state, line_limit }
    }

    /// Store new records. IDs come back in input order.
    pub fn write(&mut self, records: Vec<Record>) -> Result<Vec<RecordId>> {
        let schema = self.schema()?;
        for record in &records {
            reject_system_fields(record)?;
            schema.validate_record(record)?;
        }

        let allocation = self.free_space()?.allocate(records.len(), self.line_limit, || {
            Uuid::new_v4().to_string()
        })?;
        let now = chrono::Utc::now().timestamp();

        let mut ids = Vec::with_capacity(records.len());
        let mut written = Vec::with_capacity(records.len());
        let mut passes = Vec::with_capacity(allocation.placements.len());
        for placement in &allocation.placements {
            let mut pending = BTreeMap::new();
            for (line, record) in placement.lines().zip(&records[placement.records.clone()]) {
                let id = RecordId::new(placement.file.clone(), line);
                let mut body = Record::new();
                body.insert(ID_KEY.to_string(), Value::String(id.to_string()));
                body.insert(TIME_KEY.to_string(), Value::from(now));
                body.extend(record.iter().map(|(k, v)| (k.clone(), v.clone())));
                pending.insert(line, body);
                ids.push(id);
            }

            let is_new = allocation.new_files.contains(&placement.file);
            let content = if is_new {
                "\n".repeat(self.line_limit)
            } else {
                self.read_file(&placement.file)?
            };
            let mut pass = self.run_pass(&placement.file, &content, CursorMode::Write, &placement.intervals, &pending)?;
            if is_new {
                pass.original = None;
            }
            if let Some(slot) = pass.slots.iter().find(|slot| slot.previous.is_some()) {
                return Err(Error::new(
                    ErrorKind::AllocationInvariantViolation,
                    format!("slot {}.{} is allocated but not blank", placement.file, slot.line),
                ));
            }
            passes.push(pass);
            written.extend(pending.into_values());
        }

        let snapshot = self.snapshot()?;
        let renamed = self.commit_files(&passes)?;
        self.save_space(snapshot, allocation.table, &allocation.new_files, &renamed)?;

        let (db, col) = (self.state.db.clone(), self.state.name.clone());
        for body in written {
            self.state.index.add(&body)?;
            self.state.cache.put(RecordId::of(&body)?, body);
        }
        debug!(db = %db, collection = %col, records = ids.len(), files = passes.len(), "wrote records");
        Ok(ids)
    }

    /// Bodies of `ids` in file, then block, then line order.
    pub fn read(&mut self, ids: &[RecordId]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(ids.len());
        for (file, lines) in group_by_file(ids) {
            records.extend(self.read_lines(&file, &lines)?);
        }
        Ok(records)
    }

    /// Blank the slots of `ids` and release them. Returns how many records
    /// were removed.
    pub fn delete(&mut self, ids: &[RecordId]) -> Result<usize> {
        let mut passes = Vec::new();
        let mut removed = Vec::new();
        for (file, lines) in group_by_file(ids) {
            self.check_lines(&file, &lines)?;
            let content = self.read_file(&file)?;
            let blocks = build_intervals(&lines);
            let pass = self.run_pass(&file, &content, CursorMode::Delete, &blocks, &BTreeMap::new())?;
            for slot in &pass.slots {
                match &slot.previous {
                    Some(body) => removed.push(body.clone()),
                    None => return Err(missing(&file, slot.line)),
                }
            }
            passes.push(pass);
        }
        if passes.is_empty() {
            return Ok(0);
        }

        let table = self.free_space()?.deallocate(ids)?;
        let snapshot = self.snapshot()?;
        let renamed = self.commit_files(&passes)?;
        self.save_space(snapshot, table, &[], &renamed)?;

        let (db, col) = (self.state.db.clone(), self.state.name.clone());
        for body in &removed {
            self.state.index.delete(body)?;
            self.state.cache.evict(&RecordId::of(body)?);
        }
        debug!(db = %db, collection = %col, records = removed.len(), "deleted records");
        Ok(removed.len())
    }

    /// Merge `fields` into each record of `ids` and rewrite it in place.
    /// Returns the merged bodies.
    pub fn update(&mut self, ids: &[RecordId], fields: &Record) -> Result<Vec<Record>> {
        reject_system_fields(fields)?;
        self.rewrite(ids, |old| {
            let mut merged = old.clone();
            merged.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(merged)
        })
    }

    /// Replace whole records in place. Each record names its slot with
    /// `_id`; the stored `_time` is kept and a supplied one is ignored.
    pub fn overwrite(&mut self, records: Vec<Record>) -> Result<Vec<Record>> {
        let mut bodies = BTreeMap::new();
        for mut record in records {
            let id = RecordId::of(&record)
                .map_err(|e| Error::invalid(format!("overwrite needs a record id: {}", e)))?;
            record.remove(ID_KEY);
            record.remove(TIME_KEY);
            if bodies.insert(id.clone(), record).is_some() {
                return Err(Error::invalid(format!("record {} is overwritten twice", id)));
            }
        }
        let ids: Vec<RecordId> = bodies.keys().cloned().collect();
        self.rewrite(&ids, |old| {
            let id = RecordId::of(old)?;
            let body = bodies.get(&id).ok_or_else(|| {
                Error::new(ErrorKind::Internal, format!("no replacement body for {}", id))
            })?;
            let mut replaced: Record = old
                .iter()
                .filter(|(key, _)| is_system_key(key))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            replaced.extend(body.iter().map(|(k, v)| (k.clone(), v.clone())));
            Ok(replaced)
        })
    }

    /// Rewrite each record of `ids` in place with the body `rebuild` makes
    /// from the stored one. Every new body is validated before any file
    /// changes.
    fn rewrite<F>(&mut self, ids: &[RecordId], mut rebuild: F) -> Result<Vec<Record>>
    where
        F: FnMut(&Record) -> Result<Record>,
    {
        let schema = self.schema()?;

        let mut passes = Vec::new();
        let mut changes = Vec::new();
        for (file, lines) in group_by_file(ids) {
            let current = self.read_lines(&file, &lines)?;
            let mut pending = BTreeMap::new();
            for (line, old) in lines.iter().zip(current) {
                let new = rebuild(&old)?;
                schema.validate_record(&new)?;
                pending.insert(*line, new.clone());
                changes.push((old, new));
            }

            let content = self.read_file(&file)?;
            let blocks = build_intervals(&lines);
            passes.push(self.run_pass(&file, &content, CursorMode::Write, &blocks, &pending)?);
        }

        self.commit_files(&passes)?;

        let mut rewritten = Vec::with_capacity(changes.len());
        for (old, new) in changes {
            self.state.index.replace(&old, &new)?;
            self.state.cache.put(RecordId::of(&new)?, new.clone());
            rewritten.push(new);
        }
        debug!(db = %self.state.db, collection = %self.state.name, records = rewritten.len(), "rewrote records");
        Ok(rewritten)
    }

    /// Index every occupied slot of every file. Used when opening an engine.
    pub fn rebuild_index(&mut self) -> Result<usize> {
        let files = self.catalog.files(&self.state.db, &self.state.name)?.to_vec();
        let mut count = 0;
        for file in files {
            let content = self.read_file(&file)?;
            let all = [Interval(0, self.line_limit - 1)];
            let pass = self.run_pass(&file, &content, CursorMode::Read, &all, &BTreeMap::new())?;
            for body in pass.slots.into_iter().filter_map(|slot| slot.previous) {
                self.state.index.add(&body)?;
                count += 1;
            }
        }
        debug!(db = %self.state.db, collection = %self.state.name, records = count, "rebuilt index");
        Ok(count)
    }

    fn read_lines(&mut self, file: &str, lines: &[usize]) -> Result<Vec<Record>> {
        self.check_lines(file, lines)?;
        if let Some(cached) = self.state.cache.get_file(file, lines) {
            return Ok(cached);
        }

        let content = self.read_file(file)?;
        let blocks = build_intervals(lines);
        let pass = self.run_pass(file, &content, CursorMode::Read, &blocks, &BTreeMap::new())?;
        let mut records = Vec::with_capacity(pass.slots.len());
        for slot in pass.slots {
            let body = slot.previous.ok_or_else(|| missing(file, slot.line))?;
            self.state.cache.put(RecordId::new(file, slot.line), body.clone());
            records.push(body);
        }
        Ok(records)
    }

    fn check_lines(&self, file: &str, lines: &[usize]) -> Result<()> {
        if !self.catalog.has_file(&self.state.db, &self.state.name, file) {
            return Err(Error::not_found(format!("record file {} does not exist", file)));
        }
        if let Some(line) = lines.iter().find(|line| **line >= self.line_limit) {
            return Err(missing(file, *line));
        }
        Ok(())
    }

    fn run_pass(
        &self,
        file: &str,
        content: &str,
        mode: CursorMode,
        blocks: &[Interval],
        pending: &BTreeMap<usize, Record>,
    ) -> Result<Pass> {
        let path = self.layout.record_file_path(&self.state.db, &self.state.name, file);
        let Some((first, rest)) = blocks.split_first() else {
            return Ok(Pass { path, slots: Vec::new(), output: None, original: None });
        };
        let mut following = rest.iter();
        let mut cursor = Cursor::new(mode, *first, rest.len());
        let mut slots = Vec::new();
        let mut output = String::with_capacity(content.len());
        let mut done = false;

        for line in content.lines() {
            if done {
                push_line(&mut output, line);
                continue;
            }
            loop {
                let index = (cursor.index() + 1) as usize;
                match cursor.next(line, pending.get(&index))? {
                    CursorOp::Read(previous) => {
                        slots.push(Slot { line: index, previous });
                        push_line(&mut output, line);
                    }
                    CursorOp::Write { previous, line: encoded }
                    | CursorOp::Delete { previous, line: encoded } => {
                        slots.push(Slot { line: index, previous });
                        push_line(&mut output, &encoded);
                    }
                    CursorOp::Next { terminal: false } => {
                        if let Some(block) = following.next() {
                            cursor.advance(*block);
                        }
                        continue;
                    }
                    CursorOp::Next { terminal: true } => {
                        done = true;
                        push_line(&mut output, line);
                    }
                    CursorOp::Jump => push_line(&mut output, line),
                }
                break;
            }
        }

        let (_, upper) = cursor.bounds();
        if !done && cursor.index() < upper {
            return Err(Error::decode(format!(
                "record file {} ends at line {} before block end {}",
                file,
                cursor.index() + 1,
                upper
            )));
        }

        let (output, original) = match mode {
            CursorMode::Read => (None, None),
            CursorMode::Write | CursorMode::Delete => (Some(output), Some(content.to_string())),
        };
        debug!(file = %file, mode = ?mode, blocks = blocks.len(), slots = slots.len(), "cursor pass");
        Ok(Pass { path, slots, output, original })
    }

    /// Stage every rewritten file next to its target, then rename them all
    /// into place. Nothing is renamed unless every stage write succeeded,
    /// and a failed rename restores the files renamed before it. Returns
    /// the passes whose files were replaced.
    fn commit_files<'p>(&self, passes: &'p [Pass]) -> Result<Vec<&'p Pass>> {
        let dir = self.layout.collection_dir(&self.state.db, &self.state.name);
        fs::create_dir_all(&dir)?;

        let mut staged = Vec::new();
        for pass in passes {
            let Some(output) = &pass.output else {
                continue;
            };
            let tmp = temp_path(&pass.path);
            if let Err(e) = fs::write(&tmp, output) {
                let _ = fs::remove_file(&tmp);
                for (tmp, _) in &staged {
                    let _ = fs::remove_file(tmp);
                }
                return Err(e.into());
            }
            staged.push((tmp, pass));
        }

        let mut renamed = Vec::with_capacity(staged.len());
        let mut staged = staged.into_iter();
        while let Some((tmp, pass)) = staged.next() {
            if let Err(e) = fs::rename(&tmp, &pass.path) {
                let _ = fs::remove_file(&tmp);
                for (tmp, _) in staged.by_ref() {
                    let _ = fs::remove_file(tmp);
                }
                restore_files(&renamed);
                return Err(e.into());
            }
            renamed.push(pass);
        }
        Ok(renamed)
    }

    fn snapshot(&self) -> Result<SpaceSnapshot> {
        Ok(SpaceSnapshot {
            table: self.free_space()?.clone(),
            files: self.catalog.files(&self.state.db, &self.state.name)?.to_vec(),
        })
    }

    /// Persist the allocator table and new files of a committed pass. If
    /// the catalog cannot be saved, the catalog and the renamed files are
    /// put back as they were before the operation.
    fn save_space(
        &mut self,
        snapshot: SpaceSnapshot,
        table: FreeSpaceCollection,
        new_files: &[String],
        renamed: &[&Pass],
    ) -> Result<()> {
        let (db, col) = (self.state.db.clone(), self.state.name.clone());
        self.catalog.set_free_space(&db, &col, table);
        self.catalog.add_files(&db, &col, new_files);
        let Err(e) = self.catalog.save_records() else {
            return Ok(());
        };

        self.catalog.set_free_space(&db, &col, snapshot.table);
        self.catalog.set_files(&db, &col, snapshot.files);
        if let Err(resave) = self.catalog.save_records() {
            warn!(db = %db, collection = %col, error = %resave, "could not restore catalog tables");
        }
        restore_files(renamed);
        Err(e)
    }

    fn read_file(&self, file: &str) -> Result<String> {
        let path = self.layout.record_file_path(&self.state.db, &self.state.name, file);
        Ok(fs::read_to_string(path)?)
    }

    fn schema(&self) -> Result<Schema> {
        Ok(self.catalog.schema(&self.state.db, &self.state.name)?.clone())
    }

    fn free_space(&self) -> Result<&FreeSpaceCollection> {
        self.catalog.free_space(&self.state.db, &self.state.name)
    }
}

/// Put renamed files back to their content before the pass.
fn restore_files(renamed: &[&Pass]) {
    for pass in renamed.iter().rev() {
        let restored = match &pass.original {
            Some(content) => write_atomic(&pass.path, content.as_bytes()),
            None => fs::remove_file(&pass.path).map_err(Error::from),
        };
        if let Err(e) = restored {
            warn!(path = %pass.path.display(), error = %e, "could not restore record file");
        }
    }
}

fn push_line(output: &mut String, line: &str) {
    output.push_str(line);
    output.push('\n');
}

fn missing(file: &str, line: usize) -> Error {
    Error::not_found(format!("record {}.{} does not exist", file, line))
}

fn reject_system_fields(record: &Record) -> Result<()> {
    match record.keys().find(|key| is_system_key(key)) {
        Some(key) => Err(Error::schema(format!("field {} is managed by the engine", key))),
        None => Ok(()),
    }
}
