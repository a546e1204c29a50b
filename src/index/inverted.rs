use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use serde_json::Value;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{is_system_key, Record, RecordId};
use crate::index::posting::PostingList;
use crate::schema::schema::{ScalarType, Schema};

/// Float wrapper with a total order so it can key a `BTreeMap`.
#[derive(Debug, Clone, Copy)]
pub struct FloatKey(pub f64);

impl PartialEq for FloatKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl Eq for FloatKey {}

impl PartialOrd for FloatKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Typed value of one index bucket.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexKey {
    Bool(bool),
    Int(i64),
    Float(FloatKey),
    Str(String),
}

impl IndexKey {
    /// Key for a stored value that already passed schema validation.
    pub fn from_value(ty: ScalarType, value: &Value) -> Option<IndexKey> {
        match ty {
            ScalarType::Bool => value.as_bool().map(IndexKey::Bool),
            ScalarType::Int | ScalarType::Byte => value.as_i64().map(IndexKey::Int),
            ScalarType::Float => value.as_f64().map(|f| IndexKey::Float(FloatKey(f))),
            ScalarType::String => value.as_str().map(|s| IndexKey::Str(s.to_string())),
            ScalarType::Any => None,
        }
    }

    /// Coerce a filter literal to the key type of a `ty` leaf. `Ok(None)`
    /// is a well-typed literal that no stored value can equal, such as
    /// `5.5` against an integer field.
    pub fn coerce(ty: ScalarType, literal: &Value) -> Result<Option<IndexKey>> {
        let key = match (ty, literal) {
            (ScalarType::Bool, Value::Bool(b)) => Some(Some(IndexKey::Bool(*b))),
            (ScalarType::Bool, Value::String(s)) => s.parse().ok().map(|b| Some(IndexKey::Bool(b))),
            (ScalarType::Int | ScalarType::Byte, Value::Number(n)) => match n.as_i64() {
                Some(i) => Some(Some(IndexKey::Int(i))),
                None => n.as_f64().map(integral),
            },
            (ScalarType::Int | ScalarType::Byte, Value::String(s)) => {
                let s = s.trim();
                match s.parse::<i64>() {
                    Ok(i) => Some(Some(IndexKey::Int(i))),
                    Err(_) => s.parse::<f64>().ok().filter(|f| f.is_finite()).map(integral),
                }
            }
            (ScalarType::Float, Value::Number(n)) => n.as_f64().map(|f| Some(IndexKey::Float(FloatKey(f)))),
            (ScalarType::Float, Value::String(s)) => {
                s.trim().parse().ok().map(|f| Some(IndexKey::Float(FloatKey(f))))
            }
            (ScalarType::String, Value::String(s)) => Some(Some(IndexKey::Str(s.clone()))),
            _ => None,
        };
        key.ok_or_else(|| Error::schema(format!("literal {} cannot be compared with a {} field", literal, ty)))
    }

    /// Numeric keys normalized to a double.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            IndexKey::Int(i) => Some(*i as f64),
            IndexKey::Float(f) => Some(f.0),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            IndexKey::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Integer key for a whole number in `i64` range.
fn integral(f: f64) -> Option<IndexKey> {
    let in_range = f >= i64::MIN as f64 && f < i64::MAX as f64;
    (f.fract() == 0.0 && in_range).then(|| IndexKey::Int(f as i64))
}

pub type ValueMap = BTreeMap<IndexKey, PostingList>;

/// Index shaped like the collection schema. Arrays have no node of their
/// own: their elements fold into the element type's node.
#[derive(Debug, Clone)]
pub enum IndexNode {
    Leaf { ty: ScalarType, values: ValueMap },
    Object(BTreeMap<String, IndexNode>),
    Unindexed,
}

impl IndexNode {
    pub fn build(schema: &Schema) -> IndexNode {
        match schema {
            Schema::Scalar(ScalarType::Any) => IndexNode::Unindexed,
            Schema::Scalar(ty) => IndexNode::Leaf { ty: *ty, values: ValueMap::new() },
            Schema::Object(fields) => IndexNode::Object(
                fields.iter().map(|(name, child)| (name.clone(), IndexNode::build(child))).collect(),
            ),
            Schema::Array(element) => IndexNode::build(element),
        }
    }

    fn add(&mut self, value: &Value, id: &RecordId) {
        if let Value::Array(items) = value {
            if !matches!(self, IndexNode::Unindexed) {
                for item in items {
                    self.add(item, id);
                }
            }
            return;
        }
        match self {
            IndexNode::Leaf { ty, values } => {
                if let Some(key) = IndexKey::from_value(*ty, value) {
                    values.entry(key).or_default().insert(id.clone());
                }
            }
            IndexNode::Object(fields) => {
                if let Value::Object(map) = value {
                    for (name, child) in map {
                        if let Some(node) = fields.get_mut(name) {
                            node.add(child, id);
                        }
                    }
                }
            }
            IndexNode::Unindexed => {}
        }
    }

    fn remove(&mut self, value: &Value, id: &RecordId) {
        if let Value::Array(items) = value {
            if !matches!(self, IndexNode::Unindexed) {
                for item in items {
                    self.remove(item, id);
                }
            }
            return;
        }
        match self {
            IndexNode::Leaf { ty, values } => {
                if let Some(key) = IndexKey::from_value(*ty, value) {
                    if let Some(posting) = values.get_mut(&key) {
                        posting.remove(id);
                        if posting.is_empty() {
                            values.remove(&key);
                        }
                    }
                }
            }
            IndexNode::Object(fields) => {
                if let Value::Object(map) = value {
                    for (name, child) in map {
                        if let Some(node) = fields.get_mut(name) {
                            node.remove(child, id);
                        }
                    }
                }
            }
            IndexNode::Unindexed => {}
        }
    }

    fn leaf(&self, key_path: &str) -> Option<(ScalarType, &ValueMap)> {
        let mut node = self;
        for part in key_path.split('.') {
            match node {
                IndexNode::Object(fields) => node = fields.get(part)?,
                _ => return None,
            }
        }
        match node {
            IndexNode::Leaf { ty, values } => Some((*ty, values)),
            _ => None,
        }
    }
}

/// Inverted index of one collection.
#[derive(Debug, Clone)]
pub struct CollectionIndex {
    root: IndexNode,
    searchable: BTreeSet<String>,
    /// Live IDs, each with its insertion sequence number.
    live: BTreeMap<RecordId, u64>,
    order: BTreeMap<u64, RecordId>,
    next_seq: u64,
}

impl CollectionIndex {
    pub fn new(schema: &Schema) -> Self {
        CollectionIndex {
            root: IndexNode::build(schema),
            searchable: schema.searchable_keys().into_iter().collect(),
            live: BTreeMap::new(),
            order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    pub fn add(&mut self, record: &Record) -> Result<()> {
        let id = RecordId::of(record)?;
        self.index_values(record, &id, true);
        if !self.live.contains_key(&id) {
            self.live.insert(id.clone(), self.next_seq);
            self.order.insert(self.next_seq, id);
            self.next_seq += 1;
        }
        Ok(())
    }

    /// Remove `record` from every bucket it populates. `record` must be
    /// the body that was indexed, not a newer one.
    pub fn delete(&mut self, record: &Record) -> Result<()> {
        let id = RecordId::of(record)?;
        self.index_values(record, &id, false);
        if let Some(seq) = self.live.remove(&id) {
            self.order.remove(&seq);
        }
        Ok(())
    }

    /// Swap the indexed body of one record. Its place in insertion order
    /// is kept.
    pub fn replace(&mut self, old: &Record, new: &Record) -> Result<()> {
        let id = RecordId::of(old)?;
        if RecordId::of(new)? != id {
            return Err(Error::new(
                ErrorKind::Internal,
                format!("record {} cannot be replaced by another id", id),
            ));
        }
        self.index_values(old, &id, false);
        self.index_values(new, &id, true);
        Ok(())
    }

    fn index_values(&mut self, record: &Record, id: &RecordId, add: bool) {
        let IndexNode::Object(fields) = &mut self.root else {
            return;
        };
        for (key, value) in record {
            if is_system_key(key) {
                continue;
            }
            if let Some(node) = fields.get_mut(key) {
                if add {
                    node.add(value, id);
                } else {
                    node.remove(value, id);
                }
            }
        }
    }

    pub fn is_searchable(&self, key_path: &str) -> bool {
        self.searchable.contains(key_path)
    }

    pub fn searchable_keys(&self) -> impl Iterator<Item = &String> {
        self.searchable.iter()
    }

    pub fn lookup_exact(&self, key_path: &str, literal: &Value) -> Result<PostingList> {
        let (ty, values) = self.lookup_all(key_path)?;
        match IndexKey::coerce(ty, literal)? {
            Some(key) => Ok(values.get(&key).cloned().unwrap_or_default()),
            None => Ok(PostingList::default()),
        }
    }

    /// Every distinct value of a leaf with its bucket.
    pub fn lookup_all(&self, key_path: &str) -> Result<(ScalarType, &ValueMap)> {
        if !self.is_searchable(key_path) {
            return Err(Error::new(
                ErrorKind::NotSearchable,
                format!("key {} is not searchable", key_path),
            ));
        }
        self.root.leaf(key_path).ok_or_else(|| {
            Error::new(ErrorKind::Internal, format!("searchable key {} has no index leaf", key_path))
        })
    }

    /// Live IDs in insertion order.
    pub fn all_ids(&self) -> impl Iterator<Item = &RecordId> {
        self.order.values()
    }

    pub fn all_sorted(&self) -> PostingList {
        PostingList { ids: self.live.keys().cloned().collect() }
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.live.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}
