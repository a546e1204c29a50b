use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::auth::{Permission, Scope};
use crate::core::error::{Error, Result};
use crate::core::types::{Record, RecordId};
use crate::schema::schema::Schema;

/// Comparison operators of a filter leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "!=")]
    Ne,
}

impl CompareOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Eq => "=",
            CompareOp::Lte => "<=",
            CompareOp::Lt => "<",
            CompareOp::Ne => "!=",
        }
    }

    /// Whether `ord` (stored value against literal) satisfies the operator.
    pub fn holds(&self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            CompareOp::Gt => ord == Greater,
            CompareOp::Gte => ord != Less,
            CompareOp::Eq => ord == Equal,
            CompareOp::Lte => ord != Greater,
            CompareOp::Lt => ord == Less,
            CompareOp::Ne => ord != Equal,
        }
    }
}

impl FromStr for CompareOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            ">" | "$gt" => Ok(CompareOp::Gt),
            ">=" | "$gte" => Ok(CompareOp::Gte),
            "=" | "==" | "$eq" => Ok(CompareOp::Eq),
            "<=" | "$lte" => Ok(CompareOp::Lte),
            "<" | "$lt" => Ok(CompareOp::Lt),
            "!=" | "$ne" => Ok(CompareOp::Ne),
            other => Err(Error::invalid(format!("unknown comparison operator: {}", other))),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Boolean filter tree. Leaves compare a dotted key path with a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterNode {
    Compare { key: String, op: CompareOp, value: Value },
    And(Box<FilterNode>, Box<FilterNode>),
    Or(Box<FilterNode>, Box<FilterNode>),
    Xor(Box<FilterNode>, Box<FilterNode>),
    Not(Box<FilterNode>),
}

impl FilterNode {
    pub fn compare(key: impl Into<String>, op: CompareOp, value: Value) -> Self {
        FilterNode::Compare { key: key.into(), op, value }
    }

    pub fn eq(key: impl Into<String>, value: Value) -> Self {
        FilterNode::compare(key, CompareOp::Eq, value)
    }

    pub fn and(left: FilterNode, right: FilterNode) -> Self {
        FilterNode::And(Box::new(left), Box::new(right))
    }

    pub fn or(left: FilterNode, right: FilterNode) -> Self {
        FilterNode::Or(Box::new(left), Box::new(right))
    }

    pub fn xor(left: FilterNode, right: FilterNode) -> Self {
        FilterNode::Xor(Box::new(left), Box::new(right))
    }

    pub fn not(inner: FilterNode) -> Self {
        FilterNode::Not(Box::new(inner))
    }
}

/// Sort key for read results
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub key: String,
    #[serde(default)]
    pub descending: bool,
}

impl Order {
    pub fn asc(key: impl Into<String>) -> Self {
        Order { key: key.into(), descending: false }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Order { key: key.into(), descending: true }
    }
}

/// Records a mutation applies to. A `Filter` of `None` selects every record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Ids(Vec<RecordId>),
    Filter(Option<FilterNode>),
}

/// A parsed request, ready to execute against an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Get {
        db: String,
        collection: String,
        #[serde(default)]
        filter: Option<FilterNode>,
        #[serde(default)]
        order: Option<Order>,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        fields: Option<Vec<String>>,
    },
    Count {
        db: String,
        collection: String,
        #[serde(default)]
        filter: Option<FilterNode>,
    },
    Insert {
        db: String,
        collection: String,
        records: Vec<Record>,
    },
    Update {
        db: String,
        collection: String,
        target: Target,
        fields: Record,
    },
    /// Replace whole records; each one carries the `_id` it replaces.
    Overwrite {
        db: String,
        collection: String,
        records: Vec<Record>,
    },
    Delete {
        db: String,
        collection: String,
        target: Target,
    },
    CreateDatabase {
        db: String,
    },
    DeleteDatabase {
        db: String,
    },
    CreateCollection {
        db: String,
        collection: String,
        schema: Schema,
    },
    ModifyCollection {
        db: String,
        collection: String,
        schema: Schema,
    },
    DeleteCollection {
        db: String,
        collection: String,
    },
}

impl Action {
    pub fn scope(&self) -> Scope {
        match self {
            Action::Get { db, collection, .. }
            | Action::Count { db, collection, .. }
            | Action::Insert { db, collection, .. }
            | Action::Update { db, collection, .. }
            | Action::Overwrite { db, collection, .. }
            | Action::Delete { db, collection, .. }
            | Action::CreateCollection { db, collection, .. }
            | Action::ModifyCollection { db, collection, .. }
            | Action::DeleteCollection { db, collection } => Scope::collection(db.clone(), collection.clone()),
            Action::CreateDatabase { db } | Action::DeleteDatabase { db } => Scope::database(db.clone()),
        }
    }

    pub fn permission(&self) -> Permission {
        match self {
            Action::Get { .. } | Action::Count { .. } => Permission::Read,
            Action::Insert { .. } => Permission::Write,
            Action::Update { .. } | Action::Overwrite { .. } | Action::Delete { .. } => {
                Permission::Update
            }
            Action::CreateDatabase { .. }
            | Action::DeleteDatabase { .. }
            | Action::CreateCollection { .. }
            | Action::ModifyCollection { .. }
            | Action::DeleteCollection { .. } => Permission::Admin,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Action::Get { .. } => "get",
            Action::Count { .. } => "count",
            Action::Insert { .. } => "insert",
            Action::Update { .. } => "update",
            Action::Overwrite { .. } => "overwrite",
            Action::Delete { .. } => "delete",
            Action::CreateDatabase { .. } => "create_database",
            Action::DeleteDatabase { .. } => "delete_database",
            Action::CreateCollection { .. } => "create_collection",
            Action::ModifyCollection { .. } => "modify_collection",
            Action::DeleteCollection { .. } => "delete_collection",
        }
    }
}

/// Outcome of an executed action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Records(Vec<Record>),
    Ids(Vec<RecordId>),
    Count(usize),
    Done,
}
