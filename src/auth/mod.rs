use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::storage::catalog::{read_table, write_json_atomic};

/// Access levels. Each level includes the ones below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Update,
    Admin,
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "update" => Ok(Permission::Update),
            "admin" => Ok(Permission::Admin),
            other => Err(Error::invalid(format!("unknown permission: {}", other))),
        }
    }
}

/// What a request touches: a whole database or one collection in it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub db: String,
    pub collection: Option<String>,
}

impl Scope {
    pub fn database(db: impl Into<String>) -> Self {
        Scope { db: db.into(), collection: None }
    }

    pub fn collection(db: impl Into<String>, collection: impl Into<String>) -> Self {
        Scope { db: db.into(), collection: Some(collection.into()) }
    }

    /// The database-level scope enclosing this one.
    pub fn parent(&self) -> Option<Scope> {
        self.collection.as_ref().map(|_| Scope::database(self.db.clone()))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.collection {
            Some(col) => write!(f, "{}.{}", self.db, col),
            None => f.write_str(&self.db),
        }
    }
}

pub type Principal = String;

/// Gate called before any request reaches the store.
pub trait Authorizer: Send {
    fn authorize(&self, principal: &str, permission: Permission, scope: &Scope) -> bool;
}

pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _principal: &str, _permission: Permission, _scope: &Scope) -> bool {
        true
    }
}

/// One persisted grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub principal: Principal,
    pub permission: Permission,
    pub scope: Scope,
}

/// Per-scope grants. A grant on a database covers its collections.
#[derive(Debug, Clone, Default)]
pub struct GrantTable {
    grants: HashMap<Scope, HashMap<Principal, Permission>>,
}

impl GrantTable {
    pub fn new() -> Self {
        GrantTable::default()
    }

    pub fn grant(&mut self, principal: &str, permission: Permission, scope: Scope) {
        self.grants
            .entry(scope)
            .or_default()
            .insert(principal.to_string(), permission);
    }

    pub fn revoke(&mut self, principal: &str, scope: &Scope) -> bool {
        self.grants
            .get_mut(scope)
            .is_some_and(|principals| principals.remove(principal).is_some())
    }

    /// Grants saved at `path`. A missing file is an empty table.
    pub fn load(path: &Path) -> Result<Self> {
        let saved: Vec<Grant> = read_table(path)?;
        let mut table = GrantTable::new();
        for grant in saved {
            table.grant(&grant.principal, grant.permission, grant.scope);
        }
        Ok(table)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, &self.grants())
    }

    /// Every grant, ordered by scope then principal.
    pub fn grants(&self) -> Vec<Grant> {
        let mut all: Vec<Grant> = self
            .grants
            .iter()
            .flat_map(|(scope, principals)| {
                principals.iter().map(move |(principal, permission)| Grant {
                    principal: principal.clone(),
                    permission: *permission,
                    scope: scope.clone(),
                })
            })
            .collect();
        all.sort_by(|a, b| (&a.scope, &a.principal).cmp(&(&b.scope, &b.principal)));
        all
    }

    fn level(&self, principal: &str, scope: &Scope) -> Option<Permission> {
        self.grants.get(scope)?.get(principal).copied()
    }
}

impl Authorizer for GrantTable {
    fn authorize(&self, principal: &str, permission: Permission, scope: &Scope) -> bool {
        let direct = self.level(principal, scope);
        let inherited = scope.parent().and_then(|db| self.level(principal, &db));
        direct.max(inherited).is_some_and(|level| level >= permission)
    }
}

/// Shared grants, editable while a serializer worker holds a clone.
impl<A: Authorizer + Sync> Authorizer for Arc<RwLock<A>> {
    fn authorize(&self, principal: &str, permission: Permission, scope: &Scope) -> bool {
        self.read().authorize(principal, permission, scope)
    }
}
