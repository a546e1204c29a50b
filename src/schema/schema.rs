use std::collections::BTreeMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::core::error::{Error, Result};
use crate::core::types::{is_system_key, Record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    String,
    Int,
    Float,
    Bool,
    Byte,
    Any,
}

impl ScalarType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" => Some(ScalarType::String),
            "int" => Some(ScalarType::Int),
            "float" => Some(ScalarType::Float),
            "bool" => Some(ScalarType::Bool),
            "byte" => Some(ScalarType::Byte),
            "any" => Some(ScalarType::Any),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Int => "int",
            ScalarType::Float => "float",
            ScalarType::Bool => "bool",
            ScalarType::Byte => "byte",
            ScalarType::Any => "any",
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ScalarType::Any => true,
            ScalarType::String => value.is_string(),
            ScalarType::Int => value.is_i64(),
            ScalarType::Float => value.is_number(),
            ScalarType::Bool => value.is_boolean(),
            ScalarType::Byte => value.as_u64().is_some_and(|b| b <= u8::MAX as u64),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type descriptor of a collection. In JSON a scalar is its type name,
/// an object maps field names to schemas, and an array is a one-element
/// list holding the element schema: `{"tags": ["string"]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum Schema {
    Scalar(ScalarType),
    Object(BTreeMap<String, Schema>),
    Array(Box<Schema>),
}

impl Schema {
    /// Parse a schema, checking it against the grammar.
    pub fn parse(value: &Value) -> Result<Self> {
        parse_at(".", value)
    }

    /// Parse a collection schema, which must be an object at the top.
    pub fn collection(value: &Value) -> Result<Self> {
        match Schema::parse(value)? {
            schema @ Schema::Object(_) => Ok(schema),
            other => Err(Error::schema(format!(
                "collection schema must be an object, got {}",
                other.to_value()
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Schema::Scalar(t) => Value::String(t.name().to_string()),
            Schema::Object(fields) => Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), v.to_value())).collect(),
            ),
            Schema::Array(element) => Value::Array(vec![element.to_value()]),
        }
    }

    /// Check a whole record. System fields are skipped.
    pub fn validate_record(&self, record: &Record) -> Result<()> {
        let Schema::Object(fields) = self else {
            return Err(Error::schema("collection schema is not an object"));
        };
        for (key, value) in record {
            if is_system_key(key) {
                continue;
            }
            let path = format!(".{}", key);
            let field = fields
                .get(key)
                .ok_or_else(|| Error::schema(format!("field {} is not in the schema", path)))?;
            field.validate_value(&path, value)?;
        }
        Ok(())
    }

    fn validate_value(&self, path: &str, value: &Value) -> Result<()> {
        match self {
            Schema::Scalar(t) => {
                if t.accepts(value) {
                    Ok(())
                } else {
                    Err(Error::schema(format!("value at {} does not match type {}: {}", path, t, value)))
                }
            }
            Schema::Object(fields) => {
                let Value::Object(map) = value else {
                    return Err(Error::schema(format!("value at {} does not match type dict", path)));
                };
                for (key, child) in map {
                    let child_path = format!("{}.{}", path, key);
                    let schema = fields
                        .get(key)
                        .ok_or_else(|| Error::schema(format!("field {} is not in the schema", child_path)))?;
                    schema.validate_value(&child_path, child)?;
                }
                Ok(())
            }
            Schema::Array(element) => {
                let Value::Array(items) = value else {
                    return Err(Error::schema(format!("value at {} does not match type list", path)));
                };
                for (idx, item) in items.iter().enumerate() {
                    element.validate_value(&format!("{}[{}]", path, idx), item)?;
                }
                Ok(())
            }
        }
    }

    /// Scalar type at a dotted key path; arrays are transparent.
    pub fn scalar_at(&self, key_path: &str) -> Option<ScalarType> {
        let mut node = self;
        for part in key_path.split('.') {
            node = node.unwrap_arrays();
            match node {
                Schema::Object(fields) => node = fields.get(part)?,
                _ => return None,
            }
        }
        match node.unwrap_arrays() {
            Schema::Scalar(t) => Some(*t),
            _ => None,
        }
    }

    /// Dotted paths of every indexable leaf (scalar and not `any`).
    pub fn searchable_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_keys(self, "", &mut keys);
        keys
    }

    fn unwrap_arrays(&self) -> &Schema {
        let mut node = self;
        while let Schema::Array(element) = node {
            node = element;
        }
        node
    }
}

fn collect_keys(schema: &Schema, prefix: &str, keys: &mut Vec<String>) {
    match schema {
        Schema::Scalar(ScalarType::Any) => {}
        Schema::Scalar(_) => {
            if !prefix.is_empty() {
                keys.push(prefix.to_string());
            }
        }
        Schema::Object(fields) => {
            for (name, child) in fields {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{}.{}", prefix, name)
                };
                collect_keys(child, &path, keys);
            }
        }
        Schema::Array(element) => collect_keys(element, prefix, keys),
    }
}

fn parse_at(path: &str, value: &Value) -> Result<Schema> {
    match value {
        Value::String(name) => ScalarType::parse(name)
            .map(Schema::Scalar)
            .ok_or_else(|| Error::schema(format!("invalid type at {}: {}", path, name))),
        Value::Object(fields) => {
            let mut out = BTreeMap::new();
            for (name, child) in fields {
                if name.is_empty() || name.contains('.') {
                    return Err(Error::schema(format!("invalid field name at {}: {:?}", path, name)));
                }
                if is_system_key(name) {
                    return Err(Error::schema(format!("field name {} is reserved", name)));
                }
                let child_path = if path == "." {
                    format!(".{}", name)
                } else {
                    format!("{}.{}", path, name)
                };
                out.insert(name.clone(), parse_at(&child_path, child)?);
            }
            Ok(Schema::Object(out))
        }
        Value::Array(items) => {
            if items.len() != 1 {
                return Err(Error::schema(format!(
                    "invalid list definition at {}: list must contain exactly one element representing its type",
                    path
                )));
            }
            Ok(Schema::Array(Box::new(parse_at(&format!("{}[0]", path), &items[0])?)))
        }
        other => Err(Error::schema(format!("value at {} is not a valid schema: {}", path, other))),
    }
}

impl TryFrom<Value> for Schema {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        Schema::parse(&value)
    }
}

impl From<Schema> for Value {
    fn from(schema: Schema) -> Self {
        schema.to_value()
    }
}
