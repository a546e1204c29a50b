use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use crate::core::error::{Error, Result};

/// Field holding a record's own ID.
pub const ID_KEY: &str = "_id";
/// Field holding the Unix time of a record's first write.
pub const TIME_KEY: &str = "_time";

pub const SYSTEM_KEYS: [&str; 2] = [ID_KEY, TIME_KEY];

/// A decoded record line.
pub type Record = Map<String, Value>;

pub fn is_system_key(key: &str) -> bool {
    SYSTEM_KEYS.contains(&key)
}

/// `<fileKey>.<lineIndex>`. Orders by file key, then numerically by line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordId {
    pub file: String,
    pub line: usize,
}

impl RecordId {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        RecordId { file: file.into(), line }
    }

    /// Reads the `_id` field of a record.
    pub fn of(record: &Record) -> Result<Self> {
        match record.get(ID_KEY) {
            Some(Value::String(id)) => id.parse(),
            Some(other) => Err(Error::decode(format!("record id is not a string: {}", other))),
            None => Err(Error::decode("record has no id")),
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.file, self.line)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (file, line) = s
            .rsplit_once('.')
            .ok_or_else(|| Error::invalid(format!("malformed record id: {}", s)))?;
        if file.is_empty() {
            return Err(Error::invalid(format!("malformed record id: {}", s)));
        }
        let line = line
            .parse()
            .map_err(|_| Error::invalid(format!("malformed line index in record id: {}", s)))?;
        Ok(RecordId::new(file, line))
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_uuid_file_keys() {
        let id: RecordId = "0b6f5d4e-1c2a-4f7e-9d11-3a5c7e9b2f10.12".parse().unwrap();
        assert_eq!(id.file, "0b6f5d4e-1c2a-4f7e-9d11-3a5c7e9b2f10");
        assert_eq!(id.line, 12);
        assert_eq!(id.to_string(), "0b6f5d4e-1c2a-4f7e-9d11-3a5c7e9b2f10.12");
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!("nodot".parse::<RecordId>().is_err());
        assert!(".3".parse::<RecordId>().is_err());
        assert!("file.x".parse::<RecordId>().is_err());
    }

    #[test]
    fn lines_order_numerically() {
        let a = RecordId::new("f", 2);
        let b = RecordId::new("f", 10);
        assert!(a < b);
    }

    #[test]
    fn reads_id_field() {
        let record = json!({"_id": "abc.3", "a": 1});
        let record = record.as_object().unwrap();
        assert_eq!(RecordId::of(record).unwrap(), RecordId::new("abc", 3));
    }
}
