use std::cmp::Ordering;
use serde_json::Value;
use crate::core::types::{Record, ID_KEY};
use crate::query::ast::Order;

/// Value at a dotted key path.
pub fn value_at<'a>(record: &'a Record, key_path: &str) -> Option<&'a Value> {
    let mut parts = key_path.split('.');
    let mut value = record.get(parts.next()?)?;
    for part in parts {
        value = value.as_object()?.get(part)?;
    }
    Some(value)
}

/// Order for sorting: missing < null < bool < number < string, other
/// kinds last and equal.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.total_cmp(&y)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

pub fn sort_records(records: &mut [Record], order: &Order) {
    records.sort_by(|a, b| {
        let ord = compare_values(value_at(a, &order.key), value_at(b, &order.key));
        if order.descending { ord.reverse() } else { ord }
    });
}

/// Keep only `fields` (dotted paths allowed) plus the record ID.
pub fn project(record: &Record, fields: &[String]) -> Record {
    let mut out = Record::new();
    if let Some(id) = record.get(ID_KEY) {
        out.insert(ID_KEY.to_string(), id.clone());
    }
    for path in fields {
        let Some(value) = value_at(record, path) else {
            continue;
        };
        insert_at(&mut out, path, value.clone());
    }
    out
}

fn insert_at(record: &mut Record, key_path: &str, value: Value) {
    match key_path.split_once('.') {
        None => {
            record.insert(key_path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = record
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Record::new()));
            if let Value::Object(map) = child {
                insert_at(map, rest, value);
            }
        }
    }
}

/// Order, then limit, then project.
pub fn shape(
    mut records: Vec<Record>,
    order: Option<&Order>,
    limit: Option<usize>,
    fields: Option<&[String]>,
) -> Vec<Record> {
    if let Some(order) = order {
        sort_records(&mut records, order);
    }
    if let Some(limit) = limit {
        records.truncate(limit);
    }
    match fields {
        Some(fields) => records.iter().map(|r| project(r, fields)).collect(),
        None => records,
    }
}
