use serde_json::Value;
use crate::core::error::{Error, ErrorKind, Result};
use crate::index::inverted::{CollectionIndex, IndexKey};
use crate::index::posting::PostingList;
use crate::query::ast::{CompareOp, FilterNode};
use crate::schema::schema::ScalarType;

/// Resolves filter trees to sorted record-ID sets using one collection's
/// index.
pub struct FilterEvaluator<'a> {
    index: &'a CollectionIndex,
}

impl<'a> FilterEvaluator<'a> {
    pub fn new(index: &'a CollectionIndex) -> Self {
        FilterEvaluator { index }
    }

    /// No filter matches every live record.
    pub fn evaluate(&self, filter: Option<&FilterNode>) -> Result<PostingList> {
        match filter {
            None => Ok(self.index.all_sorted()),
            Some(node) => self.eval(node),
        }
    }

    fn eval(&self, node: &FilterNode) -> Result<PostingList> {
        match node {
            FilterNode::Compare { key, op, value } => self.compare(key, *op, value),
            FilterNode::And(left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(left.intersect(&right))
            }
            FilterNode::Or(left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(left.union(&right))
            }
            FilterNode::Xor(left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(left.symmetric_difference(&right))
            }
            FilterNode::Not(inner) => {
                let inner = self.eval(inner)?;
                Ok(self.index.all_sorted().difference(&inner))
            }
        }
    }

    fn compare(&self, key: &str, op: CompareOp, literal: &Value) -> Result<PostingList> {
        if op == CompareOp::Eq {
            return self.index.lookup_exact(key, literal);
        }

        let (ty, values) = self.index.lookup_all(key)?;
        let mut matched = PostingList::new();
        match ty {
            ScalarType::Int | ScalarType::Float | ScalarType::Byte => {
                let target = numeric_literal(ty, literal)?;
                for (value, posting) in values {
                    let holds = value
                        .as_f64()
                        .and_then(|v| v.partial_cmp(&target))
                        .is_some_and(|ord| op.holds(ord));
                    if holds {
                        matched = matched.union(posting);
                    }
                }
            }
            ScalarType::String => {
                let target = IndexKey::coerce(ty, literal)?;
                let target = target.as_ref().and_then(IndexKey::as_str).unwrap_or_default();
                for (value, posting) in values {
                    let holds = value
                        .as_str()
                        .is_some_and(|v| op.holds(v.as_bytes().cmp(target.as_bytes())));
                    if holds {
                        matched = matched.union(posting);
                    }
                }
            }
            ScalarType::Bool => {
                if op != CompareOp::Ne {
                    return Err(Error::new(
                        ErrorKind::UnsupportedOperation,
                        format!("operator {} is not supported on bool field {}", op, key),
                    ));
                }
                let target = IndexKey::coerce(ty, literal)?;
                for (value, posting) in values {
                    if Some(value) != target.as_ref() {
                        matched = matched.union(posting);
                    }
                }
            }
            ScalarType::Any => {
                return Err(Error::new(
                    ErrorKind::NotSearchable,
                    format!("key {} is not searchable", key),
                ));
            }
        }
        Ok(matched)
    }
}

fn numeric_literal(ty: ScalarType, literal: &Value) -> Result<f64> {
    let number = match literal {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.ok_or_else(|| Error::schema(format!("literal {} cannot be compared with a {} field", literal, ty)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Record, RecordId};
    use crate::schema::schema::Schema;
    use serde_json::json;

    fn index() -> CollectionIndex {
        let schema = Schema::collection(&json!({
            "a": "int",
            "s": "string",
            "b": "bool",
            "f": "float",
            "blob": "any"
        }))
        .unwrap();
        let mut idx = CollectionIndex::new(&schema);
        let rows = [
            json!({"_id": "f.0", "a": 3, "s": "apple", "b": true, "f": 0.5}),
            json!({"_id": "f.1", "a": 5, "s": "banana", "b": false, "f": 1.5}),
            json!({"_id": "f.2", "a": 7, "s": "cherry", "b": true, "f": 2.5}),
            json!({"_id": "f.3", "a": 9, "s": "Date", "b": false, "f": 3.5}),
        ];
        for row in rows {
            let record: Record = row.as_object().cloned().unwrap();
            idx.add(&record).unwrap();
        }
        idx
    }

    fn lines(posting: PostingList) -> Vec<usize> {
        posting.iter().map(|id| id.line).collect()
    }

    fn eval(idx: &CollectionIndex, node: FilterNode) -> Result<PostingList> {
        FilterEvaluator::new(idx).evaluate(Some(&node))
    }

    #[test]
    fn greater_than_scans_distinct_values() {
        let idx = index();
        let hits = eval(&idx, FilterNode::compare("a", CompareOp::Gt, json!(5))).unwrap();
        assert_eq!(lines(hits), vec![2, 3]);
        let hits = eval(&idx, FilterNode::compare("a", CompareOp::Lte, json!(5.5))).unwrap();
        assert_eq!(lines(hits), vec![0, 1]);
        let hits = eval(&idx, FilterNode::compare("f", CompareOp::Gte, json!(2))).unwrap();
        assert_eq!(lines(hits), vec![2, 3]);
        let hits = eval(&idx, FilterNode::compare("a", CompareOp::Ne, json!(3))).unwrap();
        assert_eq!(lines(hits), vec![1, 2, 3]);
    }

    #[test]
    fn fractional_equality_agrees_with_not_equal() {
        let idx = index();
        let eq = eval(&idx, FilterNode::eq("a", json!(5.5))).unwrap();
        assert!(eq.is_empty());
        let ne = eval(&idx, FilterNode::compare("a", CompareOp::Ne, json!(5.5))).unwrap();
        let not_eq = eval(&idx, FilterNode::not(FilterNode::eq("a", json!(5.5)))).unwrap();
        assert_eq!(lines(ne.clone()), vec![0, 1, 2, 3]);
        assert_eq!(ne, not_eq);
    }

    #[test]
    fn strings_compare_bytewise() {
        let idx = index();
        let hits = eval(&idx, FilterNode::compare("s", CompareOp::Lt, json!("banana"))).unwrap();
        // "Date" sorts before lowercase letters.
        assert_eq!(lines(hits), vec![0, 3]);
    }

    #[test]
    fn bool_supports_only_equality() {
        let idx = index();
        assert_eq!(lines(eval(&idx, FilterNode::eq("b", json!(true))).unwrap()), vec![0, 2]);
        assert_eq!(
            lines(eval(&idx, FilterNode::compare("b", CompareOp::Ne, json!(true))).unwrap()),
            vec![1, 3]
        );
        let err = eval(&idx, FilterNode::compare("b", CompareOp::Gt, json!(false))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn unindexed_keys_fail() {
        let idx = index();
        for key in ["blob", "missing", "_id"] {
            let err = eval(&idx, FilterNode::eq(key, json!(1))).unwrap_err();
            assert_eq!(err.kind, ErrorKind::NotSearchable);
        }
        let err = eval(&idx, FilterNode::compare("a", CompareOp::Gt, json!([1]))).unwrap_err();
        assert_eq!(err.kind, ErrorKind::SchemaViolation);
    }

    #[test]
    fn logic_nodes_combine_sets() {
        let idx = index();
        let big = || FilterNode::compare("a", CompareOp::Gt, json!(4));
        let truthy = || FilterNode::eq("b", json!(true));

        assert_eq!(lines(eval(&idx, FilterNode::and(big(), truthy())).unwrap()), vec![2]);
        assert_eq!(lines(eval(&idx, FilterNode::or(big(), truthy())).unwrap()), vec![0, 1, 2, 3]);
        assert_eq!(lines(eval(&idx, FilterNode::xor(big(), truthy())).unwrap()), vec![0, 1, 3]);
        assert_eq!(lines(eval(&idx, FilterNode::not(big())).unwrap()), vec![0]);
    }

    #[test]
    fn de_morgan_holds_over_the_universe() {
        let idx = index();
        let a = || FilterNode::compare("a", CompareOp::Gte, json!(5));
        let b = || FilterNode::compare("s", CompareOp::Gt, json!("apple"));

        let lhs = eval(&idx, FilterNode::not(FilterNode::and(a(), b()))).unwrap();
        let rhs = eval(&idx, FilterNode::or(FilterNode::not(a()), FilterNode::not(b()))).unwrap();
        assert_eq!(lhs, rhs);
    }

    #[test]
    fn no_filter_matches_everything() {
        let idx = index();
        let all = FilterEvaluator::new(&idx).evaluate(None).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all.ids[0], RecordId::new("f", 0));
    }
}
