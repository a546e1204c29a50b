use proptest::prelude::*;
use serde_json::json;
use slotdb::core::types::{Record, RecordId};
use slotdb::index::inverted::CollectionIndex;
use slotdb::index::posting::PostingList;
use slotdb::query::ast::{CompareOp, FilterNode};
use slotdb::query::filter::FilterEvaluator;
use slotdb::schema::schema::Schema;

fn build(rows: &[(i64, bool)]) -> CollectionIndex {
    let schema = Schema::collection(&json!({"n": "int", "flag": "bool"})).unwrap();
    let mut index = CollectionIndex::new(&schema);
    for (line, (n, flag)) in rows.iter().enumerate() {
        let id = RecordId::new(format!("file{}", line % 3), line);
        let record: Record = json!({"_id": id.to_string(), "n": n, "flag": flag})
            .as_object()
            .cloned()
            .unwrap();
        index.add(&record).unwrap();
    }
    index
}

fn eval(index: &CollectionIndex, node: FilterNode) -> PostingList {
    FilterEvaluator::new(index).evaluate(Some(&node)).unwrap()
}

fn leaf() -> impl Strategy<Value = FilterNode> {
    prop_oneof![
        (0i64..10).prop_map(|n| FilterNode::compare("n", CompareOp::Gt, json!(n))),
        (0i64..10).prop_map(|n| FilterNode::compare("n", CompareOp::Lte, json!(n))),
        (0i64..10).prop_map(|n| FilterNode::eq("n", json!(n))),
        any::<bool>().prop_map(|b| FilterNode::eq("flag", json!(b))),
    ]
}

proptest! {
    #[test]
    fn set_identities_hold(
        rows in prop::collection::vec((0i64..10, any::<bool>()), 0..40),
        a in leaf(),
        b in leaf(),
    ) {
        let index = build(&rows);
        let universe = FilterEvaluator::new(&index).evaluate(None).unwrap();
        prop_assert_eq!(universe.len(), rows.len());

        let not_and = eval(&index, FilterNode::not(FilterNode::and(a.clone(), b.clone())));
        let or_not = eval(&index, FilterNode::or(FilterNode::not(a.clone()), FilterNode::not(b.clone())));
        prop_assert_eq!(not_and, or_not);

        let not_or = eval(&index, FilterNode::not(FilterNode::or(a.clone(), b.clone())));
        let and_not = eval(&index, FilterNode::and(FilterNode::not(a.clone()), FilterNode::not(b.clone())));
        prop_assert_eq!(not_or, and_not);

        let xor = eval(&index, FilterNode::xor(a.clone(), b.clone()));
        let either = eval(&index, FilterNode::or(a.clone(), b.clone()));
        let both = eval(&index, FilterNode::and(a.clone(), b.clone()));
        prop_assert_eq!(xor, either.difference(&both));

        let double_not = eval(&index, FilterNode::not(FilterNode::not(a.clone())));
        prop_assert_eq!(double_not, eval(&index, a.clone()));

        let covered = eval(&index, FilterNode::or(a.clone(), FilterNode::not(a)));
        prop_assert_eq!(covered, universe);
    }
}
