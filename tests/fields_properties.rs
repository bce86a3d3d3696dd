//! Property tests for field resolution, tuple builders and key comparators.

use std::cmp::Ordering;
use std::sync::Arc;

use proptest::prelude::*;
use sluice_core::builder::OutgoingBuilder;
use sluice_core::comparator::{CaseInsensitive, FieldComparator, KeyComparator, Natural, Reverse};
use sluice_core::fields::Fields;
use sluice_core::tuple::{Row, Tuple};
use sluice_core::value::Value;

fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        (-3i64..3).prop_map(Value::I64),
        (-2i32..2).prop_map(Value::I32),
        prop_oneof![Just(0.0f64), Just(-0.0), Just(f64::NAN), Just(1.5)].prop_map(Value::F64),
        "[aAbB]{0,2}".prop_map(Value::Str),
    ]
}

fn comparator() -> impl Strategy<Value = Arc<dyn FieldComparator>> {
    prop_oneof![
        Just(Arc::new(Natural) as Arc<dyn FieldComparator>),
        Just(Arc::new(Reverse) as Arc<dyn FieldComparator>),
        Just(Arc::new(CaseInsensitive) as Arc<dyn FieldComparator>),
    ]
}

/// Two disjoint declarations and a selector drawn from both, in any order.
fn declarations() -> impl Strategy<Value = (Vec<String>, Vec<String>, Vec<String>)> {
    (1usize..5, 1usize..5).prop_flat_map(|(n, m)| {
        let left = names("a", n);
        let right = names("b", m);
        let all: Vec<String> = left.iter().chain(right.iter()).cloned().collect();
        let total = all.len();
        (
            Just(left),
            Just(right),
            prop::sample::subsequence(all, 1..=total).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn resolving_against_an_append_matches_resolving_against_the_parts(
        (left, right, selector) in declarations()
    ) {
        let a = Fields::new(left).unwrap();
        let b = Fields::new(right).unwrap();
        let selector = Fields::new(selector).unwrap();
        let appended = a.append(&b).unwrap();
        let merged = Fields::resolve(&selector, &[&appended]).unwrap();
        let split = Fields::resolve(&selector, &[&a, &b]).unwrap();
        prop_assert_eq!(merged, split);
    }

    #[test]
    fn positional_select_on_ordered_fields_keeps_size_and_names(
        positions in (1usize..8).prop_flat_map(|n| {
            (Just(n), prop::sample::subsequence((0..n).collect::<Vec<_>>(), 1..=n).prop_shuffle())
        })
    ) {
        let (n, positions) = positions;
        let declared = Fields::new(names("f", n)).unwrap();
        prop_assert!(declared.is_ordered());
        let selector = Fields::positions(positions.iter().map(|&p| p as i32));
        let selected = declared.select(&selector).unwrap();
        prop_assert_eq!(selected.size(), positions.len());
        for (i, &p) in positions.iter().enumerate() {
            prop_assert_eq!(selected.get(i), declared.get(p));
        }
    }

    #[test]
    fn all_composite_narrowed_to_the_output_is_the_output(
        input in prop::collection::vec(value(), 1..5),
        output in prop::collection::vec(value(), 1..5),
    ) {
        let incoming = Fields::new(names("in", input.len())).unwrap();
        let declared = Fields::new(names("out", output.len())).unwrap();
        let builder = OutgoingBuilder::new(&incoming, &incoming, &declared, &Fields::all()).unwrap();
        let input = Tuple::from(input);
        let output = Tuple::from(output);
        let result = builder.make_result(&input, &output).unwrap().into_tuple();

        let width = input.size();
        let tail: Vec<usize> = (width..width + output.size()).collect();
        let head: Vec<usize> = (0..width).collect();
        prop_assert!(result.select(&tail).unwrap().row_eq(&output));
        prop_assert!(result.select(&head).unwrap().row_eq(&input));
    }

    #[test]
    fn comparator_equality_implies_equal_hashes(
        columns in prop::collection::vec(comparator(), 1..3),
        a in prop::collection::vec(value(), 2),
        b in prop::collection::vec(value(), 2),
    ) {
        let key = KeyComparator::new(columns);
        let a = Tuple::from(a);
        let b = Tuple::from(b);
        if key.compare(&a, &b) == Ordering::Equal {
            prop_assert_eq!(key.hash(&a), key.hash(&b));
        }
        prop_assert_eq!(key.compare(&a, &b), key.compare(&b, &a).reverse());
    }
}

#[test]
fn case_insensitive_keys_hash_alike() {
    let key = KeyComparator::new(vec![Arc::new(CaseInsensitive) as Arc<dyn FieldComparator>]);
    let upper = Tuple::from(vec![Value::from("ABC")]);
    let lower = Tuple::from(vec![Value::from("abc")]);
    assert_eq!(key.compare(&upper, &lower), Ordering::Equal);
    assert_eq!(key.hash(&upper), key.hash(&lower));
    assert_ne!(KeyComparator::natural().compare(&upper, &lower), Ordering::Equal);
}

#[test]
fn relative_positions_resolve_from_the_end() {
    let declared = Fields::new(["a", "b", "c"]).unwrap();
    assert_eq!(declared.select(&Fields::last()).unwrap(), Fields::name("c"));
    assert_eq!(declared.select(&Fields::first()).unwrap(), Fields::name("a"));
    assert!(declared.select(&Fields::positions([3])).is_err());
}
