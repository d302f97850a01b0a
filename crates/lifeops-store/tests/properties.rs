//! Property-based tests for document merge.
//!
//! These hold for any pair of documents:
//!  - Identity: merging an empty patch changes nothing
//!  - Idempotence: merging the same patch twice equals merging it once
//!  - Patch wins: every top-level key of the patch is visible afterwards
//!  - Unrelated keys survive: keys absent from the patch are untouched

use lifeops_store::{deep_merge, Document, LocalStore, MemoryBackend, Timestamp, Value};
use proptest::prelude::*;
use std::sync::Arc;

fn leaf_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z]{0,6}".prop_map(Value::from),
        (0i64..2_000_000_000_000).prop_map(|ms| Value::Timestamp(Timestamp::from_millis(ms))),
    ]
}

fn value_strategy() -> impl Strategy<Value = Value> {
    leaf_strategy().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-d]", inner, 0..4).prop_map(Value::Object),
        ]
    })
}

fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-f]", value_strategy(), 0..5)
}

proptest! {
    #[test]
    fn merge_with_empty_is_identity(base in document_strategy()) {
        let mut merged = base.clone();
        deep_merge(&mut merged, Document::new());
        prop_assert_eq!(merged, base);
    }

    #[test]
    fn merge_is_idempotent(base in document_strategy(), patch in document_strategy()) {
        let mut once = base.clone();
        deep_merge(&mut once, patch.clone());

        let mut twice = once.clone();
        deep_merge(&mut twice, patch);

        prop_assert_eq!(once, twice);
    }

    #[test]
    fn unrelated_keys_survive(base in document_strategy(), patch in document_strategy()) {
        let mut merged = base.clone();
        deep_merge(&mut merged, patch.clone());

        for (key, value) in &base {
            if !patch.contains_key(key) {
                prop_assert_eq!(merged.get(key), Some(value));
            }
        }
        for key in patch.keys() {
            prop_assert!(merged.contains_key(key));
        }
    }

    #[test]
    fn non_object_patch_values_replace(base in document_strategy(), patch in document_strategy()) {
        let mut merged = base;
        deep_merge(&mut merged, patch.clone());

        for (key, value) in &patch {
            if !matches!(value, Value::Object(_)) {
                prop_assert_eq!(merged.get(key), Some(value));
            }
        }
    }

    #[test]
    fn local_store_roundtrips_saved_documents(doc in document_strategy()) {
        let store = LocalStore::new(Arc::new(MemoryBackend::new()));
        let saved = store.save(doc.clone()).unwrap();

        prop_assert_eq!(&saved, &doc);
        prop_assert_eq!(store.load(), doc);
    }
}
