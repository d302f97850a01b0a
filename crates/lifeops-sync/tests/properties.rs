//! Property-based tests for fingerprints.
//!
//! - Volatile fields (server timestamps) never affect the fingerprint
//! - Key order of the source text never affects the fingerprint
//! - Changing any non-volatile field changes the fingerprint

use lifeops_store::{document_from_json, document_to_json, Document, Timestamp, Value};
use lifeops_sync::{fingerprint, fingerprint_of, VOLATILE_KEYS};
use proptest::prelude::*;

fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-z ]{0,8}".prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-d]", inner, 0..4).prop_map(Value::Object),
        ]
    })
}

fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map("[a-f]", value_strategy(), 0..5)
}

/// Serialize a JSON value with object keys in reverse order.
fn reversed_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let fields: Vec<String> = map
                .iter()
                .rev()
                .map(|(k, v)| format!("{}:{}", serde_json::Value::from(k.as_str()), reversed_json(v)))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        serde_json::Value::Array(items) => {
            let items: Vec<String> = items.iter().map(reversed_json).collect();
            format!("[{}]", items.join(","))
        }
        other => other.to_string(),
    }
}

proptest! {
    #[test]
    fn volatile_fields_do_not_change_fingerprint(
        doc in document_strategy(),
        updated in 0i64..4_000_000_000_000,
        migrated in 0i64..4_000_000_000_000,
    ) {
        let mut stamped = doc.clone();
        stamped.insert(VOLATILE_KEYS[0].to_string(), Value::Timestamp(Timestamp::from_millis(updated)));
        stamped.insert(VOLATILE_KEYS[1].to_string(), Value::Timestamp(Timestamp::from_millis(migrated)));

        prop_assert_eq!(fingerprint(&doc), fingerprint(&stamped));
    }

    #[test]
    fn key_order_does_not_change_fingerprint(doc in document_strategy()) {
        let json = document_to_json(&doc);
        let reparsed: serde_json::Value = serde_json::from_str(&reversed_json(&json)).unwrap();

        prop_assert_eq!(fingerprint(&doc), fingerprint(&document_from_json(reparsed.clone())));
        prop_assert_eq!(fingerprint(&doc), fingerprint_of(&reparsed));
    }

    #[test]
    fn changed_field_changes_fingerprint(doc in document_strategy(), extra in "[a-z]{1,6}") {
        let mut changed = doc.clone();
        changed.insert("zz".to_string(), Value::from(extra));

        prop_assert_ne!(fingerprint(&doc), fingerprint(&changed));
    }
}
