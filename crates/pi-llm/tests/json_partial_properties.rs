//! P7 (spec.md §8): for any valid JSON string, `parse_streaming_json`
//! applied to every prefix returns a value that is a structural prefix of
//! the final parsed value — never an invented field, key, or array element.

use pi_llm::json_partial::parse_streaming_json;
use proptest::prelude::*;
use serde_json::Value;

/// `partial` is a structural prefix of `complete`: every key/element present
/// in `partial` exists in `complete` with an equal-or-prefix value. Strings
/// in `partial` may be a literal prefix of the corresponding string in
/// `complete` (a value still being typed).
fn is_structural_prefix(partial: &Value, complete: &Value) -> bool {
    match (partial, complete) {
        (Value::Object(p), Value::Object(c)) => p
            .iter()
            .all(|(k, pv)| c.get(k).is_some_and(|cv| is_structural_prefix(pv, cv))),
        (Value::Array(p), Value::Array(c)) => {
            p.len() <= c.len()
                && p.iter()
                    .zip(c.iter())
                    .all(|(pv, cv)| is_structural_prefix(pv, cv))
        }
        (Value::String(p), Value::String(c)) => c.starts_with(p.as_str()),
        (Value::Null, _) => true,
        (a, b) => a == b,
    }
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Bool(true)),
        Just(Value::Bool(false)),
        (-1000i64..1000).prop_map(|n| Value::Number(n.into())),
        "[a-zA-Z0-9_]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(|v| Value::Array(v)),
            prop::collection::btree_map("[a-zA-Z_][a-zA-Z0-9_]{0,6}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn every_prefix_is_structural_prefix_of_final_value(value in arb_json()) {
        // Objects/arrays only: a bare top-level scalar has no interesting
        // prefixes (`parse_streaming_json` on "tru" of "true" just returns
        // Null, which is trivially a prefix of anything).
        prop_assume!(matches!(value, Value::Object(_) | Value::Array(_)));

        let full = serde_json::to_string(&value).unwrap();
        for cut in 0..=full.len() {
            // Only cut on char boundaries; `full` is ASCII-safe for our
            // generated strategy (keys/strings are `[a-zA-Z0-9_]`).
            if !full.is_char_boundary(cut) {
                continue;
            }
            let prefix = &full[..cut];
            let parsed_prefix = parse_streaming_json(prefix);
            prop_assert!(
                is_structural_prefix(&parsed_prefix, &value),
                "prefix {:?} of {:?} parsed to {:?}, not a structural prefix",
                prefix,
                full,
                parsed_prefix
            );
        }
    }
}
