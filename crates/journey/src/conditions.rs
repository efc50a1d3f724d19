//! Step condition evaluation — pure field/value predicates over the
//! journey's data bag.

use serde_json::{Map, Value};

/// Returns `true` when every declared condition key is present in `data`
/// and strictly equal (no coercion) to the expected value. No conditions
/// means always true. Any mismatch or missing key means the step is
/// skipped, not errored; the journey still advances.
pub fn matches(conditions: Option<&Map<String, Value>>, data: &Map<String, Value>) -> bool {
    let Some(conditions) = conditions else {
        return true;
    };

    conditions
        .iter()
        .all(|(field, expected)| data.get(field) == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_no_conditions_always_matches() {
        assert!(matches(None, &map(json!({}))));
        assert!(matches(None, &map(json!({"anything": 1}))));
    }

    #[test]
    fn test_all_conditions_must_hold() {
        let conditions = map(json!({"has_reviewed": true, "tier": "gold"}));
        assert!(matches(
            Some(&conditions),
            &map(json!({"has_reviewed": true, "tier": "gold", "extra": 1}))
        ));
        assert!(!matches(
            Some(&conditions),
            &map(json!({"has_reviewed": true, "tier": "silver"}))
        ));
    }

    #[test]
    fn test_missing_key_fails() {
        let conditions = map(json!({"has_reviewed": true}));
        assert!(!matches(Some(&conditions), &map(json!({}))));
    }

    #[test]
    fn test_strict_equality_no_coercion() {
        let conditions = map(json!({"count": 1}));
        // String "1" is not the number 1.
        assert!(!matches(Some(&conditions), &map(json!({"count": "1"}))));
        // 1.0 and 1 happen to compare equal as serde_json numbers only when
        // both sides are integral; a true float mismatch must fail.
        assert!(!matches(Some(&conditions), &map(json!({"count": 1.5}))));
        assert!(matches(Some(&conditions), &map(json!({"count": 1}))));
    }

    #[test]
    fn test_empty_condition_map_matches() {
        let conditions = map(json!({}));
        assert!(matches(Some(&conditions), &map(json!({}))));
    }
}
