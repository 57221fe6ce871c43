//! Request flag edge detection.
//!
//! Works on the raw field maps so a record that no longer parses still
//! has its requests seen (and acknowledged).

use serde_json::Value;
use studyspark_common::{record::Feature, storage::Fields};

fn flag_set(fields: &Fields, feature: Feature) -> bool {
    matches!(fields.get(feature.request_field()), Some(Value::Bool(true)))
}

/// Features whose request flag is true in `after` and was not true in
/// `before`. A missing `before` (record just created) counts as not
/// requested.
pub fn newly_requested(before: Option<&Fields>, after: &Fields) -> Vec<Feature> {
    Feature::ALL
        .into_iter()
        .filter(|f| flag_set(after, *f))
        .filter(|f| !before.is_some_and(|b| flag_set(b, *f)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn requesting(flashcards: Value, quiz: Value) -> Fields {
        match json!({"requestFlashcards": flashcards, "requestQuiz": quiz}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_false_to_true_is_an_edge() {
        let before = requesting(json!(false), Value::Null);
        let after = requesting(json!(true), Value::Null);
        assert_eq!(newly_requested(Some(&before), &after), vec![Feature::Flashcards]);
    }

    #[test]
    fn test_true_to_true_is_not_an_edge() {
        let before = requesting(json!(true), json!(false));
        let after = requesting(json!(true), json!(false));
        assert!(newly_requested(Some(&before), &after).is_empty());
    }

    #[test]
    fn test_toggle_after_reset_fires_again() {
        let states = [
            requesting(json!(false), Value::Null),
            requesting(json!(true), Value::Null),
            requesting(json!(false), Value::Null),
            requesting(json!(true), Value::Null),
            requesting(json!(true), Value::Null),
        ];

        let fired: usize = states
            .windows(2)
            .map(|w| newly_requested(Some(&w[0]), &w[1]).len())
            .sum();
        assert_eq!(fired, 2);
    }

    #[test]
    fn test_absent_before_and_multiple_flags() {
        let after = requesting(json!(true), json!(true));
        assert_eq!(
            newly_requested(None, &after),
            vec![Feature::Flashcards, Feature::Quiz]
        );
    }

    #[test]
    fn test_non_boolean_flag_is_not_a_request() {
        let after = requesting(json!("true"), json!(1));
        assert!(newly_requested(None, &after).is_empty());
    }
}
