//! Step condition language
//!
//! Conditions gate step execution against the accumulated execution context.
//! A condition is either a single rule (field path, operator, expected value)
//! or a recursive `all`/`any` group. Field paths are dot-separated and
//! resolve into nested context objects (`search.results.0.seeders`).
//!
//! A rule whose field path resolves to nothing evaluates true only when the
//! expected value is itself null; every other comparison against an absent
//! field is false.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A condition attached to a pipeline step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    /// Every sub-condition must hold
    All { all: Vec<Condition> },
    /// At least one sub-condition must hold
    Any { any: Vec<Condition> },
    /// A single field comparison
    Rule {
        field: String,
        op: Operator,
        #[serde(default)]
        value: Value,
    },
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "matches")]
    Matches,
}

impl Condition {
    /// Validate a condition at template load time.
    ///
    /// Checks that `matches` patterns compile and that groups are non-empty,
    /// so evaluation never has to deal with malformed rules.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Condition::All { all } => {
                if all.is_empty() {
                    return Err("empty 'all' group".to_string());
                }
                all.iter().try_for_each(Condition::validate)
            }
            Condition::Any { any } => {
                if any.is_empty() {
                    return Err("empty 'any' group".to_string());
                }
                any.iter().try_for_each(Condition::validate)
            }
            Condition::Rule { field, op, value } => {
                if field.is_empty() {
                    return Err("empty field path".to_string());
                }
                if *op == Operator::Matches {
                    let pattern = value
                        .as_str()
                        .ok_or_else(|| format!("'matches' on {} needs a string pattern", field))?;
                    Regex::new(pattern)
                        .map_err(|e| format!("invalid pattern on {}: {}", field, e))?;
                }
                Ok(())
            }
        }
    }

    /// Evaluate the condition against an execution context.
    pub fn evaluate(&self, context: &Value) -> bool {
        match self {
            Condition::All { all } => all.iter().all(|c| c.evaluate(context)),
            Condition::Any { any } => any.iter().any(|c| c.evaluate(context)),
            Condition::Rule { field, op, value } => {
                match lookup_path(context, field) {
                    Some(actual) => compare(actual, *op, value),
                    // Absent field: only "== null" (or "!= something") holds.
                    None => match op {
                        Operator::Eq => value.is_null(),
                        Operator::Ne => !value.is_null(),
                        _ => false,
                    },
                }
            }
        }
    }
}

/// Resolve a dot-separated path into a nested JSON value.
///
/// Numeric segments index into arrays.
fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let idx: usize = segment.parse().ok()?;
                items.get(idx)?
            }
            _ => return None,
        };
    }
    Some(current)
}

fn compare(actual: &Value, op: Operator, expected: &Value) -> bool {
    match op {
        Operator::Eq => actual == expected,
        Operator::Ne => actual != expected,
        Operator::Gt => numeric_cmp(actual, expected).is_some_and(|o| o.is_gt()),
        Operator::Lt => numeric_cmp(actual, expected).is_some_and(|o| o.is_lt()),
        Operator::Ge => numeric_cmp(actual, expected).is_some_and(|o| o.is_ge()),
        Operator::Le => numeric_cmp(actual, expected).is_some_and(|o| o.is_le()),
        Operator::In => expected
            .as_array()
            .is_some_and(|list| list.contains(actual)),
        Operator::NotIn => expected
            .as_array()
            .is_some_and(|list| !list.contains(actual)),
        Operator::Contains => match actual {
            Value::String(s) => expected.as_str().is_some_and(|needle| s.contains(needle)),
            Value::Array(items) => items.contains(expected),
            _ => false,
        },
        Operator::Matches => match (actual.as_str(), expected.as_str()) {
            // Patterns are validated at template load; a pattern that still
            // fails to compile here evaluates false rather than panicking.
            (Some(s), Some(pattern)) => Regex::new(pattern).is_ok_and(|re| re.is_match(s)),
            _ => false,
        },
    }
}

fn numeric_cmp(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    let a = actual.as_f64()?;
    let b = expected.as_f64()?;
    a.partial_cmp(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "request_id": "abc",
            "title": "Severance",
            "search": {
                "results_count": 3,
                "best": { "seeders": 42, "name": "Severance.S01E01.2160p" },
                "indexers": ["nyx", "harbor"]
            },
            "download": { "completed": true }
        })
    }

    fn rule(field: &str, op: Operator, value: Value) -> Condition {
        Condition::Rule {
            field: field.to_string(),
            op,
            value,
        }
    }

    #[test]
    fn test_eq_and_ne() {
        assert!(rule("title", Operator::Eq, json!("Severance")).evaluate(&ctx()));
        assert!(rule("title", Operator::Ne, json!("Lost")).evaluate(&ctx()));
        assert!(!rule("title", Operator::Eq, json!("Lost")).evaluate(&ctx()));
    }

    #[test]
    fn test_numeric_comparisons() {
        let c = ctx();
        assert!(rule("search.results_count", Operator::Gt, json!(0)).evaluate(&c));
        assert!(rule("search.best.seeders", Operator::Ge, json!(42)).evaluate(&c));
        assert!(rule("search.best.seeders", Operator::Le, json!(42)).evaluate(&c));
        assert!(!rule("search.results_count", Operator::Lt, json!(3)).evaluate(&c));
    }

    #[test]
    fn test_numeric_against_non_number_is_false() {
        assert!(!rule("title", Operator::Gt, json!(1)).evaluate(&ctx()));
    }

    #[test]
    fn test_in_and_not_in() {
        let c = ctx();
        assert!(rule("title", Operator::In, json!(["Severance", "Lost"])).evaluate(&c));
        assert!(rule("title", Operator::NotIn, json!(["Lost"])).evaluate(&c));
        assert!(!rule("title", Operator::In, json!(["Lost"])).evaluate(&c));
    }

    #[test]
    fn test_contains_string_and_array() {
        let c = ctx();
        assert!(rule("search.best.name", Operator::Contains, json!("2160p")).evaluate(&c));
        assert!(rule("search.indexers", Operator::Contains, json!("nyx")).evaluate(&c));
        assert!(!rule("search.indexers", Operator::Contains, json!("void")).evaluate(&c));
    }

    #[test]
    fn test_matches() {
        let c = ctx();
        assert!(rule("search.best.name", Operator::Matches, json!(r"S\d{2}E\d{2}")).evaluate(&c));
        assert!(!rule("search.best.name", Operator::Matches, json!("^Lost")).evaluate(&c));
    }

    #[test]
    fn test_array_index_path() {
        assert!(rule("search.indexers.1", Operator::Eq, json!("harbor")).evaluate(&ctx()));
    }

    #[test]
    fn test_missing_field_only_matches_null() {
        let c = ctx();
        assert!(rule("search.nonexistent", Operator::Eq, Value::Null).evaluate(&c));
        assert!(rule("search.nonexistent", Operator::Ne, json!("x")).evaluate(&c));
        assert!(!rule("search.nonexistent", Operator::Eq, json!("x")).evaluate(&c));
        assert!(!rule("search.nonexistent", Operator::Gt, json!(1)).evaluate(&c));
        assert!(!rule("search.nonexistent", Operator::Contains, json!("x")).evaluate(&c));
    }

    #[test]
    fn test_nested_groups() {
        let cond = Condition::All {
            all: vec![
                rule("search.results_count", Operator::Gt, json!(0)),
                Condition::Any {
                    any: vec![
                        rule("download.completed", Operator::Eq, json!(true)),
                        rule("download.progress", Operator::Ge, json!(100)),
                    ],
                },
            ],
        };
        assert!(cond.evaluate(&ctx()));
    }

    #[test]
    fn test_group_short_circuit_on_false() {
        let cond = Condition::All {
            all: vec![
                rule("search.results_count", Operator::Eq, json!(0)),
                rule("title", Operator::Eq, json!("Severance")),
            ],
        };
        assert!(!cond.evaluate(&ctx()));
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let cond = rule("title", Operator::Matches, json!("("));
        assert!(cond.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_group() {
        let cond = Condition::All { all: vec![] };
        assert!(cond.validate().is_err());
    }

    #[test]
    fn test_deserialize_rule_and_group() {
        let raw = json!({
            "all": [
                { "field": "search.results_count", "op": ">", "value": 0 },
                { "any": [
                    { "field": "title", "op": "matches", "value": "^Sev" },
                    { "field": "tmdb_id", "op": "in", "value": [1, 2, 3] }
                ]}
            ]
        });
        let cond: Condition = serde_json::from_value(raw).unwrap();
        assert!(matches!(cond, Condition::All { .. }));
    }
}
