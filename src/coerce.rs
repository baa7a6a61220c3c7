use serde_json::Value;

/// Null-safe extraction of a trimmed string. Null, missing, and non-scalar
/// values come back as the empty string; numbers and booleans are rendered.
pub fn safe_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Like `safe_string`, but blank results become `None`. Used for nullable
/// database columns so empty CRM fields land as NULL, not "".
pub fn safe_opt_string(value: Option<&Value>) -> Option<String> {
    let s = safe_string(value);
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Integer coercion via float-then-truncate so "42.0" and 42.5 both parse.
/// Any failure degrades to 0 rather than aborting a batch.
pub fn safe_int(value: Option<&Value>) -> i64 {
    safe_float(value) as i64
}

pub fn safe_float(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Truthy strings: "true", "yes", "1", "t", "y" (case-insensitive).
/// Native booleans pass through; everything else is false.
pub fn safe_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "yes" | "1" | "t" | "y"
        ),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        _ => false,
    }
}

/// True when the value carries something `safe_int`/`safe_float` would parse
/// as a number (validators need to distinguish "parses to 0" from "absent").
pub fn safe_uint_parses(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Number(_)) => true,
        Some(Value::String(s)) => s.trim().parse::<f64>().is_ok(),
        _ => false,
    }
}

/// Split a multi-value CRM field on `separator`, trimming each element and
/// dropping empties. Salesforce multiselect picklists use ';'.
pub fn safe_list(value: Option<&Value>, separator: char) -> Vec<String> {
    let raw = safe_string(value);
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(separator)
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_trims_and_defaults() {
        assert_eq!(safe_string(Some(&json!("  hi  "))), "hi");
        assert_eq!(safe_string(Some(&Value::Null)), "");
        assert_eq!(safe_string(None), "");
        assert_eq!(safe_string(Some(&json!(7))), "7");
    }

    #[test]
    fn opt_string_blanks_to_none() {
        assert_eq!(safe_opt_string(Some(&json!("   "))), None);
        assert_eq!(safe_opt_string(Some(&json!("x"))), Some("x".to_string()));
        assert_eq!(safe_opt_string(None), None);
    }

    #[test]
    fn int_parses_via_float() {
        assert_eq!(safe_int(Some(&json!("42.5"))), 42);
        assert_eq!(safe_int(Some(&json!("42.0"))), 42);
        assert_eq!(safe_int(Some(&json!(9))), 9);
        assert_eq!(safe_int(Some(&json!("not a number"))), 0);
        assert_eq!(safe_int(None), 0);
    }

    #[test]
    fn float_defaults_on_garbage() {
        assert_eq!(safe_float(Some(&json!("2.75"))), 2.75);
        assert_eq!(safe_float(Some(&json!({}))), 0.0);
        assert_eq!(safe_float(None), 0.0);
    }

    #[test]
    fn bool_truthy_strings() {
        for v in ["true", "YES", "1", "t", "Y"] {
            assert!(safe_bool(Some(&json!(v))), "{v} should be truthy");
        }
        assert!(!safe_bool(Some(&json!("whatever"))));
        assert!(!safe_bool(None));
        assert!(safe_bool(Some(&json!(true))));
    }

    #[test]
    fn uint_parse_check() {
        assert!(safe_uint_parses(Some(&json!(2024))));
        assert!(safe_uint_parses(Some(&json!("2024"))));
        assert!(!safe_uint_parses(Some(&json!("twenty"))));
        assert!(!safe_uint_parses(None));
    }

    #[test]
    fn list_splits_and_drops_empties() {
        assert_eq!(
            safe_list(Some(&json!("a; b ;;c")), ';'),
            vec!["a", "b", "c"]
        );
        assert!(safe_list(Some(&Value::Null), ';').is_empty());
        assert!(safe_list(None, ';').is_empty());
    }
}
