//! Drift suppressors.
//!
//! Each suppressor is a pure `(path, old, new) -> bool` predicate registered
//! on an attribute with [`Attribute::with_diff_suppress`]. Returning `true`
//! means the difference is benign and the prior value is kept.
//!
//! [`Attribute::with_diff_suppress`]: super::Attribute::with_diff_suppress

use serde_json::Value;

use super::hash::hash_value;

/// `"example.com"` and `"example.com."` name the same zone.
pub fn dns_trailing_dot(_path: &str, old: &Value, new: &Value) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(old), Some(new)) => {
            old.trim_end_matches('.').eq_ignore_ascii_case(new.trim_end_matches('.'))
        },
        _ => false,
    }
}

/// Vendor identifiers may come back in either case.
pub fn case_insensitive(_path: &str, old: &Value, new: &Value) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(old), Some(new)) => old.eq_ignore_ascii_case(new),
        _ => false,
    }
}

/// JSON documents that differ only in whitespace or key order.
pub fn equivalent_json(_path: &str, old: &Value, new: &Value) -> bool {
    match (old.as_str(), new.as_str()) {
        (Some(old), Some(new)) => {
            match (
                serde_json::from_str::<Value>(old),
                serde_json::from_str::<Value>(new),
            ) {
                (Ok(old), Ok(new)) => old == new,
                _ => false,
            }
        },
        _ => false,
    }
}

/// Sequences the vendor treats as sets: same elements, any order.
pub fn order_insensitive(_path: &str, old: &Value, new: &Value) -> bool {
    match (old.as_array(), new.as_array()) {
        (Some(old), Some(new)) => {
            if old.len() != new.len() {
                return false;
            }
            let mut a: Vec<u64> = old.iter().map(hash_value).collect();
            let mut b: Vec<u64> = new.iter().map(hash_value).collect();
            a.sort_unstable();
            b.sort_unstable();
            a == b
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dns_trailing_dot() {
        assert!(dns_trailing_dot("name", &json!("example.com."), &json!("example.com")));
        assert!(dns_trailing_dot("name", &json!("Example.COM"), &json!("example.com.")));
        assert!(!dns_trailing_dot("name", &json!("example.com."), &json!("example.org.")));
        assert!(!dns_trailing_dot("name", &Value::Null, &json!("example.com.")));
    }

    #[test]
    fn test_case_insensitive() {
        let upper = json!("6A3E5C1F-93B2-4B6E-8E3A-0E2C1D4F5A6B");
        let lower = json!("6a3e5c1f-93b2-4b6e-8e3a-0e2c1d4f5a6b");
        assert!(case_insensitive("id", &upper, &lower));
        assert!(!case_insensitive("id", &upper, &json!("other")));
    }

    #[test]
    fn test_equivalent_json() {
        let old = json!("{\"a\": 1, \"b\": [1, 2]}");
        let new = json!("{\n  \"b\": [1,2],\n  \"a\": 1\n}");
        assert!(equivalent_json("body", &old, &new));
        assert!(!equivalent_json("body", &old, &json!("{\"a\": 2}")));
        assert!(!equivalent_json("body", &old, &json!("not json")));
    }

    #[test]
    fn test_order_insensitive() {
        assert!(order_insensitive(
            "records",
            &json!(["1.2.3.4", "5.6.7.8"]),
            &json!(["5.6.7.8", "1.2.3.4"])
        ));
        assert!(!order_insensitive(
            "records",
            &json!(["1.2.3.4"]),
            &json!(["1.2.3.4", "1.2.3.4"])
        ));
        assert!(!order_insensitive("records.0", &json!("1.2.3.4"), &json!("1.2.3.4")));
    }
}
