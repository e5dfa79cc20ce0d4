//! Request-body validation helpers.
//!
//! Validation aggregates: every field is checked and all failures come back
//! in one `details` array, instead of stopping at the first bad field.

use serde_json::Value;

pub struct Violations(Vec<String>);

impl Violations {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn into_result(self) -> Result<(), Vec<String>> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(self.0)
        }
    }
}

impl Default for Violations {
    fn default() -> Self {
        Self::new()
    }
}

/// A required string field: present, a string, non-empty after trimming.
pub fn required_string<'a>(
    body: &'a Value,
    field: &str,
    violations: &mut Violations,
) -> Option<&'a str> {
    match body.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::String(_)) => {
            violations.push(format!("{field} must not be empty"));
            None
        }
        Some(_) => {
            violations.push(format!("{field} must be a string"));
            None
        }
        None => {
            violations.push(format!("{field} is required"));
            None
        }
    }
}

/// An optional string field: absent and null are fine, anything else must be
/// a string.
pub fn optional_string<'a>(
    body: &'a Value,
    field: &str,
    violations: &mut Violations,
) -> Option<&'a str> {
    match body.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(_) => {
            violations.push(format!("{field} must be a string"));
            None
        }
    }
}

/// Shape check only: something@something.something. Deliverability is the
/// mail system's problem.
pub fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.is_empty() || value.contains(' ') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_string_flags_missing_empty_and_non_string() {
        let body = json!({ "empty": "  ", "number": 7 });
        let mut violations = Violations::new();

        assert!(required_string(&body, "missing", &mut violations).is_none());
        assert!(required_string(&body, "empty", &mut violations).is_none());
        assert!(required_string(&body, "number", &mut violations).is_none());

        let errors = violations.into_result().unwrap_err();
        assert_eq!(
            errors,
            vec![
                "missing is required",
                "empty must not be empty",
                "number must be a string",
            ]
        );
    }

    #[test]
    fn optional_string_accepts_absent_and_null() {
        let body = json!({ "name": "laptop", "nothing": null, "bad": [] });
        let mut violations = Violations::new();

        assert_eq!(optional_string(&body, "name", &mut violations), Some("laptop"));
        assert!(optional_string(&body, "nothing", &mut violations).is_none());
        assert!(optional_string(&body, "absent", &mut violations).is_none());
        assert!(optional_string(&body, "bad", &mut violations).is_none());

        let errors = violations.into_result().unwrap_err();
        assert_eq!(errors, vec!["bad must be a string"]);
    }

    #[test]
    fn email_shape_check() {
        assert!(is_email("user@example.com"));
        assert!(is_email("first.last@sub.example.co"));
        assert!(!is_email("plainaddress"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("user@"));
        assert!(!is_email("user@nodot"));
        assert!(!is_email("user name@example.com"));
        assert!(!is_email("user@.com"));
    }
}
