//! Expectation files: what a controller's settings are supposed to be.
//!
//! An expectation file is a JSON array of entries, each naming one CLI
//! setting and the predicate its value must satisfy:
//!
//! ```json
//! [
//!   { "name": "min_throttle", "action": "=", "value": 1070 },
//!   { "name": "motor_pwm_protocol", "action": "=", "values": ["DSHOT300", "DSHOT600"] },
//!   { "name": "craft_name", "action": "!=", "value": "" }
//! ]
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use fcbridge_core::error::{Error, Result};

/// Comparison an entry asks for.
///
/// Anything other than `=` or `!=` is kept verbatim and always fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Equal,
    NotEqual,
    Unknown(String),
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        match s.as_str() {
            "=" => Action::Equal,
            "!=" => Action::NotEqual,
            _ => Action::Unknown(s),
        }
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Equal => write!(f, "="),
            Action::NotEqual => write!(f, "!="),
            Action::Unknown(s) => write!(f, "{s}"),
        }
    }
}

/// A single expected value, as written in the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Number(serde_json::Number),
    Text(String),
}

impl SettingValue {
    /// Loose comparison against the text the controller reported.
    ///
    /// A number compares numerically with `actual` parsed as a number, where
    /// blank text counts as zero. Text compares exactly.
    pub fn loosely_equals(&self, actual: &str) -> bool {
        match self {
            SettingValue::Text(expected) => expected == actual,
            SettingValue::Number(expected) => {
                let Some(expected) = expected.as_f64() else {
                    return false;
                };
                match parse_number(actual) {
                    Some(actual) => actual == expected,
                    None => false,
                }
            }
        }
    }

    /// `""` and `0` are falsy; an entry with a falsy `value` reports its
    /// `values` list as the expected value instead.
    pub fn is_falsy(&self) -> bool {
        match self {
            SettingValue::Text(s) => s.is_empty(),
            SettingValue::Number(n) => n.as_f64() == Some(0.0),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Number(n) => write!(f, "{n}"),
            SettingValue::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Numeric reading of device text. Surrounding whitespace is ignored and
/// blank text reads as zero.
fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0.0);
    }
    // Rust also accepts "inf" and "nan"; the CLI never prints those for a
    // numeric setting, so treat them as text.
    if !text
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'))
    {
        return None;
    }
    text.parse().ok()
}

/// One entry of an expectation file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expectation {
    /// CLI setting name, as passed to `get`.
    pub name: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<SettingValue>,
    /// Accepted values; takes precedence over `value` for `=`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

impl Expectation {
    /// Entry requiring `name` to equal `value`.
    pub fn equal(name: impl Into<String>, value: SettingValue) -> Self {
        Expectation {
            name: name.into(),
            action: Action::Equal,
            value: Some(value),
            values: None,
        }
    }

    /// Entry requiring `name` to be one of `values`.
    pub fn one_of<I, S>(name: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Expectation {
            name: name.into(),
            action: Action::Equal,
            value: None,
            values: Some(values.into_iter().map(Into::into).collect()),
        }
    }

    /// Entry requiring `name` to differ from `value`.
    pub fn not_equal(name: impl Into<String>, value: SettingValue) -> Self {
        Expectation {
            name: name.into(),
            action: Action::NotEqual,
            value: Some(value),
            values: None,
        }
    }

    /// Whether `actual` satisfies this entry.
    pub fn accepts(&self, actual: &str) -> bool {
        let loosely_equal = || {
            self.value
                .as_ref()
                .is_some_and(|v| v.loosely_equals(actual))
        };

        match &self.action {
            Action::Equal => match &self.values {
                Some(values) => values.iter().any(|v| v == actual),
                None => loosely_equal(),
            },
            Action::NotEqual => !loosely_equal(),
            Action::Unknown(_) => false,
        }
    }

    /// What the result should report as expected: `value`, or `values` when
    /// `value` is missing or falsy.
    pub fn expected(&self) -> Option<Expected> {
        match (&self.value, &self.values) {
            (Some(v), _) if !v.is_falsy() => Some(Expected::Value(v.clone())),
            (_, Some(values)) => Some(Expected::Values(values.clone())),
            _ => None,
        }
    }
}

/// Expected value as reported in a verification result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Expected {
    Value(SettingValue),
    Values(Vec<String>),
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Value(v) => write!(f, "{v}"),
            Expected::Values(values) => write!(f, "{}", values.join(",")),
        }
    }
}

/// Parse an expectation file's text.
pub fn parse_expectations(text: &str) -> Result<Vec<Expectation>> {
    serde_json::from_str(text).map_err(|e| Error::Parse(e.to_string()))
}

/// Read and parse an expectation file.
pub fn load_expectations(path: impl AsRef<Path>) -> Result<Vec<Expectation>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let expectations = parse_expectations(&text)?;
    tracing::debug!(
        path = %path.display(),
        entries = expectations.len(),
        "loaded expectation file"
    );
    Ok(expectations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: i64) -> SettingValue {
        SettingValue::Number(n.into())
    }

    fn text(s: &str) -> SettingValue {
        SettingValue::Text(s.to_string())
    }

    #[test]
    fn parse_mixed_file() {
        let entries = parse_expectations(
            r#"[
                {"name": "min_throttle", "action": "=", "value": 1070},
                {"name": "motor_pwm_protocol", "action": "=", "values": ["DSHOT300", "DSHOT600"]},
                {"name": "craft_name", "action": "!=", "value": ""},
                {"name": "gyro_lpf1_static_hz", "action": ">", "value": "250"}
            ]"#,
        )
        .unwrap();

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0], Expectation::equal("min_throttle", num(1070)));
        assert_eq!(
            entries[1],
            Expectation::one_of("motor_pwm_protocol", ["DSHOT300", "DSHOT600"])
        );
        assert_eq!(entries[2], Expectation::not_equal("craft_name", text("")));
        assert_eq!(entries[3].action, Action::Unknown(">".into()));
    }

    #[test]
    fn parse_rejects_non_array() {
        let result = parse_expectations(r#"{"name": "x", "action": "="}"#);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn parse_rejects_broken_json() {
        let result = parse_expectations("[{\"name\": ");
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn parse_rejects_missing_name() {
        let result = parse_expectations(r#"[{"action": "=", "value": 1}]"#);
        assert!(matches!(result, Err(Error::Parse(_))));
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_expectations(dir.path().join("missing.json"));
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("expect.json");
        std::fs::write(&path, r#"[{"name": "foo", "action": "=", "value": "5"}]"#).unwrap();

        let entries = load_expectations(&path).unwrap();
        assert_eq!(entries, vec![Expectation::equal("foo", text("5"))]);
    }

    #[test]
    fn numeric_value_compares_numerically() {
        assert!(num(1070).loosely_equals("1070"));
        assert!(num(1070).loosely_equals(" 1070 "));
        assert!(num(1070).loosely_equals("1070.0"));
        assert!(!num(1070).loosely_equals("1071"));
        assert!(!num(1).loosely_equals("ON"));
        assert!(!num(0).loosely_equals("nan"));
    }

    #[test]
    fn blank_text_reads_as_zero() {
        assert!(num(0).loosely_equals(""));
        assert!(!num(1).loosely_equals(""));
    }

    #[test]
    fn fractional_value() {
        let v: SettingValue = serde_json::from_str("0.5").unwrap();
        assert!(v.loosely_equals("0.50"));
    }

    #[test]
    fn text_value_compares_exactly() {
        assert!(text("DSHOT600").loosely_equals("DSHOT600"));
        assert!(!text("DSHOT600").loosely_equals("dshot600"));
        assert!(!text("1070").loosely_equals("1070.0"));
    }

    #[test]
    fn accepts_membership_over_value() {
        let mut entry = Expectation::one_of("motor_pwm_protocol", ["DSHOT300", "DSHOT600"]);
        entry.value = Some(text("PWM"));
        assert!(entry.accepts("DSHOT600"));
        assert!(!entry.accepts("PWM"));
    }

    #[test]
    fn not_equal_without_value_passes() {
        let entry = Expectation {
            name: "foo".into(),
            action: Action::NotEqual,
            value: None,
            values: None,
        };
        assert!(entry.accepts("anything"));
    }

    #[test]
    fn equal_without_value_fails() {
        let entry = Expectation {
            name: "foo".into(),
            action: Action::Equal,
            value: None,
            values: None,
        };
        assert!(!entry.accepts(""));
    }

    #[test]
    fn unknown_action_never_passes() {
        let entry = Expectation {
            name: "foo".into(),
            action: Action::Unknown(">=".into()),
            value: Some(num(5)),
            values: None,
        };
        assert!(!entry.accepts("5"));
        assert!(!entry.accepts("6"));
    }

    #[test]
    fn expected_falls_back_to_values_when_falsy() {
        let mut entry = Expectation::one_of("proto", ["DSHOT600"]);
        entry.value = Some(num(0));
        assert_eq!(
            entry.expected(),
            Some(Expected::Values(vec!["DSHOT600".into()]))
        );

        entry.value = Some(text(""));
        assert_eq!(
            entry.expected(),
            Some(Expected::Values(vec!["DSHOT600".into()]))
        );

        entry.value = Some(num(3));
        assert_eq!(entry.expected(), Some(Expected::Value(num(3))));
    }

    #[test]
    fn expected_absent_when_nothing_usable() {
        let entry = Expectation::not_equal("craft_name", text(""));
        assert_eq!(entry.expected(), None);
    }

    #[test]
    fn action_round_trips_through_json() {
        let entry = Expectation::not_equal("foo", num(5));
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"name":"foo","action":"!=","value":5}"#);
    }
}
