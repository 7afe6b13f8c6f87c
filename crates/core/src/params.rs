//! Declared script parameters and input cleaning.
//!
//! A script declares an ordered list of [`ParamSpec`]s. Submitted input
//! (typically form-encoded, so mostly strings) is validated and coerced to
//! typed JSON values by [`ParamSchema::clean`].

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::net::IpAddr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::CoreError;

const REQUIRED_MESSAGE: &str = "This field is required.";

/// Form values that read as a checked box.
const TRUTHY: [&str; 4] = ["on", "true", "1", "yes"];

// ---------------------------------------------------------------------------
// Declarations
// ---------------------------------------------------------------------------

/// Type and validation rule of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamType {
    Boolean,
    Integer {
        min_value: Option<i64>,
        max_value: Option<i64>,
    },
    Decimal {
        min_value: Option<f64>,
        max_value: Option<f64>,
    },
    String {
        min_length: Option<usize>,
        max_length: Option<usize>,
        regex: Option<String>,
    },
    Text,
    Choice {
        choices: Vec<String>,
    },
    MultiChoice {
        choices: Vec<String>,
    },
    IpAddress,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to `true`, except for booleans which are never required.
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(flatten)]
    pub kind: ParamType,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            label: None,
            description: None,
            required: None,
            default: None,
            kind,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = Some(false);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn is_required(&self) -> bool {
        match self.kind {
            ParamType::Boolean => false,
            _ => self.required.unwrap_or(true),
        }
    }

    /// Declared label, or the name with underscores as spaces and the first
    /// letter capitalized.
    pub fn display_label(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let spaced = self.name.replace('_', " ");
        let mut chars = spaced.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Per-field validation messages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamErrors(pub BTreeMap<String, String>);

impl ParamErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }
}

impl fmt::Display for ParamErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}: {v}")).collect();
        f.write_str(&parts.join("; "))
    }
}

impl From<ParamErrors> for CoreError {
    fn from(errors: ParamErrors) -> Self {
        CoreError::Validation(errors.to_string())
    }
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Ordered parameter declaration of a script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSchema(pub Vec<ParamSpec>);

impl ParamSchema {
    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.0.iter().find(|p| p.name == name)
    }

    /// Parameters in presentation order: names listed in `field_order`
    /// first, then the rest in declaration order.
    pub fn ordered<'a>(&'a self, field_order: Option<&[String]>) -> Vec<&'a ParamSpec> {
        let Some(order) = field_order else {
            return self.0.iter().collect();
        };
        let mut ordered: Vec<&ParamSpec> = order.iter().filter_map(|n| self.get(n)).collect();
        for spec in &self.0 {
            if !order.contains(&spec.name) {
                ordered.push(spec);
            }
        }
        ordered
    }

    /// Check the declaration itself: unique names, compilable regexes,
    /// non-empty choice lists and consistent bounds.
    pub fn check(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        for spec in &self.0 {
            if spec.name.is_empty() || spec.name.starts_with('_') {
                return Err(format!("invalid parameter name '{}'", spec.name));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(format!("duplicate parameter '{}'", spec.name));
            }
            match &spec.kind {
                ParamType::String {
                    regex: Some(pattern),
                    ..
                } => {
                    Regex::new(pattern)
                        .map_err(|e| format!("parameter '{}': bad regex: {e}", spec.name))?;
                }
                ParamType::Choice { choices } | ParamType::MultiChoice { choices }
                    if choices.is_empty() =>
                {
                    return Err(format!("parameter '{}' has no choices", spec.name));
                }
                ParamType::Integer {
                    min_value: Some(min),
                    max_value: Some(max),
                } if min > max => {
                    return Err(format!("parameter '{}': min_value > max_value", spec.name));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate submitted input and coerce it into typed values.
    ///
    /// Keys that are not declared parameters are ignored. Every declared
    /// parameter appears in the result (`null` when optional and missing).
    pub fn clean(&self, input: &Map<String, Value>) -> Result<Map<String, Value>, ParamErrors> {
        let mut cleaned = Map::new();
        let mut errors = BTreeMap::new();

        for spec in &self.0 {
            match clean_value(spec, input.get(&spec.name)) {
                Ok(value) => {
                    cleaned.insert(spec.name.clone(), value);
                }
                Err(message) => {
                    errors.insert(spec.name.clone(), message);
                }
            }
        }

        if errors.is_empty() {
            Ok(cleaned)
        } else {
            Err(ParamErrors(errors))
        }
    }

    /// Initial form values re-populated from a previous run's input.
    ///
    /// An unchecked checkbox is never submitted, so booleans missing from
    /// the prior input are explicitly `false` rather than their default.
    pub fn initial_from_input(&self, prior: &Map<String, Value>) -> Map<String, Value> {
        let mut initial = Map::new();
        for spec in &self.0 {
            let value = prior.get(&spec.name);
            match spec.kind {
                ParamType::Boolean => {
                    initial.insert(spec.name.clone(), Value::Bool(is_truthy(value)));
                }
                _ => {
                    if let Some(v) = value.filter(|v| !v.is_null()) {
                        initial.insert(spec.name.clone(), v.clone());
                    }
                }
            }
        }
        initial
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        _ => false,
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => TRUTHY.contains(&s.trim().to_ascii_lowercase().as_str()),
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => false,
    }
}

fn clean_value(spec: &ParamSpec, raw: Option<&Value>) -> Result<Value, String> {
    if let ParamType::Boolean = spec.kind {
        if raw.is_none() {
            if let Some(default) = &spec.default {
                return Ok(Value::Bool(is_truthy(Some(default))));
            }
        }
        return Ok(Value::Bool(is_truthy(raw)));
    }

    if is_blank(raw) {
        if let Some(default) = &spec.default {
            return Ok(default.clone());
        }
        if spec.is_required() {
            return Err(REQUIRED_MESSAGE.to_string());
        }
        return Ok(Value::Null);
    }
    // Non-blank, so present.
    let raw = raw.unwrap_or(&Value::Null);

    match &spec.kind {
        ParamType::Boolean => Ok(Value::Bool(is_truthy(Some(raw)))),
        ParamType::Integer {
            min_value,
            max_value,
        } => {
            let n = match raw {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            }
            .ok_or_else(|| "Enter a whole number.".to_string())?;
            if let Some(min) = min_value {
                if n < *min {
                    return Err(format!(
                        "Ensure this value is greater than or equal to {min}."
                    ));
                }
            }
            if let Some(max) = max_value {
                if n > *max {
                    return Err(format!("Ensure this value is less than or equal to {max}."));
                }
            }
            Ok(Value::Number(n.into()))
        }
        ParamType::Decimal {
            min_value,
            max_value,
        } => {
            let n = match raw {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            }
            .filter(|f| f.is_finite())
            .ok_or_else(|| "Enter a number.".to_string())?;
            if min_value.is_some_and(|min| n < min) || max_value.is_some_and(|max| n > max) {
                return Err("Value is out of range.".to_string());
            }
            Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| "Enter a number.".to_string())
        }
        ParamType::String {
            min_length,
            max_length,
            regex,
        } => {
            let s = as_text(raw)?;
            let len = s.chars().count();
            if let Some(min) = min_length {
                if len < *min {
                    return Err(format!("Ensure this value has at least {min} characters."));
                }
            }
            if let Some(max) = max_length {
                if len > *max {
                    return Err(format!("Ensure this value has at most {max} characters."));
                }
            }
            if let Some(pattern) = regex {
                let re = Regex::new(pattern).map_err(|e| format!("Invalid pattern: {e}"))?;
                if !re.is_match(&s) {
                    return Err("Enter a valid value.".to_string());
                }
            }
            Ok(Value::String(s))
        }
        ParamType::Text => as_text(raw).map(Value::String),
        ParamType::Choice { choices } => {
            let s = as_text(raw)?;
            if choices.contains(&s) {
                Ok(Value::String(s))
            } else {
                Err(format!(
                    "Select a valid choice. {s} is not one of the available choices."
                ))
            }
        }
        ParamType::MultiChoice { choices } => {
            let values: Vec<String> = match raw {
                Value::Array(items) => items.iter().map(as_text).collect::<Result<_, _>>()?,
                other => vec![as_text(other)?],
            };
            if let Some(bad) = values.iter().find(|v| !choices.contains(v)) {
                return Err(format!(
                    "Select a valid choice. {bad} is not one of the available choices."
                ));
            }
            Ok(Value::Array(values.into_iter().map(Value::String).collect()))
        }
        ParamType::IpAddress => {
            let s = as_text(raw)?;
            s.trim()
                .parse::<IpAddr>()
                .map(|ip| Value::String(ip.to_string()))
                .map_err(|_| "Enter a valid IPv4 or IPv6 address.".to_string())
        }
    }
}

fn as_text(value: &Value) -> Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err("Enter a text value.".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
