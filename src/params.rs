//! Declarative parameter schemas and decoding of untyped parameter maps.
//!
//! Each operation declares a [`ParamSchema`]. Decoding coerces the raw map
//! into the declared types, applies defaults, checks rules, deserializes the
//! typed record and finally runs the record's own cross-field validation.

use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};

use crate::adapters::metadata::ParameterDescriptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

/// First offending field and the constraint it violated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("parameter '{field}' failed '{constraint}': {message}")]
pub struct ParamError {
    pub field: String,
    pub constraint: String,
    pub message: String,
}

impl ParamError {
    pub fn new(field: &str, constraint: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            constraint: constraint.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Rule {
    NonEmpty,
    OneOf(Vec<String>),
    Min(f64),
    Max(f64),
    Gt(f64),
    Lte(f64),
    StartsWith(String),
    Url,
    Pattern(String),
    /// Apply the inner rules to every element of an array.
    Dive(Vec<Rule>),
}

impl Rule {
    fn name(&self) -> &'static str {
        match self {
            Rule::NonEmpty => "required",
            Rule::OneOf(_) => "oneof",
            Rule::Min(_) => "min",
            Rule::Max(_) => "max",
            Rule::Gt(_) => "gt",
            Rule::Lte(_) => "lte",
            Rule::StartsWith(_) => "startswith",
            Rule::Url => "url",
            Rule::Pattern(_) => "regex",
            Rule::Dive(_) => "dive",
        }
    }

    fn check(&self, field: &str, value: &Value) -> Result<(), ParamError> {
        let fail = |message: String| Err(ParamError::new(field, self.name(), message));
        match self {
            Rule::NonEmpty => {
                let empty = match value {
                    Value::String(s) => s.is_empty(),
                    Value::Array(items) => items.is_empty(),
                    Value::Object(map) => map.is_empty(),
                    Value::Null => true,
                    _ => false,
                };
                if empty {
                    return fail("must not be empty".to_string());
                }
            }
            Rule::OneOf(allowed) => {
                let text = scalar_text(value);
                if !allowed.iter().any(|candidate| Some(candidate.as_str()) == text.as_deref()) {
                    return fail(format!("must be one of [{}]", allowed.join(", ")));
                }
            }
            Rule::Min(bound) => {
                if magnitude(value).is_some_and(|m| m < *bound) {
                    return fail(format!("must be at least {}", bound));
                }
            }
            Rule::Max(bound) | Rule::Lte(bound) => {
                if magnitude(value).is_some_and(|m| m > *bound) {
                    return fail(format!("must be at most {}", bound));
                }
            }
            Rule::Gt(bound) => {
                if magnitude(value).is_some_and(|m| m <= *bound) {
                    return fail(format!("must be greater than {}", bound));
                }
            }
            Rule::StartsWith(prefix) => {
                if !value.as_str().is_some_and(|s| s.starts_with(prefix.as_str())) {
                    return fail(format!("must start with '{}'", prefix));
                }
            }
            Rule::Url => {
                let valid = value
                    .as_str()
                    .and_then(|s| url::Url::parse(s).ok())
                    .is_some_and(|url| matches!(url.scheme(), "http" | "https"));
                if !valid {
                    return fail("must be an absolute http(s) URL".to_string());
                }
            }
            Rule::Pattern(pattern) => {
                let re = regex::Regex::new(pattern).map_err(|e| {
                    ParamError::new(field, "regex", format!("invalid pattern: {}", e))
                })?;
                if !value.as_str().is_some_and(|s| re.is_match(s)) {
                    return fail(format!("must match '{}'", pattern));
                }
            }
            Rule::Dive(inner) => {
                if let Value::Array(items) = value {
                    for (index, item) in items.iter().enumerate() {
                        let element = format!("{}[{}]", field, index);
                        for rule in inner {
                            rule.check(&element, item)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Numbers compare by value; strings, arrays and objects by length.
fn magnitude(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        Value::Object(map) => Some(map.len() as f64),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub default: Option<Value>,
    pub enum_values: Option<Vec<String>>,
    pub description: String,
    pub rules: Vec<Rule>,
}

impl FieldSpec {
    pub fn new(name: &str, kind: ParamType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: false,
            default: None,
            enum_values: None,
            description: String::new(),
            rules: Vec::new(),
        }
    }

    pub fn string(name: &str) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn integer(name: &str) -> Self {
        Self::new(name, ParamType::Integer)
    }

    pub fn number(name: &str) -> Self {
        Self::new(name, ParamType::Number)
    }

    pub fn boolean(name: &str) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    pub fn array(name: &str) -> Self {
        Self::new(name, ParamType::Array)
    }

    pub fn object(name: &str) -> Self {
        Self::new(name, ParamType::Object)
    }

    /// Required and, for strings/collections, non-empty.
    pub fn required(mut self) -> Self {
        self.required = true;
        if matches!(
            self.kind,
            ParamType::String | ParamType::Array | ParamType::Object
        ) {
            self.rules.insert(0, Rule::NonEmpty);
        }
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn one_of<I, S>(mut self, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let allowed: Vec<String> = allowed.into_iter().map(Into::into).collect();
        self.enum_values = Some(allowed.clone());
        self.rules.push(Rule::OneOf(allowed));
        self
    }

    pub fn rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn range(self, min: f64, max: f64) -> Self {
        self.rule(Rule::Min(min)).rule(Rule::Max(max))
    }

    fn coerce(&self, value: &Value) -> Result<Value, ParamError> {
        let mismatch = || {
            ParamError::new(
                &self.name,
                "type",
                format!("expected {:?}, got {}", self.kind, type_name(value)).to_lowercase(),
            )
        };
        match (self.kind, value) {
            (ParamType::String, Value::String(_)) => Ok(value.clone()),
            (ParamType::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
            (ParamType::Integer, Value::Number(n)) => {
                if n.is_i64() {
                    Ok(value.clone())
                } else if n.is_u64() {
                    Err(ParamError::new(
                        &self.name,
                        "range",
                        "integer does not fit in 64 signed bits",
                    ))
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                            Ok(Value::Number(Number::from(f as i64)))
                        }
                        _ => Err(mismatch()),
                    }
                }
            }
            (ParamType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(|n| Value::Number(Number::from(n)))
                .map_err(|_| mismatch()),
            (ParamType::Number, Value::Number(_)) => Ok(value.clone()),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(mismatch),
            (ParamType::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (ParamType::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            (ParamType::Array, Value::Array(_)) => Ok(value.clone()),
            (ParamType::Object, Value::Object(_)) => Ok(value.clone()),
            _ => Err(mismatch()),
        }
    }

    pub fn descriptor(&self) -> ParameterDescriptor {
        ParameterDescriptor {
            name: self.name.clone(),
            kind: self.kind,
            required: self.required,
            default: self.default.clone(),
            enum_values: self.enum_values.clone(),
            description: self.description.clone(),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    fields: Vec<FieldSpec>,
}

impl ParamSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn descriptors(&self) -> Vec<ParameterDescriptor> {
        self.fields.iter().map(FieldSpec::descriptor).collect()
    }

    /// Coerce, default and rule-check `raw`. Keys the schema does not declare are dropped.
    pub fn normalize(&self, raw: &Map<String, Value>) -> Result<Map<String, Value>, ParamError> {
        let mut out = Map::new();
        for field in &self.fields {
            let value = match raw.get(&field.name) {
                Some(Value::Null) | None => match &field.default {
                    Some(default) => default.clone(),
                    None if field.required => {
                        return Err(ParamError::new(&field.name, "required", "is required"));
                    }
                    None => continue,
                },
                Some(value) => field.coerce(value)?,
            };
            for rule in &field.rules {
                rule.check(&field.name, &value)?;
            }
            out.insert(field.name.clone(), value);
        }
        Ok(out)
    }

    /// Decode `raw` into the typed record `P` and run its cross-field checks.
    pub fn decode<P: OperationParams>(&self, raw: &Map<String, Value>) -> Result<P, ParamError> {
        let normalized = self.normalize(raw)?;
        let params: P = serde_json::from_value(Value::Object(normalized))
            .map_err(|e| ParamError::new("<record>", "decode", e.to_string()))?;
        params.validate()?;
        Ok(params)
    }
}

/// Typed parameter record of one operation.
pub trait OperationParams: DeserializeOwned + Send + 'static {
    fn schema() -> ParamSchema;

    /// Cross-field checks run after decoding.
    fn validate(&self) -> Result<(), ParamError> {
        Ok(())
    }
}

/// Parameter record for operations that take no input.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct NoParams {}

impl OperationParams for NoParams {
    fn schema() -> ParamSchema {
        ParamSchema::new()
    }
}
