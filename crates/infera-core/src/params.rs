//! Declarative parameter schemas for model wrappers.
//!
//! A wrapper declares its parameters once; user configuration is resolved
//! against that declaration into [`ResolvedParameters`] before the wrapper
//! reads any value. Resolution order is explicit value, then declared
//! default, then [`ParameterError::MissingParameter`] for required entries.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::ParameterError;

/// Raw user configuration for a model wrapper.
pub type ParameterMap = BTreeMap<String, Value>;

/// Number flavour accepted by a numerical parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericType {
    Int,
    Float,
}

/// Kind of value a parameter accepts.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterKind {
    Numerical {
        value_type: NumericType,
        min: Option<f64>,
        max: Option<f64>,
    },
    String {
        choices: Vec<String>,
    },
    List,
    Boolean,
}

/// One declared parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub kind: ParameterKind,
    pub default: Option<Value>,
    pub description: String,
    pub required: bool,
}

impl Parameter {
    fn of(kind: ParameterKind) -> Self {
        Self {
            kind,
            default: None,
            description: String::new(),
            required: false,
        }
    }

    pub fn numerical(value_type: NumericType) -> Self {
        Self::of(ParameterKind::Numerical {
            value_type,
            min: None,
            max: None,
        })
    }

    pub fn string() -> Self {
        Self::of(ParameterKind::String { choices: Vec::new() })
    }

    pub fn list() -> Self {
        Self::of(ParameterKind::List)
    }

    pub fn boolean() -> Self {
        Self::of(ParameterKind::Boolean)
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Lower bound of a numerical parameter. No effect on other kinds.
    pub fn with_min(mut self, bound: f64) -> Self {
        if let ParameterKind::Numerical { min, .. } = &mut self.kind {
            *min = Some(bound);
        }
        self
    }

    pub fn with_choices(mut self, values: &[&str]) -> Self {
        if let ParameterKind::String { choices } = &mut self.kind {
            *choices = values.iter().map(|v| v.to_string()).collect();
        }
        self
    }

    fn set_max(&mut self, bound: f64) {
        if let ParameterKind::Numerical { max, .. } = &mut self.kind {
            *max = Some(bound);
        }
    }

    /// Check a value against this declaration.
    pub fn validate(&self, name: &str, value: &Value) -> Result<(), ParameterError> {
        let invalid = |reason: String| ParameterError::InvalidParameter {
            name: name.to_string(),
            reason,
        };

        match &self.kind {
            ParameterKind::Numerical {
                value_type,
                min,
                max,
            } => {
                let number = match value_type {
                    NumericType::Int => value
                        .as_i64()
                        .map(|v| v as f64)
                        .ok_or_else(|| invalid(format!("expected an integer, got {}", value)))?,
                    NumericType::Float => value
                        .as_f64()
                        .ok_or_else(|| invalid(format!("expected a number, got {}", value)))?,
                };
                if let Some(min) = min.filter(|&m| number < m) {
                    return Err(invalid(format!("{} is less than the minimum {}", number, min)));
                }
                if let Some(max) = max.filter(|&m| number > m) {
                    return Err(invalid(format!("{} is greater than the maximum {}", number, max)));
                }
            }
            ParameterKind::String { choices } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("expected a string, got {}", value)))?;
                if !choices.is_empty() && !choices.iter().any(|c| c == s) {
                    return Err(invalid(format!(
                        "'{}' is not one of {:?}",
                        s, choices
                    )));
                }
            }
            ParameterKind::List => {
                if !value.is_array() {
                    return Err(invalid(format!("expected a list, got {}", value)));
                }
            }
            ParameterKind::Boolean => {
                if !value.is_boolean() {
                    return Err(invalid(format!("expected a boolean, got {}", value)));
                }
            }
        }
        Ok(())
    }
}

/// Named parameter declarations of one model wrapper.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    params: BTreeMap<String, Parameter>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter, replacing an earlier declaration of the same name.
    pub fn with(mut self, name: &str, parameter: Parameter) -> Self {
        self.params.insert(name.to_string(), parameter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.params.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    /// Replace the default of a declared parameter.
    pub fn update_default(&mut self, name: &str, value: Value) {
        if let Some(param) = self.params.get_mut(name) {
            param.default = Some(value);
        }
    }

    /// Set the upper bound of a declared numerical parameter.
    pub fn set_max(&mut self, name: &str, max: f64) {
        if let Some(param) = self.params.get_mut(name) {
            param.set_max(max);
        }
    }

    /// Resolve user configuration against the schema.
    pub fn resolve(&self, config: &ParameterMap) -> Result<ResolvedParameters, ParameterError> {
        if let Some(unknown) = config.keys().find(|k| !self.params.contains_key(*k)) {
            return Err(ParameterError::UnknownParameter(unknown.clone()));
        }

        let mut values = BTreeMap::new();
        for (name, param) in &self.params {
            match config.get(name).filter(|v| !v.is_null()) {
                Some(value) => {
                    param.validate(name, value)?;
                    values.insert(name.clone(), value.clone());
                }
                None => match &param.default {
                    Some(default) => {
                        values.insert(name.clone(), default.clone());
                    }
                    None if param.required => {
                        return Err(ParameterError::MissingParameter(name.clone()));
                    }
                    None => {}
                },
            }
        }

        Ok(ResolvedParameters { values })
    }
}

/// Parameter values after schema resolution.
///
/// Values have passed validation, so getters only return `None` for
/// parameters that are unset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedParameters {
    values: BTreeMap<String, Value>,
}

impl ResolvedParameters {
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    /// List entries rendered as strings; non-string entries use their JSON text.
    pub fn get_string_list(&self, name: &str) -> Option<Vec<String>> {
        self.values.get(name).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()
        })
    }

    /// Numeric list entries; fails if any entry is not a number.
    pub fn get_f32_list(&self, name: &str) -> Result<Option<Vec<f32>>, ParameterError> {
        let Some(items) = self.values.get(name).and_then(Value::as_array) else {
            return Ok(None);
        };
        items
            .iter()
            .map(|v| {
                v.as_f64()
                    .map(|n| n as f32)
                    .ok_or_else(|| ParameterError::InvalidParameter {
                        name: name.to_string(),
                        reason: format!("expected a number, got {}", v),
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}
