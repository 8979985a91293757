//! Named parameter maps handed to module constructors

use crate::error::*;
use std::collections::BTreeMap;

/// A single parameter value
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(untagged)
)]
pub enum ParamValue {
    /// Boolean switch
    Flag(bool),
    /// Numeric value
    Number(f64),
    /// List of numbers (per-segment or per-port values)
    List(Vec<f64>),
    /// Free text such as a kernel name
    Text(String),
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Flag(b) => write!(f, "{}", b),
            ParamValue::Number(n) => write!(f, "{}", n),
            ParamValue::List(v) => write!(f, "{:?}", v),
            ParamValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Flag(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<Vec<f64>> for ParamValue {
    fn from(v: Vec<f64>) -> Self {
        ParamValue::List(v)
    }
}

/// Parameter map of one `Create` directive
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct ModuleParams {
    values: BTreeMap<String, ParamValue>,
}

impl ModuleParams {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ParamValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw lookup
    pub fn get(&self, key: &str) -> Option<&ParamValue> {
        self.values.get(key)
    }

    /// Iterate over keys in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Numeric parameter, if present
    pub fn number(&self, key: &str) -> Result<Option<f64>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ParamValue::Number(n)) => Ok(Some(*n)),
            Some(ParamValue::List(v)) if v.len() == 1 => Ok(Some(v[0])),
            Some(other) => Err(RuntimeError::invalid_parameter(
                key,
                other.to_string(),
                "a number",
            )),
        }
    }

    /// Numeric parameter with a default
    pub fn number_or(&self, key: &str, default: f64) -> Result<f64> {
        Ok(self.number(key)?.unwrap_or(default))
    }

    /// Non-negative integral parameter with a default
    pub fn count_or(&self, key: &str, default: usize) -> Result<usize> {
        match self.number(key)? {
            None => Ok(default),
            Some(n) if n >= 0.0 && n.fract() == 0.0 && n.is_finite() => Ok(n as usize),
            Some(n) => Err(RuntimeError::invalid_parameter(
                key,
                n.to_string(),
                "a non-negative integer",
            )),
        }
    }

    /// Boolean parameter with a default; accepts `true`/`false` and `"True"`/`"False"`
    pub fn flag_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.values.get(key) {
            None => Ok(default),
            Some(ParamValue::Flag(b)) => Ok(*b),
            Some(ParamValue::Text(s)) if s.eq_ignore_ascii_case("true") => Ok(true),
            Some(ParamValue::Text(s)) if s.eq_ignore_ascii_case("false") => Ok(false),
            Some(other) => Err(RuntimeError::invalid_parameter(
                key,
                other.to_string(),
                "a boolean",
            )),
        }
    }

    /// Text parameter, if present
    pub fn text(&self, key: &str) -> Result<Option<&str>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ParamValue::Text(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(RuntimeError::invalid_parameter(
                key,
                other.to_string(),
                "text",
            )),
        }
    }

    /// List parameter; a single number reads as a one-element list
    pub fn numbers(&self, key: &str) -> Result<Option<Vec<f64>>> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ParamValue::List(v)) => Ok(Some(v.clone())),
            Some(ParamValue::Number(n)) => Ok(Some(vec![*n])),
            Some(other) => Err(RuntimeError::invalid_parameter(
                key,
                other.to_string(),
                "a list of numbers",
            )),
        }
    }

    /// Reject keys a module type does not understand
    pub fn ensure_known(&self, type_tag: &str, known: &[&str]) -> Result<()> {
        for (key, value) in &self.values {
            if !known.contains(&key.as_str()) {
                return Err(RuntimeError::invalid_parameter(
                    key.clone(),
                    value.to_string(),
                    format!("a {} parameter ({})", type_tag, known.join(", ")),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_lookup() {
        let params = ModuleParams::new()
            .with("tau", 10.0)
            .with("type", "Gamma")
            .with("E", vec![0.0, -70.0])
            .with("spaceVariantSigma", "True");

        assert_eq!(params.number("tau").unwrap(), Some(10.0));
        assert_eq!(params.number_or("n", 0.0).unwrap(), 0.0);
        assert_eq!(params.text("type").unwrap(), Some("Gamma"));
        assert_eq!(params.numbers("E").unwrap(), Some(vec![0.0, -70.0]));
        assert!(params.flag_or("spaceVariantSigma", false).unwrap());
        assert!(params.number("type").is_err());
    }

    #[test]
    fn test_count_rejects_fractions() {
        let params = ModuleParams::new().with("n", 2.5);
        assert!(params.count_or("n", 0).is_err());
        let params = ModuleParams::new().with("n", 3.0);
        assert_eq!(params.count_or("n", 0).unwrap(), 3);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let params = ModuleParams::new().with("tau", 1.0).with("gain", 2.0);
        let err = params.ensure_known("LinearFilter", &["tau", "n", "type"]);
        assert!(matches!(err, Err(RuntimeError::InvalidParameter { ref parameter, .. }) if parameter == "gain"));
    }
}
