//! Parameter schemas
//!
//! Each provider describes the parameters it accepts for a capability and
//! model as a `ParamSchema`. Node parameters are resolved against it before a
//! job is started, so a bad value fails synchronously in the UI instead of
//! after a network round-trip.

use crate::provider::Capability;
use loom_core::{LoomError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// A single parameter value as stored on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Interpret a command-line style value: bool, then integer, then float, else text
    pub fn parse_loose(s: &str) -> Self {
        match s {
            "true" => return ParamValue::Bool(true),
            "false" => return ParamValue::Bool(false),
            _ => {}
        }
        if let Ok(i) = s.parse::<i64>() {
            return ParamValue::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return ParamValue::Float(f);
        }
        ParamValue::Text(s.to_string())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParamValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Float(f) => Some(*f),
            ParamValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "integer",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "text",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Text(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Text(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

/// Node parameters, keyed by name
pub type GenParams = BTreeMap<String, ParamValue>;

/// Typed accessors used by providers on resolved params
pub trait ParamsExt {
    fn text(&self, key: &str) -> Option<&str>;
    fn int(&self, key: &str) -> Option<i64>;
    fn float(&self, key: &str) -> Option<f64>;
    fn flag(&self, key: &str) -> Option<bool>;
}

impl ParamsExt for GenParams {
    fn text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(ParamValue::as_str)
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(ParamValue::as_i64)
    }

    fn float(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(ParamValue::as_f64)
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(ParamValue::as_bool)
    }
}

/// The accepted type and range of a parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ParamKind {
    Text,
    Integer { min: Option<i64>, max: Option<i64> },
    Float { min: Option<f64>, max: Option<f64> },
    Bool,
    Choice { values: Vec<String> },
    /// Path to an existing input file (e.g. the image to edit)
    Path,
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKind::Text => write!(f, "text"),
            ParamKind::Integer { min, max } => write!(f, "integer{}", range(min, max)),
            ParamKind::Float { min, max } => write!(f, "float{}", range(min, max)),
            ParamKind::Bool => write!(f, "bool"),
            ParamKind::Choice { values } => write!(f, "one of [{}]", values.join(", ")),
            ParamKind::Path => write!(f, "file path"),
        }
    }
}

fn range<T: fmt::Display>(min: &Option<T>, max: &Option<T>) -> String {
    match (min, max) {
        (Some(lo), Some(hi)) => format!(" [{}..={}]", lo, hi),
        (Some(lo), None) => format!(" [>= {}]", lo),
        (None, Some(hi)) => format!(" [<= {}]", hi),
        (None, None) => String::new(),
    }
}

/// Declaration of one parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default)]
    pub default: Option<ParamValue>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub help: String,
}

impl ParamSpec {
    fn new(name: &str, kind: ParamKind, help: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default: None,
            required: false,
            help: help.to_string(),
        }
    }

    pub fn text(name: &str, help: &str) -> Self {
        Self::new(name, ParamKind::Text, help)
    }

    pub fn integer(name: &str, min: Option<i64>, max: Option<i64>, help: &str) -> Self {
        Self::new(name, ParamKind::Integer { min, max }, help)
    }

    pub fn float(name: &str, min: Option<f64>, max: Option<f64>, help: &str) -> Self {
        Self::new(name, ParamKind::Float { min, max }, help)
    }

    pub fn boolean(name: &str, help: &str) -> Self {
        Self::new(name, ParamKind::Bool, help)
    }

    pub fn choice(name: &str, values: &[&str], help: &str) -> Self {
        let values = values.iter().map(|v| v.to_string()).collect();
        Self::new(name, ParamKind::Choice { values }, help)
    }

    pub fn path(name: &str, help: &str) -> Self {
        Self::new(name, ParamKind::Path, help)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, value: ParamValue) -> Self {
        self.default = Some(value);
        self
    }

    fn check(&self, value: &ParamValue) -> std::result::Result<ParamValue, String> {
        let mismatch = || {
            format!(
                "'{}' expects {}, got {} '{}'",
                self.name,
                self.kind,
                value.type_name(),
                value
            )
        };

        match &self.kind {
            // Loosely parsed input like `prompt=42` is still valid text
            ParamKind::Text => Ok(ParamValue::Text(value.to_string())),
            ParamKind::Bool => value.as_bool().map(ParamValue::Bool).ok_or_else(mismatch),
            ParamKind::Integer { min, max } => {
                let v = value.as_i64().ok_or_else(mismatch)?;
                if min.map(|lo| v < lo).unwrap_or(false) || max.map(|hi| v > hi).unwrap_or(false) {
                    return Err(mismatch());
                }
                Ok(ParamValue::Int(v))
            }
            ParamKind::Float { min, max } => {
                let v = value.as_f64().ok_or_else(mismatch)?;
                if min.map(|lo| v < lo).unwrap_or(false) || max.map(|hi| v > hi).unwrap_or(false) {
                    return Err(mismatch());
                }
                Ok(ParamValue::Float(v))
            }
            ParamKind::Choice { values } => {
                let v = value.to_string();
                if values.iter().any(|allowed| *allowed == v) {
                    Ok(ParamValue::Text(v))
                } else {
                    Err(mismatch())
                }
            }
            ParamKind::Path => {
                let v = value.as_str().ok_or_else(mismatch)?;
                if Path::new(v).is_file() {
                    Ok(value.clone())
                } else {
                    Err(format!("'{}' file not found: {}", self.name, v))
                }
            }
        }
    }
}

/// Parameters accepted by one provider for one capability and model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSchema {
    pub provider: String,
    pub capability: Capability,
    pub model: String,
    pub params: Vec<ParamSpec>,
}

impl ParamSchema {
    pub fn new(provider: &str, capability: Capability, model: &str) -> Self {
        Self {
            provider: provider.to_string(),
            capability,
            model: model.to_string(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validate `params` and fill in defaults.
    ///
    /// Unknown keys, missing required keys and ill-typed or out-of-range
    /// values are all reported together as one `InvalidParams` error.
    pub fn resolve(&self, params: &GenParams) -> Result<GenParams> {
        let mut problems = Vec::new();
        let mut resolved = GenParams::new();

        for key in params.keys() {
            if self.get(key).is_none() {
                problems.push(format!("unknown parameter '{}'", key));
            }
        }

        for spec in &self.params {
            match params.get(&spec.name) {
                Some(value) => match spec.check(value) {
                    Ok(v) => {
                        resolved.insert(spec.name.clone(), v);
                    }
                    Err(e) => problems.push(e),
                },
                None => {
                    if let Some(default) = &spec.default {
                        resolved.insert(spec.name.clone(), default.clone());
                    } else if spec.required {
                        problems.push(format!("missing required parameter '{}'", spec.name));
                    }
                }
            }
        }

        if problems.is_empty() {
            Ok(resolved)
        } else {
            Err(LoomError::InvalidParams(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_schema() -> ParamSchema {
        ParamSchema::new("mock", Capability::ImageGenerate, "mock-image")
            .param(ParamSpec::text("prompt", "What to draw").required())
            .param(
                ParamSpec::integer("width", Some(64), Some(2048), "Width in pixels")
                    .with_default(ParamValue::Int(1024)),
            )
            .param(ParamSpec::float("guidance", Some(0.0), Some(20.0), "Guidance"))
            .param(ParamSpec::choice("aspect", &["1:1", "16:9"], "Aspect ratio"))
    }

    fn params(pairs: &[(&str, ParamValue)]) -> GenParams {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_resolve_fills_defaults() {
        let resolved = image_schema()
            .resolve(&params(&[("prompt", ParamValue::Text("cat".into()))]))
            .unwrap();
        assert_eq!(resolved.text("prompt"), Some("cat"));
        assert_eq!(resolved.int("width"), Some(1024));
        assert!(resolved.get("guidance").is_none());
    }

    #[test]
    fn test_missing_required_rejected() {
        let err = image_schema().resolve(&GenParams::new()).unwrap_err();
        assert!(err.to_string().contains("missing required parameter 'prompt'"));
    }

    #[test]
    fn test_unknown_and_out_of_range_reported_together() {
        let err = image_schema()
            .resolve(&params(&[
                ("prompt", ParamValue::Text("cat".into())),
                ("width", ParamValue::Int(10_000)),
                ("colour", ParamValue::Text("red".into())),
            ]))
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown parameter 'colour'"));
        assert!(msg.contains("'width' expects integer"));
    }

    #[test]
    fn test_int_accepted_for_float() {
        let resolved = image_schema()
            .resolve(&params(&[
                ("prompt", ParamValue::Text("cat".into())),
                ("guidance", ParamValue::Int(7)),
            ]))
            .unwrap();
        assert_eq!(resolved.get("guidance"), Some(&ParamValue::Float(7.0)));
    }

    #[test]
    fn test_choice_validation() {
        let schema = image_schema();
        let ok = params(&[
            ("prompt", ParamValue::Text("cat".into())),
            ("aspect", ParamValue::Text("16:9".into())),
        ]);
        assert!(schema.resolve(&ok).is_ok());

        let bad = params(&[
            ("prompt", ParamValue::Text("cat".into())),
            ("aspect", ParamValue::Text("4:3".into())),
        ]);
        assert!(schema.resolve(&bad).is_err());
    }

    #[test]
    fn test_numeric_text_kept_as_text() {
        let resolved = image_schema()
            .resolve(&params(&[("prompt", ParamValue::parse_loose("42"))]))
            .unwrap();
        assert_eq!(resolved.text("prompt"), Some("42"));
    }

    #[test]
    fn test_path_must_exist() {
        let schema = ParamSchema::new("mock", Capability::ImageEdit, "m")
            .param(ParamSpec::path("image", "Input image").required());
        let missing = params(&[("image", ParamValue::Text("/no/such/file.png".into()))]);
        assert!(schema.resolve(&missing).is_err());

        let file = tempfile::NamedTempFile::new().unwrap();
        let present = params(&[(
            "image",
            ParamValue::Text(file.path().to_string_lossy().to_string()),
        )]);
        assert!(schema.resolve(&present).is_ok());
    }

    #[test]
    fn test_parse_loose() {
        assert_eq!(ParamValue::parse_loose("true"), ParamValue::Bool(true));
        assert_eq!(ParamValue::parse_loose("42"), ParamValue::Int(42));
        assert_eq!(ParamValue::parse_loose("0.5"), ParamValue::Float(0.5));
        assert_eq!(
            ParamValue::parse_loose("a cat"),
            ParamValue::Text("a cat".to_string())
        );
    }

    #[test]
    fn test_params_json_shape() {
        let p = params(&[
            ("prompt", ParamValue::Text("cat".into())),
            ("seed", ParamValue::Int(7)),
        ]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"{"prompt":"cat","seed":7}"#);
        let back: GenParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
    }
}
