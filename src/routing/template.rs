//! Path templates.
//!
//! # Responsibilities
//! - Parse templates like `/users/:id/posts/:post` into literal and placeholder segments
//! - Substitute caller parameters into every placeholder in one pass
//! - Translate to the host router's capture syntax (`/users/{id}`)
//!
//! # Design Decisions
//! - Resolution is all-or-nothing: a missing or falsy value fails the whole path,
//!   a half-substituted URL is never returned
//! - Values are not validated or escaped; request shape belongs to the caller

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde_json::{Map, Value};
use thiserror::Error;

/// String-valued parameters as a handler sees them.
pub type PathParams = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("placeholder ':{placeholder}' in '{template}' has no usable value")]
    Unresolved {
        template: String,
        placeholder: String,
    },

    #[error("malformed path template '{template}': {reason}")]
    Malformed { template: String, reason: String },
}

/// Caller-supplied invocation parameters.
///
/// Values are JSON so callers can pass numbers or strings; they are rendered
/// to strings before reaching a handler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Objects become parameter maps; any other JSON value yields no parameters.
impl From<Value> for Params {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Render a parameter value for a URL path or a handler.
///
/// `null`, `false` and `""` have no usable value. Numbers (including zero)
/// render in their JSON form.
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A parsed path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    /// Parse a template. It must start with `/`, placeholder names must be
    /// identifiers and unique within the template.
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let malformed = |reason: &str| TemplateError::Malformed {
            template: raw.to_string(),
            reason: reason.to_string(),
        };

        let Some(rest) = raw.strip_prefix('/') else {
            return Err(malformed("must start with '/'"));
        };

        let mut seen = BTreeSet::new();
        let mut segments = Vec::new();
        for part in rest.split('/') {
            if part.contains('{') || part.contains('}') {
                return Err(malformed("braces are not allowed in segments"));
            }
            if part.starts_with('*') {
                return Err(malformed("wildcard segments are not supported"));
            }
            match part.strip_prefix(':') {
                Some(name) => {
                    let valid = !name.is_empty()
                        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                    if !valid {
                        return Err(malformed("placeholder names must be identifiers"));
                    }
                    if !seen.insert(name.to_string()) {
                        return Err(malformed("duplicate placeholder name"));
                    }
                    segments.push(Segment::Placeholder(name.to_string()));
                }
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Placeholder(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn has_placeholders(&self) -> bool {
        self.placeholders().next().is_some()
    }

    /// The same path in the host router's capture syntax.
    pub fn router_path(&self) -> String {
        self.join(|name| Some(format!("{{{}}}", name)))
            .unwrap_or_else(|_| self.raw.clone())
    }

    /// The template with placeholder names erased; two templates with the
    /// same shape match the same requests.
    pub fn shape(&self) -> String {
        self.join(|_| Some(":".to_string()))
            .unwrap_or_else(|_| self.raw.clone())
    }

    /// Substitute every placeholder, returning the concrete path together
    /// with the rendered placeholder values.
    pub fn resolve(&self, params: &Params) -> Result<(String, PathParams), TemplateError> {
        let mut rendered = PathParams::new();
        let path = self.join(|name| {
            let value = params.get(name).and_then(render_value)?;
            rendered.insert(name.to_string(), value.clone());
            Some(value)
        })?;
        Ok((path, rendered))
    }

    fn join<F>(&self, mut fill: F) -> Result<String, TemplateError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut path = String::with_capacity(self.raw.len());
        for segment in &self.segments {
            path.push('/');
            match segment {
                Segment::Literal(text) => path.push_str(text),
                Segment::Placeholder(name) => match fill(name) {
                    Some(value) => path.push_str(&value),
                    None => {
                        return Err(TemplateError::Unresolved {
                            template: self.raw.clone(),
                            placeholder: name.clone(),
                        })
                    }
                },
            }
        }
        Ok(path)
    }
}

impl fmt::Display for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Parse `template` and substitute `params` into it.
pub fn substitute(template: &str, params: &Params) -> Result<String, TemplateError> {
    PathTemplate::parse(template)?
        .resolve(params)
        .map(|(path, _)| path)
}
