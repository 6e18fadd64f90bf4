//! Resources: read-only data addressed by a URI instead of a call.
//!
//! A [`ResourceTemplate`] such as `calculator://square/{number}` names a
//! family of URIs. Reading `calculator://square/3` binds `number = "3"` and
//! hands the bindings to the resource's handler as [`Arguments`].
//!
//! [`Arguments`]: crate::operation::Arguments

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Published metadata for one URI template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplate {
    pub uri_template: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Variable(String),
}

impl ResourceTemplate {
    pub fn new(
        uri_template: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            uri_template: uri_template.into(),
            name: name.into(),
            description: description.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Variable names, in the order they appear.
    pub fn variables(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut rest = self.uri_template.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            names.push(&rest[open + 1..open + close]);
            rest = &rest[open + close + 1..];
        }
        names
    }

    /// Bind `uri` against this template.
    ///
    /// Each variable captures a non-empty run of characters up to the next
    /// literal part and never crosses a `/`. Returns `None` when the URI does
    /// not belong to the template.
    pub fn match_uri(&self, uri: &str) -> Option<Map<String, Value>> {
        let segments = self.segments();
        let mut bindings = Map::new();
        let mut rest = uri;

        for (i, segment) in segments.iter().enumerate() {
            match segment {
                Segment::Literal(text) => {
                    rest = rest.strip_prefix(text.as_str())?;
                }
                Segment::Variable(name) => {
                    let end = match segments.get(i + 1) {
                        Some(Segment::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    let value = &rest[..end];
                    if value.is_empty() || value.contains('/') {
                        return None;
                    }
                    bindings.insert(name.clone(), Value::String(value.to_string()));
                    rest = &rest[end..];
                }
            }
        }

        rest.is_empty().then_some(bindings)
    }

    fn segments(&self) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut rest = self.uri_template.as_str();
        while let Some(open) = rest.find('{') {
            let Some(close) = rest[open..].find('}') else {
                break;
            };
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            segments.push(Segment::Variable(rest[open + 1..open + close].to_string()));
            rest = &rest[open + close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }
        segments
    }
}

impl fmt::Display for ResourceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uri_template, self.name)
    }
}
