//! Typed input schemas for operations.
//!
//! An [`InputSchema`] is the explicit, tagged form of the JSON Schema object
//! that describes an operation's parameters. Operations declare one when they
//! register, it travels over the wire as plain JSON Schema, and argument
//! validation walks this structure rather than inspecting arbitrary JSON.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// The primitive type a single parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    Int,
    Float,
    String,
    Bool,
}

impl ParamKind {
    /// JSON Schema `type` keyword for this kind.
    pub fn json_type(self) -> &'static str {
        match self {
            ParamKind::Int => "integer",
            ParamKind::Float => "number",
            ParamKind::String => "string",
            ParamKind::Bool => "boolean",
        }
    }

    /// Parse a JSON Schema `type` keyword.
    pub fn from_json_type(ty: &str) -> Option<Self> {
        match ty {
            "integer" => Some(ParamKind::Int),
            "number" => Some(ParamKind::Float),
            "string" => Some(ParamKind::String),
            "boolean" => Some(ParamKind::Bool),
            _ => None,
        }
    }

    /// Whether `value` is type-compatible with this kind.
    ///
    /// Floats accept any JSON number, integers only whole ones.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamKind::Int => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_number(),
            ParamKind::String => value.is_string(),
            ParamKind::Bool => value.is_boolean(),
        }
    }
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_type())
    }
}

/// Declaration of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub kind: ParamKind,
    pub required: bool,
    pub description: Option<String>,
}

impl ParamSpec {
    pub fn required(kind: ParamKind) -> Self {
        Self {
            kind,
            required: true,
            description: None,
        }
    }

    pub fn optional(kind: ParamKind) -> Self {
        Self {
            kind,
            required: false,
            description: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Parameter schema of an operation: ordered parameters plus the policy for
/// parameters nobody declared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct InputSchema {
    params: IndexMap<String, ParamSpec>,
    additional_properties: bool,
}

impl InputSchema {
    /// An empty schema. Like JSON Schema, unknown parameters are tolerated
    /// until [`deny_unknown`](Self::deny_unknown) is called.
    pub fn new() -> Self {
        Self {
            params: IndexMap::new(),
            additional_properties: true,
        }
    }

    /// Add (or replace) a parameter.
    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    /// Reject any argument not declared in this schema.
    pub fn deny_unknown(mut self) -> Self {
        self.additional_properties = false;
        self
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamSpec)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.get(name)
    }

    pub fn allows_unknown(&self) -> bool {
        self.additional_properties
    }

    /// Render as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, spec) in &self.params {
            let mut prop = Map::new();
            prop.insert("type".into(), Value::from(spec.kind.json_type()));
            if let Some(desc) = &spec.description {
                prop.insert("description".into(), Value::from(desc.as_str()));
            }
            properties.insert(name.clone(), Value::Object(prop));
            if spec.required {
                required.push(Value::from(name.as_str()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": self.additional_properties,
        })
    }

    /// Parse a JSON Schema object. Only flat objects whose properties carry a
    /// single primitive `type` are representable.
    pub fn from_json_schema(schema: &Value) -> Result<Self, SchemaError> {
        let obj = schema.as_object().ok_or(SchemaError::NotAnObject)?;

        if let Some(ty) = obj.get("type") {
            if ty.as_str() != Some("object") {
                return Err(SchemaError::RootType(ty.to_string()));
            }
        }

        let mut params = IndexMap::new();
        match obj.get("properties") {
            None | Some(Value::Null) => {}
            Some(Value::Object(props)) => {
                for (name, prop) in props {
                    let kind = prop
                        .get("type")
                        .and_then(Value::as_str)
                        .and_then(ParamKind::from_json_type)
                        .ok_or_else(|| SchemaError::Property {
                            name: name.clone(),
                            reason: format!("no supported primitive type in {prop}"),
                        })?;
                    let description = prop
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    params.insert(
                        name.clone(),
                        ParamSpec {
                            kind,
                            required: false,
                            description,
                        },
                    );
                }
            }
            Some(_) => return Err(SchemaError::PropertiesNotObject),
        }

        match obj.get("required") {
            None | Some(Value::Null) => {}
            Some(Value::Array(names)) => {
                for entry in names {
                    let name = entry
                        .as_str()
                        .ok_or_else(|| SchemaError::Required(entry.to_string()))?;
                    match params.get_mut(name) {
                        Some(spec) => spec.required = true,
                        None => return Err(SchemaError::Required(name.to_string())),
                    }
                }
            }
            Some(other) => return Err(SchemaError::Required(other.to_string())),
        }

        let additional_properties = match obj.get("additionalProperties") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => return Err(SchemaError::AdditionalProperties(other.to_string())),
        };

        Ok(Self {
            params,
            additional_properties,
        })
    }

    /// Check `args` against this schema.
    ///
    /// A `null` value counts as absent.
    pub fn validate(&self, args: &Map<String, Value>) -> Result<(), ValidationError> {
        for (name, spec) in &self.params {
            match args.get(name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ValidationError::MissingParameter(name.clone()));
                    }
                }
                Some(value) if !spec.kind.accepts(value) => {
                    return Err(ValidationError::TypeMismatch {
                        name: name.clone(),
                        expected: spec.kind,
                        found: json_type_name(value),
                    });
                }
                Some(_) => {}
            }
        }

        if !self.additional_properties {
            if let Some(extra) = args.keys().find(|k| !self.params.contains_key(*k)) {
                return Err(ValidationError::UnexpectedParameter(extra.clone()));
            }
        }

        Ok(())
    }
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Value> for InputSchema {
    type Error = SchemaError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_json_schema(&value)
    }
}

impl From<InputSchema> for Value {
    fn from(schema: InputSchema) -> Self {
        schema.to_json_schema()
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A JSON Schema that cannot be represented as an [`InputSchema`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error("schema is not a JSON object")]
    NotAnObject,
    #[error("root type must be \"object\", got {0}")]
    RootType(String),
    #[error("\"properties\" must be an object")]
    PropertiesNotObject,
    #[error("property '{name}': {reason}")]
    Property { name: String, reason: String },
    #[error("invalid \"required\" entry: {0}")]
    Required(String),
    #[error("\"additionalProperties\" must be a boolean, got {0}")]
    AdditionalProperties(String),
}

/// Arguments that do not satisfy an [`InputSchema`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("unexpected parameter '{0}'")]
    UnexpectedParameter(String),
    #[error("parameter '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        name: String,
        expected: ParamKind,
        found: &'static str,
    },
}
