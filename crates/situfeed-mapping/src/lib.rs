#![warn(clippy::unwrap_used, clippy::expect_used)]

//! Config-driven conversion of parsed feed records into wire JSON.
//!
//! The feed's object graph is never serialized as-is. A [`RecordTransformer`]
//! walks it and, per object, applies the [`Rule`] the [`Registry`] resolved
//! for its type name: enum collapsing, value-only projection, or field-level
//! ignore/rename/unwrap/flatten handling.

pub mod config;
pub mod error;
pub mod registry;

pub use config::{ClassMapping, MappingConfig};
pub use error::{ConfigError, Result, TransformError};
pub use registry::{FieldRule, Registry, Rule};

use serde_json::{Map, Value};
use situfeed_core::{Node, Object, SituationRecord};
use std::path::Path;

/// Maximum object nesting the transformer follows.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone)]
pub struct RecordTransformer {
    registry: Registry,
}

impl RecordTransformer {
    pub fn new(config: &MappingConfig) -> Self {
        Self {
            registry: Registry::build(config),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> std::result::Result<Self, ConfigError> {
        Ok(Self::new(&MappingConfig::load(path)?))
    }

    /// Number of resolved type rules.
    pub fn rule_count(&self) -> usize {
        self.registry.len()
    }

    /// Wire document for one record. Always a JSON object.
    pub fn to_wire_document(&self, record: &SituationRecord) -> Result<Value> {
        match self.transform_object(&record.body)? {
            Some(value @ Value::Object(_)) => Ok(value),
            _ => Err(TransformError::NotAnObject(record.record_type.clone())),
        }
    }

    /// Transforms a detached object. `None` when the object produces nothing.
    pub fn transform_object(&self, object: &Object) -> Result<Option<Value>> {
        self.object(object, 0)
    }

    fn node(&self, name: &str, node: &Node, depth: usize) -> Result<Option<Value>> {
        match node {
            Node::Scalar(scalar) => scalar
                .to_json()
                .map(Some)
                .ok_or_else(|| TransformError::NonFiniteNumber(name.to_string())),
            Node::Object(object) => self.object(object, depth),
            Node::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(value) = self.node(name, item, depth)? {
                        values.push(value);
                    }
                }
                Ok(Some(Value::Array(values)))
            }
        }
    }

    fn object(&self, object: &Object, depth: usize) -> Result<Option<Value>> {
        if depth > MAX_DEPTH {
            return Err(TransformError::TooDeep(MAX_DEPTH));
        }
        let rule = match self.registry.rule(&object.type_name) {
            Some(Rule::Enum) => return Ok(object.enum_value().map(Value::String)),
            Some(Rule::ValueOnly(property)) => {
                return match object.get(property) {
                    Some(node) => self.node(property, node, depth + 1),
                    None => Ok(None),
                };
            }
            Some(Rule::Fields(rule)) => Some(rule),
            None => None,
        };

        let mut out = Map::new();
        self.fields(object, rule, depth, &mut out)?;

        match &object.text {
            Some(text) if out.is_empty() => Ok(Some(Value::String(text.clone()))),
            Some(text) => {
                out.entry("value")
                    .or_insert_with(|| Value::String(text.clone()));
                Ok(Some(Value::Object(out)))
            }
            None if out.is_empty() => Ok(None),
            None => Ok(Some(Value::Object(out))),
        }
    }

    fn fields(
        &self,
        object: &Object,
        rule: Option<&FieldRule>,
        depth: usize,
        out: &mut Map<String, Value>,
    ) -> Result<()> {
        let flatten = rule.map(|r| r.flatten.as_slice()).unwrap_or_default();
        let mut flattened = false;

        for (name, node) in &object.fields {
            let name = name.as_str();
            if rule.is_some_and(|r| r.ignore.contains(name)) {
                continue;
            }
            if flatten.iter().any(|f| f == name) {
                if !flattened {
                    flattened = true;
                    emit_flattened(object, rule, flatten, out);
                }
                continue;
            }

            let value = self.node(name, node, depth + 1)?;
            if rule.is_some_and(|r| r.unwrap.contains(name)) {
                if let Some(Value::Object(inner)) = value {
                    for (key, v) in inner {
                        out.entry(key).or_insert(v);
                    }
                    continue;
                }
            }

            let value = match value {
                Some(Value::Array(items)) => Some(Value::Array(items)),
                Some(v) if rule.is_some_and(|r| r.list.contains(name)) => Some(Value::Array(vec![v])),
                other => other,
            };
            if let Some(value) = value.filter(|v| !is_empty(v)) {
                let key = rule.map(|r| r.wire_name(name)).unwrap_or(name);
                out.entry(key).or_insert(value);
            }
        }
        Ok(())
    }
}

/// Collects every listed field as enum strings into one array, emitted
/// under the wire name of the first listed field.
fn emit_flattened(
    object: &Object,
    rule: Option<&FieldRule>,
    flatten: &[String],
    out: &mut Map<String, Value>,
) {
    let values: Vec<Value> = flatten
        .iter()
        .filter_map(|field| object.get(field))
        .flat_map(Node::enum_strings)
        .map(Value::String)
        .collect();
    if values.is_empty() {
        return;
    }
    if let Some(first) = flatten.first() {
        let key = rule.map(|r| r.wire_name(first)).unwrap_or(first);
        out.entry(key).or_insert(Value::Array(values));
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Null => true,
        _ => false,
    }
}
