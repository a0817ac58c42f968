//! Schema-agnostic object graph for parsed feed documents.
//!
//! The feed is never bound to generated types. Every element becomes a
//! [`Node`]: typed [`Object`]s carry their upstream type name so the mapping
//! registry can pick a rule for them, leaves become [`Scalar`]s.

use serde_json::{Number, Value};

/// One value in the object graph.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Scalar(Scalar),
    Object(Object),
    List(Vec<Node>),
}

/// Leaf value with the type inferred from its text.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    /// Infers a scalar from element text.
    ///
    /// Integers with a leading zero (`"007"`) stay text so identifiers are
    /// not silently reformatted. Non-finite floats stay text as well.
    pub fn infer(text: &str) -> Self {
        match text {
            "true" => return Scalar::Bool(true),
            "false" => return Scalar::Bool(false),
            _ => {}
        }
        let digits = text.strip_prefix('-').unwrap_or(text);
        let leading_zero = digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.");
        if !leading_zero && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(v) = text.parse::<i64>() {
                return Scalar::Integer(v);
            }
        }
        if !leading_zero
            && digits.bytes().any(|b| b == b'.')
            && digits.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'-' | b'+'))
        {
            if let Ok(v) = text.parse::<f64>() {
                if v.is_finite() {
                    return Scalar::Float(v);
                }
            }
        }
        Scalar::Text(text.to_string())
    }

    /// String form, as it appeared upstream (modulo float formatting).
    pub fn as_string(&self) -> String {
        match self {
            Scalar::Text(s) => s.clone(),
            Scalar::Integer(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Bool(v) => v.to_string(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Integer(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            Scalar::Text(s) => s.trim().parse().ok(),
            Scalar::Bool(_) => None,
        }
    }

    /// JSON form. `None` for floats JSON cannot represent.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Scalar::Text(s) => Some(Value::String(s.clone())),
            Scalar::Integer(v) => Some(Value::Number((*v).into())),
            Scalar::Float(v) => Number::from_f64(*v).map(Value::Number),
            Scalar::Bool(v) => Some(Value::Bool(*v)),
        }
    }
}

/// A typed element with ordered, named fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    pub type_name: String,
    /// Character content of an element that also has attributes or children.
    pub text: Option<String>,
    pub fields: Vec<(String, Node)>,
}

impl Object {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            text: None,
            fields: Vec::new(),
        }
    }

    /// Builder-style field insertion, mostly for tests and fixtures.
    pub fn with(mut self, name: impl Into<String>, node: Node) -> Self {
        self.push_field(name, node);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Appends a field. A repeated name merges into a [`Node::List`] at the
    /// position of the first occurrence.
    pub fn push_field(&mut self, name: impl Into<String>, node: Node) {
        let name = name.into();
        if let Some((_, existing)) = self.fields.iter_mut().find(|(n, _)| *n == name) {
            match existing {
                Node::List(items) => items.push(node),
                other => {
                    let first = std::mem::replace(other, Node::List(Vec::new()));
                    *other = Node::List(vec![first, node]);
                }
            }
        } else {
            self.fields.push((name, node));
        }
    }

    pub fn get(&self, name: &str) -> Option<&Node> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, node)| node)
    }

    /// The named child object; the first one when the field is a list.
    pub fn object(&self, name: &str) -> Option<&Object> {
        self.get(name).and_then(Node::first_object)
    }

    /// Every node under `name`, flattening a list field.
    pub fn all(&self, name: &str) -> Vec<&Node> {
        match self.get(name) {
            Some(Node::List(items)) => items.iter().collect(),
            Some(node) => vec![node],
            None => Vec::new(),
        }
    }

    /// Follows a chain of field names through nested objects.
    pub fn path(&self, names: &[&str]) -> Option<&Node> {
        let (last, init) = names.split_last()?;
        let mut current = self;
        for name in init {
            current = current.object(name)?;
        }
        current.get(last)
    }

    /// The string an enum wrapper stands for: its `value` field, one level
    /// down, or its own text.
    pub fn enum_value(&self) -> Option<String> {
        match self.get("value") {
            Some(inner @ Node::Scalar(_)) | Some(inner @ Node::Object(_)) => inner.enum_string(),
            _ => self.text.clone(),
        }
    }

    /// String content of a field: the scalar itself or an object's text.
    pub fn text_of(&self, name: &str) -> Option<String> {
        self.get(name).and_then(Node::enum_string)
    }
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Node::Scalar(Scalar::Text(value.into()))
    }

    pub fn first_object(&self) -> Option<&Object> {
        match self {
            Node::Object(o) => Some(o),
            Node::List(items) => items.iter().find_map(Node::first_object),
            Node::Scalar(_) => None,
        }
    }

    /// Resolves an enum-like node to its string value.
    ///
    /// Scalars resolve to themselves. Objects unwrap one level through a
    /// `value` field when present, otherwise fall back to their own text.
    pub fn enum_string(&self) -> Option<String> {
        match self {
            Node::Scalar(s) => Some(s.as_string()),
            Node::Object(o) => o.enum_value(),
            Node::List(items) => items.iter().find_map(Node::enum_string),
        }
    }

    /// All enum strings under this node; lists contribute every element.
    pub fn enum_strings(&self) -> Vec<String> {
        match self {
            Node::List(items) => items.iter().filter_map(Node::enum_string).collect(),
            other => other.enum_string().into_iter().collect(),
        }
    }
}
