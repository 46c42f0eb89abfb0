//! Compiles a compact heuristic schema notation into the strict JSON-schema
//! wire format the generation endpoint enforces.
//!
//! The notation mirrors how the reply shapes are sketched at the call sites:
//! bare type placeholders, a list of strings as an implicit enum, and
//! "bundles" that mix a description, an enum, a numeric range, and a type
//! placeholder in any order. Compilation is pure: the same sketch always
//! yields the same schema.

use std::fmt;

use serde_json::{Value, json};

/// Heuristic schema sketch.
#[derive(Debug, Clone, PartialEq)]
pub enum Sketch {
    /// Type placeholders.
    Str,
    Int,
    Float,
    Bool,
    /// A description. As an object leaf this doubles as "string with this
    /// description"; inside a bundle it is the description member.
    Text(String),
    /// An implicit enum: at least two string alternatives.
    Choices(Vec<String>),
    /// A numeric (min, max) pair.
    Range(f64, f64),
    /// An object: ordered properties, all required, nothing extra allowed.
    Map(Vec<(String, Sketch)>),
    /// An array; the first element is the item-type exemplar.
    Items(Vec<Sketch>),
    /// Description / enum / range / placeholder bundled in any order,
    /// disambiguated by shape.
    Bundle(Vec<Sketch>),
}

impl Sketch {
    pub fn text(s: impl Into<String>) -> Self {
        Sketch::Text(s.into())
    }

    pub fn choices<S: Into<String>>(items: impl IntoIterator<Item = S>) -> Self {
        Sketch::Choices(items.into_iter().map(Into::into).collect())
    }

    pub fn map<S: Into<String>>(entries: impl IntoIterator<Item = (S, Sketch)>) -> Self {
        Sketch::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn bundle(parts: impl IntoIterator<Item = Sketch>) -> Self {
        Sketch::Bundle(parts.into_iter().collect())
    }

    pub fn items(elems: impl IntoIterator<Item = Sketch>) -> Self {
        Sketch::Items(elems.into_iter().collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// A bundle carried neither a type placeholder nor an enum/range to
    /// infer one from.
    Underspecified,
    /// An implicit enum needs at least two alternatives.
    EnumTooSmall(usize),
    /// An array sketch needs an item exemplar.
    EmptyArray,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Underspecified => {
                write!(f, "bundle has no type placeholder and none can be inferred")
            }
            CompileError::EnumTooSmall(n) => {
                write!(f, "enum needs at least 2 alternatives, got {n}")
            }
            CompileError::EmptyArray => write!(f, "array sketch has no item exemplar"),
        }
    }
}

impl std::error::Error for CompileError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl SchemaType {
    fn name(self) -> &'static str {
        match self {
            SchemaType::String => "string",
            SchemaType::Integer => "integer",
            SchemaType::Number => "number",
            SchemaType::Boolean => "boolean",
            SchemaType::Object => "object",
            SchemaType::Array => "array",
        }
    }
}

/// A compiled schema node. Enum and value bounds only ever attach to
/// compatible types; item bounds only to arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaNode {
    pub kind: SchemaType,
    pub description: Option<String>,
    pub choices: Vec<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_items: Option<f64>,
    pub max_items: Option<f64>,
    pub properties: Vec<(String, SchemaNode)>,
    pub items: Option<Box<SchemaNode>>,
}

impl SchemaNode {
    fn new(kind: SchemaType) -> Self {
        Self {
            kind,
            description: None,
            choices: Vec::new(),
            min_value: None,
            max_value: None,
            min_items: None,
            max_items: None,
            properties: Vec::new(),
            items: None,
        }
    }

    pub fn to_value(&self) -> Value {
        let mut out = serde_json::Map::new();
        out.insert("type".into(), json!(self.kind.name()));
        if let Some(desc) = &self.description {
            out.insert("description".into(), json!(desc));
        }
        if self.kind == SchemaType::Object {
            out.insert("additionalProperties".into(), json!(false));
            out.insert(
                "required".into(),
                Value::Array(self.properties.iter().map(|(k, _)| json!(k)).collect()),
            );
            let mut props = serde_json::Map::new();
            for (key, node) in &self.properties {
                props.insert(key.clone(), node.to_value());
            }
            out.insert("properties".into(), Value::Object(props));
        }
        if self.kind == SchemaType::Array {
            if let Some(min) = self.min_items {
                out.insert("minItems".into(), num_value(min));
            }
            if let Some(max) = self.max_items {
                out.insert("maxItems".into(), num_value(max));
            }
            if let Some(items) = &self.items {
                out.insert("items".into(), items.to_value());
            }
        }
        if !self.choices.is_empty() {
            out.insert(
                "enum".into(),
                Value::Array(self.choices.iter().map(|c| json!(c)).collect()),
            );
        }
        if let Some(min) = self.min_value {
            out.insert("minValue".into(), num_value(min));
        }
        if let Some(max) = self.max_value {
            out.insert("maxValue".into(), num_value(max));
        }
        Value::Object(out)
    }
}

fn num_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        json!(n as i64)
    } else {
        json!(n)
    }
}

/// Compiles a sketch into a schema node tree.
pub fn compile(sketch: &Sketch) -> Result<SchemaNode, CompileError> {
    compile_node(sketch, None, None, None)
}

/// Compiles a sketch and wraps it into the strict response-format wire value.
/// A non-object root is wrapped as `{ "<name>": <root> }` so the contract is
/// always a single required object.
pub fn compile_format(
    name: &str,
    description: &str,
    sketch: &Sketch,
) -> Result<Value, CompileError> {
    let node = compile(sketch)?;
    let schema = if node.kind == SchemaType::Object {
        node.to_value()
    } else {
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": [name],
            "properties": { name: node.to_value() },
        })
    };
    Ok(json!({
        "type": "json_schema",
        "json_schema": {
            "name": name,
            "description": description,
            "strict": true,
            "schema": schema,
        },
    }))
}

fn compile_node(
    sketch: &Sketch,
    description: Option<String>,
    choices: Option<Vec<String>>,
    range: Option<(f64, f64)>,
) -> Result<SchemaNode, CompileError> {
    match sketch {
        Sketch::Bundle(parts) => {
            // Disambiguation by shape alone; when a shape repeats, the last
            // occurrence wins. A Range member is always a bound pair, never a
            // type placeholder.
            let mut description = description;
            let mut choices = choices;
            let mut range = range;
            let mut placeholder: Option<&Sketch> = None;
            for part in parts {
                match part {
                    Sketch::Text(s) => description = Some(s.clone()),
                    Sketch::Choices(c) => choices = Some(c.clone()),
                    Sketch::Range(lo, hi) => range = Some((*lo, *hi)),
                    other => placeholder = Some(other),
                }
            }

            match placeholder {
                Some(inner) => compile_node(inner, description, choices, range),
                // No explicit placeholder: an enum implies string, a range
                // implies a numeric type.
                None if choices.is_some() => {
                    compile_node(&Sketch::Str, description, choices, range)
                }
                None => match range {
                    Some((lo, hi)) => {
                        let kind = if lo.fract() != 0.0 || hi.fract() != 0.0 {
                            Sketch::Float
                        } else {
                            Sketch::Int
                        };
                        compile_node(&kind, description, choices, range)
                    }
                    None => Err(CompileError::Underspecified),
                },
            }
        }

        Sketch::Map(entries) => {
            let mut node = SchemaNode::new(SchemaType::Object);
            node.description = description;
            for (key, child) in entries {
                node.properties
                    .push((key.clone(), compile_node(child, None, None, None)?));
            }
            Ok(node)
        }

        Sketch::Items(elems) => {
            let exemplar = elems.first().ok_or(CompileError::EmptyArray)?;
            let mut node = SchemaNode::new(SchemaType::Array);
            node.description = description;
            node.items = Some(Box::new(compile_node(exemplar, None, None, None)?));
            if let Some((lo, hi)) = range {
                node.min_items = Some(lo);
                node.max_items = Some(hi);
            }
            Ok(node)
        }

        // An object leaf that is just a description: a described string.
        Sketch::Text(s) => {
            let mut node = SchemaNode::new(SchemaType::String);
            node.description = Some(s.clone());
            attach(&mut node, None, choices, None)?;
            Ok(node)
        }

        // A bare list of strings is an implicit enum.
        Sketch::Choices(c) => {
            let mut node = SchemaNode::new(SchemaType::String);
            node.description = description;
            attach(&mut node, None, Some(c.clone()), None)?;
            Ok(node)
        }

        // A bare numeric pair: an inferred numeric type with those bounds.
        Sketch::Range(lo, hi) => {
            let kind = if lo.fract() != 0.0 || hi.fract() != 0.0 {
                SchemaType::Number
            } else {
                SchemaType::Integer
            };
            let mut node = SchemaNode::new(kind);
            node.description = description;
            attach(&mut node, None, choices, Some((*lo, *hi)))?;
            Ok(node)
        }

        Sketch::Str | Sketch::Int | Sketch::Float | Sketch::Bool => {
            let kind = match sketch {
                Sketch::Str => SchemaType::String,
                Sketch::Int => SchemaType::Integer,
                Sketch::Float => SchemaType::Number,
                Sketch::Bool => SchemaType::Boolean,
                _ => unreachable!(),
            };
            let mut node = SchemaNode::new(kind);
            node.description = description;
            attach(&mut node, None, choices, range)?;
            Ok(node)
        }
    }
}

/// Attaches enum and bounds where the type allows them; incompatible
/// attachments are discarded.
fn attach(
    node: &mut SchemaNode,
    description: Option<String>,
    choices: Option<Vec<String>>,
    range: Option<(f64, f64)>,
) -> Result<(), CompileError> {
    if let Some(desc) = description {
        node.description = Some(desc);
    }
    if let Some(c) = choices {
        if c.len() < 2 {
            return Err(CompileError::EnumTooSmall(c.len()));
        }
        if node.kind == SchemaType::String {
            node.choices = c;
        }
    }
    if let Some((lo, hi)) = range
        && matches!(node.kind, SchemaType::Integer | SchemaType::Number)
    {
        node.min_value = Some(lo);
        node.max_value = Some(hi);
    }
    Ok(())
}
