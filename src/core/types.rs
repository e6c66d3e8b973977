use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConvertError;

/// Element type of a graph tensor.
/// The numeric codes are the ones written to the `.bin` constant container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    U8,
    I32,
    I64,
    F32,
    Boolean,
    String,
}

impl ElementType {
    pub fn code(self) -> u32 {
        match self {
            ElementType::U8 => 0,
            ElementType::I32 => 1,
            ElementType::I64 => 2,
            ElementType::F32 => 3,
            ElementType::Boolean => 4,
            ElementType::String => 5,
        }
    }

    pub fn from_code(value: u32) -> Result<Self, ConvertError> {
        match value {
            0 => Ok(ElementType::U8),
            1 => Ok(ElementType::I32),
            2 => Ok(ElementType::I64),
            3 => Ok(ElementType::F32),
            4 => Ok(ElementType::Boolean),
            5 => Ok(ElementType::String),
            _ => Err(ConvertError::Artifact(format!("Unknown element type code {}", value))),
        }
    }
}

/// Value of a node attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Strings(Vec<String>),
    Ints(Vec<i64>),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        AttributeValue::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::String(value)
    }
}

impl From<Vec<String>> for AttributeValue {
    fn from(value: Vec<String>) -> Self {
        AttributeValue::Strings(value)
    }
}

impl From<Vec<i64>> for AttributeValue {
    fn from(value: Vec<i64>) -> Self {
        AttributeValue::Ints(value)
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// Reference to one output port of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub node: usize,
    pub port: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: usize,
    pub op: String,
    pub inputs: Vec<Output>,
    pub num_outputs: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

impl Node {
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// Graph input or output, bound to a node port by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedPort {
    pub name: String,
    pub source: Output,
    pub element_type: ElementType,
}

/// Metadata of one blob in the `.bin` constant container
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantInfo {
    pub name: String,
    pub element_type: ElementType,
    pub byte_len: u64,
}
