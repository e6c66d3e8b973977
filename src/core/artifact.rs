use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use super::container::{Blob, read_constants, write_constants};
use super::io::Reader;
use super::strings::{pack_strings, unpack_strings};
use super::types::{AttributeValue, Attributes, ElementType, NamedPort, Node, Output};
use crate::error::ConvertError;

pub const PARAMETER_OP: &str = "Parameter";
pub const CONSTANT_OP: &str = "Constant";

/// Graph produced by a tokenizer converter.
///
/// The graph is kept as a flat, topologically ordered node list. Constant
/// payloads are not part of the JSON form; they live in a sidecar `.bin`
/// container written next to it by [`ModelArtifact::save`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    pub inputs: Vec<NamedPort>,
    pub outputs: Vec<NamedPort>,
    pub nodes: Vec<Node>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rt_info: BTreeMap<String, AttributeValue>,
    #[serde(skip)]
    constants: BTreeMap<String, Blob>,
}

impl ModelArtifact {
    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn output(&self, name: &str) -> Option<&NamedPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    pub fn node(&self, id: usize) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes_by_op<'a>(&'a self, op: &'a str) -> impl Iterator<Item = &'a Node> + 'a {
        self.nodes.iter().filter(move |n| n.op == op)
    }

    pub fn find_node(&self, op: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.op == op)
    }

    /// Ops of all non-Parameter, non-Constant nodes in graph order
    pub fn op_sequence(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.op != PARAMETER_OP && n.op != CONSTANT_OP)
            .map(|n| n.op.as_str())
            .collect()
    }

    pub fn constant(&self, name: &str) -> Option<&Blob> {
        self.constants.get(name)
    }

    pub fn constant_names(&self) -> Vec<&str> {
        self.constants.keys().map(String::as_str).collect()
    }

    pub fn constant_strings(&self, name: &str) -> Result<Vec<String>, ConvertError> {
        let blob = self
            .constant(name)
            .ok_or_else(|| ConvertError::Artifact(format!("No constant named '{}'", name)))?;
        unpack_strings(&blob.data)
    }

    /// Constant blob feeding input `index` of `node`, if that input is a Constant
    pub fn constant_input(&self, node: &Node, index: usize) -> Option<&Blob> {
        let source = node.inputs.get(index)?;
        let producer = self.nodes.get(source.node)?;
        if producer.op != CONSTANT_OP {
            return None;
        }
        match producer.attribute("name") {
            Some(AttributeValue::String(name)) => self.constants.get(name),
            _ => None,
        }
    }

    /// Write `<dir>/<name>.json` and `<dir>/<name>.bin`, returning the JSON path.
    pub fn save<P: AsRef<Path>>(&self, dir: P) -> Result<PathBuf, ConvertError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let json_path = dir.join(format!("{}.json", self.name));
        let bin_path = json_path.with_extension("bin");

        let json_file = BufWriter::new(File::create(&json_path)?);
        serde_json::to_writer_pretty(json_file, self)?;
        write_constants(BufWriter::new(File::create(&bin_path)?), &self.constants)?;

        info!(
            "Saved {} ({} nodes, {} constants) to {}",
            self.name,
            self.nodes.len(),
            self.constants.len(),
            json_path.display()
        );
        Ok(json_path)
    }

    /// Read an artifact written by [`ModelArtifact::save`].
    pub fn load<P: AsRef<Path>>(json_path: P) -> Result<Self, ConvertError> {
        let json_path = json_path.as_ref();
        let mut artifact: ModelArtifact =
            serde_json::from_reader(BufReader::new(File::open(json_path)?))?;

        let bin_file = File::open(json_path.with_extension("bin"))?;
        let mut reader = Reader::new(BufReader::new(bin_file), 0);
        artifact.constants = read_constants(&mut reader)?;
        artifact.validate()?;
        Ok(artifact)
    }

    fn validate(&self) -> Result<(), ConvertError> {
        for (idx, node) in self.nodes.iter().enumerate() {
            if node.id != idx {
                return Err(ConvertError::Artifact(format!(
                    "Node {} is stored at position {}",
                    node.id, idx
                )));
            }
            for input in &node.inputs {
                let in_range = input.node < idx
                    && self.nodes[input.node].num_outputs > input.port;
                if !in_range {
                    return Err(ConvertError::Artifact(format!(
                        "Node {} ({}) references missing output {}:{}",
                        idx, node.op, input.node, input.port
                    )));
                }
            }
            if node.op == CONSTANT_OP {
                match node.attribute("name") {
                    Some(AttributeValue::String(name)) if self.constants.contains_key(name) => {}
                    _ => {
                        return Err(ConvertError::Artifact(format!(
                            "Constant node {} has no payload",
                            idx
                        )));
                    }
                }
            }
        }
        for port in self.inputs.iter().chain(self.outputs.iter()) {
            let known = self
                .nodes
                .get(port.source.node)
                .is_some_and(|n| n.num_outputs > port.source.port);
            if !known {
                return Err(ConvertError::Artifact(format!(
                    "Port '{}' points at a missing node output",
                    port.name
                )));
            }
        }
        Ok(())
    }
}

pub fn attrs<const N: usize>(pairs: [(&str, AttributeValue); N]) -> Attributes {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Incrementally assembles a [`ModelArtifact`] in topological order.
pub struct GraphBuilder {
    name: String,
    nodes: Vec<Node>,
    inputs: Vec<NamedPort>,
    outputs: Vec<NamedPort>,
    constants: BTreeMap<String, Blob>,
    rt_info: BTreeMap<String, AttributeValue>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            constants: BTreeMap::new(),
            rt_info: BTreeMap::new(),
        }
    }

    fn push(&mut self, op: &str, inputs: &[Output], num_outputs: usize, attributes: Attributes) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node {
            id,
            op: op.to_string(),
            inputs: inputs.to_vec(),
            num_outputs,
            attributes,
        });
        id
    }

    /// Shapes use -1 for a dynamic dimension.
    pub fn parameter(&mut self, name: &str, element_type: ElementType, shape: &[i64]) -> Output {
        let id = self.push(
            PARAMETER_OP,
            &[],
            1,
            attrs([
                ("name", name.into()),
                ("element_type", element_type_name(element_type).into()),
                ("shape", shape.to_vec().into()),
            ]),
        );
        let source = Output { node: id, port: 0 };
        self.inputs.push(NamedPort { name: name.to_string(), source, element_type });
        source
    }

    pub fn constant(&mut self, name: &str, element_type: ElementType, shape: &[i64], data: Vec<u8>) -> Output {
        let mut unique = name.to_string();
        let mut suffix = 1;
        while self.constants.contains_key(&unique) {
            unique = format!("{}_{}", name, suffix);
            suffix += 1;
        }
        let id = self.push(
            CONSTANT_OP,
            &[],
            1,
            attrs([
                ("name", unique.clone().into()),
                ("element_type", element_type_name(element_type).into()),
                ("shape", shape.to_vec().into()),
            ]),
        );
        self.constants.insert(unique, Blob { element_type, data });
        Output { node: id, port: 0 }
    }

    pub fn constant_strings<S: AsRef<str>>(&mut self, name: &str, strings: &[S]) -> Output {
        let packed = pack_strings(strings);
        let len = packed.len() as i64;
        self.constant(name, ElementType::U8, &[len], packed)
    }

    pub fn constant_i32(&mut self, name: &str, values: &[i32]) -> Output {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let shape: &[i64] = if values.len() == 1 { &[] } else { &[values.len() as i64] };
        self.constant(name, ElementType::I32, shape, data)
    }

    pub fn op(&mut self, op: &str, inputs: &[Output], num_outputs: usize, attributes: Attributes) -> Vec<Output> {
        let id = self.push(op, inputs, num_outputs, attributes);
        (0..num_outputs).map(|port| Output { node: id, port }).collect()
    }

    /// Single-output op
    pub fn op1(&mut self, op: &str, inputs: &[Output], attributes: Attributes) -> Output {
        let id = self.push(op, inputs, 1, attributes);
        Output { node: id, port: 0 }
    }

    pub fn result(&mut self, name: &str, source: Output, element_type: ElementType) {
        self.outputs.push(NamedPort { name: name.to_string(), source, element_type });
    }

    pub fn rt_info(&mut self, key: &str, value: impl Into<AttributeValue>) {
        self.rt_info.insert(key.to_string(), value.into());
    }

    pub fn build(self) -> ModelArtifact {
        ModelArtifact {
            name: self.name,
            inputs: self.inputs,
            outputs: self.outputs,
            nodes: self.nodes,
            rt_info: self.rt_info,
            constants: self.constants,
        }
    }
}

fn element_type_name(element_type: ElementType) -> &'static str {
    match element_type {
        ElementType::U8 => "u8",
        ElementType::I32 => "i32",
        ElementType::I64 => "i64",
        ElementType::F32 => "f32",
        ElementType::Boolean => "boolean",
        ElementType::String => "string",
    }
}
