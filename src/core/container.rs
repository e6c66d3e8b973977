//! `.bin` container holding the constant blobs of a [`ModelArtifact`](super::artifact::ModelArtifact).
//!
//! Layout: magic `TKBN`, u32 version, u64 blob count, then for every blob a
//! length-prefixed name, u32 element type code, u64 byte length and the bytes.

use std::collections::BTreeMap;
use std::io::{BufRead, Seek, Write};

use log::debug;

use super::io::{Reader, Writer};
use super::types::{ConstantInfo, ElementType};
use crate::error::ConvertError;

pub const MAGIC: &[u8; 4] = b"TKBN";
pub const VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    pub element_type: ElementType,
    pub data: Vec<u8>,
}

pub fn write_constants<W: Write>(
    out: W,
    constants: &BTreeMap<String, Blob>,
) -> Result<W, ConvertError> {
    let mut writer = Writer::new(out);
    writer.write_bytes(MAGIC)?;
    writer.write_u32(VERSION)?;
    writer.write_u64(constants.len() as u64)?;
    for (name, blob) in constants {
        writer.write_string(name)?;
        writer.write_u32(blob.element_type.code())?;
        writer.write_u64(blob.data.len() as u64)?;
        writer.write_bytes(&blob.data)?;
    }
    debug!("Wrote {} constants ({} bytes)", constants.len(), writer.position());
    writer.finish()
}

pub fn read_constants<R: BufRead + Seek>(
    reader: &mut Reader<R>,
) -> Result<BTreeMap<String, Blob>, ConvertError> {
    let magic = reader.read_bytes(4)?;
    if magic.as_slice() != MAGIC {
        return Err(ConvertError::Artifact(format!("Bad container magic {:?}", magic)));
    }
    let version = reader.read_u32()?;
    if version != VERSION {
        return Err(ConvertError::Artifact(format!(
            "Unsupported container version {}",
            version
        )));
    }
    let count = reader.read_u64()?;

    let mut constants = BTreeMap::new();
    for _ in 0..count {
        let info = get_constant_info(reader)?;
        let data = reader.read_bytes(info.byte_len)?;
        if constants.insert(info.name.clone(), Blob { element_type: info.element_type, data }).is_some() {
            return Err(ConvertError::Artifact(format!("Duplicate constant '{}'", info.name)));
        }
    }
    if !reader.at_end()? {
        return Err(ConvertError::Artifact("Trailing bytes after the last constant".into()));
    }
    Ok(constants)
}

fn get_constant_info<R: BufRead + Seek>(reader: &mut Reader<R>) -> Result<ConstantInfo, ConvertError> {
    let name = reader.read_string()?;
    let element_type = ElementType::from_code(reader.read_u32()?)?;
    let byte_len = reader.read_u64()?;
    Ok(ConstantInfo { name, element_type, byte_len })
}
