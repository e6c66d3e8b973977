//! Packed string tensor layout used for string constants:
//! `i32 count`, then `count + 1` i32 offsets starting at zero, then the UTF-8
//! bytes of every string back to back. All integers are little endian.

use crate::error::ConvertError;

pub fn pack_strings<S: AsRef<str>>(strings: &[S]) -> Vec<u8> {
    let total: usize = strings.iter().map(|s| s.as_ref().len()).sum();
    let mut packed = Vec::with_capacity(4 * (strings.len() + 2) + total);

    packed.extend_from_slice(&(strings.len() as i32).to_le_bytes());
    packed.extend_from_slice(&0i32.to_le_bytes());
    let mut offset = 0i32;
    for s in strings {
        offset += s.as_ref().len() as i32;
        packed.extend_from_slice(&offset.to_le_bytes());
    }
    for s in strings {
        packed.extend_from_slice(s.as_ref().as_bytes());
    }
    packed
}

pub fn unpack_strings(packed: &[u8]) -> Result<Vec<String>, ConvertError> {
    let batch_size = read_i32(packed, 0)
        .ok_or_else(|| malformed("no batch size in the packed string tensor"))?;
    if batch_size < 0 {
        return Err(malformed("negative batch size"));
    }
    let batch_size = batch_size as usize;
    let symbols_start = 4 + 4 + 4 * batch_size;
    if packed.len() < symbols_start {
        return Err(malformed("the packed string tensor must contain first string offset and end indices"));
    }
    let symbols = &packed[symbols_start..];

    let mut strings = Vec::with_capacity(batch_size);
    let mut begin = read_i32(packed, 4).unwrap_or(0) as usize;
    for i in 0..batch_size {
        let end = read_i32(packed, 8 + 4 * i).unwrap_or(-1);
        if end < 0 || (end as usize) < begin || end as usize > symbols.len() {
            return Err(malformed("string offsets are out of range"));
        }
        let end = end as usize;
        let s = std::str::from_utf8(&symbols[begin..end])
            .map_err(|e| malformed(&format!("invalid UTF-8 in string {}: {}", i, e)))?;
        strings.push(s.to_string());
        begin = end;
    }
    Ok(strings)
}

fn read_i32(bytes: &[u8], at: usize) -> Option<i32> {
    let chunk = bytes.get(at..at + 4)?;
    Some(i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
}

fn malformed(reason: &str) -> ConvertError {
    ConvertError::Artifact(format!("Incorrect packed string tensor format: {}", reason))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_layout() {
        let packed = pack_strings(&["ab", "", "c"]);
        let expected: Vec<u8> = [3i32, 0, 2, 2, 3]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .chain(*b"abc")
            .collect();
        assert_eq!(packed, expected);
        assert_eq!(unpack_strings(&packed).unwrap(), vec!["ab", "", "c"]);
    }

    #[test]
    fn test_unpack_multibyte() {
        let vocab = vec!["▁hello".to_string(), "Ġworld".to_string()];
        assert_eq!(unpack_strings(&pack_strings(&vocab)).unwrap(), vocab);
    }

    #[test]
    fn test_unpack_rejects_short_input() {
        assert!(unpack_strings(&[1, 0]).is_err());
        // claims two strings but carries no offsets
        assert!(unpack_strings(&2i32.to_le_bytes()).is_err());
    }

    #[test]
    fn test_unpack_rejects_bad_offsets() {
        let mut packed = pack_strings(&["abc"]);
        // end offset past the symbol bytes
        packed[8..12].copy_from_slice(&10i32.to_le_bytes());
        assert!(unpack_strings(&packed).is_err());
    }
}
