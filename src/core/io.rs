use std::io::{BufRead, Seek, SeekFrom, Write};

use crate::error::ConvertError;

/// Positioned little-endian reader over the `.bin` constant container.
pub struct Reader<R: BufRead + Seek> {
    buffer: R,
    pos: u64,
}

impl<R: BufRead + Seek> Reader<R> {
    pub fn new(buffer: R, initial_pos: u64) -> Self {
        Reader {
            buffer,
            pos: initial_pos,
        }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads `size` bytes. Sizes come from length prefixes in the file, so they
    /// are checked against what is left before anything is allocated.
    pub fn read_bytes(&mut self, size: u64) -> Result<Vec<u8>, ConvertError> {
        let remaining = self.remaining()?;
        if size > remaining {
            return Err(ConvertError::Artifact(format!(
                "Length {} at offset {} exceeds the {} bytes left",
                size, self.pos, remaining
            )));
        }
        let mut vec = vec![0u8; size as usize];
        self.buffer.seek(SeekFrom::Start(self.pos))?;
        self.buffer.read_exact(&mut vec)?;
        self.pos += size;
        Ok(vec)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ConvertError> {
        let mut bytes = [0u8; N];
        self.buffer.seek(SeekFrom::Start(self.pos))?;
        self.buffer.read_exact(&mut bytes)?;
        self.pos += N as u64;
        Ok(bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, ConvertError> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, ConvertError> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_string(&mut self) -> Result<String, ConvertError> {
        let str_len = self.read_u64()?;
        let str_as_bytes = self.read_bytes(str_len)?;
        String::from_utf8(str_as_bytes)
            .map_err(|e| ConvertError::Artifact(format!("Invalid UTF-8 in constant name: {}", e)))
    }

    fn remaining(&mut self) -> Result<u64, ConvertError> {
        let end = self.buffer.seek(SeekFrom::End(0))?;
        self.buffer.seek(SeekFrom::Start(self.pos))?;
        Ok(end.saturating_sub(self.pos))
    }

    /// Whether every byte of the underlying buffer has been consumed
    pub fn at_end(&mut self) -> Result<bool, ConvertError> {
        Ok(self.remaining()? == 0)
    }
}

/// Little-endian writer, the counterpart of [`Reader`].
pub struct Writer<W: Write> {
    buffer: W,
    pos: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(buffer: W) -> Self {
        Writer { buffer, pos: 0 }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), ConvertError> {
        self.buffer.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), ConvertError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), ConvertError> {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_string(&mut self, value: &str) -> Result<(), ConvertError> {
        self.write_u64(value.len() as u64)?;
        self.write_bytes(value.as_bytes())
    }

    pub fn finish(mut self) -> Result<W, ConvertError> {
        self.buffer.flush()?;
        Ok(self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_reader_tracks_position() {
        let mut writer = Writer::new(Vec::new());
        writer.write_u32(7).unwrap();
        writer.write_string("sp_model").unwrap();
        writer.write_u64(3).unwrap();
        assert_eq!(writer.position(), 4 + 8 + 8 + 8);
        let bytes = writer.finish().unwrap();

        let mut reader = Reader::new(Cursor::new(bytes), 0);
        assert_eq!(reader.read_u32().unwrap(), 7);
        assert_eq!(reader.read_string().unwrap(), "sp_model");
        assert!(!reader.at_end().unwrap());
        assert_eq!(reader.read_u64().unwrap(), 3);
        assert_eq!(reader.position(), 28);
        assert!(reader.at_end().unwrap());
    }

    #[test]
    fn test_reader_truncated_input() {
        let mut reader = Reader::new(Cursor::new(vec![1u8, 2]), 0);
        assert!(matches!(reader.read_u32(), Err(ConvertError::Io(_))));
    }

    #[test]
    fn test_read_bytes_rejects_oversized_length() {
        let mut reader = Reader::new(Cursor::new(vec![0u8; 8]), 0);
        assert!(matches!(reader.read_bytes(u64::MAX), Err(ConvertError::Artifact(_))));
        assert!(matches!(reader.read_bytes(9), Err(ConvertError::Artifact(_))));
        assert_eq!(reader.position(), 0);
        assert_eq!(reader.read_bytes(8).unwrap(), vec![0u8; 8]);
    }
}
