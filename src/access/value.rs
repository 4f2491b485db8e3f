use crate::storage::error::{StorageError, StorageResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};

/// Maximum number of bytes stored for a string field.
pub const STRING_LEN: usize = 128;

/// Field kinds supported by table files. Every kind has a fixed on-page width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Int,
    String,
}

impl Type {
    /// Encoded width in bytes.
    pub fn byte_len(&self) -> usize {
        match self {
            Type::Int => 4,
            // length prefix + fixed payload
            Type::String => 4 + STRING_LEN,
        }
    }

    /// Decodes one field of this type from `reader`.
    pub fn decode(&self, reader: &mut impl Read) -> StorageResult<Field> {
        match self {
            Type::Int => Ok(Field::Int(reader.read_i32::<BigEndian>()?)),
            Type::String => {
                let len = reader.read_i32::<BigEndian>()?;
                let mut payload = [0u8; STRING_LEN];
                reader.read_exact(&mut payload)?;
                if len < 0 || len as usize > STRING_LEN {
                    return Err(StorageError::Corrupt(format!(
                        "string length {} out of range",
                        len
                    )));
                }
                let text = std::str::from_utf8(&payload[..len as usize])
                    .map_err(|e| StorageError::Corrupt(e.to_string()))?;
                Ok(Field::String(text.to_string()))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "INT"),
            Type::String => write!(f, "STRING"),
        }
    }
}

/// A single column value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    Int(i32),
    String(String),
}

impl Field {
    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::String(_) => Type::String,
        }
    }

    /// Writes exactly `self.field_type().byte_len()` bytes. Strings longer than
    /// [`STRING_LEN`] bytes are truncated on a character boundary.
    pub fn encode(&self, writer: &mut impl Write) -> io::Result<()> {
        match self {
            Field::Int(v) => writer.write_i32::<BigEndian>(*v),
            Field::String(s) => {
                let mut end = s.len().min(STRING_LEN);
                while !s.is_char_boundary(end) {
                    end -= 1;
                }
                let bytes = &s.as_bytes()[..end];
                writer.write_i32::<BigEndian>(bytes.len() as i32)?;
                writer.write_all(bytes)?;
                writer.write_all(&[0u8; STRING_LEN][..STRING_LEN - bytes.len()])
            }
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{}", v),
            Field::String(s) => write!(f, "{}", s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_int_is_big_endian() -> StorageResult<()> {
        let mut buf = Vec::new();
        Field::Int(0x0102_0304).encode(&mut buf)?;
        assert_eq!(buf, vec![1, 2, 3, 4]);
        assert_eq!(Type::Int.decode(&mut Cursor::new(&buf))?, Field::Int(0x0102_0304));
        Ok(())
    }

    #[test]
    fn test_string_is_fixed_width() -> StorageResult<()> {
        let mut buf = Vec::new();
        Field::String("hello".to_string()).encode(&mut buf)?;
        assert_eq!(buf.len(), Type::String.byte_len());
        assert_eq!(&buf[..4], &5i32.to_be_bytes());
        assert!(buf[9..].iter().all(|&b| b == 0));

        let decoded = Type::String.decode(&mut Cursor::new(&buf))?;
        assert_eq!(decoded, Field::String("hello".to_string()));
        Ok(())
    }

    #[test]
    fn test_long_string_truncated_on_char_boundary() -> StorageResult<()> {
        // 127 ASCII bytes followed by a two-byte character that would straddle the limit
        let text = format!("{}é", "a".repeat(STRING_LEN - 1));
        let mut buf = Vec::new();
        Field::String(text).encode(&mut buf)?;
        assert_eq!(buf.len(), Type::String.byte_len());

        let decoded = Type::String.decode(&mut Cursor::new(&buf))?;
        assert_eq!(decoded, Field::String("a".repeat(STRING_LEN - 1)));
        Ok(())
    }

    #[test]
    fn test_corrupt_string_length() {
        let mut buf = vec![0u8; Type::String.byte_len()];
        buf[..4].copy_from_slice(&(STRING_LEN as i32 + 1).to_be_bytes());
        let result = Type::String.decode(&mut Cursor::new(&buf));
        assert!(matches!(result, Err(StorageError::Corrupt(_))));
    }

    #[test]
    fn test_field_type() {
        assert_eq!(Field::Int(1).field_type(), Type::Int);
        assert_eq!(Field::String(String::new()).field_type(), Type::String);
    }
}
