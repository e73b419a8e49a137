//! Bounds-checked little-endian cursor over GGUF bytes

use super::value::{MetadataValue, ValueType};
use crate::{Error, Result};

/// Arrays nested deeper than this are rejected
const MAX_ARRAY_DEPTH: usize = 8;

/// Sequential reader tracking a byte cursor
pub(crate) struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

macro_rules! read_le {
    ($name:ident, $ty:ty) => {
        pub(crate) fn $name(&mut self) -> Result<$ty> {
            const N: usize = std::mem::size_of::<$ty>();
            let raw = self.take(N)?;
            let mut buf = [0u8; N];
            buf.copy_from_slice(raw);
            Ok(<$ty>::from_le_bytes(buf))
        }
    };
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Current cursor offset
    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(Error::format(format!(
                "unexpected end of file at offset {} (need {} bytes, {} left)",
                self.pos,
                n,
                self.remaining()
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    read_le!(read_u8, u8);
    read_le!(read_i8, i8);
    read_le!(read_u16, u16);
    read_le!(read_i16, i16);
    read_le!(read_u32, u32);
    read_le!(read_i32, i32);
    read_le!(read_u64, u64);
    read_le!(read_i64, i64);
    read_le!(read_f32, f32);
    read_le!(read_f64, f64);

    /// A count field, rejected if `count * min_item_size` cannot fit in the rest of the file
    pub(crate) fn read_count(&mut self, what: &str, min_item_size: usize) -> Result<usize> {
        let count = self.read_u64()?;
        let fits = usize::try_from(count)
            .ok()
            .filter(|&c| c.saturating_mul(min_item_size) <= self.remaining());
        fits.ok_or_else(|| {
            Error::format(format!(
                "{} count {} at offset {} exceeds file size",
                what,
                count,
                self.pos - 8
            ))
        })
    }

    /// u64 length-prefixed UTF-8 string
    pub(crate) fn read_string(&mut self) -> Result<String> {
        let start = self.pos;
        let len = self.read_count("string length", 1)?;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| Error::format(format!("invalid UTF-8 in string at offset {}", start)))
    }

    /// A value whose type tag has already been read
    pub(crate) fn read_value(&mut self, ty: ValueType) -> Result<MetadataValue> {
        self.read_value_at_depth(ty, 0)
    }

    fn read_value_at_depth(&mut self, ty: ValueType, depth: usize) -> Result<MetadataValue> {
        Ok(match ty {
            ValueType::U8 => MetadataValue::U8(self.read_u8()?),
            ValueType::I8 => MetadataValue::I8(self.read_i8()?),
            ValueType::U16 => MetadataValue::U16(self.read_u16()?),
            ValueType::I16 => MetadataValue::I16(self.read_i16()?),
            ValueType::U32 => MetadataValue::U32(self.read_u32()?),
            ValueType::I32 => MetadataValue::I32(self.read_i32()?),
            ValueType::F32 => MetadataValue::F32(self.read_f32()?),
            ValueType::Bool => MetadataValue::Bool(self.read_u8()? != 0),
            ValueType::String => MetadataValue::String(self.read_string()?),
            ValueType::U64 => MetadataValue::U64(self.read_u64()?),
            ValueType::I64 => MetadataValue::I64(self.read_i64()?),
            ValueType::F64 => MetadataValue::F64(self.read_f64()?),
            ValueType::Array => {
                if depth >= MAX_ARRAY_DEPTH {
                    return Err(Error::format(format!(
                        "arrays nested deeper than {} at offset {}",
                        MAX_ARRAY_DEPTH, self.pos
                    )));
                }
                let item_type = ValueType::from_tag(self.read_u32()?)?;
                // strings carry an 8-byte length, nested arrays a 12-byte header
                let min_size = item_type.fixed_size().unwrap_or(match item_type {
                    ValueType::Array => 12,
                    _ => 8,
                });
                let count = self.read_count("array", min_size)?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.read_value_at_depth(item_type, depth + 1)?);
                }
                MetadataValue::Array(item_type, items)
            }
        })
    }
}
