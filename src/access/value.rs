use anyhow::{bail, Result};
use std::cmp::Ordering;

/// Data types supported by the engine.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Boolean = 1,
    Int32 = 2,
    Varchar = 4,
}

impl DataType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DataType::Boolean),
            2 => Ok(DataType::Int32),
            4 => Ok(DataType::Varchar),
            _ => bail!("Unknown data type: {}", value),
        }
    }
}

/// Values that can be stored in a column.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    String(String),
}

impl Value {
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::String(_) => Some(DataType::Varchar),
        }
    }

    /// NULL is compatible with every column type.
    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        match self.data_type() {
            None => true,
            Some(own) => own == data_type,
        }
    }

    /// Three-way comparison between same-typed values. None when either
    /// side is NULL or the types differ.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Serialize values into the tagged on-page representation.
pub fn serialize_values(values: &[Value]) -> Result<Vec<u8>> {
    let mut data = Vec::new();

    data.extend_from_slice(&(values.len() as u32).to_le_bytes());

    for value in values {
        match value {
            Value::Null => {
                data.push(0);
            }
            Value::Boolean(b) => {
                data.push(DataType::Boolean as u8);
                data.push(if *b { 1 } else { 0 });
            }
            Value::Int32(i) => {
                data.push(DataType::Int32 as u8);
                data.extend_from_slice(&i.to_le_bytes());
            }
            Value::String(s) => {
                data.push(DataType::Varchar as u8);
                let bytes = s.as_bytes();
                data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                data.extend_from_slice(bytes);
            }
        }
    }

    Ok(data)
}

/// Deserialize the tagged representation back into values.
pub fn deserialize_values(data: &[u8]) -> Result<Vec<Value>> {
    if data.len() < 4 {
        bail!("Invalid value data: too short");
    }

    let count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    let mut values = Vec::with_capacity(count);
    let mut pos = 4;

    for _ in 0..count {
        if pos >= data.len() {
            bail!("Invalid value data: truncated");
        }
        let tag = data[pos];
        pos += 1;
        if tag == 0 {
            values.push(Value::Null);
            continue;
        }
        match DataType::from_u8(tag)? {
            DataType::Boolean => {
                if pos >= data.len() {
                    bail!("Invalid value data: truncated boolean");
                }
                values.push(Value::Boolean(data[pos] != 0));
                pos += 1;
            }
            DataType::Int32 => {
                if pos + 4 > data.len() {
                    bail!("Invalid value data: truncated int32");
                }
                let v = i32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
                values.push(Value::Int32(v));
                pos += 4;
            }
            DataType::Varchar => {
                if pos + 4 > data.len() {
                    bail!("Invalid value data: truncated string length");
                }
                let len =
                    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
                        as usize;
                pos += 4;
                if pos + len > data.len() {
                    bail!("Invalid value data: truncated string");
                }
                let s = std::str::from_utf8(&data[pos..pos + len])
                    .map_err(|_| anyhow::anyhow!("Invalid UTF-8 in string value"))?;
                values.push(Value::String(s.to_string()));
                pos += len;
            }
        }
    }

    Ok(values)
}
