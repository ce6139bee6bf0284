//! Fixed-width index keys and the injected key ordering.
//!
//! Keys are encoded order-preserving (big-endian integers with the sign
//! bit flipped, zero-padded strings), so the lexicographic comparator
//! realizes the typed order with a plain byte comparison.

use crate::access::value::Value;
use anyhow::{bail, Result};
use std::cmp::Ordering;
use std::fmt::Debug;

pub use crate::storage::page::btree_page::KEY_SIZE;

/// A fixed-width comparable key blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexKey([u8; KEY_SIZE]);

impl IndexKey {
    /// Encode column values into a key, in column order.
    pub fn from_values(values: &[Value]) -> Result<Self> {
        let mut buf = [0u8; KEY_SIZE];
        let mut pos = 0;
        for value in values {
            match value {
                Value::Null => bail!("NULL is not allowed in an index key"),
                Value::Boolean(b) => {
                    if pos + 1 > KEY_SIZE {
                        bail!("Key exceeds the fixed key width of {} bytes", KEY_SIZE);
                    }
                    buf[pos] = u8::from(*b);
                    pos += 1;
                }
                Value::Int32(i) => {
                    if pos + 4 > KEY_SIZE {
                        bail!("Key exceeds the fixed key width of {} bytes", KEY_SIZE);
                    }
                    let encoded = (*i as u32) ^ 0x8000_0000;
                    buf[pos..pos + 4].copy_from_slice(&encoded.to_be_bytes());
                    pos += 4;
                }
                Value::String(s) => {
                    let bytes = s.as_bytes();
                    if pos + bytes.len() > KEY_SIZE {
                        bail!("Key exceeds the fixed key width of {} bytes", KEY_SIZE);
                    }
                    buf[pos..pos + bytes.len()].copy_from_slice(bytes);
                    pos += bytes.len();
                }
            }
        }
        Ok(Self(buf))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut buf = [0u8; KEY_SIZE];
        buf.copy_from_slice(&bytes[..KEY_SIZE]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

/// Injected total order over raw key bytes.
pub trait KeyComparator: Send + Sync + Debug {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Byte-wise order; correct for the order-preserving key encoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicographicKeyComparator;

impl KeyComparator for LexicographicKeyComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}
