#![forbid(unsafe_code)]

use crate::error::{ColumnarError, Result};

/// Raw-long missing sentinel.
const NA_I64: i64 = i64::MIN;
/// 2-bit packed pattern meaning "missing".
const BITS_NA: u8 = 0b10;

const TAG_CONST_F64: u8 = 1;
const TAG_CONST_I64: u8 = 2;
const TAG_BITS: u8 = 3;
const TAG_RAW_I64: u8 = 4;
const TAG_RAW_F64: u8 = 5;

/// One compressed chunk of one column.
///
/// The encoding set is closed and matched exhaustively at the two hot
/// call sites (read, write). A compressor picks the variant; callers
/// never do. Every variant supports the same contract:
/// - O(1) random-access reads (`get_i64` / `get_f64` / `is_missing`);
/// - best-effort in-place writes returning `false` when the value is
///   not representable — the caller then inflates and retries, which is
///   a compression downgrade, never an error;
/// - a symmetric, byte-for-byte exact serialization.
///
/// Missing values: raw longs reserve `i64::MIN`, raw doubles reserve
/// NaN, packed bits reserve an explicit 2-bit pattern. `is_missing`
/// semantics are baked into the accessors (`None` = missing).
#[derive(Clone, Debug, PartialEq)]
pub enum Chunk {
    /// Every row is the same double; a NaN constant is all-missing.
    ConstF64 { value: f64, len: usize },
    /// Every row is the same long. Cannot represent missing.
    ConstI64 { value: i64, len: usize },
    /// Bit-packed booleans, 1 bit per value (no missing) or 2 bits
    /// (missing representable).
    Bits(BitsChunk),
    /// Uncompressed longs, `i64::MIN` = missing. The mutable inflation
    /// target for integral data.
    RawI64(Vec<i64>),
    /// Uncompressed doubles, NaN = missing. The mutable inflation
    /// target for floating-point data.
    RawF64(Vec<f64>),
}

/// Payload of [`Chunk::Bits`]. Values are packed most-significant-first
/// within each byte; `bpv` is 1 or 2.
#[derive(Clone, Debug, PartialEq)]
pub struct BitsChunk {
    bytes: Vec<u8>,
    bpv: u8,
    len: usize,
}

impl BitsChunk {
    /// Pack 0/1/missing values. `bpv` must be 2 when any value is
    /// missing (`None`); with `bpv == 1` missing is unrepresentable.
    pub fn pack(values: &[Option<bool>], bpv: u8) -> BitsChunk {
        debug_assert!(bpv == 1 || bpv == 2);
        let vpb = 8 / bpv as usize; // values per byte
        let mut bytes = vec![0u8; values.len().div_ceil(vpb)];
        for (idx, v) in values.iter().enumerate() {
            let raw = match v {
                Some(true) => 1,
                Some(false) => 0,
                None => {
                    debug_assert_eq!(bpv, 2, "1-bit chunks cannot hold missing");
                    BITS_NA
                }
            };
            let off = bpv as usize * (idx % vpb);
            bytes[idx / vpb] |= raw << (8 - bpv as usize - off);
        }
        BitsChunk {
            bytes,
            bpv,
            len: values.len(),
        }
    }

    fn raw(&self, idx: usize) -> u8 {
        let vpb = 8 / self.bpv as usize;
        let off = self.bpv as usize * (idx % vpb);
        let b = self.bytes[idx / vpb];
        (b >> (8 - self.bpv as usize - off)) & ((1 << self.bpv) - 1)
    }

    fn get(&self, idx: usize) -> Option<i64> {
        let raw = self.raw(idx);
        if self.bpv == 2 && raw == BITS_NA {
            None
        } else {
            Some(raw as i64)
        }
    }
}

impl Chunk {
    pub fn len(&self) -> usize {
        match self {
            Chunk::ConstF64 { len, .. } | Chunk::ConstI64 { len, .. } => *len,
            Chunk::Bits(b) => b.len,
            Chunk::RawI64(v) => v.len(),
            Chunk::RawF64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether reads can produce non-integral values.
    pub fn has_float(&self) -> bool {
        match self {
            Chunk::ConstF64 { value, .. } => !integral(*value),
            Chunk::ConstI64 { .. } | Chunk::Bits(_) | Chunk::RawI64(_) => false,
            Chunk::RawF64(_) => true,
        }
    }

    /// Size of the serialized form in bytes.
    pub fn byte_size(&self) -> usize {
        match self {
            Chunk::ConstF64 { .. } => 1 + 8 + 4,
            Chunk::ConstI64 { .. } => 1 + 8 + 4,
            Chunk::Bits(b) => 1 + 1 + 4 + b.bytes.len(),
            Chunk::RawI64(v) => 1 + 8 * v.len(),
            Chunk::RawF64(v) => 1 + 8 * v.len(),
        }
    }

    /// The value as a long; `None` when missing. Reading a double
    /// encoding through this accessor truncates — a deliberate
    /// narrowing, not an error.
    pub fn get_i64(&self, idx: usize) -> Option<i64> {
        debug_assert!(idx < self.len());
        match self {
            Chunk::ConstF64 { value, .. } => {
                if value.is_nan() {
                    None
                } else {
                    Some(*value as i64)
                }
            }
            Chunk::ConstI64 { value, .. } => Some(*value),
            Chunk::Bits(b) => b.get(idx),
            Chunk::RawI64(v) => {
                let raw = v[idx];
                (raw != NA_I64).then_some(raw)
            }
            Chunk::RawF64(v) => {
                let raw = v[idx];
                (!raw.is_nan()).then_some(raw as i64)
            }
        }
    }

    /// The value as a double; `None` when missing.
    pub fn get_f64(&self, idx: usize) -> Option<f64> {
        debug_assert!(idx < self.len());
        match self {
            Chunk::ConstF64 { value, .. } => (!value.is_nan()).then_some(*value),
            Chunk::ConstI64 { value, .. } => Some(*value as f64),
            Chunk::Bits(b) => b.get(idx).map(|v| v as f64),
            Chunk::RawI64(v) => {
                let raw = v[idx];
                (raw != NA_I64).then_some(raw as f64)
            }
            Chunk::RawF64(v) => {
                let raw = v[idx];
                (!raw.is_nan()).then_some(raw)
            }
        }
    }

    pub fn is_missing(&self, idx: usize) -> bool {
        self.get_f64(idx).is_none() && self.get_i64(idx).is_none()
    }

    /// Best-effort in-place write of a long. `false` means this
    /// representation cannot hold the value losslessly; inflate and
    /// retry.
    pub fn try_set_i64(&mut self, idx: usize, value: i64) -> bool {
        debug_assert!(idx < self.len());
        match self {
            Chunk::ConstF64 { value: con, .. } => {
                *con == value as f64 && integral(*con) && *con as i64 == value
            }
            Chunk::ConstI64 { value: con, .. } => *con == value,
            // Packed chunks never mutate in place.
            Chunk::Bits(_) => false,
            Chunk::RawI64(v) => {
                if value == NA_I64 {
                    return false; // would alias the sentinel
                }
                v[idx] = value;
                true
            }
            Chunk::RawF64(v) => {
                // Longs above 2^53 have no exact double form.
                if (value as f64) as i64 != value {
                    return false;
                }
                v[idx] = value as f64;
                true
            }
        }
    }

    /// Best-effort in-place write of a double. NaN writes the missing
    /// value where the encoding can represent one.
    pub fn try_set_f64(&mut self, idx: usize, value: f64) -> bool {
        debug_assert!(idx < self.len());
        if value.is_nan() {
            return self.try_set_missing(idx);
        }
        match self {
            Chunk::ConstF64 { value: con, .. } => *con == value,
            Chunk::ConstI64 { value: con, .. } => *con as f64 == value,
            Chunk::Bits(_) => false,
            Chunk::RawI64(v) => {
                if integral(value) && value as i64 != NA_I64 {
                    v[idx] = value as i64;
                    true
                } else {
                    false
                }
            }
            Chunk::RawF64(v) => {
                v[idx] = value;
                true
            }
        }
    }

    /// Best-effort in-place write of a missing value.
    pub fn try_set_missing(&mut self, idx: usize) -> bool {
        debug_assert!(idx < self.len());
        match self {
            Chunk::ConstF64 { value, .. } => value.is_nan(),
            Chunk::ConstI64 { .. } => false,
            Chunk::Bits(_) => false,
            Chunk::RawI64(v) => {
                v[idx] = NA_I64;
                true
            }
            Chunk::RawF64(v) => {
                v[idx] = f64::NAN;
                true
            }
        }
    }

    /// Materialize into an uncompressed, fully mutable row-major buffer:
    /// [`Chunk::RawI64`] for integral data, [`Chunk::RawF64`] otherwise.
    pub fn inflate(&self) -> Chunk {
        let float = match self {
            // An integral constant equal to the long sentinel cannot
            // inflate to raw longs without aliasing missing.
            Chunk::ConstF64 { value, .. } => !integral(*value) || *value as i64 == NA_I64,
            Chunk::ConstI64 { value, .. } => *value == NA_I64,
            Chunk::Bits(_) | Chunk::RawI64(_) => false,
            Chunk::RawF64(_) => true,
        };
        if float {
            self.widen_to_f64()
        } else {
            let values = (0..self.len())
                .map(|i| self.get_i64(i).unwrap_or(NA_I64))
                .collect();
            Chunk::RawI64(values)
        }
    }

    /// The widest mutable form; the last resort after an inflated
    /// integral buffer still refuses a write.
    pub fn widen_to_f64(&self) -> Chunk {
        let values = (0..self.len())
            .map(|i| self.get_f64(i).unwrap_or(f64::NAN))
            .collect();
        Chunk::RawF64(values)
    }

    /// Serialize to the exact on-wire form. `from_bytes` of the result
    /// reproduces the chunk byte-for-byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.byte_size());
        match self {
            Chunk::ConstF64 { value, len } => {
                out.push(TAG_CONST_F64);
                out.extend_from_slice(&value.to_le_bytes());
                out.extend_from_slice(&(*len as u32).to_le_bytes());
            }
            Chunk::ConstI64 { value, len } => {
                out.push(TAG_CONST_I64);
                out.extend_from_slice(&value.to_le_bytes());
                out.extend_from_slice(&(*len as u32).to_le_bytes());
            }
            Chunk::Bits(b) => {
                out.push(TAG_BITS);
                out.push(b.bpv);
                out.extend_from_slice(&(b.len as u32).to_le_bytes());
                out.extend_from_slice(&b.bytes);
            }
            Chunk::RawI64(v) => {
                out.push(TAG_RAW_I64);
                for value in v {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
            Chunk::RawF64(v) => {
                out.push(TAG_RAW_F64);
                for value in v {
                    out.extend_from_slice(&value.to_le_bytes());
                }
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Chunk> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| ColumnarError::StoreInconsistency("empty chunk bytes".into()))?;
        let chunk = match tag {
            TAG_CONST_F64 | TAG_CONST_I64 => {
                if body.len() != 12 {
                    return Err(corrupt(tag, body.len()));
                }
                let raw: [u8; 8] = body[..8].try_into().expect("sized above");
                let len: [u8; 4] = body[8..].try_into().expect("sized above");
                let len = u32::from_le_bytes(len) as usize;
                if tag == TAG_CONST_F64 {
                    Chunk::ConstF64 {
                        value: f64::from_le_bytes(raw),
                        len,
                    }
                } else {
                    Chunk::ConstI64 {
                        value: i64::from_le_bytes(raw),
                        len,
                    }
                }
            }
            TAG_BITS => {
                if body.len() < 5 {
                    return Err(corrupt(tag, body.len()));
                }
                let bpv = body[0];
                if bpv != 1 && bpv != 2 {
                    return Err(corrupt(tag, body.len()));
                }
                let len: [u8; 4] = body[1..5].try_into().expect("sized above");
                let len = u32::from_le_bytes(len) as usize;
                let bytes = body[5..].to_vec();
                if bytes.len() != (len * bpv as usize).div_ceil(8) {
                    return Err(corrupt(tag, body.len()));
                }
                Chunk::Bits(BitsChunk { bytes, bpv, len })
            }
            TAG_RAW_I64 | TAG_RAW_F64 => {
                if body.len() % 8 != 0 {
                    return Err(corrupt(tag, body.len()));
                }
                if tag == TAG_RAW_I64 {
                    Chunk::RawI64(
                        body.chunks_exact(8)
                            .map(|c| i64::from_le_bytes(c.try_into().expect("sized above")))
                            .collect(),
                    )
                } else {
                    Chunk::RawF64(
                        body.chunks_exact(8)
                            .map(|c| f64::from_le_bytes(c.try_into().expect("sized above")))
                            .collect(),
                    )
                }
            }
            other => {
                return Err(ColumnarError::StoreInconsistency(format!(
                    "unknown chunk encoding tag {other}"
                )))
            }
        };
        Ok(chunk)
    }
}

fn corrupt(tag: u8, len: usize) -> ColumnarError {
    ColumnarError::StoreInconsistency(format!("corrupt chunk bytes: tag {tag}, body {len} bytes"))
}

/// Exactly representable as i64 with no fractional part.
pub(crate) fn integral(value: f64) -> bool {
    value.fract() == 0.0 && value >= i64::MIN as f64 && value <= i64::MAX as f64
}
