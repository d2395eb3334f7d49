//! Typed SunSpec point values
//!
//! One [`Value`] variant per SunSpec scalar/composite type. Each variant
//! owns its decoded value, knows its register width, encodes to and
//! decodes from a big-endian register buffer and declares the per-type
//! "unimplemented" sentinel a device uses to signal that a point is not
//! supported.
//!
//! | Variant | Registers | Unimplemented sentinel |
//! |---|---|---|
//! | `int16` / `int32` / `int64` | 1 / 2 / 4 | most negative value |
//! | `uint16` / `uint32` / `uint64` | 1 / 2 / 4 | all ones |
//! | `acc16` / `acc32` / `acc64` | 1 / 2 / 4 | `0` (no counting yet) |
//! | `sunssf` | 1 | `0x8000` |
//! | `enum16` / `enum32` | 1 / 2 | all ones |
//! | `bitfield16` / `32` / `64` | 1 / 2 / 4 | all ones |
//! | `float32` / `float64` | 2 / 4 | quiet NaN bit pattern |
//! | `string` | size | all-zero buffer |
//! | `pad` | 1 | always unimplemented |
//! | `ipaddr` / `ipv6addr` | 2 / 8 | all-zero address |
//! | `eui48` | 4 | none (always valid) |

use std::sync::atomic::{AtomicI16, Ordering};
use std::sync::Arc;

use crate::error::{SunSpecError, SunSpecResult};

/// Quiet NaN bit pattern marking an unimplemented `float32` point.
const FLOAT32_SENTINEL: u32 = 0x7FC0_0000;

/// Canonical NaN bit pattern marking an unimplemented `float64` point.
const FLOAT64_SENTINEL: u64 = 0x7FF8_0000_0000_0000;

/// Shared storage of a `sunssf` scale-factor point.
///
/// Sibling points that scale through this factor hold a clone of the cell,
/// so decoding the scale factor immediately affects their scaled values
/// without any back-pointer into the tree.
#[derive(Debug, Clone, Default)]
pub struct ScaleCell(Arc<AtomicI16>);

impl ScaleCell {
    /// Create a cell holding the given raw factor.
    pub fn new(factor: i16) -> Self {
        Self(Arc::new(AtomicI16::new(factor)))
    }

    /// Current factor (exponent of 10).
    pub fn get(&self) -> i16 {
        self.0.load(Ordering::Relaxed)
    }

    /// Set the factor, enforcing the SunSpec range `-10 ..= 10`.
    pub fn set(&self, factor: i16) -> SunSpecResult<()> {
        if !(-10..=10).contains(&factor) {
            return Err(SunSpecError::value_range(format!(
                "scale factor {} outside -10..=10",
                factor
            )));
        }
        self.0.store(factor, Ordering::Relaxed);
        Ok(())
    }

    /// Store a raw wire value without range enforcement.
    ///
    /// Used by the decoder: the unimplemented sentinel 0x8000 must be
    /// representable so `valid()` can report it.
    pub(crate) fn store_raw(&self, factor: i16) {
        self.0.store(factor, Ordering::Relaxed);
    }
}

/// Scale linkage of a scalable numeric point.
///
/// The scaled value of a point is `raw * 10^factor`. The factor either is
/// a literal from the definition or tracks a sibling `sunssf` point live.
#[derive(Debug, Clone, Default)]
pub enum Scale {
    /// The point is not scalable
    #[default]
    None,
    /// Constant factor from the definition
    Fixed(i16),
    /// Live link to a sibling `sunssf` point's storage
    Linked(ScaleCell),
}

impl Scale {
    /// Whether the point carries a scale at all.
    pub fn scaled(&self) -> bool {
        !matches!(self, Scale::None)
    }

    /// Current factor; unresolved or absent scales yield 0 (factor 1x).
    pub fn factor(&self) -> i16 {
        match self {
            Scale::None => 0,
            Scale::Fixed(f) => *f,
            Scale::Linked(cell) => cell.get(),
        }
    }
}

/// A typed SunSpec point value.
#[derive(Debug, Clone)]
pub enum Value {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Acc16(u16),
    Acc32(u32),
    Acc64(u64),
    Sunssf(ScaleCell),
    Enum16(u16),
    Enum32(u32),
    Bitfield16(u16),
    Bitfield32(u32),
    Bitfield64(u64),
    Float32(f32),
    Float64(f64),
    String(Vec<u8>),
    Pad,
    Ipaddr([u8; 4]),
    Ipv6addr([u8; 16]),
    Eui48([u8; 8]),
}

impl Value {
    /// Instantiate a value from its schema type name.
    ///
    /// `size` is only meaningful for `string` points and counts registers.
    /// `initial` carries the definition's optional `value` field.
    pub fn from_def(
        type_name: &str,
        size: u16,
        initial: Option<&serde_json::Value>,
    ) -> SunSpecResult<Self> {
        let int = |d: i64| initial.and_then(|v| v.as_i64()).unwrap_or(d);
        let uint = |d: u64| initial.and_then(|v| v.as_u64()).unwrap_or(d);
        let float = |d: f64| initial.and_then(|v| v.as_f64()).unwrap_or(d);

        let value = match type_name {
            "int16" => Value::Int16(int(0) as i16),
            "int32" => Value::Int32(int(0) as i32),
            "int64" => Value::Int64(int(0)),
            "uint16" => Value::Uint16(uint(0) as u16),
            "uint32" => Value::Uint32(uint(0) as u32),
            "uint64" => Value::Uint64(uint(0)),
            "acc16" => Value::Acc16(uint(0) as u16),
            "acc32" => Value::Acc32(uint(0) as u32),
            "acc64" => Value::Acc64(uint(0)),
            "sunssf" => Value::Sunssf(ScaleCell::new(int(0) as i16)),
            "enum16" => Value::Enum16(uint(0) as u16),
            "enum32" => Value::Enum32(uint(0) as u32),
            "bitfield16" => Value::Bitfield16(uint(0) as u16),
            "bitfield32" => Value::Bitfield32(uint(0) as u32),
            "bitfield64" => Value::Bitfield64(uint(0)),
            "float32" => Value::Float32(float(0.0) as f32),
            "float64" => Value::Float64(float(0.0)),
            "string" => {
                if size == 0 {
                    return Err(SunSpecError::materialization(
                        "string point requires a non-zero size",
                    ));
                }
                let mut data = vec![0u8; 2 * size as usize];
                if let Some(s) = initial.and_then(|v| v.as_str()) {
                    let n = s.len().min(data.len());
                    data[..n].copy_from_slice(&s.as_bytes()[..n]);
                }
                Value::String(data)
            }
            "pad" => Value::Pad,
            "ipaddr" => Value::Ipaddr([0; 4]),
            "ipv6addr" => Value::Ipv6addr([0; 16]),
            "eui48" => Value::Eui48([0; 8]),
            other => {
                return Err(SunSpecError::materialization(format!(
                    "unknown point type \"{}\"",
                    other
                )))
            }
        };
        Ok(value)
    }

    /// Schema type name of the value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Uint16(_) => "uint16",
            Value::Uint32(_) => "uint32",
            Value::Uint64(_) => "uint64",
            Value::Acc16(_) => "acc16",
            Value::Acc32(_) => "acc32",
            Value::Acc64(_) => "acc64",
            Value::Sunssf(_) => "sunssf",
            Value::Enum16(_) => "enum16",
            Value::Enum32(_) => "enum32",
            Value::Bitfield16(_) => "bitfield16",
            Value::Bitfield32(_) => "bitfield32",
            Value::Bitfield64(_) => "bitfield64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::Pad => "pad",
            Value::Ipaddr(_) => "ipaddr",
            Value::Ipv6addr(_) => "ipv6addr",
            Value::Eui48(_) => "eui48",
        }
    }

    /// Number of 16-bit registers required to store the value.
    pub fn quantity(&self) -> u16 {
        match self {
            Value::Int16(_)
            | Value::Uint16(_)
            | Value::Acc16(_)
            | Value::Sunssf(_)
            | Value::Enum16(_)
            | Value::Bitfield16(_)
            | Value::Pad => 1,
            Value::Int32(_)
            | Value::Uint32(_)
            | Value::Acc32(_)
            | Value::Enum32(_)
            | Value::Bitfield32(_)
            | Value::Float32(_)
            | Value::Ipaddr(_) => 2,
            Value::Int64(_)
            | Value::Uint64(_)
            | Value::Acc64(_)
            | Value::Bitfield64(_)
            | Value::Float64(_)
            | Value::Eui48(_) => 4,
            Value::Ipv6addr(_) => 8,
            Value::String(data) => (data.len() / 2) as u16,
        }
    }

    /// Whether the stored raw bits differ from the per-type sentinel.
    pub fn valid(&self) -> bool {
        match self {
            Value::Int16(v) => *v != i16::MIN,
            Value::Int32(v) => *v != i32::MIN,
            Value::Int64(v) => *v != i64::MIN,
            Value::Uint16(v) => *v != u16::MAX,
            Value::Uint32(v) => *v != u32::MAX,
            Value::Uint64(v) => *v != u64::MAX,
            Value::Acc16(v) => *v != 0,
            Value::Acc32(v) => *v != 0,
            Value::Acc64(v) => *v != 0,
            Value::Sunssf(cell) => cell.get() != i16::MIN,
            Value::Enum16(v) => *v != u16::MAX,
            Value::Enum32(v) => *v != u32::MAX,
            Value::Bitfield16(v) => *v != u16::MAX,
            Value::Bitfield32(v) => *v != u32::MAX,
            Value::Bitfield64(v) => *v != u64::MAX,
            Value::Float32(v) => v.to_bits() != FLOAT32_SENTINEL,
            Value::Float64(v) => v.to_bits() != FLOAT64_SENTINEL,
            Value::String(data) => data.iter().any(|b| *b != 0),
            Value::Pad => false,
            Value::Ipaddr(data) => data.iter().any(|b| *b != 0),
            Value::Ipv6addr(data) => data.iter().any(|b| *b != 0),
            Value::Eui48(_) => true,
        }
    }

    /// Encode the value big-endian into `buf`.
    ///
    /// `buf` must hold at least `2 * quantity()` bytes.
    pub fn encode(&self, buf: &mut [u8]) -> SunSpecResult<()> {
        let size = 2 * self.quantity() as usize;
        if buf.len() < size {
            return Err(SunSpecError::frame(format!(
                "encode buffer too short: need {} bytes, got {}",
                size,
                buf.len()
            )));
        }
        let buf = &mut buf[..size];
        match self {
            Value::Int16(v) => buf.copy_from_slice(&v.to_be_bytes()),
            Value::Int32(v) => buf.copy_from_slice(&v.to_be_bytes()),
            Value::Int64(v) => buf.copy_from_slice(&v.to_be_bytes()),
            Value::Uint16(v) | Value::Acc16(v) | Value::Enum16(v) | Value::Bitfield16(v) => {
                buf.copy_from_slice(&v.to_be_bytes())
            }
            Value::Uint32(v) | Value::Acc32(v) | Value::Enum32(v) | Value::Bitfield32(v) => {
                buf.copy_from_slice(&v.to_be_bytes())
            }
            Value::Uint64(v) | Value::Acc64(v) | Value::Bitfield64(v) => {
                buf.copy_from_slice(&v.to_be_bytes())
            }
            Value::Sunssf(cell) => buf.copy_from_slice(&cell.get().to_be_bytes()),
            Value::Float32(v) => buf.copy_from_slice(&v.to_bits().to_be_bytes()),
            Value::Float64(v) => buf.copy_from_slice(&v.to_bits().to_be_bytes()),
            Value::String(data) => buf.copy_from_slice(data),
            Value::Pad => buf.copy_from_slice(&0x8000u16.to_be_bytes()),
            Value::Ipaddr(data) => buf.copy_from_slice(data),
            Value::Ipv6addr(data) => buf.copy_from_slice(data),
            Value::Eui48(data) => buf.copy_from_slice(data),
        }
        Ok(())
    }

    /// Decode the value big-endian from `buf`.
    ///
    /// Pad points ignore the input; every other variant replaces its
    /// stored value with the raw wire content.
    pub fn decode(&mut self, buf: &[u8]) -> SunSpecResult<()> {
        let size = 2 * self.quantity() as usize;
        if buf.len() < size {
            return Err(SunSpecError::frame(format!(
                "decode buffer too short: need {} bytes, got {}",
                size,
                buf.len()
            )));
        }
        let buf = &buf[..size];
        match self {
            Value::Int16(v) => *v = i16::from_be_bytes(buf.try_into().unwrap()),
            Value::Int32(v) => *v = i32::from_be_bytes(buf.try_into().unwrap()),
            Value::Int64(v) => *v = i64::from_be_bytes(buf.try_into().unwrap()),
            Value::Uint16(v) | Value::Acc16(v) | Value::Enum16(v) | Value::Bitfield16(v) => {
                *v = u16::from_be_bytes(buf.try_into().unwrap())
            }
            Value::Uint32(v) | Value::Acc32(v) | Value::Enum32(v) | Value::Bitfield32(v) => {
                *v = u32::from_be_bytes(buf.try_into().unwrap())
            }
            Value::Uint64(v) | Value::Acc64(v) | Value::Bitfield64(v) => {
                *v = u64::from_be_bytes(buf.try_into().unwrap())
            }
            Value::Sunssf(cell) => cell.store_raw(i16::from_be_bytes(buf.try_into().unwrap())),
            Value::Float32(v) => *v = f32::from_bits(u32::from_be_bytes(buf.try_into().unwrap())),
            Value::Float64(v) => *v = f64::from_bits(u64::from_be_bytes(buf.try_into().unwrap())),
            Value::String(data) => data.copy_from_slice(buf),
            Value::Pad => {}
            Value::Ipaddr(data) => data.copy_from_slice(buf),
            Value::Ipv6addr(data) => data.copy_from_slice(buf),
            Value::Eui48(data) => data.copy_from_slice(buf),
        }
        Ok(())
    }

    /// Signed integer view (`int16/32/64`, `sunssf`).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int16(v) => Some(*v as i64),
            Value::Int32(v) => Some(*v as i64),
            Value::Int64(v) => Some(*v),
            Value::Sunssf(cell) => Some(cell.get() as i64),
            _ => None,
        }
    }

    /// Unsigned integer view (`uint*`, `acc*`, `enum*`, `bitfield*`).
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Uint16(v) | Value::Acc16(v) | Value::Enum16(v) | Value::Bitfield16(v) => {
                Some(*v as u64)
            }
            Value::Uint32(v) | Value::Acc32(v) | Value::Enum32(v) | Value::Bitfield32(v) => {
                Some(*v as u64)
            }
            Value::Uint64(v) | Value::Acc64(v) | Value::Bitfield64(v) => Some(*v),
            _ => None,
        }
    }

    /// Raw (unscaled) numeric view of any numeric variant.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float32(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => self
                .as_i64()
                .map(|v| v as f64)
                .or_else(|| self.as_u64().map(|v| v as f64)),
        }
    }

    /// Raw byte view of string and address variants.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(data) => Some(data),
            Value::Ipaddr(data) => Some(data),
            Value::Ipv6addr(data) => Some(data),
            Value::Eui48(data) => Some(data),
            _ => None,
        }
    }

    /// Repetition-count view for integer and accumulator points.
    ///
    /// This is what a `count` reference in a definition resolves against;
    /// enums, bitfields and scale factors do not qualify.
    pub fn count(&self) -> Option<u16> {
        match self {
            Value::Int16(v) => Some(*v as u16),
            Value::Int32(v) => Some(*v as u16),
            Value::Int64(v) => Some(*v as u16),
            Value::Uint16(v) | Value::Acc16(v) => Some(*v),
            Value::Uint32(v) | Value::Acc32(v) => Some(*v as u16),
            Value::Uint64(v) | Value::Acc64(v) => Some(*v as u16),
            _ => None,
        }
    }

    /// Bit width of bitfield variants.
    pub fn bit_width(&self) -> Option<u32> {
        match self {
            Value::Bitfield16(_) => Some(16),
            Value::Bitfield32(_) => Some(32),
            Value::Bitfield64(_) => Some(64),
            _ => None,
        }
    }

    /// Set the bit at `pos` to `v` on a bitfield variant.
    pub fn flip(&mut self, pos: u32, v: bool) -> SunSpecResult<()> {
        let width = self.bit_width().ok_or_else(|| {
            SunSpecError::value_range(format!("{} is not a bitfield", self.type_name()))
        })?;
        if pos >= width {
            return Err(SunSpecError::value_range(format!(
                "bit position {} outside 0..{}",
                pos, width
            )));
        }
        match self {
            Value::Bitfield16(b) => *b = if v { *b | (1 << pos) } else { *b & !(1 << pos) },
            Value::Bitfield32(b) => *b = if v { *b | (1 << pos) } else { *b & !(1 << pos) },
            Value::Bitfield64(b) => *b = if v { *b | (1 << pos) } else { *b & !(1 << pos) },
            _ => unreachable!(),
        }
        Ok(())
    }

    /// Set a signed integer variant, checking the target range.
    pub fn set_integer(&mut self, v: i64) -> SunSpecResult<()> {
        match self {
            Value::Int16(data) => {
                *data = i16::try_from(v)
                    .map_err(|_| SunSpecError::value_range(format!("{} outside int16", v)))?
            }
            Value::Int32(data) => {
                *data = i32::try_from(v)
                    .map_err(|_| SunSpecError::value_range(format!("{} outside int32", v)))?
            }
            Value::Int64(data) => *data = v,
            Value::Sunssf(cell) => {
                let f = i16::try_from(v)
                    .map_err(|_| SunSpecError::value_range(format!("{} outside sunssf", v)))?;
                cell.set(f)?;
            }
            other => {
                return Err(SunSpecError::value_range(format!(
                    "cannot assign a signed integer to {}",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Set an unsigned integer variant, checking the target range.
    pub fn set_unsigned(&mut self, v: u64) -> SunSpecResult<()> {
        let narrow16 = |v: u64| {
            u16::try_from(v).map_err(|_| SunSpecError::value_range(format!("{} outside 16 bits", v)))
        };
        let narrow32 = |v: u64| {
            u32::try_from(v).map_err(|_| SunSpecError::value_range(format!("{} outside 32 bits", v)))
        };
        match self {
            Value::Uint16(data) | Value::Acc16(data) | Value::Enum16(data)
            | Value::Bitfield16(data) => *data = narrow16(v)?,
            Value::Uint32(data) | Value::Acc32(data) | Value::Enum32(data)
            | Value::Bitfield32(data) => *data = narrow32(v)?,
            Value::Uint64(data) | Value::Acc64(data) | Value::Bitfield64(data) => *data = v,
            other => {
                return Err(SunSpecError::value_range(format!(
                    "cannot assign an unsigned integer to {}",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Set a floating point variant.
    pub fn set_float(&mut self, v: f64) -> SunSpecResult<()> {
        match self {
            Value::Float32(data) => *data = v as f32,
            Value::Float64(data) => *data = v,
            other => {
                return Err(SunSpecError::value_range(format!(
                    "cannot assign a float to {}",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    /// Set a string variant; the content is copied up to the buffer
    /// capacity and the unused tail is zeroed.
    pub fn set_string(&mut self, s: &str) -> SunSpecResult<()> {
        match self {
            Value::String(data) => {
                let n = s.len().min(data.len());
                data.fill(0);
                data[..n].copy_from_slice(&s.as_bytes()[..n]);
                Ok(())
            }
            other => Err(SunSpecError::value_range(format!(
                "cannot assign a string to {}",
                other.type_name()
            ))),
        }
    }

    /// Set an address variant from raw bytes (copied up to capacity).
    pub fn set_bytes(&mut self, bytes: &[u8]) -> SunSpecResult<()> {
        let data: &mut [u8] = match self {
            Value::Ipaddr(data) => data,
            Value::Ipv6addr(data) => data,
            Value::Eui48(data) => data,
            Value::String(data) => data,
            other => {
                return Err(SunSpecError::value_range(format!(
                    "cannot assign raw bytes to {}",
                    other.type_name()
                )))
            }
        };
        let n = bytes.len().min(data.len());
        data.fill(0);
        data[..n].copy_from_slice(&bytes[..n]);
        Ok(())
    }

    /// The shared factor cell of a `sunssf` variant.
    pub(crate) fn scale_cell(&self) -> Option<&ScaleCell> {
        match self {
            Value::Sunssf(cell) => Some(cell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(data) => {
                let end = data.iter().rposition(|b| *b != 0).map_or(0, |p| p + 1);
                write!(f, "{}", String::from_utf8_lossy(&data[..end]))
            }
            Value::Pad => Ok(()),
            Value::Ipaddr(data) => {
                write!(f, "{}", std::net::Ipv4Addr::from(*data))
            }
            Value::Ipv6addr(data) => {
                write!(f, "{}", std::net::Ipv6Addr::from(*data))
            }
            Value::Eui48(data) => {
                let hex: Vec<String> = data.iter().map(|b| format!("{:02x}", b)).collect();
                write!(f, "{}", hex.join(":"))
            }
            other => match (other.as_i64(), other.as_u64()) {
                (Some(v), _) => write!(f, "{}", v),
                (_, Some(v)) => write!(f, "{}", v),
                _ => Ok(()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &mut Value) -> Value {
        let mut buf = vec![0u8; 2 * value.quantity() as usize];
        value.encode(&mut buf).unwrap();
        let mut decoded = value.clone();
        decoded.decode(&buf).unwrap();
        decoded
    }

    #[test]
    fn test_quantities() {
        assert_eq!(Value::Int16(0).quantity(), 1);
        assert_eq!(Value::Uint32(0).quantity(), 2);
        assert_eq!(Value::Acc64(0).quantity(), 4);
        assert_eq!(Value::Float32(0.0).quantity(), 2);
        assert_eq!(Value::Ipv6addr([0; 16]).quantity(), 8);
        assert_eq!(Value::Eui48([0; 8]).quantity(), 4);
        assert_eq!(Value::String(vec![0; 32]).quantity(), 16);
        assert_eq!(Value::Pad.quantity(), 1);
    }

    #[test]
    fn test_integer_roundtrip() {
        let mut v = Value::Int16(-1234);
        assert_eq!(roundtrip(&mut v).as_i64(), Some(-1234));

        let mut v = Value::Int64(-0x1122_3344_5566i64);
        assert_eq!(roundtrip(&mut v).as_i64(), Some(-0x1122_3344_5566i64));

        let mut v = Value::Uint32(0xDEAD_BEEF);
        assert_eq!(roundtrip(&mut v).as_u64(), Some(0xDEAD_BEEF));
    }

    #[test]
    fn test_big_endian_layout() {
        let mut buf = [0u8; 4];
        Value::Uint32(0x1234_5678).encode(&mut buf).unwrap();
        assert_eq!(buf, [0x12, 0x34, 0x56, 0x78]);

        Value::Int16(-2).encode(&mut buf[..2]).unwrap();
        assert_eq!(&buf[..2], &[0xFF, 0xFE]);
    }

    #[test]
    fn test_float_roundtrip() {
        let mut v = Value::Float32(-2.75);
        assert_eq!(roundtrip(&mut v).as_f64(), Some(-2.75));

        let mut v = Value::Float64(1234.5678);
        assert_eq!(roundtrip(&mut v).as_f64(), Some(1234.5678));
    }

    #[test]
    fn test_sentinels() {
        assert!(!Value::Int16(i16::MIN).valid());
        assert!(Value::Int16(-32767).valid());
        assert!(!Value::Uint16(0xFFFF).valid());
        assert!(!Value::Acc32(0).valid());
        assert!(Value::Acc32(1).valid());
        assert!(!Value::Bitfield64(u64::MAX).valid());
        assert!(!Value::Float32(f32::from_bits(FLOAT32_SENTINEL)).valid());
        assert!(Value::Float32(f32::NEG_INFINITY).valid());
        assert!(!Value::Float64(f64::from_bits(FLOAT64_SENTINEL)).valid());
        assert!(!Value::String(vec![0; 8]).valid());
        assert!(Value::String(vec![0, b'x', 0, 0]).valid());
        assert!(!Value::Pad.valid());
        assert!(!Value::Ipaddr([0; 4]).valid());
        assert!(Value::Ipaddr([192, 168, 0, 1]).valid());
        assert!(Value::Eui48([0; 8]).valid());
    }

    #[test]
    fn test_sentinel_decode_roundtrip() {
        // decode(encode(sentinel)) keeps the point invalid; a neighbouring
        // bit pattern flips it valid
        let mut v = Value::Int16(i16::MIN);
        let decoded = roundtrip(&mut v);
        assert!(!decoded.valid());

        let mut v = Value::Int16(-32767);
        let decoded = roundtrip(&mut v);
        assert!(decoded.valid());
        assert_eq!(decoded.as_i64(), Some(-32767));
    }

    #[test]
    fn test_pad_semantics() {
        let mut buf = [0u8; 2];
        Value::Pad.encode(&mut buf).unwrap();
        assert_eq!(buf, [0x80, 0x00]);

        let mut pad = Value::Pad;
        pad.decode(&[0xAB, 0xCD]).unwrap();
        assert!(!pad.valid());
    }

    #[test]
    fn test_string_buffer_semantics() {
        let mut v = Value::String(vec![0; 8]);
        v.set_string("sunny day and more").unwrap();
        // copied up to capacity
        assert_eq!(v.as_bytes().unwrap(), b"sunny da");

        v.set_string("ab").unwrap();
        // tail zeroed after shorter assignment
        assert_eq!(v.as_bytes().unwrap(), b"ab\0\0\0\0\0\0");
        assert_eq!(format!("{}", v), "ab");

        let decoded = roundtrip(&mut v);
        assert_eq!(decoded.as_bytes().unwrap(), b"ab\0\0\0\0\0\0");
    }

    #[test]
    fn test_sunssf_range() {
        let mut v = Value::Sunssf(ScaleCell::new(0));
        assert!(v.set_integer(-3).is_ok());
        assert!(v.set_integer(11).is_err());
        assert!(v.set_integer(-11).is_err());
        assert_eq!(v.as_i64(), Some(-3));

        // wire sentinel decodes fine and reports invalid
        v.decode(&0x8000u16.to_be_bytes()).unwrap();
        assert!(!v.valid());
    }

    #[test]
    fn test_bitfield_flip() {
        let mut v = Value::Bitfield16(0);
        v.flip(0, true).unwrap();
        v.flip(3, true).unwrap();
        assert_eq!(v.as_u64(), Some(0b1001));
        v.flip(0, false).unwrap();
        assert_eq!(v.as_u64(), Some(0b1000));
        assert!(v.flip(16, true).is_err());

        let mut v = Value::Bitfield64(0);
        v.flip(63, true).unwrap();
        assert_eq!(v.as_u64(), Some(1 << 63));
        assert!(v.flip(64, true).is_err());
    }

    #[test]
    fn test_setter_range_checks() {
        let mut v = Value::Uint16(0);
        assert!(v.set_unsigned(0x1_0000).is_err());
        assert!(v.set_unsigned(0xFFFF).is_ok());

        let mut v = Value::Int32(0);
        assert!(v.set_integer(i64::from(i32::MAX) + 1).is_err());

        let mut v = Value::Pad;
        assert!(v.set_integer(1).is_err());
    }

    #[test]
    fn test_address_display() {
        let v = Value::Ipaddr([10, 0, 0, 42]);
        assert_eq!(format!("{}", v), "10.0.0.42");

        let v = Value::Eui48([0, 0, 0x1B, 0x44, 0x11, 0x3A, 0xB7, 0xFF]);
        assert_eq!(format!("{}", v), "00:00:1b:44:11:3a:b7:ff");
    }

    #[test]
    fn test_from_def() {
        let v = Value::from_def("uint16", 0, Some(&serde_json::json!(7))).unwrap();
        assert_eq!(v.as_u64(), Some(7));

        let v = Value::from_def("string", 4, Some(&serde_json::json!("SunS"))).unwrap();
        assert_eq!(v.as_bytes().unwrap(), b"SunS\0\0\0\0");

        assert!(Value::from_def("complex128", 0, None).is_err());
        assert!(Value::from_def("string", 0, None).is_err());
    }

    #[test]
    fn test_count_view() {
        assert_eq!(Value::Uint16(3).count(), Some(3));
        assert_eq!(Value::Acc32(9).count(), Some(9));
        assert_eq!(Value::Int16(2).count(), Some(2));
        assert_eq!(Value::Enum16(3).count(), None);
        assert_eq!(Value::Sunssf(ScaleCell::new(1)).count(), None);
    }

    #[test]
    fn test_linked_scale_tracks_cell() {
        let cell = ScaleCell::new(-2);
        let scale = Scale::Linked(cell.clone());
        assert_eq!(scale.factor(), -2);
        cell.set(3).unwrap();
        assert_eq!(scale.factor(), 3);
        assert_eq!(Scale::None.factor(), 0);
        assert!(!Scale::None.scaled());
        assert!(scale.scaled());
    }
}
