//! Points: the typed leaves of a SunSpec model tree
//!
//! A [`Point`] couples a typed [`Value`] with its identity and locality:
//! name, first register address, access flags, an optional scale linkage
//! and the symbol table for enumerated types. [`PointDef`] is the
//! schema-side description a point is materialized from.

use serde::{Deserialize, Serialize};

use crate::error::SunSpecResult;
use crate::index::Index;
use crate::model::Meta;
use crate::symbol::{SymbolDef, Symbols};
use crate::value::{Scale, Value};

/// Repetition count of a point or group definition.
///
/// Either a literal, or the name of an already-materialized sibling
/// integer/accumulator point whose current value gives the count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Count {
    Literal(u16),
    Reference(String),
}

impl Default for Count {
    fn default() -> Self {
        Count::Literal(1)
    }
}

impl Count {
    /// Serde helper: a literal 1 is the default and gets omitted.
    pub fn is_one(&self) -> bool {
        matches!(self, Count::Literal(1))
    }
}

/// Scale factor source of a point definition: a literal exponent or the
/// name of a sibling `sunssf` point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScaleDef {
    Factor(i16),
    Reference(String),
}

/// Access mode: `"r"` (read-only) or `"rw"` (read-write); plain booleans
/// are accepted for compatibility with simplified schemas.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Access(pub bool);

/// Mandatory marker: `"M"`/`"O"` or boolean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mandatory(pub bool);

/// Static marker: `"S"` (static) / `"D"` (dynamic) or boolean.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Static(pub bool);

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Text(String),
}

fn flag_from<'de, D>(deserializer: D, truthy: &str, falsy: &str) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match FlagRepr::deserialize(deserializer)? {
        FlagRepr::Bool(b) => Ok(b),
        FlagRepr::Text(s) if s.eq_ignore_ascii_case(truthy) => Ok(true),
        FlagRepr::Text(s) if s.eq_ignore_ascii_case(falsy) => Ok(false),
        FlagRepr::Text(s) => Err(serde::de::Error::custom(format!(
            "expected \"{}\" or \"{}\", got \"{}\"",
            truthy, falsy, s
        ))),
    }
}

impl<'de> Deserialize<'de> for Access {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        flag_from(deserializer, "rw", "r").map(Access)
    }
}

impl Serialize for Access {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if self.0 { "rw" } else { "r" })
    }
}

impl<'de> Deserialize<'de> for Mandatory {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        flag_from(deserializer, "m", "o").map(Mandatory)
    }
}

impl Serialize for Mandatory {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if self.0 { "M" } else { "O" })
    }
}

impl<'de> Deserialize<'de> for Static {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        flag_from(deserializer, "s", "d").map(Static)
    }
}

impl Serialize for Static {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(if self.0 { "S" } else { "D" })
    }
}

fn is_default<T: Default + PartialEq>(v: &T) -> bool {
    *v == T::default()
}

/// Definition of a SunSpec point element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointDef {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Count::is_one")]
    pub count: Count,
    #[serde(default, skip_serializing_if = "is_default")]
    pub size: u16,
    #[serde(rename = "sf", default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleDef>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    #[serde(rename = "access", default, skip_serializing_if = "is_default")]
    pub access: Access,
    #[serde(default, skip_serializing_if = "is_default")]
    pub mandatory: Mandatory,
    #[serde(rename = "static", default, skip_serializing_if = "is_default")]
    pub r#static: Static,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<SymbolDef>,
    #[serde(flatten)]
    pub meta: Meta,
}

impl PointDef {
    /// Strip documentation-only meta fields, recursively through symbols.
    pub fn simplify(&mut self) {
        self.meta = Meta::default();
        self.units.clear();
        for symbol in &mut self.symbols {
            symbol.simplify();
        }
    }
}

/// A live point of a materialized model.
#[derive(Debug, Clone)]
pub struct Point {
    name: String,
    address: u16,
    writable: bool,
    r#static: bool,
    value: Value,
    scale: Scale,
    /// Unresolved `sunssf` reference; consumed by scale resolution.
    pub(crate) scale_ref: Option<String>,
    symbols: Symbols,
}

impl Point {
    /// Build a point directly, bypassing a definition.
    ///
    /// Used for the header and marker prototype models the discovery walk
    /// relies on.
    pub(crate) fn new(name: &str, address: u16, r#static: bool, value: Value) -> Self {
        Self {
            name: name.to_string(),
            address,
            writable: false,
            r#static,
            value,
            scale: Scale::None,
            scale_ref: None,
            symbols: Symbols::new(),
        }
    }

    /// Materialize one occurrence of a point definition at `address`.
    pub fn from_def(def: &PointDef, address: u16) -> SunSpecResult<Self> {
        let value = Value::from_def(&def.type_name, def.size, def.value.as_ref())?;
        let (scale, scale_ref) = match &def.scale {
            None => (Scale::None, None),
            Some(ScaleDef::Factor(f)) => (Scale::Fixed(*f), None),
            Some(ScaleDef::Reference(name)) => (Scale::None, Some(name.clone())),
        };
        Ok(Self {
            name: def.name.clone(),
            address,
            writable: def.access.0,
            r#static: def.r#static.0,
            value,
            scale,
            scale_ref,
            symbols: Symbols::from_defs(&def.symbols),
        })
    }

    /// The point's identifier
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First register occupied by the point
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Number of registers occupied
    pub fn quantity(&self) -> u16 {
        self.value.quantity()
    }

    /// Locality of the point in the register address space
    pub fn index(&self) -> Index {
        Index {
            address: self.address,
            quantity: self.quantity(),
        }
    }

    /// Whether clients may write the point
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Whether the value is expected to stay constant over time
    pub fn is_static(&self) -> bool {
        self.r#static
    }

    /// Whether the stored bits differ from the type's unimplemented sentinel
    pub fn valid(&self) -> bool {
        self.value.valid()
    }

    /// The typed value
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Mutable access to the typed value
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    /// The point's symbol table
    pub fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    /// Whether the point carries a scale linkage
    pub fn is_scaled(&self) -> bool {
        self.scale.scaled()
    }

    /// Current scale factor (exponent of 10); 0 when unscaled
    pub fn factor(&self) -> i16 {
        self.scale.factor()
    }

    pub(crate) fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
    }

    /// Scaled value `raw * 10^factor` of integer and accumulator points.
    pub fn scaled(&self) -> Option<f64> {
        match self.value {
            Value::Int16(_)
            | Value::Int32(_)
            | Value::Int64(_)
            | Value::Uint16(_)
            | Value::Uint32(_)
            | Value::Uint64(_)
            | Value::Acc16(_)
            | Value::Acc32(_)
            | Value::Acc64(_) => {
                let raw = self.value.as_f64()?;
                Some(raw * 10f64.powi(self.factor() as i32))
            }
            _ => None,
        }
    }

    /// Active enumerated state of an `enum16`/`enum32` point.
    pub fn state(&self) -> Option<&str> {
        match self.value {
            Value::Enum16(v) => self.symbols.get(v as u32).map(|s| s.name()),
            Value::Enum32(v) => self.symbols.get(v).map(|s| s.name()),
            _ => None,
        }
    }

    /// Names of all set bits of a bitfield point that carry a symbol.
    ///
    /// An unimplemented bitfield reports no states.
    pub fn states(&self) -> Vec<&str> {
        if !self.valid() {
            return Vec::new();
        }
        let (bits, width) = match (self.value.as_u64(), self.value.bit_width()) {
            (Some(bits), Some(width)) => (bits, width),
            _ => return Vec::new(),
        };
        (0..width)
            .filter(|pos| bits & (1u64 << pos) != 0)
            .filter_map(|pos| self.symbols.get(pos).map(|s| s.name()))
            .collect()
    }

    /// Individual bit values of a bitfield point, position 0 first.
    pub fn field(&self) -> Option<Vec<bool>> {
        let bits = self.value.as_u64()?;
        let width = self.value.bit_width()?;
        Some((0..width).map(|pos| bits & (1u64 << pos) != 0).collect())
    }

    /// Set the bit at `pos` of a bitfield point.
    pub fn flip(&mut self, pos: u32, v: bool) -> SunSpecResult<()> {
        self.value.flip(pos, v)
    }

    /// Encode the current value big-endian into `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> SunSpecResult<()> {
        self.value.encode(buf)
    }

    /// Decode the value from `buf`, replacing the stored data.
    pub fn decode(&mut self, buf: &[u8]) -> SunSpecResult<()> {
        self.value.decode(buf)
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {} = {}", self.name, self.address, self.value)
    }
}

/// Total register span of an ordered point slice.
pub fn quantity_of(points: &[&mut Point]) -> u16 {
    points.iter().map(|p| p.quantity()).sum()
}

/// Encode an ordered, address-contiguous point run into one buffer.
pub fn encode_run(points: &[&mut Point], buf: &mut [u8]) -> SunSpecResult<()> {
    let mut offset = 0usize;
    for point in points {
        point.encode(&mut buf[offset..])?;
        offset += 2 * point.quantity() as usize;
    }
    Ok(())
}

/// Decode one buffer into an ordered, address-contiguous point run.
pub fn decode_run(points: &mut [&mut Point], buf: &[u8]) -> SunSpecResult<()> {
    let mut offset = 0usize;
    for point in points {
        point.decode(&buf[offset..])?;
        offset += 2 * point.quantity() as usize;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(json: &str) -> PointDef {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_def_parsing() {
        let d = def(
            r#"{"name": "W", "type": "int16", "sf": "W_SF", "units": "W",
                "access": "rw", "mandatory": "M", "label": "Watts"}"#,
        );
        assert_eq!(d.type_name, "int16");
        assert_eq!(d.scale, Some(ScaleDef::Reference("W_SF".into())));
        assert!(d.access.0);
        assert!(d.mandatory.0);
        assert_eq!(d.count, Count::Literal(1));
        assert_eq!(d.meta.label.as_deref(), Some("Watts"));
    }

    #[test]
    fn test_def_parsing_variants() {
        let d = def(r#"{"name": "N", "type": "uint16", "count": 3, "sf": -2, "static": "S"}"#);
        assert_eq!(d.count, Count::Literal(3));
        assert_eq!(d.scale, Some(ScaleDef::Factor(-2)));
        assert!(d.r#static.0);

        let d = def(r#"{"name": "R", "type": "group", "count": "N", "access": false}"#);
        assert_eq!(d.count, Count::Reference("N".into()));
        assert!(!d.access.0);
    }

    #[test]
    fn test_materialize_point() {
        let d = def(r#"{"name": "AphA", "type": "uint16", "value": 230, "sf": -1}"#);
        let p = Point::from_def(&d, 40010).unwrap();
        assert_eq!(p.name(), "AphA");
        assert_eq!(p.address(), 40010);
        assert_eq!(p.quantity(), 1);
        assert!(!p.writable());
        assert_eq!(p.factor(), -1);
        assert!((p.scaled().unwrap() - 23.0).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_type_fails() {
        let d = def(r#"{"name": "X", "type": "quaternion"}"#);
        assert!(Point::from_def(&d, 0).is_err());
    }

    #[test]
    fn test_enum_state() {
        let d = def(
            r#"{"name": "St", "type": "enum16",
                "symbols": [{"name": "OFF", "value": 1}, {"name": "MPPT", "value": 4}]}"#,
        );
        let mut p = Point::from_def(&d, 0).unwrap();
        p.value_mut().set_unsigned(4).unwrap();
        assert_eq!(p.state(), Some("MPPT"));
        p.value_mut().set_unsigned(2).unwrap();
        assert_eq!(p.state(), None);
    }

    #[test]
    fn test_bitfield_states() {
        let d = def(
            r#"{"name": "Evt1", "type": "bitfield32",
                "symbols": [{"name": "GROUND_FAULT", "value": 0},
                            {"name": "OVER_TEMP", "value": 7}]}"#,
        );
        let mut p = Point::from_def(&d, 0).unwrap();
        p.flip(0, true).unwrap();
        p.flip(7, true).unwrap();
        p.flip(3, true).unwrap(); // no symbol for bit 3
        assert_eq!(p.states(), vec!["GROUND_FAULT", "OVER_TEMP"]);
        assert_eq!(p.field().unwrap().len(), 32);
        assert!(p.field().unwrap()[3]);

        // unimplemented bitfields report nothing
        p.value_mut().set_unsigned(u32::MAX as u64).unwrap();
        assert!(p.states().is_empty());
    }

    #[test]
    fn test_run_codec() {
        let a = def(r#"{"name": "A", "type": "uint16", "value": 1}"#);
        let b = def(r#"{"name": "B", "type": "uint32", "value": 2}"#);
        let mut pa = Point::from_def(&a, 0).unwrap();
        let mut pb = Point::from_def(&b, 1).unwrap();
        let mut run = vec![&mut pa, &mut pb];

        let mut buf = vec![0u8; 2 * quantity_of(&run) as usize];
        encode_run(&run, &mut buf).unwrap();
        assert_eq!(buf, vec![0, 1, 0, 0, 0, 2]);

        decode_run(&mut run, &[0, 9, 0, 0, 0, 8]).unwrap();
        assert_eq!(pa.value().as_u64(), Some(9));
        assert_eq!(pb.value().as_u64(), Some(8));
    }

    #[test]
    fn test_simplify() {
        let mut d = def(
            r#"{"name": "W", "type": "int16", "units": "W", "label": "Watts",
                "desc": "power", "symbols": [{"name": "A", "value": 1, "notes": "n"}]}"#,
        );
        d.simplify();
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "W", "type": "int16",
                               "symbols": [{"name": "A", "value": 1}]})
        );
    }
}
