//! Models: self-describing register blocks and their materialization
//!
//! A SunSpec model is a group tree whose first two points are the `ID`
//! and `L` header. [`ModelDef::instance`] turns a declarative definition
//! into a live, address-assigned [`Model`]: points are created in order,
//! repeat counts are taken from already-materialized sibling points,
//! scale references are linked, and after each group's points exist a
//! [`PointFetcher`] callback runs so a client can load device state that
//! subsequent repeat counts depend on.
//!
//! [`verify`] checks a materialized model against the structural SunSpec
//! rules: identifier alphabet, contiguous addressing and the
//! `L + 2 == quantity` header invariant.

use std::sync::OnceLock;

use async_trait::async_trait;
use futures::future::BoxFuture;
use log::debug;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SunSpecError, SunSpecResult};
use crate::group::{Group, GroupDef, GroupType};
use crate::index::Index;
use crate::point::{Count, Point};
use crate::value::{Scale, Value};

/// Register quantity of the `(ID, L)` model header.
pub const HEADER_QUANTITY: u16 = 2;

/// Documentation-only fields shared by all schema elements.
///
/// A "simplify" pass strips these to produce a minimal schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "desc", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
}

/// Definition of a SunSpec model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDef {
    pub id: u16,
    pub group: GroupDef,
    #[serde(flatten)]
    pub meta: Meta,
}

impl ModelDef {
    /// The model identifier this definition describes.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Strip documentation-only meta fields from the whole definition.
    pub fn simplify(&mut self) {
        self.meta = Meta::default();
        self.group.simplify();
    }

    /// Materialize the definition into a live model starting at `address`.
    ///
    /// `fetch` is invoked once per group, after the group's points have
    /// been created and scale-linked; the client's scan uses it to read
    /// the points so that dynamic repeat counts of nested groups reflect
    /// device state. Use [`NoFetch`] when no device is involved.
    pub async fn instance(
        &self,
        address: u16,
        fetch: &mut dyn PointFetcher,
    ) -> SunSpecResult<Model> {
        debug!("materializing model {} at address {}", self.id, address);
        let mut cursor = address as u32;
        let group = instantiate(&self.group, &mut cursor, &[], fetch).await?;
        let mut model = Model { group };

        let quantity = model.quantity();
        let header = |e: SunSpecError| {
            SunSpecError::materialization(format!("model {} header: {}", self.id, e))
        };
        model
            .group
            .point_mut("ID")
            .ok_or_else(|| {
                SunSpecError::materialization(format!("model {} is missing its ID point", self.id))
            })?
            .value_mut()
            .set_unsigned(self.id as u64)
            .map_err(header)?;
        model
            .group
            .point_mut("L")
            .ok_or_else(|| {
                SunSpecError::materialization(format!("model {} is missing its L point", self.id))
            })?
            .value_mut()
            .set_unsigned((quantity - HEADER_QUANTITY) as u64)
            .map_err(header)?;
        Ok(model)
    }
}

/// Callback invoked by the materializer after each group's points exist.
#[async_trait]
pub trait PointFetcher: Send {
    async fn fetch(&mut self, points: &mut [Point]) -> SunSpecResult<()>;
}

/// A fetcher that leaves the freshly materialized points untouched.
///
/// Used by servers, which serve definition defaults instead of reading
/// them from a device.
pub struct NoFetch;

#[async_trait]
impl PointFetcher for NoFetch {
    async fn fetch(&mut self, _points: &mut [Point]) -> SunSpecResult<()> {
        Ok(())
    }
}

/// Recursive group instantiation.
///
/// `ancestors` holds the already-materialized point lists of the
/// enclosing groups, nearest first; count references and scale references
/// resolve against the local points first, then walk that chain outward.
fn instantiate<'a>(
    def: &'a GroupDef,
    cursor: &'a mut u32,
    ancestors: &'a [&'a [Point]],
    fetch: &'a mut dyn PointFetcher,
) -> BoxFuture<'a, SunSpecResult<Group>> {
    Box::pin(async move {
        let mut points: Vec<Point> = Vec::new();
        for pdef in &def.points {
            let repeat = resolve_count(&pdef.count, &points, ancestors)?;
            for _ in 0..repeat {
                let point = Point::from_def(pdef, *cursor as u16)?;
                let end = *cursor + point.quantity() as u32;
                if end > 0x1_0000 {
                    return Err(SunSpecError::materialization(format!(
                        "group {} exceeds the 16-bit address space",
                        def.name
                    )));
                }
                *cursor = end;
                points.push(point);
            }
        }

        resolve_scales(&mut points, ancestors);
        fetch.fetch(&mut points).await?;

        let mut groups: Vec<Group> = Vec::new();
        {
            let chain: Vec<&[Point]> = std::iter::once(points.as_slice())
                .chain(ancestors.iter().copied())
                .collect();
            for gdef in &def.groups {
                let repeat = resolve_count(&gdef.count, &points, ancestors)?;
                for _ in 0..repeat {
                    groups.push(instantiate(gdef, &mut *cursor, &chain, &mut *fetch).await?);
                }
            }
        }

        Ok(Group::new(
            def.name.clone(),
            def.group_type == GroupType::Sync,
            points,
            groups,
        ))
    })
}

/// Resolve a repeat count against the materialized points, nearest first.
fn resolve_count(count: &Count, local: &[Point], ancestors: &[&[Point]]) -> SunSpecResult<u16> {
    let name = match count {
        Count::Literal(n) => return Ok(*n),
        Count::Reference(name) => name,
    };
    for points in std::iter::once(local).chain(ancestors.iter().copied()) {
        if let Some(point) = points.iter().find(|p| p.name() == name) {
            return point.value().count().ok_or_else(|| {
                SunSpecError::materialization(format!(
                    "count reference \"{}\" names a non-integer point ({})",
                    name,
                    point.value().type_name()
                ))
            });
        }
    }
    Err(SunSpecError::materialization(format!(
        "count reference \"{}\" does not name a materialized point",
        name
    )))
}

/// Link named scale references to their `sunssf` cells.
///
/// The walk starts at the point's own group and proceeds outward; the
/// first `sunssf` carrying the name wins. An unresolved reference
/// degrades to the constant factor 0.
fn resolve_scales(points: &mut [Point], ancestors: &[&[Point]]) {
    let resolved: Vec<(usize, Scale)> = points
        .iter()
        .enumerate()
        .filter_map(|(i, point)| {
            let name = point.scale_ref.as_deref()?;
            let scale = std::iter::once(&points[..])
                .chain(ancestors.iter().copied())
                .flat_map(|pts| pts.iter())
                .find(|p| p.name() == name)
                .and_then(|p| p.value().scale_cell())
                .map_or(Scale::Fixed(0), |cell| Scale::Linked(cell.clone()));
            Some((i, scale))
        })
        .collect();

    for (i, scale) in resolved {
        points[i].set_scale(scale);
        points[i].scale_ref = None;
    }
}

/// A live, address-assigned model.
#[derive(Debug, Clone)]
pub struct Model {
    group: Group,
}

impl Model {
    /// The model's root group
    pub fn group(&self) -> &Group {
        &self.group
    }

    /// Mutable access to the root group
    pub fn group_mut(&mut self) -> &mut Group {
        &mut self.group
    }

    /// The model identifier as stored in the `ID` header point
    pub fn id(&self) -> Option<u16> {
        self.group.point("ID")?.value().as_u64().map(|v| v as u16)
    }

    /// The model length as stored in the `L` header point
    pub fn length(&self) -> Option<u16> {
        self.group.point("L")?.value().as_u64().map(|v| v as u16)
    }

    /// Starting address of the model
    pub fn address(&self) -> u16 {
        self.group.address()
    }

    /// Total register quantity including the header
    pub fn quantity(&self) -> u16 {
        self.group.quantity()
    }

    /// Locality of the whole model in the register address space
    pub fn index(&self) -> Index {
        self.group.index()
    }

    /// First register past the end of the model
    pub fn ceiling(&self) -> u32 {
        self.group.index().ceiling()
    }

    /// Prototype model holding only the `(ID, L)` header.
    ///
    /// The discovery walk reads into this prototype to identify the next
    /// model; unknown model IDs stay in the device as header-only models
    /// so the walk can advance past them.
    pub fn header(address: u16, id: u16, length: u16) -> Self {
        Self {
            group: Group::new(
                "header".into(),
                false,
                vec![
                    Point::new("ID", address, true, Value::Uint16(id)),
                    Point::new("L", address + 1, true, Value::Uint16(length)),
                ],
                vec![],
            ),
        }
    }

    /// Prototype model holding the 4-byte ASCII `SunS` marker.
    pub fn marker(address: u16) -> Self {
        Self {
            group: Group::new(
                "marker".into(),
                false,
                vec![Point::new(
                    "SunS",
                    address,
                    true,
                    Value::String(b"SunS".to_vec()),
                )],
                vec![],
            ),
        }
    }
}

fn name_regex() -> &'static Regex {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE.get_or_init(|| Regex::new("^[A-Za-z0-9_]+$").expect("static pattern"))
}

/// Validate a materialized model against the SunSpec structural rules.
///
/// Checks, reporting the first offender:
/// - group, point and symbol identifiers consist of alphanumerics and
///   underscores only
/// - the linearized traversal forms one contiguous address range starting
///   at the model's address
/// - every group carries at least one point
/// - the `L` header correlates with the model quantity (`L + 2 == quantity`)
pub fn verify(model: &Model) -> SunSpecResult<()> {
    let mut cursor = model.address() as u32;
    verify_group(model.group(), &mut cursor)?;

    let length = model
        .length()
        .ok_or_else(|| SunSpecError::verification("model is missing its L point"))?;
    if length as u32 + HEADER_QUANTITY as u32 != model.quantity() as u32 {
        return Err(SunSpecError::verification(format!(
            "header length {} does not correlate with model quantity {}",
            length,
            model.quantity()
        )));
    }
    Ok(())
}

fn verify_group(group: &Group, cursor: &mut u32) -> SunSpecResult<()> {
    if !name_regex().is_match(group.name()) {
        return Err(SunSpecError::verification(format!(
            "group name \"{}\" violates the identifier rule",
            group.name()
        )));
    }
    if group.points().is_empty() {
        return Err(SunSpecError::verification(format!(
            "group \"{}\" is missing its point definition",
            group.name()
        )));
    }
    if group.address() as u32 != *cursor {
        return Err(SunSpecError::verification(format!(
            "group \"{}\" starts at {} instead of {}",
            group.name(),
            group.address(),
            cursor
        )));
    }
    for point in group.points() {
        if !name_regex().is_match(point.name()) {
            return Err(SunSpecError::verification(format!(
                "point name \"{}\" violates the identifier rule",
                point.name()
            )));
        }
        for symbol in point.symbols().iter() {
            if !name_regex().is_match(symbol.name()) {
                return Err(SunSpecError::verification(format!(
                    "symbol name \"{}\" violates the identifier rule",
                    symbol.name()
                )));
            }
        }
        if point.address() as u32 != *cursor {
            return Err(SunSpecError::verification(format!(
                "point \"{}\" at {} breaks address continuity (expected {})",
                point.name(),
                point.address(),
                cursor
            )));
        }
        *cursor += point.quantity() as u32;
    }
    for nested in group.groups() {
        verify_group(nested, cursor)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model_def(json: &str) -> ModelDef {
        serde_json::from_str(json).unwrap()
    }

    fn common_def() -> ModelDef {
        model_def(
            r#"{
                "id": 1,
                "group": {
                    "name": "common",
                    "type": "group",
                    "points": [
                        {"name": "ID", "type": "uint16", "static": "S"},
                        {"name": "L", "type": "uint16", "static": "S"},
                        {"name": "Mn", "type": "string", "size": 16, "static": "S"},
                        {"name": "Md", "type": "string", "size": 16, "static": "S"},
                        {"name": "Vr", "type": "string", "size": 8, "static": "S"},
                        {"name": "SN", "type": "string", "size": 16, "static": "S"},
                        {"name": "DA", "type": "uint16", "access": "rw"},
                        {"name": "Pad", "type": "pad"}
                    ]
                }
            }"#,
        )
    }

    #[tokio::test]
    async fn test_materialize_common_model() {
        let def = common_def();
        let model = def.instance(40002, &mut NoFetch).await.unwrap();

        assert_eq!(model.address(), 40002);
        assert_eq!(model.quantity(), 60);
        assert_eq!(model.id(), Some(1));
        assert_eq!(model.length(), Some(58));
        verify(&model).unwrap();
    }

    #[tokio::test]
    async fn test_contiguous_layout() {
        let def = common_def();
        let model = def.instance(100, &mut NoFetch).await.unwrap();

        let mut expected = 100u32;
        let mut terminal = 0u32;
        model.group().for_each_point(&mut |p| {
            assert_eq!(p.address() as u32, expected);
            expected += p.quantity() as u32;
            terminal = expected;
        });
        assert_eq!(terminal, 100 + model.quantity() as u32);
    }

    #[tokio::test]
    async fn test_point_count_literal() {
        let def = model_def(
            r#"{
                "id": 10,
                "group": {
                    "name": "rep",
                    "points": [
                        {"name": "ID", "type": "uint16"},
                        {"name": "L", "type": "uint16"},
                        {"name": "Cell", "type": "uint16", "count": 4}
                    ]
                }
            }"#,
        );
        let model = def.instance(0, &mut NoFetch).await.unwrap();
        assert_eq!(model.quantity(), 6);
        let cells: Vec<u16> = model
            .group()
            .points()
            .iter()
            .filter(|p| p.name() == "Cell")
            .map(|p| p.address())
            .collect();
        assert_eq!(cells, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_group_count_reference() {
        // N carries its value from the definition; three repeats expected
        let def = model_def(
            r#"{
                "id": 11,
                "group": {
                    "name": "root",
                    "points": [
                        {"name": "ID", "type": "uint16"},
                        {"name": "L", "type": "uint16"},
                        {"name": "N", "type": "uint16", "value": 3}
                    ],
                    "groups": [{
                        "name": "repeat",
                        "points": [{"name": "V", "type": "uint16"}]
                    }],
                    "comments": []
                }
            }"#,
        );
        let mut def = def;
        def.group.groups[0].count = Count::Reference("N".into());

        let model = def.instance(50000, &mut NoFetch).await.unwrap();
        assert_eq!(model.group().groups().len(), 3);
        assert_eq!(model.quantity(), 6);
        let addresses: Vec<u16> = model.group().groups().iter().map(|g| g.address()).collect();
        assert_eq!(addresses, vec![50003, 50004, 50005]);
        verify(&model).unwrap();
    }

    #[tokio::test]
    async fn test_count_reference_errors() {
        let mut def = model_def(
            r#"{
                "id": 12,
                "group": {
                    "name": "root",
                    "points": [
                        {"name": "ID", "type": "uint16"},
                        {"name": "L", "type": "uint16"},
                        {"name": "St", "type": "enum16"}
                    ],
                    "groups": [{
                        "name": "repeat",
                        "points": [{"name": "V", "type": "uint16"}]
                    }]
                }
            }"#,
        );

        def.group.groups[0].count = Count::Reference("Missing".into());
        assert!(def.instance(0, &mut NoFetch).await.is_err());

        def.group.groups[0].count = Count::Reference("St".into());
        let err = def.instance(0, &mut NoFetch).await.unwrap_err();
        assert!(matches!(err, SunSpecError::Materialization { .. }));
    }

    #[tokio::test]
    async fn test_scale_resolution_is_live() {
        let def = model_def(
            r#"{
                "id": 13,
                "group": {
                    "name": "root",
                    "points": [
                        {"name": "ID", "type": "uint16"},
                        {"name": "L", "type": "uint16"},
                        {"name": "W", "type": "int16", "value": 1500, "sf": "W_SF"},
                        {"name": "W_SF", "type": "sunssf", "value": -1},
                        {"name": "Ah", "type": "uint16", "value": 7, "sf": "Missing_SF"}
                    ]
                }
            }"#,
        );
        let mut model = def.instance(0, &mut NoFetch).await.unwrap();

        let w = model.group().point("W").unwrap();
        assert!(w.is_scaled());
        assert!((w.scaled().unwrap() - 150.0).abs() < 1e-9);

        // decoding the sunssf moves every dependent without re-materialization
        model
            .group_mut()
            .point_mut("W_SF")
            .unwrap()
            .decode(&2i16.to_be_bytes())
            .unwrap();
        assert_eq!(model.group().point("W").unwrap().scaled(), Some(150_000.0));

        // unresolved reference degrades to factor 0
        let ah = model.group().point("Ah").unwrap();
        assert_eq!(ah.factor(), 0);
        assert_eq!(ah.scaled(), Some(7.0));
    }

    #[tokio::test]
    async fn test_scale_reference_from_parent_group() {
        let def = model_def(
            r#"{
                "id": 14,
                "group": {
                    "name": "root",
                    "points": [
                        {"name": "ID", "type": "uint16"},
                        {"name": "L", "type": "uint16"},
                        {"name": "V_SF", "type": "sunssf", "value": -2}
                    ],
                    "groups": [{
                        "name": "cell",
                        "points": [{"name": "V", "type": "uint16", "value": 355, "sf": "V_SF"}]
                    }]
                }
            }"#,
        );
        let model = def.instance(0, &mut NoFetch).await.unwrap();
        let v = model.group().groups()[0].point("V").unwrap();
        assert!((v.scaled().unwrap() - 3.55).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_missing_header_points() {
        let def = model_def(
            r#"{"id": 15, "group": {"name": "bare",
                "points": [{"name": "V", "type": "uint16"}]}}"#,
        );
        assert!(def.instance(0, &mut NoFetch).await.is_err());
    }

    #[test]
    fn test_header_and_marker_prototypes() {
        let header = Model::header(40002, 0, 0);
        assert_eq!(header.id(), Some(0));
        assert_eq!(header.length(), Some(0));
        assert_eq!(header.quantity(), 2);
        assert_eq!(header.group().point("L").unwrap().address(), 40003);

        let marker = Model::marker(40000);
        assert_eq!(marker.quantity(), 2);
        let mut buf = [0u8; 4];
        marker.group().points()[0].encode(&mut buf).unwrap();
        assert_eq!(&buf, b"SunS");
    }

    #[tokio::test]
    async fn test_verify_detects_bad_names() {
        let def = model_def(
            r#"{"id": 16, "group": {"name": "root", "points": [
                {"name": "ID", "type": "uint16"},
                {"name": "L", "type": "uint16"},
                {"name": "Bad-Name", "type": "uint16"}
            ]}}"#,
        );
        let model = def.instance(0, &mut NoFetch).await.unwrap();
        let err = verify(&model).unwrap_err();
        assert!(format!("{}", err).contains("Bad-Name"));
    }

    #[tokio::test]
    async fn test_verify_detects_length_mismatch() {
        let def = common_def();
        let mut model = def.instance(0, &mut NoFetch).await.unwrap();
        model
            .group_mut()
            .point_mut("L")
            .unwrap()
            .value_mut()
            .set_unsigned(40)
            .unwrap();
        assert!(verify(&model).is_err());
    }

    #[test]
    fn test_simplify_model() {
        let mut def = model_def(
            r#"{"id": 17, "label": "Test", "desc": "d", "group": {
                "name": "root", "label": "g",
                "points": [{"name": "ID", "type": "uint16", "label": "id"}]}}"#,
        );
        def.simplify();
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 17, "group": {"name": "root", "type": "group",
                "points": [{"name": "ID", "type": "uint16"}]}})
        );
    }
}
