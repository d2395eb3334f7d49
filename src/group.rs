//! Groups: recursive containers of points and sub-groups
//!
//! A [`Group`] owns an ordered list of points followed by an ordered list
//! of nested groups. Addresses across the linearized traversal (points
//! before sub-groups, depth first) form one contiguous register range;
//! that traversal order is also the canonical point order for transfers.

use serde::{Deserialize, Serialize};

use crate::error::{SunSpecError, SunSpecResult};
use crate::index::{covered, touched, Index};
use crate::model::Meta;
use crate::point::{Count, Point, PointDef};

/// Group flavour: a plain `group` or a `sync` group whose points a device
/// expects to be transferred together (honored as a batching hint only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupType {
    #[serde(rename = "group")]
    Group,
    #[serde(rename = "sync")]
    Sync,
}

impl Default for GroupType {
    fn default() -> Self {
        GroupType::Group
    }
}

/// Definition of a SunSpec group element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupDef {
    pub name: String,
    #[serde(rename = "type", default)]
    pub group_type: GroupType,
    #[serde(default, skip_serializing_if = "Count::is_one")]
    pub count: Count,
    pub points: Vec<PointDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupDef>,
    #[serde(flatten)]
    pub meta: Meta,
}

impl GroupDef {
    /// Strip documentation-only meta fields, recursively.
    pub fn simplify(&mut self) {
        self.meta = Meta::default();
        for point in &mut self.points {
            point.simplify();
        }
        for group in &mut self.groups {
            group.simplify();
        }
    }
}

/// A live group of a materialized model.
#[derive(Debug, Clone)]
pub struct Group {
    name: String,
    atomic: bool,
    points: Vec<Point>,
    groups: Vec<Group>,
}

impl Group {
    pub(crate) fn new(name: String, atomic: bool, points: Vec<Point>, groups: Vec<Group>) -> Self {
        Self {
            name,
            atomic,
            points,
            groups,
        }
    }

    /// The group's identifier
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the group's points are meant to be transferred together
    pub fn atomic(&self) -> bool {
        self.atomic
    }

    /// Immediate points of the group
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// Mutable access to the immediate points
    pub fn points_mut(&mut self) -> &mut [Point] {
        &mut self.points
    }

    /// Immediate sub-groups
    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    /// Mutable access to the immediate sub-groups
    pub fn groups_mut(&mut self) -> &mut [Group] {
        &mut self.groups
    }

    /// First immediate point carrying the given name
    pub fn point(&self, name: &str) -> Option<&Point> {
        self.points.iter().find(|p| p.name() == name)
    }

    /// Mutable lookup of an immediate point by name
    pub fn point_mut(&mut self, name: &str) -> Option<&mut Point> {
        self.points.iter_mut().find(|p| p.name() == name)
    }

    /// First immediate sub-group carrying the given name
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.iter().find(|g| g.name() == name)
    }

    /// The group's starting address (address of its first point)
    pub fn address(&self) -> u16 {
        self.points.first().map_or(0, |p| p.address())
    }

    /// Total number of registers covered by the group and its descendants
    pub fn quantity(&self) -> u16 {
        let own: u16 = self.points.iter().map(|p| p.quantity()).sum();
        let nested: u16 = self.groups.iter().map(|g| g.quantity()).sum();
        own + nested
    }

    /// Locality of the whole group in the register address space
    pub fn index(&self) -> Index {
        Index {
            address: self.address(),
            quantity: self.quantity(),
        }
    }

    /// Visit every point in linearized order (points before sub-groups).
    pub fn for_each_point<'a>(&'a self, f: &mut impl FnMut(&'a Point)) {
        for point in &self.points {
            f(point);
        }
        for group in &self.groups {
            group.for_each_point(f);
        }
    }

    /// Mutable linearized traversal.
    pub fn for_each_point_mut<'a>(&'a mut self, f: &mut impl FnMut(&'a mut Point)) {
        for point in &mut self.points {
            f(point);
        }
        for group in &mut self.groups {
            group.for_each_point_mut(f);
        }
    }

    /// First point in the subtree carrying the given name.
    pub fn find_point(&self, name: &str) -> Option<&Point> {
        let mut found = None;
        self.for_each_point(&mut |p| {
            if found.is_none() && p.name() == name {
                found = Some(p);
            }
        });
        found
    }

    /// Collect mutable references to all points whose span is fully
    /// contained in the merged `union`, in linearized order.
    ///
    /// A point only partially covered by the union fails the collection.
    pub(crate) fn collect_mut<'a>(
        &'a mut self,
        union: &[Index],
        out: &mut Vec<&'a mut Point>,
    ) -> SunSpecResult<()> {
        for point in &mut self.points {
            let idx = point.index();
            if covered(union, &idx) {
                out.push(point);
            } else if touched(union, &idx) {
                return Err(SunSpecError::address_range(
                    idx.address,
                    idx.quantity,
                    format!("point {} only partially covered by the request", point.name()),
                ));
            }
        }
        for group in &mut self.groups {
            group.collect_mut(union, out)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(json: &str, address: u16) -> Point {
        let def: PointDef = serde_json::from_str(json).unwrap();
        Point::from_def(&def, address).unwrap()
    }

    fn sample() -> Group {
        let nested = Group::new(
            "repeating".into(),
            false,
            vec![point(r#"{"name": "DCW", "type": "uint16"}"#, 12)],
            vec![],
        );
        Group::new(
            "inverter".into(),
            false,
            vec![
                point(r#"{"name": "ID", "type": "uint16"}"#, 8),
                point(r#"{"name": "L", "type": "uint16"}"#, 9),
                point(r#"{"name": "W", "type": "uint32"}"#, 10),
            ],
            vec![nested],
        )
    }

    #[test]
    fn test_def_parsing() {
        let def: GroupDef = serde_json::from_str(
            r#"{"name": "lithium_ion_bank", "type": "sync", "count": "N",
                "points": [{"name": "V", "type": "uint16"}]}"#,
        )
        .unwrap();
        assert_eq!(def.group_type, GroupType::Sync);
        assert_eq!(def.count, Count::Reference("N".into()));
    }

    #[test]
    fn test_address_and_quantity() {
        let g = sample();
        assert_eq!(g.address(), 8);
        assert_eq!(g.quantity(), 5);
        assert_eq!(g.index(), Index { address: 8, quantity: 5 });
    }

    #[test]
    fn test_linearized_order() {
        let g = sample();
        let mut names = Vec::new();
        g.for_each_point(&mut |p| names.push(p.name().to_string()));
        assert_eq!(names, vec!["ID", "L", "W", "DCW"]);
    }

    #[test]
    fn test_lookups() {
        let g = sample();
        assert_eq!(g.point("W").unwrap().address(), 10);
        assert!(g.point("DCW").is_none());
        assert_eq!(g.find_point("DCW").unwrap().address(), 12);
        assert_eq!(g.group("repeating").unwrap().quantity(), 1);
    }

    #[test]
    fn test_collect_containment() {
        let mut g = sample();
        let union = [Index { address: 8, quantity: 2 }];
        let mut out = Vec::new();
        g.collect_mut(&union, &mut out).unwrap();
        assert_eq!(out.len(), 2);

        // splitting the uint32 at address 10 fails the collection
        let union = [Index { address: 10, quantity: 1 }];
        let mut out = Vec::new();
        assert!(g.collect_mut(&union, &mut out).is_err());
    }
}
