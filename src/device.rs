//! Devices: the ordered model list behind one Modbus endpoint
//!
//! A [`Device`] is what discovery produces and what a server publishes:
//! the SunS marker model, the concatenated data models and the
//! `ID = 0xFFFF` terminator. Point selections by address range are
//! resolved here.

use crate::error::{SunSpecError, SunSpecResult};
use crate::index::{merge, Index};
use crate::model::Model;
use crate::point::Point;

/// An ordered collection of materialized models.
#[derive(Debug, Clone, Default)]
pub struct Device {
    models: Vec<Model>,
}

impl Device {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_models(models: Vec<Model>) -> Self {
        Self { models }
    }

    /// All models in device order, including marker and terminator when
    /// the device was produced by a scan or a server.
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Mutable access to the models.
    pub fn models_mut(&mut self) -> &mut [Model] {
        &mut self.models
    }

    /// First model carrying the given identifier.
    pub fn model(&self, id: u16) -> Option<&Model> {
        self.models.iter().find(|m| m.id() == Some(id))
    }

    /// Mutable lookup of the first model carrying the given identifier.
    pub fn model_mut(&mut self, id: u16) -> Option<&mut Model> {
        self.models.iter_mut().find(|m| m.id() == Some(id))
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub(crate) fn push(&mut self, model: Model) {
        self.models.push(model);
    }

    /// Merged register indexes of all models.
    pub fn index(&self) -> Vec<Index> {
        let indices: Vec<Index> = self.models.iter().map(|m| m.index()).collect();
        merge(&indices)
    }

    /// Visit every point of every model in device order.
    pub fn for_each_point<'a>(&'a self, f: &mut impl FnMut(&'a Point)) {
        for model in &self.models {
            model.group().for_each_point(f);
        }
    }

    /// Collect mutable references to the points selected by `indices`.
    ///
    /// The requested intervals are merged first; each point whose span is
    /// fully contained in the union is selected, in the device's
    /// linearized traversal order. A point only partially covered fails
    /// with an address range error, as does a non-empty request that
    /// matches no point at all. An empty `indices` selects every point.
    pub fn collect_mut(&mut self, indices: &[Index]) -> SunSpecResult<Vec<&mut Point>> {
        let mut out = Vec::new();

        if indices.is_empty() {
            for model in &mut self.models {
                model.group_mut().for_each_point_mut(&mut |p| out.push(p));
            }
            return Ok(out);
        }

        let union = merge(indices);
        if union.is_empty() {
            let first = indices[0];
            return Err(SunSpecError::address_range(
                first.address,
                first.quantity,
                "requested index selection is empty",
            ));
        }
        for model in &mut self.models {
            model.group_mut().collect_mut(&union, &mut out)?;
        }
        if out.is_empty() {
            let first = union[0];
            return Err(SunSpecError::address_range(
                first.address,
                first.quantity,
                "no point matches the requested index",
            ));
        }
        Ok(out)
    }
}
