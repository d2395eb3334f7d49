//! Modbus address index algebra
//!
//! An [`Index`] describes the locality of a value in the holding-register
//! address space as the half-open interval `[address, address + quantity)`.
//! The algebra in this module (contiguity, overlap, merging) is what the
//! transfer batcher and the point collector are built on.

use crate::error::{SunSpecError, SunSpecResult};

/// Locality of a value in a Modbus holding-register address space.
///
/// `quantity` counts 16-bit registers. The interval is half-open:
/// a point at address 40003 with quantity 2 occupies registers 40003
/// and 40004.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Index {
    /// First register of the interval
    pub address: u16,
    /// Number of registers covered
    pub quantity: u16,
}

impl Index {
    /// Create a new index, validating that it fits the 16-bit address space.
    pub fn new(address: u16, quantity: u16) -> SunSpecResult<Self> {
        if address as u32 + quantity as u32 > 0x1_0000 {
            return Err(SunSpecError::address_range(
                address,
                quantity,
                "index exceeds the 16-bit address space",
            ));
        }
        Ok(Self { address, quantity })
    }

    /// First register past the end of the interval.
    ///
    /// Returned as `u32` since an interval may end exactly at 0x10000.
    pub fn ceiling(&self) -> u32 {
        self.address as u32 + self.quantity as u32
    }

    /// True when `other` starts exactly where `self` ends.
    pub fn contiguous(&self, other: &Index) -> bool {
        self.ceiling() == other.address as u32
    }

    /// True when the two half-open intervals intersect.
    pub fn overlaps(&self, other: &Index) -> bool {
        (self.address as u32) < other.ceiling() && (other.address as u32) < self.ceiling()
    }

    /// True when `other` lies entirely within `self`.
    pub fn contains(&self, other: &Index) -> bool {
        self.address <= other.address && other.ceiling() <= self.ceiling()
    }
}

/// Merge indices into the minimal set of non-overlapping, non-contiguous
/// intervals covering the union.
///
/// The result is sorted by address. Merging is idempotent and insensitive
/// to the input order; zero-quantity entries vanish into their neighbours
/// or are dropped.
pub fn merge(indices: &[Index]) -> Vec<Index> {
    let mut sorted: Vec<Index> = indices.iter().copied().filter(|i| i.quantity > 0).collect();
    sorted.sort_by_key(|i| i.address);

    let mut merged: Vec<Index> = Vec::with_capacity(sorted.len());
    for idx in sorted {
        match merged.last_mut() {
            Some(last) if idx.address as u32 <= last.ceiling() => {
                let ceiling = last.ceiling().max(idx.ceiling());
                last.quantity = (ceiling - last.address as u32) as u16;
            }
            _ => merged.push(idx),
        }
    }
    merged
}

/// True when `idx` lies entirely within one interval of the merged union.
pub fn covered(union: &[Index], idx: &Index) -> bool {
    union.iter().any(|u| u.contains(idx))
}

/// True when `idx` intersects any interval of the union.
pub fn touched(union: &[Index], idx: &Index) -> bool {
    union.iter().any(|u| u.overlaps(idx))
}
