//! Grid configuration for an `EntityManager`.

use crate::pos::{Aabb, RegionPos, SectionPos};
use glam::DVec3;

/// Largest shift applied to an `i32` coordinate; larger shifts are
/// clamped to it.
pub const MAX_SHIFT: u32 = i32::BITS - 1;

/// Sizes of the section and region grids, expressed as bit shifts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Geometry {
    /// A section spans `1 << section_shift` world units on every axis.
    pub section_shift: u32,
    /// A region spans `1 << region_shift` sections along X and Z,
    /// and the full height along Y.
    ///
    /// Both shifts are clamped to `MAX_SHIFT`.
    pub region_shift: u32,
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            section_shift: 4,
            region_shift: 2,
        }
    }
}

fn shift_down(coord: i32, shift: u32) -> i32 {
    coord >> shift.min(MAX_SHIFT)
}

impl Geometry {
    fn block_to_section(&self, coord: f64) -> i32 {
        shift_down(coord.floor() as i32, self.section_shift)
    }

    /// The section containing a world position.
    pub fn section_of(&self, pos: DVec3) -> SectionPos {
        SectionPos::new(
            self.block_to_section(pos.x),
            self.block_to_section(pos.y),
            self.block_to_section(pos.z),
        )
    }

    /// The region a section belongs to.
    pub fn region_of_section(&self, section: SectionPos) -> RegionPos {
        RegionPos::new(
            shift_down(section.x, self.region_shift),
            shift_down(section.z, self.region_shift),
        )
    }

    /// The region containing a world position.
    pub fn region_of(&self, pos: DVec3) -> RegionPos {
        self.region_of_section(self.section_of(pos))
    }

    /// Every section position touched by `aabb`.
    pub fn sections_overlapping(&self, aabb: &Aabb) -> impl Iterator<Item = SectionPos> {
        let min = self.section_of(aabb.min);
        let max = self.section_of(aabb.max);
        (min.x..=max.x).flat_map(move |x| {
            (min.z..=max.z)
                .flat_map(move |z| (min.y..=max.y).map(move |y| SectionPos::new(x, y, z)))
        })
    }

    /// Number of section cells touched by `aabb`, saturating.
    pub fn cell_count_overlapping(&self, aabb: &Aabb) -> u64 {
        let min = self.section_of(aabb.min);
        let max = self.section_of(aabb.max);
        let span = |lo: i32, hi: i32| (i64::from(hi) - i64::from(lo) + 1) as u64;
        span(min.x, max.x)
            .saturating_mul(span(min.y, max.y))
            .saturating_mul(span(min.z, max.z))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Config {
    pub geometry: Geometry,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Method chaining setter for the grid geometry.
    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = geometry;
        self
    }
}
