//! The sparse spatial index of sections.

use crate::config::Geometry;
use crate::entity::EntityId;
use crate::pos::{RegionPos, SectionPos};
use crate::util::{HashMap, HashSet};
use crate::visibility::Visibility;

/// The entities located in one grid cell.
#[derive(Debug)]
pub struct Section {
    entities: HashSet<EntityId>,
    visibility: Visibility,
}

impl Section {
    fn new(visibility: Visibility) -> Self {
        Self {
            entities: HashSet::default(),
            visibility,
        }
    }

    /// Adds an entity, returning `false` if it was already present.
    pub fn add(&mut self, entity: EntityId) -> bool {
        self.entities.insert(entity)
    }

    /// Removes an entity, returning `false` if it was not present.
    pub fn remove(&mut self, entity: EntityId) -> bool {
        self.entities.remove(&entity)
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.entities.contains(&entity)
    }

    pub fn entities(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// Sets the visibility, returning the previous value.
    pub fn set_visibility(&mut self, visibility: Visibility) -> Visibility {
        std::mem::replace(&mut self.visibility, visibility)
    }
}

/// Maps section positions to `Section`s. Only non-empty
/// sections are kept, as long as callers follow every removal
/// with `remove_section_if_empty`.
#[derive(Debug)]
pub struct SpatialIndex {
    geometry: Geometry,
    sections: HashMap<SectionPos, Section>,
    /// Section positions grouped by region, so region-wide
    /// updates only visit the sections that exist.
    by_region: HashMap<RegionPos, HashSet<SectionPos>>,
}

impl SpatialIndex {
    pub fn new(geometry: Geometry) -> Self {
        Self {
            geometry,
            sections: HashMap::default(),
            by_region: HashMap::default(),
        }
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Returns the section at `pos`, creating it with `initial`
    /// visibility if absent.
    pub fn get_or_create_section(&mut self, pos: SectionPos, initial: Visibility) -> &mut Section {
        let geometry = self.geometry;
        let by_region = &mut self.by_region;
        self.sections.entry(pos).or_insert_with(|| {
            by_region
                .entry(geometry.region_of_section(pos))
                .or_default()
                .insert(pos);
            Section::new(initial)
        })
    }

    pub fn section(&self, pos: SectionPos) -> Option<&Section> {
        self.sections.get(&pos)
    }

    pub fn section_mut(&mut self, pos: SectionPos) -> Option<&mut Section> {
        self.sections.get_mut(&pos)
    }

    /// Deletes the section at `pos` if it holds no entities.
    ///
    /// Returns `true` if a section was deleted.
    pub fn remove_section_if_empty(&mut self, pos: SectionPos) -> bool {
        match self.sections.get(&pos) {
            Some(section) if section.is_empty() => {}
            _ => return false,
        }
        self.sections.remove(&pos);

        let region = self.geometry.region_of_section(pos);
        if let Some(positions) = self.by_region.get_mut(&region) {
            positions.remove(&pos);
            if positions.is_empty() {
                self.by_region.remove(&region);
            }
        }
        true
    }

    /// Positions of the sections that exist within `region`.
    pub fn section_positions_in_region(&self, region: RegionPos) -> Vec<SectionPos> {
        self.by_region
            .get(&region)
            .map(|positions| positions.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The sections that exist within `region`.
    pub fn sections_in_region(
        &self,
        region: RegionPos,
    ) -> impl Iterator<Item = (SectionPos, &Section)> + '_ {
        self.by_region
            .get(&region)
            .into_iter()
            .flatten()
            .filter_map(move |pos| self.sections.get(pos).map(|section| (*pos, section)))
    }

    /// All regions with at least one existing section.
    pub fn all_regions_with_sections(&self) -> HashSet<RegionPos> {
        self.by_region.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SectionPos, &Section)> + '_ {
        self.sections.iter().map(|(pos, section)| (*pos, section))
    }

    /// Number of existing sections.
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}
