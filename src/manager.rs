//! The entity lifecycle manager.
//!
//! Owns every loaded entity, files them into sections, derives
//! their visibility from the tiers of the regions they are in, and
//! streams regions to and from an `EntityStore` as those tiers change.

mod allocator;
mod lookup;

use crate::config::Config;
use crate::entity::{Entity, EntityId, RemovalReason};
use crate::error::{Result, StoreError};
use crate::events::{EntityEvent, EntityEventKind, EventQueue};
use crate::pos::{Aabb, RegionPos, SectionPos};
use crate::section::{Section, SpatialIndex};
use crate::storage::{EntityBatch, EntityStore, LoadCompletion, LoadInbox};
use crate::tick_list::ActiveSet;
use crate::util::{HashMap, HashSet};
use crate::visibility::{
    effective_visibility, LoadStatus, RegionStatus, Visibility, VisibilityTracker,
};
use glam::DVec3;
use lookup::EntityLookup;
use std::io::{self, Write};
use std::rc::Rc;
use uuid::Uuid;

/// Tracks entities by section and keeps them in sync with the
/// visibility of their regions and with persistent storage.
///
/// All methods must be called from one owner thread. The store may
/// complete loads from any thread; completions are applied by `tick`.
pub struct EntityManager<T, S> {
    config: Config,
    store: S,
    lookup: EntityLookup<T>,
    index: SpatialIndex,
    /// Entities whose effective visibility is `Ticking`.
    ticking: Rc<ActiveSet>,
    /// Entities whose effective visibility is at least `Tracked`.
    visible: HashSet<EntityId>,
    tracker: VisibilityTracker,
    /// Regions absent from this map are `Fresh`.
    load_statuses: HashMap<RegionPos, LoadStatus>,
    /// Pending regions whose load reported an error.
    failed_loads: HashSet<RegionPos>,
    inbox: LoadInbox<T>,
    /// Hidden regions waiting to be unloaded.
    to_unload: HashSet<RegionPos>,
    events: EventQueue,
}

impl<T, S> EntityManager<T, S>
where
    T: Clone,
    S: EntityStore<T>,
{
    pub fn new(store: S, config: Config) -> Self {
        let index = SpatialIndex::new(config.geometry);
        Self {
            config,
            store,
            lookup: EntityLookup::default(),
            index,
            ticking: Rc::new(ActiveSet::new()),
            visible: HashSet::default(),
            tracker: VisibilityTracker::new(),
            load_statuses: HashMap::default(),
            failed_loads: HashSet::default(),
            inbox: LoadInbox::new(),
            to_unload: HashSet::default(),
            events: EventQueue::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Adds a freshly spawned entity.
    ///
    /// Returns `false` and leaves the manager untouched if an entity
    /// with the same UUID is already loaded.
    pub fn add_new(&mut self, entity: Entity<T>) -> bool {
        self.add_entity(entity, false)
    }

    /// Adds an entity read back from storage. No `Created` event is sent.
    pub fn add_from_storage(&mut self, entity: Entity<T>) -> bool {
        self.add_entity(entity, true)
    }

    /// Adds entities spawned by world generation. No `Created` events are sent.
    pub fn add_world_gen(&mut self, entities: impl IntoIterator<Item = Entity<T>>) {
        for entity in entities {
            self.add_entity(entity, true);
        }
    }

    /// Adds entities from region data of an older format. No `Created`
    /// events are sent.
    pub fn add_legacy(&mut self, entities: impl IntoIterator<Item = Entity<T>>) {
        for entity in entities {
            self.add_entity(entity, true);
        }
    }

    fn add_entity(&mut self, entity: Entity<T>, bulk: bool) -> bool {
        let uuid = entity.uuid();
        if self.lookup.contains_uuid(uuid) {
            log::warn!("UUID of added entity already exists: {}", uuid);
            return false;
        }

        let geometry = self.config.geometry;
        let section_pos = geometry.section_of(entity.position());
        let initial = self
            .tracker
            .region_visibility(geometry.region_of_section(section_pos));
        let always_active = entity.is_always_active();

        let id = self.lookup.insert(entity, section_pos);
        let section = self.index.get_or_create_section(section_pos, initial);
        section.add(id);
        let visibility = effective_visibility(always_active, section.visibility());

        if !bulk {
            self.events.push(EntityEventKind::Created, id, uuid);
        }
        self.apply_transition(id, uuid, Visibility::Hidden, visibility);
        true
    }

    /// Removes an entity, returning it.
    ///
    /// Ticking and tracking end first. `Destroyed` is only sent if
    /// `reason` destroys the entity.
    pub fn remove(&mut self, id: EntityId, reason: RemovalReason) -> Option<Entity<T>> {
        let section_pos = self.lookup.section_of(id)?;
        let uuid = self.lookup.get(id)?.uuid();

        let filed = self
            .index
            .section_mut(section_pos)
            .map_or(false, |section| section.remove(id));
        if !filed {
            log::warn!(
                "entity {} wasn't found in section {} (destroying due to {:?})",
                id,
                section_pos,
                reason
            );
        }

        let current = self.current_visibility(id);
        self.apply_transition(id, uuid, current, Visibility::Hidden);
        if reason.should_destroy() {
            self.events.push(EntityEventKind::Destroyed, id, uuid);
        }

        let (entity, _) = self.lookup.remove(id)?;
        self.index.remove_section_if_empty(section_pos);
        Some(entity)
    }

    /// Moves an entity, migrating it between sections if needed.
    ///
    /// Returns `false` if the entity is not loaded.
    pub fn set_position(&mut self, id: EntityId, position: DVec3) -> bool {
        let geometry = self.config.geometry;
        let (uuid, always_active) = match self.lookup.get_mut(id) {
            Some(entity) => {
                entity.position = position;
                (entity.uuid(), entity.is_always_active())
            }
            None => return false,
        };

        let old_pos = match self.lookup.section_of(id) {
            Some(pos) => pos,
            None => return false,
        };
        let new_pos = geometry.section_of(position);
        if old_pos == new_pos {
            return true;
        }

        let filed = self
            .index
            .section_mut(old_pos)
            .map_or(false, |section| section.remove(id));
        if !filed {
            log::warn!(
                "entity {} wasn't found in section {} while moving to {}",
                id,
                old_pos,
                new_pos
            );
        }
        self.index.remove_section_if_empty(old_pos);

        let initial = self
            .tracker
            .region_visibility(geometry.region_of_section(new_pos));
        let section = self.index.get_or_create_section(new_pos, initial);
        section.add(id);
        let new_visibility = effective_visibility(always_active, section.visibility());
        self.lookup.set_section(id, new_pos);

        let old_visibility = self.current_visibility(id);
        if old_visibility == new_visibility {
            if new_visibility.is_accessible() {
                self.events.push(EntityEventKind::SectionChange, id, uuid);
            }
        } else {
            self.apply_transition(id, uuid, old_visibility, new_visibility);
        }
        true
    }

    /// Sets the visibility tier of a region and moves the entities in it
    /// across the tracking and ticking thresholds.
    ///
    /// A region turning hidden is queued for unloading on the next
    /// `tick`; a region turning visible has its stored entities requested
    /// unless a load already happened or is in flight.
    pub fn update_region_visibility(&mut self, region: RegionPos, tier: Visibility) {
        if tier == Visibility::Hidden {
            self.to_unload.insert(region);
        } else {
            self.to_unload.remove(&region);
            self.ensure_region_queued_for_load(region);
        }

        if self.tracker.set_region_visibility(region, tier) == tier {
            return;
        }

        for pos in self.index.section_positions_in_region(region) {
            let ids: Vec<EntityId> = match self.index.section_mut(pos) {
                Some(section) => {
                    if section.set_visibility(tier) == tier {
                        continue;
                    }
                    section.entities().collect()
                }
                None => continue,
            };

            for id in ids {
                let (uuid, always_active) = match self.lookup.get(id) {
                    Some(entity) => (entity.uuid(), entity.is_always_active()),
                    None => continue,
                };
                let current = self.current_visibility(id);
                self.apply_transition(id, uuid, current, effective_visibility(always_active, tier));
            }
        }
    }

    /// `update_region_visibility` for a status from the region loading pipeline.
    pub fn update_region_status(&mut self, region: RegionPos, status: RegionStatus) {
        self.update_region_visibility(region, status.into());
    }

    /// Applies completed loads, then unloads hidden regions where possible.
    pub fn tick(&mut self) {
        self.process_pending_loads();
        self.process_unloads();
    }

    /// Writes every region with entities or loaded data to the store.
    /// Hidden regions are unloaded, visible ones are only written.
    ///
    /// Store failures are logged.
    pub fn autosave(&mut self) {
        for region in self.regions_to_save() {
            let result = if self.tracker.region_visibility(region) == Visibility::Hidden {
                self.unload_region(region)
            } else {
                self.store_region(region, false)
            };
            if let Err(err) = result {
                log::error!("failed to save entities of region {}: {}", region, err);
            }
        }
    }

    /// Writes every region out and flushes the store synchronously.
    ///
    /// Blocks until loads still in flight for those regions have
    /// landed, so their entities are merged rather than overwritten.
    /// Regions whose load failed are skipped. Returns the first store
    /// failure.
    pub fn save_all(&mut self) -> Result<()> {
        let mut first_error: Option<StoreError> = None;
        let mut remaining = self.regions_to_save();

        loop {
            if let Err(err) = self.store.flush(false) {
                first_error.get_or_insert(err);
            }
            self.process_pending_loads();

            remaining.retain(|&region| {
                if self.failed_loads.contains(&region) {
                    log::warn!(
                        "not saving region {}: its stored entities failed to load",
                        region
                    );
                    return false;
                }
                let result = if self.tracker.region_visibility(region) == Visibility::Hidden {
                    self.unload_region(region)
                } else {
                    self.store_region(region, false)
                };
                match result {
                    Ok(done) => !done,
                    Err(err) => {
                        log::error!("failed to save entities of region {}: {}", region, err);
                        first_error.get_or_insert(err);
                        false
                    }
                }
            });

            if remaining.is_empty() {
                break;
            }

            // Everything left waits on a load.
            if let Some(completion) = self.inbox.recv() {
                self.apply_load(completion);
            }
        }

        let flushed = self.store.flush(true);
        match first_error {
            Some(err) => Err(err.into()),
            None => flushed.map_err(Into::into),
        }
    }

    /// Saves everything, then closes the store.
    ///
    /// Entities left resident stop ticking and tracking, so every
    /// start event queued so far is matched by an end event.
    pub fn close(&mut self) -> Result<()> {
        let saved = self.save_all();
        let closed = self.store.close();
        self.hide_all();
        saved?;
        closed?;
        Ok(())
    }

    fn hide_all(&mut self) {
        let mut ids: Vec<EntityId> = self.visible.iter().copied().collect();
        ids.extend(self.ticking.ids());
        ids.sort();
        ids.dedup();

        for id in ids {
            let uuid = match self.lookup.get(id) {
                Some(entity) => entity.uuid(),
                None => continue,
            };
            let current = self.current_visibility(id);
            self.apply_transition(id, uuid, current, Visibility::Hidden);
        }
    }

    /// Forgets a region whose load failed, so that it is requested
    /// again. Returns `false` if no load failed for `region`.
    pub fn reset_region(&mut self, region: RegionPos) -> bool {
        if !self.failed_loads.remove(&region) {
            return false;
        }
        self.load_statuses.remove(&region);
        if self.tracker.region_visibility(region) != Visibility::Hidden {
            self.ensure_region_queued_for_load(region);
        }
        true
    }

    fn ensure_region_queued_for_load(&mut self, region: RegionPos) {
        if self.load_status(region) == LoadStatus::Fresh {
            self.request_load(region);
        }
    }

    fn request_load(&mut self, region: RegionPos) {
        log::debug!("requesting entities of region {}", region);
        self.load_statuses.insert(region, LoadStatus::Pending);
        self.store.load_entities(region, self.inbox.sender(region));
    }

    fn process_pending_loads(&mut self) {
        while let Some(completion) = self.inbox.try_recv() {
            self.apply_load(completion);
        }
    }

    fn apply_load(&mut self, completion: LoadCompletion<T>) {
        let region = completion.region;
        if self.load_status(region) != LoadStatus::Pending {
            log::warn!("dropping load of region {} which is not pending", region);
            return;
        }

        match completion.result {
            Ok(entities) => {
                log::debug!("loaded {} entities in region {}", entities.len(), region);
                for entity in entities {
                    self.add_from_storage(entity);
                }
                self.load_statuses.insert(region, LoadStatus::Loaded);
            }
            Err(err) => {
                log::error!("failed to load entities of region {}: {}", region, err);
                self.failed_loads.insert(region);
            }
        }
    }

    fn process_unloads(&mut self) {
        let regions: Vec<RegionPos> = self.to_unload.iter().copied().collect();
        for region in regions {
            let done = if self.tracker.region_visibility(region) != Visibility::Hidden {
                true
            } else {
                match self.unload_region(region) {
                    Ok(done) => done,
                    Err(err) => {
                        log::error!("failed to unload entities of region {}: {}", region, err);
                        false
                    }
                }
            };
            if done {
                self.to_unload.remove(&region);
            }
        }
    }

    /// Writes a region's persistable entities and evicts them.
    ///
    /// Returns `Ok(false)` if the region must wait for a load first.
    fn unload_region(&mut self, region: RegionPos) -> std::result::Result<bool, StoreError> {
        if !self.store_region(region, true)? {
            return Ok(false);
        }
        log::debug!("unloaded region {}", region);
        self.load_statuses.remove(&region);
        self.to_unload.remove(&region);
        Ok(true)
    }

    /// Writes a region's persistable entities, evicting them if `evict`.
    ///
    /// Returns `Ok(false)` without writing while a load is in flight,
    /// and when entities exist but nothing was ever loaded; in that case
    /// a load is requested so stored entities are not overwritten.
    fn store_region(
        &mut self,
        region: RegionPos,
        evict: bool,
    ) -> std::result::Result<bool, StoreError> {
        let status = self.load_status(region);
        if status == LoadStatus::Pending {
            return Ok(false);
        }

        let ids = self.persistable_entities_in(region);
        if ids.is_empty() {
            if status == LoadStatus::Loaded {
                self.store.store_entities(EntityBatch::empty(region))?;
            }
            return Ok(true);
        }
        if status == LoadStatus::Fresh {
            self.request_load(region);
            return Ok(false);
        }

        let entities = ids
            .iter()
            .filter_map(|&id| self.lookup.get(id).cloned())
            .collect();
        self.store.store_entities(EntityBatch::new(region, entities))?;

        if evict {
            for id in ids {
                self.remove(id, RemovalReason::UnloadedToRegion);
            }
        }
        Ok(true)
    }

    /// Persistable entities of a region, ordered by section then id.
    fn persistable_entities_in(&self, region: RegionPos) -> Vec<EntityId> {
        let mut positions = self.index.section_positions_in_region(region);
        positions.sort();

        let mut ids = Vec::new();
        for pos in positions {
            if let Some(section) = self.index.section(pos) {
                let start = ids.len();
                ids.extend(section.entities().filter(|&id| {
                    self.lookup
                        .get(id)
                        .map_or(false, |entity| entity.is_persistable())
                }));
                ids[start..].sort();
            }
        }
        ids
    }

    fn regions_to_save(&self) -> HashSet<RegionPos> {
        let mut regions = self.index.all_regions_with_sections();
        regions.extend(
            self.load_statuses
                .iter()
                .filter(|(_, status)| **status == LoadStatus::Loaded)
                .map(|(region, _)| *region),
        );
        regions
    }

    /// Queues the events for moving an entity from `old` to `new`:
    /// ticking ends before tracking ends, tracking starts before
    /// ticking starts.
    fn apply_transition(&mut self, id: EntityId, uuid: Uuid, old: Visibility, new: Visibility) {
        if old.is_ticking() && !new.is_ticking() {
            self.stop_ticking(id, uuid);
        }
        if old.is_accessible() && !new.is_accessible() {
            self.stop_tracking(id, uuid);
        }
        if !old.is_accessible() && new.is_accessible() {
            self.start_tracking(id, uuid);
        }
        if !old.is_ticking() && new.is_ticking() {
            self.start_ticking(id, uuid);
        }
    }

    fn start_tracking(&mut self, id: EntityId, uuid: Uuid) {
        if self.visible.insert(id) {
            self.events.push(EntityEventKind::TrackingStart, id, uuid);
        }
    }

    fn stop_tracking(&mut self, id: EntityId, uuid: Uuid) {
        if self.visible.remove(&id) {
            self.events.push(EntityEventKind::TrackingEnd, id, uuid);
        }
    }

    fn start_ticking(&mut self, id: EntityId, uuid: Uuid) {
        if self.ticking.add(id) {
            self.events.push(EntityEventKind::TickingStart, id, uuid);
        }
    }

    fn stop_ticking(&mut self, id: EntityId, uuid: Uuid) {
        if self.ticking.remove(id) {
            self.events.push(EntityEventKind::TickingEnd, id, uuid);
        }
    }

    /// The visibility an entity currently has applied.
    fn current_visibility(&self, id: EntityId) -> Visibility {
        if self.ticking.contains(id) {
            Visibility::Ticking
        } else if self.visible.contains(&id) {
            Visibility::Tracked
        } else {
            Visibility::Hidden
        }
    }

    /// Takes the queued lifecycle events, oldest first.
    pub fn drain_events(&mut self) -> impl Iterator<Item = EntityEvent> + '_ {
        self.events.drain()
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Whether an entity with this UUID is loaded.
    pub fn is_loaded(&self, uuid: Uuid) -> bool {
        self.lookup.contains_uuid(uuid)
    }

    pub fn entity_id(&self, uuid: Uuid) -> Option<EntityId> {
        self.lookup.id_of(uuid)
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity<T>> {
        self.lookup.get(id)
    }

    pub fn data_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.lookup.get_mut(id).map(Entity::data_mut)
    }

    /// Number of loaded entities.
    pub fn entity_count(&self) -> usize {
        self.lookup.len()
    }

    /// Whether entities at `position` are simulated.
    pub fn can_tick(&self, position: DVec3) -> bool {
        self.can_region_tick(self.config.geometry.region_of(position))
    }

    pub fn can_region_tick(&self, region: RegionPos) -> bool {
        self.tracker.region_visibility(region).is_ticking()
    }

    pub fn region_visibility(&self, region: RegionPos) -> Visibility {
        self.tracker.region_visibility(region)
    }

    pub fn load_status(&self, region: RegionPos) -> LoadStatus {
        self.load_statuses.get(&region).copied().unwrap_or_default()
    }

    /// Whether the stored entities of `region` have been inserted.
    pub fn are_entities_loaded(&self, region: RegionPos) -> bool {
        self.load_status(region) == LoadStatus::Loaded
    }

    /// Shared handle to the ticking entities, which may be iterated
    /// while the manager is mutated. The set is not `Sync`, so the
    /// handle stays on the owner thread.
    pub fn ticking(&self) -> Rc<ActiveSet> {
        Rc::clone(&self.ticking)
    }

    pub fn is_ticking(&self, id: EntityId) -> bool {
        self.ticking.contains(id)
    }

    pub fn is_tracked(&self, id: EntityId) -> bool {
        self.visible.contains(&id)
    }

    /// A tracked entity by id.
    pub fn visible(&self, id: EntityId) -> Option<&Entity<T>> {
        if self.visible.contains(&id) {
            self.lookup.get(id)
        } else {
            None
        }
    }

    /// A tracked entity by UUID.
    pub fn visible_by_uuid(&self, uuid: Uuid) -> Option<&Entity<T>> {
        self.lookup.id_of(uuid).and_then(|id| self.visible(id))
    }

    /// Ids of all tracked entities.
    pub fn visible_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.visible.iter().copied()
    }

    /// Visits every tracked entity positioned inside `aabb`.
    ///
    /// Boxes spanning more cells than there are sections walk the
    /// existing sections instead of every cell.
    pub fn entities_in_box(&self, aabb: &Aabb, mut visit: impl FnMut(&Entity<T>)) {
        let geometry = self.config.geometry;
        let sections: Vec<&Section> =
            if geometry.cell_count_overlapping(aabb) > self.index.len() as u64 {
                let (min, max) = (geometry.section_of(aabb.min), geometry.section_of(aabb.max));
                self.index
                    .iter()
                    .filter(|(pos, _)| {
                        (min.x..=max.x).contains(&pos.x)
                            && (min.y..=max.y).contains(&pos.y)
                            && (min.z..=max.z).contains(&pos.z)
                    })
                    .map(|(_, section)| section)
                    .collect()
            } else {
                geometry
                    .sections_overlapping(aabb)
                    .filter_map(|pos| self.index.section(pos))
                    .collect()
            };

        for section in sections {
            for id in section.entities() {
                if !self.visible.contains(&id) {
                    continue;
                }
                if let Some(entity) = self.lookup.get(id) {
                    if aabb.contains(entity.position()) {
                        visit(entity);
                    }
                }
            }
        }
    }

    pub fn section_of(&self, id: EntityId) -> Option<SectionPos> {
        self.lookup.section_of(id)
    }

    pub fn section(&self, pos: SectionPos) -> Option<&Section> {
        self.index.section(pos)
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// One line of counters:
    /// `sections,visible,ticking,load_statuses,region_tiers,inbox,unload_queue`.
    pub fn gather_stats(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.index.len(),
            self.visible.len(),
            self.ticking.len(),
            self.load_statuses.len(),
            self.tracker.len(),
            self.inbox.len(),
            self.to_unload.len()
        )
    }

    /// Writes one CSV row per existing section.
    pub fn dump_sections(&self, mut writer: impl Write) -> io::Result<()> {
        writeln!(writer, "x,y,z,visibility,load_status,entity_count")?;

        let mut sections: Vec<_> = self.index.iter().collect();
        sections.sort_by_key(|(pos, _)| *pos);
        for (pos, section) in sections {
            let region = self.config.geometry.region_of_section(pos);
            writeln!(
                writer,
                "{},{},{},{},{},{}",
                pos.x,
                pos.y,
                pos.z,
                section.visibility(),
                self.load_status(region),
                section.len()
            )?;
        }
        Ok(())
    }
}
