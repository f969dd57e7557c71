use super::allocator::IdAllocator;
use crate::entity::{Entity, EntityId};
use crate::pos::SectionPos;
use crate::util::HashMap;
use uuid::Uuid;

struct Slot<T> {
    entity: Entity<T>,
    /// The section the entity is filed under.
    section: SectionPos,
}

/// Owns every live entity, indexed by id and by UUID.
pub(crate) struct EntityLookup<T> {
    ids: IdAllocator,
    slots: HashMap<EntityId, Slot<T>>,
    uuids: HashMap<Uuid, EntityId>,
}

impl<T> Default for EntityLookup<T> {
    fn default() -> Self {
        Self {
            ids: IdAllocator::new(),
            slots: HashMap::default(),
            uuids: HashMap::default(),
        }
    }
}

impl<T> EntityLookup<T> {
    pub fn contains_uuid(&self, uuid: Uuid) -> bool {
        self.uuids.contains_key(&uuid)
    }

    /// Assigns an id and takes ownership of the entity.
    /// The caller must have checked the UUID is unknown.
    pub fn insert(&mut self, mut entity: Entity<T>, section: SectionPos) -> EntityId {
        debug_assert!(!self.contains_uuid(entity.uuid()));
        let id = self.ids.alloc();
        entity.id = id;
        self.uuids.insert(entity.uuid(), id);
        self.slots.insert(id, Slot { entity, section });
        debug_assert_eq!(self.ids.allocated(), self.slots.len());
        id
    }

    /// Releases the entity, its id and its UUID.
    pub fn remove(&mut self, id: EntityId) -> Option<(Entity<T>, SectionPos)> {
        let slot = self.slots.remove(&id)?;
        self.uuids.remove(&slot.entity.uuid());
        self.ids.free(id);
        Some((slot.entity, slot.section))
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity<T>> {
        self.slots.get(&id).map(|slot| &slot.entity)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity<T>> {
        self.slots.get_mut(&id).map(|slot| &mut slot.entity)
    }

    pub fn id_of(&self, uuid: Uuid) -> Option<EntityId> {
        self.uuids.get(&uuid).copied()
    }

    pub fn section_of(&self, id: EntityId) -> Option<SectionPos> {
        self.slots.get(&id).map(|slot| slot.section)
    }

    pub fn set_section(&mut self, id: EntityId, section: SectionPos) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.section = section;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}
