use glam::DVec3;
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Process-local handle of a live entity.
///
/// Ids are unique among live entities and are reused
/// once the entity they were assigned to is removed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityId(pub u64);

impl Display for EntityId {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why an entity left the manager.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    Killed,
    Discarded,
    /// Evicted after being written to the store with its region.
    UnloadedToRegion,
    UnloadedWithPlayer,
    ChangedDimension,
}

impl RemovalReason {
    /// Whether the entity ceases to exist, as opposed to
    /// continuing to exist somewhere else.
    pub fn should_destroy(self) -> bool {
        matches!(self, RemovalReason::Killed | RemovalReason::Discarded)
    }
}

/// An entity tracked by an `EntityManager`, carrying host data `T`.
///
/// The position may only be changed through `EntityManager::set_position`,
/// which keeps section membership in sync.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Entity<T> {
    /// Assigned on insertion; ids read back from storage are replaced.
    pub(crate) id: EntityId,
    uuid: Uuid,
    pub(crate) position: DVec3,
    always_active: bool,
    persistable: bool,
    data: T,
}

impl<T> Entity<T> {
    /// Creates a persistable entity that follows its region's visibility.
    pub fn new(uuid: Uuid, position: DVec3, data: T) -> Self {
        Self {
            id: EntityId(0),
            uuid,
            position,
            always_active: false,
            persistable: true,
            data,
        }
    }

    /// Creates an entity with a random UUID.
    pub fn with_random_uuid(position: DVec3, data: T) -> Self {
        Self::new(Uuid::new_v4(), position, data)
    }

    /// Builder function to mark the entity as always ticking.
    pub fn always_active(mut self, always_active: bool) -> Self {
        self.always_active = always_active;
        self
    }

    /// Builder function to control whether the entity is written to the store.
    pub fn persistable(mut self, persistable: bool) -> Self {
        self.persistable = persistable;
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn position(&self) -> DVec3 {
        self.position
    }

    pub fn is_always_active(&self) -> bool {
        self.always_active
    }

    pub fn is_persistable(&self) -> bool {
        self.persistable
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn into_data(self) -> T {
        self.data
    }
}
