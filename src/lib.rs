mod borrow;
mod config;
mod entity;
mod error;
mod events;
mod manager;
mod pos;
mod section;
pub mod storage;
mod tick_list;
mod util;
mod visibility;

pub use borrow::{AtomicRef, AtomicRefCell, AtomicRefMut, BorrowError};
pub use config::{Config, Geometry, MAX_SHIFT};
pub use entity::{Entity, EntityId, RemovalReason};
pub use error::{Error, Result, StoreError};
pub use events::{EntityEvent, EntityEventKind};
pub use manager::EntityManager;
pub use pos::{Aabb, RegionPos, SectionPos};
pub use section::{Section, SpatialIndex};
pub use storage::{memory::MemoryStore, EntityBatch, EntityStore, LoadSender};
pub use tick_list::ActiveSet;
pub use visibility::{LoadStatus, RegionStatus, Visibility, VisibilityTracker};

pub use glam::DVec3;
pub use uuid::Uuid;
