//! Lifecycle notifications for the host simulation.
//!
//! The manager queues an event wherever a callback would fire;
//! the host drains them in order.

use crate::entity::EntityId;
use std::collections::VecDeque;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EntityEventKind {
    /// A freshly spawned entity was added. Not sent for entities
    /// loaded from storage or inserted in bulk.
    Created,
    /// The entity was removed for good.
    Destroyed,
    TrackingStart,
    TrackingEnd,
    TickingStart,
    TickingEnd,
    /// The entity moved to another section while staying tracked.
    /// Sent once per migration, so an entity crossing two sections
    /// before the queue is drained is reported twice.
    SectionChange,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityEvent {
    pub kind: EntityEventKind,
    pub id: EntityId,
    pub uuid: Uuid,
}

/// FIFO of pending events.
#[derive(Debug, Default)]
pub struct EventQueue(VecDeque<EntityEvent>);

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: EntityEventKind, id: EntityId, uuid: Uuid) {
        self.0.push_back(EntityEvent { kind, id, uuid });
    }

    pub fn drain(&mut self) -> impl Iterator<Item = EntityEvent> + '_ {
        self.0.drain(..)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}
