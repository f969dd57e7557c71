//! The contract between the manager and durable entity storage.
//!
//! Loads complete asynchronously through a channel which the
//! manager drains on its own thread, so only the owner thread
//! ever touches the spatial index.

pub mod memory;

use crate::entity::Entity;
use crate::error::StoreError;
use crate::pos::RegionPos;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

/// The persistable entities of one region, in storage order.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityBatch<T> {
    pub region: RegionPos,
    pub entities: Vec<Entity<T>>,
}

impl<T> EntityBatch<T> {
    pub fn new(region: RegionPos, entities: Vec<Entity<T>>) -> Self {
        Self { region, entities }
    }

    /// A batch which clears whatever is stored for `region`.
    pub fn empty(region: RegionPos) -> Self {
        Self::new(region, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

/// Durable storage of entities, keyed by region.
pub trait EntityStore<T> {
    /// Starts loading the entities stored for `region`. The store
    /// must eventually complete `done`, from any thread. Unreadable
    /// data should be reported as an empty batch; an `Err` leaves the
    /// region waiting until the manager is told to reset it.
    fn load_entities(&self, region: RegionPos, done: LoadSender<T>);

    /// Replaces the entities stored for `batch.region`. Writes to one
    /// region must be applied in the order they are issued.
    fn store_entities(&self, batch: EntityBatch<T>) -> Result<(), StoreError>;

    /// Flushes accepted writes. A synchronous flush blocks until they
    /// have landed and reports any write that failed in the meantime.
    fn flush(&self, synchronous: bool) -> Result<(), StoreError>;

    /// Flushes synchronously and releases the store.
    fn close(&self) -> Result<(), StoreError>;
}

/// Outcome of one load request.
#[derive(Debug)]
pub struct LoadCompletion<T> {
    pub region: RegionPos,
    pub result: Result<Vec<Entity<T>>, StoreError>,
}

/// Completes a single load request.
#[derive(Debug)]
pub struct LoadSender<T> {
    region: RegionPos,
    tx: Sender<LoadCompletion<T>>,
}

impl<T> LoadSender<T> {
    pub fn region(&self) -> RegionPos {
        self.region
    }

    pub fn complete(self, result: Result<Vec<Entity<T>>, StoreError>) {
        let region = self.region;
        if self.tx.send(LoadCompletion { region, result }).is_err() {
            log::debug!("dropping load result for region {}: manager is gone", region);
        }
    }
}

/// Receiving end of load completions, owned by the manager.
#[derive(Debug)]
pub struct LoadInbox<T> {
    tx: Sender<LoadCompletion<T>>,
    rx: Receiver<LoadCompletion<T>>,
}

impl<T> Default for LoadInbox<T> {
    fn default() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }
}

impl<T> LoadInbox<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sender(&self, region: RegionPos) -> LoadSender<T> {
        LoadSender {
            region,
            tx: self.tx.clone(),
        }
    }

    /// Returns a completion if one has already arrived.
    pub fn try_recv(&self) -> Option<LoadCompletion<T>> {
        match self.rx.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks until a completion arrives. The inbox holds a sender
    /// itself, so this only returns once a store completes a load.
    pub fn recv(&self) -> Option<LoadCompletion<T>> {
        self.rx.recv().ok()
    }

    /// Number of completions waiting to be drained.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
