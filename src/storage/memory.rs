//! An in-process `EntityStore` with a background I/O worker.

use crate::entity::Entity;
use crate::error::StoreError;
use crate::pos::RegionPos;
use crate::storage::{EntityBatch, EntityStore, LoadSender};
use crate::util::{HashMap, HashSet};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

enum Job<T> {
    Load(LoadSender<T>),
    Store(EntityBatch<T>),
    /// Answers with the first write failure since the last flush.
    Flush(Sender<Option<StoreError>>),
}

struct Shared<T> {
    regions: Mutex<HashMap<RegionPos, Vec<Entity<T>>>>,
    failing_loads: Mutex<HashSet<RegionPos>>,
    fail_stores: AtomicBool,
    write_error: Mutex<Option<StoreError>>,
}

/// Keeps stored entities in memory. Requests are served in order by a
/// single worker thread, so loads complete off the caller's thread and
/// writes to a region are never reordered.
///
/// A synchronous flush doubles as a barrier: once it returns, every
/// earlier load has been completed.
pub struct MemoryStore<T> {
    shared: Arc<Shared<T>>,
    jobs: Mutex<Option<Sender<Job<T>>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    /// Load requests parked by `hold_loads`.
    held: Mutex<Option<Vec<LoadSender<T>>>>,
    load_requests: AtomicUsize,
    store_requests: AtomicUsize,
}

impl<T> MemoryStore<T>
where
    T: Clone + Send + 'static,
{
    /// Creates an empty store and starts its worker.
    pub fn new() -> Result<Self, StoreError> {
        let shared = Arc::new(Shared {
            regions: Mutex::new(HashMap::default()),
            failing_loads: Mutex::new(HashSet::default()),
            fail_stores: AtomicBool::new(false),
            write_error: Mutex::new(None),
        });

        let (tx, rx) = unbounded::<Job<T>>();
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("entity-store-io".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    worker_shared.run(job);
                }
            })
            .map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self {
            shared,
            jobs: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            held: Mutex::new(None),
            load_requests: AtomicUsize::new(0),
            store_requests: AtomicUsize::new(0),
        })
    }

    fn submit(&self, job: Job<T>) -> Result<(), StoreError> {
        match &*self.jobs.lock() {
            Some(tx) => tx.send(job).map_err(|_| StoreError::Closed),
            None => Err(StoreError::Closed),
        }
    }

    /// Seeds the stored entities of a region directly.
    pub fn insert_region(&self, region: RegionPos, entities: Vec<Entity<T>>) {
        self.shared.regions.lock().insert(region, entities);
    }

    /// The entities currently stored for `region`. Writes still queued
    /// on the worker are not visible; flush first.
    pub fn stored(&self, region: RegionPos) -> Option<Vec<Entity<T>>> {
        self.shared.regions.lock().get(&region).cloned()
    }

    /// Number of regions with stored entities.
    pub fn region_count(&self) -> usize {
        self.shared.regions.lock().len()
    }

    /// Makes every load of `region` fail with an I/O error.
    pub fn fail_loads_for(&self, region: RegionPos) {
        self.shared.failing_loads.lock().insert(region);
    }

    /// Makes queued writes fail. The failure is reported by the next
    /// synchronous flush.
    pub fn set_fail_stores(&self, fail: bool) {
        self.shared.fail_stores.store(fail, Ordering::Release);
    }

    /// While held, load requests are parked instead of served.
    pub fn hold_loads(&self) {
        self.held.lock().get_or_insert_with(Vec::new);
    }

    /// Serves every parked load request and stops holding new ones.
    pub fn release_loads(&self) -> Result<(), StoreError> {
        let parked = self.held.lock().take().unwrap_or_default();
        for done in parked {
            self.submit(Job::Load(done))?;
        }
        Ok(())
    }

    /// Total number of `load_entities` calls.
    pub fn load_requests(&self) -> usize {
        self.load_requests.load(Ordering::Acquire)
    }

    /// Total number of `store_entities` calls.
    pub fn store_requests(&self) -> usize {
        self.store_requests.load(Ordering::Acquire)
    }
}

impl<T> Shared<T>
where
    T: Clone,
{
    fn run(&self, job: Job<T>) {
        match job {
            Job::Load(done) => {
                let region = done.region();
                if self.failing_loads.lock().contains(&region) {
                    done.complete(Err(StoreError::Io(format!(
                        "failed to read region {}",
                        region
                    ))));
                    return;
                }
                let entities = self
                    .regions
                    .lock()
                    .get(&region)
                    .cloned()
                    .unwrap_or_default();
                done.complete(Ok(entities));
            }
            Job::Store(batch) => {
                if self.fail_stores.load(Ordering::Acquire) {
                    self.write_error
                        .lock()
                        .get_or_insert_with(|| StoreError::Rejected(batch.region.to_string()));
                    return;
                }
                let mut regions = self.regions.lock();
                if batch.entities.is_empty() {
                    regions.remove(&batch.region);
                } else {
                    regions.insert(batch.region, batch.entities);
                }
            }
            Job::Flush(ack) => {
                let _ = ack.send(self.write_error.lock().take());
            }
        }
    }
}

impl<T> EntityStore<T> for MemoryStore<T>
where
    T: Clone + Send + 'static,
{
    fn load_entities(&self, region: RegionPos, done: LoadSender<T>) {
        self.load_requests.fetch_add(1, Ordering::AcqRel);

        if let Some(parked) = &mut *self.held.lock() {
            parked.push(done);
            return;
        }

        let rejected = match &*self.jobs.lock() {
            Some(tx) => tx.send(Job::Load(done)).err().map(|e| e.into_inner()),
            None => Some(Job::Load(done)),
        };
        if let Some(Job::Load(done)) = rejected {
            done.complete(Err(StoreError::Closed));
        }
    }

    fn store_entities(&self, batch: EntityBatch<T>) -> Result<(), StoreError> {
        self.store_requests.fetch_add(1, Ordering::AcqRel);
        self.submit(Job::Store(batch))
    }

    fn flush(&self, synchronous: bool) -> Result<(), StoreError> {
        if !synchronous {
            return Ok(());
        }
        let (ack_tx, ack_rx) = bounded(1);
        self.submit(Job::Flush(ack_tx))?;
        match ack_rx.recv() {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(err),
            Err(_) => Err(StoreError::Closed),
        }
    }

    fn close(&self) -> Result<(), StoreError> {
        let flushed = self.flush(true);
        self.jobs.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                log::error!("entity store worker panicked");
            }
        }
        flushed
    }
}

impl<T> Drop for MemoryStore<T> {
    fn drop(&mut self) {
        self.jobs.get_mut().take();
        if let Some(worker) = self.worker.get_mut().take() {
            let _ = worker.join();
        }
    }
}
