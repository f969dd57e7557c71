//! Re-exports types depending on crate enabled features.

#[cfg(feature = "fast-hasher")]
pub type HashState = core::hash::BuildHasherDefault<rustc_hash::FxHasher>;
#[cfg(not(feature = "fast-hasher"))]
pub type HashState = std::collections::hash_map::RandomState;

pub type HashMap<K, V> = std::collections::HashMap<K, V, HashState>;
pub type HashSet<K> = std::collections::HashSet<K, HashState>;

#[cfg(not(loom))]
pub use core::sync::atomic::{AtomicU32, AtomicUsize};

#[cfg(loom)]
pub use loom::sync::atomic::{AtomicU32, AtomicUsize};
