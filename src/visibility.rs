use crate::pos::RegionPos;
use crate::util::HashMap;
use std::fmt::{self, Display, Formatter};

/// How much of the simulation an entity takes part in.
///
/// Ordered from least to most visible.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Visibility {
    /// Not observable and not simulated.
    #[default]
    Hidden,
    /// Observable by trackers, but not simulated.
    Tracked,
    /// Observable and simulated.
    Ticking,
}

impl Visibility {
    pub fn is_accessible(self) -> bool {
        self >= Visibility::Tracked
    }

    pub fn is_ticking(self) -> bool {
        self == Visibility::Ticking
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Hidden => "HIDDEN",
            Visibility::Tracked => "TRACKED",
            Visibility::Ticking => "TICKING",
        }
    }
}

impl Display for Visibility {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load level of a region as reported by the region loading pipeline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum RegionStatus {
    Inaccessible,
    Border,
    BlockTicking,
    EntityTicking,
}

impl From<RegionStatus> for Visibility {
    fn from(status: RegionStatus) -> Self {
        match status {
            RegionStatus::Inaccessible => Visibility::Hidden,
            RegionStatus::Border | RegionStatus::BlockTicking => Visibility::Tracked,
            RegionStatus::EntityTicking => Visibility::Ticking,
        }
    }
}

/// Progress of loading a region's stored entities.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum LoadStatus {
    /// Nothing has been requested from the store.
    #[default]
    Fresh,
    /// A load is in flight.
    Pending,
    /// Stored entities have been inserted.
    Loaded,
}

impl LoadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadStatus::Fresh => "FRESH",
            LoadStatus::Pending => "PENDING",
            LoadStatus::Loaded => "LOADED",
        }
    }
}

impl Display for LoadStatus {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authoritative visibility tier of every region.
///
/// Regions never mentioned are `Hidden`; hidden regions are
/// not stored.
#[derive(Debug, Default)]
pub struct VisibilityTracker {
    regions: HashMap<RegionPos, Visibility>,
}

impl VisibilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the tier of `region`, returning the previous one.
    pub fn set_region_visibility(&mut self, region: RegionPos, tier: Visibility) -> Visibility {
        let old = if tier == Visibility::Hidden {
            self.regions.remove(&region)
        } else {
            self.regions.insert(region, tier)
        };
        old.unwrap_or_default()
    }

    pub fn region_visibility(&self, region: RegionPos) -> Visibility {
        self.regions.get(&region).copied().unwrap_or_default()
    }

    /// Number of regions that are not hidden.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Effective visibility of an entity: always-active entities tick
/// regardless of their section.
pub fn effective_visibility(always_active: bool, section: Visibility) -> Visibility {
    if always_active {
        Visibility::Ticking
    } else {
        section
    }
}
