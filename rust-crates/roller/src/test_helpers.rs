//! Deterministic collaborators for exercising the engine without the network.

use crate::{
    history::HistorySnapshot,
    ports::{
        HistoryObserver,
        ImageLoader,
        RandomnessSource,
        RosterProvider,
    },
    roster::{
        Entry,
        Roster,
        VersionTag,
    },
};
use anyhow::{
    anyhow,
    bail,
};
use rand::{
    Rng,
    SeedableRng,
    rngs::StdRng,
};
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        atomic::{
            AtomicUsize,
            Ordering,
        },
    },
};

pub const TEST_VERSION: &str = "test";

pub fn entry(id: &str) -> Entry {
    Entry::new(id, id, format!("{id}.png"))
}

/// Roster tagged [`TEST_VERSION`]; `roster_of(&["A", "B"])` maps index 1 to A.
pub fn roster_of(ids: &[&str]) -> Roster {
    Roster::new(
        VersionTag::new(TEST_VERSION),
        ids.iter().map(|id| entry(id)),
    )
}

/// Replays a fixed sequence of draws and counts every call.
#[derive(Clone, Default)]
pub struct ScriptedRandomness {
    script: Arc<Mutex<VecDeque<u32>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedRandomness {
    pub fn new(values: impl IntoIterator<Item = u32>) -> Self {
        Self {
            script: Arc::new(Mutex::new(values.into_iter().collect())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn push(&self, values: impl IntoIterator<Item = u32>) {
        self.script.lock().unwrap().extend(values);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().unwrap().len()
    }
}

impl RandomnessSource for ScriptedRandomness {
    async fn get_random_integer(&self, min: u32, max: u32) -> anyhow::Result<u32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(value) => Ok(value),
            None => bail!("scripted randomness exhausted (asked for {min}..={max})"),
        }
    }
}

/// Seeded uniform source for long-running property checks.
#[derive(Clone)]
pub struct SeededRandomness {
    rng: Arc<Mutex<StdRng>>,
    calls: Arc<AtomicUsize>,
}

impl SeededRandomness {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RandomnessSource for SeededRandomness {
    async fn get_random_integer(&self, min: u32, max: u32) -> anyhow::Result<u32> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let value = self.rng.lock().unwrap().random_range(min..=max);
        Ok(value)
    }
}

/// Always fails, like an unreachable randomness service.
#[derive(Clone, Copy, Default)]
pub struct BrokenRandomness;

impl RandomnessSource for BrokenRandomness {
    async fn get_random_integer(&self, _min: u32, _max: u32) -> anyhow::Result<u32> {
        Err(anyhow!("randomness service unreachable"))
    }
}

/// Images that are ready as soon as they are requested.
#[derive(Clone, Default)]
pub struct InstantImages {
    loads: Arc<AtomicUsize>,
}

impl InstantImages {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ImageLoader for InstantImages {
    async fn load(&self, _version: &VersionTag, _entry: &Entry) -> anyhow::Result<()> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Copy, Default)]
pub struct FailingImages;

impl ImageLoader for FailingImages {
    async fn load(&self, _version: &VersionTag, entry: &Entry) -> anyhow::Result<()> {
        Err(anyhow!("image {} unavailable", entry.image))
    }
}

/// In-memory roster provider; `failing()` mimics an unreachable catalog.
#[derive(Clone)]
pub struct StaticRoster {
    roster: Option<Roster>,
}

impl StaticRoster {
    pub fn new(roster: Roster) -> Self {
        Self {
            roster: Some(roster),
        }
    }

    pub fn failing() -> Self {
        Self { roster: None }
    }
}

impl RosterProvider for StaticRoster {
    async fn get_latest_version(&self) -> anyhow::Result<VersionTag> {
        match &self.roster {
            Some(roster) => Ok(roster.version().clone()),
            None => bail!("catalog unreachable"),
        }
    }

    async fn get_roster(&self, version: &VersionTag) -> anyhow::Result<Roster> {
        match &self.roster {
            Some(roster) if roster.version() == version => Ok(roster.clone()),
            Some(roster) => bail!("unknown version {version}, have {}", roster.version()),
            None => bail!("catalog unreachable"),
        }
    }
}

/// Keeps every snapshot it is notified with.
#[derive(Clone, Default)]
pub struct RecordingObserver {
    snapshots: Arc<Mutex<Vec<HistorySnapshot>>>,
}

impl RecordingObserver {
    pub fn snapshots(&self) -> Vec<HistorySnapshot> {
        self.snapshots.lock().unwrap().clone()
    }

    /// Whether some engine still holds a clone of this observer.
    pub fn is_attached(&self) -> bool {
        Arc::strong_count(&self.snapshots) > 1
    }
}

impl HistoryObserver for RecordingObserver {
    fn history_changed(&self, snapshot: &HistorySnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}
