use crate::{
    history::HistorySnapshot,
    roster::{
        Entry,
        Roster,
        VersionTag,
    },
};
use anyhow::ensure;
use rand::Rng;

pub trait RosterProvider: Send + Sync {
    /// latest catalog version
    fn get_latest_version(&self) -> impl Future<Output = anyhow::Result<VersionTag>> + Send;

    /// full set of selectable entries for `version`
    fn get_roster(
        &self,
        version: &VersionTag,
    ) -> impl Future<Output = anyhow::Result<Roster>> + Send;
}

pub trait RandomnessSource: Send + Sync {
    /// uniformly distributed integer in `min..=max`
    fn get_random_integer(
        &self,
        min: u32,
        max: u32,
    ) -> impl Future<Output = anyhow::Result<u32>> + Send;
}

pub trait ImageLoader: Send + Sync {
    /// completes once the entry's image has been fetched
    fn load(
        &self,
        version: &VersionTag,
        entry: &Entry,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// Notified after every change to the history's contents. Implementations must
/// not block.
pub trait HistoryObserver: Send + Sync {
    fn history_changed(&self, snapshot: &HistorySnapshot);
}

/// Local RNG, for running without the remote randomness service.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadRngSource;

impl RandomnessSource for ThreadRngSource {
    async fn get_random_integer(&self, min: u32, max: u32) -> anyhow::Result<u32> {
        ensure!(min <= max, "empty range {min}..={max}");
        Ok(rand::rng().random_range(min..=max))
    }
}
