use crate::{
    Error,
    Result,
    history::{
        History,
        HistorySlot,
        HistorySnapshot,
        ImageState,
    },
    ports::{
        HistoryObserver,
        ImageLoader,
        RandomnessSource,
    },
    roster::{
        Entry,
        EntryId,
        Roster,
    },
};
use std::collections::{
    HashSet,
    VecDeque,
};
use tracing::{
    debug,
    warn,
};

pub const DEFAULT_PRELOAD_TARGET: usize = 3;
pub const DEFAULT_MAX_DRAW_ATTEMPTS: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// Picks kept selected and image-primed ahead of demand. Zero disables
    /// preloading.
    pub preload_target: usize,
    /// Draws allowed per selection before giving up.
    pub max_draw_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preload_target: DEFAULT_PRELOAD_TARGET,
            max_draw_attempts: DEFAULT_MAX_DRAW_ATTEMPTS,
        }
    }
}

/// Picks entries that do not repeat anything currently retained, keeping a
/// small buffer of ready picks to hide upstream latency.
///
/// Every retained entry (history and preload buffer) is distinct. Operations
/// take `&mut self`, so at most one of them is in flight per engine.
pub struct RollEngine<R, I> {
    roster: Roster,
    randomness: R,
    images: I,
    config: EngineConfig,
    history: History,
    preload: VecDeque<HistorySlot>,
    observers: Vec<Box<dyn HistoryObserver>>,
}


impl<R, I> RollEngine<R, I> {
    pub fn new(roster: Roster, randomness: R, images: I, config: EngineConfig) -> Self {
        Self {
            roster,
            randomness,
            images,
            config,
            history: History::new(),
            preload: VecDeque::new(),
            observers: Vec::new(),
        }
    }

    pub fn subscribe(&mut self, observer: impl HistoryObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    /// Serializable copy of the history, as observers receive it.
    pub fn snapshot(&self) -> HistorySnapshot {
        self.history.snapshot()
    }

    pub fn preload_len(&self) -> usize {
        self.preload.len()
    }

    pub fn preloaded(&self) -> impl Iterator<Item = &HistorySlot> {
        self.preload.iter()
    }

    pub fn needs_refill(&self) -> bool {
        self.preload.len() < self.config.preload_target
    }

    pub(crate) fn clear_observers(&mut self) {
        self.observers.clear();
    }

    /// Replaces the history with `entries` (most recent first), images ready.
    #[cfg(any(test, feature = "test-helpers"))]
    pub fn seed_history(&mut self, entries: impl IntoIterator<Item = Entry>) {
        let entries: Vec<Entry> = entries.into_iter().collect();
        self.history = History::new();
        for entry in entries.into_iter().rev() {
            self.history
                .push_front(HistorySlot::with_image(entry, ImageState::Ready));
        }
    }

    fn notify(&self) {
        if self.observers.is_empty() {
            return;
        }
        let snapshot = self.history.snapshot();
        for observer in &self.observers {
            observer.history_changed(&snapshot);
        }
    }

    /// Ids a new pick must avoid: the buffer plus every history slot except
    /// `skip_slot`.
    fn excluded_ids(&self, skip_slot: Option<usize>) -> HashSet<EntryId> {
        self.history
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != skip_slot)
            .map(|(_, slot)| slot.id().clone())
            .chain(self.preload.iter().map(|slot| slot.id().clone()))
            .collect()
    }

    fn take_buffered(&mut self, skip_slot: Option<usize>) -> Option<HistorySlot> {
        while let Some(slot) = self.preload.pop_front() {
            let clashes = self
                .history
                .iter()
                .enumerate()
                .any(|(idx, held)| Some(idx) != skip_slot && held.id() == slot.id());
            if !clashes {
                debug!(id = %slot.id(), remaining = self.preload.len(), "using preloaded pick");
                return Some(slot);
            }
            warn!(id = %slot.id(), "discarding preloaded pick already in history");
        }
        None
    }
}

impl<R: RandomnessSource, I: ImageLoader> RollEngine<R, I> {
    /// Picks an entry not present in the history and pushes it to the front.
    ///
    /// Consumes the preload buffer when it has anything, without touching the
    /// randomness source; call [`Self::refill_preload_buffer`] afterwards to top
    /// it back up. Otherwise draws until a fresh entry turns up.
    pub async fn pick_next(&mut self) -> Result<Entry> {
        let slot = match self.take_buffered(None) {
            Some(slot) => slot,
            None => HistorySlot::pending(self.draw_fresh(None).await?),
        };
        let entry = slot.entry.clone();
        if let Some(evicted) = self.history.push_front(slot) {
            debug!(id = %evicted.id(), "evicted oldest pick");
        }
        self.notify();
        Ok(entry)
    }

    /// Replaces `history[index]` with a fresh pick. Only that slot changes.
    ///
    /// The slot's current entry does not count as a duplicate; the other slots
    /// and the buffer do.
    pub async fn reroll(&mut self, index: usize) -> Result<Entry> {
        let len = self.history.len();
        if index >= len {
            return Err(Error::SlotOutOfRange { index, len });
        }
        let slot = match self.take_buffered(Some(index)) {
            Some(slot) => slot,
            None => HistorySlot::pending(self.draw_fresh(Some(index)).await?),
        };
        let entry = slot.entry.clone();
        if let Some(previous) = self.history.replace_at(index, slot) {
            debug!(index, from = %previous.id(), to = %entry.id, "rerolled slot");
        }
        self.notify();
        Ok(entry)
    }

    /// Tops the buffer up to its target. Each candidate avoids history and
    /// buffer, and its image load is awaited before it is queued.
    ///
    /// Stops early, without error, once the roster has nothing left to spare.
    pub async fn refill_preload_buffer(&mut self) -> Result<usize> {
        let mut added = 0;
        while self.needs_refill() {
            let entry = match self.draw_fresh(None).await {
                Ok(entry) => entry,
                Err(Error::Exhausted { retained, roster }) => {
                    debug!(retained, roster, "roster cannot spare another preload");
                    break;
                }
                Err(e) => return Err(e),
            };
            let image = self.load_image(&entry).await;
            self.preload.push_back(HistorySlot::with_image(entry, image));
            added += 1;
        }
        if added > 0 {
            debug!(added, buffered = self.preload.len(), "refilled preload buffer");
        }
        Ok(added)
    }

    /// Awaits the image of every history slot still pending. Returns how many
    /// slots changed state.
    pub async fn resolve_images(&mut self) -> usize {
        let pending: Vec<Entry> = self
            .history
            .iter()
            .filter(|slot| slot.image == ImageState::Pending)
            .map(|slot| slot.entry.clone())
            .collect();
        let mut resolved = 0;
        for entry in pending {
            let state = self.load_image(&entry).await;
            if self.history.set_image_state(&entry.id, state) {
                resolved += 1;
            }
        }
        resolved
    }

    async fn load_image(&self, entry: &Entry) -> ImageState {
        match self.images.load(self.roster.version(), entry).await {
            Ok(()) => ImageState::Ready,
            Err(e) => {
                warn!(id = %entry.id, error = %e, "image load failed");
                ImageState::Failed
            }
        }
    }

    async fn draw_fresh(&self, skip_slot: Option<usize>) -> Result<Entry> {
        let excluded = self.excluded_ids(skip_slot);
        let len = self.roster.len();
        let available = self
            .roster
            .iter()
            .filter(|entry| !excluded.contains(&entry.id))
            .count();
        if available == 0 {
            return Err(Error::Exhausted {
                retained: excluded.len(),
                roster: len,
            });
        }
        let max = u32::try_from(len).unwrap_or(u32::MAX);
        let attempts = self.config.max_draw_attempts.max(1);
        for attempt in 1..=attempts {
            let index = self
                .randomness
                .get_random_integer(1, max)
                .await
                .map_err(Error::Randomness)?;
            let entry = self
                .roster
                .by_index(index)
                .ok_or(Error::IndexOutOfRange { index, len })?;
            if excluded.contains(&entry.id) {
                debug!(attempt, id = %entry.id, "rejected duplicate draw");
                continue;
            }
            debug!(attempt, id = %entry.id, "drew fresh entry");
            return Ok(entry.clone());
        }
        Err(Error::RetriesExhausted { attempts })
    }
}
