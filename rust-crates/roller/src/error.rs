use crate::history::HISTORY_CAPACITY;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("roster provider failed: {0:#}")]
    Roster(#[source] anyhow::Error),

    #[error("randomness source failed: {0:#}")]
    Randomness(#[source] anyhow::Error),

    #[error(
        "roster has {len} entries; at least {} are needed to avoid repeats",
        HISTORY_CAPACITY + 1
    )]
    RosterTooSmall { len: usize },

    #[error("every roster entry is already retained ({retained} of {roster})")]
    Exhausted { retained: usize, roster: usize },

    #[error("no fresh entry after {attempts} draws")]
    RetriesExhausted { attempts: usize },

    #[error("random index {index} outside 1..={len}")]
    IndexOutOfRange { index: u32, len: usize },

    #[error("history slot {index} out of range (history holds {len})")]
    SlotOutOfRange { index: usize, len: usize },
}
