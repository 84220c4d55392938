pub mod engine;

pub mod history;

pub mod ports;

pub mod roster;

pub mod session;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

mod error;

pub use engine::{
    EngineConfig,
    RollEngine,
};
pub use error::Error;
pub use history::{
    HISTORY_CAPACITY,
    History,
    HistorySlot,
    HistorySnapshot,
    ImageState,
};
pub use roster::{
    Entry,
    EntryId,
    Roster,
    VersionTag,
};
pub use session::Session;

pub type Result<T, E = Error> = std::result::Result<T, E>;
