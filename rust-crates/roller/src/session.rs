use crate::{
    Error,
    Result,
    engine::{
        EngineConfig,
        RollEngine,
    },
    history::HISTORY_CAPACITY,
    ports::RosterProvider,
    roster::VersionTag,
};
use tracing::info;

/// One picker session: the roster fetched at start-up plus the engine holding
/// history and preload state. Dropped (or [`Session::shutdown`]) at the end.
pub struct Session<R, I> {
    engine: RollEngine<R, I>,
}

impl<R, I> Session<R, I> {
    /// Fetches the latest catalog and builds an engine over it. Fails without
    /// retrying when the catalog cannot be loaded.
    pub async fn initialize<P: RosterProvider>(
        provider: &P,
        randomness: R,
        images: I,
        config: EngineConfig,
    ) -> Result<Self> {
        let version = provider
            .get_latest_version()
            .await
            .map_err(Error::Roster)?;
        info!(%version, "latest catalog version");
        let roster = provider.get_roster(&version).await.map_err(Error::Roster)?;
        if roster.len() <= HISTORY_CAPACITY {
            return Err(Error::RosterTooSmall { len: roster.len() });
        }
        info!(entries = roster.len(), %version, "roster loaded");
        Ok(Self {
            engine: RollEngine::new(roster, randomness, images, config),
        })
    }

    pub fn version(&self) -> &VersionTag {
        self.engine.roster().version()
    }

    pub fn engine(&self) -> &RollEngine<R, I> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut RollEngine<R, I> {
        &mut self.engine
    }

    /// Ends the session, detaching every observer.
    pub fn shutdown(mut self) {
        info!(
            version = %self.version(),
            picks = self.engine.history().len(),
            "closing session"
        );
        self.engine.clear_observers();
    }
}
