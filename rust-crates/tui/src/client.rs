use crate::ui;
use champ_roll::{
    config::{
        AppConfig,
        RandomnessChoice,
    },
    ddragon_client::DataDragonClient,
    http::build_client,
    peers::{
        PeerBroadcaster,
        PeerEvent,
        PeerHub,
        PeerId,
    },
    randomness::{
        RandomOrgClient,
        Randomness,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    anyhow,
    eyre,
};
use roller::{
    EngineConfig,
    Entry,
    History,
    ImageState,
    Session,
    VersionTag,
    ports::{
        ImageLoader,
        RandomnessSource,
        RosterProvider,
        ThreadRngSource,
    },
};
use std::{
    net::SocketAddr,
    time::Duration,
};
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::timeout,
};
use tracing::{
    error,
    info,
    warn,
};

const MAX_SHOWN_ERRORS: usize = 5;

/// How long a quitting app waits for the worker before aborting it.
const WORKER_STOP_GRACE: Duration = Duration::from_secs(2);

type AppWorker = EngineWorker<DataDragonClient, Randomness>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryCard {
    /// 1-based, matches the reroll key
    pub slot: usize,
    pub name: String,
    pub image_url: String,
    pub image: ImageState,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Failed(String),
    Ready {
        version: VersionTag,
        roster_len: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerView {
    pub peer: PeerId,
    pub addr: SocketAddr,
    pub name: Option<String>,
    pub entries: Vec<String>,
}

impl PeerView {
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("{name} ({})", self.addr),
            None => self.addr.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub phase: Phase,
    pub randomness: String,
    pub history: Vec<HistoryCard>,
    pub preloaded: usize,
    pub preload_target: usize,
    pub pending_commands: usize,
    pub status: String,
    pub errors: Vec<String>,
    pub peer_sync: bool,
    pub peers: Vec<PeerView>,
}

impl AppSnapshot {
    fn new(randomness: String, preload_target: usize, peer_sync: bool) -> Self {
        Self {
            phase: Phase::Loading,
            randomness,
            history: Vec::new(),
            preloaded: 0,
            preload_target,
            pending_commands: 0,
            status: String::from("Loading champions..."),
            errors: Vec::new(),
            peer_sync,
            peers: Vec::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready { .. })
    }

    pub fn is_busy(&self) -> bool {
        self.pending_commands > 0
    }

    fn push_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
        if self.errors.len() > MAX_SHOWN_ERRORS {
            let overflow = self.errors.len() - MAX_SHOWN_ERRORS;
            self.errors.drain(..overflow);
        }
    }
}

#[derive(Debug)]
enum WorkerCommand {
    Initialize,
    Roll,
    Reroll(usize),
    Shutdown,
}

#[derive(Debug)]
enum WorkerEvent {
    Initialized {
        version: VersionTag,
        roster_len: usize,
    },
    InitFailed(String),
    History(Vec<HistoryCard>),
    Preload(usize),
    Failed(String),
    /// one command fully handled
    Idle,
}

fn history_cards(
    catalog: &impl Catalog,
    version: &VersionTag,
    history: &History,
) -> Vec<HistoryCard> {
    history
        .iter()
        .enumerate()
        .map(|(index, slot)| HistoryCard {
            slot: index + 1,
            name: slot.entry.name.clone(),
            image_url: catalog.image_url(version, &slot.entry),
            image: slot.image,
        })
        .collect()
}

fn apply_worker_event(app: &mut AppSnapshot, event: WorkerEvent) {
    match event {
        WorkerEvent::Initialized {
            version,
            roster_len,
        } => {
            app.status = format!("Loaded {roster_len} champions ({version})");
            app.phase = Phase::Ready {
                version,
                roster_len,
            };
        }
        WorkerEvent::InitFailed(message) => {
            app.status = format!("Initialization failed: {message} (press i to retry)");
            app.push_error(message.clone());
            app.phase = Phase::Failed(message);
        }
        WorkerEvent::History(cards) => app.history = cards,
        WorkerEvent::Preload(buffered) => app.preloaded = buffered,
        WorkerEvent::Failed(message) => app.push_error(message),
        WorkerEvent::Idle => {
            app.pending_commands = app.pending_commands.saturating_sub(1);
            if !app.is_busy()
                && let Some(first) = app.history.first()
                && app.is_ready()
            {
                app.status = format!("Latest pick: {}", first.name);
            }
        }
    }
}

fn apply_peer_event(app: &mut AppSnapshot, event: PeerEvent) {
    match event {
        PeerEvent::Connected { peer, addr } => app.peers.push(PeerView {
            peer,
            addr,
            name: None,
            entries: Vec::new(),
        }),
        PeerEvent::Named { peer, name } => {
            if let Some(view) = app.peers.iter_mut().find(|view| view.peer == peer) {
                view.name = Some(name);
            }
        }
        PeerEvent::History { peer, snapshot } => {
            if let Some(view) = app.peers.iter_mut().find(|view| view.peer == peer) {
                view.entries = snapshot.entries.into_iter().map(|e| e.name).collect();
            }
        }
        PeerEvent::Disconnected { peer } => app.peers.retain(|view| view.peer != peer),
    }
}

fn send_event(
    events: &mpsc::UnboundedSender<WorkerEvent>,
    event: WorkerEvent,
) -> Result<()> {
    events
        .send(event)
        .map_err(|_| eyre!("engine worker receiver dropped"))
}

/// Serves the roster and champion images, and names where each image lives.
trait Catalog: RosterProvider + ImageLoader + Clone {
    fn image_url(&self, version: &VersionTag, entry: &Entry) -> String;
}

impl Catalog for DataDragonClient {
    fn image_url(&self, version: &VersionTag, entry: &Entry) -> String {
        DataDragonClient::image_url(self, version, entry)
    }
}

/// Owns the session so every roll, reroll and refill runs one at a time.
struct EngineWorker<C, R> {
    catalog: C,
    randomness: R,
    config: EngineConfig,
    broadcaster: Option<PeerBroadcaster>,
    session: Option<Session<R, C>>,
    /// images or the preload buffer may still need work
    unsettled: bool,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl<C: Catalog, R: RandomnessSource + Clone> EngineWorker<C, R> {
    fn new(
        catalog: C,
        randomness: R,
        config: EngineConfig,
        broadcaster: Option<PeerBroadcaster>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            catalog,
            randomness,
            config,
            broadcaster,
            session: None,
            unsettled: false,
            events,
        }
    }

    async fn initialize(&mut self) -> Result<()> {
        if let Some(previous) = self.session.take() {
            previous.shutdown();
        }
        let result = Session::initialize(
            &self.catalog,
            self.randomness.clone(),
            self.catalog.clone(),
            self.config,
        )
        .await;
        match result {
            Ok(mut session) => {
                if let Some(broadcaster) = &self.broadcaster {
                    session.engine_mut().subscribe(broadcaster.clone());
                }
                send_event(
                    &self.events,
                    WorkerEvent::Initialized {
                        version: session.version().clone(),
                        roster_len: session.engine().roster().len(),
                    },
                )?;
                self.session = Some(session);
                self.unsettled = true;
                self.publish()
            }
            Err(e) => {
                error!(error = %e, "initialization failed");
                send_event(&self.events, WorkerEvent::InitFailed(e.to_string()))
            }
        }
    }

    async fn pick(&mut self, slot: Option<usize>) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            return send_event(
                &self.events,
                WorkerEvent::Failed(String::from("champions are not loaded yet")),
            );
        };
        let engine = session.engine_mut();
        let result = match slot {
            None => engine.pick_next().await,
            Some(index) => engine.reroll(index).await,
        };
        match result {
            Ok(entry) => info!(id = %entry.id, ?slot, "picked"),
            Err(e) => {
                warn!(error = %e, ?slot, "pick failed");
                send_event(&self.events, WorkerEvent::Failed(format!("Roll failed: {e}")))?;
            }
        }
        self.unsettled = true;
        self.publish()
    }

    fn publish(&self) -> Result<()> {
        let Some(session) = self.session.as_ref() else {
            return Ok(());
        };
        let cards = history_cards(&self.catalog, session.version(), session.engine().history());
        send_event(&self.events, WorkerEvent::History(cards))
    }

    /// Resolves pending images, then tops up the preload buffer.
    ///
    /// Dropping the future part way leaves the engine consistent; the worker
    /// does so whenever a command is waiting.
    async fn settle(&mut self) -> Result<()> {
        let Some(session) = self.session.as_mut() else {
            self.unsettled = false;
            return Ok(());
        };
        let engine = session.engine_mut();
        if engine.resolve_images().await > 0 {
            self.publish()?;
        }
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        let engine = session.engine_mut();
        if let Err(e) = engine.refill_preload_buffer().await {
            warn!(error = %e, "preload refill failed");
            send_event(&self.events, WorkerEvent::Failed(format!("Preload failed: {e}")))?;
        }
        send_event(&self.events, WorkerEvent::Preload(engine.preload_len()))?;
        self.unsettled = false;
        Ok(())
    }

    fn shutdown(&mut self) {
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
    }
}

/// Handles commands in order. Between commands it settles images and the
/// preload buffer, but a waiting command always goes first.
async fn engine_worker<C: Catalog, R: RandomnessSource + Clone>(
    mut worker: EngineWorker<C, R>,
    mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>,
) -> Result<()> {
    loop {
        let cmd = if worker.unsettled {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => cmd,
                settled = worker.settle() => {
                    settled?;
                    continue;
                }
            }
        } else {
            cmd_rx.recv().await
        };
        let Some(cmd) = cmd else {
            break;
        };
        match cmd {
            WorkerCommand::Initialize => worker.initialize().await?,
            WorkerCommand::Roll => worker.pick(None).await?,
            WorkerCommand::Reroll(index) => worker.pick(Some(index)).await?,
            WorkerCommand::Shutdown => break,
        }
        send_event(&worker.events, WorkerEvent::Idle)?;
    }
    worker.shutdown();
    Ok(())
}

/// Asks the worker to stop and waits up to `grace` for it. A worker stuck on an
/// unresponsive call is aborted.
async fn stop_worker(
    cmd_tx: &mpsc::UnboundedSender<WorkerCommand>,
    mut handle: JoinHandle<Result<()>>,
    grace: Duration,
) -> Result<()> {
    let _ = cmd_tx.send(WorkerCommand::Shutdown);
    match timeout(grace, &mut handle).await {
        Ok(Ok(result)) => result.wrap_err("engine worker failed"),
        Ok(Err(err)) => Err(anyhow!(err)).wrap_err("engine worker panicked"),
        Err(_) => {
            warn!(?grace, "engine worker did not stop in time, aborting");
            handle.abort();
            Ok(())
        }
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let http = build_client(config.http_timeout)
        .map_err(|e| eyre!("{e:#}"))
        .wrap_err("building HTTP client failed")?;
    let ddragon = DataDragonClient::new(&config.ddragon_url, &config.locale, http.clone());
    let randomness = match &config.randomness {
        RandomnessChoice::RandomOrg { base_url } => {
            Randomness::RandomOrg(RandomOrgClient::new(base_url, http))
        }
        RandomnessChoice::Local => Randomness::Local(ThreadRngSource),
    };

    let (hub, peer_events) = if config.peers.enabled() {
        let (hub, events) = PeerHub::start(config.peers.clone())
            .await
            .map_err(|e| eyre!("{e:#}"))
            .wrap_err("starting peer sync failed")?;
        (Some(hub), Some(events))
    } else {
        (None, None)
    };

    let snapshot = AppSnapshot::new(
        randomness.to_string(),
        config.engine.preload_target,
        hub.is_some(),
    );
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let worker = EngineWorker::new(
        ddragon,
        randomness,
        config.engine,
        hub.as_ref().map(PeerHub::broadcaster),
        event_tx,
    );

    let mut ui_state = ui::UiState::default();
    let mut input_events = ui::input_event_stream();

    info!("Starting UI");
    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(
        worker,
        event_rx,
        snapshot,
        peer_events,
        &mut ui_state,
        &mut input_events,
    )
    .await;
    let exited = ui::terminal_exit();
    if let Some(hub) = hub {
        hub.shutdown().await;
    }
    res?;
    exited
}

async fn next_peer_event(
    events: &mut Option<mpsc::UnboundedReceiver<PeerEvent>>,
) -> Option<PeerEvent> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}

fn dispatch(
    cmd_tx: &mpsc::UnboundedSender<WorkerCommand>,
    app: &mut AppSnapshot,
    cmd: WorkerCommand,
) {
    if cmd_tx.send(cmd).is_ok() {
        app.pending_commands += 1;
    }
}

async fn run_loop(
    worker: AppWorker,
    mut event_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    mut app: AppSnapshot,
    mut peer_events: Option<mpsc::UnboundedReceiver<PeerEvent>>,
    ui_state: &mut ui::UiState,
    input_events: &mut ui::InputEventReceiver,
) -> Result<()> {
    info!("Running app loop");
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let worker_handle = tokio::spawn(engine_worker(worker, cmd_rx));
    dispatch(&cmd_tx, &mut app, WorkerCommand::Initialize);
    ui::draw(ui_state, &app).wrap_err("initial draw failed")?;

    let mut worker_closed = false;

    loop {
        tokio::select! {
            maybe_event = event_rx.recv() => {
                let Some(event) = maybe_event else {
                    warn!("engine worker channel closed");
                    worker_closed = true;
                    break;
                };
                apply_worker_event(&mut app, event);
                ui::draw(ui_state, &app).wrap_err("draw after engine update failed")?;
            }
            maybe_peer = next_peer_event(&mut peer_events) => {
                match maybe_peer {
                    Some(event) => {
                        apply_peer_event(&mut app, event);
                        ui::draw(ui_state, &app).wrap_err("draw after peer update failed")?;
                    }
                    None => {
                        warn!("peer event channel closed");
                        peer_events = None;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
            raw_ev = ui::next_raw_event(input_events) => {
                let event = raw_ev?;
                let Some(ev) = ui::interpret_event(event) else {
                    continue;
                };
                match ev {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::RetryInit => {
                        if matches!(app.phase, Phase::Failed(_)) && !app.is_busy() {
                            app.phase = Phase::Loading;
                            app.status = String::from("Loading champions...");
                            dispatch(&cmd_tx, &mut app, WorkerCommand::Initialize);
                        }
                    }
                    ui::UserEvent::Roll | ui::UserEvent::Reroll(_) if !app.is_ready() => {
                        app.status = match &app.phase {
                            Phase::Failed(message) => {
                                format!("Initialization failed: {message} (press i to retry)")
                            }
                            _ => String::from("Loading champions..."),
                        };
                    }
                    ui::UserEvent::Roll => {
                        app.status = String::from("Rolling...");
                        dispatch(&cmd_tx, &mut app, WorkerCommand::Roll);
                    }
                    ui::UserEvent::Reroll(index) => {
                        if index < app.history.len() {
                            app.status = format!("Rerolling slot {}...", index + 1);
                            dispatch(&cmd_tx, &mut app, WorkerCommand::Reroll(index));
                        } else {
                            app.push_error(format!("Slot {} is empty", index + 1));
                        }
                    }
                }
                ui::draw(ui_state, &app).wrap_err("draw after input failed")?;
            }
        }
    }

    stop_worker(&cmd_tx, worker_handle, WORKER_STOP_GRACE).await?;
    if worker_closed {
        return Err(anyhow!("Engine worker exited unexpectedly"));
    }
    Ok(())
}
