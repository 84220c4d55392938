//! Best-effort history sharing between running instances.
//!
//! Each connection carries newline-delimited JSON [`PeerMessage`]s. Every local
//! history change is pushed to all open connections with no acknowledgment; a
//! connection that fails is dropped and reported, nothing else is affected.

use anyhow::{
    Context,
    Result,
};
use roller::{
    Entry,
    HistorySnapshot,
    ports::HistoryObserver,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::HashMap,
    net::SocketAddr,
    time::Duration,
};
use tokio::{
    io::{
        AsyncBufReadExt,
        AsyncWriteExt,
        BufReader,
    },
    net::{
        TcpListener,
        TcpStream,
        tcp::{
            OwnedReadHalf,
            OwnedWriteHalf,
        },
    },
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{
    debug,
    info,
    warn,
};

pub type PeerId = u64;

const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(50);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Default)]
pub struct PeerConfig {
    pub listen: Option<SocketAddr>,
    pub connect: Vec<SocketAddr>,
    pub name: String,
}

impl PeerConfig {
    pub fn enabled(&self) -> bool {
        self.listen.is_some() || !self.connect.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PeerMessage {
    Hello { name: String },
    History { entries: Vec<Entry> },
}

impl PeerMessage {
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode peer message")
    }

    pub fn decode(line: &str) -> Result<Self> {
        serde_json::from_str(line).context("invalid peer message")
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    Connected {
        peer: PeerId,
        addr: SocketAddr,
    },
    Named {
        peer: PeerId,
        name: String,
    },
    History {
        peer: PeerId,
        snapshot: HistorySnapshot,
    },
    Disconnected {
        peer: PeerId,
    },
}

enum HubCommand {
    Broadcast(HistorySnapshot),
    Closed(PeerId),
    Shutdown,
}

pub struct PeerHub {
    commands: mpsc::UnboundedSender<HubCommand>,
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl PeerHub {
    /// Binds the listener (if configured), dials the configured peers and
    /// starts the hub task. Peers that cannot be reached are logged and skipped.
    pub async fn start(
        config: PeerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>)> {
        let listener = match config.listen {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .with_context(|| format!("failed to bind peer listener on {addr}"))?,
            ),
            None => None,
        };
        let local_addr = listener
            .as_ref()
            .map(TcpListener::local_addr)
            .transpose()
            .context("failed to read peer listener address")?;
        if let Some(addr) = local_addr {
            info!("peer sync listening on {addr}");
        }

        let mut dialed = Vec::new();
        for addr in &config.connect {
            match TcpStream::connect(addr).await {
                Ok(stream) => dialed.push((stream, *addr)),
                Err(e) => warn!(%addr, error = %e, "failed to connect to peer"),
            }
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let hub = HubState {
            name: config.name,
            next_id: 0,
            peers: HashMap::new(),
            latest: None,
            commands: command_tx.clone(),
            events: event_tx,
        };
        let task = tokio::spawn(hub.run(listener, dialed, command_rx));

        Ok((
            Self {
                commands: command_tx,
                local_addr,
                task,
            },
            event_rx,
        ))
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn broadcast(&self, snapshot: HistorySnapshot) {
        let _ = self.commands.send(HubCommand::Broadcast(snapshot));
    }

    /// History observer that forwards every change to this hub.
    pub fn broadcaster(&self) -> PeerBroadcaster {
        PeerBroadcaster {
            commands: self.commands.clone(),
        }
    }

    pub async fn shutdown(self) {
        let _ = self.commands.send(HubCommand::Shutdown);
        if let Err(e) = self.task.await {
            warn!(error = %e, "peer hub task ended abnormally");
        }
    }
}

#[derive(Clone)]
pub struct PeerBroadcaster {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HistoryObserver for PeerBroadcaster {
    fn history_changed(&self, snapshot: &HistorySnapshot) {
        if self
            .commands
            .send(HubCommand::Broadcast(snapshot.clone()))
            .is_err()
        {
            debug!("peer hub stopped; history update dropped");
        }
    }
}

struct PeerLink {
    outbox: mpsc::UnboundedSender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PeerLink {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

struct HubState {
    name: String,
    next_id: PeerId,
    peers: HashMap<PeerId, PeerLink>,
    /// last history line sent, replayed to peers that join later
    latest: Option<String>,
    commands: mpsc::UnboundedSender<HubCommand>,
    events: mpsc::UnboundedSender<PeerEvent>,
}

impl HubState {
    async fn run(
        mut self,
        listener: Option<TcpListener>,
        dialed: Vec<(TcpStream, SocketAddr)>,
        mut commands: mpsc::UnboundedReceiver<HubCommand>,
    ) {
        for (stream, addr) in dialed {
            self.attach(stream, addr);
        }
        let mut accept_failures: u32 = 0;
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(HubCommand::Broadcast(snapshot)) => self.broadcast(snapshot),
                    Some(HubCommand::Closed(peer)) => self.detach(peer),
                    Some(HubCommand::Shutdown) | None => break,
                },
                accepted = accept(listener.as_ref()) => match accepted {
                    Ok((stream, addr)) => {
                        accept_failures = 0;
                        self.attach(stream, addr);
                    }
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        let delay = accept_backoff(accept_failures);
                        warn!(error = %e, ?delay, "failed to accept peer");
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
        for (peer, link) in self.peers.drain() {
            link.abort();
            debug!(peer, "closed peer link");
        }
        info!("peer sync stopped");
    }

    fn attach(&mut self, stream: TcpStream, addr: SocketAddr) {
        let peer = self.next_id;
        self.next_id += 1;
        info!(peer, %addr, "peer connected");
        let _ = self.events.send(PeerEvent::Connected { peer, addr });

        let (read, write) = stream.into_split();
        let (outbox, inbox) = mpsc::unbounded_channel();
        let hello = PeerMessage::Hello {
            name: self.name.clone(),
        };
        match hello.encode() {
            Ok(line) => {
                let _ = outbox.send(line);
            }
            Err(e) => warn!(peer, error = %e, "failed to encode hello"),
        }
        if let Some(line) = &self.latest {
            let _ = outbox.send(line.clone());
        }
        let reader = tokio::spawn(read_peer(
            peer,
            read,
            self.events.clone(),
            self.commands.clone(),
        ));
        let writer = tokio::spawn(write_peer(peer, write, inbox, self.commands.clone()));
        self.peers.insert(
            peer,
            PeerLink {
                outbox,
                reader,
                writer,
            },
        );
    }

    fn broadcast(&mut self, snapshot: HistorySnapshot) {
        let message = PeerMessage::History {
            entries: snapshot.entries,
        };
        let line = match message.encode() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode history");
                return;
            }
        };
        let gone: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, link)| link.outbox.send(line.clone()).is_err())
            .map(|(peer, _)| *peer)
            .collect();
        for peer in gone {
            self.detach(peer);
        }
        debug!(peers = self.peers.len(), "broadcast history");
        self.latest = Some(line);
    }

    fn detach(&mut self, peer: PeerId) {
        if let Some(link) = self.peers.remove(&peer) {
            link.abort();
            info!(peer, "peer disconnected");
            let _ = self.events.send(PeerEvent::Disconnected { peer });
        }
    }
}

/// Pause after the `failures`-th accept error in a row, doubling up to a second.
fn accept_backoff(failures: u32) -> Duration {
    let doublings = failures.saturating_sub(1).min(5);
    (ACCEPT_BACKOFF_BASE * 2u32.pow(doublings)).min(ACCEPT_BACKOFF_MAX)
}

async fn accept(listener: Option<&TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn read_peer(
    peer: PeerId,
    read: OwnedReadHalf,
    events: mpsc::UnboundedSender<PeerEvent>,
    commands: mpsc::UnboundedSender<HubCommand>,
) {
    let mut lines = BufReader::new(read).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match PeerMessage::decode(&line) {
                Ok(PeerMessage::Hello { name }) => {
                    let _ = events.send(PeerEvent::Named { peer, name });
                }
                Ok(PeerMessage::History { entries }) => {
                    let snapshot = HistorySnapshot { entries };
                    let _ = events.send(PeerEvent::History { peer, snapshot });
                }
                Err(e) => warn!(peer, error = %e, "ignoring malformed peer message"),
            },
            Ok(None) => {
                debug!(peer, "peer closed connection");
                break;
            }
            Err(e) => {
                warn!(peer, error = %e, "peer read failed");
                break;
            }
        }
    }
    let _ = commands.send(HubCommand::Closed(peer));
}

async fn write_peer(
    peer: PeerId,
    mut write: OwnedWriteHalf,
    mut inbox: mpsc::UnboundedReceiver<String>,
    commands: mpsc::UnboundedSender<HubCommand>,
) {
    while let Some(line) = inbox.recv().await {
        let mut framed = line.into_bytes();
        framed.push(b'\n');
        if let Err(e) = write.write_all(&framed).await {
            warn!(peer, error = %e, "peer write failed");
            let _ = commands.send(HubCommand::Closed(peer));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use tokio::time::timeout;

    fn snapshot(ids: &[&str]) -> HistorySnapshot {
        HistorySnapshot {
            entries: ids
                .iter()
                .map(|id| Entry::new(*id, *id, format!("{id}.png")))
                .collect(),
        }
    }

    fn listening(name: &str) -> PeerConfig {
        PeerConfig {
            listen: Some("127.0.0.1:0".parse().unwrap()),
            connect: Vec::new(),
            name: name.to_string(),
        }
    }

    fn dialing(name: &str, addr: SocketAddr) -> PeerConfig {
        PeerConfig {
            listen: None,
            connect: vec![addr],
            name: name.to_string(),
        }
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<PeerEvent>) -> PeerEvent {
        timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for peer event")
            .expect("peer hub closed")
    }

    #[test]
    fn peer_message__uses_tagged_json_lines() {
        // given
        let message = PeerMessage::History {
            entries: snapshot(&["Ahri"]).entries,
        };

        // when
        let line = message.encode().unwrap();

        // then
        assert_eq!(
            line,
            r#"{"type":"history","entries":[{"id":"Ahri","name":"Ahri","image":"Ahri.png"}]}"#
        );
        assert_eq!(PeerMessage::decode(&line).unwrap(), message);
    }

    #[test]
    fn peer_message__rejects_unknown_type() {
        assert!(PeerMessage::decode(r#"{"type":"offer","sdp":"x"}"#).is_err());
    }

    #[tokio::test]
    async fn start__new_peer_receives_latest_history() {
        // given
        let (host, _host_events) = PeerHub::start(listening("host")).await.unwrap();
        host.broadcast(snapshot(&["Ahri", "Zed"]));

        // when
        let (guest, mut guest_events) =
            PeerHub::start(dialing("guest", host.local_addr().unwrap()))
                .await
                .unwrap();

        // then
        assert!(matches!(
            next_event(&mut guest_events).await,
            PeerEvent::Connected { peer: 0, .. }
        ));
        assert_eq!(
            next_event(&mut guest_events).await,
            PeerEvent::Named {
                peer: 0,
                name: "host".to_string()
            }
        );
        assert_eq!(
            next_event(&mut guest_events).await,
            PeerEvent::History {
                peer: 0,
                snapshot: snapshot(&["Ahri", "Zed"])
            }
        );

        guest.shutdown().await;
        host.shutdown().await;
    }

    #[tokio::test]
    async fn broadcaster__pushes_changes_and_reports_disconnects() {
        // given
        let (host, mut host_events) = PeerHub::start(listening("host")).await.unwrap();
        let (guest, mut guest_events) =
            PeerHub::start(dialing("guest", host.local_addr().unwrap()))
                .await
                .unwrap();
        assert!(matches!(
            next_event(&mut host_events).await,
            PeerEvent::Connected { peer: 0, .. }
        ));
        assert_eq!(
            next_event(&mut host_events).await,
            PeerEvent::Named {
                peer: 0,
                name: "guest".to_string()
            }
        );
        assert!(matches!(
            next_event(&mut guest_events).await,
            PeerEvent::Connected { .. }
        ));
        assert!(matches!(
            next_event(&mut guest_events).await,
            PeerEvent::Named { .. }
        ));

        // when
        host.broadcaster().history_changed(&snapshot(&["Lux"]));

        // then
        assert_eq!(
            next_event(&mut guest_events).await,
            PeerEvent::History {
                peer: 0,
                snapshot: snapshot(&["Lux"])
            }
        );

        // when
        guest.shutdown().await;

        // then
        assert_eq!(
            next_event(&mut host_events).await,
            PeerEvent::Disconnected { peer: 0 }
        );
        host.shutdown().await;
    }

    #[tokio::test]
    async fn start__skips_unreachable_peers() {
        // given
        let (vacated, _events) = PeerHub::start(listening("vacated")).await.unwrap();
        let addr = vacated.local_addr().unwrap();
        vacated.shutdown().await;

        // when
        let result = PeerHub::start(dialing("guest", addr)).await;

        // then
        let (hub, _events) = result.unwrap();
        hub.shutdown().await;
    }

    #[test]
    fn accept_backoff__doubles_then_caps() {
        assert_eq!(accept_backoff(1), Duration::from_millis(50));
        assert_eq!(accept_backoff(2), Duration::from_millis(100));
        assert_eq!(accept_backoff(4), Duration::from_millis(400));
        assert_eq!(accept_backoff(6), Duration::from_secs(1));
        assert_eq!(accept_backoff(u32::MAX), Duration::from_secs(1));
    }
}
