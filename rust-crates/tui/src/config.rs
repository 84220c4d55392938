use crate::{
    ddragon_client::{
        DEFAULT_DDRAGON_URL,
        DEFAULT_LOCALE,
    },
    peers::PeerConfig,
    randomness::DEFAULT_RANDOM_ORG_URL,
};
use clap::Parser;
use roller::{
    EngineConfig,
    engine::{
        DEFAULT_MAX_DRAW_ATTEMPTS,
        DEFAULT_PRELOAD_TARGET,
    },
};
use std::{
    net::SocketAddr,
    path::PathBuf,
    time::Duration,
};

#[derive(Parser, Debug)]
#[command(
    name = "champ-roll",
    version,
    about = "Roll random champions from the latest Data Dragon roster",
    long_about = None
)]
pub struct Args {
    /// Data Dragon base URL
    #[arg(long, default_value = DEFAULT_DDRAGON_URL)]
    pub ddragon_url: String,

    /// Locale used for champion names
    #[arg(long, default_value = DEFAULT_LOCALE)]
    pub locale: String,

    /// random.org base URL
    #[arg(long, default_value = DEFAULT_RANDOM_ORG_URL)]
    pub random_org_url: String,

    /// Draw from the local RNG instead of random.org
    #[arg(long)]
    pub local_rng: bool,

    /// Picks to keep preloaded (0 disables preloading)
    #[arg(long, default_value_t = DEFAULT_PRELOAD_TARGET)]
    pub preload: usize,

    /// Draws allowed per pick before giving up
    #[arg(long, default_value_t = DEFAULT_MAX_DRAW_ATTEMPTS)]
    pub max_draws: usize,

    /// Timeout for upstream HTTP calls; none by default
    #[arg(long)]
    pub http_timeout_secs: Option<u64>,

    /// Accept peers on this address
    #[arg(long)]
    pub peer_listen: Option<SocketAddr>,

    /// Connect to a peer (repeatable)
    #[arg(long = "peer")]
    pub peers: Vec<SocketAddr>,

    /// Name announced to peers
    #[arg(long, default_value = "champ-roll")]
    pub name: String,

    /// Directory for the rolling log file
    #[arg(long, default_value = "logs")]
    pub log_dir: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RandomnessChoice {
    RandomOrg { base_url: String },
    Local,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub ddragon_url: String,
    pub locale: String,
    pub randomness: RandomnessChoice,
    pub engine: EngineConfig,
    pub http_timeout: Option<Duration>,
    pub peers: PeerConfig,
    pub log_dir: PathBuf,
}

impl From<Args> for AppConfig {
    fn from(args: Args) -> Self {
        let randomness = if args.local_rng {
            RandomnessChoice::Local
        } else {
            RandomnessChoice::RandomOrg {
                base_url: args.random_org_url,
            }
        };
        Self {
            ddragon_url: args.ddragon_url,
            locale: args.locale,
            randomness,
            engine: EngineConfig {
                preload_target: args.preload,
                max_draw_attempts: args.max_draws,
            },
            http_timeout: args.http_timeout_secs.map(Duration::from_secs),
            peers: PeerConfig {
                listen: args.peer_listen,
                connect: args.peers,
                name: args.name,
            },
            log_dir: args.log_dir,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn from_args__defaults_to_public_upstreams() {
        // given
        let args = Args::try_parse_from(["champ-roll"]).unwrap();

        // when
        let config = AppConfig::from(args);

        // then
        assert_eq!(config.ddragon_url, DEFAULT_DDRAGON_URL);
        assert_eq!(config.locale, DEFAULT_LOCALE);
        assert_eq!(
            config.randomness,
            RandomnessChoice::RandomOrg {
                base_url: DEFAULT_RANDOM_ORG_URL.to_string()
            }
        );
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.http_timeout.is_none());
        assert!(!config.peers.enabled());
    }

    #[test]
    fn from_args__collects_overrides() {
        // given
        let args = Args::try_parse_from([
            "champ-roll",
            "--local-rng",
            "--preload",
            "0",
            "--max-draws",
            "5",
            "--http-timeout-secs",
            "10",
            "--peer-listen",
            "127.0.0.1:7400",
            "--peer",
            "127.0.0.1:7401",
            "--peer",
            "127.0.0.1:7402",
        ])
        .unwrap();

        // when
        let config = AppConfig::from(args);

        // then
        assert_eq!(config.randomness, RandomnessChoice::Local);
        assert_eq!(config.engine.preload_target, 0);
        assert_eq!(config.engine.max_draw_attempts, 5);
        assert_eq!(config.http_timeout, Some(Duration::from_secs(10)));
        assert!(config.peers.enabled());
        assert_eq!(config.peers.connect.len(), 2);
    }

    #[test]
    fn args__reject_bad_peer_address() {
        let result = Args::try_parse_from(["champ-roll", "--peer", "not-an-address"]);

        assert!(result.is_err());
    }
}
