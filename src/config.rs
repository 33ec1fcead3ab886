//! Engine configuration.
//!
//! Every option can be given on the command line or through the environment
//! (a `.env` file is loaded at startup). Defaults target the MTA subway feeds.

use clap::Args;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::fetch::auth::DEFAULT_API_KEY_HEADER;

const MTA_FEED_BASE: &str = "https://api-endpoint.mta.info/Dataservice/mtagtfsfeeds/";

/// Feeds consumed when none are configured: every subway trip-update feed
/// plus the subway alerts feed.
pub const DEFAULT_FEEDS: &[(&str, &str)] = &[
    ("ACE", "nyct%2Fgtfs-ace"),
    ("BDFM", "nyct%2Fgtfs-bdfm"),
    ("G", "nyct%2Fgtfs-g"),
    ("JZ", "nyct%2Fgtfs-jz"),
    ("NQRW", "nyct%2Fgtfs-nqrw"),
    ("1234567", "nyct%2Fgtfs"),
    ("L", "nyct%2Fgtfs-l"),
    ("SIR", "nyct%2Fgtfs-si"),
    ("alerts", "camsys%2Fsubway-alerts"),
];

/// A named feed URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEndpoint {
    pub name: String,
    pub url: String,
}

impl FeedEndpoint {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// Parses `name=url`, or a bare url which is then also used as the name.
impl FromStr for FeedEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("feed endpoint must not be empty".to_string());
        }

        match s.split_once('=') {
            Some((name, url)) if !name.contains("://") => {
                if name.trim().is_empty() || url.trim().is_empty() {
                    return Err(format!("expected name=url, got {s:?}"));
                }
                Ok(FeedEndpoint::new(name.trim(), url.trim()))
            }
            _ => Ok(FeedEndpoint::new(s, s)),
        }
    }
}

pub fn default_endpoints() -> Vec<FeedEndpoint> {
    DEFAULT_FEEDS
        .iter()
        .map(|(name, path)| FeedEndpoint::new(*name, format!("{MTA_FEED_BASE}{path}")))
        .collect()
}

/// Options for the Route Geometry Engine.
#[derive(Args, Debug, Clone, PartialEq)]
pub struct GeometryConfig {
    /// Lateral distance between neighbouring routes in a shared corridor
    #[arg(long, env = "OFFSET_BASE_METERS", default_value_t = 12.0)]
    pub offset_base_meters: f64,

    /// Points closer than this are treated as the same physical track
    #[arg(long, env = "CORRIDOR_EPSILON_METERS", default_value_t = 5.0)]
    pub corridor_epsilon_meters: f64,

    /// Path distance over which the offset returns to zero where routes diverge
    #[arg(long, env = "TRANSITION_METERS", default_value_t = 150.0)]
    pub transition_meters: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            offset_base_meters: 12.0,
            corridor_epsilon_meters: 5.0,
            transition_meters: 150.0,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct EngineConfig {
    /// Feed to poll, as `name=url`. Repeat for several feeds
    #[arg(long = "feed-url", env = "FEED_URLS", value_delimiter = ',')]
    pub feed_urls: Vec<FeedEndpoint>,

    /// API key sent with every feed request
    #[arg(long, env = "MTA_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Header carrying the API key
    #[arg(long, env = "API_KEY_HEADER", default_value = DEFAULT_API_KEY_HEADER)]
    pub api_key_header: String,

    /// Seconds between refresh cycles
    #[arg(long, env = "REFRESH_INTERVAL_SECS", default_value_t = 30)]
    pub refresh_interval_secs: u64,

    /// Per-request timeout in seconds
    #[arg(long, env = "FETCH_TIMEOUT_SECS", default_value_t = 10)]
    pub fetch_timeout_secs: u64,

    /// Overall deadline for one refresh cycle in seconds
    #[arg(long, env = "CYCLE_DEADLINE_SECS", default_value_t = 20)]
    pub cycle_deadline_secs: u64,

    /// Age after which cached data is reported stale (default: 2x the refresh interval)
    #[arg(long, env = "STALENESS_THRESHOLD_SECS")]
    pub staleness_threshold_secs: Option<u64>,

    /// Extra attempts per endpoint within one cycle
    #[arg(long, env = "FETCH_RETRIES", default_value_t = 1)]
    pub fetch_retries: u32,

    /// Maximum arrivals returned per station
    #[arg(long, env = "ARRIVALS_LIMIT", default_value_t = 10)]
    pub arrivals_limit: usize,

    /// Directory holding the static GTFS dataset
    #[arg(long, env = "STATIC_GTFS_DIR", default_value = "data/gtfs")]
    pub static_gtfs_dir: PathBuf,

    #[command(flatten)]
    pub geometry: GeometryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed_urls: Vec::new(),
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            refresh_interval_secs: 30,
            fetch_timeout_secs: 10,
            cycle_deadline_secs: 20,
            staleness_threshold_secs: None,
            fetch_retries: 1,
            arrivals_limit: 10,
            static_gtfs_dir: PathBuf::from("data/gtfs"),
            geometry: GeometryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Configured endpoints, or the MTA defaults when none were given.
    pub fn endpoints(&self) -> Vec<FeedEndpoint> {
        if self.feed_urls.is_empty() {
            default_endpoints()
        } else {
            self.feed_urls.clone()
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn cycle_deadline(&self) -> Duration {
        Duration::from_secs(self.cycle_deadline_secs.max(1))
    }

    pub fn staleness_threshold(&self) -> Duration {
        self.staleness_threshold_secs
            .map(Duration::from_secs)
            .unwrap_or(self.refresh_interval() * 2)
    }
}
