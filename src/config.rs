//! Configuration for Watchtower
//!
//! CLI arguments and environment variable handling using clap. Every
//! option can be given as a flag or through the environment (a `.env`
//! file is loaded first).

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::db::CacheConfig;
use crate::events::BroadcasterConfig;
use crate::reconcile::{HttpReaderConfig, ReconcileConfig};
use crate::space::{StaticIdentity, POLICIES};
use crate::sync::PushConfig;

/// Log output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Watchtower - watches replicated spaces, caches what arrives and streams
/// what is new
#[derive(Parser, Debug, Clone)]
#[command(name = "watchtower")]
#[command(about = "Replica watcher: local document cache and live change events")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8088")]
    pub listen: SocketAddr,

    /// Path of the sled cache database
    #[arg(long, env = "CACHE_PATH", default_value = "./data/watchtower.sled")]
    pub cache_path: PathBuf,

    /// Background flush interval in milliseconds (0 disables it)
    #[arg(long, env = "CACHE_FLUSH_INTERVAL_MS", default_value = "1000")]
    pub cache_flush_interval_ms: u64,

    /// Seconds between reconciliation passes
    #[arg(long, env = "RECONCILE_INTERVAL_SECS", default_value = "5")]
    pub reconcile_interval_secs: u64,

    /// Skip passes while no client is subscribed
    #[arg(
        long,
        env = "RECONCILE_REQUIRE_SUBSCRIBERS",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub reconcile_require_subscribers: bool,

    /// Per-subscriber event buffer
    #[arg(long, env = "EVENT_BUFFER_SIZE", default_value = "64")]
    pub event_buffer_size: usize,

    /// Wait this long for a full subscriber buffer before dropping (0 = never wait)
    #[arg(long, env = "EVENT_DELIVERY_TIMEOUT_MS", default_value = "0")]
    pub event_delivery_timeout_ms: u64,

    /// Keepalive comment interval on idle event streams
    #[arg(long, env = "SSE_KEEPALIVE_SECS", default_value = "15")]
    pub sse_keepalive_secs: u64,

    /// How long shutdown waits for each reconciler
    #[arg(long, env = "SHUTDOWN_TIMEOUT_MS", default_value = "3000")]
    pub shutdown_timeout_ms: u64,

    /// Deadline for replication reads and cache calls
    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value = "10000")]
    pub upstream_timeout_ms: u64,

    /// Replication sidecar HTTP API
    #[arg(long, env = "REPLICA_URL", default_value = "http://localhost:8090")]
    pub replica_url: String,

    /// Replication sidecar event WebSocket (push triggers disabled when unset)
    #[arg(long, env = "REPLICA_EVENTS_URL")]
    pub replica_events_url: Option<String>,

    /// Delay between push reconnect attempts
    #[arg(long, env = "PUSH_RECONNECT_DELAY_MS", default_value = "5000")]
    pub push_reconnect_delay_ms: u64,

    /// The caller's own AID
    #[arg(long, env = "OWN_AID")]
    pub own_aid: Option<String>,

    /// The caller's private space
    #[arg(long, env = "PRIVATE_SPACE_ID")]
    pub private_space_id: Option<String>,

    /// Shared community space
    #[arg(long, env = "COMMUNITY_SPACE_ID")]
    pub community_space_id: Option<String>,

    /// Community space written by admins only
    #[arg(long, env = "COMMUNITY_READONLY_SPACE_ID")]
    pub community_readonly_space_id: Option<String>,

    /// Admin space
    #[arg(long, env = "ADMIN_SPACE_ID")]
    pub admin_space_id: Option<String>,

    /// Organizations the caller belongs to (comma separated)
    #[arg(long, env = "ORG_IDS", value_delimiter = ',')]
    pub org_ids: Vec<String>,

    /// Object types to watch (comma separated, default: every known type)
    #[arg(long, env = "OBJECT_TYPES", value_delimiter = ',')]
    pub object_types: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.reconcile_interval_secs == 0 {
            return Err("RECONCILE_INTERVAL_SECS must be greater than zero".to_string());
        }

        if self.cache_path.as_os_str().is_empty() {
            return Err("CACHE_PATH must not be empty".to_string());
        }

        if self.event_buffer_size == 0 {
            return Err("EVENT_BUFFER_SIZE must be greater than zero".to_string());
        }

        if self.sse_keepalive_secs == 0 {
            return Err("SSE_KEEPALIVE_SECS must be greater than zero".to_string());
        }

        if self.private_space_id.is_some() && self.own_aid.is_none() {
            return Err("PRIVATE_SPACE_ID requires OWN_AID".to_string());
        }

        Ok(())
    }

    /// Object types to watch, falling back to every known type
    pub fn watched_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self
            .object_types
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if types.is_empty() {
            types = POLICIES.iter().map(|p| p.object_type.to_string()).collect();
        }
        let mut seen = HashSet::new();
        types.retain(|t| seen.insert(t.clone()));
        types
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            path: self.cache_path.clone(),
            flush_every_ms: (self.cache_flush_interval_ms > 0).then_some(self.cache_flush_interval_ms),
            io_timeout: Duration::from_millis(self.upstream_timeout_ms),
            ..Default::default()
        }
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            interval: Duration::from_secs(self.reconcile_interval_secs),
            require_subscribers: self.reconcile_require_subscribers,
            upstream_timeout: Duration::from_millis(self.upstream_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
        }
    }

    pub fn broadcaster_config(&self) -> BroadcasterConfig {
        BroadcasterConfig {
            buffer_size: self.event_buffer_size,
            delivery_timeout: (self.event_delivery_timeout_ms > 0)
                .then(|| Duration::from_millis(self.event_delivery_timeout_ms)),
        }
    }

    pub fn reader_config(&self) -> HttpReaderConfig {
        HttpReaderConfig {
            base_url: self.replica_url.clone(),
            request_timeout: Duration::from_millis(self.upstream_timeout_ms),
        }
    }

    /// Push subscriber config, if an events URL is configured
    pub fn push_config(&self) -> Option<PushConfig> {
        let url = self.replica_events_url.clone().filter(|u| !u.is_empty())?;
        Some(PushConfig {
            url,
            reconnect_delay: Duration::from_millis(self.push_reconnect_delay_ms),
            ..Default::default()
        })
    }

    pub fn identity(&self) -> StaticIdentity {
        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        StaticIdentity {
            own_aid: non_empty(&self.own_aid),
            private_space: non_empty(&self.private_space_id),
            community_space: non_empty(&self.community_space_id),
            community_readonly_space: non_empty(&self.community_readonly_space_id),
            admin_space: non_empty(&self.admin_space_id),
            org_ids: self
                .org_ids
                .iter()
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    pub fn sse_keepalive(&self) -> Duration {
        Duration::from_secs(self.sse_keepalive_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        let mut argv = vec!["watchtower"];
        argv.extend_from_slice(args);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());

        let reconcile = args.reconcile_config();
        assert_eq!(reconcile.interval, Duration::from_secs(5));
        assert!(reconcile.require_subscribers);
        assert_eq!(reconcile.shutdown_timeout, Duration::from_millis(3000));

        assert_eq!(args.broadcaster_config().buffer_size, 64);
        assert!(args.broadcaster_config().delivery_timeout.is_none());
        assert!(args.push_config().is_none());
        assert_eq!(args.watched_types().len(), POLICIES.len());
    }

    #[test]
    fn test_validation() {
        assert!(parse(&["--reconcile-interval-secs", "0"]).validate().is_err());
        assert!(parse(&["--private-space-id", "sp-me"]).validate().is_err());
        assert!(parse(&["--private-space-id", "sp-me", "--own-aid", "alice"])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_lists_and_identity() {
        let args = parse(&[
            "--own-aid",
            "alice",
            "--community-space-id",
            "sp-community",
            "--org-ids",
            "org-1, org-2",
            "--object-types",
            "ChatMessage,ChatChannel",
            "--reconcile-require-subscribers",
            "false",
        ]);

        let identity = args.identity();
        assert_eq!(identity.org_ids, vec!["org-1", "org-2"]);
        assert_eq!(identity.community_space.as_deref(), Some("sp-community"));
        assert!(identity.private_space.is_none());

        assert_eq!(args.watched_types(), vec!["ChatMessage", "ChatChannel"]);
        assert!(!args.reconcile_config().require_subscribers);
    }

    #[test]
    fn test_flush_interval_zero_disables_flusher() {
        let args = parse(&["--cache-flush-interval-ms", "0"]);
        assert!(args.cache_config().flush_every_ms.is_none());
    }
}
