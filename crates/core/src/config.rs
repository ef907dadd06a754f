//! Process configuration and hook records.
//!
//! A plain struct with `Default` fallbacks, constructed by the `cli`
//! crate from flags and handed to [`crate::server::Relay`] untouched.

use std::sync::Arc;

use crate::mount::MountEmptyHook;
use crate::protocol::request::RtspRequest;

/// `authentication(user, pass) -> allow`. Absent ⇒ allow everything.
pub type AuthHook = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// `checkMount(req) -> allow` for the publisher side.
pub type PublisherCheckMountHook = Arc<dyn Fn(&RtspRequest) -> bool + Send + Sync>;

/// Result of the subscriber-side `checkMount` hook: either a plain
/// allow/deny, or an explicit status code to reply with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckMountOutcome {
    Allow,
    Forbidden,
    Status(u16),
}

/// `checkMount(req) -> allow | statusCode` for the subscriber side.
pub type SubscriberCheckMountHook = Arc<dyn Fn(&RtspRequest) -> CheckMountOutcome + Send + Sync>;

/// Hooks available to the Publish Server. Every field is
/// optional; an absent callable takes the documented default (allow/noop).
#[derive(Clone, Default)]
pub struct PublisherHooks {
    pub authentication: Option<AuthHook>,
    pub check_mount: Option<PublisherCheckMountHook>,
    pub mount_now_empty: Option<MountEmptyHook>,
}

/// Hooks available to the Client Server.
#[derive(Clone, Default)]
pub struct SubscriberHooks {
    pub authentication: Option<AuthHook>,
    pub check_mount: Option<SubscriberCheckMountHook>,
    pub client_close: Option<MountEmptyHook>,
}

/// Top-level relay configuration.
#[derive(Clone)]
pub struct RelayConfig {
    /// Address the Publish Server's RTSP listener binds to.
    pub publisher_bind_addr: String,
    /// Address the Client Server's RTSP listener binds to (may coincide
    /// with `publisher_bind_addr`).
    pub subscriber_bind_addr: String,
    /// First even port of the shared RTP/RTCP pool.
    pub rtp_port_pool_start: u16,
    /// Number of RTP/RTCP pairs in the pool.
    pub rtp_port_pool_count: u16,
    /// Subscriber keepalive interval, in seconds.
    pub keepalive_secs: u64,
    /// Stalled-mount sweep interval, in seconds.
    pub sweep_interval_secs: u64,
    pub publisher_hooks: PublisherHooks,
    pub subscriber_hooks: SubscriberHooks,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            publisher_bind_addr: "0.0.0.0:8554".to_string(),
            subscriber_bind_addr: "0.0.0.0:8554".to_string(),
            rtp_port_pool_start: 20000,
            rtp_port_pool_count: 4096,
            keepalive_secs: crate::session::DEFAULT_KEEPALIVE_SECS,
            sweep_interval_secs: 1,
            publisher_hooks: PublisherHooks::default(),
            subscriber_hooks: SubscriberHooks::default(),
        }
    }
}
