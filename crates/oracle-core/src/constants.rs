//! ─── Oracle network constants ───────────────────────────────────────────────
//!
//! Timing parameters for the coordinator's background tasks and the signer's
//! subscription supervisor. All durations are expressed in seconds unless
//! noted otherwise.

use std::time::Duration;

// ── Pending table ────────────────────────────────────────────────────────────

/// Default age at which an unresolved `pending` entry is swept away.
pub const DEFAULT_PENDING_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Interval of the request broadcaster / retry ticker.
pub const BROADCAST_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Interval of the expiry sweeper ticker.
pub const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ── Subscription supervisor ──────────────────────────────────────────────────

/// Per-read deadline for a subscription poll.
pub const SUBSCRIPTION_READ_DEADLINE: Duration = Duration::from_secs(60);

/// Initial backoff before the first re-subscribe attempt.
pub const RESUBSCRIBE_BACKOFF_INITIAL: Duration = Duration::from_secs(5);

/// Upper bound on any single backoff step.
pub const RESUBSCRIBE_BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Maximum consecutive re-subscribe attempts before giving up for this cycle.
pub const RESUBSCRIBE_MAX_ATTEMPTS: u32 = 10;

// ── Peer supervisor ───────────────────────────────────────────────────────────

/// Interval of the peer-liveness ticker.
pub const PEER_SUPERVISOR_INTERVAL: Duration = Duration::from_secs(60);

/// Per-peer dial deadline when attempting reconnection.
pub const PEER_DIAL_DEADLINE: Duration = Duration::from_secs(5);

/// Interval of the `knownPeers` eviction ticker.
pub const PEER_EVICTION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Age at which a `knownPeers` entry is evicted.
pub const PEER_EVICTION_WINDOW: Duration = Duration::from_secs(5 * 60);

// ── Health monitor ────────────────────────────────────────────────────────────

/// Interval of the health-monitor ticker.
pub const HEALTH_MONITOR_INTERVAL: Duration = Duration::from_secs(30);

/// Gap in `lastMessageTime` considered unhealthy (combined with zero peers).
pub const HEALTH_MESSAGE_GAP_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Consecutive unhealthy ticks before a subscription reset is forced.
pub const HEALTH_RESET_THRESHOLD: u32 = 3;

// ── Transport ─────────────────────────────────────────────────────────────────

/// Default timeout for a single publish attempt.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of publish retries after the first attempt fails.
pub const PUBLISH_RETRIES: u32 = 3;

/// Delay between publish retry attempts.
pub const PUBLISH_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default libp2p TCP listen port for the coordinator.
pub const DEFAULT_P2P_PORT: u16 = 4001;

/// Default HTTP port reserved for the (out-of-scope) read-only API.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

// ── Store query defaults ──────────────────────────────────────────────────────

/// Default page size when `limit` is outside `[1, MAX_PAGE_LIMIT]`.
pub const DEFAULT_PAGE_LIMIT: usize = 10;

/// Maximum accepted page size.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Width of the zero-padded decimal timestamp segment in time-index keys.
/// Wide enough to hold any `i64` Unix timestamp without overflow.
pub const TIMESTAMP_KEY_WIDTH: usize = 20;
