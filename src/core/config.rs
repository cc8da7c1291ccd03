//! Centralized configuration constants for peerdrop.
//!
//! All tunable defaults live here so they can be reviewed in one place.
//! Runtime overrides come from `workers::settings::Settings`.

use std::time::Duration;

// ── Transfer / Chunking ──────────────────────────────────────────────────────

/// Bytes per chunk window. The browser client uses the same size, so both
/// sides agree on segment numbering.
pub const CHUNK_SIZE: usize = 16 * 1024;

/// How long the sender waits for a `chunk-ack` before retransmitting.
pub const CHUNK_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Retransmissions of a single segment before the transfer is declared stalled.
pub const MAX_CHUNK_RETRANSMITS: u32 = 5;

// ── Connection / Signaling ───────────────────────────────────────────────────

/// Label of the single application data channel.
pub const DATA_CHANNEL_LABEL: &str = "myDataChannel";

/// How long a send waits for a freshly created data channel to open.
pub const DATA_CHANNEL_OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound for waiting on the remote offer when joining a session.
pub const SIGNALING_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval of the directory-backed signaling store.
pub const SIGNALING_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// STUN servers used when the settings file does not name any.
pub const DEFAULT_ICE_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stunserver.stunprotocol.org:3478",
];

// ── Logging ──────────────────────────────────────────────────────────────────

/// Log file name inside `<data dir>/logs/`.
pub const LOG_FILE_NAME: &str = "peerdrop.log";
