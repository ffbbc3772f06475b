// Coordinator configuration.
//
// `BotConfig` is loaded once at startup from a JSON file and then shared
// read-only (behind an `Arc`) by every component. Every field has a default,
// so a partial file only needs to name what it overrides; a missing file is
// an error rather than a silent fallback to defaults.
//
// Groups:
// - `OrderConfig`: queue capacity, per-order item limit, cooldowns, ETA.
// - `TempAccessConfig`: trial limit for the temporary access tier.
// - `RestoreConfig`: restore-only mode and everything the restore supervisor
//   writes or broadcasts after regenerating a session.
//
// See also: `admission.rs` (consumes `OrderConfig` and the ban override),
// `restore.rs` (consumes `RestoreConfig`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use islandbot_protocol::types::{ChannelId, UserId};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Queue and admission tunables.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderConfig {
    /// Queue capacity. Orders beyond this are rejected.
    pub max_queue_count: usize,
    /// Orders with more items are truncated to this many.
    pub max_items_per_order: usize,
    /// Per-user window between order commands, in seconds. Zero never
    /// rate-limits; negative never rate-limits and never records.
    pub order_cooldown_secs: i64,
    /// Same semantics, for the queue position command.
    pub position_command_cooldown_secs: i64,
    /// Per-order processing estimate used for ETAs until real durations
    /// have been observed.
    pub estimated_order_secs: u64,
    /// How many observed order durations feed the ETA average.
    pub eta_history_len: usize,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            max_queue_count: 50,
            max_items_per_order: 40,
            order_cooldown_secs: 0,
            position_command_cooldown_secs: 15,
            estimated_order_secs: 180,
            eta_history_len: 10,
        }
    }
}

/// Temporary access tier limits.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TempAccessConfig {
    /// Number of orders a temporary user may complete; the last one expires
    /// the grant.
    pub max_orders: u32,
    /// Optional wall-clock window measured from the first order. Once it has
    /// passed, the next order expires the grant regardless of count.
    pub expire_after_secs: Option<u64>,
}

impl Default for TempAccessConfig {
    fn default() -> Self {
        Self {
            max_orders: 3,
            expire_after_secs: None,
        }
    }
}

/// Session restore behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RestoreConfig {
    /// Serve no orders; only keep the session alive.
    pub restore_only_mode: bool,
    pub session_code_path: PathBuf,
    pub visitor_count_path: PathBuf,
    pub visitor_list_path: PathBuf,
    pub villager_path: PathBuf,
    /// Write bare values instead of labelled text.
    pub minimize_details: bool,
    /// Channels that receive every new session code.
    pub echo_channels: Vec<ChannelId>,
    /// Channels told about each visitor who arrives on the island.
    pub arrival_echo_channels: Vec<ChannelId>,
    /// Append the current session code to arrival messages.
    pub post_code_with_arrivals: bool,
    /// Regenerate the map on restore.
    pub refresh_map: bool,
    /// Also regenerate terrain and elevation. Ignored unless `refresh_map`.
    pub refresh_terrain: bool,
    /// Run the console link's idle action between restore cycles
    /// (restore-only mode).
    pub idle_filler: bool,
    /// Interval between liveness checks.
    pub check_interval_ms: u64,
}

impl RestoreConfig {
    /// Terrain regeneration as actually requested from the console link.
    pub fn effective_refresh_terrain(&self) -> bool {
        self.refresh_map && self.refresh_terrain
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Whether the supervisor snapshots a live session to keep the visitor
    /// list current.
    pub fn tracks_visitors(&self) -> bool {
        self.restore_only_mode || !self.arrival_echo_channels.is_empty()
    }
}

impl Default for RestoreConfig {
    fn default() -> Self {
        Self {
            restore_only_mode: false,
            session_code_path: "Dodo.txt".into(),
            visitor_count_path: "Visitors.txt".into(),
            visitor_list_path: "VisitorsList.txt".into(),
            villager_path: "Villagers.txt".into(),
            minimize_details: false,
            echo_channels: Vec::new(),
            arrival_echo_channels: Vec::new(),
            post_code_with_arrivals: false,
            refresh_map: false,
            refresh_terrain: false,
            idle_filler: false,
            check_interval_ms: 5000,
        }
    }
}

/// Complete coordinator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub bot_name: String,
    /// Front-end bridge listen port (0 lets the OS choose).
    pub port: u16,
    pub order: OrderConfig,
    /// Accept orders from banned identities anyway.
    pub allow_known_abusers: bool,
    pub allow_villager_injection: bool,
    /// Maintenance switch: refuse all orders.
    pub orders_disabled: bool,
    /// Users allowed to run operator commands.
    pub sudo_users: Vec<UserId>,
    pub ban_list_path: PathBuf,
    pub temp_access_path: PathBuf,
    pub temp_access: TempAccessConfig,
    pub restore: RestoreConfig,
    /// How long the execution worker waits on an empty queue before
    /// re-checking its stop flag.
    pub worker_poll_ms: u64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_name: "islandbot".into(),
            port: 7979,
            order: OrderConfig::default(),
            allow_known_abusers: false,
            allow_villager_injection: true,
            orders_disabled: false,
            sudo_users: Vec::new(),
            ban_list_path: "globalban.txt".into(),
            temp_access_path: "tempuser.txt".into(),
            temp_access: TempAccessConfig::default(),
            restore: RestoreConfig::default(),
            worker_poll_ms: 500,
        }
    }
}

impl BotConfig {
    /// Load and parse a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        if config.restore.refresh_terrain && !config.restore.refresh_map {
            warn!(
                path = %path.display(),
                "refresh_terrain requires refresh_map; terrain will not be regenerated"
            );
        }
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Orders are refused outright (maintenance or restore-only mode).
    pub fn orders_refused(&self) -> bool {
        self.orders_disabled || self.restore.restore_only_mode
    }

    pub fn is_sudo(&self, user: UserId) -> bool {
        self.sudo_users.contains(&user)
    }

    pub fn worker_poll(&self) -> Duration {
        Duration::from_millis(self.worker_poll_ms)
    }
}
