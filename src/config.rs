//! Process configuration.
//!
//! Mirrors the teacher's `ServerConfig`/`AuthConfig::from_env` pattern:
//! sensible defaults, overridable from environment variables, no config
//! file parser (this server has few enough knobs that env vars suffice).

use std::net::SocketAddr;
use std::time::Duration;

use crate::network::auth::AuthConfig;

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the transport listener binds to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Maximum inbound frame size in bytes (§6: 64 KiB).
    pub max_frame_bytes: usize,
    /// Timer durations (§5).
    pub timers: TimerConfig,
    /// Matchmaking tuning (§4.3).
    pub matchmaking: MatchmakingConfig,
    /// Lobby size/round constraints (§3, §6).
    pub lobby: LobbyConfig,
    /// Authentication configuration for non-guest session tokens (§4.2).
    pub auth: AuthConfig,
    /// Persistence retry policy (§4.7).
    pub persistence: PersistenceConfig,
    /// Server version string, echoed in `REGISTERED`.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            max_connections: 10_000,
            max_frame_bytes: 64 * 1024,
            timers: TimerConfig::default(),
            matchmaking: MatchmakingConfig::default(),
            lobby: LobbyConfig::default(),
            auth: AuthConfig::from_env(),
            persistence: PersistenceConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Build configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            if let Ok(parsed) = addr.parse() {
                config.bind_addr = parsed;
            }
        }
        if let Ok(max) = std::env::var("MAX_CONNECTIONS") {
            if let Ok(parsed) = max.parse() {
                config.max_connections = parsed;
            }
        }
        config
    }
}

/// Timer durations named in §5. All are the regular (non-tournament)
/// values unless a `tournament_` prefixed field exists.
#[derive(Debug, Clone, Copy)]
pub struct TimerConfig {
    /// Round decision timeout (30 s).
    pub round_timeout: Duration,
    /// SHOWING_RESULTS display pause (3 s).
    pub results_display_pause: Duration,
    /// Reversal acceptance window, regular matches (60 s).
    pub reversal_window: Duration,
    /// Reversal acceptance window, tournament matches (30 s).
    pub tournament_reversal_window: Duration,
    /// Reconnection grace period, regular matches (30 s).
    pub reconnect_grace: Duration,
    /// Reconnection grace period, tournament matches (5 min).
    pub tournament_reconnect_grace: Duration,
    /// Inter-round pause between tournament rounds (10 s).
    pub tournament_round_pause: Duration,
    /// Post-match viewing window before a completed match is purged (30 s).
    pub post_match_retention: Duration,
    /// Matchmaking sweep interval (5 s).
    pub matchmaking_sweep: Duration,
    /// Queue entry max wait before expiry (5 min default, overridable per entry).
    pub queue_max_wait: Duration,
    /// Private room timeout (10 min, §9 recommendation — not in the original source).
    pub private_room_timeout: Duration,
    /// Delay between MATCH_FOUND and the first NEW_ROUND (§4.3 "short delay").
    pub match_found_to_first_round: Duration,
    /// Delay enforcing TOURNAMENT_STARTED before TOURNAMENT_MATCH_READY (§4.6).
    pub tournament_started_ordering_delay: Duration,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            round_timeout: Duration::from_secs(30),
            results_display_pause: Duration::from_secs(3),
            reversal_window: Duration::from_secs(60),
            tournament_reversal_window: Duration::from_secs(30),
            reconnect_grace: Duration::from_secs(30),
            tournament_reconnect_grace: Duration::from_secs(5 * 60),
            tournament_round_pause: Duration::from_secs(10),
            post_match_retention: Duration::from_secs(30),
            matchmaking_sweep: Duration::from_secs(5),
            queue_max_wait: Duration::from_secs(5 * 60),
            private_room_timeout: Duration::from_secs(10 * 60),
            match_found_to_first_round: Duration::from_millis(500),
            tournament_started_ordering_delay: Duration::from_millis(100),
        }
    }
}

/// Matchmaking compatibility-score tuning (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct MatchmakingConfig {
    /// Default trust-score tolerance when a player doesn't specify one.
    pub default_trust_tolerance: u32,
    /// Default games-played tolerance before the score penalty kicks in.
    pub default_games_tolerance: u32,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            default_trust_tolerance: 15,
            default_games_tolerance: 10,
        }
    }
}

/// Lobby size/round bounds (§3, §6).
#[derive(Debug, Clone, Copy)]
pub struct LobbyConfig {
    /// Minimum `maxPlayers`.
    pub min_max_players: u32,
    /// Maximum `maxPlayers`.
    pub max_max_players: u32,
    /// Minimum `roundCount`.
    pub min_round_count: u32,
    /// Maximum `roundCount`.
    pub max_round_count: u32,
    /// Player count at which a lobby becomes `ready_to_start`.
    pub min_players_to_ready: u32,
    /// Default round count when a lobby doesn't specify one.
    pub default_round_count: u32,
    /// Maximum chat message length.
    pub max_chat_len: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            min_max_players: 4,
            max_max_players: 16,
            min_round_count: 5,
            max_round_count: 20,
            min_players_to_ready: 4,
            default_round_count: 10,
            max_chat_len: 500,
        }
    }
}

/// Persistence retry/backoff policy (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct PersistenceConfig {
    /// Base backoff delay.
    pub retry_base: Duration,
    /// Backoff multiplier.
    pub retry_multiplier: u32,
    /// Maximum backoff delay.
    pub retry_max: Duration,
    /// Maximum retry attempts before falling back to the offline queue.
    pub max_attempts: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            retry_base: Duration::from_secs(1),
            retry_multiplier: 2,
            retry_max: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}
