//! # Dilemma Arena — game coordination server
//!
//! Authoritative real-time server hosting a two-player repeated
//! prisoner's-dilemma game, with matchmaking, private rooms, party lobbies,
//! and single-elimination / double-elimination / round-robin tournaments
//! layered on top.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         DISPATCHER (C4)                          │
//! │         single task, owns every in-memory registry below         │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  network/    - transport, connection registry, sessions, wire    │
//! │  ├── transport.rs  - WebSocket accept/frame loop (C1)            │
//! │  ├── registry.rs   - client-id <-> tournament-player-id (C2)     │
//! │  ├── sessions.rs   - per-connection soft state (C3)              │
//! │  ├── dispatcher.rs - single event loop (C4)                      │
//! │  ├── protocol.rs   - wire message enums                          │
//! │  └── auth.rs       - session-token validation                    │
//! │                                                                    │
//! │  engine/     - game coordination logic                           │
//! │  ├── matchmaking.rs     - FIFO/scored queue (C5)                 │
//! │  ├── private_rooms.rs   - 6-char room codes (C6)                 │
//! │  ├── lobby_manager.rs   - party lobbies (C7)                     │
//! │  ├── match_engine.rs    - round state machine (C8)               │
//! │  ├── tournament_engine.rs - bracket generation/progress (C9)     │
//! │  └── broadcaster.rs     - recipient resolution + delivery (C10)  │
//! │                                                                    │
//! │  persistence/ - external data-access boundary (C11)              │
//! │  models/      - shared data model (§3)                           │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency model
//!
//! All core registries (connections, sessions, queue, private rooms,
//! lobbies, matches, tournaments) are mutated exclusively from the
//! dispatcher's single event loop (§5). Timers are modeled as detached
//! `tokio::spawn` + `sleep` tasks that post a timer-fired event back into
//! the dispatcher's inbound channel, carrying a generation counter so stale
//! firings recognize themselves as no-ops.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod network;
pub mod persistence;

pub use config::ServerConfig;
pub use error::GameServerError;
pub use network::dispatcher::Dispatcher;
pub use network::transport::TransportServer;

/// Crate version, echoed in `REGISTERED`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
