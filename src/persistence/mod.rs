//! External data-access layer (C11, §4.7, §6).
//!
//! The core engine never talks to a database directly; it depends on the
//! repository traits in [`repository`], invoked through the retry/offline
//! queue wrapper in [`bridge`].

pub mod bridge;
pub mod offline_queue;
pub mod repository;

pub use bridge::{in_memory_bridge, PersistenceBridge, TerminalMatch};
pub use offline_queue::{OfflineQueue, PendingWrite};
pub use repository::{
    GameHistoryRecord, GameHistoryRepository, RepositoryError, Repositories, SessionRepository,
    UserStats, UserStatsRepository,
};
