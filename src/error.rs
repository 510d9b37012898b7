//! Crate-wide error types.
//!
//! `GameServerError` covers failures that can escape a running dispatcher
//! (bind failures, transport errors, internal invariant violations).
//! Recoverable per-request failures are instead represented as
//! [`RequestError`] and sent back to the originating client as an `ERROR`
//! frame; they never become a `GameServerError`.

use thiserror::Error;

/// Top-level server error.
#[derive(Debug, Error)]
pub enum GameServerError {
    /// Failed to bind the transport listener.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket protocol error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Authentication subsystem error.
    #[error("auth error: {0}")]
    Auth(#[from] crate::network::auth::AuthError),

    /// Persistence subsystem exhausted its retry budget.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A core invariant was violated; the owning entity was torn down.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

/// Recoverable, request-scoped failure. Always translatable to an
/// [`crate::network::protocol::ErrorCode`] and a short message (§7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The message requires a prior `REGISTER`.
    #[error("not registered")]
    NotRegistered,
    /// Missing or malformed required fields.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// No lobby with that code/id exists.
    #[error("lobby not found")]
    LobbyNotFound,
    /// Lobby is at `maxPlayers` capacity.
    #[error("lobby full")]
    LobbyFull,
    /// Action rejected because a tournament is running.
    #[error("tournament in progress")]
    TournamentInProgress,
    /// Caller is not the lobby host.
    #[error("not host")]
    NotHost,
    /// Lobby chat is disabled.
    #[error("chat disabled")]
    ChatDisabled,
    /// Chat message exceeds 500 characters.
    #[error("message too long")]
    MessageTooLong,
    /// Chat message is empty.
    #[error("message empty")]
    MessageEmpty,
    /// The matchmaking entry expired before a pair-up.
    #[error("queue timeout")]
    QueueTimeout,
    /// Caller is not currently queued.
    #[error("not in queue")]
    NotInQueue,
    /// No match with that id exists (or it already ended).
    #[error("match not found")]
    MatchNotFound,
    /// Message arrived while the match was in an incompatible phase.
    #[error("wrong phase")]
    WrongPhase,
    /// A decision for this round was already recorded.
    #[error("already decided")]
    AlreadyDecided,
    /// Tournament format is not supported.
    #[error("format unsupported")]
    FormatUnsupported,
    /// Tournament size is not a valid size for the chosen format.
    #[error("invalid tournament size")]
    InvalidTournamentSize,
    /// Not enough players to start.
    #[error("insufficient players")]
    InsufficientPlayers,
    /// Player tried to join the queue while already in a lobby.
    #[error("queue conflict: already in a lobby")]
    QueueConflict,
    /// Reconnection window elapsed or no matching entity found.
    #[error("reconnection failed")]
    ReconnectionFailed,
    /// Programming error / invariant violation surfaced to the client.
    #[error("internal: {0}")]
    Internal(String),
}

impl RequestError {
    /// Wire error code for this failure, per spec §7.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotRegistered => "NOT_REGISTERED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::LobbyNotFound => "LOBBY_NOT_FOUND",
            Self::LobbyFull => "LOBBY_FULL",
            Self::TournamentInProgress => "TOURNAMENT_IN_PROGRESS",
            Self::NotHost => "NOT_HOST",
            Self::ChatDisabled => "CHAT_DISABLED",
            Self::MessageTooLong => "MESSAGE_TOO_LONG",
            Self::MessageEmpty => "MESSAGE_EMPTY",
            Self::QueueTimeout => "QUEUE_TIMEOUT",
            Self::NotInQueue => "NOT_IN_QUEUE",
            Self::MatchNotFound => "MATCH_NOT_FOUND",
            Self::WrongPhase => "WRONG_PHASE",
            Self::AlreadyDecided => "ALREADY_DECIDED",
            Self::FormatUnsupported => "FORMAT_UNSUPPORTED",
            Self::InvalidTournamentSize => "INVALID_TOURNAMENT_SIZE",
            Self::InsufficientPlayers => "INSUFFICIENT_PLAYERS",
            Self::QueueConflict => "QUEUE_CONFLICT",
            Self::ReconnectionFailed => "RECONNECTION_FAILED",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// A short, localisable message suitable for display to the player.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotRegistered => "Please register before sending this message.".into(),
            Self::InvalidRequest(detail) => format!("Invalid request: {detail}"),
            Self::LobbyNotFound => "That lobby no longer exists.".into(),
            Self::LobbyFull => "That lobby is full. Try another code.".into(),
            Self::TournamentInProgress => "A tournament is already running in this lobby.".into(),
            Self::NotHost => "Only the lobby host can do that.".into(),
            Self::ChatDisabled => "Chat is disabled in this lobby.".into(),
            Self::MessageTooLong => "Message is too long (max 500 characters).".into(),
            Self::MessageEmpty => "Message cannot be empty.".into(),
            Self::QueueTimeout => "No opponent was found in time. Try again.".into(),
            Self::NotInQueue => "You are not currently queued.".into(),
            Self::MatchNotFound => "That match no longer exists.".into(),
            Self::WrongPhase => "That action isn't valid right now.".into(),
            Self::AlreadyDecided => "You already made a decision this round.".into(),
            Self::FormatUnsupported => "That tournament format isn't supported.".into(),
            Self::InvalidTournamentSize => "Invalid number of players for this format.".into(),
            Self::InsufficientPlayers => "Not enough players to start.".into(),
            Self::QueueConflict => "Leave your current lobby before joining the queue.".into(),
            Self::ReconnectionFailed => "Couldn't reconnect you to your match.".into(),
            Self::Internal(_) => "Something went wrong on our end.".into(),
        }
    }
}
