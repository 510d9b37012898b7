//! Network layer (C1, C2, C3, C4).
//!
//! The transport adapter accepts bidirectional client channels and frames
//! JSON messages; the registry tracks live connections; the session store
//! holds per-connection soft state; the dispatcher is the single event loop
//! that owns every core registry and drives the engines (§4.1, §5).

pub mod auth;
pub mod dispatcher;
pub mod protocol;
pub mod registry;
pub mod sessions;
pub mod transport;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use dispatcher::Dispatcher;
pub use protocol::{ClientMessage, ErrorCode, ErrorFrame, ServerMessage};
pub use registry::ConnectionRegistry;
pub use sessions::SessionStore;
pub use transport::{OutboundSender, TransportServer};
