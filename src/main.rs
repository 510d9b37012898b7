//! Dilemma Arena server entry point.
//!
//! Wires the transport listener to the dispatcher and runs both to
//! completion. Persistence defaults to the in-memory repository doubles;
//! point `Repositories` at a real data-access layer to go live.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use dilemma_arena::config::ServerConfig;
use dilemma_arena::network::dispatcher::Dispatcher;
use dilemma_arena::network::transport::TransportServer;
use dilemma_arena::persistence::in_memory_bridge;
use dilemma_arena::VERSION;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!(version = VERSION, bind_addr = %config.bind_addr, "dilemma arena server starting");

    let persistence = in_memory_bridge(config.persistence);
    let (dispatcher, dispatcher_tx) = Dispatcher::new(config.clone(), persistence);

    let dispatcher_task = tokio::spawn(dispatcher.run());

    let transport = Arc::new(TransportServer::new(
        config.bind_addr,
        config.max_frame_bytes,
        dispatcher_tx,
    ));

    if let Err(e) = transport.run().await {
        tracing::error!("transport server exited: {}", e);
    }

    dispatcher_task.abort();
}
