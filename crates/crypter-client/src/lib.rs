//! # crypter-client
//!
//! Local-first synchronization for the Crypter messenger: a [`SyncEngine`]
//! that serves pages from the local store, fills gaps from the REST API,
//! decrypts what it receives and keeps the store current from the live
//! event stream.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod gateway;
pub mod reconcile;
pub mod state;
pub mod sync;

#[cfg(test)]
mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use cache::{Cache, NoCache};
pub use config::ClientConfig;
pub use engine::{StoreChange, SyncEngine, SyncEngineBuilder};
pub use error::{Result, SyncError};
pub use events::{run_event_loop, EventEmitter, LiveEvent};
pub use gateway::{Cursor, Direction, HttpGateway, RemoteGateway, Scope};
pub use sync::{SyncReport, SyncWindow};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("crypter_client=debug,crypter_store=info,warn"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();

    if installed.is_ok() {
        tracing::info!("{} client tracing initialised", crypter_shared::constants::APP_NAME);
    }
}
