//! Realtime collaboration for noteflow.
//!
//! [`session::SyncSession`] keeps one editor widget and one stored document
//! in step. The collaborators it needs are traits ([`store::DocumentStore`],
//! [`editor::EditorWidget`], [`auth::AuthProvider`], [`api::NoteApi`]) with
//! in-process or HTTP implementations alongside. The `noteflow-collab`
//! binary serves a [`store::MemoryDocumentStore`] over HTTP and WebSocket.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod editor;
pub mod server;
pub mod session;
pub mod store;
pub mod throttle;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::CollabConfig;

pub use editor::{ApplyMode, ChangeSource, EditorEvent, EditorWidget, HeadlessEditor, Selection};
pub use session::{SessionConfig, SessionError, SessionNotice, SessionState, SyncSession};
pub use store::{DocRef, DocumentFields, DocumentStore, MemoryDocumentStore, StoreError};

pub fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Run the daemon using CLI args (parsed by the caller).
pub async fn run_with_cli(cli: cli::Cli) -> Result<()> {
    init_tracing(cli.verbose)?;
    let cfg = CollabConfig::from_cli(&cli)?;
    server::serve(cfg).await
}
