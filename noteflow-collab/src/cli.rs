use std::path::PathBuf;

use clap::Parser;

/// CLI for the document-store daemon.
#[derive(Debug, Clone, Parser)]
#[command(name = "noteflow-collab", about = "Realtime document store for noteflow")]
pub struct Cli {
    /// Path to noteflow.yml. Missing file means defaults.
    #[arg(long, env = "NOTEFLOW_CONFIG", default_value = "noteflow.yml")]
    pub config: PathBuf,

    /// Listen address for HTTP/WS endpoints (overrides server.listen_addr)
    #[arg(long, env = "NOTEFLOW_COLLAB_ADDR")]
    pub listen_addr: Option<String>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    // ─────────────────────────────────────────────────────────────────────────
    // Auth options
    // ─────────────────────────────────────────────────────────────────────────

    /// Secret for signing/verifying user JWT tokens (HS256).
    /// If not set, every request is anonymous and trusted.
    #[arg(long, env = "NOTEFLOW_USER_SECRET", hide_env_values = true)]
    pub user_secret: Option<String>,

    /// Reject requests without a valid bearer token.
    #[arg(long, env = "NOTEFLOW_REQUIRE_AUTH", default_value = "false")]
    pub require_auth: bool,

    /// Expected JWT audience claim (optional).
    #[arg(long, env = "NOTEFLOW_AUTH_AUDIENCE")]
    pub auth_audience: Option<String>,
}
