use std::path::PathBuf;

use clap::Parser;

/// Headless progressive-hydration simulator.
///
/// Registers a synthetic page of boundaries, scrolls a virtual viewport
/// through it and prints the final metrics snapshot as JSON.
#[derive(Parser, Debug)]
#[command(name = "hydra-sim", about = "Simulate progressive hydration of a page")]
pub struct SimArgs {
    /// Path to a scheduler config file (TOML). Defaults plus HYDRA_* env otherwise
    #[arg(long, env = "HYDRA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of boundaries on the synthetic page
    #[arg(long, default_value = "24")]
    pub boundaries: usize,

    /// Viewport height in pixels
    #[arg(long, default_value = "900")]
    pub viewport_height: f64,

    /// Pixels scrolled per scroll tick
    #[arg(long, default_value = "250")]
    pub scroll_step: f64,

    /// Milliseconds between scroll ticks
    #[arg(long, default_value = "40")]
    pub scroll_interval_ms: u64,

    /// Give up waiting for the loop after this many milliseconds and force the rest
    #[arg(long, default_value = "10000")]
    pub settle_timeout_ms: u64,

    /// Serve GET /metrics and /boundaries/{id} on this port and keep running until Ctrl-C
    #[arg(long, env = "HYDRA_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Include per-boundary details in the JSON output
    #[arg(long)]
    pub details: bool,
}
