//! CLI command definitions

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full end-to-end verification against a live proxy
    ///
    /// Configuration comes from TUN_E2E_* environment variables; the
    /// proxy URL (TUN_E2E_PROXY_URL) is mandatory.
    Run,

    /// Send a single DNS query and validate the reply
    Probe {
        /// DNS server to query
        #[arg(long, default_value = "1.1.1.1")]
        server: Ipv4Addr,

        /// Name to resolve
        #[arg(long, default_value = "ifconfig.me")]
        name: String,

        /// Probe timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,
    },

    /// Collect a diagnostics bundle for troubleshooting
    Collect {
        /// DNS server for the resolution checks
        #[arg(long, default_value = "1.1.1.1")]
        server: Ipv4Addr,

        /// Name to resolve in the checks
        #[arg(long, default_value = "ifconfig.me")]
        name: String,

        /// Output directory (default: /tmp/tun-e2e-debug-<timestamp>)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Start the capture, wait for Enter, then collect
        #[arg(long)]
        wait: bool,
    },
}
