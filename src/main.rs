//! tun-harness - e2e verification harness for the tunneld daemon

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use tun_harness::commands::Commands;
use tun_harness::harness::Harness;
use tun_harness::{collect, common, harness, probe, Error, Result, RunConfig};

#[derive(Parser)]
#[command(name = "tun-harness", about = "E2E verification harness for tunneld")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    common::logging::init_cli();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run => run_e2e().await,
        Commands::Probe {
            server,
            name,
            timeout_ms,
        } => run_probe(server, &name, timeout_ms).await,
        Commands::Collect {
            server,
            name,
            out_dir,
            wait,
        } => run_collect(server, name, out_dir, wait).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run_e2e() -> Result<()> {
    harness::assert_root()?;
    let config = RunConfig::from_env()?;

    println!("{}", "E2E test runner".bold());
    println!("  proxy: {}", config.proxy_url_resolved);
    println!("  state: {}", config.state_dir.display());
    println!();

    Harness::new(config).run().await
}

async fn run_probe(server: Ipv4Addr, name: &str, timeout_ms: u64) -> Result<()> {
    let result = probe::probe(server, name, Duration::from_millis(timeout_ms)).await;
    println!(
        "dns_probe {server} {name}: {} {} time_ms={:.1}",
        if result.success { "OK" } else { "FAIL" },
        result.message,
        result.elapsed.as_secs_f64() * 1000.0
    );
    if result.success {
        Ok(())
    } else {
        Err(Error::ProbeFailed(result.message))
    }
}

async fn run_collect(
    server: Ipv4Addr,
    name: String,
    out_dir: Option<PathBuf>,
    wait: bool,
) -> Result<()> {
    let opts = collect::CollectOptions {
        dns_server: server,
        dns_name: name,
        out_dir,
        wait_for_enter: wait,
    };
    let log_path = collect::collect(&opts).await?;
    println!(
        "{} diagnostics saved to {}",
        "✓".green(),
        log_path.display()
    );
    Ok(())
}
