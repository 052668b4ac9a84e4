//! Standalone diagnostics collector
//!
//! Gathers the evidence needed to debug a misbehaving tunnel on a live
//! host: system and DNS configuration, an in-process DNS probe, routing
//! and firewall state, and an optional packet capture. Every tool absence
//! degrades to a note in the log.

use std::io::BufRead;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use crate::common::Result;
use crate::diag::{run_command, CaptureSession, DiagnosticLog};
use crate::harness::{FIREWALL_MARK_TABLE, FIREWALL_TABLE, POLICY_ROUTE_TABLE};
use crate::probe::probe;

pub struct CollectOptions {
    pub dns_server: Ipv4Addr,
    pub dns_name: String,
    /// Output directory; defaults to a timestamped dir under /tmp
    pub out_dir: Option<PathBuf>,
    /// Start the capture, wait for Enter, then collect (reproduce-then-dump)
    pub wait_for_enter: bool,
}

/// Run the full sweep; returns the diagnostic log path
pub async fn collect(opts: &CollectOptions) -> Result<PathBuf> {
    let out_dir = match &opts.out_dir {
        Some(dir) => dir.clone(),
        None => PathBuf::from(format!(
            "/tmp/tun-e2e-debug-{}",
            chrono::Local::now().format("%Y%m%d-%H%M%S")
        )),
    };
    std::fs::create_dir_all(&out_dir)?;

    let mut log = DiagnosticLog::create(&out_dir.join("diagnostics.txt"))?;
    let mut capture = CaptureSession::open(&out_dir)?;

    if opts.wait_for_enter {
        println!("→ Reproduce the issue, then press Enter to collect diagnostics...");
        let mut line = String::new();
        let _ = std::io::stdin().lock().read_line(&mut line);
    }

    let sweep = sweep(opts, &mut log).await;

    capture.close().await;
    if sweep.is_ok() {
        capture.render(&mut log).await?;
    }
    sweep?;

    Ok(log.path().to_path_buf())
}

async fn sweep(opts: &CollectOptions, log: &mut DiagnosticLog) -> Result<()> {
    let server = opts.dns_server.to_string();
    let name = opts.dns_name.as_str();

    // System info
    run_command(log, &["date"]).await?;
    run_command(log, &["uname", "-a"]).await?;
    run_command(log, &["id"]).await?;

    // DNS configuration
    run_command(log, &["ls", "-l", "/etc/resolv.conf"]).await?;
    run_command(log, &["cat", "/etc/resolv.conf"]).await?;
    run_command(log, &["cat", "/etc/nsswitch.conf"]).await?;
    run_command(log, &["cat", "/run/systemd/resolve/resolv.conf"]).await?;
    run_command(log, &["cat", "/run/systemd/resolve/stub-resolv.conf"]).await?;
    if which::which("resolvectl").is_ok() {
        run_command(log, &["resolvectl", "dns"]).await?;
        run_command(log, &["resolvectl", "status"]).await?;
    }

    // Resolution through the system stack and directly against the server
    run_command(log, &["getent", "hosts", name]).await?;
    if which::which("dig").is_ok() {
        let at_server = format!("@{server}");
        run_command(log, &["dig", "+time=2", "+tries=1", at_server.as_str(), name]).await?;
    }
    if which::which("nslookup").is_ok() {
        run_command(log, &["nslookup", name, server.as_str()]).await?;
    }

    // In-process probe, bypassing the system resolver entirely
    log.note("## dns probe")?;
    let result = probe(opts.dns_server, name, Duration::from_secs(2)).await;
    log.note(&format!(
        "dns_probe {server} {name}: {} {} time_ms={:.1}",
        if result.success { "OK" } else { "FAIL" },
        result.message,
        result.elapsed.as_secs_f64() * 1000.0
    ))?;
    log.note("")?;

    // Network configuration
    run_command(log, &["ip", "-4", "addr"]).await?;
    run_command(log, &["ip", "-4", "link"]).await?;
    run_command(log, &["ip", "-4", "rule", "show"]).await?;
    run_command(log, &["ip", "-4", "route", "show"]).await?;
    run_command(log, &["ip", "-4", "route", "show", "table", "main"]).await?;
    run_command(log, &["ip", "-4", "route", "show", "table", POLICY_ROUTE_TABLE]).await?;
    for dest in [server.as_str(), "1.1.1.1", "8.8.8.8"] {
        run_command(log, &["ip", "-4", "route", "get", dest]).await?;
    }
    run_command(log, &["ss", "-tupn"]).await?;

    // Firewall rules
    run_command(log, &["nft", "list", "table", "inet", FIREWALL_TABLE]).await?;
    run_command(log, &["nft", "list", "table", "inet", FIREWALL_MARK_TABLE]).await?;
    run_command(log, &["nft", "list", "ruleset"]).await?;
    run_command(log, &["iptables", "-S"]).await?;
    run_command(log, &["iptables", "-t", "mangle", "-S"]).await?;

    // Daemon state
    for state_dir in state_dirs() {
        let state_file = state_dir.join("state.json");
        if state_file.exists() {
            run_command(log, &["cat".to_string(), state_file.display().to_string()]).await?;
            break;
        }
    }

    Ok(())
}

/// Candidate daemon state directories, most specific first
fn state_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(dir) = std::env::var("TUN_E2E_STATE_DIR") {
        dirs.push(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_RUNTIME_DIR") {
        dirs.push(PathBuf::from(xdg).join("tunneld"));
    }
    dirs.push(PathBuf::from("/run/tunneld"));
    #[cfg(unix)]
    dirs.push(PathBuf::from(format!("/tmp/tunneld-{}", unsafe {
        libc::getuid()
    })));
    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn collect_produces_a_log_with_the_sweep() {
        let dir = TempDir::new().unwrap();
        let opts = CollectOptions {
            dns_server: Ipv4Addr::LOCALHOST,
            dns_name: "example.com".to_string(),
            out_dir: Some(dir.path().to_path_buf()),
            wait_for_enter: false,
        };

        let log_path = collect(&opts).await.unwrap();
        let contents = std::fs::read_to_string(log_path).unwrap();
        assert!(contents.starts_with("tunneld debug capture"));
        assert!(contents.contains("## uname -a"));
        assert!(contents.contains("## dns probe"));
        assert!(contents.contains("dns_probe 127.0.0.1 example.com:"));
        assert!(contents.contains("## nft list ruleset"));
    }
}
