//! Scoped packet capture around the verification window
//!
//! Capture is best-effort evidence: a host without tcpdump gets a valid
//! no-op session, never an error. The orchestrator guarantees `close` runs
//! exactly once per opened session, on every exit path.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::{Child, Command};

use super::{run_command, DiagnosticLog};
use crate::common::Result;

/// tcpdump filter covering plain and secure DNS
const CAPTURE_FILTER: &str = "port 53 or port 853";

/// Optional tcpdump subprocess plus the path of its artifact
pub struct CaptureSession {
    child: Option<Child>,
    pcap_path: PathBuf,
}

impl CaptureSession {
    /// Start capturing into `out_dir/dns.pcap`, if tcpdump is available
    ///
    /// The launch is non-blocking; tcpdump runs unattended until `close`.
    pub fn open(out_dir: &Path) -> Result<CaptureSession> {
        let pcap_path = out_dir.join("dns.pcap");

        let Ok(tcpdump) = which::which("tcpdump") else {
            tracing::debug!("tcpdump not found; packet capture disabled");
            return Ok(Self {
                child: None,
                pcap_path,
            });
        };

        let spawned = Command::new(tcpdump)
            .args(["-i", "any", "-n", "-w"])
            .arg(&pcap_path)
            .arg(CAPTURE_FILTER)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        match spawned {
            Ok(child) => {
                tracing::info!(pid = child.id(), "tcpdump capture running");
                Ok(Self {
                    child: Some(child),
                    pcap_path,
                })
            }
            Err(e) => {
                tracing::warn!("failed to start tcpdump: {e}");
                Ok(Self {
                    child: None,
                    pcap_path,
                })
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.child.is_some()
    }

    /// Terminate the capture subprocess and wait for it
    ///
    /// Safe to call on a session that never had a subprocess, and a no-op
    /// the second time around.
    pub async fn close(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGTERM);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        if let Err(e) = child.wait().await {
            tracing::warn!("waiting for tcpdump exit: {e}");
        }
    }

    /// Decode the capture artifact into the diagnostic log
    ///
    /// Must be called after `close`. Silently does nothing when the
    /// artifact is absent (no tool, or nothing captured).
    pub async fn render(&self, log: &mut DiagnosticLog) -> Result<()> {
        if !self.pcap_path.exists() {
            return Ok(());
        }
        let pcap = self.pcap_path.to_string_lossy();
        run_command(log, &["tcpdump", "-n", "-tttt", "-vvv", "-r", pcap.as_ref()]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn disabled_session(dir: &Path) -> CaptureSession {
        CaptureSession {
            child: None,
            pcap_path: dir.join("dns.pcap"),
        }
    }

    #[tokio::test]
    async fn close_without_tool_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let mut session = disabled_session(dir.path());
        assert!(!session.is_active());
        session.close().await;
        session.close().await;
    }

    #[tokio::test]
    async fn render_without_artifact_appends_nothing() {
        let dir = TempDir::new().unwrap();
        let mut log = DiagnosticLog::create(&dir.path().join("diag.txt")).unwrap();
        let before = std::fs::read_to_string(log.path()).unwrap();

        let session = disabled_session(dir.path());
        session.render(&mut log).await.unwrap();

        let after = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(before, after);
    }
}
