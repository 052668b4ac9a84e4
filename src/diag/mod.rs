//! Diagnostic evidence collection
//!
//! The diagnostic log is an append-only record of command invocations and
//! their combined output. It is written by a single control thread; once
//! created it is only ever appended to. The command runner collects
//! evidence, it does not enforce correctness: missing tools and non-zero
//! exits become annotated lines, not errors.

pub mod capture;

pub use capture::CaptureSession;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::common::Result;

/// Append-only evidence record with a timestamped header
pub struct DiagnosticLog {
    path: PathBuf,
    file: File,
}

impl DiagnosticLog {
    /// Create the log and write its header
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "tunneld debug capture")?;
        writeln!(file, "Generated: {}", chrono::Local::now().to_rfc3339())?;
        writeln!(file)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a single line
    pub fn note(&mut self, line: &str) -> Result<()> {
        writeln!(self.file, "{line}")?;
        Ok(())
    }

}

/// Run a command and append its combined output to the log
///
/// A `## <command>` header line always lands first, so the log shows what
/// was attempted even when the tool is missing. Stdout and stderr share
/// one file handle, so the command's output lands interleaved exactly as
/// it was written. Non-zero exits and spawn failures are annotated rather
/// than raised.
pub async fn run_command<S: AsRef<str>>(log: &mut DiagnosticLog, argv: &[S]) -> Result<()> {
    let parts: Vec<&str> = argv.iter().map(|s| s.as_ref()).collect();
    let Some((program, args)) = parts.split_first() else {
        return Ok(());
    };
    log.note(&format!("## {}", parts.join(" ")))?;

    let stdout = log.file.try_clone()?;
    let stderr = log.file.try_clone()?;
    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .status()
        .await;

    match status {
        Ok(status) => {
            if !status.success() {
                let code = status
                    .code()
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                log.note(&format!("(command failed: {code})"))?;
            }
        }
        Err(e) => {
            log.note(&format!("(command unavailable: {e})"))?;
        }
    }
    log.note("")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(log: &DiagnosticLog) -> String {
        std::fs::read_to_string(log.path()).unwrap()
    }

    #[test]
    fn header_records_start_time() {
        let dir = TempDir::new().unwrap();
        let log = DiagnosticLog::create(&dir.path().join("diag.txt")).unwrap();
        let contents = read(&log);
        assert!(contents.starts_with("tunneld debug capture"));
        assert!(contents.contains("Generated: "));
    }

    #[tokio::test]
    async fn command_output_is_appended_under_a_header() {
        let dir = TempDir::new().unwrap();
        let mut log = DiagnosticLog::create(&dir.path().join("diag.txt")).unwrap();

        run_command(&mut log, &["echo", "hello evidence"]).await.unwrap();

        let contents = read(&log);
        assert!(contents.contains("## echo hello evidence"));
        assert!(contents.contains("hello evidence"));
        assert!(!contents.contains("command failed"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_annotated_not_raised() {
        let dir = TempDir::new().unwrap();
        let mut log = DiagnosticLog::create(&dir.path().join("diag.txt")).unwrap();

        run_command(&mut log, &["sh", "-c", "echo partial; exit 3"])
            .await
            .unwrap();

        let contents = read(&log);
        assert!(contents.contains("partial"));
        assert!(contents.contains("(command failed: 3)"));
    }

    #[tokio::test]
    async fn stderr_is_interleaved_with_stdout() {
        let dir = TempDir::new().unwrap();
        let mut log = DiagnosticLog::create(&dir.path().join("diag.txt")).unwrap();

        run_command(
            &mut log,
            &["sh", "-c", "echo before; echo complaint >&2; echo after"],
        )
        .await
        .unwrap();

        let contents = read(&log);
        let before = contents.find("before").unwrap();
        let complaint = contents.find("complaint").unwrap();
        let after = contents.find("after").unwrap();
        assert!(
            before < complaint && complaint < after,
            "streams not interleaved in write order:\n{contents}"
        );
    }

    #[tokio::test]
    async fn missing_tool_is_annotated_not_raised() {
        let dir = TempDir::new().unwrap();
        let mut log = DiagnosticLog::create(&dir.path().join("diag.txt")).unwrap();

        run_command(&mut log, &["definitely-not-a-real-tool-xyz"])
            .await
            .unwrap();

        let contents = read(&log);
        assert!(contents.contains("## definitely-not-a-real-tool-xyz"));
        assert!(contents.contains("(command unavailable:"));
    }

    #[tokio::test]
    async fn log_is_append_only_across_commands() {
        let dir = TempDir::new().unwrap();
        let mut log = DiagnosticLog::create(&dir.path().join("diag.txt")).unwrap();

        run_command(&mut log, &["echo", "first"]).await.unwrap();
        run_command(&mut log, &["echo", "second"]).await.unwrap();

        let contents = read(&log);
        let first = contents.find("first").unwrap();
        let second = contents.find("second").unwrap();
        assert!(first < second);
    }
}
