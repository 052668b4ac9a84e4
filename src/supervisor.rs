//! Subject process lifecycle
//!
//! One daemon per run, one lifecycle: spawn, confirm it survived launch,
//! and later stop it with SIGINT escalating to a kill once the grace
//! period runs out. The state machine is explicit so that stop idempotence
//! and the no-exit-from-terminal-state rule are checkable directly.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};

use crate::common::{Error, Result};

/// How long the subject gets to prove it survived launch
const SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Lifecycle states; `Stopped` and `Killed` are terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Killed,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Killed)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Killed => "killed",
        }
    }
}

/// A single supervised subject process
#[derive(Debug)]
pub struct SupervisedProcess {
    program: String,
    state: ProcessState,
    child: Option<Child>,
    started_at: Option<Instant>,
}

impl SupervisedProcess {
    /// Launch the subject and verify it is still alive after a settle delay
    ///
    /// A subject that exits inside the settle window is a fatal startup
    /// failure; there is no automatic retry.
    pub async fn start(program: &Path, args: &[String]) -> Result<SupervisedProcess> {
        Self::start_with_settle(program, args, SETTLE_DELAY).await
    }

    /// `start` with an explicit settle delay (shortened in tests)
    pub async fn start_with_settle(
        program: &Path,
        args: &[String],
        settle: Duration,
    ) -> Result<SupervisedProcess> {
        let name = program.display().to_string();
        let mut proc = SupervisedProcess {
            program: name.clone(),
            state: ProcessState::NotStarted,
            child: None,
            started_at: None,
        };
        proc.transition(ProcessState::Starting)?;

        tracing::info!("starting {} {}", name, args.join(" "));
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| Error::spawn_failed(name.as_str(), e))?;
        proc.child = Some(child);

        tokio::time::sleep(settle).await;

        if let Some(child) = proc.child.as_mut() {
            if let Some(status) = child.try_wait()? {
                return Err(Error::StartupFailure {
                    program: proc.program,
                    status: status.to_string(),
                });
            }
        }

        proc.transition(ProcessState::Running)?;
        proc.started_at = Some(Instant::now());
        Ok(proc)
    }

    /// Graceful stop with bounded escalation
    ///
    /// SIGINT is the subject's documented shutdown trigger. If it has not
    /// exited within `grace`, an unconditional kill follows. No-op when
    /// already in a terminal state. How cleanly the subject stopped never
    /// becomes a run failure; callers only get hard I/O errors here.
    pub async fn stop(&mut self, grace: Duration) -> Result<()> {
        if self.state.is_terminal() {
            tracing::debug!("{} already {}", self.program, self.state.name());
            return Ok(());
        }
        self.transition(ProcessState::Stopping)?;

        let Some(child) = self.child.as_mut() else {
            self.transition(ProcessState::Stopped)?;
            return Ok(());
        };

        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as i32, libc::SIGINT);
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                tracing::info!("{} exited ({status})", self.program);
                self.transition(ProcessState::Stopped)?;
            }
            Err(_) => {
                tracing::warn!(
                    "{} ignored the stop signal for {:?}; killing",
                    self.program,
                    grace
                );
                child.kill().await?;
                self.transition(ProcessState::Killed)?;
            }
        }
        self.child = None;
        Ok(())
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Checked state transition; rejects anything outside the lifecycle DAG
    fn transition(&mut self, next: ProcessState) -> Result<()> {
        use ProcessState::*;
        let allowed = matches!(
            (self.state, next),
            (NotStarted, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Killed)
        );
        if !allowed {
            return Err(Error::invalid_state(self.state.name(), next.name()));
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SETTLE: Duration = Duration::from_millis(100);

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn invalid_transition_names_both_states() {
        let mut proc = SupervisedProcess {
            program: "daemon".to_string(),
            state: ProcessState::Stopped,
            child: None,
            started_at: None,
        };
        let err = proc.transition(ProcessState::Running).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition: stopped -> running"
        );
    }

    #[test]
    fn terminal_states_are_terminal() {
        assert!(ProcessState::Stopped.is_terminal());
        assert!(ProcessState::Killed.is_terminal());
        assert!(!ProcessState::Running.is_terminal());
        assert!(!ProcessState::Stopping.is_terminal());
    }

    #[tokio::test]
    async fn crash_on_launch_is_a_startup_failure() {
        let err = SupervisedProcess::start_with_settle(
            Path::new("sh"),
            &args(&["-c", "exit 3"]),
            SETTLE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::StartupFailure { .. }));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_failure() {
        let err = SupervisedProcess::start_with_settle(
            Path::new("/nonexistent/daemon-binary"),
            &[],
            SETTLE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SpawnFailed { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn graceful_stop_reaches_stopped() {
        let mut proc =
            SupervisedProcess::start_with_settle(Path::new("sleep"), &args(&["30"]), SETTLE)
                .await
                .unwrap();
        assert_eq!(proc.state(), ProcessState::Running);
        assert!(proc.started_at().is_some());

        proc.stop(Duration::from_secs(2)).await.unwrap();
        assert_eq!(proc.state(), ProcessState::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stubborn_process_is_killed_after_grace() {
        let mut proc = SupervisedProcess::start_with_settle(
            Path::new("sh"),
            &args(&["-c", "trap '' INT; sleep 30"]),
            SETTLE,
        )
        .await
        .unwrap();

        let start = Instant::now();
        proc.stop(Duration::from_millis(300)).await.unwrap();
        assert_eq!(proc.state(), ProcessState::Killed);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_is_idempotent() {
        let mut proc =
            SupervisedProcess::start_with_settle(Path::new("sleep"), &args(&["30"]), SETTLE)
                .await
                .unwrap();

        proc.stop(Duration::from_secs(2)).await.unwrap();
        let state = proc.state();
        proc.stop(Duration::from_secs(2)).await.unwrap();
        assert_eq!(proc.state(), state);
    }
}
