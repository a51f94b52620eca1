//! Graceful termination of the transcoder: quit byte, SIGINT, SIGTERM, SIGKILL.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;
use async_trait::async_trait;
use log::{debug, warn};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};

use crate::config::GraceWindows;

/// How far the escalation had to go before the process was gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TerminationOutcome {
    /// Nothing to do, the process had already exited
    AlreadyExited,
    /// Exited after the quit byte
    Quit,
    /// Exited after SIGINT
    Interrupted,
    /// Exited after SIGTERM
    Terminated,
    /// Had to be killed
    Killed,
}

impl TerminationOutcome {
    pub fn was_forced(&self) -> bool {
        matches!(self, TerminationOutcome::Killed)
    }
}

/// A running process the escalation can act on
#[async_trait]
pub trait Terminable: Send {
    /// Non-blocking exit check
    fn has_exited(&mut self) -> bool;

    /// Write the quit byte to stdin and close it
    async fn send_quit(&mut self) -> io::Result<()>;

    fn interrupt(&mut self) -> io::Result<()>;

    fn terminate(&mut self) -> io::Result<()>;

    fn kill(&mut self) -> io::Result<()>;

    /// Wait up to `within` for the process to exit; true if it did
    async fn wait_for_exit(&mut self, within: Duration) -> bool;
}

/// Stop a process, escalating only while it keeps running.
///
/// Every step is best-effort: failures (including the process vanishing between
/// checks) are logged and the next check decides whether to continue.
pub async fn terminate_gracefully<T>(process: &mut T, windows: &GraceWindows) -> TerminationOutcome
where
    T: Terminable + ?Sized,
{
    if process.has_exited() {
        return TerminationOutcome::AlreadyExited;
    }

    if let Err(e) = process.send_quit().await {
        debug!("Quit byte not delivered: {}", e);
    }
    if process.wait_for_exit(windows.quit()).await {
        return TerminationOutcome::Quit;
    }

    if let Err(e) = process.interrupt() {
        debug!("SIGINT failed: {}", e);
    }
    if process.wait_for_exit(windows.interrupt()).await {
        return TerminationOutcome::Interrupted;
    }

    if let Err(e) = process.terminate() {
        debug!("SIGTERM failed: {}", e);
    }
    if process.wait_for_exit(windows.terminate()).await {
        return TerminationOutcome::Terminated;
    }

    if let Err(e) = process.kill() {
        warn!("Kill failed: {}", e);
    }
    TerminationOutcome::Killed
}

/// A spawned transcoder with its stdin kept for the quit byte
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    status: Option<ExitStatus>,
}

impl ChildProcess {
    /// Takes ownership of the child's stdin; stdout and stderr must be taken by the caller
    pub fn new(mut child: Child) -> Self {
        let stdin = child.stdin.take();
        Self {
            child,
            stdin,
            status: None,
        }
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.status
    }

    /// Collect the exit status after a kill, so the child does not linger as a zombie
    pub async fn reap(&mut self) -> Option<ExitStatus> {
        if self.status.is_none() {
            match self.child.wait().await {
                Ok(status) => self.status = Some(status),
                Err(e) => warn!("Failed to reap transcoder: {}", e),
            }
        }
        self.status
    }

    #[cfg(unix)]
    fn signal(&mut self, signal: libc::c_int) -> io::Result<()> {
        let pid = match self.child.id() {
            Some(pid) => pid as libc::pid_t,
            None => return Ok(()),
        };
        // SAFETY: kill(2) with a pid we spawned; no memory is shared with the callee
        let rc = unsafe { libc::kill(pid, signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            Ok(())
        } else {
            Err(err)
        }
    }
}

#[async_trait]
impl Terminable for ChildProcess {
    fn has_exited(&mut self) -> bool {
        if self.status.is_some() {
            return true;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                true
            }
            Ok(None) => false,
            Err(_) => false,
        }
    }

    async fn send_quit(&mut self) -> io::Result<()> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin.write_all(b"q").await?;
        stdin.flush().await?;
        stdin.shutdown().await
    }

    #[cfg(unix)]
    fn interrupt(&mut self) -> io::Result<()> {
        self.signal(libc::SIGINT)
    }

    #[cfg(not(unix))]
    fn interrupt(&mut self) -> io::Result<()> {
        Ok(())
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        self.signal(libc::SIGTERM)
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        self.kill()
    }

    fn kill(&mut self) -> io::Result<()> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_for_exit(&mut self, within: Duration) -> bool {
        if self.has_exited() {
            return true;
        }
        match tokio::time::timeout(within, self.child.wait()).await {
            Ok(Ok(status)) => {
                self.status = Some(status);
                true
            }
            Ok(Err(e)) => {
                warn!("Error waiting for transcoder: {}", e);
                false
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Quit,
        Interrupt,
        Terminate,
        Kill,
    }

    /// Records the signals it receives and exits on the first one it honors
    struct Scripted {
        honors: Vec<Step>,
        received: Vec<Step>,
        exited: bool,
    }

    impl Scripted {
        fn honoring(honors: &[Step]) -> Self {
            Self {
                honors: honors.to_vec(),
                received: Vec::new(),
                exited: false,
            }
        }

        fn receive(&mut self, step: Step) -> io::Result<()> {
            if self.exited {
                return Err(io::Error::from_raw_os_error(3));
            }
            self.received.push(step);
            if self.honors.contains(&step) {
                self.exited = true;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Terminable for Scripted {
        fn has_exited(&mut self) -> bool {
            self.exited
        }

        async fn send_quit(&mut self) -> io::Result<()> {
            self.receive(Step::Quit)
        }

        fn interrupt(&mut self) -> io::Result<()> {
            self.receive(Step::Interrupt)
        }

        fn terminate(&mut self) -> io::Result<()> {
            self.receive(Step::Terminate)
        }

        fn kill(&mut self) -> io::Result<()> {
            self.receive(Step::Kill)
        }

        async fn wait_for_exit(&mut self, _within: Duration) -> bool {
            self.exited
        }
    }

    #[tokio::test]
    async fn test_escalation_stops_at_terminate() {
        let mut process = Scripted::honoring(&[Step::Terminate]);
        let outcome = terminate_gracefully(&mut process, &GraceWindows::default()).await;
        assert_eq!(outcome, TerminationOutcome::Terminated);
        assert_eq!(process.received, vec![Step::Quit, Step::Interrupt, Step::Terminate]);
    }

    #[tokio::test]
    async fn test_stubborn_process_is_killed() {
        let mut process = Scripted::honoring(&[Step::Kill]);
        let outcome = terminate_gracefully(&mut process, &GraceWindows::default()).await;
        assert!(outcome.was_forced());
        assert_eq!(process.received, vec![Step::Quit, Step::Interrupt, Step::Terminate, Step::Kill]);
    }

    #[tokio::test]
    async fn test_quit_byte_is_enough() {
        let mut process = Scripted::honoring(&[Step::Quit]);
        let outcome = terminate_gracefully(&mut process, &GraceWindows::default()).await;
        assert_eq!(outcome, TerminationOutcome::Quit);
        assert_eq!(process.received, vec![Step::Quit]);
    }

    #[tokio::test]
    async fn test_exited_process_gets_no_signals() {
        let mut process = Scripted::honoring(&[]);
        process.exited = true;
        let outcome = terminate_gracefully(&mut process, &GraceWindows::default()).await;
        assert_eq!(outcome, TerminationOutcome::AlreadyExited);
        assert!(process.received.is_empty());
    }

    #[cfg(unix)]
    fn short_windows() -> GraceWindows {
        GraceWindows {
            quit_ms: 200,
            interrupt_ms: 200,
            terminate_ms: 200,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_stopped_by_interrupt() {
        use std::process::Stdio;

        let child = tokio::process::Command::new("sleep")
            .arg("30")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut process = ChildProcess::new(child);
        assert!(process.id().is_some());

        let outcome = terminate_gracefully(&mut process, &short_windows()).await;
        assert_eq!(outcome, TerminationOutcome::Interrupted);
        assert!(process.has_exited());
        assert!(!process.exit_status().unwrap().success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_real_process_honoring_quit_byte() {
        use std::process::Stdio;

        // Exits cleanly once stdin is closed after the quit byte
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("cat >/dev/null")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut process = ChildProcess::new(child);

        let outcome = terminate_gracefully(&mut process, &short_windows()).await;
        assert_eq!(outcome, TerminationOutcome::Quit);
        assert!(process.exit_status().unwrap().success());
    }
}
