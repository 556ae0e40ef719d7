//! Engine process supervision.
//!
//! [`UciEngine`] owns the child process. It wires stdin/stdout to the
//! protocol [`Session`], stderr to a [`DiagnosticDrain`], and hands the
//! `Child` itself to an exit watcher task. Whichever of the watcher and
//! [`UciEngine::close`] clears the `running` flag first decides whether the
//! exit was expected.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::channel::{EngineName, StopSignal, Teardown};
use crate::drain::DiagnosticDrain;
use crate::error::{EngineError, EngineResult};
use crate::options::{EngineOption, OptionValue};
use crate::session::{Session, StopHandle};
use crate::uci::GoReply;
use crate::{GoParameters, Variant};

/// Grace period granted to the engine to exit after `quit`.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How to launch an engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub current_dir: Option<PathBuf>,
    pub close_timeout: Duration,
}

impl EngineConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Program and arguments as one string, for logs and errors.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

type EngineSession = Session<BufReader<ChildStdout>, ChildStdin>;

/// A running UCI engine.
pub struct UciEngine {
    command: String,
    pid: Option<u32>,
    session: EngineSession,
    drain: DiagnosticDrain,
    running: Arc<AtomicBool>,
    kill: Option<oneshot::Sender<()>>,
    exit: Option<JoinHandle<Option<ExitStatus>>>,
    close_timeout: Duration,
}

impl UciEngine {
    /// Launch the engine and perform the handshake.
    pub async fn launch(config: EngineConfig) -> EngineResult<Self> {
        Self::launch_with(config, |_| {}).await
    }

    /// Launch the engine, run `pre_init` on the fresh handle, then perform
    /// the handshake. The engine is shut down if the handshake fails.
    #[tracing::instrument(level = "info", skip(config, pre_init), fields(command = %config.command_line()))]
    pub async fn launch_with<F>(config: EngineConfig, pre_init: F) -> EngineResult<Self>
    where
        F: FnOnce(&UciEngine),
    {
        let mut engine = Self::spawn(config)?;
        pre_init(&engine);

        if let Err(e) = engine.session.init().await {
            tracing::error!("Handshake with {} failed: {}", engine.command, e);
            if let Err(close_err) = engine.close().await {
                tracing::debug!("Error while closing {}: {}", engine.command, close_err);
            }
            return Err(e);
        }
        Ok(engine)
    }

    fn spawn(config: EngineConfig) -> EngineResult<Self> {
        let command = config.command_line();
        tracing::info!("Launching uci engine with command {}", command);

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &config.current_dir {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn().map_err(|source| {
            tracing::error!("Failed to spawn {}: {}", command, source);
            EngineError::Launch {
                command: command.clone(),
                source,
            }
        })?;
        let pid = child.id();
        tracing::info!("Engine launched with {} process id is {:?}", command, pid);

        let stdin = child
            .stdin
            .take()
            .ok_or(EngineError::MissingStream("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(EngineError::MissingStream("stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or(EngineError::MissingStream("stderr"))?;

        let name = EngineName::default();
        let session = Session::new(BufReader::new(stdout), stdin, name.clone());
        let drain = DiagnosticDrain::spawn(stderr, name.clone());
        let running = Arc::new(AtomicBool::new(true));

        let (kill_tx, kill_rx) = oneshot::channel();
        let observer = ExitObserver {
            running: Arc::clone(&running),
            teardown: session.teardown(),
            drain: drain.stop_signal(),
            name,
            command: command.clone(),
        };
        let exit = tokio::spawn(observer.watch(child, kill_rx));

        Ok(Self {
            command,
            pid,
            session,
            drain,
            running,
            kill: Some(kill_tx),
            exit: Some(exit),
            close_timeout: config.close_timeout,
        })
    }

    pub fn name(&self) -> &str {
        self.session.name()
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// False once the engine was closed or exited on its own.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> EngineResult<&[EngineOption]> {
        self.session.options()
    }

    pub async fn set_option(
        &mut self,
        name: &str,
        value: impl Into<OptionValue>,
    ) -> EngineResult<()> {
        self.session.set_option(name, Some(value.into())).await
    }

    pub async fn press_button(&mut self, name: &str) -> EngineResult<()> {
        self.session.set_option(name, None).await
    }

    pub fn is_supported(&self, variant: Variant) -> EngineResult<bool> {
        self.session.is_supported(variant)
    }

    pub async fn new_game(&mut self, variant: Variant) -> EngineResult<bool> {
        self.session.new_game(variant).await
    }

    pub async fn set_position<S: AsRef<str>>(
        &mut self,
        fen: Option<&str>,
        moves: &[S],
    ) -> EngineResult<()> {
        self.session.set_position(fen, moves).await
    }

    /// Search the current position. `Ok(None)` means the engine went away
    /// before answering.
    pub async fn go(&mut self, params: &GoParameters) -> EngineResult<Option<GoReply>> {
        self.session.go(params).await
    }

    pub async fn stop(&self) -> EngineResult<()> {
        self.session.stop().await
    }

    /// Handle for stopping a search from another task.
    pub fn stop_handle(&self) -> StopHandle<ChildStdin> {
        self.session.stop_handle()
    }

    /// Send `quit`, release the streams and wait for the process to exit.
    ///
    /// The process is killed if it is still alive after the grace period.
    /// Does nothing if the engine was already closed or exited on its own.
    #[tracing::instrument(level = "info", skip(self), fields(engine = %self.name()))]
    pub async fn close(&mut self) -> EngineResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let result = self.session.close().await;
        self.drain.close().await;
        self.wait_for_exit().await;
        result
    }

    async fn wait_for_exit(&mut self) {
        let Some(mut exit) = self.exit.take() else {
            return;
        };
        if tokio::time::timeout(self.close_timeout, &mut exit)
            .await
            .is_err()
        {
            tracing::warn!(
                "Fail to gracefully close UCI engine {}, trying to kill it",
                self.name()
            );
            if let Some(kill) = self.kill.take() {
                let _ = kill.send(());
            }
            if let Err(e) = exit.await {
                tracing::error!("Exit watcher of {} failed: {}", self.command, e);
            }
        }
    }
}

impl Drop for UciEngine {
    fn drop(&mut self) {
        // The exit watcher kills the process once the kill sender is gone.
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!("{} dropped without being closed", self.command);
        }
    }
}

/// State the exit watcher needs to clean up after an unexpected exit.
struct ExitObserver {
    running: Arc<AtomicBool>,
    teardown: Teardown<ChildStdin>,
    drain: StopSignal,
    name: EngineName,
    command: String,
}

impl ExitObserver {
    /// Wait for the process to exit, killing it on request or when the
    /// engine handle is dropped.
    async fn watch(self, mut child: Child, kill: oneshot::Receiver<()>) -> Option<ExitStatus> {
        let exited = tokio::select! {
            status = child.wait() => Some(status),
            _ = kill => None,
        };
        let status = match exited {
            Some(status) => status,
            None => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!("Failed to kill {}: {}", self.command, e);
                }
                child.wait().await
            }
        };
        let status = match status {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::error!("Failed to wait for {} ({}): {}", self.name, self.command, e);
                None
            }
        };
        let code = status.map_or_else(|| "unknown status".to_string(), |s| s.to_string());

        if self.running.swap(false, Ordering::SeqCst) {
            tracing::warn!(
                "{} UCI engine launched with command {} exited unexpectedly with {}",
                self.name,
                self.command,
                code
            );
            self.teardown.close().await;
            self.drain.stop();
        } else {
            tracing::info!(
                "{} UCI engine launched with command {} exited with {}",
                self.name,
                self.command,
                code
            );
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_command_line() {
        let config = EngineConfig::new("/usr/bin/stockfish")
            .arg("--bench")
            .args(["-t", "2"]);
        assert_eq!(config.command_line(), "/usr/bin/stockfish --bench -t 2");
        assert_eq!(config.close_timeout, DEFAULT_CLOSE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_launch_failure() {
        let result = UciEngine::launch(EngineConfig::new("/nonexistent/uci-engine")).await;
        assert!(matches!(result, Err(EngineError::Launch { .. })));
    }
}
