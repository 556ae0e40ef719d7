//! Line-oriented request/response channel over the engine's stdin/stdout.
//!
//! A request writes one command line and then reads reply lines until a
//! caller-supplied predicate accepts one. The read can be aborted from
//! another task through [`Teardown`]: the pending read then resolves to
//! "no answer" instead of an error.

use std::fmt;
use std::io;
use std::sync::{Arc, OnceLock};

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::sync::{watch, Mutex};

use crate::error::{EngineResult, PreconditionError};

const UNKNOWN_NAME: &str = "?";

/// Display name of the engine, learned during the handshake and shared with
/// every task that logs on the engine's behalf.
#[derive(Clone, Default)]
pub struct EngineName(Arc<OnceLock<String>>);

impl EngineName {
    /// Only the first name sticks.
    pub fn set(&self, name: impl Into<String>) {
        let _ = self.0.set(name.into());
    }

    pub fn get(&self) -> &str {
        self.0.get().map(String::as_str).unwrap_or(UNKNOWN_NAME)
    }
}

impl fmt::Display for EngineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.get())
    }
}

impl fmt::Debug for EngineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineName({:?})", self.get())
    }
}

/// One-way "stopped" flag that tasks can also wait on.
#[derive(Clone, Debug)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self(Arc::new(tx))
    }

    /// Raise the flag. Returns true for the call that actually raised it.
    pub fn stop(&self) -> bool {
        !self.0.send_replace(true)
    }

    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once the flag is raised.
    pub async fn stopped(&self) {
        let mut rx = self.0.subscribe();
        // The sender outlives this future, so the only way out is the flag.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Write side of the channel.
///
/// Cloned into everything that sends commands (the request path, the option
/// listener, stop handles) so that all writes go through the same lock and
/// never interleave.
pub struct LineWriter<W> {
    inner: Arc<Mutex<Option<W>>>,
    stop: StopSignal,
    name: EngineName,
}

impl<W> Clone for LineWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stop: self.stop.clone(),
            name: self.name.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> LineWriter<W> {
    fn new(writer: W, stop: StopSignal, name: EngineName) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(writer))),
            stop,
            name,
        }
    }

    /// Write one line, append the terminator and flush.
    pub async fn send(&self, line: &str) -> EngineResult<()> {
        let mut guard = self.inner.lock().await;
        let writer = guard.as_mut().ok_or(PreconditionError::Closed)?;
        tracing::trace!("UCI >> [{}] {}", self.name, line);

        if let Err(e) = write_line(writer, line).await {
            if self.stop.is_stopped() {
                return Err(PreconditionError::Closed.into());
            }
            if e.kind() == io::ErrorKind::BrokenPipe {
                // The engine closed its input: it is gone.
                self.stop.stop();
                tracing::debug!("{} no longer reads commands", self.name);
                return Err(PreconditionError::Closed.into());
            }
            tracing::error!(
                "Error while writing to {} (stopped: {}): {}",
                self.name,
                self.stop.is_stopped(),
                e
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// Close the stream. Later sends fail with a `Closed` precondition error.
    async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(mut writer) = guard.take() {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!("Error while closing input of {}: {}", self.name, e);
            }
        }
    }
}

async fn write_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &str) -> io::Result<()> {
    writer.write_all(format!("{}\n", line).as_bytes()).await?;
    writer.flush().await
}

/// Handle that tears a channel down from any task.
pub struct Teardown<W> {
    stop: StopSignal,
    writer: LineWriter<W>,
}

impl<W> Clone for Teardown<W> {
    fn clone(&self) -> Self {
        Self {
            stop: self.stop.clone(),
            writer: self.writer.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> Teardown<W> {
    /// Mark the channel stopped and close the write side. A pending
    /// [`LineChannel::wait_answer`] returns `Ok(None)`.
    pub async fn close(&self) {
        if self.stop.stop() {
            tracing::debug!("Tearing down channel to {}", self.writer.name);
        }
        self.writer.shutdown().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }
}

pub struct LineChannel<R, W> {
    reader: Mutex<Option<Lines<R>>>,
    writer: LineWriter<W>,
    stop: StopSignal,
    name: EngineName,
}

impl<R, W> LineChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W, name: EngineName) -> Self {
        let stop = StopSignal::new();
        Self {
            reader: Mutex::new(Some(reader.lines())),
            writer: LineWriter::new(writer, stop.clone(), name.clone()),
            stop,
            name,
        }
    }

    pub fn name(&self) -> &EngineName {
        &self.name
    }

    pub fn writer(&self) -> LineWriter<W> {
        self.writer.clone()
    }

    pub fn teardown(&self) -> Teardown<W> {
        Teardown {
            stop: self.stop.clone(),
            writer: self.writer.clone(),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub async fn send(&self, line: &str) -> EngineResult<()> {
        self.writer.send(line).await
    }

    /// Send `command` (skipped when `None` or empty), then read lines until
    /// `is_terminal` accepts one. Every other line goes to `on_other_line`.
    ///
    /// Returns `Ok(None)` when the engine's output ends or the channel is
    /// torn down before a terminal line arrives. A line that was already
    /// read when the teardown happened is still returned. The end of the
    /// engine's output stops the channel.
    pub async fn wait_answer<P, F>(
        &self,
        command: Option<&str>,
        mut is_terminal: P,
        mut on_other_line: F,
    ) -> EngineResult<Option<String>>
    where
        P: FnMut(&str) -> bool,
        F: FnMut(&str),
    {
        if let Some(command) = command.filter(|c| !c.is_empty()) {
            self.send(command).await?;
        }

        let mut reader = self.reader.lock().await;
        loop {
            // Checked on every pass so an engine that never pauses its
            // output cannot hold off a teardown.
            if self.stop.is_stopped() {
                tracing::debug!("Stopped waiting for {}", self.name);
                *reader = None;
                return Ok(None);
            }
            let Some(lines) = reader.as_mut() else {
                return Ok(None);
            };
            let next = tokio::select! {
                biased;
                line = lines.next_line() => line,
                _ = self.stop.stopped() => continue,
            };

            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => {
                    // No reply can come anymore; later requests fail fast
                    // and no `quit` is owed.
                    if self.stop.stop() {
                        tracing::debug!("{} closed its output", self.name);
                    }
                    *reader = None;
                    return Ok(None);
                }
                Err(_) if self.stop.is_stopped() => {
                    *reader = None;
                    return Ok(None);
                }
                Err(e) => {
                    tracing::error!(
                        "Error while reading from {} (stopped: {}): {}",
                        self.name,
                        self.stop.is_stopped(),
                        e
                    );
                    return Err(e.into());
                }
            };

            tracing::trace!("UCI << [{}] {}", self.name, line);
            if is_terminal(&line) {
                return Ok(Some(line));
            }
            on_other_line(&line);
        }
    }

    /// Tear the channel down and release both streams.
    pub async fn close(&self) {
        self.teardown().close().await;
        // A pending wait holds the reader and drops it itself.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{error_events, pipe};
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_answer_routes_lines() {
        let (reader, writer, mut engine) = pipe();
        let channel = LineChannel::new(reader, writer, EngineName::default());
        engine
            .reply(&["id name Demo", "option name Hash type spin", "uciok"])
            .await;

        let mut others = Vec::new();
        let answer = channel
            .wait_answer(Some("uci"), |l| l == "uciok", |l| others.push(l.to_string()))
            .await
            .unwrap();

        assert_eq!(answer.as_deref(), Some("uciok"));
        assert_eq!(others, vec!["id name Demo", "option name Hash type spin"]);
        assert_eq!(engine.expect().await.as_deref(), Some("uci"));
    }

    #[tokio::test]
    async fn test_empty_command_is_not_sent() {
        let (reader, writer, mut engine) = pipe();
        let channel = LineChannel::new(reader, writer, EngineName::default());
        engine.reply(&["readyok"]).await;

        let answer = channel
            .wait_answer(Some(""), |l| l == "readyok", |_| {})
            .await
            .unwrap();
        assert_eq!(answer.as_deref(), Some("readyok"));

        channel.send("isready").await.unwrap();
        assert_eq!(engine.expect().await.as_deref(), Some("isready"));
    }

    #[tokio::test]
    async fn test_end_of_stream_is_no_answer() {
        let (reader, writer, mut engine) = pipe();
        let channel = LineChannel::new(reader, writer, EngineName::default());
        engine.reply(&["info depth 1"]).await;
        engine.hang_up();

        let answer = tokio::time::timeout(
            Duration::from_secs(5),
            channel.wait_answer(None, |l| l.starts_with("bestmove"), |_| {}),
        )
        .await
        .expect("wait_answer hung on end of stream")
        .unwrap();
        assert_eq!(answer, None);
        assert!(channel.is_stopped());
        assert!(channel.send("quit").await.unwrap_err().is_precondition());
    }

    #[tokio::test]
    async fn test_broken_pipe_stops_channel_silently() {
        let errors = error_events();
        let (reader, writer, engine) = pipe();
        let channel = LineChannel::new(reader, writer, EngineName::default());
        engine.hang_up();

        let err = channel.send("quit").await.unwrap_err();
        assert!(err.is_precondition());
        assert!(channel.is_stopped());
        assert_eq!(errors.count(), 0);
    }

    #[tokio::test]
    async fn test_close_interrupts_endless_output() {
        let (reader, writer, engine) = pipe();
        let channel = LineChannel::new(reader, writer, EngineName::default());
        let chatter = tokio::spawn(engine.flood("info depth 30 nodes 123456 nps 987654"));
        let teardown = channel.teardown();

        let (answer, ()) = tokio::join!(
            tokio::time::timeout(
                Duration::from_secs(5),
                channel.wait_answer(None, |l| l.starts_with("bestmove"), |_| {}),
            ),
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                teardown.close().await;
            }
        );
        let answer = answer.expect("teardown did not interrupt the wait");
        assert_eq!(answer.unwrap(), None);
        chatter.abort();
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_wait_silently() {
        let errors = error_events();
        let (reader, writer, _engine) = pipe();
        let channel = Arc::new(LineChannel::new(reader, writer, EngineName::default()));

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .wait_answer(Some("go"), |l| l.starts_with("bestmove"), |_| {})
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close().await;

        let answer = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .expect("close did not unblock the pending wait")
            .unwrap()
            .unwrap();
        assert_eq!(answer, None);
        assert_eq!(errors.count(), 0);
    }

    #[tokio::test]
    async fn test_line_read_before_teardown_is_delivered() {
        let (reader, writer, mut engine) = pipe();
        let channel = Arc::new(LineChannel::new(reader, writer, EngineName::default()));

        let waiter = {
            let channel = Arc::clone(&channel);
            tokio::spawn(async move {
                channel
                    .wait_answer(None, |l| l.starts_with("bestmove"), |_| {})
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.reply(&["bestmove e2e4"]).await;
        channel.close().await;

        let answer = waiter.await.unwrap().unwrap();
        assert_eq!(answer.as_deref(), Some("bestmove e2e4"));
    }

    #[tokio::test]
    async fn test_send_after_close_is_a_precondition_error() {
        let (reader, writer, _engine) = pipe();
        let channel = LineChannel::new(reader, writer, EngineName::default());
        channel.close().await;

        let err = channel.send("isready").await.unwrap_err();
        assert!(err.is_precondition());
        assert!(channel.is_stopped());
        let answer = channel.wait_answer(None, |_| true, |_| {}).await.unwrap();
        assert_eq!(answer, None);
    }

    #[test]
    fn test_engine_name_defaults_to_unknown() {
        let name = EngineName::default();
        assert_eq!(name.to_string(), "?");
        name.set("Demo");
        name.set("Other");
        assert_eq!(name.get(), "Demo");
    }

    #[tokio::test]
    async fn test_stop_signal() {
        let stop = StopSignal::new();
        assert!(!stop.is_stopped());
        assert!(stop.stop());
        assert!(!stop.stop());
        tokio::time::timeout(Duration::from_secs(1), stop.stopped())
            .await
            .unwrap();
    }
}
