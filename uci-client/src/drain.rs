//! Background reader forwarding the engine's stderr to the log.

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;

use crate::channel::{EngineName, StopSignal};

pub struct DiagnosticDrain {
    stop: StopSignal,
    task: Option<JoinHandle<()>>,
}

impl DiagnosticDrain {
    /// Spawn the reader task. Each line is logged at warn level, tagged with
    /// the engine name.
    pub fn spawn<R>(stream: R, name: EngineName) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let stop = StopSignal::new();
        let task = tokio::spawn(run_drain(stream, name, stop.clone()));
        Self {
            stop,
            task: Some(task),
        }
    }

    /// Signal shared with whoever may close the drain from another task.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    /// Stop reading and wait for the task to release the stream.
    pub async fn close(&mut self) {
        self.stop.stop();
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::error!("Diagnostic drain task failed: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for DiagnosticDrain {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

async fn run_drain<R>(stream: R, name: EngineName, stop: StopSignal)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        let next = tokio::select! {
            biased;
            line = lines.next_line() => line,
            _ = stop.stopped() => break,
        };
        match next {
            Ok(Some(line)) => tracing::warn!("{} wrote in his log: {}", name, line),
            Ok(None) => {
                if !stop.is_stopped() {
                    tracing::info!("{} closed its diagnostic output", name);
                    stop.stop();
                }
                break;
            }
            Err(_) if stop.is_stopped() => break,
            Err(e) => tracing::error!(
                "An error occurred while reading the diagnostic output of {} (stopped: {}): {}",
                name,
                stop.is_stopped(),
                e
            ),
        }
    }
    tracing::debug!("Diagnostic drain of {} exiting", name);
}
