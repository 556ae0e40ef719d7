//! Test helpers: an in-memory engine on the other end of a duplex pipe and
//! a tracing layer counting error events.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{
    AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf,
};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

pub(crate) type ClientReader = BufReader<ReadHalf<DuplexStream>>;
pub(crate) type ClientWriter = WriteHalf<DuplexStream>;

/// Scripted engine side of a pipe.
pub(crate) struct FakeEngine {
    commands: Lines<BufReader<ReadHalf<DuplexStream>>>,
    output: WriteHalf<DuplexStream>,
}

impl FakeEngine {
    pub(crate) async fn reply(&mut self, lines: &[&str]) {
        for line in lines {
            self.output
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .unwrap();
        }
        self.output.flush().await.unwrap();
    }

    /// Next command sent by the client, `None` once the client closed.
    pub(crate) async fn expect(&mut self) -> Option<String> {
        self.commands.next_line().await.unwrap()
    }

    /// Every command still buffered, up to the client closing its side.
    pub(crate) async fn drain(&mut self) -> Vec<String> {
        let mut commands = Vec::new();
        while let Ok(Some(line)) = self.commands.next_line().await {
            commands.push(line);
        }
        commands
    }

    /// End the engine's output while it keeps reading commands.
    pub(crate) async fn close_output(&mut self) {
        self.output.shutdown().await.unwrap();
    }

    /// Repeat `line` until the client side goes away.
    pub(crate) async fn flood(mut self, line: &str) {
        let line = format!("{}\n", line);
        while self.output.write_all(line.as_bytes()).await.is_ok() {
            tokio::task::yield_now().await;
        }
    }

    /// Simulate the engine dying: both directions of the pipe close.
    pub(crate) fn hang_up(self) {}
}

pub(crate) fn pipe() -> (ClientReader, ClientWriter, FakeEngine) {
    let (client, engine) = tokio::io::duplex(64 * 1024);
    let (client_read, client_write) = tokio::io::split(client);
    let (engine_read, engine_write) = tokio::io::split(engine);
    let fake = FakeEngine {
        commands: BufReader::new(engine_read).lines(),
        output: engine_write,
    };
    (BufReader::new(client_read), client_write, fake)
}

struct ErrorCounter(Arc<AtomicUsize>);

impl<S: Subscriber> Layer<S> for ErrorCounter {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if *event.metadata().level() == Level::ERROR {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub(crate) struct ErrorEvents {
    count: Arc<AtomicUsize>,
    _guard: DefaultGuard,
}

impl ErrorEvents {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// Count error-level events emitted on the current thread.
pub(crate) fn error_events() -> ErrorEvents {
    let count = Arc::new(AtomicUsize::new(0));
    let subscriber = tracing_subscriber::registry().with(ErrorCounter(Arc::clone(&count)));
    ErrorEvents {
        count,
        _guard: tracing::subscriber::set_default(subscriber),
    }
}
