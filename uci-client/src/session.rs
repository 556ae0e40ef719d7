//! UCI protocol state machine.
//!
//! Sequences the handshake, option negotiation, game reset, position update
//! and search requests over a [`LineChannel`]. Operations are strictly one at
//! a time; only [`StopHandle::stop`] may be issued while a search is pending.
//! A search whose `go` was dropped is stopped and its reply discarded before
//! the next request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::channel::{EngineName, LineChannel, LineWriter, Teardown};
use crate::error::{EngineError, EngineResult, PreconditionError};
use crate::options::{EngineOption, OptionChange, OptionListener, OptionRegistry, OptionValue};
use crate::uci::{
    is_best_move, parse_option, parse_uci_message, GoReply, GoReplyAssembler, UciMessage,
};
use crate::{GoParameters, Variant};

const UCI: &str = "uci";
const UCI_NEW_GAME: &str = "ucinewgame";
const IS_READY: &str = "isready";
const STOP: &str = "stop";
const QUIT: &str = "quit";
const CHESS960_OPTION: &str = "UCI_Chess960";
// Pondering is not supported, so the engine's Ponder option stays hidden.
const PONDER_OPTION: &str = "Ponder";

#[derive(Debug, Default)]
struct SessionFlags {
    position_set: AtomicBool,
    /// Set once `go` is on the wire, cleared when its `bestmove` was read.
    /// Still set on entry to a request means the `go` future was dropped
    /// and its `bestmove` is owed.
    search_pending: AtomicBool,
}

/// Forwards option changes to the engine.
struct SetOptionSender<W> {
    writer: LineWriter<W>,
}

#[async_trait]
impl<W> OptionListener for SetOptionSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn option_changed(&self, change: &OptionChange) -> EngineResult<()> {
        self.writer.send(&change.to_command()).await
    }
}

pub struct Session<R, W> {
    channel: LineChannel<R, W>,
    options: Option<OptionRegistry>,
    chess960_supported: bool,
    white_to_move: bool,
    flags: Arc<SessionFlags>,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, name: EngineName) -> Self {
        Self {
            channel: LineChannel::new(reader, writer, name),
            options: None,
            chess960_supported: false,
            white_to_move: true,
            flags: Arc::default(),
        }
    }

    /// Engine name from the handshake, `?` until known.
    pub fn name(&self) -> &str {
        self.channel.name().get()
    }

    pub fn teardown(&self) -> Teardown<W> {
        self.channel.teardown()
    }

    pub fn is_initialized(&self) -> bool {
        self.options.is_some()
    }

    fn check_init(&self) -> Result<&OptionRegistry, PreconditionError> {
        if self.channel.is_stopped() {
            return Err(PreconditionError::Closed);
        }
        self.options.as_ref().ok_or(PreconditionError::NotInitialized)
    }

    /// Checks the session is usable and settles an abandoned search first.
    async fn ready_for_request(&self) -> EngineResult<()> {
        self.check_init()?;
        self.settle_abandoned_search().await
    }

    /// Ask the engine to stop the search a dropped `go` left running and
    /// discard its `bestmove`.
    async fn settle_abandoned_search(&self) -> EngineResult<()> {
        if !self.flags.search_pending.load(Ordering::SeqCst) {
            return Ok(());
        }
        tracing::debug!("Discarding the reply of an abandoned search on {}", self.name());
        let answer = self
            .channel
            .wait_answer(Some(STOP), is_best_move, |_| {})
            .await;
        self.flags.search_pending.store(false, Ordering::SeqCst);
        answer.map(|_| ())
    }

    /// Perform the handshake: learn the engine name and its options.
    pub async fn init(&mut self) -> EngineResult<()> {
        if self.channel.is_stopped() {
            return Err(PreconditionError::Closed.into());
        }
        let mut name = None;
        let mut option_lines = Vec::new();
        let answer = self
            .channel
            .wait_answer(
                Some(UCI),
                |line| matches!(parse_uci_message(line), Ok(UciMessage::UciOk)),
                |line| match parse_uci_message(line) {
                    Ok(UciMessage::IdName(n)) => name = Some(n),
                    Ok(UciMessage::IdAuthor(author)) => {
                        tracing::debug!("Engine author: {}", author)
                    }
                    _ => option_lines.push(line.to_string()),
                },
            )
            .await?;
        if answer.is_none() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "engine output ended before the handshake completed",
            )
            .into());
        }
        if let Some(name) = name {
            self.channel.name().set(name);
        }

        let mut options = Vec::new();
        for line in &option_lines {
            let Some(option) = parse_option(line)? else {
                continue;
            };
            if option.name().eq_ignore_ascii_case(CHESS960_OPTION) {
                self.chess960_supported = true;
            } else if !option.name().eq_ignore_ascii_case(PONDER_OPTION) {
                options.push(option);
            }
        }
        tracing::info!(
            "{} initialized with {} options (chess960: {})",
            self.name(),
            options.len(),
            self.chess960_supported
        );

        let mut registry = OptionRegistry::new(options);
        registry.subscribe(Box::new(SetOptionSender {
            writer: self.channel.writer(),
        }));
        self.options = Some(registry);
        Ok(())
    }

    pub fn options(&self) -> EngineResult<&[EngineOption]> {
        Ok(self.check_init()?.options())
    }

    /// Change an option; the engine is told right away. `None` presses a
    /// button.
    pub async fn set_option(&mut self, name: &str, value: Option<OptionValue>) -> EngineResult<()> {
        self.ready_for_request().await?;
        let registry = self
            .options
            .as_mut()
            .ok_or(PreconditionError::NotInitialized)?;
        registry.set_value(name, value).await
    }

    pub fn is_supported(&self, variant: Variant) -> EngineResult<bool> {
        self.check_init()?;
        Ok(match variant {
            Variant::Standard => true,
            Variant::Chess960 => self.chess960_supported,
        })
    }

    /// Start a new game. Returns false without talking to the engine if the
    /// variant is unsupported, or if the engine's output ended before it
    /// acknowledged readiness.
    pub async fn new_game(&mut self, variant: Variant) -> EngineResult<bool> {
        self.ready_for_request().await?;
        self.flags.position_set.store(false, Ordering::SeqCst);
        if !self.is_supported(variant)? {
            return Ok(false);
        }
        self.channel.send(UCI_NEW_GAME).await?;
        if self.chess960_supported {
            let command = format!(
                "setoption name {} value {}",
                CHESS960_OPTION,
                variant == Variant::Chess960
            );
            self.channel.send(&command).await?;
        }
        let answer = self
            .channel
            .wait_answer(
                Some(IS_READY),
                |line| matches!(parse_uci_message(line), Ok(UciMessage::ReadyOk)),
                |_| {},
            )
            .await?;
        Ok(answer.is_some())
    }

    /// Send the position. No reply is expected.
    ///
    /// The FEN may not contain line breaks and every move must be a single
    /// token, otherwise nothing is sent.
    pub async fn set_position<S: AsRef<str>>(
        &mut self,
        fen: Option<&str>,
        moves: &[S],
    ) -> EngineResult<()> {
        self.ready_for_request().await?;
        if let Some(fen) = fen.filter(|f| f.contains(|c: char| c == '\r' || c == '\n')) {
            return Err(EngineError::InvalidPosition(format!(
                "line break in FEN {:?}",
                fen
            )));
        }
        if let Some(mv) = moves
            .iter()
            .map(AsRef::as_ref)
            .find(|m| m.is_empty() || m.contains(char::is_whitespace))
        {
            return Err(EngineError::InvalidPosition(format!("invalid move {:?}", mv)));
        }
        self.white_to_move = side_to_move(fen, moves.len());

        let mut command = match fen {
            None => "position startpos".to_string(),
            Some(fen) => format!("position fen {}", fen),
        };
        if !moves.is_empty() {
            command.push_str(" moves");
            for mv in moves {
                command.push(' ');
                command.push_str(mv.as_ref());
            }
        }
        self.channel.send(&command).await?;
        self.flags.position_set.store(true, Ordering::SeqCst);
        tracing::debug!(
            "Position set ({} moves, {} to move)",
            moves.len(),
            if self.white_to_move { "white" } else { "black" }
        );
        Ok(())
    }

    /// Start a search and wait for the best move.
    ///
    /// Returns `Ok(None)` if the engine's output ended or the session was
    /// torn down before the `bestmove` line arrived.
    pub async fn go(&mut self, params: &GoParameters) -> EngineResult<Option<GoReply>> {
        self.check_init()?;
        if !self.flags.position_set.load(Ordering::SeqCst) {
            return Err(PreconditionError::NoPosition.into());
        }
        self.settle_abandoned_search().await?;

        self.channel
            .send(&params.to_command(self.white_to_move))
            .await?;
        self.flags.search_pending.store(true, Ordering::SeqCst);
        let mut assembler = GoReplyAssembler::default();
        let answer = self
            .channel
            .wait_answer(None, is_best_move, |line| assembler.push_line(line))
            .await;
        self.flags.search_pending.store(false, Ordering::SeqCst);

        Ok(answer?.map(|line| assembler.finish(&line)))
    }

    /// Handle for stopping a pending search from another task.
    pub fn stop_handle(&self) -> StopHandle<W> {
        StopHandle {
            writer: self.channel.writer(),
            flags: Arc::clone(&self.flags),
        }
    }

    /// Ask the engine to stop searching. The pending `go` receives the
    /// resulting `bestmove`.
    pub async fn stop(&self) -> EngineResult<()> {
        self.check_init()?;
        self.stop_handle().stop().await
    }

    /// Send `quit` and release the streams. `quit` is skipped when the
    /// engine is already gone.
    pub async fn close(&mut self) -> EngineResult<()> {
        let sent = if self.channel.is_stopped() {
            Ok(())
        } else {
            match self.channel.send(QUIT).await {
                Err(EngineError::Precondition(PreconditionError::Closed)) => Ok(()),
                other => other,
            }
        };
        self.channel.close().await;
        sent
    }
}

/// Cloneable handle sending `stop` through the session's writer.
pub struct StopHandle<W> {
    writer: LineWriter<W>,
    flags: Arc<SessionFlags>,
}

impl<W> Clone for StopHandle<W> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
            flags: Arc::clone(&self.flags),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> StopHandle<W> {
    pub async fn stop(&self) -> EngineResult<()> {
        if !self.flags.position_set.load(Ordering::SeqCst) {
            return Err(EngineError::Precondition(PreconditionError::NoPosition));
        }
        self.writer.send(STOP).await
    }
}

/// White moves first from the start position; otherwise the FEN's second
/// field decides. Every move played since flips the side.
fn side_to_move(fen: Option<&str>, move_count: usize) -> bool {
    let white = match fen {
        None => true,
        Some(fen) => fen.split_whitespace().nth(1) == Some("w"),
    };
    white ^ (move_count % 2 != 0)
}
