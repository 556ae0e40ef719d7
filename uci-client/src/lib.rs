//! Client side of the UCI protocol.
//!
//! Launches a chess engine as a child process, performs the handshake and
//! drives it through a strictly sequential request/response API while a
//! background task drains the engine's stderr and another one watches for
//! the process exiting on its own.

pub mod channel;
pub mod drain;
pub mod engine;
pub mod error;
pub mod options;
pub mod session;
pub mod uci;

#[cfg(test)]
mod testing;

pub use channel::{EngineName, LineChannel, LineWriter, StopSignal, Teardown};
pub use drain::DiagnosticDrain;
pub use engine::{EngineConfig, UciEngine};
pub use error::{EngineError, EngineResult, PreconditionError};
pub use options::{
    EngineOption, OptionChange, OptionKind, OptionListener, OptionRegistry, OptionType,
    OptionValue,
};
pub use session::{Session, StopHandle};
pub use uci::{GoReply, GoReplyAssembler, ParseError, UciMessage};

use serde::Serialize;

/// Rule set a game is played with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Variant {
    Standard,
    /// Fischer random chess, enabled through the `UCI_Chess960` option.
    Chess960,
}

/// Parameters for the "go" command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoParameters {
    pub time_control: Option<TimeControl>,
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub move_time_ms: Option<u64>, // Fixed time per move
    pub infinite: bool,            // Search until "stop"
    pub ponder: bool,
}

/// Clock state of the side to move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeControl {
    pub remaining_ms: u64,
    pub increment_ms: u64,
    /// Zero means sudden death.
    pub moves_to_go: u32,
}

impl GoParameters {
    pub fn with_time_control(time_control: TimeControl) -> Self {
        Self {
            time_control: Some(time_control),
            ..Default::default()
        }
    }

    /// Render the `go` command line. Clock tokens are prefixed with the
    /// color of the side to move.
    pub fn to_command(&self, white_to_move: bool) -> String {
        let mut command = String::from("go");
        if let Some(clock) = &self.time_control {
            let prefix = if white_to_move { 'w' } else { 'b' };
            command.push_str(&format!(" {}time {}", prefix, clock.remaining_ms));
            if clock.increment_ms != 0 {
                command.push_str(&format!(" {}inc {}", prefix, clock.increment_ms));
            }
            if clock.moves_to_go != 0 {
                command.push_str(&format!(" movestogo {}", clock.moves_to_go));
            }
        }
        if let Some(depth) = self.depth {
            command.push_str(&format!(" depth {}", depth));
        }
        if let Some(nodes) = self.nodes {
            command.push_str(&format!(" nodes {}", nodes));
        }
        if let Some(move_time) = self.move_time_ms {
            command.push_str(&format!(" movetime {}", move_time));
        }
        if self.infinite {
            command.push_str(" infinite");
        }
        if self.ponder {
            command.push_str(" ponder");
        }
        command
    }
}

/// Engine analysis information
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineInfo {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub time_ms: Option<u64>,
    pub nodes: Option<u64>,
    pub score: Option<Score>,
    pub bound: Option<ScoreBound>,
    pub pv: Vec<String>, // Principal variation
    pub multipv: Option<u32>,
    pub currmove: Option<String>,
    pub hashfull: Option<u16>,
    pub nps: Option<u64>,
    pub string: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Score {
    Centipawns(i32),
    Mate(i32), // Negative for being mated
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ScoreBound {
    Lower,
    Upper,
}
