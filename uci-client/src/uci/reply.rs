use serde::Serialize;

use super::parser::{parse_uci_message, UciMessage};
use crate::EngineInfo;

/// Result of a `go` request.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GoReply {
    /// `None` when the engine has no legal move to play.
    pub best_move: Option<String>,
    pub ponder_move: Option<String>,
    /// Every `info` line received during the search, in arrival order.
    pub infos: Vec<EngineInfo>,
}

impl GoReply {
    /// The latest scored info of the principal line.
    pub fn main_line(&self) -> Option<&EngineInfo> {
        self.infos
            .iter()
            .rev()
            .find(|info| info.score.is_some() && info.multipv.unwrap_or(1) == 1)
    }
}

/// Terminal predicate of a `go` request.
pub fn is_best_move(line: &str) -> bool {
    line.split_whitespace().next() == Some("bestmove")
}

/// Collects the side-channel lines of a search and builds the reply once
/// the `bestmove` line arrives.
#[derive(Debug, Default)]
pub struct GoReplyAssembler {
    infos: Vec<EngineInfo>,
}

impl GoReplyAssembler {
    pub fn push_line(&mut self, line: &str) {
        match parse_uci_message(line) {
            Ok(UciMessage::Info(info)) => self.infos.push(info),
            Ok(other) => tracing::trace!("Ignoring UCI message during search: {:?}", other),
            Err(e) => tracing::trace!("Failed to parse UCI message: {}", e),
        }
    }

    pub fn finish(self, terminal: &str) -> GoReply {
        let (best_move, ponder_move) = match parse_uci_message(terminal) {
            Ok(UciMessage::BestMove { mv, ponder }) => (mv, ponder),
            _ => {
                tracing::warn!("Unexpected search reply: {}", terminal);
                (None, None)
            }
        };
        GoReply {
            best_move,
            ponder_move,
            infos: self.infos,
        }
    }
}
