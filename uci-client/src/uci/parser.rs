use std::iter::Peekable;
use std::str::{FromStr, SplitWhitespace};

use super::ParseError;
use crate::{EngineInfo, Score, ScoreBound};

/// A line the engine sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum UciMessage {
    IdName(String),
    IdAuthor(String),
    UciOk,
    ReadyOk,
    /// `bestmove (none)` and `bestmove 0000` carry no move.
    BestMove {
        mv: Option<String>,
        ponder: Option<String>,
    },
    Info(EngineInfo),
}

type Tokens<'a> = Peekable<SplitWhitespace<'a>>;

pub fn parse_uci_message(line: &str) -> Result<UciMessage, ParseError> {
    let mut tokens = line.split_whitespace().peekable();
    let malformed = || ParseError::MalformedMessage(line.to_string());

    match tokens.next() {
        Some("uciok") => Ok(UciMessage::UciOk),
        Some("readyok") => Ok(UciMessage::ReadyOk),
        Some("id") => {
            let field = tokens.next().ok_or_else(malformed)?;
            let value = rest_of_line(&mut tokens);
            match field {
                "name" => Ok(UciMessage::IdName(value)),
                "author" => Ok(UciMessage::IdAuthor(value)),
                _ => Err(malformed()),
            }
        }
        Some("bestmove") => {
            let mv = tokens.next().ok_or_else(malformed)?;
            let ponder = match tokens.next() {
                Some("ponder") => tokens.next().and_then(wire_move),
                _ => None,
            };
            Ok(UciMessage::BestMove {
                mv: wire_move(mv),
                ponder,
            })
        }
        Some("info") => Ok(UciMessage::Info(parse_info(tokens))),
        _ => Err(ParseError::UnknownMessage(line.to_string())),
    }
}

fn wire_move(token: &str) -> Option<String> {
    (token != "(none)" && token != "0000").then(|| token.to_string())
}

fn rest_of_line(tokens: &mut Tokens<'_>) -> String {
    tokens.collect::<Vec<_>>().join(" ")
}

fn number<T: FromStr>(tokens: &mut Tokens<'_>) -> Option<T> {
    tokens.next().and_then(|t| t.parse().ok())
}

/// Unknown fields and unparsable values are skipped; engines add fields of
/// their own.
fn parse_info(mut tokens: Tokens<'_>) -> EngineInfo {
    let mut info = EngineInfo::default();
    while let Some(field) = tokens.next() {
        match field {
            "depth" => info.depth = number(&mut tokens),
            "seldepth" => info.seldepth = number(&mut tokens),
            "time" => info.time_ms = number(&mut tokens),
            "nodes" => info.nodes = number(&mut tokens),
            "nps" => info.nps = number(&mut tokens),
            "multipv" => info.multipv = number(&mut tokens),
            "hashfull" => info.hashfull = number(&mut tokens),
            "currmove" => info.currmove = tokens.next().map(str::to_string),
            "score" => {
                info.score = match tokens.next() {
                    Some("cp") => number(&mut tokens).map(Score::Centipawns),
                    Some("mate") => number(&mut tokens).map(Score::Mate),
                    _ => None,
                };
                info.bound = match tokens.peek() {
                    Some(&"lowerbound") => Some(ScoreBound::Lower),
                    Some(&"upperbound") => Some(ScoreBound::Upper),
                    _ => None,
                };
                if info.bound.is_some() {
                    tokens.next();
                }
            }
            "pv" => {
                while let Some(mv) = tokens.next_if(|t| !is_info_field(t)) {
                    info.pv.push(mv.to_string());
                }
            }
            "string" => {
                info.string = Some(rest_of_line(&mut tokens));
            }
            _ => {}
        }
    }
    info
}

fn is_info_field(token: &str) -> bool {
    matches!(
        token,
        "depth"
            | "seldepth"
            | "time"
            | "nodes"
            | "pv"
            | "multipv"
            | "score"
            | "currmove"
            | "currmovenumber"
            | "hashfull"
            | "nps"
            | "tbhits"
            | "sbhits"
            | "cpuload"
            | "string"
            | "refutation"
            | "currline"
    )
}
