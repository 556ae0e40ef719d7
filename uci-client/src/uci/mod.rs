pub mod option_parser;
pub mod parser;
pub mod reply;

pub use option_parser::parse_option;
pub use parser::{parse_uci_message, UciMessage};
pub use reply::{is_best_move, GoReply, GoReplyAssembler};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed UCI message: {0}")]
    MalformedMessage(String),
    #[error("Unknown UCI message: {0}")]
    UnknownMessage(String),
    #[error("option has no name: {0}")]
    MissingOptionName(String),
    #[error("option has no type: {0}")]
    MissingOptionType(String),
    #[error("unknown option type '{kind}' in: {line}")]
    UnknownOptionType { line: String, kind: String },
    #[error("invalid number '{token}' in: {line}")]
    InvalidNumber { line: String, token: String },
    #[error("invalid default value in: {0}")]
    InvalidDefault(String),
}
