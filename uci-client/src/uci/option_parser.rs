//! Grammar of the `option` lines an engine sends during the handshake:
//!
//! `option name <id> type <t> [default <x>] [min <x>] [max <x>] [var <x>]*`
//!
//! Names and string values may contain spaces, so every field runs until the
//! next keyword.

use super::ParseError;
use crate::options::{EngineOption, OptionKind};

const EMPTY_MARKER: &str = "<empty>";

#[derive(Default)]
struct RawOption {
    name: Vec<String>,
    kind: Option<String>,
    default: Option<Vec<String>>,
    min: Option<String>,
    max: Option<String>,
    vars: Vec<Vec<String>>,
}

/// Parse one handshake line.
///
/// Returns `Ok(None)` for lines that are not option declarations at all.
pub fn parse_option(line: &str) -> Result<Option<EngineOption>, ParseError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.first() != Some(&"option") {
        return Ok(None);
    }

    let raw = collect_fields(&tokens[1..]);
    if raw.name.is_empty() {
        return Err(ParseError::MissingOptionName(line.to_string()));
    }
    let name = raw.name.join(" ");
    let kind = raw
        .kind
        .as_deref()
        .ok_or_else(|| ParseError::MissingOptionType(line.to_string()))?;
    let default = raw.default.as_ref().map(|words| text_value(words));

    let kind = match kind {
        "check" => {
            let default = match default.as_deref() {
                None => false,
                Some(d) if d.eq_ignore_ascii_case("true") => true,
                Some(d) if d.eq_ignore_ascii_case("false") => false,
                Some(_) => return Err(ParseError::InvalidDefault(line.to_string())),
            };
            OptionKind::Check {
                default,
                value: default,
            }
        }
        "spin" => {
            let min = parse_number(raw.min.as_deref(), i64::MIN, line)?;
            let max = parse_number(raw.max.as_deref(), i64::MAX, line)?;
            if min > max {
                return Err(ParseError::InvalidDefault(line.to_string()));
            }
            let default = parse_number(default.as_deref(), min.max(0i64.min(max)), line)?;
            if default < min || default > max {
                return Err(ParseError::InvalidDefault(line.to_string()));
            }
            OptionKind::Spin {
                default,
                min,
                max,
                value: default,
            }
        }
        "combo" => {
            let choices: Vec<String> = raw.vars.iter().map(|v| text_value(v)).collect();
            let default = default
                .or_else(|| choices.first().cloned())
                .unwrap_or_default();
            OptionKind::Combo {
                value: default.clone(),
                default,
                choices,
            }
        }
        "button" => OptionKind::Button,
        "string" => {
            let default = default.unwrap_or_default();
            OptionKind::String {
                value: default.clone(),
                default,
            }
        }
        other => {
            return Err(ParseError::UnknownOptionType {
                line: line.to_string(),
                kind: other.to_string(),
            })
        }
    };

    Ok(Some(EngineOption::new(name, kind)))
}

fn collect_fields(tokens: &[&str]) -> RawOption {
    enum Field {
        None,
        Name,
        Default,
        Var,
    }

    let mut raw = RawOption::default();
    let mut field = Field::None;
    let mut i = 0;

    while i < tokens.len() {
        match tokens[i] {
            "name" if raw.name.is_empty() => field = Field::Name,
            "type" => {
                i += 1;
                raw.kind = tokens.get(i).map(|s| s.to_string());
                field = Field::None;
            }
            "default" => {
                raw.default = Some(Vec::new());
                field = Field::Default;
            }
            "min" => {
                i += 1;
                raw.min = tokens.get(i).map(|s| s.to_string());
                field = Field::None;
            }
            "max" => {
                i += 1;
                raw.max = tokens.get(i).map(|s| s.to_string());
                field = Field::None;
            }
            "var" => {
                raw.vars.push(Vec::new());
                field = Field::Var;
            }
            word => match field {
                Field::Name => raw.name.push(word.to_string()),
                Field::Default => {
                    if let Some(default) = raw.default.as_mut() {
                        default.push(word.to_string());
                    }
                }
                Field::Var => {
                    if let Some(var) = raw.vars.last_mut() {
                        var.push(word.to_string());
                    }
                }
                Field::None => {}
            },
        }
        i += 1;
    }

    raw
}

fn text_value(words: &[String]) -> String {
    let text = words.join(" ");
    if text == EMPTY_MARKER {
        String::new()
    } else {
        text
    }
}

fn parse_number(token: Option<&str>, fallback: i64, line: &str) -> Result<i64, ParseError> {
    match token {
        None => Ok(fallback),
        Some(t) => t.parse().map_err(|_| ParseError::InvalidNumber {
            line: line.to_string(),
            token: t.to_string(),
        }),
    }
}
