//! Engine options advertised during the handshake.
//!
//! The registry keeps the options in declaration order and notifies a single
//! listener every time a value is changed. The session registers the
//! listener that forwards the change to the engine as a `setoption` command.

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    Check,
    Spin,
    Combo,
    Button,
    String,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OptionType::Check => "check",
            OptionType::Spin => "spin",
            OptionType::Combo => "combo",
            OptionType::Button => "button",
            OptionType::String => "string",
        };
        f.write_str(s)
    }
}

/// Kind-specific constraints and current value of an option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OptionKind {
    Check {
        default: bool,
        value: bool,
    },
    Spin {
        default: i64,
        min: i64,
        max: i64,
        value: i64,
    },
    Combo {
        default: String,
        choices: Vec<String>,
        value: String,
    },
    Button,
    String {
        default: String,
        value: String,
    },
}

impl OptionKind {
    pub fn option_type(&self) -> OptionType {
        match self {
            OptionKind::Check { .. } => OptionType::Check,
            OptionKind::Spin { .. } => OptionType::Spin,
            OptionKind::Combo { .. } => OptionType::Combo,
            OptionKind::Button => OptionType::Button,
            OptionKind::String { .. } => OptionType::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineOption {
    name: String,
    #[serde(flatten)]
    kind: OptionKind,
}

impl EngineOption {
    pub fn new(name: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &OptionKind {
        &self.kind
    }

    pub fn option_type(&self) -> OptionType {
        self.kind.option_type()
    }

    /// Current value, `None` for buttons.
    pub fn value(&self) -> Option<OptionValue> {
        match &self.kind {
            OptionKind::Check { value, .. } => Some(OptionValue::Bool(*value)),
            OptionKind::Spin { value, .. } => Some(OptionValue::Int(*value)),
            OptionKind::Combo { value, .. } | OptionKind::String { value, .. } => {
                Some(OptionValue::Text(value.clone()))
            }
            OptionKind::Button => None,
        }
    }

    pub fn default_value(&self) -> Option<OptionValue> {
        match &self.kind {
            OptionKind::Check { default, .. } => Some(OptionValue::Bool(*default)),
            OptionKind::Spin { default, .. } => Some(OptionValue::Int(*default)),
            OptionKind::Combo { default, .. } | OptionKind::String { default, .. } => {
                Some(OptionValue::Text(default.clone()))
            }
            OptionKind::Button => None,
        }
    }

    /// Check `value` against the option's constraints and store it.
    ///
    /// Text is accepted for every kind and converted, so values coming
    /// from a command line can be passed through unchanged. Combo choices
    /// match case-insensitively and are stored in the engine's spelling.
    fn assign(&mut self, value: Option<OptionValue>) -> Result<Option<OptionValue>, String> {
        if let Some(OptionValue::Text(text)) = &value {
            if text.contains(|c: char| c == '\r' || c == '\n') {
                return Err(format!("line breaks are not allowed in {:?}", text));
            }
        }
        match (&mut self.kind, value) {
            (OptionKind::Button, None) => Ok(None),
            (OptionKind::Button, Some(_)) => Err("button options take no value".to_string()),
            (_, None) => Err("a value is required".to_string()),
            (OptionKind::Check { value, .. }, Some(v)) => {
                let parsed = match v {
                    OptionValue::Bool(b) => b,
                    OptionValue::Text(s) if s.eq_ignore_ascii_case("true") => true,
                    OptionValue::Text(s) if s.eq_ignore_ascii_case("false") => false,
                    other => return Err(format!("expected true or false, got '{}'", other)),
                };
                *value = parsed;
                Ok(Some(OptionValue::Bool(parsed)))
            }
            (OptionKind::Spin { min, max, value, .. }, Some(v)) => {
                let parsed = match v {
                    OptionValue::Int(i) => i,
                    OptionValue::Text(s) => s
                        .trim()
                        .parse()
                        .map_err(|_| format!("expected an integer, got '{}'", s))?,
                    OptionValue::Bool(b) => return Err(format!("expected an integer, got '{}'", b)),
                };
                if parsed < *min || parsed > *max {
                    return Err(format!("{} is outside [{}, {}]", parsed, min, max));
                }
                *value = parsed;
                Ok(Some(OptionValue::Int(parsed)))
            }
            (OptionKind::Combo { choices, value, .. }, Some(v)) => {
                let wanted = v.to_string();
                let choice = choices
                    .iter()
                    .find(|c| c.eq_ignore_ascii_case(&wanted))
                    .ok_or_else(|| format!("'{}' is not one of {:?}", wanted, choices))?;
                *value = choice.clone();
                Ok(Some(OptionValue::Text(choice.clone())))
            }
            (OptionKind::String { value, .. }, Some(v)) => {
                *value = v.to_string();
                Ok(Some(OptionValue::Text(value.clone())))
            }
        }
    }
}

/// A value change, emitted after the registry stored the new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionChange {
    pub name: String,
    pub option_type: OptionType,
    pub value: Option<OptionValue>,
}

impl OptionChange {
    /// The `setoption` command announcing this change to the engine.
    pub fn to_command(&self) -> String {
        match (&self.value, self.option_type) {
            (Some(value), t) if t != OptionType::Button => {
                format!("setoption name {} value {}", self.name, value)
            }
            _ => format!("setoption name {}", self.name),
        }
    }
}

#[async_trait]
pub trait OptionListener: Send + Sync {
    async fn option_changed(&self, change: &OptionChange) -> EngineResult<()>;
}

#[derive(Default)]
pub struct OptionRegistry {
    options: Vec<EngineOption>,
    listener: Option<Box<dyn OptionListener>>,
}

impl fmt::Debug for OptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionRegistry")
            .field("options", &self.options)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl OptionRegistry {
    pub fn new(options: Vec<EngineOption>) -> Self {
        Self {
            options,
            listener: None,
        }
    }

    /// Register the listener notified of every change, replacing any
    /// previous one.
    pub fn subscribe(&mut self, listener: Box<dyn OptionListener>) {
        self.listener = Some(listener);
    }

    pub fn options(&self) -> &[EngineOption] {
        &self.options
    }

    /// Option names are case-insensitive in UCI.
    pub fn get(&self, name: &str) -> Option<&EngineOption> {
        self.options
            .iter()
            .find(|o| o.name.eq_ignore_ascii_case(name))
    }

    /// Store a new value and notify the listener.
    ///
    /// Pass `None` to press a button. The change is emitted even when the
    /// value did not differ from the current one. The new value is kept
    /// only if the listener accepted it.
    pub async fn set_value(&mut self, name: &str, value: Option<OptionValue>) -> EngineResult<()> {
        let index = self
            .options
            .iter()
            .position(|o| o.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| EngineError::UnknownOption(name.to_string()))?;
        let mut updated = self.options[index].clone();
        let stored = updated
            .assign(value)
            .map_err(|reason| EngineError::InvalidOptionValue {
                name: updated.name.clone(),
                reason,
            })?;
        let change = OptionChange {
            name: updated.name.clone(),
            option_type: updated.option_type(),
            value: stored,
        };

        if let Some(listener) = &self.listener {
            listener.option_changed(&change).await?;
        }
        tracing::debug!("Option {} changed to {:?}", change.name, change.value);
        self.options[index] = updated;
        Ok(())
    }
}
