use thiserror::Error;

use crate::record::{Category, Handle};

#[derive(Error, Debug)]
pub enum SupertoolError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    /// Domain errors raised by the engine itself; their text is shown as is.
    #[error("{0}")]
    Engine(String),
    #[error("SyntaxError: {message}")]
    Syntax {
        message: String,
        line: Option<usize>,
        col: Option<usize>,
    },
    #[error("NameError: name '{0}' is not defined")]
    Name(String),
    #[error("AttributeError: '{type_name}' object has no attribute '{attribute}'")]
    Attribute { type_name: String, attribute: String },
    #[error("TypeError: {0}")]
    Type(String),
    /// Any other runtime failure inside a script, already prefixed with its kind.
    #[error("{0}")]
    Script(String),
    /// A value raised by the script with `raise`.
    #[error("{0}")]
    Raised(String),
    #[error("{category} record with handle {handle} not found")]
    NotFound { category: Category, handle: Handle },
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("JSON error: {0}")]
    Json(String),
}

pub type Result<T> = std::result::Result<T, SupertoolError>;

impl SupertoolError {
    pub fn syntax(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            line: Some(line),
            col: Some(col),
        }
    }

    pub fn attribute(type_name: &str, attribute: &str) -> Self {
        Self::Attribute {
            type_name: type_name.to_string(),
            attribute: attribute.to_string(),
        }
    }

    /// The message as shown to a user: syntax errors keep their last three
    /// lines, name errors their last line, everything else is shown whole.
    pub fn diagnostic(&self) -> String {
        let text = self.to_string();
        let lines: Vec<&str> = text.lines().collect();
        match self {
            Self::Syntax { .. } => lines[lines.len().saturating_sub(3)..].join("\n"),
            Self::Name(_) => lines.last().map(|l| l.to_string()).unwrap_or_default(),
            _ => text,
        }
    }
}

impl From<rusqlite::Error> for SupertoolError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}

impl From<config::ConfigError> for SupertoolError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for SupertoolError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e.to_string())
    }
}

impl From<std::io::Error> for SupertoolError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for SupertoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
