use std::path::PathBuf;

use thiserror::Error;

pub type PublishResult<T> = std::result::Result<T, PublishError>;

#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParseErrorKind {
    #[error("Expected {expected}, found {found}")]
    UnexpectedToken { expected: String, found: String },
    #[error("Unexpected EOF{expected_what}")]
    UnexpectedEOF {
        /// Describes what was expected, e.g., " (expected '}}')"
        expected_what: String,
    },
    #[error("Invalid identifier starting with '{at_char}'")]
    InvalidIdentifier { at_char: String },
    #[error("Unknown tag '{keyword}'")]
    UnknownKeyword { keyword: String },
    #[error("Expected {description}")]
    Expected { description: String },
    #[error("Parser error: {0}")]
    Message(String),
}

impl ParseErrorKind {
    pub fn unexpected_eof(expected: Option<String>) -> Self {
        Self::UnexpectedEOF {
            expected_what: expected.map_or_else(String::new, |e| format!(" (expected '{}')", e)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
#[error("Parse error at line {line}, column {column}: {kind}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    #[source]
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Failed to parse template {template}: {source}")]
    Parse {
        template: String,
        #[source]
        source: ParseError,
    },

    #[error("Template CSS inheritance cycle detected: {chain}")]
    InheritanceCycle { chain: String },

    #[error("Template '{name}' is missing style.css required by @extends")]
    MissingParentStylesheet { name: String },

    #[error("Template already exists: {0}")]
    TemplateExists(String),

    #[error("Template not found: {0}")]
    MissingTemplate(String),

    #[error("Rendering error: {message}")]
    Render { message: String },

    #[error("Multiple source files resolve to the same output: {}", .output.display())]
    OutputCollision {
        output: PathBuf,
        sources: Vec<PathBuf>,
    },

    #[error("No content source: provide a markdown path or configure chapters")]
    NoContentSource,

    #[error("Invalid config {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid frontmatter: {0}")]
    Frontmatter(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    pub(crate) fn render<M: Into<String>>(message: M) -> Self {
        Self::Render {
            message: message.into(),
        }
    }
}
