use crate::schema::StageKey;
use thiserror::Error;

/// Why a call to the generation service failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationErrorKind {
    /// The service kept signalling rate limiting after the single retry.
    RateLimited,
    /// The service answered successfully but returned no choices.
    EmptyResponse,
    /// Any other transport or protocol failure.
    Transport,
}

#[derive(Error, Debug, Clone)]
#[error("Generation failed ({kind:?}) after {attempts} attempt(s): {message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub attempts: u32,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            attempts,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// No balanced `{...}` span in the response text.
    NoJsonFound,
    /// The span was found but did not decode against the expected schema.
    Malformed,
    /// Wrong number of records for the requested shape.
    CardinalityMismatch,
    /// A numeric field fell outside its sane bounds.
    OutOfRange,
}

#[derive(Error, Debug, Clone)]
#[error("Response parse error ({kind:?}): {detail}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub detail: String,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn no_json(detail: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::NoJsonFound, detail)
    }

    pub fn cardinality(expected: usize, actual: usize, what: &str) -> Self {
        Self::new(
            ParseErrorKind::CardinalityMismatch,
            format!("expected {} {}, got {}", expected, what, actual),
        )
    }

    pub fn out_of_range(field: &str, value: i64, min: i64, max: i64) -> Self {
        Self::new(
            ParseErrorKind::OutOfRange,
            format!("{} = {} is outside [{}, {}]", field, value, min, max),
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Classified expenses sum to {actual}, expected total {expected}")]
    TotalMismatch { expected: i64, actual: i64 },

    #[error("Team code {0} was not part of the distribution request")]
    UnknownTeam(i64),

    #[error("Team code {0} appears more than once")]
    DuplicateTeam(i64),

    #[error("Required field '{0}' is empty")]
    EmptyField(&'static str),
}

/// Everything that can go wrong while understanding a generated response.
/// Both variants are absorbed by the fallback path.
#[derive(Error, Debug, Clone)]
pub enum ResponseError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl ResponseError {
    pub fn parse_kind(&self) -> Option<ParseErrorKind> {
        match self {
            ResponseError::Parse(e) => Some(e.kind),
            ResponseError::Validation(_) => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store lock poisoned")]
    Poisoned,
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Accounting equation violation for {key}: Assets ({assets}) != Liabilities + Equity ({liabilities_and_equity})")]
    AccountingEquationViolation {
        key: StageKey,
        assets: i64,
        liabilities_and_equity: i64,
    },

    #[error("Arithmetic overflow computing {field} for {key}")]
    ArithmeticOverflow { key: StageKey, field: &'static str },

    #[error("Income statement violation for {key}: {details}")]
    IncomeStatementViolation { key: StageKey, details: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimulationError>;
