use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Json(serde_json::Error),
    Csv(csv::Error),
    MalformedRaw(String),
    BadMetadata(String),
    ShapeMismatch {
        variable: String,
        expected: usize,
        actual: usize,
    },
    MergeConflict {
        variable: String,
        timestamp: String,
    },
    InvalidTimeAxis(String),
    MissingConfig(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Json(err) => write!(f, "json error: {err}"),
            Error::Csv(err) => write!(f, "csv error: {err}"),
            Error::MalformedRaw(msg) => write!(f, "malformed raw file: {msg}"),
            Error::BadMetadata(msg) => write!(f, "bad metadata: {msg}"),
            Error::ShapeMismatch {
                variable,
                expected,
                actual,
            } => write!(
                f,
                "variable '{variable}' has {actual} values, time axis has {expected}"
            ),
            Error::MergeConflict {
                variable,
                timestamp,
            } => write!(
                f,
                "conflicting values for '{variable}' at {timestamp}"
            ),
            Error::InvalidTimeAxis(msg) => write!(f, "invalid time axis: {msg}"),
            Error::MissingConfig(key) => write!(f, "missing config entry: {key}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Json(err) => Some(err),
            Error::Csv(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Json(value)
    }
}

impl From<csv::Error> for Error {
    fn from(value: csv::Error) -> Self {
        Error::Csv(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
