use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    UnknownBackend(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::UnknownBackend(e) => write!(f, "Unknown storage backend: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

/// Failures raised while reading a status snapshot.
///
/// `MalformedTimestamp` aborts the parse. `OrphanAssignment` is only ever
/// reported alongside a successful parse: the offending line is skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    MalformedTimestamp(String),
    OrphanAssignment { common_name: String, line: usize },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::MalformedTimestamp(e) => write!(f, "Malformed timestamp: {:?}", e),
            ParseError::OrphanAssignment { common_name, line } => write!(
                f,
                "Virtual address assignment on line {} references unknown client {}",
                line, common_name
            ),
        }
    }
}

impl std::error::Error for ParseError {}

#[derive(Debug)]
pub enum StorageError {
    Unavailable(String),
    WriteFailed,
    ReadFailed,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::Unavailable(e) => write!(f, "Storage unavailable: {}", e),
            StorageError::WriteFailed => write!(f, "Storage write failed"),
            StorageError::ReadFailed => write!(f, "Storage read failed"),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug)]
pub enum ControllerError {
    InputUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse(ParseError),
    Storage(StorageError),
    Configuration(ConfigError),
    Output(std::io::Error),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::InputUnreadable { path, source } => write!(
                f,
                "{} does not exist or is unreadable: {}",
                path.display(),
                source
            ),
            ControllerError::Parse(e) => write!(f, "Parse error: {}", e),
            ControllerError::Storage(e) => write!(f, "Storage error: {}", e),
            ControllerError::Configuration(e) => write!(f, "Configuration error: {}", e),
            ControllerError::Output(e) => write!(f, "Output error: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ParseError> for ControllerError {
    fn from(err: ParseError) -> Self {
        ControllerError::Parse(err)
    }
}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::Storage(err)
    }
}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::Configuration(err)
    }
}

impl From<std::io::Error> for ControllerError {
    fn from(err: std::io::Error) -> Self {
        ControllerError::Output(err)
    }
}
