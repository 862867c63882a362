//! Error taxonomy for the ETL pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Coarse failure classification reported by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Parse,
    Schema,
    SinkWrite,
    SinkRead,
    Config,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Network => "NetworkError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Schema => "SchemaError",
            ErrorKind::SinkWrite => "SinkWriteError",
            ErrorKind::SinkRead => "SinkReadError",
            ErrorKind::Config => "ConfigError",
            ErrorKind::Io => "IoError",
        };
        f.write_str(name)
    }
}

/// Main error type for the ETL crate
#[derive(Error, Debug)]
pub enum EtlError {
    /// Timeout or transport failure, or an absent document where one is required
    #[error("Network error: {0}")]
    Network(String),

    /// Malformed JSON or a malformed timestamp string
    #[error("Parse error: {0}")]
    Parse(String),

    /// A fetched record does not fit the table schema
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Sink write error on '{table}': {message}")]
    SinkWrite { table: String, message: String },

    #[error("Sink read error: {0}")]
    SinkRead(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl EtlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EtlError::Network(_) => ErrorKind::Network,
            EtlError::Parse(_) => ErrorKind::Parse,
            EtlError::Schema(_) => ErrorKind::Schema,
            EtlError::SinkWrite { .. } => ErrorKind::SinkWrite,
            EtlError::SinkRead(_) => ErrorKind::SinkRead,
            EtlError::Config(_) => ErrorKind::Config,
            EtlError::Io { .. } => ErrorKind::Io,
        }
    }

    pub fn sink_write(table: impl Into<String>, err: impl std::fmt::Display) -> Self {
        EtlError::SinkWrite {
            table: table.into(),
            message: err.to_string(),
        }
    }

    pub fn sink_read(err: impl std::fmt::Display) -> Self {
        EtlError::SinkRead(err.to_string())
    }
}

/// Read a SQL asset (identifier query, aggregation statement) from disk
pub fn read_sql_file(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|source| EtlError::Io {
        path: path.to_path_buf(),
        source,
    })
}
