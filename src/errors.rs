#[derive(Debug)]
pub enum Errors {
    ConfigReadError(String),
    IOError(std::io::Error),
    DatabasePingError(String),
    DatabaseQueryError(String),
    ReplicationSlotCreateFailed(String),
    ReplicationSlotAdvanceFailed(String),
    PeekChangesFailed(String),
    ConnectorConnectionError(String),
    InvalidTableFilter(String),
    ChangeDecodeError(String),
    RowParseError(String),
    IndexConnectionError(String),
    IndexWriteFailed(String),
    IndexDeleteFailed(String),
    HandlerNotFound(String),
}

pub type Result<T> = std::result::Result<T, Errors>;

impl From<std::io::Error> for Errors {
    fn from(err: std::io::Error) -> Self {
        Errors::IOError(err)
    }
}

impl std::fmt::Display for Errors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Errors::ConfigReadError(msg) => write!(f, "Configuration read error: {msg}"),
            Errors::IOError(err) => write!(f, "I/O error: {err}"),
            Errors::DatabasePingError(msg) => write!(f, "Database ping error: {msg}"),
            Errors::DatabaseQueryError(msg) => write!(f, "Database query error: {msg}"),
            Errors::ReplicationSlotCreateFailed(msg) => {
                write!(f, "Failed to create replication slot: {msg}")
            }
            Errors::ReplicationSlotAdvanceFailed(msg) => {
                write!(f, "Failed to advance replication slot: {msg}")
            }
            Errors::PeekChangesFailed(msg) => write!(f, "Failed to peek changes: {msg}"),
            Errors::ConnectorConnectionError(msg) => write!(f, "Connector connection error: {msg}"),
            Errors::InvalidTableFilter(msg) => write!(f, "Invalid table filter: {msg}"),
            Errors::ChangeDecodeError(msg) => write!(f, "Change decode error: {msg}"),
            Errors::RowParseError(msg) => write!(f, "Row parse error: {msg}"),
            Errors::IndexConnectionError(msg) => write!(f, "Search index connection error: {msg}"),
            Errors::IndexWriteFailed(msg) => write!(f, "Search index write failed: {msg}"),
            Errors::IndexDeleteFailed(msg) => write!(f, "Search index delete failed: {msg}"),
            Errors::HandlerNotFound(msg) => write!(f, "No table handler registered: {msg}"),
        }
    }
}

impl std::error::Error for Errors {}

const CONNECTION_ERROR_MARKERS: &[&str] = &[
    "refused",
    "reset",
    "timeout",
    "timed out",
    "socket",
    "broken pipe",
    "connection closed",
    "i/o",
];

impl Errors {
    /// Connection-class errors send the supervisor back through reconnect and backoff.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Errors::ConnectorConnectionError(_) | Errors::IOError(_) => true,
            _ => {
                let message = self.to_string().to_lowercase();
                CONNECTION_ERROR_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
            }
        }
    }
}
