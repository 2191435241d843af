use serde::{Deserialize, Serialize};
use thiserror::Error;

/// XA return/error codes as defined by the XA specification.
pub mod xa_code {
    pub const XA_OK: i32 = 0;
    pub const XA_RDONLY: i32 = 3;
    pub const XAER_ASYNC: i32 = -2;
    pub const XAER_RMERR: i32 = -3;
    pub const XAER_NOTA: i32 = -4;
    pub const XAER_INVAL: i32 = -5;
    pub const XAER_PROTO: i32 = -6;
    pub const XAER_RMFAIL: i32 = -7;
    pub const XAER_DUPID: i32 = -8;
    pub const XAER_OUTSIDE: i32 = -9;
}

/// Structured SQL error record carried across the wire.
///
/// Vendor code and SQL state are passed through from the backend driver
/// untouched; the cause chain lists nested error messages outermost-first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlErrorInfo {
    pub vendor_code: i32,
    pub sql_state: String,
    pub message: String,
    pub cause_chain: Vec<String>,
}

impl SqlErrorInfo {
    pub fn new(vendor_code: i32, sql_state: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            vendor_code,
            sql_state: sql_state.into(),
            message: message.into(),
            cause_chain: Vec::new(),
        }
    }

    /// SQL state class `08` marks a connection fault; pools evict on it.
    pub fn is_connection_fault(&self) -> bool {
        self.sql_state.starts_with("08")
    }
}

impl std::fmt::Display for SqlErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] vendor={}: {}",
            self.sql_state, self.vendor_code, self.message
        )
    }
}

#[derive(Error, Debug)]
pub enum OjpError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Pool timeout after {0} ms")]
    PoolTimeout(u64),

    #[error("Pool is closed")]
    PoolClosed,

    #[error("No pool provider available for kind {0}")]
    NoProviderAvailable(String),

    #[error("Backend error: {0}")]
    Backend(SqlErrorInfo),

    #[error("XA protocol error {code}: {message}")]
    XaProtocol { code: i32, message: String },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Circuit breaker open for {0}")]
    CircuitBreakerOpen(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Cluster draining, new sessions refused")]
    Draining,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl OjpError {
    pub fn xa(code: i32, message: impl Into<String>) -> Self {
        OjpError::XaProtocol {
            code,
            message: message.into(),
        }
    }

    pub fn backend(vendor_code: i32, sql_state: &str, message: impl Into<String>) -> Self {
        OjpError::Backend(SqlErrorInfo::new(vendor_code, sql_state, message))
    }

    /// Render this error as the SQL error record sent to clients.
    ///
    /// Internal errors are deliberately reported as a generic backend failure;
    /// the full cause is logged server-side only.
    pub fn to_sql_error(&self) -> SqlErrorInfo {
        match self {
            OjpError::Backend(info) => info.clone(),
            OjpError::Config(msg) => SqlErrorInfo::new(0, "HY000", msg.clone()),
            OjpError::PoolTimeout(ms) => SqlErrorInfo::new(
                0,
                "08001",
                format!("connection acquisition timed out after {} ms", ms),
            ),
            OjpError::PoolClosed => SqlErrorInfo::new(0, "08003", "pool is closed".to_string()),
            OjpError::XaProtocol { code, message } => {
                SqlErrorInfo::new(*code, "XA000", message.clone())
            }
            OjpError::SessionNotFound(uuid) => {
                SqlErrorInfo::new(0, "08003", format!("unknown session {}", uuid))
            }
            OjpError::CircuitBreakerOpen(hash) => SqlErrorInfo::new(
                0,
                "08004",
                format!("circuit breaker open for backend {}", hash),
            ),
            OjpError::Draining => {
                SqlErrorInfo::new(0, "08004", "server is draining".to_string())
            }
            other => SqlErrorInfo::new(0, "HY000", format!("server error: {}", other)),
        }
    }

    /// Whether the client may retry the operation against another node.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OjpError::PoolTimeout(_) | OjpError::CircuitBreakerOpen(_) | OjpError::Draining
        )
    }
}

pub type Result<T> = std::result::Result<T, OjpError>;
