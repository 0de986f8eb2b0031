use ulid::Ulid;

use crate::model::Ms;

/// Coarse classification used by the wire layer to pick an SQLSTATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    Unavailable,
    Conflict,
    Upstream,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(String),
    AlreadyExists(String),
    Validation(String),
    InvalidSpan { start: Ms, end: Ms },
    /// Requested unit is soft-removed or busy for the requested dates.
    Unavailable(String),
    /// Auto-assignment found every unit of the vehicle type busy.
    NoFreeUnit(Ulid),
    AlreadyAssigned { reservation_id: Ulid, plate: String },
    Conflict(String),
    LimitExceeded(&'static str),
    Upstream(String),
    WalError(String),
}

impl EngineError {
    pub fn not_found(what: &str, id: impl std::fmt::Display) -> Self {
        EngineError::NotFound(format!("{what} {id}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Validation(_)
            | EngineError::InvalidSpan { .. }
            | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::Unavailable(_) | EngineError::NoFreeUnit(_) => ErrorKind::Unavailable,
            EngineError::AlreadyExists(_)
            | EngineError::AlreadyAssigned { .. }
            | EngineError::Conflict(_) => ErrorKind::Conflict,
            EngineError::Upstream(_) | EngineError::WalError(_) => ErrorKind::Upstream,
        }
    }

    /// Message safe to show a client. Internal failures are generic unless
    /// diagnostics are switched on.
    pub fn public_message(&self, diagnostics: bool) -> String {
        match self {
            EngineError::WalError(_) if !diagnostics => "storage failure".into(),
            EngineError::Upstream(_) if !diagnostics => "payment gateway failure".into(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(what) => write!(f, "not found: {what}"),
            EngineError::AlreadyExists(what) => write!(f, "already exists: {what}"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::InvalidSpan { start, end } => {
                write!(f, "invalid date range: start {start} is after end {end}")
            }
            EngineError::Unavailable(plate) => {
                write!(f, "unit {plate} is not available for the requested dates")
            }
            EngineError::NoFreeUnit(id) => {
                write!(f, "no free unit of vehicle type {id} for the requested dates")
            }
            EngineError::AlreadyAssigned {
                reservation_id,
                plate,
            } => write!(f, "reservation {reservation_id} is already assigned to {plate}"),
            EngineError::Conflict(msg) => write!(f, "conflict: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Upstream(msg) => write!(f, "upstream error: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
