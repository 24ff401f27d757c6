use std::fmt;

/// One variant per error disposition the engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    InvalidInput,
    UnsatCapacity,
    UnsatLock,
    UnsatSearch,
    UnsatStrict,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_unsat(&self) -> bool {
        matches!(
            self.kind,
            EngineErrorKind::UnsatCapacity
                | EngineErrorKind::UnsatLock
                | EngineErrorKind::UnsatSearch
                | EngineErrorKind::UnsatStrict
        )
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

pub fn invalid_input(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::InvalidInput, message)
}

pub fn unsat_capacity(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::UnsatCapacity, message)
}

pub fn unsat_lock(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::UnsatLock, message)
}

pub fn unsat_search(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::UnsatSearch, message)
}

pub fn unsat_strict(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::UnsatStrict, message)
}

pub fn internal_error(message: impl Into<String>) -> EngineError {
    EngineError::new(EngineErrorKind::Internal, message)
}
