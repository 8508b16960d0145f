//! Error types for monobuild.

use crate::graph::Runtime;
use crate::ids::{TargetName, UnitId};
use crate::record::{Phase, UnitState};
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by an executor (installer, deployer, or target).
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecutorError {
    message: String,
    kind: ExecutorErrorKind,
    #[source]
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorErrorKind {
    Failed,
    Cancelled,
    TimedOut,
}

impl ExecutorError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind: ExecutorErrorKind::Failed,
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            kind: ExecutorErrorKind::Failed,
            source: Some(Arc::new(source)),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            message: "cancelled".to_string(),
            kind: ExecutorErrorKind::Cancelled,
            source: None,
        }
    }

    pub fn timed_out(seconds: u64) -> Self {
        Self {
            message: format!("timed out after {} seconds", seconds),
            kind: ExecutorErrorKind::TimedOut,
            source: None,
        }
    }

    pub fn kind(&self) -> ExecutorErrorKind {
        self.kind
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ExecutorErrorKind::Cancelled
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Debug, Clone, Error)]
pub enum Error {
    // Graph errors
    #[error("Unknown unit: {0}")]
    UnknownUnit(UnitId),

    #[error("Malformed graph: {0}")]
    MalformedGraph(String),

    // Unit errors
    #[error("Unsupported runtime '{runtime}' for unit {unit} ({phase})")]
    UnsupportedRuntime {
        unit: UnitId,
        runtime: Runtime,
        phase: Phase,
    },

    #[error("Unknown target '{target}' for unit {unit}")]
    UnknownTarget { unit: UnitId, target: TargetName },

    #[error("Unit {unit} not built: dependency {dependency} failed")]
    DependencyFailed {
        unit: UnitId,
        dependency: UnitId,
        #[source]
        cause: Arc<Error>,
    },

    #[error("Unit {unit} not built: the build already failed")]
    BuildAborted {
        unit: UnitId,
        #[source]
        cause: Arc<Error>,
    },

    #[error("Target '{target}' failed for unit {unit}: {source}")]
    TargetExecution {
        unit: UnitId,
        target: TargetName,
        #[source]
        source: ExecutorError,
    },

    #[error("{phase} failed for unit {unit}: {source}")]
    PhaseFailed {
        unit: UnitId,
        phase: Phase,
        #[source]
        source: ExecutorError,
    },

    // Store errors
    #[error("Invalid state transition for unit {unit}: {from} -> {to}")]
    InvalidTransition {
        unit: UnitId,
        from: UnitState,
        to: UnitState,
    },

    // Infrastructure errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The unit this error is about, if any.
    pub fn unit(&self) -> Option<&UnitId> {
        match self {
            Error::UnknownUnit(unit)
            | Error::UnsupportedRuntime { unit, .. }
            | Error::UnknownTarget { unit, .. }
            | Error::DependencyFailed { unit, .. }
            | Error::BuildAborted { unit, .. }
            | Error::TargetExecution { unit, .. }
            | Error::PhaseFailed { unit, .. }
            | Error::InvalidTransition { unit, .. } => Some(unit),
            _ => None,
        }
    }

    /// Pipeline phase the error originated in, if it came from a unit pipeline.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::UnsupportedRuntime { phase, .. } | Error::PhaseFailed { phase, .. } => {
                Some(*phase)
            }
            Error::UnknownTarget { .. } | Error::TargetExecution { .. } => Some(Phase::Targets),
            Error::DependencyFailed { cause, .. } | Error::BuildAborted { cause, .. } => {
                cause.phase()
            }
            _ => None,
        }
    }

    /// Follows skip chains down to the error that started them.
    pub fn root_cause(&self) -> &Error {
        let mut current = self;
        while let Error::DependencyFailed { cause, .. } | Error::BuildAborted { cause, .. } =
            current
        {
            current = cause.as_ref();
        }
        current
    }

    pub fn is_dependency_failure(&self) -> bool {
        matches!(self, Error::DependencyFailed { .. })
    }

    /// The unit never ran because some other unit failed first.
    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            Error::DependencyFailed { .. } | Error::BuildAborted { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
