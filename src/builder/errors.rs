//! Build execution errors.

use thiserror::Error;

use crate::core::{BuilderId, ErrorKind};

/// Error running a build.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("cycle detected in build graph between {}", builders.join(", "))]
    CycleDetected { builders: Vec<String> },

    #[error("no results for `{builder}`: it has not run in the current build")]
    ResultsNotAvailable { builder: BuilderId },

    #[error("builder `{builder}` failed: {source}")]
    Execution {
        builder: BuilderId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to start build worker pool")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::CycleDetected { .. } => ErrorKind::Configuration,
            BuildError::ResultsNotAvailable { .. } => ErrorKind::ProtocolViolation,
            BuildError::Execution { .. } => ErrorKind::Execution,
            BuildError::WorkerPool(_) => ErrorKind::Io,
        }
    }

    /// The builder this error is about, if any.
    pub fn builder(&self) -> Option<&BuilderId> {
        match self {
            BuildError::ResultsNotAvailable { builder } | BuildError::Execution { builder, .. } => {
                Some(builder)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_builders() {
        let err = BuildError::CycleDetected {
            builders: vec!["compile:a".to_string(), "compile:b".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "cycle detected in build graph between compile:a, compile:b"
        );
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.builder().is_none());
    }

    #[test]
    fn test_execution_error_keeps_cause() {
        let cause = anyhow::anyhow!("csc exited with code 1");
        let err = BuildError::Execution {
            builder: BuilderId::new("compile:a"),
            source: cause.into(),
        };
        assert!(err.to_string().contains("csc exited with code 1"));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.builder(), Some(&BuilderId::new("compile:a")));
    }
}
