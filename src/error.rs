use thiserror::Error;

/// Failure inside a collaborator adapter (the only place steps are allowed
/// to touch infrastructure from).
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config file error in {path}: {message}")]
    Config { path: String, message: String },

    #[error("{0}")]
    Other(String),
}

impl AdapterError {
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// A step's forward or backward operation failed. The engine attaches the
/// step name and version so the operator report can point at the exact spot.
#[derive(Debug, Error)]
#[error("step '{step}' of version {version} failed: {cause}")]
pub struct StepError {
    pub version: String,
    pub step: String,
    #[source]
    pub cause: AdapterError,
}

/// The requested version range cannot be resolved against the release order.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanningError {
    #[error("unknown version label '{0}' (not in the release order table)")]
    UnknownVersion(String),

    #[error("target version {target} precedes current version {current}")]
    TargetBeforeCurrent { current: String, target: String },

    #[error("duplicate version label '{0}' in the release order table")]
    DuplicateVersion(String),

    #[error("duplicate step name '{step}' in version plan {version}")]
    DuplicateStep { version: String, step: String },

    #[error("a plan for version {0} is already registered")]
    DuplicatePlan(String),

    #[error(
        "version {version} is not the immediate predecessor of {current}; \
         only the most recently applied plan can be rolled back"
    )]
    NotImmediatePredecessor { current: String, version: String },

    #[error("no plans have been applied to this environment; nothing to roll back")]
    NothingApplied,
}

/// Ledger-level failure, including loss of the single-writer claim race.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(
        "environment '{environment}' is claimed by another migration run{}",
        .holder.as_deref().map(|h| format!(" ({h})")).unwrap_or_default()
    )]
    Contention {
        environment: String,
        holder: Option<String>,
    },

    #[error("database error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

/// One or more reverts failed during best-effort rollback. Terminal: the
/// environment is in an indeterminate state and needs operator attention.
#[derive(Debug, Error)]
#[error("rollback of version {version} left {} step(s) unreverted: {}",
    .failed.len(),
    .failed.iter().map(|(name, _)| name.as_str()).collect::<Vec<_>>().join(", "))]
pub struct RollbackError {
    pub version: String,
    /// Step name plus the revert failure text, in the order the reverts
    /// were attempted.
    pub failed: Vec<(String, String)>,
}

/// Top-level engine failure for conditions that prevent a run from starting
/// or recording progress. Step failures during an `up` run are not errors at
/// this level; they are reported through
/// [`crate::engine::MigrationReport`]. The `Step` variant only surfaces from
/// single-step dispatch.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Step(#[from] StepError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_names_step_and_version() {
        let err = StepError {
            version: "5.8.0-b1".to_string(),
            step: "seedPermission".to_string(),
            cause: AdapterError::other("insert rejected"),
        };
        let msg = err.to_string();
        assert!(msg.contains("seedPermission"));
        assert!(msg.contains("5.8.0-b1"));
        assert!(msg.contains("insert rejected"));
    }

    #[test]
    fn rollback_error_lists_failed_steps() {
        let err = RollbackError {
            version: "5.8.0-b1".to_string(),
            failed: vec![
                ("addColumn".to_string(), "gone".to_string()),
                ("createTable".to_string(), "locked".to_string()),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("addColumn, createTable"));
        assert!(msg.contains("2 step(s)"));
    }

    #[test]
    fn contention_error_mentions_holder_when_known() {
        let err = LedgerError::Contention {
            environment: "prod".to_string(),
            holder: Some("run 4f1c".to_string()),
        };
        assert!(err.to_string().contains("run 4f1c"));

        let anonymous = LedgerError::Contention {
            environment: "prod".to_string(),
            holder: None,
        };
        assert!(anonymous.to_string().contains("prod"));
    }
}
