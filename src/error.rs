//! Error types shared across the sequencing engine.

use crate::controller::ActionType;

/// Failure talking to the arm controller.
///
/// Inside an action primitive these are logged and reported as an unfinished step;
/// they never abort a routine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControllerError {
    #[error("controller transport failed: {0}")]
    Transport(String),

    #[error("controller rejected request: {0}")]
    Rejected(String),

    #[error("controller session is closed")]
    Disconnected,
}

/// Unrecoverable sequencing failure.
///
/// Raised when a routine references an action the controller does not know about.
/// Nothing else is commanded once this is returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SequenceError {
    #[error("action `{name}` is not registered on the controller ({action_type:?})")]
    UnknownAction {
        name: String,
        action_type: ActionType,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from the simulator's persistent action store.
#[derive(Debug, thiserror::Error)]
pub enum CatalogStoreError {
    #[error(transparent)]
    Sled(#[from] sled::Error),

    #[error("corrupt catalog entry: {0}")]
    Encoding(#[from] serde_json::Error),
}
