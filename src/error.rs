use thiserror::Error;

use crate::config::ConfigError;
use crate::sim::lifecycle::ComponentState;

/// Main error type for the grid simulation.
#[derive(Error, Debug)]
pub enum GridError {
    // Configuration errors
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("invalid configuration: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    InvalidConfig(Vec<ConfigError>),

    // Construction errors
    #[error("cannot construct {node}: {reason}")]
    Construction { node: String, reason: String },

    // Addressing errors
    #[error("invalid address \"{0}\": expected localpart@domain[/resource]")]
    InvalidAddress(String),

    #[error("address already registered: {0}")]
    DuplicateAddress(String),

    // Lifecycle errors
    #[error("invalid state transition: from {from} to {to}")]
    InvalidTransition {
        from: ComponentState,
        to: ComponentState,
    },

    #[error("component {address} already has parent {parent}")]
    AlreadyParented { address: String, parent: String },

    // Protocol errors
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("clock rate must be >= 0, got {0}")]
    NegativeRate(f64),

    #[error("agent task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    // Serialization / IO errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for grid operations.
pub type Result<T> = std::result::Result<T, GridError>;

impl GridError {
    /// Returns `true` for errors that only skip a single node during setup.
    pub fn is_construction(&self) -> bool {
        matches!(self, GridError::Construction { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_transition_states() {
        let err = GridError::InvalidTransition {
            from: ComponentState::Stopped,
            to: ComponentState::Running,
        };
        assert_eq!(
            err.to_string(),
            "invalid state transition: from stopped to running"
        );
    }

    #[test]
    fn invalid_config_joins_all_errors() {
        let err = GridError::InvalidConfig(vec![
            ConfigError::new("simulation_time.rate", "must be >= 0"),
            ConfigError::new("network.name", "must not be empty"),
        ]);
        let text = err.to_string();
        assert!(text.contains("simulation_time.rate"));
        assert!(text.contains("network.name"));
    }

    #[test]
    fn construction_is_recognised() {
        let err = GridError::Construction {
            node: "pv1".into(),
            reason: "unknown asset type \"fusion\"".into(),
        };
        assert!(err.is_construction());
        assert!(!GridError::UnknownTopic("x".into()).is_construction());
    }
}
