use thiserror::Error;

/// Core error types for iptsync
///
/// The taxonomy separates errors detected before any command is issued
/// (structural configuration problems) from errors surfaced by the firewall
/// binary itself. Parse problems on live rule lines are deliberately NOT
/// errors: an undecodable line becomes an opaque, purge-eligible rule and a
/// known-fatal diagnostic empties the affected table.
#[derive(Debug, Error)]
pub enum Error {
    /// Illegal table/chain/policy combination, or conflicting rule
    /// attributes. Detected before any command is issued; aborts only the
    /// offending entity.
    #[error("invalid configuration for {entity}: {message}")]
    Structural { entity: String, message: String },

    /// The firewall binary invocation failed (non-zero exit or spawn error)
    #[error("command {command:?} failed: {message}")]
    Execution {
        command: Vec<String>,
        message: String,
        exit_code: Option<i32>,
    },

    /// The save-to-disk persistence step failed. Callers downgrade this to
    /// a warning: the live firewall state is already correctly changed.
    #[error("persistence command failed: {0}")]
    Persistence(String),

    /// A desired-state document could not be loaded or validated
    #[error("desired state error: {0}")]
    DesiredState(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An ignore pattern in a chain declaration is not a valid regex
    #[error("invalid ignore pattern {pattern:?}: {message}")]
    IgnorePattern { pattern: String, message: String },
}

impl Error {
    /// Builds a structural error scoped to one entity.
    pub fn structural(entity: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Structural {
            entity: entity.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors that abort a single entity but must not
    /// stop reconciliation of independent entities.
    pub fn is_entity_scoped(&self) -> bool {
        matches!(self, Error::Structural { .. } | Error::Execution { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
