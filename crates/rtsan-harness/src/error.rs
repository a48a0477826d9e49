//! Harness error type.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("unknown scenario '{0}'")]
    UnknownScenario(String),
    #[error("failed to spawn scenario '{scenario}': {source}")]
    Spawn {
        scenario: String,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
