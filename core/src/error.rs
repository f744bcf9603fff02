//! Error types shared by every stage.
//!
//! Only fatal conditions are represented here. Per-record problems (a
//! malformed alignment, a rejected rule) are handled inside the stage that
//! finds them and show up in logs and counters instead.

use std::io;
use std::process::ExitStatus;

/// Result alias defaulting to [`LexSelError`].
pub type Result<T, E = LexSelError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum LexSelError {
    #[error(transparent)]
    Io(#[from] io::Error),

    /// The frequency lexicon could not be turned into consistent indices.
    #[error("malformed lexicon at line {line}: {reason}")]
    MalformedLexicon { line: usize, reason: String },

    #[error("malformed feature table at line {line}: {reason}")]
    MalformedFeatureTable { line: usize, reason: String },

    /// An external tool ran but exited unsuccessfully.
    #[error("external tool `{tool}` failed with {status}")]
    ExternalTool { tool: String, status: ExitStatus },

    #[error("could not start external tool `{tool}`: {source}")]
    ExternalToolSpawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("snapshot error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for LexSelError {
    fn from(e: toml::de::Error) -> Self {
        LexSelError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for LexSelError {
    fn from(e: toml::ser::Error) -> Self {
        LexSelError::Config(e.to_string())
    }
}
