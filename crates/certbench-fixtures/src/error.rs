use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while generating or writing fixtures
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("Certificate generation failed: {0}")]
    Generate(#[from] rcgen::Error),

    #[error("Failed to write '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FixtureError {
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }
}
