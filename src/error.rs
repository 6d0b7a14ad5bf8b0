use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnsembleError>;

#[derive(Debug, Clone, Error)]
pub enum EnsembleError {
    #[error("duplicate team name in roster: {0}")]
    DuplicateName(String),

    #[error("unknown team: {0}")]
    UnknownTeam(String),

    #[error("expected {expected} strengths for the roster, got {got}")]
    StrengthCount { expected: usize, got: usize },

    #[error("no historical matches to fit")]
    EmptyHistory,

    #[error("optimizer did not converge after {iterations} iterations (log-likelihood {log_likelihood:.6})")]
    Convergence {
        iterations: usize,
        log_likelihood: f64,
    },

    #[error("experiment directory already exists and is not empty: {}", .0.display())]
    PathExists(PathBuf),

    #[error("solver produced no result file at {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("{source_name}:{line}: {message}")]
    Parse {
        source_name: String,
        line: usize,
        message: String,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl EnsembleError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn parse(source_name: &str, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            source_name: source_name.to_string(),
            line,
            message: message.into(),
        }
    }
}
