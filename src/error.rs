use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Unrecoverable failures of the pipeline.
///
/// Per-topic trouble (a timeout, an empty body, a selector miss) is not an
/// error: it becomes a skipped row in the visited table and scraping carries
/// on. This enum covers the cases where the run itself cannot continue.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("invalid dataset URL `{0}`")]
    InvalidUrl(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid selector `{spec}`: {reason}")]
    InvalidSelector { spec: String, reason: String },

    #[error("robots.txt for {0} could not be fetched or parsed")]
    RobotsUnavailable(String),

    #[error("robots.txt disallows scraping {0}")]
    RobotsDenied(String),

    #[error("no topic URLs found for {0}")]
    NoTopics(String),

    #[error("failed to build HTTP client")]
    Client(#[source] reqwest::Error),

    #[error("workspace error at {}", .path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ScrapeError {
    pub(crate) fn workspace(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Workspace {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
