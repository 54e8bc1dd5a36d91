use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EpochRegError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing header keyword {keyword} in {}", .path.display())]
    HeaderRead { path: PathBuf, keyword: String },

    #[error("Invalid FITS file {}: {reason}", .path.display())]
    InvalidFits { path: PathBuf, reason: String },

    #[error("Invalid epoch list {}, line {line}: {reason}", .path.display())]
    EpochList {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Reference image {} does not exist", .0.display())]
    MissingReference(PathBuf),

    #[error("No visits satisfy the reference image requirements: filter = {filter}, epoch = {epoch}")]
    NoCandidateExposures { epoch: i32, filter: String },

    #[error("Not enough exposures for the reference image: epoch {epoch}, filter {filter}, visit {visit}")]
    InsufficientExposures {
        epoch: i32,
        filter: String,
        visit: String,
    },

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Missing artifact {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("{operation} failed: {message}")]
    Collaborator { operation: String, message: String },

    #[error("Cannot write WCS solution {wcs_name} for {}: {reason}", .image.display())]
    WcsPropagation {
        image: PathBuf,
        wcs_name: String,
        reason: String,
    },

    #[error("Image dimension mismatch: {0}")]
    DimensionMismatch(String),
}

impl EpochRegError {
    /// Errors confined to one unit of work. The scheduler records them and
    /// moves on to the next independent unit.
    pub fn is_unit_local(&self) -> bool {
        matches!(self, Self::MissingInput(_) | Self::MissingArtifact(_))
    }

    pub(crate) fn collaborator(operation: &str, message: impl Into<String>) -> Self {
        Self::Collaborator {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EpochRegError>;
