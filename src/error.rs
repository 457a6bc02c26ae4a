use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("raw input missing: {0}")]
    MissingInput(PathBuf),

    #[error("external step failed: {0}")]
    ExternalStep(String),

    #[error("failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("no samples shared between beta matrix and phenotype ages")]
    NoOverlap,

    #[error("failed to write {path}: {message}")]
    Write { path: PathBuf, message: String },

    #[error("aligned tables disagree on sample order")]
    Alignment,

    #[error("invalid GEO series accession: {0}")]
    InvalidCohortId(String),

    #[error("cohort listed more than once: {0}")]
    DuplicateCohort(String),

    #[error("cohort not configured: {0}")]
    UnknownCohort(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),
}

impl KiraError {
    pub(crate) fn load(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        KiraError::Load {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        KiraError::Write {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
