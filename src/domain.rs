use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CohortId(String);

impl CohortId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CohortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CohortId {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        let digits = normalized.strip_prefix("GSE").unwrap_or("");
        let is_valid = !digits.is_empty() && digits.chars().all(|ch| ch.is_ascii_digit());
        if !is_valid {
            return Err(KiraError::InvalidCohortId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for CohortId {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CohortId> for String {
    fn from(value: CohortId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CohortGroup {
    #[value(name = "dev")]
    Development,
    #[value(name = "ext")]
    External,
}

impl fmt::Display for CohortGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CohortGroup::Development => write!(f, "development"),
            CohortGroup::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Pending,
    InputCheck,
    Imputing,
    Loading,
    Aligning,
    Writing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Pending => "pending",
            Stage::InputCheck => "input-check",
            Stage::Imputing => "imputing",
            Stage::Loading => "loading",
            Stage::Aligning => "aligning",
            Stage::Writing => "writing",
            Stage::Done => "done",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum AbandonReason {
    MissingInput,
    ExternalStepFailed,
    LoadFailed,
    NoOverlap,
    AlignmentFailed,
    WriteFailed,
}

impl AbandonReason {
    pub fn for_stage(stage: Stage, error: &KiraError) -> Self {
        match (stage, error) {
            (_, KiraError::MissingInput(_)) => AbandonReason::MissingInput,
            (_, KiraError::NoOverlap) => AbandonReason::NoOverlap,
            (_, KiraError::Load { .. }) => AbandonReason::LoadFailed,
            (_, KiraError::Alignment) => AbandonReason::AlignmentFailed,
            (Stage::Imputing, _) => AbandonReason::ExternalStepFailed,
            (Stage::Loading, _) => AbandonReason::LoadFailed,
            (Stage::Aligning, _) => AbandonReason::AlignmentFailed,
            _ => AbandonReason::WriteFailed,
        }
    }
}

impl fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AbandonReason::MissingInput => "missing-input",
            AbandonReason::ExternalStepFailed => "external-step-failed",
            AbandonReason::LoadFailed => "load-failed",
            AbandonReason::NoOverlap => "no-overlap",
            AbandonReason::AlignmentFailed => "alignment-failed",
            AbandonReason::WriteFailed => "write-failed",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum CohortStatus {
    Succeeded {
        samples: usize,
        features: usize,
    },
    Abandoned {
        stage: Stage,
        reason: AbandonReason,
        detail: String,
    },
}

impl CohortStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CohortStatus::Succeeded { .. })
    }

    pub fn label(&self) -> String {
        match self {
            CohortStatus::Succeeded { .. } => "succeeded".to_string(),
            CohortStatus::Abandoned {
                reason: AbandonReason::MissingInput,
                ..
            } => "skipped".to_string(),
            CohortStatus::Abandoned { stage, .. } => format!("failed-at-{stage}"),
        }
    }
}
