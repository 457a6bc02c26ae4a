use std::collections::HashSet;
use std::fs;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::domain::{CohortGroup, CohortId};
use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-mp.json";

const DEFAULT_DEV_COHORTS: &[&str] = &[
    "GSE40279",
    "GSE42861",
    "GSE87571",
    "GSE55763",
    "GSE61107",
    "GSE51032",
    "GSE73103",
    "GSE105018",
    "GSE111629",
    "GSE125105",
];

const DEFAULT_EXT_COHORTS: &[&str] = &["GSE72777", "GSE61496", "GSE77445", "GSE110554"];

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub dev_cohorts: Option<Vec<String>>,
    #[serde(default)]
    pub ext_cohorts: Option<Vec<String>>,
    #[serde(default)]
    pub raw_matrix_dir: Option<String>,
    #[serde(default)]
    pub raw_pheno_dir: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub external_step: Option<ExternalStepEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExternalStepEntry {
    Shorthand(String),
    Detailed(ExternalStepObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ExternalStepObject {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalStepCommand {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortEntry {
    pub id: CohortId,
    pub group: CohortGroup,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub schema_version: u32,
    pub dev_cohorts: Vec<CohortId>,
    pub ext_cohorts: Vec<CohortId>,
    pub raw_matrix_dir: Utf8PathBuf,
    pub raw_pheno_dir: Utf8PathBuf,
    pub output_dir: Utf8PathBuf,
    pub external_step: ExternalStepCommand,
}

impl PipelineConfig {
    pub fn cohorts(&self) -> Vec<CohortEntry> {
        let dev = self.dev_cohorts.iter().map(|id| CohortEntry {
            id: id.clone(),
            group: CohortGroup::Development,
        });
        let ext = self.ext_cohorts.iter().map(|id| CohortEntry {
            id: id.clone(),
            group: CohortGroup::External,
        });
        dev.chain(ext).collect()
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    // Reads `path`, or `kira-mp.json` in the working directory when present.
    // Without either, the built-in cohort list and directories are used.
    pub fn resolve(path: Option<&str>) -> Result<PipelineConfig, KiraError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.as_std_path().exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(config_path.as_std_path())
            .map_err(|_| KiraError::ConfigRead(config_path.clone().into_std_path_buf()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<PipelineConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let dev_cohorts = parse_cohorts(config.dev_cohorts, DEFAULT_DEV_COHORTS)?;
        let ext_cohorts = parse_cohorts(config.ext_cohorts, DEFAULT_EXT_COHORTS)?;

        let mut seen = HashSet::new();
        for id in dev_cohorts.iter().chain(ext_cohorts.iter()) {
            if !seen.insert(id.clone()) {
                return Err(KiraError::DuplicateCohort(id.to_string()));
            }
        }

        let external_step = match config.external_step {
            None => default_external_step(),
            Some(ExternalStepEntry::Shorthand(script)) => ExternalStepCommand {
                program: "Rscript".to_string(),
                args: vec![script],
            },
            Some(ExternalStepEntry::Detailed(obj)) => {
                if obj.program.trim().is_empty() {
                    return Err(KiraError::ConfigParse(
                        "external_step.program must not be empty".to_string(),
                    ));
                }
                ExternalStepCommand {
                    program: obj.program,
                    args: obj.args,
                }
            }
        };

        Ok(PipelineConfig {
            schema_version,
            dev_cohorts,
            ext_cohorts,
            raw_matrix_dir: Utf8PathBuf::from(
                config
                    .raw_matrix_dir
                    .unwrap_or_else(|| "../data/raw_beta".to_string()),
            ),
            raw_pheno_dir: Utf8PathBuf::from(
                config
                    .raw_pheno_dir
                    .unwrap_or_else(|| "../data/raw_pheno".to_string()),
            ),
            output_dir: Utf8PathBuf::from(
                config
                    .output_dir
                    .unwrap_or_else(|| "../data/processed_data".to_string()),
            ),
            external_step,
        })
    }
}

pub fn default_external_step() -> ExternalStepCommand {
    ExternalStepCommand {
        program: "Rscript".to_string(),
        args: vec!["./impute_methylation.R".to_string()],
    }
}

fn parse_cohorts(
    values: Option<Vec<String>>,
    defaults: &[&str],
) -> Result<Vec<CohortId>, KiraError> {
    match values {
        Some(values) => values.iter().map(|value| value.parse()).collect(),
        None => defaults.iter().map(|value| value.parse()).collect(),
    }
}
