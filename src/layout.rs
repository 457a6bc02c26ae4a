use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::config::{CohortEntry, PipelineConfig};
use crate::domain::{CohortGroup, CohortId};
use crate::error::KiraError;

#[derive(Debug, Clone)]
pub struct Layout {
    raw_matrix_root: Utf8PathBuf,
    raw_pheno_root: Utf8PathBuf,
    output_root: Utf8PathBuf,
}

impl Layout {
    pub fn new(
        raw_matrix_root: Utf8PathBuf,
        raw_pheno_root: Utf8PathBuf,
        output_root: Utf8PathBuf,
    ) -> Self {
        Self {
            raw_matrix_root,
            raw_pheno_root,
            output_root,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.raw_matrix_dir.clone(),
            config.raw_pheno_dir.clone(),
            config.output_dir.clone(),
        )
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn raw_matrix_path(&self, id: &CohortId) -> Utf8PathBuf {
        self.raw_matrix_root.join(format!("{id}_beta.csv.gz"))
    }

    pub fn raw_pheno_path(&self, id: &CohortId) -> Utf8PathBuf {
        self.raw_pheno_root.join(format!("{id}_pheno.csv"))
    }

    pub fn intermediate_path(&self, id: &CohortId) -> Utf8PathBuf {
        self.output_root.join(format!("{id}_temp.csv.gz"))
    }

    pub fn final_matrix_path(&self, id: &CohortId) -> Utf8PathBuf {
        self.output_root.join(format!("{id}_beta.csv.gz"))
    }

    pub fn final_pheno_path(&self, id: &CohortId) -> Utf8PathBuf {
        self.output_root.join(format!("{id}_pheno.csv"))
    }

    pub fn metadata_path(&self, id: &CohortId) -> Utf8PathBuf {
        self.output_root
            .join("metadata")
            .join(format!("{id}.json"))
    }

    pub fn ensure_output_root(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.output_root.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    pub fn job(&self, entry: &CohortEntry) -> CohortJob {
        CohortJob {
            id: entry.id.clone(),
            group: entry.group,
            raw_matrix: self.raw_matrix_path(&entry.id),
            raw_pheno: self.raw_pheno_path(&entry.id),
            intermediate: self.intermediate_path(&entry.id),
            final_matrix: self.final_matrix_path(&entry.id),
            final_pheno: self.final_pheno_path(&entry.id),
            metadata: self.metadata_path(&entry.id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CohortJob {
    pub id: CohortId,
    pub group: CohortGroup,
    pub raw_matrix: Utf8PathBuf,
    pub raw_pheno: Utf8PathBuf,
    pub intermediate: Utf8PathBuf,
    pub final_matrix: Utf8PathBuf,
    pub final_pheno: Utf8PathBuf,
    pub metadata: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CohortMetadata {
    pub cohort: String,
    pub group: CohortGroup,
    pub samples: usize,
    pub features: usize,
    pub matrix_path: String,
    pub pheno_path: String,
    pub processed_at: String,
    pub tool: String,
}

impl CohortMetadata {
    pub fn write(&self, path: &Utf8Path) -> Result<(), KiraError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(self)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::write(tmp_path.as_std_path(), &content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn read(path: &Utf8Path) -> Result<Self, KiraError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content).map_err(|err| KiraError::Filesystem(err.to_string()))
    }
}
