use std::collections::{BTreeSet, HashSet};

use crate::error::KiraError;
use crate::table::{FeatureMatrix, PhenotypeTable};

#[derive(Debug, Clone, PartialEq)]
pub struct AlignedOutput {
    pub matrix: FeatureMatrix,
    pub pheno: PhenotypeTable,
}

impl AlignedOutput {
    pub fn sample_count(&self) -> usize {
        self.matrix.samples().len()
    }
}

pub fn valid_samples(pheno: &PhenotypeTable) -> HashSet<&str> {
    pheno
        .records()
        .iter()
        .filter(|record| record.age().is_some())
        .map(|record| record.sample_id())
        .collect()
}

pub fn common_sample_order(matrix: &FeatureMatrix, pheno: &PhenotypeTable) -> Vec<String> {
    let valid = valid_samples(pheno);
    matrix
        .samples()
        .iter()
        .filter(|sample| valid.contains(sample.as_str()))
        .map(|sample| sample.to_string())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn align(matrix: &FeatureMatrix, pheno: &PhenotypeTable) -> Result<AlignedOutput, KiraError> {
    let order = common_sample_order(matrix, pheno);
    if order.is_empty() {
        return Err(KiraError::NoOverlap);
    }

    let aligned = AlignedOutput {
        matrix: matrix.select_columns(&order),
        pheno: pheno.select_rows(&order),
    };

    let pheno_ids = aligned.pheno.sample_ids();
    let in_order = aligned.matrix.samples().len() == order.len()
        && pheno_ids.len() == order.len()
        && aligned
            .matrix
            .samples()
            .iter()
            .zip(&pheno_ids)
            .all(|(column, sample)| column.as_str() == *sample);
    if !in_order {
        return Err(KiraError::Alignment);
    }

    Ok(aligned)
}
