use std::collections::{HashMap, HashSet};

use thiserror::Error;

pub const SAMPLE_ID_COLUMN: &str = "SampleID";
pub const AGE_COLUMN: &str = "Age";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("duplicate sample id: {0}")]
    DuplicateSample(String),

    #[error("duplicate feature id: {0}")]
    DuplicateFeature(String),

    #[error("empty sample id")]
    EmptySampleId,

    #[error("expected {expected} values, found {found}")]
    Shape { expected: usize, found: usize },

    #[error("missing required column: {0}")]
    MissingColumn(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    index_label: String,
    features: Vec<String>,
    samples: Vec<String>,
    values: Vec<f64>,
}

impl FeatureMatrix {
    pub fn new(
        index_label: impl Into<String>,
        features: Vec<String>,
        samples: Vec<String>,
        values: Vec<f64>,
    ) -> Result<Self, TableError> {
        let expected = features.len() * samples.len();
        if values.len() != expected {
            return Err(TableError::Shape {
                expected,
                found: values.len(),
            });
        }
        ensure_unique(&samples, TableError::DuplicateSample)?;
        ensure_unique(&features, TableError::DuplicateFeature)?;
        if samples.iter().any(|sample| sample.is_empty()) {
            return Err(TableError::EmptySampleId);
        }
        Ok(Self {
            index_label: index_label.into(),
            features,
            samples,
            values,
        })
    }

    pub fn index_label(&self) -> &str {
        &self.index_label
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let width = self.samples.len();
        &self.values[index * width..(index + 1) * width]
    }

    pub fn value(&self, feature: &str, sample: &str) -> Option<f64> {
        let row = self.features.iter().position(|name| name == feature)?;
        let col = self.samples.iter().position(|name| name == sample)?;
        Some(self.row(row)[col])
    }

    pub fn select_columns(&self, order: &[String]) -> FeatureMatrix {
        let lookup: HashMap<&str, usize> = self
            .samples
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();
        let picked: Vec<(usize, &String)> = order
            .iter()
            .filter_map(|name| lookup.get(name.as_str()).map(|idx| (*idx, name)))
            .collect();

        let mut values = Vec::with_capacity(self.features.len() * picked.len());
        for row in 0..self.features.len() {
            let source = self.row(row);
            values.extend(picked.iter().map(|(idx, _)| source[*idx]));
        }

        FeatureMatrix {
            index_label: self.index_label.clone(),
            features: self.features.clone(),
            samples: picked.into_iter().map(|(_, name)| name.clone()).collect(),
            values,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhenotypeRecord {
    sample_id: String,
    age: Option<f64>,
    fields: Vec<String>,
}

impl PhenotypeRecord {
    pub fn sample_id(&self) -> &str {
        &self.sample_id
    }

    pub fn age(&self) -> Option<f64> {
        self.age
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhenotypeTable {
    columns: Vec<String>,
    sample_col: usize,
    age_col: usize,
    records: Vec<PhenotypeRecord>,
}

impl PhenotypeTable {
    pub fn new(
        columns: Vec<String>,
        rows: Vec<Vec<String>>,
        ages: Vec<Option<f64>>,
    ) -> Result<Self, TableError> {
        let sample_col = columns
            .iter()
            .position(|name| name == SAMPLE_ID_COLUMN)
            .ok_or(TableError::MissingColumn(SAMPLE_ID_COLUMN))?;
        let age_col = columns
            .iter()
            .position(|name| name == AGE_COLUMN)
            .ok_or(TableError::MissingColumn(AGE_COLUMN))?;
        if ages.len() != rows.len() {
            return Err(TableError::Shape {
                expected: rows.len(),
                found: ages.len(),
            });
        }

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(rows.len());
        for (fields, age) in rows.into_iter().zip(ages) {
            if fields.len() != columns.len() {
                return Err(TableError::Shape {
                    expected: columns.len(),
                    found: fields.len(),
                });
            }
            let sample_id = fields[sample_col].clone();
            if sample_id.is_empty() {
                return Err(TableError::EmptySampleId);
            }
            if !seen.insert(sample_id.clone()) {
                return Err(TableError::DuplicateSample(sample_id));
            }
            records.push(PhenotypeRecord {
                sample_id,
                age,
                fields,
            });
        }

        Ok(Self {
            columns,
            sample_col,
            age_col,
            records,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[PhenotypeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn sample_ids(&self) -> Vec<&str> {
        self.records.iter().map(|record| record.sample_id()).collect()
    }

    pub fn get(&self, sample_id: &str) -> Option<&PhenotypeRecord> {
        self.records
            .iter()
            .find(|record| record.sample_id == sample_id)
    }

    pub fn select_rows(&self, order: &[String]) -> PhenotypeTable {
        let lookup: HashMap<&str, &PhenotypeRecord> = self
            .records
            .iter()
            .map(|record| (record.sample_id.as_str(), record))
            .collect();

        let column_order: Vec<usize> = std::iter::once(self.sample_col)
            .chain((0..self.columns.len()).filter(|idx| *idx != self.sample_col))
            .collect();
        let columns = column_order
            .iter()
            .map(|idx| self.columns[*idx].clone())
            .collect();

        let records = order
            .iter()
            .filter_map(|name| lookup.get(name.as_str()))
            .map(|record| PhenotypeRecord {
                sample_id: record.sample_id.clone(),
                age: record.age,
                fields: column_order
                    .iter()
                    .map(|idx| record.fields[*idx].clone())
                    .collect(),
            })
            .collect();

        let age_col = column_order
            .iter()
            .position(|idx| *idx == self.age_col)
            .unwrap_or(self.age_col);

        PhenotypeTable {
            columns,
            sample_col: 0,
            age_col,
            records,
        }
    }
}

fn ensure_unique(
    names: &[String],
    duplicate: impl Fn(String) -> TableError,
) -> Result<(), TableError> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if !seen.insert(name.as_str()) {
            return Err(duplicate(name.clone()));
        }
    }
    Ok(())
}
