use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::{Compression, GzBuilder};
use tempfile::NamedTempFile;

use crate::aligner::AlignedOutput;
use crate::delimited::{join_record, quote_field};
use crate::error::KiraError;
use crate::table::{FeatureMatrix, PhenotypeTable};

const GZIP_LEVEL: u32 = 6;
const PLAIN_MIN: f64 = 1e-5;
const PLAIN_MAX: f64 = 1e16;

pub struct OutputWriter;

impl OutputWriter {
    // Both files are staged before either is renamed into place. If the
    // phenotype rename fails, the matrix that was just renamed is removed again.
    pub fn write(
        aligned: &AlignedOutput,
        matrix_path: &Path,
        pheno_path: &Path,
    ) -> Result<(), KiraError> {
        let matrix = stage_matrix(&aligned.matrix, matrix_path)?;
        let pheno = stage_phenotype(&aligned.pheno, pheno_path)?;
        persist(matrix, matrix_path)?;
        if let Err(err) = persist(pheno, pheno_path) {
            if let Err(cleanup) = fs::remove_file(matrix_path) {
                tracing::warn!(
                    path = %matrix_path.display(),
                    error = %cleanup,
                    "failed to remove matrix after phenotype write failed"
                );
            }
            return Err(err);
        }
        Ok(())
    }

    pub fn write_matrix(matrix: &FeatureMatrix, path: &Path) -> Result<(), KiraError> {
        persist(stage_matrix(matrix, path)?, path)
    }

    pub fn write_phenotype(pheno: &PhenotypeTable, path: &Path) -> Result<(), KiraError> {
        persist(stage_phenotype(pheno, path)?, path)
    }
}

fn stage_matrix(matrix: &FeatureMatrix, path: &Path) -> Result<NamedTempFile, KiraError> {
    stage(path, |file| {
        // Empty gzip header (no name, no mtime) so reruns are byte-identical.
        let encoder = GzBuilder::new().write(file, Compression::new(GZIP_LEVEL));
        let mut out = BufWriter::new(encoder);

        let header = std::iter::once(matrix.index_label())
            .chain(matrix.samples().iter().map(String::as_str));
        writeln!(out, "{}", join_record(header))?;

        let mut line = String::new();
        for (row, feature) in matrix.features().iter().enumerate() {
            line.clear();
            line.push_str(&quote_field(feature));
            for value in matrix.row(row) {
                line.push(',');
                if !value.is_nan() {
                    line.push_str(&format_value(*value));
                }
            }
            writeln!(out, "{line}")?;
        }

        let encoder = out.into_inner().map_err(|err| err.into_error())?;
        encoder.finish()?;
        Ok(())
    })
}

fn stage_phenotype(pheno: &PhenotypeTable, path: &Path) -> Result<NamedTempFile, KiraError> {
    stage(path, |file| {
        let mut out = BufWriter::new(file);
        writeln!(
            out,
            "{}",
            join_record(pheno.columns().iter().map(String::as_str))
        )?;
        for record in pheno.records() {
            writeln!(
                out,
                "{}",
                join_record(record.fields().iter().map(String::as_str))
            )?;
        }
        out.flush()?;
        Ok(())
    })
}

fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude != 0.0 && !(PLAIN_MIN..PLAIN_MAX).contains(&magnitude) {
        format!("{value:e}")
    } else {
        value.to_string()
    }
}

fn stage(
    path: &Path,
    fill: impl FnOnce(&mut fs::File) -> std::io::Result<()>,
) -> Result<NamedTempFile, KiraError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| KiraError::write(path, err))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".kira-mp")
        .tempfile_in(parent)
        .map_err(|err| KiraError::write(path, err))?;
    fill(temp.as_file_mut()).map_err(|err| KiraError::write(path, err))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| KiraError::write(path, err))?;
    Ok(temp)
}

fn persist(temp: NamedTempFile, path: &Path) -> Result<(), KiraError> {
    temp.persist(path)
        .map_err(|err| KiraError::write(path, err.error))?;
    Ok(())
}

#[derive(Debug)]
pub struct IntermediateGuard {
    path: PathBuf,
}

impl IntermediateGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for IntermediateGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed intermediate"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to remove intermediate"
            ),
        }
    }
}
