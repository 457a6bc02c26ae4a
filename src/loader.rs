use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::delimited::{has_open_quote, is_missing, split_record};
use crate::error::KiraError;
use crate::table::{AGE_COLUMN, FeatureMatrix, PhenotypeTable, SAMPLE_ID_COLUMN};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

pub struct TableLoader;

impl TableLoader {
    pub fn load(
        matrix_path: &Path,
        pheno_path: &Path,
    ) -> Result<(FeatureMatrix, PhenotypeTable), KiraError> {
        let matrix = Self::load_matrix(matrix_path)?;
        let pheno = Self::load_phenotype(pheno_path)?;
        Ok((matrix, pheno))
    }

    pub fn load_matrix(path: &Path) -> Result<FeatureMatrix, KiraError> {
        let mut lines = open_lines(path)?;

        let header = next_record(&mut lines, path)?
            .ok_or_else(|| KiraError::load(path, "empty matrix file"))?;
        let mut header = header.into_iter();
        let index_label = header.next().unwrap_or_default();
        let samples: Vec<String> = header.collect();
        if samples.is_empty() {
            return Err(KiraError::load(path, "matrix has no sample columns"));
        }

        let mut features = Vec::new();
        let mut values = Vec::new();
        let mut line_no = 1usize;
        while let Some(record) = next_record(&mut lines, path)? {
            line_no += 1;
            if record.len() != samples.len() + 1 {
                return Err(KiraError::load(
                    path,
                    format!(
                        "line {line_no}: expected {} fields, found {}",
                        samples.len() + 1,
                        record.len()
                    ),
                ));
            }
            let mut cells = record.into_iter();
            features.push(cells.next().unwrap_or_default());
            for cell in cells {
                values.push(parse_value(&cell).ok_or_else(|| {
                    KiraError::load(path, format!("line {line_no}: non-numeric value '{cell}'"))
                })?);
            }
        }

        FeatureMatrix::new(index_label, features, samples, values)
            .map_err(|err| KiraError::load(path, err.to_string()))
    }

    pub fn load_phenotype(path: &Path) -> Result<PhenotypeTable, KiraError> {
        let mut lines = open_lines(path)?;

        let columns = next_record(&mut lines, path)?
            .ok_or_else(|| KiraError::load(path, "empty phenotype file"))?;
        if !columns.iter().any(|name| name == SAMPLE_ID_COLUMN) {
            return Err(KiraError::load(path, "'SampleID' column missing"));
        }
        let age_col = columns
            .iter()
            .position(|name| name == AGE_COLUMN)
            .ok_or_else(|| KiraError::load(path, "'Age' column missing"))?;

        let mut rows = Vec::new();
        let mut ages = Vec::new();
        let mut line_no = 1usize;
        while let Some(record) = next_record(&mut lines, path)? {
            line_no += 1;
            if record.len() != columns.len() {
                return Err(KiraError::load(
                    path,
                    format!(
                        "line {line_no}: expected {} fields, found {}",
                        columns.len(),
                        record.len()
                    ),
                ));
            }
            let raw_age = &record[age_col];
            let age = if is_missing(raw_age) {
                None
            } else {
                let value = raw_age.parse::<f64>().map_err(|_| {
                    KiraError::load(path, format!("line {line_no}: non-numeric Age '{raw_age}'"))
                })?;
                if value.is_nan() { None } else { Some(value) }
            };
            ages.push(age);
            rows.push(record);
        }

        PhenotypeTable::new(columns, rows, ages)
            .map_err(|err| KiraError::load(path, err.to_string()))
    }
}

fn open_lines(path: &Path) -> Result<std::io::Lines<Box<dyn BufRead>>, KiraError> {
    let mut file =
        File::open(path).map_err(|err| KiraError::load(path, format!("open: {err}")))?;
    let mut magic = [0u8; 2];
    let read = file
        .read(&mut magic)
        .map_err(|err| KiraError::load(path, err.to_string()))?;
    let head = std::io::Cursor::new(magic[..read].to_vec());
    let reader: Box<dyn BufRead> = if read == 2 && magic == GZIP_MAGIC {
        Box::new(BufReader::new(MultiGzDecoder::new(head.chain(file))))
    } else {
        Box::new(BufReader::new(head.chain(file)))
    };
    Ok(reader.lines())
}

// Next non-blank record, or `None` at end of input. A record whose quoted
// field spans line breaks is read across as many lines as it takes.
fn next_record(
    lines: &mut std::io::Lines<Box<dyn BufRead>>,
    path: &Path,
) -> Result<Option<Vec<String>>, KiraError> {
    let mut record = String::new();
    for line in lines.by_ref() {
        let line = line.map_err(|err| KiraError::load(path, err.to_string()))?;
        if record.is_empty() {
            let line = line.strip_prefix('\u{feff}').unwrap_or(&line);
            if line.trim().is_empty() {
                continue;
            }
            record.push_str(line);
        } else {
            record.push('\n');
            record.push_str(&line);
        }
        if !has_open_quote(&record) {
            let fields =
                split_record(&record).map_err(|message| KiraError::load(path, message))?;
            return Ok(Some(fields));
        }
    }
    if record.is_empty() {
        Ok(None)
    } else {
        Err(KiraError::load(path, "unterminated quoted field"))
    }
}

fn parse_value(cell: &str) -> Option<f64> {
    if is_missing(cell) {
        return Some(f64::NAN);
    }
    cell.parse::<f64>().ok()
}
