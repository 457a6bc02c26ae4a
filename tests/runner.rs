use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;

use kira_methyl_prep::config::{Config, ConfigLoader, PipelineConfig};
use kira_methyl_prep::domain::{AbandonReason, CohortStatus, Stage};
use kira_methyl_prep::error::KiraError;
use kira_methyl_prep::imputation::ImputationStep;
use kira_methyl_prep::layout::CohortMetadata;
use kira_methyl_prep::loader::TableLoader;
use kira_methyl_prep::output::JsonOutput;
use kira_methyl_prep::runner::{ProgressEvent, ProgressSink, RunOptions, Runner};

const MATRIX: &str = "ID_REF,S1,S2,S3\ncg01,0.11,0.12,0.13\ncg02,0.21,0.22,0.23\n";
const PHENO: &str = "SampleID,Sex,Age\nS2,M,40\nS1,F,NA\nS3,F,55\nS4,M,30\n";

// Copies the raw matrix to the intermediate path, or fails for listed cohorts.
#[derive(Default)]
struct CopyStep {
    fail_for: Vec<&'static str>,
    skip_output_for: Vec<&'static str>,
    calls: Mutex<Vec<PathBuf>>,
}

impl ImputationStep for CopyStep {
    fn run(&self, input: &Path, output: &Path) -> Result<(), KiraError> {
        self.calls.lock().unwrap().push(input.to_path_buf());
        let name = input.file_name().unwrap().to_string_lossy().to_string();
        if self.fail_for.iter().any(|id| name.starts_with(&format!("{id}_"))) {
            return Err(KiraError::ExternalStep("exit status: 1".to_string()));
        }
        if self.skip_output_for.iter().any(|id| name.starts_with(&format!("{id}_"))) {
            return Ok(());
        }
        fs::copy(input, output).map_err(|err| KiraError::ExternalStep(err.to_string()))?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSink {
    stages: Mutex<Vec<(String, Stage)>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        if let ProgressEvent::Stage { cohort, stage } = event {
            self.stages.lock().unwrap().push((cohort.to_string(), stage));
        }
    }
}

// Swaps the intermediate for a non-empty directory once loading is done, so
// removing it afterwards fails.
struct HoldIntermediate {
    output: PathBuf,
}

impl ProgressSink for HoldIntermediate {
    fn event(&self, event: ProgressEvent) {
        if let ProgressEvent::Stage {
            cohort,
            stage: Stage::Writing,
        } = event
        {
            let intermediate = self.output.join(format!("{cohort}_temp.csv.gz"));
            fs::remove_file(&intermediate).unwrap();
            fs::create_dir(&intermediate).unwrap();
            fs::write(intermediate.join("held"), b"x").unwrap();
        }
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
    config: PipelineConfig,
}

impl Fixture {
    fn new(cohorts: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        for sub in ["raw_beta", "raw_pheno"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        let path = |sub: &str| Some(root.join(sub).to_str().unwrap().to_string());
        let config = ConfigLoader::resolve_config(Config {
            dev_cohorts: Some(cohorts.iter().map(|id| id.to_string()).collect()),
            ext_cohorts: Some(Vec::new()),
            raw_matrix_dir: path("raw_beta"),
            raw_pheno_dir: path("raw_pheno"),
            output_dir: path("processed"),
            ..Config::default()
        })
        .unwrap();
        Self {
            _dir: dir,
            root,
            config,
        }
    }

    fn add_cohort(&self, id: &str, matrix: &str, pheno: &str) {
        let raw = self.root.join("raw_beta").join(format!("{id}_beta.csv.gz"));
        let file = File::create(raw).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(matrix.as_bytes()).unwrap();
        encoder.finish().unwrap();
        fs::write(self.root.join("raw_pheno").join(format!("{id}_pheno.csv")), pheno).unwrap();
    }

    fn output(&self, name: &str) -> PathBuf {
        self.root.join("processed").join(name)
    }
}

fn outcome_of<'a>(
    summary: &'a kira_methyl_prep::runner::RunSummary,
    id: &str,
) -> &'a CohortStatus {
    &summary
        .cohorts
        .iter()
        .find(|outcome| outcome.id.as_str() == id)
        .unwrap()
        .result
}

#[test]
fn failed_external_step_does_not_affect_other_cohorts() {
    let fixture = Fixture::new(&["GSE1", "GSE2", "GSE3"]);
    for id in ["GSE1", "GSE2", "GSE3"] {
        fixture.add_cohort(id, MATRIX, PHENO);
    }
    let step = CopyStep {
        fail_for: vec!["GSE2"],
        ..CopyStep::default()
    };
    let runner = Runner::from_config(&fixture.config, step);

    let summary = runner.run(&RunOptions::default(), &JsonOutput).unwrap();

    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.cohorts[1].status, "failed-at-imputing");
    assert!(matches!(
        outcome_of(&summary, "GSE2"),
        CohortStatus::Abandoned {
            reason: AbandonReason::ExternalStepFailed,
            ..
        }
    ));

    for id in ["GSE1", "GSE3"] {
        assert_eq!(
            outcome_of(&summary, id),
            &CohortStatus::Succeeded {
                samples: 2,
                features: 2
            }
        );
        let final_matrix = fixture.output(&format!("{id}_beta.csv.gz"));
        let matrix = TableLoader::load_matrix(&final_matrix).unwrap();
        assert_eq!(matrix.samples(), ["S2", "S3"]);
        assert!(!fixture.output(&format!("{id}_temp.csv.gz")).exists());
    }
    assert!(!fixture.output("GSE2_beta.csv.gz").exists());
    assert!(!fixture.output("GSE2_pheno.csv").exists());
    assert!(!fixture.output("GSE2_temp.csv.gz").exists());
}

#[test]
fn aligned_outputs_follow_sorted_common_samples() {
    let fixture = Fixture::new(&["GSE40279"]);
    fixture.add_cohort("GSE40279", MATRIX, PHENO);
    let runner = Runner::from_config(&fixture.config, CopyStep::default());

    runner.run(&RunOptions::default(), &JsonOutput).unwrap();

    let pheno_text = fs::read_to_string(fixture.output("GSE40279_pheno.csv")).unwrap();
    assert_eq!(pheno_text, "SampleID,Sex,Age\nS2,M,40\nS3,F,55\n");

    let (matrix, pheno) = TableLoader::load(
        &fixture.output("GSE40279_beta.csv.gz"),
        &fixture.output("GSE40279_pheno.csv"),
    )
    .unwrap();
    assert_eq!(matrix.index_label(), "ID_REF");
    assert_eq!(matrix.features(), ["cg01", "cg02"]);
    assert_eq!(matrix.samples(), ["S2", "S3"]);
    assert_eq!(matrix.row(0), &[0.12, 0.13]);
    assert_eq!(matrix.row(1), &[0.22, 0.23]);
    assert_eq!(pheno.sample_ids(), vec!["S2", "S3"]);
}

#[test]
fn missing_raw_matrix_is_skipped_without_running_the_step() {
    let fixture = Fixture::new(&["GSE1", "GSE2"]);
    fixture.add_cohort("GSE2", MATRIX, PHENO);
    let runner = Runner::from_config(&fixture.config, CopyStep::default());

    let summary = runner.run(&RunOptions::default(), &JsonOutput).unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(runner.step().calls.lock().unwrap().len(), 1);
    assert_eq!(summary.cohorts[0].status, "skipped");
    assert!(matches!(
        outcome_of(&summary, "GSE1"),
        CohortStatus::Abandoned {
            stage: Stage::InputCheck,
            reason: AbandonReason::MissingInput,
            ..
        }
    ));
}

#[test]
fn missing_age_column_fails_loading() {
    let fixture = Fixture::new(&["GSE1"]);
    fixture.add_cohort("GSE1", MATRIX, "SampleID,Sex\nS1,F\nS2,M\n");
    let runner = Runner::from_config(&fixture.config, CopyStep::default());

    let summary = runner.run(&RunOptions::default(), &JsonOutput).unwrap();

    assert_eq!(summary.cohorts[0].status, "failed-at-loading");
    assert!(matches!(
        outcome_of(&summary, "GSE1"),
        CohortStatus::Abandoned {
            reason: AbandonReason::LoadFailed,
            ..
        }
    ));
    assert!(!fixture.output("GSE1_temp.csv.gz").exists());
    assert!(!fixture.output("GSE1_beta.csv.gz").exists());
}

#[test]
fn empty_overlap_writes_nothing() {
    let fixture = Fixture::new(&["GSE1"]);
    fixture.add_cohort(
        "GSE1",
        "ID_REF,A,B\ncg01,0.1,0.2\n",
        "SampleID,Age\nA,\nB,NA\nC,61\n",
    );
    let runner = Runner::from_config(&fixture.config, CopyStep::default());

    let summary = runner.run(&RunOptions::default(), &JsonOutput).unwrap();

    assert_eq!(summary.cohorts[0].status, "failed-at-aligning");
    assert!(matches!(
        outcome_of(&summary, "GSE1"),
        CohortStatus::Abandoned {
            reason: AbandonReason::NoOverlap,
            ..
        }
    ));
    assert!(!fixture.output("GSE1_beta.csv.gz").exists());
    assert!(!fixture.output("GSE1_pheno.csv").exists());
    assert!(!fixture.output("GSE1_temp.csv.gz").exists());
}

#[test]
fn step_without_output_is_an_external_failure() {
    let fixture = Fixture::new(&["GSE1"]);
    fixture.add_cohort("GSE1", MATRIX, PHENO);
    let step = CopyStep {
        skip_output_for: vec!["GSE1"],
        ..CopyStep::default()
    };
    let runner = Runner::from_config(&fixture.config, step);

    let summary = runner.run(&RunOptions::default(), &JsonOutput).unwrap();

    assert!(matches!(
        outcome_of(&summary, "GSE1"),
        CohortStatus::Abandoned {
            stage: Stage::Imputing,
            reason: AbandonReason::ExternalStepFailed,
            ..
        }
    ));
}

#[test]
fn rerun_produces_identical_bytes() {
    let fixture = Fixture::new(&["GSE1"]);
    fixture.add_cohort("GSE1", MATRIX, PHENO);
    let runner = Runner::from_config(&fixture.config, CopyStep::default());

    runner.run(&RunOptions::default(), &JsonOutput).unwrap();
    let first_matrix = fs::read(fixture.output("GSE1_beta.csv.gz")).unwrap();
    let first_pheno = fs::read(fixture.output("GSE1_pheno.csv")).unwrap();

    fs::write(fixture.output("GSE1_temp.csv.gz"), b"stale").unwrap();
    runner.run(&RunOptions::default(), &JsonOutput).unwrap();

    assert_eq!(fs::read(fixture.output("GSE1_beta.csv.gz")).unwrap(), first_matrix);
    assert_eq!(fs::read(fixture.output("GSE1_pheno.csv")).unwrap(), first_pheno);
}

#[test]
fn stages_run_in_order_and_metadata_is_recorded() {
    let fixture = Fixture::new(&["GSE1"]);
    fixture.add_cohort("GSE1", MATRIX, PHENO);
    let runner = Runner::from_config(&fixture.config, CopyStep::default());
    let sink = RecordingSink::default();

    runner.run(&RunOptions::default(), &sink).unwrap();

    let stages: Vec<Stage> = sink
        .stages
        .lock()
        .unwrap()
        .iter()
        .map(|(_, stage)| *stage)
        .collect();
    assert_eq!(
        stages,
        vec![
            Stage::InputCheck,
            Stage::Imputing,
            Stage::Loading,
            Stage::Aligning,
            Stage::Writing,
            Stage::Done
        ]
    );

    let path = camino::Utf8PathBuf::from_path_buf(fixture.output("metadata/GSE1.json")).unwrap();
    let metadata = CohortMetadata::read(&path).unwrap();
    assert_eq!(metadata.cohort, "GSE1");
    assert_eq!(metadata.samples, 2);
    assert_eq!(metadata.features, 2);
}

#[test]
fn parallel_run_reports_in_configured_order() {
    let ids = ["GSE5", "GSE1", "GSE4", "GSE2", "GSE3"];
    let fixture = Fixture::new(&ids);
    for id in ids {
        fixture.add_cohort(id, MATRIX, PHENO);
    }
    let step = CopyStep {
        fail_for: vec!["GSE4"],
        ..CopyStep::default()
    };
    let runner = Runner::from_config(&fixture.config, step);

    let summary = runner.run(&RunOptions { jobs: 3 }, &JsonOutput).unwrap();

    let order: Vec<&str> = summary.cohorts.iter().map(|outcome| outcome.id.as_str()).collect();
    assert_eq!(order, ids);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 1);
}

fn block_with_directory(path: &Path) {
    fs::create_dir_all(path).unwrap();
    fs::write(path.join("occupied"), b"x").unwrap();
}

#[test]
fn write_failure_leaves_no_partial_cohort() {
    let fixture = Fixture::new(&["GSE1", "GSE2", "GSE3"]);
    for id in ["GSE1", "GSE2", "GSE3"] {
        fixture.add_cohort(id, MATRIX, PHENO);
    }
    block_with_directory(&fixture.output("GSE1_pheno.csv"));
    block_with_directory(&fixture.output("GSE2_beta.csv.gz"));
    let runner = Runner::from_config(&fixture.config, CopyStep::default());

    let summary = runner.run(&RunOptions::default(), &JsonOutput).unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 2);
    for id in ["GSE1", "GSE2"] {
        assert!(matches!(
            outcome_of(&summary, id),
            CohortStatus::Abandoned {
                stage: Stage::Writing,
                reason: AbandonReason::WriteFailed,
                ..
            }
        ));
    }
    assert_eq!(summary.cohorts[0].status, "failed-at-writing");

    assert!(!fixture.output("GSE1_beta.csv.gz").exists());
    assert!(fixture.output("GSE1_pheno.csv").join("occupied").exists());
    assert!(fixture.output("GSE2_beta.csv.gz").join("occupied").exists());
    assert!(!fixture.output("GSE2_pheno.csv").exists());
    for id in ["GSE1", "GSE2"] {
        assert!(!fixture.output(&format!("{id}_temp.csv.gz")).exists());
    }

    let leftovers: Vec<_> = fs::read_dir(fixture.root.join("processed"))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(".kira-mp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");

    assert!(fixture.output("GSE3_beta.csv.gz").exists());
    assert!(fixture.output("GSE3_pheno.csv").exists());
}

#[test]
fn intermediate_that_cannot_be_removed_does_not_fail_the_cohort() {
    let fixture = Fixture::new(&["GSE1"]);
    fixture.add_cohort("GSE1", MATRIX, PHENO);
    let runner = Runner::from_config(&fixture.config, CopyStep::default());
    let sink = HoldIntermediate {
        output: fixture.root.join("processed"),
    };

    let summary = runner.run(&RunOptions::default(), &sink).unwrap();

    assert_eq!(
        outcome_of(&summary, "GSE1"),
        &CohortStatus::Succeeded {
            samples: 2,
            features: 2,
        }
    );
    assert_eq!(summary.cohorts[0].status, "succeeded");
    assert!(fixture.output("GSE1_temp.csv.gz").join("held").exists());
    assert!(fixture.output("GSE1_beta.csv.gz").exists());
    assert!(fixture.output("GSE1_pheno.csv").exists());
}
