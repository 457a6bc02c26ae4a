use std::fs;
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::aligner::align;
use crate::config::{CohortEntry, PipelineConfig};
use crate::domain::{AbandonReason, CohortGroup, CohortId, CohortStatus, Stage};
use crate::error::KiraError;
use crate::imputation::ImputationStep;
use crate::layout::{CohortJob, CohortMetadata, Layout};
use crate::loader::TableLoader;
use crate::writer::{IntermediateGuard, OutputWriter};

#[derive(Debug, Clone, Serialize)]
pub struct CohortOutcome {
    pub id: CohortId,
    pub group: CohortGroup,
    pub status: String,
    pub result: CohortStatus,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cohorts: Vec<CohortOutcome>,
}

impl RunSummary {
    fn from_outcomes(cohorts: Vec<CohortOutcome>) -> Self {
        let completed = cohorts
            .iter()
            .filter(|outcome| outcome.result.is_success())
            .count();
        let skipped = cohorts
            .iter()
            .filter(|outcome| {
                matches!(
                    outcome.result,
                    CohortStatus::Abandoned {
                        reason: AbandonReason::MissingInput,
                        ..
                    }
                )
            })
            .count();
        Self {
            attempted: cohorts.len(),
            completed,
            skipped,
            failed: cohorts.len() - completed - skipped,
            cohorts,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannedCohort {
    pub job: CohortJob,
    pub raw_matrix_present: bool,
    pub raw_pheno_present: bool,
}

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Stage { cohort: CohortId, stage: Stage },
    Finished(CohortOutcome),
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub jobs: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { jobs: 1 }
    }
}

pub fn select_cohorts(
    config: &PipelineConfig,
    ids: &[CohortId],
    group: Option<CohortGroup>,
) -> Result<Vec<CohortEntry>, KiraError> {
    let all = config.cohorts();
    if let Some(unknown) = ids
        .iter()
        .find(|id| !all.iter().any(|entry| &entry.id == *id))
    {
        return Err(KiraError::UnknownCohort(unknown.to_string()));
    }
    Ok(all
        .into_iter()
        .filter(|entry| ids.is_empty() || ids.contains(&entry.id))
        .filter(|entry| group.is_none_or(|group| entry.group == group))
        .collect())
}

pub struct Runner<S: ImputationStep> {
    layout: Layout,
    cohorts: Vec<CohortEntry>,
    step: S,
}

impl<S: ImputationStep> Runner<S> {
    pub fn new(layout: Layout, cohorts: Vec<CohortEntry>, step: S) -> Self {
        Self {
            layout,
            cohorts,
            step,
        }
    }

    pub fn from_config(config: &PipelineConfig, step: S) -> Self {
        Self::new(Layout::from_config(config), config.cohorts(), step)
    }

    pub fn cohorts(&self) -> &[CohortEntry] {
        &self.cohorts
    }

    pub fn step(&self) -> &S {
        &self.step
    }

    pub fn plan(&self) -> Vec<PlannedCohort> {
        self.cohorts
            .iter()
            .map(|entry| {
                let job = self.layout.job(entry);
                PlannedCohort {
                    raw_matrix_present: job.raw_matrix.as_std_path().exists(),
                    raw_pheno_present: job.raw_pheno.as_std_path().exists(),
                    job,
                }
            })
            .collect()
    }

    // Attempts every cohort. Only a failure to create the output directory
    // stops the run; per-cohort failures are reported in the summary.
    pub fn run(
        &self,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, KiraError> {
        self.layout.ensure_output_root()?;
        info!(
            cohorts = self.cohorts.len(),
            jobs = options.jobs,
            "starting preprocessing"
        );

        let outcomes = if options.jobs > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(options.jobs)
                .build()
            {
                Ok(pool) => pool.install(|| {
                    self.cohorts
                        .par_iter()
                        .map(|entry| self.run_cohort(entry, sink))
                        .collect::<Vec<_>>()
                }),
                Err(err) => {
                    warn!(error = %err, "thread pool unavailable, running sequentially");
                    self.run_sequential(sink)
                }
            }
        } else {
            self.run_sequential(sink)
        };

        let summary = RunSummary::from_outcomes(outcomes);
        info!(
            attempted = summary.attempted,
            completed = summary.completed,
            "pipeline completed"
        );
        Ok(summary)
    }

    fn run_sequential(&self, sink: &dyn ProgressSink) -> Vec<CohortOutcome> {
        self.cohorts
            .iter()
            .map(|entry| self.run_cohort(entry, sink))
            .collect()
    }

    pub fn run_cohort(&self, entry: &CohortEntry, sink: &dyn ProgressSink) -> CohortOutcome {
        let job = self.layout.job(entry);
        let start = Instant::now();
        let mut stage = Stage::Pending;

        let result = match self.process(&job, &mut stage, sink) {
            Ok((samples, features)) => {
                info!(cohort = %job.id, samples, features, "done");
                CohortStatus::Succeeded { samples, features }
            }
            Err(err) => {
                let reason = AbandonReason::for_stage(stage, &err);
                if reason == AbandonReason::MissingInput {
                    warn!(cohort = %job.id, path = %job.raw_matrix, "dataset missing, skipping");
                } else {
                    error!(cohort = %job.id, %stage, %reason, error = %err, "cohort abandoned");
                }
                CohortStatus::Abandoned {
                    stage,
                    reason,
                    detail: err.to_string(),
                }
            }
        };

        let outcome = CohortOutcome {
            id: job.id.clone(),
            group: job.group,
            status: result.label(),
            result,
            elapsed_ms: start.elapsed().as_millis(),
        };
        sink.event(ProgressEvent::Finished(outcome.clone()));
        outcome
    }

    fn process(
        &self,
        job: &CohortJob,
        stage: &mut Stage,
        sink: &dyn ProgressSink,
    ) -> Result<(usize, usize), KiraError> {
        let mut enter = |next: Stage| {
            *stage = next;
            sink.event(ProgressEvent::Stage {
                cohort: job.id.clone(),
                stage: next,
            });
        };

        enter(Stage::InputCheck);
        if !job.raw_matrix.as_std_path().exists() {
            return Err(KiraError::MissingInput(
                job.raw_matrix.clone().into_std_path_buf(),
            ));
        }

        enter(Stage::Imputing);
        let intermediate = IntermediateGuard::new(job.intermediate.as_std_path());
        if intermediate.path().exists() {
            fs::remove_file(intermediate.path()).map_err(|err| {
                KiraError::ExternalStep(format!("stale intermediate {}: {err}", job.intermediate))
            })?;
        }
        info!(cohort = %job.id, input = %job.raw_matrix, "running imputation and normalization");
        self.step
            .run(job.raw_matrix.as_std_path(), intermediate.path())?;
        if !intermediate.path().exists() {
            return Err(KiraError::ExternalStep(format!(
                "no output written to {}",
                job.intermediate
            )));
        }

        enter(Stage::Loading);
        let (matrix, pheno) =
            TableLoader::load(intermediate.path(), job.raw_pheno.as_std_path())?;

        enter(Stage::Aligning);
        info!(cohort = %job.id, "filtering samples by age");
        let aligned = align(&matrix, &pheno)?;

        enter(Stage::Writing);
        OutputWriter::write(
            &aligned,
            job.final_matrix.as_std_path(),
            job.final_pheno.as_std_path(),
        )?;
        drop(intermediate);

        let samples = aligned.sample_count();
        let features = aligned.matrix.features().len();
        let metadata = CohortMetadata {
            cohort: job.id.to_string(),
            group: job.group,
            samples,
            features,
            matrix_path: job.final_matrix.to_string(),
            pheno_path: job.final_pheno.to_string(),
            processed_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("kira-mp/{}", env!("CARGO_PKG_VERSION")),
        };
        if let Err(err) = metadata.write(&job.metadata) {
            warn!(cohort = %job.id, error = %err, "failed to write cohort metadata");
        }

        enter(Stage::Done);
        Ok((samples, features))
    }
}
