use std::io::{self, Write};

use serde::Serialize;

use crate::domain::CohortStatus;
use crate::runner::{CohortOutcome, PlannedCohort, ProgressEvent, ProgressSink, RunSummary};

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    pub fn print_plan(plan: &[PlannedCohort]) -> io::Result<()> {
        Self::print_json(&plan)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct TextOutput;

impl TextOutput {
    pub fn outcome_line(outcome: &CohortOutcome) -> String {
        match &outcome.result {
            CohortStatus::Succeeded { samples, features } => format!(
                "{} {} ({}) samples={samples} features={features}",
                outcome.id, outcome.status, outcome.group
            ),
            CohortStatus::Abandoned { reason, detail, .. } => format!(
                "{} {} ({}) reason={reason}: {detail}",
                outcome.id, outcome.status, outcome.group
            ),
        }
    }

    pub fn print_summary(summary: &RunSummary) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        writeln!(
            stdout,
            "Cohorts attempted: {}, completed: {}, skipped: {}, failed: {}",
            summary.attempted, summary.completed, summary.skipped, summary.failed
        )?;
        Ok(())
    }

    pub fn print_plan(plan: &[PlannedCohort]) -> io::Result<()> {
        let mut stdout = io::stdout().lock();
        for item in plan {
            let state = match (item.raw_matrix_present, item.raw_pheno_present) {
                (true, true) => "ready",
                (true, false) => "phenotype missing",
                (false, _) => "matrix missing",
            };
            writeln!(
                stdout,
                "{} ({}) {state}\n  matrix: {}\n  pheno:  {}\n  output: {}",
                item.job.id,
                item.job.group,
                item.job.raw_matrix,
                item.job.raw_pheno,
                item.job.final_matrix
            )?;
        }
        Ok(())
    }
}

impl ProgressSink for TextOutput {
    fn event(&self, event: ProgressEvent) {
        if let ProgressEvent::Finished(outcome) = event {
            println!("{}", Self::outcome_line(&outcome));
        }
    }
}
