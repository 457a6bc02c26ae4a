use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_methyl_prep::config::ConfigLoader;
use kira_methyl_prep::domain::{CohortGroup, CohortId};
use kira_methyl_prep::error::KiraError;
use kira_methyl_prep::imputation::CommandImputation;
use kira_methyl_prep::layout::Layout;
use kira_methyl_prep::output::{JsonOutput, OutputMode, TextOutput};
use kira_methyl_prep::runner::{ProgressSink, RunOptions, Runner, select_cohorts};

#[derive(Parser)]
#[command(name = "kira-mp")]
#[command(about = "Impute, age-filter and align methylation cohorts for epigenetic clock training")]
#[command(version, author)]
struct Cli {
    #[arg(
        long,
        global = true,
        help = "Config file (default: kira-mp.json when present, else built-in cohorts)"
    )]
    config: Option<String>,

    #[arg(long, global = true, help = "Print results as JSON on stdout")]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Process cohorts (default)")]
    Run(RunArgs),
    #[command(about = "Show cohort paths and input availability without processing")]
    Plan(SelectArgs),
}

#[derive(Args, Clone, Default)]
struct SelectArgs {
    #[arg(long = "cohort", help = "Restrict to this cohort (repeatable)")]
    cohorts: Vec<CohortId>,

    #[arg(long, help = "Restrict to development or external validation cohorts")]
    group: Option<CohortGroup>,
}

#[derive(Args, Clone)]
struct RunArgs {
    #[command(flatten)]
    select: SelectArgs,

    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Cohorts processed concurrently"
    )]
    jobs: u16,

    #[arg(long, help = "Same as `plan`")]
    dry_run: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            select: SelectArgs::default(),
            jobs: 1,
            dry_run: false,
        }
    }
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidCohortId(_)
        | KiraError::DuplicateCohort(_)
        | KiraError::UnknownCohort(_) => 2,
        KiraError::Filesystem(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Text
    };

    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    let (select, jobs, dry_run) = match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => (args.select, args.jobs, args.dry_run),
        Commands::Plan(select) => (select, 1, true),
    };

    let cohorts = select_cohorts(&config, &select.cohorts, select.group)?;
    let step = CommandImputation::new(config.external_step.clone());
    if step.program().is_none() && !dry_run {
        tracing::warn!(
            program = %config.external_step.program,
            "external step program not found on PATH; every cohort with input will fail"
        );
    }
    let runner = Runner::new(Layout::from_config(&config), cohorts, step);

    if dry_run {
        let plan = runner.plan();
        return match output_mode {
            OutputMode::Json => JsonOutput::print_plan(&plan).into_diagnostic(),
            OutputMode::Text => TextOutput::print_plan(&plan).into_diagnostic(),
        };
    }

    let options = RunOptions {
        jobs: usize::from(jobs),
    };
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Text => &TextOutput,
    };
    let summary = runner.run(&options, sink)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_summary(&summary).into_diagnostic(),
        OutputMode::Text => TextOutput::print_summary(&summary).into_diagnostic(),
    }
}
