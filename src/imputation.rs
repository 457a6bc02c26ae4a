use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::ExternalStepCommand;
use crate::error::KiraError;

pub trait ImputationStep: Send + Sync {
    fn run(&self, input: &Path, output: &Path) -> Result<(), KiraError>;
}

#[derive(Debug, Clone)]
pub struct CommandImputation {
    command: ExternalStepCommand,
    program: Option<PathBuf>,
}

impl CommandImputation {
    pub fn new(command: ExternalStepCommand) -> Self {
        let program = resolve_program(&command.program);
        Self { command, program }
    }

    pub fn command(&self) -> &ExternalStepCommand {
        &self.command
    }

    pub fn program(&self) -> Option<&Path> {
        self.program.as_deref()
    }

    fn require_program(&self) -> Result<&PathBuf, KiraError> {
        self.program
            .as_ref()
            .ok_or_else(|| KiraError::MissingTool(self.command.program.clone()))
    }
}

impl ImputationStep for CommandImputation {
    fn run(&self, input: &Path, output: &Path) -> Result<(), KiraError> {
        let program = self.require_program()?;
        let mut cmd = Command::new(program);
        cmd.args(&self.command.args).arg(input).arg(output);
        let result = cmd
            .output()
            .map_err(|err| KiraError::ExternalStep(format!("{}: {err}", program.display())))?;
        if result.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", program.display(), result.status)
        } else {
            last_lines(&stderr, 5)
        };
        Err(KiraError::ExternalStep(message))
    }
}

fn resolve_program(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.exists().then(|| candidate.to_path_buf());
    }
    find_in_path(name)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}

fn last_lines(text: &str, count: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].join("\n")
}
