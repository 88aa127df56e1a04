//! Running calculators
//!
//! A [`Runner`] takes a structure and a configured calculator, executes the
//! external program and returns the final structure with results attached.
//! Failures are reported once and never retried.

use chrono::Utc;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::atoms::{Atoms, CalcResults};
use crate::calculator::{CalcOutput, Calculator, CalculatorError, Program};
use crate::files::{copy_files, CopyFiles, CopyFilesError};
use crate::settings::Settings;

/// Lines of program output kept in a failure report
const OUTPUT_TAIL_LINES: usize = 20;

/// Errors from executing a calculation
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("IO error at {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("no command configured for {0}")]
    EmptyCommand(Program),

    #[error("failed to launch {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("{program} exited with {} (run directory {}): {output_tail}", describe_exit(.code), .dir.display())]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        dir: PathBuf,
        output_tail: String,
    },

    #[error("{program} calculation in {}: {source}", .dir.display())]
    Calculator {
        program: Program,
        dir: PathBuf,
        source: CalculatorError,
    },

    #[error("copying input files: {0}")]
    CopyFiles(#[from] CopyFilesError),
}

impl ExecutionError {
    /// Point a run-directory error at where the directory ended up
    fn relocated(self, new_dir: PathBuf) -> Self {
        match self {
            ExecutionError::NonZeroExit {
                program,
                code,
                output_tail,
                ..
            } => ExecutionError::NonZeroExit {
                program,
                code,
                dir: new_dir,
                output_tail,
            },
            ExecutionError::Calculator {
                program, source, ..
            } => ExecutionError::Calculator {
                program,
                dir: new_dir,
                source,
            },
            other => other,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> ExecutionError + '_ {
    move |source| ExecutionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Executes a configured calculator on a structure
pub trait Runner {
    fn run(
        &self,
        atoms: &Atoms,
        calculator: &dyn Calculator,
        copy_files: Option<&CopyFiles>,
    ) -> Result<Atoms, ExecutionError>;
}

/// Runs calculators as local processes in per-call scratch directories
#[derive(Debug, Clone)]
pub struct LocalRunner {
    settings: Settings,
}

impl LocalRunner {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn create_scratch(&self, id: &Uuid) -> Result<PathBuf, ExecutionError> {
        let dir = self.settings.scratch_dir.join(format!("calc-{}", id.simple()));
        fs::create_dir_all(&dir).map_err(io_at(&dir))?;
        Ok(dir)
    }

    fn execute(&self, calculator: &dyn Calculator, dir: &Path) -> Result<(), ExecutionError> {
        let program = calculator.program();
        let (exe, base_args) = self
            .settings
            .command(program)
            .split_first()
            .ok_or(ExecutionError::EmptyCommand(program))?;

        let stdout_path = dir.join(format!("{}.out", program));
        let stderr_path = dir.join(format!("{}.err", program));
        let stdout = File::create(&stdout_path).map_err(io_at(&stdout_path))?;
        let stderr = File::create(&stderr_path).map_err(io_at(&stderr_path))?;

        let args = calculator.command_args();
        info!(%program, command = %exe, ?args, dir = %dir.display(), "running calculator");

        let status = Command::new(exe)
            .args(base_args)
            .args(&args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(|source| ExecutionError::Spawn {
                program: exe.clone(),
                source,
            })?;

        if status.success() {
            return Ok(());
        }

        let mut output_tail = tail_lines(&stderr_path);
        if output_tail.is_empty() {
            output_tail = tail_lines(&stdout_path);
        }

        Err(ExecutionError::NonZeroExit {
            program: exe.clone(),
            code: status.code(),
            dir: dir.to_path_buf(),
            output_tail,
        })
    }

    /// Rename a scratch directory to `failed-<name>` so it is kept for
    /// inspection. An empty one is removed and `None` returned.
    fn mark_failed(&self, dir: &Path) -> Option<PathBuf> {
        let empty = fs::read_dir(dir).map_or(false, |mut entries| entries.next().is_none());
        if empty {
            if let Err(e) = fs::remove_dir(dir) {
                debug!(error = %e, "could not remove empty run directory");
            }
            return None;
        }

        let Some(name) = dir.file_name() else {
            return Some(dir.to_path_buf());
        };
        let failed = dir.with_file_name(format!("failed-{}", name.to_string_lossy()));
        match fs::rename(dir, &failed) {
            Ok(()) => Some(failed),
            Err(e) => {
                debug!(error = %e, "could not rename failed run directory");
                Some(dir.to_path_buf())
            }
        }
    }

    fn run_in(
        &self,
        atoms: &Atoms,
        calculator: &dyn Calculator,
        copy_files_spec: Option<&CopyFiles>,
        id: &Uuid,
        scratch: &Path,
    ) -> Result<Atoms, ExecutionError> {
        let program = calculator.program();

        if let Some(spec) = copy_files_spec {
            let copied = copy_files(spec, scratch)?;
            debug!(count = copied.len(), "copied input files");
        }

        let calc_error = |source: CalculatorError| ExecutionError::Calculator {
            program,
            dir: scratch.to_path_buf(),
            source,
        };

        calculator.write_input(atoms, scratch).map_err(&calc_error)?;
        self.execute(calculator, scratch)?;
        let output = calculator.read_output(atoms, scratch).map_err(&calc_error)?;

        let dir_name = self.collect(program, id, scratch)?;
        info!(%program, energy = ?output.energy, dir = %dir_name.display(), "calculation finished");

        Ok(attach_results(atoms, calculator, output, Some(dir_name)))
    }

    /// Move (or copy, with `keep_scratch`) outputs into the results directory
    fn collect(
        &self,
        program: Program,
        id: &Uuid,
        scratch: &Path,
    ) -> Result<PathBuf, ExecutionError> {
        let results_dir = if self.settings.create_unique_dir {
            self.settings.results_dir.join(format!(
                "{}-{}-{}",
                program,
                Utc::now().format("%Y-%m-%d-%H%M%S"),
                id.simple()
            ))
        } else {
            self.settings.results_dir.clone()
        };
        fs::create_dir_all(&results_dir).map_err(io_at(&results_dir))?;

        let entries = fs::read_dir(scratch).map_err(io_at(scratch))?;
        for entry in entries {
            let entry = entry.map_err(io_at(scratch))?;
            let target = results_dir.join(entry.file_name());
            transfer(&entry.path(), &target, self.settings.keep_scratch)?;
        }

        if !self.settings.keep_scratch {
            fs::remove_dir_all(scratch).map_err(io_at(scratch))?;
        }
        Ok(results_dir)
    }
}

impl Runner for LocalRunner {
    fn run(
        &self,
        atoms: &Atoms,
        calculator: &dyn Calculator,
        copy_files_spec: Option<&CopyFiles>,
    ) -> Result<Atoms, ExecutionError> {
        let id = Uuid::new_v4();
        let scratch = self.create_scratch(&id)?;

        self.run_in(atoms, calculator, copy_files_spec, &id, &scratch)
            .map_err(|err| {
                let kept = self.mark_failed(&scratch);
                warn!(
                    program = %calculator.program(),
                    error = %err,
                    dir = ?kept,
                    "calculation failed"
                );
                err.relocated(kept.unwrap_or(scratch))
            })
    }
}

/// Copy of `atoms` with the parsed output applied
pub fn attach_results(
    atoms: &Atoms,
    calculator: &dyn Calculator,
    output: CalcOutput,
    dir_name: Option<PathBuf>,
) -> Atoms {
    let mut final_atoms = atoms.clone();
    if let Some(positions) = output.positions {
        final_atoms.positions = positions;
    }
    if let Some(cell) = output.cell {
        final_atoms.cell = Some(cell);
    }
    final_atoms.results = Some(CalcResults {
        calculator: calculator.program().to_string(),
        parameters: calculator.parameters().clone(),
        energy: output.energy,
        forces: output.forces,
        dir_name,
    });
    final_atoms
}

fn transfer(from: &Path, to: &Path, keep: bool) -> Result<(), ExecutionError> {
    if !keep && fs::rename(from, to).is_ok() {
        return Ok(());
    }

    if from.is_dir() {
        for entry in WalkDir::new(from) {
            let entry = entry.map_err(|e| ExecutionError::Io {
                path: from.to_path_buf(),
                source: e.into(),
            })?;
            let Ok(rel) = entry.path().strip_prefix(from) else {
                continue;
            };
            let target = to.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(io_at(&target))?;
            } else {
                fs::copy(entry.path(), &target).map_err(io_at(&target))?;
            }
        }
        if !keep {
            fs::remove_dir_all(from).map_err(io_at(from))?;
        }
    } else {
        fs::copy(from, to).map_err(io_at(to))?;
        if !keep {
            fs::remove_file(from).map_err(io_at(from))?;
        }
    }
    Ok(())
}

fn tail_lines(path: &Path) -> String {
    let Ok(bytes) = fs::read(path) else {
        return String::new();
    };
    let contents = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = contents.lines().collect();
    let start = lines.len().saturating_sub(OUTPUT_TAIL_LINES);
    lines[start..].join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_tail_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("log");
        let text: Vec<String> = (0..30).map(|i| format!("line {}", i)).collect();
        fs::write(&path, text.join("\n")).unwrap();

        let tail = tail_lines(&path);
        assert!(tail.starts_with("line 10"));
        assert!(tail.ends_with("line 29"));
        assert_eq!(tail_lines(&dir.path().join("missing")), "");
    }

    #[test]
    fn test_transfer_directory_copy_keeps_source() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("from");
        fs::create_dir_all(from.join("sub")).unwrap();
        fs::write(from.join("sub/a.txt"), "a").unwrap();

        let to = dir.path().join("to");
        transfer(&from, &to, true).unwrap();

        assert!(to.join("sub/a.txt").exists());
        assert!(from.join("sub/a.txt").exists());
    }

    #[test]
    fn test_mark_failed() {
        let dir = TempDir::new().unwrap();
        let runner = LocalRunner::new(Settings::default());

        let empty = dir.path().join("calc-empty");
        fs::create_dir(&empty).unwrap();
        assert_eq!(runner.mark_failed(&empty), None);
        assert!(!empty.exists());

        let used = dir.path().join("calc-used");
        fs::create_dir(&used).unwrap();
        fs::write(used.join("dftb_in.hsd"), "Geometry {}").unwrap();
        let kept = runner.mark_failed(&used).unwrap();
        assert_eq!(kept, dir.path().join("failed-calc-used"));
        assert!(kept.join("dftb_in.hsd").exists());
        assert!(!used.exists());
    }

    #[test]
    fn test_relocated_updates_run_directory() {
        let err = ExecutionError::Calculator {
            program: Program::Dftb,
            dir: PathBuf::from("/scratch/calc-1"),
            source: CalculatorError::parse("results.tag", "missing total_energy"),
        };
        match err.relocated(PathBuf::from("/scratch/failed-calc-1")) {
            ExecutionError::Calculator { dir, .. } => {
                assert_eq!(dir, PathBuf::from("/scratch/failed-calc-1"))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_tail_lines_tolerates_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dftb.err");
        fs::write(&path, b"ERROR: SCC \xff\xfe not converged\n").unwrap();

        let tail = tail_lines(&path);
        assert!(tail.starts_with("ERROR: SCC"));
        assert!(tail.ends_with("not converged"));
    }

    #[test]
    fn test_describe_exit() {
        assert_eq!(describe_exit(&Some(2)), "status 2");
        assert_eq!(describe_exit(&None), "a signal");
    }
}
