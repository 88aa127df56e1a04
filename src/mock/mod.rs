//! Mock runner
//!
//! Stands in for [`LocalRunner`](crate::runner::LocalRunner) when the
//! calculator binaries are not installed. Every call is recorded; results
//! are a fixed energy, or a configured failure.
//!
//! With an input directory set, the calculator's input files are written
//! there so the rendered input can be inspected.

use calc_config::ConfigMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::atoms::Atoms;
use crate::calculator::{CalcOutput, Calculator, Program};
use crate::files::CopyFiles;
use crate::runner::{attach_results, ExecutionError, Runner};

/// One call made against the mock
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    pub program: Program,
    pub parameters: ConfigMap,
    pub copy_files: Option<CopyFiles>,
}

#[derive(Debug, Clone)]
enum Outcome {
    Energy(f64),
    Exit(i32),
}

/// Runner that never launches a process
#[derive(Debug)]
pub struct MockRunner {
    outcome: Outcome,
    input_dir: Option<PathBuf>,
    runs: Mutex<Vec<RecordedRun>>,
}

impl MockRunner {
    /// Succeed with this energy (eV)
    pub fn new(energy: f64) -> Self {
        Self {
            outcome: Outcome::Energy(energy),
            input_dir: None,
            runs: Mutex::new(Vec::new()),
        }
    }

    /// Fail every run as if the program exited with `code`
    pub fn failing(code: i32) -> Self {
        Self {
            outcome: Outcome::Exit(code),
            ..Self::new(0.0)
        }
    }

    /// Write calculator input files into `dir` on each run
    pub fn with_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.input_dir = Some(dir.into());
        self
    }

    /// Calls recorded so far
    pub fn runs(&self) -> Vec<RecordedRun> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedRun>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Runner for MockRunner {
    fn run(
        &self,
        atoms: &Atoms,
        calculator: &dyn Calculator,
        copy_files: Option<&CopyFiles>,
    ) -> Result<Atoms, ExecutionError> {
        let program = calculator.program();
        self.lock().push(RecordedRun {
            program,
            parameters: calculator.parameters().clone(),
            copy_files: copy_files.cloned(),
        });

        if let Some(dir) = &self.input_dir {
            calculator
                .write_input(atoms, dir)
                .map_err(|source| ExecutionError::Calculator {
                    program,
                    dir: dir.clone(),
                    source,
                })?;
        }

        match self.outcome {
            Outcome::Energy(energy) => {
                let output = CalcOutput {
                    energy: Some(energy),
                    forces: Some(vec![[0.0; 3]; atoms.len()]),
                    ..CalcOutput::default()
                };
                Ok(attach_results(atoms, calculator, output, self.input_dir.clone()))
            }
            Outcome::Exit(code) => Err(ExecutionError::NonZeroExit {
                program: program.to_string(),
                code: Some(code),
                dir: self.input_dir.clone().unwrap_or_default(),
                output_tail: "mock failure".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::Dftb;
    use tempfile::TempDir;

    fn h2() -> Atoms {
        Atoms::molecule(
            vec!["H".into(), "H".into()],
            vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.74]],
        )
    }

    #[test]
    fn test_records_runs() {
        let runner = MockRunner::new(-1.5);
        let calc = Dftb::new(ConfigMap::new().with("Hamiltonian_", "xTB"));

        let atoms = runner.run(&h2(), &calc, None).unwrap();

        let results = atoms.results.unwrap();
        assert_eq!(results.energy, Some(-1.5));
        assert_eq!(results.forces.map(|f| f.len()), Some(2));
        let runs = runner.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].program, Program::Dftb);
        assert_eq!(runs[0].parameters, *calc.parameters());
    }

    #[test]
    fn test_writes_input() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::new(0.0).with_input_dir(dir.path());
        let calc = Dftb::new(ConfigMap::new());

        let atoms = runner.run(&h2(), &calc, None).unwrap();

        assert!(dir.path().join("dftb_in.hsd").exists());
        assert_eq!(atoms.results.and_then(|r| r.dir_name), Some(dir.path().to_path_buf()));
    }

    #[test]
    fn test_failure() {
        let runner = MockRunner::failing(3);
        let calc = Dftb::new(ConfigMap::new());
        let err = runner.run(&h2(), &calc, None).unwrap_err();
        assert!(matches!(err, ExecutionError::NonZeroExit { code: Some(3), .. }));
        assert_eq!(runner.runs().len(), 1);
    }
}
