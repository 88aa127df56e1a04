//! Calculator interfaces for external quantum chemistry programs
//!
//! A calculator owns its merged parameters and knows how to:
//! - write the program's input files into a run directory
//! - name the program and the arguments it is launched with
//! - parse the program's output back into energies, forces and geometry
//!
//! Launching the program is the runner's job.

mod dftb;
mod psi4;

pub use dftb::Dftb;
pub use psi4::Psi4;

use calc_config::ConfigMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::atoms::Atoms;

/// Hartree in eV
pub const HARTREE_EV: f64 = 27.211386024367243;

/// Bohr radius in Å
pub const BOHR_ANGSTROM: f64 = 0.52917721067;

/// Errors raised while preparing input or reading output
#[derive(Debug, Error)]
pub enum CalculatorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("could not parse {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("{calculator} does not support {what}")]
    Unsupported {
        calculator: &'static str,
        what: String,
    },
}

impl CalculatorError {
    pub(crate) fn parse(file: &str, reason: impl Into<String>) -> Self {
        CalculatorError::Parse {
            file: file.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        CalculatorError::InvalidParameter {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// External program a calculator drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Program {
    Dftb,
    Psi4,
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Program::Dftb => write!(f, "dftb"),
            Program::Psi4 => write!(f, "psi4"),
        }
    }
}

/// Parsed output of one calculation
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CalcOutput {
    /// Total energy in eV
    pub energy: Option<f64>,
    /// Forces in eV/Å
    pub forces: Option<Vec<[f64; 3]>>,
    /// Final positions in Å, when the program moved the atoms
    pub positions: Option<Vec<[f64; 3]>>,
    /// Final cell in Å, when the program changed it
    pub cell: Option<[[f64; 3]; 3]>,
}

/// Contract every calculator implements
pub trait Calculator {
    /// Which program this calculator drives
    fn program(&self) -> Program;

    /// Parameters the calculator was built with (after merging)
    fn parameters(&self) -> &ConfigMap;

    /// Write all input files for `atoms` into `dir`
    fn write_input(&self, atoms: &Atoms, dir: &Path) -> Result<(), CalculatorError>;

    /// Arguments appended to the configured program command
    fn command_args(&self) -> Vec<String>;

    /// Parse the outputs left in `dir` after the program exited successfully
    fn read_output(&self, atoms: &Atoms, dir: &Path) -> Result<CalcOutput, CalculatorError>;
}
