//! Psi4 recipes for molecular calculations

use calc_config::ConfigMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use super::{prepare_parameters, RecipeError, RecognizedOption};
use crate::atoms::Atoms;
use crate::calculator::Psi4;
use crate::files::CopyFiles;
use crate::runner::Runner;
use crate::summary::{summarize_run, RunSummary};

pub const STATIC_NAME: &str = "Psi4 Static";

/// Defaults set by the Psi4 static recipe
pub const RECOGNIZED_OPTIONS: &[RecognizedOption] = &[
    RecognizedOption {
        key: "mem",
        default: "16GB",
        effect: "memory line of the input",
    },
    RecognizedOption {
        key: "num_threads",
        default: "max",
        effect: "thread count; max uses every available core",
    },
    RecognizedOption {
        key: "method",
        default: "wb97m-v",
        effect: "method passed to energy()",
    },
    RecognizedOption {
        key: "basis",
        default: "def2-tzvp",
        effect: "basis set",
    },
    RecognizedOption {
        key: "charge",
        default: "the recipe's charge",
        effect: "molecular charge",
    },
    RecognizedOption {
        key: "multiplicity",
        default: "the recipe's spin multiplicity",
        effect: "spin multiplicity",
    },
    RecognizedOption {
        key: "reference",
        default: "uks if multiplicity > 1, else rks",
        effect: "SCF reference",
    },
];

/// Inputs to the Psi4 static recipe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Psi4Options {
    pub charge: i32,
    pub spin_multiplicity: u32,
    pub method: String,
    pub basis: String,
}

impl Default for Psi4Options {
    fn default() -> Self {
        Self {
            charge: 0,
            spin_multiplicity: 1,
            method: "wb97m-v".to_string(),
            basis: "def2-tzvp".to_string(),
        }
    }
}

impl Psi4Options {
    /// Defaults for a single-point calculation
    pub fn static_defaults(&self) -> ConfigMap {
        let reference = if self.spin_multiplicity > 1 { "uks" } else { "rks" };
        ConfigMap::new()
            .with("mem", "16GB")
            .with("num_threads", "max")
            .with("method", self.method.as_str())
            .with("basis", self.basis.as_str())
            .with("charge", self.charge)
            .with("multiplicity", self.spin_multiplicity)
            .with("reference", reference)
    }
}

/// Shared body of the Psi4 recipes: merge parameters, run, summarize.
#[allow(clippy::too_many_arguments)]
pub fn base_fn(
    runner: &dyn Runner,
    atoms: &Atoms,
    charge: i32,
    spin_multiplicity: u32,
    calc_defaults: &ConfigMap,
    calc_swaps: Option<&ConfigMap>,
    additional_fields: Option<&Map<String, Value>>,
    copy_files: Option<&CopyFiles>,
) -> Result<RunSummary, RecipeError> {
    atoms.validate()?;
    if spin_multiplicity < 1 {
        return Err(RecipeError::InvalidMultiplicity(spin_multiplicity));
    }

    let parameters = prepare_parameters(calc_defaults, calc_swaps);
    let calculator = Psi4::new(parameters);
    let final_atoms = runner.run(atoms, &calculator, copy_files)?;

    Ok(summarize_run(
        &final_atoms,
        atoms,
        Some((charge, spin_multiplicity)),
        additional_fields,
    ))
}

/// Single-point Psi4 calculation
pub fn static_job(
    runner: &dyn Runner,
    atoms: &Atoms,
    options: &Psi4Options,
    copy_files: Option<&CopyFiles>,
    calc_swaps: Option<&ConfigMap>,
) -> Result<RunSummary, RecipeError> {
    info!(
        method = %options.method,
        basis = %options.basis,
        formula = %atoms.formula(),
        "Psi4 static job"
    );

    let mut fields = Map::new();
    fields.insert("name".to_string(), Value::String(STATIC_NAME.to_string()));

    base_fn(
        runner,
        atoms,
        options.charge,
        options.spin_multiplicity,
        &options.static_defaults(),
        calc_swaps,
        Some(&fields),
        copy_files,
    )
}
