//! DFTB+ recipes: static and geometry-optimization jobs

use calc_config::{ConfigMap, ConfigValue};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::info;

use super::{prepare_parameters, RecipeError, RecognizedOption};
use crate::atoms::Atoms;
use crate::calculator::Dftb;
use crate::files::CopyFiles;
use crate::runner::Runner;
use crate::summary::{summarize_run, RunSummary};

pub const STATIC_NAME: &str = "DFTB+ Static";
pub const RELAX_NAME: &str = "DFTB+ Relax";

/// Defaults set by the DFTB+ recipes
pub const RECOGNIZED_OPTIONS: &[RecognizedOption] = &[
    RecognizedOption {
        key: "Hamiltonian_",
        default: "xTB for GFN methods, DFTB otherwise",
        effect: "Hamiltonian type",
    },
    RecognizedOption {
        key: "Hamiltonian_Method",
        default: "the selected GFN method",
        effect: "xTB parametrization; unset for DFTB",
    },
    RecognizedOption {
        key: "Hamiltonian_MaxSccIterations",
        default: "200",
        effect: "SCC iteration limit",
    },
    RecognizedOption {
        key: "kpts",
        default: "[1, 1, 1] when any direction is periodic, else null",
        effect: "Monkhorst-Pack grid, or a list of explicit k-points",
    },
    RecognizedOption {
        key: "Driver_",
        default: "GeometryOptimization (relax only)",
        effect: "geometry driver",
    },
    RecognizedOption {
        key: "Driver_AppendGeometries",
        default: "Yes (relax only)",
        effect: "write every optimization step to the geometry file",
    },
    RecognizedOption {
        key: "Driver_LatticeOpt",
        default: "Yes if relax_cell, else No (relax only)",
        effect: "optimize lattice vectors",
    },
    RecognizedOption {
        key: "Driver_MaxSteps",
        default: "2000 (relax only)",
        effect: "optimization step limit",
    },
];

/// Hamiltonian selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DftbMethod {
    Gfn1Xtb,
    #[default]
    Gfn2Xtb,
    Dftb,
}

impl DftbMethod {
    pub fn is_xtb(self) -> bool {
        matches!(self, DftbMethod::Gfn1Xtb | DftbMethod::Gfn2Xtb)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DftbMethod::Gfn1Xtb => "GFN1-xTB",
            DftbMethod::Gfn2Xtb => "GFN2-xTB",
            DftbMethod::Dftb => "DFTB",
        }
    }
}

impl fmt::Display for DftbMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DftbMethod {
    type Err = RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gfn1-xtb" => Ok(DftbMethod::Gfn1Xtb),
            "gfn2-xtb" => Ok(DftbMethod::Gfn2Xtb),
            "dftb" => Ok(DftbMethod::Dftb),
            _ => Err(RecipeError::InvalidMethod(s.to_string())),
        }
    }
}

/// Defaults for a single-point calculation
pub fn static_defaults(atoms: &Atoms, method: DftbMethod, kpts: Option<[u32; 3]>) -> ConfigMap {
    let hamiltonian = if method.is_xtb() { "xTB" } else { "DFTB" };
    let kpts = match kpts {
        Some(mesh) => ConfigValue::from(mesh.to_vec()),
        None if atoms.any_periodic() => ConfigValue::from(vec![1, 1, 1]),
        None => ConfigValue::Null,
    };

    let mut defaults = ConfigMap::new()
        .with("Hamiltonian_", hamiltonian)
        .with("Hamiltonian_MaxSccIterations", 200)
        .with("kpts", kpts);
    if method.is_xtb() {
        defaults.insert("Hamiltonian_Method", method.as_str());
    }
    defaults
}

/// Defaults for a geometry optimization
pub fn relax_defaults(
    atoms: &Atoms,
    method: DftbMethod,
    kpts: Option<[u32; 3]>,
    relax_cell: bool,
) -> ConfigMap {
    let mut defaults = static_defaults(atoms, method, kpts);
    defaults.insert("Driver_", "GeometryOptimization");
    defaults.insert("Driver_AppendGeometries", "Yes");
    defaults.insert("Driver_LatticeOpt", if relax_cell { "Yes" } else { "No" });
    defaults.insert("Driver_MaxSteps", 2000);
    defaults
}

fn check_kpts(kpts: Option<[u32; 3]>) -> Result<(), RecipeError> {
    match kpts {
        Some(mesh) if mesh.contains(&0) => Err(RecipeError::InvalidKpts(format!(
            "grid sizes must be positive, got {:?}",
            mesh
        ))),
        _ => Ok(()),
    }
}

fn run(
    runner: &dyn Runner,
    atoms: &Atoms,
    defaults: ConfigMap,
    calc_swaps: Option<&ConfigMap>,
    copy_files: Option<&CopyFiles>,
    name: &str,
) -> Result<RunSummary, RecipeError> {
    let parameters = prepare_parameters(&defaults, calc_swaps);
    let calculator = Dftb::new(parameters);
    let final_atoms = runner.run(atoms, &calculator, copy_files)?;

    let mut fields = Map::new();
    fields.insert("name".to_string(), Value::String(name.to_string()));
    Ok(summarize_run(&final_atoms, atoms, None, Some(&fields)))
}

/// Single-point DFTB+ calculation
pub fn static_job(
    runner: &dyn Runner,
    atoms: &Atoms,
    method: DftbMethod,
    kpts: Option<[u32; 3]>,
    copy_files: Option<&CopyFiles>,
    calc_swaps: Option<&ConfigMap>,
) -> Result<RunSummary, RecipeError> {
    atoms.validate()?;
    check_kpts(kpts)?;
    info!(%method, formula = %atoms.formula(), "DFTB+ static job");

    let defaults = static_defaults(atoms, method, kpts);
    run(runner, atoms, defaults, calc_swaps, copy_files, STATIC_NAME)
}

/// DFTB+ geometry optimization, optionally relaxing the cell
pub fn relax_job(
    runner: &dyn Runner,
    atoms: &Atoms,
    method: DftbMethod,
    kpts: Option<[u32; 3]>,
    relax_cell: bool,
    copy_files: Option<&CopyFiles>,
    calc_swaps: Option<&ConfigMap>,
) -> Result<RunSummary, RecipeError> {
    atoms.validate()?;
    check_kpts(kpts)?;
    info!(%method, relax_cell, formula = %atoms.formula(), "DFTB+ relax job");

    let defaults = relax_defaults(atoms, method, kpts, relax_cell);
    run(runner, atoms, defaults, calc_swaps, copy_files, RELAX_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRunner;
    use crate::runner::ExecutionError;
    use calc_config::Remove;
    use serde_json::json;

    fn water() -> Atoms {
        Atoms::molecule(
            vec!["O".into(), "H".into(), "H".into()],
            vec![[0.0, 0.0, 0.119], [0.0, 0.763, -0.477], [0.0, -0.763, -0.477]],
        )
    }

    fn copper() -> Atoms {
        Atoms::periodic(
            vec!["Cu".into()],
            vec![[0.0, 0.0, 0.0]],
            [[0.0, 1.805, 1.805], [1.805, 0.0, 1.805], [1.805, 1.805, 0.0]],
        )
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("GFN2-xTB".parse::<DftbMethod>().unwrap(), DftbMethod::Gfn2Xtb);
        assert_eq!("gfn1-xtb".parse::<DftbMethod>().unwrap(), DftbMethod::Gfn1Xtb);
        assert_eq!("DFTB".parse::<DftbMethod>().unwrap(), DftbMethod::Dftb);
        assert!(matches!(
            "GFN3-xTB".parse::<DftbMethod>(),
            Err(RecipeError::InvalidMethod(m)) if m == "GFN3-xTB"
        ));
    }

    #[test]
    fn test_static_defaults_molecule() {
        let defaults = static_defaults(&water(), DftbMethod::Gfn2Xtb, None);
        assert_eq!(defaults.get("Hamiltonian_"), Some(&ConfigValue::from("xTB")));
        assert_eq!(defaults.get("Hamiltonian_Method"), Some(&ConfigValue::from("GFN2-xTB")));
        assert_eq!(defaults.get("Hamiltonian_MaxSccIterations"), Some(&ConfigValue::Integer(200)));
        assert_eq!(defaults.get("kpts"), Some(&ConfigValue::Null));
    }

    #[test]
    fn test_static_defaults_periodic() {
        let defaults = static_defaults(&copper(), DftbMethod::Dftb, None);
        assert_eq!(defaults.get("Hamiltonian_"), Some(&ConfigValue::from("DFTB")));
        assert!(!defaults.contains_key("Hamiltonian_Method"));
        assert_eq!(defaults.get("kpts"), Some(&ConfigValue::from(vec![1, 1, 1])));

        let defaults = static_defaults(&copper(), DftbMethod::Dftb, Some([3, 3, 3]));
        assert_eq!(defaults.get("kpts"), Some(&ConfigValue::from(vec![3, 3, 3])));
    }

    #[test]
    fn test_relax_defaults() {
        let defaults = relax_defaults(&copper(), DftbMethod::Gfn1Xtb, None, true);
        assert_eq!(defaults.get("Driver_"), Some(&ConfigValue::from("GeometryOptimization")));
        assert_eq!(defaults.get("Driver_AppendGeometries"), Some(&ConfigValue::from("Yes")));
        assert_eq!(defaults.get("Driver_LatticeOpt"), Some(&ConfigValue::from("Yes")));
        assert_eq!(defaults.get("Driver_MaxSteps"), Some(&ConfigValue::Integer(2000)));

        let defaults = relax_defaults(&copper(), DftbMethod::Gfn1Xtb, None, false);
        assert_eq!(defaults.get("Driver_LatticeOpt"), Some(&ConfigValue::from("No")));
    }

    #[test]
    fn test_recognized_options_cover_defaults() {
        let defaults = relax_defaults(&copper(), DftbMethod::Gfn2Xtb, None, false);
        for key in defaults.keys() {
            assert!(
                crate::recipes::find_option(RECOGNIZED_OPTIONS, key).is_some(),
                "{} undocumented",
                key
            );
        }
    }

    #[test]
    fn test_static_job_with_swaps() {
        let runner = MockRunner::new(-42.0);
        let swaps = ConfigMap::new()
            .with("Hamiltonian_MaxSccIterations", Remove)
            .with("Hamiltonian_Filling_", "Fermi");

        let summary =
            static_job(&runner, &water(), DftbMethod::Gfn2Xtb, None, None, Some(&swaps)).unwrap();

        assert_eq!(summary.field("name"), Some(&json!(STATIC_NAME)));
        assert_eq!(summary.results.energy, Some(-42.0));
        assert!(!summary.parameters.contains_key("Hamiltonian_MaxSccIterations"));
        assert_eq!(
            summary.parameters.get("Hamiltonian_Filling_"),
            Some(&ConfigValue::from("Fermi"))
        );

        let runs = runner.runs();
        assert_eq!(runs.len(), 1);
        assert!(!runs[0].parameters.contains_key("Hamiltonian_MaxSccIterations"));
    }

    #[test]
    fn test_relax_job_only_records_name() {
        let runner = MockRunner::new(-10.0);
        let summary =
            relax_job(&runner, &copper(), DftbMethod::Gfn2Xtb, Some([2, 2, 2]), true, None, None)
                .unwrap();

        assert_eq!(summary.field("name"), Some(&json!(RELAX_NAME)));
        assert_eq!(summary.field("relax_cell"), None);
        assert_eq!(summary.additional_fields.len(), 1);
        assert_eq!(summary.parameters.get("Driver_LatticeOpt"), Some(&ConfigValue::from("Yes")));
        assert_eq!(summary.parameters.get("kpts"), Some(&ConfigValue::from(vec![2, 2, 2])));
    }

    #[test]
    fn test_zero_kpoint_grid_rejected() {
        let runner = MockRunner::new(0.0);
        let err = static_job(&runner, &copper(), DftbMethod::Dftb, Some([0, 1, 1]), None, None)
            .unwrap_err();
        assert!(matches!(err, RecipeError::InvalidKpts(_)));
        assert!(runner.runs().is_empty());
    }

    #[test]
    fn test_runner_failure_propagates() {
        let runner = MockRunner::failing(1);
        let err = static_job(&runner, &water(), DftbMethod::Gfn2Xtb, None, None, None).unwrap_err();
        assert!(matches!(
            err,
            RecipeError::Execution(ExecutionError::NonZeroExit { code: Some(1), .. })
        ));
    }

    #[test]
    fn test_invalid_structure_rejected() {
        let mut atoms = water();
        atoms.positions.pop();
        let runner = MockRunner::new(0.0);
        let err = static_job(&runner, &atoms, DftbMethod::Gfn2Xtb, None, None, None).unwrap_err();
        assert!(matches!(err, RecipeError::InvalidStructure(_)));
    }
}
