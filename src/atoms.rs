//! Minimal atomic structure record passed between recipes, runners and the summarizer.

use calc_config::ConfigMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors for loading or validating a structure
#[derive(Debug, Error)]
pub enum AtomsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid structure: {0}")]
    Invalid(String),
}

/// Results attached to a structure by a runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalcResults {
    /// Calculator name (e.g., "dftb", "psi4")
    pub calculator: String,

    /// Parameters the calculator was constructed with
    pub parameters: ConfigMap,

    /// Total energy in eV
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,

    /// Forces in eV/Å, one row per atom
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forces: Option<Vec<[f64; 3]>>,

    /// Directory holding the calculation outputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir_name: Option<PathBuf>,
}

/// Atomic structure: symbols, Cartesian positions in Å, optional cell and periodicity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atoms {
    pub symbols: Vec<String>,

    pub positions: Vec<[f64; 3]>,

    /// Lattice vectors as rows, in Å
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell: Option<[[f64; 3]; 3]>,

    #[serde(default)]
    pub pbc: [bool; 3],

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<CalcResults>,
}

impl Atoms {
    /// Non-periodic structure without a cell
    pub fn molecule(symbols: Vec<String>, positions: Vec<[f64; 3]>) -> Self {
        Self {
            symbols,
            positions,
            cell: None,
            pbc: [false; 3],
            results: None,
        }
    }

    /// Fully periodic structure
    pub fn periodic(symbols: Vec<String>, positions: Vec<[f64; 3]>, cell: [[f64; 3]; 3]) -> Self {
        Self {
            symbols,
            positions,
            cell: Some(cell),
            pbc: [true; 3],
            results: None,
        }
    }

    /// Load a structure from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self, AtomsError> {
        let contents = fs::read_to_string(path)?;
        let atoms: Atoms = serde_json::from_str(&contents)?;
        atoms.validate()?;
        Ok(atoms)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// True if any direction is periodic
    pub fn any_periodic(&self) -> bool {
        self.pbc.iter().any(|&p| p)
    }

    /// Check internal consistency
    pub fn validate(&self) -> Result<(), AtomsError> {
        if self.is_empty() {
            return Err(AtomsError::Invalid("structure has no atoms".to_string()));
        }
        if self.symbols.len() != self.positions.len() {
            return Err(AtomsError::Invalid(format!(
                "{} symbols but {} positions",
                self.symbols.len(),
                self.positions.len()
            )));
        }
        if self.any_periodic() && self.cell.is_none() {
            return Err(AtomsError::Invalid(
                "periodic structure requires a cell".to_string(),
            ));
        }
        if let Some(bad) = self.positions.iter().flatten().find(|x| !x.is_finite()) {
            return Err(AtomsError::Invalid(format!("non-finite coordinate {}", bad)));
        }
        Ok(())
    }

    /// Unique element symbols in order of first appearance
    pub fn species(&self) -> Vec<&str> {
        let mut species: Vec<&str> = Vec::new();
        for symbol in &self.symbols {
            if !species.contains(&symbol.as_str()) {
                species.push(symbol);
            }
        }
        species
    }

    /// Hill-order chemical formula (C, then H, then alphabetical)
    pub fn formula(&self) -> String {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for symbol in &self.symbols {
            *counts.entry(symbol.as_str()).or_default() += 1;
        }

        let mut order: Vec<&str> = Vec::new();
        if counts.contains_key("C") {
            order.push("C");
            if counts.contains_key("H") {
                order.push("H");
            }
        }
        let rest: Vec<&str> = counts
            .keys()
            .copied()
            .filter(|symbol| !order.contains(symbol))
            .collect();
        order.extend(rest);

        order
            .into_iter()
            .map(|symbol| match counts[symbol] {
                1 => symbol.to_string(),
                n => format!("{}{}", symbol, n),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn water() -> Atoms {
        Atoms::molecule(
            vec!["O".into(), "H".into(), "H".into()],
            vec![[0.0, 0.0, 0.119], [0.0, 0.763, -0.477], [0.0, -0.763, -0.477]],
        )
    }

    #[test]
    fn test_formula_hill_order() {
        assert_eq!(water().formula(), "H2O");

        let methanol = Atoms::molecule(
            vec!["O", "C", "H", "H", "H", "H"].into_iter().map(String::from).collect(),
            vec![[0.0; 3]; 6],
        );
        assert_eq!(methanol.formula(), "CH4O");
    }

    #[test]
    fn test_species_order() {
        assert_eq!(water().species(), vec!["O", "H"]);
    }

    #[test]
    fn test_validate_mismatch() {
        let mut atoms = water();
        atoms.positions.pop();
        assert!(matches!(atoms.validate(), Err(AtomsError::Invalid(_))));
    }

    #[test]
    fn test_validate_periodic_without_cell() {
        let mut atoms = water();
        atoms.pbc = [true, false, false];
        assert!(atoms.validate().is_err());
        atoms.cell = Some([[10.0, 0.0, 0.0], [0.0, 10.0, 0.0], [0.0, 0.0, 10.0]]);
        assert!(atoms.validate().is_ok());
    }

    #[test]
    fn test_deserialize_defaults() {
        let atoms: Atoms = serde_json::from_value(json!({
            "symbols": ["H", "H"],
            "positions": [[0.0, 0.0, 0.0], [0.0, 0.0, 0.74]]
        }))
        .unwrap();
        assert!(!atoms.any_periodic());
        assert!(atoms.cell.is_none());
        assert!(atoms.results.is_none());
    }
}
