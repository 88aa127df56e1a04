//! Psi4 calculator
//!
//! Writes a psithon input. A handful of keys have dedicated meaning
//! (`mem`, `num_threads`, `method`, `charge`, `multiplicity`); every other
//! key becomes a `set <key> <value>` line.

use calc_config::{ConfigMap, ConfigValue};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::{CalcOutput, Calculator, CalculatorError, Program, HARTREE_EV};
use crate::atoms::Atoms;

pub const INPUT_FILE: &str = "input.dat";
pub const OUTPUT_FILE: &str = "output.dat";

/// Marker line printed by the generated input after the energy call
const ENERGY_MARKER: &str = "calc-recipes total energy:";

/// Keys consumed by the input writer instead of being passed to `set`
const RESERVED_KEYS: &[&str] = &["mem", "num_threads", "method", "charge", "multiplicity"];

/// Psi4 calculator with merged parameters
#[derive(Debug, Clone)]
pub struct Psi4 {
    parameters: ConfigMap,
}

impl Psi4 {
    pub fn new(parameters: ConfigMap) -> Self {
        Self { parameters }
    }

    fn method(&self) -> Result<&str, CalculatorError> {
        self.parameters
            .get("method")
            .and_then(ConfigValue::as_str)
            .ok_or_else(|| CalculatorError::invalid("method", "a method name is required"))
    }

    fn integer(&self, key: &str, default: i64) -> Result<i64, CalculatorError> {
        match self.parameters.get(key) {
            None | Some(ConfigValue::Null) => Ok(default),
            Some(value) => value
                .as_i64()
                .ok_or_else(|| CalculatorError::invalid(key, "expected an integer")),
        }
    }

    fn threads(&self) -> Result<Option<usize>, CalculatorError> {
        match self.parameters.get("num_threads") {
            None | Some(ConfigValue::Null) => Ok(None),
            Some(ConfigValue::String(s)) if s == "max" => Ok(Some(
                std::thread::available_parallelism().map_or(1, |n| n.get()),
            )),
            Some(ConfigValue::Integer(n)) if *n > 0 => Ok(Some(*n as usize)),
            Some(_) => Err(CalculatorError::invalid(
                "num_threads",
                "expected a positive integer or \"max\"",
            )),
        }
    }

    /// Render the psithon input for `atoms`
    pub fn render_input(&self, atoms: &Atoms) -> Result<String, CalculatorError> {
        if atoms.any_periodic() {
            return Err(CalculatorError::Unsupported {
                calculator: "Psi4",
                what: "periodic boundary conditions".to_string(),
            });
        }

        let method = self.method()?;
        let charge = self.integer("charge", 0)?;
        let multiplicity = self.integer("multiplicity", 1)?;
        if multiplicity < 1 {
            return Err(CalculatorError::invalid("multiplicity", "must be at least 1"));
        }

        let mut out = String::new();
        if let Some(mem) = self.parameters.get("mem").filter(|v| !v.is_null()) {
            out.push_str(&format!("memory {}\n", render_value("mem", mem)?));
        }
        if let Some(threads) = self.threads()? {
            out.push_str(&format!("set_num_threads({})\n", threads));
        }

        out.push_str("\nmolecule {\n");
        out.push_str(&format!("{} {}\n", charge, multiplicity));
        for (symbol, position) in atoms.symbols.iter().zip(&atoms.positions) {
            out.push_str(&format!(
                "{:<3} {:>20.12} {:>20.12} {:>20.12}\n",
                symbol, position[0], position[1], position[2]
            ));
        }
        out.push_str("units angstrom\nno_reorient\nno_com\n}\n\n");

        for (key, value) in &self.parameters {
            if RESERVED_KEYS.contains(&key.as_str()) || value.is_null() {
                continue;
            }
            out.push_str(&format!("set {} {}\n", key, render_value(key, value)?));
        }

        out.push_str(&format!(
            "\ncalc_energy = energy('{}')\npsi4.core.print_out(\"\\n{} %.12f\\n\" % calc_energy)\n",
            method, ENERGY_MARKER
        ));
        Ok(out)
    }
}

impl Calculator for Psi4 {
    fn program(&self) -> Program {
        Program::Psi4
    }

    fn parameters(&self) -> &ConfigMap {
        &self.parameters
    }

    fn write_input(&self, atoms: &Atoms, dir: &Path) -> Result<(), CalculatorError> {
        let input = self.render_input(atoms)?;
        fs::write(dir.join(INPUT_FILE), input)?;
        debug!(dir = %dir.display(), "wrote {}", INPUT_FILE);
        Ok(())
    }

    fn command_args(&self) -> Vec<String> {
        vec![INPUT_FILE.to_string(), OUTPUT_FILE.to_string()]
    }

    fn read_output(&self, _atoms: &Atoms, dir: &Path) -> Result<CalcOutput, CalculatorError> {
        let contents = fs::read_to_string(dir.join(OUTPUT_FILE))
            .map_err(|e| CalculatorError::parse(OUTPUT_FILE, format!("cannot read: {}", e)))?;
        let hartree = parse_energy(&contents)?;
        Ok(CalcOutput {
            energy: Some(hartree * HARTREE_EV),
            ..CalcOutput::default()
        })
    }
}

fn render_value(key: &str, value: &ConfigValue) -> Result<String, CalculatorError> {
    match value {
        ConfigValue::String(s) => Ok(s.clone()),
        ConfigValue::Bool(b) => Ok(b.to_string()),
        ConfigValue::Integer(i) => Ok(i.to_string()),
        ConfigValue::Float(f) => Ok(f.to_string()),
        ConfigValue::List(items) => Ok(format!(
            "[{}]",
            items
                .iter()
                .map(|item| render_value(key, item))
                .collect::<Result<Vec<_>, _>>()?
                .join(", ")
        )),
        other => Err(CalculatorError::invalid(
            key,
            format!("cannot pass a {} to psi4 set", other.type_name()),
        )),
    }
}

/// Final energy in hartree: the marker line if present, else the last `Total Energy =`.
fn parse_energy(contents: &str) -> Result<f64, CalculatorError> {
    let from_marker = contents
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix(ENERGY_MARKER));
    let from_scf = || {
        contents
            .lines()
            .rev()
            .find_map(|line| line.split_once("Total Energy =").map(|(_, rest)| rest))
    };

    let text = from_marker
        .or_else(from_scf)
        .ok_or_else(|| CalculatorError::parse(OUTPUT_FILE, "no final energy found"))?;

    text.split_whitespace()
        .next()
        .and_then(|t| t.parse::<f64>().ok())
        .ok_or_else(|| CalculatorError::parse(OUTPUT_FILE, format!("bad energy '{}'", text.trim())))
}
