//! DFTB+ calculator
//!
//! Parameters use flat underscore paths: `Hamiltonian_` sets the type of the
//! `Hamiltonian` block, `Hamiltonian_MaxSccIterations` sets a key inside it.
//! Map values nest the same way. `kpts` is special and becomes a
//! `KPointsAndWeights` block inside the Hamiltonian. Null values are skipped.

use calc_config::{merge, ConfigMap, ConfigValue};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

use super::{CalcOutput, Calculator, CalculatorError, Program, BOHR_ANGSTROM, HARTREE_EV};
use crate::atoms::Atoms;

pub const INPUT_FILE: &str = "dftb_in.hsd";
pub const RESULTS_TAG_FILE: &str = "results.tag";
pub const GEOMETRY_OUT_FILE: &str = "geo_end.gen";

const KPTS_KEY: &str = "kpts";

/// DFTB+ calculator with merged parameters
#[derive(Debug, Clone)]
pub struct Dftb {
    parameters: ConfigMap,
}

impl Dftb {
    /// Build from recipe parameters. Calculator-level defaults sit underneath them.
    pub fn new(parameters: ConfigMap) -> Self {
        let defaults = ConfigMap::new()
            .with("Hamiltonian_", "DFTB")
            .with("Options_WriteResultsTag", "Yes")
            .with("ParserOptions_IgnoreUnprocessedNodes", "Yes")
            .with("Analysis_CalculateForces", "Yes");
        Self {
            parameters: merge(Some(&defaults), Some(&parameters)),
        }
    }

    fn is_relaxation(&self) -> bool {
        self.parameters
            .get("Driver_")
            .map_or(false, |driver| !driver.is_null())
    }

    /// Render the full `dftb_in.hsd` for `atoms`
    pub fn render_input(&self, atoms: &Atoms) -> Result<String, CalculatorError> {
        let mut root = HsdBlock::default();
        root.children
            .push(("Geometry".to_string(), HsdNode::Block(gen_block(atoms)?)));

        for (key, value) in &self.parameters {
            if key != KPTS_KEY {
                insert_parameter(&mut root, key, value)?;
            }
        }

        if let Some(kpts) = self.parameters.get(KPTS_KEY) {
            if let Some(block) = kpoints_block(kpts)? {
                if !atoms.any_periodic() {
                    return Err(CalculatorError::Unsupported {
                        calculator: "DFTB+",
                        what: "k-points for a non-periodic structure".to_string(),
                    });
                }
                root.block_mut(&["Hamiltonian"])?
                    .children
                    .push(("KPointsAndWeights".to_string(), HsdNode::Block(block)));
            }
        }

        let mut out = String::new();
        root.render(&mut out, 0);
        Ok(out)
    }
}

impl Calculator for Dftb {
    fn program(&self) -> Program {
        Program::Dftb
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
        Vec::new()
    }

    fn read_output(&self, atoms: &Atoms, dir: &Path) -> Result<CalcOutput, CalculatorError> {
        let tag_path = dir.join(RESULTS_TAG_FILE);
        let contents = fs::read_to_string(&tag_path).map_err(|e| {
            CalculatorError::parse(RESULTS_TAG_FILE, format!("cannot read: {}", e))
        })?;
        let tags = parse_results_tag(&contents)?;

        let energy = tags
            .get("total_energy")
            .and_then(|values| values.first())
            .map(|e| e * HARTREE_EV)
            .ok_or_else(|| CalculatorError::parse(RESULTS_TAG_FILE, "missing total_energy"))?;

        let forces = match tags.get("forces") {
            Some(values) => {
                if values.len() != 3 * atoms.len() {
                    return Err(CalculatorError::parse(
                        RESULTS_TAG_FILE,
                        format!("expected {} force components, found {}", 3 * atoms.len(), values.len()),
                    ));
                }
                let scale = HARTREE_EV / BOHR_ANGSTROM;
                Some(
                    values
                        .chunks(3)
                        .map(|f| [f[0] * scale, f[1] * scale, f[2] * scale])
                        .collect(),
                )
            }
            None => None,
        };

        let mut output = CalcOutput {
            energy: Some(energy),
            forces,
            ..CalcOutput::default()
        };

        let geometry_path = dir.join(GEOMETRY_OUT_FILE);
        if self.is_relaxation() && geometry_path.exists() {
            let (positions, cell) = parse_gen(&fs::read_to_string(&geometry_path)?)?;
            if positions.len() != atoms.len() {
                return Err(CalculatorError::parse(
                    GEOMETRY_OUT_FILE,
                    format!("expected {} atoms, found {}", atoms.len(), positions.len()),
                ));
            }
            output.positions = Some(positions);
            output.cell = cell;
        }

        Ok(output)
    }
}

// HSD tree

#[derive(Debug, Default)]
struct HsdBlock {
    kind: Option<String>,
    children: Vec<(String, HsdNode)>,
    lines: Vec<String>,
}

#[derive(Debug)]
enum HsdNode {
    Value(String),
    Block(HsdBlock),
}

impl HsdBlock {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.lines.is_empty()
    }

    fn block_mut(&mut self, path: &[&str]) -> Result<&mut HsdBlock, CalculatorError> {
        let mut current = self;
        for (depth, name) in path.iter().enumerate() {
            let index = match current.children.iter().position(|(n, _)| n == name) {
                Some(index) => index,
                None => {
                    current
                        .children
                        .push((name.to_string(), HsdNode::Block(HsdBlock::default())));
                    current.children.len() - 1
                }
            };
            current = match &mut current.children[index].1 {
                HsdNode::Block(block) => block,
                HsdNode::Value(_) => {
                    return Err(CalculatorError::invalid(
                        &path[..=depth].join("_"),
                        "already set as a value, cannot hold nested keys",
                    ))
                }
            };
        }
        Ok(current)
    }

    fn set_value(&mut self, name: &str, value: String, key: &str) -> Result<(), CalculatorError> {
        match self.children.iter_mut().find(|(n, _)| n == name) {
            Some((_, HsdNode::Block(_))) => Err(CalculatorError::invalid(
                key,
                "already holds nested keys, cannot be set to a value",
            )),
            Some((_, node)) => {
                *node = HsdNode::Value(value);
                Ok(())
            }
            None => {
                self.children.push((name.to_string(), HsdNode::Value(value)));
                Ok(())
            }
        }
    }

    fn render(&self, out: &mut String, indent: usize) {
        let pad = "  ".repeat(indent);
        for (name, node) in &self.children {
            match node {
                HsdNode::Value(value) => out.push_str(&format!("{}{} = {}\n", pad, name, value)),
                HsdNode::Block(block) => {
                    let header = match block.kind.as_deref() {
                        Some(kind) if !kind.is_empty() => format!("{} = {}", name, kind),
                        _ => name.clone(),
                    };
                    if block.is_empty() {
                        out.push_str(&format!("{}{} {{}}\n", pad, header));
                    } else {
                        out.push_str(&format!("{}{} {{\n", pad, header));
                        block.render(out, indent + 1);
                        out.push_str(&format!("{}}}\n", pad));
                    }
                }
            }
        }
        for line in &self.lines {
            out.push_str(&format!("{}{}\n", pad, line));
        }
    }
}

fn insert_parameter(
    root: &mut HsdBlock,
    key: &str,
    value: &ConfigValue,
) -> Result<(), CalculatorError> {
    if value.is_null() {
        return Ok(());
    }

    let segments: Vec<&str> = key.split('_').collect();
    let Some((last, parents)) = segments.split_last() else {
        return Ok(());
    };
    if parents.iter().any(|s| s.is_empty()) || (parents.is_empty() && last.is_empty()) {
        return Err(CalculatorError::invalid(key, "empty path segment"));
    }

    if let ConfigValue::Map(map) = value {
        if last.is_empty() {
            return Err(CalculatorError::invalid(key, "block type must be a scalar"));
        }
        for (child_key, child_value) in map {
            insert_parameter(root, &format!("{}_{}", key, child_key), child_value)?;
        }
        return Ok(());
    }

    let text = render_value(key, value)?;
    if last.is_empty() {
        root.block_mut(parents)?.kind = Some(text);
    } else {
        root.block_mut(parents)?.set_value(last, text, key)?;
    }
    Ok(())
}

fn render_value(key: &str, value: &ConfigValue) -> Result<String, CalculatorError> {
    match value {
        ConfigValue::String(s) => Ok(s.clone()),
        ConfigValue::Bool(true) => Ok("Yes".to_string()),
        ConfigValue::Bool(false) => Ok("No".to_string()),
        ConfigValue::Integer(i) => Ok(i.to_string()),
        ConfigValue::Float(f) => Ok(f.to_string()),
        ConfigValue::List(items) => Ok(items
            .iter()
            .map(|item| render_value(key, item))
            .collect::<Result<Vec<_>, _>>()?
            .join(" ")),
        other => Err(CalculatorError::invalid(
            key,
            format!("cannot render a {} in HSD", other.type_name()),
        )),
    }
}

fn gen_block(atoms: &Atoms) -> Result<HsdBlock, CalculatorError> {
    let species = atoms.species();
    let periodic = atoms.any_periodic();

    let mut lines = vec![
        format!("{} {}", atoms.len(), if periodic { "S" } else { "C" }),
        species.join(" "),
    ];
    for (index, (symbol, position)) in atoms.symbols.iter().zip(&atoms.positions).enumerate() {
        let type_index = species
            .iter()
            .position(|s| s == symbol)
            .map_or(0, |i| i + 1);
        lines.push(format!(
            "{:>5} {:>3} {:>20.12} {:>20.12} {:>20.12}",
            index + 1,
            type_index,
            position[0],
            position[1],
            position[2]
        ));
    }

    if periodic {
        let cell = atoms.cell.ok_or_else(|| {
            CalculatorError::invalid("cell", "periodic structure without a cell")
        })?;
        lines.push(format!("{:>20.12} {:>20.12} {:>20.12}", 0.0, 0.0, 0.0));
        for row in cell {
            lines.push(format!("{:>20.12} {:>20.12} {:>20.12}", row[0], row[1], row[2]));
        }
    }

    Ok(HsdBlock {
        kind: Some("GenFormat".to_string()),
        children: Vec::new(),
        lines,
    })
}

/// Build the `KPointsAndWeights` block; `None` when `kpts` is null.
///
/// A list of three integers is a Monkhorst-Pack grid (shifted by half a
/// step along even directions); a list of 3-vectors is an explicit set of
/// fractional k-points with equal weights.
fn kpoints_block(kpts: &ConfigValue) -> Result<Option<HsdBlock>, CalculatorError> {
    let items = match kpts {
        ConfigValue::Null => return Ok(None),
        ConfigValue::List(items) => items,
        other => {
            return Err(CalculatorError::invalid(
                KPTS_KEY,
                format!("expected a list, found {}", other.type_name()),
            ))
        }
    };

    if items.len() == 3 && items.iter().all(|i| i.as_i64().is_some()) {
        let mesh: Vec<i64> = items.iter().filter_map(ConfigValue::as_i64).collect();
        if mesh.iter().any(|&n| n < 1) {
            return Err(CalculatorError::invalid(KPTS_KEY, "grid sizes must be positive"));
        }
        let mut lines: Vec<String> = (0..3)
            .map(|i| {
                (0..3)
                    .map(|j| if i == j { mesh[i].to_string() } else { "0".to_string() })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        lines.push(
            mesh.iter()
                .map(|&n| if n % 2 == 0 { "0.5" } else { "0.0" })
                .collect::<Vec<_>>()
                .join(" "),
        );
        return Ok(Some(HsdBlock {
            kind: Some("SupercellFolding".to_string()),
            children: Vec::new(),
            lines,
        }));
    }

    let mut lines = Vec::with_capacity(items.len());
    for point in items {
        let coords: Option<Vec<f64>> = point
            .as_list()
            .map(|c| c.iter().filter_map(ConfigValue::as_f64).collect());
        match coords {
            Some(c) if c.len() == 3 => {
                lines.push(format!("{} {} {} 1.0", c[0], c[1], c[2]));
            }
            _ => {
                return Err(CalculatorError::invalid(
                    KPTS_KEY,
                    "expected [n1, n2, n3] or a list of [kx, ky, kz] points",
                ))
            }
        }
    }
    Ok(Some(HsdBlock {
        kind: None,
        children: Vec::new(),
        lines,
    }))
}

/// Parse a `results.tag` file into tag name -> numeric values.
///
/// Header lines look like `total_energy :real:0:`; values follow on the
/// lines until the next header. Non-numeric tags are skipped.
fn parse_results_tag(contents: &str) -> Result<HashMap<String, Vec<f64>>, CalculatorError> {
    let mut tags: HashMap<String, Vec<f64>> = HashMap::new();
    let mut current: Option<(String, bool)> = None;

    for line in contents.lines() {
        if let Some((name, rest)) = line.split_once(':') {
            let numeric = matches!(rest.split(':').next(), Some("real") | Some("integer"));
            let name = name.trim().to_string();
            if numeric {
                tags.entry(name.clone()).or_default();
            }
            current = Some((name, numeric));
            continue;
        }

        let Some((name, true)) = &current else {
            continue;
        };
        let values = tags.entry(name.clone()).or_default();
        for token in line.split_whitespace() {
            let value: f64 = token.replace(['D', 'd'], "E").parse().map_err(|_| {
                CalculatorError::parse(RESULTS_TAG_FILE, format!("bad number '{}' in {}", token, name))
            })?;
            values.push(value);
        }
    }

    Ok(tags)
}

type GenGeometry = (Vec<[f64; 3]>, Option<[[f64; 3]; 3]>);

/// Parse a DFTB+ gen-format geometry into Cartesian positions and optional cell
fn parse_gen(contents: &str) -> Result<GenGeometry, CalculatorError> {
    let bad = |reason: &str| CalculatorError::parse(GEOMETRY_OUT_FILE, reason.to_string());
    let mut lines = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let header = lines.next().ok_or_else(|| bad("empty file"))?;
    let mut header_tokens = header.split_whitespace();
    let natoms: usize = header_tokens
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| bad("missing atom count"))?;
    let format = header_tokens.next().unwrap_or("C").to_ascii_uppercase();

    // Species line; symbols come from the input structure
    lines.next().ok_or_else(|| bad("missing species line"))?;

    let parse_row = |line: &str, skip: usize| -> Result<[f64; 3], CalculatorError> {
        let values: Vec<f64> = line
            .split_whitespace()
            .skip(skip)
            .take(3)
            .map(|t| t.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| bad("bad coordinate"))?;
        match values.as_slice() {
            [x, y, z] => Ok([*x, *y, *z]),
            _ => Err(bad("expected three coordinates")),
        }
    };

    let mut positions = Vec::with_capacity(natoms);
    for _ in 0..natoms {
        let line = lines.next().ok_or_else(|| bad("truncated atom list"))?;
        positions.push(parse_row(line, 2)?);
    }

    if format == "C" {
        return Ok((positions, None));
    }

    lines.next().ok_or_else(|| bad("missing origin"))?;
    let mut cell = [[0.0; 3]; 3];
    for row in cell.iter_mut() {
        *row = parse_row(lines.next().ok_or_else(|| bad("missing lattice vector"))?, 0)?;
    }

    if format == "F" {
        positions = positions
            .into_iter()
            .map(|frac| {
                let mut cart = [0.0; 3];
                for (axis, value) in cart.iter_mut().enumerate() {
                    *value = (0..3).map(|i| frac[i] * cell[i][axis]).sum();
                }
                cart
            })
            .collect();
    }

    Ok((positions, Some(cell)))
}
