//! calc-recipes CLI
//!
//! Entry point for the `calc-recipes` command-line tool.

use calc_recipes::recipes::dftb::{self, DftbMethod};
use calc_recipes::recipes::psi4::{self, Psi4Options};
use calc_recipes::{
    Atoms, ConfigMap, ConfigValue, CopyFiles, EffectiveSettings, LocalRunner, Remove, RunSummary,
};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "calc-recipes")]
#[command(about = "Run DFTB+ and Psi4 calculation recipes", version)]
struct Cli {
    /// Settings file (default: $CALC_RECIPES_CONFIG_FILE)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Scratch directory for running calculations
    #[arg(long, global = true)]
    scratch_dir: Option<PathBuf>,

    /// Directory that receives calculation outputs
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// Keep scratch directories after collecting outputs
    #[arg(long, global = true)]
    keep_scratch: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// DFTB+ recipes
    Dftb {
        #[command(subcommand)]
        job: DftbJob,
    },

    /// Psi4 recipes
    Psi4 {
        #[command(subcommand)]
        job: Psi4Job,
    },

    /// Print the effective settings and where they came from
    Settings,
}

#[derive(Subcommand)]
enum DftbJob {
    /// Single-point calculation
    Static {
        #[command(flatten)]
        common: JobArgs,

        /// GFN1-xTB, GFN2-xTB or DFTB
        #[arg(long, default_value = "GFN2-xTB")]
        method: String,

        /// Monkhorst-Pack grid, e.g. 3,3,3
        #[arg(long, value_delimiter = ',')]
        kpts: Option<Vec<u32>>,
    },

    /// Geometry optimization
    Relax {
        #[command(flatten)]
        common: JobArgs,

        /// GFN1-xTB, GFN2-xTB or DFTB
        #[arg(long, default_value = "GFN2-xTB")]
        method: String,

        /// Monkhorst-Pack grid, e.g. 3,3,3
        #[arg(long, value_delimiter = ',')]
        kpts: Option<Vec<u32>>,

        /// Also optimize the lattice vectors
        #[arg(long)]
        relax_cell: bool,
    },
}

#[derive(Subcommand)]
enum Psi4Job {
    /// Single-point calculation
    Static {
        #[command(flatten)]
        common: JobArgs,

        #[arg(long, default_value = "wb97m-v")]
        method: String,

        #[arg(long, default_value = "def2-tzvp")]
        basis: String,

        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        charge: i32,

        #[arg(long, default_value_t = 1)]
        spin_multiplicity: u32,
    },
}

#[derive(Args)]
struct JobArgs {
    /// Structure as JSON (symbols, positions, optional cell and pbc)
    #[arg(long, short = 's')]
    structure: PathBuf,

    /// Override a parameter; the value is parsed as JSON, else taken as a string
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set: Vec<String>,

    /// Remove a default parameter; dots address nested keys
    #[arg(long = "remove", value_name = "KEY")]
    remove: Vec<String>,

    /// JSON file of parameter overrides, applied before --set and --remove
    #[arg(long)]
    overrides: Option<PathBuf>,

    /// Copy every file from this directory into the run directory
    #[arg(long, conflicts_with = "copy_files")]
    copy_from: Option<PathBuf>,

    /// Files to copy as JSON: a directory path, or {"dir": ["glob", ...]}
    #[arg(long, value_name = "JSON")]
    copy_files: Option<String>,
}

struct PreparedJob {
    atoms: Atoms,
    swaps: ConfigMap,
    copy_files: Option<CopyFiles>,
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let settings = match EffectiveSettings::from_env(cli.config.as_deref(), Some(&cli_settings(&cli))) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Settings error: {}", e);
            process::exit(1);
        }
    };

    match cli.command {
        Commands::Settings => print_json(&settings),
        Commands::Dftb { job } => {
            let runner = LocalRunner::new(settings.settings);
            let summary = match job {
                DftbJob::Static { common, method, kpts } => {
                    let job = prepare(&common);
                    dftb::static_job(
                        &runner,
                        &job.atoms,
                        parse_method(&method),
                        kpts.map(mesh),
                        job.copy_files.as_ref(),
                        Some(&job.swaps),
                    )
                }
                DftbJob::Relax {
                    common,
                    method,
                    kpts,
                    relax_cell,
                } => {
                    let job = prepare(&common);
                    dftb::relax_job(
                        &runner,
                        &job.atoms,
                        parse_method(&method),
                        kpts.map(mesh),
                        relax_cell,
                        job.copy_files.as_ref(),
                        Some(&job.swaps),
                    )
                }
            };
            report(summary);
        }
        Commands::Psi4 { job } => {
            let runner = LocalRunner::new(settings.settings);
            let summary = match job {
                Psi4Job::Static {
                    common,
                    method,
                    basis,
                    charge,
                    spin_multiplicity,
                } => {
                    let job = prepare(&common);
                    let options = Psi4Options {
                        charge,
                        spin_multiplicity,
                        method,
                        basis,
                    };
                    psi4::static_job(
                        &runner,
                        &job.atoms,
                        &options,
                        job.copy_files.as_ref(),
                        Some(&job.swaps),
                    )
                }
            };
            report(summary);
        }
    }
}

fn cli_settings(cli: &Cli) -> ConfigMap {
    let mut map = ConfigMap::new();
    if let Some(dir) = &cli.scratch_dir {
        map.insert("scratch_dir", dir.display().to_string());
    }
    if let Some(dir) = &cli.results_dir {
        map.insert("results_dir", dir.display().to_string());
    }
    if cli.keep_scratch {
        map.insert("keep_scratch", true);
    }
    map
}

fn parse_method(method: &str) -> DftbMethod {
    match method.parse() {
        Ok(method) => method,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    }
}

fn mesh(kpts: Vec<u32>) -> [u32; 3] {
    match kpts.as_slice() {
        &[a, b, c] => [a, b, c],
        _ => {
            eprintln!("Error: --kpts takes three values, e.g. 3,3,3");
            process::exit(2);
        }
    }
}

fn prepare(args: &JobArgs) -> PreparedJob {
    let atoms = match Atoms::load(&args.structure) {
        Ok(atoms) => atoms,
        Err(e) => {
            eprintln!("Error loading {}: {}", args.structure.display(), e);
            process::exit(1);
        }
    };

    let swaps = match build_swaps(args.overrides.as_deref(), &args.set, &args.remove) {
        Ok(swaps) => swaps,
        Err(e) => {
            eprintln!("Invalid overrides: {}", e);
            process::exit(2);
        }
    };

    let copy_files = match (&args.copy_from, &args.copy_files) {
        (Some(dir), _) => Some(CopyFiles::Directory(dir.clone())),
        (None, Some(raw)) => match parse_copy_files(raw) {
            Ok(spec) => Some(spec),
            Err(e) => {
                eprintln!("Invalid --copy-files: {}", e);
                process::exit(2);
            }
        },
        (None, None) => None,
    };

    PreparedJob {
        atoms,
        swaps,
        copy_files,
    }
}

/// A bare path is taken as a directory even without JSON quotes
fn parse_copy_files(raw: &str) -> Result<CopyFiles, String> {
    let trimmed = raw.trim();
    if !trimmed.starts_with('{') && !trimmed.starts_with('"') {
        return Ok(CopyFiles::Directory(PathBuf::from(trimmed)));
    }
    serde_json::from_str(trimmed).map_err(|e| e.to_string())
}

fn build_swaps(
    overrides: Option<&Path>,
    set: &[String],
    remove: &[String],
) -> Result<ConfigMap, String> {
    let mut swaps = match overrides {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            let value: serde_json::Value = serde_json::from_str(&contents)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            ConfigMap::try_from(value).map_err(|e| format!("{}: {}", path.display(), e))?
        }
        None => ConfigMap::new(),
    };

    for assignment in set {
        let (key, raw) = assignment
            .split_once('=')
            .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", assignment))?;
        swaps.insert(key.trim(), parse_value(raw));
    }

    for key in remove {
        swaps
            .insert_path(key, Remove)
            .map_err(|e| e.to_string())?;
    }

    Ok(swaps)
}

/// JSON if it parses, otherwise the raw string
fn parse_value(raw: &str) -> ConfigValue {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(ConfigValue::from)
        .unwrap_or_else(|_| ConfigValue::from(raw))
}

fn report(summary: Result<RunSummary, calc_recipes::RecipeError>) {
    match summary {
        Ok(summary) => print_json(&summary),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}
