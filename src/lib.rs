//! calc-recipes: recipes for running external quantum chemistry codes
//!
//! A recipe builds default calculator parameters, merges caller overrides on
//! top with [`merge`], runs the calculator through a [`Runner`] and returns
//! a [`RunSummary`]. Supported programs are DFTB+ and Psi4.

pub mod atoms;
pub mod calculator;
pub mod files;
pub mod mock;
pub mod recipes;
pub mod runner;
pub mod settings;
pub mod summary;

pub use atoms::{Atoms, AtomsError, CalcResults};
pub use calc_config::{merge, merge_layers, ConfigError, ConfigMap, ConfigValue, Remove};
pub use calculator::{Calculator, CalculatorError, Dftb, Program, Psi4};
pub use files::{copy_files, CopyFiles, CopyFilesError, Filenames};
pub use recipes::RecipeError;
pub use runner::{ExecutionError, LocalRunner, Runner};
pub use settings::{EffectiveSettings, Settings, SettingsError};
pub use summary::{summarize_run, RunSummary};
