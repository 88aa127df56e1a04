//! Recipes: thin functions that build calculator defaults, apply caller
//! overrides, run the calculation and summarize the result.
//!
//! Overrides are plain [`ConfigMap`]s merged on top of each recipe's
//! defaults. A [`Remove`](calc_config::Remove) value deletes a default.
//! Each recipe module publishes a `RECOGNIZED_OPTIONS` table describing the
//! defaults it sets.

pub mod dftb;
pub mod psi4;

use calc_config::{merge, ConfigMap};
use thiserror::Error;

use crate::atoms::AtomsError;
use crate::runner::ExecutionError;

/// Errors returned by recipes
#[derive(Debug, Error)]
pub enum RecipeError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("unknown method '{0}'")]
    InvalidMethod(String),

    #[error("invalid k-points: {0}")]
    InvalidKpts(String),

    #[error("spin multiplicity must be at least 1, got {0}")]
    InvalidMultiplicity(u32),

    #[error(transparent)]
    InvalidStructure(#[from] AtomsError),
}

/// A default key set by a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecognizedOption {
    pub key: &'static str,
    pub default: &'static str,
    pub effect: &'static str,
}

/// Look up a recognized option by key
pub fn find_option<'a>(table: &'a [RecognizedOption], key: &str) -> Option<&'a RecognizedOption> {
    table.iter().find(|option| option.key == key)
}

/// Merge caller swaps over recipe defaults. Removal markers left in the
/// result (for keys absent from the defaults) are dropped.
pub(crate) fn prepare_parameters(defaults: &ConfigMap, swaps: Option<&ConfigMap>) -> ConfigMap {
    merge(Some(defaults), swaps).strip_removals()
}
