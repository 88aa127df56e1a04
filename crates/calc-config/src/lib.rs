//! Calculator parameter maps with recursive merge and key removal.
//!
//! Recipes build a map of default calculator parameters and let callers
//! override any of them. Overrides are merged recursively; an override value
//! of [`Remove`] deletes the key instead of setting it.
//!
//! ```
//! use calc_config::{merge, ConfigMap, Remove};
//!
//! let defaults = ConfigMap::new().with("MaxSccIterations", 200).with("kpts", vec![1, 1, 1]);
//! let swaps = ConfigMap::new().with("kpts", Remove);
//! let merged = merge(Some(&defaults), Some(&swaps));
//! assert!(merged.get("kpts").is_none());
//! ```

mod error;
mod merge;
mod value;

pub use error::ConfigError;
pub use merge::{merge, merge_layers};
pub use value::{ConfigMap, ConfigValue, Remove};
